//! In-memory integration tests for tool aggregation.
//!
//! Tests are organized into modules by functionality:
//! - `manager_tests`: Registry rebuilds, rollback and tool execution
//! - `orchestrator_tests`: Confirmation flow and Agent-facing listings

mod in_memory {
    pub mod helpers;

    mod manager_tests;
    mod orchestrator_tests;
}
