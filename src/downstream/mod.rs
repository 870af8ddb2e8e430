//! Downstream MCP server connections for a Computer.
//!
//! Each configured downstream tool provider is reached through one
//! [`services::DownstreamConnection`], an explicit lifecycle state machine
//! wrapped around a transport-specific [`ports::DownstreamClient`]. The
//! module follows hexagonal architecture:
//!
//! - Domain types in [`domain`]
//! - Port contracts in [`ports`]
//! - Adapter implementations in [`adapters`]
//! - Lifecycle services in [`services`]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;
