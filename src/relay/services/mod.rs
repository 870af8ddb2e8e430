//! Relay services.

mod coordinator;
mod error;

pub use coordinator::{DEFAULT_RPC_TIMEOUT, JoinOutcome, SessionCoordinator};
pub use error::{CoordinatorError, CoordinatorResult};
