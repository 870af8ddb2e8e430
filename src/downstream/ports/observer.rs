//! Observer notified after connection state transitions.

use crate::downstream::domain::ConnectionState;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Receives `(from, to)` notifications after each completed transition.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConnectionObserver: Send + Sync {
    /// Called once the connection named `server` moved from `from` to `to`.
    async fn on_transition(
        &self,
        server: &str,
        from: ConnectionState,
        to: ConnectionState,
    ) -> Result<(), ObserverError>;
}

/// Failure raised by an observer; logged and otherwise ignored.
#[derive(Debug, Clone, Error)]
#[error("connection observer failed: {0}")]
pub struct ObserverError(pub Arc<dyn std::error::Error + Send + Sync>);

impl ObserverError {
    /// Wraps an observer failure.
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self(Arc::new(err))
    }
}
