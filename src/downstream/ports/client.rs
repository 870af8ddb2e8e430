//! Capability interface every downstream transport implements.

use crate::downstream::domain::{CallToolResult, DownstreamServerConfig, ToolPage};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type for downstream transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Session capability of one downstream tool provider.
///
/// `connect` opens the transport and completes the protocol handshake;
/// `disconnect` releases everything `connect` acquired. The connection
/// state machine guarantees both are called from the task that owns the
/// connection.
#[async_trait]
pub trait DownstreamClient: Send + Sync {
    /// Opens the transport and establishes a session.
    async fn connect(&self) -> TransportResult<()>;

    /// Closes the session and releases the transport.
    async fn disconnect(&self) -> TransportResult<()>;

    /// Returns one page of tools starting at `cursor`.
    async fn list_tools(&self, cursor: Option<String>) -> TransportResult<ToolPage>;

    /// Invokes the tool named `name` with `arguments`.
    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> TransportResult<CallToolResult>;
}

/// Creates a transport client for a server configuration.
pub trait ClientFactory: Send + Sync {
    /// Returns a fresh, unconnected client for `config`.
    fn create(&self, config: &DownstreamServerConfig) -> Arc<dyn DownstreamClient>;
}

/// Errors returned by downstream transport adapters.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// No session is open.
    #[error("downstream session is not connected")]
    NotConnected,

    /// The transport closed while a request was outstanding.
    #[error("downstream transport closed: {0}")]
    Closed(String),

    /// The peer sent something that is not valid protocol traffic.
    #[error("downstream protocol error: {0}")]
    Protocol(String),

    /// The peer answered with a JSON-RPC error.
    #[error("downstream error {code}: {message}")]
    Remote {
        /// JSON-RPC error code.
        code: i64,
        /// Error message from the peer.
        message: String,
    },

    /// The peer did not answer a request in time.
    #[error("downstream did not answer '{method}' within {timeout:?}")]
    TimedOut {
        /// JSON-RPC method that went unanswered.
        method: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },

    /// Underlying I/O or HTTP failure.
    #[error("downstream I/O error: {0}")]
    Io(Arc<dyn std::error::Error + Send + Sync>),
}

impl TransportError {
    /// Wraps an I/O or client error from a transport adapter.
    pub fn io(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Io(Arc::new(err))
    }

    /// Creates a protocol error from any displayable cause.
    pub fn protocol(cause: impl std::fmt::Display) -> Self {
        Self::Protocol(cause.to_string())
    }
}
