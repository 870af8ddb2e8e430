//! Error types for downstream configuration and connection state.

use super::{ConnectionState, Trigger, TransportKind};
use thiserror::Error;

/// Errors returned while constructing downstream configuration values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DownstreamConfigError {
    /// The server name is empty after trimming.
    #[error("downstream server name must not be empty")]
    EmptyServerName,

    /// The stdio command is empty.
    #[error("stdio command must not be empty")]
    EmptyStdioCommand,

    /// The HTTP URL is empty.
    #[error("downstream server URL must not be empty")]
    EmptyUrl,

    /// The HTTP URL does not have an `http://` or `https://` prefix.
    #[error("downstream server URL '{0}' must start with 'http://' or 'https://'")]
    InvalidUrl(String),

    /// Transport parameters could not be decoded.
    #[error("invalid {kind} server parameters: {reason}")]
    InvalidParameters {
        /// Declared transport tag.
        kind: TransportKind,
        /// Decoder message.
        reason: String,
    },
}

/// Errors returned by the connection state machine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionStateError {
    /// No transition for the trigger starts in the current state.
    #[error("cannot {trigger} a connection in state {state}")]
    InvalidTransition {
        /// Trigger that was fired.
        trigger: Trigger,
        /// State the connection was in.
        state: ConnectionState,
    },

    /// The transition guard refused the trigger.
    #[error("{trigger} refused in state {state}: no live session")]
    GuardRejected {
        /// Trigger that was fired.
        trigger: Trigger,
        /// State the connection was in.
        state: ConnectionState,
    },

    /// Tool operations require a connected session.
    #[error("downstream server '{server}' is not connected (current state: {state})")]
    NotConnected {
        /// Server name.
        server: String,
        /// Current state.
        state: ConnectionState,
    },
}

/// Error returned while parsing a connection state name.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown connection state: {0}")]
pub struct ParseConnectionStateError(pub String);
