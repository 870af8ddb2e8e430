//! Errors for relay domain values.

use thiserror::Error;

/// Errors returned while constructing relay domain values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayDomainError {
    /// The office id is empty after trimming.
    #[error("office id must not be empty")]
    EmptyOfficeId,

    /// The participant id is empty after trimming.
    #[error("participant id must not be empty")]
    EmptyParticipantId,
}

/// Error returned while parsing a role name.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown participant role: {0}")]
pub struct ParseRoleError(pub String);
