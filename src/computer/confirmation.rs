//! Port asking a human (or a policy) whether a tool call may run.

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// A tool call awaiting approval.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationRequest {
    /// Request id chosen by the Agent.
    pub req_id: String,
    /// Server that owns the tool.
    pub server: String,
    /// Tool name as the server knows it.
    pub tool_name: String,
    /// Arguments of the call.
    pub arguments: Map<String, Value>,
}

/// Reasons a confirmation produced no decision.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfirmationError {
    /// Nobody answered in time.
    #[error("confirmation timed out")]
    TimedOut,

    /// The policy itself failed.
    #[error("confirmation failed: {0}")]
    Failed(String),
}

/// Decides whether a tool without `auto_apply` may run.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfirmationPolicy: Send + Sync {
    /// Returns `true` to approve the call.
    ///
    /// # Errors
    ///
    /// Returns [`ConfirmationError`] when no decision could be reached.
    async fn confirm(&self, request: &ConfirmationRequest) -> Result<bool, ConfirmationError>;
}
