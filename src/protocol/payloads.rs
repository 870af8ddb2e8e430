//! Request, reply and notification payloads.

use crate::relay::domain::Role;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Sent by the relay to every new connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionWelcome {
    /// Participant id assigned to the connection.
    pub sid: String,
}

/// Join an office under a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinOfficeRequest {
    /// Role to bind.
    pub role: Role,
    /// Display name; empty selects a default derived from the id.
    #[serde(default)]
    pub name: String,
    /// Office to join.
    pub office_id: String,
}

/// Leave an office.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveOfficeRequest {
    /// Office to leave.
    pub office_id: String,
}

/// Envelope-level outcome of a membership or forwarding request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeReply {
    /// Whether the request was accepted.
    pub ok: bool,
    /// Rejection reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EnvelopeReply {
    /// Creates an accepting reply.
    #[must_use]
    pub const fn accepted() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    /// Creates a rejecting reply.
    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(reason.into()),
        }
    }
}

/// Identifies the Agent and request behind an Agent-issued event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCallData {
    /// Participant id of the issuing Agent.
    pub robot_id: String,
    /// Caller-chosen request id.
    pub req_id: String,
}

/// Invoke a tool on one Computer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Participant id of the issuing Agent.
    pub robot_id: String,
    /// Caller-chosen request id.
    pub req_id: String,
    /// Participant id of the target Computer.
    pub computer: String,
    /// Effective tool name.
    pub tool_name: String,
    /// Tool arguments.
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Deadline for the acknowledgement in milliseconds.
    pub timeout_ms: u64,
}

/// List the tools of one Computer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetToolsRequest {
    /// Participant id of the issuing Agent.
    pub robot_id: String,
    /// Caller-chosen request id.
    pub req_id: String,
    /// Participant id of the target Computer.
    pub computer: String,
}

/// Tool as presented to Agents.
///
/// Metadata values that are not scalars are carried as JSON-encoded
/// strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmcpTool {
    /// Effective tool name.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// JSON schema of the arguments.
    pub params_schema: Value,
    /// JSON schema of the structured result.
    #[serde(default)]
    pub return_schema: Option<Value>,
    /// Flattened metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

/// Reply to [`GetToolsRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetToolsReply {
    /// Tools of the Computer.
    pub tools: Vec<SmcpTool>,
    /// Request id echoed from the request.
    pub req_id: String,
}

/// Read the server configuration of one Computer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetConfigRequest {
    /// Participant id of the issuing Agent.
    pub robot_id: String,
    /// Caller-chosen request id.
    pub req_id: String,
    /// Participant id of the target Computer.
    pub computer: String,
}

/// Reply to [`GetConfigRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetConfigReply {
    /// Server configurations keyed by name.
    pub servers: BTreeMap<String, Value>,
    /// Input definitions, kept opaque.
    #[serde(default)]
    pub inputs: Vec<Value>,
}

/// Announce a configuration change of a Computer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateConfigRequest {
    /// Participant id of the announcing Computer.
    pub computer: String,
}

/// Someone entered the office.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnterOfficeNotification {
    /// Office entered.
    pub office_id: String,
    /// Participant id when a Computer entered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computer: Option<String>,
    /// Participant id when an Agent entered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

/// Someone is about to leave the office.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveOfficeNotification {
    /// Office being left.
    pub office_id: String,
    /// Participant id when a Computer leaves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computer: Option<String>,
    /// Participant id when an Agent leaves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

/// A Computer in the office changed its configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateConfigNotification {
    /// Participant id of the Computer.
    pub computer: String,
}
