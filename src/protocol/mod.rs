//! Wire protocol shared by the relay and its participants.
//!
//! Every frame is one JSON object per line. Events optionally carry an
//! acknowledgement id; the receiver answers with an `ack` frame echoing it.

mod codec;
mod frame;
mod payloads;

pub use codec::{FrameCodec, FrameCodecError, MAX_FRAME_LENGTH};
pub use frame::{Frame, FrameError};
pub use payloads::{
    AgentCallData, EnterOfficeNotification, EnvelopeReply, GetConfigReply, GetConfigRequest,
    GetToolsReply, GetToolsRequest, JoinOfficeRequest, LeaveOfficeNotification,
    LeaveOfficeRequest, SessionWelcome, SmcpTool, ToolCallRequest, UpdateConfigNotification,
    UpdateConfigRequest,
};

/// Event names.
pub mod events {
    /// Participant joins an office.
    pub const JOIN_OFFICE: &str = "server:join_office";
    /// Participant leaves an office.
    pub const LEAVE_OFFICE: &str = "server:leave_office";
    /// Computer announces a configuration change.
    pub const UPDATE_CONFIG: &str = "server:update_mcp_config";
    /// Agent announces cancellation of a tool call.
    pub const CANCEL_TOOL_CALL: &str = "server:tool_call_cancel";
    /// Agent invokes a tool on a Computer.
    pub const TOOL_CALL: &str = "client:tool_call";
    /// Agent lists a Computer's tools.
    pub const GET_TOOLS: &str = "client:get_tools";
    /// Agent reads a Computer's server configuration.
    pub const GET_CONFIG: &str = "client:get_mcp_config";
    /// Relay tells a new connection its participant id.
    pub const SESSION: &str = "notify:session";
    /// Someone entered the office.
    pub const ENTER_OFFICE_NOTIFICATION: &str = "notify:enter_office";
    /// Someone is leaving the office.
    pub const LEAVE_OFFICE_NOTIFICATION: &str = "notify:leave_office";
    /// A Computer in the office changed its configuration.
    pub const UPDATE_CONFIG_NOTIFICATION: &str = "notify:update_mcp_config";
    /// The office Agent cancelled a tool call.
    pub const CANCEL_TOOL_CALL_NOTIFICATION: &str = "notify:tool_call_cancel";
}
