//! Domain model for downstream server configuration, tool discovery and the
//! connection lifecycle.
//!
//! Configuration values are immutable once constructed; replacing a server's
//! settings always means replacing the whole [`DownstreamServerConfig`].

mod config;
mod error;
mod result;
mod state;
mod tool;

pub use config::{
    A2C_TOOL_META, DownstreamServerConfig, SseParameters, StdioParameters,
    StreamableHttpParameters, ToolMeta, TransportConfig, TransportKind,
};
pub use error::{ConnectionStateError, DownstreamConfigError, ParseConnectionStateError};
pub use result::{CallToolResult, ToolContent};
pub use state::{ConnectionSnapshot, ConnectionState, Trigger};
pub(crate) use state::{Action, Guard, Transition};
pub use tool::{ToolDescriptor, ToolPage};
