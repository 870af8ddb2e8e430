//! Computer side: the orchestrator over a [`crate::registry::services::ToolManager`],
//! invocation confirmation and the relay connection.

mod confirmation;
mod endpoint;
mod orchestrator;
mod relay_client;

#[cfg(test)]
pub(crate) use confirmation::MockConfirmationPolicy;
pub use confirmation::{ConfirmationError, ConfirmationPolicy, ConfirmationRequest};
pub use endpoint::{ComputerEndpoint, EndpointError};
pub use orchestrator::{TOOL_ANNOTATION_META, ToolOrchestrator};
pub use relay_client::{Incoming, RelayClient, RelayClientError, RelayClientResult};
