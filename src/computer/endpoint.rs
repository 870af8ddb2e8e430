//! Answers requests the relay forwards to this Computer.

use super::{Incoming, RelayClient, RelayClientError, ToolOrchestrator};
use crate::downstream::{domain::CallToolResult, ports::ClientFactory};
use crate::protocol::{
    EnvelopeReply, GetConfigRequest, GetToolsReply, GetToolsRequest, ToolCallRequest,
    UpdateConfigRequest, events,
};
use crate::relay::domain::{OfficeId, ParticipantId, Role};
use mockable::Clock;
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{Instrument, Span, debug, info, warn};

/// Reasons a forwarded request is refused.
#[derive(Debug, Error)]
pub enum EndpointError {
    /// The request addresses another Computer.
    #[error("request addresses computer {addressed}, not this computer")]
    WrongComputer {
        /// Participant id named by the request.
        addressed: String,
    },

    /// This Computer has not joined an office.
    #[error("computer has not joined an office")]
    NotInOffice,

    /// The event is not a request a Computer serves.
    #[error("unsupported request {0}")]
    Unsupported(String),

    /// The request or reply could not be converted.
    #[error(transparent)]
    Payload(#[from] RelayClientError),

    /// The reply could not be encoded.
    #[error("cannot encode reply: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Binds a [`ToolOrchestrator`] to this Computer's relay identity.
pub struct ComputerEndpoint<F, C>
where
    F: ClientFactory + 'static,
    C: Clock + Send + Sync + 'static,
{
    orchestrator: Arc<ToolOrchestrator<F, C>>,
    sid: ParticipantId,
    office: RwLock<Option<OfficeId>>,
    span: Span,
}

impl<F, C> ComputerEndpoint<F, C>
where
    F: ClientFactory + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Creates an endpoint for the participant `sid`.
    #[must_use]
    pub fn new(orchestrator: Arc<ToolOrchestrator<F, C>>, sid: ParticipantId) -> Self {
        Self {
            orchestrator,
            sid,
            office: RwLock::new(None),
            span: Span::none(),
        }
    }

    /// Sets the span that log events are recorded in.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Returns the orchestrator.
    #[must_use]
    pub const fn orchestrator(&self) -> &Arc<ToolOrchestrator<F, C>> {
        &self.orchestrator
    }

    /// Returns the office this Computer is in.
    #[must_use]
    pub fn office(&self) -> Option<OfficeId> {
        self.office
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_office(&self, office: Option<OfficeId>) {
        *self.office.write().unwrap_or_else(PoisonError::into_inner) = office;
    }

    /// Joins `office` as a Computer and records it.
    ///
    /// # Errors
    ///
    /// Returns the relay's rejection or transport failure.
    pub async fn join_office(
        &self,
        client: &RelayClient,
        office: OfficeId,
        name: &str,
        timeout: Duration,
    ) -> Result<(), EndpointError> {
        client
            .join_office(Role::Computer, name, office.as_str(), timeout)
            .await?;
        info!(parent: &self.span, %office, "computer joined office");
        self.set_office(Some(office));
        Ok(())
    }

    /// Leaves the current office, if any.
    ///
    /// # Errors
    ///
    /// Returns the relay's rejection or transport failure.
    pub async fn leave_office(
        &self,
        client: &RelayClient,
        timeout: Duration,
    ) -> Result<(), EndpointError> {
        let Some(office) = self.office() else {
            return Ok(());
        };
        client.leave_office(office.as_str(), timeout).await?;
        self.set_office(None);
        Ok(())
    }

    /// Tells the office that this Computer's configuration changed.
    ///
    /// Does nothing before a join.
    ///
    /// # Errors
    ///
    /// Returns [`RelayClientError::Closed`] once the connection is gone.
    pub fn announce_config_update(&self, client: &RelayClient) -> Result<(), EndpointError> {
        if self.office().is_none() {
            return Ok(());
        }
        client.emit(
            events::UPDATE_CONFIG,
            &UpdateConfigRequest {
                computer: self.sid.to_string(),
            },
        )?;
        Ok(())
    }

    fn check_target(&self, computer: &str) -> Result<(), EndpointError> {
        if computer != self.sid.as_str() {
            return Err(EndpointError::WrongComputer {
                addressed: computer.to_owned(),
            });
        }
        if self.office().is_none() {
            return Err(EndpointError::NotInOffice);
        }
        Ok(())
    }

    /// Produces the reply to one forwarded request.
    ///
    /// Tool calls always produce a [`CallToolResult`], failed when the call
    /// is refused.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError`] for refused `get_tools` and `get_config`
    /// requests and unsupported events.
    pub async fn handle(&self, request: &Incoming) -> Result<Value, EndpointError> {
        match request.event() {
            events::TOOL_CALL => {
                let result = match request.decode::<ToolCallRequest>() {
                    Ok(call) => self.call_tool(call).await,
                    Err(err) => CallToolResult::error_text(err.to_string(), "InvalidRequest"),
                };
                Ok(serde_json::to_value(result)?)
            }
            events::GET_TOOLS => {
                let listing: GetToolsRequest = request.decode()?;
                self.check_target(&listing.computer)?;
                let reply = GetToolsReply {
                    tools: self.orchestrator.get_tools(),
                    req_id: listing.req_id,
                };
                Ok(serde_json::to_value(reply)?)
            }
            events::GET_CONFIG => {
                let query: GetConfigRequest = request.decode()?;
                self.check_target(&query.computer)?;
                Ok(serde_json::to_value(self.orchestrator.get_config())?)
            }
            other => Err(EndpointError::Unsupported(other.to_owned())),
        }
    }

    async fn call_tool(&self, call: ToolCallRequest) -> CallToolResult {
        if let Err(err) = self.check_target(&call.computer) {
            warn!(parent: &self.span, req_id = %call.req_id, error = %err, "tool call refused");
            return CallToolResult::error_text(err.to_string(), "PermissionDenied");
        }
        let timeout = (call.timeout_ms > 0).then(|| Duration::from_millis(call.timeout_ms));
        self.orchestrator
            .execute_tool(&call.req_id, &call.tool_name, call.params, timeout)
            .await
    }

    /// Serves forwarded requests until `incoming` closes.
    ///
    /// Each request runs on its own task; notifications are logged.
    pub async fn serve(
        self: Arc<Self>,
        client: &Arc<RelayClient>,
        mut incoming: mpsc::UnboundedReceiver<Incoming>,
    ) {
        while let Some(message) = incoming.recv().await {
            let Incoming::Request { ack, .. } = &message else {
                debug!(parent: &self.span, event = message.event(), "notification received");
                continue;
            };
            let ack_id = *ack;
            let endpoint = Arc::clone(&self);
            let relay = Arc::clone(client);
            let span = self.span.clone();
            tokio::spawn(
                async move {
                    let sent = match endpoint.handle(&message).await {
                        Ok(reply) => relay.reply(ack_id, &reply),
                        Err(err) => {
                            warn!(event = message.event(), error = %err, "request refused");
                            relay.reply(ack_id, &EnvelopeReply::rejected(err.to_string()))
                        }
                    };
                    if let Err(err) = sent {
                        debug!(error = %err, "reply not sent");
                    }
                }
                .instrument(span),
            );
        }
        debug!(parent: &self.span, "relay connection closed");
    }
}
