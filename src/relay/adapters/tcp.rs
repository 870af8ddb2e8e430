//! Relay over TCP: one connection per participant, one JSON frame per line.

use crate::downstream::domain::CallToolResult;
use crate::protocol::{
    AgentCallData, EnvelopeReply, Frame, FrameCodec, GetConfigRequest, GetToolsRequest,
    JoinOfficeRequest, LeaveOfficeRequest, SessionWelcome, ToolCallRequest, UpdateConfigRequest,
    events,
};
use crate::relay::domain::ParticipantId;
use crate::relay::services::{CoordinatorResult, SessionCoordinator};
use futures::{SinkExt, StreamExt};
use mockable::Clock;
use serde::Serialize;
use std::io;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, info_span, warn};

enum Forwarded {
    ToolCall(ToolCallRequest),
    GetTools(GetToolsRequest),
    GetConfig(GetConfigRequest),
}

/// Accepts participant connections and feeds their frames to a
/// [`SessionCoordinator`].
///
/// Membership events of one connection are handled in arrival order;
/// forwarded requests run on their own task so a slow Computer never stalls
/// the caller's connection.
pub struct RelayServer<C>
where
    C: Clock + Send + Sync + 'static,
{
    coordinator: Arc<SessionCoordinator<C>>,
    span: Span,
}

impl<C> RelayServer<C>
where
    C: Clock + Send + Sync + 'static,
{
    /// Creates a server around `coordinator`.
    #[must_use]
    pub fn new(coordinator: Arc<SessionCoordinator<C>>) -> Self {
        Self {
            coordinator,
            span: Span::none(),
        }
    }

    /// Sets the parent span of connection spans.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Returns the coordinator.
    #[must_use]
    pub const fn coordinator(&self) -> &Arc<SessionCoordinator<C>> {
        &self.coordinator
    }

    /// Accepts connections until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error when the listener's address cannot be read.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> io::Result<()> {
        let local = listener.local_addr()?;
        info!(parent: &self.span, %local, "relay listening");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!(parent: &self.span, "relay shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let span = info_span!(parent: &self.span, "participant", %peer);
                        tokio::spawn(
                            serve_connection(Arc::clone(&self.coordinator), stream, shutdown.child_token())
                                .instrument(span),
                        );
                    }
                    Err(err) => warn!(parent: &self.span, error = %err, "accept failed"),
                },
            }
        }
    }
}

async fn serve_connection<C>(
    coordinator: Arc<SessionCoordinator<C>>,
    stream: TcpStream,
    shutdown: CancellationToken,
) where
    C: Clock + Send + Sync + 'static,
{
    let (read_half, write_half) = stream.into_split();
    let (outbox, mut queued) = mpsc::unbounded_channel::<Frame>();
    tokio::spawn(
        async move {
            let mut sink = FramedWrite::new(write_half, FrameCodec::new());
            while let Some(frame) = queued.recv().await {
                if let Err(err) = sink.send(frame).await {
                    debug!(error = %err, "write failed");
                    break;
                }
            }
        }
        .in_current_span(),
    );

    let id = coordinator.connect(Arc::new(outbox.clone()));
    let welcome = SessionWelcome {
        sid: id.to_string(),
    };
    match Frame::emit(events::SESSION, &welcome) {
        Ok(frame) => {
            if outbox.send(frame).is_err() {
                debug!(participant = %id, "connection closed before welcome");
            }
        }
        Err(err) => warn!(error = %err, "cannot encode welcome"),
    }

    let mut frames = FramedRead::new(read_half, FrameCodec::new());
    loop {
        let next = tokio::select! {
            () = shutdown.cancelled() => break,
            item = frames.next() => item,
        };
        match next {
            None => break,
            Some(Err(err)) => {
                warn!(participant = %id, error = %err, "dropping connection after framing error");
                break;
            }
            Some(Ok(frame)) => handle_frame(&coordinator, &id, &outbox, &frame),
        }
    }

    if let Some(record) = coordinator.disconnect(&id) {
        info!(participant = %id, role = ?record.role(), "participant disconnected");
    }
}

fn handle_frame<C>(
    coordinator: &Arc<SessionCoordinator<C>>,
    id: &ParticipantId,
    outbox: &UnboundedSender<Frame>,
    frame: &Frame,
) where
    C: Clock + Send + Sync + 'static,
{
    let (event, ack) = match frame {
        Frame::Ack { ack: acked, data } => {
            if !coordinator.resolve_ack(id, *acked, data.clone()) {
                debug!(participant = %id, ack = *acked, "unexpected acknowledgement");
            }
            return;
        }
        Frame::Event {
            event: name,
            ack: wanted,
            ..
        } => (name.clone(), *wanted),
    };
    debug!(participant = %id, event = %event, ?ack, "received event");

    match event.as_str() {
        events::JOIN_OFFICE => {
            let outcome = frame
                .decode::<JoinOfficeRequest>()
                .map_err(Into::into)
                .and_then(|request| coordinator.join(id, &request).map(|_| ()));
            answer(outbox, ack, &envelope(&outcome));
        }
        events::LEAVE_OFFICE => {
            let outcome = frame
                .decode::<LeaveOfficeRequest>()
                .map_err(Into::into)
                .and_then(|request| coordinator.leave(id, &request));
            answer(outbox, ack, &envelope(&outcome));
        }
        events::UPDATE_CONFIG => {
            let outcome = frame
                .decode::<UpdateConfigRequest>()
                .map_err(Into::into)
                .and_then(|request| coordinator.announce_config_update(id, &request).map(|_| ()));
            answer_broadcast(outbox, id, &event, ack, &outcome);
        }
        events::CANCEL_TOOL_CALL => {
            let outcome = frame
                .decode::<AgentCallData>()
                .map_err(Into::into)
                .and_then(|request| coordinator.broadcast_cancel(id, &request).map(|_| ()));
            answer_broadcast(outbox, id, &event, ack, &outcome);
        }
        events::TOOL_CALL => match frame.decode::<ToolCallRequest>() {
            Ok(request) => spawn_forward(coordinator, id, outbox, Forwarded::ToolCall(request), ack),
            Err(err) => answer(outbox, ack, &CallToolResult::error_text(err.to_string(), "InvalidRequest")),
        },
        events::GET_TOOLS => match frame.decode::<GetToolsRequest>() {
            Ok(request) => spawn_forward(coordinator, id, outbox, Forwarded::GetTools(request), ack),
            Err(err) => answer(outbox, ack, &EnvelopeReply::rejected(err.to_string())),
        },
        events::GET_CONFIG => match frame.decode::<GetConfigRequest>() {
            Ok(request) => spawn_forward(coordinator, id, outbox, Forwarded::GetConfig(request), ack),
            Err(err) => answer(outbox, ack, &EnvelopeReply::rejected(err.to_string())),
        },
        other => {
            warn!(participant = %id, event = other, "unknown event");
            answer(outbox, ack, &EnvelopeReply::rejected(format!("unknown event {other}")));
        }
    }
}

fn spawn_forward<C>(
    coordinator: &Arc<SessionCoordinator<C>>,
    id: &ParticipantId,
    outbox: &UnboundedSender<Frame>,
    forwarded: Forwarded,
    ack: Option<u64>,
) where
    C: Clock + Send + Sync + 'static,
{
    let shared = Arc::clone(coordinator);
    let caller = id.clone();
    let replies = outbox.clone();
    tokio::spawn(
        async move {
            match forwarded {
                Forwarded::ToolCall(request) => {
                    match shared.forward_tool_call(&caller, &request).await {
                        Ok(reply) => answer(&replies, ack, &reply),
                        Err(err) => answer(
                            &replies,
                            ack,
                            &CallToolResult::error_text(err.to_string(), err.kind()),
                        ),
                    }
                }
                Forwarded::GetTools(request) => {
                    match shared.forward_get_tools(&caller, &request).await {
                        Ok(reply) => answer(&replies, ack, &reply),
                        Err(err) => answer(&replies, ack, &EnvelopeReply::rejected(err.to_string())),
                    }
                }
                Forwarded::GetConfig(request) => {
                    match shared.forward_get_config(&caller, &request).await {
                        Ok(reply) => answer(&replies, ack, &reply),
                        Err(err) => answer(&replies, ack, &EnvelopeReply::rejected(err.to_string())),
                    }
                }
            }
        }
        .in_current_span(),
    );
}

fn envelope(outcome: &CoordinatorResult<()>) -> EnvelopeReply {
    match outcome {
        Ok(()) => EnvelopeReply::accepted(),
        Err(err) => EnvelopeReply::rejected(err.to_string()),
    }
}

fn answer_broadcast(
    outbox: &UnboundedSender<Frame>,
    id: &ParticipantId,
    event: &str,
    ack: Option<u64>,
    outcome: &CoordinatorResult<()>,
) {
    if let Err(err) = outcome {
        warn!(participant = %id, event, error = %err, "broadcast rejected");
    }
    answer(outbox, ack, &envelope(outcome));
}

fn answer(outbox: &UnboundedSender<Frame>, ack: Option<u64>, data: &impl Serialize) {
    let Some(id) = ack else {
        return;
    };
    match Frame::reply(id, data) {
        Ok(frame) => {
            if outbox.send(frame).is_err() {
                debug!(ack = id, "connection closed before reply");
            }
        }
        Err(err) => warn!(ack = id, error = %err, "cannot encode reply"),
    }
}
