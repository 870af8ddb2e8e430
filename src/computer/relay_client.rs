//! TCP client used by Agent and Computer processes to talk to the relay.

use crate::protocol::{
    EnvelopeReply, Frame, FrameCodec, FrameCodecError, FrameError, JoinOfficeRequest,
    LeaveOfficeRequest, SessionWelcome, events,
};
use crate::relay::domain::{ParticipantId, RelayDomainError, Role};
use futures::{SinkExt, StreamExt};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{Instrument, debug, info_span, warn};

/// How long to wait for the relay's session welcome.
const WELCOME_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors returned by [`RelayClient`].
#[derive(Debug, Error)]
pub enum RelayClientError {
    /// The socket could not be opened.
    #[error("relay connection failed: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be read.
    #[error(transparent)]
    Codec(#[from] FrameCodecError),

    /// A payload could not be encoded or decoded.
    #[error(transparent)]
    Payload(#[from] FrameError),

    /// The relay assigned an unusable participant id.
    #[error(transparent)]
    Session(#[from] RelayDomainError),

    /// The relay did not open with a session welcome.
    #[error("relay did not send a session welcome")]
    MissingWelcome,

    /// The connection is closed.
    #[error("relay connection closed")]
    Closed,

    /// No acknowledgement arrived in time.
    #[error("{event} timed out after {timeout:?}")]
    Timeout {
        /// Event that was sent.
        event: String,
        /// Deadline applied.
        timeout: Duration,
    },

    /// The relay rejected the request.
    #[error("relay rejected {event}: {reason}")]
    Rejected {
        /// Event that was sent.
        event: String,
        /// Reason given by the relay.
        reason: String,
    },
}

/// Result alias for relay client operations.
pub type RelayClientResult<T> = Result<T, RelayClientError>;

/// A frame from the relay that is not an acknowledgement.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// A notification; no reply is expected.
    Notification {
        /// Event name.
        event: String,
        /// Payload.
        data: Value,
    },
    /// A forwarded request; answer with [`RelayClient::reply`].
    Request {
        /// Event name.
        event: String,
        /// Payload.
        data: Value,
        /// Acknowledgement id to echo.
        ack: u64,
    },
}

impl Incoming {
    /// Returns the event name.
    #[must_use]
    pub fn event(&self) -> &str {
        match self {
            Self::Notification { event, .. } | Self::Request { event, .. } => event,
        }
    }

    /// Decodes the payload as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayClientError::Payload`] when the payload has another
    /// shape.
    pub fn decode<T: DeserializeOwned>(&self) -> RelayClientResult<T> {
        let (name, payload) = match self {
            Self::Notification { event, data } | Self::Request { event, data, .. } => (event, data),
        };
        Ok(Frame::Event {
            event: name.clone(),
            data: payload.clone(),
            ack: None,
        }
        .decode()?)
    }
}

type PendingReplies = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

fn lock(pending: &PendingReplies) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Value>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One participant connection to the relay.
///
/// Notifications and forwarded requests are delivered on the receiver
/// returned by [`RelayClient::connect`]; acknowledgements resolve the
/// matching [`RelayClient::call`].
pub struct RelayClient {
    sid: ParticipantId,
    outbox: mpsc::UnboundedSender<Frame>,
    pending: PendingReplies,
    next_ack: AtomicU64,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl RelayClient {
    /// Connects to the relay and waits for the session welcome.
    ///
    /// # Errors
    ///
    /// Returns [`RelayClientError::Io`] when the socket cannot be opened and
    /// [`RelayClientError::MissingWelcome`] when the relay does not open with
    /// a session welcome.
    pub async fn connect(
        address: impl ToSocketAddrs,
    ) -> RelayClientResult<(Self, mpsc::UnboundedReceiver<Incoming>)> {
        let stream = TcpStream::connect(address).await?;
        let (read_half, write_half) = stream.into_split();
        let mut frames = FramedRead::new(read_half, FrameCodec::new());

        let first = tokio::time::timeout(WELCOME_TIMEOUT, frames.next())
            .await
            .map_err(|_| RelayClientError::MissingWelcome)?
            .ok_or(RelayClientError::Closed)??;
        if first.event_name() != Some(events::SESSION) {
            return Err(RelayClientError::MissingWelcome);
        }
        let welcome: SessionWelcome = first.decode()?;
        let sid = ParticipantId::new(welcome.sid)?;
        let span = info_span!("relay_client", participant = %sid);

        let (outbox, mut queued) = mpsc::unbounded_channel::<Frame>();
        let writer = tokio::spawn(
            async move {
                let mut sink = FramedWrite::new(write_half, FrameCodec::new());
                while let Some(frame) = queued.recv().await {
                    if let Err(err) = sink.send(frame).await {
                        warn!(error = %err, "relay write failed");
                        break;
                    }
                }
            }
            .instrument(span.clone()),
        );

        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));
        let (incoming, delivered) = mpsc::unbounded_channel();
        let reader = tokio::spawn(
            read_loop(frames, Arc::clone(&pending), incoming).instrument(span),
        );

        Ok((
            Self {
                sid,
                outbox,
                pending,
                next_ack: AtomicU64::new(1),
                reader,
                writer,
            },
            delivered,
        ))
    }

    /// Returns the participant id assigned by the relay.
    #[must_use]
    pub const fn sid(&self) -> &ParticipantId {
        &self.sid
    }

    fn send(&self, frame: Frame) -> RelayClientResult<()> {
        self.outbox.send(frame).map_err(|_| RelayClientError::Closed)
    }

    /// Sends an event without waiting for a reply.
    ///
    /// # Errors
    ///
    /// Returns [`RelayClientError::Closed`] once the connection is gone.
    pub fn emit(&self, event: &str, data: &impl Serialize) -> RelayClientResult<()> {
        self.send(Frame::emit(event, data)?)
    }

    /// Answers a forwarded request.
    ///
    /// # Errors
    ///
    /// Returns [`RelayClientError::Closed`] once the connection is gone.
    pub fn reply(&self, ack: u64, data: &impl Serialize) -> RelayClientResult<()> {
        self.send(Frame::reply(ack, data)?)
    }

    /// Sends an event and waits for its acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`RelayClientError::Timeout`] when no acknowledgement arrives
    /// in time and [`RelayClientError::Payload`] when the reply has another
    /// shape than `T`.
    pub async fn call<T: DeserializeOwned>(
        &self,
        event: &str,
        data: &(impl Serialize + Sync),
        timeout: Duration,
    ) -> RelayClientResult<T> {
        let ack = self.next_ack.fetch_add(1, Ordering::Relaxed);
        let frame = Frame::call(event, data, ack)?;
        let (sender, receiver) = oneshot::channel();
        lock(&self.pending).insert(ack, sender);
        if let Err(err) = self.send(frame) {
            lock(&self.pending).remove(&ack);
            return Err(err);
        }

        let reply = match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(value)) => value,
            Ok(Err(_)) => return Err(RelayClientError::Closed),
            Err(_) => {
                lock(&self.pending).remove(&ack);
                return Err(RelayClientError::Timeout {
                    event: event.to_owned(),
                    timeout,
                });
            }
        };
        Ok(Frame::Ack { ack, data: reply }.decode()?)
    }

    /// Joins an office under `role`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayClientError::Rejected`] when the relay refuses the join.
    pub async fn join_office(
        &self,
        role: Role,
        name: &str,
        office_id: &str,
        timeout: Duration,
    ) -> RelayClientResult<()> {
        let request = JoinOfficeRequest {
            role,
            name: name.to_owned(),
            office_id: office_id.to_owned(),
        };
        let reply: EnvelopeReply = self.call(events::JOIN_OFFICE, &request, timeout).await?;
        accepted(events::JOIN_OFFICE, reply)
    }

    /// Leaves an office.
    ///
    /// # Errors
    ///
    /// Returns [`RelayClientError::Rejected`] when the relay refuses.
    pub async fn leave_office(&self, office_id: &str, timeout: Duration) -> RelayClientResult<()> {
        let request = LeaveOfficeRequest {
            office_id: office_id.to_owned(),
        };
        let reply: EnvelopeReply = self.call(events::LEAVE_OFFICE, &request, timeout).await?;
        accepted(events::LEAVE_OFFICE, reply)
    }

    /// Closes the connection and fails calls still waiting.
    pub fn close(self) {
        self.reader.abort();
        self.writer.abort();
        lock(&self.pending).clear();
        debug!(participant = %self.sid, "relay connection closed");
    }
}

fn accepted(event: &str, reply: EnvelopeReply) -> RelayClientResult<()> {
    if reply.ok {
        return Ok(());
    }
    Err(RelayClientError::Rejected {
        event: event.to_owned(),
        reason: reply.error.unwrap_or_default(),
    })
}

async fn read_loop(
    mut frames: FramedRead<tokio::net::tcp::OwnedReadHalf, FrameCodec>,
    pending: PendingReplies,
    incoming: mpsc::UnboundedSender<Incoming>,
) {
    while let Some(next) = frames.next().await {
        let frame = match next {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(error = %err, "relay read failed");
                break;
            }
        };
        let delivered = match frame {
            Frame::Ack { ack, data } => {
                let waiting = lock(&pending).remove(&ack);
                match waiting {
                    Some(sender) => {
                        if sender.send(data).is_err() {
                            debug!(ack, "caller stopped waiting");
                        }
                    }
                    None => debug!(ack, "unmatched acknowledgement"),
                }
                continue;
            }
            Frame::Event {
                event,
                data,
                ack: Some(ack),
            } => incoming.send(Incoming::Request { event, data, ack }),
            Frame::Event {
                event,
                data,
                ack: None,
            } => incoming.send(Incoming::Notification { event, data }),
        };
        if delivered.is_err() {
            debug!("incoming receiver dropped");
        }
    }
    lock(&pending).clear();
}
