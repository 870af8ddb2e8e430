//! Outbound delivery to one connected participant.

use crate::protocol::Frame;
use thiserror::Error;
use tokio::sync::mpsc;

/// The participant's outbound channel is gone.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("participant link closed")]
pub struct LinkClosed;

/// Delivers frames to one participant without waiting for the peer.
///
/// Delivery must not block; the relay calls it outside its own locks so an
/// implementation may query the coordinator.
pub trait ParticipantLink: Send + Sync {
    /// Queues `frame` for the participant.
    ///
    /// # Errors
    ///
    /// Returns [`LinkClosed`] once the participant is gone.
    fn deliver(&self, frame: Frame) -> Result<(), LinkClosed>;
}

impl ParticipantLink for mpsc::UnboundedSender<Frame> {
    fn deliver(&self, frame: Frame) -> Result<(), LinkClosed> {
        self.send(frame).map_err(|_| LinkClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn channel_link_reports_closed_receiver() {
        let (sender, receiver) = mpsc::unbounded_channel::<Frame>();
        drop(receiver);

        let result = sender.deliver(Frame::emit("notify:x", &json!({})).expect("valid frame"));

        assert_eq!(result, Err(LinkClosed));
    }
}
