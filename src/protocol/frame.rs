//! Frame envelope.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;

/// Errors converting between frames and typed payloads.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The payload could not be encoded or decoded.
    #[error("invalid {event} payload: {source}")]
    Payload {
        /// Event the payload belongs to.
        event: String,
        /// Serde failure.
        source: serde_json::Error,
    },
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// A named event, optionally expecting an acknowledgement.
    Event {
        /// Event name.
        event: String,
        /// Event payload.
        #[serde(default)]
        data: Value,
        /// Acknowledgement id chosen by the sender.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack: Option<u64>,
    },
    /// Acknowledgement of an earlier event.
    Ack {
        /// Id of the acknowledged event.
        ack: u64,
        /// Reply payload.
        #[serde(default)]
        data: Value,
    },
}

impl Frame {
    /// Creates an event that expects no acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Payload`] when `data` cannot be encoded.
    pub fn emit(event: &str, data: &impl Serialize) -> Result<Self, FrameError> {
        Ok(Self::Event {
            event: event.to_owned(),
            data: encode(event, data)?,
            ack: None,
        })
    }

    /// Creates an event that expects an acknowledgement with id `ack`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Payload`] when `data` cannot be encoded.
    pub fn call(event: &str, data: &impl Serialize, ack: u64) -> Result<Self, FrameError> {
        Ok(Self::Event {
            event: event.to_owned(),
            data: encode(event, data)?,
            ack: Some(ack),
        })
    }

    /// Creates an acknowledgement frame.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Payload`] when `data` cannot be encoded.
    pub fn reply(ack: u64, data: &impl Serialize) -> Result<Self, FrameError> {
        Ok(Self::Ack {
            ack,
            data: encode("ack", data)?,
        })
    }

    /// Returns the event name of event frames.
    #[must_use]
    pub fn event_name(&self) -> Option<&str> {
        match self {
            Self::Event { event, .. } => Some(event),
            Self::Ack { .. } => None,
        }
    }

    /// Returns the payload.
    #[must_use]
    pub const fn data(&self) -> &Value {
        match self {
            Self::Event { data, .. } | Self::Ack { data, .. } => data,
        }
    }

    /// Decodes the payload as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Payload`] when the payload has another shape.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, FrameError> {
        decode(self.event_name().unwrap_or("ack"), self.data().clone())
    }
}

/// Decodes a payload received for `event`.
///
/// # Errors
///
/// Returns [`FrameError::Payload`] when the payload has another shape.
pub(crate) fn decode<T: DeserializeOwned>(event: &str, data: Value) -> Result<T, FrameError> {
    serde_json::from_value(data).map_err(|source| FrameError::Payload {
        event: event.to_owned(),
        source,
    })
}

fn encode(event: &str, data: &impl Serialize) -> Result<Value, FrameError> {
    serde_json::to_value(data).map_err(|source| FrameError::Payload {
        event: event.to_owned(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_frames_use_type_tag() {
        let frame = Frame::call("server:join_office", &json!({"office_id": "r1"}), 7)
            .expect("frame should encode");

        let encoded = serde_json::to_value(&frame).expect("frame should serialize");

        assert_eq!(
            encoded,
            json!({
                "type": "event",
                "event": "server:join_office",
                "data": {"office_id": "r1"},
                "ack": 7
            })
        );
    }

    #[test]
    fn emitted_events_omit_ack() {
        let frame = Frame::emit("notify:leave_office", &json!({})).expect("frame should encode");
        let encoded = serde_json::to_value(&frame).expect("frame should serialize");
        assert!(encoded.get("ack").is_none());
    }

    #[test]
    fn parses_ack_frames() {
        let frame: Frame =
            serde_json::from_value(json!({"type": "ack", "ack": 3, "data": {"ok": true}}))
                .expect("frame should parse");
        assert_eq!(
            frame,
            Frame::Ack {
                ack: 3,
                data: json!({"ok": true})
            }
        );
    }
}
