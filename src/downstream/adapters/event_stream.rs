//! Server-sent event framing for the HTTP transports.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseEvent {
    /// Event type, `message` when the stream did not name one.
    pub(crate) event: String,
    /// Data lines joined with `\n`.
    pub(crate) data: String,
}

/// Incremental `text/event-stream` decoder.
#[derive(Debug, Default)]
pub(crate) struct SseEventCodec {
    event: Option<String>,
    data: Vec<String>,
}

impl SseEventCodec {
    fn take_event(&mut self) -> Option<SseEvent> {
        let event_name = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event_name.unwrap_or_else(|| "message".to_owned()),
            data,
        })
    }

    fn apply_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.take_event();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, raw_value) = line.split_once(':').unwrap_or((line, ""));
        let value = raw_value.strip_prefix(' ').unwrap_or(raw_value);
        match field {
            "event" => self.event = Some(value.to_owned()),
            "data" => self.data.push(value.to_owned()),
            _ => {}
        }
        None
    }
}

impl Decoder for SseEventCodec {
    type Item = SseEvent;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while let Some(position) = src.iter().position(|byte| *byte == b'\n') {
            let raw = src.split_to(position + 1);
            let text = String::from_utf8_lossy(&raw);
            let line = text.trim_end_matches(['\n', '\r']);
            if let Some(event) = self.apply_line(line) {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(event) = self.decode(src)? {
            return Ok(Some(event));
        }
        if !src.is_empty() {
            let raw = src.split();
            let text = String::from_utf8_lossy(&raw);
            if let Some(event) = self.apply_line(text.trim_end_matches('\r')) {
                return Ok(Some(event));
            }
        }
        Ok(self.take_event())
    }
}
