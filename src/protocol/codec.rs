//! Newline-delimited JSON framing of [`Frame`]s.

use super::Frame;
use bytes::BytesMut;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

/// Longest accepted line (16 MiB).
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Errors raised while framing.
#[derive(Debug, Error)]
pub enum FrameCodecError {
    /// Socket failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Line framing failure, including over-long lines.
    #[error(transparent)]
    Lines(#[from] LinesCodecError),

    /// The line is not a valid frame.
    #[error("invalid frame: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encodes and decodes one frame per line. Blank lines are skipped.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    lines: LinesCodec,
}

impl FrameCodec {
    /// Creates a codec accepting lines up to [`MAX_FRAME_LENGTH`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_FRAME_LENGTH),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

enum Line {
    Incomplete,
    Blank,
    Complete(Frame),
}

fn parse(line: Option<String>) -> Result<Line, FrameCodecError> {
    match line {
        None => Ok(Line::Incomplete),
        Some(text) if text.trim().is_empty() => Ok(Line::Blank),
        Some(text) => Ok(Line::Complete(serde_json::from_str(&text)?)),
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match parse(self.lines.decode(src)?)? {
                Line::Incomplete => return Ok(None),
                Line::Blank => {}
                Line::Complete(frame) => return Ok(Some(frame)),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match parse(self.lines.decode_eof(src)?)? {
                Line::Incomplete => return Ok(None),
                Line::Blank => {}
                Line::Complete(frame) => return Ok(Some(frame)),
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameCodecError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = serde_json::to_string(&item)?;
        self.lines.encode(line, dst)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn skips_blank_lines_and_waits_for_newline() {
        let mut codec = FrameCodec::new();
        let mut buffer = BytesMut::from("\n{\"type\":\"ack\",\"ack\":3,\"data\":{\"ok\":true}}\n{\"type\"");

        let frame = codec.decode(&mut buffer).expect("decode").expect("one frame");

        assert_eq!(
            frame,
            Frame::Ack {
                ack: 3,
                data: json!({"ok": true})
            }
        );
        assert!(codec.decode(&mut buffer).expect("decode").is_none());
    }

    #[test]
    fn encodes_one_line_per_frame() {
        let mut codec = FrameCodec::new();
        let mut buffer = BytesMut::new();

        codec
            .encode(Frame::emit("notify:x", &json!({"a": 1})).expect("frame"), &mut buffer)
            .expect("encode");

        let text = String::from_utf8(buffer.to_vec()).expect("utf8");
        assert!(text.ends_with('\n'));
        assert_eq!(text.matches('\n').count(), 1);
    }

    #[test]
    fn rejects_malformed_lines() {
        let mut codec = FrameCodec::new();
        let mut buffer = BytesMut::from("not json\n");

        assert!(matches!(
            codec.decode(&mut buffer),
            Err(FrameCodecError::Json(_))
        ));
    }
}
