//! Message Codec (C1): the length-prefixed wire format shared by both directions of the worker
//! pipe pair.
//!
//! Framing is a 32-bit little-endian size followed by the serialized [`Message`]. The size
//! prefix is part of the 4 MiB cap (`spec.md` §4.1: "Maximum whole-message length is 4,194,308
//! bytes (4 MiB payload plus framing overhead)"), so the payload itself is capped at
//! [`MAX_PAYLOAD_LEN`] and the whole frame (prefix included) at [`MAX_FRAME_LEN`].
//!
//! In single-process mode the size prefix is suppressed entirely (the in-process worker hands
//! over an already-framed [`Bytes`] buffer via a direct call); [`Message::encode`] /
//! [`Message::decode`] operate on the payload only and the prefix is added/stripped by the
//! [`crate::worker::channel::Channel`] read/write loops depending on `FramingMode`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Payload cap excluding the 4-byte length prefix: 4 MiB.
pub const MAX_PAYLOAD_LEN: usize = 4 * 1024 * 1024;
/// Whole-frame cap including the 4-byte length prefix (`spec.md` §4.1, §8).
pub const MAX_FRAME_LEN: usize = MAX_PAYLOAD_LEN + 4;

/// Whether a [`crate::worker::channel::Channel`] reads/writes length-prefixed frames (real
/// subprocess worker) or bare payloads handed over by direct function call (single-process
/// worker). Selected once at process start and never changed thereafter (`spec.md` §4.1).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FramingMode {
    SizePrefixed,
    Direct,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("message exceeds maximum frame length ({0} > {MAX_FRAME_LEN})")]
    TooLarge(usize),
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("truncated frame")]
    Truncated,
}

/// Severity implied by a [`Message::Log`] prefix byte.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LogSeverity {
    Debug,
    Warn,
    Error,
    Dump,
}

impl LogSeverity {
    fn from_prefix(byte: u8) -> Option<Self> {
        match byte {
            b'D' => Some(Self::Debug),
            b'W' => Some(Self::Warn),
            b'E' => Some(Self::Error),
            b'X' => Some(Self::Dump),
            _ => None,
        }
    }

    fn prefix(self) -> u8 {
        match self {
            Self::Debug => b'D',
            Self::Warn => b'W',
            Self::Error => b'E',
            Self::Dump => b'X',
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequestMessage {
    pub id: u32,
    pub method: String,
    #[serde(rename = "handlerId")]
    pub handler_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResponseMessage {
    pub id: u32,
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationMessage {
    #[serde(rename = "handlerId")]
    pub handler_id: String,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct LogMessage {
    pub severity: LogSeverity,
    pub text: String,
}

/// The one schema-defined record type exchanged over the channel (`spec.md` §4.1).
#[derive(Debug, Clone)]
pub enum Message {
    Request(RequestMessage),
    Response(ResponseMessage),
    Notification(NotificationMessage),
    Log(LogMessage),
}

impl Message {
    /// Encodes the payload only (no length prefix); the caller adds one when `FramingMode` is
    /// `SizePrefixed`.
    pub fn encode_payload(&self) -> Result<Bytes, CodecError> {
        let bytes = match self {
            Message::Request(request) => serde_json::to_vec(request)?,
            Message::Response(response) => serde_json::to_vec(response)?,
            Message::Notification(notification) => serde_json::to_vec(notification)?,
            Message::Log(log) => {
                let mut buffer = Vec::with_capacity(log.text.len() + 1);
                buffer.push(log.severity.prefix());
                buffer.extend_from_slice(log.text.as_bytes());
                buffer
            }
        };
        if bytes.len() > MAX_PAYLOAD_LEN {
            return Err(CodecError::TooLarge(bytes.len() + 4));
        }
        Ok(Bytes::from(bytes))
    }

    /// Encodes a complete size-prefixed frame.
    pub fn encode_frame(&self) -> Result<Bytes, CodecError> {
        let payload = self.encode_payload()?;
        let mut framed = BytesMut::with_capacity(payload.len() + 4);
        framed.put_u32_le(payload.len() as u32);
        framed.extend_from_slice(&payload);
        Ok(framed.freeze())
    }

    /// Decodes a single payload (no length prefix) into a [`Message`].
    ///
    /// Log lines are distinguished from JSON records the way the rest of the schema does *not*
    /// need to be: a JSON record always starts with `{`; anything else with a recognized
    /// single-byte severity prefix is a log line, matching `spec.md` §4.1's Log shape (a byte
    /// prefix plus free text, not a JSON object).
    pub fn decode_payload(payload: &[u8]) -> Result<Self, CodecError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(CodecError::TooLarge(payload.len() + 4));
        }
        if payload.first() != Some(&b'{') {
            if let Some(&prefix_byte) = payload.first() {
                if let Some(severity) = LogSeverity::from_prefix(prefix_byte) {
                    let text = String::from_utf8_lossy(&payload[1..]).into_owned();
                    return Ok(Message::Log(LogMessage { severity, text }));
                }
            }
        }

        let value: Value = serde_json::from_slice(payload)?;
        if value.get("method").is_some() {
            Ok(Message::Request(serde_json::from_value(value)?))
        } else if value.get("accepted").is_some() {
            Ok(Message::Response(serde_json::from_value(value)?))
        } else {
            Ok(Message::Notification(serde_json::from_value(value)?))
        }
    }

    /// Drains exactly one size-prefixed frame off the front of `buffer`, if a whole frame is
    /// available. Returns `Ok(None)` when more bytes are needed. Oversized frames are reported
    /// as an error and the caller is expected to drop the connection/skip the frame per
    /// `spec.md` §4.1 ("exceeding this are dropped at the codec boundary and logged").
    pub fn try_decode_frame(buffer: &mut BytesMut) -> Result<Option<Message>, CodecError> {
        if buffer.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_le_bytes(buffer[..4].try_into().unwrap()) as usize;
        if len > MAX_PAYLOAD_LEN {
            // Drop the prefix; the caller still owns any extra bytes already buffered for the
            // (invalid) payload and should resynchronize by closing the connection.
            buffer.advance(4);
            return Err(CodecError::TooLarge(len + 4));
        }
        if buffer.len() < 4 + len {
            return Ok(None);
        }
        buffer.advance(4);
        let payload = buffer.split_to(len);
        Message::decode_payload(&payload).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips() {
        let message = Message::Request(RequestMessage {
            id: 7,
            method: "worker.dump".to_string(),
            handler_id: String::new(),
            data: None,
        });
        let frame = message.encode_frame().unwrap();
        let mut buffer = BytesMut::from(&frame[..]);
        let decoded = Message::try_decode_frame(&mut buffer).unwrap().unwrap();
        match decoded {
            Message::Request(request) => assert_eq!(request.id, 7),
            other => panic!("expected Request, got {other:?}"),
        }
    }

    #[test]
    fn log_line_round_trips() {
        let message = Message::Log(LogMessage {
            severity: LogSeverity::Warn,
            text: "low memory".to_string(),
        });
        let payload = message.encode_payload().unwrap();
        match Message::decode_payload(&payload).unwrap() {
            Message::Log(log) => {
                assert_eq!(log.severity, LogSeverity::Warn);
                assert_eq!(log.text, "low memory");
            }
            other => panic!("expected Log, got {other:?}"),
        }
    }

    #[test]
    fn boundary_frame_sizes() {
        // Exactly MAX_FRAME_LEN (4,194,308 bytes: 4-byte prefix + 4,194,304 payload) is accepted.
        let text = "D".to_string() + &"a".repeat(MAX_PAYLOAD_LEN - 1);
        let message = Message::Log(LogMessage {
            severity: LogSeverity::Debug,
            text: text[1..].to_string(),
        });
        let frame = message.encode_frame().unwrap();
        assert_eq!(frame.len(), MAX_FRAME_LEN);

        // One byte over is rejected.
        let oversized_text = "a".repeat(MAX_PAYLOAD_LEN);
        let oversized = Message::Log(LogMessage {
            severity: LogSeverity::Debug,
            text: oversized_text,
        });
        assert!(matches!(
            oversized.encode_payload(),
            Err(CodecError::TooLarge(_))
        ));
    }
}
