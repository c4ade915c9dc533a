//! Stream frames: the chunked pull transfer protocol's wire unit.
//!
//! Five numbered kinds travel as JSON text messages with base64 chunk
//! payloads. Decoding is total: anything malformed, any unknown kind, and
//! any frame missing its required fields becomes [`StreamFrame::Invalid`],
//! which routers drop silently rather than treating as an error. This
//! protects a connection from stale frames left over from an already-closed
//! transfer.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One frame of a chunked transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    /// kind 0 — chunk data, sent by whichever side owns the byte source.
    Data { id: Uuid, chunk: u64, bytes: Vec<u8> },
    /// kind 1 — pull request from the consumer of the byte source.
    Request { id: Uuid, chunk: u64 },
    /// kind 2 — acknowledgement after the consumer has stored a chunk.
    Ack { id: Uuid, chunk: u64 },
    /// kind 3 — error or timeout, sent by either side.
    Error { id: Uuid, reason: Option<String> },
    /// kind 4 — final result (server only), e.g. written-file attributes.
    Result { id: Uuid, value: serde_json::Value },
    /// Anything that failed to decode. Dropped by the router.
    Invalid,
}

/// Raw JSON layout shared by all frame kinds.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RawFrame {
    kind: u8,
    uuid: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chunk: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,
}

impl StreamFrame {
    /// The transfer id this frame belongs to, if it has one.
    pub fn id(&self) -> Option<Uuid> {
        match self {
            StreamFrame::Data { id, .. }
            | StreamFrame::Request { id, .. }
            | StreamFrame::Ack { id, .. }
            | StreamFrame::Error { id, .. }
            | StreamFrame::Result { id, .. } => Some(*id),
            StreamFrame::Invalid => None,
        }
    }

    /// Encode to the JSON text form. `Invalid` has no wire form.
    pub fn encode(&self) -> Option<String> {
        let raw = match self {
            StreamFrame::Data { id, chunk, bytes } => RawFrame {
                kind: 0,
                uuid: *id,
                chunk: Some(*chunk),
                data: Some(BASE64.encode(bytes)),
                ..RawFrame::default()
            },
            StreamFrame::Request { id, chunk } => RawFrame {
                kind: 1,
                uuid: *id,
                chunk: Some(*chunk),
                ..RawFrame::default()
            },
            StreamFrame::Ack { id, chunk } => RawFrame {
                kind: 2,
                uuid: *id,
                chunk: Some(*chunk),
                ..RawFrame::default()
            },
            StreamFrame::Error { id, reason } => RawFrame {
                kind: 3,
                uuid: *id,
                reason: reason.clone(),
                ..RawFrame::default()
            },
            StreamFrame::Result { id, value } => RawFrame {
                kind: 4,
                uuid: *id,
                result: Some(value.clone()),
                ..RawFrame::default()
            },
            StreamFrame::Invalid => return None,
        };
        serde_json::to_string(&raw).ok()
    }

    /// Decode from JSON text. Total: never fails, returns `Invalid` instead.
    pub fn decode(text: &str) -> Self {
        match serde_json::from_str::<serde_json::Value>(text) {
            Ok(value) => Self::from_value(&value),
            Err(_) => StreamFrame::Invalid,
        }
    }

    /// Decode from an already-parsed JSON value.
    pub fn from_value(value: &serde_json::Value) -> Self {
        let Ok(raw) = serde_json::from_value::<RawFrame>(value.clone()) else {
            return StreamFrame::Invalid;
        };
        let id = raw.uuid;
        match raw.kind {
            0 => match (raw.chunk, raw.data.and_then(|d| BASE64.decode(d).ok())) {
                (Some(chunk), Some(bytes)) => StreamFrame::Data { id, chunk, bytes },
                _ => StreamFrame::Invalid,
            },
            1 => match raw.chunk {
                Some(chunk) => StreamFrame::Request { id, chunk },
                None => StreamFrame::Invalid,
            },
            2 => match raw.chunk {
                Some(chunk) => StreamFrame::Ack { id, chunk },
                None => StreamFrame::Invalid,
            },
            3 => StreamFrame::Error {
                id,
                reason: raw.reason,
            },
            4 => StreamFrame::Result {
                id,
                value: raw.result.unwrap_or(serde_json::Value::Null),
            },
            _ => StreamFrame::Invalid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(frame: StreamFrame) {
        let text = frame.encode().unwrap();
        assert_eq!(StreamFrame::decode(&text), frame);
    }

    #[test]
    fn test_data_round_trip() {
        round_trip(StreamFrame::Data {
            id: Uuid::new_v4(),
            chunk: 3,
            bytes: b"hello world".to_vec(),
        });
    }

    #[test]
    fn test_control_frames_round_trip() {
        let id = Uuid::new_v4();
        round_trip(StreamFrame::Request { id, chunk: 0 });
        round_trip(StreamFrame::Ack { id, chunk: 7 });
        round_trip(StreamFrame::Error {
            id,
            reason: Some("Stream timeout".into()),
        });
        round_trip(StreamFrame::Error { id, reason: None });
        round_trip(StreamFrame::Result {
            id,
            value: serde_json::json!({"size": 5}),
        });
    }

    #[test]
    fn test_garbage_decodes_to_invalid() {
        assert_eq!(StreamFrame::decode("not json"), StreamFrame::Invalid);
        assert_eq!(StreamFrame::decode("{}"), StreamFrame::Invalid);
        assert_eq!(
            StreamFrame::decode(r#"{"kind": 9, "uuid": "00000000-0000-0000-0000-000000000000"}"#),
            StreamFrame::Invalid
        );
    }

    #[test]
    fn test_data_without_payload_is_invalid() {
        let text = format!(r#"{{"kind": 0, "uuid": "{}", "chunk": 1}}"#, Uuid::new_v4());
        assert_eq!(StreamFrame::decode(&text), StreamFrame::Invalid);
    }

    #[test]
    fn test_bad_base64_is_invalid() {
        let text = format!(
            r#"{{"kind": 0, "uuid": "{}", "chunk": 1, "data": "!!not-base64!!"}}"#,
            Uuid::new_v4()
        );
        assert_eq!(StreamFrame::decode(&text), StreamFrame::Invalid);
    }

    #[test]
    fn test_invalid_has_no_wire_form() {
        assert!(StreamFrame::Invalid.encode().is_none());
    }
}
