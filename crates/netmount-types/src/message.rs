//! Outer protocol messages.
//!
//! Three server→client shapes (`hello`, `sync`, and the `{ok, type,
//! data|err}` reply envelope) plus the incoming operation [`Request`].
//! Stream frames live in [`crate::frame`]; everything here is one JSON text
//! message per value.

use std::collections::BTreeMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::attrs::{Attributes, attributes_value};

/// Initial snapshot pushed to a session right after connect: the whole tree
/// plus `[free, total]` capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hello {
    #[serde(rename = "type")]
    pub kind: String,
    pub contents: BTreeMap<String, Attributes>,
    pub capacity: [u64; 2],
}

impl Hello {
    pub fn new(contents: BTreeMap<String, Attributes>, capacity: (u64, u64)) -> Self {
        Self {
            kind: "hello".into(),
            contents,
            capacity: [capacity.0, capacity.1],
        }
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// One watcher delta: new attributes for a path, or `false` when it is gone,
/// with refreshed capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
    pub attributes: serde_json::Value,
    pub capacity: [u64; 2],
}

impl SyncMessage {
    pub fn new(path: impl Into<String>, attrs: Option<&Attributes>, capacity: (u64, u64)) -> Self {
        Self {
            kind: "sync".into(),
            path: path.into(),
            attributes: attributes_value(attrs),
            capacity: [capacity.0, capacity.1],
        }
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Reply envelope for one dispatched operation. `type` echoes the op name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub ok: bool,
    #[serde(rename = "type")]
    pub op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

impl Reply {
    /// Successful reply; a `Null` payload is omitted from the wire.
    pub fn success(op: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            ok: true,
            op: op.into(),
            data: (!data.is_null()).then_some(data),
            err: None,
        }
    }

    /// Failure reply carrying the error's wire string.
    pub fn failure(op: impl Into<String>, err: impl Display) -> Self {
        Self {
            ok: false,
            op: op.into(),
            data: None,
            err: Some(err.to_string()),
        }
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Incoming operation request. Ops ignore the fields they don't use;
/// missing required fields surface as `MalformedRequest` at dispatch.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(rename = "type")]
    pub op: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub dest: Option<String>,
    /// Total chunk count, announced by the client when opening a write.
    #[serde(default)]
    pub chunks: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_shape() {
        let mut contents = BTreeMap::new();
        contents.insert("a.txt".to_string(), Attributes::file(5, false, 0, 0));
        let value: serde_json::Value =
            serde_json::from_str(&Hello::new(contents, (10, 20)).encode()).unwrap();
        assert_eq!(value["type"], "hello");
        assert_eq!(value["capacity"], serde_json::json!([10, 20]));
        assert_eq!(value["contents"]["a.txt"]["size"], 5);
    }

    #[test]
    fn test_sync_absent_is_false() {
        let value: serde_json::Value =
            serde_json::from_str(&SyncMessage::new("gone.txt", None, (0, 0)).encode()).unwrap();
        assert_eq!(value["type"], "sync");
        assert_eq!(value["attributes"], false);
    }

    #[test]
    fn test_reply_omits_empty_fields() {
        let ok: serde_json::Value =
            serde_json::from_str(&Reply::success("delete", serde_json::Value::Null).encode())
                .unwrap();
        assert_eq!(ok["ok"], true);
        assert_eq!(ok["type"], "delete");
        assert!(ok.get("data").is_none());
        assert!(ok.get("err").is_none());

        let err: serde_json::Value =
            serde_json::from_str(&Reply::failure("move", "File exists").encode()).unwrap();
        assert_eq!(err["ok"], false);
        assert_eq!(err["err"], "File exists");
    }

    #[test]
    fn test_request_optional_fields() {
        let req: Request =
            serde_json::from_str(r#"{"type": "writeFile", "path": "a/b", "chunks": 3}"#).unwrap();
        assert_eq!(req.op, "writeFile");
        assert_eq!(req.path.as_deref(), Some("a/b"));
        assert_eq!(req.chunks, Some(3));
        assert!(req.dest.is_none());
    }
}
