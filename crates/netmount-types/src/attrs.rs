//! File attributes as they appear on the wire.

use serde::{Deserialize, Serialize};

/// Metadata for one path under a user's root.
///
/// Absence ("does not exist or is inaccessible") is `Option::None` in Rust
/// and the literal `false` on the wire, so every wire field that may carry
/// attributes goes through [`attributes_value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attributes {
    /// Size in bytes. Directories always report 0.
    pub size: u64,
    /// Whether the entry is a directory.
    pub is_dir: bool,
    /// Derived from an effective read+write access probe, not mode bits.
    pub is_read_only: bool,
    /// Creation time, milliseconds since the Unix epoch.
    pub created: u64,
    /// Last modification time, milliseconds since the Unix epoch.
    pub modified: u64,
}

impl Attributes {
    /// Attributes for a regular file.
    pub fn file(size: u64, read_only: bool, created: u64, modified: u64) -> Self {
        Self {
            size,
            is_dir: false,
            is_read_only: read_only,
            created,
            modified,
        }
    }

    /// Attributes for a directory.
    pub fn directory(read_only: bool, created: u64, modified: u64) -> Self {
        Self {
            size: 0,
            is_dir: true,
            is_read_only: read_only,
            created,
            modified,
        }
    }
}

/// Wire form of `Attributes | Absent`: the attributes object, or `false`.
pub fn attributes_value(attrs: Option<&Attributes>) -> serde_json::Value {
    match attrs {
        Some(a) => serde_json::to_value(a).unwrap_or(serde_json::Value::Bool(false)),
        None => serde_json::Value::Bool(false),
    }
}
