//! Attribute probing.
//!
//! Absence is a value, not an error: a failed stat for any reason (missing,
//! permission) yields `None`. The read-only flag comes from an effective
//! read+write access check rather than stat mode bits, so it reflects what
//! the process can actually do.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use netmount_types::Attributes;

/// Stat a resolved path into `Attributes`, or `None` if it is absent or
/// inaccessible.
pub async fn attributes(path: &Path) -> Option<Attributes> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    let read_only = !is_read_write(path).await;
    let modified = millis(meta.modified().ok());
    // Not every filesystem records a birth time; fall back to mtime.
    let created = meta.created().ok().map_or(modified, |t| millis(Some(t)));
    Some(Attributes {
        size: if meta.is_dir() { 0 } else { meta.len() },
        is_dir: meta.is_dir(),
        is_read_only: read_only,
        created,
        modified,
    })
}

fn millis(time: Option<SystemTime>) -> u64 {
    time.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Effective read+write access probe. A failed probe reads as "read-only",
/// never as an error.
#[cfg(unix)]
async fn is_read_write(path: &Path) -> bool {
    use rustix::fs::Access;
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        rustix::fs::access(&path, Access::READ_OK | Access::WRITE_OK).is_ok()
    })
    .await
    .unwrap_or(false)
}

#[cfg(not(unix))]
async fn is_read_write(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| !m.permissions().readonly())
        .unwrap_or(false)
}
