//! Per-user capacity accounting.
//!
//! A user with no configured limit sees the OS free-space statistics of the
//! volume their root lives on. A user with a limit L sees `total = L` and
//! `free = L − recursive size of the tree`, recomputed by a full walk on
//! every check. The rescan is O(file count); the design trades that for
//! never holding stale usage state.

use std::path::Path;

use crate::user::User;

/// `(free, total)` bytes for one user.
pub async fn capacity(user: &User) -> (u64, u64) {
    match user.limit() {
        Some(limit) => {
            let used = dir_size(user.root()).await;
            (limit.saturating_sub(used), limit)
        }
        None => volume_stats(user.root()).await,
    }
}

/// Sum of every regular file size under `root`. Best effort: entries that
/// fail to stat count as zero, and the walk itself never fails.
pub async fn dir_size(root: &Path) -> u64 {
    let mut total = 0u64;
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if meta.is_dir() {
                stack.push(entry.path());
            } else if meta.is_file() {
                total += meta.len();
            }
        }
    }
    total
}

#[cfg(unix)]
async fn volume_stats(root: &Path) -> (u64, u64) {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || match rustix::fs::statvfs(&root) {
        Ok(vfs) => (vfs.f_bfree * vfs.f_frsize, vfs.f_blocks * vfs.f_frsize),
        Err(_) => (0, 0),
    })
    .await
    .unwrap_or((0, 0))
}

#[cfg(not(unix))]
async fn volume_stats(_root: &Path) -> (u64, u64) {
    // No portable statvfs equivalent; report an effectively unbounded volume.
    (u64::MAX, u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dir_size_sums_files() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a"), b"12345").await.unwrap();
        tokio::fs::create_dir(dir.path().join("sub")).await.unwrap();
        tokio::fs::write(dir.path().join("sub/b"), b"123").await.unwrap();

        assert_eq!(dir_size(dir.path()).await, 8);
    }

    #[tokio::test]
    async fn test_limited_capacity() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a"), b"1234").await.unwrap();

        let user = User::new("amy", dir.path()).with_limit(10);
        assert_eq!(capacity(&user).await, (6, 10));
    }

    #[tokio::test]
    async fn test_limit_overrun_saturates() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a"), b"123456").await.unwrap();

        let user = User::new("amy", dir.path()).with_limit(4);
        assert_eq!(capacity(&user).await, (0, 4));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unlimited_capacity_uses_volume() {
        let dir = tempfile::tempdir().unwrap();
        let user = User::new("amy", dir.path());
        let (free, total) = capacity(&user).await;
        assert!(total > 0);
        assert!(free <= total);
    }
}
