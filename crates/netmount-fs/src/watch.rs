//! Content index and the per-user recursive watcher.
//!
//! One [`WatchManager`] owns at most one watch per user. The first session
//! for a user brings the watch up (root ensured, recursive notify watch
//! started, index seeded by an initial scan); the last session's release
//! tears it down and discards the index. Start/stop transitions are
//! serialized through one async mutex so a disconnect racing a fresh
//! connect can never strand or duplicate a watcher.
//!
//! Deltas fan out over per-subscriber unbounded channels, so a slow session
//! never stalls the watcher or its siblings. Index mutation and fan-out
//! happen under one lock, and so does subscribing: a subscriber's snapshot
//! therefore contains exactly the events that preceded its channel, never
//! more, never less.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use netmount_types::{Attributes, FsResult};

use crate::probe;
use crate::user::User;

/// One change event: the path's new attributes, or `None` when it is gone.
pub type Delta = (String, Option<Attributes>);

struct WatchState {
    index: HashMap<String, Attributes>,
    subscribers: HashMap<u64, mpsc::UnboundedSender<Delta>>,
}

/// Shared per-user watch: the authoritative index plus its subscribers.
struct UserWatch {
    root: PathBuf,
    state: Mutex<WatchState>,
    next_sub: AtomicU64,
}

impl UserWatch {
    fn new(root: PathBuf) -> Self {
        Self {
            root,
            state: Mutex::new(WatchState {
                index: HashMap::new(),
                subscribers: HashMap::new(),
            }),
            next_sub: AtomicU64::new(0),
        }
    }

    fn relative(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        Some(rel.to_string_lossy().into_owned())
    }

    /// Seed the index with everything currently under the root. `notify`
    /// only reports changes, so pre-existing entries must be scanned in;
    /// returning from here is what "watch ready" means.
    async fn seed(&self) {
        let mut seeded = HashMap::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
                continue;
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                let Some(rel) = self.relative(&path) else {
                    continue;
                };
                if let Some(attrs) = probe::attributes(&path).await {
                    if attrs.is_dir {
                        stack.push(path);
                    }
                    seeded.insert(rel, attrs);
                }
            }
        }
        self.state.lock().index = seeded;
    }

    /// Re-probe one changed path, update the index, fan out the delta.
    async fn process_path(&self, path: &Path) {
        let Some(rel) = self.relative(path) else {
            return;
        };
        if rel.is_empty() {
            return;
        }
        let attrs = probe::attributes(path).await;
        let mut state = self.state.lock();
        match attrs {
            Some(a) => {
                state.index.insert(rel.clone(), a);
            }
            None => {
                state.index.remove(&rel);
            }
        }
        state
            .subscribers
            .retain(|_, tx| tx.send((rel.clone(), attrs)).is_ok());
    }

    /// Register a delta channel and snapshot the index in the same critical
    /// section, so the snapshot and the first delivered delta never overlap.
    fn subscribe(&self) -> (u64, mpsc::UnboundedReceiver<Delta>, BTreeMap<String, Attributes>) {
        let sub_id = self.next_sub.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        let snapshot = state
            .index
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        state.subscribers.insert(sub_id, tx);
        (sub_id, rx, snapshot)
    }

    fn unsubscribe(&self, sub_id: u64) {
        self.state.lock().subscribers.remove(&sub_id);
    }

    fn contents(&self) -> BTreeMap<String, Attributes> {
        self.state
            .lock()
            .index
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }
}

struct WatchEntry {
    refs: usize,
    watch: Arc<UserWatch>,
    /// Dropped with the entry, which stops event delivery and lets the
    /// processor task drain out.
    _watcher: RecommendedWatcher,
}

/// Owns one refcounted watch per user.
#[derive(Clone, Default)]
pub struct WatchManager {
    watches: Arc<tokio::sync::Mutex<HashMap<String, WatchEntry>>>,
}

impl WatchManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the user's watch, starting it if this is the first session.
    /// Returns only once the watch is ready (index seeded), so the caller's
    /// snapshot is ordered before any delta it will receive.
    pub async fn acquire(&self, user: &User) -> FsResult<Subscription> {
        let mut watches = self.watches.lock().await;
        let watch = match watches.get_mut(user.name()) {
            Some(entry) => {
                entry.refs += 1;
                Arc::clone(&entry.watch)
            }
            None => {
                let (watch, watcher) = self.start_watch(user).await?;
                watches.insert(
                    user.name().to_string(),
                    WatchEntry {
                        refs: 1,
                        watch: Arc::clone(&watch),
                        _watcher: watcher,
                    },
                );
                watch
            }
        };
        drop(watches);

        let (sub_id, rx, snapshot) = watch.subscribe();
        Ok(Subscription {
            key: user.name().to_string(),
            sub_id,
            snapshot,
            deltas: Some(rx),
            watch,
            manager: self.clone(),
            closed: false,
        })
    }

    async fn start_watch(&self, user: &User) -> FsResult<(Arc<UserWatch>, RecommendedWatcher)> {
        tokio::fs::create_dir_all(user.root()).await?;

        let watch = Arc::new(UserWatch::new(user.root().to_path_buf()));
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| {
                if let Ok(event) = result {
                    let _ = tx.send(event);
                }
            },
            notify::Config::default(),
        )
        .map_err(io::Error::other)?;
        watcher
            .watch(user.root(), RecursiveMode::Recursive)
            .map_err(io::Error::other)?;

        watch.seed().await;

        let processor = Arc::clone(&watch);
        tokio::spawn(async move {
            // Runs until the watcher is dropped and the channel drains.
            while let Some(event) = rx.recv().await {
                if matches!(event.kind, EventKind::Access(_)) {
                    continue;
                }
                for path in &event.paths {
                    processor.process_path(path).await;
                }
            }
            tracing::debug!(root = %processor.root.display(), "watch event loop ended");
        });

        tracing::debug!(user = %user.name(), root = %user.root().display(), "watch started");
        Ok((watch, watcher))
    }

    async fn release(&self, key: &str) {
        let mut watches = self.watches.lock().await;
        if let Some(entry) = watches.get_mut(key) {
            entry.refs -= 1;
            if entry.refs == 0 {
                watches.remove(key);
                tracing::debug!(user = %key, "watch stopped, index discarded");
            }
        }
    }

    /// Number of currently running watches (one per user with sessions).
    pub async fn active_watches(&self) -> usize {
        self.watches.lock().await.len()
    }
}

/// One session's handle on its user's shared watch.
pub struct Subscription {
    key: String,
    sub_id: u64,
    snapshot: BTreeMap<String, Attributes>,
    deltas: Option<mpsc::UnboundedReceiver<Delta>>,
    watch: Arc<UserWatch>,
    manager: WatchManager,
    closed: bool,
}

impl Subscription {
    /// The tree snapshot taken when this subscription was registered.
    /// Everything the watcher saw before it is in here; everything after
    /// arrives on the delta channel.
    pub fn initial_contents(&self) -> BTreeMap<String, Attributes> {
        self.snapshot.clone()
    }

    /// A fresh point-in-time copy of the shared index.
    pub fn contents(&self) -> BTreeMap<String, Attributes> {
        self.watch.contents()
    }

    /// Take the delta channel. Yields `Some` exactly once.
    pub fn take_deltas(&mut self) -> Option<mpsc::UnboundedReceiver<Delta>> {
        self.deltas.take()
    }

    /// Deterministic teardown: unregister the delta channel and release the
    /// refcount, stopping the watch if this was the last session.
    pub async fn close(mut self) {
        self.watch.unsubscribe(self.sub_id);
        self.closed = true;
        let key = std::mem::take(&mut self.key);
        self.manager.release(&key).await;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.watch.unsubscribe(self.sub_id);
        let manager = self.manager.clone();
        let key = std::mem::take(&mut self.key);
        // Refcount release needs the async mutex; outside a runtime the
        // process is tearing down anyway.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { manager.release(&key).await });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    const EVENT_WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_seed_snapshot_includes_existing_tree() {
        let dir = tempfile::tempdir().unwrap();
        let user = User::new("amy", dir.path().join("amy"));
        tokio::fs::create_dir_all(user.root().join("docs")).await.unwrap();
        tokio::fs::write(user.root().join("docs/a.txt"), b"hi").await.unwrap();

        let manager = WatchManager::new();
        let sub = manager.acquire(&user).await.unwrap();

        let snapshot = sub.initial_contents();
        assert!(snapshot.contains_key("docs"));
        assert_eq!(snapshot.get("docs/a.txt").map(|a| a.size), Some(2));
        sub.close().await;
    }

    #[tokio::test]
    async fn test_delta_on_create_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let user = User::new("amy", dir.path().join("amy"));
        let manager = WatchManager::new();
        let mut sub = manager.acquire(&user).await.unwrap();
        let mut deltas = sub.take_deltas().unwrap();

        let file = user.root().join("new.txt");
        tokio::fs::write(&file, b"fresh").await.unwrap();

        // Event order and coalescing vary by platform; wait for the delta
        // that settles on the final state.
        loop {
            let (path, attrs) = timeout(EVENT_WAIT, deltas.recv()).await.unwrap().unwrap();
            if path == "new.txt" && attrs.map(|a| a.size) == Some(5) {
                break;
            }
        }
        assert_eq!(sub.contents().get("new.txt").map(|a| a.size), Some(5));

        tokio::fs::remove_file(&file).await.unwrap();
        loop {
            let (path, attrs) = timeout(EVENT_WAIT, deltas.recv()).await.unwrap().unwrap();
            if path == "new.txt" && attrs.is_none() {
                break;
            }
        }
        assert!(!sub.contents().contains_key("new.txt"));
        sub.close().await;
    }

    #[tokio::test]
    async fn test_refcounted_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let user = User::new("amy", dir.path().join("amy"));
        let manager = WatchManager::new();
        assert_eq!(manager.active_watches().await, 0);

        let first = manager.acquire(&user).await.unwrap();
        let second = manager.acquire(&user).await.unwrap();
        assert_eq!(manager.active_watches().await, 1);

        first.close().await;
        assert_eq!(manager.active_watches().await, 1);
        second.close().await;
        assert_eq!(manager.active_watches().await, 0);

        // A fresh start reseeds from disk rather than reviving stale state.
        tokio::fs::write(user.root().join("later.txt"), b"x").await.unwrap();
        let third = manager.acquire(&user).await.unwrap();
        assert!(third.initial_contents().contains_key("later.txt"));
        third.close().await;
    }

    #[tokio::test]
    async fn test_sessions_share_one_index() {
        let dir = tempfile::tempdir().unwrap();
        let user = User::new("amy", dir.path().join("amy"));
        tokio::fs::create_dir_all(user.root()).await.unwrap();
        tokio::fs::write(user.root().join("shared.txt"), b"abc").await.unwrap();

        let manager = WatchManager::new();
        let a = manager.acquire(&user).await.unwrap();
        let b = manager.acquire(&user).await.unwrap();
        assert_eq!(a.initial_contents(), b.initial_contents());
        a.close().await;
        b.close().await;
    }
}
