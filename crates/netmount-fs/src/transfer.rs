//! The chunked pull transfer engine.
//!
//! File contents larger than a message frame move as fixed-size chunks,
//! paced by whoever does *not* own the bytes: on a read the client pulls
//! chunk indices of its choosing (retries welcome, serves are idempotent);
//! on a write the server pulls every index eagerly. Transfers are keyed by
//! an opaque uuid, share no state with each other, and are reclaimed by a
//! rolling inactivity deadline — there is no explicit abort, a client just
//! stops sending.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use netmount_types::{CHUNK_SIZE, FsError, StreamFrame, attributes_value};

use crate::probe;
use crate::quota;
use crate::user::User;

/// Inactivity deadline, pushed forward by every valid frame.
pub const TRANSFER_TIMEOUT: Duration = Duration::from_secs(300);

/// How often the reaper scans for expired transfers.
pub const REAP_INTERVAL: Duration = Duration::from_secs(1);

struct ReadState {
    bytes: Vec<u8>,
    total: u64,
    acked: HashSet<u64>,
}

struct WriteState {
    path: PathBuf,
    user: User,
    total: u64,
    chunks: Vec<Option<Vec<u8>>>,
    received: u64,
}

enum TransferKind {
    Read(ReadState),
    Write(WriteState),
}

struct Transfer {
    kind: TransferKind,
    deadline: Instant,
}

/// All live transfers for one connection.
///
/// Dropping the table (connection teardown) aborts the reaper and discards
/// every in-flight transfer.
pub struct TransferTable {
    transfers: Arc<DashMap<Uuid, Transfer>>,
    outbound: mpsc::UnboundedSender<String>,
    reaper: JoinHandle<()>,
}

impl TransferTable {
    pub fn new(outbound: mpsc::UnboundedSender<String>) -> Self {
        let transfers: Arc<DashMap<Uuid, Transfer>> = Arc::new(DashMap::new());
        let reaper = spawn_reaper(Arc::clone(&transfers), outbound.clone());
        Self {
            transfers,
            outbound,
            reaper,
        }
    }

    /// Number of in-flight transfers.
    pub fn active(&self) -> usize {
        self.transfers.len()
    }

    /// Open a server→client transfer over `bytes`. Returns the id and total
    /// chunk count for the out-of-band announcement. A zero-length source
    /// has nothing to acknowledge and is complete at the announcement.
    pub fn start_read(&self, bytes: Vec<u8>) -> (Uuid, u64) {
        let id = Uuid::new_v4();
        let total = bytes.len().div_ceil(CHUNK_SIZE) as u64;
        if total == 0 {
            tracing::debug!(%id, "empty read transfer complete at announce");
            return (id, 0);
        }
        self.transfers.insert(
            id,
            Transfer {
                kind: TransferKind::Read(ReadState {
                    bytes,
                    total,
                    acked: HashSet::new(),
                }),
                deadline: Instant::now() + TRANSFER_TIMEOUT,
            },
        );
        tracing::debug!(%id, total, "read transfer started");
        (id, total)
    }

    /// Open a client→server transfer of `total` chunks destined for `path`
    /// (already resolved and policy-checked). Pull requests for every index
    /// go out immediately; a zero-chunk write commits an empty file now.
    pub async fn start_write(&self, path: PathBuf, user: User, total: u64) -> Uuid {
        let id = Uuid::new_v4();
        if total == 0 {
            self.commit(
                id,
                WriteState {
                    path,
                    user,
                    total,
                    chunks: Vec::new(),
                    received: 0,
                },
            )
            .await;
            return id;
        }
        self.transfers.insert(
            id,
            Transfer {
                kind: TransferKind::Write(WriteState {
                    path,
                    user,
                    total,
                    chunks: vec![None; total as usize],
                    received: 0,
                }),
                deadline: Instant::now() + TRANSFER_TIMEOUT,
            },
        );
        tracing::debug!(%id, total, "write transfer started");
        for chunk in 0..total {
            self.send(StreamFrame::Request { id, chunk });
        }
        id
    }

    /// Route one inbound frame. Frames for unknown or mismatched ids and
    /// out-of-range chunk indices are dropped without acknowledgement.
    pub async fn handle_frame(&self, frame: StreamFrame) {
        match frame {
            StreamFrame::Request { id, chunk } => self.serve_chunk(id, chunk),
            StreamFrame::Ack { id, chunk } => self.record_ack(id, chunk),
            StreamFrame::Data { id, chunk, bytes } => {
                if let Some(ready) = self.store_chunk(id, chunk, bytes) {
                    self.commit(id, ready).await;
                }
            }
            StreamFrame::Error { id, .. } => {
                if self.transfers.remove(&id).is_some() {
                    tracing::debug!(%id, "transfer aborted by peer");
                }
            }
            StreamFrame::Result { .. } | StreamFrame::Invalid => {}
        }
    }

    /// Idempotent serve of one chunk of a read transfer. Re-requests are
    /// answered again and do not advance completion; only acks do.
    fn serve_chunk(&self, id: Uuid, chunk: u64) {
        let Some(mut entry) = self.transfers.get_mut(&id) else {
            return;
        };
        let transfer = entry.value_mut();
        if !matches!(transfer.kind, TransferKind::Read(_)) {
            return;
        }
        transfer.deadline = Instant::now() + TRANSFER_TIMEOUT;
        let TransferKind::Read(read) = &transfer.kind else {
            return;
        };
        if chunk >= read.total {
            return;
        }
        let start = chunk as usize * CHUNK_SIZE;
        let end = (start + CHUNK_SIZE).min(read.bytes.len());
        let bytes = read.bytes[start..end].to_vec();
        drop(entry);
        self.send(StreamFrame::Data { id, chunk, bytes });
    }

    fn record_ack(&self, id: Uuid, chunk: u64) {
        let mut complete = false;
        {
            let Some(mut entry) = self.transfers.get_mut(&id) else {
                return;
            };
            let transfer = entry.value_mut();
            if !matches!(transfer.kind, TransferKind::Read(_)) {
                return;
            }
            transfer.deadline = Instant::now() + TRANSFER_TIMEOUT;
            let TransferKind::Read(read) = &mut transfer.kind else {
                return;
            };
            if chunk >= read.total {
                return;
            }
            read.acked.insert(chunk);
            complete = read.acked.len() as u64 == read.total;
        }
        if complete && self.transfers.remove(&id).is_some() {
            tracing::debug!(%id, "read transfer complete, source discarded");
        }
    }

    /// Store one uploaded chunk, ack it, and return the assembled write
    /// state once every index has arrived. Duplicate indices are re-stored
    /// but never double-counted.
    fn store_chunk(&self, id: Uuid, chunk: u64, bytes: Vec<u8>) -> Option<WriteState> {
        let complete = {
            let mut entry = self.transfers.get_mut(&id)?;
            let transfer = entry.value_mut();
            if !matches!(transfer.kind, TransferKind::Write(_)) {
                return None;
            }
            transfer.deadline = Instant::now() + TRANSFER_TIMEOUT;
            let TransferKind::Write(write) = &mut transfer.kind else {
                return None;
            };
            if chunk >= write.total {
                return None;
            }
            let slot = &mut write.chunks[chunk as usize];
            if slot.is_none() {
                write.received += 1;
            }
            *slot = Some(bytes);
            self.send(StreamFrame::Ack { id, chunk });
            write.received == write.total
        };
        if complete {
            if let Some((_, transfer)) = self.transfers.remove(&id) {
                if let TransferKind::Write(write) = transfer.kind {
                    return Some(write);
                }
            }
        }
        None
    }

    /// Final step of a write: quota check, then an atomic persist, then the
    /// result frame. No partial write ever reaches the target path.
    async fn commit(&self, id: Uuid, state: WriteState) {
        let buffer: Vec<u8> = state.chunks.into_iter().flatten().flatten().collect();
        let (free, _) = quota::capacity(&state.user).await;
        if buffer.len() as u64 > free {
            tracing::debug!(%id, len = buffer.len(), free, "write rejected at commit");
            self.send(StreamFrame::Error {
                id,
                reason: Some(FsError::OutOfSpace.to_string()),
            });
            return;
        }
        if let Err(e) = persist(&state.path, &buffer).await {
            tracing::warn!(%id, path = %state.path.display(), error = %e, "write commit failed");
            self.send(StreamFrame::Error {
                id,
                reason: Some(e.to_string()),
            });
            return;
        }
        let attrs = probe::attributes(&state.path).await;
        self.send(StreamFrame::Result {
            id,
            value: attributes_value(attrs.as_ref()),
        });
        tracing::debug!(%id, path = %state.path.display(), total = state.total, "write transfer complete");
    }

    fn send(&self, frame: StreamFrame) {
        send_frame(&self.outbound, frame);
    }
}

impl Drop for TransferTable {
    fn drop(&mut self) {
        self.reaper.abort();
    }
}

fn send_frame(outbound: &mpsc::UnboundedSender<String>, frame: StreamFrame) {
    if let Some(text) = frame.encode() {
        let _ = outbound.send(text);
    }
}

/// Write to a sibling temp file, then rename over the target.
async fn persist(path: &Path, buffer: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".into());
    let tmp = path.with_file_name(format!(".{name}.{}.tmp", Uuid::new_v4()));
    tokio::fs::write(&tmp, buffer).await?;
    match tokio::fs::rename(&tmp, path).await {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = tokio::fs::remove_file(&tmp).await;
            Err(e)
        }
    }
}

fn spawn_reaper(
    transfers: Arc<DashMap<Uuid, Transfer>>,
    outbound: mpsc::UnboundedSender<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(REAP_INTERVAL);
        loop {
            tick.tick().await;
            let now = Instant::now();
            let expired: Vec<Uuid> = transfers
                .iter()
                .filter(|entry| entry.value().deadline <= now)
                .map(|entry| *entry.key())
                .collect();
            for id in expired {
                if transfers.remove(&id).is_some() {
                    tracing::debug!(%id, "transfer timed out");
                    send_frame(
                        &outbound,
                        StreamFrame::Error {
                            id,
                            reason: Some(FsError::StreamTimeout.to_string()),
                        },
                    );
                }
            }
        }
    })
}
