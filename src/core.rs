//! Core store logic: public API, writer thread lifecycle, and orchestration
//! of recovery, the reader worker pool, and compaction.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::error::StoreError;
use crate::index::HashIndex;
use crate::merge::MergeStats;
use crate::pool::{ReadFn, WorkerPool};
use crate::record;
use crate::recovery;
use crate::segment;
use crate::telemetry::{noop_event_listener, store_metrics, StoreEvent, StoreEventListener};
use crate::writer::{self, Command, WriterState};

/// Configuration options for the store.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Size threshold at which the active segment is sealed and the writer
    /// rolls over to the next-numbered one.
    pub max_segment_size: u64,
    /// Number of reader worker threads; bounds the read file descriptors
    /// open at any instant.
    pub worker_pool_size: usize,
    /// Structured event hook for observability (no-op by default).
    pub event_listener: Arc<dyn StoreEventListener>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions {
            max_segment_size: crate::DEFAULT_MAX_SEGMENT_SIZE,
            worker_pool_size: crate::DEFAULT_WORKER_POOL_SIZE,
            event_listener: noop_event_listener(),
        }
    }
}

/// A single-node, append-only, log-structured key-value store.
///
/// Writes are serialized through one writer thread that owns the active
/// segment file; reads fan out across a fixed pool of worker threads that
/// resolve each key through the in-memory hash index. The index is rebuilt
/// from the segment files on every open.
#[derive(Debug)]
pub struct Store {
    dir: PathBuf,
    index: Arc<HashIndex>,
    writer_tx: mpsc::SyncSender<Command>,
    writer_handle: Mutex<Option<JoinHandle<()>>>,
    pool: WorkerPool,
    closed: Arc<AtomicBool>,
}

impl Store {
    /// Opens (or creates) a store rooted at `dir`.
    ///
    /// Recovery runs first: every segment in the directory is replayed in id
    /// order to rebuild the index, then the highest-numbered segment becomes
    /// the active one. Only after recovery succeeds are the writer thread
    /// and the reader pool started.
    pub fn open<P: AsRef<Path>>(dir: P, options: StoreOptions) -> Result<Self, StoreError> {
        if options.max_segment_size == 0 {
            return Err(StoreError::InvalidOptions(
                "max_segment_size must be positive".to_string(),
            ));
        }
        if options.worker_pool_size == 0 {
            return Err(StoreError::InvalidOptions(
                "worker_pool_size must be positive".to_string(),
            ));
        }

        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let events = options.event_listener.clone();

        let recovered = recovery::recover(&dir)?;
        if recovered.truncated_bytes > 0 {
            events.on_event(StoreEvent::TornTailTruncated {
                segment_id: recovered.active_segment_id,
                dropped_bytes: recovered.truncated_bytes,
            });
        }
        events.on_event(StoreEvent::RecoveryCompleted {
            segments: recovered.segments,
            live_keys: recovered.entries.len(),
        });
        store_metrics::record_live_keys(recovered.entries.len() as u64);
        store_metrics::record_active_segment(recovered.active_segment_id);

        let index = Arc::new(HashIndex::new(recovered.entries));
        let active = segment::open_active(&dir, recovered.active_segment_id)?;
        let closed = Arc::new(AtomicBool::new(false));

        // Rendezvous channel: put suspends until the writer receives, so the
        // channel itself is the admission queue and carries no backlog.
        let (writer_tx, writer_rx) = mpsc::sync_channel::<Command>(0);
        let state = WriterState {
            dir: dir.clone(),
            segment: Some(active),
            segment_id: recovered.active_segment_id,
            offset: recovered.active_offset,
            max_segment_size: options.max_segment_size,
            index: Arc::clone(&index),
            events: events.clone(),
        };
        let writer_handle = thread::Builder::new()
            .name("seglog-writer".to_string())
            .spawn(move || writer::run(state, writer_rx))
            .map_err(|e| {
                StoreError::BackgroundTaskError(format!("failed to spawn writer: {}", e))
            })?;

        let read_fn: ReadFn = {
            let index = Arc::clone(&index);
            let dir = dir.clone();
            let closed = Arc::clone(&closed);
            Arc::new(move |key: &str| {
                if closed.load(Ordering::Acquire) {
                    return Err(StoreError::Closed);
                }
                let slot = index.lookup(key)?.ok_or(StoreError::NotFound)?;
                let bytes = segment::read_record_at(&dir, slot)?;
                let (_, value) = record::decode(&bytes)?;
                Ok(value)
            })
        };
        let pool = WorkerPool::new(read_fn, options.worker_pool_size, events)?;

        Ok(Store {
            dir,
            index,
            writer_tx,
            writer_handle: Mutex::new(Some(writer_handle)),
            pool,
            closed,
        })
    }

    /// Stores `value` under `key`. Returns once the record bytes have been
    /// handed to the OS and the index points at them; any later `get` for
    /// this key observes this value or a newer one.
    pub fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        if key.is_empty() {
            return Err(StoreError::InvalidKey("key must be nonempty".to_string()));
        }

        let started = Instant::now();
        let record_len = (record::RECORD_OVERHEAD + key.len() + value.len()) as u64;
        let (ack_tx, ack_rx) = mpsc::channel();
        self.writer_tx
            .send(Command::Put {
                key: key.to_string(),
                value: value.to_string(),
                ack: ack_tx,
            })
            .map_err(|_| StoreError::Closed)?;
        let result = ack_rx.recv().map_err(|e| {
            StoreError::BackgroundTaskError(format!("writer dropped ack channel: {}", e))
        })?;
        if result.is_ok() {
            store_metrics::record_put(started.elapsed(), record_len);
        }
        result
    }

    /// Returns the current value of `key`, dispatched to the reader pool.
    pub fn get(&self, key: &str) -> Result<String, StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        let started = Instant::now();
        let result = self.pool.dispatch(key);
        store_metrics::record_get(started.elapsed());
        result
    }

    /// Collapses all segments into a single segment 0 holding exactly one
    /// record per live key. Runs on the writer thread, so writes queued
    /// behind the merge resume against the fresh segment.
    pub fn merge(&self) -> Result<MergeStats, StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        let (ack_tx, ack_rx) = mpsc::channel();
        self.writer_tx
            .send(Command::Merge { ack: ack_tx })
            .map_err(|_| StoreError::Closed)?;
        ack_rx.recv().map_err(|e| {
            StoreError::BackgroundTaskError(format!("writer dropped ack channel: {}", e))
        })?
    }

    /// Shuts down the writer thread and the reader pool. Idempotent;
    /// subsequent operations fail with [`StoreError::Closed`].
    pub fn close(&self) -> Result<(), StoreError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        // Writer first: its shutdown seals the active segment. The send
        // fails only if the writer is already gone.
        let _ = self.writer_tx.send(Command::Shutdown);
        if let Some(handle) = self.writer_handle.lock()?.take() {
            handle
                .join()
                .map_err(|_| StoreError::BackgroundTaskError("writer thread panicked".to_string()))?;
        }
        self.pool.close()
    }

    /// Directory this store owns.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of keys currently in the index.
    pub fn live_keys(&self) -> usize {
        self.index.len()
    }
}

/// Best-effort shutdown on drop: seals the active segment and joins the
/// background threads. Errors cannot propagate out of `drop` and are
/// swallowed.
impl Drop for Store {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
