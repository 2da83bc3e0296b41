//! Single-writer command loop.
//!
//! Exactly one thread owns the active segment file, the current segment id
//! and write offset. It consumes commands from a rendezvous channel; every
//! command carries a one-shot ack channel the caller blocks on. Because
//! merge is also a command, compaction runs with the writer quiescent and no
//! write can be lost between its snapshot and install steps.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;

use crate::error::StoreError;
use crate::index::{HashIndex, SlotRef};
use crate::merge::{self, MergeStats};
use crate::record;
use crate::segment;
use crate::telemetry::{store_metrics, StoreEvent, StoreEventListener};

/// Commands consumed by the writer thread. Each ack sender is used exactly
/// once per command.
pub(crate) enum Command {
    Put {
        key: String,
        value: String,
        ack: mpsc::Sender<Result<(), StoreError>>,
    },
    Merge {
        ack: mpsc::Sender<Result<MergeStats, StoreError>>,
    },
    Shutdown,
}

/// State owned exclusively by the writer thread.
pub(crate) struct WriterState {
    pub dir: PathBuf,
    /// Active segment file. `None` after a failed rollover; the next put
    /// surfaces the problem by retrying the open.
    pub segment: Option<File>,
    pub segment_id: u64,
    pub offset: u64,
    pub max_segment_size: u64,
    pub index: Arc<HashIndex>,
    pub events: Arc<dyn StoreEventListener>,
}

pub(crate) fn run(mut state: WriterState, rx: mpsc::Receiver<Command>) {
    state.events.on_event(StoreEvent::WriterThreadStarted);

    // Loop ends on Shutdown or when every command sender is gone.
    while let Ok(cmd) = rx.recv() {
        match cmd {
            Command::Put { key, value, ack } => {
                let result = handle_put(&mut state, &key, &value);
                let _ = ack.send(result);
            }
            Command::Merge { ack } => {
                state.events.on_event(StoreEvent::MergeStarted);
                let result = merge::run(&mut state);
                match &result {
                    Ok(stats) => {
                        state.events.on_event(StoreEvent::MergeCompleted {
                            input_segments: stats.input_segments,
                            live_keys: stats.live_keys,
                        });
                        store_metrics::record_active_segment(state.segment_id);
                    }
                    Err(e) => state.events.on_event(StoreEvent::MergeFailed {
                        error: e.to_string(),
                    }),
                }
                let _ = ack.send(result);
            }
            Command::Shutdown => break,
        }
    }

    // Closes the active segment.
    state.segment = None;
    state.events.on_event(StoreEvent::WriterThreadStopping);
}

fn handle_put(state: &mut WriterState, key: &str, value: &str) -> Result<(), StoreError> {
    let bytes = record::encode(key, value)?;

    if state.segment.is_none() {
        // A previous rollover failed; retry opening the active segment so
        // the error surfaces here rather than silently dropping writes.
        let file = segment::open_active(&state.dir, state.segment_id)?;
        state.segment = Some(file);
    }
    let file = state.segment.as_mut().ok_or(StoreError::Closed)?;

    if let Err(e) = file.write_all(&bytes) {
        // Drop any partially written tail so the next put retries into the
        // same offset.
        let _ = file.set_len(state.offset);
        return Err(StoreError::Io(e));
    }

    state.index.insert(
        key,
        SlotRef {
            segment_id: state.segment_id,
            offset: state.offset,
        },
    )?;
    state.offset += bytes.len() as u64;
    store_metrics::record_live_keys(state.index.len() as u64);

    if state.offset >= state.max_segment_size {
        roll_over(state);
    }
    Ok(())
}

/// Seals the active segment and opens the next-numbered one.
///
/// Rollover failure is not returned to the put that triggered it (that
/// record is already durable); the writer is left without an active segment
/// and the next put reports the open failure.
fn roll_over(state: &mut WriterState) {
    state.segment = None;
    state.segment_id += 1;
    state.offset = 0;
    match segment::open_active(&state.dir, state.segment_id) {
        Ok(file) => {
            state.segment = Some(file);
            state.events.on_event(StoreEvent::SegmentRolledOver {
                segment_id: state.segment_id,
            });
            store_metrics::record_active_segment(state.segment_id);
        }
        Err(e) => {
            state.events.on_event(StoreEvent::RolloverFailed {
                error: e.to_string(),
            });
        }
    }
}
