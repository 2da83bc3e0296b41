//! Crash recovery: rebuilds the in-memory index by replaying every segment
//! in id order.
//!
//! Later records for the same key overwrite earlier index entries, which is
//! exactly the last-writer-wins semantics of the write path. A torn tail
//! (crash mid-append) ends that segment's replay at the last complete
//! record; when the torn tail sits in the active segment it is truncated
//! away so the next append lands at the writer's tracked offset.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::BufReader;
use std::path::Path;

use crate::error::StoreError;
use crate::index::SlotRef;
use crate::record::{self, ReadOutcome};
use crate::segment;

const REPLAY_BUFFER_SIZE: usize = 8192;

/// Result of scanning and replaying the store directory.
pub(crate) struct Recovered {
    /// Entries for the rebuilt index.
    pub entries: HashMap<String, SlotRef>,
    /// Id of the segment to open for append (max existing id, or 0).
    pub active_segment_id: u64,
    /// Byte offset at which the next append lands.
    pub active_offset: u64,
    /// Number of segment files replayed.
    pub segments: usize,
    /// Bytes dropped from the active segment's torn tail, if any.
    pub truncated_bytes: u64,
}

pub(crate) fn recover(dir: &Path) -> Result<Recovered, StoreError> {
    let ids = segment::list(dir)?;

    let mut entries = HashMap::new();
    let mut active_segment_id = 0u64;
    let mut active_offset = 0u64;

    for &id in &ids {
        let offset = replay_segment(dir, id, &mut entries)?;
        active_segment_id = id;
        active_offset = offset;
    }

    // Drop a torn tail from the active segment so its on-disk length equals
    // the writer's starting offset.
    let mut truncated_bytes = 0;
    if !ids.is_empty() {
        let path = segment::path(dir, active_segment_id);
        let file = OpenOptions::new().write(true).open(&path)?;
        let len = file.metadata()?.len();
        if len > active_offset {
            truncated_bytes = len - active_offset;
            file.set_len(active_offset)?;
            file.sync_data()?;
        }
    }

    Ok(Recovered {
        entries,
        active_segment_id,
        active_offset,
        segments: ids.len(),
        truncated_bytes,
    })
}

/// Replays one segment, updating `entries` with every complete record.
/// Returns the offset just past the last complete record.
fn replay_segment(
    dir: &Path,
    id: u64,
    entries: &mut HashMap<String, SlotRef>,
) -> Result<u64, StoreError> {
    let file = segment::open_read(dir, id)?;
    let mut reader = BufReader::with_capacity(REPLAY_BUFFER_SIZE, file);
    let mut offset = 0u64;

    loop {
        let bytes = match record::read_record(&mut reader) {
            Ok(ReadOutcome::Record(bytes)) => bytes,
            // Clean end of segment, or a torn write from a crash: either way
            // replay of this segment is done.
            Ok(ReadOutcome::Eof) | Ok(ReadOutcome::TornTail) => break,
            Err(StoreError::CorruptRecord { details }) => {
                return Err(StoreError::CorruptRecord {
                    details: format!(
                        "segment {} offset {}: {}",
                        segment::path(dir, id).display(),
                        offset,
                        details
                    ),
                })
            }
            Err(e) => return Err(e),
        };

        let (key, _) = record::decode(&bytes).map_err(|e| match e {
            StoreError::CorruptRecord { details } => StoreError::CorruptRecord {
                details: format!(
                    "segment {} offset {}: {}",
                    segment::path(dir, id).display(),
                    offset,
                    details
                ),
            },
            other => other,
        })?;

        entries.insert(
            key,
            SlotRef {
                segment_id: id,
                offset,
            },
        );
        offset += bytes.len() as u64;
    }

    Ok(offset)
}
