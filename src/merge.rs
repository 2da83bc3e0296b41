//! Merge (compaction): rewrites the live key set into a single fresh
//! segment and reclaims the space held by superseded records.
//!
//! Runs on the writer thread, so the write path is quiescent for the whole
//! merge window and the index snapshot taken at the start cannot go stale.
//! The output is staged in a swap file named with a unix-timestamp id (far
//! above any live segment id), atomically renamed over segment 0, and then
//! installed under the index write lock before segments `1..=N` are
//! unlinked.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::error::StoreError;
use crate::index::SlotRef;
use crate::segment;
use crate::telemetry::{store_metrics, StoreEvent};
use crate::writer::WriterState;

/// Summary of one compaction cycle.
#[derive(Debug, Clone, Copy)]
pub struct MergeStats {
    /// Segments collapsed into the merged output (ids `0..=N` at snapshot time).
    pub input_segments: usize,
    /// Keys copied into the fresh segment.
    pub live_keys: usize,
    /// Bytes written to the merged segment.
    pub bytes_written: u64,
}

pub(crate) fn run(state: &mut WriterState) -> Result<MergeStats, StoreError> {
    let started = Instant::now();
    let max_id = state.segment_id;
    let entries = state.index.snapshot()?;

    // The swap id only has to dodge live segment ids for the merge window;
    // epoch seconds sit far above any realistic rollover count.
    let swap_id = unix_seconds().max(max_id + 1);
    let swap_path = segment::path(&state.dir, swap_id);

    let (new_map, bytes_written) = match copy_live(&state.dir, &entries, &swap_path) {
        Ok(v) => v,
        Err(e) => {
            let _ = fs::remove_file(&swap_path);
            return Err(e);
        }
    };

    let dest = segment::path(&state.dir, 0);
    if let Err(e) = rename_over(&swap_path, &dest) {
        let _ = fs::remove_file(&swap_path);
        return Err(e);
    }

    // From here on the merged segment is the source of truth; failures
    // surface but no data is lost (the store directory replays correctly).
    let new_active = segment::open_active(&state.dir, 0)?;
    state.index.replace_all(new_map)?;
    state.segment = Some(new_active);
    state.segment_id = 0;
    state.offset = bytes_written;

    for id in 1..=max_id {
        if let Err(e) = fs::remove_file(segment::path(&state.dir, id)) {
            state.events.on_event(StoreEvent::StaleSegmentRemovalFailed {
                segment_id: id,
                error: e.to_string(),
            });
        }
    }

    store_metrics::record_merge(started.elapsed(), bytes_written);
    Ok(MergeStats {
        input_segments: (max_id as usize) + 1,
        live_keys: entries.len(),
        bytes_written,
    })
}

/// Streams the current record of every live key into the swap file and
/// builds the replacement index pointing everything at segment 0.
fn copy_live(
    dir: &Path,
    entries: &[(String, SlotRef)],
    swap_path: &Path,
) -> Result<(HashMap<String, SlotRef>, u64), StoreError> {
    let file = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(swap_path)?;
    let mut out = BufWriter::new(file);

    let mut new_map = HashMap::with_capacity(entries.len());
    let mut offset = 0u64;
    // One read handle per source segment for the duration of the copy.
    let mut readers: HashMap<u64, File> = HashMap::new();

    for (key, slot) in entries {
        let bytes = read_record_at(dir, &mut readers, *slot)?;
        out.write_all(&bytes)?;
        new_map.insert(
            key.clone(),
            SlotRef {
                segment_id: 0,
                offset,
            },
        );
        offset += bytes.len() as u64;
    }

    out.flush()?;
    let file = out
        .into_inner()
        .map_err(|e| StoreError::Io(e.into_error()))?;
    file.sync_data()?;
    Ok((new_map, offset))
}

/// Reads the full record bytes at the given slot, reusing open handles.
fn read_record_at(
    dir: &Path,
    readers: &mut HashMap<u64, File>,
    slot: SlotRef,
) -> Result<Vec<u8>, StoreError> {
    let file = match readers.entry(slot.segment_id) {
        std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
        std::collections::hash_map::Entry::Vacant(e) => {
            e.insert(segment::open_read(dir, slot.segment_id)?)
        }
    };
    segment::read_record_from(file, slot)
}

/// Renames `src` over `dest`, removing a pre-existing destination first on
/// platforms where rename refuses to replace.
fn rename_over(src: &Path, dest: &Path) -> Result<(), StoreError> {
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(first) => {
            if dest.exists() {
                fs::remove_file(dest)?;
                fs::rename(src, dest)?;
                Ok(())
            } else {
                Err(StoreError::Io(first))
            }
        }
    }
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
