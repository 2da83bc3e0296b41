//! Segment file management: naming, directory listing and open helpers.
//!
//! A segment is an append-only file named `<decimal_id>.seg` inside the
//! store directory. The segment with the highest id is the active one; all
//! lower-numbered segments are sealed. Files without the segment extension
//! are ignored by [`list`], but a `.seg` file whose stem is not a
//! nonnegative decimal integer fails the open.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::index::SlotRef;
use crate::record::{self, ReadOutcome};

/// File extension shared by all segment files.
pub const SEGMENT_EXT: &str = "seg";

/// Builds the path of the segment with the given id inside `dir`.
pub fn path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{}.{}", id, SEGMENT_EXT))
}

/// Returns the ids of all segment files in `dir`, ascending.
///
/// Non-segment files are skipped. A segment file with an unparsable stem is
/// reported as [`StoreError::BadSegmentName`].
pub fn list(dir: &Path) -> Result<Vec<u64>, StoreError> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();
        if path.extension().map(|e| e == SEGMENT_EXT) != Some(true) {
            continue;
        }
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let id: u64 = stem
            .parse()
            .map_err(|_| StoreError::BadSegmentName { name: name.clone() })?;
        ids.push(id);
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Opens the segment with the given id for appending, creating it if absent.
pub fn open_active(dir: &Path, id: u64) -> Result<File, StoreError> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    Ok(options.open(path(dir, id))?)
}

/// Opens the segment with the given id read-only.
pub fn open_read(dir: &Path, id: u64) -> Result<File, StoreError> {
    Ok(File::open(path(dir, id))?)
}

/// Reads the record the index locates at `slot` from an already-open
/// segment file. The index only points at complete records, so a short or
/// missing record here means the index and the file disagree.
pub(crate) fn read_record_from(file: &mut File, slot: SlotRef) -> Result<Vec<u8>, StoreError> {
    file.seek(SeekFrom::Start(slot.offset))?;
    match record::read_record(file)? {
        ReadOutcome::Record(bytes) => Ok(bytes),
        ReadOutcome::Eof | ReadOutcome::TornTail => Err(StoreError::CorruptRecord {
            details: format!(
                "indexed record missing at segment {} offset {}",
                slot.segment_id, slot.offset
            ),
        }),
    }
}

/// Opens a fresh read handle and reads the record at `slot` (the read-side
/// path: no handles are cached across requests).
pub(crate) fn read_record_at(dir: &Path, slot: SlotRef) -> Result<Vec<u8>, StoreError> {
    let mut file = open_read(dir, slot.segment_id)?;
    read_record_from(&mut file, slot)
}
