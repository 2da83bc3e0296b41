//! On-disk record codec.
//!
//! A record is the length-prefixed representation of a single (key, value)
//! pair:
//!
//! ```text
//! [total_size: u32 LE][key_len: u32 LE][key bytes][value_len: u32 LE][value bytes]
//! ```
//!
//! `total_size` counts the whole record, its own four bytes included, so
//! `total_size == 12 + key_len + value_len` always holds. Records carry no
//! checksum and no version field; the format is fixed by the wire protocol.

use std::io::{ErrorKind, Read};

use crate::error::StoreError;

/// Fixed per-record overhead: the three u32 length fields.
pub const RECORD_OVERHEAD: usize = 12;

/// Largest key or value length that still fits the u32 size fields.
pub const MAX_PART_LEN: usize = (u32::MAX as usize) - RECORD_OVERHEAD;

/// Encodes a (key, value) pair into its on-disk byte layout.
///
/// Rejects keys or values whose length cannot be represented in the record
/// header.
pub fn encode(key: &str, value: &str) -> Result<Vec<u8>, StoreError> {
    let key = key.as_bytes();
    let value = value.as_bytes();
    if key.len() > MAX_PART_LEN
        || value.len() > MAX_PART_LEN
        || key.len() + value.len() > MAX_PART_LEN
    {
        return Err(StoreError::RecordTooLarge(format!(
            "key {} + value {} bytes exceeds the u32 size field",
            key.len(),
            value.len()
        )));
    }

    let total = RECORD_OVERHEAD + key.len() + value.len();
    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(&(total as u32).to_le_bytes());
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(value);
    Ok(buf)
}

/// Decodes a full record buffer back into its (key, value) pair.
///
/// The buffer must contain exactly one record: the declared `total_size`
/// has to match the buffer length, and the internal length fields have to
/// be mutually consistent. Any mismatch is reported as `CorruptRecord`.
pub fn decode(buf: &[u8]) -> Result<(String, String), StoreError> {
    if buf.len() < RECORD_OVERHEAD {
        return Err(StoreError::CorruptRecord {
            details: format!("record buffer too short ({} bytes)", buf.len()),
        });
    }

    let total = read_u32(buf, 0)? as usize;
    if total != buf.len() {
        return Err(StoreError::CorruptRecord {
            details: format!("declared size {} does not match buffer length {}", total, buf.len()),
        });
    }

    let key_len = read_u32(buf, 4)? as usize;
    let key_end = 8usize
        .checked_add(key_len)
        .filter(|end| end + 4 <= buf.len())
        .ok_or_else(|| StoreError::CorruptRecord {
            details: format!("key length {} overruns record of {} bytes", key_len, buf.len()),
        })?;

    let value_len = read_u32(buf, key_end)? as usize;
    if RECORD_OVERHEAD + key_len + value_len != total {
        return Err(StoreError::CorruptRecord {
            details: format!(
                "inconsistent length fields: total {} vs key {} + value {}",
                total, key_len, value_len
            ),
        });
    }

    let key = std::str::from_utf8(&buf[8..key_end]).map_err(|e| StoreError::CorruptRecord {
        details: format!("key is not valid UTF-8: {}", e),
    })?;
    let value = std::str::from_utf8(&buf[key_end + 4..]).map_err(|e| StoreError::CorruptRecord {
        details: format!("value is not valid UTF-8: {}", e),
    })?;

    Ok((key.to_string(), value.to_string()))
}

/// Outcome of pulling one record off a byte stream.
pub(crate) enum ReadOutcome {
    /// A complete record, `total_size` header included.
    Record(Vec<u8>),
    /// Clean end of stream at a record boundary.
    Eof,
    /// The stream ended mid-record: a torn write from a crash.
    TornTail,
}

/// Reads the next record from `reader`.
///
/// Reads exactly four header bytes for `total_size`, then exactly
/// `total_size − 4` more. Zero bytes at a record boundary is a clean EOF;
/// any shorter read is a torn tail. A declared size below the fixed record
/// overhead cannot be a torn write and is reported as corruption.
pub(crate) fn read_record<R: Read>(reader: &mut R) -> Result<ReadOutcome, StoreError> {
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(ReadOutcome::Eof),
            Ok(0) => return Ok(ReadOutcome::TornTail),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(StoreError::Io(e)),
        }
    }

    let total = u32::from_le_bytes(header) as usize;
    if total < RECORD_OVERHEAD {
        return Err(StoreError::CorruptRecord {
            details: format!("declared record size {} below minimum {}", total, RECORD_OVERHEAD),
        });
    }

    let mut buf = vec![0u8; total];
    buf[..4].copy_from_slice(&header);
    let mut filled = 4;
    while filled < total {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Ok(ReadOutcome::TornTail),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(StoreError::Io(e)),
        }
    }
    Ok(ReadOutcome::Record(buf))
}

fn read_u32(buf: &[u8], pos: usize) -> Result<u32, StoreError> {
    let bytes = buf
        .get(pos..pos + 4)
        .ok_or_else(|| StoreError::CorruptRecord {
            details: format!("length field at offset {} out of bounds", pos),
        })?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn encode_layout_matches_header_fields() {
        let buf = encode("key1", "value1").unwrap();
        assert_eq!(buf.len(), RECORD_OVERHEAD + 4 + 6);
        assert_eq!(u32::from_le_bytes(buf[0..4].try_into().unwrap()), buf.len() as u32);
        assert_eq!(u32::from_le_bytes(buf[4..8].try_into().unwrap()), 4);
        assert_eq!(&buf[8..12], b"key1");
        assert_eq!(u32::from_le_bytes(buf[12..16].try_into().unwrap()), 6);
        assert_eq!(&buf[16..], b"value1");
    }

    #[test]
    fn decode_rejects_truncated_buffer() {
        let mut buf = encode("key", "value").unwrap();
        buf.pop();
        let err = decode(&buf).unwrap_err();
        assert!(matches!(err, StoreError::CorruptRecord { .. }), "got {err:?}");
    }

    #[test]
    fn decode_rejects_inconsistent_lengths() {
        let mut buf = encode("key", "value").unwrap();
        // Claim a longer key than the record holds.
        buf[4..8].copy_from_slice(&100u32.to_le_bytes());
        let err = decode(&buf).unwrap_err();
        assert!(matches!(err, StoreError::CorruptRecord { .. }), "got {err:?}");
    }

    #[test]
    fn decode_rejects_short_buffer() {
        let err = decode(&[0u8; 4]).unwrap_err();
        assert!(matches!(err, StoreError::CorruptRecord { .. }), "got {err:?}");
    }

    #[test]
    fn empty_value_round_trips() {
        let buf = encode("k", "").unwrap();
        assert_eq!(decode(&buf).unwrap(), ("k".to_string(), String::new()));
    }

    proptest! {
        #[test]
        fn round_trip(key in "\\PC{1,64}", value in "\\PC{0,256}") {
            let buf = encode(&key, &value).unwrap();
            let (k, v) = decode(&buf).unwrap();
            prop_assert_eq!(k, key);
            prop_assert_eq!(v, value);
        }
    }
}
