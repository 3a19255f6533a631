//! Log record encoding and decoding
//!
//! ## Record Format
//!
//! ```text
//! [length: u32][type: u8][payload: bytes][crc32: u32]
//! ```
//!
//! - **length**: size of type + payload + crc (not including length itself)
//! - **type**: record tag (1=ViewCreated, 2=Changeset, 3=Cursor)
//! - **payload**: MessagePack-encoded [`LogRecord`] (named fields)
//! - **crc32**: CRC32 over \[type\]\[payload\]
//!
//! Integers are little-endian.

use crc32fast::Hasher;
use folio_core::{BridgeCursor, Changeset, FolioError, ViewId};
use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

const TYPE_VIEW_CREATED: u8 = 1;
const TYPE_CHANGESET: u8 = 2;
const TYPE_CURSOR: u8 = 3;

/// Minimum value of the length field: type(1) + crc(4)
const MIN_RECORD_LEN: usize = 5;

/// One durable log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogRecord {
    /// A view was provisioned
    ViewCreated {
        /// View name
        view: ViewId,
    },
    /// A changeset was appended to its view
    Changeset(Changeset),
    /// A bridge cursor moved
    Cursor(BridgeCursor),
}

impl LogRecord {
    fn type_tag(&self) -> u8 {
        match self {
            LogRecord::ViewCreated { .. } => TYPE_VIEW_CREATED,
            LogRecord::Changeset(_) => TYPE_CHANGESET,
            LogRecord::Cursor(_) => TYPE_CURSOR,
        }
    }
}

/// Log read/write failure
#[derive(Debug, Error)]
pub enum LogError {
    /// Buffer ends before the record does (torn write at the tail)
    #[error("offset {offset}: incomplete record ({have} of {needed} bytes)")]
    Incomplete {
        /// File offset of the record
        offset: u64,
        /// Bytes available
        have: usize,
        /// Bytes the record needs
        needed: usize,
    },
    /// Checksum, tag or payload is invalid
    #[error("offset {offset}: corrupt record: {reason}")]
    Corrupt {
        /// File offset of the record
        offset: u64,
        /// What failed
        reason: String,
    },
    /// Serialization failed
    #[error("record encoding failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    /// File I/O failed
    #[error("log I/O failed: {0}")]
    Io(#[from] io::Error),
}

impl From<LogError> for FolioError {
    fn from(e: LogError) -> Self {
        FolioError::fatal_store_with_source("changeset log", e)
    }
}

/// Encode a record to bytes ready for appending
pub fn encode_record(record: &LogRecord) -> Result<Vec<u8>, LogError> {
    let type_tag = record.type_tag();
    let payload = rmp_serde::to_vec_named(record)?;

    let total_len = 1 + payload.len() + 4;
    let mut buf = Vec::with_capacity(4 + total_len);
    buf.extend_from_slice(&(total_len as u32).to_le_bytes());
    buf.push(type_tag);
    buf.extend_from_slice(&payload);

    let mut hasher = Hasher::new();
    hasher.update(&[type_tag]);
    hasher.update(&payload);
    buf.extend_from_slice(&hasher.finalize().to_le_bytes());

    Ok(buf)
}

/// Decode one record from the front of `buf`
///
/// Returns the record and the number of bytes consumed. `offset` is the
/// file position of `buf[0]`, used for error reporting.
pub fn decode_record(buf: &[u8], offset: u64) -> Result<(LogRecord, usize), LogError> {
    if buf.len() < 4 {
        return Err(LogError::Incomplete {
            offset,
            have: buf.len(),
            needed: 4,
        });
    }
    let total_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if total_len < MIN_RECORD_LEN {
        return Err(LogError::Corrupt {
            offset,
            reason: format!("length {} below minimum {}", total_len, MIN_RECORD_LEN),
        });
    }
    if buf.len() < 4 + total_len {
        return Err(LogError::Incomplete {
            offset,
            have: buf.len(),
            needed: 4 + total_len,
        });
    }

    let type_tag = buf[4];
    let payload = &buf[5..4 + total_len - 4];
    let crc_at = 4 + total_len - 4;
    let expected_crc = u32::from_le_bytes([
        buf[crc_at],
        buf[crc_at + 1],
        buf[crc_at + 2],
        buf[crc_at + 3],
    ]);

    let mut hasher = Hasher::new();
    hasher.update(&[type_tag]);
    hasher.update(payload);
    let actual_crc = hasher.finalize();
    if actual_crc != expected_crc {
        return Err(LogError::Corrupt {
            offset,
            reason: format!(
                "CRC mismatch: expected {:08x}, got {:08x}",
                expected_crc, actual_crc
            ),
        });
    }

    let record: LogRecord = rmp_serde::from_slice(payload).map_err(|e| LogError::Corrupt {
        offset,
        reason: format!("payload decode failed: {}", e),
    })?;
    if record.type_tag() != type_tag {
        return Err(LogError::Corrupt {
            offset,
            reason: format!(
                "type tag {} does not match payload tag {}",
                type_tag,
                record.type_tag()
            ),
        });
    }

    Ok((record, 4 + total_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::{Claim, ClaimPath, Patch, Timestamp};

    fn changeset_record() -> LogRecord {
        LogRecord::Changeset(
            Changeset::new(
                None,
                ViewId::new("main"),
                1,
                vec![Patch::Add {
                    key: "q1".into(),
                    path: "title".parse::<ClaimPath>().unwrap(),
                    claim: Claim::text("Dune"),
                }],
                Timestamp::from_secs(1),
                None,
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_encode_decode() {
        let record = changeset_record();
        let bytes = encode_record(&record).unwrap();
        let (decoded, consumed) = decode_record(&bytes, 0).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_decode_consecutive_records() {
        let mut bytes = encode_record(&LogRecord::ViewCreated {
            view: ViewId::new("main"),
        })
        .unwrap();
        let first_len = bytes.len();
        bytes.extend(encode_record(&changeset_record()).unwrap());

        let (first, used) = decode_record(&bytes, 0).unwrap();
        assert_eq!(used, first_len);
        assert!(matches!(first, LogRecord::ViewCreated { .. }));
        let (second, _) = decode_record(&bytes[used..], used as u64).unwrap();
        assert!(matches!(second, LogRecord::Changeset(_)));
    }

    #[test]
    fn test_truncated_record_is_incomplete() {
        let bytes = encode_record(&changeset_record()).unwrap();
        for cut in [0, 3, 4, bytes.len() - 1] {
            assert!(matches!(
                decode_record(&bytes[..cut], 0),
                Err(LogError::Incomplete { .. })
            ));
        }
    }

    #[test]
    fn test_bit_flip_is_corrupt() {
        let mut bytes = encode_record(&changeset_record()).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x40;
        assert!(matches!(
            decode_record(&bytes, 128),
            Err(LogError::Corrupt { offset: 128, .. })
        ));
    }

    #[test]
    fn test_tiny_length_is_corrupt() {
        let bytes = [2u8, 0, 0, 0, 1, 0];
        assert!(matches!(
            decode_record(&bytes, 0),
            Err(LogError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_log_error_is_fatal_store() {
        let err: FolioError = LogError::Corrupt {
            offset: 0,
            reason: "x".into(),
        }
        .into();
        assert!(err.is_fatal());
    }
}
