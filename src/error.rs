use std::io;

use thiserror::Error;

/// Unified error type for the durable write path.
///
/// Three families matter to callers:
///   - Corruption (`Checksum`, `BadMagic`, unknown type bytes): fatal for the
///     affected file, surfaced by `open`/`replay`, never repaired.
///   - Torn writes show up as `Truncated` from the decoders; the log readers
///     turn them into a clean end-of-log.
///   - Logical inconsistency (`Corruption`): duplicate or missing IDs in the
///     manifest. Aborts `open` and `log_edit`.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error from disk operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// CRC mismatch on a fully read record, entry or edit.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    Checksum { expected: u32, actual: u32 },

    /// Not enough bytes to decode the structure.
    #[error("truncated: {0}")]
    Truncated(String),

    /// Manifest edit frame does not start with the expected magic.
    #[error("bad magic: {0:#010x}")]
    BadMagic(u32),

    #[error("unknown WAL record type: {0}")]
    UnknownRecordType(u8),

    #[error("unknown manifest edit type: {0}")]
    UnknownEditType(u8),

    /// Logical inconsistency or malformed content.
    #[error("corruption: {0}")]
    Corruption(String),

    /// Payload too long for the 4-byte record length field.
    #[error("record payload of {0} bytes exceeds the frame limit")]
    RecordTooLarge(usize),

    /// The active WAL segment cannot be removed.
    #[error("segment {0} is the active segment")]
    ActiveSegment(u32),

    /// Operation on a closed manager.
    #[error("closed")]
    Closed,
}

impl Error {
    /// True for an IO error caused by a missing file.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::NotFound)
    }

    /// True for the torn-write family: the caller may treat it as end-of-log.
    pub fn is_truncated(&self) -> bool {
        matches!(self, Error::Truncated(_))
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
