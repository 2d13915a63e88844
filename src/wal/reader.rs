use std::fs;
use std::path::Path;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::wal::metrics::RecordCounts;
use crate::wal::record::{EntryInfo, Record};

/// Reads the records of one segment file.
///
/// Loads the entire file into memory, then iterates record by record.
/// Payloads handed out are slices of that single buffer.
pub struct SegmentReader {
    id: u32,
    data: Bytes,
}

impl SegmentReader {
    pub fn open(path: &Path, id: u32) -> Result<Self> {
        let data = fs::read(path)?;
        Ok(SegmentReader {
            id,
            data: Bytes::from(data),
        })
    }

    pub fn from_bytes(id: u32, data: impl Into<Bytes>) -> Self {
        SegmentReader {
            id,
            data: data.into(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// File length in bytes.
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterate over the valid records of the segment.
    pub fn iter(&self) -> SegmentIter<'_> {
        SegmentIter {
            id: self.id,
            data: &self.data,
            offset: 0,
            state: IterState::Reading,
        }
    }

    /// Walk the whole segment once, counting records per type and locating
    /// the end of the valid prefix. Corruption is reported, not returned.
    pub fn scan(&self) -> SegmentScan {
        let mut counts = RecordCounts::default();
        let mut iter = self.iter();
        let mut corruption = None;

        for item in iter.by_ref() {
            match item {
                Ok((info, _)) => counts.add(info.record_type),
                Err(e) => {
                    corruption = Some(e);
                    break;
                }
            }
        }

        SegmentScan {
            counts,
            valid_len: iter.offset() as u64,
            file_len: self.len(),
            torn: iter.is_torn(),
            corruption,
        }
    }
}

/// Result of `SegmentReader::scan`.
#[derive(Debug)]
pub struct SegmentScan {
    pub counts: RecordCounts,
    /// Length of the prefix made of complete, verified records.
    pub valid_len: u64,
    pub file_len: u64,
    /// The segment ends in a partial record.
    pub torn: bool,
    /// First checksum/type failure, if any.
    pub corruption: Option<Error>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IterState {
    Reading,
    Eof,
    Torn,
    Failed,
}

/// Iterator over one segment's records.
///
/// Stops quietly at a clean EOF or a partial tail record (a crash mid-write:
/// nothing valid can follow it in an append-only file). Yields exactly one
/// `Err` on a checksum or type failure and then stops.
pub struct SegmentIter<'a> {
    id: u32,
    data: &'a Bytes,
    offset: usize,
    state: IterState,
}

impl SegmentIter<'_> {
    /// Offset of the next unread byte; after a stop, the end of the valid prefix.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn is_torn(&self) -> bool {
        self.state == IterState::Torn
    }
}

impl Iterator for SegmentIter<'_> {
    type Item = Result<(EntryInfo, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state != IterState::Reading {
            return None;
        }
        if self.offset >= self.data.len() {
            self.state = IterState::Eof;
            return None;
        }

        let remaining = self.data.slice(self.offset..);
        match Record::decode(&remaining) {
            Ok(record) => {
                let info = EntryInfo {
                    segment_id: self.id,
                    offset: self.offset as u64,
                    length: record.payload.len() as u32,
                    record_type: record.record_type,
                };
                self.offset += record.encoded_size();
                Some(Ok((info, record.payload)))
            }
            Err(Error::Truncated(reason)) => {
                debug!(segment = self.id, offset = self.offset, %reason, "WAL segment ends in a partial record");
                self.state = IterState::Torn;
                None
            }
            Err(e) => {
                warn!(segment = self.id, offset = self.offset, error = %e, "corrupt WAL record");
                self.state = IterState::Failed;
                Some(Err(e))
            }
        }
    }
}
