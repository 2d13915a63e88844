use bytes::Bytes;

use crate::error::{Error, Result};
use crate::kv::Entry;

/// Record type stored in the WAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordType {
    /// An encoded `kv::Entry` headed for the memtable.
    Entry = 0x01,
    /// A raft log entry persisted by the raft storage adapter.
    RaftEntry = 0x02,
    /// Raft hard state.
    RaftState = 0x03,
    /// Raft snapshot metadata.
    RaftSnapshot = 0x04,
}

impl RecordType {
    pub fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0x01 => Ok(RecordType::Entry),
            0x02 => Ok(RecordType::RaftEntry),
            0x03 => Ok(RecordType::RaftState),
            0x04 => Ok(RecordType::RaftSnapshot),
            _ => Err(Error::UnknownRecordType(byte)),
        }
    }

    /// Raft-typed records, as opposed to plain entries.
    pub fn is_raft(self) -> bool {
        !matches!(self, RecordType::Entry)
    }
}

/// Durable locator of one appended record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryInfo {
    pub segment_id: u32,
    /// Byte offset of the record's length field within the segment.
    pub offset: u64,
    /// Payload length (excludes framing).
    pub length: u32,
    pub record_type: RecordType,
}

impl EntryInfo {
    /// Offset just past this record: where the next record starts.
    pub fn end_offset(&self) -> u64 {
        self.offset + (HEADER_SIZE + self.length as usize + CRC_SIZE) as u64
    }
}

/// A single record in the WAL.
///
/// On-disk format:
/// ```text
/// ┌────────────┬──────────┬───────────────────┬───────────┐
/// │ Length(4B) │ Type(1B) │ Payload(Length-1) │ CRC (4B)  │
/// └────────────┴──────────┴───────────────────┴───────────┘
/// ```
///
/// Length and CRC are big-endian. Length counts type + payload; CRC covers
/// type + payload. A short read means a crash mid-write; a CRC mismatch on a
/// fully read record is corruption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub record_type: RecordType,
    pub payload: Bytes,
}

// Header sizes
const LEN_SIZE: usize = 4;
const TYPE_SIZE: usize = 1;
const CRC_SIZE: usize = 4;
pub(crate) const HEADER_SIZE: usize = LEN_SIZE + TYPE_SIZE;

/// Largest payload whose type + payload still fits the length field.
pub const MAX_PAYLOAD_LEN: usize = u32::MAX as usize - TYPE_SIZE;

/// `Error::RecordTooLarge` for a payload the frame cannot describe.
pub fn check_payload_len(len: usize) -> Result<()> {
    if len > MAX_PAYLOAD_LEN {
        return Err(Error::RecordTooLarge(len));
    }
    Ok(())
}

impl Record {
    pub fn new(record_type: RecordType, payload: impl Into<Bytes>) -> Self {
        Record {
            record_type,
            payload: payload.into(),
        }
    }

    /// Wrap an encoded `kv::Entry`.
    pub fn entry(entry: &Entry) -> Self {
        Record::new(RecordType::Entry, entry.encode())
    }

    pub fn raft_entry(payload: impl Into<Bytes>) -> Self {
        Record::new(RecordType::RaftEntry, payload)
    }

    pub fn raft_state(payload: impl Into<Bytes>) -> Self {
        Record::new(RecordType::RaftState, payload)
    }

    pub fn raft_snapshot(payload: impl Into<Bytes>) -> Self {
        Record::new(RecordType::RaftSnapshot, payload)
    }

    /// Serialize this record to bytes (including framing and CRC).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_size());
        self.encode_into(&mut buf);
        buf
    }

    /// Fails for a payload longer than `MAX_PAYLOAD_LEN`.
    pub fn validate(&self) -> Result<()> {
        check_payload_len(self.payload.len())
    }

    /// Callers that write to disk go through `validate` first.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        debug_assert!(self.payload.len() <= MAX_PAYLOAD_LEN);
        let length = (TYPE_SIZE + self.payload.len()) as u32;
        buf.extend_from_slice(&length.to_be_bytes());

        let crc_start = buf.len();
        buf.push(self.record_type as u8);
        buf.extend_from_slice(&self.payload);

        let crc = crc32fast::hash(&buf[crc_start..]);
        buf.extend_from_slice(&crc.to_be_bytes());
    }

    /// Deserialize a record from the front of `data`.
    ///
    /// `Error::Truncated` when the record is incomplete, `Error::Checksum` when
    /// it is complete but damaged. The payload is a zero-copy slice of `data`.
    pub fn decode(data: &Bytes) -> Result<Self> {
        if data.len() < LEN_SIZE {
            return Err(Error::Truncated("record length".into()));
        }
        let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if length < TYPE_SIZE {
            // Zero-filled tail: nothing was ever written here.
            return Err(Error::Truncated("empty record".into()));
        }

        let total_len = LEN_SIZE + length + CRC_SIZE;
        if data.len() < total_len {
            return Err(Error::Truncated(format!(
                "record needs {total_len} bytes, have {}",
                data.len()
            )));
        }

        let body = &data[LEN_SIZE..LEN_SIZE + length];
        let crc_at = LEN_SIZE + length;
        let expected = u32::from_be_bytes([
            data[crc_at],
            data[crc_at + 1],
            data[crc_at + 2],
            data[crc_at + 3],
        ]);
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(Error::Checksum { expected, actual });
        }

        let record_type = RecordType::from_u8(body[0])?;
        Ok(Record {
            record_type,
            payload: data.slice(LEN_SIZE + TYPE_SIZE..crc_at),
        })
    }

    /// Size of this record when serialized on disk.
    pub fn encoded_size(&self) -> usize {
        HEADER_SIZE + self.payload.len() + CRC_SIZE
    }
}
