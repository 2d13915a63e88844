use bytes::Bytes;

use crate::error::{Error, Result};
use crate::kv::value_ptr::ValuePtr;
use crate::varint::{put_uvarint, uvarint_len, Cursor};

const CRC_SIZE: usize = 4;

/// Bit flags carried in an entry's `meta` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EntryMeta(u8);

impl EntryMeta {
    pub const NONE: EntryMeta = EntryMeta(0);
    /// Tombstone for a single key.
    pub const DELETE: EntryMeta = EntryMeta(0x01);
    /// Value holds an encoded `ValuePtr` into the value log.
    pub const VALUE_POINTER: EntryMeta = EntryMeta(0x02);
    /// Tombstone covering a key range.
    pub const RANGE_DELETE: EntryMeta = EntryMeta(0x04);

    pub fn from_bits(bits: u8) -> Self {
        EntryMeta(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: EntryMeta) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: EntryMeta) {
        self.0 |= other.0;
    }
}

impl std::ops::BitOr for EntryMeta {
    type Output = EntryMeta;

    fn bitor(self, rhs: EntryMeta) -> EntryMeta {
        EntryMeta(self.0 | rhs.0)
    }
}

/// Unified payload shared by the WAL and the value log.
///
/// On-disk format:
/// ```text
/// ┌────────────┬──────────────┬──────────┬───────────────┬─────┬───────┬──────────┐
/// │ KeyLen(uv) │ ValueLen(uv) │ Meta(uv) │ ExpiresAt(uv) │ Key │ Value │ CRC (4B) │
/// └────────────┴──────────────┴──────────┴───────────────┴─────┴───────┴──────────┘
/// ```
///
/// CRC32 (big-endian) covers header, key and value. Key and value are
/// immutable `Bytes`, so clones share the buffer instead of copying it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Entry {
    pub key: Bytes,
    pub value: Bytes,
    pub meta: EntryMeta,
    /// Unix seconds; 0 means no expiry.
    pub expires_at: u64,
}

impl Entry {
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Entry {
            key: key.into(),
            value: value.into(),
            meta: EntryMeta::NONE,
            expires_at: 0,
        }
    }

    /// A point tombstone.
    pub fn delete(key: impl Into<Bytes>) -> Self {
        Entry {
            key: key.into(),
            value: Bytes::new(),
            meta: EntryMeta::DELETE,
            expires_at: 0,
        }
    }

    /// An entry whose value redirects into the value log.
    pub fn with_value_ptr(key: impl Into<Bytes>, ptr: ValuePtr) -> Self {
        Entry {
            key: key.into(),
            value: Bytes::copy_from_slice(&ptr.encode()),
            meta: EntryMeta::VALUE_POINTER,
            expires_at: 0,
        }
    }

    pub fn with_expires_at(mut self, expires_at: u64) -> Self {
        self.expires_at = expires_at;
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.meta.contains(EntryMeta::DELETE) || self.meta.contains(EntryMeta::RANGE_DELETE)
    }

    /// Decode the value as a `ValuePtr` when the pointer flag is set.
    pub fn value_ptr(&self) -> Result<Option<ValuePtr>> {
        if !self.meta.contains(EntryMeta::VALUE_POINTER) {
            return Ok(None);
        }
        ValuePtr::decode(&self.value).map(Some)
    }

    fn header_len(&self) -> usize {
        uvarint_len(self.key.len() as u64)
            + uvarint_len(self.value.len() as u64)
            + uvarint_len(u64::from(self.meta.bits()))
            + uvarint_len(self.expires_at)
    }

    /// Exact number of bytes `encode` produces. Callers size buffers with it.
    pub fn estimate_encoded_size(&self) -> usize {
        self.header_len() + self.key.len() + self.value.len() + CRC_SIZE
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    /// Append the encoded entry to `buf`, reserving the full size up front.
    /// Returns the number of bytes written.
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> usize {
        let size = self.estimate_encoded_size();
        buf.reserve(size);
        let start = buf.len();

        put_uvarint(buf, self.key.len() as u64);
        put_uvarint(buf, self.value.len() as u64);
        put_uvarint(buf, u64::from(self.meta.bits()));
        put_uvarint(buf, self.expires_at);
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        let crc = crc32fast::hash(&buf[start..]);
        buf.extend_from_slice(&crc.to_be_bytes());
        size
    }

    /// Decode one entry from the front of `data`.
    /// Returns the entry and the number of bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Entry, usize)> {
        let mut cur = Cursor::new(data);
        let key_len = cur.uvarint()? as usize;
        let value_len = cur.uvarint()? as usize;
        let meta = cur.uvarint()?;
        let meta = u8::try_from(meta)
            .map_err(|_| Error::Corruption(format!("entry meta {meta} overflows u8")))?;
        let expires_at = cur.uvarint()?;

        let key = cur.take(key_len)?;
        let value = cur.take(value_len)?;
        let body_len = cur.position();
        let crc_bytes = cur.take(CRC_SIZE)?;

        let mut stored = [0u8; CRC_SIZE];
        stored.copy_from_slice(crc_bytes);
        let expected = u32::from_be_bytes(stored);
        let actual = crc32fast::hash(&data[..body_len]);
        if expected != actual {
            return Err(Error::Checksum { expected, actual });
        }

        let entry = Entry {
            key: Bytes::copy_from_slice(key),
            value: Bytes::copy_from_slice(value),
            meta: EntryMeta::from_bits(meta),
            expires_at,
        };
        Ok((entry, cur.position()))
    }
}
