use std::cmp::Ordering;

use xxhash_rust::xxh3::xxh3_64;

use crate::error::{Error, Result};

/// Three sentinel bytes in front of the column-family id.
pub const CF_SENTINEL: [u8; 3] = *b"!CF";

/// Sentinel + column family id.
pub const CF_MARKER_LEN: usize = CF_SENTINEL.len() + 1;

/// Inverted big-endian timestamp suffix.
pub const TS_LEN: usize = 8;

/// Logical namespace inside the shared key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ColumnFamily {
    #[default]
    Default = 0,
    Lock = 1,
    Write = 2,
}

impl ColumnFamily {
    pub fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(ColumnFamily::Default),
            1 => Ok(ColumnFamily::Lock),
            2 => Ok(ColumnFamily::Write),
            _ => Err(Error::Corruption(format!("invalid column family: {byte}"))),
        }
    }
}

/// Decoded internal key.
///
/// Ordering: (cf ASC, user_key ASC, ts DESC), so the newest version of a key
/// always comes first during merging.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InternalKey {
    pub cf: ColumnFamily,
    pub user_key: Vec<u8>,
    pub ts: u64,
}

impl InternalKey {
    pub fn new(cf: ColumnFamily, user_key: impl Into<Vec<u8>>, ts: u64) -> Self {
        InternalKey {
            cf,
            user_key: user_key.into(),
            ts,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_internal_key(self.cf, &self.user_key, self.ts)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let (cf, user_key, ts) = split_internal_key(data)?;
        Ok(InternalKey::new(cf, user_key, ts))
    }
}

impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cf
            .cmp(&other.cf)
            .then_with(|| self.user_key.cmp(&other.user_key))
            .then_with(|| other.ts.cmp(&self.ts))
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// `CF-marker(4B) ‖ user_key ‖ !ts (8B BE)`.
///
/// Inverting the timestamp makes newer versions of the same user key sort
/// first under byte comparison.
pub fn encode_internal_key(cf: ColumnFamily, user_key: &[u8], ts: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(CF_MARKER_LEN + user_key.len() + TS_LEN);
    buf.extend_from_slice(&CF_SENTINEL);
    buf.push(cf as u8);
    buf.extend_from_slice(user_key);
    buf.extend_from_slice(&(!ts).to_be_bytes());
    buf
}

/// Split an encoded internal key into (cf, user_key, ts).
///
/// Keys without the CF marker are legacy keys in the default column family.
pub fn split_internal_key(key: &[u8]) -> Result<(ColumnFamily, &[u8], u64)> {
    if key.len() < TS_LEN {
        return Err(Error::Truncated(format!(
            "internal key of {} bytes has no timestamp",
            key.len()
        )));
    }
    let (body, ts_bytes) = key.split_at(key.len() - TS_LEN);
    let mut ts = [0u8; TS_LEN];
    ts.copy_from_slice(ts_bytes);
    let ts = !u64::from_be_bytes(ts);

    if body.len() >= CF_MARKER_LEN && body[..CF_SENTINEL.len()] == CF_SENTINEL {
        let cf = ColumnFamily::from_u8(body[CF_SENTINEL.len()])?;
        return Ok((cf, &body[CF_MARKER_LEN..], ts));
    }
    Ok((ColumnFamily::Default, body, ts))
}

/// Key without its timestamp suffix. Short keys are returned whole.
pub fn strip_timestamp(key: &[u8]) -> &[u8] {
    if key.len() < TS_LEN {
        return key;
    }
    &key[..key.len() - TS_LEN]
}

/// Compare two encoded internal keys: prefix ascending, then timestamp
/// descending. Plain byte order is wrong when user keys differ in length.
pub fn compare_internal_keys(a: &[u8], b: &[u8]) -> Ordering {
    strip_timestamp(a)
        .cmp(strip_timestamp(b))
        .then_with(|| ts_suffix(a).cmp(ts_suffix(b)))
}

fn ts_suffix(key: &[u8]) -> &[u8] {
    if key.len() < TS_LEN {
        return &[];
    }
    &key[key.len() - TS_LEN..]
}

/// 64-bit xxh3 hash of a user key.
pub fn key_hash(user_key: &[u8]) -> u64 {
    xxh3_64(user_key)
}
