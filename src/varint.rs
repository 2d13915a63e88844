//! Unsigned LEB128 varints and a bounds-checked read cursor.
//!
//! Shared by the entry codec and the manifest edit codec. Every read returns
//! `Error::Truncated` instead of panicking when the input runs out.

use crate::error::{Error, Result};

/// Longest possible encoding of a u64.
pub const MAX_VARINT_LEN: usize = 10;

/// Append `v` as a uvarint.
pub fn put_uvarint(buf: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        buf.push((v as u8) | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

/// Number of bytes `put_uvarint` writes for `v`.
pub fn uvarint_len(mut v: u64) -> usize {
    let mut n = 1;
    while v >= 0x80 {
        v >>= 7;
        n += 1;
    }
    n
}

/// Append a length-prefixed byte string.
pub fn put_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    put_uvarint(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

/// Forward-only reader over a byte slice.
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Cursor { data, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn uvarint(&mut self) -> Result<u64> {
        let mut result: u64 = 0;
        let mut shift = 0u32;
        for i in 0..MAX_VARINT_LEN {
            let Some(&byte) = self.data.get(self.pos + i) else {
                return Err(Error::Truncated("uvarint".into()));
            };
            if i == MAX_VARINT_LEN - 1 && byte > 1 {
                return Err(Error::Corruption("uvarint overflows u64".into()));
            }
            result |= u64::from(byte & 0x7F) << shift;
            if byte < 0x80 {
                self.pos += i + 1;
                return Ok(result);
            }
            shift += 7;
        }
        Err(Error::Corruption("uvarint overflows u64".into()))
    }

    pub fn uvarint_u32(&mut self) -> Result<u32> {
        let v = self.uvarint()?;
        u32::try_from(v).map_err(|_| Error::Corruption(format!("value {v} overflows u32")))
    }

    pub fn u8(&mut self) -> Result<u8> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| Error::Truncated("u8".into()))?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn bool(&mut self) -> Result<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::Corruption(format!("invalid bool byte {other}"))),
        }
    }

    /// Take exactly `n` raw bytes.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::Truncated(format!(
                "need {n} bytes, have {}",
                self.remaining()
            )));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Read a uvarint length prefix followed by that many bytes.
    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.uvarint()?;
        let len = usize::try_from(len)
            .map_err(|_| Error::Corruption(format!("length {len} overflows usize")))?;
        self.take(len)
    }
}
