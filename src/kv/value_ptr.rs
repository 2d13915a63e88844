use crate::error::{Error, Result};

/// Fixed 12-byte indirection into the value log, used when a value is too
/// large to inline.
///
/// ```text
/// ┌──────────┬─────────────┬─────────────┐
/// │ Len (4B) │ Offset (4B) │ FileID (4B) │   all big-endian
/// └──────────┴─────────────┴─────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ValuePtr {
    pub len: u32,
    pub offset: u32,
    pub file_id: u32,
}

impl ValuePtr {
    pub const SIZE: usize = 12;

    pub fn new(file_id: u32, offset: u32, len: u32) -> Self {
        ValuePtr {
            len,
            offset,
            file_id,
        }
    }

    /// A zero pointer points nowhere.
    pub fn is_zero(&self) -> bool {
        self.len == 0 && self.offset == 0 && self.file_id == 0
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.len.to_be_bytes());
        buf[4..8].copy_from_slice(&self.offset.to_be_bytes());
        buf[8..12].copy_from_slice(&self.file_id.to_be_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::Truncated(format!(
                "value pointer needs {} bytes, have {}",
                Self::SIZE,
                data.len()
            )));
        }
        let field = |i: usize| u32::from_be_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);
        Ok(ValuePtr {
            len: field(0),
            offset: field(4),
            file_id: field(8),
        })
    }
}
