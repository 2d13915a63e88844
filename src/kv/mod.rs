//! Key and entry encodings shared by the WAL and the value log.
//!
//! Pure functions only: nothing here touches disk.

pub mod entry;
pub mod key;
pub mod value_ptr;

pub use entry::{Entry, EntryMeta};
pub use key::{
    compare_internal_keys, encode_internal_key, key_hash, split_internal_key, strip_timestamp, ColumnFamily,
    InternalKey,
};
pub use value_ptr::ValuePtr;
