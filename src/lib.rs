//! # Durable write path for an LSM key-value engine
//!
//! Two append-only, checksummed logs that make the rest of the engine
//! crash-recoverable:
//!
//! - [`wal`]: segmented write-ahead log of typed records (plain entries and
//!   raft state), with a watchdog that reclaims segments every raft group has
//!   moved past.
//! - [`manifest`]: journal of typed metadata edits (table sets, WAL cursor,
//!   value-log status, raft pointers, regions) folded into a [`Version`].
//!
//! ## Core idea
//! Nothing is applied in memory before it is on disk. At startup both logs
//! are replayed from the beginning; replay is a pure fold, so the rebuilt
//! state equals the state before the crash, minus any torn tail.

mod dir;
pub mod error;
pub mod kv;
pub mod manifest;
pub mod varint;
pub mod wal;

// Public re-exports for the top-level API
pub use error::{Error, Result};
pub use manifest::{Manifest, ManifestOptions, Version};
pub use wal::{SyncPolicy, Wal, WalOptions};
