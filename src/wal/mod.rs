//! Segmented, typed, checksummed write-ahead log.
//!
//! Higher layers append `Record`s (plain entries or raft state) and get back
//! an `EntryInfo` locator per record; at startup they `replay` the log to
//! rebuild in-memory state before accepting new writes.

pub mod manager;
pub mod metrics;
pub mod reader;
pub mod record;
pub mod watchdog;
pub mod writer;

use bytes::Bytes;

use crate::error::Result;

pub use manager::Manager;
pub use metrics::{RecordCounts, WalMetrics};
pub use record::{EntryInfo, Record, RecordType};
pub use watchdog::{Watchdog, WatchdogConfig, WatchdogHandle, WatchdogSnapshot};

/// Default segment size before rotation (64 MiB).
pub const DEFAULT_SEGMENT_SIZE: u64 = 64 * 1024 * 1024;

/// Controls when the WAL is fsync'd to disk.
///
/// Trade-off: durability vs throughput.
///   - EveryWrite: every `append_records` call is durable on return
///   - EveryNWrites: lose up to N records on crash
///   - Manual: nothing is durable until the caller runs `sync`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPolicy {
    /// fsync after every append call. Safest, slowest.
    EveryWrite,
    /// fsync once N records have accumulated since the last fsync.
    EveryNWrites(usize),
    /// fsync only on explicit `sync`/rotation/close.
    #[default]
    Manual,
}

/// WAL configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalOptions {
    /// Rotate once the next record would push the active segment past this.
    pub segment_size: u64,
    pub sync_policy: SyncPolicy,
}

impl Default for WalOptions {
    fn default() -> Self {
        WalOptions {
            segment_size: DEFAULT_SEGMENT_SIZE,
            sync_policy: SyncPolicy::default(),
        }
    }
}

impl WalOptions {
    pub fn with_segment_size(segment_size: u64) -> Self {
        WalOptions {
            segment_size,
            ..Default::default()
        }
    }

    pub fn sync_policy(mut self, sync_policy: SyncPolicy) -> Self {
        self.sync_policy = sync_policy;
        self
    }
}

/// The WAL as seen by its collaborators (raft storage, LSM, watchdog).
///
/// `Manager` is the production implementation; tests can substitute a fake.
pub trait Wal: Send + Sync {
    fn append_records(&self, records: &[Record]) -> Result<Vec<EntryInfo>>;

    fn replay(&self, f: &mut dyn FnMut(EntryInfo, Bytes) -> Result<()>) -> Result<()>;

    fn remove_segment(&self, id: u32) -> Result<()>;

    fn sync(&self) -> Result<()>;

    fn close(&self) -> Result<()>;

    fn metrics(&self) -> WalMetrics;

    fn segment_metrics(&self, id: u32) -> Option<RecordCounts>;

    fn list_segments(&self) -> Vec<u32>;
}

impl Wal for Manager {
    fn append_records(&self, records: &[Record]) -> Result<Vec<EntryInfo>> {
        Manager::append_records(self, records)
    }

    fn replay(&self, f: &mut dyn FnMut(EntryInfo, Bytes) -> Result<()>) -> Result<()> {
        Manager::replay(self, |info, payload| f(info, payload))
    }

    fn remove_segment(&self, id: u32) -> Result<()> {
        Manager::remove_segment(self, id)
    }

    fn sync(&self) -> Result<()> {
        Manager::sync(self)
    }

    fn close(&self) -> Result<()> {
        Manager::close(self)
    }

    fn metrics(&self) -> WalMetrics {
        Manager::metrics(self)
    }

    fn segment_metrics(&self, id: u32) -> Option<RecordCounts> {
        Manager::segment_metrics(self, id)
    }

    fn list_segments(&self) -> Vec<u32> {
        Manager::list_segments(self)
    }
}
