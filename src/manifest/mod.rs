//! Versioned metadata journal.
//!
//! Tracks LSM table sets, the WAL replay cursor, value-log segment status,
//! raft log pointers and region membership as a log of typed edits that is
//! folded into a `Version` at startup.

pub mod edit;
pub mod manager;
pub mod version;

use std::collections::BTreeMap;

use crate::error::Result;

pub use edit::{
    Edit, EditType, FileMeta, Peer, RaftLogPointer, RegionEdit, RegionEpoch, RegionMeta,
    RegionState, ValueLogId, ValueLogMeta,
};
pub use manager::Manager;
pub use version::Version;

/// Manifest configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManifestOptions {
    /// Rewrite once at least this many deletions accumulated. 0 disables
    /// automatic rewrites.
    pub rewrite_min_deletes: u64,
    /// ...and deletions reach this multiple of creations.
    pub rewrite_delete_ratio: f64,
}

impl Default for ManifestOptions {
    fn default() -> Self {
        ManifestOptions {
            rewrite_min_deletes: 4096,
            rewrite_delete_ratio: 1.0,
        }
    }
}

/// The manifest as seen by its collaborators (LSM, value log, raft storage,
/// watchdog).
///
/// `Manager` is the production implementation; tests can substitute a fake.
pub trait Manifest: Send + Sync {
    fn log_edits(&self, edits: &[Edit]) -> Result<()>;

    fn log_value_log_head(&self, bucket: u32, file_id: u32, offset: u64) -> Result<()>;

    fn log_value_log_delete(&self, bucket: u32, file_id: u32) -> Result<()>;

    fn log_value_log_update(&self, meta: ValueLogMeta) -> Result<()>;

    fn log_raft_pointer(&self, ptr: RaftLogPointer) -> Result<()>;

    fn log_raft_truncate(
        &self,
        group_id: u64,
        index: u64,
        term: u64,
        segment_index: u64,
        truncated_offset: u64,
    ) -> Result<()>;

    fn value_log_head(&self) -> BTreeMap<u32, ValueLogMeta>;

    fn value_log_status(&self) -> BTreeMap<ValueLogId, ValueLogMeta>;

    fn raft_pointer_snapshot(&self) -> BTreeMap<u64, RaftLogPointer>;

    fn raft_pointer(&self, group_id: u64) -> Option<RaftLogPointer>;

    fn current(&self) -> Version;

    fn close(&self) -> Result<()>;
}

impl Manifest for Manager {
    fn log_edits(&self, edits: &[Edit]) -> Result<()> {
        Manager::log_edits(self, edits)
    }

    fn log_value_log_head(&self, bucket: u32, file_id: u32, offset: u64) -> Result<()> {
        Manager::log_value_log_head(self, bucket, file_id, offset)
    }

    fn log_value_log_delete(&self, bucket: u32, file_id: u32) -> Result<()> {
        Manager::log_value_log_delete(self, bucket, file_id)
    }

    fn log_value_log_update(&self, meta: ValueLogMeta) -> Result<()> {
        Manager::log_value_log_update(self, meta)
    }

    fn log_raft_pointer(&self, ptr: RaftLogPointer) -> Result<()> {
        Manager::log_raft_pointer(self, ptr)
    }

    fn log_raft_truncate(
        &self,
        group_id: u64,
        index: u64,
        term: u64,
        segment_index: u64,
        truncated_offset: u64,
    ) -> Result<()> {
        Manager::log_raft_truncate(self, group_id, index, term, segment_index, truncated_offset)
    }

    fn value_log_head(&self) -> BTreeMap<u32, ValueLogMeta> {
        Manager::value_log_head(self)
    }

    fn value_log_status(&self) -> BTreeMap<ValueLogId, ValueLogMeta> {
        Manager::value_log_status(self)
    }

    fn raft_pointer_snapshot(&self) -> BTreeMap<u64, RaftLogPointer> {
        Manager::raft_pointer_snapshot(self)
    }

    fn raft_pointer(&self, group_id: u64) -> Option<RaftLogPointer> {
        Manager::raft_pointer(self, group_id)
    }

    fn current(&self) -> Version {
        Manager::current(self)
    }

    fn close(&self) -> Result<()> {
        Manager::close(self)
    }
}
