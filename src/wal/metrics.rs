use crate::wal::record::RecordType;

/// Record counts per type, for one segment or summed across segments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordCounts {
    pub entries: u64,
    pub raft_entries: u64,
    pub raft_states: u64,
    pub raft_snapshots: u64,
}

impl RecordCounts {
    pub fn add(&mut self, record_type: RecordType) {
        match record_type {
            RecordType::Entry => self.entries += 1,
            RecordType::RaftEntry => self.raft_entries += 1,
            RecordType::RaftState => self.raft_states += 1,
            RecordType::RaftSnapshot => self.raft_snapshots += 1,
        }
    }

    pub fn merge(&mut self, other: &RecordCounts) {
        self.entries += other.entries;
        self.raft_entries += other.raft_entries;
        self.raft_states += other.raft_states;
        self.raft_snapshots += other.raft_snapshots;
    }

    /// Records of any raft type.
    pub fn raft_records(&self) -> u64 {
        self.raft_entries + self.raft_states + self.raft_snapshots
    }

    pub fn total(&self) -> u64 {
        self.entries + self.raft_records()
    }
}

/// Aggregate view of the WAL returned by `Manager::metrics`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalMetrics {
    pub active_segment: u32,
    pub segment_count: usize,
    pub record_counts: RecordCounts,
    /// Segments holding at least one raft-typed record.
    pub segments_with_raft_records: usize,
}
