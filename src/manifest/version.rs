use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::manifest::edit::{
    Edit, FileMeta, RaftLogPointer, RegionEdit, RegionMeta, ValueLogId, ValueLogMeta,
};

/// Point-in-time aggregate of everything the manifest tracks.
///
/// Built by folding edits in log order from `Version::default()`; replaying
/// the same edits always yields an equal `Version`. Ordered maps keep
/// iteration (and therefore manifest rewrites) deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Version {
    /// Live tables per level, in the order they were added.
    pub levels: BTreeMap<u32, Vec<FileMeta>>,
    /// WAL replay cursor.
    pub log_segment: u32,
    pub log_offset: u64,
    pub value_logs: BTreeMap<ValueLogId, ValueLogMeta>,
    /// Current write head per bucket.
    pub value_log_head: BTreeMap<u32, ValueLogMeta>,
    pub raft_pointers: BTreeMap<u64, RaftLogPointer>,
    pub regions: BTreeMap<u64, RegionMeta>,
}

impl Version {
    /// Apply one edit.
    ///
    /// Adding a table id already present at its level, deleting an unknown
    /// table, or upserting a region without an id is a manifest-corruption
    /// error and leaves `self` unchanged.
    pub fn apply(&mut self, edit: &Edit) -> Result<()> {
        self.check(edit)?;

        match edit {
            Edit::AddFile(file) => {
                self.levels.entry(file.level).or_default().push(file.clone());
            }
            Edit::DeleteFile(file) => {
                if let Some(files) = self.levels.get_mut(&file.level) {
                    files.retain(|f| f.file_id != file.file_id);
                    if files.is_empty() {
                        self.levels.remove(&file.level);
                    }
                }
            }
            Edit::LogPointer { segment, offset } => {
                self.log_segment = *segment;
                self.log_offset = *offset;
            }
            Edit::ValueLogHead(meta) => {
                let head = ValueLogMeta {
                    valid: true,
                    ..*meta
                };
                self.value_logs.insert(head.id(), head);
                self.value_log_head.insert(head.bucket, head);
            }
            Edit::ValueLogDelete(meta) => {
                let entry = self.value_logs.entry(meta.id()).or_insert(*meta);
                entry.valid = false;
                entry.offset = 0;
                if self.head_points_at(meta) {
                    self.value_log_head.remove(&meta.bucket);
                }
            }
            Edit::ValueLogUpdate(meta) => {
                self.value_logs.insert(meta.id(), *meta);
                if self.head_points_at(meta) {
                    if meta.valid {
                        self.value_log_head.insert(meta.bucket, *meta);
                    } else {
                        self.value_log_head.remove(&meta.bucket);
                    }
                }
            }
            Edit::RaftPointer(ptr) => {
                self.raft_pointers.insert(ptr.group_id, *ptr);
            }
            Edit::Region(RegionEdit { meta, delete }) => {
                if *delete {
                    self.regions.remove(&meta.id);
                } else {
                    self.regions.insert(meta.id, meta.clone());
                }
            }
        }
        Ok(())
    }

    /// Whether `apply(edit)` would succeed, without changing anything.
    pub fn check(&self, edit: &Edit) -> Result<()> {
        match edit {
            Edit::AddFile(file) => {
                if self.file(file.level, file.file_id).is_some() {
                    return Err(Error::Corruption(format!(
                        "file {} already present at level {}",
                        file.file_id, file.level
                    )));
                }
            }
            Edit::DeleteFile(file) => {
                if self.file(file.level, file.file_id).is_none() {
                    return Err(Error::Corruption(format!(
                        "file {} not found at level {}",
                        file.file_id, file.level
                    )));
                }
            }
            Edit::Region(RegionEdit { meta, delete: false }) if meta.id == 0 => {
                return Err(Error::Corruption("region edit without an id".into()));
            }
            _ => {}
        }
        Ok(())
    }

    fn head_points_at(&self, meta: &ValueLogMeta) -> bool {
        self.value_log_head
            .get(&meta.bucket)
            .is_some_and(|head| head.file_id == meta.file_id)
    }

    pub fn file(&self, level: u32, file_id: u64) -> Option<&FileMeta> {
        self.levels
            .get(&level)
            .and_then(|files| files.iter().find(|f| f.file_id == file_id))
    }

    /// Tables at `level`, empty if none.
    pub fn files(&self, level: u32) -> &[FileMeta] {
        self.levels.get(&level).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn file_count(&self) -> usize {
        self.levels.values().map(Vec::len).sum()
    }

    /// The shortest edit sequence that rebuilds this version from empty.
    ///
    /// Value-log entries go first as verbatim updates, then the heads, which
    /// always equal their entry.
    pub fn snapshot_edits(&self) -> Vec<Edit> {
        let mut edits = Vec::new();
        for files in self.levels.values() {
            edits.extend(files.iter().cloned().map(Edit::AddFile));
        }
        edits.push(Edit::LogPointer {
            segment: self.log_segment,
            offset: self.log_offset,
        });
        edits.extend(self.value_logs.values().copied().map(Edit::ValueLogUpdate));
        edits.extend(self.value_log_head.values().copied().map(Edit::ValueLogHead));
        edits.extend(self.raft_pointers.values().copied().map(Edit::RaftPointer));
        edits.extend(self.regions.values().map(|meta| {
            Edit::Region(RegionEdit {
                meta: meta.clone(),
                delete: false,
            })
        }));
        edits
    }
}
