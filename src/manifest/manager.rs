use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::dir::sync_dir;
use crate::error::{Error, Result};
use crate::manifest::ManifestOptions;
use crate::manifest::edit::{
    Edit, FileMeta, RaftLogPointer, RegionEdit, RegionMeta, ValueLogId, ValueLogMeta,
};
use crate::manifest::version::Version;

pub const CURRENT_FILE: &str = "CURRENT";
const MANIFEST_PREFIX: &str = "MANIFEST-";

/// `MANIFEST-%06d`
pub fn manifest_filename(number: u64) -> String {
    format!("{MANIFEST_PREFIX}{number:06}")
}

pub fn parse_manifest_filename(name: &str) -> Option<u64> {
    let digits = name.strip_prefix(MANIFEST_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Result of folding a manifest log from empty.
#[derive(Debug, Default)]
pub struct ReplayOutcome {
    pub version: Version,
    /// Length of the prefix made of complete edits.
    pub valid_len: u64,
    pub edits: u64,
    pub creations: u64,
    pub deletions: u64,
}

/// Fold every complete edit in `data` into a fresh `Version`.
///
/// A partial edit at the end is a torn write and ends the replay; bad magic,
/// a checksum mismatch or an edit that does not apply fails it.
pub fn replay_edits(data: &[u8]) -> Result<ReplayOutcome> {
    let mut outcome = ReplayOutcome::default();
    let mut offset = 0usize;

    while offset < data.len() {
        match Edit::decode(&data[offset..]) {
            Ok((edit, consumed)) => {
                outcome.version.apply(&edit)?;
                let (creations, deletions) = edit_weight(&edit);
                outcome.creations += creations;
                outcome.deletions += deletions;
                outcome.edits += 1;
                offset += consumed;
            }
            Err(Error::Truncated(reason)) => {
                debug!(offset, %reason, "manifest ends in a partial edit");
                break;
            }
            Err(e) => return Err(e),
        }
    }

    outcome.valid_len = offset as u64;
    Ok(outcome)
}

/// How an edit moves the (creations, deletions) counters that drive rewrites.
fn edit_weight(edit: &Edit) -> (u64, u64) {
    match edit {
        Edit::AddFile(_) | Edit::ValueLogHead(_) => (1, 0),
        Edit::Region(RegionEdit { delete: false, .. }) => (1, 0),
        Edit::DeleteFile(_) | Edit::ValueLogDelete(_) => (0, 1),
        Edit::Region(RegionEdit { delete: true, .. }) => (0, 1),
        _ => (0, 0),
    }
}

/// Owns `CURRENT`, the active manifest log and the in-memory `Version`.
///
/// Every edit is appended and fsync'd before it is applied, all under one
/// lock, so `current()` never shows an edit that did not reach disk.
pub struct Manager {
    dir: PathBuf,
    options: ManifestOptions,
    inner: Mutex<Inner>,
}

struct Inner {
    /// `None` once closed.
    file: Option<File>,
    manifest_name: String,
    /// Bytes of complete edits in the manifest file.
    file_len: u64,
    version: Version,
    creations: u64,
    deletions: u64,
}

impl Manager {
    /// Open the manifest in `dir`.
    ///
    /// With a `CURRENT` file, the manifest it names is replayed; a torn tail
    /// is cut off before appends resume. Without one, `MANIFEST-000001` and
    /// `CURRENT` are created and the version starts empty.
    pub fn open(dir: impl AsRef<Path>, options: ManifestOptions) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let current_path = dir.join(CURRENT_FILE);
        let inner = if current_path.exists() {
            let manifest_name = fs::read_to_string(&current_path)?.trim().to_string();
            if parse_manifest_filename(&manifest_name).is_none() {
                return Err(Error::Corruption(format!(
                    "CURRENT names {manifest_name:?}, not a manifest"
                )));
            }

            let path = dir.join(&manifest_name);
            let data = fs::read(&path)?;
            let outcome = replay_edits(&data)?;

            let file = OpenOptions::new().append(true).open(&path)?;
            if outcome.valid_len < data.len() as u64 {
                warn!(
                    manifest = %manifest_name,
                    file_len = data.len(),
                    valid_len = outcome.valid_len,
                    "truncating torn manifest tail"
                );
                file.set_len(outcome.valid_len)?;
                file.sync_all()?;
            }

            info!(
                manifest = %manifest_name,
                edits = outcome.edits,
                files = outcome.version.file_count(),
                "replayed manifest"
            );

            Inner {
                file: Some(file),
                manifest_name,
                file_len: outcome.valid_len,
                version: outcome.version,
                creations: outcome.creations,
                deletions: outcome.deletions,
            }
        } else {
            let manifest_name = manifest_filename(1);
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(dir.join(&manifest_name))?;
            file.sync_all()?;
            write_current(&dir, &manifest_name)?;
            info!(dir = %dir.display(), manifest = %manifest_name, "created manifest");

            Inner {
                file: Some(file),
                manifest_name,
                file_len: 0,
                version: Version::default(),
                creations: 0,
                deletions: 0,
            }
        };

        Ok(Manager {
            dir,
            options,
            inner: Mutex::new(inner),
        })
    }

    /// Append, fsync and apply one edit.
    pub fn log_edit(&self, edit: Edit) -> Result<()> {
        self.log_edits(std::slice::from_ref(&edit))
    }

    /// Append, fsync and apply a batch of edits, all or nothing.
    ///
    /// The batch is validated against the current version before anything is
    /// written, so an edit that would not apply never reaches disk.
    pub fn log_edits(&self, edits: &[Edit]) -> Result<()> {
        let mut inner = self.inner.lock();
        self.log_locked(&mut inner, edits)
    }

    fn log_locked(&self, inner: &mut Inner, edits: &[Edit]) -> Result<()> {
        if inner.file.is_none() {
            return Err(Error::Closed);
        }
        if edits.is_empty() {
            return Ok(());
        }

        // A single edit is checked in place; a batch may depend on its own
        // earlier edits, so it is folded into a scratch copy.
        let staged = if let [edit] = edits {
            inner.version.check(edit)?;
            None
        } else {
            let mut scratch = inner.version.clone();
            for edit in edits {
                scratch.apply(edit)?;
            }
            Some(scratch)
        };

        let mut buf = Vec::new();
        for edit in edits {
            edit.encode_into(&mut buf);
        }
        self.append_locked(inner, &buf)?;

        match staged {
            Some(version) => inner.version = version,
            None => {
                for edit in edits {
                    inner.version.apply(edit)?;
                }
            }
        }
        for edit in edits {
            let (creations, deletions) = edit_weight(edit);
            inner.creations += creations;
            inner.deletions += deletions;
        }

        // The edits are durable at this point. A failed rewrite leaves the
        // counters untouched so the next edit tries again.
        if self.should_rewrite(inner) {
            if let Err(e) = self.rewrite_locked(inner) {
                warn!(error = %e, manifest = %inner.manifest_name, "manifest rewrite failed, will retry");
            }
        }
        Ok(())
    }

    /// Write and fsync `buf`. On failure the file is cut back to its last
    /// complete edit so later appends do not land behind garbage.
    fn append_locked(&self, inner: &mut Inner, buf: &[u8]) -> Result<()> {
        let file_len = inner.file_len;
        let file = inner.file.as_mut().ok_or(Error::Closed)?;

        let written = match file.write_all(buf) {
            Ok(()) => file.sync_all(),
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!(error = %e, "manifest append failed, rolling back");
            if let Err(rollback) = file.set_len(file_len) {
                warn!(error = %rollback, "manifest rollback failed");
            }
            return Err(e.into());
        }

        inner.file_len += buf.len() as u64;
        Ok(())
    }

    fn should_rewrite(&self, inner: &Inner) -> bool {
        let min = self.options.rewrite_min_deletes;
        min > 0
            && inner.deletions >= min
            && inner.deletions as f64 >= self.options.rewrite_delete_ratio * inner.creations as f64
    }

    /// Replace the manifest with the shortest log that rebuilds the current
    /// version.
    pub fn rewrite(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.file.is_none() {
            return Err(Error::Closed);
        }
        self.rewrite_locked(&mut inner)
    }

    fn rewrite_locked(&self, inner: &mut Inner) -> Result<()> {
        let edits = inner.version.snapshot_edits();
        let mut buf = Vec::new();
        let mut creations = 0;
        for edit in &edits {
            edit.encode_into(&mut buf);
            creations += edit_weight(edit).0;
        }

        let path = self.dir.join(&inner.manifest_name);
        let tmp = self.dir.join(format!("{}.rewrite", inner.manifest_name));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&buf)?;
            file.sync_all()?;
        }
        if let Err(e) = fs::rename(&tmp, &path) {
            if let Err(cleanup) = fs::remove_file(&tmp) {
                warn!(error = %cleanup, "failed to remove manifest rewrite temp file");
            }
            return Err(e.into());
        }

        // The old handle now points at an unlinked file. Nothing may be
        // appended through it, so the manager closes if the reopen fails.
        match OpenOptions::new().append(true).open(&path) {
            Ok(file) => inner.file = Some(file),
            Err(e) => {
                inner.file = None;
                error!(error = %e, manifest = %inner.manifest_name, "cannot reopen rewritten manifest, closing");
                return Err(e.into());
            }
        }
        let old_len = inner.file_len;
        let deletions = inner.deletions;
        inner.file_len = buf.len() as u64;
        inner.creations = creations;
        inner.deletions = 0;
        sync_dir(&self.dir)?;

        info!(
            manifest = %inner.manifest_name,
            old_len,
            new_len = buf.len(),
            deletions,
            "rewrote manifest"
        );
        Ok(())
    }

    /// Deep copy of the current version.
    pub fn current(&self) -> Version {
        self.inner.lock().version.clone()
    }

    pub fn log_file_add(&self, file: FileMeta) -> Result<()> {
        self.log_edit(Edit::AddFile(file))
    }

    pub fn log_file_delete(&self, file: FileMeta) -> Result<()> {
        self.log_edit(Edit::DeleteFile(file))
    }

    /// Move the WAL replay cursor.
    pub fn log_pointer(&self, segment: u32, offset: u64) -> Result<()> {
        self.log_edit(Edit::LogPointer { segment, offset })
    }

    pub fn log_value_log_head(&self, bucket: u32, file_id: u32, offset: u64) -> Result<()> {
        self.log_edit(Edit::ValueLogHead(ValueLogMeta {
            bucket,
            file_id,
            offset,
            valid: true,
        }))
    }

    pub fn log_value_log_delete(&self, bucket: u32, file_id: u32) -> Result<()> {
        self.log_edit(Edit::ValueLogDelete(ValueLogMeta {
            bucket,
            file_id,
            offset: 0,
            valid: false,
        }))
    }

    pub fn log_value_log_update(&self, meta: ValueLogMeta) -> Result<()> {
        self.log_edit(Edit::ValueLogUpdate(meta))
    }

    pub fn log_raft_pointer(&self, ptr: RaftLogPointer) -> Result<()> {
        self.log_edit(Edit::RaftPointer(ptr))
    }

    /// Record a raft log truncation on the group's existing pointer.
    /// An unknown group is a manifest-corruption error.
    pub fn log_raft_truncate(
        &self,
        group_id: u64,
        index: u64,
        term: u64,
        segment_index: u64,
        truncated_offset: u64,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let mut ptr = *inner
            .version
            .raft_pointers
            .get(&group_id)
            .ok_or_else(|| Error::Corruption(format!("no raft pointer for group {group_id}")))?;

        ptr.truncated_index = index;
        ptr.truncated_term = term;
        ptr.segment_index = segment_index;
        ptr.truncated_offset = truncated_offset;
        self.log_locked(&mut inner, &[Edit::RaftPointer(ptr)])
    }

    pub fn log_region_update(&self, meta: RegionMeta) -> Result<()> {
        self.log_edit(Edit::Region(RegionEdit {
            meta,
            delete: false,
        }))
    }

    pub fn log_region_delete(&self, region_id: u64) -> Result<()> {
        self.log_edit(Edit::Region(RegionEdit {
            meta: RegionMeta {
                id: region_id,
                ..Default::default()
            },
            delete: true,
        }))
    }

    pub fn value_log_head(&self) -> BTreeMap<u32, ValueLogMeta> {
        self.inner.lock().version.value_log_head.clone()
    }

    pub fn value_log_status(&self) -> BTreeMap<ValueLogId, ValueLogMeta> {
        self.inner.lock().version.value_logs.clone()
    }

    pub fn raft_pointer_snapshot(&self) -> BTreeMap<u64, RaftLogPointer> {
        self.inner.lock().version.raft_pointers.clone()
    }

    pub fn raft_pointer(&self, group_id: u64) -> Option<RaftLogPointer> {
        self.inner.lock().version.raft_pointers.get(&group_id).copied()
    }

    /// Sync and release the manifest file. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(file) = inner.file.take() {
            file.sync_all()?;
            info!(manifest = %inner.manifest_name, "closed manifest");
        }
        Ok(())
    }

    /// Name of the manifest file `CURRENT` points at.
    pub fn manifest_name(&self) -> String {
        self.inner.lock().manifest_name.clone()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Point `CURRENT` at `manifest_name`: temp file, fsync, rename, dir fsync.
fn write_current(dir: &Path, manifest_name: &str) -> Result<()> {
    let tmp = dir.join(format!("{CURRENT_FILE}.tmp"));
    {
        let mut file = File::create(&tmp)?;
        file.write_all(manifest_name.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
    }
    fs::rename(&tmp, dir.join(CURRENT_FILE))?;
    sync_dir(dir)
}
