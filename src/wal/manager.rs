use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::dir::sync_dir;
use crate::error::{Error, Result};
use crate::wal::WalOptions;
use crate::wal::metrics::{RecordCounts, WalMetrics};
use crate::wal::reader::SegmentReader;
use crate::wal::record::{EntryInfo, Record};
use crate::wal::writer::SegmentWriter;

const SEGMENT_SUFFIX: &str = ".wal";

/// `%05d.wal`
pub fn segment_filename(id: u32) -> String {
    format!("{id:05}{SEGMENT_SUFFIX}")
}

/// Parse the segment id out of a file name. `None` for anything else.
pub fn parse_segment_filename(name: &str) -> Option<u32> {
    let stem = name.strip_suffix(SEGMENT_SUFFIX)?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// Segment ids present in `dir`, ascending.
pub fn list_segment_ids(dir: &Path) -> Result<Vec<u32>> {
    let mut ids = Vec::new();
    for dir_entry in fs::read_dir(dir)? {
        let dir_entry = dir_entry?;
        if let Some(id) = dir_entry.file_name().to_str().and_then(parse_segment_filename) {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Owns the numbered segment files of one WAL directory.
///
/// Segment lifecycle: active (append target) → rotated (immutable, eligible
/// for replay/removal) → removed. Exactly one segment is active and it always
/// has the highest id. Ids only grow; a removed id is never reused.
///
/// One lock guards the file handle and the per-segment counters. Every public
/// method holds it for its whole duration, so records appended by one call
/// are contiguous in the log and metrics never show a half-applied append.
pub struct Manager {
    dir: PathBuf,
    options: WalOptions,
    inner: Mutex<Inner>,
}

struct Inner {
    /// `None` once closed.
    writer: Option<SegmentWriter>,
    active_id: u32,
    /// Every live segment (rotated and active) with its record counts.
    segments: BTreeMap<u32, RecordCounts>,
}

/// Where the current append call started writing to the active segment.
struct BatchMark {
    segment_id: u32,
    offset: u64,
    counts: RecordCounts,
}

impl Inner {
    fn writer_mut(&mut self) -> Result<&mut SegmentWriter> {
        self.writer.as_mut().ok_or(Error::Closed)
    }

    fn mark(&mut self) -> Result<BatchMark> {
        let writer = self.writer_mut()?;
        let (segment_id, offset) = (writer.id(), writer.offset());
        Ok(BatchMark {
            segment_id,
            offset,
            counts: self.segments.get(&segment_id).copied().unwrap_or_default(),
        })
    }
}

impl Manager {
    /// Open the WAL in `dir`, creating the directory and segment 1 if needed.
    ///
    /// Existing segments are scanned to rebuild per-segment metrics. A torn
    /// tail on the newest segment is cut off before appends resume. If the
    /// newest segment is corrupt, a fresh segment becomes active and the
    /// corruption is left for `replay` to report.
    pub fn open(dir: impl AsRef<Path>, options: WalOptions) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let ids = list_segment_ids(&dir)?;
        let mut segments = BTreeMap::new();

        let writer = match ids.last().copied() {
            None => {
                let writer =
                    SegmentWriter::create(&dir.join(segment_filename(1)), 1, options.sync_policy)?;
                sync_dir(&dir)?;
                segments.insert(1, RecordCounts::default());
                info!(dir = %dir.display(), "initialized fresh WAL");
                writer
            }
            Some(last) => {
                let mut last_scan = None;
                for &id in &ids {
                    let reader = SegmentReader::open(&dir.join(segment_filename(id)), id)?;
                    let scan = reader.scan();
                    if let Some(err) = &scan.corruption {
                        warn!(segment = id, valid_len = scan.valid_len, error = %err, "WAL segment is corrupt");
                    }
                    segments.insert(id, scan.counts);
                    if id == last {
                        last_scan = Some(scan);
                    }
                }

                let corrupt = last_scan.as_ref().is_some_and(|s| s.corruption.is_some());
                let valid_len = last_scan.as_ref().map_or(0, |s| s.valid_len);
                if corrupt {
                    let next = next_segment_id(last)?;
                    let writer = SegmentWriter::create(
                        &dir.join(segment_filename(next)),
                        next,
                        options.sync_policy,
                    )?;
                    sync_dir(&dir)?;
                    segments.insert(next, RecordCounts::default());
                    warn!(corrupt = last, active = next, "not appending behind a corrupt segment");
                    writer
                } else {
                    SegmentWriter::reopen(
                        &dir.join(segment_filename(last)),
                        last,
                        valid_len,
                        options.sync_policy,
                    )?
                }
            }
        };

        let active_id = writer.id();
        info!(
            dir = %dir.display(),
            active = active_id,
            segments = segments.len(),
            "opened WAL"
        );

        Ok(Manager {
            dir,
            options,
            inner: Mutex::new(Inner {
                writer: Some(writer),
                active_id,
                segments,
            }),
        })
    }

    /// Append records in call order, rotating whenever the next record would
    /// push a non-empty active segment past `segment_size`.
    ///
    /// The records are flushed to the OS before returning; they are durable
    /// only after `sync` (or a sync policy other than `Manual`).
    ///
    /// On error the active segment is cut back to where this call started
    /// writing to it, so later appends never land behind a torn record.
    /// Records already sealed into an earlier segment by a rotation during
    /// this call stay. If the cut itself fails the manager closes.
    pub fn append_records(&self, records: &[Record]) -> Result<Vec<EntryInfo>> {
        for record in records {
            record.validate()?;
        }

        let mut inner = self.inner.lock();
        let mut mark = inner.mark()?;
        match self.append_locked(&mut inner, records, &mut mark) {
            Ok(infos) => Ok(infos),
            Err(e) => {
                Self::roll_back(&mut inner, &mark);
                Err(e)
            }
        }
    }

    fn append_locked(
        &self,
        inner: &mut Inner,
        records: &[Record],
        mark: &mut BatchMark,
    ) -> Result<Vec<EntryInfo>> {
        let mut infos = Vec::with_capacity(records.len());

        for record in records {
            let writer = inner.writer_mut()?;
            let size = record.encoded_size() as u64;
            if writer.offset() > 0 && writer.offset() + size > self.options.segment_size {
                self.rotate_locked(inner)?;
                *mark = inner.mark()?;
            }

            let writer = inner.writer_mut()?;
            let offset = writer.append(record)?;
            let segment_id = writer.id();
            inner
                .segments
                .entry(segment_id)
                .or_default()
                .add(record.record_type);

            infos.push(EntryInfo {
                segment_id,
                offset,
                length: record.payload.len() as u32,
                record_type: record.record_type,
            });
        }

        inner.writer_mut()?.commit()?;
        Ok(infos)
    }

    fn roll_back(inner: &mut Inner, mark: &BatchMark) {
        let Some(writer) = inner.writer.as_mut() else {
            return;
        };
        if writer.id() != mark.segment_id {
            return;
        }
        match writer.truncate(mark.offset) {
            Ok(()) => {
                inner.segments.insert(mark.segment_id, mark.counts);
            }
            Err(e) => {
                error!(segment = mark.segment_id, error = %e, "WAL rollback failed, closing");
                inner.writer = None;
            }
        }
    }

    /// Seal the active segment and start `active + 1`. Returns the new id.
    pub fn rotate(&self) -> Result<u32> {
        let mut inner = self.inner.lock();
        self.rotate_locked(&mut inner)
    }

    fn rotate_locked(&self, inner: &mut Inner) -> Result<u32> {
        inner.writer_mut()?.sync()?;

        let old = inner.active_id;
        let next = next_segment_id(old)?;
        let writer = SegmentWriter::create(
            &self.dir.join(segment_filename(next)),
            next,
            self.options.sync_policy,
        )?;
        sync_dir(&self.dir)?;

        inner.writer = Some(writer);
        inner.active_id = next;
        inner.segments.insert(next, RecordCounts::default());

        info!(old_segment = old, new_segment = next, "rotated WAL segment");
        Ok(next)
    }

    /// Feed every record to `f` in log order: segments ascending, records in
    /// append order.
    ///
    /// A partial record at the end of a segment ends that segment quietly.
    /// A checksum failure or an error from `f` aborts the replay. `f` runs
    /// under the manager lock and must not call back into the manager.
    pub fn replay<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(EntryInfo, Bytes) -> Result<()>,
    {
        let mut inner = self.inner.lock();
        inner.writer_mut()?.flush()?;

        let mut replayed = 0u64;
        for &id in inner.segments.keys() {
            let reader = SegmentReader::open(&self.dir.join(segment_filename(id)), id)?;
            for item in reader.iter() {
                let (info, payload) = item?;
                f(info, payload)?;
                replayed += 1;
            }
        }

        debug!(records = replayed, "replayed WAL");
        Ok(())
    }

    /// Delete a rotated segment. The active segment is refused; a missing
    /// file is reported as the IO error it is.
    pub fn remove_segment(&self, id: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.writer.is_none() {
            return Err(Error::Closed);
        }
        if id == inner.active_id {
            return Err(Error::ActiveSegment(id));
        }

        let result = fs::remove_file(self.dir.join(segment_filename(id)));
        match &result {
            Ok(()) => {
                inner.segments.remove(&id);
                debug!(segment = id, "removed WAL segment");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                inner.segments.remove(&id);
            }
            Err(_) => {}
        }
        result?;
        Ok(())
    }

    /// Fsync the active segment.
    pub fn sync(&self) -> Result<()> {
        self.inner.lock().writer_mut()?.sync()
    }

    /// Sync and release the active segment. Later calls fail with
    /// `Error::Closed`; closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(mut writer) = inner.writer.take() {
            writer.sync()?;
            info!(active = inner.active_id, "closed WAL");
        }
        Ok(())
    }

    /// Live segment ids, ascending. The last one is the active segment.
    pub fn list_segments(&self) -> Vec<u32> {
        self.inner.lock().segments.keys().copied().collect()
    }

    pub fn active_segment(&self) -> u32 {
        self.inner.lock().active_id
    }

    pub fn metrics(&self) -> WalMetrics {
        let inner = self.inner.lock();
        let mut record_counts = RecordCounts::default();
        let mut segments_with_raft_records = 0;
        for counts in inner.segments.values() {
            record_counts.merge(counts);
            if counts.raft_records() > 0 {
                segments_with_raft_records += 1;
            }
        }

        WalMetrics {
            active_segment: inner.active_id,
            segment_count: inner.segments.len(),
            record_counts,
            segments_with_raft_records,
        }
    }

    /// Record counts of one segment, `None` if it is not live.
    pub fn segment_metrics(&self, id: u32) -> Option<RecordCounts> {
        self.inner.lock().segments.get(&id).copied()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn segment_path(&self, id: u32) -> PathBuf {
        self.dir.join(segment_filename(id))
    }
}

fn next_segment_id(id: u32) -> Result<u32> {
    id.checked_add(1)
        .ok_or_else(|| Error::Corruption("WAL segment id space exhausted".into()))
}
