use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::Result;
use crate::wal::SyncPolicy;
use crate::wal::record::Record;

/// Append handle for the single active segment.
///
/// Two layers of buffering:
///   BufWriter.flush()  → Rust buffer → OS page cache
///   file.sync_all()    → OS page cache → physical disk
///
/// `commit` flushes after every batch so readers of the file see every
/// appended record; only `sync` (or the sync policy) makes them durable.
pub struct SegmentWriter {
    id: u32,
    path: PathBuf,
    writer: BufWriter<File>,
    offset: u64,
    sync_policy: SyncPolicy,
    writes_since_sync: usize,
}

impl SegmentWriter {
    /// Create a fresh segment, truncating any file already at `path`.
    pub fn create(path: &Path, id: u32, sync_policy: SyncPolicy) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        Ok(SegmentWriter {
            id,
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            offset: 0,
            sync_policy,
            writes_since_sync: 0,
        })
    }

    /// Reopen an existing segment for append, cutting anything past
    /// `valid_len` (a torn tail left by a crash).
    pub fn reopen(path: &Path, id: u32, valid_len: u64, sync_policy: SyncPolicy) -> Result<Self> {
        let file = OpenOptions::new().append(true).open(path)?;
        let file_len = file.metadata()?.len();
        if file_len > valid_len {
            warn!(
                segment = id,
                file_len,
                valid_len,
                "truncating torn WAL tail"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        Ok(SegmentWriter {
            id,
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            offset: valid_len,
            sync_policy,
            writes_since_sync: 0,
        })
    }

    /// Buffer one record. Returns the offset it starts at.
    ///
    /// A failed append may leave part of the record in the file; the caller
    /// cuts it off with `truncate`.
    pub fn append(&mut self, record: &Record) -> Result<u64> {
        record.validate()?;
        let encoded = record.encode();
        let start = self.offset;

        self.writer.write_all(&encoded)?;
        self.offset += encoded.len() as u64;
        self.writes_since_sync += 1;

        Ok(start)
    }

    /// Flush buffered records to the OS and fsync if the policy asks for it.
    pub fn commit(&mut self) -> Result<()> {
        self.writer.flush()?;

        match self.sync_policy {
            SyncPolicy::EveryWrite => self.sync()?,
            SyncPolicy::EveryNWrites(n) => {
                if self.writes_since_sync >= n {
                    self.sync()?;
                }
            }
            SyncPolicy::Manual => {}
        }

        Ok(())
    }

    /// Push buffered bytes to the OS without fsync.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Drop everything past `offset`, buffered or already in the file, and
    /// resume appending there. `offset` must be a committed boundary: no
    /// record below it may still sit in the buffer.
    pub fn truncate(&mut self, offset: u64) -> Result<()> {
        debug_assert!(offset <= self.offset);
        let file = self.writer.get_ref().try_clone()?;
        // into_parts hands the buffer back instead of flushing it on drop.
        let (_, _discarded) = std::mem::replace(&mut self.writer, BufWriter::new(file)).into_parts();

        let file = self.writer.get_mut();
        file.set_len(offset)?;
        file.seek(SeekFrom::Start(offset))?;
        file.sync_all()?;

        warn!(segment = self.id, from = self.offset, to = offset, "rolled back WAL segment");
        self.offset = offset;
        Ok(())
    }

    /// Force fsync to disk. Ensures all buffered writes are durable.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.writes_since_sync = 0;
        Ok(())
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current file offset (bytes written so far).
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Records appended since the last fsync.
    pub fn writes_since_sync(&self) -> usize {
        self.writes_since_sync
    }
}
