//! Append-only journals backing the engine state
//!
//! Every component that owns durable state writes each accepted change to a
//! [`Journal`] before making it visible, and rebuilds itself by replaying the
//! journal when it is opened. Two backends are provided:
//! - [`MemoryJournal`]: process-local, for tests and ephemeral deployments
//! - [`FileJournal`]: JSON lines on disk, flushed with `sync_data` per record
//!   and rolled back when an append fails

use crate::{Error, Result, storage_error};
use serde::{Serialize, de::DeserializeOwned};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Durable, append-only record log
pub trait Journal<T>: Send + Sync {
    /// Durably append one record. On error nothing must be considered written.
    fn append(&self, record: &T) -> Result<()>;

    /// Read back every record in append order
    fn replay(&self) -> Result<Vec<T>>;
}

/// In-memory journal
///
/// Can be switched into an unavailable mode to exercise storage failures.
pub struct MemoryJournal<T> {
    records: Mutex<Vec<T>>,
    unavailable: AtomicBool,
}

impl<T> MemoryJournal<T> {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make subsequent appends and replays fail with `StorageUnavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(storage_error!("memory journal is unavailable"));
        }
        Ok(())
    }
}

impl<T> Default for MemoryJournal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync> Journal<T> for MemoryJournal<T> {
    fn append(&self, record: &T) -> Result<()> {
        self.check_available()?;
        self.records
            .lock()
            .map_err(|_| Error::internal("memory journal lock poisoned"))?
            .push(record.clone());
        Ok(())
    }

    fn replay(&self) -> Result<Vec<T>> {
        self.check_available()?;
        Ok(self
            .records
            .lock()
            .map_err(|_| Error::internal("memory journal lock poisoned"))?
            .clone())
    }
}

/// Backing file of a [`FileJournal`]
trait Segment: Send {
    fn size(&mut self) -> io::Result<u64>;

    /// Write all of `bytes` and flush them to stable storage
    fn write_durably(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Cut the segment back to `size` bytes, durably
    fn truncate(&mut self, size: u64) -> io::Result<()>;
}

impl Segment for File {
    fn size(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn write_durably(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_all(bytes)?;
        self.sync_data()
    }

    fn truncate(&mut self, size: u64) -> io::Result<()> {
        self.set_len(size)?;
        self.sync_data()
    }
}

/// JSON-lines journal on the local filesystem
///
/// A failed append is cut back off the file before the error is returned, so
/// a retry never lands behind a partial record. If that rollback fails too the
/// journal refuses every further append; reopening repairs the torn tail.
pub struct FileJournal {
    path: PathBuf,
    segment: Mutex<Box<dyn Segment>>,
    failed: AtomicBool,
}

impl FileJournal {
    /// Open (or create) `<dir>/<name>.jsonl`
    pub fn open(dir: impl AsRef<Path>, name: &str) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .map_err(|e| storage_error!("cannot create {}: {}", dir.display(), e))?;

        let path = dir.join(format!("{name}.jsonl"));
        Self::truncate_torn_tail(&path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)
            .map_err(|e| storage_error!("cannot open {}: {}", path.display(), e))?;

        tracing::debug!("📒 Journal opened: {}", path.display());

        Ok(Self::with_segment(path, file))
    }

    fn with_segment(path: PathBuf, segment: impl Segment + 'static) -> Self {
        Self {
            path,
            segment: Mutex::new(Box::new(segment)),
            failed: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether an append could not be rolled back and the journal went read-only
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Drop a trailing record without its newline, which is what a crash in
    /// the middle of an append leaves behind
    fn truncate_torn_tail(path: &Path) -> Result<()> {
        let contents = match std::fs::read(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(storage_error!("cannot read {}: {}", path.display(), e)),
        };
        if contents.is_empty() || contents.ends_with(b"\n") {
            return Ok(());
        }

        let keep = contents
            .iter()
            .rposition(|b| *b == b'\n')
            .map(|pos| pos + 1)
            .unwrap_or(0);
        tracing::warn!(
            "⚠️  Truncating torn record at end of {} ({} bytes)",
            path.display(),
            contents.len() - keep
        );
        OpenOptions::new()
            .write(true)
            .open(path)
            .and_then(|file| file.set_len(keep as u64))
            .map_err(|e| storage_error!("cannot repair {}: {}", path.display(), e))
    }
}

impl<T: Serialize + DeserializeOwned> Journal<T> for FileJournal {
    fn append(&self, record: &T) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut segment = self
            .segment
            .lock()
            .map_err(|_| Error::internal("file journal lock poisoned"))?;
        if self.is_failed() {
            return Err(storage_error!(
                "{} is read-only after a failed rollback",
                self.path.display()
            ));
        }

        let size = segment
            .size()
            .map_err(|e| storage_error!("cannot stat {}: {}", self.path.display(), e))?;
        let Err(e) = segment.write_durably(&line) else {
            return Ok(());
        };

        match segment.truncate(size) {
            Ok(()) => tracing::warn!(
                "⚠️  Append to {} failed and was rolled back: {}",
                self.path.display(),
                e
            ),
            Err(rollback) => {
                self.failed.store(true, Ordering::SeqCst);
                tracing::error!(
                    "🛑 Append to {} failed and could not be rolled back: {} ({})",
                    self.path.display(),
                    e,
                    rollback
                );
            }
        }
        Err(storage_error!("append to {} failed: {}", self.path.display(), e))
    }

    fn replay(&self) -> Result<Vec<T>> {
        // Hold the append lock so no record is half-written while reading
        let _guard = self
            .segment
            .lock()
            .map_err(|_| Error::internal("file journal lock poisoned"))?;

        let reader = BufReader::new(
            File::open(&self.path)
                .map_err(|e| storage_error!("cannot read {}: {}", self.path.display(), e))?,
        );

        let mut records = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line).map_err(|e| {
                Error::corrupted(format!("{} line {}: {}", self.path.display(), index + 1, e))
            })?;
            records.push(record);
        }

        Ok(records)
    }
}
