//! Read-only view over the message index

use crate::storage::{MessageIndex, StorageError};
use attest_core::crypto::ChunkHasher;
use attest_core::gaps::{self, Bounds, EpochAdjacency};
use attest_core::types::*;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, warn};

/// Population, gap, and digest queries over the message log
pub trait SourceLog: Send + Sync {
    /// True iff both boundary epochs exist and no epoch is missing in between.
    fn check_range_is_populated(&self, start: Epoch, stop: Epoch) -> Result<bool, StorageError>;

    /// Digest the records in `[start, stop]`.
    ///
    /// Callers confirm the range with [`SourceLog::check_range_is_populated`]
    /// first; an unpopulated range yields a digest nobody else will reproduce.
    fn checksum(&self, start: Epoch, stop: Epoch) -> Result<Digest, StorageError>;

    /// Missing epoch runs between present epochs. `None` leaves a side unbounded.
    fn find_gaps(
        &self,
        start: Option<Epoch>,
        stop: Option<Epoch>,
    ) -> Result<Vec<EpochRange>, StorageError>;

    /// Release scratch resources
    fn close(&self) -> Result<(), StorageError>;
}

/// [`SourceLog`] over a sled [`MessageIndex`]
pub struct MsgIndexLog {
    index: Arc<MessageIndex>,
    /// Scratch directory for chunk copies; `None` once closed
    scratch: Mutex<Option<TempDir>>,
}

impl MsgIndexLog {
    /// Open the message index in `dir`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let index = Arc::new(MessageIndex::open(dir)?);
        Self::new(index)
    }

    /// Wrap an already open index
    pub fn new(index: Arc<MessageIndex>) -> Result<Self, StorageError> {
        let scratch = tempfile::Builder::new().prefix("msgindex-scratch").tempdir()?;
        Ok(Self {
            index,
            scratch: Mutex::new(Some(scratch)),
        })
    }

    /// The underlying index, for in-process ingestion
    pub fn index(&self) -> &Arc<MessageIndex> {
        &self.index
    }

    fn scratch_path(&self, range: EpochRange) -> Result<PathBuf, StorageError> {
        let guard = self.scratch.lock();
        let dir = guard.as_ref().ok_or(StorageError::Closed)?;
        Ok(dir
            .path()
            .join(format!("chunk-{}-{}", range.start, range.stop)))
    }
}

/// A chunk copy that is deleted when dropped
struct ScratchChunk {
    path: PathBuf,
    db: Option<sled::Db>,
}

impl ScratchChunk {
    fn create(path: PathBuf) -> Result<Self, StorageError> {
        let mut chunk = Self { path, db: None };
        chunk.db = Some(sled::open(&chunk.path)?);
        Ok(chunk)
    }

    fn tree(&self) -> Result<sled::Tree, StorageError> {
        let db = self.db.as_ref().ok_or(StorageError::Closed)?;
        Ok(db.open_tree("messages")?)
    }
}

impl Drop for ScratchChunk {
    fn drop(&mut self) {
        // the db must be released before its files are removed
        drop(self.db.take());
        if self.path.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                warn!("Failed to remove scratch chunk {}: {}", self.path.display(), e);
            }
        }
    }
}

impl SourceLog for MsgIndexLog {
    fn check_range_is_populated(&self, start: Epoch, stop: Epoch) -> Result<bool, StorageError> {
        let range = EpochRange::new(start, stop)?;

        if !self.index.has_epoch(range.start)? || !self.index.has_epoch(range.stop)? {
            return Ok(false);
        }

        Ok(self.find_gaps(Some(range.start), Some(range.stop))?.is_empty())
    }

    fn checksum(&self, start: Epoch, stop: Epoch) -> Result<Digest, StorageError> {
        let range = EpochRange::new(start, stop)?;
        let chunk = ScratchChunk::create(self.scratch_path(range)?)?;
        let tree = chunk.tree()?;

        // copy: the live index may keep growing while we hash
        for record in self.index.records_in(range) {
            let record = record?;
            tree.insert(record.cid.as_bytes(), postcard::to_allocvec(&record)?)?;
        }

        // sled iterates in key order, which is cid order
        let mut hasher = ChunkHasher::new();
        for entry in tree.iter() {
            let (_, bytes) = entry?;
            let record: LogRecord = postcard::from_bytes(&bytes)?;
            hasher.update(&record)?;
        }

        debug!(
            start = range.start,
            stop = range.stop,
            records = hasher.record_count(),
            "Hashed chunk"
        );
        Ok(hasher.finalize())
    }

    fn find_gaps(
        &self,
        start: Option<Epoch>,
        stop: Option<Epoch>,
    ) -> Result<Vec<EpochRange>, StorageError> {
        let bounds = Bounds::new(start, stop)?;
        let mut failure = None;
        let epochs = self
            .index
            .distinct_epochs(bounds)
            .map_while(|epoch| match epoch {
                Ok(epoch) => Some(EpochRange::single(epoch)),
                Err(e) => {
                    failure = Some(e);
                    None
                }
            });
        let report = gaps::scan(epochs, bounds, &EpochAdjacency);
        match failure {
            Some(e) => Err(e),
            None => Ok(report.gaps),
        }
    }

    fn close(&self) -> Result<(), StorageError> {
        let scratch = self.scratch.lock().take();
        let flushed = self.index.flush();
        if let Some(dir) = scratch {
            dir.close()?;
        }
        flushed
    }
}
