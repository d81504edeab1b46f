//! In-memory doubles for the storage traits

use crate::archive::ChecksumArchive;
use crate::source_log::SourceLog;
use crate::storage::StorageError;
use attest_core::crypto::chunk_digest;
use attest_core::gaps::{self, Bounds, EpochAdjacency, RangeAdjacency};
use attest_core::types::*;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Source log that reports ranges unpopulated until `populate_after`
/// population checks have been made.
#[derive(Default)]
pub struct MemorySourceLog {
    pub records: Mutex<Vec<LogRecord>>,
    pub populate_after: AtomicUsize,
    /// Milliseconds each population check blocks its thread
    pub check_delay_ms: AtomicU64,
    pub population_checks: Mutex<Vec<EpochRange>>,
    pub checksum_calls: Mutex<Vec<EpochRange>>,
    pub closed: AtomicBool,
    pub fail_close: AtomicBool,
}

impl MemorySourceLog {
    pub fn with_epochs(epochs: impl IntoIterator<Item = Epoch>) -> Self {
        let log = Self::default();
        log.records.lock().extend(
            epochs
                .into_iter()
                .map(|e| LogRecord::new(format!("msg-{e}"), format!("ts-{e}"), e)),
        );
        log
    }

    fn present(&self) -> Vec<Epoch> {
        let mut epochs: Vec<Epoch> = self.records.lock().iter().map(|r| r.epoch).collect();
        epochs.sort_unstable();
        epochs
    }
}

impl SourceLog for MemorySourceLog {
    fn check_range_is_populated(&self, start: Epoch, stop: Epoch) -> Result<bool, StorageError> {
        let range = EpochRange::new(start, stop)?;
        let delay = self.check_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        let mut checks = self.population_checks.lock();
        checks.push(range);
        if checks.len() <= self.populate_after.load(Ordering::SeqCst) {
            return Ok(false);
        }
        drop(checks);

        let epochs = self.present();
        if !epochs.contains(&start) || !epochs.contains(&stop) {
            return Ok(false);
        }
        Ok(self.find_gaps(Some(start), Some(stop))?.is_empty())
    }

    fn checksum(&self, start: Epoch, stop: Epoch) -> Result<Digest, StorageError> {
        let range = EpochRange::new(start, stop)?;
        self.checksum_calls.lock().push(range);
        let records: Vec<LogRecord> = self
            .records
            .lock()
            .iter()
            .filter(|r| range.contains(r.epoch))
            .cloned()
            .collect();
        Ok(chunk_digest(&records)?)
    }

    fn find_gaps(
        &self,
        start: Option<Epoch>,
        stop: Option<Epoch>,
    ) -> Result<Vec<EpochRange>, StorageError> {
        let bounds = Bounds::new(start, stop)?;
        let epochs = self.present().into_iter().map(EpochRange::single);
        Ok(gaps::scan(epochs, bounds, &EpochAdjacency).gaps)
    }

    fn close(&self) -> Result<(), StorageError> {
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

/// Archive that records every call
pub struct MemoryArchive {
    pub entries: Mutex<BTreeMap<(Epoch, Epoch), Digest>>,
    pub publishes: Mutex<Vec<(EpochRange, Digest)>>,
    pub reads: AtomicUsize,
    pub fail_publish: AtomicBool,
    pub closed: AtomicBool,
    pub interval: u64,
}

impl MemoryArchive {
    pub fn new(interval: u64) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            publishes: Mutex::new(Vec::new()),
            reads: AtomicUsize::new(0),
            fail_publish: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            interval,
        }
    }
}

impl ChecksumArchive for MemoryArchive {
    fn publish_checksum(
        &self,
        start: Epoch,
        stop: Epoch,
        digest: Digest,
    ) -> Result<(), StorageError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(StorageError::Corrupt("publish refused".into()));
        }
        let range = EpochRange::new(start, stop)?;
        self.publishes.lock().push((range, digest));
        self.entries.lock().insert((start, stop), digest);
        Ok(())
    }

    fn checksum_exists(&self, digest: &Digest) -> Result<bool, StorageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.entries.lock().values().any(|d| d == digest))
    }

    fn get_checksum(&self, start: Epoch, stop: Epoch) -> Result<Option<Digest>, StorageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.entries.lock().get(&(start, stop)).copied())
    }

    fn find_next_checksum(&self) -> Result<Epoch, StorageError> {
        Ok(self
            .entries
            .lock()
            .keys()
            .map(|(_, stop)| stop + 1)
            .max()
            .unwrap_or(0))
    }

    fn find_gaps(
        &self,
        start: Option<Epoch>,
        stop: Option<Epoch>,
    ) -> Result<Vec<EpochRange>, StorageError> {
        let bounds = Bounds::new(start, stop)?;
        let ranges: Vec<EpochRange> = self
            .entries
            .lock()
            .keys()
            .map(|&(start, stop)| EpochRange { start, stop })
            .collect();
        Ok(gaps::scan(ranges, bounds, &RangeAdjacency).gaps)
    }

    fn interval(&self) -> u64 {
        self.interval
    }

    fn close(&self) -> Result<(), StorageError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
