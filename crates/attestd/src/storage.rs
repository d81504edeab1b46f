//! Persistent storage using sled

use attest_core::gaps::Bounds;
use attest_core::types::*;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional};
use std::path::Path;
use thiserror::Error;

/// File name of the message index database inside its directory
pub const MSG_INDEX_DB: &str = "msgindex.sled";

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] postcard::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid data: {0}")]
    Core(#[from] attest_core::Error),
    #[error("Corrupt entry: {0}")]
    Corrupt(String),
    #[error("Storage closed")]
    Closed,
}

impl From<TransactionError<()>> for StorageError {
    fn from(err: TransactionError<()>) -> Self {
        match err {
            TransactionError::Storage(e) => StorageError::Sled(e),
            TransactionError::Abort(()) => StorageError::Corrupt("transaction aborted".into()),
        }
    }
}

/// Big-endian encoding keeps sled's lexicographic order equal to numeric order.
pub(crate) fn epoch_key(epoch: Epoch) -> [u8; 8] {
    epoch.to_be_bytes()
}

pub(crate) fn decode_epoch(bytes: &[u8]) -> Result<Epoch, StorageError> {
    let arr: [u8; 8] = bytes
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| StorageError::Corrupt(format!("short epoch key ({} bytes)", bytes.len())))?;
    Ok(u64::from_be_bytes(arr))
}

/// `a_be ++ b_be`
pub(crate) fn pair_key(a: Epoch, b: Epoch) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&a.to_be_bytes());
    key[8..].copy_from_slice(&b.to_be_bytes());
    key
}

pub(crate) fn decode_pair(bytes: &[u8]) -> Result<(Epoch, Epoch), StorageError> {
    if bytes.len() != 16 {
        return Err(StorageError::Corrupt(format!(
            "range key must be 16 bytes, got {}",
            bytes.len()
        )));
    }
    Ok((decode_epoch(&bytes[..8])?, decode_epoch(&bytes[8..])?))
}

fn epoch_index_key(epoch: Epoch, cid: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + cid.len());
    key.extend_from_slice(&epoch_key(epoch));
    key.extend_from_slice(cid.as_bytes());
    key
}

/// Message index backed by sled
pub struct MessageIndex {
    db: Db,
    /// Message tree: cid -> LogRecord
    messages: sled::Tree,
    /// Epoch index: epoch_be ++ cid -> cid
    epochs: sled::Tree,
}

impl MessageIndex {
    /// Open the message index inside `dir`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = sled::open(dir.as_ref().join(MSG_INDEX_DB))?;
        let messages = db.open_tree("messages")?;
        let epochs = db.open_tree("epochs")?;

        Ok(Self {
            db,
            messages,
            epochs,
        })
    }

    /// Store a record, replacing any record with the same cid
    pub fn put_record(&self, record: &LogRecord) -> Result<(), StorageError> {
        let value = postcard::to_allocvec(record)?;
        let new_index = epoch_index_key(record.epoch, &record.cid);
        let cid = record.cid.as_bytes();

        (&self.messages, &self.epochs).transaction(|(messages, epochs)| {
            if let Some(old) = messages.insert(cid, value.as_slice())? {
                let old: LogRecord = postcard::from_bytes(&old)
                    .map_err(|_| ConflictableTransactionError::Abort(()))?;
                if old.epoch != record.epoch {
                    epochs.remove(epoch_index_key(old.epoch, &old.cid))?;
                }
            }
            epochs.insert(new_index.as_slice(), cid)?;
            Ok(())
        })?;
        Ok(())
    }

    /// Get a record by cid
    pub fn get_record(&self, cid: &str) -> Result<Option<LogRecord>, StorageError> {
        match self.messages.get(cid.as_bytes())? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Check whether any record sits at `epoch`
    pub fn has_epoch(&self, epoch: Epoch) -> Result<bool, StorageError> {
        match self.epochs.scan_prefix(epoch_key(epoch)).next() {
            Some(entry) => {
                entry?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Each distinct epoch within `bounds`, ascending.
    ///
    /// Seeks past every epoch it yields, so cost follows the number of epochs,
    /// not the number of records.
    pub fn distinct_epochs(&self, bounds: Bounds) -> DistinctEpochs<'_> {
        DistinctEpochs {
            tree: &self.epochs,
            next_from: Some(bounds.lower.unwrap_or(0)),
            upper: bounds.upper,
        }
    }

    /// Records whose epoch lies in `range`, in epoch order
    pub fn records_in(
        &self,
        range: EpochRange,
    ) -> impl Iterator<Item = Result<LogRecord, StorageError>> + '_ {
        let stop = range.stop;
        self.epochs
            .range(epoch_key(range.start)..)
            .map(|entry| -> Result<(Epoch, sled::IVec), StorageError> {
                let (key, cid) = entry?;
                Ok((decode_epoch(&key)?, cid))
            })
            .take_while(move |entry| match entry {
                Ok((epoch, _)) => *epoch <= stop,
                Err(_) => true,
            })
            .map(move |entry| -> Result<LogRecord, StorageError> {
                let (_, cid) = entry?;
                let bytes = self.messages.get(&cid)?.ok_or_else(|| {
                    StorageError::Corrupt(format!(
                        "epoch index points at missing message {}",
                        String::from_utf8_lossy(&cid)
                    ))
                })?;
                Ok(postcard::from_bytes(&bytes)?)
            })
    }

    /// Count records
    pub fn record_count(&self) -> usize {
        self.messages.len()
    }

    /// Flush all pending writes
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

/// Iterator returned by [`MessageIndex::distinct_epochs`]
pub struct DistinctEpochs<'a> {
    tree: &'a sled::Tree,
    next_from: Option<Epoch>,
    upper: Option<Epoch>,
}

impl Iterator for DistinctEpochs<'_> {
    type Item = Result<Epoch, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        let from = self.next_from.take()?;
        let (key, _) = match self.tree.range(epoch_key(from)..).next()? {
            Ok(entry) => entry,
            Err(e) => return Some(Err(e.into())),
        };
        let epoch = match decode_epoch(&key) {
            Ok(epoch) => epoch,
            Err(e) => return Some(Err(e)),
        };
        if self.upper.is_some_and(|upper| epoch > upper) {
            return None;
        }
        self.next_from = epoch.checked_add(1);
        Some(Ok(epoch))
    }
}
