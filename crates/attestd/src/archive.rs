//! Checksum archive: published (range, digest) entries

use crate::storage::{decode_pair, pair_key, StorageError};
use attest_core::gaps::{self, Bounds, RangeAdjacency};
use attest_core::types::*;
use sled::{Db, Transactional};
use std::path::Path;
use tracing::warn;

/// File name of the checksum database inside its directory
pub const CHECKSUM_DB: &str = "checksums.sled";

/// Store of published chunk digests
pub trait ChecksumArchive: Send + Sync {
    /// Upsert the digest for `[start, stop]`; last write wins.
    fn publish_checksum(&self, start: Epoch, stop: Epoch, digest: Digest)
        -> Result<(), StorageError>;

    /// Whether any range is currently published with `digest`
    fn checksum_exists(&self, digest: &Digest) -> Result<bool, StorageError>;

    /// Digest published for exactly `[start, stop]`, if any
    fn get_checksum(&self, start: Epoch, stop: Epoch) -> Result<Option<Digest>, StorageError>;

    /// `max(stop) + 1`, or 0 when nothing is published
    fn find_next_checksum(&self) -> Result<Epoch, StorageError>;

    /// Epochs not covered by any published range. `None` leaves a side unbounded.
    fn find_gaps(
        &self,
        start: Option<Epoch>,
        stop: Option<Epoch>,
    ) -> Result<Vec<EpochRange>, StorageError>;

    /// Chunk size in epochs
    fn interval(&self) -> u64;

    fn close(&self) -> Result<(), StorageError>;
}

/// [`ChecksumArchive`] backed by sled
pub struct SledArchive {
    db: Db,
    /// start_be ++ stop_be -> digest
    checksums: sled::Tree,
    /// digest ++ start_be ++ stop_be -> ()
    digests: sled::Tree,
    /// stop_be ++ start_be -> ()
    stops: sled::Tree,
    interval: u64,
}

impl SledArchive {
    /// Open (or create) the archive inside `dir`.
    ///
    /// Also returns whether the archive existed before this call. An
    /// `interval` of 0 selects [`DEFAULT_CHUNK_SIZE`].
    pub fn open(dir: impl AsRef<Path>, interval: u64) -> Result<(Self, bool), StorageError> {
        let path = dir.as_ref().join(CHECKSUM_DB);
        let existed = path.exists();
        let db = sled::open(&path)?;
        let checksums = db.open_tree("checksums")?;
        let digests = db.open_tree("digests")?;
        let stops = db.open_tree("stops")?;

        let interval = if interval == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            interval
        };

        Ok((
            Self {
                db,
                checksums,
                digests,
                stops,
                interval,
            },
            existed,
        ))
    }

    /// Every published entry, ordered by start then stop
    pub fn ranges(&self) -> Result<Vec<ChecksumRange>, StorageError> {
        let mut out = Vec::with_capacity(self.checksums.len());
        for entry in self.checksums.iter() {
            let (key, value) = entry?;
            let (start, stop) = decode_pair(&key)?;
            out.push(ChecksumRange {
                range: EpochRange { start, stop },
                digest: Digest::from_slice(&value)?,
            });
        }
        Ok(out)
    }

    /// Number of published entries
    pub fn len(&self) -> usize {
        self.checksums.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checksums.is_empty()
    }
}

fn digest_index_key(digest: &Digest, start: Epoch, stop: Epoch) -> Vec<u8> {
    let mut key = Vec::with_capacity(48);
    key.extend_from_slice(digest.as_bytes());
    key.extend_from_slice(&pair_key(start, stop));
    key
}

impl ChecksumArchive for SledArchive {
    fn publish_checksum(
        &self,
        start: Epoch,
        stop: Epoch,
        digest: Digest,
    ) -> Result<(), StorageError> {
        let range = EpochRange::new(start, stop)?;
        let key = pair_key(range.start, range.stop);
        let stop_key = pair_key(range.stop, range.start);
        let new_index = digest_index_key(&digest, range.start, range.stop);

        (&self.checksums, &self.digests, &self.stops).transaction(
            |(checksums, digests, stops)| {
                if let Some(old) = checksums.insert(&key[..], &digest.0[..])? {
                    if old.as_ref() != digest.as_bytes() {
                        let mut old_index = Vec::with_capacity(48);
                        old_index.extend_from_slice(&old);
                        old_index.extend_from_slice(&key);
                        digests.remove(old_index)?;
                    }
                }
                digests.insert(new_index.as_slice(), &[] as &[u8])?;
                stops.insert(&stop_key[..], &[] as &[u8])?;
                Ok(())
            },
        )?;
        Ok(())
    }

    fn checksum_exists(&self, digest: &Digest) -> Result<bool, StorageError> {
        match self.digests.scan_prefix(digest.as_bytes()).next() {
            Some(entry) => {
                entry?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn get_checksum(&self, start: Epoch, stop: Epoch) -> Result<Option<Digest>, StorageError> {
        match self.checksums.get(pair_key(start, stop))? {
            Some(bytes) => Ok(Some(Digest::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn find_next_checksum(&self) -> Result<Epoch, StorageError> {
        match self.stops.last()? {
            Some((key, _)) => {
                let (stop, _) = decode_pair(&key)?;
                Ok(stop.saturating_add(1))
            }
            None => Ok(0),
        }
    }

    fn find_gaps(
        &self,
        start: Option<Epoch>,
        stop: Option<Epoch>,
    ) -> Result<Vec<EpochRange>, StorageError> {
        let bounds = Bounds::new(start, stop)?;
        let ranges = self.ranges()?;
        let report = gaps::scan(ranges.iter().map(|c| c.range), bounds, &RangeAdjacency);
        for (previous, next) in &report.overlaps {
            warn!("Overlapping checksum ranges: {} and {}", previous, next);
        }
        Ok(report.gaps)
    }

    fn interval(&self) -> u64 {
        self.interval
    }

    fn close(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_archive() -> (SledArchive, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let (archive, existed) = SledArchive::open(dir.path(), 100).unwrap();
        assert!(!existed);
        (archive, dir)
    }

    fn d(byte: u8) -> Digest {
        Digest([byte; 32])
    }

    #[test]
    fn test_reads_during_republish_see_whole_digests() {
        let (archive, _dir) = create_test_archive();
        archive.publish_checksum(0, 99, d(1)).unwrap();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..2_000 {
                    let digest = if i % 2 == 0 { d(2) } else { d(1) };
                    archive.publish_checksum(0, 99, digest).unwrap();
                }
            });
            for _ in 0..20_000 {
                let seen = archive.get_checksum(0, 99).unwrap();
                assert!(seen == Some(d(1)) || seen == Some(d(2)), "torn read: {:?}", seen);
            }
        });

        assert_eq!(archive.get_checksum(0, 99).unwrap(), Some(d(1)));
        assert_eq!(archive.len(), 1);
    }

    #[test]
    fn test_publish_and_get() {
        let (archive, _dir) = create_test_archive();

        archive.publish_checksum(0, 99, d(1)).unwrap();
        assert_eq!(archive.get_checksum(0, 99).unwrap(), Some(d(1)));
        assert_eq!(archive.get_checksum(0, 99).unwrap(), Some(d(1)));
        assert_eq!(archive.get_checksum(100, 199).unwrap(), None);
        assert!(archive.checksum_exists(&d(1)).unwrap());
        assert!(!archive.checksum_exists(&d(2)).unwrap());
    }

    #[test]
    fn test_republish_replaces_digest() {
        let (archive, _dir) = create_test_archive();

        archive.publish_checksum(0, 99, d(1)).unwrap();
        archive.publish_checksum(0, 99, d(2)).unwrap();

        assert_eq!(archive.get_checksum(0, 99).unwrap(), Some(d(2)));
        assert!(!archive.checksum_exists(&d(1)).unwrap());
        assert!(archive.checksum_exists(&d(2)).unwrap());
        assert_eq!(archive.len(), 1);
    }

    #[test]
    fn test_shared_digest_survives_one_replacement() {
        let (archive, _dir) = create_test_archive();

        archive.publish_checksum(0, 99, d(1)).unwrap();
        archive.publish_checksum(100, 199, d(1)).unwrap();
        archive.publish_checksum(0, 99, d(2)).unwrap();

        assert!(archive.checksum_exists(&d(1)).unwrap());
    }

    #[test]
    fn test_find_next_checksum() {
        let (archive, _dir) = create_test_archive();
        assert_eq!(archive.find_next_checksum().unwrap(), 0);

        archive.publish_checksum(0, 99, d(1)).unwrap();
        assert_eq!(archive.find_next_checksum().unwrap(), 100);

        archive.publish_checksum(300, 399, d(3)).unwrap();
        archive.publish_checksum(100, 199, d(2)).unwrap();
        assert_eq!(archive.find_next_checksum().unwrap(), 400);
    }

    #[test]
    fn test_find_gaps() {
        let (archive, _dir) = create_test_archive();
        archive.publish_checksum(0, 99, d(1)).unwrap();
        archive.publish_checksum(200, 299, d(2)).unwrap();

        assert_eq!(
            archive.find_gaps(None, None).unwrap(),
            vec![EpochRange { start: 100, stop: 199 }]
        );
        assert_eq!(
            archive.find_gaps(Some(0), Some(350)).unwrap(),
            vec![
                EpochRange { start: 100, stop: 199 },
                EpochRange { start: 300, stop: 350 }
            ]
        );
    }

    #[test]
    fn test_reopen_reports_existing() {
        let dir = tempdir().unwrap();
        {
            let (archive, existed) = SledArchive::open(dir.path(), 100).unwrap();
            assert!(!existed);
            archive.publish_checksum(0, 99, d(9)).unwrap();
            archive.close().unwrap();
        }

        let (archive, existed) = SledArchive::open(dir.path(), 0).unwrap();
        assert!(existed);
        assert_eq!(archive.interval(), DEFAULT_CHUNK_SIZE);
        assert_eq!(archive.get_checksum(0, 99).unwrap(), Some(d(9)));
        assert_eq!(archive.ranges().unwrap().len(), 1);
    }
}
