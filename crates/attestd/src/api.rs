//! Read API over the checksum archive

use crate::archive::ChecksumArchive;
use crate::storage::StorageError;
use attest_core::types::*;
use std::sync::Arc;
use thiserror::Error;

/// Malformed request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("start epoch {start} is greater than stop epoch {stop}")]
    InvertedRange { start: Epoch, stop: Epoch },
    #[error("checksum expected to span an interval of {expected} epochs, got {actual}")]
    WrongSpan { expected: u64, actual: u64 },
    #[error("checksum range must start at a multiple of the interval size {interval}, got {start}")]
    Misaligned { start: Epoch, interval: u64 },
    #[error("invalid checksum hash: {0}")]
    BadDigest(String),
}

/// API errors
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Check `[start, stop]` is exactly one interval-aligned chunk
pub fn validate_range(interval: u64, start: Epoch, stop: Epoch) -> Result<EpochRange, ValidationError> {
    let interval = interval.max(1);
    let range =
        EpochRange::new(start, stop).map_err(|_| ValidationError::InvertedRange { start, stop })?;
    if range.stop - range.start != interval.saturating_sub(1) {
        return Err(ValidationError::WrongSpan {
            expected: interval,
            actual: range.len(),
        });
    }
    if start % interval != 0 {
        return Err(ValidationError::Misaligned { start, interval });
    }
    Ok(range)
}

/// Query surface handed to the transport
pub struct ReadApi {
    archive: Arc<dyn ChecksumArchive>,
}

impl ReadApi {
    pub fn new(archive: Arc<dyn ChecksumArchive>) -> Self {
        Self { archive }
    }

    /// Whether `hash` is published for any range
    pub fn checksum_exists(&self, hash: &str) -> Result<bool, ApiError> {
        let digest: Digest = hash
            .parse()
            .map_err(|e: attest_core::Error| ValidationError::BadDigest(e.to_string()))?;
        Ok(self.archive.checksum_exists(&digest)?)
    }

    /// Digest for one chunk; `None` if that chunk is not published yet
    pub fn get_checksum(&self, start: Epoch, stop: Epoch) -> Result<Option<Digest>, ApiError> {
        let range = validate_range(self.interval(), start, stop)?;
        Ok(self.archive.get_checksum(range.start, range.stop)?)
    }

    pub fn interval(&self) -> u64 {
        self.archive.interval().max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryArchive;
    use std::sync::atomic::Ordering;

    fn api() -> (ReadApi, Arc<MemoryArchive>) {
        let archive = Arc::new(MemoryArchive::new(100));
        (ReadApi::new(archive.clone()), archive)
    }

    #[test]
    fn test_misaligned_request_never_reaches_archive() {
        let (api, archive) = api();

        let err = api.get_checksum(10, 50).unwrap_err();
        assert!(matches!(err, ApiError::Validation(ValidationError::WrongSpan { .. })));

        let err = api.get_checksum(50, 149).unwrap_err();
        assert!(matches!(err, ApiError::Validation(ValidationError::Misaligned { .. })));

        let err = api.get_checksum(99, 0).unwrap_err();
        assert!(matches!(err, ApiError::Validation(ValidationError::InvertedRange { .. })));

        assert_eq!(archive.reads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_absent_range_is_not_an_error() {
        let (api, _archive) = api();
        assert_eq!(api.get_checksum(100, 199).unwrap(), None);
    }

    #[test]
    fn test_published_range_returned() {
        let (api, archive) = api();
        let digest = Digest([4; 32]);
        archive.publish_checksum(200, 299, digest).unwrap();

        assert_eq!(api.get_checksum(200, 299).unwrap(), Some(digest));
        assert!(api.checksum_exists(&digest.to_hex()).unwrap());
        assert!(!api.checksum_exists(&Digest([5; 32]).to_hex()).unwrap());
    }

    #[test]
    fn test_bad_hash_is_validation_error() {
        let (api, archive) = api();
        let err = api.checksum_exists("not-hex").unwrap_err();
        assert!(matches!(err, ApiError::Validation(ValidationError::BadDigest(_))));
        assert_eq!(archive.reads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_full_width_range_is_validation_error() {
        let (api, archive) = api();

        let err = api.get_checksum(0, u64::MAX).unwrap_err();
        assert!(matches!(
            err,
            ApiError::Validation(ValidationError::WrongSpan {
                expected: 100,
                actual: u64::MAX
            })
        ));
        let err = api.get_checksum(u64::MAX - 99, u64::MAX).unwrap_err();
        assert!(matches!(err, ApiError::Validation(ValidationError::Misaligned { .. })));
        assert_eq!(archive.reads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_validate_range() {
        assert_eq!(
            validate_range(2880, 2880, 5759).unwrap(),
            EpochRange { start: 2880, stop: 5759 }
        );
        assert!(validate_range(2880, 0, 2880).is_err());
    }
}
