//! Core attestation types
//!
//! All types here serialize deterministically via postcard. Field order
//! matters for canonical encoding.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ordinal position in the message log.
pub type Epoch = u64;

/// 32-byte fixed-size array used for digests.
pub type Bytes32 = [u8; 32];

/// Default chunk size in epochs (one day of 30 second epochs).
pub const DEFAULT_CHUNK_SIZE: u64 = 2880;

// =============================================================================
// RANGES
// =============================================================================

/// Inclusive `[start, stop]` interval of epochs.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EpochRange {
    pub start: Epoch,
    pub stop: Epoch,
}

impl EpochRange {
    /// Create a range, rejecting `start > stop`.
    pub fn new(start: Epoch, stop: Epoch) -> Result<Self> {
        if start > stop {
            return Err(Error::InvalidRange { start, stop });
        }
        Ok(Self { start, stop })
    }

    /// Range covering a single epoch.
    pub fn single(epoch: Epoch) -> Self {
        Self {
            start: epoch,
            stop: epoch,
        }
    }

    /// The chunk of `size` epochs beginning at `start`.
    pub fn chunk(start: Epoch, size: u64) -> Self {
        let size = size.max(1);
        Self {
            start,
            stop: start.saturating_add(size - 1),
        }
    }

    /// Number of epochs covered, saturating at `u64::MAX` for `[0, u64::MAX]`.
    pub fn len(&self) -> u64 {
        (self.stop - self.start).saturating_add(1)
    }

    /// Always false: a range covers at least one epoch.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether `epoch` lies inside the range.
    pub fn contains(&self, epoch: Epoch) -> bool {
        self.start <= epoch && epoch <= self.stop
    }

    /// Whether the two ranges share at least one epoch.
    pub fn intersects(&self, other: &EpochRange) -> bool {
        self.start <= other.stop && other.start <= self.stop
    }
}

impl fmt::Display for EpochRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.stop)
    }
}

// =============================================================================
// LOG RECORDS
// =============================================================================

/// One message index entry.
///
/// `cid` is unique across the log; several records may share an epoch.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct LogRecord {
    /// Message CID (unique key)
    pub cid: String,
    /// CID of the containing tipset
    pub tipset_cid: String,
    /// Epoch of the containing tipset
    pub epoch: Epoch,
}

impl LogRecord {
    pub fn new(cid: impl Into<String>, tipset_cid: impl Into<String>, epoch: Epoch) -> Self {
        Self {
            cid: cid.into(),
            tipset_cid: tipset_cid.into(),
            epoch,
        }
    }
}

// =============================================================================
// DIGESTS
// =============================================================================

/// Chunk digest, rendered as lower-case hex.
#[derive(Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest(pub Bytes32);

impl Digest {
    pub fn as_bytes(&self) -> &Bytes32 {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Build from a raw byte slice, which must be exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: Bytes32 = bytes
            .try_into()
            .map_err(|_| Error::InvalidDigest(format!("expected 32 bytes, got {}", bytes.len())))?;
        Ok(Self(arr))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", &self.to_hex()[..16])
    }
}

impl FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim()).map_err(|e| Error::InvalidDigest(e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

// =============================================================================
// ARCHIVE ENTRIES
// =============================================================================

/// A published archive entry.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChecksumRange {
    pub range: EpochRange,
    pub digest: Digest,
}

impl ChecksumRange {
    pub fn start(&self) -> Epoch {
        self.range.start
    }

    pub fn stop(&self) -> Epoch {
        self.range.stop
    }
}
