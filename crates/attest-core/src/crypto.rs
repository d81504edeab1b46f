//! Chunk digest derivation
//!
//! Digests use BLAKE3 with a domain separation prefix:
//!
//! `Digest = BLAKE3("msgindex-chunk" || Σ u32_be(len(enc_i)) || enc_i)`
//!
//! where `enc_i` is the canonical encoding of the i-th record in `cid` order.
//! Two copies of the log holding the same records over a range produce the
//! same digest regardless of insertion order.

use crate::canonical::{canonical_bytes, normalize_records};
use crate::error::{Error, Result};
use crate::types::{Digest, LogRecord};
use blake3::Hasher;

/// Domain prefix for chunk digests
pub const DOMAIN_CHUNK: &[u8] = b"msgindex-chunk";

/// Incremental chunk digest.
///
/// Records must be fed in strictly increasing `cid` order; feeding them out
/// of order is an error so a caller can never produce a digest that another
/// node would not reproduce.
pub struct ChunkHasher {
    hasher: Hasher,
    last_cid: Option<String>,
    records: u64,
}

impl ChunkHasher {
    pub fn new() -> Self {
        let mut hasher = Hasher::new();
        hasher.update(DOMAIN_CHUNK);
        Self {
            hasher,
            last_cid: None,
            records: 0,
        }
    }

    /// Absorb the next record.
    pub fn update(&mut self, record: &LogRecord) -> Result<()> {
        if let Some(last) = &self.last_cid {
            if record.cid.as_str() <= last.as_str() {
                return Err(Error::OutOfOrder {
                    previous: last.clone(),
                    next: record.cid.clone(),
                });
            }
        }
        let bytes = canonical_bytes(record)?;
        self.hasher.update(&(bytes.len() as u32).to_be_bytes());
        self.hasher.update(&bytes);
        self.last_cid = Some(record.cid.clone());
        self.records += 1;
        Ok(())
    }

    /// Number of records absorbed so far.
    pub fn record_count(&self) -> u64 {
        self.records
    }

    pub fn finalize(self) -> Digest {
        Digest(*self.hasher.finalize().as_bytes())
    }
}

impl Default for ChunkHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Digest an unordered record set.
pub fn chunk_digest(records: &[LogRecord]) -> Result<Digest> {
    let mut ordered = records.to_vec();
    normalize_records(&mut ordered);
    let mut hasher = ChunkHasher::new();
    for record in &ordered {
        hasher.update(record)?;
    }
    Ok(hasher.finalize())
}
