//! Canonical encoding for hashed records
//!
//! Every hashed object uses postcard serialization:
//! - Field order is Rust struct field order
//! - Integers are varint encoded
//! - Record sets are ordered by `cid` and deduplicated

use crate::error::{Error, Result};
use crate::types::LogRecord;
use serde::Serialize;

/// Serialize a value to canonical bytes using postcard.
///
/// This is the normative encoding for all digest operations.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    postcard::to_allocvec(value).map_err(Error::from)
}

/// Put a record set into digest order: sorted by `cid`, one record per `cid`.
///
/// The message index replaces on conflict, so when two records share a
/// `cid` the later one in `records` wins.
pub fn normalize_records(records: &mut Vec<LogRecord>) {
    // stable sort keeps insertion order among equal cids
    records.sort_by(|a, b| a.cid.cmp(&b.cid));
    let mut out: Vec<LogRecord> = Vec::with_capacity(records.len());
    for record in records.drain(..) {
        match out.last_mut() {
            Some(last) if last.cid == record.cid => *last = record,
            _ => out.push(record),
        }
    }
    *records = out;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_bytes_stable() {
        let record = LogRecord::new("a", "t", 300);
        assert_eq!(canonical_bytes(&record).unwrap(), canonical_bytes(&record.clone()).unwrap());
    }

    #[test]
    fn test_normalize_sorts_and_replaces() {
        let mut records = vec![
            LogRecord::new("c", "t1", 1),
            LogRecord::new("a", "t1", 1),
            LogRecord::new("c", "t2", 2),
        ];
        normalize_records(&mut records);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].cid, "a");
        assert_eq!(records[1].tipset_cid, "t2");
    }
}
