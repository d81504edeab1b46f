//! Forward gap scan over sorted intervals
//!
//! Both the message index (one interval per record epoch) and the checksum
//! archive (one interval per published range) find gaps the same way: walk the
//! intervals in `start` order, track how far coverage reaches, and compare
//! that to the next interval's start. What counts as "adjacent" and whether a
//! caller's explicit bounds produce edge gaps differ per dataset, so both are
//! supplied by an [`AdjacencyRule`].

use crate::error::{Error, Result};
use crate::types::{Epoch, EpochRange};

/// How the next interval relates to the coverage seen so far.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Join {
    /// No epochs missing between coverage and the next interval
    Contiguous,
    /// At least one epoch missing
    Gap,
    /// The next interval starts inside existing coverage
    Overlap,
}

/// Dataset-specific adjacency.
pub trait AdjacencyRule {
    /// Classify the next interval start against the highest covered epoch.
    ///
    /// Must only return [`Join::Gap`] when `next_start > covered_stop + 1`.
    fn join(&self, covered_stop: Epoch, next_start: Epoch) -> Join;

    /// Whether explicit bounds beyond the data are reported as edge gaps.
    fn reports_bounds(&self) -> bool;
}

/// Message index rule: records are single epochs and many records may share
/// one, so repeating or consecutive epochs are contiguous. Only gaps between
/// present epochs are reported.
#[derive(Clone, Copy, Debug, Default)]
pub struct EpochAdjacency;

impl AdjacencyRule for EpochAdjacency {
    fn join(&self, covered_stop: Epoch, next_start: Epoch) -> Join {
        if next_start > covered_stop.saturating_add(1) {
            Join::Gap
        } else {
            Join::Contiguous
        }
    }

    fn reports_bounds(&self) -> bool {
        false
    }
}

/// Checksum archive rule: the next range must begin exactly one epoch after
/// the previous one ends. Starting earlier is an overlap, a violation that is
/// reported separately rather than as an inverted gap.
#[derive(Clone, Copy, Debug, Default)]
pub struct RangeAdjacency;

impl AdjacencyRule for RangeAdjacency {
    fn join(&self, covered_stop: Epoch, next_start: Epoch) -> Join {
        let expected = covered_stop.saturating_add(1);
        match next_start.cmp(&expected) {
            std::cmp::Ordering::Equal => Join::Contiguous,
            std::cmp::Ordering::Greater => Join::Gap,
            std::cmp::Ordering::Less => Join::Overlap,
        }
    }

    fn reports_bounds(&self) -> bool {
        true
    }
}

/// Optional lower and upper epoch bounds, both inclusive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Bounds {
    pub lower: Option<Epoch>,
    pub upper: Option<Epoch>,
}

impl Bounds {
    /// Create bounds, rejecting `lower > upper` when both are given.
    pub fn new(lower: Option<Epoch>, upper: Option<Epoch>) -> Result<Self> {
        if let (Some(start), Some(stop)) = (lower, upper) {
            if start > stop {
                return Err(Error::InvalidRange { start, stop });
            }
        }
        Ok(Self { lower, upper })
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Whether `range` shares at least one epoch with the bounds.
    pub fn admits(&self, range: &EpochRange) -> bool {
        self.lower.map_or(true, |lower| range.stop >= lower)
            && self.upper.map_or(true, |upper| range.start <= upper)
    }
}

/// Result of a gap scan.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GapReport {
    /// Missing intervals in ascending order
    pub gaps: Vec<EpochRange>,
    /// Pairs of (previous, next) intervals that overlap
    pub overlaps: Vec<(EpochRange, EpochRange)>,
}

/// Scan `intervals`, which must be sorted by `start`, for gaps within `bounds`.
pub fn scan<I, R>(intervals: I, bounds: Bounds, rule: &R) -> GapReport
where
    I: IntoIterator<Item = EpochRange>,
    R: AdjacencyRule + ?Sized,
{
    let mut report = GapReport::default();
    let mut iter = intervals.into_iter().filter(|r| bounds.admits(r));

    let Some(first) = iter.next() else {
        if rule.reports_bounds() {
            if let (Some(start), Some(stop)) = (bounds.lower, bounds.upper) {
                report.gaps.push(EpochRange { start, stop });
            }
        }
        return report;
    };

    if rule.reports_bounds() {
        if let Some(lower) = bounds.lower {
            if lower < first.start {
                report.gaps.push(EpochRange {
                    start: lower,
                    stop: first.start - 1,
                });
            }
        }
    }

    let mut previous = first;
    let mut covered = first.stop;
    for next in iter {
        match rule.join(covered, next.start) {
            Join::Contiguous => {}
            Join::Gap => report.gaps.push(EpochRange {
                start: covered + 1,
                stop: next.start - 1,
            }),
            Join::Overlap => report.overlaps.push((previous, next)),
        }
        covered = covered.max(next.stop);
        previous = next;
    }

    if rule.reports_bounds() {
        if let Some(upper) = bounds.upper {
            if upper > covered {
                report.gaps.push(EpochRange {
                    start: covered + 1,
                    stop: upper,
                });
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(start: Epoch, stop: Epoch) -> EpochRange {
        EpochRange { start, stop }
    }

    fn epochs(list: &[Epoch]) -> Vec<EpochRange> {
        list.iter().copied().map(EpochRange::single).collect()
    }

    #[test]
    fn test_archive_unbounded() {
        let ranges = vec![r(0, 99), r(200, 299)];
        let report = scan(ranges, Bounds::unbounded(), &RangeAdjacency);
        assert_eq!(report.gaps, vec![r(100, 199)]);
        assert!(report.overlaps.is_empty());
    }

    #[test]
    fn test_archive_bounded_upper_edge() {
        let ranges = vec![r(0, 99), r(200, 299)];
        let bounds = Bounds::new(Some(0), Some(350)).unwrap();
        let report = scan(ranges, bounds, &RangeAdjacency);
        assert_eq!(report.gaps, vec![r(100, 199), r(300, 350)]);
    }

    #[test]
    fn test_archive_bounded_lower_edge() {
        let ranges = vec![r(100, 199), r(200, 299)];
        let bounds = Bounds::new(Some(50), None).unwrap();
        let report = scan(ranges, bounds, &RangeAdjacency);
        assert_eq!(report.gaps, vec![r(50, 99)]);
    }

    #[test]
    fn test_archive_bounds_exclude_far_ranges() {
        let ranges = vec![r(0, 99), r(200, 299), r(400, 499)];
        let bounds = Bounds::new(None, Some(250)).unwrap();
        let report = scan(ranges, bounds, &RangeAdjacency);
        assert_eq!(report.gaps, vec![r(100, 199)]);
    }

    #[test]
    fn test_archive_empty_with_bounds() {
        let bounds = Bounds::new(Some(0), Some(99)).unwrap();
        assert_eq!(scan(vec![], bounds, &RangeAdjacency).gaps, vec![r(0, 99)]);
        assert!(scan(vec![], Bounds::unbounded(), &RangeAdjacency).gaps.is_empty());
    }

    #[test]
    fn test_archive_overlap_reported() {
        let ranges = vec![r(0, 99), r(50, 149), r(150, 199)];
        let report = scan(ranges, Bounds::unbounded(), &RangeAdjacency);
        assert!(report.gaps.is_empty());
        assert_eq!(report.overlaps, vec![(r(0, 99), r(50, 149))]);
    }

    #[test]
    fn test_epochs_interior_only() {
        let list = epochs(&[3, 3, 4, 5, 9, 10, 10, 14]);
        let bounds = Bounds::new(Some(0), Some(20)).unwrap();
        let report = scan(list, bounds, &EpochAdjacency);
        assert_eq!(report.gaps, vec![r(6, 8), r(11, 13)]);
    }

    #[test]
    fn test_epochs_bounded_below() {
        let list = epochs(&[1, 2, 5, 6, 8]);
        let bounds = Bounds::new(Some(5), None).unwrap();
        assert_eq!(scan(list, bounds, &EpochAdjacency).gaps, vec![r(7, 7)]);
    }

    #[test]
    fn test_epochs_none_in_range() {
        let list = epochs(&[1, 2, 3]);
        let bounds = Bounds::new(Some(10), Some(20)).unwrap();
        assert!(scan(list, bounds, &EpochAdjacency).gaps.is_empty());
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        assert!(Bounds::new(Some(10), Some(5)).is_err());
    }
}
