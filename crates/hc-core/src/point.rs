//! Instants of interest in the priority sweep.

use std::cmp::Ordering;

use crate::priority::compare_priority;
use crate::record::AggregationRecordData;

/// What happens at a point. Declaration order is the tie-break order at equal time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PointKind {
    GroupBorder,
    IntervalStart,
    IntervalEnd,
}

/// A group boundary, or the start or end of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationPoint {
    pub time: i64,
    pub kind: PointKind,
    /// Index of the owning record for interval points.
    pub owner: Option<usize>,
}

impl AggregationPoint {
    pub const fn group_border(time: i64) -> Self {
        Self {
            time,
            kind: PointKind::GroupBorder,
            owner: None,
        }
    }

    pub const fn interval_start(time: i64, owner: usize) -> Self {
        Self {
            time,
            kind: PointKind::IntervalStart,
            owner: Some(owner),
        }
    }

    pub const fn interval_end(time: i64, owner: usize) -> Self {
        Self {
            time,
            kind: PointKind::IntervalEnd,
            owner: Some(owner),
        }
    }

    /// Sweep order: time, then kind (`GroupBorder < IntervalStart < IntervalEnd`),
    /// then the owning records' priority with the winner first.
    pub fn compare(&self, other: &Self, records: &[AggregationRecordData]) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.kind.cmp(&other.kind))
            .then_with(|| match (self.owner, other.owner) {
                (Some(a), Some(b)) => compare_priority(&records[a], &records[b]).then(a.cmp(&b)),
                _ => Ordering::Equal,
            })
    }
}
