//! Core aggregation engine for health records.
//!
//! This crate computes per-group aggregates over possibly overlapping records
//! contributed by sources of different priority:
//! - Value columns (steps, distance, calories, ...) prorated across partial overlap
//! - Session durations (sleep, exercise) minus excluded sub-intervals
//! - Group boundary construction for fixed-length and calendar-day buckets

mod aggregator;
mod batch;
mod error;
mod exclusion;
pub mod kind;
mod point;
mod priority;
pub mod record;
mod result;
mod row;
pub mod splits;

pub use aggregator::{AggregationConfig, PriorityAggregator};
pub use batch::{AggregationJob, compute_batch};
pub use error::AggregationError;
pub use exclusion::ExclusionIndex;
pub use kind::{AggregationKind, AggregationVariant, ConflictPolicy, UnsupportedKind};
pub use point::{AggregationPoint, PointKind};
pub use priority::{PriorityRanking, compare_priority};
pub use record::{
    AggregationRecordData, FromRowCursor, RecordContribution, RecordSpan,
    SessionDurationAggregationData, ValueColumnAggregationData, overlap_duration,
};
pub use result::{AggregationResult, GroupAggregate};
pub use row::{AggregationRow, RowCursor};
pub use splits::{day_splits, duration_splits, validate_splits};
