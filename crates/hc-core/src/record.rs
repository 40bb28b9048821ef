//! Per-record contribution state.
//!
//! A record is one logical entity read from the row cursor: a single row for
//! value-column kinds, or a session row plus the child rows carrying its
//! excluded sub-intervals for session kinds. Each record knows how much it
//! contributes to an arbitrary query window.

use chrono::FixedOffset;

use crate::error::AggregationError;
use crate::exclusion::ExclusionIndex;
use crate::kind::AggregationVariant;
use crate::priority::PriorityRanking;
use crate::row::{AggregationRow, RowCursor};

/// Length of the intersection of `[a_start, a_end)` and `[b_start, b_end)`,
/// or `0` when they do not intersect.
pub fn overlap_duration(a_start: i64, b_start: i64, a_end: i64, b_end: i64) -> i64 {
    a_end
        .min(b_end)
        .saturating_sub(a_start.max(b_start))
        .max(0)
}

/// Fields shared by every record variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSpan {
    pub start_time: i64,
    pub end_time: i64,
    pub source_app_id: String,
    pub last_modified_time: i64,
    pub start_zone_offset: FixedOffset,
    /// Rank of `source_app_id` in the request's priority ranking.
    pub priority: usize,
}

impl RecordSpan {
    fn from_row(
        row: &AggregationRow,
        index: usize,
        ranking: &PriorityRanking,
    ) -> Result<Self, AggregationError> {
        let missing = |column| AggregationError::MissingColumn { row: index, column };

        let start_time = row.start_time.ok_or_else(|| missing("start_time"))?;
        let end_time = row.end_time.ok_or_else(|| missing("end_time"))?;
        let source_app_id = row
            .source_app_id
            .clone()
            .ok_or_else(|| missing("source_app_id"))?;
        let last_modified_time = row
            .last_modified_time
            .ok_or_else(|| missing("last_modified_time"))?;
        let seconds = row
            .start_zone_offset_seconds
            .ok_or_else(|| missing("start_zone_offset"))?;
        let start_zone_offset = FixedOffset::east_opt(seconds)
            .ok_or(AggregationError::InvalidZoneOffset { row: index, seconds })?;
        let priority = ranking.rank(&source_app_id);

        Ok(Self {
            start_time,
            end_time,
            source_app_id,
            last_modified_time,
            start_zone_offset,
            priority,
        })
    }

    /// Length of the span, saturating at `i64::MAX`.
    pub const fn duration(&self) -> i64 {
        self.end_time.saturating_sub(self.start_time)
    }

    pub const fn is_instant(&self) -> bool {
        self.start_time == self.end_time
    }
}

/// How much a record contributes to a query window.
pub trait RecordContribution {
    fn span(&self) -> &RecordSpan;

    /// Contribution to `[start, end)`.
    fn contribution_on_interval(&self, start: i64, end: i64) -> f64;
}

/// Construction of a record from the rows at the head of a cursor.
pub trait FromRowCursor: Sized {
    /// Consumes the rows of the next entity, or returns `None` once the
    /// cursor is exhausted.
    fn from_cursor<I, E>(
        cursor: &mut RowCursor<I>,
        ranking: &PriorityRanking,
    ) -> Result<Option<Self>, E>
    where
        I: Iterator<Item = Result<AggregationRow, E>>,
        E: From<AggregationError>;
}

/// A scalar column value prorated across partial overlap.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueColumnAggregationData {
    span: RecordSpan,
    value: f64,
}

impl ValueColumnAggregationData {
    pub const fn new(span: RecordSpan, value: f64) -> Self {
        Self { span, value }
    }

    pub const fn value(&self) -> f64 {
        self.value
    }
}

impl RecordContribution for ValueColumnAggregationData {
    fn span(&self) -> &RecordSpan {
        &self.span
    }

    /// Returns the raw value for zero-length records; callers must only ask
    /// about windows that contain the instant.
    #[allow(clippy::cast_precision_loss)]
    fn contribution_on_interval(&self, start: i64, end: i64) -> f64 {
        let total = self.span.duration();
        if total == 0 {
            return self.value;
        }
        let overlap = overlap_duration(self.span.start_time, start, self.span.end_time, end);
        if total < 0 || overlap <= 0 {
            return 0.0;
        }
        self.value * overlap as f64 / total as f64
    }
}

impl FromRowCursor for ValueColumnAggregationData {
    fn from_cursor<I, E>(
        cursor: &mut RowCursor<I>,
        ranking: &PriorityRanking,
    ) -> Result<Option<Self>, E>
    where
        I: Iterator<Item = Result<AggregationRow, E>>,
        E: From<AggregationError>,
    {
        let index = cursor.consumed();
        let Some(row) = cursor.next_row()? else {
            return Ok(None);
        };
        let span = RecordSpan::from_row(&row, index, ranking)?;
        let value = row.value.ok_or(AggregationError::MissingColumn {
            row: index,
            column: "value",
        })?;
        Ok(Some(Self::new(span, value)))
    }
}

/// Net session duration after subtracting excluded sub-intervals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDurationAggregationData {
    entity_id: String,
    span: RecordSpan,
    exclusions: ExclusionIndex,
}

impl SessionDurationAggregationData {
    pub fn new(entity_id: String, span: RecordSpan, exclusions: Vec<(i64, i64)>) -> Self {
        let exclusions = ExclusionIndex::new(exclusions, span.start_time, span.end_time);
        Self {
            entity_id,
            span,
            exclusions,
        }
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub const fn exclusions(&self) -> &ExclusionIndex {
        &self.exclusions
    }
}

impl RecordContribution for SessionDurationAggregationData {
    fn span(&self) -> &RecordSpan {
        &self.span
    }

    #[allow(clippy::cast_precision_loss)]
    fn contribution_on_interval(&self, start: i64, end: i64) -> f64 {
        let gross = overlap_duration(self.span.start_time, start, self.span.end_time, end);
        if gross == 0 {
            return 0.0;
        }
        let excluded = self.exclusions.excluded_overlap(start, end);
        gross.saturating_sub(excluded) as f64
    }
}

impl FromRowCursor for SessionDurationAggregationData {
    fn from_cursor<I, E>(
        cursor: &mut RowCursor<I>,
        ranking: &PriorityRanking,
    ) -> Result<Option<Self>, E>
    where
        I: Iterator<Item = Result<AggregationRow, E>>,
        E: From<AggregationError>,
    {
        let index = cursor.consumed();
        let Some(row) = cursor.next_row()? else {
            return Ok(None);
        };
        let span = RecordSpan::from_row(&row, index, ranking)?;
        let entity_id = row.entity_id.clone().ok_or(AggregationError::MissingColumn {
            row: index,
            column: "entity_id",
        })?;

        let mut exclusions: Vec<(i64, i64)> = row.exclusion().into_iter().collect();
        while let Some(next) = cursor.peek_row()? {
            if next.entity_id.as_deref() != Some(entity_id.as_str()) {
                break;
            }
            if let Some(exclusion) = next.exclusion() {
                exclusions.push(exclusion);
            }
            cursor.next_row()?;
        }

        tracing::trace!(
            entity_id = %entity_id,
            exclusions = exclusions.len(),
            "populated session record"
        );
        Ok(Some(Self::new(entity_id, span, exclusions)))
    }
}

/// One record's contribution state, in whichever variant the request's kind selects.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregationRecordData {
    ValueColumn(ValueColumnAggregationData),
    SessionDuration(SessionDurationAggregationData),
}

impl AggregationRecordData {
    /// Reads the next record of the given variant from the cursor.
    pub fn read_next<I, E>(
        variant: AggregationVariant,
        cursor: &mut RowCursor<I>,
        ranking: &PriorityRanking,
    ) -> Result<Option<Self>, E>
    where
        I: Iterator<Item = Result<AggregationRow, E>>,
        E: From<AggregationError>,
    {
        Ok(match variant {
            AggregationVariant::ValueColumn => {
                ValueColumnAggregationData::from_cursor(cursor, ranking)?.map(Self::ValueColumn)
            }
            AggregationVariant::SessionDuration => {
                SessionDurationAggregationData::from_cursor(cursor, ranking)?
                    .map(Self::SessionDuration)
            }
        })
    }

    pub fn start_time(&self) -> i64 {
        self.span().start_time
    }

    pub fn end_time(&self) -> i64 {
        self.span().end_time
    }

    pub fn priority(&self) -> usize {
        self.span().priority
    }

    pub fn last_modified_time(&self) -> i64 {
        self.span().last_modified_time
    }

    pub fn start_zone_offset(&self) -> FixedOffset {
        self.span().start_zone_offset
    }
}

impl RecordContribution for AggregationRecordData {
    fn span(&self) -> &RecordSpan {
        match self {
            Self::ValueColumn(data) => data.span(),
            Self::SessionDuration(data) => data.span(),
        }
    }

    fn contribution_on_interval(&self, start: i64, end: i64) -> f64 {
        match self {
            Self::ValueColumn(data) => data.contribution_on_interval(start, end),
            Self::SessionDuration(data) => data.contribution_on_interval(start, end),
        }
    }
}
