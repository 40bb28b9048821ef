//! Priority-based interval aggregation.
//!
//! Computes one aggregate per caller-defined group from records that may
//! overlap, come from sources of different priority, and (for sessions) carry
//! excluded sub-intervals.
//!
//! # Algorithm Summary
//!
//! 1. Read one record per entity from the cursor; rows arrive sorted by start time
//! 2. Advance a monotonic current group past every group ending at or before the record start
//! 3. Walk forward from the current group, adding the record's contribution to each group
//!    it overlaps, until a group starts at or after the record end
//!
//! Under [`ConflictPolicy::HighestPriority`] the records are instead swept as
//! [`AggregationPoint`]s, and between consecutive points only the winning open
//! record contributes.

use std::cmp::Reverse;
use std::collections::BTreeSet;

use crate::error::AggregationError;
use crate::kind::{AggregationKind, ConflictPolicy};
use crate::point::{AggregationPoint, PointKind};
use crate::priority::PriorityRanking;
use crate::record::{AggregationRecordData, RecordContribution, overlap_duration};
use crate::result::AggregationResult;
use crate::row::{AggregationRow, RowCursor};
use crate::splits::validate_splits;

/// Validated, read-only configuration of one aggregation request.
///
/// Safe to share by reference between aggregators running on different threads.
#[derive(Debug, Clone)]
pub struct AggregationConfig {
    group_splits: Vec<i64>,
    ranking: PriorityRanking,
    kind: AggregationKind,
    conflict_policy: ConflictPolicy,
}

impl AggregationConfig {
    /// Creates a configuration.
    ///
    /// `group_splits` holds N+1 non-decreasing boundaries of N half-open groups.
    /// `priority_order` lists source app ids, most trusted first.
    pub fn new<I, S>(
        group_splits: Vec<i64>,
        priority_order: I,
        kind: AggregationKind,
    ) -> Result<Self, AggregationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        validate_splits(&group_splits)?;
        Ok(Self {
            group_splits,
            ranking: PriorityRanking::from_order(priority_order),
            kind,
            conflict_policy: ConflictPolicy::default(),
        })
    }

    #[must_use]
    pub fn with_conflict_policy(mut self, conflict_policy: ConflictPolicy) -> Self {
        self.conflict_policy = conflict_policy;
        self
    }

    pub fn group_splits(&self) -> &[i64] {
        &self.group_splits
    }

    pub fn group_count(&self) -> usize {
        self.group_splits.len() - 1
    }

    /// `[start, end)` of a group.
    pub fn group_bounds(&self, group: usize) -> Option<(i64, i64)> {
        Some((
            *self.group_splits.get(group)?,
            *self.group_splits.get(group + 1)?,
        ))
    }

    /// `[first boundary, last boundary)`.
    pub fn time_range(&self) -> (i64, i64) {
        (
            self.group_splits[0],
            self.group_splits[self.group_splits.len() - 1],
        )
    }

    pub const fn ranking(&self) -> &PriorityRanking {
        &self.ranking
    }

    pub const fn kind(&self) -> AggregationKind {
        self.kind
    }

    pub const fn conflict_policy(&self) -> ConflictPolicy {
        self.conflict_policy
    }
}

/// Single-use aggregator for one request.
pub struct PriorityAggregator<'a> {
    config: &'a AggregationConfig,
    result: AggregationResult,
    current_group: usize,
}

impl<'a> PriorityAggregator<'a> {
    pub fn new(config: &'a AggregationConfig) -> Self {
        Self {
            config,
            result: AggregationResult::with_groups(config.group_count()),
            current_group: 0,
        }
    }

    /// Consumes the row cursor exactly once and returns the per-group aggregates.
    ///
    /// Rows must be sorted by start time ascending, and for session kinds the
    /// rows of one entity must be contiguous. Cursor errors are returned as-is.
    pub fn compute_aggregation<T, E>(mut self, rows: T) -> Result<AggregationResult, E>
    where
        T: IntoIterator<Item = Result<AggregationRow, E>>,
        E: From<AggregationError>,
    {
        let config = self.config;
        let variant = config.kind().variant();
        let mut cursor = RowCursor::new(rows);
        let mut records_read = 0_usize;
        let mut swept: Vec<AggregationRecordData> = Vec::new();

        while let Some(record) =
            AggregationRecordData::read_next(variant, &mut cursor, config.ranking())?
        {
            records_read += 1;
            if record.end_time() < record.start_time() {
                tracing::warn!(
                    source = %record.span().source_app_id,
                    start_time = record.start_time(),
                    end_time = record.end_time(),
                    "skipping record that ends before it starts"
                );
                continue;
            }
            match config.conflict_policy() {
                ConflictPolicy::Sum => self.add_record(&record),
                ConflictPolicy::HighestPriority => swept.push(record),
            }
        }

        if !swept.is_empty() {
            self.sweep(&swept);
        }

        tracing::debug!(
            kind = %config.kind(),
            policy = %config.conflict_policy(),
            groups = config.group_count(),
            rows = cursor.consumed(),
            records = records_read,
            "aggregation complete"
        );
        Ok(self.result)
    }

    /// [`compute_aggregation`](Self::compute_aggregation) over rows already in memory.
    pub fn compute_rows(
        self,
        rows: Vec<AggregationRow>,
    ) -> Result<AggregationResult, AggregationError> {
        self.compute_aggregation(rows.into_iter().map(Ok))
    }

    fn add_record(&mut self, record: &AggregationRecordData) {
        if record.span().is_instant() {
            self.add_instant(record);
            return;
        }

        let config = self.config;
        let splits = config.group_splits();
        let group_count = splits.len() - 1;
        let (start, end) = (record.start_time(), record.end_time());

        while self.current_group < group_count && start >= splits[self.current_group + 1] {
            self.current_group += 1;
        }

        let mut group = self.current_group;
        while group < group_count {
            let (group_start, group_end) = (splits[group], splits[group + 1]);
            if end <= group_start {
                break;
            }
            if overlap_duration(start, group_start, end, group_end) > 0 {
                self.result.add(
                    group,
                    record.contribution_on_interval(group_start, group_end),
                    record.start_zone_offset(),
                );
            }
            group += 1;
        }
    }

    /// Zero-length records count in full towards the group containing the instant.
    fn add_instant(&mut self, record: &AggregationRecordData) {
        let config = self.config;
        let splits = config.group_splits();
        let after = splits.partition_point(|&split| split <= record.start_time());
        if after == 0 || after >= splits.len() {
            return;
        }
        let group = after - 1;
        self.result.add(
            group,
            record.contribution_on_interval(splits[group], splits[group + 1]),
            record.start_zone_offset(),
        );
    }

    /// Marks every group the record overlaps with its zone offset, in cursor
    /// order, so the sweep winner never decides a group's offset.
    fn observe_zone_offsets(&mut self, record: &AggregationRecordData) {
        let config = self.config;
        let splits = config.group_splits();
        let group_count = splits.len() - 1;
        let (start, end) = (record.start_time(), record.end_time());

        let mut group = splits[1..].partition_point(|&group_end| group_end <= start);
        while group < group_count && splits[group] < end {
            if overlap_duration(start, splits[group], end, splits[group + 1]) > 0 {
                self.result
                    .observe_zone_offset(group, record.start_zone_offset());
            }
            group += 1;
        }
    }

    fn sweep(&mut self, records: &[AggregationRecordData]) {
        let config = self.config;
        let splits = config.group_splits();
        let group_count = splits.len() - 1;

        let mut points = Vec::with_capacity(splits.len() + 2 * records.len());
        points.extend(splits.iter().map(|&time| AggregationPoint::group_border(time)));
        for (index, record) in records.iter().enumerate() {
            if record.span().is_instant() {
                self.add_instant(record);
            } else {
                self.observe_zone_offsets(record);
                points.push(AggregationPoint::interval_start(record.start_time(), index));
                points.push(AggregationPoint::interval_end(record.end_time(), index));
            }
        }
        points.sort_by(|a, b| a.compare(b, records));

        // Smallest key is the current winner.
        let open_key = |index: usize| {
            let record = &records[index];
            (
                Reverse(record.priority()),
                Reverse(record.last_modified_time()),
                index,
            )
        };
        let mut open = BTreeSet::new();
        let mut borders_passed = 0;
        let mut current_group: Option<usize> = None;
        let mut previous_time = i64::MIN;

        for point in &points {
            if point.time > previous_time {
                if let (Some(group), Some(&(_, _, winner))) = (current_group, open.first()) {
                    let record: &AggregationRecordData = &records[winner];
                    self.result.add(
                        group,
                        record.contribution_on_interval(previous_time, point.time),
                        record.start_zone_offset(),
                    );
                }
                previous_time = point.time;
            }

            match (point.kind, point.owner) {
                (PointKind::GroupBorder, _) => {
                    current_group = (borders_passed < group_count).then_some(borders_passed);
                    borders_passed += 1;
                }
                (PointKind::IntervalStart, Some(owner)) => {
                    open.insert(open_key(owner));
                }
                (PointKind::IntervalEnd, Some(owner)) => {
                    open.remove(&open_key(owner));
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    const MINUTE: i64 = 60_000;

    fn value_row(start: i64, end: i64, app: &str, value: f64) -> AggregationRow {
        AggregationRow::new(start, end, app).with_value(value)
    }

    fn session_row(id: &str, start: i64, end: i64, app: &str) -> AggregationRow {
        AggregationRow::new(start, end, app).with_entity(id)
    }

    fn aggregate(config: &AggregationConfig, rows: Vec<AggregationRow>) -> AggregationResult {
        PriorityAggregator::new(config)
            .compute_rows(rows)
            .expect("aggregation succeeds")
    }

    fn config(splits: Vec<i64>, kind: AggregationKind) -> AggregationConfig {
        AggregationConfig::new(splits, Vec::<String>::new(), kind).expect("valid config")
    }

    fn assert_values(result: &AggregationResult, expected: &[f64]) {
        assert_eq!(result.len(), expected.len());
        for (group, expected) in expected.iter().enumerate() {
            let actual = result.value(group).unwrap();
            assert!(
                (actual - expected).abs() < 1e-9,
                "group {group}: expected {expected}, got {actual}"
            );
        }
    }

    #[test]
    fn test_record_spanning_groups_splits_by_overlap() {
        let config = config(vec![0, 100, 200, 300], AggregationKind::Steps);
        let result = aggregate(&config, vec![value_row(50, 250, "app", 200.0)]);
        assert_values(&result, &[50.0, 100.0, 50.0]);
        assert!((result.total() - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_session_spanning_groups_splits_by_duration() {
        let config = config(vec![0, 100, 200, 300], AggregationKind::ExerciseDuration);
        let result = aggregate(&config, vec![session_row("ex-1", 50, 250, "app")]);
        assert_values(&result, &[50.0, 100.0, 50.0]);
    }

    #[test]
    fn test_empty_cursor() {
        let config = config(vec![0, 100], AggregationKind::Steps);
        let result = aggregate(&config, vec![]);
        assert_values(&result, &[0.0]);
        assert_eq!(result.zone_offset(0), None);
        assert_eq!(result.to_map().len(), 1);
    }

    #[test]
    fn test_records_outside_all_groups_contribute_nothing() {
        let config = config(vec![100, 200], AggregationKind::Steps);
        let result = aggregate(
            &config,
            vec![
                value_row(0, 100, "app", 10.0),
                value_row(200, 300, "app", 10.0),
                value_row(400, 400, "app", 10.0),
            ],
        );
        assert_values(&result, &[0.0]);
        assert_eq!(result.zone_offset(0), None);
    }

    #[test]
    fn test_record_starting_before_first_group_is_clipped() {
        let config = config(vec![0, 100], AggregationKind::Steps);
        let result = aggregate(&config, vec![value_row(-50, 50, "app", 100.0)]);
        assert_values(&result, &[50.0]);
    }

    #[test]
    fn test_zero_length_record_counts_in_containing_group() {
        let config = config(vec![0, 100, 200], AggregationKind::FloorsClimbed);
        let result = aggregate(
            &config,
            vec![
                value_row(0, 0, "app", 1.0),
                value_row(100, 100, "app", 2.0),
                value_row(150, 150, "app", 4.0),
            ],
        );
        assert_values(&result, &[1.0, 6.0]);
    }

    #[test]
    fn test_zero_length_record_skips_empty_groups() {
        let config = config(vec![0, 100, 100, 200], AggregationKind::Steps);
        let result = aggregate(&config, vec![value_row(100, 100, "app", 3.0)]);
        assert_values(&result, &[0.0, 0.0, 3.0]);
    }

    #[test]
    fn test_overlapping_sources_are_summed_by_default() {
        let config = AggregationConfig::new(
            vec![0, 200],
            ["high", "low"],
            AggregationKind::Steps,
        )
        .unwrap();
        let result = aggregate(
            &config,
            vec![
                value_row(0, 100, "high", 100.0),
                value_row(50, 150, "low", 100.0),
            ],
        );
        assert_values(&result, &[200.0]);
    }

    #[test]
    fn test_short_record_after_long_one_lands_in_early_group() {
        let config = config(vec![0, 100, 200, 300], AggregationKind::Steps);
        let result = aggregate(
            &config,
            vec![
                value_row(0, 300, "app", 300.0),
                value_row(60, 80, "app", 5.0),
                value_row(210, 220, "app", 7.0),
            ],
        );
        assert_values(&result, &[105.0, 100.0, 107.0]);
    }

    #[test]
    fn test_sleep_session_excludes_awake_stage() {
        let config = config(vec![0, 480 * MINUTE], AggregationKind::SleepDuration);
        let rows = vec![
            session_row("sleep-1", 0, 480 * MINUTE, "app").with_exclusion(120 * MINUTE, 150 * MINUTE),
        ];
        let result = aggregate(&config, rows);
        assert_values(&result, &[(450 * MINUTE) as f64]);
    }

    #[test]
    fn test_session_exclusion_lands_in_its_own_group() {
        let config = config(vec![0, 100, 200], AggregationKind::SleepDuration);
        let rows = vec![
            session_row("s", 50, 200, "app").with_exclusion(120, 140),
            session_row("s", 50, 200, "app").with_exclusion(190, 200),
            session_row("t", 150, 160, "app"),
        ];
        let result = aggregate(&config, rows);
        assert_values(&result, &[50.0, 100.0 - 30.0 + 10.0]);
    }

    #[test]
    fn test_zone_offset_is_first_observed_not_highest_priority() {
        let early_low = FixedOffset::east_opt(3600).unwrap();
        let late_high = FixedOffset::east_opt(9 * 3600).unwrap();
        let config = AggregationConfig::new(vec![0, 100], ["high", "low"], AggregationKind::Steps)
            .unwrap();
        let rows = vec![
            value_row(0, 50, "low", 1.0).with_zone_offset(3600),
            value_row(10, 60, "high", 1.0).with_zone_offset(9 * 3600),
        ];
        let result = aggregate(&config, rows.clone());
        assert_eq!(result.zone_offset(0), Some(early_low));

        let highest = config.with_conflict_policy(ConflictPolicy::HighestPriority);
        let result = aggregate(&highest, rows);
        assert_eq!(result.zone_offset(0), Some(early_low));
        assert_ne!(result.zone_offset(0), Some(late_high));
    }

    #[test]
    fn test_zone_offset_ignores_winner_when_records_start_together() {
        let first = FixedOffset::east_opt(3600).unwrap();
        let config = AggregationConfig::new(vec![0, 100], ["high", "low"], AggregationKind::Steps)
            .unwrap()
            .with_conflict_policy(ConflictPolicy::HighestPriority);
        let rows = vec![
            value_row(0, 50, "low", 1.0).with_zone_offset(3600),
            value_row(0, 60, "high", 6.0).with_zone_offset(2 * 3600),
        ];
        let result = aggregate(&config, rows);
        assert_eq!(result.zone_offset(0), Some(first));
        assert_values(&result, &[6.0]);
    }

    #[test]
    fn test_zone_offset_per_group_under_highest_priority() {
        let config = AggregationConfig::new(vec![0, 100, 200], ["high", "low"], AggregationKind::Steps)
            .unwrap()
            .with_conflict_policy(ConflictPolicy::HighestPriority);
        let rows = vec![
            value_row(50, 150, "low", 1.0).with_zone_offset(-3600),
            value_row(50, 200, "high", 1.0).with_zone_offset(3600),
            value_row(100, 120, "other", 1.0).with_zone_offset(7200),
        ];
        let result = aggregate(&config, rows);
        let west = FixedOffset::west_opt(3600).unwrap();
        assert_eq!(result.zone_offset(0), Some(west));
        assert_eq!(result.zone_offset(1), Some(west));
    }

    #[test]
    fn test_record_wider_than_i64_range_is_prorated() {
        let config = config(vec![0, 100], AggregationKind::Steps);
        let rows = vec![value_row(-10, i64::MAX, "a", 10.0)];
        for policy in [ConflictPolicy::Sum, ConflictPolicy::HighestPriority] {
            let result = aggregate(&config.clone().with_conflict_policy(policy), rows.clone());
            let value = result.value(0).unwrap();
            assert!(value > 0.0 && value < 1e-12, "{policy}: {value}");
        }
    }

    #[test]
    fn test_aggregation_is_idempotent() {
        let config = config(vec![0, 100, 200, 300], AggregationKind::Distance);
        let rows = vec![
            value_row(10, 120, "a", 11.0),
            value_row(90, 290, "b", 3.5),
            value_row(250, 250, "c", 1.0),
        ];
        let first = aggregate(&config, rows.clone());
        let second = aggregate(&config, rows);
        assert_eq!(first, second);
    }

    #[test]
    fn test_highest_priority_suppresses_lower_rank_during_overlap() {
        let config = AggregationConfig::new(vec![0, 200], ["high", "low"], AggregationKind::Steps)
            .unwrap()
            .with_conflict_policy(ConflictPolicy::HighestPriority);
        let result = aggregate(
            &config,
            vec![
                value_row(0, 100, "high", 100.0),
                value_row(50, 150, "low", 100.0),
            ],
        );
        // high covers [0, 100); low only wins [100, 150).
        assert_values(&result, &[150.0]);
    }

    #[test]
    fn test_highest_priority_equal_rank_prefers_recently_modified() {
        let config = config(vec![0, 100], AggregationKind::Steps)
            .with_conflict_policy(ConflictPolicy::HighestPriority);
        let result = aggregate(
            &config,
            vec![
                value_row(0, 100, "a", 100.0).with_last_modified(1),
                value_row(0, 100, "b", 300.0).with_last_modified(2),
            ],
        );
        assert_values(&result, &[300.0]);
    }

    #[test]
    fn test_highest_priority_splits_at_group_borders() {
        let config = AggregationConfig::new(
            vec![0, 100, 200],
            ["high", "low"],
            AggregationKind::SleepDuration,
        )
        .unwrap()
        .with_conflict_policy(ConflictPolicy::HighestPriority);
        let rows = vec![
            session_row("low-1", 0, 200, "low"),
            session_row("high-1", 50, 150, "high").with_exclusion(60, 70),
        ];
        let result = aggregate(&config, rows);
        // The high session wins [50, 150) including its excluded [60, 70).
        assert_values(&result, &[50.0 + 40.0, 50.0 + 50.0]);
    }

    #[test]
    fn test_highest_priority_counts_instants() {
        let config = config(vec![0, 100], AggregationKind::Steps)
            .with_conflict_policy(ConflictPolicy::HighestPriority);
        let result = aggregate(&config, vec![value_row(40, 40, "a", 2.0)]);
        assert_values(&result, &[2.0]);
    }

    #[test]
    fn test_inverted_record_is_skipped() {
        let config = config(vec![0, 100], AggregationKind::Steps);
        let result = aggregate(
            &config,
            vec![value_row(80, 20, "a", 50.0), value_row(20, 80, "a", 5.0)],
        );
        assert_values(&result, &[5.0]);
    }

    #[test]
    fn test_missing_required_column_fails_request() {
        let config = config(vec![0, 100], AggregationKind::Steps);
        let mut row = value_row(0, 10, "a", 1.0);
        row.source_app_id = None;
        let err = PriorityAggregator::new(&config)
            .compute_rows(vec![row])
            .unwrap_err();
        assert!(matches!(
            err,
            AggregationError::MissingColumn {
                row: 0,
                column: "source_app_id"
            }
        ));
    }

    #[test]
    fn test_cursor_error_is_returned_unchanged() {
        #[derive(Debug)]
        #[allow(dead_code)]
        enum TestError {
            Io(&'static str),
            Aggregation(AggregationError),
        }

        impl From<AggregationError> for TestError {
            fn from(err: AggregationError) -> Self {
                Self::Aggregation(err)
            }
        }

        let config = config(vec![0, 100], AggregationKind::Steps);
        let rows = vec![Ok(value_row(0, 10, "a", 1.0)), Err(TestError::Io("read failed"))];
        let err = PriorityAggregator::new(&config)
            .compute_aggregation(rows)
            .unwrap_err();
        assert!(matches!(err, TestError::Io("read failed")));
    }

    #[test]
    fn test_malformed_splits_fail_at_construction() {
        let err = AggregationConfig::new(vec![100], Vec::<String>::new(), AggregationKind::Steps)
            .unwrap_err();
        assert!(matches!(err, AggregationError::InvalidGroupSplits(_)));
        assert!(
            AggregationConfig::new(vec![0, 200, 100], Vec::<String>::new(), AggregationKind::Steps)
                .is_err()
        );
    }

    #[test]
    fn test_config_accessors() {
        let config = config(vec![0, 100, 250], AggregationKind::Steps);
        assert_eq!(config.group_count(), 2);
        assert_eq!(config.group_bounds(1), Some((100, 250)));
        assert_eq!(config.group_bounds(2), None);
        assert_eq!(config.time_range(), (0, 250));
        assert_eq!(config.conflict_policy(), ConflictPolicy::Sum);
    }
}
