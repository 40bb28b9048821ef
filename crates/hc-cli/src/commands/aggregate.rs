//! Aggregate command for bucketing stored records by time.
//!
//! This module implements `hc aggregate` with fixed-length (`--bucket`) or
//! calendar-day (`--days`) groups and output formats (human-readable, JSON).

use std::fmt::Write as _;
use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, NaiveTime};
use clap::Args;
use hc_core::{
    AggregationConfig, AggregationJob, AggregationKind, AggregationResult, AggregationVariant,
    ConflictPolicy, compute_batch, day_splits, duration_splits,
};
use hc_db::Database;
use serde::Serialize;

use super::util::{format_duration, parse_bucket, parse_datetime, parse_priority};
use crate::Config;

#[derive(Debug, Args)]
pub struct AggregateArgs {
    /// Kind to aggregate. Repeat to aggregate several kinds in parallel.
    #[arg(long = "kind", required = true)]
    pub kinds: Vec<AggregationKind>,

    /// Start of the range (RFC 3339 or relative, e.g. "2 days ago").
    #[arg(long)]
    pub start: String,

    /// End of the range, exclusive.
    #[arg(long)]
    pub end: String,

    /// Fixed bucket length, e.g. 15m, 1h, 1d. The last bucket is truncated at --end.
    #[arg(long, conflicts_with = "days")]
    pub bucket: Option<String>,

    /// One bucket per calendar day, in the offset of --start.
    #[arg(long)]
    pub days: bool,

    /// Comma-separated source apps, most trusted first. Overrides the config.
    #[arg(long)]
    pub priority: Option<String>,

    /// How overlapping records from several sources combine.
    #[arg(long)]
    pub policy: Option<ConflictPolicy>,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

/// How the requested range is cut into groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grouping {
    /// The whole range is one group.
    Single,
    /// Fixed-length buckets of this many milliseconds.
    Fixed(i64),
    /// Local calendar days.
    Days,
}

/// The aggregate of one kind over the requested groups.
#[derive(Debug)]
pub struct KindReport {
    pub kind: AggregationKind,
    pub policy: ConflictPolicy,
    pub result: AggregationResult,
}

/// Computed aggregation output.
#[derive(Debug)]
pub struct AggregateReport {
    pub splits: Vec<i64>,
    /// Offset used to label groups that no record assigned an offset to.
    pub offset: FixedOffset,
    pub kinds: Vec<KindReport>,
}

/// Builds group boundaries for `[start, end)`.
pub fn build_splits(
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
    grouping: Grouping,
) -> Result<Vec<i64>> {
    if end <= start {
        anyhow::bail!("--end ({end}) must be after --start ({start})");
    }
    let (start_ms, end_ms) = (start.timestamp_millis(), end.timestamp_millis());
    let splits = match grouping {
        Grouping::Single => vec![start_ms, end_ms],
        Grouping::Fixed(step_ms) => duration_splits(start_ms, end_ms, step_ms)?,
        Grouping::Days => {
            let offset = *start.offset();
            let first_day = start.date_naive();
            let local_end = end.with_timezone(&offset);
            let mut days = (local_end.date_naive() - first_day).num_days();
            if local_end.time() != NaiveTime::MIN {
                days += 1;
            }
            let days = u32::try_from(days.max(1)).context("too many days in range")?;
            day_splits(first_day, days, offset)?
        }
    };
    Ok(splits)
}

/// Aggregates every kind over the same groups.
///
/// A single kind streams straight from the database; several kinds are loaded
/// up front and computed on the rayon pool.
pub fn aggregate(
    db: &Database,
    kinds: &[AggregationKind],
    splits: &[i64],
    priority: &[String],
    policy: ConflictPolicy,
) -> Result<Vec<KindReport>> {
    let configs = kinds
        .iter()
        .map(|&kind| {
            AggregationConfig::new(splits.to_vec(), priority.iter().cloned(), kind)
                .map(|config| config.with_conflict_policy(policy))
        })
        .collect::<Result<Vec<_>, _>>()
        .context("invalid aggregation request")?;

    tracing::debug!(
        kinds = configs.len(),
        groups = splits.len().saturating_sub(1),
        %policy,
        "running aggregation"
    );

    if let [config] = configs.as_slice() {
        let result = db
            .aggregate(config)
            .with_context(|| format!("failed to aggregate {}", config.kind()))?;
        return Ok(vec![KindReport {
            kind: config.kind(),
            policy,
            result,
        }]);
    }

    let mut jobs = Vec::with_capacity(configs.len());
    for config in configs {
        let (start, end) = config.time_range();
        let rows = db
            .load_rows(config.kind(), start, end)
            .with_context(|| format!("failed to load {} records", config.kind()))?;
        jobs.push(AggregationJob { config, rows });
    }

    kinds
        .iter()
        .zip(compute_batch(jobs))
        .map(|(&kind, result)| {
            Ok(KindReport {
                kind,
                policy,
                result: result.with_context(|| format!("failed to aggregate {kind}"))?,
            })
        })
        .collect()
}

// ========== Formatting ==========

fn format_value(kind: AggregationKind, value: f64) -> String {
    match kind.variant() {
        AggregationVariant::ValueColumn => format!("{value:.2}"),
        AggregationVariant::SessionDuration => format_duration(value),
    }
}

fn group_time(ms: i64, offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.with_timezone(&offset))
}

/// Formats the report as human-readable text.
pub fn format_report(report: &AggregateReport) -> String {
    let mut output = String::new();
    for (index, kind_report) in report.kinds.iter().enumerate() {
        if index > 0 {
            output.push('\n');
        }
        let result = &kind_report.result;
        writeln!(
            output,
            "{} ({}, {} groups)",
            kind_report.kind,
            kind_report.policy,
            result.len()
        )
        .unwrap();
        for (group, aggregate) in result.iter() {
            let offset = aggregate.zone_offset.unwrap_or(report.offset);
            let label = report
                .splits
                .get(group)
                .and_then(|&ms| group_time(ms, offset))
                .map_or_else(|| "?".to_string(), |dt| dt.format("%Y-%m-%d %H:%M %:z").to_string());
            writeln!(
                output,
                "  {label}  {}",
                format_value(kind_report.kind, aggregate.value)
            )
            .unwrap();
        }
        writeln!(
            output,
            "  Total: {}",
            format_value(kind_report.kind, result.total())
        )
        .unwrap();
    }
    output
}

/// JSON report structure.
#[derive(Debug, Serialize)]
pub struct JsonReport {
    pub kinds: Vec<JsonKind>,
}

#[derive(Debug, Serialize)]
pub struct JsonKind {
    pub kind: AggregationKind,
    pub policy: ConflictPolicy,
    pub groups: Vec<JsonGroup>,
    pub total: f64,
}

#[derive(Debug, Serialize)]
pub struct JsonGroup {
    pub start: String,
    pub end: String,
    pub value: f64,
    /// Offset of the first record that contributed to the group.
    pub zone_offset_seconds: Option<i32>,
}

/// Formats the report as JSON.
pub fn format_report_json(report: &AggregateReport) -> Result<String> {
    let mut kinds = Vec::with_capacity(report.kinds.len());
    for kind_report in &report.kinds {
        let mut groups = Vec::with_capacity(kind_report.result.len());
        for (group, aggregate) in kind_report.result.iter() {
            let offset = aggregate.zone_offset.unwrap_or(report.offset);
            let bound = |index: usize| {
                report
                    .splits
                    .get(index)
                    .and_then(|&ms| group_time(ms, offset))
                    .map(|dt| dt.to_rfc3339())
                    .with_context(|| format!("group {group} has no boundary {index}"))
            };
            groups.push(JsonGroup {
                start: bound(group)?,
                end: bound(group + 1)?,
                value: aggregate.value,
                zone_offset_seconds: aggregate.zone_offset.map(|offset| offset.local_minus_utc()),
            });
        }
        kinds.push(JsonKind {
            kind: kind_report.kind,
            policy: kind_report.policy,
            groups,
            total: kind_report.result.total(),
        });
    }

    Ok(serde_json::to_string_pretty(&JsonReport { kinds })?)
}

// ========== Public Interface ==========

/// Runs the aggregate command.
pub fn run<W: Write>(
    writer: &mut W,
    args: &AggregateArgs,
    db: &Database,
    config: &Config,
) -> Result<()> {
    let start = parse_datetime(&args.start).context("invalid --start")?;
    let end = parse_datetime(&args.end).context("invalid --end")?;
    let grouping = match (&args.bucket, args.days) {
        (Some(bucket), _) => Grouping::Fixed(parse_bucket(bucket)?),
        (None, true) => Grouping::Days,
        (None, false) => Grouping::Single,
    };
    let splits = build_splits(start, end, grouping)?;

    let priority = args
        .priority
        .as_deref()
        .map_or_else(|| config.priority.clone(), parse_priority);
    let policy = args.policy.unwrap_or(config.conflict_policy);

    let kinds = aggregate(db, &args.kinds, &splits, &priority, policy)?;
    let report = AggregateReport {
        splits,
        offset: *start.offset(),
        kinds,
    };

    if args.json {
        writeln!(writer, "{}", format_report_json(&report)?)?;
    } else {
        write!(writer, "{}", format_report(&report))?;
    }
    Ok(())
}
