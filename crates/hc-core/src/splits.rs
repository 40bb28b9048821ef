//! Group boundary construction and validation.

use chrono::{Days, FixedOffset, NaiveDate, NaiveTime, TimeZone};

use crate::error::AggregationError;

/// Upper bound on groups per request.
pub const MAX_GROUP_COUNT: usize = 10_000;

/// Checks that `splits` has at least two entries and never decreases.
pub fn validate_splits(splits: &[i64]) -> Result<(), AggregationError> {
    if splits.len() < 2 {
        return Err(AggregationError::InvalidGroupSplits(format!(
            "need at least 2 boundaries, got {}",
            splits.len()
        )));
    }
    if splits.len() - 1 > MAX_GROUP_COUNT {
        return Err(AggregationError::InvalidGroupSplits(format!(
            "{} groups exceeds the limit of {MAX_GROUP_COUNT}",
            splits.len() - 1
        )));
    }
    if let Some(index) = splits.windows(2).position(|w| w[1] < w[0]) {
        return Err(AggregationError::InvalidGroupSplits(format!(
            "boundary {} ({}) is before boundary {} ({})",
            index + 1,
            splits[index + 1],
            index,
            splits[index]
        )));
    }
    Ok(())
}

/// Splits `[start, end)` into fixed-length buckets; the last one may be shorter.
pub fn duration_splits(start: i64, end: i64, step_ms: i64) -> Result<Vec<i64>, AggregationError> {
    if step_ms <= 0 {
        return Err(AggregationError::InvalidGroupSplits(format!(
            "bucket length must be positive, got {step_ms}ms"
        )));
    }
    if end <= start {
        return Err(AggregationError::InvalidGroupSplits(format!(
            "range end {end} is not after start {start}"
        )));
    }

    let mut splits = vec![start];
    let mut boundary = start;
    while boundary < end {
        boundary = boundary.saturating_add(step_ms).min(end);
        splits.push(boundary);
        if splits.len() - 1 > MAX_GROUP_COUNT {
            return Err(AggregationError::InvalidGroupSplits(format!(
                "more than {MAX_GROUP_COUNT} buckets of {step_ms}ms"
            )));
        }
    }
    Ok(splits)
}

/// One group per local calendar day starting at `first_day`, with midnights
/// taken in `offset`.
pub fn day_splits(
    first_day: NaiveDate,
    days: u32,
    offset: FixedOffset,
) -> Result<Vec<i64>, AggregationError> {
    if days == 0 {
        return Err(AggregationError::InvalidGroupSplits(
            "day count must be positive".to_string(),
        ));
    }

    (0..=u64::from(days))
        .map(|i| {
            let day = first_day.checked_add_days(Days::new(i)).ok_or_else(|| {
                AggregationError::InvalidGroupSplits(format!("{first_day} + {i} days overflows"))
            })?;
            let midnight = day.and_time(NaiveTime::MIN);
            offset
                .from_local_datetime(&midnight)
                .single()
                .map(|dt| dt.timestamp_millis())
                .ok_or_else(|| {
                    AggregationError::InvalidGroupSplits(format!("no local midnight on {day}"))
                })
        })
        .collect()
}
