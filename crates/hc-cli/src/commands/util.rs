//! Shared utilities for CLI commands.

use std::sync::LazyLock;

use anyhow::Context;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use regex::Regex;

/// Pre-compiled regex for relative time parsing.
static RELATIVE_TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\s+(minute|hour|day|week)s?\s+ago$").unwrap());

/// Pre-compiled regex for bucket lengths such as `15m` or `1d`.
static BUCKET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)\s*(s|m|h|d|w)$").unwrap());

/// Conservative bounds for relative time parsing (~1000 years in minutes).
const MAX_RELATIVE_MINUTES: i64 = 1000 * 365 * 24 * 60;

/// Parse a datetime string as either RFC 3339 or relative time.
///
/// RFC 3339 input keeps its offset. Relative input is anchored at now, in UTC.
///
/// Supports:
/// - RFC 3339: "2026-01-15T10:30:00+02:00"
/// - Relative: "2 hours ago", "30 minutes ago", "1 day ago", "1 week ago"
pub fn parse_datetime(s: &str) -> anyhow::Result<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt);
    }

    let Some(caps) = RELATIVE_TIME_RE.captures(s) else {
        anyhow::bail!(
            "Invalid datetime: {s}. Use RFC 3339 (e.g., 2026-01-15T10:30:00Z) or relative (e.g., '2 hours ago')"
        );
    };

    let n: i64 = caps[1]
        .parse()
        .context("failed to parse number in relative time")?;

    let (max_for_unit, minutes_per_unit) = match &caps[2] {
        "minute" => (MAX_RELATIVE_MINUTES, 1),
        "hour" => (MAX_RELATIVE_MINUTES / 60, 60),
        "day" => (MAX_RELATIVE_MINUTES / (60 * 24), 60 * 24),
        "week" => (MAX_RELATIVE_MINUTES / (60 * 24 * 7), 60 * 24 * 7),
        unit => anyhow::bail!("Unknown time unit: {unit}"),
    };

    if n > max_for_unit {
        anyhow::bail!("Relative time value too large: {n} {}", &caps[2]);
    }

    let duration = Duration::minutes(n * minutes_per_unit);
    Ok((Utc::now() - duration).fixed_offset())
}

/// Parse a bucket length (`30s`, `15m`, `1h`, `1d`, `1w`) into milliseconds.
pub fn parse_bucket(s: &str) -> anyhow::Result<i64> {
    let Some(caps) = BUCKET_RE.captures(s.trim()) else {
        anyhow::bail!("Invalid bucket length: {s}. Use a number and unit, e.g. 15m, 1h, 1d");
    };
    let n: i64 = caps[1]
        .parse()
        .with_context(|| format!("bucket length too large: {s}"))?;
    if n == 0 {
        anyhow::bail!("bucket length must be positive: {s}");
    }
    let unit_ms = match &caps[2] {
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        "w" => 7 * 86_400_000,
        unit => anyhow::bail!("Unknown bucket unit: {unit}"),
    };
    n.checked_mul(unit_ms)
        .with_context(|| format!("bucket length too large: {s}"))
}

/// Splits a comma-separated priority list, dropping blanks.
pub fn parse_priority(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|source| !source.is_empty())
        .map(str::to_string)
        .collect()
}

/// Formats milliseconds as a duration string: "Xh Ym", or "Xm" under an hour.
pub fn format_duration(ms: f64) -> String {
    #[allow(clippy::cast_possible_truncation)]
    let total_minutes = (ms.max(0.0) / 60_000.0).round() as i64;
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;

    if hours >= 1 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}
