//! Import command for loading health records into the local `SQLite` store.
//!
//! Each input line is one JSON object. Value kinds carry a `value`; session
//! kinds carry optional `segments` (sleep stages or exercise segments):
//!
//! ```text
//! {"kind":"steps","app":"com.watch","start":"2025-01-01T08:00:00+01:00","end":"2025-01-01T08:30:00+01:00","value":1200}
//! {"kind":"sleep_duration","app":"com.ring","start":"...","end":"...","segments":[{"start":"...","end":"...","type":"awake"}]}
//! ```

use std::collections::HashMap;
use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use clap::Args;
use hc_core::{AggregationKind, AggregationVariant};
use hc_db::{Database, SessionRecord, SessionSegment, ValueRecord};
use serde::Deserialize;

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Default source app to apply when incoming records omit `app`.
    #[arg(long)]
    pub app: Option<String>,
}

/// Records parsed from one import, grouped by kind.
#[derive(Debug, Default)]
pub struct ParsedRecords {
    pub values: HashMap<AggregationKind, Vec<ValueRecord>>,
    pub sessions: HashMap<AggregationKind, Vec<SessionRecord>>,
}

impl ParsedRecords {
    pub fn len(&self) -> usize {
        self.values.values().map(Vec::len).sum::<usize>()
            + self.sessions.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn run<W: Write>(writer: &mut W, args: &ImportArgs, db: &mut Database) -> Result<usize> {
    let stdin = io::stdin();
    let records = parse_records(stdin.lock(), args.app.as_deref(), Utc::now())?;
    let parsed = records.len();
    let inserted = store_records(db, &records)?;
    writeln!(writer, "Imported {inserted} of {parsed} records.")?;
    Ok(inserted)
}

/// Writes parsed records kind by kind, returning how many were new.
pub fn store_records(db: &mut Database, records: &ParsedRecords) -> Result<usize> {
    let mut inserted = 0;
    for kind in AggregationKind::ALL {
        if let Some(values) = records.values.get(&kind) {
            inserted += db
                .insert_value_records(kind, values)
                .with_context(|| format!("failed to store {kind} records"))?;
        }
        if let Some(sessions) = records.sessions.get(&kind) {
            inserted += db
                .insert_sessions(kind, sessions)
                .with_context(|| format!("failed to store {kind} sessions"))?;
        }
    }
    Ok(inserted)
}

pub fn parse_records<R: BufRead>(
    reader: R,
    default_app: Option<&str>,
    now: DateTime<Utc>,
) -> Result<ParsedRecords> {
    let mut records = ParsedRecords::default();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", idx + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let parsed: ImportRecord = serde_json::from_str(trimmed)
            .with_context(|| format!("invalid JSON on line {}", idx + 1))?;
        let kind = parsed.kind;
        match parsed
            .into_record(default_app, now)
            .with_context(|| format!("invalid record on line {}", idx + 1))?
        {
            Imported::Value(record) => records.values.entry(kind).or_default().push(record),
            Imported::Session(session) => records.sessions.entry(kind).or_default().push(session),
        }
    }
    Ok(records)
}

#[derive(Debug, Deserialize)]
struct ImportRecord {
    kind: AggregationKind,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    app: Option<String>,
    start: String,
    end: String,
    #[serde(default)]
    last_modified: Option<String>,
    #[serde(default)]
    value: Option<f64>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    segments: Vec<ImportSegment>,
}

#[derive(Debug, Deserialize)]
struct ImportSegment {
    start: String,
    end: String,
    #[serde(rename = "type")]
    kind: String,
}

enum Imported {
    Value(ValueRecord),
    Session(SessionRecord),
}

fn parse_time(field: &str, value: &str) -> Result<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(value).with_context(|| format!("invalid {field}: {value}"))
}

impl ImportRecord {
    fn into_record(self, default_app: Option<&str>, now: DateTime<Utc>) -> Result<Imported> {
        let app_id = match self.app {
            Some(app) if !app.trim().is_empty() => app,
            _ => default_app
                .map(str::to_string)
                .filter(|val| !val.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("missing app"))?,
        };
        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let start = parse_time("start", &self.start)?;
        let end = parse_time("end", &self.end)?;
        if end < start {
            anyhow::bail!("end {} is before start {}", self.end, self.start);
        }
        let last_modified_time = match self.last_modified.as_deref() {
            Some(value) => parse_time("last_modified", value)?.timestamp_millis(),
            None => now.timestamp_millis(),
        };
        let start_zone_offset = start.offset().local_minus_utc();

        match self.kind.variant() {
            AggregationVariant::ValueColumn => {
                if !self.segments.is_empty() {
                    anyhow::bail!("{} records do not take segments", self.kind);
                }
                let value = self
                    .value
                    .ok_or_else(|| anyhow::anyhow!("missing value for {}", self.kind))?;
                if !value.is_finite() {
                    anyhow::bail!("value must be finite");
                }
                Ok(Imported::Value(ValueRecord {
                    id,
                    app_id,
                    start_time: start.timestamp_millis(),
                    end_time: end.timestamp_millis(),
                    start_zone_offset,
                    last_modified_time,
                    value,
                }))
            }
            AggregationVariant::SessionDuration => {
                if self.value.is_some() {
                    anyhow::bail!("{} sessions do not take a value", self.kind);
                }
                let segments = self
                    .segments
                    .into_iter()
                    .map(|segment| {
                        Ok(SessionSegment {
                            start_time: parse_time("segment start", &segment.start)?
                                .timestamp_millis(),
                            end_time: parse_time("segment end", &segment.end)?.timestamp_millis(),
                            kind: segment.kind,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Imported::Session(SessionRecord {
                    id,
                    app_id,
                    start_time: start.timestamp_millis(),
                    end_time: end.timestamp_millis(),
                    start_zone_offset,
                    last_modified_time,
                    title: self.title,
                    segments,
                }))
            }
        }
    }
}
