//! Storage layer for health records.
//!
//! Persists value records and session entities using `rusqlite`, and serves
//! them to the aggregation engine as an ordered row cursor.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! To aggregate several kinds in parallel, load each kind's rows with
//! [`Database::load_rows`] and hand them to [`hc_core::compute_batch`].
//!
//! # Schema
//!
//! Each value-column kind has its own table (`steps_records`, `distance_records`, ...)
//! holding one numeric column next to the common record columns. Session kinds
//! have a session table and a child table of stages or segments:
//!
//! | kind                | session table       | child table         | excluded child types                 |
//! |---------------------|---------------------|---------------------|--------------------------------------|
//! | `sleep_duration`    | `sleep_sessions`    | `sleep_stages`      | `awake`, `awake_in_bed`, `out_of_bed` |
//! | `exercise_duration` | `exercise_sessions` | `exercise_segments` | `pause`, `rest`                      |
//!
//! ## Timestamp Format
//!
//! Times are stored as INTEGER milliseconds since the Unix epoch. The offset of
//! the local time at the record start is stored separately, in seconds.

use std::path::Path;

use hc_core::{
    AggregationConfig, AggregationError, AggregationKind, AggregationResult, AggregationRow,
    AggregationVariant, PriorityAggregator,
};
use rusqlite::{Connection, params};
use thiserror::Error;

/// Largest zone offset accepted on insert (+/-18h).
const MAX_ZONE_OFFSET_SECONDS: i32 = 18 * 3600;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// The aggregation engine rejected the request or a row.
    #[error("aggregation failed: {0}")]
    Aggregation(#[from] AggregationError),
    /// A record failed validation on insert.
    #[error("invalid record {id}: {message}")]
    InvalidRecord { id: String, message: String },
    /// A value record was stored under a session kind or vice versa.
    #[error("{kind} does not store {expected} records")]
    WrongVariant {
        kind: AggregationKind,
        expected: AggregationVariant,
    },
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

/// A record carrying one numeric value over `[start_time, end_time)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueRecord {
    pub id: String,
    pub app_id: String,
    pub start_time: i64,
    pub end_time: i64,
    pub start_zone_offset: i32,
    pub last_modified_time: i64,
    pub value: f64,
}

/// A sleep or exercise session with its stages or segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: String,
    pub app_id: String,
    pub start_time: i64,
    pub end_time: i64,
    pub start_zone_offset: i32,
    pub last_modified_time: i64,
    pub title: Option<String>,
    pub segments: Vec<SessionSegment>,
}

/// A sleep stage or exercise segment inside a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSegment {
    pub start_time: i64,
    pub end_time: i64,
    /// Stage or segment type, e.g. `deep`, `awake`, `pause`.
    pub kind: String,
}

/// Number of stored records for one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindCount {
    pub kind: AggregationKind,
    pub records: i64,
}

/// Where a kind lives in the schema.
enum Storage {
    Value {
        table: &'static str,
        column: &'static str,
    },
    Session {
        table: &'static str,
        children: &'static str,
        excluded: &'static [&'static str],
    },
}

const fn storage(kind: AggregationKind) -> Storage {
    match kind {
        AggregationKind::Steps => Storage::Value {
            table: "steps_records",
            column: "count",
        },
        AggregationKind::Distance => Storage::Value {
            table: "distance_records",
            column: "distance_meters",
        },
        AggregationKind::ActiveCaloriesBurned => Storage::Value {
            table: "active_calories_burned_records",
            column: "energy_kcal",
        },
        AggregationKind::TotalCaloriesBurned => Storage::Value {
            table: "total_calories_burned_records",
            column: "energy_kcal",
        },
        AggregationKind::FloorsClimbed => Storage::Value {
            table: "floors_climbed_records",
            column: "floors",
        },
        AggregationKind::ElevationGained => Storage::Value {
            table: "elevation_gained_records",
            column: "elevation_meters",
        },
        AggregationKind::WheelchairPushes => Storage::Value {
            table: "wheelchair_pushes_records",
            column: "count",
        },
        AggregationKind::SleepDuration => Storage::Session {
            table: "sleep_sessions",
            children: "sleep_stages",
            excluded: &["awake", "awake_in_bed", "out_of_bed"],
        },
        AggregationKind::ExerciseDuration => Storage::Session {
            table: "exercise_sessions",
            children: "exercise_segments",
            excluded: &["pause", "rest"],
        },
    }
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        for kind in AggregationKind::ALL {
            let ddl = match storage(kind) {
                Storage::Value { table, column } => format!(
                    "
                    CREATE TABLE IF NOT EXISTS {table} (
                        id TEXT PRIMARY KEY,
                        app_id TEXT NOT NULL,
                        start_time INTEGER NOT NULL,
                        end_time INTEGER NOT NULL,
                        start_zone_offset INTEGER NOT NULL,
                        last_modified_time INTEGER NOT NULL,
                        {column} REAL NOT NULL
                    );

                    CREATE INDEX IF NOT EXISTS idx_{table}_start ON {table}(start_time);
                    "
                ),
                Storage::Session {
                    table, children, ..
                } => format!(
                    "
                    CREATE TABLE IF NOT EXISTS {table} (
                        id TEXT PRIMARY KEY,
                        app_id TEXT NOT NULL,
                        start_time INTEGER NOT NULL,
                        end_time INTEGER NOT NULL,
                        start_zone_offset INTEGER NOT NULL,
                        last_modified_time INTEGER NOT NULL,
                        title TEXT
                    );

                    CREATE INDEX IF NOT EXISTS idx_{table}_start ON {table}(start_time);

                    CREATE TABLE IF NOT EXISTS {children} (
                        session_id TEXT NOT NULL,
                        start_time INTEGER NOT NULL,
                        end_time INTEGER NOT NULL,
                        type TEXT NOT NULL,
                        FOREIGN KEY (session_id) REFERENCES {table}(id) ON DELETE CASCADE
                    );

                    CREATE INDEX IF NOT EXISTS idx_{children}_session ON {children}(session_id);
                    "
                ),
            };
            self.conn.execute_batch(&ddl)?;
        }
        Ok(())
    }

    /// Inserts value records for a value-column kind, ignoring duplicates by ID.
    pub fn insert_value_records(
        &mut self,
        kind: AggregationKind,
        records: &[ValueRecord],
    ) -> Result<usize, DbError> {
        let Storage::Value { table, column } = storage(kind) else {
            return Err(DbError::WrongVariant {
                kind,
                expected: AggregationVariant::ValueColumn,
            });
        };
        for record in records {
            validate_span(
                &record.id,
                record.start_time,
                record.end_time,
                record.start_zone_offset,
            )?;
        }
        if records.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(&format!(
                "
                INSERT OR IGNORE INTO {table}
                (id, app_id, start_time, end_time, start_zone_offset, last_modified_time, {column})
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "
            ))?;
            for record in records {
                inserted += stmt.execute(params![
                    record.id,
                    record.app_id,
                    record.start_time,
                    record.end_time,
                    record.start_zone_offset,
                    record.last_modified_time,
                    record.value,
                ])?;
            }
        }
        tx.commit()?;
        tracing::debug!(%kind, inserted, "inserted value records");
        Ok(inserted)
    }

    /// Inserts sessions with their segments, ignoring duplicate session IDs.
    pub fn insert_sessions(
        &mut self,
        kind: AggregationKind,
        sessions: &[SessionRecord],
    ) -> Result<usize, DbError> {
        let Storage::Session {
            table, children, ..
        } = storage(kind)
        else {
            return Err(DbError::WrongVariant {
                kind,
                expected: AggregationVariant::SessionDuration,
            });
        };
        for session in sessions {
            validate_span(
                &session.id,
                session.start_time,
                session.end_time,
                session.start_zone_offset,
            )?;
            for segment in &session.segments {
                if segment.end_time < segment.start_time {
                    return Err(DbError::InvalidRecord {
                        id: session.id.clone(),
                        message: format!(
                            "{} segment ends at {} before it starts at {}",
                            segment.kind, segment.end_time, segment.start_time
                        ),
                    });
                }
            }
        }
        if sessions.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut session_stmt = tx.prepare(&format!(
                "
                INSERT OR IGNORE INTO {table}
                (id, app_id, start_time, end_time, start_zone_offset, last_modified_time, title)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "
            ))?;
            let mut segment_stmt = tx.prepare(&format!(
                "INSERT INTO {children} (session_id, start_time, end_time, type) VALUES (?, ?, ?, ?)"
            ))?;
            for session in sessions {
                let written = session_stmt.execute(params![
                    session.id,
                    session.app_id,
                    session.start_time,
                    session.end_time,
                    session.start_zone_offset,
                    session.last_modified_time,
                    session.title,
                ])?;
                if written == 0 {
                    continue;
                }
                inserted += written;
                for segment in &session.segments {
                    segment_stmt.execute(params![
                        session.id,
                        segment.start_time,
                        segment.end_time,
                        segment.kind,
                    ])?;
                }
            }
        }
        tx.commit()?;
        tracing::debug!(%kind, inserted, "inserted sessions");
        Ok(inserted)
    }

    /// Counts stored records (sessions for session kinds) per kind.
    pub fn record_counts(&self) -> Result<Vec<KindCount>, DbError> {
        let mut counts = Vec::with_capacity(AggregationKind::ALL.len());
        for kind in AggregationKind::ALL {
            let table = match storage(kind) {
                Storage::Value { table, .. } | Storage::Session { table, .. } => table,
            };
            let records: i64 =
                self.conn
                    .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                        row.get(0)
                    })?;
            counts.push(KindCount { kind, records });
        }
        Ok(counts)
    }

    /// Runs an aggregation request, streaming matching rows straight from SQLite.
    pub fn aggregate(&self, config: &AggregationConfig) -> Result<AggregationResult, DbError> {
        let kind = config.kind();
        let (start, end) = config.time_range();
        let mut stmt = self.conn.prepare(&select_rows_sql(kind))?;
        let rows = stmt.query_map(params![start, end], |row| read_row(row, kind.variant()))?;
        PriorityAggregator::new(config).compute_aggregation(rows.map(|row| row.map_err(DbError::from)))
    }

    /// Loads the rows an aggregation over `[start, end)` would read, in cursor order.
    pub fn load_rows(
        &self,
        kind: AggregationKind,
        start: i64,
        end: i64,
    ) -> Result<Vec<AggregationRow>, DbError> {
        let mut stmt = self.conn.prepare(&select_rows_sql(kind))?;
        let rows = stmt.query_map(params![start, end], |row| read_row(row, kind.variant()))?;
        let mut loaded = Vec::new();
        for row in rows {
            loaded.push(row?);
        }
        Ok(loaded)
    }
}

fn validate_span(
    id: &str,
    start_time: i64,
    end_time: i64,
    start_zone_offset: i32,
) -> Result<(), DbError> {
    if id.trim().is_empty() {
        return Err(DbError::InvalidRecord {
            id: id.to_string(),
            message: "missing id".to_string(),
        });
    }
    if end_time < start_time {
        return Err(DbError::InvalidRecord {
            id: id.to_string(),
            message: format!("ends at {end_time} before it starts at {start_time}"),
        });
    }
    if start_zone_offset.abs() > MAX_ZONE_OFFSET_SECONDS {
        return Err(DbError::InvalidRecord {
            id: id.to_string(),
            message: format!("zone offset {start_zone_offset}s is out of range"),
        });
    }
    Ok(())
}

/// Rows overlapping `[?1, ?2)`, including zero-length rows at `?1`, sorted by
/// start time. Session rows are joined with their excluded children so each
/// session's rows are contiguous.
fn select_rows_sql(kind: AggregationKind) -> String {
    match storage(kind) {
        Storage::Value { table, column } => format!(
            "
            SELECT id, start_time, end_time, app_id, last_modified_time, start_zone_offset, {column}
            FROM {table}
            WHERE start_time < ?2 AND end_time >= ?1
            ORDER BY start_time ASC, id ASC
            "
        ),
        Storage::Session {
            table,
            children,
            excluded,
        } => {
            let excluded = excluded
                .iter()
                .map(|kind| format!("'{kind}'"))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "
                SELECT s.id, s.start_time, s.end_time, s.app_id, s.last_modified_time,
                       s.start_zone_offset, c.start_time, c.end_time
                FROM {table} s
                LEFT JOIN {children} c ON c.session_id = s.id AND c.type IN ({excluded})
                WHERE s.start_time < ?2 AND s.end_time >= ?1
                ORDER BY s.start_time ASC, s.id ASC, c.start_time ASC
                "
            )
        }
    }
}

fn read_row(
    row: &rusqlite::Row<'_>,
    variant: AggregationVariant,
) -> rusqlite::Result<AggregationRow> {
    let mut aggregation_row = AggregationRow {
        entity_id: row.get(0)?,
        start_time: row.get(1)?,
        end_time: row.get(2)?,
        source_app_id: row.get(3)?,
        last_modified_time: row.get(4)?,
        start_zone_offset_seconds: row.get(5)?,
        ..AggregationRow::default()
    };
    match variant {
        AggregationVariant::ValueColumn => {
            aggregation_row.value = row.get(6)?;
        }
        AggregationVariant::SessionDuration => {
            aggregation_row.exclusion_start = row.get(6)?;
            aggregation_row.exclusion_end = row.get(7)?;
        }
    }
    Ok(aggregation_row)
}
