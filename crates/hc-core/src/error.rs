//! Errors raised while configuring or running an aggregation.

use thiserror::Error;

use crate::kind::UnsupportedKind;

/// Aggregation errors.
///
/// Configuration problems surface from [`AggregationConfig::new`](crate::AggregationConfig::new)
/// before any row is read. Row-shape problems abort the request that hit them.
#[derive(Debug, Error)]
pub enum AggregationError {
    /// The group split list is malformed.
    #[error("invalid group splits: {0}")]
    InvalidGroupSplits(String),
    /// The aggregation kind selector names nothing this engine supports.
    #[error(transparent)]
    UnsupportedKind(#[from] UnsupportedKind),
    /// A row lacks a column the selected kind cannot do without.
    #[error("row {row} is missing required column `{column}`")]
    MissingColumn { row: usize, column: &'static str },
    /// A row carries a zone offset outside +/-24h.
    #[error("row {row} has invalid zone offset of {seconds}s")]
    InvalidZoneOffset { row: usize, seconds: i32 },
}
