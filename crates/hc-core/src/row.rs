//! Storage rows and the pushback cursor the aggregator reads them through.

use std::iter::Fuse;

/// One row as produced by the storage collaborator.
///
/// Every column is optional so that row-shape problems are reported by the
/// aggregator instead of the storage layer. Which columns are required depends
/// on the aggregation kind:
///
/// - always: `start_time`, `end_time`, `source_app_id`, `last_modified_time`,
///   `start_zone_offset_seconds`
/// - value-column kinds: `value`
/// - session kinds: `entity_id`
///
/// `exclusion_start`/`exclusion_end` are only read for session kinds, and a row
/// missing either is treated as carrying no exclusion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationRow {
    pub entity_id: Option<String>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub source_app_id: Option<String>,
    pub last_modified_time: Option<i64>,
    pub start_zone_offset_seconds: Option<i32>,
    pub value: Option<f64>,
    pub exclusion_start: Option<i64>,
    pub exclusion_end: Option<i64>,
}

impl AggregationRow {
    /// Creates a row with the columns every kind requires.
    ///
    /// The zone offset defaults to UTC and the last-modified time to `0`.
    pub fn new(start_time: i64, end_time: i64, source_app_id: impl Into<String>) -> Self {
        Self {
            start_time: Some(start_time),
            end_time: Some(end_time),
            source_app_id: Some(source_app_id.into()),
            last_modified_time: Some(0),
            start_zone_offset_seconds: Some(0),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    #[must_use]
    pub fn with_entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    #[must_use]
    pub fn with_exclusion(mut self, start: i64, end: i64) -> Self {
        self.exclusion_start = Some(start);
        self.exclusion_end = Some(end);
        self
    }

    #[must_use]
    pub fn with_last_modified(mut self, last_modified_time: i64) -> Self {
        self.last_modified_time = Some(last_modified_time);
        self
    }

    #[must_use]
    pub fn with_zone_offset(mut self, seconds: i32) -> Self {
        self.start_zone_offset_seconds = Some(seconds);
        self
    }

    /// The exclusion sub-interval carried by this row, if both ends are present.
    pub const fn exclusion(&self) -> Option<(i64, i64)> {
        match (self.exclusion_start, self.exclusion_end) {
            (Some(start), Some(end)) => Some((start, end)),
            _ => None,
        }
    }
}

/// A forward-only cursor over fallible rows with one row of lookahead.
///
/// Grouping rows into entities peeks at the next row instead of rewinding, so
/// the underlying iterator is read exactly once.
pub struct RowCursor<I> {
    rows: Fuse<I>,
    peeked: Option<AggregationRow>,
    consumed: usize,
}

impl<I, E> RowCursor<I>
where
    I: Iterator<Item = Result<AggregationRow, E>>,
{
    pub fn new<T>(rows: T) -> Self
    where
        T: IntoIterator<IntoIter = I>,
    {
        Self {
            rows: rows.into_iter().fuse(),
            peeked: None,
            consumed: 0,
        }
    }

    /// Returns the next row without consuming it.
    pub fn peek_row(&mut self) -> Result<Option<&AggregationRow>, E> {
        if self.peeked.is_none() {
            self.peeked = self.rows.next().transpose()?;
        }
        Ok(self.peeked.as_ref())
    }

    /// Consumes and returns the next row.
    pub fn next_row(&mut self) -> Result<Option<AggregationRow>, E> {
        let row = match self.peeked.take() {
            Some(row) => Some(row),
            None => self.rows.next().transpose()?,
        };
        if row.is_some() {
            self.consumed += 1;
        }
        Ok(row)
    }

    /// Number of rows consumed so far; also the index of the next row.
    pub const fn consumed(&self) -> usize {
        self.consumed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(ids: &[&str]) -> Vec<Result<AggregationRow, String>> {
        ids.iter()
            .map(|id| Ok(AggregationRow::new(0, 1, "app").with_entity(*id)))
            .collect()
    }

    #[test]
    fn peek_does_not_consume() {
        let mut cursor = RowCursor::new(rows(&["a", "b"]));
        let peeked = cursor.peek_row().unwrap().cloned();
        assert_eq!(peeked.unwrap().entity_id.as_deref(), Some("a"));
        assert_eq!(cursor.consumed(), 0);

        let first = cursor.next_row().unwrap().unwrap();
        assert_eq!(first.entity_id.as_deref(), Some("a"));
        let second = cursor.next_row().unwrap().unwrap();
        assert_eq!(second.entity_id.as_deref(), Some("b"));
        assert_eq!(cursor.consumed(), 2);
        assert!(cursor.next_row().unwrap().is_none());
        assert!(cursor.peek_row().unwrap().is_none());
    }

    #[test]
    fn cursor_errors_propagate_unchanged() {
        let input: Vec<Result<AggregationRow, String>> = vec![
            Ok(AggregationRow::new(0, 1, "app")),
            Err("disk on fire".to_string()),
        ];
        let mut cursor = RowCursor::new(input);
        assert!(cursor.next_row().unwrap().is_some());
        assert_eq!(cursor.peek_row().unwrap_err(), "disk on fire");
    }

    #[test]
    fn exclusion_requires_both_ends() {
        let mut row = AggregationRow::new(0, 10, "app");
        assert_eq!(row.exclusion(), None);
        row.exclusion_start = Some(2);
        assert_eq!(row.exclusion(), None);
        row.exclusion_end = Some(4);
        assert_eq!(row.exclusion(), Some((2, 4)));
    }
}
