//! Source priority ranking and the record tie-break comparator.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::record::AggregationRecordData;

/// Per-source rank built once per request from an ordered source list.
///
/// The first source in the list is the most trusted. Its rank is the list
/// length, and each following source ranks one lower. Sources absent from the
/// list rank `0`, so an empty list ranks every source equally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriorityRanking {
    ranks: HashMap<String, usize>,
}

impl PriorityRanking {
    pub fn from_order<I, S>(order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let order: Vec<String> = order.into_iter().map(Into::into).collect();
        let len = order.len();
        let mut ranks = HashMap::with_capacity(len);
        for (index, source) in order.into_iter().enumerate() {
            // A repeated source keeps its earliest (highest) rank.
            ranks.entry(source).or_insert(len - index);
        }
        Self { ranks }
    }

    pub fn rank(&self, source_app_id: &str) -> usize {
        self.ranks.get(source_app_id).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }
}

/// Orders two records so that the one winning a conflict sorts first.
///
/// Higher priority rank wins; at equal rank the more recently modified record wins.
pub fn compare_priority(a: &AggregationRecordData, b: &AggregationRecordData) -> Ordering {
    b.priority()
        .cmp(&a.priority())
        .then_with(|| b.last_modified_time().cmp(&a.last_modified_time()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RecordSpan, ValueColumnAggregationData};
    use chrono::FixedOffset;

    fn record(priority: usize, last_modified_time: i64) -> AggregationRecordData {
        AggregationRecordData::ValueColumn(ValueColumnAggregationData::new(
            RecordSpan {
                start_time: 0,
                end_time: 10,
                source_app_id: "app".to_string(),
                last_modified_time,
                start_zone_offset: FixedOffset::east_opt(0).unwrap(),
                priority,
            },
            1.0,
        ))
    }

    #[test]
    fn first_source_gets_highest_rank() {
        let ranking = PriorityRanking::from_order(["fitbit", "oura", "samsung"]);
        assert_eq!(ranking.rank("fitbit"), 3);
        assert_eq!(ranking.rank("oura"), 2);
        assert_eq!(ranking.rank("samsung"), 1);
    }

    #[test]
    fn unknown_source_ranks_zero() {
        let ranking = PriorityRanking::from_order(["fitbit"]);
        assert_eq!(ranking.rank("strava"), 0);
    }

    #[test]
    fn empty_order_ranks_everything_equally() {
        let ranking = PriorityRanking::from_order(Vec::<String>::new());
        assert!(ranking.is_empty());
        assert_eq!(ranking.rank("a"), ranking.rank("b"));
    }

    #[test]
    fn duplicate_source_keeps_first_rank() {
        let ranking = PriorityRanking::from_order(["a", "b", "a"]);
        assert_eq!(ranking.rank("a"), 3);
        assert_eq!(ranking.len(), 2);
    }

    #[test]
    fn higher_rank_sorts_first() {
        let high = record(2, 0);
        let low = record(1, 100);
        assert_eq!(compare_priority(&high, &low), Ordering::Less);
        assert_eq!(compare_priority(&low, &high), Ordering::Greater);
    }

    #[test]
    fn equal_rank_prefers_recently_modified() {
        let older = record(1, 100);
        let newer = record(1, 200);
        assert_eq!(compare_priority(&newer, &older), Ordering::Less);
        assert_eq!(compare_priority(&older, &older.clone()), Ordering::Equal);
    }
}
