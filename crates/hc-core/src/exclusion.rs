//! Sorted exclusion sub-intervals of one session entity.

use crate::record::overlap_duration;

/// Excluded sub-intervals (awake stages, pause segments) of a session.
///
/// `starts` and `ends` are parallel arrays sorted ascending. Intervals are
/// clipped to the owning session and merged where they overlap, so both arrays
/// stay sorted and the total excluded time never exceeds the session span.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionIndex {
    starts: Vec<i64>,
    ends: Vec<i64>,
}

impl ExclusionIndex {
    /// Builds the index from raw `(start, end)` pairs belonging to a session
    /// spanning `[bound_start, bound_end)`.
    pub fn new(mut intervals: Vec<(i64, i64)>, bound_start: i64, bound_end: i64) -> Self {
        intervals.sort_unstable();

        let mut starts: Vec<i64> = Vec::with_capacity(intervals.len());
        let mut ends: Vec<i64> = Vec::with_capacity(intervals.len());
        for (start, end) in intervals {
            let start = start.max(bound_start);
            let end = end.min(bound_end);
            if end <= start {
                continue;
            }
            match ends.last_mut() {
                Some(last_end) if start <= *last_end => {
                    *last_end = (*last_end).max(end);
                }
                _ => {
                    starts.push(start);
                    ends.push(end);
                }
            }
        }

        Self { starts, ends }
    }

    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    /// Sum of all excluded time.
    pub fn total_duration(&self) -> i64 {
        self.starts
            .iter()
            .zip(&self.ends)
            .map(|(start, end)| end.saturating_sub(*start))
            .fold(0_i64, i64::saturating_add)
    }

    /// Excluded time falling inside `[query_start, query_end)`.
    ///
    /// Only the index range that can intersect the window is summed: from the
    /// last interval starting at or before `query_start` up to the first
    /// interval ending at or after `query_end`.
    pub fn excluded_overlap(&self, query_start: i64, query_end: i64) -> i64 {
        if self.is_empty() || query_end <= query_start {
            return 0;
        }

        let lower = self
            .starts
            .partition_point(|&start| start <= query_start)
            .saturating_sub(1);
        let upper = self
            .ends
            .partition_point(|&end| end < query_end)
            .min(self.ends.len() - 1);
        if lower > upper {
            return 0;
        }

        (lower..=upper)
            .map(|i| overlap_duration(self.starts[i], query_start, self.ends[i], query_end))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intervals_are_sorted_on_build() {
        let index = ExclusionIndex::new(vec![(300, 320), (100, 130)], 0, 480);
        assert_eq!(index.starts, vec![100, 300]);
        assert_eq!(index.ends, vec![130, 320]);
    }

    #[test]
    fn overlapping_intervals_merge() {
        let index = ExclusionIndex::new(vec![(100, 150), (120, 200), (200, 210)], 0, 480);
        assert_eq!(index.len(), 1);
        assert_eq!(index.total_duration(), 110);
    }

    #[test]
    fn intervals_are_clipped_to_session() {
        let index = ExclusionIndex::new(vec![(-50, 20), (470, 600), (600, 700)], 0, 480);
        assert_eq!(index.starts, vec![0, 470]);
        assert_eq!(index.ends, vec![20, 480]);
        assert_eq!(index.total_duration(), 30);
    }

    #[test]
    fn whole_window_sums_every_interval() {
        let index = ExclusionIndex::new(vec![(10, 20), (40, 45), (70, 100)], 0, 100);
        assert_eq!(index.excluded_overlap(0, 100), 10 + 5 + 30);
    }

    #[test]
    fn partial_window_counts_only_intersection() {
        let index = ExclusionIndex::new(vec![(10, 20), (40, 45), (70, 100)], 0, 100);
        assert_eq!(index.excluded_overlap(15, 42), 5 + 2);
        assert_eq!(index.excluded_overlap(20, 40), 0);
        assert_eq!(index.excluded_overlap(80, 90), 10);
    }

    #[test]
    fn window_before_first_and_after_last() {
        let index = ExclusionIndex::new(vec![(10, 20)], 0, 100);
        assert_eq!(index.excluded_overlap(0, 5), 0);
        assert_eq!(index.excluded_overlap(50, 60), 0);
    }

    #[test]
    fn empty_index_excludes_nothing() {
        let index = ExclusionIndex::default();
        assert_eq!(index.excluded_overlap(0, 100), 0);
        assert_eq!(index.total_duration(), 0);
    }

    #[test]
    fn matches_linear_scan() {
        let intervals = vec![(5, 9), (12, 30), (31, 32), (50, 75), (80, 99)];
        let index = ExclusionIndex::new(intervals.clone(), 0, 100);
        for query_start in (0..100).step_by(3) {
            for query_end in (query_start..=100).step_by(7) {
                let expected: i64 = intervals
                    .iter()
                    .map(|&(s, e)| overlap_duration(s, query_start, e, query_end))
                    .sum();
                assert_eq!(
                    index.excluded_overlap(query_start, query_end),
                    expected,
                    "window [{query_start}, {query_end})"
                );
            }
        }
    }
}
