//! Per-group aggregation output.

use std::collections::BTreeMap;

use chrono::FixedOffset;

/// Aggregate of one group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupAggregate {
    pub value: f64,
    /// Zone offset of the first record observed to overlap the group.
    pub zone_offset: Option<FixedOffset>,
}

/// Aggregates for every group of a request, indexed `0..N`.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationResult {
    values: Vec<f64>,
    zone_offsets: Vec<Option<FixedOffset>>,
}

impl AggregationResult {
    pub(crate) fn with_groups(group_count: usize) -> Self {
        Self {
            values: vec![0.0; group_count],
            zone_offsets: vec![None; group_count],
        }
    }

    /// Adds a contribution to a group. The first contributor's zone offset sticks.
    pub(crate) fn add(&mut self, group: usize, contribution: f64, zone_offset: FixedOffset) {
        self.values[group] += contribution;
        if self.zone_offsets[group].is_none() {
            self.zone_offsets[group] = Some(zone_offset);
        }
    }

    /// Records a group's zone offset without contributing a value. Only the
    /// first observation sticks.
    pub(crate) fn observe_zone_offset(&mut self, group: usize, zone_offset: FixedOffset) {
        if self.zone_offsets[group].is_none() {
            self.zone_offsets[group] = Some(zone_offset);
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, group: usize) -> Option<GroupAggregate> {
        Some(GroupAggregate {
            value: *self.values.get(group)?,
            zone_offset: *self.zone_offsets.get(group)?,
        })
    }

    pub fn value(&self, group: usize) -> Option<f64> {
        self.values.get(group).copied()
    }

    pub fn zone_offset(&self, group: usize) -> Option<FixedOffset> {
        self.zone_offsets.get(group).copied().flatten()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Sum over every group.
    pub fn total(&self) -> f64 {
        self.values.iter().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, GroupAggregate)> + '_ {
        self.values
            .iter()
            .zip(&self.zone_offsets)
            .enumerate()
            .map(|(group, (value, zone_offset))| {
                (
                    group,
                    GroupAggregate {
                        value: *value,
                        zone_offset: *zone_offset,
                    },
                )
            })
    }

    pub fn to_map(&self) -> BTreeMap<usize, GroupAggregate> {
        self.iter().collect()
    }
}
