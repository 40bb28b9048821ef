//! Aggregation kind selector and conflict policy.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which statistic a request computes, and therefore which record variant
/// and which physical columns back it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregationKind {
    Steps,
    Distance,
    ActiveCaloriesBurned,
    TotalCaloriesBurned,
    FloorsClimbed,
    ElevationGained,
    WheelchairPushes,
    SleepDuration,
    ExerciseDuration,
}

/// The record data variant a kind is computed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregationVariant {
    /// A single numeric column prorated across partial overlap.
    ValueColumn,
    /// Session duration minus excluded sub-intervals.
    SessionDuration,
}

impl AggregationKind {
    /// Every supported kind, in display order.
    pub const ALL: [Self; 9] = [
        Self::Steps,
        Self::Distance,
        Self::ActiveCaloriesBurned,
        Self::TotalCaloriesBurned,
        Self::FloorsClimbed,
        Self::ElevationGained,
        Self::WheelchairPushes,
        Self::SleepDuration,
        Self::ExerciseDuration,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Steps => "steps",
            Self::Distance => "distance",
            Self::ActiveCaloriesBurned => "active_calories_burned",
            Self::TotalCaloriesBurned => "total_calories_burned",
            Self::FloorsClimbed => "floors_climbed",
            Self::ElevationGained => "elevation_gained",
            Self::WheelchairPushes => "wheelchair_pushes",
            Self::SleepDuration => "sleep_duration",
            Self::ExerciseDuration => "exercise_duration",
        }
    }

    pub const fn variant(&self) -> AggregationVariant {
        match self {
            Self::SleepDuration | Self::ExerciseDuration => AggregationVariant::SessionDuration,
            _ => AggregationVariant::ValueColumn,
        }
    }
}

impl fmt::Display for AggregationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationKind {
    type Err = UnsupportedKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnsupportedKind(s.to_string()))
    }
}

impl Serialize for AggregationKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AggregationKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for AggregationVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValueColumn => f.write_str("value_column"),
            Self::SessionDuration => f.write_str("session_duration"),
        }
    }
}

/// Error type for unknown aggregation kind strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedKind(pub String);

impl fmt::Display for UnsupportedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported aggregation kind: {}", self.0)
    }
}

impl std::error::Error for UnsupportedKind {}

/// How contributions from overlapping records are combined within a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Every overlapping record adds its contribution.
    #[default]
    Sum,
    /// Only the top-ranked open record contributes at any instant.
    HighestPriority,
}

impl ConflictPolicy {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::HighestPriority => "highest-priority",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sum" => Ok(Self::Sum),
            "highest-priority" | "highest_priority" => Ok(Self::HighestPriority),
            _ => Err(format!("invalid conflict policy: {s}")),
        }
    }
}
