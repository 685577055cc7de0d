pub mod errors;

pub use errors::{ErrorCategory, QextractError, QextractResult};

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Nesting order of the two addressing levels in the hierarchical store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreOrder {
    /// `trajectory/time/...`
    #[default]
    TrajectoryMajor,
    /// `time/trajectory/...`
    TimeMajor,
}

impl StoreOrder {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TrajectoryMajor => "trajectory_major",
            Self::TimeMajor => "time_major",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().replace('-', "_").as_str() {
            "trajectory_major" | "traj/time" => Some(Self::TrajectoryMajor),
            "time_major" | "time/traj" => Some(Self::TimeMajor),
            _ => None,
        }
    }

    /// Orders a `(trajectory, time)` pair into store path segments.
    pub fn segments<'a>(self, trajectory: &'a str, time: &'a str) -> [&'a str; 2] {
        match self {
            Self::TrajectoryMajor => [trajectory, time],
            Self::TimeMajor => [time, trajectory],
        }
    }
}

impl Display for StoreOrder {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

/// Formats a time coordinate the way it is keyed in the store.
pub fn time_label(time: f64, precision: usize) -> String {
    format!("{time:.precision$}")
}

/// Replaces whitespace in a label so it can be used as one store path segment.
pub fn store_segment(label: &str) -> String {
    label
        .trim()
        .chars()
        .map(|character| {
            if character.is_whitespace() || character == '/' {
                '_'
            } else {
                character
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{StoreOrder, store_segment, time_label};

    #[test]
    fn time_labels_use_fixed_precision() {
        assert_eq!(time_label(0.5, 1), "0.5");
        assert_eq!(time_label(10.0, 1), "10.0");
        assert_eq!(time_label(0.25, 2), "0.25");
    }

    #[test]
    fn store_segments_never_contain_whitespace_or_separator() {
        assert_eq!(store_segment("2 (1) A"), "2_(1)_A");
        assert_eq!(store_segment(" a/b\tc "), "a_b_c");
    }

    #[test]
    fn store_order_places_segments() {
        assert_eq!(StoreOrder::TrajectoryMajor.segments("T1", "0.5"), ["T1", "0.5"]);
        assert_eq!(StoreOrder::TimeMajor.segments("T1", "0.5"), ["0.5", "T1"]);
        assert_eq!(StoreOrder::parse("time-major"), Some(StoreOrder::TimeMajor));
        assert_eq!(StoreOrder::parse("TRAJ/TIME"), Some(StoreOrder::TrajectoryMajor));
        assert_eq!(StoreOrder::parse("diagonal"), None);
    }
}
