//! Telemetry parsing for joint position queries
//!
//! Extracts the five `Axis N = value counts` readings from a completed
//! telemetry query response and publishes them to the [`RobotStateCache`].

use tracing::{debug, info, warn};
use crate::grammar::LineGrammar;
use crate::state::{JointVector, RobotStateCache, AXIS_COUNT};

/// Collect one reading per axis from response lines
///
/// The first well-formed reading for an axis wins; later readings for the
/// same axis, readings for axes outside 1..=5 and malformed numbers are
/// skipped. Returns `None` unless all five axes were read.
pub fn extract_joint_vector<S: AsRef<str>>(grammar: &LineGrammar, lines: &[S]) -> Option<JointVector> {
    let mut slots: [Option<f64>; AXIS_COUNT] = [None; AXIS_COUNT];

    for line in lines {
        for (axis, value) in grammar.telemetry_readings(line.as_ref()) {
            let Some(slot) = (axis as usize).checked_sub(1).and_then(|i| slots.get_mut(i)) else {
                debug!("Ignoring reading for out-of-range axis {}", axis);
                continue;
            };
            match value {
                Some(value) if slot.is_none() => *slot = Some(value),
                Some(_) => debug!("Ignoring repeated reading for axis {}", axis),
                None => debug!("Skipping malformed reading for axis {}", axis),
            }
        }
    }

    JointVector::from_slots(slots)
}

/// Parser that writes complete readings into the robot state cache
#[derive(Debug, Clone)]
pub struct TelemetryParser {
    grammar: LineGrammar,
    cache: RobotStateCache,
}

impl TelemetryParser {
    pub fn new(grammar: LineGrammar, cache: RobotStateCache) -> Self {
        Self { grammar, cache }
    }

    /// Parse response lines; overwrite the cache only on a complete reading
    pub fn parse<S: AsRef<str>>(&self, lines: &[S]) -> bool {
        match extract_joint_vector(&self.grammar, lines) {
            Some(joints) => {
                info!("Cached joint position {}", joints);
                self.cache.set(joints);
                true
            }
            None => {
                warn!("Telemetry response incomplete; keeping previous joint position");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> (TelemetryParser, RobotStateCache) {
        let cache = RobotStateCache::new();
        (TelemetryParser::new(LineGrammar::new().unwrap(), cache.clone()), cache)
    }

    #[test]
    fn test_full_response_populates_cache() {
        let (parser, cache) = parser();
        let lines = [
            "Axis 1 = 10 counts",
            "Axis 2 = 20 counts",
            "Axis 3 = 30 counts",
            "Axis 4 = 40 counts",
            "Axis 5 = 50 counts",
            "OK",
        ];

        assert!(parser.parse(&lines));
        assert_eq!(cache.get().unwrap().values(), [10.0, 20.0, 30.0, 40.0, 50.0]);
    }

    #[test]
    fn test_any_order_is_accepted() {
        let (parser, cache) = parser();
        let lines = [
            "Position POSITION :",
            "axis 5 = -7890 COUNTS",
            "Axis 3 = 9012 counts",
            "Axis 1 = 12345 counts",
            "Axis 4 = 3456.5 counts",
            "Axis 2 = -5678 counts",
        ];

        assert!(parser.parse(&lines));
        assert_eq!(cache.get().unwrap().values(), [12345.0, -5678.0, 9012.0, 3456.5, -7890.0]);
    }

    #[test]
    fn test_missing_axis_leaves_cache_unchanged() {
        let (parser, cache) = parser();
        let previous = JointVector::new([1.0, 2.0, 3.0, 4.0, 5.0]);
        cache.set(previous);

        let lines = [
            "Axis 1 = 10 counts",
            "Axis 2 = 20 counts",
            "Axis 3 = 30 counts",
            "Axis 4 = 40 counts",
        ];

        assert!(!parser.parse(&lines));
        assert_eq!(cache.get(), Some(previous));
    }

    #[test]
    fn test_incomplete_response_on_empty_cache_stays_empty() {
        let (parser, cache) = parser();
        assert!(!parser.parse(&["Axis 1 = 10 counts", "OK"]));
        assert!(cache.get().is_none());
    }

    #[test]
    fn test_first_match_wins() {
        let (parser, cache) = parser();
        let lines = [
            "Axis 1 = 10 counts",
            "Axis 2 = 20 counts",
            "Axis 3 = 30 counts",
            "Axis 3 = 999 counts",
            "Axis 4 = 40 counts",
            "Axis 5 = 50 counts",
        ];

        assert!(parser.parse(&lines));
        assert_eq!(cache.get().unwrap().axis(3), Some(30.0));
    }

    #[test]
    fn test_malformed_value_does_not_fill_slot() {
        let (parser, cache) = parser();
        let lines = [
            "Axis 1 = 10 counts",
            "Axis 2 = 2.0.1 counts",
            "Axis 3 = 30 counts",
            "Axis 4 = 40 counts",
            "Axis 5 = 50 counts",
        ];
        assert!(!parser.parse(&lines));
        assert!(cache.get().is_none());

        // A later well-formed reading can still fill the skipped axis
        let mut with_retry = lines.to_vec();
        with_retry.push("Axis 2 = 20 counts");
        assert!(parser.parse(&with_retry));
        assert_eq!(cache.get().unwrap().axis(2), Some(20.0));
    }

    #[test]
    fn test_out_of_range_axes_are_ignored() {
        let grammar = LineGrammar::new().unwrap();
        let lines = [
            "Axis 0 = 1 counts",
            "Axis 6 = 6 counts",
            "Axis 1 = 10 counts",
            "Axis 2 = 20 counts",
            "Axis 3 = 30 counts",
            "Axis 4 = 40 counts",
        ];
        assert!(extract_joint_vector(&grammar, &lines).is_none());
    }
}
