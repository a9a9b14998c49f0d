//! Derived availability figures and alert status
//!
//! Nothing here is stored; every value is computed from a transformer's
//! cached totals and thresholds.

use std::fmt;

use crate::models::Transformer;

/// A percentage that is undefined when nothing is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Percentage {
    NotApplicable,
    Value(i64),
}

impl Percentage {
    pub fn value(self) -> Option<i64> {
        match self {
            Percentage::Value(v) => Some(v),
            Percentage::NotApplicable => None,
        }
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Percentage::NotApplicable => write!(f, "N/A"),
            Percentage::Value(v) => write!(f, "{}%", v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Green,
    Yellow,
    Red,
    /// Nothing produced, so there is no percentage to compare
    Unknown,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Status::Green => "green",
            Status::Yellow => "yellow",
            Status::Red => "red",
            Status::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

pub fn available(t: &Transformer) -> i64 {
    t.total_produced as i64 - t.total_consumed as i64
}

pub fn percent_consumed(t: &Transformer) -> Percentage {
    if t.total_produced == 0 {
        return Percentage::NotApplicable;
    }
    let ratio = t.total_consumed as f64 * 100.0 / t.total_produced as f64;
    Percentage::Value(ratio.round_ties_even() as i64)
}

pub fn percent_available(t: &Transformer) -> Percentage {
    match percent_consumed(t) {
        Percentage::Value(v) => Percentage::Value(100 - v),
        Percentage::NotApplicable => Percentage::NotApplicable,
    }
}

/// Compare the consumed percentage against the thresholds. When red sits
/// below yellow the alert direction is reversed: low consumption is the
/// alarming side.
pub fn status(t: &Transformer) -> Status {
    let Some(pct) = percent_consumed(t).value() else {
        return Status::Unknown;
    };
    let yellow = t.yellow_threshold_percent_consumed;
    let red = t.red_threshold_percent_consumed;

    if yellow <= red {
        if pct >= red {
            Status::Red
        } else if pct >= yellow {
            Status::Yellow
        } else {
            Status::Green
        }
    } else if pct <= red {
        Status::Red
    } else if pct <= yellow {
        Status::Yellow
    } else {
        Status::Green
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeKey;

    fn totals(produced: u64, consumed: u64) -> Transformer {
        let mut t = Transformer::new(NodeKey::new(1, 1), None, None);
        t.total_produced = produced;
        t.total_consumed = consumed;
        t
    }

    fn with_thresholds(produced: u64, consumed: u64, yellow: i64, red: i64) -> Transformer {
        let mut t = totals(produced, consumed);
        t.yellow_threshold_percent_consumed = yellow;
        t.red_threshold_percent_consumed = red;
        t
    }

    #[test]
    fn dc1_scenario_figures() {
        let t = totals(16, 5);
        assert_eq!(available(&t), 11);
        assert_eq!(percent_consumed(&t), Percentage::Value(31));
        assert_eq!(percent_available(&t), Percentage::Value(69));
    }

    #[test]
    fn nothing_produced_is_not_applicable() {
        let t = totals(0, 7);
        assert_eq!(percent_consumed(&t), Percentage::NotApplicable);
        assert_eq!(percent_available(&t), Percentage::NotApplicable);
        assert_eq!(percent_consumed(&t).to_string(), "N/A");
        assert_eq!(status(&t), Status::Unknown);
        assert_eq!(available(&t), -7);
    }

    #[test]
    fn over_consumption_is_negative_availability() {
        let t = totals(10, 15);
        assert_eq!(available(&t), -5);
        assert_eq!(percent_consumed(&t), Percentage::Value(150));
        assert_eq!(percent_available(&t), Percentage::Value(-50));
        assert_eq!(status(&t), Status::Red);
    }

    #[test]
    fn halves_round_to_even() {
        // 1/8 = 12.5% and 3/8 = 37.5%
        assert_eq!(percent_consumed(&totals(8, 1)), Percentage::Value(12));
        assert_eq!(percent_consumed(&totals(8, 3)), Percentage::Value(38));
    }

    #[test]
    fn default_thresholds_alert_on_high_consumption() {
        assert_eq!(status(&totals(100, 50)), Status::Green);
        assert_eq!(status(&totals(100, 80)), Status::Yellow);
        assert_eq!(status(&totals(100, 89)), Status::Yellow);
        assert_eq!(status(&totals(100, 90)), Status::Red);
    }

    #[test]
    fn reversed_thresholds_alert_on_low_consumption() {
        // yellow 30, red 10: idle capacity is the problem
        assert_eq!(status(&with_thresholds(100, 5, 30, 10)), Status::Red);
        assert_eq!(status(&with_thresholds(100, 10, 30, 10)), Status::Red);
        assert_eq!(status(&with_thresholds(100, 20, 30, 10)), Status::Yellow);
        assert_eq!(status(&with_thresholds(100, 60, 30, 10)), Status::Green);
    }
}
