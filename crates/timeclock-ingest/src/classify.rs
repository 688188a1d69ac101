//! Attendance-kind classification for terminals that do not report one.
//!
//! An explicit kind flag from the terminal always takes precedence; this
//! fallback derives the kind from clock-hour thresholds supplied by the
//! caller. The thresholds are configuration, not business policy baked
//! into the pipeline: sites with different shift patterns inject
//! different schedules.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use timeclock_core::{Error, EventKind, Result};

/// Clock-hour thresholds for deriving an event kind from its timestamp
///
/// The day is split into four windows (UTC):
///
/// ```text
/// 00:00 ─ check_in_until ─ break_start_until ─ break_end_until ─ 24:00
///   check-in      break-start         break-end        check-out
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftSchedule {
    /// Events before this time classify as check-in.
    pub check_in_until: NaiveTime,

    /// Events before this time (and after `check_in_until`) classify as
    /// break-start.
    pub break_start_until: NaiveTime,

    /// Events before this time (and after `break_start_until`) classify
    /// as break-end. Later events classify as check-out.
    pub break_end_until: NaiveTime,
}

impl ShiftSchedule {
    /// Create a schedule, validating threshold ordering.
    ///
    /// # Errors
    /// Returns `Error::Config` if the thresholds are not strictly
    /// increasing.
    pub fn new(
        check_in_until: NaiveTime,
        break_start_until: NaiveTime,
        break_end_until: NaiveTime,
    ) -> Result<Self> {
        if check_in_until >= break_start_until || break_start_until >= break_end_until {
            return Err(Error::Config(format!(
                "Shift thresholds must be strictly increasing: {check_in_until} < {break_start_until} < {break_end_until} violated"
            )));
        }
        Ok(ShiftSchedule {
            check_in_until,
            break_start_until,
            break_end_until,
        })
    }

    /// Classify a device-reported timestamp.
    #[must_use]
    pub fn classify(&self, timestamp: DateTime<Utc>) -> EventKind {
        let time = timestamp.time();
        if time < self.check_in_until {
            EventKind::CheckIn
        } else if time < self.break_start_until {
            EventKind::BreakStart
        } else if time < self.break_end_until {
            EventKind::BreakEnd
        } else {
            EventKind::CheckOut
        }
    }
}

impl Default for ShiftSchedule {
    /// Midday-break default: check-in before 12:00, break window
    /// 12:00-14:00, check-out after.
    fn default() -> Self {
        ShiftSchedule {
            check_in_until: NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default(),
            break_start_until: NaiveTime::from_hms_opt(13, 0, 0).unwrap_or_default(),
            break_end_until: NaiveTime::from_hms_opt(14, 0, 0).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use timeclock_core::WireTimestamp;

    fn at(s: &str) -> DateTime<Utc> {
        WireTimestamp::parse(s).unwrap().inner()
    }

    #[rstest]
    #[case("2026-08-07 08:30:00", EventKind::CheckIn)]
    #[case("2026-08-07 11:59:59", EventKind::CheckIn)]
    #[case("2026-08-07 12:00:00", EventKind::BreakStart)]
    #[case("2026-08-07 13:15:00", EventKind::BreakEnd)]
    #[case("2026-08-07 17:05:00", EventKind::CheckOut)]
    #[case("2026-08-07 23:59:59", EventKind::CheckOut)]
    fn test_default_schedule_windows(#[case] ts: &str, #[case] expected: EventKind) {
        assert_eq!(ShiftSchedule::default().classify(at(ts)), expected);
    }

    #[test]
    fn test_schedule_rejects_unordered_thresholds() {
        let noon = NaiveTime::from_hms_opt(12, 0, 0).unwrap();
        let one = NaiveTime::from_hms_opt(13, 0, 0).unwrap();
        assert!(ShiftSchedule::new(one, noon, one).is_err());
        assert!(ShiftSchedule::new(noon, noon, one).is_err());
    }
}
