//! Next-occurrence arithmetic for repeating tasks.
//!
//! All calendar math happens in one fixed civil offset (the configured
//! `utc_offset`), so "same time of day" and "same day of month" refer to what the
//! user sees, not to UTC. When the source day does not exist in the target month
//! the result clamps to that month's last day (Jan 31 -> Feb 28/29, Feb 29 -> Feb 28).

use chrono::{DateTime, Datelike, Days, FixedOffset, NaiveDate, TimeZone, Utc};

use crate::error::{Result, TaskError};
use crate::fields::RecurrencePattern;

/// Computes the due time of the next occurrence.
#[derive(Debug, Clone, Copy)]
pub struct RecurrenceCalculator {
    tz: FixedOffset,
}

impl RecurrenceCalculator {
    pub fn new(tz: FixedOffset) -> Self {
        RecurrenceCalculator { tz }
    }

    /// Advance `current` by one step of `pattern`.
    ///
    /// A missing pattern is an error, never a silent default.
    pub fn next_due_at(
        &self,
        current: DateTime<Utc>,
        pattern: Option<RecurrencePattern>,
    ) -> Result<DateTime<Utc>> {
        let pattern = pattern
            .ok_or_else(|| TaskError::InvalidPattern("no recurrence pattern given".into()))?;

        let local = current.with_timezone(&self.tz).naive_local();
        let date = local.date();
        let next_date = match pattern {
            RecurrencePattern::Daily => date.checked_add_days(Days::new(1)),
            RecurrencePattern::Weekly => date.checked_add_days(Days::new(7)),
            RecurrencePattern::Monthly => add_months(date, 1),
            RecurrencePattern::Yearly => add_months(date, 12),
        }
        .ok_or_else(|| out_of_range(current))?;

        self.tz
            .from_local_datetime(&next_date.and_time(local.time()))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| out_of_range(current))
    }
}

fn out_of_range(current: DateTime<Utc>) -> TaskError {
    TaskError::Validation(format!("next occurrence after {current} is out of range"))
}

fn add_months(date: NaiveDate, months: u32) -> Option<NaiveDate> {
    let total = date.month0() + months;
    let year = date.year().checked_add((total / 12) as i32)?;
    let month = total % 12 + 1;
    let day = date.day().min(days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    (28..=31)
        .rev()
        .find(|&day| NaiveDate::from_ymd_opt(year, month, day).is_some())
        .unwrap_or(28)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn utc_calc() -> RecurrenceCalculator {
        RecurrenceCalculator::new(FixedOffset::east_opt(0).unwrap())
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn next(current: DateTime<Utc>, pattern: RecurrencePattern) -> DateTime<Utc> {
        utc_calc().next_due_at(current, Some(pattern)).unwrap()
    }

    #[test]
    fn daily_advances_one_day_same_time() {
        let cases = [
            (at(2026, 3, 14, 7, 45), at(2026, 3, 15, 7, 45)),
            (at(2026, 2, 28, 23, 59), at(2026, 3, 1, 23, 59)),
            (at(2028, 2, 28, 6, 0), at(2028, 2, 29, 6, 0)),
            (at(2026, 12, 31, 12, 0), at(2027, 1, 1, 12, 0)),
        ];
        for (from, expected) in cases {
            assert_eq!(next(from, RecurrencePattern::Daily), expected, "from {from}");
        }
    }

    #[test]
    fn weekly_keeps_weekday() {
        let from = at(2026, 12, 25, 9, 0);
        let to = next(from, RecurrencePattern::Weekly);
        assert_eq!(to, at(2027, 1, 1, 9, 0));
        assert_eq!(from.weekday(), to.weekday());
    }

    #[test]
    fn monthly_clamps_to_last_day() {
        assert_eq!(next(at(2026, 1, 31, 9, 0), RecurrencePattern::Monthly), at(2026, 2, 28, 9, 0));
        assert_eq!(next(at(2028, 1, 31, 9, 0), RecurrencePattern::Monthly), at(2028, 2, 29, 9, 0));
        assert_eq!(next(at(2026, 8, 31, 18, 30), RecurrencePattern::Monthly), at(2026, 9, 30, 18, 30));
        assert_eq!(next(at(2026, 1, 30, 9, 0), RecurrencePattern::Monthly), at(2026, 2, 28, 9, 0));
    }

    #[test]
    fn monthly_keeps_valid_day_and_rolls_year() {
        assert_eq!(next(at(2026, 4, 15, 9, 0), RecurrencePattern::Monthly), at(2026, 5, 15, 9, 0));
        assert_eq!(next(at(2026, 12, 31, 9, 0), RecurrencePattern::Monthly), at(2027, 1, 31, 9, 0));
    }

    #[test]
    fn yearly_clamps_leap_day() {
        assert_eq!(next(at(2028, 2, 29, 8, 15), RecurrencePattern::Yearly), at(2029, 2, 28, 8, 15));
        assert_eq!(next(at(2026, 7, 4, 10, 0), RecurrencePattern::Yearly), at(2027, 7, 4, 10, 0));
    }

    #[test]
    fn seconds_are_preserved() {
        let from = Utc.with_ymd_and_hms(2026, 5, 31, 9, 0, 42).unwrap();
        let to = next(from, RecurrencePattern::Monthly);
        assert_eq!(to.second(), 42);
        assert_eq!(to.day(), 30);
    }

    #[test]
    fn arithmetic_runs_in_configured_offset() {
        // 00:30 on Jan 31 at +02:00 is still Jan 30 in UTC.
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let calc = RecurrenceCalculator::new(tz);
        let from = tz.with_ymd_and_hms(2026, 1, 31, 0, 30, 0).unwrap().with_timezone(&Utc);
        let to = calc.next_due_at(from, Some(RecurrencePattern::Monthly)).unwrap();
        let local = to.with_timezone(&tz);
        assert_eq!((local.month(), local.day(), local.hour(), local.minute()), (2, 28, 0, 30));
    }

    #[test]
    fn missing_pattern_is_an_error() {
        let err = utc_calc().next_due_at(at(2026, 1, 1, 9, 0), None).unwrap_err();
        assert!(matches!(err, TaskError::InvalidPattern(_)));
    }

    #[test]
    fn unrecognised_pattern_never_reaches_the_calculator() {
        let parsed = "hourly".parse::<RecurrencePattern>();
        assert!(matches!(parsed, Err(TaskError::InvalidPattern(_))));
    }

    #[test]
    fn days_in_month_handles_february() {
        assert_eq!(days_in_month(2026, 2), 28);
        assert_eq!(days_in_month(2028, 2), 29);
        assert_eq!(days_in_month(2100, 2), 28);
        assert_eq!(days_in_month(2026, 4), 30);
    }
}
