// Cron cadence for the scrape loop
//
// The expression uses the `cron` crate's seven-field syntax (seconds first,
// optional year last) and is evaluated on the civil wall clock, so
// "8-14" means opening hours in the operator timezone all year round.

use crate::errors::ScheduleError;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::str::FromStr;

/// Parse and validate a cron expression
pub fn parse_cron_expression(expression: &str) -> Result<CronSchedule, ScheduleError> {
    CronSchedule::from_str(expression).map_err(|e| ScheduleError::InvalidCronExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// A cron schedule bound to a timezone
#[derive(Debug, Clone)]
pub struct CronCadence {
    schedule: CronSchedule,
    timezone: Tz,
}

impl CronCadence {
    pub fn new(expression: &str, timezone: Tz) -> Result<Self, ScheduleError> {
        Ok(Self {
            schedule: parse_cron_expression(expression)?,
            timezone,
        })
    }

    /// Next tick strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        let reference_in_tz = after.with_timezone(&self.timezone);

        let next_in_tz =
            self.schedule
                .after(&reference_in_tz)
                .next()
                .ok_or_else(|| ScheduleError::NoNextExecution {
                    schedule_type: "cron".to_string(),
                })?;

        Ok(next_in_tz.with_timezone(&Utc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn weekday_cadence() -> CronCadence {
        CronCadence::new("0 */10 8-14 * * Mon-Fri *", chrono_tz::Europe::Berlin).unwrap()
    }

    #[test]
    fn test_parse_invalid_cron_expression() {
        assert!(parse_cron_expression("invalid").is_err());
    }

    #[test]
    fn test_next_tick_within_opening_hours() {
        // Monday 10:03 CET
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 9, 3, 0).unwrap();
        let next = weekday_cadence().next_after(now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 4, 9, 10, 0).unwrap());
    }

    #[test]
    fn test_next_tick_after_closing_is_next_morning() {
        // Monday 14:55 CET; last tick of the day was 14:50
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 13, 55, 0).unwrap();
        let next = weekday_cadence().next_after(now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 5, 7, 0, 0).unwrap());
    }

    #[test]
    fn test_friday_evening_skips_weekend() {
        // Friday 2024-03-08 16:00 CET
        let now = Utc.with_ymd_and_hms(2024, 3, 8, 15, 0, 0).unwrap();
        let next = weekday_cadence().next_after(now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 11, 7, 0, 0).unwrap());
    }
}
