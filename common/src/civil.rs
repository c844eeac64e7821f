// Civil (wall-clock) time model for notification windows
//
// Every minute-of-day, weekday mask and date the pipeline compares is
// expressed in one fixed operator timezone. Conversions between absolute
// instants and civil values happen here and nowhere else.

use crate::errors::{ScheduleError, ValidationError};
use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use std::str::FromStr;

pub const MINUTES_PER_DAY: u16 = 24 * 60;

/// Monday..Friday, bit 5 down to bit 1
pub const WEEKDAY_MASK_ALL: u8 = 0b0111110;

/// Longest DST gap we step over when resolving a non-existent local time
const MAX_GAP_MINUTES: i64 = 180;

/// Projection of instants into the operator's civil timezone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CivilCalendar {
    tz: Tz,
}

impl CivilCalendar {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    /// Build a calendar from an IANA timezone name such as `Europe/Berlin`
    pub fn from_name(name: &str) -> Result<Self, ScheduleError> {
        Tz::from_str(name)
            .map(Self::new)
            .map_err(|_| ScheduleError::InvalidTimezone(name.to_string()))
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// `hour * 60 + minute` of the instant on the civil wall clock
    pub fn minute_of_day(&self, instant: DateTime<Utc>) -> u16 {
        let local = instant.with_timezone(&self.tz);
        (local.hour() * 60 + local.minute()) as u16
    }

    pub fn civil_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.tz).date_naive()
    }

    /// Single-bit mask for the civil weekday of the instant; 0 on weekends
    pub fn weekday_bit(&self, instant: DateTime<Utc>) -> u8 {
        weekday_bit_for(instant.with_timezone(&self.tz).weekday())
    }

    /// The instant at which the civil clock shows `minute` on `date`.
    ///
    /// An ambiguous local time resolves to its earlier instant. A local time
    /// inside a DST gap resolves to the first valid instant after the gap.
    pub fn instant_at(&self, date: NaiveDate, minute: u16) -> DateTime<Utc> {
        let midnight = date.and_time(chrono::NaiveTime::MIN);
        let mut local = midnight + Duration::minutes(i64::from(minute));

        for _ in 0..=MAX_GAP_MINUTES {
            match self.tz.from_local_datetime(&local) {
                LocalResult::Single(dt) => return dt.with_timezone(&Utc),
                LocalResult::Ambiguous(earliest, _) => return earliest.with_timezone(&Utc),
                LocalResult::None => local += Duration::minutes(1),
            }
        }

        // No zone has a gap this long; treat the wall time as UTC rather than fail.
        Utc.from_utc_datetime(&local)
    }

    /// First instant strictly after `after` at which the civil clock shows `minute`
    pub fn next_occurrence(&self, minute: u16, after: DateTime<Utc>) -> DateTime<Utc> {
        let today = self.civil_date(after);
        let candidate = self.instant_at(today, minute);
        if candidate > after {
            return candidate;
        }
        match today.succ_opt() {
            Some(tomorrow) => self.instant_at(tomorrow, minute),
            None => candidate,
        }
    }
}

pub fn weekday_bit_for(weekday: Weekday) -> u8 {
    match weekday {
        Weekday::Mon => 1 << 5,
        Weekday::Tue => 1 << 4,
        Weekday::Wed => 1 << 3,
        Weekday::Thu => 1 << 2,
        Weekday::Fri => 1 << 1,
        Weekday::Sat | Weekday::Sun => 0,
    }
}

/// Inclusive membership of `minute` in `[start, end]`
pub fn interval_contains(start: u16, end: u16, minute: u16) -> bool {
    start <= minute && minute <= end
}

/// Render a civil minute as `HH:MM`
pub fn format_minute(minute: u16) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

/// Parse `HH:MM` into a civil minute of day
pub fn parse_minute(value: &str) -> Result<u16, ValidationError> {
    let invalid = || ValidationError::InvalidTimeOfDay(value.to_string());

    let (hours, minutes) = value.split_once(':').ok_or_else(invalid)?;
    if hours.len() != 2 || minutes.len() != 2 {
        return Err(invalid());
    }
    let hours: u16 = hours.parse().map_err(|_| invalid())?;
    let minutes: u16 = minutes.parse().map_err(|_| invalid())?;
    if hours >= 24 || minutes >= 60 {
        return Err(invalid());
    }
    Ok(hours * 60 + minutes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn berlin() -> CivilCalendar {
        CivilCalendar::new(chrono_tz::Europe::Berlin)
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_interval_contains_is_inclusive() {
        assert!(interval_contains(600, 840, 700));
        assert!(interval_contains(600, 840, 600));
        assert!(interval_contains(600, 840, 840));
        assert!(!interval_contains(600, 840, 841));
        assert!(!interval_contains(600, 840, 599));
    }

    #[test]
    fn test_minute_of_day_uses_civil_offset() {
        // 09:15 UTC is 10:15 CET in winter and 11:15 CEST in summer
        assert_eq!(berlin().minute_of_day(utc(2024, 1, 15, 9, 15)), 615);
        assert_eq!(berlin().minute_of_day(utc(2024, 7, 15, 9, 15)), 675);
    }

    #[test]
    fn test_civil_date_crosses_midnight_before_utc() {
        // 23:30 UTC on Sunday is already Monday in Berlin
        let instant = utc(2024, 3, 3, 23, 30);
        assert_eq!(
            berlin().civil_date(instant),
            NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
        );
        assert_eq!(berlin().weekday_bit(instant), 0b0100000);
    }

    #[test]
    fn test_weekday_bits() {
        assert_eq!(weekday_bit_for(Weekday::Mon), 32);
        assert_eq!(weekday_bit_for(Weekday::Fri), 2);
        assert_eq!(weekday_bit_for(Weekday::Sat), 0);
        assert_eq!(weekday_bit_for(Weekday::Sun), 0);
        let all = [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
        ]
        .into_iter()
        .fold(0, |mask, day| mask | weekday_bit_for(day));
        assert_eq!(all, WEEKDAY_MASK_ALL);
    }

    #[test]
    fn test_instant_at_spring_forward_gap() {
        // 2024-03-31 02:30 does not exist in Berlin; 03:00 CEST is 01:00 UTC
        let date = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        assert_eq!(berlin().instant_at(date, 150), utc(2024, 3, 31, 1, 0));
    }

    #[test]
    fn test_instant_at_fall_back_takes_earlier() {
        // 2024-10-27 02:30 happens twice; the CEST one is 00:30 UTC
        let date = NaiveDate::from_ymd_opt(2024, 10, 27).unwrap();
        assert_eq!(berlin().instant_at(date, 150), utc(2024, 10, 27, 0, 30));
    }

    #[test]
    fn test_next_occurrence_today_or_tomorrow() {
        let now = utc(2024, 3, 4, 9, 0); // 10:00 CET
        assert_eq!(
            berlin().next_occurrence(11 * 60, now),
            utc(2024, 3, 4, 10, 0)
        );
        assert_eq!(berlin().next_occurrence(8 * 60, now), utc(2024, 3, 5, 7, 0));
        // The current minute itself is not "after" now
        assert_eq!(berlin().next_occurrence(600, now), utc(2024, 3, 5, 9, 0));
    }

    #[test]
    fn test_format_and_parse_minute() {
        assert_eq!(format_minute(545), "09:05");
        assert_eq!(format_minute(0), "00:00");
        assert_eq!(parse_minute("14:00"), Ok(840));
        assert_eq!(parse_minute("00:00"), Ok(0));
        assert!(parse_minute("24:00").is_err());
        assert!(parse_minute("9:00").is_err());
        assert!(parse_minute("12-00").is_err());
    }

    #[test]
    fn test_unknown_timezone_is_rejected() {
        assert!(CivilCalendar::from_name("Mars/Olympus").is_err());
        assert!(CivilCalendar::from_name("Europe/Berlin").is_ok());
    }
}
