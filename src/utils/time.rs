/// Time utilities for the source trading calendar (UTC+8)
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use chrono_tz::Asia::Shanghai;

/// Offset of the source calendar from UTC
pub const SOURCE_UTC_OFFSET_HOURS: i64 = 8;

/// Daily close in the source calendar
pub const SOURCE_CLOSE_HOUR: i64 = 15;

/// Resume date used when nothing is persisted yet
pub fn epoch_sentinel() -> NaiveDate {
    NaiveDate::default()
}

/// Absolute instant of the daily close for a trading day (15:00 UTC+8)
pub fn trading_close_instant(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
        + Duration::hours(SOURCE_CLOSE_HOUR - SOURCE_UTC_OFFSET_HOURS)
}

/// Calendar day of an instant in the source calendar
pub fn source_date(instant: DateTime<Utc>) -> NaiveDate {
    (instant + Duration::hours(SOURCE_UTC_OFFSET_HOURS)).date_naive()
}

/// Today in the source calendar
pub fn source_today(now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&Shanghai).date_naive()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_close_instant_is_seven_utc() {
        let date = NaiveDate::from_ymd_opt(2020, 4, 24).unwrap();
        let instant = trading_close_instant(date);

        assert_eq!(instant.to_rfc3339(), "2020-04-24T07:00:00+00:00");
        assert_eq!(source_date(instant), date);
    }

    #[test]
    fn test_source_today_rolls_over_at_utc_sixteen() {
        let before = Utc.with_ymd_and_hms(2024, 6, 3, 15, 59, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 6, 3, 16, 0, 0).unwrap();

        assert_eq!(source_today(before), NaiveDate::from_ymd_opt(2024, 6, 3).unwrap());
        assert_eq!(source_today(after), NaiveDate::from_ymd_opt(2024, 6, 4).unwrap());
    }

    #[test]
    fn test_epoch_sentinel() {
        assert_eq!(format_date(epoch_sentinel()), "1970-01-01");
    }
}
