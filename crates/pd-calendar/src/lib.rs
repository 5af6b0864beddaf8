//! pd-calendar
//!
//! Pure US-equity trading-calendar arithmetic: observed market holidays,
//! trading-day checks, and "last close" resolution. No I/O, no caching,
//! no dependence on the current time — every function takes its inputs
//! explicitly so the callers above (tiered adapter, scheduler) stay
//! deterministic under test.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};

/// US equity market close, expressed in UTC (16:00 ET standard time).
pub const MARKET_CLOSE_UTC_HOUR: u32 = 21;

// ---------------------------------------------------------------------------
// Date helpers
// ---------------------------------------------------------------------------

/// Easter Sunday via the anonymous Gregorian Computus.
pub fn easter_sunday(year: i32) -> NaiveDate {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = ((h + l - 7 * m + 114) % 31) + 1;

    NaiveDate::from_ymd_opt(year, month as u32, day as u32)
        .expect("computus always yields a valid March/April date")
}

/// Good Friday: two days before Easter Sunday.
pub fn good_friday(year: i32) -> NaiveDate {
    easter_sunday(year) - Duration::days(2)
}

/// The nth occurrence of `weekday` in a month (1-based).
pub fn nth_weekday_of_month(year: i32, month: u32, weekday: Weekday, nth: u32) -> NaiveDate {
    let first = NaiveDate::from_ymd_opt(year, month, 1).expect("valid month");
    let offset = (weekday.num_days_from_monday() as i64
        - first.weekday().num_days_from_monday() as i64)
        .rem_euclid(7);
    first + Duration::days(offset + 7 * (nth as i64 - 1))
}

/// The last occurrence of `weekday` in a month.
pub fn last_weekday_of_month(year: i32, month: u32, weekday: Weekday) -> NaiveDate {
    let (next_y, next_m) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let mut day = NaiveDate::from_ymd_opt(next_y, next_m, 1).expect("valid month") - Duration::days(1);
    while day.weekday() != weekday {
        day -= Duration::days(1);
    }
    day
}

/// Weekend observation for fixed-date holidays: Saturday is observed the
/// preceding Friday, Sunday the following Monday. Weekdays are themselves.
pub fn observed(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date - Duration::days(1),
        Weekday::Sun => date + Duration::days(1),
        _ => date,
    }
}

// ---------------------------------------------------------------------------
// Holiday set
// ---------------------------------------------------------------------------

/// The ten observed US-equity market holidays for a year.
///
/// Floating (nth-weekday) holidays cannot land on a weekend by
/// construction; fixed-date holidays are shifted by [`observed`]. Only the
/// observed date is emitted.
pub fn market_holidays(year: i32) -> BTreeSet<NaiveDate> {
    let fixed = |month: u32, day: u32| {
        observed(NaiveDate::from_ymd_opt(year, month, day).expect("valid fixed holiday"))
    };

    BTreeSet::from([
        // New Year's Day
        fixed(1, 1),
        // Martin Luther King Jr. Day
        nth_weekday_of_month(year, 1, Weekday::Mon, 3),
        // Presidents Day
        nth_weekday_of_month(year, 2, Weekday::Mon, 3),
        // Good Friday
        good_friday(year),
        // Memorial Day
        last_weekday_of_month(year, 5, Weekday::Mon),
        // Juneteenth
        fixed(6, 19),
        // Independence Day
        fixed(7, 4),
        // Labor Day
        nth_weekday_of_month(year, 9, Weekday::Mon, 1),
        // Thanksgiving
        nth_weekday_of_month(year, 11, Weekday::Thu, 4),
        // Christmas
        fixed(12, 25),
    ])
}

// ---------------------------------------------------------------------------
// Trading-day queries
// ---------------------------------------------------------------------------

/// A weekday that is not an observed market holiday of its own year.
pub fn is_trading_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
        && !market_holidays(date.year()).contains(&date)
}

/// The most recent market close at or before `instant`'s date.
///
/// Walks back day by day from the instant's calendar date to the nearest
/// trading day and returns that date at 21:00 UTC. On a trading day the
/// result is that same day's close — which may still lie in the future of
/// `instant` (pre-close); callers compare dates, not instants.
pub fn last_trading_day_at(instant: DateTime<Utc>) -> DateTime<Utc> {
    let mut date = instant.date_naive();
    while !is_trading_day(date) {
        date -= Duration::days(1);
    }
    at_market_close(date)
}

/// The nearest trading day strictly before `date`.
///
/// This is the holiday-aware "previous close" computation: daily-change
/// math wants the trading day before the last trading day, and weekday
/// offsets alone get it wrong around observed holidays.
pub fn previous_trading_day(date: NaiveDate) -> NaiveDate {
    let mut day = date - Duration::days(1);
    while !is_trading_day(day) {
        day -= Duration::days(1);
    }
    day
}

/// A date at market close (21:00 UTC).
pub fn at_market_close(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(
        &date
            .and_hms_opt(MARKET_CLOSE_UTC_HOUR, 0, 0)
            .expect("21:00:00 is a valid time"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    // -- Computus ----------------------------------------------------------

    #[test]
    fn easter_known_dates() {
        assert_eq!(easter_sunday(2008), d(2008, 3, 23)); // early edge
        assert_eq!(easter_sunday(2011), d(2011, 4, 24)); // late edge
        assert_eq!(easter_sunday(2024), d(2024, 3, 31));
        assert_eq!(easter_sunday(2025), d(2025, 4, 20));
        assert_eq!(easter_sunday(2026), d(2026, 4, 5));
        assert_eq!(easter_sunday(2027), d(2027, 3, 28));
    }

    #[test]
    fn good_friday_known_dates() {
        assert_eq!(good_friday(2024), d(2024, 3, 29));
        assert_eq!(good_friday(2025), d(2025, 4, 18));
        assert_eq!(good_friday(2026), d(2026, 4, 3));
    }

    // -- Weekday helpers ---------------------------------------------------

    #[test]
    fn nth_weekday_fixtures() {
        assert_eq!(nth_weekday_of_month(2024, 1, Weekday::Mon, 3), d(2024, 1, 15));
        assert_eq!(nth_weekday_of_month(2024, 2, Weekday::Mon, 3), d(2024, 2, 19));
        assert_eq!(nth_weekday_of_month(2024, 9, Weekday::Mon, 1), d(2024, 9, 2));
        assert_eq!(nth_weekday_of_month(2024, 11, Weekday::Thu, 4), d(2024, 11, 28));
        assert_eq!(nth_weekday_of_month(2025, 11, Weekday::Thu, 4), d(2025, 11, 27));
    }

    #[test]
    fn last_weekday_fixtures() {
        assert_eq!(last_weekday_of_month(2024, 5, Weekday::Mon), d(2024, 5, 27));
        assert_eq!(last_weekday_of_month(2026, 5, Weekday::Mon), d(2026, 5, 25));
    }

    // -- Observation -------------------------------------------------------

    #[test]
    fn weekday_holidays_observed_as_is() {
        assert_eq!(observed(d(2024, 1, 1)), d(2024, 1, 1)); // Monday
        assert_eq!(observed(d(2024, 7, 3)), d(2024, 7, 3)); // Wednesday
    }

    #[test]
    fn saturday_observed_preceding_friday() {
        // July 4, 2026 is a Saturday.
        assert_eq!(observed(d(2026, 7, 4)), d(2026, 7, 3));
        // Christmas 2021 is a Saturday.
        assert_eq!(observed(d(2021, 12, 25)), d(2021, 12, 24));
    }

    #[test]
    fn sunday_observed_following_monday() {
        // Jan 1, 2023 is a Sunday.
        assert_eq!(observed(d(2023, 1, 1)), d(2023, 1, 2));
        // Juneteenth 2022 is a Sunday.
        assert_eq!(observed(d(2022, 6, 19)), d(2022, 6, 20));
    }

    // -- Holiday sets ------------------------------------------------------

    #[test]
    fn holidays_2024_exact_set() {
        let hs = market_holidays(2024);
        let expected = [
            d(2024, 1, 1),   // New Year's (Mon)
            d(2024, 1, 15),  // MLK
            d(2024, 2, 19),  // Presidents
            d(2024, 3, 29),  // Good Friday
            d(2024, 5, 27),  // Memorial
            d(2024, 6, 19),  // Juneteenth (Wed)
            d(2024, 7, 4),   // Independence (Thu)
            d(2024, 9, 2),   // Labor
            d(2024, 11, 28), // Thanksgiving
            d(2024, 12, 25), // Christmas (Wed)
        ];
        assert_eq!(hs, BTreeSet::from(expected));
    }

    #[test]
    fn holidays_2026_observe_independence_day_on_friday() {
        let hs = market_holidays(2026);
        assert!(hs.contains(&d(2026, 7, 3)));
        assert!(!hs.contains(&d(2026, 7, 4)));
    }

    #[test]
    fn every_year_has_ten_weekday_holidays() {
        for year in 1971..=2100 {
            let hs = market_holidays(year);
            assert_eq!(hs.len(), 10, "year {year}");
            for h in &hs {
                assert!(
                    !matches!(h.weekday(), Weekday::Sat | Weekday::Sun),
                    "{h} is a weekend in {year}"
                );
            }
        }
    }

    // -- Trading-day queries ----------------------------------------------

    #[test]
    fn weekends_and_holidays_are_not_trading_days() {
        assert!(!is_trading_day(d(2026, 1, 17))); // Saturday
        assert!(!is_trading_day(d(2026, 1, 18))); // Sunday
        assert!(!is_trading_day(d(2026, 1, 19))); // MLK Day 2026
        assert!(is_trading_day(d(2026, 1, 16))); // Friday
        assert!(is_trading_day(d(2026, 1, 20))); // Tuesday after MLK
    }

    #[test]
    fn last_trading_day_on_sunday_is_friday_close() {
        let sunday = Utc.with_ymd_and_hms(2026, 1, 18, 15, 0, 0).unwrap();
        let close = last_trading_day_at(sunday);
        assert_eq!(close, Utc.with_ymd_and_hms(2026, 1, 16, 21, 0, 0).unwrap());
    }

    #[test]
    fn last_trading_day_on_a_trading_day_is_same_day_close() {
        let monday = Utc.with_ymd_and_hms(2026, 1, 12, 15, 0, 0).unwrap();
        let close = last_trading_day_at(monday);
        assert_eq!(close, Utc.with_ymd_and_hms(2026, 1, 12, 21, 0, 0).unwrap());
    }

    #[test]
    fn last_trading_day_skips_observed_holiday_runs() {
        // Sunday July 5, 2026: Saturday was the 4th, Friday the 3rd was the
        // observed holiday, so the last close is Thursday July 2.
        let sunday = Utc.with_ymd_and_hms(2026, 7, 5, 12, 0, 0).unwrap();
        let close = last_trading_day_at(sunday);
        assert_eq!(close, Utc.with_ymd_and_hms(2026, 7, 2, 21, 0, 0).unwrap());
    }

    #[test]
    fn previous_trading_day_is_holiday_aware() {
        // Regression for the weekday-offset bug: from Monday July 6, 2026
        // the previous trading day is Thursday July 2 — not Friday July 3
        // (observed Independence Day) and not "three days back because
        // it's Monday".
        assert_eq!(previous_trading_day(d(2026, 7, 6)), d(2026, 7, 2));
        // Plain mid-week case.
        assert_eq!(previous_trading_day(d(2026, 1, 14)), d(2026, 1, 13));
        // Monday to Friday across an ordinary weekend.
        assert_eq!(previous_trading_day(d(2026, 1, 12)), d(2026, 1, 9));
        // Day after Thanksgiving 2026 (Nov 26): Wednesday is previous.
        assert_eq!(previous_trading_day(d(2026, 11, 27)), d(2026, 11, 25));
    }
}
