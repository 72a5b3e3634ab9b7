//! Broadcast-day time arithmetic.
//!
//! All upstream timestamps are JST wall-clock. A "broadcast day" runs
//! `05:00 -> 29:00` (i.e. `05:00` the following calendar day), which lets
//! the upstream express programs that air in the small hours as part of
//! the *previous* day's schedule by writing hours in `[24, 29]`.
//!
//! Durations are always whole seconds; there is no floating point anywhere
//! in this module.

use crate::error::RelayError;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike};
use chrono_tz::Asia::Tokyo;
use chrono_tz::Tz;

/// A JST wall-clock instant.
pub type WallClock = DateTime<Tz>;

/// Hour at which a broadcast day begins (05:00 JST).
pub const BROADCAST_DAY_START_HOUR: u32 = 5;

/// Default network-delay offset subtracted from wall-clock to get the
/// "live pointer" — the instant used to decide what is currently on air.
pub const DEFAULT_DELAY_SEC: i64 = 20;

/// Current JST wall-clock instant.
pub fn now() -> WallClock {
    Tokyo.from_utc_datetime(&chrono::Utc::now().naive_utc())
}

/// Current wall-clock minus `delay_sec` — the reference "live pointer".
pub fn broadcast_now(delay_sec: i64) -> WallClock {
    now() - Duration::seconds(delay_sec)
}

/// The broadcast day (as a calendar date) that encloses `instant` — the
/// date of the `05:00` boundary at or before `instant`.
pub fn broadcast_date_of(instant: WallClock) -> NaiveDate {
    if instant.hour() < BROADCAST_DAY_START_HOUR {
        instant.date_naive() - Duration::days(1)
    } else {
        instant.date_naive()
    }
}

/// The current broadcast day.
pub fn broadcast_date() -> NaiveDate {
    broadcast_date_of(now())
}

/// The wall-clock window `[date@05:00, date+1@05:00)` covered by one
/// broadcast day.
pub fn broadcast_day_bounds(date: NaiveDate) -> (WallClock, WallClock) {
    let start = Tokyo
        .from_local_datetime(&date.and_hms_opt(BROADCAST_DAY_START_HOUR, 0, 0).unwrap())
        .single()
        .expect("05:00 JST is never ambiguous/skipped");
    let end = start + Duration::days(1);
    (start, end)
}

/// Parse a `yyyymmdd` (len 8) or `yyyymmddHHMMSS`-prefixed (len < 14)
/// digit string into a wall-clock instant. Shorter strings are zero-padded
/// on the right up to 14 digits before parsing, so `"2025010105"` parses
/// as `"20250101050000"`. Hour components in `[24, 29]` are folded into
/// `(day + 1, hour - 24)` per the broadcast-day convention.
pub fn parse(s: &str) -> Result<WallClock, RelayError> {
    if s.len() > 14 || s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RelayError::InvalidRequest(format!(
            "expected an all-digit timestamp of at most 14 characters, got {s:?}"
        )));
    }
    let mut padded = s.to_string();
    padded.push_str(&"0".repeat(14 - s.len()));

    let year: i32 = padded[0..4].parse().unwrap();
    let month: u32 = padded[4..6].parse().unwrap();
    let day: u32 = padded[6..8].parse().unwrap();
    let hour: u32 = padded[8..10].parse().unwrap();
    let minute: u32 = padded[10..12].parse().unwrap();
    let second: u32 = padded[12..14].parse().unwrap();

    let base_date = NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| RelayError::InvalidRequest(format!("invalid calendar date in {s:?}")))?;

    let (date, hour) = if hour >= 24 {
        (base_date + Duration::days(1), hour - 24)
    } else {
        (base_date, hour)
    };

    let time = NaiveTime::from_hms_opt(hour, minute, second)
        .ok_or_else(|| RelayError::InvalidRequest(format!("invalid time of day in {s:?}")))?;
    let naive = NaiveDateTime::new(date, time);

    Tokyo
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| RelayError::InvalidRequest(format!("ambiguous local time for {s:?}")))
}

/// Render `instant` as a 14-digit `yyyymmddHHMMSS` wall-clock string.
pub fn format_14(instant: WallClock) -> String {
    instant.format("%Y%m%d%H%M%S").to_string()
}

/// Render `instant` as an 8-digit `yyyymmdd` date string.
pub fn format_8(instant: WallClock) -> String {
    instant.format("%Y%m%d").to_string()
}

/// Render `instant` in the broadcast-day `24`-`29` hour convention relative
/// to `broadcast_day`: if `instant` falls in `[00:00, 05:00)` of the day
/// *after* `broadcast_day`, the hour is rendered as `hour + 24` against
/// `broadcast_day` itself instead of rolling over. This is the inverse of
/// the hour-folding `parse` performs, and round-trips with it.
pub fn format_broadcast_14(instant: WallClock, broadcast_day: NaiveDate) -> String {
    let instant_date = instant.date_naive();
    if instant_date == broadcast_day + Duration::days(1) && instant.hour() < BROADCAST_DAY_START_HOUR {
        let folded_hour = instant.hour() + 24;
        format!(
            "{}{:02}{:02}{:02}",
            broadcast_day.format("%Y%m%d"),
            folded_hour,
            instant.minute(),
            instant.second()
        )
    } else {
        format_14(instant)
    }
}

/// `b - a` in whole seconds. Fails with `InvalidInterval` if `b < a`.
pub fn span_sec(a: WallClock, b: WallClock) -> Result<i64, RelayError> {
    let delta = (b - a).num_seconds();
    if delta < 0 {
        return Err(RelayError::InvalidInterval(format!(
            "end {b} precedes start {a}"
        )));
    }
    Ok(delta)
}

/// Validate a program interval: `ft < to` and the span is at most 24h.
pub fn validate_interval(ft: WallClock, to: WallClock) -> Result<(), RelayError> {
    let span = span_sec(ft, to)?;
    if span == 0 {
        return Err(RelayError::InvalidInterval(format!(
            "program interval {ft}..{to} is empty"
        )));
    }
    if span > 24 * 3600 {
        return Err(RelayError::InvalidInterval(format!(
            "program interval {ft}..{to} exceeds 24h ({span}s)"
        )));
    }
    Ok(())
}

/// Compare a program's `[ft, to)` interval against `now`:
/// `0` if on-air, a negative number of seconds if it has ended (magnitude
/// is seconds since `to`), a positive number of seconds if it is upcoming
/// (magnitude is seconds until `ft`).
pub fn compare_program_to_now(ft: WallClock, to: WallClock, now: WallClock) -> i64 {
    if now < ft {
        (ft - now).num_seconds()
    } else if now >= to {
        -(now - to).num_seconds()
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jst(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> WallClock {
        Tokyo
            .from_local_datetime(&NaiveDate::from_ymd_opt(y, mo, d).unwrap().and_hms_opt(h, mi, s).unwrap())
            .unwrap()
    }

    #[test]
    fn parse_8_digit_date_is_midnight() {
        let t = parse("20250101").unwrap();
        assert_eq!(t, jst(2025, 1, 1, 0, 0, 0));
    }

    #[test]
    fn parse_pads_short_strings_with_zeros() {
        let t = parse("2025010105").unwrap();
        assert_eq!(t, jst(2025, 1, 1, 5, 0, 0));
    }

    #[test]
    fn parse_folds_hour_24_into_next_day_midnight() {
        let t = parse("20250101240000").unwrap();
        assert_eq!(t, jst(2025, 1, 2, 0, 0, 0));
    }

    #[test]
    fn parse_folds_hour_29_into_next_day_five_am() {
        let t = parse("20250101290000").unwrap();
        assert_eq!(t, jst(2025, 1, 2, 5, 0, 0));
    }

    #[test]
    fn parse_unchanged_for_normal_hour() {
        let t = parse("20250101235959").unwrap();
        assert_eq!(t, jst(2025, 1, 1, 23, 59, 59));
    }

    #[test]
    fn parse_rejects_non_digit_input() {
        assert!(parse("2025-01-01").is_err());
    }

    #[test]
    fn format_parse_roundtrip_14_digit() {
        let s = "20250110143000";
        let t = parse(s).unwrap();
        assert_eq!(format_14(t), s);
    }

    #[test]
    fn format_broadcast_roundtrips_24_29_convention() {
        let day = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        let raw = "20250110290000"; // 29:00 on the 10th -> 05:00 on the 11th
        let t = parse(raw).unwrap();
        assert_eq!(format_broadcast_14(t, day), raw);
    }

    #[test]
    fn span_sec_positive_for_valid_interval() {
        let a = jst(2025, 1, 1, 5, 0, 0);
        let b = jst(2025, 1, 1, 6, 0, 0);
        assert_eq!(span_sec(a, b).unwrap(), 3600);
    }

    #[test]
    fn span_sec_rejects_inverted_interval() {
        let a = jst(2025, 1, 1, 6, 0, 0);
        let b = jst(2025, 1, 1, 5, 0, 0);
        assert!(span_sec(a, b).is_err());
    }

    #[test]
    fn compare_on_air_at_start() {
        let ft = jst(2025, 1, 10, 14, 0, 0);
        let to = ft + Duration::hours(1);
        assert_eq!(compare_program_to_now(ft, to, ft), 0);
    }

    #[test]
    fn compare_ended_returns_negative() {
        let ft = jst(2025, 1, 10, 14, 0, 0);
        let to = ft + Duration::hours(1);
        assert!(compare_program_to_now(ft, to, to) < 0);
    }

    #[test]
    fn compare_upcoming_returns_positive() {
        let ft = jst(2025, 1, 10, 14, 0, 0);
        let to = ft + Duration::hours(1);
        let earlier = ft - Duration::minutes(10);
        assert_eq!(compare_program_to_now(ft, to, earlier), 600);
    }

    #[test]
    fn broadcast_date_before_five_am_is_previous_day() {
        let t = jst(2025, 1, 10, 3, 0, 0);
        assert_eq!(broadcast_date_of(t), NaiveDate::from_ymd_opt(2025, 1, 9).unwrap());
    }

    #[test]
    fn broadcast_date_at_and_after_five_am_is_same_day() {
        let t = jst(2025, 1, 10, 5, 0, 0);
        assert_eq!(broadcast_date_of(t), NaiveDate::from_ymd_opt(2025, 1, 10).unwrap());
    }
}
