//! Time handling for booking validation
//!
//! All cutoff comparisons happen in a single fixed operational
//! timezone (UTC+3). Timestamps arrive as text in several literal
//! formats; naive values are localized to the operational offset.

use super::{BookingError, BookingResult};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeDelta, Utc};

const OPERATIONAL_OFFSET_SECS: i32 = 3 * 3600;

/// Canonical storage format for date columns
pub const CANONICAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const NAIVE_DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"];
const ZONED_DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%z", "%Y-%m-%d %H:%M:%S%.f%z"];

/// The fixed operational timezone offset (UTC+3)
pub fn operational_offset() -> FixedOffset {
    FixedOffset::east_opt(OPERATIONAL_OFFSET_SECS).expect("valid fixed offset")
}

/// Minimum lead time before a newly selected flight's departure
pub fn reschedule_cutoff() -> TimeDelta {
    TimeDelta::hours(3)
}

/// Minimum lead time before a booking's start for cancellation
pub fn cancel_cutoff() -> TimeDelta {
    TimeDelta::hours(24)
}

/// Parse a timestamp from one of the accepted literal formats.
///
/// Accepted: plain date, datetime, datetime with fractional seconds,
/// each optionally timezone-suffixed. Naive values are interpreted in
/// the operational timezone.
pub fn parse_timestamp(raw: &str) -> BookingResult<DateTime<FixedOffset>> {
    let raw = raw.trim();

    for fmt in ZONED_DATETIME_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Ok(dt.with_timezone(&operational_offset()));
        }
    }

    for fmt in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return localize(naive, raw);
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let naive = date.and_hms_opt(0, 0, 0).ok_or_else(|| invalid(raw))?;
        return localize(naive, raw);
    }

    Err(invalid(raw))
}

/// Format a timestamp for storage in date columns
pub fn to_canonical(ts: DateTime<FixedOffset>) -> String {
    ts.format(CANONICAL_FORMAT).to_string()
}

fn localize(naive: NaiveDateTime, raw: &str) -> BookingResult<DateTime<FixedOffset>> {
    naive
        .and_local_timezone(operational_offset())
        .single()
        .ok_or_else(|| invalid(raw))
}

fn invalid(raw: &str) -> BookingError {
    BookingError::InvalidTimestamp {
        raw: raw.to_string(),
    }
}

/// Source of "now" for cutoff checks. A seam so tests can pin time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;
}

/// Wall-clock time in the operational timezone
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&operational_offset())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn parses_plain_date_as_midnight() {
        let ts = parse_timestamp("2024-05-01").unwrap();
        assert_eq!(ts.hour(), 0);
        assert_eq!(ts.offset().local_minus_utc(), 3 * 3600);
    }

    #[test]
    fn parses_datetime_and_fractional_seconds() {
        let plain = parse_timestamp("2024-05-01 14:30:00").unwrap();
        let frac = parse_timestamp("2024-05-01 14:30:00.250").unwrap();
        assert_eq!(plain.hour(), 14);
        assert!(frac > plain);
    }

    #[test]
    fn parses_zoned_datetime_and_converts_to_operational_offset() {
        let ts = parse_timestamp("2024-05-01 14:30:00+0000").unwrap();
        assert_eq!(ts.offset().local_minus_utc(), 3 * 3600);
        assert_eq!(ts.hour(), 17);
    }

    #[test]
    fn rejects_garbage() {
        let err = parse_timestamp("next tuesday").unwrap_err();
        assert!(matches!(err, BookingError::InvalidTimestamp { .. }));
    }

    #[test]
    fn canonical_format_round_trips() {
        let ts = parse_timestamp("2024-05-01 14:30:00").unwrap();
        assert_eq!(parse_timestamp(&to_canonical(ts)).unwrap(), ts);
    }
}
