//! Timestamp records.
//!
//! Records are written as RFC 3339 UTC. The legacy wall-clock form
//! (`2024-06-10 14:03:11`, no zone) is still accepted on read and is taken
//! to be in the configured zone.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;

const LEGACY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S %Z";

pub fn format_stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_stamp(raw: &str, tz: Tz) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, LEGACY_FORMAT).ok()?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|at| at.with_timezone(&Utc))
}

pub fn display(at: DateTime<Utc>, tz: Tz) -> String {
    at.with_timezone(&tz).format(DISPLAY_FORMAT).to_string()
}

pub fn parse_tz(name: &str) -> Option<Tz> {
    name.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_rfc3339() {
        let at = Utc.with_ymd_and_hms(2024, 6, 10, 6, 3, 11).unwrap();
        let raw = format_stamp(at);
        assert_eq!(raw, "2024-06-10T06:03:11Z");
        assert_eq!(parse_stamp(&raw, chrono_tz::UTC), Some(at));
    }

    #[test]
    fn test_legacy_stamp_uses_zone() {
        let parsed = parse_stamp("2024-06-10 14:03:11\n", chrono_tz::Asia::Taipei).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 6, 10, 6, 3, 11).unwrap());
    }

    #[test]
    fn test_display_in_zone() {
        let at = Utc.with_ymd_and_hms(2024, 6, 10, 6, 3, 11).unwrap();
        assert_eq!(display(at, chrono_tz::Asia::Taipei), "2024-06-10 14:03:11 CST");
    }

    #[test]
    fn test_garbage_is_none() {
        assert_eq!(parse_stamp("soon", chrono_tz::UTC), None);
        assert!(parse_tz("Not/AZone").is_none());
        assert!(parse_tz("Asia/Taipei").is_some());
    }
}
