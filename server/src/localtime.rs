//! UTC to deployment-local time conversion and liveness checks.

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Deployment-local zone used for all human-facing timestamps.
pub const LOCAL_TZ: Tz = chrono_tz::Asia::Tehran;

/// Display label appended to zoned timestamps.
pub const ZONE_LABEL: &str = "IRST";

/// A device or reading older than this is considered offline.
pub const ONLINE_THRESHOLD_MINUTES: i64 = 5;

pub fn to_local(t: DateTime<Utc>) -> DateTime<Tz> {
    t.with_timezone(&LOCAL_TZ)
}

/// `YYYY-MM-DD HH:MM:SS IRST`
pub fn format_local(t: DateTime<Utc>) -> String {
    format!(
        "{} {}",
        to_local(t).format("%Y-%m-%d %H:%M:%S"),
        ZONE_LABEL
    )
}

/// `YYYY-MM-DD HH:MM:SS`, local wall clock without the zone label.
pub fn format_local_plain(t: DateTime<Utc>) -> String {
    to_local(t).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// `YYYY/MM/DD HH:MM:SS`, the local-format date variant used by the
/// dashboard and CSV export.
pub fn format_local_date(t: DateTime<Utc>) -> String {
    to_local(t).format("%Y/%m/%d %H:%M:%S").to_string()
}

/// True iff `seen` is strictly within the liveness threshold of `now`.
///
/// `now` is captured once per request so that every liveness check in one
/// response agrees.
pub fn is_online(now: DateTime<Utc>, seen: DateTime<Utc>) -> bool {
    now.signed_duration_since(seen) < Duration::minutes(ONLINE_THRESHOLD_MINUTES)
}

/// Start of the current local calendar day, converted back to UTC.
pub fn today_start_utc(now: DateTime<Utc>) -> DateTime<Utc> {
    let midnight = to_local(now).date_naive().and_time(NaiveTime::MIN);
    LOCAL_TZ
        .from_local_datetime(&midnight)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        // midnight skipped by a DST gap: read it as UTC instead
        .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noon_utc() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_online_within_threshold() {
        let now = noon_utc();
        let seen = now - Duration::minutes(ONLINE_THRESHOLD_MINUTES) + Duration::seconds(1);
        assert!(is_online(now, seen));
    }

    #[test]
    fn test_offline_past_threshold() {
        let now = noon_utc();
        let seen = now - Duration::minutes(ONLINE_THRESHOLD_MINUTES) - Duration::seconds(1);
        assert!(!is_online(now, seen));
    }

    #[test]
    fn test_offline_exactly_at_threshold() {
        // strict comparison: the boundary instant itself is offline
        let now = noon_utc();
        let seen = now - Duration::minutes(ONLINE_THRESHOLD_MINUTES);
        assert!(!is_online(now, seen));
    }

    #[test]
    fn test_format_local_applies_offset_and_label() {
        // Tehran is UTC+03:30 year-round since 2022
        let t = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        assert_eq!(format_local(t), "2024-01-15 15:30:00 IRST");
        assert_eq!(format_local_plain(t), "2024-01-15 15:30:00");
        assert_eq!(format_local_date(t), "2024/01/15 15:30:00");
    }

    #[test]
    fn test_today_start_maps_to_previous_utc_evening() {
        let start = today_start_utc(noon_utc());
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 6, 14, 20, 30, 0).unwrap());
    }

    #[test]
    fn test_today_start_handles_local_day_ahead_of_utc() {
        // 22:00 UTC is already 01:30 the next day in Tehran
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 22, 0, 0).unwrap();
        assert_eq!(
            today_start_utc(now),
            Utc.with_ymd_and_hms(2024, 6, 15, 20, 30, 0).unwrap()
        );
    }
}
