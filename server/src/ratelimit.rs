//! Fixed-window request limiter keyed by client IP and route class.

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Per-minute budgets for the route classes.
pub const INGEST_PER_MINUTE: u32 = 100;
pub const READ_PER_MINUTE: u32 = 200;
pub const EXPORT_PER_MINUTE: u32 = 20;

// windows map is swept once it collects this many distinct keys
const SWEEP_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Limited { retry_after_secs: i64 },
}

#[derive(Clone, Copy)]
struct Window {
    minute: i64,
    hits: u32,
}

/// Shared limiter state; lives in the request context, not in a global.
#[derive(Default)]
pub struct RateLimiter {
    windows: Mutex<HashMap<(IpAddr, &'static str), Window>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one hit against the caller's budget for the current
    /// one-minute window.
    pub fn check(
        &self,
        ip: IpAddr,
        class: &'static str,
        per_minute: u32,
        now: DateTime<Utc>,
    ) -> Decision {
        let minute = now.timestamp().div_euclid(60);
        let mut windows = self.windows.lock();

        if windows.len() > SWEEP_THRESHOLD {
            windows.retain(|_, w| w.minute == minute);
        }

        let window = windows
            .entry((ip, class))
            .or_insert(Window { minute, hits: 0 });
        if window.minute != minute {
            *window = Window { minute, hits: 0 };
        }
        window.hits += 1;

        if window.hits <= per_minute {
            Decision::Allowed
        } else {
            Decision::Limited {
                retry_after_secs: 60 - now.timestamp().rem_euclid(60),
            }
        }
    }

    /// Drops every window. Development helper behind `/api/reset-limits`.
    pub fn reset(&self) {
        self.windows.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::net::Ipv4Addr;

    fn ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7))
    }

    fn minute_start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_allows_up_to_budget() {
        let limiter = RateLimiter::new();
        let now = minute_start();

        for _ in 0..3 {
            assert_eq!(limiter.check(ip(), "read", 3, now), Decision::Allowed);
        }
        assert!(matches!(
            limiter.check(ip(), "read", 3, now),
            Decision::Limited { .. }
        ));
    }

    #[test]
    fn test_budget_resets_next_window() {
        let limiter = RateLimiter::new();
        let now = minute_start();

        for _ in 0..4 {
            limiter.check(ip(), "read", 3, now);
        }
        let next_minute = now + chrono::Duration::seconds(60);
        assert_eq!(
            limiter.check(ip(), "read", 3, next_minute),
            Decision::Allowed
        );
    }

    #[test]
    fn test_classes_tracked_independently() {
        let limiter = RateLimiter::new();
        let now = minute_start();

        assert!(matches!(
            limiter.check(ip(), "export", 1, now),
            Decision::Allowed
        ));
        assert!(matches!(
            limiter.check(ip(), "export", 1, now),
            Decision::Limited { .. }
        ));
        // same ip, different class, fresh budget
        assert_eq!(limiter.check(ip(), "read", 1, now), Decision::Allowed);
    }

    #[test]
    fn test_retry_after_counts_to_window_end() {
        let limiter = RateLimiter::new();
        let now = minute_start() + chrono::Duration::seconds(45);

        limiter.check(ip(), "read", 1, now);
        match limiter.check(ip(), "read", 1, now) {
            Decision::Limited { retry_after_secs } => assert_eq!(retry_after_secs, 15),
            Decision::Allowed => panic!("second hit must be limited"),
        }
    }

    #[test]
    fn test_reset_clears_windows() {
        let limiter = RateLimiter::new();
        let now = minute_start();

        limiter.check(ip(), "read", 1, now);
        limiter.check(ip(), "read", 1, now);
        limiter.reset();
        assert_eq!(limiter.check(ip(), "read", 1, now), Decision::Allowed);
    }
}
