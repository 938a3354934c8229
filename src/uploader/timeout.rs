//! Size-tiered upload timeouts
//!
//! A transfer that has not finished within the tier timeout for its size is
//! considered abandoned and reclaimed by reconciliation. Sizes are binary
//! megabytes (1 MB = 1024 * 1024 bytes).

use std::time::Duration;

const MB: u64 = 1024 * 1024;
const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;

/// Timeout applied to an upload of `size` bytes
pub fn tier_timeout(size: u64) -> Duration {
    let seconds = match size {
        s if s < 5 * MB => 10 * MINUTE,
        s if s < 10 * MB => 30 * MINUTE,
        s if s < 50 * MB => HOUR,
        s if s < 100 * MB => 3 * HOUR,
        _ => 24 * HOUR,
    };
    Duration::from_secs(seconds)
}

/// Whether an upload of `size` bytes, started `age` ago, is timed out
pub fn is_timed_out(size: u64, age: Duration) -> bool {
    age >= tier_timeout(size)
}

/// Age of something created at `created_at`, as of `now`; zero for
/// timestamps in the future
pub fn age(created_at: chrono::DateTime<chrono::Utc>, now: chrono::DateTime<chrono::Utc>) -> Duration {
    (now - created_at).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn small_upload_boundary() {
        let size = 49 * MB / 10; // 4.9 MB
        assert!(!is_timed_out(size, secs(599)));
        assert!(is_timed_out(size, secs(600)));
        assert!(is_timed_out(size, secs(601)));
    }

    #[test]
    fn tier_edges() {
        assert_eq!(tier_timeout(0), secs(600));
        assert_eq!(tier_timeout(5 * MB - 1), secs(600));
        assert_eq!(tier_timeout(5 * MB), secs(1800));
        assert_eq!(tier_timeout(10 * MB - 1), secs(1800));
        assert_eq!(tier_timeout(10 * MB), secs(3600));
        assert_eq!(tier_timeout(50 * MB - 1), secs(3600));
        assert_eq!(tier_timeout(50 * MB), secs(3 * 3600));
        assert_eq!(tier_timeout(100 * MB - 1), secs(3 * 3600));
        assert_eq!(tier_timeout(100 * MB), secs(24 * 3600));
        assert_eq!(tier_timeout(u64::MAX), secs(24 * 3600));
    }

    #[test]
    fn every_tier_times_out_exactly_at_its_limit() {
        for size in [MB, 7 * MB, 20 * MB, 70 * MB, 500 * MB] {
            let limit = tier_timeout(size);
            assert!(!is_timed_out(size, limit - secs(1)), "size {}", size);
            assert!(is_timed_out(size, limit), "size {}", size);
        }
    }

    #[test]
    fn future_timestamps_have_no_age() {
        let now = chrono::Utc::now();
        assert_eq!(age(now + chrono::Duration::seconds(30), now), Duration::ZERO);
        assert_eq!(age(now - chrono::Duration::seconds(30), now), secs(30));
    }
}
