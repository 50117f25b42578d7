//! Proxy health records and re-check scheduling arithmetic

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Shortest interval between checks of a proxy
pub const BASE_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Longest a proxy can go unchecked, however often it failed
pub const MAX_CHECK_HORIZON: Duration = Duration::from_secs(24 * 60 * 60);

/// Backoff shifts beyond this would overflow; the stored counter is unbounded
const FAIL_SHIFT_CAP: u32 = 30;

/// One known upstream proxy and its health state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRecord {
    /// "host:port", the unique key of this proxy
    pub address: String,
    /// When this proxy was last checked (UTC)
    pub last_check: DateTime<Utc>,
    /// Consecutive failed checks; zero means healthy
    pub fail_counter: u32,
}

impl ProxyRecord {
    /// A freshly configured proxy: unverified, due for an immediate check
    pub fn new_unverified(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            last_check: DateTime::UNIX_EPOCH,
            fail_counter: 1,
        }
    }

    /// The instant this record is next due for a check
    ///
    /// Exponential backoff from the last check, doubling per consecutive
    /// failure, clamped to [`MAX_CHECK_HORIZON`] past the last check.
    pub fn due_at(&self) -> DateTime<Utc> {
        let shift = self.fail_counter.min(FAIL_SHIFT_CAP);
        let backoff_secs = BASE_CHECK_INTERVAL.as_secs() * (1u64 << shift);
        let backoff = chrono::Duration::seconds(backoff_secs as i64);
        let horizon = chrono::Duration::seconds(MAX_CHECK_HORIZON.as_secs() as i64);

        self.last_check + backoff.min(horizon)
    }

    /// How long until this record is due, zero if overdue
    pub fn recheck_in(&self, now: DateTime<Utc>) -> Duration {
        (self.due_at() - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Whether this record belongs in the healthy set
    pub fn is_healthy(&self) -> bool {
        self.fail_counter == 0
    }
}

impl std::fmt::Display for ProxyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.address,
            self.last_check.to_rfc3339(),
            self.fail_counter
        )
    }
}

/// FNV-1a over the address, the deterministic tie-break for equal due times
pub(crate) fn address_hash(addr: &str) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for byte in addr.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fail_counter: u32, last_check: DateTime<Utc>) -> ProxyRecord {
        ProxyRecord {
            address: "10.0.0.1:3128".to_string(),
            last_check,
            fail_counter,
        }
    }

    #[test]
    fn test_recheck_in_healthy_record() {
        let last = Utc::now();
        let now = last + chrono::Duration::minutes(3);

        // 5min base minus 3min elapsed
        let wait = record(0, last).recheck_in(now);
        assert_eq!(wait, Duration::from_secs(2 * 60));
    }

    #[test]
    fn test_recheck_in_backs_off_per_failure() {
        let last = Utc::now();
        let now = last + chrono::Duration::minutes(3);

        // 5min * 2^3 minus 3min elapsed
        let wait = record(3, last).recheck_in(now);
        assert_eq!(wait, Duration::from_secs(37 * 60));
    }

    #[test]
    fn test_recheck_in_clamped_to_horizon() {
        let last = Utc::now();
        let now = last + chrono::Duration::minutes(3);

        for fail_counter in [28, 30, 31, 1000] {
            let wait = record(fail_counter, last).recheck_in(now);
            assert_eq!(wait, Duration::from_secs(24 * 60 * 60 - 3 * 60));
        }
    }

    #[test]
    fn test_recheck_in_overdue_is_zero() {
        let wait = record(0, DateTime::UNIX_EPOCH).recheck_in(Utc::now());
        assert_eq!(wait, Duration::ZERO);
    }

    #[test]
    fn test_new_unverified_is_immediately_due() {
        let rec = ProxyRecord::new_unverified("10.0.0.2:8080");
        assert_eq!(rec.fail_counter, 1);
        assert!(!rec.is_healthy());
        assert_eq!(rec.recheck_in(Utc::now()), Duration::ZERO);
    }

    #[test]
    fn test_display_shows_address_time_and_failures() {
        let last = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let rec = record(2, last);
        assert_eq!(
            rec.to_string(),
            format!("10.0.0.1:3128 {} 2", last.to_rfc3339())
        );
    }

    #[test]
    fn test_address_hash_is_stable() {
        // FNV-1a reference value for the empty string, then determinism
        assert_eq!(address_hash(""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(address_hash("10.0.0.1:3128"), address_hash("10.0.0.1:3128"));
        assert_ne!(address_hash("10.0.0.1:3128"), address_hash("10.0.0.2:3128"));
    }
}
