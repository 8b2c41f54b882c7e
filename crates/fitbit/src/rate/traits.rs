//! Realm store trait definitions

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::models::RateRealm;

/// Result of trying to take one slot in a set of realms
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// A slot was recorded in every requested realm
    Granted,
    /// No slot was recorded anywhere; `realm` is the first one found full
    Exhausted { realm: String, retry_after: Duration },
}

impl AcquireOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, AcquireOutcome::Granted)
    }
}

/// Snapshot of a realm's current consumption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealmUsage {
    pub realm: String,
    /// Requests counted inside the current window
    pub used: u32,
    pub max_requests: u32,
    pub timespan: Duration,
}

impl RealmUsage {
    pub fn remaining(&self) -> u32 {
        self.max_requests.saturating_sub(self.used)
    }
}

/// Storage for sliding-window request logs
///
/// Implementations must make [`RealmStore::try_acquire`] atomic across all
/// named realms and across concurrent callers: either every realm records
/// the request or none does, and two callers can never both take the last
/// slot of a realm.
pub trait RealmStore: Send + Sync {
    /// Create a realm or update its quota
    ///
    /// Requests already counted for an existing realm are kept.
    fn register(&self, realm: &RateRealm) -> Result<()>;

    /// Take one slot in each named realm at `now`
    ///
    /// Fails if any realm is not registered.
    fn try_acquire(&self, realms: &[&str], now: DateTime<Utc>) -> Result<AcquireOutcome>;

    /// Current usage of a realm, or `None` if it is not registered
    fn usage(&self, realm: &str, now: DateTime<Utc>) -> Result<Option<RealmUsage>>;
}

/// Time until the oldest counted request leaves the window
pub(crate) fn retry_after_ms(oldest_ms: Option<i64>, timespan_ms: i64, now_ms: i64) -> Duration {
    let wait = oldest_ms
        .map(|oldest| oldest + timespan_ms - now_ms)
        .unwrap_or(timespan_ms);
    Duration::from_millis(wait.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_after() {
        assert_eq!(retry_after_ms(Some(1_000), 60_000, 31_000), Duration::from_secs(30));
        assert_eq!(retry_after_ms(None, 60_000, 31_000), Duration::from_secs(60));
        assert_eq!(retry_after_ms(Some(0), 1_000, 5_000), Duration::ZERO);
    }

    #[test]
    fn test_remaining() {
        let usage = RealmUsage {
            realm: "fitbit".into(),
            used: 149,
            max_requests: 150,
            timespan: Duration::from_secs(3600),
        };
        assert_eq!(usage.remaining(), 1);
    }
}
