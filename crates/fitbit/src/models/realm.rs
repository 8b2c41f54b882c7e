//! Rate realm definitions

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A request budget: at most `max_requests` within any `timespan_secs` window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateQuota {
    pub max_requests: u32,
    pub timespan_secs: u64,
}

impl RateQuota {
    pub const fn new(max_requests: u32, timespan_secs: u64) -> Self {
        Self {
            max_requests,
            timespan_secs,
        }
    }

    /// Published Fitbit budget shared by every account using one client ID
    pub const fn global_default() -> Self {
        Self::new(3600, 3600)
    }

    /// Published Fitbit budget for a single account
    pub const fn account_default() -> Self {
        Self::new(150, 3600)
    }

    /// Reduce the budget by a safety margin, keeping at least one request
    pub fn with_headroom(self, safety_threshold: u32) -> Self {
        Self {
            max_requests: self.max_requests.saturating_sub(safety_threshold).max(1),
            ..self
        }
    }

    pub fn timespan(&self) -> Duration {
        Duration::from_secs(self.timespan_secs)
    }
}

/// A named rate-limit scope (global or per-account)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateRealm {
    pub name: String,
    pub quota: RateQuota,
}

impl RateRealm {
    /// Name of the realm shared by every sync run
    pub const GLOBAL: &'static str = "fitbit";

    pub fn new(name: impl Into<String>, quota: RateQuota) -> Self {
        Self {
            name: name.into(),
            quota,
        }
    }

    /// The global realm with the given quota
    pub fn global(quota: RateQuota) -> Self {
        Self::new(Self::GLOBAL, quota)
    }

    /// The realm for a single local account
    pub fn for_account(account_key: &str, quota: RateQuota) -> Self {
        Self::new(Self::account_realm_name(account_key), quota)
    }

    /// Realm name for a local account key
    pub fn account_realm_name(account_key: &str) -> String {
        format!("fitbit-{}", account_key)
    }
}
