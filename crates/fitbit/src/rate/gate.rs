//! Rate gate guarding every remote call

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, info};

use super::traits::{AcquireOutcome, RealmStore, RealmUsage};
use crate::error::{RateLimitExceeded, SyncError};
use crate::models::{RateQuota, RateRealm};

/// Source of the current time
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Enforces the global and per-account budgets before a call is issued
///
/// The global realm is registered when the gate is built; account realms
/// are registered (or refreshed) by each sync run. Share one gate, or one
/// [`RealmStore`], between every run that must respect the same budget.
pub struct RateGate {
    store: Arc<dyn RealmStore>,
    global: RateRealm,
    clock: Clock,
}

impl RateGate {
    /// Create a gate and register the global realm in the store
    pub fn new(store: Arc<dyn RealmStore>, global_quota: RateQuota) -> Result<Self> {
        let global = RateRealm::global(global_quota);
        store.register(&global)?;
        Ok(Self {
            store,
            global,
            clock: Arc::new(Utc::now),
        })
    }

    /// Replace the clock (tests, replays)
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Name of the realm shared by every run
    pub fn global_realm(&self) -> &str {
        &self.global.name
    }

    /// Register or refresh a per-account realm
    ///
    /// Requests already counted for the account stay counted.
    pub fn register_account(&self, account_key: &str, quota: RateQuota) -> Result<RateRealm> {
        let realm = RateRealm::for_account(account_key, quota);
        self.store.register(&realm)?;
        debug!(
            "Registered realm {} ({} requests / {}s)",
            realm.name, quota.max_requests, quota.timespan_secs
        );
        Ok(realm)
    }

    /// Take a slot in every realm, then run the call
    ///
    /// If any realm is full the call is not made, no realm is charged, and
    /// [`SyncError::RateLimited`] is returned.
    pub fn acquire<T, F>(&self, realms: &[&str], call: F) -> Result<T, SyncError>
    where
        F: FnOnce() -> Result<T, SyncError>,
    {
        let mut unique: Vec<&str> = Vec::with_capacity(realms.len());
        for realm in realms {
            if !unique.contains(realm) {
                unique.push(*realm);
            }
        }

        match self.store.try_acquire(&unique, (self.clock)())? {
            AcquireOutcome::Granted => call(),
            AcquireOutcome::Exhausted { realm, retry_after } => {
                info!("Rate limit hit for realm {}", realm);
                Err(RateLimitExceeded::new(realm, Some(retry_after)).into())
            }
        }
    }

    /// Current usage of a realm
    pub fn usage(&self, realm: &str) -> Result<Option<RealmUsage>> {
        self.store.usage(realm, (self.clock)())
    }
}
