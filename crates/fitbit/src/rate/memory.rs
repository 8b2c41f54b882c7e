//! In-memory realm store
//!
//! Sufficient for a single process: one mutex guards every realm log, so
//! checking and recording across realms happens as one step.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use super::traits::{AcquireOutcome, RealmStore, RealmUsage, retry_after_ms};
use crate::models::{RateQuota, RateRealm};

/// Sliding-window log for one realm
struct RealmLog {
    quota: RateQuota,
    /// Request timestamps (ms), oldest first
    hits: VecDeque<i64>,
}

impl RealmLog {
    fn new(quota: RateQuota) -> Self {
        Self {
            quota,
            hits: VecDeque::new(),
        }
    }

    fn timespan_ms(&self) -> i64 {
        self.quota.timespan_secs as i64 * 1000
    }

    /// Drop requests that have left the window
    fn prune(&mut self, now_ms: i64) {
        let cutoff = now_ms - self.timespan_ms();
        while self.hits.front().is_some_and(|t| *t <= cutoff) {
            self.hits.pop_front();
        }
    }

    fn is_full(&self) -> bool {
        self.hits.len() >= self.quota.max_requests as usize
    }
}

/// In-memory implementation of RealmStore
pub struct InMemoryRealmStore {
    realms: Mutex<HashMap<String, RealmLog>>,
}

impl InMemoryRealmStore {
    pub fn new() -> Self {
        Self {
            realms: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryRealmStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RealmStore for InMemoryRealmStore {
    fn register(&self, realm: &RateRealm) -> Result<()> {
        let mut realms = self.realms.lock().unwrap();
        realms
            .entry(realm.name.clone())
            .and_modify(|log| log.quota = realm.quota)
            .or_insert_with(|| RealmLog::new(realm.quota));
        Ok(())
    }

    fn try_acquire(&self, names: &[&str], now: DateTime<Utc>) -> Result<AcquireOutcome> {
        let now_ms = now.timestamp_millis();
        let mut realms = self.realms.lock().unwrap();

        for name in names {
            let log = realms
                .get_mut(*name)
                .with_context(|| format!("Rate realm not registered: {}", name))?;
            log.prune(now_ms);
            if log.is_full() {
                return Ok(AcquireOutcome::Exhausted {
                    realm: name.to_string(),
                    retry_after: retry_after_ms(log.hits.front().copied(), log.timespan_ms(), now_ms),
                });
            }
        }

        for name in names {
            if let Some(log) = realms.get_mut(*name) {
                log.hits.push_back(now_ms);
            }
        }

        Ok(AcquireOutcome::Granted)
    }

    fn usage(&self, name: &str, now: DateTime<Utc>) -> Result<Option<RealmUsage>> {
        let mut realms = self.realms.lock().unwrap();
        Ok(realms.get_mut(name).map(|log| {
            log.prune(now.timestamp_millis());
            RealmUsage {
                realm: name.to_string(),
                used: log.hits.len() as u32,
                max_requests: log.quota.max_requests,
                timespan: log.quota.timespan(),
            }
        }))
    }
}
