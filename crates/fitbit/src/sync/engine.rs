//! Incremental sync of one account
//!
//! Fetches exactly the windows missing from the dataset, passing every
//! remote call through the rate gate. Safe to re-run: stored windows are
//! never fetched again, so a halted run resumes where it stopped.

use chrono::{NaiveDate, Utc};
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use super::windows::windows;
use crate::api::types::{PROFILE_PATH, ProfileResponse};
use crate::api::{CredentialProvider, FitbitApi};
use crate::catalog::{EndpointCatalog, Granularity};
use crate::config::SyncSettings;
use crate::error::{RateLimitExceeded, SyncError};
use crate::models::{Dataset, Profile, RateQuota};
use crate::rate::RateGate;

/// Name used for the profile call in errors
const PROFILE_ENDPOINT: &str = "profile";

/// The local account being synced
#[derive(Clone)]
pub struct SyncAccount {
    /// Local account key; names the per-account rate realm
    pub key: String,
    pub credentials: Arc<dyn CredentialProvider>,
}

impl SyncAccount {
    pub fn new(key: impl Into<String>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            key: key.into(),
            credentials,
        }
    }
}

/// Statistics from a sync operation
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncStats {
    /// Remote calls issued (profile included)
    pub requests_made: usize,
    /// Periods fetched and stored
    pub windows_fetched: usize,
    /// Periods skipped because they were already stored
    pub windows_skipped: usize,
    /// Single-value endpoints fetched (always refreshed)
    pub snapshots_refreshed: usize,
    /// The dataset on file belonged to another remote account and was dropped
    pub dataset_reset: bool,
    /// Duration of the sync operation
    pub duration_ms: u64,
}

/// Result of a sync run that did not fail
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// Dataset with everything fetched so far merged in
    pub dataset: Dataset,
    pub stats: SyncStats,
    /// Set when a rate budget stopped the run early
    pub halted: Option<RateLimitExceeded>,
}

impl SyncReport {
    /// True if every window was fetched or already present
    pub fn is_complete(&self) -> bool {
        self.halted.is_none()
    }
}

/// A sync run stopped by an error
///
/// `dataset` holds every window merged before the failing call, so storing
/// it lets the next run skip them.
#[derive(Debug, thiserror::Error)]
#[error("Sync stopped after {} fetched windows", .stats.windows_fetched)]
pub struct SyncFailure {
    #[source]
    pub error: SyncError,
    pub dataset: Dataset,
    pub stats: SyncStats,
}

/// Orchestrates catalog, windows, rate gate and remote calls
///
/// One run is strictly sequential. Share the engine (or its gate) between
/// runs that must respect the same global budget.
pub struct SyncEngine {
    api: Arc<dyn FitbitApi>,
    gate: Arc<RateGate>,
    catalog: EndpointCatalog,
    account_quota: RateQuota,
}

impl SyncEngine {
    /// Create an engine over the production catalog and default account quota
    pub fn new(api: Arc<dyn FitbitApi>, gate: Arc<RateGate>) -> Self {
        Self {
            api,
            gate,
            catalog: EndpointCatalog::fitbit(),
            account_quota: RateQuota::account_default(),
        }
    }

    /// Build client, realm store and gate from settings
    pub fn from_settings(settings: &SyncSettings) -> anyhow::Result<Self> {
        let store = settings.realm_store.open()?;
        let gate = RateGate::new(store, settings.effective_global_quota())?;
        Ok(Self::new(Arc::new(settings.client()), Arc::new(gate))
            .with_account_quota(settings.effective_account_quota()))
    }

    pub fn with_catalog(mut self, catalog: EndpointCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_account_quota(mut self, quota: RateQuota) -> Self {
        self.account_quota = quota;
        self
    }

    pub fn catalog(&self) -> &EndpointCatalog {
        &self.catalog
    }

    pub fn gate(&self) -> &RateGate {
        &self.gate
    }

    /// Sync an account up to today (UTC)
    pub fn sync(&self, account: &SyncAccount, dataset: Dataset) -> Result<SyncReport, SyncFailure> {
        self.sync_as_of(account, dataset, Utc::now().date_naive())
    }

    /// Sync an account with windows generated up to `today`
    ///
    /// A rate limit (local or remote) is not an error: the report carries the
    /// partially merged dataset and the limit that stopped the run. Any other
    /// error comes back as a [`SyncFailure`] that still carries the partial
    /// dataset. Rejected credentials are reported to the provider first.
    pub fn sync_as_of(
        &self,
        account: &SyncAccount,
        mut dataset: Dataset,
        today: NaiveDate,
    ) -> Result<SyncReport, SyncFailure> {
        let start = Instant::now();
        let mut stats = SyncStats::default();

        let outcome = self.run(account, &mut dataset, today, &mut stats);
        stats.duration_ms = start.elapsed().as_millis() as u64;

        let error = match outcome {
            Ok(()) => {
                info!(
                    "Sync for {} complete: {} fetched, {} skipped, {} requests",
                    account.key, stats.windows_fetched, stats.windows_skipped, stats.requests_made
                );
                return Ok(SyncReport {
                    dataset,
                    stats,
                    halted: None,
                });
            }
            Err(SyncError::RateLimited(limit)) => {
                info!("Sync for {} halted: {}", account.key, limit);
                return Ok(SyncReport {
                    dataset,
                    stats,
                    halted: Some(limit),
                });
            }
            Err(e) => e,
        };

        warn!(
            "Sync for {} failed after {} fetched windows: {}",
            account.key, stats.windows_fetched, error
        );
        Err(SyncFailure {
            error,
            dataset,
            stats,
        })
    }

    fn run(
        &self,
        account: &SyncAccount,
        dataset: &mut Dataset,
        today: NaiveDate,
        stats: &mut SyncStats,
    ) -> Result<(), SyncError> {
        // 1. Register (or refresh) the per-account realm
        let account_realm = self.gate.register_account(&account.key, self.account_quota)?;
        let realms = [self.gate.global_realm(), account_realm.name.as_str()];

        let token = account
            .credentials
            .access_token()
            .map_err(|e| SyncError::RemoteAuth(format!("No usable access token: {:#}", e)))?;

        let run = Run {
            engine: self,
            realms: &realms,
            token: &token,
        };
        let outcome = run.merge(dataset, today, stats);

        if matches!(outcome, Err(SyncError::RemoteAuth(_))) {
            account.credentials.report_invalid();
        }
        outcome
    }
}

/// State shared by every call of one sync run
struct Run<'a> {
    engine: &'a SyncEngine,
    realms: &'a [&'a str],
    token: &'a str,
}

impl Run<'_> {
    fn merge(
        &self,
        dataset: &mut Dataset,
        today: NaiveDate,
        stats: &mut SyncStats,
    ) -> Result<(), SyncError> {
        // 2. Identity and account start
        let profile = self.fetch_profile(stats)?;

        // 3. A different remote account invalidates everything on file
        let switched = dataset
            .encoded_id()
            .is_some_and(|existing| !profile.is_same_account(existing));
        if switched {
            info!(
                "Remote account changed from {} to {}; discarding stored data",
                dataset.encoded_id().unwrap_or_default(),
                profile.encoded_id
            );
            *dataset = Dataset::empty();
            stats.dataset_reset = true;
        }

        // 4. Profile is always replaced in full
        let user_id = profile.encoded_id.clone();
        let member_since = profile.member_since;
        dataset.set_profile(profile);

        // 5-6. Once, then Year, then Month; catalog order within each
        for granularity in Granularity::SYNC_ORDER {
            for endpoint in self.engine.catalog.with_granularity(granularity) {
                if granularity.is_periodic() {
                    dataset.ensure_series(&endpoint.name);
                }

                for window in windows(granularity, member_since, today) {
                    let path = endpoint.resolve(&user_id, &window);

                    let Some(key) = window.key() else {
                        debug!("Refreshing {}", endpoint.name);
                        let value = self
                            .fetch(&path, stats)
                            .map_err(|e| e.in_context(&endpoint.name, None))?;
                        dataset.set_snapshot(&endpoint.name, value);
                        stats.snapshots_refreshed += 1;
                        continue;
                    };

                    if dataset.has_period(&endpoint.name, key) {
                        debug!("Skipping {}: {} (already stored)", endpoint.name, key);
                        stats.windows_skipped += 1;
                        continue;
                    }

                    info!("Retrieving {}: {}", endpoint.name, key);
                    let value = self
                        .fetch(&path, stats)
                        .map_err(|e| e.in_context(&endpoint.name, Some(key)))?;
                    dataset.insert_period(&endpoint.name, key, value);
                    stats.windows_fetched += 1;
                }
            }
        }

        Ok(())
    }

    fn fetch_profile(&self, stats: &mut SyncStats) -> Result<Profile, SyncError> {
        let value = self
            .fetch(PROFILE_PATH, stats)
            .map_err(|e| e.in_context(PROFILE_ENDPOINT, None))?;

        let response: ProfileResponse = serde_json::from_value(value).map_err(|e| {
            SyncError::protocol(PROFILE_ENDPOINT, None, format!("Malformed profile: {}", e))
        })?;
        Ok(response.user)
    }

    /// Issue one gated GET
    fn fetch(&self, path: &str, stats: &mut SyncStats) -> Result<Value, SyncError> {
        self.engine.gate.acquire(self.realms, || {
            stats.requests_made += 1;
            self.engine.api.get_json(path, self.token)
        })
    }
}
