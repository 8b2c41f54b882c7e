//! Integration tests for the fitbit crate
//!
//! These tests drive complete sync runs against a scripted in-memory API.

use chrono::{DateTime, NaiveDate, Utc};
use fitbit::api::types::PROFILE_PATH;
use fitbit::rate::Clock;
use fitbit::{
    CredentialProvider, Dataset, DatasetStore, EndpointCatalog, EndpointDescriptor, FileDatasetStore,
    FitbitApi, Granularity, InMemoryRealmStore, RateGate, RateQuota, SqliteRealmStore, StaticToken,
    SyncAccount, SyncEngine, SyncError, SyncFailure,
};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// How the scripted API fails a matching path
#[derive(Clone, Copy)]
enum Failure {
    Unauthorized,
    Status(u16),
    TooManyRequests,
}

/// In-memory stand-in for the Fitbit API
struct ScriptedApi {
    profile: Mutex<Value>,
    failures: Mutex<Vec<(String, Failure)>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedApi {
    fn new(encoded_id: &str, member_since: &str) -> Arc<Self> {
        Arc::new(Self {
            profile: Mutex::new(json!({
                "user": {
                    "encodedId": encoded_id,
                    "memberSince": member_since,
                    "averageDailySteps": 9120,
                    "height": 181.2
                }
            })),
            failures: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn set_profile(&self, profile: Value) {
        *self.profile.lock().unwrap() = profile;
    }

    fn fail_on(&self, path_fragment: &str, failure: Failure) {
        self.failures
            .lock()
            .unwrap()
            .push((path_fragment.to_string(), failure));
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn take_calls(&self) -> Vec<String> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }
}

impl FitbitApi for ScriptedApi {
    fn get_json(&self, path: &str, _access_token: &str) -> Result<Value, SyncError> {
        self.calls.lock().unwrap().push(path.to_string());

        let failure = self
            .failures
            .lock()
            .unwrap()
            .iter()
            .find(|(fragment, _)| path.contains(fragment.as_str()))
            .map(|(_, failure)| *failure);

        match failure {
            Some(Failure::Unauthorized) => Err(SyncError::RemoteAuth(format!("HTTP 401 for {}", path))),
            Some(Failure::Status(status)) => Err(SyncError::protocol(path, None, format!("HTTP {}", status))),
            Some(Failure::TooManyRequests) => Err(fitbit::RateLimitExceeded::new(
                fitbit::error::REMOTE_REALM,
                Some(std::time::Duration::from_secs(600)),
            )
            .into()),
            None if path == PROFILE_PATH => Ok(self.profile.lock().unwrap().clone()),
            None => Ok(json!({ "path": path })),
        }
    }
}

/// Static token that counts invalidation reports
#[derive(Default)]
struct CountingToken {
    invalidated: AtomicUsize,
}

impl CredentialProvider for CountingToken {
    fn access_token(&self) -> anyhow::Result<String> {
        Ok("token".to_string())
    }

    fn report_invalid(&self) {
        self.invalidated.fetch_add(1, Ordering::SeqCst);
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn account(key: &str) -> SyncAccount {
    SyncAccount::new(key, Arc::new(StaticToken::new("token")))
}

fn gate(global: RateQuota) -> Arc<RateGate> {
    Arc::new(RateGate::new(Arc::new(InMemoryRealmStore::new()), global).unwrap())
}

fn small_catalog() -> EndpointCatalog {
    EndpointCatalog::new(vec![
        EndpointDescriptor::new("overview", "/{user_id}/overview.json", Granularity::Once),
        EndpointDescriptor::new("monthly", "/{user_id}/m/{start_date}/{end_date}.json", Granularity::Month),
    ])
    .unwrap()
}

fn once_only_catalog() -> EndpointCatalog {
    EndpointCatalog::new(vec![EndpointDescriptor::new(
        "overview",
        "/{user_id}/overview.json",
        Granularity::Once,
    )])
    .unwrap()
}

fn keys(dataset: &Dataset, endpoint: &str) -> Vec<String> {
    dataset
        .series(endpoint)
        .map(|series| series.keys().cloned().collect())
        .unwrap_or_default()
}

#[test]
fn test_full_catalog_sync_covers_every_window() {
    let api = ScriptedApi::new("X1", "2020-06-15");
    let engine = SyncEngine::new(api.clone(), gate(RateQuota::global_default()));

    let report = engine
        .sync_as_of(&account("42"), Dataset::empty(), date(2021, 2, 10))
        .unwrap();

    assert!(report.is_complete());
    // profile + 1 once + 18 yearly x 2 + 3 monthly x 9
    assert_eq!(api.call_count(), 65);
    assert_eq!(report.stats.windows_fetched, 63);

    assert_eq!(keys(&report.dataset, "weight"), vec!["2020", "2021"]);
    assert_eq!(
        keys(&report.dataset, "heart"),
        vec![
            "2020-06", "2020-07", "2020-08", "2020-09", "2020-10", "2020-11", "2020-12", "2021-01",
            "2021-02"
        ]
    );
    assert_eq!(
        report.dataset.period("heart", "2021-02"),
        Some(&json!({ "path": "/X1/activities/heart/date/2021-02-01/2021-02-28.json" }))
    );

    let profile = report.dataset.profile.as_ref().unwrap();
    assert_eq!(profile.average_daily_steps, Some(9120.0));
}

#[test]
fn test_resume_issues_no_periodic_calls() {
    let api = ScriptedApi::new("X1", "2020-06-15");
    let engine = SyncEngine::new(api.clone(), gate(RateQuota::global_default()));
    let today = date(2021, 2, 10);

    let first = engine.sync_as_of(&account("42"), Dataset::empty(), today).unwrap();
    api.take_calls();

    let second = engine.sync_as_of(&account("42"), first.dataset.clone(), today).unwrap();

    // Only the profile and the single-value endpoint are requested again
    assert_eq!(
        api.take_calls(),
        vec!["/-/profile.json", "/X1/activities.json"]
    );
    assert_eq!(second.stats.windows_fetched, 0);
    assert_eq!(second.stats.windows_skipped, 63);
    assert_eq!(second.dataset, first.dataset);
}

#[test]
fn test_halt_preserves_partial_data_and_resumes() {
    let api = ScriptedApi::new("X1", "2020-01-01");
    let now = Arc::new(Mutex::new(Utc::now()));
    let clock_now = Arc::clone(&now);
    let clock: Clock = Arc::new(move || -> DateTime<Utc> { *clock_now.lock().unwrap() });

    let gate = RateGate::new(Arc::new(InMemoryRealmStore::new()), RateQuota::global_default())
        .unwrap()
        .with_clock(clock);
    let catalog = EndpointCatalog::new(vec![EndpointDescriptor::new(
        "monthly",
        "/{user_id}/m/{start_date}/{end_date}.json",
        Granularity::Month,
    )])
    .unwrap();
    let engine = SyncEngine::new(api.clone(), Arc::new(gate))
        .with_catalog(catalog)
        .with_account_quota(RateQuota::new(5, 3600));
    let today = date(2020, 10, 15);

    // Profile plus four windows fit; the fifth window is refused
    let report = engine.sync_as_of(&account("acct"), Dataset::empty(), today).unwrap();
    let halted = report.halted.clone().expect("run should halt");
    assert_eq!(halted.realm, "fitbit-acct");
    assert!(halted.retry_after.is_some());
    assert_eq!(api.call_count(), 5);
    assert_eq!(
        keys(&report.dataset, "monthly"),
        vec!["2020-01", "2020-02", "2020-03", "2020-04"]
    );

    // Once the window has slid past, the next run picks up the rest
    *now.lock().unwrap() += chrono::Duration::seconds(3601);
    api.take_calls();
    let resumed = engine.sync_as_of(&account("acct"), report.dataset, today).unwrap();
    assert!(resumed.halted.is_some());
    assert_eq!(resumed.stats.windows_skipped, 4);
    assert_eq!(resumed.stats.windows_fetched, 4);

    *now.lock().unwrap() += chrono::Duration::seconds(3601);
    let done = engine.sync_as_of(&account("acct"), resumed.dataset, today).unwrap();
    assert!(done.is_complete());
    assert_eq!(done.dataset.period_count(), 10);
}

#[test]
fn test_remote_rate_limit_halts_run() {
    let api = ScriptedApi::new("X1", "2020-01-01");
    api.fail_on("/m/2020-03-01", Failure::TooManyRequests);
    let engine = SyncEngine::new(api.clone(), gate(RateQuota::global_default())).with_catalog(small_catalog());

    let report = engine
        .sync_as_of(&account("1"), Dataset::empty(), date(2020, 6, 1))
        .unwrap();

    let halted = report.halted.expect("remote 429 halts the run");
    assert!(halted.is_remote());
    assert_eq!(keys(&report.dataset, "monthly"), vec!["2020-01", "2020-02"]);
    // Nothing after the refused call
    assert_eq!(api.call_count(), 5);
}

#[test]
fn test_global_realm_refusal_leaves_account_realm_uncharged() {
    let shared = gate(RateQuota::new(3, 3600));
    let api = ScriptedApi::new("X1", "2020-01-01");
    let engine = SyncEngine::new(api.clone(), Arc::clone(&shared)).with_catalog(once_only_catalog());

    let first = engine
        .sync_as_of(&account("a"), Dataset::empty(), date(2020, 1, 2))
        .unwrap();
    assert!(first.is_complete());

    // Profile takes the last global slot; the overview call is refused
    let second = engine
        .sync_as_of(&account("b"), Dataset::empty(), date(2020, 1, 2))
        .unwrap();
    assert_eq!(second.halted.unwrap().realm, "fitbit");
    assert!(second.dataset.snapshot("overview").is_none());

    assert_eq!(shared.usage("fitbit").unwrap().unwrap().used, 3);
    assert_eq!(shared.usage("fitbit-b").unwrap().unwrap().used, 1);
    assert_eq!(api.call_count(), 3);
}

#[test]
fn test_identity_change_resets_dataset() {
    let api = ScriptedApi::new("OLD", "2020-01-01");
    let engine = SyncEngine::new(api.clone(), gate(RateQuota::global_default())).with_catalog(small_catalog());
    let today = date(2020, 2, 10);

    let mut dataset = engine.sync_as_of(&account("1"), Dataset::empty(), today).unwrap().dataset;
    dataset.insert_period("retired-endpoint", "2019", json!([]));

    api.set_profile(json!({ "user": { "encodedId": "NEW", "memberSince": "2020-02-01" } }));
    let report = engine.sync_as_of(&account("1"), dataset, today).unwrap();

    assert!(report.stats.dataset_reset);
    assert_eq!(report.dataset.encoded_id(), Some("NEW"));
    assert!(report.dataset.series("retired-endpoint").is_none());
    assert_eq!(keys(&report.dataset, "monthly"), vec!["2020-02"]);
    assert_eq!(
        report.dataset.snapshot("overview"),
        Some(&json!({ "path": "/NEW/overview.json" }))
    );
}

#[test]
fn test_once_endpoints_always_overwrite() {
    let api = ScriptedApi::new("X1", "2020-01-01");
    let engine = SyncEngine::new(api.clone(), gate(RateQuota::global_default())).with_catalog(small_catalog());

    let mut dataset = Dataset::empty();
    dataset.set_profile(fitbit::Profile::new("X1", date(2020, 1, 1)));
    dataset.set_snapshot("overview", json!("stale"));

    let report = engine
        .sync_as_of(&account("1"), dataset, date(2020, 1, 20))
        .unwrap();

    assert!(!report.stats.dataset_reset);
    assert_eq!(report.stats.snapshots_refreshed, 1);
    assert_eq!(
        report.dataset.snapshot("overview"),
        Some(&json!({ "path": "/X1/overview.json" }))
    );
}

#[test]
fn test_rejected_token_reports_invalid_credentials() {
    let api = ScriptedApi::new("X1", "2020-01-01");
    api.fail_on("/m/", Failure::Unauthorized);
    let engine = SyncEngine::new(api.clone(), gate(RateQuota::global_default())).with_catalog(small_catalog());

    let provider = Arc::new(CountingToken::default());
    let account = SyncAccount::new("1", provider.clone());

    let result = engine.sync_as_of(&account, Dataset::empty(), date(2020, 3, 1));

    assert!(matches!(
        result,
        Err(SyncFailure {
            error: SyncError::RemoteAuth(_),
            ..
        })
    ));
    assert_eq!(provider.invalidated.load(Ordering::SeqCst), 1);
}

#[test]
fn test_profile_without_encoded_id_is_protocol_error() {
    let api = ScriptedApi::new("X1", "2020-01-01");
    api.set_profile(json!({ "user": { "memberSince": "2020-01-01" } }));
    let engine = SyncEngine::new(api.clone(), gate(RateQuota::global_default())).with_catalog(small_catalog());

    let result = engine.sync_as_of(&account("1"), Dataset::empty(), date(2020, 3, 1));

    match result {
        Err(SyncFailure {
            error: SyncError::RemoteProtocol { endpoint, .. },
            ..
        }) => assert_eq!(endpoint, "profile"),
        other => panic!("expected protocol error, got {:?}", other.map(|r| r.stats)),
    }
    assert_eq!(api.call_count(), 1);
}

#[test]
fn test_server_error_names_endpoint_and_window() {
    let api = ScriptedApi::new("X1", "2020-01-01");
    api.fail_on("/m/2020-02-01", Failure::Status(500));
    let engine = SyncEngine::new(api.clone(), gate(RateQuota::global_default())).with_catalog(small_catalog());

    let result = engine.sync_as_of(&account("1"), Dataset::empty(), date(2020, 3, 1));

    match result {
        Err(SyncFailure {
            error:
                SyncError::RemoteProtocol {
                    endpoint,
                    period,
                    message,
                },
            dataset,
            ..
        }) => {
            assert_eq!(endpoint, "monthly");
            assert_eq!(period.as_deref(), Some("2020-02"));
            assert_eq!(message, "HTTP 500");
            assert_eq!(keys(&dataset, "monthly"), vec!["2020-01"]);
        }
        other => panic!("expected protocol error, got {:?}", other.map(|r| r.stats)),
    }
}

#[test]
fn test_failed_run_keeps_windows_for_the_next_run() {
    let api = ScriptedApi::new("X1", "2020-01-01");
    api.fail_on("/m/2020-06-01", Failure::Status(504));
    let catalog = EndpointCatalog::new(vec![EndpointDescriptor::new(
        "monthly",
        "/{user_id}/m/{start_date}/{end_date}.json",
        Granularity::Month,
    )])
    .unwrap();
    let engine = SyncEngine::new(api.clone(), gate(RateQuota::global_default())).with_catalog(catalog);
    let today = date(2020, 12, 15);

    let first = engine
        .sync_as_of(&account("1"), Dataset::empty(), today)
        .unwrap_err();
    assert!(matches!(first.error, SyncError::RemoteProtocol { .. }));
    assert_eq!(first.stats.windows_fetched, 5);
    assert_eq!(
        keys(&first.dataset, "monthly"),
        vec!["2020-01", "2020-02", "2020-03", "2020-04", "2020-05"]
    );
    api.take_calls();

    // The same window keeps failing; nothing before it is requested again
    let second = engine
        .sync_as_of(&account("1"), first.dataset, today)
        .unwrap_err();
    assert_eq!(second.stats.windows_skipped, 5);
    assert_eq!(second.stats.windows_fetched, 0);
    assert_eq!(
        api.take_calls(),
        vec!["/-/profile.json", "/X1/m/2020-06-01/2020-06-30.json"]
    );
    assert_eq!(second.dataset.period_count(), 5);
}

#[test]
fn test_file_store_round_trip_resumes() {
    let dir = TempDir::new().unwrap();
    let store = FileDatasetStore::new(dir.path().join("datasets")).unwrap();
    let api = ScriptedApi::new("X1", "2020-01-01");
    let engine = SyncEngine::new(api.clone(), gate(RateQuota::global_default())).with_catalog(small_catalog());
    let today = date(2020, 5, 1);

    let seed = store.load("1").unwrap().unwrap_or_default();
    let report = engine.sync_as_of(&account("1"), seed, today).unwrap();
    store.save("1", &report.dataset).unwrap();
    api.take_calls();

    let seed = store.load("1").unwrap().unwrap();
    assert_eq!(seed, report.dataset);

    let again = engine.sync_as_of(&account("1"), seed, today).unwrap();
    assert_eq!(again.stats.windows_fetched, 0);
    assert_eq!(api.take_calls().len(), 2);
}

#[test]
fn test_sqlite_realm_store_shares_global_budget() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("realms.db");
    let api = ScriptedApi::new("X1", "2020-01-01");

    // Two engines, as two processes would build them
    let engines: Vec<SyncEngine> = (0..2)
        .map(|_| {
            let store = Arc::new(SqliteRealmStore::open(&path).unwrap());
            let gate = RateGate::new(store, RateQuota::new(3, 3600)).unwrap();
            SyncEngine::new(api.clone(), Arc::new(gate)).with_catalog(once_only_catalog())
        })
        .collect();

    let first = engines[0]
        .sync_as_of(&account("a"), Dataset::empty(), date(2020, 1, 2))
        .unwrap();
    let second = engines[1]
        .sync_as_of(&account("b"), Dataset::empty(), date(2020, 1, 2))
        .unwrap();

    assert!(first.is_complete());
    assert_eq!(second.halted.unwrap().realm, "fitbit");
    assert_eq!(api.call_count(), 3);
}
