//! Fitbit crate - Incremental, rate-limited sync of Fitbit account data
//!
//! This crate provides platform-independent sync functionality including:
//! - Endpoint catalog describing every remote series and its granularity
//! - Calendar window generation for monthly and yearly series
//! - A rate gate enforcing global and per-account sliding-window budgets
//! - A resumable sync engine that merges new data into an existing dataset
//! - Fitbit API client and OAuth token handling
//! - Dataset persistence abstractions
//!
//! This crate has no UI dependencies; the `fitsync` CLI is a thin wrapper.

pub mod api;
pub mod catalog;
pub mod config;
pub mod error;
pub mod models;
pub mod rate;
pub mod storage;
pub mod sync;

pub use api::{CredentialProvider, FitbitApi, FitbitAuth, FitbitClient, StaticToken};
pub use catalog::{EndpointCatalog, EndpointDescriptor, Granularity};
pub use config::{FitbitCredentials, RealmStoreSettings, SyncSettings};
pub use error::{RateLimitExceeded, SyncError};
pub use models::{Dataset, Profile, RateQuota, RateRealm};
pub use rate::{AcquireOutcome, InMemoryRealmStore, RateGate, RealmStore, SqliteRealmStore};
pub use storage::{DatasetStore, FileDatasetStore, InMemoryDatasetStore};
pub use sync::{
    SyncAccount, SyncEngine, SyncFailure, SyncReport, SyncStats, SyncWindow, Windows, windows,
};
