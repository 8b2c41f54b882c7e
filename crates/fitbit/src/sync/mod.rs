//! Sync engine for fetching and merging account data
//!
//! Provides idempotent, resumable sync operations that can be safely retried.

mod engine;
mod windows;

pub use engine::{SyncAccount, SyncEngine, SyncFailure, SyncReport, SyncStats};
pub use windows::{SyncWindow, Windows, windows};
