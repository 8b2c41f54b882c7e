//! Fitbit Web API integration
//!
//! This module provides:
//! - OAuth2 token handling and the credential provider seam
//! - Fitbit API client issuing authenticated GET requests
//! - Response types for the calls the sync engine interprets itself

mod auth;
mod client;

use serde_json::Value;

use crate::error::SyncError;

pub use auth::{CredentialProvider, FitbitAuth, StaticToken, StoredToken};
pub use client::FitbitClient;

/// Remote API used by the sync engine
///
/// [`FitbitClient`] talks HTTPS; tests substitute an in-memory fake.
pub trait FitbitApi: Send + Sync {
    /// GET a path relative to the user API base and parse the JSON body
    ///
    /// Errors map to [`SyncError::RemoteAuth`] for rejected tokens,
    /// [`SyncError::RateLimited`] for a remote 429 and
    /// [`SyncError::RemoteProtocol`] for everything else.
    fn get_json(&self, path: &str, access_token: &str) -> Result<Value, SyncError>;
}

/// Fitbit API response types
pub mod types {
    use serde::Deserialize;

    use crate::models::Profile;

    /// Path of the authenticated user's profile
    pub const PROFILE_PATH: &str = "/-/profile.json";

    /// Response from the profile endpoint
    #[derive(Debug, Deserialize)]
    pub struct ProfileResponse {
        pub user: Profile,
    }

    /// Response from the OAuth token endpoint
    #[derive(Debug, Deserialize)]
    pub struct TokenResponse {
        pub access_token: String,
        pub refresh_token: Option<String>,
        pub expires_in: Option<u64>,
        /// Fitbit returns the encoded user id with every token
        pub user_id: Option<String>,
        pub scope: Option<String>,
        #[allow(dead_code)]
        pub token_type: Option<String>,
    }

}
