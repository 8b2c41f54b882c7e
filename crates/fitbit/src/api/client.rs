//! Fitbit API HTTP client
//!
//! Issues authenticated GET requests against the user API.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use serde_json::Value;
use std::time::Duration;

use super::FitbitApi;
use crate::error::{REMOTE_REALM, RateLimitExceeded, SyncError};

/// Fitbit API client
pub struct FitbitClient {
    agent: ureq::Agent,
    base_url: String,
}

impl FitbitClient {
    /// Fitbit user API base URL
    pub const BASE_URL: &'static str = "https://api.fitbit.com/1/user";

    /// Per-request timeout when none is configured
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Create a client for the public Fitbit API
    pub fn new() -> Self {
        Self::with_base_url(Self::BASE_URL, Self::DEFAULT_TIMEOUT)
    }

    /// Create a client for an alternative base URL (proxies, test servers)
    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();

        Self {
            agent: ureq::Agent::new_with_config(config),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Default for FitbitClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FitbitApi for FitbitClient {
    fn get_json(&self, path: &str, access_token: &str) -> Result<Value, SyncError> {
        let url = format!("{}{}", self.base_url, path);

        let mut response = self
            .agent
            .get(&url)
            .header("Authorization", &format!("Bearer {}", access_token))
            .call()
            .map_err(|e| match e {
                ureq::Error::Timeout(_) => SyncError::protocol(path, None, "Request timed out"),
                other => SyncError::protocol(path, None, format!("Request failed: {}", other)),
            })?;

        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if let Some(err) = classify_status(response.status().as_u16(), retry_after.as_deref(), path) {
            return Err(err);
        }

        response
            .body_mut()
            .read_json::<Value>()
            .map_err(|e| SyncError::protocol(path, None, format!("Failed to parse response: {}", e)))
    }
}

/// Map an HTTP status to the error taxonomy; `None` when a JSON body follows
///
/// Only 401 means the token itself is bad. A 403 is a scope problem of one
/// resource and must not expire the stored token.
fn classify_status(status: u16, retry_after: Option<&str>, path: &str) -> Option<SyncError> {
    match status {
        204 => Some(SyncError::protocol(path, None, "HTTP 204: empty body")),
        200..=299 => None,
        401 => Some(SyncError::RemoteAuth(format!("HTTP 401 for {}", path))),
        403 => Some(SyncError::protocol(
            path,
            None,
            "HTTP 403: token lacks the scope for this resource",
        )),
        429 => {
            let retry_after = retry_after
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            Some(RateLimitExceeded::new(REMOTE_REALM, retry_after).into())
        }
        _ => Some(SyncError::protocol(path, None, format!("HTTP {}", status))),
    }
}
