//! Error types for sync operations
//!
//! Rate exhaustion is kept as its own type so callers can tell "try again
//! later" apart from failures that need credentials or a bug fix.

use std::time::Duration;

/// Realm name used when the remote API itself answers 429
///
/// Local realms are `fitbit` or `fitbit-<key>`, so the `:` keeps this name
/// out of their namespace.
pub const REMOTE_REALM: &str = "fitbit:remote";

/// A rate budget has no free slot for the request
///
/// Recoverable: the caller retries later and the sync resumes where it
/// stopped because already-stored windows are skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Rate limit exceeded for realm '{realm}'{}", retry_hint(.retry_after))]
pub struct RateLimitExceeded {
    /// Realm whose budget was exhausted
    pub realm: String,
    /// Time until the oldest counted request leaves the window, if known
    pub retry_after: Option<Duration>,
}

impl RateLimitExceeded {
    pub fn new(realm: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            realm: realm.into(),
            retry_after,
        }
    }

    /// True if the limit came from the remote API rather than a local realm
    pub fn is_remote(&self) -> bool {
        self.realm == REMOTE_REALM
    }
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry in {}s)", d.as_secs().max(1)),
        None => String::new(),
    }
}

fn period_suffix(period: &Option<String>) -> String {
    match period {
        Some(p) => format!(" [{}]", p),
        None => String::new(),
    }
}

/// Errors surfaced by the sync engine and the API client
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A rate budget is exhausted
    #[error(transparent)]
    RateLimited(#[from] RateLimitExceeded),

    /// No usable access token, or the remote rejected the one sent
    #[error("Authorization failed: {0}")]
    RemoteAuth(String),

    /// Unexpected status, malformed body, transport failure or timeout
    #[error("Remote protocol error for {endpoint}{}: {message}", period_suffix(.period))]
    RemoteProtocol {
        endpoint: String,
        period: Option<String>,
        message: String,
    },

    /// Local failure (realm store)
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl SyncError {
    /// Build a protocol error for an endpoint and optional window key
    pub fn protocol(
        endpoint: impl Into<String>,
        period: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self::RemoteProtocol {
            endpoint: endpoint.into(),
            period: period.map(str::to_string),
            message: message.into(),
        }
    }

    /// Attach endpoint/window context to a protocol error raised by the client
    ///
    /// The client only knows the request path; the engine knows which catalog
    /// entry and window it belongs to.
    pub fn in_context(self, endpoint: &str, period: Option<&str>) -> Self {
        match self {
            Self::RemoteProtocol { message, .. } => Self::protocol(endpoint, period, message),
            other => other,
        }
    }

    /// Whether retrying later may succeed without any intervention
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}
