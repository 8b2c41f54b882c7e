//! Fitbit OAuth2 token handling
//!
//! Implements the authorization code grant (with HTTP Basic client
//! authentication, as Fitbit requires) and refresh-token renewal.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::types::TokenResponse;

/// Supplies bearer tokens to the sync engine
///
/// Refresh policy belongs to the implementation; the engine only asks for a
/// token and reports when the remote rejected it.
pub trait CredentialProvider: Send + Sync {
    /// A bearer token to send with the next request
    fn access_token(&self) -> Result<String>;

    /// The remote rejected the last token
    fn report_invalid(&self) {}
}

/// A fixed bearer token (tests, tokens minted elsewhere)
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl CredentialProvider for StaticToken {
    fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Token data persisted between runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix timestamp (seconds)
    pub expires_at: Option<i64>,
    /// Encoded id of the Fitbit user who granted the token
    pub user_id: Option<String>,
    pub scope: Option<String>,
}

impl StoredToken {
    /// Seconds of validity required before a token is used as-is
    const EXPIRY_BUFFER_SECS: i64 = 300;

    fn from_response(token: TokenResponse) -> Self {
        Self {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: token
                .expires_in
                .map(|d| chrono::Utc::now().timestamp() + d as i64),
            user_id: token.user_id,
            scope: token.scope,
        }
    }

    /// Whether the token is still usable for at least the expiry buffer
    pub fn is_fresh(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                expires_at > chrono::Utc::now().timestamp() + Self::EXPIRY_BUFFER_SECS
            }
            None => false,
        }
    }
}

/// OAuth2 configuration and token management for Fitbit
pub struct FitbitAuth {
    client_id: String,
    client_secret: String,
    redirect_uri: Option<String>,
    token_path: PathBuf,
    /// Serializes refreshes so concurrent callers don't burn the refresh token twice
    refresh_lock: Mutex<()>,
}

impl FitbitAuth {
    /// Fitbit OAuth2 endpoints
    const AUTH_URL: &'static str = "https://www.fitbit.com/oauth2/authorize";
    const TOKEN_URL: &'static str = "https://api.fitbit.com/oauth2/token";

    /// Scopes covering every endpoint in the catalog
    const SCOPES: &'static [&'static str] = &[
        "activity",
        "heartrate",
        "location",
        "nutrition",
        "profile",
        "settings",
        "sleep",
        "social",
        "weight",
    ];

    /// Create a new FitbitAuth instance storing tokens in the config directory
    ///
    /// # Arguments
    /// * `client_id` - OAuth2 client ID from the Fitbit developer console
    /// * `client_secret` - OAuth2 client secret from the Fitbit developer console
    pub fn new(client_id: String, client_secret: String) -> Result<Self> {
        let token_path = Self::default_token_path()?;
        Ok(Self::with_token_path(client_id, client_secret, token_path))
    }

    /// Create a FitbitAuth instance storing tokens at an explicit path
    pub fn with_token_path(
        client_id: String,
        client_secret: String,
        token_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client_id,
            client_secret,
            redirect_uri: None,
            token_path: token_path.into(),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Set the redirect URI registered for the application
    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    /// Get the default token storage path (~/.config/fitsync/fitbit-tokens.json)
    fn default_token_path() -> Result<PathBuf> {
        config::config_path("fitbit-tokens.json").context("Could not determine config directory")
    }

    pub fn token_path(&self) -> &Path {
        &self.token_path
    }

    /// URL the user opens to grant access
    pub fn authorization_url(&self) -> String {
        let mut url = format!(
            "{}?response_type=code&client_id={}&scope={}",
            Self::AUTH_URL,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&Self::SCOPES.join(" ")),
        );
        if let Some(redirect_uri) = &self.redirect_uri {
            url.push_str(&format!("&redirect_uri={}", urlencoding::encode(redirect_uri)));
        }
        url
    }

    /// `Authorization` header value for the token endpoint
    fn basic_auth_header(&self) -> String {
        let credentials = format!("{}:{}", self.client_id, self.client_secret);
        format!("Basic {}", BASE64.encode(credentials.as_bytes()))
    }

    /// Exchange an authorization code for tokens and store them
    pub fn exchange_code(&self, code: &str) -> Result<StoredToken> {
        info!("Exchanging authorization code for tokens");

        let mut form = vec![("code", code), ("grant_type", "authorization_code")];
        if let Some(redirect_uri) = &self.redirect_uri {
            form.push(("redirect_uri", redirect_uri.as_str()));
        }
        form.push(("client_id", self.client_id.as_str()));

        let mut response = ureq::post(Self::TOKEN_URL)
            .header("Authorization", &self.basic_auth_header())
            .send_form(form)
            .context("Failed to exchange authorization code")?;

        let token: TokenResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse token response")?;

        let stored = StoredToken::from_response(token);
        self.save_token(&stored)?;
        Ok(stored)
    }

    /// Run the authorization flow in the browser and store the tokens
    ///
    /// The redirect URI registered for the application must point at
    /// `localhost`; a one-shot listener on its port receives the callback.
    pub fn authorize_interactive(&self) -> Result<StoredToken> {
        let redirect_uri = self
            .redirect_uri
            .as_deref()
            .context("Interactive authorization needs a localhost redirect URI")?;
        let port = callback_port(redirect_uri)?;

        let listener = TcpListener::bind(("127.0.0.1", port))
            .with_context(|| format!("Could not listen on port {}", port))?;
        let auth_url = self.authorization_url();

        println!("\n=== Fitbit Authorization Required ===");
        println!("Opening browser for authorization...");
        println!("If the browser doesn't open, visit: {}", auth_url);

        if let Err(e) = open::that(&auth_url) {
            eprintln!("Failed to open browser: {}. Please open the URL manually.", e);
        }

        println!("Waiting for authorization...");
        let code = wait_for_callback(listener)?;

        let token = self.exchange_code(&code)?;
        println!("Authorization successful!\n");
        Ok(token)
    }

    /// Refresh an access token using a refresh token
    fn refresh_access_token(&self, refresh_token: &str) -> Result<StoredToken> {
        debug!("Refreshing Fitbit access token");

        let mut response = ureq::post(Self::TOKEN_URL)
            .header("Authorization", &self.basic_auth_header())
            .send_form([
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .context("Failed to refresh access token")?;

        let mut token: TokenResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse refresh token response")?;

        // Preserve the refresh token if not returned
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }

        Ok(StoredToken::from_response(token))
    }

    /// Load stored token from disk
    pub fn load_token(&self) -> Result<StoredToken> {
        let content = fs::read_to_string(&self.token_path)
            .with_context(|| format!("No stored token at {}", self.token_path.display()))?;
        let token: StoredToken = serde_json::from_str(&content)?;
        Ok(token)
    }

    /// Save token to disk
    pub fn save_token(&self, token: &StoredToken) -> Result<()> {
        config::save_json_file(&self.token_path, token)
    }

    /// Check if a usable token is stored (without touching the network)
    pub fn is_authenticated(&self) -> bool {
        self.load_token()
            .map(|t| t.is_fresh() || t.refresh_token.is_some())
            .unwrap_or(false)
    }

    /// Clear stored tokens (logout)
    pub fn logout(&self) -> Result<()> {
        if self.token_path.exists() {
            fs::remove_file(&self.token_path)?;
        }
        Ok(())
    }
}

/// Port of a localhost redirect URI
fn callback_port(redirect_uri: &str) -> Result<u16> {
    let url = url::Url::parse(redirect_uri)
        .with_context(|| format!("Invalid redirect URI: {}", redirect_uri))?;
    match url.host_str() {
        Some("localhost" | "127.0.0.1") => {}
        _ => anyhow::bail!("Redirect URI is not local: {}", redirect_uri),
    }
    url.port_or_known_default()
        .context("Redirect URI has no port")
}

/// Accept one callback request and extract the authorization code
fn wait_for_callback(listener: TcpListener) -> Result<String> {
    let (mut stream, _) = listener.accept().context("Failed to accept connection")?;

    let mut reader = BufReader::new(&stream);
    let mut request_line = String::new();
    reader
        .read_line(&mut request_line)
        .context("Failed to read request")?;

    let result = parse_callback(&request_line);

    let (status, body) = if result.is_ok() {
        ("200 OK", "Authorization successful! You can close this window.")
    } else {
        ("400 Bad Request", "Authorization failed. Please try again.")
    };
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n<html><body><h1>{}</h1></body></html>",
        status, body
    );
    stream.write_all(response.as_bytes()).ok();

    result
}

/// Parse `GET /callback?code=...&state=... HTTP/1.1`
fn parse_callback(request_line: &str) -> Result<String> {
    let target = request_line
        .split_whitespace()
        .nth(1)
        .context("Malformed callback request")?;
    let url = url::Url::parse(&format!("http://localhost{}", target))
        .context("Malformed callback target")?;

    let mut code = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "error" => anyhow::bail!("OAuth error: {}", value),
            "code" => code = Some(value.into_owned()),
            _ => {}
        }
    }

    code.context("No authorization code received")
}

impl CredentialProvider for FitbitAuth {
    fn access_token(&self) -> Result<String> {
        let _guard = self.refresh_lock.lock().unwrap();
        let token = self
            .load_token()
            .context("Not authorized; complete the authorization flow first")?;

        if token.is_fresh() {
            return Ok(token.access_token);
        }

        let refresh_token = token
            .refresh_token
            .context("Access token expired and no refresh token is stored")?;
        let mut refreshed = self.refresh_access_token(&refresh_token)?;
        if refreshed.user_id.is_none() {
            refreshed.user_id = token.user_id;
        }
        self.save_token(&refreshed)?;
        Ok(refreshed.access_token)
    }

    fn report_invalid(&self) {
        let _guard = self.refresh_lock.lock().unwrap();
        // Force a refresh on the next request
        match self.load_token() {
            Ok(mut token) => {
                token.expires_at = Some(0);
                if let Err(e) = self.save_token(&token) {
                    warn!("Failed to mark token as expired: {}", e);
                }
            }
            Err(e) => warn!("No token to invalidate: {}", e),
        }
    }
}
