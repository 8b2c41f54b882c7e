//! fitsync - Pull Fitbit account history into a local dataset
//!
//! Commands:
//! - `authorize` - run the OAuth flow (browser + localhost callback) or print the URL
//! - `exchange` - trade an authorization code for tokens
//! - `logout` - forget the stored tokens
//! - `sync` - fetch every missing window for an account
//! - `export` - write the flat JSON export of a stored dataset
//! - `status` - summarize a stored dataset and the rate budgets

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use fitbit::{
    CredentialProvider, Dataset, DatasetStore, FileDatasetStore, FitbitAuth, FitbitCredentials,
    RateRealm, StaticToken, SyncAccount, SyncEngine, SyncError, SyncFailure, SyncSettings,
};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Exit code for a run stopped by a rate limit; re-run later to resume
const EXIT_RATE_LIMITED: i32 = 2;

#[derive(Parser)]
#[command(name = "fitsync", about = "Incremental, rate-limited Fitbit data sync")]
struct Cli {
    /// Dataset directory. Defaults to the fitsync data directory.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Settings file. Defaults to sync-settings.json in the config directory.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authorize access to a Fitbit account.
    Authorize {
        /// Only print the authorization URL instead of waiting for the callback.
        #[arg(long, default_value_t = false)]
        print_url: bool,
    },
    /// Exchange an authorization code for tokens.
    Exchange {
        /// Code from the authorization redirect.
        #[arg(long)]
        code: String,
    },
    /// Delete the stored OAuth tokens.
    Logout,
    /// Fetch every window missing from an account's dataset.
    Sync {
        /// Local account key (names the per-account rate budget and dataset file).
        #[arg(long)]
        account: String,

        /// Use this bearer token instead of the stored OAuth tokens.
        #[arg(long)]
        token: Option<String>,

        /// Generate windows up to this date (YYYY-MM-DD). Defaults to today (UTC).
        #[arg(long)]
        as_of: Option<String>,
    },
    /// Write the flat JSON export of a stored dataset.
    Export {
        #[arg(long)]
        account: String,

        /// Output file. Defaults to stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Summarize a stored dataset and the current rate budget usage.
    Status {
        #[arg(long)]
        account: String,
    },
}

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // Bootstrap config directory
    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let settings = match &cli.settings {
        Some(path) => SyncSettings::from_file(path)?,
        None => SyncSettings::load()?,
    };

    match cli.command {
        Commands::Authorize { print_url } => run_authorize(print_url),
        Commands::Exchange { code } => run_exchange(&code),
        Commands::Logout => run_logout(),
        Commands::Sync {
            account,
            token,
            as_of,
        } => run_sync(&settings, &dataset_store(cli.data_dir.as_deref())?, &account, token, as_of),
        Commands::Export { account, out } => {
            run_export(&dataset_store(cli.data_dir.as_deref())?, &account, out)
        }
        Commands::Status { account } => {
            run_status(&settings, &dataset_store(cli.data_dir.as_deref())?, &account)
        }
    }
}

fn dataset_store(data_dir: Option<&Path>) -> Result<FileDatasetStore> {
    match data_dir {
        Some(dir) => FileDatasetStore::new(dir),
        None => FileDatasetStore::open_default(),
    }
}

fn oauth() -> Result<FitbitAuth> {
    let creds = FitbitCredentials::load().map_err(|e| {
        if let Some(path) = FitbitCredentials::default_credentials_path() {
            warn!(
                "To configure Fitbit access, either:\n\
                 1. Place your Fitbit OAuth credentials at: {}\n\
                 2. Or set environment variables: FITBIT_CLIENT_ID and FITBIT_CLIENT_SECRET",
                path.display()
            );
        }
        e
    })?;

    let auth = FitbitAuth::new(creds.client_id, creds.client_secret)?;
    Ok(match creds.redirect_uri {
        Some(redirect_uri) => auth.with_redirect_uri(redirect_uri),
        None => auth,
    })
}

fn run_authorize(print_url: bool) -> Result<i32> {
    let auth = oauth()?;
    if print_url {
        println!("{}", auth.authorization_url());
        return Ok(0);
    }

    let token = auth.authorize_interactive()?;
    info!(
        "Authorized Fitbit user {}",
        token.user_id.as_deref().unwrap_or("(unknown)")
    );
    Ok(0)
}

fn run_exchange(code: &str) -> Result<i32> {
    let auth = oauth()?;
    let token = auth.exchange_code(code)?;
    info!(
        "Stored tokens for Fitbit user {} at {}",
        token.user_id.as_deref().unwrap_or("(unknown)"),
        auth.token_path().display()
    );
    Ok(0)
}

fn run_logout() -> Result<i32> {
    let auth = oauth()?;
    auth.logout()?;
    info!("Removed stored tokens at {}", auth.token_path().display());
    Ok(0)
}

fn run_sync(
    settings: &SyncSettings,
    store: &FileDatasetStore,
    account_key: &str,
    token: Option<String>,
    as_of: Option<String>,
) -> Result<i32> {
    let credentials: Arc<dyn CredentialProvider> = match token {
        Some(token) => Arc::new(StaticToken::new(token)),
        None => Arc::new(oauth()?),
    };
    let account = SyncAccount::new(account_key, credentials);

    let today = as_of
        .as_deref()
        .map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .transpose()
        .context("--as-of must be YYYY-MM-DD")?
        .unwrap_or_else(|| chrono::Utc::now().date_naive());

    let engine = SyncEngine::from_settings(settings)?;
    let seed = store.load(account_key)?.unwrap_or_default();

    let report = match engine.sync_as_of(&account, seed, today) {
        Ok(report) => report,
        Err(SyncFailure {
            error,
            dataset,
            stats,
        }) => {
            // Keep what was merged so the next run resumes after it
            if stats.requests_made > 0 {
                store.save(account_key, &dataset)?;
                info!(
                    "Stored {} windows fetched before the failure",
                    stats.windows_fetched
                );
            }
            match error {
                SyncError::RemoteAuth(message) => {
                    bail!("Authorization failed ({}); run `fitsync authorize` again", message)
                }
                other => return Err(other.into()),
            }
        }
    };

    store.save(account_key, &report.dataset)?;

    let stats = &report.stats;
    println!(
        "{} windows fetched, {} already stored, {} snapshots refreshed, {} requests in {}ms",
        stats.windows_fetched,
        stats.windows_skipped,
        stats.snapshots_refreshed,
        stats.requests_made,
        stats.duration_ms
    );
    if stats.dataset_reset {
        println!("The remote account changed; previously stored data was discarded.");
    }

    match report.halted {
        Some(limit) => {
            println!("Stopped early: {}. Run again later to continue.", limit);
            Ok(EXIT_RATE_LIMITED)
        }
        None => Ok(0),
    }
}

fn run_export(store: &FileDatasetStore, account_key: &str, out: Option<PathBuf>) -> Result<i32> {
    let dataset = store
        .load(account_key)?
        .with_context(|| format!("No dataset stored for account {}", account_key))?;
    let json = serde_json::to_string_pretty(&dataset.to_export_json())?;

    match out {
        Some(path) => {
            std::fs::write(&path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Exported {} to {}", account_key, path.display());
        }
        None => println!("{}", json),
    }
    Ok(0)
}

fn run_status(settings: &SyncSettings, store: &FileDatasetStore, account_key: &str) -> Result<i32> {
    match store.load(account_key)? {
        Some(dataset) => print_dataset_summary(&dataset),
        None => println!("No dataset stored for account {}", account_key),
    }

    if FitbitCredentials::is_available() {
        let signed_in = oauth()?.is_authenticated();
        println!("OAuth tokens: {}", if signed_in { "stored" } else { "missing or expired" });
    }

    let engine = SyncEngine::from_settings(settings)?;
    let gate = engine.gate();
    for realm in [
        RateRealm::GLOBAL.to_string(),
        RateRealm::account_realm_name(account_key),
    ] {
        match gate.usage(&realm)? {
            Some(usage) => println!(
                "Realm {}: {}/{} requests used in the last {}s",
                usage.realm,
                usage.used,
                usage.max_requests,
                usage.timespan.as_secs()
            ),
            None => println!("Realm {}: no requests recorded", realm),
        }
    }
    Ok(0)
}

fn print_dataset_summary(dataset: &Dataset) {
    match &dataset.profile {
        Some(profile) => println!(
            "Fitbit user {} (member since {})",
            profile.encoded_id, profile.member_since
        ),
        None => println!("No profile synced yet"),
    }

    let snapshots: Vec<&str> = dataset.snapshot_names().collect();
    println!("Snapshots: {}", snapshots.join(", "));

    for name in dataset.series_names() {
        let periods = dataset.series(name).map(|s| s.len()).unwrap_or(0);
        let latest = dataset
            .series(name)
            .and_then(|s| s.keys().next_back())
            .map(String::as_str)
            .unwrap_or("-");
        println!("  {:<32} {:>4} periods (latest {})", name, periods, latest);
    }
}
