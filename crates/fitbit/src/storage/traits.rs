//! Storage trait definitions

use anyhow::{Result, bail};

use crate::models::Dataset;

/// Trait for dataset persistence, keyed by local account
pub trait DatasetStore: Send + Sync {
    /// Load the dataset on file for an account
    fn load(&self, account_key: &str) -> Result<Option<Dataset>>;

    /// Save (replace) the dataset for an account
    fn save(&self, account_key: &str, dataset: &Dataset) -> Result<()>;

    /// Remove the dataset for an account; missing datasets are not an error
    fn delete(&self, account_key: &str) -> Result<()>;

    /// Account keys with a stored dataset, sorted
    fn accounts(&self) -> Result<Vec<String>>;
}

/// Reject keys that cannot be used as a single path component
pub(crate) fn check_account_key(account_key: &str) -> Result<()> {
    if account_key.is_empty()
        || account_key == "."
        || account_key == ".."
        || account_key.contains(['/', '\\', '\0'])
    {
        bail!("Invalid account key: {:?}", account_key);
    }
    Ok(())
}
