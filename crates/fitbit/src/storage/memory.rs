//! In-memory dataset store

use anyhow::Result;
use std::collections::HashMap;
use std::sync::RwLock;

use super::DatasetStore;
use super::traits::check_account_key;
use crate::models::Dataset;

/// In-memory implementation of DatasetStore
///
/// Datasets are cloned in and out so callers never share a live value.
#[derive(Default)]
pub struct InMemoryDatasetStore {
    datasets: RwLock<HashMap<String, Dataset>>,
}

impl InMemoryDatasetStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }
}

impl DatasetStore for InMemoryDatasetStore {
    fn load(&self, account_key: &str) -> Result<Option<Dataset>> {
        check_account_key(account_key)?;
        Ok(self.datasets.read().unwrap().get(account_key).cloned())
    }

    fn save(&self, account_key: &str, dataset: &Dataset) -> Result<()> {
        check_account_key(account_key)?;
        self.datasets
            .write()
            .unwrap()
            .insert(account_key.to_string(), dataset.clone());
        Ok(())
    }

    fn delete(&self, account_key: &str) -> Result<()> {
        check_account_key(account_key)?;
        self.datasets.write().unwrap().remove(account_key);
        Ok(())
    }

    fn accounts(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.datasets.read().unwrap().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
