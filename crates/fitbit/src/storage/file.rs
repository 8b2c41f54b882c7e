//! File-based dataset storage with zstd compression

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::debug;

use super::DatasetStore;
use super::traits::check_account_key;
use crate::models::Dataset;

const EXTENSION: &str = ".json.zst";

/// One zstd-compressed JSON file per account
///
/// Directory structure:
/// ```text
/// datasets/
///   42.json.zst
///   member-7.json.zst
/// ```
pub struct FileDatasetStore {
    root: PathBuf,
    compression_level: i32,
}

impl FileDatasetStore {
    /// Create a new file dataset store at the given path
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).context("Failed to create dataset directory")?;
        Ok(Self {
            root,
            compression_level: 3,
        })
    }

    /// Store under the default data directory (~/.local/share/fitsync/datasets)
    pub fn open_default() -> Result<Self> {
        let root = config::data_dir()
            .context("Could not determine data directory")?
            .join("datasets");
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the file path for an account's dataset
    pub fn dataset_path(&self, account_key: &str) -> PathBuf {
        self.root.join(format!("{}{}", account_key, EXTENSION))
    }
}

impl DatasetStore for FileDatasetStore {
    fn load(&self, account_key: &str) -> Result<Option<Dataset>> {
        check_account_key(account_key)?;
        let path = self.dataset_path(account_key);

        if !path.exists() {
            return Ok(None);
        }

        let compressed = fs::read(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut decoder = zstd::Decoder::new(compressed.as_slice())?;
        let mut json = Vec::new();
        decoder
            .read_to_end(&mut json)
            .context("Failed to decompress dataset")?;

        let dataset = serde_json::from_slice(&json)
            .with_context(|| format!("Malformed dataset in {}", path.display()))?;
        Ok(Some(dataset))
    }

    fn save(&self, account_key: &str, dataset: &Dataset) -> Result<()> {
        check_account_key(account_key)?;
        let path = self.dataset_path(account_key);

        let json = serde_json::to_vec(dataset)?;
        let compressed = zstd::encode_all(json.as_slice(), self.compression_level)
            .context("Failed to compress dataset")?;

        // Write atomically (write to temp, then rename)
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &compressed)?;
        fs::rename(&temp_path, &path)?;

        debug!(
            "Saved dataset for {} ({} bytes compressed)",
            account_key,
            compressed.len()
        );
        Ok(())
    }

    fn delete(&self, account_key: &str) -> Result<()> {
        check_account_key(account_key)?;
        let path = self.dataset_path(account_key);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    fn accounts(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str()
                && let Some(key) = name.strip_suffix(EXTENSION)
            {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}
