//! Dataset model holding everything synced for one account

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::Profile;

/// Bumped when the serialized layout changes
pub const DATASET_FORMAT_VERSION: u32 = 1;

fn default_version() -> u32 {
    DATASET_FORMAT_VERSION
}

/// All data synced for one account
///
/// Owned by a single sync run; persisted between runs and passed back in as
/// the resume seed. Single-value endpoints live in `snapshots`, time-partitioned
/// endpoints in `series` keyed by period (`"2021"` or `"2021-03"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default = "default_version")]
    pub format_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
    #[serde(default)]
    snapshots: BTreeMap<String, Value>,
    #[serde(default)]
    series: BTreeMap<String, BTreeMap<String, Value>>,
}

impl Dataset {
    /// Create an empty dataset (first sync, or after an account switch)
    pub fn empty() -> Self {
        Self {
            format_version: DATASET_FORMAT_VERSION,
            profile: None,
            snapshots: BTreeMap::new(),
            series: BTreeMap::new(),
        }
    }

    /// Encoded ID of the account this data belongs to, if known
    pub fn encoded_id(&self) -> Option<&str> {
        self.profile.as_ref().map(|p| p.encoded_id.as_str())
    }

    /// Replace the profile wholesale
    pub fn set_profile(&mut self, profile: Profile) {
        self.profile = Some(profile);
    }

    /// Get the stored value of a single-value endpoint
    pub fn snapshot(&self, endpoint: &str) -> Option<&Value> {
        self.snapshots.get(endpoint)
    }

    /// Store a single-value endpoint, overwriting any previous value
    pub fn set_snapshot(&mut self, endpoint: impl Into<String>, value: Value) {
        self.snapshots.insert(endpoint.into(), value);
    }

    /// Get all stored periods of a time-partitioned endpoint
    pub fn series(&self, endpoint: &str) -> Option<&BTreeMap<String, Value>> {
        self.series.get(endpoint)
    }

    /// Get one stored period of a time-partitioned endpoint
    pub fn period(&self, endpoint: &str, period_key: &str) -> Option<&Value> {
        self.series.get(endpoint)?.get(period_key)
    }

    /// Whether a period has already been fetched
    pub fn has_period(&self, endpoint: &str, period_key: &str) -> bool {
        self.period(endpoint, period_key).is_some()
    }

    /// Make sure a series mapping exists for the endpoint
    pub fn ensure_series(&mut self, endpoint: &str) -> &mut BTreeMap<String, Value> {
        self.series.entry(endpoint.to_string()).or_default()
    }

    /// Store one period of a time-partitioned endpoint
    pub fn insert_period(
        &mut self,
        endpoint: &str,
        period_key: impl Into<String>,
        value: Value,
    ) {
        self.ensure_series(endpoint).insert(period_key.into(), value);
    }

    /// Names of single-value endpoints present
    pub fn snapshot_names(&self) -> impl Iterator<Item = &str> {
        self.snapshots.keys().map(String::as_str)
    }

    /// Names of time-partitioned endpoints present
    pub fn series_names(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    /// Total number of stored periods across all series
    pub fn period_count(&self) -> usize {
        self.series.values().map(BTreeMap::len).sum()
    }

    /// True if nothing has been synced yet
    pub fn is_empty(&self) -> bool {
        self.profile.is_none() && self.snapshots.is_empty() && self.period_count() == 0
    }

    /// Render the flat export layout
    ///
    /// A `profile` entry plus every endpoint name mapped either to its value
    /// or to its period map. This is the document handed to downstream
    /// consumers; the typed layout is only for persistence between runs.
    pub fn to_export_json(&self) -> Value {
        let mut root = Map::new();

        if let Some(profile) = &self.profile {
            root.insert(
                "profile".to_string(),
                serde_json::to_value(profile).unwrap_or(Value::Null),
            );
        }

        for (name, value) in &self.snapshots {
            root.insert(name.clone(), value.clone());
        }

        for (name, periods) in &self.series {
            let periods: Map<String, Value> = periods
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            root.insert(name.clone(), Value::Object(periods));
        }

        Value::Object(root)
    }
}

impl Default for Dataset {
    fn default() -> Self {
        Self::empty()
    }
}
