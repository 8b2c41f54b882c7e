//! Account profile summary stored in every dataset

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Identity and summary facts for the synced account
///
/// Refreshed in full on every sync; never merged field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Opaque remote account identifier, used to detect account switches
    pub encoded_id: String,
    /// First day of data on the account; windows start here
    pub member_since: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_daily_steps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stride_length_running: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stride_length_walking: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

impl Profile {
    /// Create a profile with only the identity fields set
    pub fn new(encoded_id: impl Into<String>, member_since: NaiveDate) -> Self {
        Self {
            encoded_id: encoded_id.into(),
            member_since,
            average_daily_steps: None,
            height: None,
            stride_length_running: None,
            stride_length_walking: None,
            weight: None,
        }
    }

    /// Whether this profile belongs to the given remote account
    pub fn is_same_account(&self, encoded_id: &str) -> bool {
        self.encoded_id == encoded_id
    }
}
