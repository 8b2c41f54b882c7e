//! Endpoint catalog
//!
//! Static, ordered description of every remote series to fetch and how it
//! is partitioned in time.

use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::sync::SyncWindow;

/// How a remote series is partitioned for fetching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// A single value, refetched on every sync
    Once,
    /// One request per calendar month
    Month,
    /// One request per calendar year
    Year,
}

impl Granularity {
    /// Order in which granularities are synced
    ///
    /// Yearly series come before monthly ones so that a tight budget fills in
    /// the cheaper aggregates first.
    pub const SYNC_ORDER: [Granularity; 3] = [Granularity::Once, Granularity::Year, Granularity::Month];

    pub fn is_periodic(&self) -> bool {
        !matches!(self, Granularity::Once)
    }
}

/// One remote series
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// Unique key in the dataset
    pub name: String,
    /// Path relative to the API base, with `{user_id}`, `{start_date}` and
    /// `{end_date}` placeholders
    pub url_template: String,
    pub granularity: Granularity,
}

impl EndpointDescriptor {
    pub fn new(
        name: impl Into<String>,
        url_template: impl Into<String>,
        granularity: Granularity,
    ) -> Self {
        Self {
            name: name.into(),
            url_template: url_template.into(),
            granularity,
        }
    }

    /// Render the request path for a user and window
    ///
    /// Date placeholders are only substituted when the window has bounds.
    pub fn resolve(&self, user_id: &str, window: &SyncWindow) -> String {
        let path = self.url_template.replace("{user_id}", user_id);
        match window.bounds() {
            Some((start, end)) => path
                .replace("{start_date}", &format_date(start))
                .replace("{end_date}", &format_date(end)),
            None => path,
        }
    }
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Ordered set of endpoints to sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointCatalog {
    endpoints: Vec<EndpointDescriptor>,
}

impl EndpointCatalog {
    /// Build a catalog, rejecting duplicate names
    pub fn new(endpoints: Vec<EndpointDescriptor>) -> Result<Self> {
        for (i, endpoint) in endpoints.iter().enumerate() {
            if endpoints[..i].iter().any(|e| e.name == endpoint.name) {
                anyhow::bail!("Duplicate endpoint name in catalog: {}", endpoint.name);
            }
        }
        Ok(Self { endpoints })
    }

    /// Every endpoint, in catalog order
    pub fn list(&self) -> &[EndpointDescriptor] {
        &self.endpoints
    }

    /// Endpoints of one granularity, in catalog order
    pub fn with_granularity(
        &self,
        granularity: Granularity,
    ) -> impl Iterator<Item = &EndpointDescriptor> {
        self.endpoints
            .iter()
            .filter(move |e| e.granularity == granularity)
    }

    pub fn get(&self, name: &str) -> Option<&EndpointDescriptor> {
        self.endpoints.iter().find(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// The production Fitbit catalog
    ///
    /// Device listing needs the `settings` scope and is left out. Activity
    /// calories are fetched monthly because full-year requests for that
    /// series time out on the remote side.
    pub fn fitbit() -> Self {
        use Granularity::{Month, Once, Year};

        const ENDPOINTS: &[(&str, &str, Granularity)] = &[
            ("activities-overview", "/{user_id}/activities.json", Once),
            ("heart", "/{user_id}/activities/heart/date/{start_date}/{end_date}.json", Month),
            ("tracker-activity-calories", "/{user_id}/activities/tracker/activityCalories/date/{start_date}/{end_date}.json", Month),
            ("tracker-calories", "/{user_id}/activities/tracker/calories/date/{start_date}/{end_date}.json", Year),
            ("tracker-distance", "/{user_id}/activities/tracker/distance/date/{start_date}/{end_date}.json", Year),
            ("tracker-elevation", "/{user_id}/activities/tracker/elevation/date/{start_date}/{end_date}.json", Year),
            ("tracker-floors", "/{user_id}/activities/tracker/floors/date/{start_date}/{end_date}.json", Year),
            ("tracker-minutes-fairly-active", "/{user_id}/activities/tracker/minutesFairlyActive/date/{start_date}/{end_date}.json", Year),
            ("tracker-minutes-lightly-active", "/{user_id}/activities/tracker/minutesLightlyActive/date/{start_date}/{end_date}.json", Year),
            ("tracker-minutes-sedentary", "/{user_id}/activities/tracker/minutesSedentary/date/{start_date}/{end_date}.json", Year),
            ("tracker-minutes-very-active", "/{user_id}/activities/tracker/minutesVeryActive/date/{start_date}/{end_date}.json", Year),
            ("tracker-steps", "/{user_id}/activities/tracker/steps/date/{start_date}/{end_date}.json", Year),
            ("weight-log", "/{user_id}/body/log/weight/date/{start_date}/{end_date}.json", Month),
            ("weight", "/{user_id}/body/weight/date/{start_date}/{end_date}.json", Year),
            ("sleep-awakenings", "/{user_id}/sleep/awakeningsCount/date/{start_date}/{end_date}.json", Year),
            ("sleep-efficiency", "/{user_id}/sleep/efficiency/date/{start_date}/{end_date}.json", Year),
            ("sleep-minutes-after-wakeup", "/{user_id}/sleep/minutesAfterWakeup/date/{start_date}/{end_date}.json", Year),
            ("sleep-minutes", "/{user_id}/sleep/minutesAsleep/date/{start_date}/{end_date}.json", Year),
            ("awake-minutes", "/{user_id}/sleep/minutesAwake/date/{start_date}/{end_date}.json", Year),
            ("minutes-to-sleep", "/{user_id}/sleep/minutesToFallAsleep/date/{start_date}/{end_date}.json", Year),
            ("sleep-start-time", "/{user_id}/sleep/startTime/date/{start_date}/{end_date}.json", Year),
            ("time-in-bed", "/{user_id}/sleep/timeInBed/date/{start_date}/{end_date}.json", Year),
        ];

        Self {
            endpoints: ENDPOINTS
                .iter()
                .map(|(name, url, granularity)| EndpointDescriptor::new(*name, *url, *granularity))
                .collect(),
        }
    }
}

impl Default for EndpointCatalog {
    fn default() -> Self {
        Self::fitbit()
    }
}
