//! Domain models for synced Fitbit data

mod dataset;
mod profile;
mod realm;

pub use dataset::{Dataset, DATASET_FORMAT_VERSION};
pub use profile::Profile;
pub use realm::{RateQuota, RateRealm};
