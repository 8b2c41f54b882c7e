//! Dataset persistence
//!
//! The sync engine never touches storage itself: the caller loads the
//! dataset on file, passes it in as the resume seed and saves whatever the
//! run returns. These stores cover the common cases.

mod file;
mod memory;
mod traits;

pub use file::FileDatasetStore;
pub use memory::InMemoryDatasetStore;
pub use traits::DatasetStore;
