//! Rate limiting for remote API calls
//!
//! The gate checks every realm a request belongs to before the call is made.
//! Counter storage sits behind [`RealmStore`] so a single process can use
//! in-memory counters while several processes share a SQLite database.

mod gate;
mod memory;
mod sqlite;
mod traits;

pub use gate::{Clock, RateGate};
pub use memory::InMemoryRealmStore;
pub use sqlite::SqliteRealmStore;
pub use traits::{AcquireOutcome, RealmStore, RealmUsage};
