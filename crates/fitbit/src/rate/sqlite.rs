//! SQLite-backed realm store shared between processes

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use rusqlite_migration::{M, Migrations};

use super::traits::{AcquireOutcome, RealmStore, RealmUsage, retry_after_ms};
use crate::models::RateRealm;

/// How long a writer waits for another process holding the lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        r#"
        CREATE TABLE realms (
            name TEXT PRIMARY KEY,
            max_requests INTEGER NOT NULL,
            timespan_ms INTEGER NOT NULL
        );

        -- One row per request counted in a realm's window
        CREATE TABLE realm_hits (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            realm TEXT NOT NULL,
            at_ms INTEGER NOT NULL,
            FOREIGN KEY (realm) REFERENCES realms(name) ON DELETE CASCADE
        );

        CREATE INDEX idx_realm_hits_realm_at ON realm_hits(realm, at_ms);
        "#,
    )])
}

/// Realm store persisted in SQLite
///
/// Every acquire runs in a `BEGIN IMMEDIATE` transaction, which takes the
/// database write lock up front. Sync runs in different processes pointing
/// at the same file therefore see a single, consistent budget.
pub struct SqliteRealmStore {
    conn: Mutex<Connection>,
}

impl SqliteRealmStore {
    /// Open (or create) a realm database at the given path
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open rate database at {:?}", path))?;
        Self::from_connection(conn)
    }

    /// Create a private in-memory database (tests, single process)
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run rate database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn load_quota(conn: &Connection, realm: &str) -> Result<Option<(u32, i64)>> {
        let quota = conn
            .query_row(
                "SELECT max_requests, timespan_ms FROM realms WHERE name = ?",
                [realm],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(quota)
    }

    /// Delete hits that have left the window; returns (count, oldest)
    fn prune_and_count(
        conn: &Connection,
        realm: &str,
        timespan_ms: i64,
        now_ms: i64,
    ) -> Result<(u32, Option<i64>)> {
        conn.execute(
            "DELETE FROM realm_hits WHERE realm = ? AND at_ms <= ?",
            params![realm, now_ms - timespan_ms],
        )?;
        let (count, oldest): (i64, Option<i64>) = conn.query_row(
            "SELECT COUNT(*), MIN(at_ms) FROM realm_hits WHERE realm = ?",
            [realm],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((count as u32, oldest))
    }
}

impl RealmStore for SqliteRealmStore {
    fn register(&self, realm: &RateRealm) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO realms (name, max_requests, timespan_ms) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET
                max_requests = excluded.max_requests,
                timespan_ms = excluded.timespan_ms",
            params![
                realm.name,
                realm.quota.max_requests,
                realm.quota.timespan_secs as i64 * 1000
            ],
        )?;
        Ok(())
    }

    fn try_acquire(&self, realms: &[&str], now: DateTime<Utc>) -> Result<AcquireOutcome> {
        let now_ms = now.timestamp_millis();
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        for realm in realms {
            let (max_requests, timespan_ms) = Self::load_quota(&tx, realm)?
                .with_context(|| format!("Rate realm not registered: {}", realm))?;
            let (count, oldest) = Self::prune_and_count(&tx, realm, timespan_ms, now_ms)?;

            if count >= max_requests {
                // Keep the pruning, record nothing
                tx.commit()?;
                return Ok(AcquireOutcome::Exhausted {
                    realm: realm.to_string(),
                    retry_after: retry_after_ms(oldest, timespan_ms, now_ms),
                });
            }
        }

        {
            let mut insert = tx.prepare("INSERT INTO realm_hits (realm, at_ms) VALUES (?, ?)")?;
            for realm in realms {
                insert.execute(params![realm, now_ms])?;
            }
        }
        tx.commit()?;

        Ok(AcquireOutcome::Granted)
    }

    fn usage(&self, realm: &str, now: DateTime<Utc>) -> Result<Option<RealmUsage>> {
        let conn = self.conn.lock().unwrap();
        let Some((max_requests, timespan_ms)) = Self::load_quota(&conn, realm)? else {
            return Ok(None);
        };
        let (used, _) = Self::prune_and_count(&conn, realm, timespan_ms, now.timestamp_millis())?;

        Ok(Some(RealmUsage {
            realm: realm.to_string(),
            used,
            max_requests,
            timespan: Duration::from_millis(timespan_ms as u64),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RateQuota;

    fn create_test_store() -> (SqliteRealmStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteRealmStore::open(dir.path().join("realms.db")).unwrap();
        (store, dir)
    }

    #[test]
    fn test_acquire_and_exhaust() {
        let (store, _dir) = create_test_store();
        store
            .register(&RateRealm::new("global", RateQuota::new(2, 60)))
            .unwrap();
        let now = Utc::now();

        assert!(store.try_acquire(&["global"], now).unwrap().is_granted());
        assert!(store.try_acquire(&["global"], now).unwrap().is_granted());
        assert!(!store.try_acquire(&["global"], now).unwrap().is_granted());

        let later = now + chrono::Duration::seconds(61);
        assert!(store.try_acquire(&["global"], later).unwrap().is_granted());
    }

    #[test]
    fn test_dual_realm_rejection_records_nothing() {
        let (store, _dir) = create_test_store();
        store
            .register(&RateRealm::new("global", RateQuota::new(100, 3600)))
            .unwrap();
        store
            .register(&RateRealm::new("fitbit-a", RateQuota::new(1, 3600)))
            .unwrap();
        let now = Utc::now();

        assert!(store.try_acquire(&["global", "fitbit-a"], now).unwrap().is_granted());
        let outcome = store.try_acquire(&["global", "fitbit-a"], now).unwrap();
        assert!(matches!(outcome, AcquireOutcome::Exhausted { ref realm, .. } if realm == "fitbit-a"));

        assert_eq!(store.usage("global", now).unwrap().unwrap().used, 1);
    }

    #[test]
    fn test_reregister_keeps_counts() {
        let (store, _dir) = create_test_store();
        let realm = RateRealm::new("fitbit-a", RateQuota::new(150, 3600));
        store.register(&realm).unwrap();
        let now = Utc::now();
        store.try_acquire(&["fitbit-a"], now).unwrap();

        store.register(&realm).unwrap();
        let usage = store.usage("fitbit-a", now).unwrap().unwrap();
        assert_eq!(usage.used, 1);
        assert_eq!(usage.remaining(), 149);
    }

    #[test]
    fn test_two_handles_share_budget() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let first = SqliteRealmStore::open(&path).unwrap();
        let second = SqliteRealmStore::open(&path).unwrap();

        first
            .register(&RateRealm::new("global", RateQuota::new(3, 3600)))
            .unwrap();
        let now = Utc::now();

        assert!(first.try_acquire(&["global"], now).unwrap().is_granted());
        assert!(second.try_acquire(&["global"], now).unwrap().is_granted());
        assert!(first.try_acquire(&["global"], now).unwrap().is_granted());
        assert!(!second.try_acquire(&["global"], now).unwrap().is_granted());
    }

    #[test]
    fn test_concurrent_handles_never_overgrant() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contended.db");
        let first = SqliteRealmStore::open(&path).unwrap();
        first
            .register(&RateRealm::new("global", RateQuota::new(50, 3600)))
            .unwrap();

        // One handle per thread, as separate processes would hold them
        let handles: Vec<SqliteRealmStore> = (0..8)
            .map(|_| SqliteRealmStore::open(&path).unwrap())
            .collect();
        let granted = Arc::new(AtomicUsize::new(0));
        let now = Utc::now();

        let threads: Vec<_> = handles
            .into_iter()
            .map(|store| {
                let granted = Arc::clone(&granted);
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        if store.try_acquire(&["global"], now).unwrap().is_granted() {
                            granted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(granted.load(Ordering::SeqCst), 50);
        assert_eq!(first.usage("global", now).unwrap().unwrap().used, 50);
    }

    #[test]
    fn test_unregistered_realm_is_error() {
        let store = SqliteRealmStore::open_in_memory().unwrap();
        assert!(store.try_acquire(&["nope"], Utc::now()).is_err());
        assert!(store.usage("nope", Utc::now()).unwrap().is_none());
    }
}
