//! Package metadata cache
//!
//! Records live in SQLite so a restart does not force re-fetching every
//! package, with an in-memory layer in front of it for the hot path. A record
//! is never updated in place: `put` swaps in a new `Arc<PackageRecord>`, so
//! readers holding the previous one keep a consistent snapshot.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use crate::version::error::CacheError;

/// Bumped whenever the table layout changes; older databases are rebuilt
const SCHEMA_VERSION: i32 = 1;

/// Cached registry snapshot for one package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRecord {
    pub name: String,
    /// Version strings in registry listing order, possibly empty
    pub versions: Vec<String>,
    /// Registry origin the listing came from
    pub registry: String,
    pub fetched_at: DateTime<Utc>,
}

impl PackageRecord {
    /// Record fetched now
    pub fn new(name: impl Into<String>, versions: Vec<String>, registry: impl Into<String>) -> Self {
        Self::new_at(name, versions, registry, Utc::now())
    }

    /// Record fetched at a given instant, truncated to the stored precision
    pub fn new_at(
        name: impl Into<String>,
        versions: Vec<String>,
        registry: impl Into<String>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            versions,
            registry: registry.into(),
            fetched_at: fetched_at
                .duration_trunc(TimeDelta::milliseconds(1))
                .unwrap_or(fetched_at),
        }
    }
}

/// A record is stale once strictly more than the refresh frequency has passed
pub fn is_stale(record: &PackageRecord, refresh_frequency_minutes: u64, now: DateTime<Utc>) -> bool {
    let minutes = i64::try_from(refresh_frequency_minutes).unwrap_or(i64::MAX);
    let max_age = TimeDelta::try_minutes(minutes).unwrap_or(TimeDelta::MAX);
    now.signed_duration_since(record.fetched_at) > max_age
}

/// Storage of package records
#[cfg_attr(test, automock)]
pub trait PackageStore: Send + Sync {
    /// Current record for a package, if any
    fn get(&self, package_name: &str) -> Result<Option<Arc<PackageRecord>>, CacheError>;

    /// Atomically replace the record for `record.name`
    fn put(&self, record: Arc<PackageRecord>) -> Result<(), CacheError>;

    /// Drop every record
    fn clear(&self) -> Result<(), CacheError>;
}

pub struct PackageCache {
    conn: Mutex<Connection>,
    namespace: String,
    memory: Mutex<HashMap<String, Arc<PackageRecord>>>,
}

impl PackageCache {
    /// Open (or create) the cache database at `db_path`
    pub fn open(db_path: &Path, namespace: &str) -> Result<Self, CacheError> {
        info!("Initializing cache database at {:?}", db_path);

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;

        // Enable WAL mode for better concurrency
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        debug!("Database connection established");
        Self::with_connection(conn, namespace)
    }

    /// Cache without persistence, for one-shot runs and tests
    pub fn in_memory(namespace: &str) -> Result<Self, CacheError> {
        Self::with_connection(Connection::open_in_memory()?, namespace)
    }

    fn with_connection(conn: Connection, namespace: &str) -> Result<Self, CacheError> {
        let cache = Self {
            conn: Mutex::new(conn),
            namespace: namespace.to_string(),
            memory: Mutex::new(HashMap::new()),
        };

        cache.create_schema()?;
        info!("Cache initialized successfully");

        Ok(cache)
    }

    /// Acquire database connection lock with proper error handling
    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
        self.conn.lock().map_err(|_| CacheError::LockPoisoned)
    }

    fn lock_memory(&self) -> Result<MutexGuard<'_, HashMap<String, Arc<PackageRecord>>>, CacheError> {
        self.memory.lock().map_err(|_| CacheError::LockPoisoned)
    }

    fn create_schema(&self) -> Result<(), CacheError> {
        debug!("Creating database schema");

        let conn = self.lock_conn()?;

        let current_version: i32 =
            conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if current_version != 0 && current_version != SCHEMA_VERSION {
            warn!(
                "Cache schema v{} is outdated, rebuilding as v{}",
                current_version, SCHEMA_VERSION
            );
            conn.execute_batch("DROP TABLE IF EXISTS versions; DROP TABLE IF EXISTS packages;")?;
        }

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS packages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                namespace TEXT NOT NULL,
                package_name TEXT NOT NULL,
                registry TEXT NOT NULL,
                fetched_at INTEGER NOT NULL,
                UNIQUE(namespace, package_name)
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                package_id INTEGER NOT NULL,
                position INTEGER NOT NULL,
                version TEXT NOT NULL,
                FOREIGN KEY (package_id) REFERENCES packages(id) ON DELETE CASCADE,
                UNIQUE(package_id, position)
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_package_id ON versions(package_id)",
            [],
        )?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        debug!("Database schema created successfully");
        Ok(())
    }

    fn load(&self, package_name: &str) -> Result<Option<PackageRecord>, CacheError> {
        let conn = self.lock_conn()?;

        let row = conn
            .query_row(
                r#"
                SELECT id, registry, fetched_at FROM packages
                WHERE namespace = ?1 AND package_name = ?2
                "#,
                (&self.namespace, package_name),
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((package_id, registry, fetched_at_ms)) = row else {
            return Ok(None);
        };

        let fetched_at =
            DateTime::from_timestamp_millis(fetched_at_ms).ok_or_else(|| CacheError::Corrupt {
                package: package_name.to_string(),
                reason: format!("invalid timestamp {}", fetched_at_ms),
            })?;

        let mut stmt =
            conn.prepare("SELECT version FROM versions WHERE package_id = ?1 ORDER BY position")?;
        let versions = stmt
            .query_map([package_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(Some(PackageRecord {
            name: package_name.to_string(),
            versions,
            registry,
            fetched_at,
        }))
    }

    fn store(&self, record: &PackageRecord) -> Result<(), CacheError> {
        debug!(
            "Saving {} versions for {}",
            record.versions.len(),
            record.name
        );

        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO packages (namespace, package_name, registry, fetched_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(namespace, package_name) DO UPDATE SET
                registry = excluded.registry,
                fetched_at = excluded.fetched_at
            "#,
            (
                &self.namespace,
                &record.name,
                &record.registry,
                record.fetched_at.timestamp_millis(),
            ),
        )?;

        let package_id: i64 = tx.query_row(
            "SELECT id FROM packages WHERE namespace = ?1 AND package_name = ?2",
            (&self.namespace, &record.name),
            |row| row.get(0),
        )?;

        tx.execute("DELETE FROM versions WHERE package_id = ?1", [package_id])?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO versions (package_id, position, version) VALUES (?1, ?2, ?3)",
            )?;
            for (position, version) in record.versions.iter().enumerate() {
                stmt.execute((package_id, position as i64, version))?;
            }
        }

        tx.commit()?;
        Ok(())
    }
}

impl PackageStore for PackageCache {
    fn get(&self, package_name: &str) -> Result<Option<Arc<PackageRecord>>, CacheError> {
        if let Some(record) = self.lock_memory()?.get(package_name) {
            return Ok(Some(Arc::clone(record)));
        }

        let Some(record) = self.load(package_name)? else {
            return Ok(None);
        };

        let record = Arc::new(record);
        self.lock_memory()?
            .entry(package_name.to_string())
            .or_insert_with(|| Arc::clone(&record));
        Ok(Some(record))
    }

    fn put(&self, record: Arc<PackageRecord>) -> Result<(), CacheError> {
        self.store(&record)?;
        self.lock_memory()?.insert(record.name.clone(), record);
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        info!("Clearing cache namespace {}", self.namespace);

        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM versions WHERE package_id IN (SELECT id FROM packages WHERE namespace = ?1)",
            [&self.namespace],
        )?;
        tx.execute(
            "DELETE FROM packages WHERE namespace = ?1",
            [&self.namespace],
        )?;
        tx.commit()?;
        drop(conn);

        self.lock_memory()?.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn record(name: &str, versions: &[&str]) -> Arc<PackageRecord> {
        Arc::new(PackageRecord::new(
            name,
            strings(versions),
            "https://registry.npmjs.org",
        ))
    }

    #[test]
    fn put_then_get_returns_record() {
        let cache = PackageCache::in_memory("test").unwrap();
        let saved = record("axios", &["1.0.0", "1.1.0", "2.0.0"]);

        cache.put(saved.clone()).unwrap();

        assert_eq!(cache.get("axios").unwrap(), Some(saved));
    }

    #[test]
    fn get_returns_none_for_nonexistent_package() {
        let cache = PackageCache::in_memory("test").unwrap();

        assert_eq!(cache.get("nonexistent").unwrap(), None);
    }

    #[test]
    fn record_survives_reopen_exactly() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested/cache.db");
        let saved = record("left-pad", &["1.3.0", "1.0.0", "1.0.1-beta.1", "1.0.1"]);

        {
            let cache = PackageCache::open(&db_path, "test").unwrap();
            cache.put(saved.clone()).unwrap();
        }

        let cache = PackageCache::open(&db_path, "test").unwrap();
        let loaded = cache.get("left-pad").unwrap().unwrap();
        assert_eq!(*loaded, *saved);
    }

    #[test]
    fn put_replaces_existing_record() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("cache.db");
        let cache = PackageCache::open(&db_path, "test").unwrap();
        let first = record("axios", &["1.0.0", "2.0.0"]);

        cache.put(first.clone()).unwrap();
        cache.put(record("axios", &["3.0.0"])).unwrap();

        assert_eq!(cache.get("axios").unwrap().unwrap().versions, strings(&["3.0.0"]));
        // Readers keep the snapshot they already hold
        assert_eq!(first.versions, strings(&["1.0.0", "2.0.0"]));

        let reopened = PackageCache::open(&db_path, "test").unwrap();
        assert_eq!(
            reopened.get("axios").unwrap().unwrap().versions,
            strings(&["3.0.0"])
        );
    }

    #[test]
    fn empty_listing_round_trips() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("cache.db");
        {
            let cache = PackageCache::open(&db_path, "test").unwrap();
            cache.put(record("empty", &[])).unwrap();
        }

        let cache = PackageCache::open(&db_path, "test").unwrap();
        let loaded = cache.get("empty").unwrap().unwrap();
        assert!(loaded.versions.is_empty());
    }

    #[test]
    fn get_serves_the_same_snapshot_from_memory() {
        let cache = PackageCache::in_memory("test").unwrap();
        cache.put(record("axios", &["1.0.0"])).unwrap();

        let first = cache.get("axios").unwrap().unwrap();
        let second = cache.get("axios").unwrap().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn clear_removes_only_own_namespace() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("cache.db");
        let ours = PackageCache::open(&db_path, "ours").unwrap();
        let theirs = PackageCache::open(&db_path, "theirs").unwrap();
        ours.put(record("axios", &["1.0.0"])).unwrap();
        theirs.put(record("axios", &["9.0.0"])).unwrap();

        ours.clear().unwrap();

        assert_eq!(ours.get("axios").unwrap(), None);
        let reopened = PackageCache::open(&db_path, "ours").unwrap();
        assert_eq!(reopened.get("axios").unwrap(), None);
        assert_eq!(
            theirs.get("axios").unwrap().unwrap().versions,
            strings(&["9.0.0"])
        );
    }

    #[test]
    fn outdated_schema_is_rebuilt() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("cache.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute("CREATE TABLE packages (legacy TEXT)", []).unwrap();
            conn.pragma_update(None, "user_version", 99).unwrap();
        }

        let cache = PackageCache::open(&db_path, "test").unwrap();
        cache.put(record("axios", &["1.0.0"])).unwrap();

        assert!(cache.get("axios").unwrap().is_some());
    }

    #[test]
    fn records_are_truncated_to_milliseconds() {
        let at = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();

        let record = PackageRecord::new_at("x", vec![], "r", at);

        assert_eq!(record.fetched_at.timestamp_subsec_nanos(), 123_000_000);
    }

    #[rstest]
    #[case(59, false)]
    #[case(60, false)]
    #[case(61, true)]
    fn is_stale_after_refresh_frequency(#[case] elapsed_minutes: i64, #[case] expected: bool) {
        let fetched = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let record = PackageRecord::new_at("x", vec![], "r", fetched);
        let now = fetched + TimeDelta::minutes(elapsed_minutes);

        assert_eq!(is_stale(&record, 60, now), expected);
    }
}
