//! SQLite persistence for section versions, field versions, jobs and
//! generation attempts.
//!
//! One connection behind a mutex. A single `with_conn` or
//! `with_transaction` call is atomic; a read followed by a separate write
//! is not, and the versioned store detects the gap through the uniqueness
//! constraints on version numbers.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

pub mod attempt_repo;
pub mod error;
pub mod field_repo;
pub mod job_repo;
pub mod migrations;
pub mod section_repo;

pub use error::DatabaseError;

/// Shared handle to the funnel database. Clones share one connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens the database file, creating parent directories and the schema
    /// as needed. File databases run in WAL mode.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| DatabaseError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        let db = Self::prepare(conn)?;
        log::info!("Opened funnel database {}", path.display());
        Ok(db)
    }

    /// Private in-memory database with the full schema.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> Result<Self, DatabaseError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let guard = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&guard)
    }

    /// Commits when `f` returns `Ok`, rolls back otherwise.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let out = f(&tx)?;
            tx.commit()?;
            Ok(out)
        })
    }
}

/// `~/.funnelgen/data/funnelgen.db`, or `None` without a home directory.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".funnelgen").join("data").join("funnelgen.db"))
}

/// Current time in the RFC 3339 form used by every timestamp column.
pub(crate) fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_count(db: &Database) -> u32 {
        db.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM generation_jobs", [], |r| r.get(0))?)
        })
        .unwrap()
    }

    fn insert_job(conn: &Connection) -> Result<(), DatabaseError> {
        conn.execute(
            "INSERT INTO generation_jobs (id, funnel_id, sections_to_generate, created_at, updated_at)
             VALUES ('j1', 'f1', '[]', 'now', 'now')",
            [],
        )?;
        Ok(())
    }

    #[test]
    fn test_in_memory_database_is_migrated() {
        let db = Database::open_in_memory().unwrap();
        let version = db.with_conn(migrations::schema_version).unwrap();
        assert!(version >= 5);
    }

    #[test]
    fn test_file_database_creates_directories_and_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("funnels.db");
        let db = Database::open(&path).unwrap();
        assert!(path.exists());

        let mode: String = db
            .with_conn(|conn| Ok(conn.query_row("PRAGMA journal_mode", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_default_database_path() {
        if let Some(path) = default_database_path() {
            assert!(path.ends_with(".funnelgen/data/funnelgen.db"));
        }
    }

    #[test]
    fn test_failed_transaction_leaves_no_rows() {
        let db = Database::open_in_memory().unwrap();
        let result: Result<(), DatabaseError> = db.with_transaction(|conn| {
            insert_job(conn)?;
            Err(DatabaseError::LockPoisoned)
        });
        assert!(result.is_err());
        assert_eq!(job_count(&db), 0);

        db.with_transaction(insert_job).unwrap();
        assert_eq!(job_count(&db), 1);
    }

    #[test]
    fn test_clones_share_the_connection() {
        let db = Database::open_in_memory().unwrap();
        db.clone().with_conn(insert_job).unwrap();
        assert_eq!(job_count(&db), 1);
    }
}
