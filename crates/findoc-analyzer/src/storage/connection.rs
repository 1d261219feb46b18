//! Scoped SQLite connection acquisition
//!
//! No connection outlives the operation that opened it; callers hold a
//! [`SqliteConnector`] and open a fresh handle per call.

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens SQLite connections to a single database file
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: PathBuf,
}

impl SqliteConnector {
    /// Create a connector for the given database file
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::database(format!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        Ok(Self { path })
    }

    /// Open a connection scoped to the caller
    pub fn open(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path).map_err(|e| {
            Error::database(format!("Failed to open database {}: {}", self.path.display(), e))
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| Error::database(format!("Failed to set busy timeout: {}", e)))?;
        Ok(conn)
    }

    /// Run schema statements once; WAL mode persists in the file
    pub fn migrate(&self, schema: &str) -> Result<()> {
        let conn = self.open()?;

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
        "#,
        )
        .map_err(|e| Error::database(format!("Failed to set pragmas: {}", e)))?;

        conn.execute_batch(schema)
            .map_err(|e| Error::database(format!("Failed to run migrations: {}", e)))?;

        tracing::info!("Database migrations complete ({})", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.db");

        let connector = SqliteConnector::new(&path).unwrap();
        connector
            .migrate("CREATE TABLE IF NOT EXISTS t (id INTEGER PRIMARY KEY);")
            .unwrap();

        assert!(path.exists());
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let connector = SqliteConnector::new(dir.path().join("store.db")).unwrap();
        let schema = "CREATE TABLE IF NOT EXISTS t (id INTEGER PRIMARY KEY);";

        connector.migrate(schema).unwrap();
        connector.migrate(schema).unwrap();
    }
}
