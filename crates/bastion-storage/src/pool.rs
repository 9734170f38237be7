//! Database connection pool.
//!
//! A single Mutex-protected connection. The orchestrator issues short
//! key-value reads and writes, so one connection is enough.

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Result, StorageError};
use crate::schema::run_migrations;

/// Thread-safe handle to the database connection.
#[derive(Clone)]
pub struct ConnectionPool {
    conn: Arc<Mutex<Connection>>,
}

impl ConnectionPool {
    /// Opens a file-based database and applies pending migrations.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::setup_connection(&conn, true)?;
        run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::setup_connection(&conn, false)?;
        run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Borrows the connection.
    pub fn get(&self) -> Result<PooledConnection<'_>> {
        let guard = self
            .conn
            .lock()
            .map_err(|_| StorageError::Config("Connection pool poisoned".to_string()))?;

        Ok(PooledConnection { guard })
    }

    fn setup_connection(conn: &Connection, on_disk: bool) -> Result<()> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        // WAL lets the CLI read while the daemon writes
        if on_disk {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }

        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        // Rule bodies can be large
        conn.execute_batch("PRAGMA cache_size = -8000;")?;

        Ok(())
    }
}

/// A connection borrowed from the pool.
pub struct PooledConnection<'a> {
    guard: MutexGuard<'a, Connection>,
}

impl std::ops::Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_pool_has_schema() {
        let pool = ConnectionPool::in_memory().unwrap();
        let conn = pool.get().unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM app_state", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_file_pool_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bastion.db");

        {
            let pool = ConnectionPool::new(&path).unwrap();
            pool.get()
                .unwrap()
                .execute(
                    "INSERT INTO app_state (key, value) VALUES ('k', '1')",
                    [],
                )
                .unwrap();
        }

        let pool = ConnectionPool::new(&path).unwrap();
        let value: String = pool
            .get()
            .unwrap()
            .query_row("SELECT value FROM app_state WHERE key = 'k'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(value, "1");
    }

    #[test]
    fn test_clones_share_connection() {
        let pool1 = ConnectionPool::in_memory().unwrap();
        let pool2 = pool1.clone();

        pool1
            .get()
            .unwrap()
            .execute("INSERT INTO app_state (key, value) VALUES ('k', '1')", [])
            .unwrap();
        let count: i64 = pool2
            .get()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM app_state", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
