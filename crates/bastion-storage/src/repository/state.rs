//! Key-value repository backing the orchestrator state store.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::models::{parse_datetime, StateEntry};

/// Repository for `app_state` operations.
pub struct StateRepo;

impl StateRepo {
    /// Get a value by key.
    pub fn get(conn: &Connection, key: &str) -> Result<Option<serde_json::Value>> {
        let value: Option<String> = conn
            .query_row("SELECT value FROM app_state WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;

        match value {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    /// Insert or replace a value.
    pub fn set(conn: &Connection, key: &str, value: &serde_json::Value) -> Result<()> {
        let value_json = serde_json::to_string(value)?;

        conn.execute(
            "INSERT INTO app_state (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value_json],
        )?;

        Ok(())
    }

    /// Delete a value. Returns true if it existed.
    pub fn remove(conn: &Connection, key: &str) -> Result<bool> {
        let deleted = conn.execute("DELETE FROM app_state WHERE key = ?1", [key])?;
        Ok(deleted > 0)
    }

    /// All entries whose key starts with `prefix`, ordered by key.
    pub fn list_prefix(conn: &Connection, prefix: &str) -> Result<Vec<StateEntry>> {
        let mut stmt = conn.prepare(
            "SELECT key, value, updated_at FROM app_state
             WHERE substr(key, 1, length(?1)) = ?1
             ORDER BY key",
        )?;

        let entries = stmt
            .query_map([prefix], |row| {
                let value_str: String = row.get(1)?;
                Ok(StateEntry {
                    key: row.get(0)?,
                    value: serde_json::from_str(&value_str).unwrap_or(serde_json::Value::Null),
                    updated_at: parse_datetime(&row.get::<_, String>(2)?),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(entries)
    }

    /// Delete every entry whose key starts with `prefix`.
    pub fn remove_prefix(conn: &Connection, prefix: &str) -> Result<usize> {
        let deleted = conn.execute(
            "DELETE FROM app_state WHERE substr(key, 1, length(?1)) = ?1",
            [prefix],
        )?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::run_migrations;
    use serde_json::json;

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn test_set_get_remove() {
        let conn = setup_db();
        let value = json!({"enabled": true, "installed": true, "loaded": false});

        StateRepo::set(&conn, "filter-state:2", &value).unwrap();
        assert_eq!(StateRepo::get(&conn, "filter-state:2").unwrap(), Some(value));

        assert!(StateRepo::remove(&conn, "filter-state:2").unwrap());
        assert!(StateRepo::get(&conn, "filter-state:2").unwrap().is_none());
        assert!(!StateRepo::remove(&conn, "filter-state:2").unwrap());
    }

    #[test]
    fn test_set_replaces() {
        let conn = setup_db();
        StateRepo::set(&conn, "filters-last-update-check", &json!(1)).unwrap();
        StateRepo::set(&conn, "filters-last-update-check", &json!(2)).unwrap();
        assert_eq!(
            StateRepo::get(&conn, "filters-last-update-check").unwrap(),
            Some(json!(2))
        );
    }

    #[test]
    fn test_prefix_operations() {
        let conn = setup_db();
        StateRepo::set(&conn, "filter-state:2", &json!({"enabled": true})).unwrap();
        StateRepo::set(&conn, "filter-state:10", &json!({"enabled": false})).unwrap();
        StateRepo::set(&conn, "filter-version:2", &json!({"version": "1.0"})).unwrap();
        // Lookalike key outside the prefix
        StateRepo::set(&conn, "filter_state:3", &json!({})).unwrap();

        let keys: Vec<_> = StateRepo::list_prefix(&conn, "filter-state:")
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(keys, vec!["filter-state:10", "filter-state:2"]);

        assert_eq!(StateRepo::remove_prefix(&conn, "filter-state:").unwrap(), 2);
        assert!(StateRepo::get(&conn, "filter-version:2").unwrap().is_some());
    }
}
