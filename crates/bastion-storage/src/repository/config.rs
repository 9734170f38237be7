//! Configuration repository.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::models::Config;

/// Repository for configuration operations.
pub struct ConfigRepo;

impl ConfigRepo {
    /// Get a configuration value.
    pub fn get(conn: &Connection, key: &str) -> Result<Option<Config>> {
        let mut stmt = conn.prepare("SELECT key, value FROM config WHERE key = ?1")?;

        let config = stmt
            .query_row([key], |row| {
                let value_str: String = row.get(1)?;
                Ok(Config {
                    key: row.get(0)?,
                    value: serde_json::from_str(&value_str).unwrap_or(serde_json::Value::Null),
                })
            })
            .optional()?;

        Ok(config)
    }

    /// Set a configuration value (insert or update).
    pub fn set(conn: &Connection, key: &str, value: &serde_json::Value) -> Result<()> {
        let value_json = serde_json::to_string(value)?;

        conn.execute(
            "INSERT INTO config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = ?2",
            params![key, value_json],
        )?;

        Ok(())
    }

    /// Delete a configuration value.
    pub fn delete(conn: &Connection, key: &str) -> Result<bool> {
        let deleted = conn.execute("DELETE FROM config WHERE key = ?1", [key])?;
        Ok(deleted > 0)
    }

    /// Get all configuration values.
    pub fn get_all(conn: &Connection) -> Result<Vec<Config>> {
        let mut stmt = conn.prepare("SELECT key, value FROM config ORDER BY key")?;

        let configs = stmt
            .query_map([], |row| {
                let value_str: String = row.get(1)?;
                Ok(Config {
                    key: row.get(0)?,
                    value: serde_json::from_str(&value_str).unwrap_or(serde_json::Value::Null),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(configs)
    }

    /// Get a typed configuration value, falling back to `default` when the
    /// key is missing or holds a value of another type.
    pub fn get_or_default<T: serde::de::DeserializeOwned>(
        conn: &Connection,
        key: &str,
        default: T,
    ) -> Result<T> {
        match Self::get(conn, key)? {
            Some(config) => Ok(serde_json::from_value(config.value).unwrap_or(default)),
            None => Ok(default),
        }
    }
}
