//! High-level database interface.

use std::path::PathBuf;

use bastion_core::{Filter, FilterError, FilterId, StateStore};
use directories::ProjectDirs;
use tracing::info;

use crate::error::{Result, StorageError};
use crate::models::{Config, FilterRules, NewCustomFilter, StateEntry, StoredCustomFilter};
use crate::pool::ConnectionPool;
use crate::repository::{ConfigRepo, CustomFiltersRepo, RulesRepo, StateRepo};

/// High-level database interface for Bastion.
#[derive(Clone)]
pub struct Database {
    pool: ConnectionPool,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Create a new database at a specific path.
    pub fn with_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("Opening database at: {:?}", path);
        let pool = ConnectionPool::new(&path)?;

        Ok(Self { pool })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let pool = ConnectionPool::in_memory()?;
        Ok(Self { pool })
    }

    /// Application data directory.
    pub fn data_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "bastion", "bastion")
            .ok_or_else(|| StorageError::Config("Could not determine app data directory".into()))?;

        Ok(proj_dirs.data_dir().to_path_buf())
    }

    // === State ===

    /// Read a persisted state value.
    pub fn get_state(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.pool.get()?;
        StateRepo::get(&conn, key)
    }

    /// Write a persisted state value.
    pub fn set_state(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let conn = self.pool.get()?;
        StateRepo::set(&conn, key, value)
    }

    /// Delete a persisted state value.
    pub fn remove_state(&self, key: &str) -> Result<bool> {
        let conn = self.pool.get()?;
        StateRepo::remove(&conn, key)
    }

    /// All state entries under a key prefix.
    pub fn list_state(&self, prefix: &str) -> Result<Vec<StateEntry>> {
        let conn = self.pool.get()?;
        StateRepo::list_prefix(&conn, prefix)
    }

    // === Config ===

    /// Get a config value.
    pub fn get_config(&self, key: &str) -> Result<Option<Config>> {
        let conn = self.pool.get()?;
        ConfigRepo::get(&conn, key)
    }

    /// Set a config value.
    pub fn set_config(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let conn = self.pool.get()?;
        ConfigRepo::set(&conn, key, value)
    }

    /// Delete a config value.
    pub fn delete_config(&self, key: &str) -> Result<bool> {
        let conn = self.pool.get()?;
        ConfigRepo::delete(&conn, key)
    }

    /// Get all config values.
    pub fn get_all_config(&self) -> Result<Vec<Config>> {
        let conn = self.pool.get()?;
        ConfigRepo::get_all(&conn)
    }

    /// Get a typed config value, or a default.
    pub fn get_config_or<T: serde::de::DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        let conn = self.pool.get()?;
        ConfigRepo::get_or_default(&conn, key, default)
    }

    // === Custom filters ===

    /// Insert a new custom filter under the next free id.
    ///
    /// The connection stays locked from id allocation to insert.
    pub fn create_custom_filter<F>(&self, checksum: &str, build: F) -> Result<Filter>
    where
        F: FnOnce(FilterId) -> Filter,
    {
        let conn = self.pool.get()?;
        CustomFiltersRepo::insert_new(&conn, checksum, build)
    }

    /// Insert or replace a custom filter.
    pub fn save_custom_filter(&self, record: &NewCustomFilter) -> Result<()> {
        let conn = self.pool.get()?;
        CustomFiltersRepo::upsert(&conn, record)
    }

    /// Get a custom filter by id, including tombstones.
    pub fn get_custom_filter(&self, filter_id: FilterId) -> Result<Option<StoredCustomFilter>> {
        let conn = self.pool.get()?;
        CustomFiltersRepo::get(&conn, filter_id)
    }

    /// All custom filters, including tombstones.
    pub fn get_custom_filters(&self) -> Result<Vec<StoredCustomFilter>> {
        let conn = self.pool.get()?;
        CustomFiltersRepo::get_all(&conn)
    }

    /// Tombstone a custom filter.
    pub fn mark_custom_filter_removed(&self, filter_id: FilterId) -> Result<bool> {
        let conn = self.pool.get()?;
        CustomFiltersRepo::mark_removed(&conn, filter_id)
    }

    /// Delete tombstoned custom filters and their stored rules.
    pub fn purge_removed_custom_filters(&self) -> Result<Vec<FilterId>> {
        let conn = self.pool.get()?;
        let purged = CustomFiltersRepo::delete_removed(&conn)?;
        for filter_id in &purged {
            RulesRepo::delete(&conn, *filter_id)?;
        }
        Ok(purged)
    }

    // === Rules ===

    /// Replace the stored rules of a filter.
    pub fn save_rules(&self, filter_id: FilterId, version: &str, rules: &[String]) -> Result<()> {
        let conn = self.pool.get()?;
        RulesRepo::save(&conn, filter_id, version, rules)
    }

    /// Get the stored rules of a filter.
    pub fn get_rules(&self, filter_id: FilterId) -> Result<Option<FilterRules>> {
        let conn = self.pool.get()?;
        RulesRepo::get(&conn, filter_id)
    }

    /// Rule counts per stored filter.
    pub fn rules_counts(&self) -> Result<Vec<(FilterId, usize)>> {
        let conn = self.pool.get()?;
        Ok(RulesRepo::counts(&conn)?
            .into_iter()
            .map(|(filter_id, count, _)| (filter_id, count))
            .collect())
    }

    /// Delete the stored rules of a filter.
    pub fn delete_rules(&self, filter_id: FilterId) -> Result<bool> {
        let conn = self.pool.get()?;
        RulesRepo::delete(&conn, filter_id)
    }
}

impl StateStore for Database {
    fn get(&self, key: &str) -> bastion_core::Result<Option<serde_json::Value>> {
        self.get_state(key).map_err(FilterError::from)
    }

    fn set(&self, key: &str, value: &serde_json::Value) -> bastion_core::Result<()> {
        self.set_state(key, value).map_err(FilterError::from)
    }

    fn remove(&self, key: &str) -> bastion_core::Result<()> {
        self.remove_state(key)
            .map(|_| ())
            .map_err(FilterError::from)
    }
}
