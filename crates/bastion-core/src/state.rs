//! Persisted filter and group state.
//!
//! Typed view over a [`StateStore`]. Each filter has a state record (enabled,
//! installed, loaded) and a version record (version, check/update times);
//! each group has an enabled flag. Records are stored as JSON under
//! per-id keys.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::collaborators::StateStore;
use crate::error::Result;
use crate::filter::{Filter, FilterId, Group, GroupId, GroupState};
use crate::version::FilterVersion;

/// Key holding the timestamp of the last update check.
pub const LAST_UPDATE_CHECK_KEY: &str = "filters-last-update-check";

fn filter_state_key(filter_id: FilterId) -> String {
    format!("filter-state:{}", filter_id)
}

fn filter_version_key(filter_id: FilterId) -> String {
    format!("filter-version:{}", filter_id)
}

fn group_state_key(group_id: GroupId) -> String {
    format!("group-state:{}", group_id)
}

/// Persisted lifecycle flags of a filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterStateRecord {
    pub enabled: bool,
    pub installed: bool,
    pub loaded: bool,
}

impl From<&Filter> for FilterStateRecord {
    fn from(filter: &Filter) -> Self {
        Self {
            enabled: filter.enabled,
            installed: filter.installed,
            loaded: filter.loaded,
        }
    }
}

/// Persisted version information of a filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterVersionRecord {
    pub version: FilterVersion,
    #[serde(default)]
    pub last_check_time: Option<i64>,
    #[serde(default)]
    pub last_update_time: Option<i64>,
}

impl From<&Filter> for FilterVersionRecord {
    fn from(filter: &Filter) -> Self {
        Self {
            version: filter.version.clone(),
            last_check_time: filter.last_check_time,
            last_update_time: filter.last_update_time,
        }
    }
}

/// Persisted enabled flag of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupStateRecord {
    pub enabled: bool,
}

/// Typed access to persisted filter/group state.
#[derive(Clone)]
pub struct FilterStateStore {
    store: Arc<dyn StateStore>,
}

impl std::fmt::Debug for FilterStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterStateStore").finish_non_exhaustive()
    }
}

impl FilterStateStore {
    /// Wraps a raw key-value store.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    fn read<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get(key)? {
            Some(value) => Ok(serde_json::from_value(value).ok()),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.store.set(key, &serde_json::to_value(value)?)
    }

    // ==================== Filters ====================

    pub fn filter_state(&self, filter_id: FilterId) -> Result<Option<FilterStateRecord>> {
        self.read(&filter_state_key(filter_id))
    }

    pub fn filter_version(&self, filter_id: FilterId) -> Result<Option<FilterVersionRecord>> {
        self.read(&filter_version_key(filter_id))
    }

    /// Persists the lifecycle flags of `filter`.
    pub fn save_filter_state(&self, filter: &Filter) -> Result<()> {
        self.write(
            &filter_state_key(filter.filter_id),
            &FilterStateRecord::from(filter),
        )
    }

    /// Persists the version information of `filter`.
    pub fn save_filter_version(&self, filter: &Filter) -> Result<()> {
        self.write(
            &filter_version_key(filter.filter_id),
            &FilterVersionRecord::from(filter),
        )
    }

    /// Removes every record of a filter.
    pub fn remove_filter(&self, filter_id: FilterId) -> Result<()> {
        self.store.remove(&filter_state_key(filter_id))?;
        self.store.remove(&filter_version_key(filter_id))?;
        Ok(())
    }

    /// Returns a copy of `filter` with persisted state laid over it.
    pub fn apply_to_filter(&self, filter: &Filter) -> Result<Filter> {
        let mut merged = filter.clone();
        if let Some(state) = self.filter_state(filter.filter_id)? {
            merged.enabled = state.enabled;
            merged.installed = state.installed;
            merged.loaded = state.loaded;
        }
        if let Some(version) = self.filter_version(filter.filter_id)? {
            merged.version = version.version;
            merged.last_check_time = version.last_check_time;
            merged.last_update_time = version.last_update_time;
        }
        Ok(merged)
    }

    // ==================== Groups ====================

    pub fn group_state(&self, group_id: GroupId) -> Result<Option<GroupStateRecord>> {
        self.read(&group_state_key(group_id))
    }

    /// Persists the enabled flag of `group`. `NeverSet` groups are not stored.
    pub fn save_group_state(&self, group: &Group) -> Result<()> {
        match group.state {
            GroupState::NeverSet => self.store.remove(&group_state_key(group.group_id)),
            state => self.write(
                &group_state_key(group.group_id),
                &GroupStateRecord {
                    enabled: state.is_enabled(),
                },
            ),
        }
    }

    /// Returns a copy of `group` with the persisted flag laid over it.
    pub fn apply_to_group(&self, group: &Group) -> Result<Group> {
        let mut merged = group.clone();
        if let Some(record) = self.group_state(group.group_id)? {
            merged.state = GroupState::from_flag(record.enabled);
        }
        Ok(merged)
    }

    // ==================== Update checks ====================

    pub fn last_update_check(&self) -> Result<Option<i64>> {
        self.read(LAST_UPDATE_CHECK_KEY)
    }

    pub fn set_last_update_check(&self, timestamp: i64) -> Result<()> {
        self.write(LAST_UPDATE_CHECK_KEY, &timestamp)
    }
}
