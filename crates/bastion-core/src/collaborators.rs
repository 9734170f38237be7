//! Contracts for the collaborators the orchestrator depends on.
//!
//! The lifecycle manager and update scheduler only see these traits. Concrete
//! implementations live in `bastion-storage` (state store, settings) and
//! `bastion-remote` (metadata client, custom filter store).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::filter::{Filter, FilterId};
use crate::metadata::{FilterMetadata, Metadata};
use crate::version::FilterVersion;

/// Durable key-value store for per-filter state and timestamps.
pub trait StateStore: Send + Sync {
    /// Reads a value.
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Writes a value, replacing any previous one.
    fn set(&self, key: &str, value: &serde_json::Value) -> Result<()>;

    /// Deletes a value. Missing keys are not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Client for the remote metadata/rules service.
#[async_trait]
pub trait RemoteMetadataClient: Send + Sync {
    /// Fetches metadata records for the given filters.
    async fn load_filters_metadata(&self, filter_ids: &[FilterId]) -> Result<Vec<FilterMetadata>>;

    /// Fetches the rule body of one filter, one rule per entry.
    async fn load_filter_rules(&self, filter_id: FilterId) -> Result<Vec<String>>;

    /// Loads the locally known metadata snapshot.
    async fn load_local_metadata(&self) -> Result<Metadata>;

    /// Fetches the full metadata document from the service.
    async fn load_remote_metadata(&self) -> Result<Metadata>;
}

/// Options supplied when subscribing to a custom filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomFilterOptions {
    /// Title chosen by the user; overrides the list header.
    pub title: Option<String>,
    /// Whether the user trusts the list.
    pub trusted: bool,
}

/// Metadata parsed from a custom filter list, without persisting it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomFilterInfo {
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub homepage: Option<String>,
    pub version: Option<FilterVersion>,
    pub expires: Option<u64>,
    pub time_updated: Option<String>,
    pub rules_count: usize,
}

/// A custom filter together with freshly downloaded rules.
#[derive(Debug, Clone)]
pub struct CustomFilterDownload {
    pub filter: Filter,
    pub rules: Vec<String>,
}

/// Custom filter record as kept by the custom filter store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomFilter {
    pub filter: Filter,
    /// Deleted by the user but not yet cleaned up.
    pub removed: bool,
}

/// Store for user-subscribed filters.
#[async_trait]
pub trait CustomFilterStore: Send + Sync {
    /// Downloads and persists a new custom filter.
    async fn add_custom_filter(
        &self,
        url: &str,
        options: &CustomFilterOptions,
    ) -> Result<CustomFilterDownload>;

    /// Downloads a list and returns its metadata without persisting anything.
    async fn custom_filter_info(
        &self,
        url: &str,
        options: &CustomFilterOptions,
    ) -> Result<CustomFilterInfo>;

    /// Re-downloads a custom filter. `None` means the content did not change.
    async fn update_custom_filter(&self, filter_id: FilterId)
        -> Result<Option<CustomFilterDownload>>;

    /// Lists every custom filter, including removed ones.
    async fn custom_filters(&self) -> Result<Vec<CustomFilter>>;

    /// Marks a custom filter as removed.
    async fn remove_custom_filter(&self, filter_id: FilterId) -> Result<()>;
}

/// User settings read by the scheduler.
pub trait Settings: Send + Sync {
    /// Autoupdate period in hours. Zero or negative disables autoupdate.
    fn filters_update_period_hours(&self) -> i64;

    /// Locale used to pick recommended language-specific filters.
    fn locale(&self) -> String;

    /// Autoupdate period in milliseconds.
    fn filters_update_period_millis(&self) -> i64 {
        self.filters_update_period_hours()
            .saturating_mul(60 * 60 * 1000)
    }
}

/// Settings with fixed values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticSettings {
    pub update_period_hours: i64,
    pub locale: String,
}

impl Default for StaticSettings {
    fn default() -> Self {
        Self {
            update_period_hours: 6,
            locale: "en".to_string(),
        }
    }
}

impl Settings for StaticSettings {
    fn filters_update_period_hours(&self) -> i64 {
        self.update_period_hours
    }

    fn locale(&self) -> String {
        self.locale.clone()
    }
}
