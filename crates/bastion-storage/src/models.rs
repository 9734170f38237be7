//! Data models for database entities.

use bastion_core::{Filter, FilterId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Configuration entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Configuration key.
    pub key: String,
    /// Configuration value (JSON).
    pub value: serde_json::Value,
}

/// Persisted state entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// A user-subscribed filter as stored in `custom_filters`.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCustomFilter {
    pub filter_id: FilterId,
    pub url: String,
    /// Filter record at the time of the last download.
    pub filter: Filter,
    /// SHA-256 of the last downloaded body, hex encoded.
    pub checksum: String,
    /// Deleted by the user, waiting for cleanup.
    pub removed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data for inserting or replacing a custom filter.
#[derive(Debug, Clone)]
pub struct NewCustomFilter {
    pub filter: Filter,
    pub checksum: String,
}

/// Stored rule body of a filter.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterRules {
    pub filter_id: FilterId,
    pub version: String,
    pub rules: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl FilterRules {
    /// Number of stored rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if the body is empty.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Parses a timestamp written by SQLite or chrono.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|dt| dt.and_utc())
        })
        .unwrap_or_else(|_| Utc::now())
}
