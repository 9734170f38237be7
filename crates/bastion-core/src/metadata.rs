//! Filter metadata published by the remote service.
//!
//! Mirrors the service's `filters.json` document. The same shape is used for
//! the local snapshot written after obsolete-filter cleanup.

use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::filter::{FilterId, GroupId};
use crate::version::FilterVersion;

/// Metadata for a single filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterMetadata {
    pub filter_id: FilterId,
    pub group_id: GroupId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    pub version: FilterVersion,
    /// Publication time as sent by the service (`2024-01-10T10:00:00+0000`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_updated: Option<String>,
    #[serde(default)]
    pub display_number: u32,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub tags: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_url: Option<String>,
}

impl FilterMetadata {
    /// Creates a minimal metadata record.
    pub fn new(
        filter_id: FilterId,
        group_id: GroupId,
        name: impl Into<String>,
        version: impl Into<FilterVersion>,
    ) -> Self {
        Self {
            filter_id,
            group_id,
            name: name.into(),
            description: String::new(),
            homepage: None,
            version: version.into(),
            time_updated: None,
            display_number: 0,
            languages: Vec::new(),
            tags: Vec::new(),
            expires: None,
            subscription_url: None,
        }
    }

    /// Publication time in epoch milliseconds, if it can be parsed.
    pub fn time_updated_millis(&self) -> Option<i64> {
        self.time_updated.as_deref().and_then(parse_time_updated)
    }
}

/// Metadata for a filter group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMetadata {
    pub group_id: GroupId,
    pub group_name: String,
    #[serde(default)]
    pub display_number: u32,
}

/// Metadata for a filter tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagMetadata {
    pub tag_id: u32,
    pub keyword: String,
}

/// Complete metadata document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub groups: Vec<GroupMetadata>,
    #[serde(default)]
    pub tags: Vec<TagMetadata>,
    #[serde(default)]
    pub filters: Vec<FilterMetadata>,
}

impl Metadata {
    /// Looks up a filter record by id.
    pub fn filter(&self, filter_id: FilterId) -> Option<&FilterMetadata> {
        self.filters.iter().find(|f| f.filter_id == filter_id)
    }

    /// Returns true if a filter with the same id *and* name exists.
    ///
    /// Matching on both guards against an id being reused for an unrelated
    /// list.
    pub fn contains_filter(&self, filter_id: FilterId, name: &str) -> bool {
        self.filters
            .iter()
            .any(|f| f.filter_id == filter_id && f.name == name)
    }

    /// Filters present in `self` but missing from `remote` by `(id, name)`.
    pub fn obsolete_filters<'a>(&'a self, remote: &Metadata) -> Vec<&'a FilterMetadata> {
        self.filters
            .iter()
            .filter(|f| !remote.contains_filter(f.filter_id, &f.name))
            .collect()
    }

    /// Serializes as pretty JSON with a 4-space indent.
    pub fn to_pretty_json(&self) -> Result<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut serializer)?;
        // serde_json only emits valid UTF-8
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Writes the metadata snapshot to `path`, creating parent directories.
    pub fn write_snapshot(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_pretty_json()?)?;
        Ok(())
    }

    /// Reads a snapshot written by [`Metadata::write_snapshot`].
    pub fn read_snapshot(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

/// Parses a service timestamp into epoch milliseconds.
///
/// Accepts RFC 3339 as well as the service's `+0000` offset form.
pub fn parse_time_updated(value: &str) -> Option<i64> {
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Some(time.with_timezone(&Utc).timestamp_millis());
    }
    if let Ok(time) = DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(time.with_timezone(&Utc).timestamp_millis());
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|time| time.and_utc().timestamp_millis())
}
