//! Filter and group records.
//!
//! The registry owns these objects. Everything else refers to them by
//! [`FilterId`] / [`GroupId`] and re-reads them before mutating.

use serde::{Deserialize, Serialize};

use crate::metadata::{FilterMetadata, GroupMetadata};
use crate::version::FilterVersion;

/// Identifier of a filter list.
pub type FilterId = u32;

/// Identifier of a filter group.
pub type GroupId = u32;

/// First identifier assigned to user-subscribed filters.
///
/// Everything below it is a built-in filter from the metadata service.
pub const CUSTOM_FILTERS_START_ID: FilterId = 1000;

/// Group holding all user-subscribed filters.
pub const CUSTOM_FILTERS_GROUP_ID: GroupId = 0;

/// Built-in "search ads and self-promotion" filter.
///
/// Enabling it always enables its group as well.
pub const SEARCH_AND_SELF_PROMO_FILTER_ID: FilterId = 10;

/// Metadata tag marking a filter as recommended for its group.
pub const RECOMMENDED_TAG_ID: u32 = 10;

/// Well-known group identifiers.
pub mod groups {
    use super::GroupId;

    pub const AD_BLOCKING: GroupId = 1;
    pub const PRIVACY: GroupId = 2;
    pub const SOCIAL: GroupId = 3;
    pub const ANNOYANCES: GroupId = 4;
    pub const SECURITY: GroupId = 5;
    pub const OTHER: GroupId = 6;
    pub const LANGUAGE_SPECIFIC: GroupId = 7;
}

/// Returns true if the identifier belongs to a user-subscribed filter.
pub fn is_custom_filter_id(filter_id: FilterId) -> bool {
    filter_id >= CUSTOM_FILTERS_START_ID
}

/// A filter list known to the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub filter_id: FilterId,
    pub group_id: GroupId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub display_number: u32,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub tags: Vec<u32>,
    /// Expiration period advertised by the list, in seconds.
    #[serde(default)]
    pub expires: Option<u64>,
    #[serde(default)]
    pub subscription_url: Option<String>,
    pub version: FilterVersion,
    /// Source URL; only set for custom filters.
    #[serde(default)]
    pub custom_url: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub installed: bool,
    #[serde(default)]
    pub loaded: bool,
    #[serde(default)]
    pub trusted: Option<bool>,
    /// Epoch milliseconds of the last update check.
    #[serde(default)]
    pub last_check_time: Option<i64>,
    /// Epoch milliseconds of the last content update.
    #[serde(default)]
    pub last_update_time: Option<i64>,
    /// Set while rule content is being downloaded. Observability only.
    #[serde(skip)]
    pub is_downloading: bool,
}

impl Filter {
    /// Creates a built-in filter with default flags.
    pub fn new(filter_id: FilterId, group_id: GroupId, name: impl Into<String>) -> Self {
        Self {
            filter_id,
            group_id,
            name: name.into(),
            description: String::new(),
            homepage: None,
            display_number: 0,
            languages: Vec::new(),
            tags: Vec::new(),
            expires: None,
            subscription_url: None,
            version: FilterVersion::zero(),
            custom_url: None,
            enabled: false,
            installed: false,
            loaded: false,
            trusted: None,
            last_check_time: None,
            last_update_time: None,
            is_downloading: false,
        }
    }

    /// Creates a custom filter subscribed from `url`.
    pub fn custom(filter_id: FilterId, name: impl Into<String>, url: impl Into<String>) -> Self {
        let mut filter = Self::new(filter_id, CUSTOM_FILTERS_GROUP_ID, name);
        filter.custom_url = Some(url.into());
        filter
    }

    /// Builds a registry filter from a metadata record.
    pub fn from_metadata(metadata: &FilterMetadata) -> Self {
        let mut filter = Self::new(metadata.filter_id, metadata.group_id, &metadata.name);
        filter.apply_metadata(metadata);
        filter
    }

    /// Refreshes display metadata, keeping lifecycle flags and version.
    pub fn apply_metadata(&mut self, metadata: &FilterMetadata) {
        self.group_id = metadata.group_id;
        self.name = metadata.name.clone();
        self.description = metadata.description.clone();
        self.homepage = metadata.homepage.clone();
        self.display_number = metadata.display_number;
        self.languages = metadata.languages.clone();
        self.tags = metadata.tags.clone();
        self.expires = metadata.expires;
        self.subscription_url = metadata.subscription_url.clone();
    }

    /// Sets the version.
    pub fn with_version(mut self, version: impl Into<FilterVersion>) -> Self {
        self.version = version.into();
        self
    }

    /// Sets the metadata tags.
    pub fn with_tags(mut self, tags: Vec<u32>) -> Self {
        self.tags = tags;
        self
    }

    /// Sets the languages.
    pub fn with_languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.languages = languages.into_iter().map(Into::into).collect();
        self
    }

    /// Returns true for user-subscribed filters.
    pub fn is_custom(&self) -> bool {
        self.custom_url.is_some() || is_custom_filter_id(self.filter_id)
    }

    /// Built-in filters are always trusted; custom ones need an explicit flag.
    pub fn is_trusted(&self) -> bool {
        !is_custom_filter_id(self.filter_id) || self.trusted == Some(true)
    }

    /// Returns true if the filter carries the recommended tag.
    pub fn is_recommended(&self) -> bool {
        self.tags.contains(&RECOMMENDED_TAG_ID)
    }

    /// Returns true if one of the filter languages matches `locale`.
    ///
    /// Only the language part of the locale is compared (`en-US` matches `en`).
    pub fn matches_locale(&self, locale: &str) -> bool {
        let wanted = language_part(locale);
        self.languages
            .iter()
            .any(|lang| language_part(lang) == wanted)
    }

    /// Metadata record describing this filter, for rule downloads.
    pub fn to_metadata(&self) -> FilterMetadata {
        FilterMetadata {
            filter_id: self.filter_id,
            group_id: self.group_id,
            name: self.name.clone(),
            description: self.description.clone(),
            homepage: self.homepage.clone(),
            version: self.version.clone(),
            time_updated: None,
            display_number: self.display_number,
            languages: self.languages.clone(),
            tags: self.tags.clone(),
            expires: self.expires,
            subscription_url: self.subscription_url.clone(),
        }
    }
}

fn language_part(locale: &str) -> String {
    locale
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

/// Enabled state of a group.
///
/// `NeverSet` marks a group the user has not touched yet. Its first enable
/// subscribes the group's recommended filters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupState {
    #[default]
    NeverSet,
    Enabled,
    Disabled,
}

impl GroupState {
    /// Returns true only for an explicitly enabled group.
    pub fn is_enabled(&self) -> bool {
        matches!(self, GroupState::Enabled)
    }

    /// Returns true if the group was never toggled.
    pub fn is_never_set(&self) -> bool {
        matches!(self, GroupState::NeverSet)
    }

    /// Builds a state from a persisted flag.
    pub fn from_flag(enabled: bool) -> Self {
        if enabled {
            GroupState::Enabled
        } else {
            GroupState::Disabled
        }
    }
}

/// A filter group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub group_id: GroupId,
    pub name: String,
    #[serde(default)]
    pub display_number: u32,
    #[serde(default)]
    pub state: GroupState,
}

impl Group {
    /// Creates a group that was never toggled.
    pub fn new(group_id: GroupId, name: impl Into<String>) -> Self {
        Self {
            group_id,
            name: name.into(),
            display_number: 0,
            state: GroupState::NeverSet,
        }
    }

    /// Builds a group from a metadata record.
    pub fn from_metadata(metadata: &GroupMetadata) -> Self {
        Self {
            group_id: metadata.group_id,
            name: metadata.group_name.clone(),
            display_number: metadata.display_number,
            state: GroupState::NeverSet,
        }
    }

    /// The group holding user-subscribed filters.
    pub fn custom() -> Self {
        Self::new(CUSTOM_FILTERS_GROUP_ID, "Custom")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_filters_are_trusted() {
        for id in [1, 10, 224, CUSTOM_FILTERS_START_ID - 1] {
            let mut filter = Filter::new(id, 1, "builtin");
            filter.trusted = Some(false);
            assert!(filter.is_trusted(), "filter {} should be trusted", id);
        }
    }

    #[test]
    fn test_custom_filters_need_explicit_trust() {
        let mut filter = Filter::custom(1001, "custom", "https://example.org/list.txt");
        assert!(!filter.is_trusted());

        filter.trusted = Some(false);
        assert!(!filter.is_trusted());

        filter.trusted = Some(true);
        assert!(filter.is_trusted());
    }

    #[test]
    fn test_custom_detection() {
        assert!(Filter::custom(1000, "c", "https://example.org").is_custom());
        assert!(!Filter::new(2, 1, "base").is_custom());
    }

    #[test]
    fn test_locale_matching() {
        let filter = Filter::new(6, groups::LANGUAGE_SPECIFIC, "German").with_languages(["de", "at"]);
        assert!(filter.matches_locale("de"));
        assert!(filter.matches_locale("de-DE"));
        assert!(filter.matches_locale("DE_ch"));
        assert!(!filter.matches_locale("en-US"));
    }

    #[test]
    fn test_recommended_tag() {
        let filter = Filter::new(2, 1, "base").with_tags(vec![1, RECOMMENDED_TAG_ID]);
        assert!(filter.is_recommended());
        assert!(!Filter::new(3, 1, "other").is_recommended());
    }

    #[test]
    fn test_group_state_flags() {
        assert!(GroupState::default().is_never_set());
        assert!(GroupState::from_flag(true).is_enabled());
        assert!(!GroupState::from_flag(false).is_enabled());
        assert!(!GroupState::from_flag(false).is_never_set());
    }

    #[test]
    fn test_downloading_flag_not_serialized() {
        let mut filter = Filter::new(2, 1, "base");
        filter.is_downloading = true;

        let json = serde_json::to_value(&filter).unwrap();
        assert!(json.get("isDownloading").is_none());
        assert_eq!(json["filterId"], 2);
    }
}
