//! User settings backed by the `config` table.

use bastion_core::Settings;
use serde_json::json;
use tracing::warn;

use crate::database::Database;
use crate::error::Result;

/// Autoupdate period in hours.
pub const UPDATE_PERIOD_KEY: &str = "filters-update-period";
/// Locale used for language-specific recommendations.
pub const LOCALE_KEY: &str = "locale";
/// Override for the metadata endpoint.
pub const METADATA_URL_KEY: &str = "metadata-url";
/// Override for the rules endpoint template.
pub const RULES_URL_KEY: &str = "rules-url";

pub const DEFAULT_UPDATE_PERIOD_HOURS: i64 = 6;
pub const DEFAULT_LOCALE: &str = "en";

/// Settings read from the database on every access, so changes made by
/// another process are picked up by the next scheduler cycle.
#[derive(Debug, Clone)]
pub struct StoredSettings {
    db: Database,
}

impl StoredSettings {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn set_update_period_hours(&self, hours: i64) -> Result<()> {
        self.db.set_config(UPDATE_PERIOD_KEY, &json!(hours))
    }

    pub fn set_locale(&self, locale: &str) -> Result<()> {
        self.db.set_config(LOCALE_KEY, &json!(locale))
    }

    pub fn metadata_url(&self) -> Result<Option<String>> {
        self.db.get_config_or(METADATA_URL_KEY, None)
    }

    pub fn set_metadata_url(&self, url: &str) -> Result<()> {
        self.db.set_config(METADATA_URL_KEY, &json!(url))
    }

    pub fn rules_url(&self) -> Result<Option<String>> {
        self.db.get_config_or(RULES_URL_KEY, None)
    }

    pub fn set_rules_url(&self, url: &str) -> Result<()> {
        self.db.set_config(RULES_URL_KEY, &json!(url))
    }

    fn read_or<T: serde::de::DeserializeOwned + Clone>(&self, key: &str, default: T) -> T {
        match self.db.get_config_or(key, default.clone()) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to read setting {}: {}", key, e);
                default
            }
        }
    }
}

impl Settings for StoredSettings {
    fn filters_update_period_hours(&self) -> i64 {
        self.read_or(UPDATE_PERIOD_KEY, DEFAULT_UPDATE_PERIOD_HOURS)
    }

    fn locale(&self) -> String {
        self.read_or(LOCALE_KEY, DEFAULT_LOCALE.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = StoredSettings::new(Database::in_memory().unwrap());
        assert_eq!(settings.filters_update_period_hours(), 6);
        assert_eq!(settings.locale(), "en");
        assert!(settings.metadata_url().unwrap().is_none());
    }

    #[test]
    fn test_changes_are_visible_immediately() {
        let db = Database::in_memory().unwrap();
        let settings = StoredSettings::new(db.clone());

        settings.set_update_period_hours(-1).unwrap();
        settings.set_locale("de").unwrap();

        let other = StoredSettings::new(db);
        assert_eq!(other.filters_update_period_hours(), -1);
        assert!(other.filters_update_period_millis() <= 0);
        assert_eq!(other.locale(), "de");
    }

    #[test]
    fn test_endpoint_overrides() {
        let settings = StoredSettings::new(Database::in_memory().unwrap());
        settings.set_metadata_url("https://filters.example/metadata.json").unwrap();
        settings
            .set_rules_url("https://filters.example/{filter_id}.txt")
            .unwrap();

        assert_eq!(
            settings.metadata_url().unwrap().as_deref(),
            Some("https://filters.example/metadata.json")
        );
        assert_eq!(
            settings.rules_url().unwrap().as_deref(),
            Some("https://filters.example/{filter_id}.txt")
        );
    }

    #[test]
    fn test_wrong_type_falls_back_to_default() {
        let db = Database::in_memory().unwrap();
        db.set_config(UPDATE_PERIOD_KEY, &json!("often")).unwrap();
        assert_eq!(StoredSettings::new(db).filters_update_period_hours(), 6);
    }
}
