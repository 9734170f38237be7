//! Custom (user-subscribed) filter lists.
//!
//! Lists are downloaded from arbitrary urls. Their metadata comes from the
//! `! Key: value` comments at the top of the body, and a SHA-256 checksum of
//! the body detects content changes between updates.

use std::time::Duration;

use async_trait::async_trait;
use bastion_core::metadata::parse_time_updated;
use bastion_core::{
    now_millis, CustomFilter, CustomFilterDownload, CustomFilterInfo, CustomFilterOptions,
    CustomFilterStore, Filter, FilterError, FilterId, FilterVersion,
};
use bastion_storage::{checksum, Database, NewCustomFilter, StoredCustomFilter};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use crate::client::{build_http_client, fetch_text, split_rules};
use crate::error::{RemoteError, Result};

/// Only the leading comment block is scanned for header fields.
const HEADER_SCAN_LINES: usize = 50;

static HEADER_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^!\s*(Title|Description|Homepage|Version|Expires|TimeUpdated)\s*:\s*(.*?)\s*$")
        .expect("Invalid header pattern")
});

static EXPIRES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d+)\s*(days?|d|hours?|h)?\b").expect("Invalid expires pattern")
});

/// Metadata found in the header comments of a list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListHeader {
    pub title: Option<String>,
    pub description: Option<String>,
    pub homepage: Option<String>,
    pub version: Option<FilterVersion>,
    /// Seconds.
    pub expires: Option<u64>,
    pub time_updated: Option<String>,
}

impl ListHeader {
    /// Parses the header of a list body. The first occurrence of a field wins.
    pub fn parse(body: &str) -> Self {
        let mut header = ListHeader::default();

        for line in body.lines().take(HEADER_SCAN_LINES) {
            let Some(caps) = HEADER_FIELD.captures(line.trim()) else {
                continue;
            };
            let value = caps[2].to_string();
            if value.is_empty() {
                continue;
            }

            match &caps[1] {
                "Title" => set_once(&mut header.title, value),
                "Description" => set_once(&mut header.description, value),
                "Homepage" => set_once(&mut header.homepage, value),
                "TimeUpdated" => set_once(&mut header.time_updated, value),
                "Version" if header.version.is_none() => {
                    header.version = Some(FilterVersion::parse(value));
                }
                "Expires" if header.expires.is_none() => {
                    header.expires = parse_expires(&value);
                }
                _ => {}
            }
        }

        header
    }

    /// Copies the header fields onto `filter`. The filter name is left alone.
    fn apply_to(&self, filter: &mut Filter) {
        if let Some(description) = &self.description {
            filter.description = description.clone();
        }
        if self.homepage.is_some() {
            filter.homepage = self.homepage.clone();
        }
        if self.expires.is_some() {
            filter.expires = self.expires;
        }
        filter.version = self.version.clone().unwrap_or_else(FilterVersion::zero);
    }
}

fn set_once(slot: &mut Option<String>, value: String) {
    if slot.is_none() {
        *slot = Some(value);
    }
}

/// Parses `4 days (update frequency)`, `12 hours` or a bare day count.
pub fn parse_expires(value: &str) -> Option<u64> {
    let caps = EXPIRES.captures(value.trim())?;
    let amount: u64 = caps[1].parse().ok()?;
    let unit = caps.get(2).map(|m| m.as_str().to_ascii_lowercase());

    let seconds = match unit.as_deref() {
        Some("h") | Some("hour") | Some("hours") => 60 * 60,
        _ => 24 * 60 * 60,
    };
    amount.checked_mul(seconds)
}

/// Number of rule lines, ignoring comments and the `[Adblock]` marker.
fn count_rules(rules: &[String]) -> usize {
    rules
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty() && !line.starts_with('!') && !line.starts_with('['))
        .count()
}

/// Display title of a list: the non-blank user title, else the header title,
/// else the url.
fn resolve_title(options: &CustomFilterOptions, header: &ListHeader, url: &str) -> String {
    options
        .title
        .as_deref()
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .or(header.title.as_deref())
        .unwrap_or(url)
        .to_string()
}

struct DownloadedList {
    header: ListHeader,
    rules: Vec<String>,
    checksum: String,
}

/// [`CustomFilterStore`] that downloads lists over HTTP and keeps the
/// records in the database.
#[derive(Debug, Clone)]
pub struct CustomFilterService {
    client: reqwest::Client,
    db: Database,
}

impl CustomFilterService {
    pub fn new(db: Database, request_timeout: Duration) -> Result<Self> {
        let client = build_http_client(request_timeout)?;
        Ok(Self { client, db })
    }

    async fn download(&self, url: &str) -> Result<DownloadedList> {
        let body = fetch_text(&self.client, url).await?;
        let rules = split_rules(&body);
        if rules.is_empty() {
            return Err(RemoteError::EmptyBody(url.to_string()));
        }

        Ok(DownloadedList {
            header: ListHeader::parse(&body),
            checksum: checksum(&body),
            rules,
        })
    }

    async fn subscribe(&self, url: &str, options: &CustomFilterOptions) -> Result<CustomFilterDownload> {
        let list = self.download(url).await?;
        let title = resolve_title(options, &list.header, url);
        let last_update_time = list
            .header
            .time_updated
            .as_deref()
            .and_then(parse_time_updated)
            .or_else(|| Some(now_millis()));

        let filter = self.db.create_custom_filter(&list.checksum, |filter_id| {
            let mut filter = Filter::custom(filter_id, title, url);
            list.header.apply_to(&mut filter);
            filter.trusted = Some(options.trusted);
            filter.last_update_time = last_update_time;
            filter
        })?;
        let filter_id = filter.filter_id;

        info!(
            "Subscribed to custom filter {} ({}) with {} rules",
            filter_id,
            url,
            list.rules.len()
        );
        Ok(CustomFilterDownload {
            filter,
            rules: list.rules,
        })
    }

    async fn refresh(&self, stored: StoredCustomFilter) -> Result<Option<CustomFilterDownload>> {
        let list = self.download(&stored.url).await?;
        let version = list.header.version.clone().unwrap_or_else(FilterVersion::zero);

        if !version.is_newer_than(&stored.filter.version) && list.checksum == stored.checksum {
            debug!("Custom filter {} is unchanged", stored.filter_id);
            return Ok(None);
        }

        let mut filter = stored.filter;
        list.header.apply_to(&mut filter);
        filter.last_update_time = list
            .header
            .time_updated
            .as_deref()
            .and_then(parse_time_updated)
            .or_else(|| Some(now_millis()));

        self.db.save_custom_filter(&NewCustomFilter {
            filter: filter.clone(),
            checksum: list.checksum,
        })?;

        info!("Custom filter {} updated to {}", filter.filter_id, filter.version);
        Ok(Some(CustomFilterDownload {
            filter,
            rules: list.rules,
        }))
    }

    /// Deletes tombstoned filters and their stored rules.
    pub fn purge_removed(&self) -> Result<Vec<FilterId>> {
        let purged = self.db.purge_removed_custom_filters()?;
        if !purged.is_empty() {
            info!("Purged {} removed custom filters", purged.len());
        }
        Ok(purged)
    }
}

#[async_trait]
impl CustomFilterStore for CustomFilterService {
    async fn add_custom_filter(
        &self,
        url: &str,
        options: &CustomFilterOptions,
    ) -> bastion_core::Result<CustomFilterDownload> {
        self.subscribe(url, options)
            .await
            .map_err(|e| FilterError::CustomFilter(e.to_string()))
    }

    async fn custom_filter_info(
        &self,
        url: &str,
        options: &CustomFilterOptions,
    ) -> bastion_core::Result<CustomFilterInfo> {
        let list = self
            .download(url)
            .await
            .map_err(|e| FilterError::CustomFilter(e.to_string()))?;
        let header = list.header;

        Ok(CustomFilterInfo {
            url: url.to_string(),
            title: resolve_title(options, &header, url),
            description: header.description,
            homepage: header.homepage,
            version: header.version,
            expires: header.expires,
            time_updated: header.time_updated,
            rules_count: count_rules(&list.rules),
        })
    }

    async fn update_custom_filter(
        &self,
        filter_id: FilterId,
    ) -> bastion_core::Result<Option<CustomFilterDownload>> {
        let stored = self
            .db
            .get_custom_filter(filter_id)
            .map_err(RemoteError::from)?
            .filter(|record| !record.removed)
            .ok_or(FilterError::FilterNotFound(filter_id))?;

        Ok(self.refresh(stored).await?)
    }

    async fn custom_filters(&self) -> bastion_core::Result<Vec<CustomFilter>> {
        let records = self.db.get_custom_filters().map_err(RemoteError::from)?;
        Ok(records
            .into_iter()
            .map(|record| CustomFilter {
                filter: record.filter,
                removed: record.removed,
            })
            .collect())
    }

    async fn remove_custom_filter(&self, filter_id: FilterId) -> bastion_core::Result<()> {
        if self
            .db
            .mark_custom_filter_removed(filter_id)
            .map_err(RemoteError::from)?
        {
            debug!("Custom filter {} marked as removed", filter_id);
        } else {
            debug!("Custom filter {} not stored, nothing to remove", filter_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::TestServer;

    const LIST: &str = "[Adblock Plus 2.0]\n\
        ! Title: Example List\n\
        ! Description: Blocks example ads\n\
        ! Homepage: https://lists.example\n\
        ! Version: 1.0.0.3\n\
        ! Expires: 4 days (update frequency)\n\
        ! TimeUpdated: 2024-01-10T10:00:00+0000\n\
        ||ads.example^\n\
        ##.banner\n";

    fn service() -> (Database, CustomFilterService) {
        let db = Database::in_memory().unwrap();
        let service = CustomFilterService::new(db.clone(), Duration::from_secs(5)).unwrap();
        (db, service)
    }

    #[test]
    fn test_parse_header() {
        let header = ListHeader::parse(LIST);
        assert_eq!(header.title.as_deref(), Some("Example List"));
        assert_eq!(header.description.as_deref(), Some("Blocks example ads"));
        assert_eq!(header.homepage.as_deref(), Some("https://lists.example"));
        assert_eq!(header.version, Some(FilterVersion::parse("1.0.0.3")));
        assert_eq!(header.expires, Some(4 * 24 * 60 * 60));
        assert_eq!(header.time_updated.as_deref(), Some("2024-01-10T10:00:00+0000"));
    }

    #[test]
    fn test_parse_header_first_field_wins() {
        let header = ListHeader::parse("! Title: First\n! Title: Second\n! Title:\n||a^\n");
        assert_eq!(header.title.as_deref(), Some("First"));
        assert!(header.version.is_none());
    }

    #[test]
    fn test_parse_expires() {
        assert_eq!(parse_expires("12 hours"), Some(12 * 60 * 60));
        assert_eq!(parse_expires("2"), Some(2 * 24 * 60 * 60));
        assert_eq!(parse_expires("1 day"), Some(24 * 60 * 60));
        assert_eq!(parse_expires("soon"), None);
    }

    #[test]
    fn test_count_rules_skips_comments() {
        let rules = split_rules(LIST);
        assert_eq!(count_rules(&rules), 2);
    }

    #[tokio::test]
    async fn test_add_custom_filter() {
        let server = TestServer::start().await;
        server.route("/list.txt", 200, LIST);
        let (db, service) = service();
        let url = server.url("/list.txt");

        let download = service
            .add_custom_filter(&url, &CustomFilterOptions { title: None, trusted: true })
            .await
            .unwrap();

        let filter = &download.filter;
        assert_eq!(filter.filter_id, 1000);
        assert_eq!(filter.name, "Example List");
        assert_eq!(filter.custom_url.as_deref(), Some(url.as_str()));
        assert_eq!(filter.trusted, Some(true));
        assert_eq!(filter.version.as_str(), "1.0.0.3");
        assert_eq!(filter.last_update_time, Some(1_704_880_800_000));
        assert_eq!(download.rules.len(), 9);

        let stored = db.get_custom_filter(1000).unwrap().unwrap();
        assert_eq!(stored.checksum, checksum(LIST));
        assert!(!stored.removed);
    }

    #[tokio::test]
    async fn test_user_title_overrides_header() {
        let server = TestServer::start().await;
        server.route("/list.txt", 200, LIST);
        let (_, service) = service();

        let options = CustomFilterOptions {
            title: Some("Mine".into()),
            trusted: false,
        };
        let download = service
            .add_custom_filter(&server.url("/list.txt"), &options)
            .await
            .unwrap();
        assert_eq!(download.filter.name, "Mine");
        assert_eq!(download.filter.trusted, Some(false));
    }

    #[tokio::test]
    async fn test_add_unreachable_fails_without_record() {
        let server = TestServer::start().await;
        let (db, service) = service();

        let result = service
            .add_custom_filter(&server.url("/missing.txt"), &CustomFilterOptions::default())
            .await;
        assert!(matches!(result, Err(FilterError::CustomFilter(_))));
        assert!(db.get_custom_filters().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_unchanged_then_changed() {
        let server = TestServer::start().await;
        server.route("/list.txt", 200, LIST);
        let (_, service) = service();
        let url = server.url("/list.txt");
        service
            .add_custom_filter(&url, &CustomFilterOptions::default())
            .await
            .unwrap();

        assert!(service.update_custom_filter(1000).await.unwrap().is_none());

        let changed = LIST.replace("1.0.0.3", "1.0.0.4");
        server.route("/list.txt", 200, &changed);
        let download = service.update_custom_filter(1000).await.unwrap().unwrap();
        assert_eq!(download.filter.version.as_str(), "1.0.0.4");
        assert_eq!(download.filter.name, "Example List");

        // Same version, different body
        server.route("/list.txt", 200, &format!("{}@@||ok.example^\n", changed));
        assert!(service.update_custom_filter(1000).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_update_unknown_filter() {
        let (_, service) = service();
        assert!(matches!(
            service.update_custom_filter(1234).await,
            Err(FilterError::FilterNotFound(1234))
        ));
    }

    #[tokio::test]
    async fn test_info_does_not_persist() {
        let server = TestServer::start().await;
        server.route("/list.txt", 200, LIST);
        let (db, service) = service();

        let info = service
            .custom_filter_info(&server.url("/list.txt"), &CustomFilterOptions::default())
            .await
            .unwrap();
        assert_eq!(info.title, "Example List");
        assert_eq!(info.rules_count, 2);
        assert_eq!(info.expires, Some(4 * 24 * 60 * 60));
        assert!(db.get_custom_filters().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blank_title_falls_back_to_header() {
        let server = TestServer::start().await;
        server.route("/list.txt", 200, LIST);
        server.route("/bare.txt", 200, "||bare.example^\n");
        let (_, service) = service();
        let options = CustomFilterOptions {
            title: Some("   ".into()),
            trusted: false,
        };

        let info = service
            .custom_filter_info(&server.url("/list.txt"), &options)
            .await
            .unwrap();
        assert_eq!(info.title, "Example List");

        let bare = server.url("/bare.txt");
        let info = service.custom_filter_info(&bare, &options).await.unwrap();
        assert_eq!(info.title, bare);

        let download = service.add_custom_filter(&bare, &options).await.unwrap();
        assert_eq!(download.filter.name, info.title);

        let padded = CustomFilterOptions {
            title: Some("  Mine ".into()),
            trusted: false,
        };
        let info = service
            .custom_filter_info(&server.url("/list.txt"), &padded)
            .await
            .unwrap();
        assert_eq!(info.title, "Mine");
    }

    #[tokio::test]
    async fn test_concurrent_subscriptions_get_distinct_ids() {
        let server = TestServer::start().await;
        server.route("/a.txt", 200, LIST);
        server.route("/b.txt", 200, "||b.example^\n");
        server.route("/c.txt", 200, "||c.example^\n");
        let (db, service) = service();
        let options = CustomFilterOptions::default();
        let (a, b, c) = (server.url("/a.txt"), server.url("/b.txt"), server.url("/c.txt"));

        let (a, b, c) = tokio::join!(
            service.add_custom_filter(&a, &options),
            service.add_custom_filter(&b, &options),
            service.add_custom_filter(&c, &options),
        );

        let mut ids = vec![
            a.unwrap().filter.filter_id,
            b.unwrap().filter.filter_id,
            c.unwrap().filter.filter_id,
        ];
        ids.sort_unstable();
        assert_eq!(ids, vec![1000, 1001, 1002]);
        assert_eq!(db.get_custom_filters().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_remove_and_purge() {
        let server = TestServer::start().await;
        server.route("/a.txt", 200, LIST);
        server.route("/b.txt", 200, "||b.example^\n");
        let (_, service) = service();
        for path in ["/a.txt", "/b.txt"] {
            service
                .add_custom_filter(&server.url(path), &CustomFilterOptions::default())
                .await
                .unwrap();
        }

        service.remove_custom_filter(1000).await.unwrap();
        service.remove_custom_filter(4242).await.unwrap();

        let records = service.custom_filters().await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].removed);
        assert!(!records[1].removed);
        assert!(matches!(
            service.update_custom_filter(1000).await,
            Err(FilterError::FilterNotFound(1000))
        ));

        assert_eq!(service.purge_removed().unwrap(), vec![1000]);
        assert_eq!(service.custom_filters().await.unwrap().len(), 1);
    }
}
