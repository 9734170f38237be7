//! In-memory collaborators for unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::collaborators::{
    CustomFilter, CustomFilterDownload, CustomFilterInfo, CustomFilterOptions, CustomFilterStore,
    RemoteMetadataClient, Settings, StateStore,
};
use crate::context::FilterContext;
use crate::error::{FilterError, Result};
use crate::events::{EventKind, FilterEvent, Notifier};
use crate::filter::{Filter, FilterId, CUSTOM_FILTERS_START_ID};
use crate::metadata::{FilterMetadata, Metadata};
use crate::registry::{FilterRegistry, InMemoryRegistry};
use crate::version::FilterVersion;

// ==================== State store ====================

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    values: Mutex<HashMap<String, serde_json::Value>>,
    fail_writes: AtomicBool,
}

impl MemoryStateStore {
    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.lock().contains_key(key)
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(FilterError::Store("disk full".to_string()));
        }
        self.values.lock().insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values.lock().remove(key);
        Ok(())
    }
}

// ==================== Remote ====================

#[derive(Debug, Default)]
pub struct FakeRemote {
    metadata: Mutex<Vec<FilterMetadata>>,
    rules: Mutex<HashMap<FilterId, Vec<String>>>,
    failing_rules: Mutex<HashSet<FilterId>>,
    hanging_rules: Mutex<HashSet<FilterId>>,
    local: Mutex<Metadata>,
    remote: Mutex<Metadata>,
    fail_metadata: AtomicBool,
    panic_metadata: AtomicBool,
    hang_metadata: AtomicBool,
    pub metadata_calls: AtomicUsize,
    pub rules_calls: AtomicUsize,
}

impl FakeRemote {
    pub fn set_filter_metadata(&self, metadata: FilterMetadata) {
        let mut records = self.metadata.lock();
        records.retain(|m| m.filter_id != metadata.filter_id);
        records.push(metadata);
    }

    pub fn set_rules(&self, filter_id: FilterId, rules: &[&str]) {
        self.rules
            .lock()
            .insert(filter_id, rules.iter().map(|r| r.to_string()).collect());
    }

    pub fn fail_rules(&self, filter_id: FilterId) {
        self.failing_rules.lock().insert(filter_id);
    }

    /// Rule downloads for `filter_id` never complete.
    pub fn hang_rules(&self, filter_id: FilterId) {
        self.hanging_rules.lock().insert(filter_id);
    }

    pub fn fail_metadata(&self, fail: bool) {
        self.fail_metadata.store(fail, Ordering::SeqCst);
    }

    pub fn panic_metadata(&self, panic: bool) {
        self.panic_metadata.store(panic, Ordering::SeqCst);
    }

    /// Metadata requests never complete.
    pub fn hang_metadata(&self, hang: bool) {
        self.hang_metadata.store(hang, Ordering::SeqCst);
    }

    pub fn set_local_metadata(&self, metadata: Metadata) {
        *self.local.lock() = metadata;
    }

    pub fn set_remote_metadata(&self, metadata: Metadata) {
        *self.remote.lock() = metadata;
    }

    pub fn network_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst) + self.rules_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteMetadataClient for FakeRemote {
    async fn load_filters_metadata(&self, filter_ids: &[FilterId]) -> Result<Vec<FilterMetadata>> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        if self.panic_metadata.load(Ordering::SeqCst) {
            panic!("metadata client crashed");
        }
        if self.hang_metadata.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
        }
        if self.fail_metadata.load(Ordering::SeqCst) {
            return Err(FilterError::Remote("metadata unavailable".to_string()));
        }
        Ok(self
            .metadata
            .lock()
            .iter()
            .filter(|m| filter_ids.contains(&m.filter_id))
            .cloned()
            .collect())
    }

    async fn load_filter_rules(&self, filter_id: FilterId) -> Result<Vec<String>> {
        self.rules_calls.fetch_add(1, Ordering::SeqCst);
        if self.hanging_rules.lock().contains(&filter_id) {
            tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
        }
        if self.failing_rules.lock().contains(&filter_id) {
            return Err(FilterError::Remote(format!("HTTP 500 for filter {}", filter_id)));
        }
        Ok(self
            .rules
            .lock()
            .get(&filter_id)
            .cloned()
            .unwrap_or_else(|| vec![format!("||ads-{}.example.org^", filter_id)]))
    }

    async fn load_local_metadata(&self) -> Result<Metadata> {
        Ok(self.local.lock().clone())
    }

    async fn load_remote_metadata(&self) -> Result<Metadata> {
        if self.fail_metadata.load(Ordering::SeqCst) {
            return Err(FilterError::Remote("metadata unavailable".to_string()));
        }
        Ok(self.remote.lock().clone())
    }
}

// ==================== Custom filters ====================

/// Outcome of the next update of a custom filter.
#[derive(Debug, Clone)]
pub enum CustomUpdate {
    Changed(&'static str),
    Unchanged,
    Fail,
}

#[derive(Debug, Default)]
pub struct FakeCustomStore {
    records: Mutex<BTreeMap<FilterId, CustomFilter>>,
    updates: Mutex<HashMap<FilterId, CustomUpdate>>,
    pub add_calls: AtomicUsize,
    pub info_calls: AtomicUsize,
}

impl FakeCustomStore {
    pub fn insert(&self, filter: Filter, removed: bool) {
        self.records
            .lock()
            .insert(filter.filter_id, CustomFilter { filter, removed });
    }

    pub fn on_update(&self, filter_id: FilterId, update: CustomUpdate) {
        self.updates.lock().insert(filter_id, update);
    }

    pub fn is_removed(&self, filter_id: FilterId) -> bool {
        self.records
            .lock()
            .get(&filter_id)
            .is_some_and(|record| record.removed)
    }
}

#[async_trait]
impl CustomFilterStore for FakeCustomStore {
    async fn add_custom_filter(
        &self,
        url: &str,
        options: &CustomFilterOptions,
    ) -> Result<CustomFilterDownload> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        if url.contains("unreachable") {
            return Err(FilterError::CustomFilter(format!("cannot download {}", url)));
        }
        let mut records = self.records.lock();
        let filter_id = records
            .keys()
            .next_back()
            .map_or(CUSTOM_FILTERS_START_ID, |id| id + 1)
            .max(CUSTOM_FILTERS_START_ID);
        let title = options.title.clone().unwrap_or_else(|| url.to_string());
        let mut filter = Filter::custom(filter_id, title, url).with_version("1.0.0.0");
        filter.trusted = Some(options.trusted);
        records.insert(
            filter_id,
            CustomFilter {
                filter: filter.clone(),
                removed: false,
            },
        );
        Ok(CustomFilterDownload {
            filter,
            rules: vec!["||custom.example.org^".to_string()],
        })
    }

    async fn custom_filter_info(
        &self,
        url: &str,
        options: &CustomFilterOptions,
    ) -> Result<CustomFilterInfo> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        Ok(CustomFilterInfo {
            url: url.to_string(),
            title: options.title.clone().unwrap_or_else(|| "Custom list".to_string()),
            description: None,
            homepage: None,
            version: Some(FilterVersion::parse("1.0.0.0")),
            expires: None,
            time_updated: None,
            rules_count: 1,
        })
    }

    async fn update_custom_filter(
        &self,
        filter_id: FilterId,
    ) -> Result<Option<CustomFilterDownload>> {
        let update = self
            .updates
            .lock()
            .get(&filter_id)
            .cloned()
            .unwrap_or(CustomUpdate::Unchanged);
        let record = self.records.lock().get(&filter_id).cloned();
        match (update, record) {
            (CustomUpdate::Fail, _) | (_, None) => Err(FilterError::CustomFilter(format!(
                "update of {} failed",
                filter_id
            ))),
            (CustomUpdate::Unchanged, Some(_)) => Ok(None),
            (CustomUpdate::Changed(version), Some(record)) => Ok(Some(CustomFilterDownload {
                filter: record.filter.with_version(version),
                rules: vec!["||changed.example.org^".to_string()],
            })),
        }
    }

    async fn custom_filters(&self) -> Result<Vec<CustomFilter>> {
        Ok(self.records.lock().values().cloned().collect())
    }

    async fn remove_custom_filter(&self, filter_id: FilterId) -> Result<()> {
        if let Some(record) = self.records.lock().get_mut(&filter_id) {
            record.removed = true;
        }
        Ok(())
    }
}

// ==================== Notifier & settings ====================

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<FilterEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<FilterEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(FilterEvent::kind).collect()
    }

    /// Kinds of the events carrying `filter_id`, in publish order.
    pub fn kinds_for(&self, filter_id: FilterId) -> Vec<EventKind> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.filter().is_some_and(|f| f.filter_id == filter_id))
            .map(FilterEvent::kind)
            .collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind() == kind).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Notifier for RecordingNotifier {
    fn publish(&self, event: FilterEvent) {
        self.events.lock().push(event);
    }
}

#[derive(Debug)]
pub struct TestSettings {
    period_hours: AtomicI64,
    locale: Mutex<String>,
}

impl Default for TestSettings {
    fn default() -> Self {
        Self {
            period_hours: AtomicI64::new(1),
            locale: Mutex::new("en".to_string()),
        }
    }
}

impl TestSettings {
    pub fn set_period_hours(&self, hours: i64) {
        self.period_hours.store(hours, Ordering::SeqCst);
    }

    pub fn set_locale(&self, locale: &str) {
        *self.locale.lock() = locale.to_string();
    }
}

impl Settings for TestSettings {
    fn filters_update_period_hours(&self) -> i64 {
        self.period_hours.load(Ordering::SeqCst)
    }

    fn locale(&self) -> String {
        self.locale.lock().clone()
    }
}

// ==================== Harness ====================

pub struct Harness {
    pub registry: Arc<InMemoryRegistry>,
    pub store: Arc<MemoryStateStore>,
    pub remote: Arc<FakeRemote>,
    pub custom: Arc<FakeCustomStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub settings: Arc<TestSettings>,
    pub ctx: FilterContext,
}

impl Harness {
    pub fn new() -> Self {
        let registry = Arc::new(InMemoryRegistry::new());
        let store = Arc::new(MemoryStateStore::default());
        let remote = Arc::new(FakeRemote::default());
        let custom = Arc::new(FakeCustomStore::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let settings = Arc::new(TestSettings::default());
        let ctx = FilterContext::new(
            registry.clone(),
            store.clone(),
            remote.clone(),
            custom.clone(),
            notifier.clone(),
            settings.clone(),
        );
        Self {
            registry,
            store,
            remote,
            custom,
            notifier,
            settings,
            ctx,
        }
    }

    /// Puts a filter into the registry as is.
    pub fn register(&self, filter: Filter) -> FilterId {
        let filter_id = filter.filter_id;
        self.registry.set_filter(filter);
        filter_id
    }

    /// An installed and enabled built-in filter in group 1.
    pub fn installed(filter_id: FilterId, version: &str) -> Filter {
        let mut filter =
            Filter::new(filter_id, 1, format!("Filter {}", filter_id)).with_version(version);
        filter.installed = true;
        filter.enabled = true;
        filter.loaded = true;
        filter
    }
}
