//! Filter update scheduler.
//!
//! Decides which filters are due for a refresh, fetches their metadata,
//! downloads rule bodies for the ones that changed and updates custom
//! filters. Owns the autoupdate timer.
//!
//! Per-filter download state: `IDLE -> DOWNLOADING -> (LOADED | FAILED)`.
//! Every transition is published on the notification bus.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::join_all;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::context::{now_millis, FilterContext};
use crate::error::{FilterError, Result};
use crate::events::{FilterEvent, UpdateCheckReport};
use crate::filter::{Filter, FilterId};
use crate::metadata::FilterMetadata;
use crate::timer::AutoUpdateTimer;
use crate::version::FilterVersion;

/// Scheduler timing configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Delay before the first check after startup.
    pub first_check_delay: Duration,
    /// A single-filter check is skipped if the filter was checked this recently.
    pub recently_updated_window: Duration,
    /// Delay before an administrative reload resets versions.
    pub reload_delay: Duration,
    /// Upper bound for every remote fetch.
    pub download_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            first_check_delay: Duration::from_secs(5 * 60),
            recently_updated_window: Duration::from_secs(5 * 60),
            reload_delay: Duration::from_secs(15),
            download_timeout: Duration::from_secs(60),
        }
    }
}

/// Filters selected for an update check, split by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterIdsToUpdate {
    pub filters: Vec<FilterId>,
    pub custom_filters: Vec<FilterId>,
}

impl FilterIdsToUpdate {
    /// Returns true if nothing is due.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty() && self.custom_filters.is_empty()
    }
}

/// Result of a batch of rule downloads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    pub loaded: Vec<FilterId>,
    pub failed: Vec<FilterId>,
}

impl LoadOutcome {
    /// Returns true if downloads were attempted and none succeeded.
    pub fn all_failed(&self) -> bool {
        self.loaded.is_empty() && !self.failed.is_empty()
    }
}

/// Decides, fetches and applies filter content updates.
pub struct UpdateScheduler {
    ctx: FilterContext,
    config: SchedulerConfig,
    timer: AutoUpdateTimer,
}

impl std::fmt::Debug for UpdateScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateScheduler")
            .field("config", &self.config)
            .field("timer", &self.timer)
            .finish_non_exhaustive()
    }
}

fn recurring_interval(period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

impl UpdateScheduler {
    /// Creates a scheduler with no timer armed.
    pub fn new(ctx: FilterContext, config: SchedulerConfig) -> Self {
        Self {
            ctx,
            config,
            timer: AutoUpdateTimer::new(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn timer(&self) -> &AutoUpdateTimer {
        &self.timer
    }

    // ==================== Selection ====================

    /// Partitions the filters due for an update into built-in and custom ids.
    ///
    /// Built-in filters must be installed and enabled, and either forced,
    /// never checked, or checked at least one update period ago. Custom
    /// filters only need to be enabled. The period is read from settings on
    /// every call.
    pub fn select_filter_ids_to_update(
        &self,
        force: bool,
        subset: Option<&[FilterId]>,
    ) -> FilterIdsToUpdate {
        let period = self.ctx.settings.filters_update_period_millis();
        let now = now_millis();

        let candidates: Vec<Filter> = match subset {
            Some(ids) => ids
                .iter()
                .filter_map(|id| self.ctx.registry.filter(*id))
                .collect(),
            None => self.ctx.registry.filters(),
        };

        let mut selected = FilterIdsToUpdate::default();
        for filter in candidates {
            if filter.is_custom() {
                if filter.enabled && !selected.custom_filters.contains(&filter.filter_id) {
                    selected.custom_filters.push(filter.filter_id);
                }
                continue;
            }
            if !(filter.installed && filter.enabled) {
                continue;
            }
            let due = force
                || filter
                    .last_check_time
                    .map_or(true, |checked| now - checked >= period);
            if due && !selected.filters.contains(&filter.filter_id) {
                selected.filters.push(filter.filter_id);
            }
        }
        selected
    }

    // ==================== Update checks ====================

    /// Checks the selected filters for updates and downloads new content.
    ///
    /// The check timestamp is stored before any network call. Exactly one
    /// `UpdateFiltersShowPopup` event is published per call. Never fails:
    /// errors are reported through `success: false`.
    pub async fn check_filters_update(
        &self,
        force: bool,
        subset: Option<&[FilterId]>,
    ) -> UpdateCheckReport {
        let timestamp = now_millis();
        if let Err(e) = self.ctx.state.set_last_update_check(timestamp) {
            warn!("Failed to record update check time: {}", e);
        }

        let selected = self.select_filter_ids_to_update(force, subset);
        let report = if selected.is_empty() {
            debug!("No filters due for update (force: {})", force);
            UpdateCheckReport::succeeded(Vec::new(), force, timestamp)
        } else {
            debug!(
                "Checking {} filters and {} custom filters for updates",
                selected.filters.len(),
                selected.custom_filters.len()
            );
            let (builtin, custom) = tokio::join!(
                self.update_builtin_filters(&selected.filters),
                self.update_custom_filters(&selected.custom_filters)
            );
            match builtin {
                Ok(mut updated) => {
                    updated.extend(custom);
                    UpdateCheckReport::succeeded(updated, force, timestamp)
                }
                Err(e) => {
                    warn!("Filters update check failed: {}", e);
                    UpdateCheckReport::failed(force, timestamp)
                }
            }
        };

        info!(
            "Filters update check finished: success={}, updated={:?}",
            report.success,
            report.updated_ids()
        );
        self.ctx
            .publish(FilterEvent::UpdateFiltersShowPopup(report.clone()));
        report
    }

    /// Fetches metadata for `filter_ids` and downloads the filters whose
    /// remote version is newer. Filters that are current are marked checked.
    async fn update_builtin_filters(&self, filter_ids: &[FilterId]) -> Result<Vec<Filter>> {
        if filter_ids.is_empty() {
            return Ok(Vec::new());
        }

        let metadata = tokio::time::timeout(
            self.config.download_timeout,
            self.ctx.remote.load_filters_metadata(filter_ids),
        )
        .await
        .map_err(|_| FilterError::MetadataTimeout)??;

        let now = now_millis();
        let mut outdated = Vec::new();
        for meta in metadata {
            let Some(filter) = self.ctx.registry.filter(meta.filter_id) else {
                continue;
            };
            if meta.version.is_newer_than(&filter.version) {
                debug!(
                    "Filter {} outdated: {} -> {}",
                    meta.filter_id, filter.version, meta.version
                );
                outdated.push(meta);
            } else if let Some(checked) = self
                .ctx
                .registry
                .update_filter(meta.filter_id, &mut |f| f.last_check_time = Some(now))
            {
                self.ctx.persist_filter_version(&checked);
            }
        }

        if outdated.is_empty() {
            return Ok(Vec::new());
        }

        let outcome = self.load_filters_from_backend(&outdated).await;
        if outcome.all_failed() {
            return Err(FilterError::Remote(format!(
                "all {} filter downloads failed",
                outcome.failed.len()
            )));
        }
        Ok(outcome
            .loaded
            .iter()
            .filter_map(|id| self.ctx.registry.filter(*id))
            .collect())
    }

    /// Downloads rules for every filter in `metadata` concurrently.
    ///
    /// Each download succeeds or fails on its own.
    pub async fn load_filters_from_backend(&self, metadata: &[FilterMetadata]) -> LoadOutcome {
        let results = join_all(metadata.iter().map(|meta| async move {
            (meta.filter_id, self.load_filter_rules(meta).await)
        }))
        .await;

        let mut outcome = LoadOutcome::default();
        for (filter_id, result) in results {
            match result {
                Ok(()) => outcome.loaded.push(filter_id),
                Err(_) => outcome.failed.push(filter_id),
            }
        }
        if !outcome.failed.is_empty() {
            warn!(
                "Failed to download {} of {} filters: {:?}",
                outcome.failed.len(),
                metadata.len(),
                outcome.failed
            );
        }
        outcome
    }

    /// Downloads the rules of a single filter and applies `metadata` on
    /// success.
    pub async fn load_filter_rules(&self, metadata: &FilterMetadata) -> Result<()> {
        let filter_id = metadata.filter_id;
        let filter = self
            .ctx
            .registry
            .update_filter(filter_id, &mut |f| f.is_downloading = true)
            .ok_or(FilterError::FilterNotFound(filter_id))?;
        self.ctx.publish(FilterEvent::StartDownloadFilter(filter));

        let result = match tokio::time::timeout(
            self.config.download_timeout,
            self.ctx.remote.load_filter_rules(filter_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(FilterError::Timeout(filter_id)),
        };

        let rules = match result {
            Ok(rules) => rules,
            Err(e) => {
                warn!("Failed to download rules of filter {}: {}", filter_id, e);
                if let Some(filter) = self
                    .ctx
                    .registry
                    .update_filter(filter_id, &mut |f| f.is_downloading = false)
                {
                    self.ctx.publish(FilterEvent::ErrorDownloadFilter(filter));
                }
                return Err(e);
            }
        };

        let now = now_millis();
        let updated_at = metadata.time_updated_millis().unwrap_or(now);
        let filter = self
            .ctx
            .registry
            .update_filter(filter_id, &mut |f| {
                f.is_downloading = false;
                f.version = metadata.version.clone();
                f.last_update_time = Some(updated_at);
                f.last_check_time = Some(now);
                f.loaded = true;
            })
            .ok_or(FilterError::FilterNotFound(filter_id))?;
        self.ctx.persist_filter(&filter);

        info!(
            "Filter {} loaded: version {}, {} rules",
            filter_id,
            filter.version,
            rules.len()
        );
        self.ctx
            .publish(FilterEvent::SuccessDownloadFilter(filter.clone()));
        self.ctx.publish(FilterEvent::UpdateFilterRules {
            filter,
            rules: Arc::new(rules),
        });
        Ok(())
    }

    /// Updates custom filters concurrently and returns the ones that changed.
    ///
    /// Failures are logged and omitted. A `FilterAddRemove` event is published
    /// for every attempted filter.
    pub async fn update_custom_filters(&self, filter_ids: &[FilterId]) -> Vec<Filter> {
        let results = join_all(
            filter_ids
                .iter()
                .map(|filter_id| self.update_custom_filter(*filter_id)),
        )
        .await;
        results.into_iter().flatten().collect()
    }

    async fn update_custom_filter(&self, filter_id: FilterId) -> Option<Filter> {
        let result = match tokio::time::timeout(
            self.config.download_timeout,
            self.ctx.custom_filters.update_custom_filter(filter_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(FilterError::Timeout(filter_id)),
        };

        let now = now_millis();
        let updated = match result {
            Ok(Some(download)) => {
                let filter = self.ctx.registry.update_filter(filter_id, &mut |f| {
                    f.name = download.filter.name.clone();
                    f.description = download.filter.description.clone();
                    f.homepage = download.filter.homepage.clone();
                    f.expires = download.filter.expires;
                    f.version = download.filter.version.clone();
                    f.last_update_time = Some(download.filter.last_update_time.unwrap_or(now));
                    f.last_check_time = Some(now);
                    f.loaded = true;
                });
                if let Some(filter) = &filter {
                    self.ctx.persist_filter(filter);
                    info!(
                        "Custom filter {} updated to version {}",
                        filter_id, filter.version
                    );
                    self.ctx.publish(FilterEvent::UpdateFilterRules {
                        filter: filter.clone(),
                        rules: Arc::new(download.rules),
                    });
                }
                filter
            }
            Ok(None) => {
                debug!("Custom filter {} is up to date", filter_id);
                if let Some(filter) = self
                    .ctx
                    .registry
                    .update_filter(filter_id, &mut |f| f.last_check_time = Some(now))
                {
                    self.ctx.persist_filter_version(&filter);
                }
                None
            }
            Err(e) => {
                warn!("Failed to update custom filter {}: {}", filter_id, e);
                None
            }
        };

        if let Some(filter) = self.ctx.registry.filter(filter_id) {
            self.ctx.publish(FilterEvent::FilterAddRemove(filter));
        }
        updated
    }

    /// Forced check of a single filter.
    ///
    /// Returns `None` without touching the network if the filter is unknown,
    /// disabled, or was checked within the recently-updated window.
    pub async fn check_filter_update(&self, filter_id: FilterId) -> Option<UpdateCheckReport> {
        let filter = self.ctx.registry.filter(filter_id)?;
        if !filter.enabled {
            debug!("Skipping update check of disabled filter {}", filter_id);
            return None;
        }
        let window =
            i64::try_from(self.config.recently_updated_window.as_millis()).unwrap_or(i64::MAX);
        if let Some(checked) = filter.last_check_time {
            if now_millis() - checked < window {
                debug!("Filter {} was checked recently, skipping", filter_id);
                return None;
            }
        }
        Some(self.check_filters_update(true, Some(&[filter_id])).await)
    }

    // ==================== Timers ====================

    /// Arms the first check after `first_check_delay` and the recurring timer.
    ///
    /// `is_first_run` is passed to the first check as the force flag.
    pub fn schedule_filters_update(self: &Arc<Self>, is_first_run: bool) {
        let scheduler = Arc::downgrade(self);
        let delay = self.config.first_check_delay;
        self.timer.start_first_check(async move {
            tokio::time::sleep(delay).await;
            if let Some(scheduler) = scheduler.upgrade() {
                scheduler.run_scheduled_check(is_first_run).await;
            }
        });
        info!(
            "First filters update check scheduled in {}s",
            delay.as_secs()
        );

        match self.recurring_task() {
            Some(task) => self.timer.start(task),
            None => self.timer.cancel(),
        }
    }

    /// Re-arms the recurring timer with the current period, without the
    /// first-run delay.
    pub fn rerun_autoupdate_timer(self: &Arc<Self>) {
        match self.recurring_task() {
            Some(task) => self.timer.reschedule(task),
            None => self.timer.cancel(),
        }
    }

    /// Builds the recurring check loop, or `None` if autoupdate is disabled.
    ///
    /// The period is read again on every tick. A non-positive period ends the
    /// loop without checking; a changed one restarts the interval from now.
    fn recurring_task(self: &Arc<Self>) -> Option<impl Future<Output = ()> + Send + 'static> {
        let Some(mut period) = self.update_period() else {
            info!("Filters autoupdate disabled");
            return None;
        };
        info!("Filters autoupdate every {}s", period.as_secs());

        let scheduler: Weak<Self> = Arc::downgrade(self);
        Some(async move {
            let mut ticker = recurring_interval(period);
            loop {
                ticker.tick().await;
                let Some(scheduler) = scheduler.upgrade() else {
                    break;
                };
                match scheduler.update_period() {
                    None => {
                        info!("Filters autoupdate disabled, stopping timer");
                        break;
                    }
                    Some(current) if current != period => {
                        info!("Filters autoupdate period changed to {}s", current.as_secs());
                        period = current;
                        ticker = recurring_interval(period);
                    }
                    Some(_) => scheduler.run_scheduled_check(false).await,
                }
            }
        })
    }

    /// Current autoupdate period, `None` when disabled.
    fn update_period(&self) -> Option<Duration> {
        let period = self.ctx.settings.filters_update_period_millis();
        (period > 0).then(|| Duration::from_millis(period.unsigned_abs()))
    }

    /// Runs one scheduled check in its own task so a panic only ends that
    /// cycle.
    async fn run_scheduled_check(self: Arc<Self>, force: bool) {
        let task = tokio::spawn(async move { self.check_filters_update(force, None).await });
        match task.await {
            Ok(report) => debug!("Scheduled update check done (success: {})", report.success),
            Err(e) => warn!("Scheduled update check aborted: {}", e),
        }
    }

    /// Resets every filter version after `reload_delay` and forces a full
    /// update check.
    pub async fn reload_filters(&self) -> UpdateCheckReport {
        tokio::time::sleep(self.config.reload_delay).await;
        self.reset_filters_version();
        self.check_filters_update(true, None).await
    }

    /// Sets every filter version to `0.0.0.0` so the next check downloads all
    /// of them.
    pub fn reset_filters_version(&self) {
        for filter in self.ctx.registry.filters() {
            if let Some(filter) = self
                .ctx
                .registry
                .update_filter(filter.filter_id, &mut |f| f.version = FilterVersion::zero())
            {
                self.ctx.persist_filter_version(&filter);
            }
        }
        info!("Filter versions reset");
    }

    /// Cancels every timer.
    pub fn shutdown(&self) {
        self.timer.shutdown();
        debug!("Update scheduler stopped");
    }
}
