//! Application wiring.
//!
//! Builds the orchestrator from the SQLite store, the HTTP clients and the
//! stored settings, and drives the startup, cleanup and daemon flows.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bastion_core::{
    FilterContext, FilterId, FilterLifecycleManager, InMemoryRegistry, LifecycleConfig,
    RemoteMetadataClient, SchedulerConfig, Settings, UpdateScheduler,
};
use bastion_remote::{CustomFilterService, HttpMetadataClient, RemoteConfig};
use bastion_storage::{Database, StoredSettings};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::paths::AppPaths;
use crate::sink::{spawn_rules_sink, SinkStats};

/// How often a running daemon re-reads the autoupdate period.
const SETTINGS_POLL: Duration = Duration::from_secs(60);

/// What a cleanup pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    pub obsolete: Vec<FilterId>,
    pub custom: Vec<FilterId>,
}

/// A fully wired orchestrator.
pub struct App {
    paths: AppPaths,
    db: Database,
    settings: StoredSettings,
    remote: Arc<HttpMetadataClient>,
    custom: Arc<CustomFilterService>,
    scheduler: Arc<UpdateScheduler>,
    manager: FilterLifecycleManager,
    sink: Option<JoinHandle<SinkStats>>,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}

impl App {
    /// Opens the database under `paths` and wires every collaborator.
    ///
    /// Must be called inside a tokio runtime; the rules sink is spawned here.
    pub fn open(paths: AppPaths, scheduler_config: SchedulerConfig) -> anyhow::Result<Self> {
        let db = Database::with_path(&paths.db_path)
            .with_context(|| format!("Failed to open database at {:?}", paths.db_path))?;
        let settings = StoredSettings::new(db.clone());

        let mut remote_config = RemoteConfig::new(&paths.snapshot_path);
        if let Some(url) = settings.metadata_url()? {
            remote_config.metadata_url = url;
        }
        if let Some(url) = settings.rules_url()? {
            remote_config.rules_url = url;
        }
        let request_timeout = remote_config.request_timeout;

        let remote = Arc::new(HttpMetadataClient::new(remote_config)?);
        let custom = Arc::new(CustomFilterService::new(db.clone(), request_timeout)?);

        let (notifier, sink) = spawn_rules_sink(db.clone());

        let ctx = FilterContext::new(
            Arc::new(InMemoryRegistry::new()),
            Arc::new(db.clone()),
            remote.clone(),
            custom.clone(),
            Arc::new(notifier),
            Arc::new(settings.clone()),
        );
        let scheduler = Arc::new(UpdateScheduler::new(ctx.clone(), scheduler_config));
        let manager = FilterLifecycleManager::new(
            ctx,
            scheduler.clone(),
            LifecycleConfig {
                snapshot_path: Some(paths.snapshot_path.clone()),
            },
        );

        Ok(Self {
            paths,
            db,
            settings,
            remote,
            custom,
            scheduler,
            manager,
            sink: Some(sink),
        })
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn settings(&self) -> &StoredSettings {
        &self.settings
    }

    pub fn manager(&self) -> &FilterLifecycleManager {
        &self.manager
    }

    pub fn scheduler(&self) -> &Arc<UpdateScheduler> {
        &self.scheduler
    }

    /// Loads the local metadata snapshot and restores the previous session.
    pub async fn init(&self) -> anyhow::Result<()> {
        let metadata = self
            .remote
            .load_local_metadata()
            .await
            .context("Failed to load local metadata")?;
        self.manager.load_metadata(&metadata).await?;
        Ok(())
    }

    /// First start: fetches the metadata, saves the snapshot and enables
    /// the groups offered to new users.
    pub async fn bootstrap(&self) -> anyhow::Result<()> {
        let metadata = self
            .remote
            .load_remote_metadata()
            .await
            .context("Failed to fetch filter metadata")?;
        metadata.write_snapshot(&self.paths.snapshot_path)?;
        self.manager.load_metadata(&metadata).await?;

        for group_id in self.manager.offer_groups_and_filters() {
            self.manager.enable_filters_group(group_id).await;
        }
        info!(
            "Bootstrapped {} filters from {:?}",
            metadata.filters.len(),
            self.remote.config().metadata_url
        );
        Ok(())
    }

    /// Drops obsolete built-in filters and deleted custom filters.
    ///
    /// An unreachable metadata service only skips the obsolete pass.
    pub async fn cleanup(&self) -> anyhow::Result<CleanupSummary> {
        let obsolete = match self.manager.remove_obsolete_filters().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Obsolete filter cleanup skipped: {}", e);
                Vec::new()
            }
        };
        for &filter_id in &obsolete {
            self.db.delete_rules(filter_id)?;
        }

        let custom = self.manager.clean_removed_custom_filters().await?;
        self.custom.purge_removed()?;

        Ok(CleanupSummary { obsolete, custom })
    }

    /// Runs the autoupdate daemon until Ctrl-C.
    pub async fn run_daemon(&self, first_run: bool) -> anyhow::Result<()> {
        self.init().await?;
        if first_run {
            self.bootstrap().await?;
        }

        let summary = self.cleanup().await?;
        info!(
            "Startup cleanup removed {} obsolete and {} custom filters",
            summary.obsolete.len(),
            summary.custom.len()
        );

        self.scheduler.schedule_filters_update(first_run);
        let watcher = self.spawn_period_watcher();
        info!(
            "Autoupdate running every {} hours",
            self.settings.filters_update_period_hours()
        );

        let result = tokio::signal::ctrl_c().await;
        info!("Shutdown requested");
        watcher.abort();
        self.scheduler.shutdown();
        result?;
        Ok(())
    }

    /// Re-arms the autoupdate timer whenever the stored period changes, so a
    /// `set-period` from another process reaches a running daemon.
    pub fn spawn_period_watcher(&self) -> JoinHandle<()> {
        let scheduler = Arc::downgrade(&self.scheduler);
        let settings = self.settings.clone();
        tokio::spawn(async move {
            let mut current = settings.filters_update_period_hours();
            let mut ticker = tokio::time::interval_at(
                tokio::time::Instant::now() + SETTINGS_POLL,
                SETTINGS_POLL,
            );
            loop {
                ticker.tick().await;
                let Some(scheduler) = scheduler.upgrade() else {
                    break;
                };
                let period = settings.filters_update_period_hours();
                if period != current {
                    info!("Autoupdate period changed from {} to {} hours", current, period);
                    current = period;
                    scheduler.rerun_autoupdate_timer();
                }
            }
        })
    }

    /// Shuts the orchestrator down and waits for pending rule bodies to be
    /// stored.
    pub async fn close(mut self) -> anyhow::Result<SinkStats> {
        self.scheduler.shutdown();
        let sink = self.sink.take();
        // Dropping the orchestrator drops the last notifier, which stops the sink
        drop(self);

        match sink {
            Some(handle) => Ok(handle.await?),
            None => Ok(SinkStats::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_core::Filter;
    use bastion_storage::NewCustomFilter;
    use serde_json::json;

    const METADATA: &str = r#"{
        "groups": [{"groupId": 1, "groupName": "Ad Blocking", "displayNumber": 1}],
        "tags": [],
        "filters": [
            {"filterId": 2, "groupId": 1, "name": "Base", "version": "2.0.91.12"},
            {"filterId": 3, "groupId": 1, "name": "Tracking", "version": "1.0.0.4"}
        ]
    }"#;

    /// Data dir with a local snapshot and endpoints that refuse connections.
    fn offline_paths(dir: &tempfile::TempDir) -> AppPaths {
        let paths = AppPaths::new(dir.path());
        std::fs::write(&paths.snapshot_path, METADATA).unwrap();

        let db = Database::with_path(&paths.db_path).unwrap();
        let settings = StoredSettings::new(db);
        settings
            .set_metadata_url("http://127.0.0.1:9/filters.json")
            .unwrap();
        settings
            .set_rules_url("http://127.0.0.1:9/filters/{filter_id}.txt")
            .unwrap();
        paths
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let paths = offline_paths(&dir);

        let app = App::open(paths.clone(), SchedulerConfig::default()).unwrap();
        app.init().await.unwrap();
        assert_eq!(app.manager().get_filters().len(), 2);
        app.manager().enable_filter(2);
        app.manager().disable_filters_group(1);
        app.close().await.unwrap();

        let app = App::open(paths, SchedulerConfig::default()).unwrap();
        app.init().await.unwrap();
        assert!(app.manager().get_filter_by_id(2).unwrap().enabled);
        assert!(!app.manager().get_filter_by_id(3).unwrap().enabled);
        let group = app
            .manager()
            .get_groups()
            .into_iter()
            .find(|g| g.group_id == 1)
            .unwrap();
        assert!(!group.state.is_enabled());
        app.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_purges_removed_custom_filters_offline() {
        let dir = tempfile::tempdir().unwrap();
        let paths = offline_paths(&dir);

        let app = App::open(paths, SchedulerConfig::default()).unwrap();
        for filter_id in [1000, 1001] {
            app.db()
                .save_custom_filter(&NewCustomFilter {
                    filter: Filter::custom(filter_id, "Mine", format!("https://{}.example", filter_id)),
                    checksum: String::new(),
                })
                .unwrap();
        }
        app.init().await.unwrap();
        app.manager().remove_filter(1001).await.unwrap();

        let summary = app.cleanup().await.unwrap();
        assert!(summary.obsolete.is_empty());
        assert_eq!(summary.custom, vec![1001]);
        assert!(app.db().get_custom_filter(1001).unwrap().is_none());
        assert!(app.db().get_custom_filter(1000).unwrap().is_some());
        app.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_period_change_reaches_running_scheduler() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::open(offline_paths(&dir), SchedulerConfig::default()).unwrap();

        app.scheduler().schedule_filters_update(false);
        let watcher = app.spawn_period_watcher();
        assert!(app.scheduler().timer().is_armed());

        app.settings().set_update_period_hours(0).unwrap();
        tokio::time::sleep(SETTINGS_POLL + Duration::from_secs(1)).await;
        assert!(!app.scheduler().timer().is_armed());

        app.settings().set_update_period_hours(2).unwrap();
        tokio::time::sleep(SETTINGS_POLL).await;
        assert!(app.scheduler().timer().is_armed());

        watcher.abort();
        app.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_check_with_unreachable_service_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let paths = offline_paths(&dir);

        let app = App::open(paths, SchedulerConfig::default()).unwrap();
        // Installed filters are the ones the scheduler looks at
        app.db()
            .set_state("filter-state:2", &json!({"enabled": true, "installed": true, "loaded": true}))
            .unwrap();
        app.init().await.unwrap();

        let report = app.scheduler().check_filters_update(true, None).await;
        assert!(!report.success);
        assert!(app.db().get_rules(2).unwrap().is_none());
        app.close().await.unwrap();
    }
}
