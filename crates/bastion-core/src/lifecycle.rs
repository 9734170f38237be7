//! Filter lifecycle manager.
//!
//! Owns enable/disable/install/remove semantics for filters and groups,
//! custom filter subscription and cleanup of obsolete filters. Network work
//! is delegated to the [`UpdateScheduler`].

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::collaborators::{CustomFilterInfo, CustomFilterOptions};
use crate::context::{now_millis, FilterContext};
use crate::error::{FilterError, Result};
use crate::events::{FilterEvent, UpdateCheckReport};
use crate::filter::{
    groups, is_custom_filter_id, Filter, FilterId, Group, GroupId, GroupState,
    CUSTOM_FILTERS_GROUP_ID, SEARCH_AND_SELF_PROMO_FILTER_ID,
};
use crate::metadata::Metadata;
use crate::scheduler::UpdateScheduler;

/// Lifecycle manager configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Where the metadata snapshot is written on obsolete-filter cleanup.
    pub snapshot_path: Option<PathBuf>,
}

/// Enable/disable/install/remove state machine for filters and groups.
#[derive(Debug)]
pub struct FilterLifecycleManager {
    ctx: FilterContext,
    scheduler: Arc<UpdateScheduler>,
    config: LifecycleConfig,
}

impl FilterLifecycleManager {
    pub fn new(
        ctx: FilterContext,
        scheduler: Arc<UpdateScheduler>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            ctx,
            scheduler,
            config,
        }
    }

    pub fn scheduler(&self) -> &Arc<UpdateScheduler> {
        &self.scheduler
    }

    /// Populates the registry from metadata and the custom filter store, then
    /// restores the state persisted by the previous session.
    pub async fn load_metadata(&self, metadata: &Metadata) -> Result<()> {
        self.ctx.registry.merge_metadata(metadata);

        let custom = self.ctx.custom_filters.custom_filters().await?;
        for record in custom.into_iter().filter(|record| !record.removed) {
            if self.ctx.registry.filter(record.filter.filter_id).is_none() {
                self.ctx.registry.set_filter(record.filter);
            }
        }

        for filter in self.ctx.registry.filters() {
            match self.ctx.state.apply_to_filter(&filter) {
                Ok(restored) => self.ctx.registry.set_filter(restored),
                Err(e) => warn!("Failed to restore filter {}: {}", filter.filter_id, e),
            }
        }
        for group in self.ctx.registry.groups() {
            match self.ctx.state.apply_to_group(&group) {
                Ok(restored) => self.ctx.registry.set_group(restored),
                Err(e) => warn!("Failed to restore group {}: {}", group.group_id, e),
            }
        }

        info!(
            "Loaded {} filters in {} groups",
            self.ctx.registry.filters().len(),
            self.ctx.registry.groups().len()
        );
        Ok(())
    }

    // ==================== Queries ====================

    /// All filters with persisted state laid over them.
    pub fn get_filters(&self) -> Vec<Filter> {
        self.ctx
            .registry
            .filters()
            .into_iter()
            .map(|filter| match self.ctx.state.apply_to_filter(&filter) {
                Ok(merged) => merged,
                Err(e) => {
                    warn!("Failed to read state of filter {}: {}", filter.filter_id, e);
                    filter
                }
            })
            .collect()
    }

    /// All groups with persisted state laid over them.
    pub fn get_groups(&self) -> Vec<Group> {
        self.ctx
            .registry
            .groups()
            .into_iter()
            .map(|group| match self.ctx.state.apply_to_group(&group) {
                Ok(merged) => merged,
                Err(e) => {
                    warn!("Failed to read state of group {}: {}", group.group_id, e);
                    group
                }
            })
            .collect()
    }

    pub fn get_filter_by_id(&self, filter_id: FilterId) -> Result<Filter> {
        self.ctx
            .registry
            .filter(filter_id)
            .ok_or(FilterError::FilterNotFound(filter_id))
    }

    /// Built-in filters are always trusted; custom filters only when the user
    /// said so.
    pub fn is_trusted_filter(&self, filter_id: FilterId) -> bool {
        if !is_custom_filter_id(filter_id) {
            return true;
        }
        self.ctx
            .registry
            .filter(filter_id)
            .is_some_and(|filter| filter.is_trusted())
    }

    /// Recommended filters of a group.
    ///
    /// Language-specific filters are only recommended for the configured
    /// locale.
    pub fn recommended_filters(&self, group_id: GroupId) -> Vec<FilterId> {
        let locale = self.ctx.settings.locale();
        self.ctx
            .registry
            .filters()
            .into_iter()
            .filter(|f| f.group_id == group_id && !f.is_custom() && f.is_recommended())
            .filter(|f| group_id != groups::LANGUAGE_SPECIFIC || f.matches_locale(&locale))
            .map(|f| f.filter_id)
            .collect()
    }

    /// Groups offered on first run, in display order.
    pub fn offer_groups_and_filters(&self) -> Vec<GroupId> {
        vec![
            groups::AD_BLOCKING,
            groups::PRIVACY,
            groups::LANGUAGE_SPECIFIC,
        ]
    }

    // ==================== Filters ====================

    /// Enables a filter. Unknown and already enabled filters are ignored.
    ///
    /// The group is enabled as well if it was never toggled, if it is the
    /// custom group, or if the filter is the search ads filter.
    pub fn enable_filter(&self, filter_id: FilterId) {
        let mut changed = false;
        let Some(filter) = self.ctx.registry.update_filter(filter_id, &mut |f| {
            changed = !f.enabled;
            f.enabled = true;
        }) else {
            debug!("Cannot enable unknown filter {}", filter_id);
            return;
        };
        if !changed {
            return;
        }
        self.ctx.persist_filter_state(&filter);

        let group_never_set = self
            .ctx
            .registry
            .group(filter.group_id)
            .is_some_and(|group| group.state.is_never_set());
        if group_never_set
            || filter_id == SEARCH_AND_SELF_PROMO_FILTER_ID
            || filter.group_id == CUSTOM_FILTERS_GROUP_ID
        {
            self.enable_group(filter.group_id);
        }

        info!("Filter {} enabled", filter_id);
        self.ctx.publish(FilterEvent::FilterEnableDisable(filter));
    }

    /// Disables filters. Each id is handled on its own; unknown and already
    /// disabled ids are skipped.
    pub fn disable_filters(&self, filter_ids: &[FilterId]) {
        for &filter_id in filter_ids {
            let mut changed = false;
            let Some(filter) = self.ctx.registry.update_filter(filter_id, &mut |f| {
                changed = f.enabled;
                f.enabled = false;
            }) else {
                debug!("Cannot disable unknown filter {}", filter_id);
                continue;
            };
            if !changed {
                debug!("Filter {} already disabled", filter_id);
                continue;
            }
            self.ctx.persist_filter_state(&filter);
            info!("Filter {} disabled", filter_id);
            self.ctx.publish(FilterEvent::FilterEnableDisable(filter));
        }
    }

    /// Installs a filter, downloading its rules unless they are already
    /// loaded.
    pub async fn add_filter(&self, filter_id: FilterId) -> Result<()> {
        let filter = self.get_filter_by_id(filter_id)?;
        if filter.installed {
            debug!("Filter {} already installed", filter_id);
            return Ok(());
        }
        if !filter.loaded {
            self.scheduler.load_filter_rules(&filter.to_metadata()).await?;
        }

        let filter = self
            .ctx
            .registry
            .update_filter(filter_id, &mut |f| f.installed = true)
            .ok_or(FilterError::FilterNotFound(filter_id))?;
        self.ctx.persist_filter_state(&filter);
        info!("Filter {} installed", filter_id);
        self.ctx.publish(FilterEvent::FilterAddRemove(filter));
        Ok(())
    }

    /// Installs and enables filters one after another, in order, skipping
    /// duplicates. A filter that fails to install is not enabled.
    pub async fn add_and_enable_filters(&self, filter_ids: &[FilterId]) {
        let mut seen = Vec::with_capacity(filter_ids.len());
        for &filter_id in filter_ids {
            if seen.contains(&filter_id) {
                continue;
            }
            seen.push(filter_id);

            match self.add_filter(filter_id).await {
                Ok(()) => self.enable_filter(filter_id),
                Err(e) => warn!("Failed to install filter {}: {}", filter_id, e),
            }
        }
    }

    /// Installs and enables a filter, then checks a built-in one for updates.
    pub async fn enable_and_update_filter(
        &self,
        filter_id: FilterId,
    ) -> Result<Option<UpdateCheckReport>> {
        self.add_filter(filter_id).await?;
        self.enable_filter(filter_id);
        if is_custom_filter_id(filter_id) {
            return Ok(None);
        }
        Ok(self.scheduler.check_filter_update(filter_id).await)
    }

    /// Disables and uninstalls a filter and drops it from the registry.
    ///
    /// Custom filters are also tombstoned in the custom filter store.
    pub async fn remove_filter(&self, filter_id: FilterId) -> Result<()> {
        let Some(filter) = self.ctx.registry.update_filter(filter_id, &mut |f| {
            f.enabled = false;
            f.installed = false;
        }) else {
            debug!("Cannot remove unknown filter {}", filter_id);
            return Ok(());
        };
        self.ctx.persist_filter_state(&filter);
        self.ctx
            .publish(FilterEvent::FilterEnableDisable(filter.clone()));
        self.ctx.publish(FilterEvent::FilterAddRemove(filter.clone()));

        if filter.is_custom() {
            self.ctx.custom_filters.remove_custom_filter(filter_id).await?;
        }
        self.ctx.registry.remove_filter(filter_id);
        info!("Filter {} removed", filter_id);
        Ok(())
    }

    // ==================== Groups ====================

    /// Enables a group. Emits an event only on a real transition.
    pub fn enable_group(&self, group_id: GroupId) {
        self.set_group_state(group_id, GroupState::Enabled);
    }

    /// Disables a group. Emits an event only on a real transition.
    pub fn disable_group(&self, group_id: GroupId) {
        self.set_group_state(group_id, GroupState::Disabled);
    }

    fn set_group_state(&self, group_id: GroupId, state: GroupState) {
        let mut changed = false;
        let Some(group) = self.ctx.registry.update_group(group_id, &mut |g| {
            changed = g.state != state;
            g.state = state;
        }) else {
            debug!("Cannot toggle unknown group {}", group_id);
            return;
        };
        if !changed {
            return;
        }
        self.ctx.persist_group(&group);
        info!("Group {} {:?}", group_id, state);
        self.ctx.publish(FilterEvent::FilterGroupEnableDisable(group));
    }

    /// Enables a group. The first enable of a never-toggled group also
    /// installs and enables its recommended filters.
    pub async fn enable_filters_group(&self, group_id: GroupId) {
        let Some(group) = self.ctx.registry.group(group_id) else {
            debug!("Cannot enable unknown group {}", group_id);
            return;
        };
        if group.state.is_never_set() {
            let recommended = self.recommended_filters(group_id);
            debug!(
                "First enable of group {}, adding recommended filters {:?}",
                group_id, recommended
            );
            self.add_and_enable_filters(&recommended).await;
        }
        self.enable_group(group_id);
    }

    pub fn disable_filters_group(&self, group_id: GroupId) {
        self.disable_group(group_id);
    }

    // ==================== Cleanup ====================

    /// Removes filters that disappeared from the remote metadata.
    ///
    /// A local filter is obsolete when no remote filter has both its id and
    /// its name. The remote metadata is written to the snapshot path first.
    pub async fn remove_obsolete_filters(&self) -> Result<Vec<FilterId>> {
        let local = self.ctx.remote.load_local_metadata().await?;
        let remote = self.ctx.remote.load_remote_metadata().await?;

        let obsolete: Vec<FilterId> = local
            .obsolete_filters(&remote)
            .iter()
            .map(|meta| meta.filter_id)
            .collect();

        if let Some(path) = &self.config.snapshot_path {
            remote.write_snapshot(path)?;
            debug!("Metadata snapshot written to {:?}", path);
        }

        for &filter_id in &obsolete {
            self.forget_filter(filter_id);
            info!("Obsolete filter {} removed", filter_id);
        }
        Ok(obsolete)
    }

    /// Drops custom filters the user deleted from the state store and the
    /// registry.
    pub async fn clean_removed_custom_filters(&self) -> Result<Vec<FilterId>> {
        let removed: Vec<FilterId> = self
            .ctx
            .custom_filters
            .custom_filters()
            .await?
            .into_iter()
            .filter(|record| record.removed)
            .map(|record| record.filter.filter_id)
            .collect();

        for &filter_id in &removed {
            self.forget_filter(filter_id);
            debug!("Removed custom filter {} cleaned up", filter_id);
        }
        Ok(removed)
    }

    fn forget_filter(&self, filter_id: FilterId) {
        if let Err(e) = self.ctx.state.remove_filter(filter_id) {
            warn!("Failed to remove state of filter {}: {}", filter_id, e);
        }
        self.ctx.registry.remove_filter(filter_id);
    }

    // ==================== Custom filters ====================

    /// Downloads and registers a custom filter, then enables it.
    pub async fn subscribe_to_custom_filter(
        &self,
        url: &str,
        options: &CustomFilterOptions,
    ) -> Result<Filter> {
        let url = validate_url(url)?;
        let download = self
            .ctx
            .custom_filters
            .add_custom_filter(url, options)
            .await?;

        let now = now_millis();
        let mut filter = download.filter;
        filter.installed = true;
        filter.loaded = true;
        filter.last_check_time = Some(now);
        filter.last_update_time.get_or_insert(now);
        let filter_id = filter.filter_id;

        if self.ctx.registry.group(CUSTOM_FILTERS_GROUP_ID).is_none() {
            self.ctx.registry.set_group(Group::custom());
        }
        self.ctx.registry.set_filter(filter.clone());
        self.ctx.persist_filter(&filter);

        info!("Subscribed to custom filter {} from {}", filter_id, url);
        self.ctx.publish(FilterEvent::FilterAddRemove(filter.clone()));
        self.ctx.publish(FilterEvent::UpdateFilterRules {
            filter,
            rules: Arc::new(download.rules),
        });

        self.enable_filter(filter_id);
        self.get_filter_by_id(filter_id)
    }

    /// Downloads a custom filter and returns its metadata without
    /// registering it.
    pub async fn load_custom_filter_info(
        &self,
        url: &str,
        options: &CustomFilterOptions,
    ) -> Result<CustomFilterInfo> {
        let url = validate_url(url)?;
        self.ctx.custom_filters.custom_filter_info(url, options).await
    }
}

fn validate_url(url: &str) -> Result<&str> {
    let url = url.trim();
    if url.is_empty() {
        return Err(FilterError::InvalidUrl);
    }
    Ok(url)
}
