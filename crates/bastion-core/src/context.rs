//! Collaborators shared by the lifecycle manager and the update scheduler.

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use crate::collaborators::{CustomFilterStore, RemoteMetadataClient, Settings, StateStore};
use crate::events::{FilterEvent, Notifier};
use crate::filter::{Filter, Group};
use crate::registry::FilterRegistry;
use crate::state::FilterStateStore;

/// Current time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Handles to every collaborator of the orchestrator.
#[derive(Clone)]
pub struct FilterContext {
    pub registry: Arc<dyn FilterRegistry>,
    pub state: FilterStateStore,
    pub remote: Arc<dyn RemoteMetadataClient>,
    pub custom_filters: Arc<dyn CustomFilterStore>,
    pub notifier: Arc<dyn Notifier>,
    pub settings: Arc<dyn Settings>,
}

impl std::fmt::Debug for FilterContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterContext").finish_non_exhaustive()
    }
}

impl FilterContext {
    /// Bundles the collaborators.
    pub fn new(
        registry: Arc<dyn FilterRegistry>,
        state_store: Arc<dyn StateStore>,
        remote: Arc<dyn RemoteMetadataClient>,
        custom_filters: Arc<dyn CustomFilterStore>,
        notifier: Arc<dyn Notifier>,
        settings: Arc<dyn Settings>,
    ) -> Self {
        Self {
            registry,
            state: FilterStateStore::new(state_store),
            remote,
            custom_filters,
            notifier,
            settings,
        }
    }

    pub(crate) fn publish(&self, event: FilterEvent) {
        self.notifier.publish(event);
    }

    /// Writes the flags and version of `filter` through to the state store.
    ///
    /// Failures are logged; a transition is never rolled back because the
    /// store is unavailable.
    pub(crate) fn persist_filter(&self, filter: &Filter) {
        self.persist_filter_state(filter);
        self.persist_filter_version(filter);
    }

    pub(crate) fn persist_filter_state(&self, filter: &Filter) {
        if let Err(e) = self.state.save_filter_state(filter) {
            warn!("Failed to persist state of filter {}: {}", filter.filter_id, e);
        }
    }

    pub(crate) fn persist_filter_version(&self, filter: &Filter) {
        if let Err(e) = self.state.save_filter_version(filter) {
            warn!(
                "Failed to persist version of filter {}: {}",
                filter.filter_id, e
            );
        }
    }

    pub(crate) fn persist_group(&self, group: &Group) {
        if let Err(e) = self.state.save_group_state(group) {
            warn!("Failed to persist state of group {}: {}", group.group_id, e);
        }
    }
}
