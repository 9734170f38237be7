//! Lifecycle notifications.
//!
//! The orchestrator publishes every state transition as a [`FilterEvent`].
//! Publishing is fire-and-forget: the core never waits for listeners and
//! never learns whether anyone received an event.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::filter::{Filter, FilterId, Group};

/// Default capacity of the broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Result of one update check, as shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCheckReport {
    pub success: bool,
    /// Filters whose content changed. `None` when the check failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_filters: Option<Vec<Filter>>,
    pub force_update: bool,
    /// Epoch milliseconds recorded before any network call.
    pub last_check_timestamp: i64,
}

impl UpdateCheckReport {
    /// A successful check.
    pub fn succeeded(updated: Vec<Filter>, force_update: bool, last_check_timestamp: i64) -> Self {
        Self {
            success: true,
            updated_filters: Some(updated),
            force_update,
            last_check_timestamp,
        }
    }

    /// A failed check. No update list is reported.
    pub fn failed(force_update: bool, last_check_timestamp: i64) -> Self {
        Self {
            success: false,
            updated_filters: None,
            force_update,
            last_check_timestamp,
        }
    }

    /// Ids of the updated filters (empty on failure).
    pub fn updated_ids(&self) -> Vec<FilterId> {
        self.updated_filters
            .as_ref()
            .map(|filters| filters.iter().map(|f| f.filter_id).collect())
            .unwrap_or_default()
    }
}

/// Event published by the orchestrator.
#[derive(Debug, Clone)]
pub enum FilterEvent {
    FilterGroupEnableDisable(Group),
    FilterEnableDisable(Filter),
    FilterAddRemove(Filter),
    StartDownloadFilter(Filter),
    SuccessDownloadFilter(Filter),
    ErrorDownloadFilter(Filter),
    /// New rule content for a filter.
    UpdateFilterRules {
        filter: Filter,
        rules: Arc<Vec<String>>,
    },
    UpdateFiltersShowPopup(UpdateCheckReport),
}

/// Discriminant of a [`FilterEvent`], handy for ordering assertions and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    FilterGroupEnableDisable,
    FilterEnableDisable,
    FilterAddRemove,
    StartDownloadFilter,
    SuccessDownloadFilter,
    ErrorDownloadFilter,
    UpdateFilterRules,
    UpdateFiltersShowPopup,
}

impl EventKind {
    /// Returns the event name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::FilterGroupEnableDisable => "filter-group-enable-disable",
            EventKind::FilterEnableDisable => "filter-enable-disable",
            EventKind::FilterAddRemove => "filter-add-remove",
            EventKind::StartDownloadFilter => "start-download-filter",
            EventKind::SuccessDownloadFilter => "success-download-filter",
            EventKind::ErrorDownloadFilter => "error-download-filter",
            EventKind::UpdateFilterRules => "update-filter-rules",
            EventKind::UpdateFiltersShowPopup => "update-filters-show-popup",
        }
    }
}

impl FilterEvent {
    /// Returns the kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            FilterEvent::FilterGroupEnableDisable(_) => EventKind::FilterGroupEnableDisable,
            FilterEvent::FilterEnableDisable(_) => EventKind::FilterEnableDisable,
            FilterEvent::FilterAddRemove(_) => EventKind::FilterAddRemove,
            FilterEvent::StartDownloadFilter(_) => EventKind::StartDownloadFilter,
            FilterEvent::SuccessDownloadFilter(_) => EventKind::SuccessDownloadFilter,
            FilterEvent::ErrorDownloadFilter(_) => EventKind::ErrorDownloadFilter,
            FilterEvent::UpdateFilterRules { .. } => EventKind::UpdateFilterRules,
            FilterEvent::UpdateFiltersShowPopup(_) => EventKind::UpdateFiltersShowPopup,
        }
    }

    /// The filter this event is about, if any.
    pub fn filter(&self) -> Option<&Filter> {
        match self {
            FilterEvent::FilterEnableDisable(f)
            | FilterEvent::FilterAddRemove(f)
            | FilterEvent::StartDownloadFilter(f)
            | FilterEvent::SuccessDownloadFilter(f)
            | FilterEvent::ErrorDownloadFilter(f) => Some(f),
            FilterEvent::UpdateFilterRules { filter, .. } => Some(filter),
            FilterEvent::FilterGroupEnableDisable(_) | FilterEvent::UpdateFiltersShowPopup(_) => {
                None
            }
        }
    }
}

/// Publish side of the notification bus.
pub trait Notifier: Send + Sync {
    /// Publishes an event. Must not block.
    fn publish(&self, event: FilterEvent);
}

/// Notification bus backed by a tokio broadcast channel.
///
/// Publishing with no subscribers is not an error; slow subscribers lose the
/// oldest events.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<FilterEvent>,
}

impl BroadcastNotifier {
    /// Creates a bus with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Creates a bus with the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribes to all events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<FilterEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for BroadcastNotifier {
    fn publish(&self, event: FilterEvent) {
        tracing::trace!("Publishing {}", event.kind().as_str());
        // No subscribers is fine
        let _ = self.sender.send(event);
    }
}
