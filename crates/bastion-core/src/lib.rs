//! Bastion Core - Filter subscription lifecycle and update scheduling.
//!
//! This crate manages a collection of content-filtering rule lists grouped
//! into categories and keeps them synchronized with a remote metadata/rules
//! service. It provides:
//!
//! - The filter/group data model and version ordering
//! - [`FilterLifecycleManager`]: enable/disable/install/remove state machine
//! - [`UpdateScheduler`]: update selection, rule downloads and the autoupdate timer
//! - Collaborator traits for persistence, remote access and settings
//! - A tokio broadcast notification bus
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bastion_core::{
//!     BroadcastNotifier, CustomFilterStore, FilterContext, FilterLifecycleManager,
//!     InMemoryRegistry, LifecycleConfig, RemoteMetadataClient, SchedulerConfig,
//!     StateStore, StaticSettings, UpdateScheduler,
//! };
//!
//! # async fn run(
//! #     store: Arc<dyn StateStore>,
//! #     remote: Arc<dyn RemoteMetadataClient>,
//! #     custom: Arc<dyn CustomFilterStore>,
//! # ) -> bastion_core::Result<()> {
//! let ctx = FilterContext::new(
//!     Arc::new(InMemoryRegistry::new()),
//!     store,
//!     remote.clone(),
//!     custom,
//!     Arc::new(BroadcastNotifier::new()),
//!     Arc::new(StaticSettings::default()),
//! );
//! let scheduler = Arc::new(UpdateScheduler::new(ctx.clone(), SchedulerConfig::default()));
//! let manager = FilterLifecycleManager::new(ctx, scheduler.clone(), LifecycleConfig::default());
//!
//! manager.load_metadata(&remote.load_local_metadata().await?).await?;
//! manager.enable_filters_group(bastion_core::groups::AD_BLOCKING).await;
//! scheduler.schedule_filters_update(true);
//! # Ok(())
//! # }
//! ```

pub mod collaborators;
mod context;
pub mod error;
pub mod events;
pub mod filter;
pub mod lifecycle;
pub mod metadata;
pub mod registry;
pub mod scheduler;
pub mod state;
mod timer;
pub mod version;

#[cfg(test)]
mod testing;

pub use collaborators::{
    CustomFilter, CustomFilterDownload, CustomFilterInfo, CustomFilterOptions, CustomFilterStore,
    RemoteMetadataClient, Settings, StateStore, StaticSettings,
};
pub use context::{now_millis, FilterContext};
pub use error::{FilterError, Result};
pub use events::{BroadcastNotifier, EventKind, FilterEvent, Notifier, UpdateCheckReport};
pub use filter::{
    groups, is_custom_filter_id, Filter, FilterId, Group, GroupId, GroupState,
    CUSTOM_FILTERS_GROUP_ID, CUSTOM_FILTERS_START_ID, RECOMMENDED_TAG_ID,
    SEARCH_AND_SELF_PROMO_FILTER_ID,
};
pub use lifecycle::{FilterLifecycleManager, LifecycleConfig};
pub use metadata::{FilterMetadata, GroupMetadata, Metadata, TagMetadata};
pub use registry::{FilterRegistry, InMemoryRegistry};
pub use scheduler::{FilterIdsToUpdate, LoadOutcome, SchedulerConfig, UpdateScheduler};
pub use state::{FilterStateRecord, FilterStateStore, FilterVersionRecord, GroupStateRecord};
pub use timer::AutoUpdateTimer;
pub use version::FilterVersion;
