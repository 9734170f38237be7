//! Filter registry.
//!
//! The registry is the single source of truth for filter and group objects.
//! Callers mutate through [`FilterRegistry::update_filter`] /
//! [`FilterRegistry::update_group`], which apply a closure to the current
//! object under the lock, so interleaved operations never write back a stale
//! copy.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::filter::{Filter, FilterId, Group, GroupId, CUSTOM_FILTERS_GROUP_ID};
use crate::metadata::Metadata;

/// In-memory store of filters and groups keyed by id.
pub trait FilterRegistry: Send + Sync {
    fn filter(&self, filter_id: FilterId) -> Option<Filter>;

    fn set_filter(&self, filter: Filter);

    /// Applies `f` to the current filter and returns the updated copy.
    fn update_filter(
        &self,
        filter_id: FilterId,
        f: &mut dyn FnMut(&mut Filter),
    ) -> Option<Filter>;

    fn remove_filter(&self, filter_id: FilterId) -> Option<Filter>;

    /// All filters ordered by id.
    fn filters(&self) -> Vec<Filter>;

    fn group(&self, group_id: GroupId) -> Option<Group>;

    fn set_group(&self, group: Group);

    /// Applies `f` to the current group and returns the updated copy.
    fn update_group(&self, group_id: GroupId, f: &mut dyn FnMut(&mut Group)) -> Option<Group>;

    fn remove_group(&self, group_id: GroupId) -> Option<Group>;

    /// All groups ordered by id.
    fn groups(&self) -> Vec<Group>;

    /// Inserts groups and built-in filters from metadata.
    ///
    /// Existing entries keep their lifecycle state; only display metadata is
    /// refreshed. The custom filters group is always present.
    fn merge_metadata(&self, metadata: &Metadata) {
        if self.group(CUSTOM_FILTERS_GROUP_ID).is_none() {
            self.set_group(Group::custom());
        }
        for meta in &metadata.groups {
            let refreshed = self.update_group(meta.group_id, &mut |group| {
                group.name = meta.group_name.clone();
                group.display_number = meta.display_number;
            });
            if refreshed.is_none() {
                self.set_group(Group::from_metadata(meta));
            }
        }
        for meta in &metadata.filters {
            if self
                .update_filter(meta.filter_id, &mut |filter| filter.apply_metadata(meta))
                .is_none()
            {
                self.set_filter(Filter::from_metadata(meta).with_version(meta.version.clone()));
            }
        }
    }
}

/// Registry backed by ordered maps behind a read-write lock.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    filters: RwLock<BTreeMap<FilterId, Filter>>,
    groups: RwLock<BTreeMap<GroupId, Group>>,
}

impl InMemoryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry populated from metadata.
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let registry = Self::new();
        registry.merge_metadata(metadata);
        registry
    }

    /// Number of filters.
    pub fn len(&self) -> usize {
        self.filters.read().len()
    }

    /// Returns true if there are no filters.
    pub fn is_empty(&self) -> bool {
        self.filters.read().is_empty()
    }
}

impl FilterRegistry for InMemoryRegistry {
    fn filter(&self, filter_id: FilterId) -> Option<Filter> {
        self.filters.read().get(&filter_id).cloned()
    }

    fn set_filter(&self, filter: Filter) {
        self.filters.write().insert(filter.filter_id, filter);
    }

    fn update_filter(
        &self,
        filter_id: FilterId,
        f: &mut dyn FnMut(&mut Filter),
    ) -> Option<Filter> {
        let mut filters = self.filters.write();
        let filter = filters.get_mut(&filter_id)?;
        f(filter);
        Some(filter.clone())
    }

    fn remove_filter(&self, filter_id: FilterId) -> Option<Filter> {
        self.filters.write().remove(&filter_id)
    }

    fn filters(&self) -> Vec<Filter> {
        self.filters.read().values().cloned().collect()
    }

    fn group(&self, group_id: GroupId) -> Option<Group> {
        self.groups.read().get(&group_id).cloned()
    }

    fn set_group(&self, group: Group) {
        self.groups.write().insert(group.group_id, group);
    }

    fn update_group(&self, group_id: GroupId, f: &mut dyn FnMut(&mut Group)) -> Option<Group> {
        let mut groups = self.groups.write();
        let group = groups.get_mut(&group_id)?;
        f(group);
        Some(group.clone())
    }

    fn remove_group(&self, group_id: GroupId) -> Option<Group> {
        self.groups.write().remove(&group_id)
    }

    fn groups(&self) -> Vec<Group> {
        self.groups.read().values().cloned().collect()
    }
}
