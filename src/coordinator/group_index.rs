//! Items indexed by owning request group, shared by all schedulers of one
//! persistence class.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::scheduler::{GroupId, ItemId, SchedulableItem};

#[derive(Debug, Default)]
pub struct GroupIndex {
    groups: DashMap<GroupId, HashMap<ItemId, Arc<SchedulableItem>>>,
}

impl GroupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, group: GroupId, item: Arc<SchedulableItem>) {
        self.groups.entry(group).or_default().insert(item.id(), item);
    }

    /// Drop one item; the group entry goes with its last item.
    pub fn remove(&self, group: GroupId, id: ItemId) -> bool {
        let removed = match self.groups.get_mut(&group) {
            Some(mut items) => items.remove(&id).is_some(),
            None => return false,
        };
        self.groups.remove_if(&group, |_, items| items.is_empty());
        removed
    }

    /// Snapshot of the group's items; the index is not locked afterwards.
    pub fn items(&self, group: GroupId) -> Vec<Arc<SchedulableItem>> {
        self.groups
            .get(&group)
            .map(|items| items.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, group: GroupId, id: ItemId) -> bool {
        self.groups.get(&group).is_some_and(|items| items.contains_key(&id))
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn clear(&self) {
        self.groups.clear();
    }
}
