//! One scheduler instance: a hierarchy and a listener registry for a single
//! (request kind, key type, persistence) combination.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, error, warn};

use super::group_index::GroupIndex;
use super::store::{DurableStore, StarterQueueHook};
use crate::config::{ListenerFilterConfig, SchedulerConfig};
use crate::error::{Result, SchedulerError};
use crate::keys::{BlockKey, KeyBlock, KeySalter};
use crate::matching::{
    BlockDelivery, FilterAccuracy, FilteredKeyListener, KeyListener, ListenerId, ListenerRegistry,
};
use crate::scheduler::{
    ClientId, GroupId, ItemId, OccupancyIter, Outcome, Persistence, Placement, PriorityClass,
    SchedulableItem, SchedulerKind, SchedulingHierarchy, StructuralChange,
};
use crate::telemetry::{self, DiagnosticSink};

/// State shared by every core of one persistence class.
#[derive(Clone)]
pub struct CoreContext {
    pub salter: Arc<KeySalter>,
    pub groups: Arc<GroupIndex>,
    pub sink: Arc<dyn DiagnosticSink>,
}

impl Default for CoreContext {
    fn default() -> Self {
        Self {
            salter: Arc::new(KeySalter::random()),
            groups: Arc::new(GroupIndex::new()),
            sink: Arc::new(telemetry::TracingSink),
        }
    }
}

struct Registered {
    item: Arc<SchedulableItem>,
    placement: Placement,
}

/// Serialisable view of a registered item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemSnapshot {
    pub id: ItemId,
    pub kind: SchedulerKind,
    pub persistence: Persistence,
    pub priority: PriorityClass,
    pub retry_count: u32,
    pub retry_tier: u32,
    pub client: ClientId,
    pub group: Option<GroupId>,
}

pub struct SchedulerCore {
    kind: SchedulerKind,
    persistence: Persistence,
    hierarchy: SchedulingHierarchy,
    registry: ListenerRegistry,
    items: DashMap<ItemId, Registered>,
    groups: Arc<GroupIndex>,
    store: Option<Arc<dyn DurableStore>>,
    starter: Option<Arc<dyn StarterQueueHook>>,
    pick_attempts: usize,
    listener_filter: ListenerFilterConfig,
}

impl SchedulerCore {
    pub fn new(
        kind: SchedulerKind,
        persistence: Persistence,
        config: &SchedulerConfig,
        context: CoreContext,
    ) -> Self {
        let config = config.clone().sanitize();
        Self {
            kind,
            persistence,
            hierarchy: SchedulingHierarchy::new(kind, config.priority_range(), config.retry_floor),
            registry: ListenerRegistry::new(
                persistence,
                context.salter,
                context.sink,
                config.accuracy,
                config.negative_log_interval,
            ),
            items: DashMap::new(),
            groups: context.groups,
            store: None,
            starter: None,
            pick_attempts: config.pick_attempts,
            listener_filter: config.listener_filter,
        }
    }

    /// Record structural changes here. Only consulted in durable mode.
    pub fn with_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_starter_hook(mut self, hook: Arc<dyn StarterQueueHook>) -> Self {
        self.starter = Some(hook);
        self
    }

    pub fn kind(&self) -> SchedulerKind {
        self.kind
    }

    pub fn persistence(&self) -> Persistence {
        self.persistence
    }

    pub fn hierarchy(&self) -> &SchedulingHierarchy {
        &self.hierarchy
    }

    pub fn registry(&self) -> &ListenerRegistry {
        &self.registry
    }

    /// Register a new item for dispatch.
    ///
    /// Kind and priority are checked against the placement actually used.
    /// A `PersistenceFailure` is returned after the in-memory insert has
    /// already succeeded; the item stays queued.
    pub fn register_new(&self, item: Arc<SchedulableItem>) -> Result<Placement> {
        self.check_admissible(&item)?;
        let insertion = self.hierarchy.insert(&item)?;
        let mut changes = insertion.changes;
        let placement = insertion.placement;
        let id = item.id();

        if let Some(group) = item.group() {
            self.groups.insert(group, Arc::clone(&item));
        }
        let previous = self.items.insert(id, Registered { item: Arc::clone(&item), placement });
        if let Some(prev) = previous {
            if prev.placement != placement {
                changes.extend(self.hierarchy.remove(&prev.placement, id).changes);
            }
            if let Some(old_group) = prev.item.group().filter(|g| Some(*g) != item.group()) {
                self.groups.remove(old_group, id);
            }
        }

        debug!(
            scheduler = %self.kind,
            item = %id,
            priority = %placement.priority,
            retry_tier = placement.retry_tier,
            client = %placement.client,
            "Registered item"
        );
        telemetry::record_registration(self.kind);
        telemetry::record_queue_depth(self.kind, self.items.len());

        if self.persistence.is_durable() {
            if let Some(hook) = &self.starter {
                hook.item_registered(&item);
            }
        }
        self.persist(&changes)?;
        Ok(placement)
    }

    fn check_admissible(&self, item: &SchedulableItem) -> Result<()> {
        if item.persistence() != self.persistence {
            let label = if item.persistence().is_durable() { "durable" } else { "ephemeral" };
            return Err(SchedulerError::InvalidRequestKind {
                item: item.id(),
                found: format!("{label} {}", item.kind()),
                expected: self.kind,
            });
        }
        if self.persistence.is_durable() && item.group().is_none() {
            return Err(SchedulerError::MissingOwner(item.id()));
        }
        Ok(())
    }

    /// Move every item of `group` handled here to the placement its current
    /// priority and retry count call for. Returns how many were re-registered.
    ///
    /// Every placement is validated before anything moves, so an invalid
    /// priority leaves the group where it was. Items removed meanwhile stay
    /// removed. Listener state is not touched.
    pub fn reregister_all(&self, group: GroupId) -> Result<usize> {
        let mut planned = Vec::new();
        for item in self.groups.items(group) {
            if item.kind() != self.kind || item.persistence() != self.persistence {
                continue;
            }
            let placement = self.hierarchy.placement_for(&item);
            self.hierarchy.validate_placement(&placement)?;
            planned.push((item, placement));
        }

        let mut changes = Vec::new();
        let mut moved = Vec::with_capacity(planned.len());
        let mut failure = None;
        for (item, placement) in planned {
            let id = item.id();
            // The entry stays locked across the move; a concurrent detach
            // waits and then removes from the new placement.
            let Some(mut entry) = self.items.get_mut(&id) else {
                continue;
            };
            if !Arc::ptr_eq(&entry.item, &item) {
                continue;
            }
            if entry.placement != placement {
                changes.extend(self.hierarchy.remove(&entry.placement, id).changes);
                match self.hierarchy.insert_placement(id, placement) {
                    Ok(insertion) => {
                        changes.extend(insertion.changes);
                        entry.placement = placement;
                    }
                    Err(e) => {
                        drop(entry);
                        self.items.remove(&id);
                        self.groups.remove(group, id);
                        failure = Some(e);
                        break;
                    }
                }
            }
            drop(entry);
            moved.push(item);
        }

        if !moved.is_empty() {
            debug!(scheduler = %self.kind, group = %group, moved = moved.len(), "Re-registered group");
        }
        if self.persistence.is_durable() {
            if let Some(hook) = &self.starter {
                for item in &moved {
                    hook.item_registered(item);
                }
            }
        }
        self.persist(&changes)?;
        match failure {
            Some(e) => Err(e),
            None => Ok(moved.len()),
        }
    }

    /// Drop an item from dispatch. Returns false if it was not registered.
    pub fn remove(&self, id: ItemId) -> Result<bool> {
        match self.detach(id) {
            Some((_, changes)) => {
                self.persist(&changes)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove an item and report its outcome to the producer.
    pub fn finish(&self, id: ItemId, outcome: Outcome) -> Result<bool> {
        let Some((item, changes)) = self.detach(id) else {
            return Ok(false);
        };
        item.notify_finished(outcome);
        self.persist(&changes)?;
        Ok(true)
    }

    fn detach(&self, id: ItemId) -> Option<(Arc<SchedulableItem>, Vec<StructuralChange>)> {
        let (_, registered) = self.items.remove(&id)?;
        let removal = self.hierarchy.remove(&registered.placement, id);
        if let Some(group) = registered.item.group() {
            self.groups.remove(group, id);
        }
        debug!(scheduler = %self.kind, item = %id, "Removed item");
        telemetry::record_removal(self.kind);
        telemetry::record_queue_depth(self.kind, self.items.len());
        Some((registered.item, removal.changes))
    }

    fn persist(&self, changes: &[StructuralChange]) -> Result<()> {
        if !self.persistence.is_durable() || changes.is_empty() {
            return Ok(());
        }
        let Some(store) = &self.store else {
            return Ok(());
        };
        for change in changes {
            if let Err(e) = store.record(change) {
                error!(scheduler = %self.kind, error = %e, "Failed to record structural change");
                return Err(SchedulerError::PersistenceFailure(e));
            }
        }
        Ok(())
    }

    /// Pick a live item at `priority` without removing it.
    ///
    /// A handle whose item vanished between pick and lookup counts as a miss;
    /// gives up after the configured number of misses.
    pub fn pick_random(&self, priority: PriorityClass) -> Option<Arc<SchedulableItem>> {
        let mut rng = rand::thread_rng();
        for _ in 0..self.pick_attempts {
            let id = self.hierarchy.pick_random(priority, &mut rng)?;
            if let Some(registered) = self.items.get(&id) {
                return Some(Arc::clone(&registered.item));
            }
        }
        warn!(scheduler = %self.kind, priority = %priority, "Gave up picking after repeated misses");
        None
    }

    /// Pick from the most urgent occupied priority.
    pub fn pick_next(&self) -> Option<Arc<SchedulableItem>> {
        self.hierarchy
            .priority_range()
            .iter()
            .filter(|p| self.hierarchy.is_occupied(*p))
            .find_map(|p| self.pick_random(p))
    }

    pub fn get(&self, id: ItemId) -> Option<Arc<SchedulableItem>> {
        self.items.get(&id).map(|r| Arc::clone(&r.item))
    }

    pub fn placement_of(&self, id: ItemId) -> Option<Placement> {
        self.items.get(&id).map(|r| r.placement)
    }

    /// Items of `group` registered with any scheduler sharing the index.
    pub fn items_for_group(&self, group: GroupId) -> Vec<Arc<SchedulableItem>> {
        self.groups.items(group)
    }

    pub fn is_registered(&self, id: ItemId) -> bool {
        self.items.contains_key(&id)
    }

    /// Hand a found block to every waiting listener. Returns true if any
    /// accepted it.
    pub fn on_block_found(&self, block: &KeyBlock) -> bool {
        let delivery = self.registry.deliver_block(block);
        if delivery == BlockDelivery::NoCandidates {
            self.registry.count_negative();
        }
        telemetry::record_block_delivery(self.kind, &delivery);
        telemetry::record_listener_count(self.kind, self.registry.len());
        delivery.accepted()
    }

    pub fn get_priority_for(&self, key: &BlockKey, fallback: PriorityClass) -> PriorityClass {
        self.registry.resolve_priority(key, fallback)
    }

    /// A filtered listener salted with this registry's salt and sized from
    /// the configured filter defaults.
    pub fn new_listener(&self, owner: Option<GroupId>) -> FilteredKeyListener {
        FilteredKeyListener::new(owner, Arc::clone(self.registry.salter()), &self.listener_filter)
    }

    pub fn add_pending_keys(&self, listener: Arc<dyn KeyListener>) -> Result<()> {
        self.registry.register(listener)?;
        telemetry::record_listener_count(self.kind, self.registry.len());
        Ok(())
    }

    pub fn remove_pending_keys(&self, id: ListenerId) -> bool {
        let removed = self.registry.unregister(id);
        telemetry::record_listener_count(self.kind, self.registry.len());
        removed
    }

    pub fn remove_pending_keys_for(&self, group: GroupId) -> usize {
        let removed = self.registry.unregister_owner(group);
        telemetry::record_listener_count(self.kind, self.registry.len());
        removed
    }

    pub fn any_want_key(&self, key: &BlockKey) -> bool {
        self.registry.any_want(key)
    }

    pub fn any_probably_want_key(&self, key: &BlockKey) -> bool {
        self.registry.any_probably_want(key)
    }

    pub fn count_waiting_keys(&self) -> u64 {
        self.registry.count_waiting_keys()
    }

    /// Registered items that some listener would complete with `key`.
    pub fn requests_for_key(&self, key: &BlockKey) -> Vec<Arc<SchedulableItem>> {
        self.registry
            .requests_for_key(key)
            .into_iter()
            .filter_map(|id| self.get(id))
            .collect()
    }

    /// Forget every listener, as after a restart.
    pub fn clear_listeners(&self) {
        self.registry.clear();
        telemetry::record_listener_count(self.kind, 0);
    }

    pub fn filter_accuracy(&self) -> FilterAccuracy {
        self.registry.accuracy()
    }

    pub fn count_queued(&self) -> usize {
        self.hierarchy.count_queued()
    }

    pub fn occupancy(&self) -> OccupancyIter<'_> {
        self.hierarchy.occupancy()
    }

    /// Every registered item, ordered by id.
    pub fn snapshot(&self) -> Vec<ItemSnapshot> {
        let mut out: Vec<ItemSnapshot> = self
            .items
            .iter()
            .map(|entry| {
                let r = entry.value();
                ItemSnapshot {
                    id: r.item.id(),
                    kind: r.item.kind(),
                    persistence: r.item.persistence(),
                    priority: r.placement.priority,
                    retry_count: r.item.retry_count(),
                    retry_tier: r.placement.retry_tier,
                    client: r.placement.client,
                    group: r.placement.owner,
                }
            })
            .collect();
        out.sort_by_key(|s| s.id);
        out
    }
}

impl std::fmt::Debug for SchedulerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerCore")
            .field("kind", &self.kind)
            .field("persistence", &self.persistence)
            .field("items", &self.items.len())
            .field("listeners", &self.registry.len())
            .finish()
    }
}

#[cfg(test)]
#[path = "scheduler_core_tests.rs"]
mod tests;
