//! The scheduling hierarchy.
//!
//! ```text
//! priority slot  --RwLock-->  retry tier (BTreeMap by normalized retry)
//! retry tier     --RwLock-->  client shard (sectored by ClientId)
//! client shard   --Mutex--->  owner shards (sectored by GroupId) -> GrabArray<ItemId>
//! ```
//!
//! A node exists only while it has children. Locks are always taken outer to
//! inner. Creating a node and landing its first child happen under the
//! parent's lock, and pruning re-checks emptiness under the parent's write
//! lock, so a freshly created node can never be pruned before it is used.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::grab_array::GrabArray;
use super::item::{ClientId, GroupId, ItemId, SchedulableItem, SchedulerKind};
use super::occupancy::OccupancyIter;
use super::priority::{PriorityClass, PriorityRange};
use super::sectored::SectoredGrabArray;
use crate::error::{Result, SchedulerError};

/// Retry counts at or below this are not held against a request.
pub const MIN_RETRY_FLOOR: u32 = 3;

/// Collapse the first `floor` attempts into tier 0.
///
/// A flood of never-retried requests must not outrank another client's
/// requests that have been tried once or twice; only persistent failure
/// beyond the floor earns a distinct tier.
pub fn normalize_retry_count(retry_count: u32, floor: u32) -> u32 {
    retry_count.saturating_sub(floor)
}

/// Where an item sits in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Placement {
    pub priority: PriorityClass,
    pub retry_tier: u32,
    pub client: ClientId,
    pub owner: Option<GroupId>,
}

/// A node created or pruned by a mutation; recorded in durable mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StructuralChange {
    TierCreated { priority: PriorityClass, retry_tier: u32 },
    ClientShardCreated { priority: PriorityClass, retry_tier: u32, client: ClientId },
    OwnerShardCreated { priority: PriorityClass, retry_tier: u32, client: ClientId, owner: Option<GroupId> },
    OwnerShardPruned { priority: PriorityClass, retry_tier: u32, client: ClientId, owner: Option<GroupId> },
    ClientShardPruned { priority: PriorityClass, retry_tier: u32, client: ClientId },
    TierPruned { priority: PriorityClass, retry_tier: u32 },
}

/// Result of a successful insert.
#[derive(Debug)]
pub struct Insertion {
    pub placement: Placement,
    /// False if the item was already present at this placement.
    pub added: bool,
    pub changes: Vec<StructuralChange>,
}

/// Result of a removal.
#[derive(Debug, Default)]
pub struct Removal {
    pub removed: bool,
    pub changes: Vec<StructuralChange>,
}

type OwnerShards = SectoredGrabArray<Option<GroupId>, GrabArray<ItemId>>;
type ClientShard = Arc<Mutex<OwnerShards>>;

pub(crate) struct RetryTier {
    clients: RwLock<SectoredGrabArray<ClientId, ClientShard>>,
}

impl RetryTier {
    fn new() -> Self {
        Self {
            clients: RwLock::new(SectoredGrabArray::new()),
        }
    }

    fn insert(&self, p: &Placement, id: ItemId, changes: &mut Vec<StructuralChange>) -> bool {
        {
            let clients = self.clients.read();
            if let Some(shard) = clients.get(&p.client) {
                return add_to_owner(&mut shard.lock(), p, id, changes);
            }
        }
        let mut clients = self.clients.write();
        let (shard, created) = clients.get_or_insert_with(p.client, || Arc::new(Mutex::new(OwnerShards::new())));
        if created {
            changes.push(StructuralChange::ClientShardCreated {
                priority: p.priority,
                retry_tier: p.retry_tier,
                client: p.client,
            });
        }
        let mut owners = shard.lock();
        add_to_owner(&mut owners, p, id, changes)
    }

    /// Drop the client shard if it is still empty. Returns true if the tier
    /// has no clients left afterwards.
    fn prune_client(&self, p: &Placement, changes: &mut Vec<StructuralChange>) -> bool {
        let mut clients = self.clients.write();
        let still_empty = clients.get(&p.client).map_or(false, |shard| shard.lock().is_empty());
        if still_empty {
            clients.remove(&p.client);
            changes.push(StructuralChange::ClientShardPruned {
                priority: p.priority,
                retry_tier: p.retry_tier,
                client: p.client,
            });
        }
        clients.is_empty()
    }

    pub(crate) fn for_each_owner<F>(&self, mut f: F)
    where
        F: FnMut(ClientId, Option<GroupId>, &GrabArray<ItemId>),
    {
        let clients = self.clients.read();
        for (client, shard) in clients.iter() {
            let owners = shard.lock();
            for (owner, items) in owners.iter() {
                f(*client, *owner, items);
            }
        }
    }
}

fn add_to_owner(owners: &mut OwnerShards, p: &Placement, id: ItemId, changes: &mut Vec<StructuralChange>) -> bool {
    let (items, created) = owners.get_or_insert_with(p.owner, GrabArray::new);
    if created {
        changes.push(StructuralChange::OwnerShardCreated {
            priority: p.priority,
            retry_tier: p.retry_tier,
            client: p.client,
            owner: p.owner,
        });
    }
    items.add(id)
}

fn remove_from_owner(owners: &mut OwnerShards, p: &Placement, id: ItemId, changes: &mut Vec<StructuralChange>) -> bool {
    let Some(items) = owners.get_mut(&p.owner) else {
        return false;
    };
    if !items.remove(&id) {
        return false;
    }
    if items.is_empty() {
        owners.remove(&p.owner);
        changes.push(StructuralChange::OwnerShardPruned {
            priority: p.priority,
            retry_tier: p.retry_tier,
            client: p.client,
            owner: p.owner,
        });
    }
    true
}

pub(crate) struct PrioritySlot {
    pub(crate) tiers: RwLock<BTreeMap<u32, Arc<RetryTier>>>,
}

impl PrioritySlot {
    fn new() -> Self {
        Self {
            tiers: RwLock::new(BTreeMap::new()),
        }
    }
}

/// Priority table of retry tiers of client shards of owner shards of items.
pub struct SchedulingHierarchy {
    kind: SchedulerKind,
    range: PriorityRange,
    retry_floor: u32,
    slots: Vec<PrioritySlot>,
}

impl SchedulingHierarchy {
    pub fn new(kind: SchedulerKind, range: PriorityRange, retry_floor: u32) -> Self {
        let slots = (0..range.table_len()).map(|_| PrioritySlot::new()).collect();
        Self {
            kind,
            range,
            retry_floor,
            slots,
        }
    }

    pub fn kind(&self) -> SchedulerKind {
        self.kind
    }

    pub fn priority_range(&self) -> PriorityRange {
        self.range
    }

    pub fn retry_floor(&self) -> u32 {
        self.retry_floor
    }

    /// Check the item against this hierarchy's kind and priority range.
    pub fn validate(&self, item: &SchedulableItem) -> Result<()> {
        self.check_kind(item)?;
        self.validate_placement(&self.placement_for(item))
    }

    fn check_kind(&self, item: &SchedulableItem) -> Result<()> {
        if item.kind() != self.kind {
            return Err(SchedulerError::InvalidRequestKind {
                item: item.id(),
                found: item.kind().to_string(),
                expected: self.kind,
            });
        }
        Ok(())
    }

    /// Check that a computed placement falls inside the priority range.
    pub fn validate_placement(&self, placement: &Placement) -> Result<()> {
        if !self.range.contains(placement.priority) {
            return Err(self.invalid_priority(placement.priority));
        }
        Ok(())
    }

    fn invalid_priority(&self, priority: PriorityClass) -> SchedulerError {
        SchedulerError::InvalidPriority {
            priority,
            most_urgent: self.range.most_urgent(),
            least_urgent: self.range.least_urgent(),
        }
    }

    /// Placement the item would get from its current priority and retry count.
    pub fn placement_for(&self, item: &SchedulableItem) -> Placement {
        Placement {
            priority: item.priority(),
            retry_tier: normalize_retry_count(item.retry_count(), self.retry_floor),
            client: item.client(),
            owner: item.group(),
        }
    }

    /// Insert an item along its four-level path, creating nodes on demand.
    ///
    /// Priority and retry count are read once; a concurrent `set_priority`
    /// lands on the next re-registration.
    pub fn insert(&self, item: &SchedulableItem) -> Result<Insertion> {
        self.check_kind(item)?;
        self.insert_placement(item.id(), self.placement_for(item))
    }

    /// Insert `id` at an already computed placement.
    pub fn insert_placement(&self, id: ItemId, placement: Placement) -> Result<Insertion> {
        self.validate_placement(&placement)?;
        let mut changes = Vec::new();
        let added = self.insert_at(&placement, id, &mut changes)?;
        Ok(Insertion {
            placement,
            added,
            changes,
        })
    }

    fn insert_at(&self, p: &Placement, id: ItemId, changes: &mut Vec<StructuralChange>) -> Result<bool> {
        let slot = self
            .slots
            .get(p.priority.index())
            .ok_or_else(|| self.invalid_priority(p.priority))?;
        {
            let tiers = slot.tiers.read();
            if let Some(tier) = tiers.get(&p.retry_tier) {
                return Ok(tier.insert(p, id, changes));
            }
        }
        let mut tiers = slot.tiers.write();
        let tier = match tiers.get(&p.retry_tier) {
            Some(tier) => Arc::clone(tier),
            None => {
                let tier = Arc::new(RetryTier::new());
                tiers.insert(p.retry_tier, Arc::clone(&tier));
                changes.push(StructuralChange::TierCreated {
                    priority: p.priority,
                    retry_tier: p.retry_tier,
                });
                tier
            }
        };
        let added = tier.insert(p, id, changes);
        drop(tiers);
        Ok(added)
    }

    /// Remove an item and prune every ancestor left empty.
    ///
    /// Removing an item that is not at `placement` is a no-op.
    pub fn remove(&self, placement: &Placement, id: ItemId) -> Removal {
        let mut changes = Vec::new();
        let Some(slot) = self.slots.get(placement.priority.index()) else {
            return Removal::default();
        };

        let (removed, client_empty) = {
            let tiers = slot.tiers.read();
            let Some(tier) = tiers.get(&placement.retry_tier) else {
                return Removal::default();
            };
            let clients = tier.clients.read();
            let Some(shard) = clients.get(&placement.client) else {
                return Removal::default();
            };
            let mut owners = shard.lock();
            let removed = remove_from_owner(&mut owners, placement, id, &mut changes);
            (removed, owners.is_empty())
        };

        if removed && client_empty {
            self.prune_upward(slot, placement, &mut changes);
        }
        Removal { removed, changes }
    }

    fn prune_upward(&self, slot: &PrioritySlot, p: &Placement, changes: &mut Vec<StructuralChange>) {
        let tier_empty = {
            let tiers = slot.tiers.read();
            match tiers.get(&p.retry_tier) {
                Some(tier) => tier.prune_client(p, changes),
                None => false,
            }
        };
        if !tier_empty {
            return;
        }
        let mut tiers = slot.tiers.write();
        let still_empty = tiers
            .get(&p.retry_tier)
            .map_or(false, |tier| tier.clients.read().is_empty());
        if still_empty {
            tiers.remove(&p.retry_tier);
            changes.push(StructuralChange::TierPruned {
                priority: p.priority,
                retry_tier: p.retry_tier,
            });
        }
    }

    /// Pick an item at `priority`: uniform over retry tiers, then clients,
    /// then owners, then items. Does not remove it.
    pub fn pick_random<R: Rng + ?Sized>(&self, priority: PriorityClass, rng: &mut R) -> Option<ItemId> {
        if !self.range.contains(priority) {
            return None;
        }
        let slot = self.slots.get(priority.index())?;
        let tiers = slot.tiers.read();
        if tiers.is_empty() {
            return None;
        }
        let tier = tiers.values().nth(rng.gen_range(0..tiers.len()))?;
        let clients = tier.clients.read();
        let (_, shard) = clients.pick(rng)?;
        let owners = shard.lock();
        let (_, items) = owners.pick(rng)?;
        items.pick(rng)
    }

    /// Cheap check the dispatcher uses to drain urgent classes first.
    pub fn is_occupied(&self, priority: PriorityClass) -> bool {
        self.slots
            .get(priority.index())
            .map_or(false, |slot| !slot.tiers.read().is_empty())
    }

    /// Whether no priority has any node.
    pub fn is_empty(&self) -> bool {
        self.range.iter().all(|p| !self.is_occupied(p))
    }

    /// Total number of queued items. Walks every node.
    pub fn count_queued(&self) -> usize {
        self.occupancy().map(|row| row.item_count).sum()
    }

    /// Every item handle queued at `priority`.
    pub fn items_at(&self, priority: PriorityClass) -> Vec<ItemId> {
        let mut out = Vec::new();
        let Some(slot) = self.slots.get(priority.index()) else {
            return out;
        };
        let tiers = slot.tiers.read();
        for tier in tiers.values() {
            tier.for_each_owner(|_, _, items| out.extend(items.iter().copied()));
        }
        out
    }

    /// Lazy walk over occupied leaves, one priority at a time.
    pub fn occupancy(&self) -> OccupancyIter<'_> {
        OccupancyIter::new(self)
    }

    pub(crate) fn slot(&self, priority: PriorityClass) -> Option<&PrioritySlot> {
        self.slots.get(priority.index())
    }
}

impl std::fmt::Debug for SchedulingHierarchy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulingHierarchy")
            .field("kind", &self.kind)
            .field("range", &self.range)
            .field("retry_floor", &self.retry_floor)
            .finish()
    }
}

#[cfg(test)]
#[path = "hierarchy_tests.rs"]
mod tests;
