//! Structured walk over the occupied part of the hierarchy.

use std::collections::VecDeque;

use serde::Serialize;

use super::hierarchy::SchedulingHierarchy;
use super::item::{ClientId, GroupId};
use super::priority::PriorityClass;

/// One occupied leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OccupancyRow {
    pub priority: PriorityClass,
    pub retry_tier: u32,
    pub client: ClientId,
    pub owner: Option<GroupId>,
    pub item_count: usize,
}

/// Iterator over [`OccupancyRow`]s, most urgent priority first.
///
/// Each priority is snapshotted under its own locks only when the iterator
/// reaches it, so rows from different priorities may reflect different
/// moments. Call [`SchedulingHierarchy::occupancy`] again to restart.
pub struct OccupancyIter<'a> {
    hierarchy: &'a SchedulingHierarchy,
    priorities: Vec<PriorityClass>,
    next_priority: usize,
    buffered: VecDeque<OccupancyRow>,
}

impl<'a> OccupancyIter<'a> {
    pub(crate) fn new(hierarchy: &'a SchedulingHierarchy) -> Self {
        Self {
            hierarchy,
            priorities: hierarchy.priority_range().iter().collect(),
            next_priority: 0,
            buffered: VecDeque::new(),
        }
    }

    fn load(&mut self, priority: PriorityClass) {
        let Some(slot) = self.hierarchy.slot(priority) else {
            return;
        };
        let tiers = slot.tiers.read();
        for (&retry_tier, tier) in tiers.iter() {
            let mut rows = Vec::new();
            tier.for_each_owner(|client, owner, items| {
                rows.push(OccupancyRow {
                    priority,
                    retry_tier,
                    client,
                    owner,
                    item_count: items.len(),
                });
            });
            rows.sort_by_key(|row| (row.client, row.owner));
            self.buffered.extend(rows);
        }
    }
}

impl Iterator for OccupancyIter<'_> {
    type Item = OccupancyRow;

    fn next(&mut self) -> Option<OccupancyRow> {
        loop {
            if let Some(row) = self.buffered.pop_front() {
                return Some(row);
            }
            let priority = *self.priorities.get(self.next_priority)?;
            self.next_priority += 1;
            self.load(priority);
        }
    }
}
