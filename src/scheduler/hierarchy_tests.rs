//! Tests for the scheduling hierarchy.

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::SchedulerError;
use crate::scheduler::hierarchy::{normalize_retry_count, SchedulingHierarchy, StructuralChange, MIN_RETRY_FLOOR};
use crate::scheduler::{ClientId, GroupId, ItemId, ItemSpec, PriorityClass, PriorityRange, SchedulableItem, SchedulerKind};

fn hierarchy() -> SchedulingHierarchy {
    SchedulingHierarchy::new(SchedulerKind::CHK_FETCH, PriorityRange::default(), MIN_RETRY_FLOOR)
}

fn item(id: u64, priority: u8, retry: u32, client: u64, group: u64) -> SchedulableItem {
    SchedulableItem::new(
        ItemId(id),
        ItemSpec {
            kind: SchedulerKind::CHK_FETCH,
            priority: PriorityClass::new(priority),
            retry_count: retry,
            client: ClientId(client),
            group: Some(GroupId(group)),
            ..Default::default()
        },
    )
}

#[test]
fn retry_counts_at_or_below_floor_share_tier_zero() {
    for retry in 0..=MIN_RETRY_FLOOR {
        assert_eq!(normalize_retry_count(retry, MIN_RETRY_FLOOR), 0);
    }
    assert_eq!(normalize_retry_count(4, MIN_RETRY_FLOOR), 1);
    assert_eq!(normalize_retry_count(10, MIN_RETRY_FLOOR), 7);
    assert_eq!(normalize_retry_count(u32::MAX, 0), u32::MAX);
}

#[test]
fn insert_then_remove_leaves_no_nodes() {
    let h = hierarchy();
    let items: Vec<_> = (0..20)
        .map(|i| item(i, (i % 7) as u8, (i % 6) as u32, i % 3, i % 4))
        .collect();
    let mut placements = Vec::new();
    for it in &items {
        placements.push(h.insert(it).unwrap().placement);
    }
    assert_eq!(h.count_queued(), 20);
    for (it, placement) in items.iter().zip(&placements) {
        assert!(h.remove(placement, it.id()).removed);
    }
    assert!(h.is_empty());
    assert_eq!(h.count_queued(), 0);
    assert_eq!(h.occupancy().count(), 0);
}

#[test]
fn first_insert_creates_every_level_and_last_remove_prunes_them() {
    let h = hierarchy();
    let it = item(1, 2, 0, 9, 5);
    let insertion = h.insert(&it).unwrap();
    assert!(insertion.added);
    assert_eq!(insertion.changes.len(), 3);
    assert!(matches!(insertion.changes[0], StructuralChange::TierCreated { retry_tier: 0, .. }));
    assert!(matches!(insertion.changes[1], StructuralChange::ClientShardCreated { client: ClientId(9), .. }));
    assert!(matches!(
        insertion.changes[2],
        StructuralChange::OwnerShardCreated { owner: Some(GroupId(5)), .. }
    ));

    let second = h.insert(&item(2, 2, 1, 9, 5)).unwrap();
    assert!(second.changes.is_empty(), "same path must not create nodes");

    let removal = h.remove(&insertion.placement, ItemId(1));
    assert!(removal.removed);
    assert!(removal.changes.is_empty(), "sibling keeps the path alive");

    let removal = h.remove(&second.placement, ItemId(2));
    assert_eq!(removal.changes.len(), 3);
    assert!(matches!(removal.changes[2], StructuralChange::TierPruned { .. }));
}

#[test]
fn pruning_stops_at_first_non_empty_ancestor() {
    let h = hierarchy();
    let a = h.insert(&item(1, 3, 0, 1, 1)).unwrap();
    h.insert(&item(2, 3, 0, 2, 1)).unwrap();
    let removal = h.remove(&a.placement, ItemId(1));
    let pruned_tier = removal
        .changes
        .iter()
        .any(|c| matches!(c, StructuralChange::TierPruned { .. }));
    assert!(!pruned_tier);
    assert!(h.is_occupied(PriorityClass::new(3)));
}

#[test]
fn removing_unknown_item_is_noop() {
    let h = hierarchy();
    let placement = h.insert(&item(1, 1, 0, 1, 1)).unwrap().placement;
    assert!(!h.remove(&placement, ItemId(99)).removed);
    let mut wrong = placement;
    wrong.retry_tier = 5;
    assert!(!h.remove(&wrong, ItemId(1)).removed);
    assert_eq!(h.count_queued(), 1);
}

#[test]
fn rejects_wrong_kind() {
    let h = hierarchy();
    let insert = SchedulableItem::new(
        ItemId(1),
        ItemSpec {
            kind: SchedulerKind::CHK_INSERT,
            ..Default::default()
        },
    );
    let err = h.insert(&insert).unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidRequestKind { .. }));
    assert!(h.is_empty());
}

#[test]
fn rejects_priority_outside_range() {
    let h = SchedulingHierarchy::new(
        SchedulerKind::CHK_FETCH,
        PriorityRange::new(PriorityClass::new(1), PriorityClass::new(4)),
        MIN_RETRY_FLOOR,
    );
    for bad in [0u8, 5, 200] {
        let err = h.insert(&item(1, bad, 0, 1, 1)).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidPriority { .. }), "priority {bad}");
    }
    assert!(h.insert(&item(1, 4, 0, 1, 1)).is_ok());
}

#[test]
fn placement_outside_table_is_rejected() {
    let h = SchedulingHierarchy::new(
        SchedulerKind::CHK_FETCH,
        PriorityRange::new(PriorityClass::new(1), PriorityClass::new(4)),
        MIN_RETRY_FLOOR,
    );
    let mut placement = h.placement_for(&item(1, 2, 0, 1, 1));
    placement.priority = PriorityClass::new(200);
    let err = h.insert_placement(ItemId(1), placement).unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidPriority { .. }));
    assert!(h.is_empty());
}

#[test]
fn insert_uses_placement_computed_before_priority_change() {
    let h = hierarchy();
    let it = item(1, 2, 0, 1, 1);
    let placement = h.placement_for(&it);
    it.set_priority(PriorityClass::new(200));
    let insertion = h.insert_placement(it.id(), placement).unwrap();
    assert_eq!(insertion.placement.priority, PriorityClass::new(2));
    assert_eq!(h.items_at(PriorityClass::new(2)).len(), 1);
    assert!(h.validate(&it).is_err());
}

#[test]
fn pick_is_uniform_over_clients_not_items() {
    let h = hierarchy();
    for i in 0..100 {
        h.insert(&item(i, 2, 0, 1, 1)).unwrap();
    }
    h.insert(&item(1000, 2, 0, 2, 2)).unwrap();

    let mut rng = StdRng::seed_from_u64(0x5eed);
    let draws = 10_000;
    let lone = (0..draws)
        .filter(|_| h.pick_random(PriorityClass::new(2), &mut rng) == Some(ItemId(1000)))
        .count();
    let ratio = lone as f64 / draws as f64;
    assert!((0.45..0.55).contains(&ratio), "lone client picked {ratio}");
}

#[test]
fn pick_is_uniform_over_retry_tiers() {
    let h = hierarchy();
    for i in 0..50 {
        h.insert(&item(i, 2, 0, i, 1)).unwrap();
    }
    // Retry 8 lands in tier 5.
    h.insert(&item(500, 2, 8, 77, 1)).unwrap();
    let mut rng = StdRng::seed_from_u64(11);
    let hits = (0..4000)
        .filter(|_| h.pick_random(PriorityClass::new(2), &mut rng) == Some(ItemId(500)))
        .count();
    let ratio = hits as f64 / 4000.0;
    assert!((0.44..0.56).contains(&ratio), "retried tier picked {ratio}");
}

#[test]
fn pick_on_empty_or_out_of_range_priority_is_none() {
    let h = hierarchy();
    let mut rng = StdRng::seed_from_u64(1);
    assert!(h.pick_random(PriorityClass::new(2), &mut rng).is_none());
    assert!(h.pick_random(PriorityClass::new(40), &mut rng).is_none());
}

#[test]
fn occupancy_rows_sum_to_count_and_are_ordered() {
    let h = hierarchy();
    h.insert(&item(1, 5, 0, 1, 1)).unwrap();
    h.insert(&item(2, 1, 9, 2, 1)).unwrap();
    h.insert(&item(3, 1, 0, 2, 1)).unwrap();
    h.insert(&item(4, 1, 0, 2, 1)).unwrap();

    let rows: Vec<_> = h.occupancy().collect();
    assert_eq!(rows.iter().map(|r| r.item_count).sum::<usize>(), h.count_queued());
    assert_eq!(rows[0].priority, PriorityClass::new(1));
    assert_eq!(rows[0].retry_tier, 0);
    assert_eq!(rows[0].item_count, 2);
    assert_eq!(rows[1].retry_tier, 6);
    assert_eq!(rows[2].priority, PriorityClass::new(5));

    // Restartable: a second walk yields the same rows.
    assert_eq!(h.occupancy().collect::<Vec<_>>(), rows);
}

#[test]
fn items_at_lists_only_that_priority() {
    let h = hierarchy();
    h.insert(&item(1, 1, 0, 1, 1)).unwrap();
    h.insert(&item(2, 3, 0, 1, 1)).unwrap();
    assert_eq!(h.items_at(PriorityClass::new(1)), vec![ItemId(1)]);
    assert_eq!(h.items_at(PriorityClass::new(3)), vec![ItemId(2)]);
    assert!(h.items_at(PriorityClass::new(6)).is_empty());
}

#[test]
fn concurrent_insert_and_remove_leaves_hierarchy_empty() {
    let h = Arc::new(hierarchy());
    let threads: Vec<_> = (0..8u64)
        .map(|t| {
            let h = Arc::clone(&h);
            std::thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(t);
                for round in 0..200u64 {
                    let id = t * 10_000 + round;
                    // Few clients and tiers so threads collide on the same nodes.
                    let it = item(id, (round % 2) as u8, (round % 5) as u32, round % 3, t % 2);
                    let placement = h.insert(&it).unwrap().placement;
                    let _ = h.pick_random(it.priority(), &mut rng);
                    assert!(h.remove(&placement, it.id()).removed);
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }
    assert!(h.is_empty());
    assert_eq!(h.count_queued(), 0);
}

#[test]
fn concurrent_churn_keeps_survivors_reachable() {
    let h = Arc::new(hierarchy());
    let survivors: Vec<_> = (0..4u64).map(|c| item(90_000 + c, 0, 0, c, 0)).collect();
    for s in &survivors {
        h.insert(s).unwrap();
    }
    let threads: Vec<_> = (0..4u64)
        .map(|t| {
            let h = Arc::clone(&h);
            std::thread::spawn(move || {
                for round in 0..300u64 {
                    let it = item(t * 1000 + round, 0, 0, t, round % 2);
                    let placement = h.insert(&it).unwrap().placement;
                    h.remove(&placement, it.id());
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }
    let mut counts: HashMap<ClientId, usize> = HashMap::new();
    for row in h.occupancy() {
        *counts.entry(row.client).or_default() += row.item_count;
    }
    assert_eq!(counts.len(), 4);
    assert!(counts.values().all(|&n| n == 1));
}
