//! Integration tests for scheduler cores and the scheduler set.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use keysched::coordinator::{CoreContext, MemoryJournal, SchedulerCore, SchedulerSet, StarterQueueHook};
use keysched::scheduler::StructuralChange;
use keysched::{
    BlockKey, ClientId, GroupId, ItemId, ItemSpec, KeyBlock, KeyListener, Persistence, PriorityClass,
    SchedulableItem, SchedulerConfig, SchedulerError, SchedulerKind,
};

fn ephemeral_core() -> SchedulerCore {
    SchedulerCore::new(
        SchedulerKind::CHK_FETCH,
        Persistence::Ephemeral,
        &SchedulerConfig::default(),
        CoreContext::default(),
    )
}

fn fetch(id: u64, priority: u8, retry: u32, client: u64, group: u64) -> Arc<SchedulableItem> {
    Arc::new(SchedulableItem::new(
        ItemId(id),
        ItemSpec {
            kind: SchedulerKind::CHK_FETCH,
            priority: PriorityClass::new(priority),
            retry_count: retry,
            client: ClientId(client),
            group: Some(GroupId(group)),
            persistence: Persistence::Ephemeral,
        },
    ))
}

fn durable_insert(id: u64, group: u64) -> Arc<SchedulableItem> {
    Arc::new(SchedulableItem::new(
        ItemId(id),
        ItemSpec {
            kind: SchedulerKind::CHK_INSERT,
            group: Some(GroupId(group)),
            persistence: Persistence::Durable,
            ..Default::default()
        },
    ))
}

#[test]
fn most_urgent_priority_is_drained_first() {
    let core = ephemeral_core();
    core.register_new(fetch(1, 1, 0, 10, 1)).unwrap();
    core.register_new(fetch(2, 1, 0, 20, 1)).unwrap();
    core.register_new(fetch(3, 3, 0, 10, 1)).unwrap();

    let mut seen = HashSet::new();
    for _ in 0..200 {
        let picked = core.pick_next().unwrap().id();
        assert_ne!(picked, ItemId(3));
        seen.insert(picked);
    }
    assert_eq!(seen.len(), 2, "both priority 1 items get picked");

    core.remove(ItemId(1)).unwrap();
    assert_eq!(core.pick_next().unwrap().id(), ItemId(2));
    core.remove(ItemId(2)).unwrap();
    assert_eq!(core.pick_next().unwrap().id(), ItemId(3));
}

#[test]
fn reregister_moves_item_and_keeps_listener() {
    let core = ephemeral_core();
    let item = fetch(1, 3, 0, 1, 42);
    core.register_new(Arc::clone(&item)).unwrap();

    let listener = Arc::new(core.new_listener(Some(GroupId(42))));
    listener.want_key(BlockKey::chk([1u8; 32]), PriorityClass::UPDATE, ItemId(1));
    core.add_pending_keys(listener.clone()).unwrap();
    let before = core.filter_accuracy();

    item.set_priority(PriorityClass::INTERACTIVE);
    assert_eq!(core.reregister_all(GroupId(42)).unwrap(), 1);

    assert_eq!(core.hierarchy().items_at(PriorityClass::INTERACTIVE), vec![ItemId(1)]);
    assert!(core.hierarchy().items_at(PriorityClass::UPDATE).is_empty());
    assert!(!core.hierarchy().is_occupied(PriorityClass::UPDATE));
    assert!(core.registry().contains(listener.id()));
    assert_eq!(core.filter_accuracy(), before);
}

#[test]
fn reregister_skips_items_of_other_kinds() {
    let set = SchedulerSet::new(Persistence::Ephemeral, &SchedulerConfig::default());
    let chk = fetch(1, 3, 0, 1, 5);
    let ssk = Arc::new(SchedulableItem::new(
        ItemId(2),
        ItemSpec {
            kind: SchedulerKind::SSK_FETCH,
            priority: PriorityClass::UPDATE,
            group: Some(GroupId(5)),
            ..Default::default()
        },
    ));
    set.register(Arc::clone(&chk)).unwrap();
    set.register(Arc::clone(&ssk)).unwrap();

    let chk_core = set.scheduler(SchedulerKind::CHK_FETCH);
    assert_eq!(chk_core.reregister_all(GroupId(5)).unwrap(), 1);
    assert!(!chk_core.is_registered(ItemId(2)));

    assert_eq!(set.reregister_all(GroupId(5)).unwrap(), 2);
    assert_eq!(set.count_queued(), 2);
}

#[test]
fn persistence_failure_leaves_item_registered() {
    let journal = Arc::new(MemoryJournal::new());
    journal.set_failing(true);
    let set = SchedulerSet::new(Persistence::Durable, &SchedulerConfig::default()).with_store(journal.clone());

    let err = set.register(durable_insert(1, 9)).unwrap_err();
    assert!(matches!(err, SchedulerError::PersistenceFailure(_)));
    assert!(!err.is_caller_bug());

    let core = set.scheduler(SchedulerKind::CHK_INSERT);
    assert!(core.is_registered(ItemId(1)));
    assert_eq!(core.count_queued(), 1);
    assert!(journal.is_empty());
}

#[test]
fn durable_items_need_an_owner() {
    let set = SchedulerSet::new(Persistence::Durable, &SchedulerConfig::default());
    let orphan = Arc::new(SchedulableItem::new(
        ItemId(1),
        ItemSpec {
            kind: SchedulerKind::CHK_INSERT,
            persistence: Persistence::Durable,
            ..Default::default()
        },
    ));
    assert!(matches!(set.register(orphan), Err(SchedulerError::MissingOwner(ItemId(1)))));
    assert_eq!(set.count_queued(), 0);
}

#[test]
fn starter_hook_sees_durable_registrations() {
    #[derive(Default)]
    struct CountingHook(AtomicUsize);
    impl StarterQueueHook for CountingHook {
        fn item_registered(&self, _item: &SchedulableItem) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let hook = Arc::new(CountingHook::default());
    let set = SchedulerSet::new(Persistence::Durable, &SchedulerConfig::default()).with_starter_hook(hook.clone());
    let first = durable_insert(1, 1);
    set.register(Arc::clone(&first)).unwrap();
    set.register(durable_insert(2, 1)).unwrap();
    assert_eq!(hook.0.load(Ordering::SeqCst), 2);

    first.set_priority(PriorityClass::INTERACTIVE);
    assert_eq!(set.reregister_all(GroupId(1)).unwrap(), 2);
    assert_eq!(hook.0.load(Ordering::SeqCst), 4, "re-registration re-offers each item");
}

#[test]
fn reregister_with_invalid_priority_moves_nothing() {
    let journal = Arc::new(MemoryJournal::new());
    let set = SchedulerSet::new(Persistence::Durable, &SchedulerConfig::default()).with_store(journal.clone());
    let items: Vec<_> = (1..=20).map(|id| durable_insert(id, 3)).collect();
    for item in &items {
        set.register(Arc::clone(item)).unwrap();
    }
    let core = set.scheduler(SchedulerKind::CHK_INSERT);
    let original = core.placement_of(ItemId(1)).unwrap().priority;
    let recorded = journal.len();

    for item in &items[..19] {
        item.set_priority(PriorityClass::INTERACTIVE);
    }
    items[19].set_priority(PriorityClass::new(200));
    let err = set.reregister_all(GroupId(3)).unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidPriority { .. }));
    assert_eq!(journal.len(), recorded);
    assert!(core.hierarchy().items_at(PriorityClass::INTERACTIVE).is_empty());
    assert_eq!(core.hierarchy().items_at(original).len(), 20);

    items[19].set_priority(PriorityClass::INTERACTIVE);
    assert_eq!(set.reregister_all(GroupId(3)).unwrap(), 20);
    assert_eq!(core.hierarchy().items_at(PriorityClass::INTERACTIVE).len(), 20);
    let entries = journal.entries();
    assert!(entries[recorded..].contains(&StructuralChange::TierCreated {
        priority: PriorityClass::INTERACTIVE,
        retry_tier: 0,
    }));
    assert!(entries[recorded..].contains(&StructuralChange::TierPruned { priority: original, retry_tier: 0 }));
}

#[test]
fn journal_mirrors_structure() {
    let journal = Arc::new(MemoryJournal::new());
    let set = SchedulerSet::new(Persistence::Durable, &SchedulerConfig::default()).with_store(journal.clone());
    set.register(durable_insert(1, 1)).unwrap();
    set.register(durable_insert(2, 1)).unwrap();
    assert_eq!(journal.len(), 3, "second item reuses every node");

    let core = set.scheduler(SchedulerKind::CHK_INSERT);
    core.remove(ItemId(1)).unwrap();
    assert_eq!(journal.len(), 3, "shard still holds an item");
    core.remove(ItemId(2)).unwrap();
    assert_eq!(journal.len(), 6);
    assert!(journal.to_json_lines().unwrap().lines().all(|l| l.starts_with("{\"op\":")));
}

#[test]
fn concurrent_register_and_remove_leaves_empty_hierarchy() {
    let core = Arc::new(ephemeral_core());
    let handles: Vec<_> = (0..8u64)
        .map(|t| {
            let core = Arc::clone(&core);
            thread::spawn(move || {
                for n in 0..200u64 {
                    let id = t * 1000 + n;
                    let item = fetch(id, (n % 7) as u8, (n % 6) as u32, t, n % 3);
                    core.register_new(item).unwrap();
                    let _ = core.pick_next();
                    assert!(core.remove(ItemId(id)).unwrap());
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert!(core.hierarchy().is_empty());
    assert_eq!(core.count_queued(), 0);
    assert_eq!(core.occupancy().count(), 0);
}

#[test]
fn reregister_racing_remove_does_not_revive_item() {
    let core = Arc::new(ephemeral_core());
    for round in 0..500u64 {
        let id = round + 1;
        let item = fetch(id, 3, 0, 1, 8);
        core.register_new(Arc::clone(&item)).unwrap();
        item.set_priority(PriorityClass::IMMEDIATE_SPLITFILE);

        let remover = {
            let core = Arc::clone(&core);
            thread::spawn(move || core.remove(ItemId(id)).unwrap())
        };
        let mover = {
            let core = Arc::clone(&core);
            thread::spawn(move || core.reregister_all(GroupId(8)).unwrap())
        };
        assert!(remover.join().unwrap());
        mover.join().unwrap();

        assert!(!core.is_registered(ItemId(id)), "round {round}");
        assert_eq!(core.count_queued(), 0, "round {round}");
    }
    assert!(core.hierarchy().is_empty());
    assert!(core.items_for_group(GroupId(8)).is_empty());
}

#[test]
fn occupancy_rows_sum_to_queued_count() {
    let core = ephemeral_core();
    for n in 0..30u64 {
        core.register_new(fetch(n + 1, (n % 4) as u8, (n % 8) as u32, n % 5, n % 2)).unwrap();
    }
    let total: usize = core.occupancy().map(|row| row.item_count).sum();
    assert_eq!(total, core.count_queued());
    assert_eq!(total, 30);
}

#[test]
fn blocks_route_to_fetch_scheduler_of_key_type() {
    let set = SchedulerSet::new(Persistence::Ephemeral, &SchedulerConfig::default());
    let key = BlockKey::ssk([2u8; 32]);
    let listener = Arc::new(set.new_listener(SchedulerKind::SSK_FETCH, Some(GroupId(1))));
    listener.want_key(key, PriorityClass::UPDATE, ItemId(77));
    set.scheduler(SchedulerKind::SSK_FETCH).add_pending_keys(listener).unwrap();

    assert!(set.on_block_found(&KeyBlock::new(key, vec![1, 2])));
    assert_eq!(set.scheduler(SchedulerKind::SSK_FETCH).filter_accuracy().true_positives, 1);
    assert_eq!(set.scheduler(SchedulerKind::CHK_FETCH).filter_accuracy().true_positives, 0);
}

#[test]
fn snapshot_serializes_registered_items() {
    let core = ephemeral_core();
    core.register_new(fetch(2, 4, 5, 1, 3)).unwrap();
    core.register_new(fetch(1, 2, 0, 1, 3)).unwrap();
    let snapshot = core.snapshot();
    assert_eq!(snapshot.iter().map(|s| s.id).collect::<Vec<_>>(), vec![ItemId(1), ItemId(2)]);
    assert_eq!(snapshot[1].retry_tier, 2);

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json[0]["priority"], 2);
    assert_eq!(json[1]["retry_count"], 5);
}

#[test]
fn group_index_is_shared_across_kinds() {
    let set = SchedulerSet::new(Persistence::Ephemeral, &SchedulerConfig::default());
    set.register(fetch(1, 3, 0, 1, 4)).unwrap();
    let insert = Arc::new(SchedulableItem::new(
        ItemId(2),
        ItemSpec { kind: SchedulerKind::SSK_INSERT, group: Some(GroupId(4)), ..Default::default() },
    ));
    set.register(insert).unwrap();

    let seen = set.scheduler(SchedulerKind::CHK_FETCH).items_for_group(GroupId(4));
    assert_eq!(seen.len(), 2);
    set.scheduler(SchedulerKind::SSK_INSERT).remove(ItemId(2)).unwrap();
    assert_eq!(set.group_index().items(GroupId(4)).len(), 1);
}
