//! Fuzz target for hierarchy structure.
//!
//! Any register/remove sequence must leave the queued count equal to the
//! live item count, and an empty hierarchy once everything is removed.

#![no_main]

use std::collections::HashSet;
use std::sync::Arc;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use keysched::coordinator::{CoreContext, SchedulerCore};
use keysched::{
    ClientId, GroupId, ItemId, ItemSpec, Persistence, PriorityClass, SchedulableItem,
    SchedulerConfig, SchedulerKind,
};

#[derive(Debug, Arbitrary)]
enum Op {
    Register { id: u8, priority: u8, retry: u8, client: u8, group: u8 },
    Remove { id: u8 },
}

fuzz_target!(|ops: Vec<Op>| {
    let core = SchedulerCore::new(
        SchedulerKind::CHK_FETCH,
        Persistence::Ephemeral,
        &SchedulerConfig::default(),
        CoreContext::default(),
    );
    let mut live = HashSet::new();

    for op in ops {
        match op {
            Op::Register { id, priority, retry, client, group } => {
                let item = SchedulableItem::new(
                    ItemId(id as u64),
                    ItemSpec {
                        priority: PriorityClass::new(priority % 7),
                        retry_count: retry as u32,
                        client: ClientId((client % 4) as u64),
                        group: Some(GroupId((group % 4) as u64)),
                        ..Default::default()
                    },
                );
                if core.register_new(Arc::new(item)).is_ok() {
                    live.insert(id);
                }
            }
            Op::Remove { id } => {
                let removed = core.remove(ItemId(id as u64)).unwrap_or(false);
                assert_eq!(removed, live.remove(&id));
            }
        }
        assert_eq!(core.count_queued(), live.len());
    }

    for id in live.drain() {
        let _ = core.remove(ItemId(id as u64));
    }
    assert!(core.hierarchy().is_empty());
});
