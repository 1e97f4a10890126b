//! Fuzz target for listener filter soundness.
//!
//! Arbitrary want/forget sequences must never make a still-wanted key fail
//! the cheap match phase.

#![no_main]

use std::collections::HashSet;
use std::sync::Arc;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use keysched::matching::{FilteredKeyListener, KeyListener};
use keysched::{BlockKey, ItemId, KeySalter, ListenerFilterConfig, PriorityClass};

#[derive(Debug, Arbitrary)]
enum Op {
    Want { ssk: bool, routing: [u8; 32], item: u8 },
    ForgetKey { ssk: bool, routing: [u8; 32] },
    ForgetItem { item: u8 },
}

fn key(ssk: bool, routing: [u8; 32]) -> BlockKey {
    if ssk { BlockKey::ssk(routing) } else { BlockKey::chk(routing) }
}

fuzz_target!(|input: (u8, Vec<Op>)| {
    let (capacity, ops) = input;
    let salter = Arc::new(KeySalter::from_salts([1u8; 32], [2u8; 32]));
    let config = ListenerFilterConfig { expected_keys: capacity as usize, false_positive_rate: 0.05 };
    let listener = FilteredKeyListener::new(None, Arc::clone(&salter), &config);

    let mut wanted: HashSet<(BlockKey, u8)> = HashSet::new();
    for op in ops {
        match op {
            Op::Want { ssk, routing, item } => {
                let k = key(ssk, routing);
                listener.want_key(k, PriorityClass::UPDATE, ItemId(item as u64));
                wanted.insert((k, item));
            }
            Op::ForgetKey { ssk, routing } => {
                let k = key(ssk, routing);
                listener.forget_key(&k);
                wanted.retain(|(w, _)| *w != k);
            }
            Op::ForgetItem { item } => {
                listener.forget_item(ItemId(item as u64));
                wanted.retain(|(_, i)| *i != item);
            }
        }
    }

    for (k, _) in &wanted {
        let salted = salter.salt(k);
        assert!(listener.probably_want(k, &salted), "false negative for {k}");
        assert!(listener.definitely_want(k, &salted).is_some());
    }
});
