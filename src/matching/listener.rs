//! The key-listener capability a request group exposes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::keys::{BlockKey, KeyBlock, SaltedKey};
use crate::scheduler::{GroupId, ItemId, PriorityClass};

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerId(pub u64);

impl ListenerId {
    pub fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Answers "do I want this key" on behalf of a request group.
///
/// `probably_want` is the cheap phase and runs under the registry lock for
/// every live listener. It may over-report but must never miss a key that
/// `definitely_want` would claim. Every other method runs outside that lock.
pub trait KeyListener: Send + Sync {
    fn id(&self) -> ListenerId;

    /// The request group this listener belongs to, for bulk teardown.
    fn owner(&self) -> Option<GroupId>;

    fn probably_want(&self, key: &BlockKey, salted: &SaltedKey) -> bool;

    /// Authoritative answer: the priority of the most urgent interested
    /// request, or `None` if nobody here wants the key.
    fn definitely_want(&self, key: &BlockKey, salted: &SaltedKey) -> Option<PriorityClass>;

    /// Consume a found block. Returns true if it was wanted.
    fn handle_block(&self, key: &BlockKey, salted: &SaltedKey, block: &KeyBlock) -> bool;

    /// Items this listener would complete with the key.
    fn requests_for_key(&self, _key: &BlockKey, _salted: &SaltedKey) -> Vec<ItemId> {
        Vec::new()
    }

    fn is_empty(&self) -> bool;

    /// Self-reported number of wanted keys.
    fn count_keys(&self) -> u64;

    /// Called once after the registry drops this listener.
    fn on_remove(&self) {}
}
