//! Key listener backed by a counting Bloom filter plus an authoritative map.
//!
//! This is the listener a splitfile fetch hands to the registry: the filter
//! answers the cheap phase for thousands of block keys in a few kilobytes,
//! and the map resolves a real match to its priority and requests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::bloom::CountingBloomFilter;
use super::listener::{KeyListener, ListenerId};
use crate::config::ListenerFilterConfig;
use crate::keys::{BlockKey, KeyBlock, KeySalter, SaltedKey};
use crate::scheduler::{GroupId, ItemId, PriorityClass};

/// Called with a found block and the items it completes.
pub type BlockHandler = Arc<dyn Fn(&KeyBlock, &[ItemId]) + Send + Sync>;

#[derive(Debug, Clone)]
struct WantedKey {
    priority: PriorityClass,
    items: Vec<ItemId>,
}

struct Inner {
    filter: CountingBloomFilter,
    wanted: HashMap<BlockKey, WantedKey>,
}

pub struct FilteredKeyListener {
    id: ListenerId,
    owner: Option<GroupId>,
    salter: Arc<KeySalter>,
    inner: Mutex<Inner>,
    on_block: Option<BlockHandler>,
    removed: AtomicBool,
}

impl std::fmt::Debug for FilteredKeyListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilteredKeyListener")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("keys", &self.inner.lock().wanted.len())
            .finish()
    }
}

impl FilteredKeyListener {
    /// The salter must be the one the registry uses, or the filter will
    /// index keys under the wrong digests.
    pub fn new(owner: Option<GroupId>, salter: Arc<KeySalter>, config: &ListenerFilterConfig) -> Self {
        Self {
            id: ListenerId::next(),
            owner,
            salter,
            inner: Mutex::new(Inner {
                filter: CountingBloomFilter::with_capacity(config.expected_keys, config.false_positive_rate),
                wanted: HashMap::new(),
            }),
            on_block: None,
            removed: AtomicBool::new(false),
        }
    }

    /// Counter slots in the pre-filter.
    pub fn filter_buckets(&self) -> usize {
        self.inner.lock().filter.num_buckets()
    }

    pub fn with_handler(mut self, handler: BlockHandler) -> Self {
        self.on_block = Some(handler);
        self
    }

    /// Record that `item` wants `key` at `priority`.
    ///
    /// Several items may want the same key; the most urgent priority wins.
    pub fn want_key(&self, key: BlockKey, priority: PriorityClass, item: ItemId) {
        let salted = self.salter.salt(&key);
        let mut inner = self.inner.lock();
        let Inner { filter, wanted } = &mut *inner;
        let entry = wanted.entry(key).or_insert_with(|| {
            filter.insert(&salted);
            WantedKey { priority, items: Vec::new() }
        });
        if priority < entry.priority {
            entry.priority = priority;
        }
        if !entry.items.contains(&item) {
            entry.items.push(item);
        }
    }

    /// Stop wanting `key` entirely. Returns the items that wanted it.
    pub fn forget_key(&self, key: &BlockKey) -> Vec<ItemId> {
        let salted = self.salter.salt(key);
        let mut inner = self.inner.lock();
        match inner.wanted.remove(key) {
            Some(w) => {
                inner.filter.remove(&salted);
                w.items
            }
            None => Vec::new(),
        }
    }

    /// Drop one item's interest; the key is forgotten once nobody wants it.
    pub fn forget_item(&self, item: ItemId) {
        let mut inner = self.inner.lock();
        let mut emptied = Vec::new();
        for (key, w) in inner.wanted.iter_mut() {
            w.items.retain(|i| *i != item);
            if w.items.is_empty() {
                emptied.push(*key);
            }
        }
        for key in emptied {
            inner.wanted.remove(&key);
            let salted = self.salter.salt(&key);
            inner.filter.remove(&salted);
        }
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }
}

impl KeyListener for FilteredKeyListener {
    fn id(&self) -> ListenerId {
        self.id
    }

    fn owner(&self) -> Option<GroupId> {
        self.owner
    }

    fn probably_want(&self, _key: &BlockKey, salted: &SaltedKey) -> bool {
        self.inner.lock().filter.contains(salted)
    }

    fn definitely_want(&self, key: &BlockKey, _salted: &SaltedKey) -> Option<PriorityClass> {
        self.inner.lock().wanted.get(key).map(|w| w.priority)
    }

    fn handle_block(&self, key: &BlockKey, salted: &SaltedKey, block: &KeyBlock) -> bool {
        let found = {
            let mut inner = self.inner.lock();
            let found = inner.wanted.remove(key);
            if found.is_some() {
                inner.filter.remove(salted);
            }
            found
        };
        let Some(wanted) = found else {
            return false;
        };
        debug!(listener = %self.id, key = %key, items = wanted.items.len(), "Block matched wanted key");
        if let Some(handler) = &self.on_block {
            handler(block, &wanted.items);
        }
        true
    }

    fn requests_for_key(&self, key: &BlockKey, _salted: &SaltedKey) -> Vec<ItemId> {
        self.inner
            .lock()
            .wanted
            .get(key)
            .map(|w| w.items.clone())
            .unwrap_or_default()
    }

    fn is_empty(&self) -> bool {
        self.inner.lock().wanted.is_empty()
    }

    fn count_keys(&self) -> u64 {
        self.inner.lock().wanted.len() as u64
    }

    fn on_remove(&self) {
        self.removed.store(true, Ordering::Release);
    }
}
