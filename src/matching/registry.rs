//! Registry of live key listeners with hit/miss accounting.
//!
//! The cheap `probably_want` scan runs under the registry lock. Everything
//! that can be expensive (authoritative resolution, block handling, removal
//! callbacks) runs on a snapshot of candidates after the lock is released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::accuracy::{AccuracyPhase, AccuracyThresholds, FilterAccuracy};
use super::listener::{KeyListener, ListenerId};
use crate::error::{Result, SchedulerError};
use crate::keys::{BlockKey, KeyBlock, KeySalter, SaltedKey};
use crate::scheduler::{GroupId, ItemId, Persistence, PriorityClass};
use crate::telemetry::DiagnosticSink;

/// What happened to a delivered block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockDelivery {
    /// At least one listener accepted the block.
    Accepted { listeners: usize },
    /// Some listeners probably wanted the key but none accepted.
    FalsePositive { candidates: usize },
    /// No listener passed the cheap filter.
    NoCandidates,
}

impl BlockDelivery {
    pub fn accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

pub struct ListenerRegistry {
    persistence: Persistence,
    salter: Arc<KeySalter>,
    listeners: Mutex<HashMap<ListenerId, Arc<dyn KeyListener>>>,
    true_positives: AtomicU64,
    false_positives: AtomicU64,
    negatives: AtomicU64,
    sink: Arc<dyn DiagnosticSink>,
    thresholds: AccuracyThresholds,
    negative_log_interval: u64,
}

impl ListenerRegistry {
    pub fn new(
        persistence: Persistence,
        salter: Arc<KeySalter>,
        sink: Arc<dyn DiagnosticSink>,
        thresholds: AccuracyThresholds,
        negative_log_interval: u64,
    ) -> Self {
        Self {
            persistence,
            salter,
            listeners: Mutex::new(HashMap::new()),
            true_positives: AtomicU64::new(0),
            false_positives: AtomicU64::new(0),
            negatives: AtomicU64::new(0),
            sink,
            thresholds,
            negative_log_interval: negative_log_interval.max(1),
        }
    }

    pub fn salter(&self) -> &Arc<KeySalter> {
        &self.salter
    }

    pub fn register(&self, listener: Arc<dyn KeyListener>) -> Result<()> {
        let id = listener.id();
        let size = {
            let mut listeners = self.listeners.lock();
            if listeners.contains_key(&id) {
                return Err(SchedulerError::DuplicateListener(id));
            }
            listeners.insert(id, listener);
            listeners.len()
        };
        info!(listener = %id, size, "Added pending keys");
        Ok(())
    }

    /// Remove one listener. Returns false if it was not registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let removed = self.listeners.lock().remove(&id);
        match removed {
            Some(listener) => {
                listener.on_remove();
                info!(listener = %id, "Removed pending keys");
                true
            }
            None => false,
        }
    }

    /// Remove every listener owned by `owner`. Returns how many were removed.
    pub fn unregister_owner(&self, owner: GroupId) -> usize {
        let removed: Vec<Arc<dyn KeyListener>> = {
            let mut listeners = self.listeners.lock();
            let ids: Vec<ListenerId> = listeners
                .iter()
                .filter(|(_, l)| l.owner() == Some(owner))
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| listeners.remove(id)).collect()
        };
        for listener in &removed {
            listener.on_remove();
            info!(listener = %listener.id(), owner = %owner, "Removed pending keys");
        }
        removed.len()
    }

    /// Drop every listener. Listeners are never durable, so a restarted
    /// scheduler starts from an empty set.
    pub fn clear(&self) {
        let drained: Vec<_> = self.listeners.lock().drain().map(|(_, l)| l).collect();
        for listener in &drained {
            listener.on_remove();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "Cleared key listeners");
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    pub fn contains(&self, id: ListenerId) -> bool {
        self.listeners.lock().contains_key(&id)
    }

    fn scan(&self, key: &BlockKey, salted: &SaltedKey) -> Vec<Arc<dyn KeyListener>> {
        let listeners = self.listeners.lock();
        listeners
            .values()
            .filter(|l| l.probably_want(key, salted))
            .cloned()
            .collect()
    }

    /// Every listener whose cheap filter passes for `key`.
    pub fn probable_matches(&self, key: &BlockKey) -> Vec<Arc<dyn KeyListener>> {
        let salted = self.salter.salt(key);
        self.scan(key, &salted)
    }

    /// Most urgent priority any listener authoritatively wants `key` at.
    pub fn resolve_priority(&self, key: &BlockKey, default: PriorityClass) -> PriorityClass {
        let salted = self.salter.salt(key);
        self.scan(key, &salted)
            .iter()
            .filter_map(|l| l.definitely_want(key, &salted))
            .fold(default, |best, p| best.min(p))
    }

    pub fn any_want(&self, key: &BlockKey) -> bool {
        let salted = self.salter.salt(key);
        self.scan(key, &salted)
            .iter()
            .any(|l| l.definitely_want(key, &salted).is_some())
    }

    pub fn any_probably_want(&self, key: &BlockKey) -> bool {
        let salted = self.salter.salt(key);
        let listeners = self.listeners.lock();
        listeners.values().any(|l| l.probably_want(key, &salted))
    }

    /// Item handles every probable match would complete with `key`.
    pub fn requests_for_key(&self, key: &BlockKey) -> Vec<ItemId> {
        let salted = self.salter.salt(key);
        self.scan(key, &salted)
            .iter()
            .flat_map(|l| l.requests_for_key(key, &salted))
            .collect()
    }

    /// Hand a found block to every probable match.
    pub fn deliver_block(&self, block: &KeyBlock) -> BlockDelivery {
        let key = &block.key;
        let salted = self.salter.salt(key);
        let candidates = self.scan(key, &salted);
        if candidates.is_empty() {
            return BlockDelivery::NoCandidates;
        }

        let mut accepted = 0;
        for listener in &candidates {
            if listener.handle_block(key, &salted, block) {
                accepted += 1;
            }
            if listener.is_empty() {
                let removed = self.listeners.lock().remove(&listener.id()).is_some();
                if removed {
                    listener.on_remove();
                    debug!(listener = %listener.id(), "Listener drained by block delivery");
                }
            }
        }

        if accepted > 0 {
            self.true_positives.fetch_add(1, Ordering::AcqRel);
            self.report(AccuracyPhase::Hit);
            BlockDelivery::Accepted { listeners: accepted }
        } else {
            self.false_positives.fetch_add(1, Ordering::AcqRel);
            self.report(AccuracyPhase::FalsePositive);
            BlockDelivery::FalsePositive { candidates: candidates.len() }
        }
    }

    /// Count a block no listener was even a candidate for.
    pub fn count_negative(&self) {
        let negatives = self.negatives.fetch_add(1, Ordering::AcqRel) + 1;
        if negatives % self.negative_log_interval == 0 {
            self.report(AccuracyPhase::Negative);
        }
    }

    /// Estimate of waiting keys; listeners may overlap.
    pub fn count_waiting_keys(&self) -> u64 {
        let listeners = self.listeners.lock();
        listeners.values().map(|l| l.count_keys()).sum()
    }

    pub fn accuracy(&self) -> FilterAccuracy {
        FilterAccuracy {
            persistence: self.persistence,
            true_positives: self.true_positives.load(Ordering::Acquire),
            false_positives: self.false_positives.load(Ordering::Acquire),
            negatives: self.negatives.load(Ordering::Acquire),
        }
    }

    fn report(&self, phase: AccuracyPhase) {
        let report = self.accuracy();
        let severity = report.severity(&self.thresholds);
        self.sink.filter_accuracy(phase, &report, severity);
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("persistence", &self.persistence)
            .field("listeners", &self.len())
            .field("accuracy", &self.accuracy())
            .finish()
    }
}
