//! Durable-store and starter-queue seams.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use thiserror::Error;

use crate::scheduler::{SchedulableItem, StructuralChange};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Store write failed: {0}")]
    Write(String),
    #[error("Failed to encode change: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Append-only sink for structural changes of a durable hierarchy.
///
/// Called after the in-memory mutation and with no scheduler lock held.
pub trait DurableStore: Send + Sync {
    fn record(&self, change: &StructuralChange) -> Result<(), StoreError>;
}

/// Notified when a durable item is registered, so a starter queue can pick
/// it up without waiting for the next scan.
pub trait StarterQueueHook: Send + Sync {
    fn item_registered(&self, item: &SchedulableItem);
}

/// In-memory journal of structural changes.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    entries: Mutex<Vec<StructuralChange>>,
    failing: AtomicBool,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `record` fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    pub fn entries(&self) -> Vec<StructuralChange> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Journal as newline-delimited JSON.
    pub fn to_json_lines(&self) -> Result<String, StoreError> {
        let entries = self.entries.lock();
        let mut out = String::new();
        for change in entries.iter() {
            out.push_str(&serde_json::to_string(change)?);
            out.push('\n');
        }
        Ok(out)
    }
}

impl DurableStore for MemoryJournal {
    fn record(&self, change: &StructuralChange) -> Result<(), StoreError> {
        if self.failing.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable("journal is failing".to_string()));
        }
        self.entries.lock().push(change.clone());
        Ok(())
    }
}
