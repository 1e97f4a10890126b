//! Scheduler cores: hierarchy plus listener registry, wired to the shared
//! group index and the optional durable store.

mod group_index;
mod scheduler_core;
mod set;
mod store;

pub use group_index::GroupIndex;
pub use scheduler_core::{CoreContext, ItemSnapshot, SchedulerCore};
pub use set::SchedulerSet;
pub use store::{DurableStore, MemoryJournal, StarterQueueHook, StoreError};
