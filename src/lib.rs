//! keysched: request scheduling core for a content-addressed block store.
//!
//! Pending fetches and inserts are dispatched by priority class, with
//! retry-count tiers so repeatedly failing work cannot starve fresh work, and
//! per-client shards so one client with many requests gets the same share as
//! one with few. A registry of key listeners answers "does anyone want this
//! block" cheaply, with a probabilistic pre-filter and an authoritative
//! second phase.
//!
//! # Layout
//!
//! - [`scheduler`]: the scheduling hierarchy and the item model
//! - [`matching`]: key listeners and the registry that matches found blocks
//! - [`coordinator`]: a scheduler core per kind, and the set of four
//! - [`keys`]: block keys and per-type salting
//!
//! # Locking
//!
//! Hierarchy locks are taken outer to inner only, and the hierarchy and the
//! listener registry are never locked at the same time. Durable-store calls
//! happen after every in-memory lock is released.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod keys;
pub mod matching;
pub mod scheduler;
pub mod telemetry;

pub use config::{ConfigError, ListenerFilterConfig, SchedulerConfig};
pub use coordinator::{
    CoreContext, DurableStore, GroupIndex, ItemSnapshot, MemoryJournal, SchedulerCore,
    SchedulerSet, StarterQueueHook, StoreError,
};
pub use error::{Result, SchedulerError};
pub use keys::{BlockKey, KeyBlock, KeySalter, KeyType, SaltedKey};
pub use matching::{
    BlockDelivery, FilteredKeyListener, KeyListener, ListenerId, ListenerRegistry,
};
pub use scheduler::{
    ClientId, GroupId, ItemId, ItemSpec, Outcome, Persistence, Placement, PriorityClass,
    PriorityRange, RequestKind, SchedulableItem, SchedulerKind, SchedulingHierarchy,
};
