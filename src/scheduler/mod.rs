//! Scheduling hierarchy for pending fetches and inserts.
//!
//! Enforces priority ordering, anti-starvation retry normalization and
//! per-client fairness through a nested, lazily created, eagerly pruned index.

mod grab_array;
mod hierarchy;
mod item;
mod occupancy;
mod priority;
mod sectored;

pub use grab_array::GrabArray;
pub use hierarchy::{
    normalize_retry_count, Insertion, Placement, Removal, SchedulingHierarchy, StructuralChange,
    MIN_RETRY_FLOOR,
};
pub use item::{
    ClientId, CompletionHook, GroupId, ItemId, ItemSpec, Outcome, Persistence, RequestKind,
    SchedulableItem, SchedulerKind,
};
pub use occupancy::{OccupancyIter, OccupancyRow};
pub use priority::{PriorityClass, PriorityRange};
pub use sectored::SectoredGrabArray;
