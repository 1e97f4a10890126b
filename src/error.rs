//! Scheduler error types.
//!
//! Contract violations are surfaced to the caller immediately and never retried.
//! Structural races and filter inaccuracy are not errors at all.

use thiserror::Error;

use crate::coordinator::StoreError;
use crate::matching::ListenerId;
use crate::scheduler::{ItemId, PriorityClass, SchedulerKind};

/// Errors returned by scheduler and registry operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Invalid request kind: item {item} is {found}, scheduler is {expected}")]
    InvalidRequestKind {
        item: ItemId,
        found: String,
        expected: SchedulerKind,
    },

    #[error("Invalid priority {priority}: range is {most_urgent} (most urgent) to {least_urgent} (least urgent)")]
    InvalidPriority {
        priority: PriorityClass,
        most_urgent: PriorityClass,
        least_urgent: PriorityClass,
    },

    #[error("Listener {0} is already registered")]
    DuplicateListener(ListenerId),

    #[error("Durable item {0} has no owning request group")]
    MissingOwner(ItemId),

    #[error("Failed to record structural change durably: {0}")]
    PersistenceFailure(#[from] StoreError),
}

impl SchedulerError {
    /// Returns true if this error indicates a bug in the calling collaborator.
    pub fn is_caller_bug(&self) -> bool {
        !matches!(self, Self::PersistenceFailure(_))
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
