//! Schedulable items and the identities they carry.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::priority::PriorityClass;
use crate::keys::KeyType;

static NEXT_ITEM_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to a schedulable item. Hierarchy leaves store only this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(pub u64);

impl ItemId {
    /// Allocate a process-unique id.
    pub fn next() -> Self {
        Self(NEXT_ITEM_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item#{}", self.0)
    }
}

/// Fairness discriminator: requests issued by the same logical requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client#{}", self.0)
    }
}

/// The request group (a whole file fetch or insert) owning items and a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(pub u64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    Fetch,
    Insert,
}

/// Durable items survive a restart; ephemeral ones live in memory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Persistence {
    Durable,
    Ephemeral,
}

impl Persistence {
    pub fn is_durable(self) -> bool {
        self == Self::Durable
    }
}

/// The (request kind, key type) pair a scheduler instance is dedicated to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchedulerKind {
    pub request: RequestKind,
    pub key_type: KeyType,
}

impl SchedulerKind {
    pub const CHK_FETCH: Self = Self { request: RequestKind::Fetch, key_type: KeyType::Chk };
    pub const SSK_FETCH: Self = Self { request: RequestKind::Fetch, key_type: KeyType::Ssk };
    pub const CHK_INSERT: Self = Self { request: RequestKind::Insert, key_type: KeyType::Chk };
    pub const SSK_INSERT: Self = Self { request: RequestKind::Insert, key_type: KeyType::Ssk };

    pub const ALL: [Self; 4] = [Self::CHK_FETCH, Self::SSK_FETCH, Self::CHK_INSERT, Self::SSK_INSERT];

    pub fn is_insert(&self) -> bool {
        self.request == RequestKind::Insert
    }
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = match self.key_type {
            KeyType::Chk => "CHK",
            KeyType::Ssk => "SSK",
        };
        if self.is_insert() {
            write!(f, "insert:{key}")
        } else {
            write!(f, "fetch:{key}")
        }
    }
}

/// How an item left the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed,
    Cancelled,
}

/// Completion callback supplied by the request producer.
pub type CompletionHook = Arc<dyn Fn(&SchedulableItem, Outcome) + Send + Sync>;

/// Construction parameters for a [`SchedulableItem`].
#[derive(Debug, Clone)]
pub struct ItemSpec {
    pub kind: SchedulerKind,
    pub priority: PriorityClass,
    pub retry_count: u32,
    pub client: ClientId,
    pub group: Option<GroupId>,
    pub persistence: Persistence,
}

impl Default for ItemSpec {
    fn default() -> Self {
        Self {
            kind: SchedulerKind::CHK_FETCH,
            priority: PriorityClass::default(),
            retry_count: 0,
            client: ClientId(0),
            group: None,
            persistence: Persistence::Ephemeral,
        }
    }
}

/// One pending fetch or insert unit.
///
/// Shared as `Arc<SchedulableItem>` between the producer and the scheduler.
/// Priority and retry count may change while registered; the new values take
/// effect on the next re-registration.
pub struct SchedulableItem {
    id: ItemId,
    kind: SchedulerKind,
    client: ClientId,
    group: Option<GroupId>,
    persistence: Persistence,
    priority: AtomicU8,
    retry_count: AtomicU32,
    cancelled: AtomicBool,
    on_finish: Option<CompletionHook>,
}

impl fmt::Debug for SchedulableItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulableItem")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("priority", &self.priority())
            .field("retry_count", &self.retry_count())
            .field("client", &self.client)
            .field("group", &self.group)
            .finish()
    }
}

impl SchedulableItem {
    pub fn new(id: ItemId, spec: ItemSpec) -> Self {
        Self {
            id,
            kind: spec.kind,
            client: spec.client,
            group: spec.group,
            persistence: spec.persistence,
            priority: AtomicU8::new(spec.priority.value()),
            retry_count: AtomicU32::new(spec.retry_count),
            cancelled: AtomicBool::new(false),
            on_finish: None,
        }
    }

    /// Attach the producer's completion callback.
    pub fn with_completion(mut self, hook: CompletionHook) -> Self {
        self.on_finish = Some(hook);
        self
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn kind(&self) -> SchedulerKind {
        self.kind
    }

    pub fn client(&self) -> ClientId {
        self.client
    }

    pub fn group(&self) -> Option<GroupId> {
        self.group
    }

    pub fn persistence(&self) -> Persistence {
        self.persistence
    }

    pub fn priority(&self) -> PriorityClass {
        PriorityClass::new(self.priority.load(Ordering::Acquire))
    }

    pub fn set_priority(&self, priority: PriorityClass) {
        self.priority.store(priority.value(), Ordering::Release);
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::Acquire)
    }

    /// Record one more failed attempt. Returns the new count, which sticks
    /// at `u32::MAX`.
    pub fn record_retry(&self) -> u32 {
        let bump = |count: u32| Some(count.saturating_add(1));
        match self.retry_count.fetch_update(Ordering::AcqRel, Ordering::Acquire, bump) {
            Ok(previous) | Err(previous) => previous.saturating_add(1),
        }
    }

    /// Raise the retry count; it never goes down.
    pub fn raise_retry_count(&self, retry_count: u32) {
        self.retry_count.fetch_max(retry_count, Ordering::AcqRel);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub(crate) fn notify_finished(&self, outcome: Outcome) {
        if let Some(hook) = &self.on_finish {
            hook(self, outcome);
        }
    }
}
