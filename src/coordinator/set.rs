//! The four schedulers of one persistence class.

use std::sync::Arc;

use super::group_index::GroupIndex;
use super::scheduler_core::{CoreContext, SchedulerCore};
use super::store::{DurableStore, StarterQueueHook};
use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::keys::{BlockKey, KeyBlock, KeySalter, KeyType, SaltedKey};
use crate::matching::FilteredKeyListener;
use crate::scheduler::{GroupId, Persistence, Placement, RequestKind, SchedulableItem, SchedulerKind};
use crate::telemetry::DiagnosticSink;

/// CHK/SSK fetch and insert schedulers sharing one key salter and one group
/// index.
pub struct SchedulerSet {
    persistence: Persistence,
    salter: Arc<KeySalter>,
    groups: Arc<GroupIndex>,
    cores: [SchedulerCore; 4],
}

impl SchedulerSet {
    pub fn new(persistence: Persistence, config: &SchedulerConfig) -> Self {
        Self::with_context(persistence, config, CoreContext::default())
    }

    pub fn with_context(persistence: Persistence, config: &SchedulerConfig, context: CoreContext) -> Self {
        let salter = Arc::clone(&context.salter);
        let groups = Arc::clone(&context.groups);
        let cores = SchedulerKind::ALL.map(|kind| SchedulerCore::new(kind, persistence, config, context.clone()));
        Self {
            persistence,
            salter,
            groups,
            cores,
        }
    }

    /// Build a set reporting to `sink` instead of the tracing default.
    pub fn with_sink(persistence: Persistence, config: &SchedulerConfig, sink: Arc<dyn DiagnosticSink>) -> Self {
        let context = CoreContext { sink, ..CoreContext::default() };
        Self::with_context(persistence, config, context)
    }

    /// Attach the same durable store to every scheduler.
    pub fn with_store(self, store: Arc<dyn DurableStore>) -> Self {
        self.map_cores(|core| core.with_store(Arc::clone(&store)))
    }

    pub fn with_starter_hook(self, hook: Arc<dyn StarterQueueHook>) -> Self {
        self.map_cores(|core| core.with_starter_hook(Arc::clone(&hook)))
    }

    fn map_cores(self, f: impl FnMut(SchedulerCore) -> SchedulerCore) -> Self {
        Self {
            persistence: self.persistence,
            salter: self.salter,
            groups: self.groups,
            cores: self.cores.map(f),
        }
    }

    pub fn persistence(&self) -> Persistence {
        self.persistence
    }

    pub fn scheduler(&self, kind: SchedulerKind) -> &SchedulerCore {
        let idx = match (kind.request, kind.key_type) {
            (RequestKind::Fetch, KeyType::Chk) => 0,
            (RequestKind::Fetch, KeyType::Ssk) => 1,
            (RequestKind::Insert, KeyType::Chk) => 2,
            (RequestKind::Insert, KeyType::Ssk) => 3,
        };
        &self.cores[idx]
    }

    pub fn schedulers(&self) -> impl Iterator<Item = &SchedulerCore> {
        self.cores.iter()
    }

    /// Register an item with the scheduler matching its kind.
    pub fn register(&self, item: Arc<SchedulableItem>) -> Result<Placement> {
        self.scheduler(item.kind()).register_new(item)
    }

    /// Re-register a group's items in every scheduler. Returns how many moved.
    pub fn reregister_all(&self, group: GroupId) -> Result<usize> {
        let mut moved = 0;
        for core in &self.cores {
            moved += core.reregister_all(group)?;
        }
        Ok(moved)
    }

    /// Route a found block to the fetch scheduler for its key type.
    pub fn on_block_found(&self, block: &KeyBlock) -> bool {
        let kind = SchedulerKind {
            request: RequestKind::Fetch,
            key_type: block.key.key_type(),
        };
        self.scheduler(kind).on_block_found(block)
    }

    /// A filtered listener for the `kind` scheduler, sharing its salt.
    pub fn new_listener(&self, kind: SchedulerKind, owner: Option<GroupId>) -> FilteredKeyListener {
        self.scheduler(kind).new_listener(owner)
    }

    pub fn salt_key(&self, key: &BlockKey) -> SaltedKey {
        self.salter.salt(key)
    }

    pub fn salter(&self) -> &Arc<KeySalter> {
        &self.salter
    }

    pub fn group_index(&self) -> &Arc<GroupIndex> {
        &self.groups
    }

    pub fn count_queued(&self) -> usize {
        self.cores.iter().map(|c| c.count_queued()).sum()
    }
}

impl std::fmt::Debug for SchedulerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerSet")
            .field("persistence", &self.persistence)
            .field("cores", &self.cores)
            .finish()
    }
}
