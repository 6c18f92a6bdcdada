//! Live workflows, keyed by the acting item.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use combat_core::{ItemUuid, WorkflowId};

use super::WorkflowSummary;
use super::instance::Workflow;

pub(crate) type SharedWorkflow = Arc<AsyncMutex<Workflow>>;

/// Finished summaries kept so late calls on a finished id stay no-ops.
const FINISHED_CAPACITY: usize = 64;

#[derive(Default)]
struct RegistryState {
    next_id: u64,
    live: HashMap<ItemUuid, (WorkflowId, SharedWorkflow)>,
    by_id: HashMap<WorkflowId, ItemUuid>,
    finished: VecDeque<WorkflowSummary>,
}

/// Process-scoped registry holding at most one live workflow per item.
///
/// The map lock is only held for lookups and inserts; a workflow's own
/// async mutex serializes its phases.
#[derive(Default)]
pub struct WorkflowRegistry {
    state: Mutex<RegistryState>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn next_id(&self) -> WorkflowId {
        let mut state = self.lock();
        state.next_id += 1;
        WorkflowId(state.next_id)
    }

    pub(crate) fn live_for(&self, item: &ItemUuid) -> Option<(WorkflowId, SharedWorkflow)> {
        self.lock()
            .live
            .get(item)
            .map(|(id, workflow)| (*id, Arc::clone(workflow)))
    }

    pub(crate) fn get(&self, id: WorkflowId) -> Option<SharedWorkflow> {
        let state = self.lock();
        let item = state.by_id.get(&id)?;
        state.live.get(item).map(|(_, workflow)| Arc::clone(workflow))
    }

    /// Registers a workflow. Fails with the live id when the item already has one.
    pub(crate) fn insert(
        &self,
        item: ItemUuid,
        id: WorkflowId,
        workflow: SharedWorkflow,
    ) -> Result<(), WorkflowId> {
        let mut state = self.lock();
        if let Some((live, _)) = state.live.get(&item) {
            return Err(*live);
        }
        state.by_id.insert(id, item.clone());
        state.live.insert(item, (id, workflow));
        Ok(())
    }

    /// Removes a finished workflow and remembers its summary.
    pub(crate) fn finish(&self, summary: WorkflowSummary) {
        let mut state = self.lock();
        if state.by_id.remove(&summary.id).is_some() {
            let owned = state
                .live
                .get(&summary.item)
                .is_some_and(|(live, _)| *live == summary.id);
            if owned {
                state.live.remove(&summary.item);
            }
        }
        debug!(target: "runtime::workflow", workflow = %summary.id, item = %summary.item, "workflow unregistered");
        if state.finished.len() == FINISHED_CAPACITY {
            state.finished.pop_front();
        }
        state.finished.push_back(summary);
    }

    /// Summary of a recently finished workflow.
    pub fn finished(&self, id: WorkflowId) -> Option<WorkflowSummary> {
        self.lock()
            .finished
            .iter()
            .rev()
            .find(|summary| summary.id == id)
            .cloned()
    }

    pub fn is_live(&self, item: &ItemUuid) -> bool {
        self.lock().live.contains_key(item)
    }

    pub fn live_count(&self) -> usize {
        self.lock().live.len()
    }
}

#[cfg(test)]
mod tests {
    use combat_core::{
        ActionType, ActorSnapshot, HitPoints, ItemSnapshot, TokenSnapshot, UserId,
    };

    use super::*;
    use crate::config::{AutoRoll, Role};
    use crate::workflow::{UseOptions, WorkflowState};

    fn workflow(id: WorkflowId) -> SharedWorkflow {
        let actor = ActorSnapshot::new("Actor.a", "Aldric", HitPoints::new(10, 10), 12);
        let token = TokenSnapshot::new("Token.a", actor.uuid.clone(), "Aldric");
        let item = ItemSnapshot::new("Item.sword", "Longsword", ActionType::Mwak);
        Arc::new(AsyncMutex::new(Workflow::new(
            id,
            UserId::from("gm"),
            Role::Gm,
            AutoRoll::default(),
            actor,
            token,
            item,
            None,
            Vec::new(),
            UseOptions::default(),
        )))
    }

    #[test]
    fn one_live_workflow_per_item() {
        let registry = WorkflowRegistry::new();
        let item = ItemUuid::from("Item.sword");
        let first = registry.next_id();
        registry.insert(item.clone(), first, workflow(first)).unwrap();

        let second = registry.next_id();
        assert_eq!(registry.insert(item.clone(), second, workflow(second)), Err(first));
        assert!(registry.get(first).is_some());
        assert!(registry.get(second).is_none());
    }

    #[test]
    fn finishing_frees_the_item_and_keeps_the_summary() {
        let registry = WorkflowRegistry::new();
        let item = ItemUuid::from("Item.sword");
        let id = registry.next_id();
        registry.insert(item.clone(), id, workflow(id)).unwrap();

        let summary = WorkflowSummary::empty(
            id,
            "Actor.a".into(),
            item.clone(),
            WorkflowState::Completed,
        );
        registry.finish(summary);
        assert!(!registry.is_live(&item));
        assert_eq!(registry.finished(id).map(|s| s.state), Some(WorkflowState::Completed));
        assert_eq!(registry.live_count(), 0);
    }
}
