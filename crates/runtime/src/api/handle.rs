//! Cloneable façade over the action engine.
//!
//! [`CombatHandle`] is what hosts hold: it starts and resumes workflows,
//! applies standalone damage, undoes, runs overtime effects and streams
//! events from specific topics.
use std::sync::Arc;

use tokio::sync::broadcast;

use combat_core::{ActorUuid, TurnPhase, UserId, WorkflowId};

use super::errors::Result;
use crate::delegation::{DelegationClient, DelegationMetrics, DelegationStats};
use crate::dialogs::{ClientDirectory, Dialogs};
use crate::events::{Event, Topic};
use crate::overtime::OvertimeReport;
use crate::undo::UndoReport;
use crate::workflow::{
    ActionEngine, ApplyDamageRequest, DamageApplication, ItemUser, ResumePayload,
    RollAttackOptions, RollDamageOptions, UseItemRequest, WorkflowState, WorkflowSummary,
};
use crate::world::WorldStore;

/// Client-facing handle to interact with the runtime
#[derive(Clone)]
pub struct CombatHandle {
    engine: Arc<ActionEngine>,
    client: DelegationClient,
    clients: ClientDirectory,
    metrics: Arc<DelegationMetrics>,
}

impl CombatHandle {
    pub(crate) fn new(
        engine: Arc<ActionEngine>,
        client: DelegationClient,
        clients: ClientDirectory,
        metrics: Arc<DelegationMetrics>,
    ) -> Self {
        Self {
            engine,
            client,
            clients,
            metrics,
        }
    }

    /// Starts an item use. Returns the workflow as it stands once it
    /// finished or suspended.
    pub async fn use_item(&self, request: UseItemRequest) -> Result<WorkflowSummary> {
        self.engine.use_item(request).await
    }

    pub async fn roll_attack(
        &self,
        workflow: WorkflowId,
        options: RollAttackOptions,
    ) -> Result<WorkflowSummary> {
        self.engine.roll_attack(workflow, options).await
    }

    pub async fn roll_damage(
        &self,
        workflow: WorkflowId,
        options: RollDamageOptions,
    ) -> Result<WorkflowSummary> {
        self.engine.roll_damage(workflow, options).await
    }

    pub async fn un_suspend(
        &self,
        workflow: WorkflowId,
        payload: ResumePayload,
    ) -> Result<WorkflowSummary> {
        self.engine.un_suspend(workflow, payload).await
    }

    pub async fn perform_state(
        &self,
        workflow: WorkflowId,
        state: WorkflowState,
    ) -> Result<WorkflowSummary> {
        self.engine.perform_state(workflow, state).await
    }

    /// Applies damage outside any workflow.
    pub async fn apply_damage(&self, request: ApplyDamageRequest) -> DamageApplication {
        self.engine.apply_damage(request).await
    }

    /// Reverses the most recent completed action, if any.
    pub async fn undo_last(&self) -> Option<UndoReport> {
        self.engine.undo_last().await
    }

    /// Runs `actor`'s overtime effects for `phase` on behalf of `user`.
    pub async fn process_overtime(
        &self,
        user: &UserId,
        actor: &ActorUuid,
        phase: TurnPhase,
    ) -> Result<OvertimeReport> {
        self.engine.process_overtime(user, actor, phase).await
    }

    /// Summary of a recently finished workflow.
    pub fn finished(&self, workflow: WorkflowId) -> Option<WorkflowSummary> {
        self.engine.registry().finished(workflow)
    }

    pub fn live_workflows(&self) -> usize {
        self.engine.registry().live_count()
    }

    pub fn undo_len(&self) -> usize {
        self.engine.undo_len()
    }

    pub fn world(&self) -> &WorldStore {
        self.engine.world()
    }

    /// Delegation client acting as `user`.
    pub fn delegation(&self, user: UserId) -> DelegationClient {
        self.client.for_user(user)
    }

    pub fn delegation_stats(&self) -> DelegationStats {
        self.metrics.snapshot()
    }

    /// Registers the dialogs a connected user answers.
    pub fn connect(&self, user: UserId, dialogs: Arc<dyn Dialogs>) {
        self.clients.register(user, dialogs);
    }

    pub fn set_online(&self, user: &UserId, online: bool) {
        self.clients.set_online(user, online);
    }

    /// Subscribe to a specific event topic
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Event> {
        self.engine.events().subscribe(topic)
    }
}
