//! The action engine: starts workflows, drives them through their states and
//! exposes the resume entry points.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

use combat_core::dice::FormulaError;
use combat_core::save::{other_save_multiplier, save_formula};
use combat_core::{
    Ability, ActiveEffect, ActorFlags, ActorSnapshot, ActorUuid, ApplyDamageDetail, BonusValue,
    ConcentrationTarget, ConditionContext, DamagePart, DamageRollOptions, EffectId, ErrorContext,
    KeyModifiers, OptionalBonus, OptionalKind, Roll, RollData, RollMode, SaverTraits,
    SpecialDuration, TokenUuid, TurnPhase, UserId, WorkflowId, attack_auto_fails, build_damage_terms,
    check_hit, check_save, create_damage_detail, offerable_attack_bonuses, resolve_attack_mode,
    resolve_save_mode, roll_attack, roll_save, save_multiplier,
};

use super::damage::{ApplyDamageRequest, DamageApplication, DamagePipeline, DamageTargetRef};
use super::instance::{RolledDamage, Workflow};
use super::registry::{SharedWorkflow, WorkflowRegistry};
use super::{
    ConflictResolution, Continuation, ItemSource, ItemUser, ResumePayload, RollAttackOptions,
    RollDamageOptions, UseItemRequest, WorkflowEnd, WorkflowState, WorkflowSummary,
};
use crate::api::{PreconditionError, Result, RuntimeError};
use crate::concentration::{ConcentrationService, concentration_record};
use crate::config::{Role, RuntimeConfig};
use crate::delegation::{
    DelegatedOp, DelegatedRequest, DelegationClient, DelegationOutcome, DelegationReply,
};
use crate::dialogs::{BonusRequest, ClientDirectory};
use crate::dice::SharedRoller;
use crate::events::{EventBus, WorkflowEvent};
use crate::hooks::{ExtensionPoint, HookOutcome, HookPayload, HookRegistry, HookVeto, MacroRunner, MacroSpec};
use crate::overtime::{self, OvertimeReport};
use crate::reactions::{ReactionBroker, ReactionContext, ReactionTrigger};
use crate::undo::{UndoData, UndoMutation, UndoQueue, UndoReport, UndoSink};
use crate::world::{ChatCardDraft, ChatCardKind, WorldStore};

/// What a state body asks the driver to do next.
enum Flow {
    Advance(WorkflowState),
    Suspend(Continuation),
    Abort(String),
    /// The workflow reached a terminal state.
    Finish,
}

fn vetoed(veto: HookVeto) -> Flow {
    Flow::Abort(veto.to_string())
}

fn error_context(wf: &Workflow) -> ErrorContext {
    ErrorContext::new()
        .with_actor(wf.actor.name.clone())
        .with_item(wf.item.uuid.clone())
        .with_workflow(wf.id)
}

fn formula_error(context: ErrorContext) -> impl FnOnce(FormulaError) -> RuntimeError {
    move |source| RuntimeError::Formula { context, source }
}

/// Roll data of `actor` using `item`.
fn roll_data(actor: &ActorSnapshot, item: &combat_core::ItemSnapshot) -> RollData {
    let mut data = actor.roll_data.clone();
    data.merge(&item.roll_data);
    data
}

/// Owns every live workflow and the services they share.
pub struct ActionEngine {
    config: Arc<RuntimeConfig>,
    world: WorldStore,
    bus: EventBus,
    hooks: HookRegistry,
    macros: Arc<dyn MacroRunner>,
    roller: SharedRoller,
    clients: ClientDirectory,
    /// Coordinator-side client; per-workflow clients derive from it.
    client: DelegationClient,
    registry: WorkflowRegistry,
    broker: ReactionBroker,
    damage: DamagePipeline,
    concentration: ConcentrationService,
    undo: UndoQueue,
}

impl ActionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<RuntimeConfig>,
        world: WorldStore,
        bus: EventBus,
        hooks: HookRegistry,
        macros: Arc<dyn MacroRunner>,
        roller: SharedRoller,
        clients: ClientDirectory,
        client: DelegationClient,
    ) -> Self {
        let broker = ReactionBroker::new(
            world.clone(),
            Arc::clone(&config),
            bus.clone(),
            roller.clone(),
        );
        let concentration = ConcentrationService::new(world.clone(), bus.clone(), roller.clone());
        let damage = DamagePipeline::new(
            world.clone(),
            Arc::clone(&config),
            bus.clone(),
            hooks.clone(),
            broker.clone(),
            concentration.clone(),
        );
        let undo = UndoQueue::new(config.undo_capacity);
        Self {
            config,
            world,
            bus,
            hooks,
            macros,
            roller,
            clients,
            client,
            registry: WorkflowRegistry::new(),
            broker,
            damage,
            concentration,
            undo,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn world(&self) -> &WorldStore {
        &self.world
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    /// Runs an item use delegated by a non-privileged caller.
    pub async fn run_item_use(&self, request: UseItemRequest) -> Result<WorkflowSummary> {
        info!(
            target: "runtime::workflow",
            actor = %request.actor,
            user = %request.user,
            "completing delegated item use"
        );
        self.begin(request).await
    }

    /// Supplies the attack roll options, or re-rolls the attack once damage
    /// is pending.
    pub async fn roll_attack(
        &self,
        id: WorkflowId,
        options: RollAttackOptions,
    ) -> Result<WorkflowSummary> {
        let shared = self.live(id, "roll_attack")?;
        let mut wf = shared.lock().await;
        let invalid = |state| RuntimeError::InvalidState {
            workflow: id,
            state,
            operation: "roll_attack",
        };
        if !wf.item.action_type.is_attack() {
            return Err(invalid(wf.state));
        }
        match wf.state {
            WorkflowState::WaitForAttackRoll => {}
            WorkflowState::WaitForDamageRoll => {
                debug!(target: "runtime::workflow", workflow = %id, "attack re-rolled, damage reset");
                wf.reset_attack();
                wf.state = WorkflowState::WaitForAttackRoll;
            }
            state => return Err(invalid(state)),
        }
        wf.attack_request = Some(options);
        wf.suspended = None;
        self.drive_locked(&mut wf).await?;
        Ok(wf.summary())
    }

    pub async fn roll_damage(
        &self,
        id: WorkflowId,
        options: RollDamageOptions,
    ) -> Result<WorkflowSummary> {
        let shared = self.live(id, "roll_damage")?;
        let mut wf = shared.lock().await;
        if wf.state != WorkflowState::WaitForDamageRoll {
            return Err(RuntimeError::InvalidState {
                workflow: id,
                state: wf.state,
                operation: "roll_damage",
            });
        }
        wf.damage_request = Some(options);
        wf.suspended = None;
        self.drive_locked(&mut wf).await?;
        Ok(wf.summary())
    }

    /// Resumes a suspended workflow with the input it waits for.
    pub async fn un_suspend(
        &self,
        id: WorkflowId,
        payload: ResumePayload,
    ) -> Result<WorkflowSummary> {
        let unexpected = RuntimeError::UnexpectedResume {
            workflow: id,
            payload: payload.name(),
        };
        let Some(shared) = self.registry.get(id) else {
            return Err(match self.registry.finished(id) {
                Some(_) => unexpected,
                None => RuntimeError::UnknownWorkflow(id),
            });
        };
        let mut wf = shared.lock().await;
        if wf.suspended != Some(payload.continuation()) {
            return Err(unexpected);
        }
        match payload {
            ResumePayload::TemplatePlaced { template, targets } => {
                wf.template = Some(template);
                if !targets.is_empty() {
                    wf.targets = targets;
                }
            }
            ResumePayload::ItemCardConfirmed => wf.card_confirmed = true,
            ResumePayload::TargetsConfirmed(targets) => {
                wf.targets = targets;
                wf.targets_confirmed = true;
            }
        }
        wf.suspended = None;
        self.drive_locked(&mut wf).await?;
        Ok(wf.summary())
    }

    /// Forces a transition. Finished workflows answer with their summary.
    pub async fn perform_state(
        &self,
        id: WorkflowId,
        state: WorkflowState,
    ) -> Result<WorkflowSummary> {
        let Some(shared) = self.registry.get(id) else {
            return self
                .registry
                .finished(id)
                .ok_or(RuntimeError::UnknownWorkflow(id));
        };
        let mut wf = shared.lock().await;
        if wf.state.is_terminal() {
            return Ok(wf.summary());
        }
        match state {
            WorkflowState::Aborted => wf.abort("aborted on request"),
            WorkflowState::Cancelled => wf.cancel(),
            WorkflowState::Cleanup | WorkflowState::Completed => {
                wf.suspended = None;
                wf.state = WorkflowState::Cleanup;
            }
            other => {
                debug!(target: "runtime::workflow", workflow = %id, from = %wf.state, to = %other, "state forced");
                wf.suspended = None;
                wf.state = other;
                wf.entered = None;
            }
        }
        self.drive_locked(&mut wf).await?;
        Ok(wf.summary())
    }

    /// Reverses the most recent completed action.
    pub async fn undo_last(&self) -> Option<UndoReport> {
        let data = self.undo.pop_latest()?;
        let client = self.client.for_user(data.user.clone());
        Some(data.reverse(&client).await)
    }

    /// Applies damage outside any workflow. The application is queued for
    /// undo like a completed workflow.
    pub async fn apply_damage(&self, request: ApplyDamageRequest) -> DamageApplication {
        let id = request.workflow.unwrap_or_else(|| self.registry.next_id());
        let item = request
            .item
            .as_ref()
            .map(|item| item.uuid.clone())
            .unwrap_or_default();
        let speaker = request.speaker.clone();
        let summary =
            WorkflowSummary::empty(id, speaker.clone(), item.clone(), WorkflowState::ApplyDamage);
        let application = self.damage.apply(request, &summary, &self.client, self).await;

        let mut undo = UndoData::new(id, speaker, item, self.client.user().clone());
        application.clone().record_into(&mut undo);
        if !undo.is_empty() {
            self.undo.push(undo);
        }
        application
    }

    /// Runs `actor`'s overtime effects for `phase` here, on the coordinator.
    pub async fn run_overtime(&self, actor: &ActorUuid, phase: TurnPhase) -> Result<OvertimeReport> {
        overtime::run(&self.world, &self.client, self, actor, phase).await
    }

    /// Runs overtime effects for `user`, delegating when the user is not
    /// the coordinator.
    pub async fn process_overtime(
        &self,
        user: &UserId,
        actor: &ActorUuid,
        phase: TurnPhase,
    ) -> Result<OvertimeReport> {
        if *user == self.world.gm().await {
            return self.run_overtime(actor, phase).await;
        }
        let outcome = self
            .client
            .for_user(user.clone())
            .call(DelegatedRequest::RunOvertime {
                actor: actor.clone(),
                phase,
            })
            .await
            .expect_reply(DelegatedOp::RunOvertime, |reply| match reply {
                DelegationReply::Overtime(report) => Some(report),
                _ => None,
            });
        Ok(outcome
            .reply()
            .unwrap_or_else(|| OvertimeReport::empty(actor.clone())))
    }

    fn live(&self, id: WorkflowId, operation: &'static str) -> Result<SharedWorkflow> {
        if let Some(shared) = self.registry.get(id) {
            return Ok(shared);
        }
        match self.registry.finished(id) {
            Some(summary) => Err(RuntimeError::InvalidState {
                workflow: id,
                state: summary.state,
                operation,
            }),
            None => Err(RuntimeError::UnknownWorkflow(id)),
        }
    }

    fn client_for(&self, wf: &Workflow) -> DelegationClient {
        self.client.for_user(wf.user.clone())
    }

    // ========================================================================
    // Creation
    // ========================================================================

    async fn begin(&self, request: UseItemRequest) -> Result<WorkflowSummary> {
        let UseItemRequest {
            actor: actor_id,
            item,
            user,
            targets,
            options,
        } = request;

        let actor = self
            .world
            .actor(&actor_id)
            .await
            .ok_or_else(|| PreconditionError::UnknownActor(actor_id.clone()))?;
        let item = match item {
            ItemSource::Owned(uuid) => self.world.item(&actor_id, &uuid).await.ok_or_else(|| {
                PreconditionError::UnknownItem {
                    actor: actor_id.clone(),
                    item: uuid,
                }
            })?,
            ItemSource::Synthetic(item) => *item,
        };
        let token = self
            .world
            .token_for_actor(&actor_id)
            .await
            .ok_or_else(|| PreconditionError::MissingToken(actor_id.clone()))?;
        for target in &targets {
            if self.world.token(target).await.is_none() {
                return Err(PreconditionError::UnknownTarget(target.clone()).into());
            }
        }
        if !item.has_template {
            if item.requires_targets && targets.is_empty() {
                return Err(PreconditionError::NoTargets(item.uuid.clone()).into());
            }
            if item.single_target && targets.len() > 1 {
                return Err(PreconditionError::TooManyTargets {
                    item: item.uuid.clone(),
                    count: targets.len(),
                }
                .into());
            }
        }
        let ammo = match &options.ammo {
            Some(uuid) => Some(self.world.item(&actor_id, uuid).await.ok_or_else(|| {
                PreconditionError::UnknownItem {
                    actor: actor_id.clone(),
                    item: uuid.clone(),
                }
            })?),
            None => None,
        };

        if let Some((live_id, live)) = self.registry.live_for(&item.uuid) {
            let Some(resolution) = options.conflict else {
                return Err(PreconditionError::WorkflowConflict {
                    item: item.uuid.clone(),
                    workflow: live_id,
                }
                .into());
            };
            self.resolve_conflict(live, resolution).await?;
        }

        let gm = self.world.gm().await;
        let role = if user == gm { Role::Gm } else { Role::Player };
        let id = self.registry.next_id();
        let item_uuid = item.uuid.clone();
        let workflow = Workflow::new(
            id,
            user,
            role,
            self.config.auto_roll(role),
            actor,
            token,
            item,
            ammo,
            targets,
            options,
        );
        let shared = Arc::new(AsyncMutex::new(workflow));
        let mut wf = shared.lock().await;
        if let Err(live) = self
            .registry
            .insert(item_uuid.clone(), id, Arc::clone(&shared))
        {
            return Err(PreconditionError::WorkflowConflict {
                item: item_uuid,
                workflow: live,
            }
            .into());
        }
        info!(
            target: "runtime::workflow",
            workflow = %id,
            actor = %wf.actor.name,
            item = %wf.item.name,
            %role,
            targets = wf.targets.len(),
            "workflow started"
        );
        self.drive_locked(&mut wf).await?;
        Ok(wf.summary())
    }

    async fn resolve_conflict(
        &self,
        live: SharedWorkflow,
        resolution: ConflictResolution,
    ) -> Result<()> {
        let mut previous = live.lock().await;
        if previous.state.is_terminal() {
            return Ok(());
        }
        debug!(
            target: "runtime::workflow",
            workflow = %previous.id,
            ?resolution,
            "resolving live workflow for item"
        );
        match resolution {
            ConflictResolution::Complete => {
                previous.auto.attack = true;
                previous.auto.damage = true;
                previous.auto.confirm_targets = true;
                previous.options.fast_forward = true;
                previous.card_confirmed = true;
                previous.targets_confirmed = true;
                if previous.suspended == Some(Continuation::Template) {
                    previous.abort("template never placed");
                }
                previous.suspended = None;
            }
            ConflictResolution::Discard => previous.abort("discarded by a new use"),
            ConflictResolution::Undo => previous.abort("undone by a new use"),
        }
        // The live workflow's partial record; completed records stay queued.
        let partial = (resolution == ConflictResolution::Undo).then(|| {
            let empty = UndoData::new(
                previous.id,
                previous.actor.uuid.clone(),
                previous.item.uuid.clone(),
                previous.user.clone(),
            );
            std::mem::replace(&mut previous.undo, empty)
        });
        self.drive_locked(&mut previous).await?;
        drop(previous);

        if let Some(data) = partial.filter(|data| !data.is_empty()) {
            let client = self.client.for_user(data.user.clone());
            data.reverse(&client).await;
        }
        Ok(())
    }

    // ========================================================================
    // Driver
    // ========================================================================

    /// Steps the workflow until it suspends or ends. A failing phase aborts
    /// the workflow, runs cleanup, then reports the error.
    async fn drive_locked(&self, wf: &mut Workflow) -> Result<()> {
        let mut failure = None;
        while !wf.state.is_terminal() {
            match self.step(wf).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => {
                    error!(
                        target: "runtime::workflow",
                        actor = %wf.actor.name,
                        item = %wf.item.uuid,
                        workflow = %wf.id,
                        state = %wf.state,
                        error = %err,
                        "workflow phase failed"
                    );
                    wf.abort(err.to_string());
                    if failure.is_some() {
                        break;
                    }
                    failure = Some(err);
                }
            }
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Runs one state. Returns false when the workflow suspended.
    async fn step(&self, wf: &mut Workflow) -> Result<bool> {
        let state = wf.state;
        if wf.entered != Some(state) {
            wf.entered = Some(state);
            self.bus.publish(WorkflowEvent::StateEntered {
                workflow: wf.id,
                item: wf.item.uuid.clone(),
                state,
            });
            if let Err(veto) = self.fire(wf, ExtensionPoint::Pre(state)).await {
                if state == WorkflowState::Cleanup {
                    debug!(target: "runtime::workflow", workflow = %wf.id, %veto, "cleanup veto ignored");
                } else {
                    wf.abort(veto.to_string());
                    return Ok(true);
                }
            }
        }

        let flow = match state {
            WorkflowState::Start => self.start(wf).await?,
            WorkflowState::AwaitTemplate => match wf.template {
                Some(_) => Flow::Advance(self.route_after_start(wf)),
                None => Flow::Suspend(Continuation::Template),
            },
            WorkflowState::AwaitItemCard => match wf.card_confirmed {
                true => Flow::Advance(self.route_after_start(wf)),
                false => Flow::Suspend(Continuation::ItemCard),
            },
            WorkflowState::WaitForAttackRoll => self.attack_roll(wf).await?,
            WorkflowState::AttackRollComplete => self.attack_complete(wf).await?,
            WorkflowState::CheckHits => self.check_hits(wf).await?,
            WorkflowState::WaitForSaves => self.saves(wf).await?,
            WorkflowState::WaitForDamageRoll => self.damage_roll(wf).await?,
            WorkflowState::ApplyDamage => self.apply(wf).await?,
            WorkflowState::Cleanup => self.cleanup(wf).await,
            WorkflowState::Completed | WorkflowState::Aborted | WorkflowState::Cancelled => {
                Flow::Finish
            }
        };

        match flow {
            Flow::Advance(next) => {
                if let Err(veto) = self.fire(wf, ExtensionPoint::Post(state)).await {
                    wf.abort(veto.to_string());
                } else {
                    wf.state = next;
                }
                Ok(true)
            }
            Flow::Suspend(continuation) => {
                debug!(
                    target: "runtime::workflow",
                    workflow = %wf.id,
                    %state,
                    awaiting = continuation.name(),
                    "workflow suspended"
                );
                wf.suspended = Some(continuation);
                self.bus.publish(WorkflowEvent::Suspended {
                    workflow: wf.id,
                    awaiting: continuation,
                });
                Ok(false)
            }
            Flow::Abort(reason) => {
                info!(target: "runtime::workflow", workflow = %wf.id, %state, %reason, "workflow aborted");
                wf.abort(reason);
                Ok(true)
            }
            Flow::Finish => Ok(true),
        }
    }

    /// Fires `point` on the registered hooks, then on the item's macros.
    /// Macros are skipped once the workflow is aborted.
    async fn fire(&self, wf: &Workflow, point: ExtensionPoint) -> std::result::Result<(), HookVeto> {
        let summary = wf.summary();
        self.hooks.fire(point, &HookPayload::Workflow(&summary))?;
        if wf.aborted {
            return Ok(());
        }
        for spec in MacroSpec::for_point(&wf.item.on_use_macros, point) {
            match self.macros.run(&spec.name, point, &summary).await {
                HookOutcome::Continue => {}
                HookOutcome::Veto(reason) => {
                    return Err(HookVeto {
                        hook: spec.name,
                        point,
                        reason,
                    });
                }
                HookOutcome::Error(message) => {
                    warn!(
                        target: "runtime::hooks",
                        macro_name = %spec.name,
                        %point,
                        workflow = %wf.id,
                        item = %wf.item.uuid,
                        %message,
                        "item macro failed"
                    );
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // States
    // ========================================================================

    async fn start(&self, wf: &mut Workflow) -> Result<Flow> {
        let confirm = !wf.auto.confirm_targets && !wf.fast_forward() && !wf.item.has_template;
        if confirm && !wf.targets_confirmed {
            return Ok(Flow::Suspend(Continuation::TargetConfirmation));
        }
        if let Err(veto) = self.fire(wf, ExtensionPoint::PreTargeting).await {
            return Ok(vetoed(veto));
        }

        let mut present = Vec::with_capacity(wf.targets.len());
        for target in &wf.targets {
            if self.world.token(target).await.is_some() {
                present.push(target.clone());
            } else {
                warn!(target: "runtime::workflow", workflow = %wf.id, token = %target, "target left the scene");
            }
        }
        wf.targets = present;
        if !wf.item.has_template {
            if wf.item.requires_targets && wf.targets.is_empty() {
                return Ok(Flow::Abort("no valid targets".to_owned()));
            }
            if wf.item.single_target && wf.targets.len() > 1 {
                return Ok(Flow::Abort(format!(
                    "{} allows one target, {} selected",
                    wf.item.name,
                    wf.targets.len()
                )));
            }
        }

        if let Err(veto) = self.fire(wf, ExtensionPoint::PreItemRoll).await {
            return Ok(vetoed(veto));
        }
        Ok(Flow::Advance(self.route_after_start(wf)))
    }

    fn route_after_start(&self, wf: &Workflow) -> WorkflowState {
        if wf.item.has_template && wf.template.is_none() {
            WorkflowState::AwaitTemplate
        } else if self.config.confirm_item_card && !wf.fast_forward() && !wf.card_confirmed {
            WorkflowState::AwaitItemCard
        } else if wf.item.action_type.is_attack() {
            WorkflowState::WaitForAttackRoll
        } else {
            WorkflowState::CheckHits
        }
    }

    fn route_to_damage(wf: &Workflow) -> WorkflowState {
        if wf.has_damage() {
            WorkflowState::WaitForDamageRoll
        } else {
            WorkflowState::ApplyDamage
        }
    }

    async fn attack_roll(&self, wf: &mut Workflow) -> Result<Flow> {
        let request = match wf.attack_request.take() {
            Some(request) => request,
            None if wf.auto.attack || wf.fast_forward() => RollAttackOptions {
                mode: wf.options.roll_mode,
                keys: wf.options.keys,
            },
            None => return Ok(Flow::Suspend(Continuation::AttackRoll)),
        };
        if let Err(veto) = self.fire(wf, ExtensionPoint::PreAttackRoll).await {
            return Ok(vetoed(veto));
        }

        if !wf.item.no_reactions && !wf.targets.is_empty() {
            let client = self.client_for(wf);
            let view = wf.view();
            let contexts = wf
                .targets
                .iter()
                .map(|target| {
                    ReactionContext::new(
                        target.clone(),
                        wf.token.uuid.clone(),
                        ReactionTrigger::PreAttack,
                    )
                    .with_item(&wf.item)
                    .with_workflow(view.clone())
                })
                .collect();
            for (_, outcome) in self.broker.do_reactions_many(contexts, &client, self).await {
                outcome.record_into(&mut wf.undo);
            }
            if let Some(actor) = self.world.actor(&wf.actor.uuid).await {
                wf.actor = actor;
            }
        }

        let mut targets = Vec::with_capacity(wf.targets.len());
        for token in &wf.targets {
            if let Some((_, actor)) = self.world.token_actor(token).await {
                targets.push(actor);
            }
        }
        let flags = ActorFlags::from_actor(&wf.actor);
        let data = roll_data(&wf.actor, &wf.item);
        let view = wf.view();
        let base = ConditionContext::new()
            .actor(&wf.actor)
            .item(&wf.item)
            .workflow(&view)
            .roll_data(&data);
        let target_flags: Vec<(ActorFlags, Value)> = targets
            .iter()
            .map(|target| {
                (
                    ActorFlags::from_actor(target),
                    base.clone().target(target).to_value(),
                )
            })
            .collect();
        let grants: Vec<(&ActorFlags, &Value)> =
            target_flags.iter().map(|(target, ctx)| (target, ctx)).collect();
        // Attacker conditions see the first target.
        let ctx = match target_flags.first() {
            Some((_, ctx)) => ctx.clone(),
            None => base.to_value(),
        };
        let resolution = resolve_attack_mode(
            request.mode,
            request.keys,
            &flags,
            &grants,
            wf.item.action_type,
            wf.item.attack_ability(),
            &ctx,
        );

        let roll = self
            .roller
            .with(|roller| roll_attack(resolution.mode, &wf.item, &data, roller))
            .map_err(formula_error(error_context(wf)))?;
        let threshold = self.config.rules.critical_threshold;
        wf.is_fumble = roll.is_fumble();
        wf.is_critical = !wf.is_fumble && roll.is_critical(threshold);
        debug!(
            target: "runtime::workflow",
            workflow = %wf.id,
            total = roll.total,
            mode = ?resolution.mode,
            critical = wf.is_critical,
            fumble = wf.is_fumble,
            "attack rolled"
        );
        wf.attack_mode = resolution;
        wf.attack_roll = Some(roll);
        Ok(Flow::Advance(WorkflowState::AttackRollComplete))
    }

    async fn attack_complete(&self, wf: &mut Workflow) -> Result<Flow> {
        let Some(mut roll) = wf.attack_roll.take() else {
            return Ok(Flow::Abort("attack roll missing".to_owned()));
        };
        let client = self.client_for(wf);
        let flags = ActorFlags::from_actor(&wf.actor);
        let offers: Vec<OptionalBonus> = offerable_attack_bonuses(&flags, &roll)
            .into_iter()
            .cloned()
            .collect();
        let actor = wf.actor.clone();
        if let Some(bonus) = self
            .offer_bonus(&client, &actor, OptionalKind::Attack, roll.total_floor(), offers, &mut wf.undo)
            .await
        {
            self.apply_roll_bonus(&mut roll, &bonus, &roll_data(&actor, &wf.item));
        }
        let threshold = self.config.rules.critical_threshold;
        wf.is_fumble = roll.is_fumble();
        wf.is_critical = !wf.is_fumble && roll.is_critical(threshold);

        let mut draft = ChatCardDraft::new(
            ChatCardKind::Attack,
            wf.actor.uuid.clone(),
            format!("{} attacks with {}", wf.actor.name, wf.item.name),
        )
        .for_workflow(Some(wf.id))
        .line(format!("Attack total {}", roll.total_floor()));
        if wf.is_critical {
            draft = draft.line("Critical hit");
        } else if wf.is_fumble {
            draft = draft.line("Fumble");
        }
        for reason in wf.attack_mode.attributions() {
            draft = draft.line(reason);
        }
        wf.attack_roll = Some(roll);

        if let Err(veto) = self.fire(wf, ExtensionPoint::IsAttacked).await {
            return Ok(vetoed(veto));
        }
        let attacked = self.actors_of(&wf.targets).await;
        for mutation in self
            .damage
            .expire(&client, &attacked, SpecialDuration::IS_ATTACKED)
            .await
        {
            wf.undo.record(mutation);
        }
        self.create_card(wf, &client, draft).await;
        Ok(Flow::Advance(WorkflowState::CheckHits))
    }

    async fn check_hits(&self, wf: &mut Workflow) -> Result<Flow> {
        if !wf.item.action_type.is_attack() {
            wf.hit_targets = wf.targets.clone();
            return Ok(Flow::Advance(self.route_after_hits(wf)));
        }
        let Some(roll) = wf.attack_roll.clone() else {
            return Ok(Flow::Abort("attack roll missing".to_owned()));
        };
        let client = self.client_for(wf);
        let threshold = self.config.rules.critical_threshold;
        let flags = ActorFlags::from_actor(&wf.actor);
        let view = wf.view();

        let mut checks = BTreeMap::new();
        for token in &wf.targets {
            let Some((_, target)) = self.world.token_actor(token).await else {
                continue;
            };
            let ctx = ConditionContext::new()
                .actor(&wf.actor)
                .target(&target)
                .item(&wf.item)
                .workflow(&view)
                .to_value();
            let auto_fail = attack_auto_fails(&flags, &wf.item, wf.item.attack_ability(), &ctx);
            let ac = target.ac + wf.ac_bonus.get(token).copied().unwrap_or(0);
            checks.insert(token.clone(), (check_hit(&roll, ac, threshold, auto_fail), auto_fail));
        }

        if !wf.item.no_reactions && !checks.is_empty() {
            let contexts = checks
                .iter()
                .map(|(token, (check, _))| {
                    let trigger = if check.fumble {
                        ReactionTrigger::Fumble
                    } else if check.critical {
                        ReactionTrigger::Critical
                    } else if check.hit {
                        ReactionTrigger::Hit
                    } else {
                        ReactionTrigger::Miss
                    };
                    ReactionContext::new(token.clone(), wf.token.uuid.clone(), trigger)
                        .with_attack_total(Some(check.total))
                        .with_item(&wf.item)
                        .with_workflow(view.clone())
                })
                .collect();
            let outcomes = self.broker.do_reactions_many(contexts, &client, self).await;
            for (_, outcome) in &outcomes {
                outcome.record_into(&mut wf.undo);
            }

            // A reaction may have raised AC; re-check against fresh stats.
            for (token, outcome) in outcomes.into_iter().filter(|(_, o)| o.is_used()) {
                let bonus = {
                    let entry = wf.ac_bonus.entry(token.clone()).or_default();
                    *entry += outcome.ac_bonus();
                    *entry
                };
                let Some((_, target)) = self.world.token_actor(&token).await else {
                    continue;
                };
                if let Some((check, auto_fail)) = checks.get_mut(&token) {
                    *check = check_hit(&roll, target.ac + bonus, threshold, *auto_fail);
                }
            }
        }

        wf.hit_targets = wf
            .targets
            .iter()
            .filter(|token| checks.get(*token).is_some_and(|(check, _)| check.hit))
            .cloned()
            .collect();
        wf.hit_checks = checks
            .into_iter()
            .map(|(token, (check, _))| (token, check))
            .collect();
        debug!(
            target: "runtime::workflow",
            workflow = %wf.id,
            targets = wf.targets.len(),
            hits = wf.hit_targets.len(),
            "hits checked"
        );

        if !wf.hit_targets.is_empty() {
            if let Err(veto) = self.fire(wf, ExtensionPoint::IsHit).await {
                return Ok(vetoed(veto));
            }
            let hit = self.actors_of(&wf.hit_targets).await;
            for mutation in self.damage.expire(&client, &hit, SpecialDuration::IS_HIT).await {
                wf.undo.record(mutation);
            }
        }
        Ok(Flow::Advance(self.route_after_hits(wf)))
    }

    fn route_after_hits(&self, wf: &Workflow) -> WorkflowState {
        if wf.item.action_type.is_attack() && wf.hit_targets.is_empty() {
            WorkflowState::Cleanup
        } else if wf.item.save.is_some() && !wf.affected_targets().is_empty() {
            WorkflowState::WaitForSaves
        } else {
            Self::route_to_damage(wf)
        }
    }

    async fn saves(&self, wf: &mut Workflow) -> Result<Flow> {
        let Some(spec) = wf.item.save.clone() else {
            return Ok(Flow::Advance(Self::route_to_damage(wf)));
        };
        let client = self.client_for(wf);
        let gm = self.world.gm().await;
        let summary = wf.summary();
        let view = wf.view();
        let context = error_context(wf);
        let targets = wf.affected_targets().to_vec();

        for token in targets {
            let payload = HookPayload::Target {
                workflow: &summary,
                target: &token,
            };
            if let Err(veto) = self.hooks.fire(ExtensionPoint::PreTargetSave, &payload) {
                debug!(target: "runtime::workflow", workflow = %wf.id, %token, %veto, "save skipped");
                wf.saves.failures.insert(token);
                continue;
            }
            let Some((_, target)) = self.world.token_actor(&token).await else {
                continue;
            };
            let flags = ActorFlags::from_actor(&target);
            let ctx = ConditionContext::new()
                .actor(&target)
                .target(&wf.actor)
                .item(&wf.item)
                .workflow(&view)
                .roll_data(&target.roll_data)
                .to_value();
            let mode =
                resolve_save_mode(None, KeyModifiers::default(), &flags, spec.ability, &ctx).mode;
            let traits = SaverTraits::from_flags(&flags, spec.ability, &ctx);

            let mut roll = self
                .save_roll(&client, &target, spec.ability, mode, &gm, context.clone())
                .await?;
            let offers: Vec<OptionalBonus> =
                flags.optional_bonuses(OptionalKind::Save).cloned().collect();
            if let Some(bonus) = self
                .offer_bonus(&client, &target, OptionalKind::Save, roll.total_floor(), offers, &mut wf.undo)
                .await
            {
                self.apply_roll_bonus(&mut roll, &bonus, &target.roll_data);
            }

            let outcome = check_save(token.clone(), &roll, &spec, traits, mode);
            wf.saves.record(&outcome, traits);
            let point = if outcome.success {
                ExtensionPoint::IsSaveSuccess
            } else {
                ExtensionPoint::IsSaveFailure
            };
            let payload = HookPayload::Save {
                workflow: &summary,
                outcome: &outcome,
            };
            if let Err(veto) = self.hooks.fire(point, &payload) {
                return Ok(vetoed(veto));
            }
            wf.save_outcomes.push(outcome);
        }

        if !wf.item.no_reactions && !wf.save_outcomes.is_empty() {
            let contexts = wf
                .save_outcomes
                .iter()
                .map(|outcome| {
                    let trigger = if outcome.success {
                        ReactionTrigger::SaveSuccess
                    } else {
                        ReactionTrigger::SaveFailure
                    };
                    ReactionContext::new(outcome.token.clone(), wf.token.uuid.clone(), trigger)
                        .with_item(&wf.item)
                        .with_workflow(view.clone())
                })
                .collect();
            for (_, outcome) in self.broker.do_reactions_many(contexts, &client, self).await {
                outcome.record_into(&mut wf.undo);
            }
        }

        let rolled: Vec<TokenUuid> = wf.save_outcomes.iter().map(|o| o.token.clone()).collect();
        let savers = self.actors_of(&rolled).await;
        for mutation in self.damage.expire(&client, &savers, SpecialDuration::IS_SAVE).await {
            wf.undo.record(mutation);
        }

        let mut draft = ChatCardDraft::new(
            ChatCardKind::SaveSummary,
            wf.actor.uuid.clone(),
            format!("{} save, DC {}", spec.ability, spec.dc),
        )
        .for_workflow(Some(wf.id));
        for outcome in &wf.save_outcomes {
            let result = if outcome.success { "saved" } else { "failed" };
            draft = draft.line(format!("{}: {} ({result})", outcome.token, outcome.total));
        }
        self.create_card(wf, &client, draft).await;
        Ok(Flow::Advance(Self::route_to_damage(wf)))
    }

    /// Rolls a save at the owner's client when they are connected, locally
    /// otherwise or when the remote roll gets no answer.
    async fn save_roll(
        &self,
        client: &DelegationClient,
        target: &ActorSnapshot,
        ability: Ability,
        mode: RollMode,
        gm: &UserId,
        context: ErrorContext,
    ) -> Result<Roll> {
        if let Some(owner) = target
            .owner
            .as_ref()
            .filter(|owner| *owner != gm && self.clients.is_online(owner))
        {
            let formula = save_formula(mode, target.save_modifier(ability));
            let outcome = client
                .for_user(owner.clone())
                .call(DelegatedRequest::RollD20 { formula })
                .await
                .expect_reply(DelegatedOp::RollD20, |reply| match reply {
                    DelegationReply::Roll(roll) => Some(roll),
                    _ => None,
                });
            if let DelegationOutcome::Reply(roll) = outcome {
                return Ok(roll);
            }
            debug!(target: "runtime::workflow", actor = %target.name, "remote save roll failed, rolling locally");
        }
        self.roller
            .with(|roller| roll_save(target, ability, mode, roller))
            .map_err(formula_error(context))
    }

    async fn damage_roll(&self, wf: &mut Workflow) -> Result<Flow> {
        let request = match wf.damage_request.take() {
            Some(request) => request,
            None if wf.auto.damage || wf.fast_forward() => RollDamageOptions {
                critical: None,
                versatile: wf.options.versatile,
            },
            None => return Ok(Flow::Suspend(Continuation::DamageRoll)),
        };
        if let Err(veto) = self.fire(wf, ExtensionPoint::PreDamageRoll).await {
            return Ok(vetoed(veto));
        }

        let rules = &self.config.rules;
        let critical = request.critical.unwrap_or(wf.is_critical);
        let flags = ActorFlags::from_actor(&wf.actor);
        let options = DamageRollOptions {
            critical: critical.then_some(rules.critical_damage),
            maximize: flags.max_damage,
            minimum: flags.min_damage,
        };
        let data = roll_data(&wf.actor, &wf.item);
        let context = error_context(wf);
        let item_save = wf.item.save.as_ref().map(|save| save.on_save);
        let base_multiplier = item_save.map_or(1.0, |on_save| save_multiplier(on_save, rules));
        let rolls = wf.damage_rolls;
        wf.reset_damage();

        let mut parts = wf.item.effective_damage_parts(request.versatile);
        if let Some(ammo) = &wf.ammo {
            parts.extend(ammo.damage_parts.iter().cloned());
        }
        if !parts.is_empty() {
            let terms = build_damage_terms(&parts, &data, options);
            let roll = self
                .roller
                .with(|roller| Roll::from_terms(terms, roller))
                .map_err(formula_error(context.clone()))?;
            let detail = create_damage_detail(
                &roll,
                Some(&wf.item),
                request.versatile,
                &rules.default_damage_type,
                wf.ammo.as_ref(),
            );
            wf.damage = Some(RolledDamage {
                roll,
                detail,
                save_multiplier: base_multiplier,
            });
        }

        let other = wf
            .item
            .other
            .clone()
            .filter(|other| !other.formula.trim().is_empty() && (critical || !other.critical_only));
        if let Some(other) = other {
            let damage_type = other
                .damage_type
                .clone()
                .unwrap_or_else(|| rules.default_damage_type.clone());
            let part = DamagePart::new(other.formula.clone(), damage_type);
            let terms = build_damage_terms(std::slice::from_ref(&part), &data, options);
            let roll = self
                .roller
                .with(|roller| Roll::from_terms(terms, roller))
                .map_err(formula_error(context.clone()))?;
            let detail = create_damage_detail(&roll, None, false, &part.damage_type, None);
            wf.other_damage = Some(RolledDamage {
                roll,
                detail,
                save_multiplier: other_save_multiplier(
                    other.on_save,
                    item_save.unwrap_or_default(),
                    rules,
                ),
            });
        }

        let client = self.client_for(wf);
        let offers: Vec<OptionalBonus> = flags
            .optional_bonuses(OptionalKind::Damage)
            .filter(|bonus| !bonus.is_reroll())
            .cloned()
            .collect();
        let total = wf.damage_total().unwrap_or_default().floor() as i32;
        let actor = wf.actor.clone();
        if let Some(bonus) = self
            .offer_bonus(&client, &actor, OptionalKind::Damage, total, offers, &mut wf.undo)
            .await
            && let BonusValue::Formula(formula) = &bonus.value
        {
            let damage_type = wf
                .item
                .primary_damage_type()
                .cloned()
                .unwrap_or_else(|| rules.default_damage_type.clone());
            let part = DamagePart::new(formula.clone(), damage_type);
            let terms = build_damage_terms(std::slice::from_ref(&part), &data, options);
            match self.roller.with(|roller| Roll::from_terms(terms, roller)) {
                Ok(roll) => {
                    let detail = create_damage_detail(&roll, None, false, &part.damage_type, None);
                    wf.bonus_damage = Some(RolledDamage {
                        roll,
                        detail,
                        save_multiplier: base_multiplier,
                    });
                }
                Err(err) => {
                    warn!(target: "runtime::workflow", workflow = %wf.id, bonus = %bonus.name, error = %err, "damage bonus failed to roll");
                }
            }
        }

        wf.damage_rolls = rolls + 1;
        debug!(
            target: "runtime::workflow",
            workflow = %wf.id,
            total = ?wf.damage_total(),
            critical,
            "damage rolled"
        );
        Ok(Flow::Advance(WorkflowState::ApplyDamage))
    }

    async fn apply(&self, wf: &mut Workflow) -> Result<Flow> {
        if let Err(veto) = self.fire(wf, ExtensionPoint::PreDamageApplication).await {
            return Ok(vetoed(veto));
        }
        let client = self.client_for(wf);

        let has_save = wf.item.save.is_some();
        let groups: Vec<ApplyDamageDetail> = [
            ("base", &wf.damage),
            ("other", &wf.other_damage),
            ("bonus", &wf.bonus_damage),
        ]
        .into_iter()
        .filter_map(|(label, rolled)| {
            let rolled = rolled.as_ref()?;
            let group = ApplyDamageDetail::new(label, rolled.detail.clone());
            Some(if has_save {
                group.with_saves(
                    rolled.save_multiplier,
                    wf.saves.saves.clone(),
                    wf.saves.super_savers.clone(),
                    wf.saves.semi_super_savers.clone(),
                )
            } else {
                group
            })
        })
        .collect();

        let targets: Vec<DamageTargetRef> = wf
            .affected_targets()
            .iter()
            .map(|token| {
                let check = wf.hit_checks.get(token);
                DamageTargetRef {
                    token: token.clone(),
                    hit: check.is_none_or(|check| check.hit),
                    critical: check.is_some_and(|check| check.critical),
                }
            })
            .collect();

        if !groups.is_empty() && !targets.is_empty() {
            let request = ApplyDamageRequest {
                workflow: Some(wf.id),
                item: Some(wf.item.clone()),
                speaker: wf.actor.uuid.clone(),
                source_token: Some(wf.token.uuid.clone()),
                title: wf.item.name.clone(),
                targets,
                groups,
                existing: wf.ledger.clone(),
            };
            let summary = wf.summary();
            let mut applied = self.damage.apply(request, &summary, &client, self).await;
            let entries = std::mem::take(&mut applied.entries);
            applied.record_into(&mut wf.undo);
            for entry in entries {
                match wf.ledger.iter_mut().find(|e| e.token == entry.token) {
                    Some(existing) => *existing = entry,
                    None => wf.ledger.push(entry),
                }
            }
        }

        let recipients = self.effect_recipients(wf);
        self.apply_item_effects(wf, &client, &recipients).await;
        if wf.item.concentration {
            let caster = ConcentrationTarget {
                token: wf.token.uuid.clone(),
                actor: wf.actor.uuid.clone(),
            };
            let mut targets = Vec::new();
            for token in &recipients {
                if let Some(found) = self.world.token(token).await {
                    targets.push(ConcentrationTarget {
                        token: found.uuid,
                        actor: found.actor,
                    });
                }
            }
            let data =
                concentration_record(&wf.item.uuid, caster, targets, wf.template.as_ref());
            self.concentration
                .start(&client, &wf.actor.uuid, data, &mut wf.undo)
                .await;
        }
        Ok(Flow::Advance(WorkflowState::Cleanup))
    }

    /// Hit targets of an attack, failed savers of a save item, every target
    /// otherwise; the user when nothing was targeted.
    fn effect_recipients(&self, wf: &Workflow) -> Vec<TokenUuid> {
        if wf.targets.is_empty() {
            return vec![wf.token.uuid.clone()];
        }
        if wf.item.action_type.is_attack() {
            wf.hit_targets.clone()
        } else if wf.item.save.is_some() {
            wf.targets
                .iter()
                .filter(|token| !wf.saves.saved(token))
                .cloned()
                .collect()
        } else {
            wf.targets.clone()
        }
    }

    async fn apply_item_effects(
        &self,
        wf: &mut Workflow,
        client: &DelegationClient,
        recipients: &[TokenUuid],
    ) {
        if wf.item.effects.is_empty() {
            return;
        }
        let effects: Vec<ActiveEffect> = wf
            .item
            .effects
            .iter()
            .map(|effect| ActiveEffect {
                id: EffectId::new(format!("{}-{}", effect.id, wf.id)),
                origin: Some(wf.item.uuid.clone()),
                ..effect.clone()
            })
            .collect();
        for actor in self.actors_of(recipients).await {
            let outcome = client
                .call(DelegatedRequest::CreateEffects {
                    actor: actor.clone(),
                    effects: effects.clone(),
                })
                .await
                .expect_reply(DelegatedOp::CreateEffects, |reply| match reply {
                    DelegationReply::Created(ids) => Some(ids),
                    _ => None,
                });
            match outcome {
                DelegationOutcome::Reply(ids) if !ids.is_empty() => {
                    wf.undo.record(UndoMutation::CreatedEffects {
                        actor,
                        effects: ids,
                    });
                }
                DelegationOutcome::Reply(_) => {}
                DelegationOutcome::TimedOut | DelegationOutcome::Failed(_) => {
                    warn!(target: "runtime::workflow", workflow = %wf.id, %actor, "item effects were not applied");
                }
            }
        }
    }

    async fn cleanup(&self, wf: &mut Workflow) -> Flow {
        if wf.cleaned_up {
            return Flow::Finish;
        }
        wf.cleaned_up = true;
        wf.suspended = None;
        let end = if wf.cancelled {
            WorkflowEnd::Cancelled
        } else if wf.aborted {
            WorkflowEnd::Aborted
        } else {
            WorkflowEnd::Completed
        };
        wf.end = Some(end);
        wf.state = end.state();

        if end == WorkflowEnd::Completed && !wf.undo.is_empty() {
            self.undo.push(wf.undo.clone());
        }
        let summary = wf.summary();
        self.registry.finish(summary);
        self.bus.publish(WorkflowEvent::Finished {
            workflow: wf.id,
            item: wf.item.uuid.clone(),
            actor: wf.actor.uuid.clone(),
            end,
        });
        info!(
            target: "runtime::workflow",
            workflow = %wf.id,
            actor = %wf.actor.name,
            item = %wf.item.name,
            ?end,
            hits = wf.hit_targets.len(),
            reason = wf.abort_reason.as_deref().unwrap_or(""),
            "workflow finished"
        );
        if let Err(veto) = self
            .fire(wf, ExtensionPoint::Post(WorkflowState::Cleanup))
            .await
        {
            debug!(target: "runtime::workflow", workflow = %wf.id, %veto, "post-cleanup veto ignored");
        }
        Flow::Finish
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn actors_of(&self, tokens: &[TokenUuid]) -> Vec<ActorUuid> {
        let mut actors = Vec::with_capacity(tokens.len());
        for token in tokens {
            if let Some(found) = self.world.token(token).await
                && !actors.contains(&found.actor)
            {
                actors.push(found.actor);
            }
        }
        actors
    }

    async fn create_card(&self, wf: &mut Workflow, client: &DelegationClient, draft: ChatCardDraft) {
        let kind = draft.kind;
        let outcome = client
            .call(DelegatedRequest::CreateChatCard(draft))
            .await
            .expect_reply(DelegatedOp::CreateChatCard, |reply| match reply {
                DelegationReply::ChatCard(id) => Some(id),
                _ => None,
            });
        match outcome {
            DelegationOutcome::Reply(card) => wf.undo.record_card(card),
            DelegationOutcome::TimedOut | DelegationOutcome::Failed(_) => {
                warn!(target: "runtime::workflow", workflow = %wf.id, %kind, "chat card was not created");
            }
        }
    }

    /// Offers `options` to the actor's controller with a timeout. A taken
    /// bonus with a counter is consumed through the coordinator.
    async fn offer_bonus(
        &self,
        client: &DelegationClient,
        actor: &ActorSnapshot,
        kind: OptionalKind,
        total: i32,
        options: Vec<OptionalBonus>,
        undo: &mut UndoData,
    ) -> Option<OptionalBonus> {
        if options.is_empty() {
            return None;
        }
        let gm = self.world.gm().await;
        let dialogs = self.clients.dialogs_for(actor.owner.as_ref(), &gm);
        let request = BonusRequest {
            actor: actor.uuid.clone(),
            kind,
            total,
            options,
        };
        let chosen = match tokio::time::timeout(
            self.config.bonus_dialog_timeout(),
            dialogs.choose_bonus(&request),
        )
        .await
        {
            Ok(choice) => choice?,
            Err(_) => {
                debug!(target: "runtime::workflow", actor = %actor.name, %kind, "bonus dialog timed out");
                return None;
            }
        };
        let bonus = request.options.into_iter().find(|bonus| bonus.name == chosen)?;
        if let Some(previous) = crate::reactions::consume_bonus(client, actor, &bonus).await {
            undo.record(UndoMutation::Flag {
                actor: actor.uuid.clone(),
                key: bonus.count_key(),
                previous,
            });
        }
        debug!(target: "runtime::workflow", actor = %actor.name, bonus = %bonus.name, %kind, "optional bonus applied");
        Some(bonus)
    }

    fn apply_roll_bonus(&self, roll: &mut Roll, bonus: &OptionalBonus, data: &RollData) {
        match &bonus.value {
            BonusValue::Reroll => {
                let value = self.roller.with(|roller| roller.roll_die(20));
                roll.replace_d20(value);
            }
            BonusValue::Formula(formula) => {
                match self
                    .roller
                    .with(|roller| Roll::evaluate(formula, data, roller))
                {
                    Ok(extra) => roll.append(extra),
                    Err(err) => {
                        warn!(target: "runtime::workflow", bonus = %bonus.name, error = %err, "bonus formula failed, ignored");
                    }
                }
            }
        }
    }
}

#[async_trait]
impl ItemUser for ActionEngine {
    async fn use_item(&self, request: UseItemRequest) -> Result<WorkflowSummary> {
        self.begin(request).await
    }
}
