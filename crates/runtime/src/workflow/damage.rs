//! Damage application: hooks, damaged reactions, per-target math, one
//! batched ledger write, then expiry and concentration.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use combat_core::{
    ActorSnapshot, ActorUuid, ApplyDamageDetail, ChatCardId, DamageLedgerEntry, DamageTarget,
    ItemSnapshot, SpecialDuration, TokenSnapshot, TokenUuid, WorkflowId, compute_damage_many,
};

use super::{ItemUser, WorkflowSummary};
use crate::concentration::ConcentrationService;
use crate::config::RuntimeConfig;
use crate::delegation::{
    DelegatedOp, DelegatedRequest, DelegationClient, DelegationOutcome, DelegationReply, EffectRef,
};
use crate::events::{DamageEvent, EventBus};
use crate::hooks::{ExtensionPoint, HookPayload, HookRegistry};
use crate::reactions::{ReactionBroker, ReactionContext, ReactionOutcome, ReactionTrigger};
use crate::undo::{UndoMutation, UndoSink};
use crate::world::WorldStore;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageTargetRef {
    pub token: TokenUuid,
    pub hit: bool,
    pub critical: bool,
}

impl DamageTargetRef {
    pub fn hit(token: TokenUuid) -> Self {
        Self {
            token,
            hit: true,
            critical: false,
        }
    }
}

/// One application call against many targets.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApplyDamageRequest {
    pub workflow: Option<WorkflowId>,
    pub item: Option<ItemSnapshot>,
    /// Actor the ledger card speaks for.
    pub speaker: ActorUuid,
    /// Token that caused the damage; damaged reactions are aimed at it.
    pub source_token: Option<TokenUuid>,
    pub title: String,
    pub targets: Vec<DamageTargetRef>,
    pub groups: Vec<ApplyDamageDetail>,
    /// Entries returned by an earlier call for the same damage.
    #[serde(default)]
    pub existing: Vec<DamageLedgerEntry>,
}

impl ApplyDamageRequest {
    pub fn new(speaker: ActorUuid, title: impl Into<String>) -> Self {
        Self {
            workflow: None,
            item: None,
            speaker,
            source_token: None,
            title: title.into(),
            targets: Vec::new(),
            groups: Vec::new(),
            existing: Vec::new(),
        }
    }

    pub fn with_targets(mut self, targets: impl IntoIterator<Item = DamageTargetRef>) -> Self {
        self.targets = targets.into_iter().collect();
        self
    }

    pub fn with_group(mut self, group: ApplyDamageDetail) -> Self {
        self.groups.push(group);
        self
    }

    pub fn with_existing(mut self, existing: Vec<DamageLedgerEntry>) -> Self {
        self.existing = existing;
        self
    }

    /// Pre-reduction total of the lines that hurt.
    fn harmful_total(&self) -> f64 {
        self.groups
            .iter()
            .flat_map(|group| group.damage_detail.iter())
            .filter(|line| !line.damage_type.is_restorative())
            .map(|line| line.damage)
            .sum()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DamageApplication {
    pub entries: Vec<DamageLedgerEntry>,
    pub card: Option<ChatCardId>,
    /// Reaction and concentration cards posted along the way.
    pub notices: Vec<ChatCardId>,
    /// False when the ledger write got no reply.
    pub persisted: bool,
    pub mutations: Vec<UndoMutation>,
}

impl DamageApplication {
    /// Moves every card and mutation into `undo`.
    pub fn record_into(self, undo: &mut impl UndoSink) {
        for card in self.card.into_iter().chain(self.notices) {
            undo.record_card(card);
        }
        for mutation in self.mutations {
            undo.record(mutation);
        }
    }
}

impl UndoSink for DamageApplication {
    fn record(&mut self, mutation: UndoMutation) {
        self.mutations.push(mutation);
    }

    fn record_card(&mut self, card: ChatCardId) {
        self.notices.push(card);
    }
}

/// The aggregation pipeline shared by workflows and direct applications.
#[derive(Clone)]
pub(crate) struct DamagePipeline {
    world: WorldStore,
    config: Arc<RuntimeConfig>,
    bus: EventBus,
    hooks: HookRegistry,
    broker: ReactionBroker,
    concentration: ConcentrationService,
}

impl DamagePipeline {
    pub fn new(
        world: WorldStore,
        config: Arc<RuntimeConfig>,
        bus: EventBus,
        hooks: HookRegistry,
        broker: ReactionBroker,
        concentration: ConcentrationService,
    ) -> Self {
        Self {
            world,
            config,
            bus,
            hooks,
            broker,
            concentration,
        }
    }

    pub async fn apply(
        &self,
        request: ApplyDamageRequest,
        summary: &WorkflowSummary,
        client: &DelegationClient,
        user: &dyn ItemUser,
    ) -> DamageApplication {
        let mut application = DamageApplication::default();

        // Per-target interception; a veto leaves that target untouched.
        let mut targets = Vec::with_capacity(request.targets.len());
        for target in &request.targets {
            let payload = HookPayload::Target {
                workflow: summary,
                target: &target.token,
            };
            match self
                .hooks
                .fire(ExtensionPoint::PreTargetDamageApplication, &payload)
            {
                Ok(()) => targets.push(target.clone()),
                Err(veto) => {
                    debug!(target: "runtime::damage", token = %target.token, %veto, "target skipped");
                }
            }
        }

        for (_, outcome) in self.damaged_reactions(&request, &targets, client, user).await {
            outcome.record_into(&mut application);
        }

        // Reactions may have changed the targets; read them fresh.
        let mut resolved: Vec<(TokenSnapshot, ActorSnapshot, &DamageTargetRef)> = Vec::new();
        for target in &targets {
            match self.world.token_actor(&target.token).await {
                Some((token, actor)) => resolved.push((token, actor, target)),
                None => warn!(target: "runtime::damage", token = %target.token, "damage target not found"),
            }
        }
        let damage_targets: Vec<DamageTarget<'_>> = resolved
            .iter()
            .map(|(token, actor, target)| DamageTarget {
                token,
                actor,
                hit: target.hit,
                critical: target.critical,
            })
            .collect();
        let computed = compute_damage_many(
            &damage_targets,
            &request.groups,
            request.item.as_ref(),
            &self.config.rules,
            &request.existing,
        );

        let mut entries = Vec::with_capacity(computed.len());
        for entry in computed {
            if self.entry_allowed(summary, &entry) {
                entries.push(entry);
            }
        }
        if entries.is_empty() {
            return application;
        }

        let outcome = client
            .call(DelegatedRequest::PersistDamageLedger {
                workflow: request.workflow,
                speaker: request.speaker.clone(),
                title: Some(request.title.clone()),
                entries: entries.clone(),
            })
            .await
            .expect_reply(DelegatedOp::PersistDamageLedger, |reply| match reply {
                DelegationReply::Ledger { card, .. } => Some(card),
                _ => None,
            });
        match outcome {
            DelegationOutcome::Reply(card) => {
                application.persisted = true;
                application.card = card;
                application.mutations.push(UndoMutation::Damage(entries.clone()));
            }
            DelegationOutcome::TimedOut | DelegationOutcome::Failed(_) => {
                warn!(
                    target: "runtime::damage",
                    workflow = ?request.workflow,
                    speaker = %request.speaker,
                    targets = entries.len(),
                    "damage ledger was not persisted"
                );
                application.entries = entries;
                return application;
            }
        }

        info!(
            target: "runtime::damage",
            workflow = ?request.workflow,
            targets = entries.len(),
            applied = entries.iter().map(|e| e.applied_damage).sum::<i32>(),
            "damage applied"
        );
        self.bus.publish(DamageEvent::Applied {
            workflow: request.workflow,
            card: application.card.clone(),
            entries: entries.clone(),
        });

        let damaged: Vec<ActorUuid> = entries
            .iter()
            .filter(|entry| entry.was_damaged())
            .map(|entry| entry.actor.clone())
            .collect();
        let healed: Vec<ActorUuid> = entries
            .iter()
            .filter(|entry| entry.was_healed())
            .map(|entry| entry.actor.clone())
            .collect();
        application.mutations.extend(
            self.expire(client, &damaged, SpecialDuration::IS_DAMAGED)
                .await,
        );
        application.mutations.extend(
            self.expire(client, &healed, SpecialDuration::IS_HEALED)
                .await,
        );

        self.concentration
            .check_after_damage(client, &entries, &mut application)
            .await;

        application.entries = entries;
        application
    }

    /// Runs the damaged/healed hooks for one entry; a veto drops it.
    fn entry_allowed(&self, summary: &WorkflowSummary, entry: &DamageLedgerEntry) -> bool {
        let payload = HookPayload::Damage {
            workflow: summary,
            entry,
        };
        let points = [
            (entry.was_damaged(), ExtensionPoint::IsDamaged),
            (entry.was_healed(), ExtensionPoint::IsHealed),
        ];
        for (_, point) in points.iter().filter(|(applies, _)| *applies) {
            if let Err(veto) = self.hooks.fire(*point, &payload) {
                debug!(target: "runtime::damage", token = %entry.token, %veto, "ledger entry dropped");
                return false;
            }
        }
        true
    }

    async fn damaged_reactions(
        &self,
        request: &ApplyDamageRequest,
        targets: &[DamageTargetRef],
        client: &DelegationClient,
        user: &dyn ItemUser,
    ) -> Vec<(TokenUuid, ReactionOutcome)> {
        let Some(source) = &request.source_token else {
            return Vec::new();
        };
        let suppressed = request.item.as_ref().is_some_and(|item| item.no_reactions);
        if suppressed || request.harmful_total() <= 0.0 {
            return Vec::new();
        }
        let contexts: Vec<ReactionContext> = targets
            .iter()
            .filter(|target| target.hit && target.token != *source)
            .map(|target| {
                let ctx = ReactionContext::new(
                    target.token.clone(),
                    source.clone(),
                    ReactionTrigger::Damaged,
                );
                match &request.item {
                    Some(item) => ctx.with_item(item),
                    None => ctx,
                }
            })
            .collect();
        if contexts.is_empty() {
            return Vec::new();
        }
        self.broker.do_reactions_many(contexts, client, user).await
    }

    /// Deletes effects on `actors` that end on `reason`.
    pub async fn expire(
        &self,
        client: &DelegationClient,
        actors: &[ActorUuid],
        reason: SpecialDuration,
    ) -> Vec<UndoMutation> {
        let mut mutations = Vec::new();
        for actor_id in actors {
            let Some(actor) = self.world.actor(actor_id).await else {
                continue;
            };
            let refs: Vec<EffectRef> = actor
                .effects
                .iter()
                .filter(|effect| effect.expires_on(reason))
                .map(|effect| EffectRef {
                    actor: actor.uuid.clone(),
                    effect: effect.id.clone(),
                })
                .collect();
            if refs.is_empty() {
                continue;
            }

            let outcome = client
                .call(DelegatedRequest::DeleteEffects(refs))
                .await
                .expect_reply(DelegatedOp::DeleteEffects, |reply| match reply {
                    DelegationReply::Effects(removed) => Some(removed),
                    _ => None,
                });
            let DelegationOutcome::Reply(removed) = outcome else {
                warn!(target: "runtime::damage", actor = %actor.name, ?reason, "expired effects were not deleted");
                continue;
            };
            if removed.is_empty() {
                continue;
            }
            debug!(target: "runtime::damage", actor = %actor.name, ?reason, count = removed.len(), "effects expired");
            self.bus.publish(DamageEvent::EffectsExpired {
                actor: actor.uuid.clone(),
                reason,
                effects: removed.iter().map(|(_, effect)| effect.id.clone()).collect(),
            });
            mutations.push(UndoMutation::DeletedEffects(removed));
        }
        mutations
    }
}
