//! Reaction discovery, delegation and nested resolution.

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use combat_core::{
    ActorFlags, ActorSnapshot, BonusValue, ChatCardId, ConditionContext, Expression, ItemSnapshot,
    ItemUuid, OptionalBonus, OptionalKind, Roll, TokenUuid,
};

use super::{
    ReactionCandidate, ReactionChoice, ReactionContext, ReactionItemReference, ReactionOutcome,
    ReactionRequest, ReactionTrigger,
};
use crate::config::{Role, RuntimeConfig};
use crate::delegation::{
    DelegatedOp, DelegatedRequest, DelegationClient, DelegationOutcome, DelegationReply,
};
use crate::dice::SharedRoller;
use crate::events::{EventBus, ReactionEvent};
use crate::undo::UndoMutation;
use crate::workflow::{ConflictResolution, ItemSource, ItemUser, UseItemRequest, UseOptions};
use crate::world::{ChatCardDraft, ChatCardKind, REACTION_USED_FLAG, WorldStore};

/// Offers reactions to one reactor at a time, or to many in parallel.
#[derive(Clone)]
pub struct ReactionBroker {
    world: WorldStore,
    config: Arc<RuntimeConfig>,
    bus: EventBus,
    roller: SharedRoller,
}

impl ReactionBroker {
    pub fn new(
        world: WorldStore,
        config: Arc<RuntimeConfig>,
        bus: EventBus,
        roller: SharedRoller,
    ) -> Self {
        Self {
            world,
            config,
            bus,
            roller,
        }
    }

    /// Offers every context in parallel. One failed offer never cancels the
    /// others; each resolves to its own outcome.
    pub async fn do_reactions_many(
        &self,
        contexts: Vec<ReactionContext>,
        client: &DelegationClient,
        user: &dyn ItemUser,
    ) -> Vec<(TokenUuid, ReactionOutcome)> {
        let offers = contexts.into_iter().map(|ctx| async move {
            let outcome = self.do_reactions(&ctx, client, user).await;
            (ctx.target, outcome)
        });
        join_all(offers).await
    }

    /// Offers one reactor a reaction to `ctx.trigger`.
    pub async fn do_reactions(
        &self,
        ctx: &ReactionContext,
        client: &DelegationClient,
        user: &dyn ItemUser,
    ) -> ReactionOutcome {
        let Some((_, reactor)) = self.world.token_actor(&ctx.target).await else {
            debug!(target: "runtime::reactions", token = %ctx.target, "reactor token not found");
            return ReactionOutcome::NoReaction;
        };
        if reactor.is_incapacitated() {
            debug!(target: "runtime::reactions", reactor = %reactor.name, "incapacitated, no reaction");
            return ReactionOutcome::NoReaction;
        }

        let gm = self.world.gm().await;
        let role = match &reactor.owner {
            Some(owner) if *owner != gm => Role::Player,
            _ => Role::Gm,
        };
        if !self.config.auto_roll(role).reactions {
            debug!(target: "runtime::reactions", reactor = %reactor.name, %role, "reactions disabled for role");
            return ReactionOutcome::NoReaction;
        }

        let trigger_actor = self.world.token_actor(&ctx.trigger_token).await.map(|(_, a)| a);
        let candidates = self.candidates(ctx, &reactor, trigger_actor.as_ref());
        if candidates.is_empty() {
            debug!(
                target: "runtime::reactions",
                reactor = %reactor.name,
                trigger = %ctx.trigger,
                "no eligible reactions"
            );
            return ReactionOutcome::NoReaction;
        }

        let request = ReactionRequest {
            reactor: reactor.uuid.clone(),
            reactor_name: reactor.name.clone(),
            owner: reactor.owner.clone(),
            trigger: ctx.trigger,
            trigger_token: ctx.trigger_token.clone(),
            attack_total: ctx.attack_total,
            candidates: candidates.clone(),
            timeout_secs: self.config.reaction_timeout_secs,
        };
        let outcome = client
            .call_with_timeout(
                DelegatedRequest::ResolveReaction(request),
                self.config.reaction_hard_timeout(),
            )
            .await
            .expect_reply(DelegatedOp::ResolveReaction, |reply| match reply {
                DelegationReply::Reaction(choice) => Some(choice),
                _ => None,
            });

        let choice = match outcome {
            DelegationOutcome::Reply(Some(choice)) => choice,
            DelegationOutcome::Reply(None) => return ReactionOutcome::NoReaction,
            DelegationOutcome::TimedOut | DelegationOutcome::Failed(_) => {
                warn!(
                    target: "runtime::reactions",
                    reactor = %reactor.name,
                    trigger = %ctx.trigger,
                    "reaction request got no response"
                );
                return ReactionOutcome::NoResponse;
            }
        };

        match choice {
            ReactionChoice::Item(item) => {
                self.use_reaction_item(ctx, &reactor, item, &candidates, client, user)
                    .await
            }
            ReactionChoice::AcBonus(name) => self.apply_ac_bonus(&reactor, &name, client).await,
        }
    }

    /// Eligible candidates. A malformed activation condition excludes that
    /// item only.
    fn candidates(
        &self,
        ctx: &ReactionContext,
        reactor: &ActorSnapshot,
        trigger_actor: Option<&ActorSnapshot>,
    ) -> Vec<ReactionCandidate> {
        let mut candidates = Vec::new();

        if !reactor.round_usage.reaction {
            for item in reactor.items.iter().filter(|item| item.is_reaction()) {
                if self.item_answers(ctx, reactor, trigger_actor, item) {
                    candidates.push(ReactionCandidate::Item(ReactionItemReference::from_item(item)));
                }
            }
        }

        if ctx.trigger.allows_ac_bonus() {
            let flags = ActorFlags::from_actor(reactor);
            candidates.extend(
                flags
                    .optional_bonuses(OptionalKind::Ac)
                    .filter_map(|bonus| match &bonus.value {
                        BonusValue::Formula(formula) => Some(ReactionCandidate::AcBonus {
                            name: bonus.name.clone(),
                            label: bonus.label.clone(),
                            value: formula.clone(),
                        }),
                        BonusValue::Reroll => None,
                    }),
            );
        }
        candidates
    }

    fn item_answers(
        &self,
        ctx: &ReactionContext,
        reactor: &ActorSnapshot,
        trigger_actor: Option<&ActorSnapshot>,
        item: &ItemSnapshot,
    ) -> bool {
        if let Some(condition) = &item.reaction_condition {
            let mut context = ConditionContext::new()
                .actor(reactor)
                .reaction(ctx.trigger.marker())
                .roll_data(&item.roll_data);
            if let Some(trigger_actor) = trigger_actor {
                context = context.target(trigger_actor);
            }
            if let Some(source) = &ctx.item {
                context = context.item(source);
            }
            if let Some(view) = &ctx.workflow {
                context = context.workflow(view);
            }
            return match Expression::parse(condition)
                .and_then(|expr| expr.evaluate_bool(&context.to_value()))
            {
                Ok(answers) => answers,
                Err(error) => {
                    warn!(
                        target: "runtime::reactions",
                        actor = %reactor.name,
                        item = %item.uuid,
                        condition = %condition,
                        %error,
                        "reaction condition failed, skipping item"
                    );
                    false
                }
            };
        }

        let declared = match item.reaction_trigger.as_deref() {
            Some(declared) => match ReactionTrigger::parse_declared(declared) {
                Some(trigger) => trigger,
                None => {
                    warn!(
                        target: "runtime::reactions",
                        actor = %reactor.name,
                        item = %item.uuid,
                        declared,
                        "unknown reaction trigger, skipping item"
                    );
                    return false;
                }
            },
            None => ReactionTrigger::Hit,
        };
        ctx.trigger.matches(declared)
    }

    async fn use_reaction_item(
        &self,
        ctx: &ReactionContext,
        reactor: &ActorSnapshot,
        item: ItemUuid,
        candidates: &[ReactionCandidate],
        client: &DelegationClient,
        user: &dyn ItemUser,
    ) -> ReactionOutcome {
        let offered = candidates
            .iter()
            .any(|candidate| matches!(candidate, ReactionCandidate::Item(r) if r.uuid == item));
        if !offered {
            warn!(
                target: "runtime::reactions",
                actor = %reactor.name,
                %item,
                "chosen reaction was not offered, ignoring"
            );
            return ReactionOutcome::NoResponse;
        }

        // Spent before the nested use so its own triggers cannot offer this
        // reactor a second reaction.
        let spent = client
            .call(DelegatedRequest::SetFlag {
                actor: reactor.uuid.clone(),
                key: REACTION_USED_FLAG.to_owned(),
                value: "1".to_owned(),
            })
            .await;
        if !spent.is_reply() {
            warn!(target: "runtime::reactions", actor = %reactor.name, "could not mark reaction as used");
        }

        let gm = self.world.gm().await;
        let request = UseItemRequest {
            actor: reactor.uuid.clone(),
            item: ItemSource::Owned(item.clone()),
            user: reactor.owner.clone().unwrap_or(gm),
            targets: vec![ctx.trigger_token.clone()],
            options: UseOptions {
                conflict: Some(ConflictResolution::Discard),
                fast_forward: true,
                ..UseOptions::default()
            },
        };
        let summary = match user.use_item(request).await {
            Ok(summary) => summary,
            Err(error) => {
                warn!(
                    target: "runtime::reactions",
                    actor = %reactor.name,
                    %item,
                    %error,
                    "nested reaction workflow failed"
                );
                return ReactionOutcome::NoResponse;
            }
        };

        info!(
            target: "runtime::reactions",
            actor = %reactor.name,
            %item,
            trigger = %ctx.trigger,
            "reaction used"
        );
        let card = reaction_card(
            client,
            reactor,
            format!("{} reacts with {}", reactor.name, summary.item_name),
        )
        .await;
        self.bus.publish(ReactionEvent::Used {
            reactor: reactor.uuid.clone(),
            item: item.clone(),
            trigger: ctx.trigger,
            against: Some(ctx.trigger_token.clone()),
        });
        ReactionOutcome::Used {
            item,
            summary: Box::new(summary),
            card,
        }
    }

    async fn apply_ac_bonus(
        &self,
        reactor: &ActorSnapshot,
        name: &str,
        client: &DelegationClient,
    ) -> ReactionOutcome {
        let flags = ActorFlags::from_actor(reactor);
        let Some(bonus) = flags
            .optional_bonuses(OptionalKind::Ac)
            .find(|bonus| bonus.name == name)
            .cloned()
        else {
            warn!(target: "runtime::reactions", actor = %reactor.name, name, "unknown AC bonus chosen");
            return ReactionOutcome::NoResponse;
        };
        let BonusValue::Formula(formula) = &bonus.value else {
            return ReactionOutcome::NoResponse;
        };

        let value = match self
            .roller
            .with(|roller| Roll::evaluate(formula, &reactor.roll_data, roller))
        {
            Ok(roll) => roll.total_floor(),
            Err(error) => {
                warn!(
                    target: "runtime::reactions",
                    actor = %reactor.name,
                    name,
                    %error,
                    "AC bonus formula failed, no bonus"
                );
                return ReactionOutcome::NoResponse;
            }
        };

        let consumed = consume_bonus(client, reactor, &bonus)
            .await
            .map(|previous| UndoMutation::Flag {
                actor: reactor.uuid.clone(),
                key: bonus.count_key(),
                previous,
            });
        let card = reaction_card(
            client,
            reactor,
            format!("{} gains +{value} AC from {}", reactor.name, bonus.label),
        )
        .await;
        self.bus.publish(ReactionEvent::AcBonus {
            reactor: reactor.uuid.clone(),
            name: bonus.name.clone(),
            value,
        });
        ReactionOutcome::AcBonus {
            name: bonus.name,
            value,
            card,
            consumed,
        }
    }
}

async fn reaction_card(
    client: &DelegationClient,
    reactor: &ActorSnapshot,
    line: String,
) -> Option<ChatCardId> {
    let draft = ChatCardDraft::new(ChatCardKind::Reaction, reactor.uuid.clone(), "Reaction").line(line);
    let outcome = client
        .call(DelegatedRequest::CreateChatCard(draft))
        .await
        .expect_reply(DelegatedOp::CreateChatCard, |reply| match reply {
            DelegationReply::ChatCard(card) => Some(card),
            _ => None,
        });
    match outcome {
        DelegationOutcome::Reply(card) => Some(card),
        DelegationOutcome::TimedOut | DelegationOutcome::Failed(_) => {
            debug!(target: "runtime::reactions", actor = %reactor.name, "reaction card not created");
            None
        }
    }
}

/// Decrements a counted bonus through the coordinator. Returns the previous
/// counter value when one was written.
pub(crate) async fn consume_bonus(
    client: &DelegationClient,
    actor: &ActorSnapshot,
    bonus: &OptionalBonus,
) -> Option<Option<String>> {
    let count = bonus.count?;
    let outcome = client
        .call(DelegatedRequest::SetFlag {
            actor: actor.uuid.clone(),
            key: bonus.count_key(),
            value: count.saturating_sub(1).to_string(),
        })
        .await
        .expect_reply(DelegatedOp::SetFlag, |reply| match reply {
            DelegationReply::FlagPrevious(previous) => Some(previous),
            _ => None,
        });
    match outcome {
        DelegationOutcome::Reply(previous) => Some(previous),
        DelegationOutcome::TimedOut | DelegationOutcome::Failed(_) => {
            warn!(
                target: "runtime::reactions",
                actor = %actor.name,
                bonus = %bonus.name,
                "could not decrement optional bonus"
            );
            None
        }
    }
}
