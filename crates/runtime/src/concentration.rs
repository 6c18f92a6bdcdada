//! Concentration bookkeeping: starting, checking after damage and breaking.

use tracing::{debug, info, warn};

use combat_core::{
    Ability, ActorFlags, ActorSnapshot, ActorUuid, ConcentrationData, ConcentrationTarget,
    ConditionContext, DamageLedgerEntry, ItemUuid, KeyModifiers, OnSave, SaveSpec, SaverTraits,
    TemplateUuid, check_save, concentration_dc, resolve_save_mode, roll_save,
};

use crate::delegation::{
    DelegatedOp, DelegatedRequest, DelegationClient, DelegationOutcome, DelegationReply,
};
use crate::dice::SharedRoller;
use crate::events::{DamageEvent, EventBus};
use crate::undo::{UndoMutation, UndoSink};
use crate::world::{ChatCardDraft, ChatCardKind, WorldStore};

/// Result of one damage-triggered check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConcentrationCheck {
    Maintained { total: i32, dc: i32 },
    Broken { dc: Option<i32> },
}

#[derive(Clone)]
pub struct ConcentrationService {
    world: WorldStore,
    bus: EventBus,
    roller: SharedRoller,
}

impl ConcentrationService {
    pub fn new(world: WorldStore, bus: EventBus, roller: SharedRoller) -> Self {
        Self { world, bus, roller }
    }

    /// Starts concentrating on `data`, breaking any previous concentration
    /// first. Both changes are recorded into `undo`.
    pub async fn start(
        &self,
        client: &DelegationClient,
        actor: &ActorUuid,
        data: ConcentrationData,
        undo: &mut impl UndoSink,
    ) {
        let Some(snapshot) = self.world.actor(actor).await else {
            return;
        };
        // What the set below overwrites: nothing once the break went through.
        let previous = match snapshot.concentration {
            Some(old) => match self.break_concentration(client, actor, undo).await {
                Some(_) => None,
                None => Some(old),
            },
            None => None,
        };

        let item = data.item.clone();
        let outcome = client
            .call(DelegatedRequest::SetConcentration {
                actor: actor.clone(),
                data,
            })
            .await;
        if !outcome.is_reply() {
            warn!(target: "runtime::workflow", %actor, %item, "could not record concentration");
            return;
        }
        debug!(target: "runtime::workflow", %actor, %item, "concentration started");
        undo.record(UndoMutation::Concentration {
            actor: actor.clone(),
            previous,
        });
    }

    /// Clears the actor's concentration and everything linked to it. The
    /// cleared record, the deleted effects and the notice card go to `undo`.
    pub async fn break_concentration(
        &self,
        client: &DelegationClient,
        actor: &ActorUuid,
        undo: &mut impl UndoSink,
    ) -> Option<ConcentrationData> {
        let outcome = client
            .call(DelegatedRequest::ClearConcentration {
                actor: actor.clone(),
            })
            .await
            .expect_reply(DelegatedOp::ClearConcentration, |reply| match reply {
                DelegationReply::ConcentrationCleared { previous, removed } => {
                    Some((previous, removed))
                }
                _ => None,
            });
        let (previous, removed) = match outcome {
            DelegationOutcome::Reply(cleared) => cleared,
            DelegationOutcome::TimedOut | DelegationOutcome::Failed(_) => {
                warn!(target: "runtime::damage", %actor, "could not clear concentration");
                return None;
            }
        };
        let data = previous?;
        info!(
            target: "runtime::damage",
            %actor,
            item = %data.item,
            removed = removed.len(),
            "concentration broken"
        );
        undo.record(UndoMutation::Concentration {
            actor: actor.clone(),
            previous: Some(data.clone()),
        });
        if !removed.is_empty() {
            undo.record(UndoMutation::DeletedEffects(removed));
        }

        let draft = ChatCardDraft::new(ChatCardKind::Concentration, actor.clone(), "Concentration")
            .line(format!("concentration on {} ended", data.item));
        let card = client
            .call(DelegatedRequest::CreateChatCard(draft))
            .await
            .expect_reply(DelegatedOp::CreateChatCard, |reply| match reply {
                DelegationReply::ChatCard(card) => Some(card),
                _ => None,
            });
        match card {
            DelegationOutcome::Reply(card) => undo.record_card(card),
            DelegationOutcome::TimedOut | DelegationOutcome::Failed(_) => {
                debug!(target: "runtime::damage", %actor, "concentration card not created");
            }
        }
        self.bus.publish(DamageEvent::ConcentrationBroken {
            actor: actor.clone(),
            item: data.item.clone(),
        });
        Some(data)
    }

    /// Checks concentration for every entry that cost hit points.
    ///
    /// Dropping to zero HP or being incapacitated breaks concentration
    /// outright; otherwise the actor saves against [`concentration_dc`].
    pub async fn check_after_damage(
        &self,
        client: &DelegationClient,
        entries: &[DamageLedgerEntry],
        undo: &mut impl UndoSink,
    ) -> Vec<(ActorUuid, ConcentrationCheck)> {
        let mut checks = Vec::new();
        for entry in entries.iter().filter(|entry| entry.was_damaged()) {
            let Some(actor) = self.world.actor(&entry.actor).await else {
                continue;
            };
            if actor.concentration.is_none() {
                continue;
            }

            let check = if entry.new_hp <= 0 || actor.is_incapacitated() {
                ConcentrationCheck::Broken { dc: None }
            } else {
                let damage = (entry.old_hp + entry.old_temp) - (entry.new_hp + entry.new_temp);
                self.save(&actor, entry, concentration_dc(damage))
            };

            if matches!(check, ConcentrationCheck::Broken { .. }) {
                self.break_concentration(client, &actor.uuid, undo).await;
            } else {
                debug!(target: "runtime::damage", actor = %actor.name, ?check, "concentration maintained");
            }
            checks.push((actor.uuid.clone(), check));
        }
        checks
    }

    fn save(&self, actor: &ActorSnapshot, entry: &DamageLedgerEntry, dc: i32) -> ConcentrationCheck {
        let flags = ActorFlags::from_actor(actor);
        let ctx = ConditionContext::new()
            .actor(actor)
            .roll_data(&actor.roll_data)
            .to_value();
        let mode = resolve_save_mode(None, KeyModifiers::default(), &flags, Ability::Con, &ctx).mode;
        let traits = SaverTraits::from_flags(&flags, Ability::Con, &ctx);
        let spec = SaveSpec {
            ability: Ability::Con,
            dc,
            on_save: OnSave::None,
        };
        match self
            .roller
            .with(|roller| roll_save(actor, Ability::Con, mode, roller))
        {
            Ok(roll) => {
                let outcome = check_save(entry.token.clone(), &roll, &spec, traits, mode);
                if outcome.success {
                    ConcentrationCheck::Maintained {
                        total: outcome.total,
                        dc,
                    }
                } else {
                    ConcentrationCheck::Broken { dc: Some(dc) }
                }
            }
            Err(error) => {
                // The save formula is built from integers; keep concentration.
                warn!(target: "runtime::damage", actor = %actor.name, %error, "concentration save failed to roll");
                ConcentrationCheck::Maintained { total: 0, dc }
            }
        }
    }
}

/// Record for a concentration item used by `caster` on `targets`.
pub fn concentration_record(
    item: &ItemUuid,
    caster: ConcentrationTarget,
    targets: impl IntoIterator<Item = ConcentrationTarget>,
    template: Option<&TemplateUuid>,
) -> ConcentrationData {
    let mut data = ConcentrationData::new(item.clone(), caster);
    for target in targets {
        data.add_target(target);
    }
    if let Some(template) = template {
        data.add_template(template.clone());
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(token: &str, actor: &str) -> ConcentrationTarget {
        ConcentrationTarget {
            token: token.into(),
            actor: actor.into(),
        }
    }

    #[test]
    fn record_keeps_caster_first_and_skips_duplicates() {
        let template = TemplateUuid::from("Template.t");
        let data = concentration_record(
            &ItemUuid::from("Item.bless"),
            target("Token.c", "Actor.c"),
            [target("Token.a", "Actor.a"), target("Token.c", "Actor.c")],
            Some(&template),
        );
        assert_eq!(data.targets.len(), 2);
        assert_eq!(data.targets[0].token.as_str(), "Token.c");
        assert_eq!(data.templates, vec![template]);
    }
}
