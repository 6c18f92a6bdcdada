//! Overtime effects: damage and saves that repeat at turn boundaries.
//!
//! Each matching effect is replayed as a one-shot item in a nested workflow
//! against the effect's owner, with everything rolled automatically.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use combat_core::{ActorUuid, ConditionContext, EffectId, OvertimeSpec, TurnPhase};

use crate::api::Result;
use crate::delegation::{
    DelegatedOp, DelegatedRequest, DelegationClient, DelegationOutcome, DelegationReply, EffectRef,
};
use crate::workflow::{
    ConflictResolution, ItemSource, ItemUser, UseItemRequest, UseOptions, WorkflowSummary,
};
use crate::world::WorldStore;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum OvertimeOutcome {
    /// `removeCondition` held; the effect was deleted without acting.
    Removed,
    Applied {
        summary: Box<WorkflowSummary>,
        saved: bool,
        removed: bool,
    },
    Skipped(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OvertimeRun {
    pub effect: EffectId,
    pub outcome: OvertimeOutcome,
}

/// Everything one turn boundary did to one actor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OvertimeReport {
    pub actor: ActorUuid,
    pub runs: Vec<OvertimeRun>,
}

impl OvertimeReport {
    pub fn empty(actor: ActorUuid) -> Self {
        Self {
            actor,
            runs: Vec::new(),
        }
    }

    pub fn removed(&self) -> impl Iterator<Item = &EffectId> {
        self.runs.iter().filter_map(|run| match run.outcome {
            OvertimeOutcome::Removed
            | OvertimeOutcome::Applied {
                removed: true, ..
            } => Some(&run.effect),
            _ => None,
        })
    }
}

/// Runs `actor`'s overtime effects for `phase`.
pub(crate) async fn run(
    world: &WorldStore,
    client: &DelegationClient,
    user: &dyn ItemUser,
    actor: &ActorUuid,
    phase: TurnPhase,
) -> Result<OvertimeReport> {
    let mut report = OvertimeReport::empty(actor.clone());
    let Some(snapshot) = world.actor(actor).await else {
        return Ok(report);
    };
    let Some(token) = world.token_for_actor(actor).await else {
        debug!(target: "runtime::workflow", %actor, "no token, overtime skipped");
        return Ok(report);
    };
    let gm = world.gm().await;

    for effect in snapshot.effects.iter().filter(|effect| !effect.disabled) {
        for raw in effect.overtime_specs() {
            let spec = match OvertimeSpec::parse(raw) {
                Ok(spec) => spec,
                Err(error) => {
                    warn!(target: "runtime::workflow", actor = %snapshot.name, effect = %effect.id, %error, "malformed overtime effect");
                    report.runs.push(OvertimeRun {
                        effect: effect.id.clone(),
                        outcome: OvertimeOutcome::Skipped(error.to_string()),
                    });
                    continue;
                }
            };
            if spec.turn != phase {
                continue;
            }

            // Re-read: an earlier run this turn may have changed the actor.
            let current = world.actor(actor).await.unwrap_or_else(|| snapshot.clone());
            let ctx = ConditionContext::new()
                .actor(&current)
                .target(&current)
                .roll_data(&current.roll_data)
                .to_value();

            let outcome = if spec.should_remove(&ctx) {
                match delete_effect(client, actor, &effect.id).await {
                    true => OvertimeOutcome::Removed,
                    false => OvertimeOutcome::Skipped("effect could not be deleted".to_owned()),
                }
            } else {
                let dc = if spec.action_save {
                    None
                } else {
                    spec.resolve_dc(&ctx)
                };
                let request = UseItemRequest {
                    actor: actor.clone(),
                    item: ItemSource::Synthetic(Box::new(spec.to_item(effect, dc))),
                    user: gm.clone(),
                    targets: vec![token.uuid.clone()],
                    options: UseOptions {
                        fast_forward: true,
                        conflict: Some(ConflictResolution::Discard),
                        ..UseOptions::default()
                    },
                };
                match user.use_item(request).await {
                    Ok(summary) => {
                        let saved = summary.saves.saved(&token.uuid);
                        let removed = spec.save_remove
                            && saved
                            && !spec.action_save
                            && delete_effect(client, actor, &effect.id).await;
                        OvertimeOutcome::Applied {
                            summary: Box::new(summary),
                            saved,
                            removed,
                        }
                    }
                    Err(error) => {
                        warn!(
                            target: "runtime::workflow",
                            actor = %snapshot.name,
                            effect = %effect.id,
                            %error,
                            "overtime workflow failed"
                        );
                        OvertimeOutcome::Skipped(error.to_string())
                    }
                }
            };
            report.runs.push(OvertimeRun {
                effect: effect.id.clone(),
                outcome,
            });
        }
    }

    if !report.runs.is_empty() {
        info!(
            target: "runtime::workflow",
            actor = %snapshot.name,
            %phase,
            runs = report.runs.len(),
            removed = report.removed().count(),
            "overtime effects processed"
        );
    }
    Ok(report)
}

async fn delete_effect(client: &DelegationClient, actor: &ActorUuid, effect: &EffectId) -> bool {
    let outcome = client
        .call(DelegatedRequest::DeleteEffects(vec![EffectRef {
            actor: actor.clone(),
            effect: effect.clone(),
        }]))
        .await
        .expect_reply(DelegatedOp::DeleteEffects, |reply| match reply {
            DelegationReply::Effects(removed) => Some(!removed.is_empty()),
            _ => None,
        });
    matches!(outcome, DelegationOutcome::Reply(true))
}
