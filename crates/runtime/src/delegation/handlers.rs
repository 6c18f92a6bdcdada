//! Coordinator-side handlers, one per group of operation keys.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use combat_core::{DocumentRef, Roll, RollData};

use super::ops::{DelegatedOp, DelegatedRequest, DelegationReply, RequestId};
use crate::dialogs::ClientDirectory;
use crate::dice::SharedRoller;
use crate::workflow::ActionEngine;
use crate::world::{ChatCardDraft, ChatCardKind, WorldStore};

pub type HandlerResult = Result<DelegationReply, HandlerError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("no handler registered for {0}")]
    NoHandler(DelegatedOp),

    #[error("{op} failed: {message}")]
    Failed { op: DelegatedOp, message: String },

    #[error("{op} rejected: {reason}")]
    Rejected { op: DelegatedOp, reason: String },
}

/// Executes delegated operations on the coordinator.
///
/// Handlers must tolerate the same request arriving more than once.
#[async_trait]
pub trait DelegationHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Operation keys this handler serves.
    fn handles(&self) -> &'static [DelegatedOp];

    async fn handle(&self, id: &RequestId, request: DelegatedRequest) -> HandlerResult;
}

/// Operation key to handler routing table.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    routes: HashMap<DelegatedOp, Arc<dyn DelegationHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes every key the handler declares to it; later registrations win.
    pub fn register(&mut self, handler: Arc<dyn DelegationHandler>) -> &mut Self {
        for op in handler.handles() {
            if let Some(previous) = self.routes.insert(*op, Arc::clone(&handler)) {
                debug!(
                    target: "runtime::delegation",
                    %op,
                    previous = previous.name(),
                    handler = handler.name(),
                    "handler replaced"
                );
            }
        }
        self
    }

    pub fn with(mut self, handler: Arc<dyn DelegationHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn handler_for(&self, op: DelegatedOp) -> Option<&'static str> {
        self.routes.get(&op).map(|handler| handler.name())
    }

    pub async fn execute(&self, id: &RequestId, request: DelegatedRequest) -> HandlerResult {
        let op = request.op();
        let Some(handler) = self.routes.get(&op) else {
            warn!(target: "runtime::delegation", %op, request = %id, "no handler for operation");
            return Err(HandlerError::NoHandler(op));
        };
        debug!(target: "runtime::delegation", %op, request = %id, handler = handler.name(), "executing");
        handler.handle(id, request).await
    }
}

// ============================================================================
// World documents
// ============================================================================

/// Document writes: ledger, chat cards, effects, flags, tokens, concentration.
pub struct WorldHandler {
    world: WorldStore,
}

impl WorldHandler {
    pub fn new(world: WorldStore) -> Self {
        Self { world }
    }

    async fn clear_concentration(&self, actor: &combat_core::ActorUuid) -> DelegationReply {
        let previous = self.world.set_concentration(actor, None).await;
        let mut removed = Vec::new();
        if let Some(data) = &previous {
            // Effects the item put on every concentrating target go as well.
            let mut linked: Vec<DocumentRef> = Vec::new();
            for target in &data.targets {
                let Some(snapshot) = self.world.actor(&target.actor).await else {
                    continue;
                };
                linked.extend(
                    snapshot
                        .effects
                        .iter()
                        .filter(|effect| effect.origin.as_ref() == Some(&data.item))
                        .map(|effect| DocumentRef::Effect {
                            actor: target.actor.clone(),
                            effect: effect.id.clone(),
                        }),
                );
            }
            linked.extend(data.remove_on_break.iter().cloned());
            removed = self.world.delete_documents(&linked).await;
            self.world.delete_templates(&data.templates).await;
        }
        DelegationReply::ConcentrationCleared { previous, removed }
    }
}

#[async_trait]
impl DelegationHandler for WorldHandler {
    fn name(&self) -> &'static str {
        "world"
    }

    fn handles(&self) -> &'static [DelegatedOp] {
        &[
            DelegatedOp::PersistDamageLedger,
            DelegatedOp::CreateChatCard,
            DelegatedOp::DeleteChatCards,
            DelegatedOp::DeleteEffects,
            DelegatedOp::UpdateEffects,
            DelegatedOp::CreateEffects,
            DelegatedOp::SetFlag,
            DelegatedOp::UnsetFlag,
            DelegatedOp::MoveToken,
            DelegatedOp::SetConcentration,
            DelegatedOp::ClearConcentration,
        ]
    }

    async fn handle(&self, _id: &RequestId, request: DelegatedRequest) -> HandlerResult {
        let op = request.op();
        let reply = match request {
            DelegatedRequest::PersistDamageLedger {
                workflow,
                speaker,
                title,
                entries,
            } => {
                let written = self.world.write_ledger(&entries).await;
                let card = match title {
                    Some(title) => {
                        let mut draft = ChatCardDraft::new(ChatCardKind::DamageLedger, speaker, title)
                            .for_workflow(workflow);
                        for entry in &entries {
                            draft = draft.line(format!(
                                "{}: {} -> {} hp, temp {} -> {}",
                                entry.name, entry.old_hp, entry.new_hp, entry.old_temp, entry.new_temp
                            ));
                        }
                        draft.ledger = entries;
                        Some(self.world.create_chat_card(draft).await)
                    }
                    None => None,
                };
                DelegationReply::Ledger { written, card }
            }
            DelegatedRequest::CreateChatCard(draft) => {
                DelegationReply::ChatCard(self.world.create_chat_card(draft).await)
            }
            DelegatedRequest::DeleteChatCards(ids) => {
                DelegationReply::Deleted(self.world.delete_chat_cards(&ids).await)
            }
            DelegatedRequest::DeleteEffects(refs) => {
                let refs: Vec<_> = refs.into_iter().map(|r| (r.actor, r.effect)).collect();
                DelegationReply::Effects(self.world.delete_effects(&refs).await)
            }
            DelegatedRequest::UpdateEffects { actor, effects } => {
                let previous = self.world.update_effects(&actor, effects).await;
                DelegationReply::Effects(
                    previous
                        .into_iter()
                        .map(|effect| (actor.clone(), effect))
                        .collect(),
                )
            }
            DelegatedRequest::CreateEffects { actor, effects } => {
                if self.world.actor(&actor).await.is_none() {
                    return Err(HandlerError::Rejected {
                        op,
                        reason: format!("unknown actor {actor}"),
                    });
                }
                DelegationReply::Created(self.world.create_effects(&actor, effects).await)
            }
            DelegatedRequest::SetFlag { actor, key, value } => {
                DelegationReply::FlagPrevious(self.world.set_flag(&actor, &key, Some(value)).await)
            }
            DelegatedRequest::UnsetFlag { actor, key } => {
                DelegationReply::FlagPrevious(self.world.set_flag(&actor, &key, None).await)
            }
            DelegatedRequest::MoveToken { token, x, y } => {
                if !self.world.move_token(&token, (x, y)).await {
                    return Err(HandlerError::Rejected {
                        op,
                        reason: format!("unknown token {token}"),
                    });
                }
                DelegationReply::Ack
            }
            DelegatedRequest::SetConcentration { actor, data } => {
                DelegationReply::Concentration(self.world.set_concentration(&actor, Some(data)).await)
            }
            DelegatedRequest::ClearConcentration { actor } => self.clear_concentration(&actor).await,
            other => return Err(HandlerError::NoHandler(other.op())),
        };
        Ok(reply)
    }
}

// ============================================================================
// Reaction choices
// ============================================================================

/// Presents a reaction request to the reactor's controller, or to the
/// coordinator when the controller is offline.
pub struct ReactionHandler {
    clients: ClientDirectory,
    world: WorldStore,
    dialog_timeout: Duration,
}

impl ReactionHandler {
    pub fn new(clients: ClientDirectory, world: WorldStore, dialog_timeout: Duration) -> Self {
        Self {
            clients,
            world,
            dialog_timeout,
        }
    }
}

#[async_trait]
impl DelegationHandler for ReactionHandler {
    fn name(&self) -> &'static str {
        "reaction"
    }

    fn handles(&self) -> &'static [DelegatedOp] {
        &[DelegatedOp::ResolveReaction]
    }

    async fn handle(&self, id: &RequestId, request: DelegatedRequest) -> HandlerResult {
        let DelegatedRequest::ResolveReaction(request) = request else {
            return Err(HandlerError::NoHandler(DelegatedOp::ResolveReaction));
        };
        let gm = self.world.gm().await;
        let dialogs = self.clients.dialogs_for(request.owner.as_ref(), &gm);
        match tokio::time::timeout(self.dialog_timeout, dialogs.choose_reaction(&request)).await {
            Ok(choice) => Ok(DelegationReply::Reaction(choice)),
            Err(_) => {
                debug!(
                    target: "runtime::reactions",
                    request = %id,
                    reactor = %request.reactor,
                    "reaction dialog timed out"
                );
                Ok(DelegationReply::Reaction(None))
            }
        }
    }
}

// ============================================================================
// Remote rolls
// ============================================================================

/// Rolls d20 formulas on behalf of a remote user.
pub struct RollHandler {
    roller: SharedRoller,
}

impl RollHandler {
    pub fn new(roller: SharedRoller) -> Self {
        Self { roller }
    }
}

#[async_trait]
impl DelegationHandler for RollHandler {
    fn name(&self) -> &'static str {
        "roll"
    }

    fn handles(&self) -> &'static [DelegatedOp] {
        &[DelegatedOp::RollD20]
    }

    async fn handle(&self, _id: &RequestId, request: DelegatedRequest) -> HandlerResult {
        let DelegatedRequest::RollD20 { formula } = request else {
            return Err(HandlerError::NoHandler(DelegatedOp::RollD20));
        };
        self.roller
            .with(|roller| Roll::evaluate(&formula, &RollData::new(), roller))
            .map(DelegationReply::Roll)
            .map_err(|error| HandlerError::Failed {
                op: DelegatedOp::RollD20,
                message: error.to_string(),
            })
    }
}

// ============================================================================
// Engine-backed operations
// ============================================================================

/// Runs item uses and overtime effects on the coordinator's engine.
///
/// Holds the engine weakly: the engine owns the delegation client, and the
/// handler must not keep it alive past shutdown.
pub struct EngineHandler {
    engine: Weak<ActionEngine>,
}

impl EngineHandler {
    pub fn new(engine: Weak<ActionEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl DelegationHandler for EngineHandler {
    fn name(&self) -> &'static str {
        "engine"
    }

    fn handles(&self) -> &'static [DelegatedOp] {
        &[DelegatedOp::RunOvertime, DelegatedOp::CompleteItemUse]
    }

    async fn handle(&self, _id: &RequestId, request: DelegatedRequest) -> HandlerResult {
        let op = request.op();
        let Some(engine) = self.engine.upgrade() else {
            return Err(HandlerError::Failed {
                op,
                message: "engine stopped".to_owned(),
            });
        };
        let failed = |error: crate::api::RuntimeError| HandlerError::Failed {
            op,
            message: error.to_string(),
        };
        match request {
            DelegatedRequest::RunOvertime { actor, phase } => engine
                .run_overtime(&actor, phase)
                .await
                .map(DelegationReply::Overtime)
                .map_err(failed),
            DelegatedRequest::CompleteItemUse(request) => engine
                .run_item_use(request)
                .await
                .map(|summary| DelegationReply::ItemUse(Box::new(summary)))
                .map_err(failed),
            other => Err(HandlerError::NoHandler(other.op())),
        }
    }
}

#[cfg(test)]
mod tests {
    use combat_core::{
        ActorUuid, DamageLedgerEntry, HitPoints, TokenUuid, UserId,
        ActorSnapshot,
    };

    use super::*;
    use crate::world::World;

    fn id(seq: u64) -> RequestId {
        RequestId {
            user: UserId::from("player"),
            seq,
        }
    }

    fn world() -> WorldStore {
        WorldStore::new(
            World::new("gm").with_actor(ActorSnapshot::new("Actor.a", "Aldric", HitPoints::new(20, 20), 14)),
        )
    }

    #[tokio::test]
    async fn missing_route_is_reported() {
        let registry = HandlerRegistry::new();
        let result = registry
            .execute(&id(1), DelegatedRequest::RollD20 { formula: "1d20".into() })
            .await;
        assert_eq!(result.unwrap_err(), HandlerError::NoHandler(DelegatedOp::RollD20));
    }

    #[tokio::test]
    async fn ledger_write_is_idempotent_and_titled_batches_get_a_card() {
        let world = world();
        let registry = HandlerRegistry::new().with(Arc::new(WorldHandler::new(world.clone())));
        let entry = DamageLedgerEntry {
            token: TokenUuid::from("Token.a"),
            actor: ActorUuid::from("Actor.a"),
            name: "Aldric".into(),
            old_hp: 20,
            new_hp: 13,
            old_temp: 0,
            new_temp: 0,
            total_damage: 7,
            applied_damage: 7,
            details: Vec::new(),
            hit: true,
            critical: false,
        };
        let request = || DelegatedRequest::PersistDamageLedger {
            workflow: None,
            speaker: ActorUuid::from("Actor.a"),
            title: None,
            entries: vec![entry.clone()],
        };

        for seq in 1..=2 {
            let reply = registry.execute(&id(seq), request()).await.unwrap();
            assert!(matches!(reply, DelegationReply::Ledger { written: 1, card: None }));
        }
        let actor = world.actor(&ActorUuid::from("Actor.a")).await.unwrap();
        assert_eq!(actor.hp.value, 13);
        assert_eq!(world.chat_len().await, 0);

        let titled = DelegatedRequest::PersistDamageLedger {
            workflow: None,
            speaker: ActorUuid::from("Actor.a"),
            title: Some("Fire Bolt".into()),
            entries: vec![entry],
        };
        let reply = registry.execute(&id(3), titled).await.unwrap();
        assert!(matches!(reply, DelegationReply::Ledger { card: Some(_), .. }));
        assert_eq!(world.chat_len().await, 1);
    }

    #[tokio::test]
    async fn moving_an_unknown_token_is_rejected() {
        let registry = HandlerRegistry::new().with(Arc::new(WorldHandler::new(world())));
        let result = registry
            .execute(
                &id(1),
                DelegatedRequest::MoveToken {
                    token: TokenUuid::from("Token.nope"),
                    x: 0,
                    y: 0,
                },
            )
            .await;
        assert!(matches!(result, Err(HandlerError::Rejected { op: DelegatedOp::MoveToken, .. })));
    }

    #[tokio::test]
    async fn remote_d20_rolls_use_the_shared_roller() {
        let roller = SharedRoller::new(combat_core::ScriptedRoller::new([17]));
        let registry = HandlerRegistry::new().with(Arc::new(RollHandler::new(roller)));
        let reply = registry
            .execute(&id(1), DelegatedRequest::RollD20 { formula: "1d20 + 2".into() })
            .await
            .unwrap();
        let DelegationReply::Roll(roll) = reply else {
            panic!("expected a roll");
        };
        assert_eq!(roll.total, 19.0);
    }
}
