use serde::{Deserialize, Serialize};

use combat_core::{
    ActorUuid, ChatCardId, DamageLedgerEntry, EffectId, ItemUuid, SpecialDuration, TokenUuid,
    WorkflowId,
};

use crate::reactions::ReactionTrigger;
use crate::workflow::{Continuation, WorkflowEnd, WorkflowState};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkflowEvent {
    StateEntered {
        workflow: WorkflowId,
        item: ItemUuid,
        state: WorkflowState,
    },
    Suspended {
        workflow: WorkflowId,
        awaiting: Continuation,
    },
    /// Emitted once, after cleanup.
    Finished {
        workflow: WorkflowId,
        item: ItemUuid,
        actor: ActorUuid,
        end: WorkflowEnd,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DamageEvent {
    /// One persisted batch.
    Applied {
        workflow: Option<WorkflowId>,
        card: Option<ChatCardId>,
        entries: Vec<DamageLedgerEntry>,
    },
    EffectsExpired {
        actor: ActorUuid,
        reason: SpecialDuration,
        effects: Vec<EffectId>,
    },
    ConcentrationBroken {
        actor: ActorUuid,
        item: ItemUuid,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReactionEvent {
    Used {
        reactor: ActorUuid,
        item: ItemUuid,
        trigger: ReactionTrigger,
        against: Option<TokenUuid>,
    },
    AcBonus {
        reactor: ActorUuid,
        name: String,
        value: i32,
    },
}
