//! Operation catalogue: stable keys, typed requests and replies.

use serde::{Deserialize, Serialize};

use combat_core::{
    ActiveEffect, ActorUuid, ChatCardId, ConcentrationData, DamageLedgerEntry, EffectId, Roll,
    TokenUuid, TurnPhase, UserId, WorkflowId,
};

use crate::overtime::OvertimeReport;
use crate::reactions::{ReactionChoice, ReactionRequest};
use crate::workflow::{UseItemRequest, WorkflowSummary};
use crate::world::ChatCardDraft;

/// Stable operation keys, as they appear on the wire.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum DelegatedOp {
    PersistDamageLedger,
    CreateChatCard,
    DeleteChatCards,
    DeleteEffects,
    UpdateEffects,
    CreateEffects,
    SetFlag,
    UnsetFlag,
    MoveToken,
    ResolveReaction,
    RunOvertime,
    CompleteItemUse,
    #[strum(serialize = "roll-d20")]
    #[serde(rename = "roll-d20")]
    RollD20,
    SetConcentration,
    ClearConcentration,
}

/// Identity of one logical request, stable across redelivery.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId {
    pub user: UserId,
    pub seq: u64,
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.user, self.seq)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EffectRef {
    pub actor: ActorUuid,
    pub effect: EffectId,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "op", content = "args", rename_all = "kebab-case")]
pub enum DelegatedRequest {
    /// Writes HP and temp-HP for every entry; `title` also records a ledger card.
    PersistDamageLedger {
        workflow: Option<WorkflowId>,
        speaker: ActorUuid,
        title: Option<String>,
        entries: Vec<DamageLedgerEntry>,
    },
    CreateChatCard(ChatCardDraft),
    DeleteChatCards(Vec<ChatCardId>),
    DeleteEffects(Vec<EffectRef>),
    UpdateEffects {
        actor: ActorUuid,
        effects: Vec<ActiveEffect>,
    },
    CreateEffects {
        actor: ActorUuid,
        effects: Vec<ActiveEffect>,
    },
    SetFlag {
        actor: ActorUuid,
        key: String,
        value: String,
    },
    UnsetFlag {
        actor: ActorUuid,
        key: String,
    },
    MoveToken {
        token: TokenUuid,
        x: i32,
        y: i32,
    },
    ResolveReaction(ReactionRequest),
    RunOvertime {
        actor: ActorUuid,
        phase: TurnPhase,
    },
    CompleteItemUse(UseItemRequest),
    RollD20 {
        formula: String,
    },
    SetConcentration {
        actor: ActorUuid,
        data: ConcentrationData,
    },
    ClearConcentration {
        actor: ActorUuid,
    },
}

impl DelegatedRequest {
    pub fn op(&self) -> DelegatedOp {
        match self {
            Self::PersistDamageLedger { .. } => DelegatedOp::PersistDamageLedger,
            Self::CreateChatCard(_) => DelegatedOp::CreateChatCard,
            Self::DeleteChatCards(_) => DelegatedOp::DeleteChatCards,
            Self::DeleteEffects(_) => DelegatedOp::DeleteEffects,
            Self::UpdateEffects { .. } => DelegatedOp::UpdateEffects,
            Self::CreateEffects { .. } => DelegatedOp::CreateEffects,
            Self::SetFlag { .. } => DelegatedOp::SetFlag,
            Self::UnsetFlag { .. } => DelegatedOp::UnsetFlag,
            Self::MoveToken { .. } => DelegatedOp::MoveToken,
            Self::ResolveReaction(_) => DelegatedOp::ResolveReaction,
            Self::RunOvertime { .. } => DelegatedOp::RunOvertime,
            Self::CompleteItemUse(_) => DelegatedOp::CompleteItemUse,
            Self::RollD20 { .. } => DelegatedOp::RollD20,
            Self::SetConcentration { .. } => DelegatedOp::SetConcentration,
            Self::ClearConcentration { .. } => DelegatedOp::ClearConcentration,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "reply", content = "value", rename_all = "kebab-case")]
pub enum DelegationReply {
    Ack,
    ChatCard(ChatCardId),
    Ledger {
        written: usize,
        card: Option<ChatCardId>,
    },
    Deleted(usize),
    /// Effects removed or replaced, with their owners, for undo.
    Effects(Vec<(ActorUuid, ActiveEffect)>),
    Created(Vec<EffectId>),
    FlagPrevious(Option<String>),
    Reaction(Option<ReactionChoice>),
    Overtime(OvertimeReport),
    ItemUse(Box<WorkflowSummary>),
    Roll(Roll),
    Concentration(Option<ConcentrationData>),
    /// The cleared record and the linked effects deleted with it.
    ConcentrationCleared {
        previous: Option<ConcentrationData>,
        removed: Vec<(ActorUuid, ActiveEffect)>,
    },
}

impl DelegationReply {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::ChatCard(_) => "chat-card",
            Self::Ledger { .. } => "ledger",
            Self::Deleted(_) => "deleted",
            Self::Effects(_) => "effects",
            Self::Created(_) => "created",
            Self::FlagPrevious(_) => "flag-previous",
            Self::Reaction(_) => "reaction",
            Self::Overtime(_) => "overtime",
            Self::ItemUse(_) => "item-use",
            Self::Roll(_) => "roll",
            Self::Concentration(_) => "concentration",
            Self::ConcentrationCleared { .. } => "concentration-cleared",
        }
    }
}
