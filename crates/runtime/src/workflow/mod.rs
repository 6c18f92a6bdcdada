//! Action resolution workflow.
//!
//! One workflow per in-flight item use, driven through
//! [`WorkflowState`] by the [`ActionEngine`]. A workflow that needs outside
//! input records a [`Continuation`] and returns; the matching entry point
//! (`un_suspend`, `roll_attack`, `roll_damage`) resumes it where it stopped.
//!
//! ```text
//! Start → AwaitTemplate? → AwaitItemCard? → WaitForAttackRoll → AttackRollComplete
//!       → CheckHits → WaitForSaves? → WaitForDamageRoll → ApplyDamage → Cleanup → Completed
//! ```
//!
//! Any non-terminal state may abort or cancel; both route through `Cleanup`.

mod damage;
mod engine;
mod instance;
mod registry;

pub use damage::{ApplyDamageRequest, DamageApplication, DamageTargetRef};
pub use engine::ActionEngine;
pub use registry::WorkflowRegistry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use combat_core::{
    ActorUuid, DamageLedgerEntry, ItemSnapshot, ItemUuid, KeyModifiers, RollMode, SaveResults,
    TemplateUuid, TokenUuid, UserId, WorkflowId,
};

use crate::api::Result;

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
    Serialize,
    Deserialize,
)]
pub enum WorkflowState {
    Start,
    AwaitTemplate,
    AwaitItemCard,
    WaitForAttackRoll,
    AttackRollComplete,
    CheckHits,
    WaitForSaves,
    WaitForDamageRoll,
    ApplyDamage,
    Cleanup,
    Completed,
    Aborted,
    Cancelled,
}

impl WorkflowState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Cancelled)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowEnd {
    Completed,
    Aborted,
    Cancelled,
}

impl WorkflowEnd {
    pub fn state(self) -> WorkflowState {
        match self {
            Self::Completed => WorkflowState::Completed,
            Self::Aborted => WorkflowState::Aborted,
            Self::Cancelled => WorkflowState::Cancelled,
        }
    }
}

/// What a suspended workflow is waiting for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Continuation {
    Template,
    ItemCard,
    AttackRoll,
    DamageRoll,
    TargetConfirmation,
}

impl Continuation {
    pub fn name(self) -> &'static str {
        match self {
            Self::Template => "template placement",
            Self::ItemCard => "item card confirmation",
            Self::AttackRoll => "attack roll",
            Self::DamageRoll => "damage roll",
            Self::TargetConfirmation => "target confirmation",
        }
    }
}

/// External input that resumes a suspended workflow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResumePayload {
    /// Tokens inside the template replace the target set when non-empty.
    TemplatePlaced {
        template: TemplateUuid,
        targets: Vec<TokenUuid>,
    },
    ItemCardConfirmed,
    TargetsConfirmed(Vec<TokenUuid>),
}

impl ResumePayload {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TemplatePlaced { .. } => "template placement",
            Self::ItemCardConfirmed => "item card confirmation",
            Self::TargetsConfirmed(_) => "target confirmation",
        }
    }

    pub fn continuation(&self) -> Continuation {
        match self {
            Self::TemplatePlaced { .. } => Continuation::Template,
            Self::ItemCardConfirmed => Continuation::ItemCard,
            Self::TargetsConfirmed(_) => Continuation::TargetConfirmation,
        }
    }
}

/// How to treat a live workflow already holding the item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictResolution {
    /// Finish the previous use with everything automated.
    Complete,
    /// Abort the previous use.
    Discard,
    /// Abort the previous use and reverse the item's latest completed use.
    Undo,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ItemSource {
    /// An item the actor carries.
    Owned(ItemUuid),
    /// A one-shot item built by the engine (overtime effects).
    Synthetic(Box<ItemSnapshot>),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UseOptions {
    pub conflict: Option<ConflictResolution>,
    pub roll_mode: Option<RollMode>,
    pub keys: KeyModifiers,
    pub versatile: bool,
    /// Skip every confirmation and roll everything straight away.
    pub fast_forward: bool,
    pub ammo: Option<ItemUuid>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UseItemRequest {
    pub actor: ActorUuid,
    pub item: ItemSource,
    pub user: UserId,
    pub targets: Vec<TokenUuid>,
    #[serde(default)]
    pub options: UseOptions,
}

impl UseItemRequest {
    pub fn new(actor: ActorUuid, item: ItemUuid, user: UserId) -> Self {
        Self {
            actor,
            item: ItemSource::Owned(item),
            user,
            targets: Vec::new(),
            options: UseOptions::default(),
        }
    }

    pub fn with_targets(mut self, targets: impl IntoIterator<Item = TokenUuid>) -> Self {
        self.targets = targets.into_iter().collect();
        self
    }

    pub fn with_options(mut self, options: UseOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollAttackOptions {
    pub mode: Option<RollMode>,
    pub keys: KeyModifiers,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollDamageOptions {
    /// Overrides the attack's critical result.
    pub critical: Option<bool>,
    pub versatile: bool,
}

/// Outward view of a workflow.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub id: WorkflowId,
    pub actor: ActorUuid,
    pub item: ItemUuid,
    pub item_name: String,
    pub state: WorkflowState,
    pub end: Option<WorkflowEnd>,
    pub targets: Vec<TokenUuid>,
    pub hit_targets: Vec<TokenUuid>,
    pub is_critical: bool,
    pub is_fumble: bool,
    pub attack_total: Option<i32>,
    pub damage_total: Option<i32>,
    pub saves: SaveResults,
    pub ledger: Vec<DamageLedgerEntry>,
    pub suspended: Option<Continuation>,
    /// Why advantage or disadvantage applied to the attack.
    pub attributions: Vec<String>,
    pub abort_reason: Option<String>,
}

impl WorkflowSummary {
    pub fn empty(id: WorkflowId, actor: ActorUuid, item: ItemUuid, state: WorkflowState) -> Self {
        Self {
            id,
            actor,
            item,
            item_name: String::new(),
            state,
            end: None,
            targets: Vec::new(),
            hit_targets: Vec::new(),
            is_critical: false,
            is_fumble: false,
            attack_total: None,
            damage_total: None,
            saves: SaveResults::default(),
            ledger: Vec::new(),
            suspended: None,
            attributions: Vec::new(),
            abort_reason: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.end.is_some()
    }
}

/// Starts item uses. The reaction broker and the overtime processor run
/// their nested workflows through this seam.
#[async_trait]
pub trait ItemUser: Send + Sync {
    async fn use_item(&self, request: UseItemRequest) -> Result<WorkflowSummary>;
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn states_parse_from_their_display_names() {
        use strum::IntoEnumIterator;
        for state in WorkflowState::iter() {
            assert_eq!(WorkflowState::from_str(&state.to_string()), Ok(state));
        }
        assert!(WorkflowState::Cancelled.is_terminal());
        assert!(!WorkflowState::Cleanup.is_terminal());
    }

    #[test]
    fn resume_payloads_name_their_continuation() {
        let payload = ResumePayload::TargetsConfirmed(Vec::new());
        assert_eq!(payload.continuation(), Continuation::TargetConfirmation);
        assert_eq!(payload.name(), Continuation::TargetConfirmation.name());
    }
}
