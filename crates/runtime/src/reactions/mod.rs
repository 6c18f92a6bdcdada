//! Reactions: interrupting item uses and AC bonuses offered to other actors
//! while a workflow runs.
//!
//! [`ReactionBroker`] discovers the candidates on one reactor, asks the
//! reactor's controller to pick one through the `resolve-reaction`
//! delegated operation and runs the chosen item as a nested workflow.

mod broker;

pub use broker::ReactionBroker;

pub(crate) use broker::consume_bonus;

use serde::{Deserialize, Serialize};

use combat_core::{
    ActorUuid, ChatCardId, ItemSnapshot, ItemUuid, TokenUuid, UserId, WorkflowView,
};

use crate::undo::{UndoMutation, UndoSink};
use crate::workflow::WorkflowSummary;

/// What happened to the reactor.
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
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum ReactionTrigger {
    Hit,
    Miss,
    Critical,
    Fumble,
    Damaged,
    Healed,
    Attacked,
    PreAttack,
    Saved,
    SaveSuccess,
    SaveFailure,
    Moved,
}

impl ReactionTrigger {
    /// Marker name condition expressions see as `reaction`.
    pub fn marker(self) -> &'static str {
        match self {
            Self::Hit => "isHit",
            Self::Miss => "isMissed",
            Self::Critical => "isCriticalHit",
            Self::Fumble => "isFumble",
            Self::Damaged => "isDamaged",
            Self::Healed => "isHealed",
            Self::Attacked => "isAttacked",
            Self::PreAttack => "isPreAttacked",
            Self::Saved => "isSave",
            Self::SaveSuccess => "isSaveSuccess",
            Self::SaveFailure => "isSaveFailure",
            Self::Moved => "isMoved",
        }
    }

    pub fn from_marker(marker: &str) -> Option<Self> {
        use strum::IntoEnumIterator;
        Self::iter().find(|trigger| trigger.marker().eq_ignore_ascii_case(marker.trim()))
    }

    /// Parses an item's declared trigger, as a marker or a kebab-case name.
    pub fn parse_declared(value: &str) -> Option<Self> {
        Self::from_marker(value).or_else(|| value.trim().parse().ok())
    }

    /// Whether an item declared for `declared` answers this trigger.
    ///
    /// `attacked` answers every attack result, `saved` both save results
    /// and `hit` also answers critical hits.
    pub fn matches(self, declared: Self) -> bool {
        if self == declared {
            return true;
        }
        match declared {
            Self::Attacked => matches!(self, Self::Hit | Self::Miss | Self::Critical | Self::Fumble),
            Self::Saved => matches!(self, Self::SaveSuccess | Self::SaveFailure),
            Self::Hit => self == Self::Critical,
            _ => false,
        }
    }

    /// AC bonuses can only turn an ordinary hit into a miss.
    pub fn allows_ac_bonus(self) -> bool {
        self == Self::Hit
    }

    pub fn is_attack_result(self) -> bool {
        matches!(self, Self::Hit | Self::Miss | Self::Critical | Self::Fumble)
    }
}

/// Immutable description of a reaction item sent across the delegation
/// boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionItemReference {
    pub item_name: String,
    pub item_id: String,
    pub action_name: String,
    pub img: String,
    pub id: String,
    pub uuid: ItemUuid,
}

impl ReactionItemReference {
    pub fn from_item(item: &ItemSnapshot) -> Self {
        let id = item
            .uuid
            .as_str()
            .rsplit('.')
            .next()
            .unwrap_or(item.uuid.as_str())
            .to_owned();
        Self {
            item_name: item.name.clone(),
            item_id: id.clone(),
            action_name: item.name.clone(),
            img: item.img.clone(),
            id,
            uuid: item.uuid.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ReactionCandidate {
    Item(ReactionItemReference),
    AcBonus {
        name: String,
        label: String,
        /// Bonus formula.
        value: String,
    },
}

/// Sent to the reactor's controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionRequest {
    pub reactor: ActorUuid,
    pub reactor_name: String,
    pub owner: Option<UserId>,
    pub trigger: ReactionTrigger,
    pub trigger_token: TokenUuid,
    pub attack_total: Option<i32>,
    pub candidates: Vec<ReactionCandidate>,
    /// How long the dialog stays open.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum ReactionChoice {
    Item(ItemUuid),
    AcBonus(String),
}

/// Result of one broker request.
#[derive(Debug, Clone)]
pub enum ReactionOutcome {
    /// Nothing eligible, or the controller declined.
    NoReaction,
    /// The request timed out or failed; the workflow continues without it.
    NoResponse,
    Used {
        item: ItemUuid,
        summary: Box<WorkflowSummary>,
        card: Option<ChatCardId>,
    },
    AcBonus {
        name: String,
        value: i32,
        card: Option<ChatCardId>,
        /// Previous value of the bonus counter, when one was decremented.
        consumed: Option<UndoMutation>,
    },
}

impl ReactionOutcome {
    pub fn is_used(&self) -> bool {
        matches!(self, Self::Used { .. } | Self::AcBonus { .. })
    }

    pub fn ac_bonus(&self) -> i32 {
        match self {
            Self::AcBonus { value, .. } => *value,
            _ => 0,
        }
    }

    /// Records what the reaction left behind in the triggering workflow.
    /// The nested item use keeps its own undo record.
    pub fn record_into(&self, undo: &mut impl UndoSink) {
        match self {
            Self::Used { card, .. } => {
                if let Some(card) = card {
                    undo.record_card(card.clone());
                }
            }
            Self::AcBonus { card, consumed, .. } => {
                if let Some(mutation) = consumed {
                    undo.record(mutation.clone());
                }
                if let Some(card) = card {
                    undo.record_card(card.clone());
                }
            }
            Self::NoReaction | Self::NoResponse => {}
        }
    }
}

/// One reactor and the trigger it is offered a reaction for.
#[derive(Debug, Clone)]
pub struct ReactionContext {
    /// Token of the actor that may react.
    pub target: TokenUuid,
    /// Token whose action triggered the reaction.
    pub trigger_token: TokenUuid,
    pub trigger: ReactionTrigger,
    pub attack_total: Option<i32>,
    /// Item of the triggering workflow.
    pub item: Option<ItemSnapshot>,
    pub workflow: Option<WorkflowView>,
}

impl ReactionContext {
    pub fn new(target: TokenUuid, trigger_token: TokenUuid, trigger: ReactionTrigger) -> Self {
        Self {
            target,
            trigger_token,
            trigger,
            attack_total: None,
            item: None,
            workflow: None,
        }
    }

    pub fn with_attack_total(mut self, total: Option<i32>) -> Self {
        self.attack_total = total;
        self
    }

    pub fn with_item(mut self, item: &ItemSnapshot) -> Self {
        self.item = Some(item.clone());
        self
    }

    pub fn with_workflow(mut self, view: WorkflowView) -> Self {
        self.workflow = Some(view);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_triggers_cover_their_family() {
        assert!(ReactionTrigger::Critical.matches(ReactionTrigger::Hit));
        assert!(ReactionTrigger::Fumble.matches(ReactionTrigger::Attacked));
        assert!(ReactionTrigger::SaveFailure.matches(ReactionTrigger::Saved));
        assert!(!ReactionTrigger::Hit.matches(ReactionTrigger::Critical));
        assert!(!ReactionTrigger::Damaged.matches(ReactionTrigger::Attacked));
    }

    #[test]
    fn declared_triggers_parse_from_markers_and_names() {
        assert_eq!(ReactionTrigger::parse_declared("isHit"), Some(ReactionTrigger::Hit));
        assert_eq!(ReactionTrigger::parse_declared("pre-attack"), Some(ReactionTrigger::PreAttack));
        assert_eq!(ReactionTrigger::parse_declared("whenever"), None);
        assert_eq!(ReactionTrigger::SaveFailure.to_string(), "save-failure");
    }

    #[test]
    fn item_reference_uses_the_last_uuid_segment_as_id() {
        let item = ItemSnapshot::new("Actor.a.Item.shield", "Shield", combat_core::ActionType::Util);
        let reference = ReactionItemReference::from_item(&item);
        assert_eq!(reference.id, "shield");
        let json = serde_json::to_value(&reference).unwrap();
        assert_eq!(json["itemName"], "Shield");
    }
}
