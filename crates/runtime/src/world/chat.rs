//! Coordinator-owned chat cards: the persisted attack, damage and save
//! records of a workflow.

use serde::{Deserialize, Serialize};

use combat_core::{ActorUuid, ChatCardId, DamageLedgerEntry, WorkflowId};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ChatCardKind {
    Attack,
    DamageLedger,
    SaveSummary,
    Reaction,
    Concentration,
}

/// A chat card as submitted to the coordinator; it assigns the id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatCardDraft {
    pub kind: ChatCardKind,
    pub workflow: Option<WorkflowId>,
    pub speaker: ActorUuid,
    pub title: String,
    #[serde(default)]
    pub lines: Vec<String>,
    #[serde(default)]
    pub ledger: Vec<DamageLedgerEntry>,
}

impl ChatCardDraft {
    pub fn new(kind: ChatCardKind, speaker: ActorUuid, title: impl Into<String>) -> Self {
        Self {
            kind,
            workflow: None,
            speaker,
            title: title.into(),
            lines: Vec::new(),
            ledger: Vec::new(),
        }
    }

    pub fn for_workflow(mut self, workflow: Option<WorkflowId>) -> Self {
        self.workflow = workflow;
        self
    }

    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatCard {
    pub id: ChatCardId,
    #[serde(flatten)]
    pub draft: ChatCardDraft,
}
