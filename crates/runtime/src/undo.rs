//! Undo records and the bounded undo queue.
//!
//! Every completed workflow leaves an [`UndoData`] record naming the chat
//! cards it produced and the document mutations it performed. Undoing pops
//! the most recent record and reverses its mutations newest-first through
//! the coordinator. Reversal is best-effort: a step that fails is logged and
//! skipped, and the record is consumed either way.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use combat_core::{
    ActiveEffect, ActorUuid, ChatCardId, ConcentrationData, DamageLedgerEntry, EffectId, ItemUuid,
    UserId, WorkflowId,
};

use crate::delegation::{DelegatedRequest, DelegationClient, DelegationOutcome, EffectRef};

/// One reversible document change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum UndoMutation {
    /// HP and temp-HP written from these entries.
    Damage(Vec<DamageLedgerEntry>),
    CreatedEffects {
        actor: ActorUuid,
        effects: Vec<EffectId>,
    },
    DeletedEffects(Vec<(ActorUuid, ActiveEffect)>),
    Flag {
        actor: ActorUuid,
        key: String,
        previous: Option<String>,
    },
    Concentration {
        actor: ActorUuid,
        previous: Option<ConcentrationData>,
    },
}

impl UndoMutation {
    fn reversal(&self, speaker: &ActorUuid) -> DelegatedRequest {
        match self {
            Self::Damage(entries) => DelegatedRequest::PersistDamageLedger {
                workflow: None,
                speaker: speaker.clone(),
                title: None,
                entries: entries.iter().map(invert_entry).collect(),
            },
            Self::CreatedEffects { actor, effects } => DelegatedRequest::DeleteEffects(
                effects
                    .iter()
                    .map(|effect| EffectRef {
                        actor: actor.clone(),
                        effect: effect.clone(),
                    })
                    .collect(),
            ),
            Self::DeletedEffects(removed) => {
                // `split` leaves one owner per record.
                let actor = removed
                    .first()
                    .map_or_else(|| speaker.clone(), |(actor, _)| actor.clone());
                DelegatedRequest::CreateEffects {
                    actor,
                    effects: removed.iter().map(|(_, effect)| effect.clone()).collect(),
                }
            }
            Self::Flag {
                actor,
                key,
                previous: Some(value),
            } => DelegatedRequest::SetFlag {
                actor: actor.clone(),
                key: key.clone(),
                value: value.clone(),
            },
            Self::Flag {
                actor,
                key,
                previous: None,
            } => DelegatedRequest::UnsetFlag {
                actor: actor.clone(),
                key: key.clone(),
            },
            Self::Concentration {
                actor,
                previous: Some(data),
            } => DelegatedRequest::SetConcentration {
                actor: actor.clone(),
                data: data.clone(),
            },
            Self::Concentration {
                actor,
                previous: None,
            } => DelegatedRequest::ClearConcentration {
                actor: actor.clone(),
            },
        }
    }

    /// Splits deleted effects per owner so each restore targets one actor.
    fn split(self) -> Vec<Self> {
        match self {
            Self::DeletedEffects(removed) => {
                let mut groups: Vec<(ActorUuid, Vec<(ActorUuid, ActiveEffect)>)> = Vec::new();
                for (actor, effect) in removed {
                    match groups.iter_mut().find(|(owner, _)| *owner == actor) {
                        Some((_, group)) => group.push((actor, effect)),
                        None => groups.push((actor.clone(), vec![(actor, effect)])),
                    }
                }
                groups
                    .into_iter()
                    .map(|(_, group)| Self::DeletedEffects(group))
                    .collect()
            }
            other => vec![other],
        }
    }
}

/// The entry that writes a ledger entry's old values back.
fn invert_entry(entry: &DamageLedgerEntry) -> DamageLedgerEntry {
    DamageLedgerEntry {
        old_hp: entry.new_hp,
        new_hp: entry.old_hp,
        old_temp: entry.new_temp,
        new_temp: entry.old_temp,
        total_damage: -entry.total_damage,
        applied_damage: -entry.applied_damage,
        ..entry.clone()
    }
}

/// Collects reversible changes as they happen.
pub trait UndoSink {
    fn record(&mut self, mutation: UndoMutation);
    fn record_card(&mut self, card: ChatCardId);
}

/// Reversal record of one workflow.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UndoData {
    pub workflow: WorkflowId,
    pub actor: ActorUuid,
    pub item: ItemUuid,
    pub user: UserId,
    pub chat_cards: Vec<ChatCardId>,
    /// In the order they were performed.
    pub mutations: Vec<UndoMutation>,
}

impl UndoData {
    pub fn new(workflow: WorkflowId, actor: ActorUuid, item: ItemUuid, user: UserId) -> Self {
        Self {
            workflow,
            actor,
            item,
            user,
            chat_cards: Vec::new(),
            mutations: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chat_cards.is_empty() && self.mutations.is_empty()
    }

    /// Reverses every mutation newest-first, then deletes the chat cards.
    pub async fn reverse(self, client: &DelegationClient) -> UndoReport {
        let mut report = UndoReport {
            workflow: self.workflow,
            item: self.item.clone(),
            reversed: 0,
            failed: 0,
        };

        let steps = self
            .mutations
            .into_iter()
            .rev()
            .flat_map(UndoMutation::split)
            .map(|mutation| mutation.reversal(&self.actor));
        let cards = (!self.chat_cards.is_empty())
            .then(|| DelegatedRequest::DeleteChatCards(self.chat_cards.clone()));

        for request in steps.chain(cards) {
            let op = request.op();
            match client.call(request).await {
                DelegationOutcome::Reply(_) => {
                    debug!(target: "runtime::workflow", workflow = %self.workflow, %op, "undo step reversed");
                    report.reversed += 1;
                }
                DelegationOutcome::TimedOut => {
                    warn!(target: "runtime::workflow", workflow = %self.workflow, %op, "undo step timed out, continuing");
                    report.failed += 1;
                }
                DelegationOutcome::Failed(reason) => {
                    warn!(
                        target: "runtime::workflow",
                        workflow = %self.workflow,
                        %op,
                        %reason,
                        "undo step failed, continuing"
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            target: "runtime::workflow",
            workflow = %report.workflow,
            item = %report.item,
            reversed = report.reversed,
            failed = report.failed,
            "workflow undone"
        );
        report
    }
}

impl UndoSink for UndoData {
    fn record(&mut self, mutation: UndoMutation) {
        self.mutations.push(mutation);
    }

    fn record_card(&mut self, card: ChatCardId) {
        self.chat_cards.push(card);
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoReport {
    pub workflow: WorkflowId,
    pub item: ItemUuid,
    pub reversed: usize,
    pub failed: usize,
}

/// Bounded queue of undo records; the oldest record is dropped when full.
#[derive(Debug)]
pub struct UndoQueue {
    records: Mutex<VecDeque<UndoData>>,
    capacity: usize,
}

impl UndoQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, data: UndoData) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if records.len() == self.capacity
            && let Some(dropped) = records.pop_front()
        {
            debug!(target: "runtime::workflow", workflow = %dropped.workflow, "undo queue full, dropping oldest");
        }
        records.push_back(data);
    }

    /// Most recent record.
    pub fn pop_latest(&self) -> Option<UndoData> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_back()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
