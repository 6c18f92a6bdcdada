//! Authoritative document store.
//!
//! Any task may read through [`WorldStore`]; mutations are `pub(crate)` and
//! only the coordinator's delegation handlers call them. Reads hand out
//! cloned snapshots so a workflow never observes a half-applied batch.

mod chat;

pub use chat::{ChatCard, ChatCardDraft, ChatCardKind};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use combat_core::{
    ActiveEffect, ActorSnapshot, ActorUuid, ChatCardId, ConcentrationData, DamageLedgerEntry,
    DocumentRef, EffectId, ItemSnapshot, ItemUuid, TemplateUuid, TokenSnapshot, TokenUuid, UserId,
};

/// Flag keys that mirror [`combat_core::document::RoundUsage`].
pub const ACTION_USED_FLAG: &str = "flags.combat.actions.action";
pub const BONUS_USED_FLAG: &str = "flags.combat.actions.bonus";
pub const REACTION_USED_FLAG: &str = "flags.combat.actions.reaction";

/// Plain world data, used to seed a [`WorldStore`].
#[derive(Debug, Clone, Default)]
pub struct World {
    pub gm: UserId,
    pub actors: HashMap<ActorUuid, ActorSnapshot>,
    pub tokens: HashMap<TokenUuid, TokenSnapshot>,
    pub positions: HashMap<TokenUuid, (i32, i32)>,
    pub templates: BTreeSet<TemplateUuid>,
    pub chat: BTreeMap<ChatCardId, ChatCard>,
    next_card: u64,
}

impl World {
    pub fn new(gm: impl Into<String>) -> Self {
        Self {
            gm: UserId::new(gm),
            ..Self::default()
        }
    }

    pub fn with_actor(mut self, actor: ActorSnapshot) -> Self {
        self.actors.insert(actor.uuid.clone(), actor);
        self
    }

    pub fn with_token(mut self, token: TokenSnapshot) -> Self {
        self.tokens.insert(token.uuid.clone(), token);
        self
    }

    pub fn with_template(mut self, template: TemplateUuid) -> Self {
        self.templates.insert(template);
        self
    }
}

#[derive(Clone)]
pub struct WorldStore {
    inner: Arc<RwLock<World>>,
}

impl WorldStore {
    pub fn new(world: World) -> Self {
        Self {
            inner: Arc::new(RwLock::new(world)),
        }
    }

    pub async fn gm(&self) -> UserId {
        self.inner.read().await.gm.clone()
    }

    pub async fn actor(&self, uuid: &ActorUuid) -> Option<ActorSnapshot> {
        self.inner.read().await.actors.get(uuid).cloned()
    }

    pub async fn token(&self, uuid: &TokenUuid) -> Option<TokenSnapshot> {
        self.inner.read().await.tokens.get(uuid).cloned()
    }

    /// Token and the actor behind it.
    pub async fn token_actor(&self, uuid: &TokenUuid) -> Option<(TokenSnapshot, ActorSnapshot)> {
        let world = self.inner.read().await;
        let token = world.tokens.get(uuid)?;
        let actor = world.actors.get(&token.actor)?;
        Some((token.clone(), actor.clone()))
    }

    /// First token (by uuid) representing `actor`.
    pub async fn token_for_actor(&self, actor: &ActorUuid) -> Option<TokenSnapshot> {
        let world = self.inner.read().await;
        world
            .tokens
            .values()
            .filter(|token| token.actor == *actor)
            .min_by(|a, b| a.uuid.cmp(&b.uuid))
            .cloned()
    }

    pub async fn item(&self, actor: &ActorUuid, item: &ItemUuid) -> Option<ItemSnapshot> {
        let world = self.inner.read().await;
        world
            .actors
            .get(actor)?
            .items
            .iter()
            .find(|candidate| candidate.uuid == *item)
            .cloned()
    }

    pub async fn chat_card(&self, id: &ChatCardId) -> Option<ChatCard> {
        self.inner.read().await.chat.get(id).cloned()
    }

    pub async fn chat_len(&self) -> usize {
        self.inner.read().await.chat.len()
    }

    pub async fn position(&self, token: &TokenUuid) -> Option<(i32, i32)> {
        self.inner.read().await.positions.get(token).copied()
    }

    pub async fn has_template(&self, template: &TemplateUuid) -> bool {
        self.inner.read().await.templates.contains(template)
    }

    /// Clone of the full world, for assertions and debugging.
    pub async fn snapshot(&self) -> World {
        self.inner.read().await.clone()
    }

    // ------------------------------------------------------------------
    // Coordinator-only mutations
    // ------------------------------------------------------------------

    /// Writes the new HP and temp-HP of every entry in one lock.
    pub(crate) async fn write_ledger(&self, entries: &[DamageLedgerEntry]) -> usize {
        let mut world = self.inner.write().await;
        let mut written = 0;
        for entry in entries {
            if let Some(actor) = world.actors.get_mut(&entry.actor) {
                actor.hp.value = entry.new_hp;
                actor.hp.temp = entry.new_temp;
                written += 1;
            }
        }
        written
    }

    pub(crate) async fn create_chat_card(&self, draft: ChatCardDraft) -> ChatCardId {
        let mut world = self.inner.write().await;
        world.next_card += 1;
        let id = ChatCardId::new(format!("ChatMessage.{}", world.next_card));
        world.chat.insert(
            id.clone(),
            ChatCard {
                id: id.clone(),
                draft,
            },
        );
        id
    }

    pub(crate) async fn delete_chat_cards(&self, ids: &[ChatCardId]) -> usize {
        let mut world = self.inner.write().await;
        ids.iter().filter(|id| world.chat.remove(id).is_some()).count()
    }

    /// Removes effects by reference, returning what was removed.
    pub(crate) async fn delete_effects(
        &self,
        refs: &[(ActorUuid, EffectId)],
    ) -> Vec<(ActorUuid, ActiveEffect)> {
        let mut world = self.inner.write().await;
        let mut removed = Vec::new();
        for (actor_id, effect_id) in refs {
            let Some(actor) = world.actors.get_mut(actor_id) else {
                debug!(target: "runtime::world", actor = %actor_id, "delete on unknown actor");
                continue;
            };
            if let Some(index) = actor.effects.iter().position(|e| e.id == *effect_id) {
                removed.push((actor_id.clone(), actor.effects.remove(index)));
            }
        }
        removed
    }

    /// Replaces effects with matching ids, returning the previous versions.
    pub(crate) async fn update_effects(
        &self,
        actor: &ActorUuid,
        effects: Vec<ActiveEffect>,
    ) -> Vec<ActiveEffect> {
        let mut world = self.inner.write().await;
        let Some(actor) = world.actors.get_mut(actor) else {
            return Vec::new();
        };
        let mut previous = Vec::new();
        for effect in effects {
            if let Some(slot) = actor.effects.iter_mut().find(|e| e.id == effect.id) {
                previous.push(std::mem::replace(slot, effect));
            }
        }
        previous
    }

    /// Adds effects; an effect whose id already exists is skipped, which
    /// keeps redelivered creations idempotent.
    pub(crate) async fn create_effects(
        &self,
        actor: &ActorUuid,
        effects: Vec<ActiveEffect>,
    ) -> Vec<EffectId> {
        let mut world = self.inner.write().await;
        let Some(actor) = world.actors.get_mut(actor) else {
            return Vec::new();
        };
        let mut created = Vec::new();
        for effect in effects {
            if actor.effects.iter().any(|e| e.id == effect.id) {
                continue;
            }
            created.push(effect.id.clone());
            actor.effects.push(effect);
        }
        created
    }

    /// Sets a document flag, returning the previous value.
    pub(crate) async fn set_flag(
        &self,
        actor: &ActorUuid,
        key: &str,
        value: Option<String>,
    ) -> Option<String> {
        let mut world = self.inner.write().await;
        let actor = world.actors.get_mut(actor)?;
        let used = value.as_deref().is_some_and(|v| v != "0" && v != "false");
        match key {
            ACTION_USED_FLAG => actor.round_usage.action = used,
            BONUS_USED_FLAG => actor.round_usage.bonus = used,
            REACTION_USED_FLAG => actor.round_usage.reaction = used,
            _ => {}
        }
        match value {
            Some(value) => actor.flags.insert(key.to_owned(), value),
            None => actor.flags.remove(key),
        }
    }

    pub(crate) async fn move_token(&self, token: &TokenUuid, to: (i32, i32)) -> bool {
        let mut world = self.inner.write().await;
        if !world.tokens.contains_key(token) {
            return false;
        }
        world.positions.insert(token.clone(), to);
        true
    }

    pub(crate) async fn set_concentration(
        &self,
        actor: &ActorUuid,
        data: Option<ConcentrationData>,
    ) -> Option<ConcentrationData> {
        let mut world = self.inner.write().await;
        let actor = world.actors.get_mut(actor)?;
        std::mem::replace(&mut actor.concentration, data)
    }

    pub(crate) async fn delete_templates(&self, templates: &[TemplateUuid]) -> usize {
        let mut world = self.inner.write().await;
        templates
            .iter()
            .filter(|template| world.templates.remove(template))
            .count()
    }

    /// Deletes effects and templates, returning the removed effects.
    pub(crate) async fn delete_documents(
        &self,
        refs: &[DocumentRef],
    ) -> Vec<(ActorUuid, ActiveEffect)> {
        let mut effects = Vec::new();
        let mut templates = Vec::new();
        for doc in refs {
            match doc {
                DocumentRef::Effect { actor, effect } => effects.push((actor.clone(), effect.clone())),
                DocumentRef::Template { template } => templates.push(template.clone()),
            }
        }
        let removed = self.delete_effects(&effects).await;
        self.delete_templates(&templates).await;
        removed
    }
}
