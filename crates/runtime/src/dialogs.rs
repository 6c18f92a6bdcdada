//! Dialog collaborators.
//!
//! Reaction choices and optional-bonus choices are made by a person at some
//! client. The runtime only sees the [`Dialogs`] trait; hosts register one
//! implementation per connected user in the [`ClientDirectory`].

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use combat_core::{ActorUuid, OptionalBonus, OptionalKind, UserId};

use crate::reactions::{ReactionChoice, ReactionRequest};

/// An optional bonus offer made after a roll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BonusRequest {
    pub actor: ActorUuid,
    pub kind: OptionalKind,
    /// Roll total the bonus would modify.
    pub total: i32,
    pub options: Vec<OptionalBonus>,
}

/// Time boxing is applied by the caller, so implementations may wait as long
/// as the person takes.
#[async_trait]
pub trait Dialogs: Send + Sync {
    async fn choose_reaction(&self, request: &ReactionRequest) -> Option<ReactionChoice>;

    /// Name of the chosen bonus, `None` to decline.
    async fn choose_bonus(&self, request: &BonusRequest) -> Option<String>;
}

/// Declines every offer.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclineAll;

#[async_trait]
impl Dialogs for DeclineAll {
    async fn choose_reaction(&self, _: &ReactionRequest) -> Option<ReactionChoice> {
        None
    }

    async fn choose_bonus(&self, _: &BonusRequest) -> Option<String> {
        None
    }
}

struct ClientEntry {
    online: bool,
    dialogs: Arc<dyn Dialogs>,
}

/// Connected users and the dialogs each one answers.
#[derive(Clone, Default)]
pub struct ClientDirectory {
    inner: Arc<RwLock<HashMap<UserId, ClientEntry>>>,
}

impl ClientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `user` as online.
    pub fn register(&self, user: UserId, dialogs: Arc<dyn Dialogs>) {
        let mut clients = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        clients.insert(
            user,
            ClientEntry {
                online: true,
                dialogs,
            },
        );
    }

    pub fn set_online(&self, user: &UserId, online: bool) {
        let mut clients = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = clients.get_mut(user) {
            entry.online = online;
        }
    }

    pub fn is_online(&self, user: &UserId) -> bool {
        let clients = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        clients.get(user).is_some_and(|entry| entry.online)
    }

    /// Dialogs of `owner` when online, else the coordinator's.
    pub fn dialogs_for(&self, owner: Option<&UserId>, gm: &UserId) -> Arc<dyn Dialogs> {
        let clients = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = owner.and_then(|owner| clients.get(owner))
            && entry.online
        {
            return Arc::clone(&entry.dialogs);
        }
        if let Some(owner) = owner {
            debug!(target: "runtime::reactions", %owner, "controller offline, asking the coordinator");
        }
        match clients.get(gm) {
            Some(entry) => Arc::clone(&entry.dialogs),
            None => Arc::new(DeclineAll),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Picks(&'static str);

    #[async_trait]
    impl Dialogs for Picks {
        async fn choose_reaction(&self, _: &ReactionRequest) -> Option<ReactionChoice> {
            None
        }

        async fn choose_bonus(&self, _: &BonusRequest) -> Option<String> {
            Some(self.0.to_owned())
        }
    }

    fn request() -> BonusRequest {
        BonusRequest {
            actor: ActorUuid::from("Actor.a"),
            kind: OptionalKind::Attack,
            total: 12,
            options: Vec::new(),
        }
    }

    #[tokio::test]
    async fn offline_owner_falls_back_to_the_coordinator() {
        let gm = UserId::from("gm");
        let player = UserId::from("player");
        let clients = ClientDirectory::new();
        clients.register(gm.clone(), Arc::new(Picks("gm")));
        clients.register(player.clone(), Arc::new(Picks("player")));

        let chosen = clients.dialogs_for(Some(&player), &gm).choose_bonus(&request()).await;
        assert_eq!(chosen.as_deref(), Some("player"));

        clients.set_online(&player, false);
        let chosen = clients.dialogs_for(Some(&player), &gm).choose_bonus(&request()).await;
        assert_eq!(chosen.as_deref(), Some("gm"));
    }

    #[tokio::test]
    async fn nobody_registered_declines() {
        let clients = ClientDirectory::new();
        let dialogs = clients.dialogs_for(None, &UserId::from("gm"));
        assert_eq!(dialogs.choose_bonus(&request()).await, None);
    }
}
