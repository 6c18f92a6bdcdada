//! Shared fixtures for the runtime integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use tracing_subscriber::EnvFilter;

use combat_core::{
    ActionType, ActorSnapshot, ActorUuid, DamageType, HitPoints, ItemSnapshot, ItemUuid,
    ScriptedRoller, TokenSnapshot, TokenUuid, UserId,
};
use combat_runtime::{
    BonusRequest, ClientDirectory, Dialogs, ReactionChoice, ReactionRequest, Runtime,
    RuntimeConfig, SharedRoller, World,
};

pub const GM: &str = "gm";
pub const PLAYER: &str = "player";

pub const FIGHTER: &str = "Actor.fighter";
pub const FIGHTER_TOKEN: &str = "Token.fighter";
pub const GOBLIN: &str = "Actor.goblin";
pub const GOBLIN_TOKEN: &str = "Token.goblin";
pub const ORC: &str = "Actor.orc";
pub const ORC_TOKEN: &str = "Token.orc";
pub const LONGSWORD: &str = "Item.longsword";

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn gm() -> UserId {
    UserId::from(GM)
}

pub fn player() -> UserId {
    UserId::from(PLAYER)
}

/// +5 to hit, 1d8 + 3 slashing.
pub fn longsword() -> ItemSnapshot {
    let mut item = ItemSnapshot::new(LONGSWORD, "Longsword", ActionType::Mwak)
        .with_attack_bonus("5")
        .with_damage("1d8 + 3", DamageType::Slashing);
    item.requires_targets = true;
    item
}

/// 30 HP, AC 16, carries a longsword.
pub fn fighter() -> ActorSnapshot {
    let mut actor = ActorSnapshot::new(FIGHTER, "Fighter", HitPoints::new(30, 30), 16);
    actor.items.push(longsword());
    actor
}

/// 12 HP, AC 13.
pub fn goblin() -> ActorSnapshot {
    ActorSnapshot::new(GOBLIN, "Goblin", HitPoints::new(12, 12), 13)
}

/// 20 HP, AC 13.
pub fn orc() -> ActorSnapshot {
    ActorSnapshot::new(ORC, "Orc", HitPoints::new(20, 20), 13)
}

/// Fighter, goblin and orc on the scene, each with a token.
pub fn world_with(fighter: ActorSnapshot, goblin: ActorSnapshot) -> World {
    World::new(GM)
        .with_token(TokenSnapshot::new(FIGHTER_TOKEN, fighter.uuid.clone(), "Fighter"))
        .with_token(TokenSnapshot::new(GOBLIN_TOKEN, goblin.uuid.clone(), "Goblin"))
        .with_token(TokenSnapshot::new(ORC_TOKEN, ActorUuid::from(ORC), "Orc"))
        .with_actor(fighter)
        .with_actor(goblin)
        .with_actor(orc())
}

pub fn world() -> World {
    world_with(fighter(), goblin())
}

pub fn token(uuid: &str) -> TokenUuid {
    TokenUuid::from(uuid)
}

pub fn actor(uuid: &str) -> ActorUuid {
    ActorUuid::from(uuid)
}

pub fn item(uuid: &str) -> ItemUuid {
    ItemUuid::from(uuid)
}

pub async fn start(world: World, rolls: impl IntoIterator<Item = u32>) -> Runtime {
    start_with(RuntimeConfig::default(), world, rolls, ClientDirectory::new()).await
}

/// Builds a runtime whose dice come from `rolls`, then 1s.
pub async fn start_with(
    config: RuntimeConfig,
    world: World,
    rolls: impl IntoIterator<Item = u32>,
    clients: ClientDirectory,
) -> Runtime {
    init_tracing();
    Runtime::builder()
        .config(config)
        .world(world)
        .roller(SharedRoller::new(ScriptedRoller::new(rolls).with_fallback(1)))
        .clients(clients)
        .build()
        .await
        .expect("runtime should build")
}

/// Answers every dialog with a fixed choice and records reaction requests.
#[derive(Default)]
pub struct ScriptedDialogs {
    reaction: Option<ReactionChoice>,
    bonus: Option<String>,
    requests: Mutex<Vec<ReactionRequest>>,
}

impl ScriptedDialogs {
    pub fn reacting(choice: ReactionChoice) -> Arc<Self> {
        Arc::new(Self {
            reaction: Some(choice),
            ..Self::default()
        })
    }

    pub fn taking_bonus(name: &str) -> Arc<Self> {
        Arc::new(Self {
            bonus: Some(name.to_owned()),
            ..Self::default()
        })
    }

    pub fn requests(&self) -> Vec<ReactionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dialogs for ScriptedDialogs {
    async fn choose_reaction(&self, request: &ReactionRequest) -> Option<ReactionChoice> {
        self.requests.lock().unwrap().push(request.clone());
        self.reaction.clone()
    }

    async fn choose_bonus(&self, _: &BonusRequest) -> Option<String> {
        self.bonus.clone()
    }
}

/// A user who never closes the dialog.
pub struct NeverAnswers;

#[async_trait]
impl Dialogs for NeverAnswers {
    async fn choose_reaction(&self, _: &ReactionRequest) -> Option<ReactionChoice> {
        std::future::pending().await
    }

    async fn choose_bonus(&self, _: &BonusRequest) -> Option<String> {
        std::future::pending().await
    }
}
