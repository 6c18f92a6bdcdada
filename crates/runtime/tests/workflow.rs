mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use common::*;
use combat_runtime::{
    ClientDirectory, ConflictResolution, Continuation, DelegatedOp, ExtensionPoint,
    HookOutcome, HookPayload, HookRegistry, MacroRunner, PreconditionError, ResumePayload,
    RollAttackOptions, RollDamageOptions, RuntimeConfig, RuntimeError, UseItemRequest, UseOptions,
    WorkflowEnd, WorkflowHook, WorkflowState, WorkflowSummary,
};

fn swing(user: combat_core::UserId) -> UseItemRequest {
    UseItemRequest::new(actor(FIGHTER), item(LONGSWORD), user).with_targets([token(GOBLIN_TOKEN)])
}

fn player_world() -> combat_runtime::World {
    let mut fighter = fighter();
    fighter.owner = Some(player());
    world_with(fighter, goblin())
}

#[tokio::test]
async fn gm_attack_hits_and_applies_damage() {
    // d20 15 (+5 = 20 vs AC 13), d8 5 (+3 = 8)
    let runtime = start(world(), [15, 5]).await;
    let handle = runtime.handle();

    let summary = handle.use_item(swing(gm())).await.unwrap();

    assert_eq!(summary.end, Some(WorkflowEnd::Completed));
    assert_eq!(summary.hit_targets, vec![token(GOBLIN_TOKEN)]);
    assert_eq!(summary.attack_total, Some(20));
    assert_eq!(summary.damage_total, Some(8));
    assert_eq!(summary.ledger.len(), 1);
    assert_eq!(summary.ledger[0].applied_damage, 8);

    let goblin = handle.world().actor(&actor(GOBLIN)).await.unwrap();
    assert_eq!(goblin.hp.value, 4);
    // Attack card and damage ledger card.
    assert_eq!(handle.world().chat_len().await, 2);
    assert_eq!(handle.undo_len(), 1);
    assert_eq!(handle.live_workflows(), 0);
    // Nobody on the scene has anything to react with.
    assert_eq!(
        handle.delegation_stats().received_for(DelegatedOp::ResolveReaction),
        0
    );

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn a_miss_skips_damage() {
    // d20 3 (+5 = 8 vs AC 13)
    let runtime = start(world(), [3]).await;
    let handle = runtime.handle();

    let summary = handle.use_item(swing(gm())).await.unwrap();

    assert_eq!(summary.end, Some(WorkflowEnd::Completed));
    assert!(summary.hit_targets.is_empty());
    assert_eq!(summary.damage_total, None);
    assert!(summary.ledger.is_empty());
    let goblin = handle.world().actor(&actor(GOBLIN)).await.unwrap();
    assert_eq!(goblin.hp.value, 12);
}

#[tokio::test]
async fn player_workflow_suspends_for_each_roll() {
    let runtime = start(player_world(), [15, 5]).await;
    let handle = runtime.handle();

    let summary = handle.use_item(swing(player())).await.unwrap();
    assert_eq!(summary.state, WorkflowState::WaitForAttackRoll);
    assert_eq!(summary.suspended, Some(Continuation::AttackRoll));
    assert!(!summary.is_finished());
    assert_eq!(handle.live_workflows(), 1);

    let summary = handle
        .roll_attack(summary.id, RollAttackOptions::default())
        .await
        .unwrap();
    assert_eq!(summary.state, WorkflowState::WaitForDamageRoll);
    assert_eq!(summary.suspended, Some(Continuation::DamageRoll));
    assert_eq!(summary.hit_targets, vec![token(GOBLIN_TOKEN)]);

    let summary = handle
        .roll_damage(summary.id, RollDamageOptions::default())
        .await
        .unwrap();
    assert_eq!(summary.end, Some(WorkflowEnd::Completed));
    assert_eq!(
        handle.world().actor(&actor(GOBLIN)).await.unwrap().hp.value,
        4
    );
    assert_eq!(handle.finished(summary.id).map(|s| s.state), Some(WorkflowState::Completed));
}

#[tokio::test]
async fn forced_abort_is_idempotent() {
    let runtime = start(player_world(), []).await;
    let handle = runtime.handle();

    let started = handle.use_item(swing(player())).await.unwrap();
    assert_eq!(started.suspended, Some(Continuation::AttackRoll));

    let aborted = handle
        .perform_state(started.id, WorkflowState::Aborted)
        .await
        .unwrap();
    assert_eq!(aborted.end, Some(WorkflowEnd::Aborted));
    assert_eq!(handle.live_workflows(), 0);

    let again = handle
        .perform_state(started.id, WorkflowState::Cleanup)
        .await
        .unwrap();
    assert_eq!(again.state, WorkflowState::Aborted);
    assert_eq!(handle.undo_len(), 0);
    assert_eq!(handle.world().actor(&actor(GOBLIN)).await.unwrap().hp.value, 12);
}

#[tokio::test]
async fn rerolled_attack_that_misses_deals_no_damage() {
    // First attack hits on 15; the re-roll of 2 misses.
    let runtime = start(player_world(), [15, 2]).await;
    let handle = runtime.handle();

    let started = handle.use_item(swing(player())).await.unwrap();
    let pending = handle
        .roll_attack(started.id, RollAttackOptions::default())
        .await
        .unwrap();
    assert_eq!(pending.suspended, Some(Continuation::DamageRoll));

    let rerolled = handle
        .roll_attack(started.id, RollAttackOptions::default())
        .await
        .unwrap();
    assert_eq!(rerolled.end, Some(WorkflowEnd::Completed));
    assert_eq!(rerolled.attack_total, Some(7));
    assert!(rerolled.hit_targets.is_empty());
    assert_eq!(
        handle.world().actor(&actor(GOBLIN)).await.unwrap().hp.value,
        12
    );
}

#[tokio::test]
async fn resume_with_the_wrong_input_is_rejected() {
    let runtime = start(player_world(), []).await;
    let handle = runtime.handle();

    let summary = handle.use_item(swing(player())).await.unwrap();
    let result = handle
        .un_suspend(summary.id, ResumePayload::ItemCardConfirmed)
        .await;
    assert!(matches!(result, Err(RuntimeError::UnexpectedResume { .. })));

    let result = handle
        .roll_damage(summary.id, RollDamageOptions::default())
        .await;
    assert!(matches!(
        result,
        Err(RuntimeError::InvalidState {
            state: WorkflowState::WaitForAttackRoll,
            ..
        })
    ));
}

#[tokio::test]
async fn target_confirmation_replaces_the_target_set() {
    let mut config = RuntimeConfig::default();
    config.player.confirm_targets = false;
    config.player.attack = true;
    config.player.damage = true;
    let runtime = start_with(config, player_world(), [15, 5], ClientDirectory::new()).await;
    let handle = runtime.handle();

    let summary = handle.use_item(swing(player())).await.unwrap();
    assert_eq!(summary.suspended, Some(Continuation::TargetConfirmation));

    let summary = handle
        .un_suspend(
            summary.id,
            ResumePayload::TargetsConfirmed(vec![token(ORC_TOKEN)]),
        )
        .await
        .unwrap();
    assert_eq!(summary.end, Some(WorkflowEnd::Completed));
    assert_eq!(summary.hit_targets, vec![token(ORC_TOKEN)]);
    assert_eq!(handle.world().actor(&actor(ORC)).await.unwrap().hp.value, 12);
    assert_eq!(handle.world().actor(&actor(GOBLIN)).await.unwrap().hp.value, 12);
}

#[tokio::test]
async fn preconditions_fail_without_touching_the_world() {
    let runtime = start(world(), []).await;
    let handle = runtime.handle();

    let untargeted = UseItemRequest::new(actor(FIGHTER), item(LONGSWORD), gm());
    let result = handle.use_item(untargeted).await;
    assert!(matches!(
        result,
        Err(RuntimeError::Precondition(PreconditionError::NoTargets(_)))
    ));

    let stray = UseItemRequest::new(actor(FIGHTER), item(LONGSWORD), gm())
        .with_targets([token("Token.nobody")]);
    let result = handle.use_item(stray).await;
    assert!(matches!(
        result,
        Err(RuntimeError::Precondition(PreconditionError::UnknownTarget(_)))
    ));

    let missing = UseItemRequest::new(actor(FIGHTER), item("Item.wand"), gm());
    let result = handle.use_item(missing).await;
    assert!(matches!(
        result,
        Err(RuntimeError::Precondition(PreconditionError::UnknownItem { .. }))
    ));

    assert_eq!(handle.world().chat_len().await, 0);
    assert_eq!(handle.live_workflows(), 0);
    assert_eq!(handle.undo_len(), 0);
}

#[tokio::test]
async fn a_live_workflow_blocks_the_item_until_resolved() {
    let runtime = start(player_world(), [15, 5]).await;
    let handle = runtime.handle();

    let first = handle.use_item(swing(player())).await.unwrap();
    let result = handle.use_item(swing(player())).await;
    assert!(matches!(
        result,
        Err(RuntimeError::Precondition(PreconditionError::WorkflowConflict { .. }))
    ));

    let second = handle
        .use_item(swing(player()).with_options(UseOptions {
            conflict: Some(ConflictResolution::Discard),
            ..UseOptions::default()
        }))
        .await
        .unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(
        handle.finished(first.id).and_then(|s| s.end),
        Some(WorkflowEnd::Aborted)
    );
    assert_eq!(second.suspended, Some(Continuation::AttackRoll));
    assert_eq!(handle.live_workflows(), 1);
}

#[tokio::test]
async fn completing_a_live_workflow_runs_it_to_the_end() {
    let runtime = start(player_world(), [15, 5]).await;
    let handle = runtime.handle();

    let first = handle.use_item(swing(player())).await.unwrap();
    assert_eq!(first.suspended, Some(Continuation::AttackRoll));

    let second = handle
        .use_item(swing(player()).with_options(UseOptions {
            conflict: Some(ConflictResolution::Complete),
            ..UseOptions::default()
        }))
        .await
        .unwrap();

    let finished = handle.finished(first.id).unwrap();
    assert_eq!(finished.end, Some(WorkflowEnd::Completed));
    assert_eq!(finished.hit_targets, vec![token(GOBLIN_TOKEN)]);
    assert_eq!(handle.world().actor(&actor(GOBLIN)).await.unwrap().hp.value, 4);
    assert_eq!(handle.undo_len(), 1);
    assert_eq!(second.suspended, Some(Continuation::AttackRoll));
}

#[tokio::test]
async fn undoing_a_live_workflow_keeps_earlier_attacks() {
    let mut config = RuntimeConfig::default();
    config.player.attack = true;
    // GM hit for 8, then two player attack rolls.
    let runtime = start_with(config, player_world(), [15, 5, 15, 15], ClientDirectory::new()).await;
    let handle = runtime.handle();

    handle.use_item(swing(gm())).await.unwrap();
    assert_eq!(handle.world().actor(&actor(GOBLIN)).await.unwrap().hp.value, 4);
    assert_eq!(handle.world().chat_len().await, 2);

    let live = handle.use_item(swing(player())).await.unwrap();
    assert_eq!(live.suspended, Some(Continuation::DamageRoll));
    assert_eq!(handle.world().chat_len().await, 3);

    let next = handle
        .use_item(swing(player()).with_options(UseOptions {
            conflict: Some(ConflictResolution::Undo),
            ..UseOptions::default()
        }))
        .await
        .unwrap();

    assert_eq!(
        handle.finished(live.id).and_then(|s| s.end),
        Some(WorkflowEnd::Aborted)
    );
    // The live attack card is gone, the new one is posted.
    assert_eq!(handle.world().chat_len().await, 3);
    assert_eq!(handle.world().actor(&actor(GOBLIN)).await.unwrap().hp.value, 4);
    assert_eq!(handle.undo_len(), 1);
    assert_eq!(next.suspended, Some(Continuation::DamageRoll));
}

#[tokio::test]
async fn optional_attack_bonus_turns_a_miss_into_a_hit() {
    // d20 6 (+5 = 11, a miss), bardic d4 4 (15, a hit), d8 5.
    let fighter = fighter()
        .with_flag("flags.combat.optional.bardic.attack", "1d4")
        .with_flag("flags.combat.optional.bardic.count", "1");
    let clients = ClientDirectory::new();
    clients.register(gm(), ScriptedDialogs::taking_bonus("bardic"));
    let runtime = start_with(
        RuntimeConfig::default(),
        world_with(fighter, goblin()),
        [6, 4, 5],
        clients,
    )
    .await;
    let handle = runtime.handle();

    let summary = handle.use_item(swing(gm())).await.unwrap();

    assert_eq!(summary.attack_total, Some(15));
    assert_eq!(summary.hit_targets, vec![token(GOBLIN_TOKEN)]);
    assert_eq!(handle.world().actor(&actor(GOBLIN)).await.unwrap().hp.value, 4);
    let fighter = handle.world().actor(&actor(FIGHTER)).await.unwrap();
    assert_eq!(
        fighter.flags.get("flags.combat.optional.bardic.count").map(String::as_str),
        Some("0")
    );
}

#[tokio::test]
async fn strength_attack_flags_apply_to_melee_weapons() {
    let fighter = fighter().with_flag("flags.combat.fail.attack.str", "1");
    let runtime = start(world_with(fighter, goblin()), [15]).await;
    let handle = runtime.handle();

    let summary = handle.use_item(swing(gm())).await.unwrap();

    assert_eq!(summary.attack_total, Some(20));
    assert!(summary.hit_targets.is_empty());
    assert_eq!(handle.world().actor(&actor(GOBLIN)).await.unwrap().hp.value, 12);

    // Dexterity flags leave a strength weapon alone.
    let fighter = common::fighter().with_flag("flags.combat.advantage.attack.dex", "1");
    let runtime = start(world_with(fighter, goblin()), [3, 15, 5]).await;
    let summary = runtime.handle().use_item(swing(gm())).await.unwrap();
    assert_eq!(summary.attack_total, Some(8));
    assert!(summary.hit_targets.is_empty());
}

#[tokio::test]
async fn any_target_can_grant_advantage() {
    let reckless = orc().with_flag("flags.combat.grants.advantage.attack.all", "1");
    let world = combat_runtime::World::new(GM)
        .with_token(combat_core::TokenSnapshot::new(FIGHTER_TOKEN, actor(FIGHTER), "Fighter"))
        .with_token(combat_core::TokenSnapshot::new(GOBLIN_TOKEN, actor(GOBLIN), "Goblin"))
        .with_token(combat_core::TokenSnapshot::new(ORC_TOKEN, actor(ORC), "Orc"))
        .with_actor(fighter())
        .with_actor(goblin())
        .with_actor(reckless);
    // 3 and 15 with advantage keep 15, then d8 5.
    let runtime = start(world, [3, 15, 5]).await;
    let handle = runtime.handle();

    let summary = handle
        .use_item(
            UseItemRequest::new(actor(FIGHTER), item(LONGSWORD), gm())
                .with_targets([token(GOBLIN_TOKEN), token(ORC_TOKEN)]),
        )
        .await
        .unwrap();

    assert_eq!(summary.attack_total, Some(20));
    assert_eq!(summary.hit_targets.len(), 2);
    assert_eq!(handle.world().actor(&actor(GOBLIN)).await.unwrap().hp.value, 4);
    assert_eq!(handle.world().actor(&actor(ORC)).await.unwrap().hp.value, 12);
}

struct NoDamage;

impl WorkflowHook for NoDamage {
    fn name(&self) -> &'static str {
        "no-damage"
    }

    fn handles(&self, point: ExtensionPoint) -> bool {
        point == ExtensionPoint::PreDamageApplication
    }

    fn call(&self, _: ExtensionPoint, _: &HookPayload<'_>) -> HookOutcome {
        HookOutcome::Veto("truce".to_owned())
    }
}

#[tokio::test]
async fn hook_veto_aborts_and_still_cleans_up() {
    init_tracing();
    let runtime = combat_runtime::Runtime::builder()
        .world(world())
        .with_hooks(HookRegistry::new(vec![Arc::new(NoDamage)]))
        .roller(combat_runtime::SharedRoller::new(
            combat_core::ScriptedRoller::new([15, 5]),
        ))
        .build()
        .await
        .unwrap();
    let handle = runtime.handle();

    let summary = handle.use_item(swing(gm())).await.unwrap();

    assert_eq!(summary.end, Some(WorkflowEnd::Aborted));
    assert!(summary.abort_reason.unwrap().contains("truce"));
    assert_eq!(handle.world().actor(&actor(GOBLIN)).await.unwrap().hp.value, 12);
    assert_eq!(handle.live_workflows(), 0);
    // Aborted workflows are not undoable.
    assert_eq!(handle.undo_len(), 0);
}

#[derive(Clone, Default)]
struct Recorder {
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl MacroRunner for Recorder {
    async fn run(
        &self,
        name: &str,
        point: ExtensionPoint,
        _: &WorkflowSummary,
    ) -> HookOutcome {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_owned(), point.name()));
        if name == "broken" {
            HookOutcome::Error("macro threw".to_owned())
        } else {
            HookOutcome::Continue
        }
    }
}

#[tokio::test]
async fn item_macros_run_at_their_points() {
    init_tracing();
    let mut fighter = fighter();
    fighter.items[0].on_use_macros = vec![
        "announce@postCheckHits".to_owned(),
        "broken@preDamageRoll".to_owned(),
        "wrapup".to_owned(),
    ];
    let recorder = Recorder::default();
    let runtime = combat_runtime::Runtime::builder()
        .world(world_with(fighter, goblin()))
        .macros(recorder.clone())
        .roller(combat_runtime::SharedRoller::new(
            combat_core::ScriptedRoller::new([15, 5]),
        ))
        .build()
        .await
        .unwrap();

    let summary = runtime.handle().use_item(swing(gm())).await.unwrap();

    // A failing macro is logged and the workflow goes on.
    assert_eq!(summary.end, Some(WorkflowEnd::Completed));
    let calls = recorder.calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![
            ("announce".to_owned(), "postCheckHits".to_owned()),
            ("broken".to_owned(), "preDamageRoll".to_owned()),
            ("wrapup".to_owned(), "preCleanup".to_owned()),
        ]
    );
}
