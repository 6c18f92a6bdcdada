mod common;

use common::*;
use combat_core::{
    Ability, ActionType, ActiveEffect, ApplyDamageDetail, DamageDetail, DamageType, ItemSnapshot,
    OnSave, SpecialDuration, TraitSet,
};
use combat_runtime::{
    ApplyDamageRequest, DamageEvent, DamageTargetRef, Event, Topic, UseItemRequest, WorkflowEnd,
};

fn fire(amount: f64) -> ApplyDamageDetail {
    ApplyDamageDetail::new("base", vec![DamageDetail::new(amount, DamageType::Fire)])
}

fn warded_goblin() -> combat_core::ActorSnapshot {
    let mut goblin = goblin().with_effect(
        ActiveEffect::new("ward", "Fire Ward").with_change("flags.combat.DR.fire", "2"),
    );
    goblin.traits.dr = TraitSet::of(&["fire"]);
    goblin
}

#[tokio::test]
async fn resistance_applies_after_damage_reduction() {
    let runtime = start(world_with(fighter(), warded_goblin()), []).await;
    let handle = runtime.handle();
    let mut events = handle.subscribe(Topic::Damage);

    let applied = handle
        .apply_damage(
            ApplyDamageRequest::new(actor(FIGHTER), "Fire Bolt")
                .with_targets([DamageTargetRef::hit(token(GOBLIN_TOKEN))])
                .with_group(fire(9.0)),
        )
        .await;

    // (9 - 2) * 0.5 = 3.5, floored.
    assert!(applied.persisted);
    assert!(applied.card.is_some());
    assert_eq!(applied.entries.len(), 1);
    assert_eq!(applied.entries[0].applied_damage, 3);
    assert_eq!(applied.entries[0].total_damage, 9);
    assert_eq!(handle.world().actor(&actor(GOBLIN)).await.unwrap().hp.value, 9);
    assert_eq!(handle.undo_len(), 1);

    let Ok(Event::Damage(DamageEvent::Applied { entries, .. })) = events.try_recv() else {
        panic!("expected a damage batch event");
    };
    assert_eq!(entries[0].new_hp, 9);
}

#[tokio::test]
async fn replaying_an_application_never_subtracts_twice() {
    let runtime = start(world(), []).await;
    let handle = runtime.handle();
    let request = ApplyDamageRequest::new(actor(FIGHTER), "Fire Bolt")
        .with_targets([DamageTargetRef::hit(token(GOBLIN_TOKEN))])
        .with_group(fire(5.0));

    let first = handle.apply_damage(request.clone()).await;
    assert_eq!(first.entries[0].new_hp, 7);

    let replay = handle
        .apply_damage(request.with_existing(first.entries.clone()))
        .await;
    assert_eq!(replay.entries[0].old_hp, 12);
    assert_eq!(replay.entries[0].new_hp, 7);
    assert_eq!(handle.world().actor(&actor(GOBLIN)).await.unwrap().hp.value, 7);
}

#[tokio::test]
async fn healing_restores_hit_points_up_to_max() {
    let mut goblin = goblin();
    goblin.hp.value = 5;
    let runtime = start(world_with(fighter(), goblin), []).await;
    let handle = runtime.handle();

    let applied = handle
        .apply_damage(
            ApplyDamageRequest::new(actor(FIGHTER), "Cure Wounds")
                .with_targets([DamageTargetRef::hit(token(GOBLIN_TOKEN))])
                .with_group(ApplyDamageDetail::new(
                    "base",
                    vec![DamageDetail::new(10.0, DamageType::Healing)],
                )),
        )
        .await;

    assert_eq!(applied.entries[0].new_hp, 12);
    assert!(applied.entries[0].was_healed());
    assert_eq!(handle.world().actor(&actor(GOBLIN)).await.unwrap().hp.value, 12);
}

fn burst() -> ItemSnapshot {
    ItemSnapshot::new("Item.burst", "Flame Burst", ActionType::Save)
        .with_damage("2d6", DamageType::Fire)
        .with_save(Ability::Dex, 15, OnSave::Half)
}

#[tokio::test]
async fn super_saver_takes_nothing_on_a_save() {
    let mut fighter = fighter();
    fighter.items.push(burst());
    let goblin = goblin().with_flag("flags.combat.superSaver.dex", "1");
    // Saves: goblin 18, orc 18. Damage 2d6: 4 + 4.
    let runtime = start(world_with(fighter, goblin), [18, 18, 4, 4]).await;
    let handle = runtime.handle();

    let summary = handle
        .use_item(
            UseItemRequest::new(actor(FIGHTER), item("Item.burst"), gm())
                .with_targets([token(GOBLIN_TOKEN), token(ORC_TOKEN)]),
        )
        .await
        .unwrap();

    assert_eq!(summary.end, Some(WorkflowEnd::Completed));
    assert!(summary.saves.saved(&token(GOBLIN_TOKEN)));
    assert!(summary.saves.saved(&token(ORC_TOKEN)));
    assert_eq!(summary.damage_total, Some(8));
    assert_eq!(handle.world().actor(&actor(GOBLIN)).await.unwrap().hp.value, 12);
    assert_eq!(handle.world().actor(&actor(ORC)).await.unwrap().hp.value, 16);
}

#[tokio::test]
async fn failed_saves_take_full_damage() {
    let mut fighter = fighter();
    fighter.items.push(burst());
    // Goblin fails on 3, orc saves on 17. Damage 2d6: 5 + 3.
    let runtime = start(world_with(fighter, goblin()), [3, 17, 5, 3]).await;
    let handle = runtime.handle();

    let summary = handle
        .use_item(
            UseItemRequest::new(actor(FIGHTER), item("Item.burst"), gm())
                .with_targets([token(GOBLIN_TOKEN), token(ORC_TOKEN)]),
        )
        .await
        .unwrap();

    assert!(summary.saves.failures.contains(&token(GOBLIN_TOKEN)));
    assert_eq!(handle.world().actor(&actor(GOBLIN)).await.unwrap().hp.value, 4);
    assert_eq!(handle.world().actor(&actor(ORC)).await.unwrap().hp.value, 16);
}

#[tokio::test]
async fn effects_ending_on_hit_or_damage_expire() {
    let mut guard = ActiveEffect::new("guard", "Guarded");
    guard.special_duration = SpecialDuration::IS_HIT;
    let mut blur = ActiveEffect::new("blur", "Blurred");
    blur.special_duration = SpecialDuration::IS_DAMAGED;
    let lasting = ActiveEffect::new("bless", "Blessed");
    let goblin = goblin()
        .with_effect(guard)
        .with_effect(blur)
        .with_effect(lasting);
    let runtime = start(world_with(fighter(), goblin), [15, 5]).await;
    let handle = runtime.handle();

    let summary = handle
        .use_item(
            UseItemRequest::new(actor(FIGHTER), item(LONGSWORD), gm())
                .with_targets([token(GOBLIN_TOKEN)]),
        )
        .await
        .unwrap();
    assert_eq!(summary.end, Some(WorkflowEnd::Completed));

    let goblin = handle.world().actor(&actor(GOBLIN)).await.unwrap();
    let remaining: Vec<_> = goblin.effects.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(remaining, vec!["bless"]);
}
