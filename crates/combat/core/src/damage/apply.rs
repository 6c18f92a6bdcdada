//! Per-target damage computation and the damage ledger.
//!
//! Everything here is pure: the runtime gathers snapshots, calls
//! [`compute_damage_many`] and persists the returned ledger in one batch.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::reduction::ReductionTable;
use super::traits::get_trait_mult;
use super::{DamageDetail, DamageType};
use crate::config::{ReductionOrder, RulesConfig, ThresholdOrder};
use crate::document::{ActorSnapshot, ItemSnapshot, TokenSnapshot};
use crate::flags::ActorFlags;
use crate::ids::{ActorUuid, TokenUuid};

/// One independently saved group of damage lines.
///
/// Base, bonus and "other" damage travel as separate groups so each can
/// carry its own save outcome while being applied to a target atomically.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyDamageDetail {
    pub label: String,
    pub damage_detail: Vec<DamageDetail>,
    pub damage_total: f64,
    /// Multiplier for a successful save (0.5 for half-on-save items).
    pub save_multiplier: f64,
    /// Tokens that saved; `None` when this group allows no save.
    #[serde(default)]
    pub saves: Option<BTreeSet<TokenUuid>>,
    #[serde(default)]
    pub super_savers: BTreeSet<TokenUuid>,
    #[serde(default)]
    pub semi_super_savers: BTreeSet<TokenUuid>,
}

impl ApplyDamageDetail {
    pub fn new(label: impl Into<String>, damage_detail: Vec<DamageDetail>) -> Self {
        let damage_total = super::detail_total(&damage_detail);
        Self {
            label: label.into(),
            damage_detail,
            damage_total,
            save_multiplier: 1.0,
            saves: None,
            super_savers: BTreeSet::new(),
            semi_super_savers: BTreeSet::new(),
        }
    }

    pub fn with_saves(
        mut self,
        save_multiplier: f64,
        saves: BTreeSet<TokenUuid>,
        super_savers: BTreeSet<TokenUuid>,
        semi_super_savers: BTreeSet<TokenUuid>,
    ) -> Self {
        self.save_multiplier = save_multiplier;
        self.saves = Some(saves);
        self.super_savers = super_savers;
        self.semi_super_savers = semi_super_savers;
        self
    }

    /// Save multiplier for `token` in this group.
    ///
    /// Super savers take nothing on a success and half on a failure; semi
    /// super savers take the normal amount on a success and half on a
    /// failure. Both only change items that deal partial damage on a save.
    pub fn save_multiplier_for(&self, token: &TokenUuid) -> f64 {
        let Some(saves) = &self.saves else {
            return 1.0;
        };
        let partial = self.save_multiplier > 0.0 && self.save_multiplier < 1.0;
        let super_saver = partial && self.super_savers.contains(token);
        let semi = partial && self.semi_super_savers.contains(token);
        if saves.contains(token) {
            if super_saver { 0.0 } else { self.save_multiplier }
        } else if super_saver || semi {
            self.save_multiplier
        } else {
            1.0
        }
    }
}

/// Result of one application call against one target.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DamageLedgerEntry {
    pub token: TokenUuid,
    pub actor: ActorUuid,
    pub name: String,
    pub old_hp: i32,
    pub new_hp: i32,
    pub old_temp: i32,
    pub new_temp: i32,
    /// Pre-reduction damage minus healing.
    pub total_damage: i32,
    /// Net hit points plus temp-HP removed; negative for healing.
    pub applied_damage: i32,
    pub details: Vec<DamageDetail>,
    pub hit: bool,
    pub critical: bool,
}

impl DamageLedgerEntry {
    pub fn was_damaged(&self) -> bool {
        self.new_hp + self.new_temp < self.old_hp + self.old_temp
    }

    pub fn was_healed(&self) -> bool {
        self.new_hp > self.old_hp || self.new_temp > self.old_temp
    }

    /// HP actually lost, ignoring temp-HP absorption.
    pub fn hp_lost(&self) -> i32 {
        (self.old_hp - self.new_hp).max(0)
    }
}

/// One target of an application call.
#[derive(Clone, Copy, Debug)]
pub struct DamageTarget<'a> {
    pub token: &'a TokenSnapshot,
    pub actor: &'a ActorSnapshot,
    pub hit: bool,
    pub critical: bool,
}

/// Computes a ledger entry per target, in target order.
///
/// `existing` holds entries returned by a previous call; a target found there
/// starts from that entry's old HP and temp-HP, so replaying an application
/// never subtracts twice.
pub fn compute_damage_many(
    targets: &[DamageTarget<'_>],
    groups: &[ApplyDamageDetail],
    item: Option<&ItemSnapshot>,
    config: &RulesConfig,
    existing: &[DamageLedgerEntry],
) -> Vec<DamageLedgerEntry> {
    targets
        .iter()
        .map(|target| {
            let previous = existing.iter().find(|entry| entry.token == target.token.uuid);
            compute_target_damage(target, groups, item, config, previous)
        })
        .collect()
}

pub fn compute_target_damage(
    target: &DamageTarget<'_>,
    groups: &[ApplyDamageDetail],
    item: Option<&ItemSnapshot>,
    config: &RulesConfig,
    existing: Option<&DamageLedgerEntry>,
) -> DamageLedgerEntry {
    let actor = target.actor;
    let token = &target.token.uuid;
    let flags = ActorFlags::from_actor(actor);
    let reductions = ReductionTable::from_flags(&flags, &actor.roll_data);

    let mut details = Vec::new();
    let mut total_damage = 0.0;
    let mut damage = 0i32;
    let mut healing = 0i32;
    let mut temp_gain = 0i32;

    for group in groups {
        let save_mult = group.save_multiplier_for(token);
        let mut lines = group.damage_detail.clone();
        reductions.assign(&mut lines, item, config.dr_stacking);

        for line in &mut lines {
            let trait_mult = get_trait_mult(actor, &flags, &line.damage_type, item, config);

            if line.damage_type.is_restorative() {
                // Trait multiplier is −1 for restorative types unless overridden.
                let amount = (line.damage * -trait_mult).floor().max(0.0) as i32;
                line.damage_multiplier = Some(trait_mult);
                total_damage -= line.damage;
                if line.damage_type == DamageType::TempHp {
                    temp_gain = temp_gain.max(amount);
                } else {
                    healing += amount;
                }
                continue;
            }

            let dr = line.dr.unwrap_or(0.0);
            let reduced = match config.reduction_order {
                ReductionOrder::DrThenSave => (line.damage - dr).max(0.0) * save_mult,
                ReductionOrder::SaveThenDr => (line.damage * save_mult - dr).max(0.0),
            };
            let applied = (reduced * trait_mult).max(0.0).floor() as i32;
            line.damage_multiplier = Some(save_mult * trait_mult);
            total_damage += line.damage;
            damage += applied;
        }
        details.extend(lines);
    }

    let final_dr = reductions.final_dr().floor() as i32;
    let threshold = actor.damage_threshold.unwrap_or(0);
    let damage = match config.threshold_order {
        ThresholdOrder::AfterFinalDr => {
            let after = (damage - final_dr).max(0);
            if after < threshold { 0 } else { after }
        }
        ThresholdOrder::BeforeFinalDr => {
            if damage < threshold {
                0
            } else {
                (damage - final_dr).max(0)
            }
        }
    };

    let (old_hp, old_temp) = match existing {
        Some(entry) => (entry.old_hp, entry.old_temp),
        None => (actor.hp.value, actor.hp.temp),
    };

    let mut new_temp = old_temp.max(temp_gain);
    let absorbed = new_temp.min(damage);
    new_temp -= absorbed;
    let new_hp = (old_hp - (damage - absorbed) + healing).clamp(0, actor.hp.effective_max());

    DamageLedgerEntry {
        token: token.clone(),
        actor: actor.uuid.clone(),
        name: target.token.name.clone(),
        old_hp,
        new_hp,
        old_temp,
        new_temp,
        total_damage: total_damage.floor() as i32,
        applied_damage: damage - healing,
        details,
        hit: target.hit,
        critical: target.critical,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DrStacking;
    use crate::document::{ActiveEffect, HitPoints, TraitSet};

    struct Fixture {
        token: TokenSnapshot,
        actor: ActorSnapshot,
    }

    impl Fixture {
        fn new(hp: i32) -> Self {
            let actor = ActorSnapshot::new("Actor.t", "Target", HitPoints::new(hp, hp), 13);
            let token = TokenSnapshot::new("Token.t", actor.uuid.clone(), "Target");
            Self { token, actor }
        }

        fn target(&self) -> DamageTarget<'_> {
            DamageTarget {
                token: &self.token,
                actor: &self.actor,
                hit: true,
                critical: false,
            }
        }

        fn apply(&self, groups: &[ApplyDamageDetail], config: &RulesConfig) -> DamageLedgerEntry {
            compute_target_damage(&self.target(), groups, None, config, None)
        }
    }

    fn group(lines: &[(f64, DamageType)]) -> ApplyDamageDetail {
        ApplyDamageDetail::new(
            "base",
            lines
                .iter()
                .map(|(damage, kind)| DamageDetail::new(*damage, kind.clone()))
                .collect(),
        )
    }

    fn half_save(token: &TokenUuid, saved: bool, sup: bool, semi: bool) -> ApplyDamageDetail {
        let one = |on: bool| -> BTreeSet<TokenUuid> {
            if on { BTreeSet::from([token.clone()]) } else { BTreeSet::new() }
        };
        group(&[(10.0, DamageType::Fire)]).with_saves(0.5, one(saved), one(sup), one(semi))
    }

    #[test]
    fn resisted_fire_after_dr() {
        let mut fx = Fixture::new(30);
        fx.actor.traits.dr = TraitSet::of(&["fire"]);
        fx.actor = fx
            .actor
            .with_effect(ActiveEffect::new("e", "Ward").with_change("flags.combat.DR.fire", "2"));

        let entry = fx.apply(&[group(&[(9.0, DamageType::Fire)])], &RulesConfig::default());
        assert_eq!(entry.applied_damage, 3);
        assert_eq!(entry.new_hp, 27);
        assert_eq!(entry.total_damage, 9);
        assert_eq!(entry.details[0].dr, Some(2.0));
        assert_eq!(entry.details[0].damage_multiplier, Some(0.5));
    }

    #[test]
    fn temp_hp_takes_the_higher_value() {
        let mut fx = Fixture::new(20);
        fx.actor.hp.temp = 3;
        let entry = fx.apply(&[group(&[(5.0, DamageType::TempHp)])], &RulesConfig::default());
        assert_eq!(entry.new_temp, 5);
        assert_eq!(entry.new_hp, 20);
        assert!(entry.was_healed());

        fx.actor.hp.temp = 8;
        let entry = fx.apply(&[group(&[(5.0, DamageType::TempHp)])], &RulesConfig::default());
        assert_eq!(entry.new_temp, 8);
    }

    #[test]
    fn temp_hp_absorbs_damage_first() {
        let mut fx = Fixture::new(20);
        fx.actor.hp.temp = 4;
        let entry = fx.apply(&[group(&[(7.0, DamageType::Cold)])], &RulesConfig::default());
        assert_eq!(entry.new_temp, 0);
        assert_eq!(entry.new_hp, 17);
        assert_eq!(entry.hp_lost(), 3);
    }

    #[test]
    fn healing_clamps_to_max_plus_tempmax() {
        let mut fx = Fixture::new(20);
        fx.actor.hp.value = 15;
        fx.actor.hp.tempmax = 2;
        let entry = fx.apply(&[group(&[(10.0, DamageType::Healing)])], &RulesConfig::default());
        assert_eq!(entry.new_hp, 22);
        assert_eq!(entry.applied_damage, -10);
    }

    #[test]
    fn hp_never_drops_below_zero() {
        let fx = Fixture::new(5);
        let entry = fx.apply(&[group(&[(40.0, DamageType::Force)])], &RulesConfig::default());
        assert_eq!(entry.new_hp, 0);
    }

    #[test]
    fn saver_variants_on_half_save_item() {
        let fx = Fixture::new(50);
        let token = fx.token.uuid.clone();
        let config = RulesConfig::default();

        assert_eq!(fx.apply(&[half_save(&token, true, false, false)], &config).applied_damage, 5);
        assert_eq!(fx.apply(&[half_save(&token, false, false, false)], &config).applied_damage, 10);
        // Super saver: nothing on success, half on failure.
        assert_eq!(fx.apply(&[half_save(&token, true, true, false)], &config).applied_damage, 0);
        assert_eq!(fx.apply(&[half_save(&token, false, true, false)], &config).applied_damage, 5);
        // Semi super saver: half on failure.
        assert_eq!(fx.apply(&[half_save(&token, false, false, true)], &config).applied_damage, 5);
    }

    #[test]
    fn reduction_order_changes_outcome() {
        let mut fx = Fixture::new(50);
        fx.actor = fx.actor.with_flag("flags.combat.DR.fire", "2");
        let token = fx.token.uuid.clone();
        let mut saved = half_save(&token, true, false, false);
        saved.damage_detail[0].damage = 9.0;

        let dr_first = RulesConfig::default();
        let save_first = RulesConfig::default().with_reduction_order(ReductionOrder::SaveThenDr);
        assert_eq!(fx.apply(std::slice::from_ref(&saved), &dr_first).applied_damage, 3);
        assert_eq!(fx.apply(&[saved], &save_first).applied_damage, 2);
    }

    #[test]
    fn immunity_zeroes_damage_under_every_setting() {
        let mut fx = Fixture::new(30);
        fx.actor.traits.di = TraitSet::of(&["poison"]);
        fx.actor = fx.actor.with_flag("flags.combat.DR.all", "1");
        let token = fx.token.uuid.clone();

        for order in [ReductionOrder::DrThenSave, ReductionOrder::SaveThenDr] {
            for stacking in [DrStacking::HighestOnly, DrStacking::ApportionAll] {
                let config = RulesConfig::default()
                    .with_reduction_order(order)
                    .with_dr_stacking(stacking);
                let mut g = half_save(&token, false, false, false);
                g.damage_detail[0].damage_type = DamageType::Poison;
                assert_eq!(fx.apply(&[g], &config).applied_damage, 0);
            }
        }
    }

    #[test]
    fn final_dr_and_threshold() {
        let mut fx = Fixture::new(50);
        fx.actor.damage_threshold = Some(10);
        fx.actor = fx.actor.with_flag("flags.combat.DR.final", "3");

        let after = RulesConfig::default();
        let before = RulesConfig {
            threshold_order: ThresholdOrder::BeforeFinalDr,
            ..RulesConfig::default()
        };
        // 12 - 3 = 9 is under the threshold when measured after final DR.
        assert_eq!(fx.apply(&[group(&[(12.0, DamageType::Fire)])], &after).applied_damage, 0);
        assert_eq!(fx.apply(&[group(&[(12.0, DamageType::Fire)])], &before).applied_damage, 9);
        assert_eq!(fx.apply(&[group(&[(20.0, DamageType::Fire)])], &after).applied_damage, 17);
    }

    #[test]
    fn replay_with_existing_damage_is_idempotent() {
        let mut fx = Fixture::new(30);
        fx.actor.hp.temp = 2;
        let groups = [group(&[(7.0, DamageType::Slashing), (4.0, DamageType::Fire)])];
        let config = RulesConfig::default();

        let first = compute_damage_many(&[fx.target()], &groups, None, &config, &[]);
        // The host has written the first result back.
        fx.actor.hp.value = first[0].new_hp;
        fx.actor.hp.temp = first[0].new_temp;

        let replay = compute_damage_many(&[fx.target()], &groups, None, &config, &first);
        assert_eq!(replay[0].new_hp, first[0].new_hp);
        assert_eq!(replay[0].new_temp, first[0].new_temp);
        assert_eq!(replay[0].old_hp, 30);
    }

    #[test]
    fn groups_aggregate_into_one_entry() {
        let fx = Fixture::new(40);
        let token = fx.token.uuid.clone();
        let base = group(&[(8.0, DamageType::Slashing)]);
        let other = half_save(&token, true, false, false);
        let entry = fx.apply(&[base, other], &RulesConfig::default());
        assert_eq!(entry.applied_damage, 13);
        assert_eq!(entry.details.len(), 2);
    }
}
