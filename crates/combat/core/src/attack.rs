//! Attack rolls and hit checks.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::advantage::{RollMode, attack_paths};
use crate::dice::{DieRoller, FormulaError, Roll, RollData};
use crate::document::{Ability, ItemSnapshot};
use crate::flags::{ActorFlags, OptionalBonus, OptionalKind};

/// Builds the attack formula: the mode's d20 plus the item's attack bonus.
pub fn attack_formula(mode: RollMode, item: &ItemSnapshot) -> String {
    let bonus = item.attack_bonus.trim();
    if bonus.is_empty() {
        mode.d20().to_owned()
    } else if let Some(negative) = bonus.strip_prefix('-') {
        format!("{} - {}", mode.d20(), negative.trim())
    } else {
        format!("{} + {}", mode.d20(), bonus.trim_start_matches('+').trim())
    }
}

/// Rolls an attack for `item` in `mode`.
pub fn roll_attack(
    mode: RollMode,
    item: &ItemSnapshot,
    data: &RollData,
    roller: &mut dyn DieRoller,
) -> Result<Roll, FormulaError> {
    Roll::evaluate(&attack_formula(mode, item), data, roller)
}

/// True when `fail.attack.*` forces this attack to miss.
pub fn attack_auto_fails(
    flags: &ActorFlags,
    item: &ItemSnapshot,
    ability: Option<Ability>,
    ctx: &Value,
) -> bool {
    let owned = attack_paths(item.action_type, ability);
    let paths: Vec<&str> = owned.iter().map(String::as_str).collect();
    ActorFlags::any_holds(&flags.fail, &paths, ctx)
}

/// Outcome of one attack roll against one target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitCheck {
    pub total: i32,
    pub natural: Option<u32>,
    pub critical: bool,
    pub fumble: bool,
    pub hit: bool,
}

/// Natural 1 misses, a natural roll at or above `threshold` hits, anything
/// else compares the total against `ac`. A forced failure always misses.
pub fn check_hit(roll: &Roll, ac: i32, threshold: u32, auto_fail: bool) -> HitCheck {
    let natural = roll.natural_d20();
    let fumble = roll.is_fumble();
    let critical = !fumble && !auto_fail && roll.is_critical(threshold);
    let total = roll.total_floor();
    let hit = if auto_fail || fumble {
        false
    } else {
        critical || total >= ac
    };
    HitCheck {
        total,
        natural,
        critical,
        fumble,
        hit,
    }
}

/// Attack bonuses that may still be offered after the roll.
///
/// A fumble leaves only the re-roll grants.
pub fn offerable_attack_bonuses<'a>(flags: &'a ActorFlags, roll: &Roll) -> Vec<&'a OptionalBonus> {
    let fumble = roll.is_fumble();
    flags
        .optional_bonuses(OptionalKind::Attack)
        .filter(|bonus| !fumble || bonus.is_reroll())
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::dice::ScriptedRoller;
    use crate::document::ActionType;

    fn sword() -> ItemSnapshot {
        ItemSnapshot::new("Item.sword", "Longsword", ActionType::Mwak).with_attack_bonus("@mod + 2")
    }

    fn roll(natural: u32) -> Roll {
        let data = RollData::new().with("mod", 3.0);
        let mut roller = ScriptedRoller::new([natural]);
        roll_attack(RollMode::Normal, &sword(), &data, &mut roller).unwrap()
    }

    #[test]
    fn formula_carries_mode_and_bonus() {
        assert_eq!(attack_formula(RollMode::Advantage, &sword()), "2d20kh + @mod + 2");
        let plain = ItemSnapshot::new("Item.x", "Club", ActionType::Mwak);
        assert_eq!(attack_formula(RollMode::Disadvantage, &plain), "2d20kl");
        let minus = plain.with_attack_bonus("-1");
        assert_eq!(attack_formula(RollMode::Normal, &minus), "1d20 - 1");
    }

    #[test]
    fn total_against_ac() {
        assert!(check_hit(&roll(10), 15, 20, false).hit);
        assert!(!check_hit(&roll(9), 15, 20, false).hit);
    }

    #[test]
    fn natural_results_override_ac() {
        let fumble = check_hit(&roll(1), 1, 20, false);
        assert!(fumble.fumble && !fumble.hit);

        let crit = check_hit(&roll(20), 40, 20, false);
        assert!(crit.critical && crit.hit);

        let keen = check_hit(&roll(19), 40, 19, false);
        assert!(keen.critical && keen.hit);
    }

    #[test]
    fn forced_failure_misses_even_on_a_crit() {
        let out = check_hit(&roll(20), 5, 20, true);
        assert!(!out.hit && !out.critical);

        let flags = ActorFlags::from_changes([("flags.combat.fail.attack.mwak", "1")]);
        assert!(attack_auto_fails(&flags, &sword(), None, &json!({})));
        let ranged = ItemSnapshot::new("Item.bow", "Bow", ActionType::Rwak);
        assert!(!attack_auto_fails(&flags, &ranged, None, &json!({})));
    }

    #[test]
    fn fumble_keeps_only_reroll_bonuses() {
        let flags = ActorFlags::from_changes([
            ("flags.combat.optional.bless.attack", "1d4"),
            ("flags.combat.optional.luck.attack", "reroll"),
        ]);
        assert_eq!(offerable_attack_bonuses(&flags, &roll(12)).len(), 2);
        let after_fumble = offerable_attack_bonuses(&flags, &roll(1));
        assert_eq!(after_fumble.len(), 1);
        assert_eq!(after_fumble[0].name, "luck");
    }
}
