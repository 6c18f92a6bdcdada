//! Saving throws and their partition into save sets.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::advantage::{RollMode, save_paths};
use crate::config::RulesConfig;
use crate::dice::{DieRoller, FormulaError, Roll, RollData};
use crate::document::{Ability, ActorSnapshot, OnSave, OtherSave, SaveSpec};
use crate::flags::ActorFlags;
use crate::ids::TokenUuid;

/// Damage multiplier a successful save applies for `on_save`.
pub fn save_multiplier(on_save: OnSave, config: &RulesConfig) -> f64 {
    match on_save {
        OnSave::Half => config.save_multiplier,
        OnSave::None => 0.0,
        OnSave::Full => 1.0,
    }
}

/// Save multiplier of the "other" damage formula.
pub fn other_save_multiplier(other: OtherSave, item_save: OnSave, config: &RulesConfig) -> f64 {
    match other {
        OtherSave::Default => save_multiplier(item_save, config),
        OtherSave::Full => 1.0,
        OtherSave::Half => config.save_multiplier,
        OtherSave::None => 0.0,
    }
}

pub fn save_formula(mode: RollMode, modifier: i32) -> String {
    match modifier {
        0 => mode.d20().to_owned(),
        m if m < 0 => format!("{} - {}", mode.d20(), -m),
        m => format!("{} + {m}", mode.d20()),
    }
}

pub fn roll_save(
    actor: &ActorSnapshot,
    ability: Ability,
    mode: RollMode,
    roller: &mut dyn DieRoller,
) -> Result<Roll, FormulaError> {
    let formula = save_formula(mode, actor.save_modifier(ability));
    Roll::evaluate(&formula, &RollData::new(), roller)
}

/// Save-related traits of one target for one ability.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SaverTraits {
    pub auto_fail: bool,
    pub super_saver: bool,
    pub semi_super_saver: bool,
}

impl SaverTraits {
    pub fn from_flags(flags: &ActorFlags, ability: Ability, ctx: &Value) -> Self {
        let owned = save_paths(ability);
        let paths: Vec<&str> = owned.iter().map(String::as_str).collect();
        let ability_key = ability.to_string();
        let saver_paths = ["all", ability_key.as_str()];
        Self {
            auto_fail: ActorFlags::any_holds(&flags.fail, &paths, ctx),
            super_saver: ActorFlags::any_holds(&flags.super_saver, &saver_paths, ctx),
            semi_super_saver: ActorFlags::any_holds(&flags.semi_super_saver, &saver_paths, ctx),
        }
    }
}

/// One target's save.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SaveOutcome {
    pub token: TokenUuid,
    pub total: i32,
    pub natural: Option<u32>,
    pub dc: i32,
    pub success: bool,
    pub auto_failed: bool,
    pub mode: RollMode,
}

/// Success is total ≥ DC unless a fail flag forces the save.
pub fn check_save(
    token: TokenUuid,
    roll: &Roll,
    spec: &SaveSpec,
    traits: SaverTraits,
    mode: RollMode,
) -> SaveOutcome {
    let total = roll.total_floor();
    SaveOutcome {
        token,
        total,
        natural: roll.natural_d20(),
        dc: spec.dc,
        success: !traits.auto_fail && total >= spec.dc,
        auto_failed: traits.auto_fail,
        mode,
    }
}

/// Save results of a workflow.
///
/// `saves` holds the tokens that succeeded. The saver sets record which
/// tokens carry the trait, whatever their result, so a super saver that
/// succeeded sits in both `saves` and `super_savers`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveResults {
    pub saves: BTreeSet<TokenUuid>,
    pub failures: BTreeSet<TokenUuid>,
    pub super_savers: BTreeSet<TokenUuid>,
    pub semi_super_savers: BTreeSet<TokenUuid>,
}

impl SaveResults {
    pub fn record(&mut self, outcome: &SaveOutcome, traits: SaverTraits) {
        let token = outcome.token.clone();
        if outcome.success {
            self.failures.remove(&token);
            self.saves.insert(token.clone());
        } else {
            self.saves.remove(&token);
            self.failures.insert(token.clone());
        }
        if traits.super_saver {
            self.super_savers.insert(token.clone());
        }
        if traits.semi_super_saver {
            self.semi_super_savers.insert(token);
        }
    }

    pub fn saved(&self, token: &TokenUuid) -> bool {
        self.saves.contains(token)
    }

    pub fn is_empty(&self) -> bool {
        self.saves.is_empty() && self.failures.is_empty()
    }
}
