//! Rules configuration: tunable multipliers and ordering strategies.
//!
//! The damage pipeline exposes several choices where tables disagree about
//! the "right" answer. Each choice is an explicit enum so that every
//! combination can be exercised independently.

use serde::{Deserialize, Serialize};

use crate::damage::DamageType;

/// Relative order of damage reduction and the save multiplier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReductionOrder {
    /// `(damage - DR) × save`.
    #[default]
    DrThenSave,
    /// `max(0, damage × save - DR)`.
    SaveThenDr,
}

/// How multiple damage-reduction sources combine on a damage line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrStacking {
    /// Every source, including `all`, competes; the single highest wins.
    #[default]
    HighestOnly,
    /// Specific sources compete per line; `DR.all` is a separate pool spent
    /// across lines in order against each line's remaining headroom.
    ApportionAll,
}

/// Whether the damage threshold is tested before or after the final flat DR.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdOrder {
    /// Threshold compares against damage after final DR.
    #[default]
    AfterFinalDr,
    /// Threshold compares against damage before final DR is subtracted.
    BeforeFinalDr,
}

/// Strategy for rolling critical damage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticalDamage {
    /// Dice count doubled and rolled.
    #[default]
    Default,
    /// Base dice maximised, extra critical dice rolled.
    MaxNormal,
    /// Base dice rolled, extra critical dice maximised.
    MaxCriticalDice,
    /// Base dice rolled once, each result doubled.
    DoubleDice,
    /// Extra critical dice added; every die explodes.
    Explode,
    /// Only the first declared damage line gets critical dice.
    BaseWeaponOnly,
}

/// Rules-level configuration consumed by the damage and roll math.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    pub resistance_multiplier: f64,
    pub vulnerability_multiplier: f64,
    pub immunity_multiplier: f64,
    /// Multiplier a half-on-save item applies to a successful save.
    pub save_multiplier: f64,
    pub reduction_order: ReductionOrder,
    pub dr_stacking: DrStacking,
    pub threshold_order: ThresholdOrder,
    pub critical_damage: CriticalDamage,
    /// Type assigned to damage terms nothing else claims.
    pub default_damage_type: DamageType,
    /// Natural d20 result at or above which an attack is critical.
    pub critical_threshold: u32,
}

impl RulesConfig {
    pub const DEFAULT_CRITICAL_THRESHOLD: u32 = 20;
    pub const MIN_CONCENTRATION_DC: i32 = 10;

    pub fn new() -> Self {
        Self {
            resistance_multiplier: 0.5,
            vulnerability_multiplier: 2.0,
            immunity_multiplier: 0.0,
            save_multiplier: 0.5,
            reduction_order: ReductionOrder::default(),
            dr_stacking: DrStacking::default(),
            threshold_order: ThresholdOrder::default(),
            critical_damage: CriticalDamage::default(),
            default_damage_type: DamageType::None,
            critical_threshold: Self::DEFAULT_CRITICAL_THRESHOLD,
        }
    }

    pub fn with_reduction_order(mut self, order: ReductionOrder) -> Self {
        self.reduction_order = order;
        self
    }

    pub fn with_dr_stacking(mut self, stacking: DrStacking) -> Self {
        self.dr_stacking = stacking;
        self
    }

    pub fn with_critical_damage(mut self, strategy: CriticalDamage) -> Self {
        self.critical_damage = strategy;
        self
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self::new()
    }
}
