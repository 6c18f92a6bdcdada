//! Item snapshots: the subset of an item document the workflow reads.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::effect::ActiveEffect;
use crate::damage::DamageType;
use crate::dice::RollData;
use crate::ids::ItemUuid;

/// The six abilities saves and checks are keyed by.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Ability {
    Str,
    Dex,
    Con,
    Int,
    Wis,
    Cha,
}

/// How an item resolves: which roll it asks for and how damage is typed.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    /// Melee weapon attack.
    Mwak,
    /// Ranged weapon attack.
    Rwak,
    /// Melee spell attack.
    Msak,
    /// Ranged spell attack.
    Rsak,
    /// Saving throw, no attack roll.
    Save,
    Heal,
    Util,
    #[default]
    Other,
}

impl ActionType {
    pub fn is_attack(self) -> bool {
        matches!(self, Self::Mwak | Self::Rwak | Self::Msak | Self::Rsak)
    }

    pub fn is_weapon_attack(self) -> bool {
        matches!(self, Self::Mwak | Self::Rwak)
    }

    pub fn is_spell_attack(self) -> bool {
        matches!(self, Self::Msak | Self::Rsak)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationType {
    #[default]
    Action,
    Bonus,
    Reaction,
    Special,
    None,
}

/// Damage taken by a target that succeeds the item's save.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnSave {
    #[default]
    Half,
    None,
    Full,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveSpec {
    pub ability: Ability,
    pub dc: i32,
    #[serde(default)]
    pub on_save: OnSave,
}

/// One declared damage line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamagePart {
    pub formula: String,
    #[serde(rename = "type", default)]
    pub damage_type: DamageType,
}

impl DamagePart {
    pub fn new(formula: impl Into<String>, damage_type: DamageType) -> Self {
        Self {
            formula: formula.into(),
            damage_type,
        }
    }
}

/// Save behaviour of the "other" damage formula relative to the item save.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtherSave {
    /// Follows the item's `on_save`.
    #[default]
    Default,
    Full,
    Half,
    None,
}

/// Secondary damage formula rolled after the main damage.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OtherFormula {
    pub formula: String,
    pub damage_type: Option<DamageType>,
    /// Only rolled on a critical hit.
    pub critical_only: bool,
    pub on_save: OtherSave,
}

bitflags! {
    /// Material properties checked against damage-resistance bypasses.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ItemProperties: u8 {
        const MAGICAL    = 1 << 0;
        const SILVERED   = 1 << 1;
        const ADAMANTINE = 1 << 2;
    }
}

/// Read-only view of an item for one workflow invocation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemSnapshot {
    pub uuid: ItemUuid,
    pub name: String,
    pub img: String,
    pub action_type: ActionType,
    /// Ability the attack is made with, when it differs from the default.
    pub ability: Option<Ability>,
    pub activation: ActivationType,
    /// Attack bonus formula added to the d20 (may reference `@` roll data).
    pub attack_bonus: String,
    pub damage_parts: Vec<DamagePart>,
    /// Replaces the first damage line when used two-handed.
    pub versatile: Option<String>,
    pub other: Option<OtherFormula>,
    pub save: Option<SaveSpec>,
    pub properties: ItemProperties,
    /// Activation condition expression for reaction items.
    pub reaction_condition: Option<String>,
    /// Trigger type a reaction item answers when no condition is set.
    pub reaction_trigger: Option<String>,
    pub requires_targets: bool,
    pub single_target: bool,
    pub concentration: bool,
    /// Damage from this item never prompts damaged/healed reactions.
    pub no_reactions: bool,
    pub has_template: bool,
    /// Effects applied to affected targets once the item resolves.
    pub effects: Vec<ActiveEffect>,
    /// User macro names fired at the workflow's extension points.
    pub on_use_macros: Vec<String>,
    pub roll_data: RollData,
}

impl ItemSnapshot {
    pub fn new(uuid: impl Into<String>, name: impl Into<String>, action_type: ActionType) -> Self {
        Self {
            uuid: ItemUuid::new(uuid),
            name: name.into(),
            action_type,
            ..Self::default()
        }
    }

    pub fn with_damage(mut self, formula: impl Into<String>, damage_type: DamageType) -> Self {
        self.damage_parts.push(DamagePart::new(formula, damage_type));
        self
    }

    pub fn with_save(mut self, ability: Ability, dc: i32, on_save: OnSave) -> Self {
        self.save = Some(SaveSpec {
            ability,
            dc,
            on_save,
        });
        self
    }

    pub fn with_attack_bonus(mut self, formula: impl Into<String>) -> Self {
        self.attack_bonus = formula.into();
        self
    }

    pub fn with_effect(mut self, effect: ActiveEffect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_properties(mut self, properties: ItemProperties) -> Self {
        self.properties = properties;
        self
    }

    pub fn is_reaction(&self) -> bool {
        self.activation == ActivationType::Reaction
    }

    /// Strength for melee weapons and Dexterity for ranged ones unless set.
    /// Spell attacks have no default.
    pub fn attack_ability(&self) -> Option<Ability> {
        self.ability.or(match self.action_type {
            ActionType::Mwak => Some(Ability::Str),
            ActionType::Rwak => Some(Ability::Dex),
            _ => None,
        })
    }

    pub fn is_magical(&self) -> bool {
        self.properties.contains(ItemProperties::MAGICAL)
    }

    /// The item's first declared damage type, used as the roll's fallback.
    pub fn primary_damage_type(&self) -> Option<&DamageType> {
        self.damage_parts.first().map(|part| &part.damage_type)
    }

    /// Damage lines in effect for this use, versatile replacing the first.
    pub fn effective_damage_parts(&self, versatile: bool) -> Vec<DamagePart> {
        let mut parts = self.damage_parts.clone();
        if versatile
            && let Some(formula) = &self.versatile
            && let Some(first) = parts.first_mut()
        {
            first.formula = formula.clone();
        }
        parts
    }
}
