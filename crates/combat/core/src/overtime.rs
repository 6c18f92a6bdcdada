//! Overtime effect entries and their parsing.
//!
//! An effect change keyed `flags.combat.OverTime` carries a comma separated
//! `key=value` list describing damage or a save that repeats at a turn
//! boundary. [`OvertimeSpec::parse`] reads it and [`OvertimeSpec::to_item`]
//! synthesises the one-shot item the runtime feeds into a nested workflow.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::damage::DamageType;
use crate::document::{
    Ability, ActionType, ActivationType, ActiveEffect, DamagePart, ItemSnapshot, OnSave, SaveSpec,
};
use crate::error::{ErrorSeverity, GameError};
use crate::expr::{eval_condition, eval_number};
use crate::ids::ItemUuid;

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
pub enum TurnPhase {
    Start,
    #[default]
    End,
}

/// Damage taken when the overtime save succeeds.
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
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum SaveDamage {
    #[default]
    NoDamage,
    HalfDamage,
    FullDamage,
}

impl From<SaveDamage> for OnSave {
    fn from(value: SaveDamage) -> Self {
        match value {
            SaveDamage::NoDamage => OnSave::None,
            SaveDamage::HalfDamage => OnSave::Half,
            SaveDamage::FullDamage => OnSave::Full,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OvertimeError {
    #[error("overtime entry `{0}` is not key=value")]
    MalformedEntry(String),
    #[error("overtime key `{key}` has invalid value `{value}`")]
    InvalidValue { key: String, value: String },
    #[error("overtime spec has neither damage nor a save")]
    Empty,
}

impl GameError for OvertimeError {
    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Validation
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::MalformedEntry(_) => "OVERTIME_MALFORMED_ENTRY",
            Self::InvalidValue { .. } => "OVERTIME_INVALID_VALUE",
            Self::Empty => "OVERTIME_EMPTY",
        }
    }
}

/// Parsed overtime change value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OvertimeSpec {
    pub turn: TurnPhase,
    pub label: Option<String>,
    pub damage_roll: Option<String>,
    pub damage_type: DamageType,
    /// DC expression; may reference roll data.
    pub save_dc: Option<String>,
    pub save_ability: Option<Ability>,
    pub save_damage: SaveDamage,
    /// Delete the effect once the owner saves.
    pub save_remove: bool,
    /// Checked before anything is rolled; true deletes the effect.
    pub remove_condition: Option<String>,
    /// The save is made with the owner's action instead of automatically.
    pub action_save: bool,
}

impl OvertimeSpec {
    pub fn parse(value: &str) -> Result<Self, OvertimeError> {
        let mut spec = Self {
            save_remove: true,
            ..Self::default()
        };
        for (key, raw) in split_entries(value)? {
            let invalid = || OvertimeError::InvalidValue {
                key: key.to_owned(),
                value: raw.to_owned(),
            };
            match key {
                "turn" => spec.turn = raw.parse().map_err(|_| invalid())?,
                "label" => spec.label = Some(raw.to_owned()),
                "damageRoll" => spec.damage_roll = Some(raw.to_owned()),
                "damageType" => spec.damage_type = DamageType::from(raw),
                "saveDC" => spec.save_dc = Some(raw.to_owned()),
                "saveAbility" => spec.save_ability = Some(raw.parse().map_err(|_| invalid())?),
                "saveDamage" => spec.save_damage = raw.parse().map_err(|_| invalid())?,
                "saveRemove" => spec.save_remove = parse_bool(raw).ok_or_else(invalid)?,
                "removeCondition" => spec.remove_condition = Some(raw.to_owned()),
                "actionSave" => spec.action_save = parse_bool(raw).ok_or_else(invalid)?,
                // Unknown keys are ignored so newer entries still run.
                _ => {}
            }
        }
        if spec.damage_roll.is_none()
            && spec.save_ability.is_none()
            && spec.remove_condition.is_none()
        {
            return Err(OvertimeError::Empty);
        }
        Ok(spec)
    }

    pub fn has_save(&self) -> bool {
        self.save_ability.is_some() && self.save_dc.is_some()
    }

    /// Whether `removeCondition` holds. A malformed condition never removes.
    pub fn should_remove(&self, ctx: &Value) -> bool {
        self.remove_condition
            .as_deref()
            .is_some_and(|condition| eval_condition(condition, ctx, false))
    }

    /// Evaluates the DC against `ctx`; a missing or malformed DC is `None`.
    pub fn resolve_dc(&self, ctx: &Value) -> Option<i32> {
        let dc = self.save_dc.as_deref()?;
        dc.trim()
            .parse::<i32>()
            .ok()
            .or_else(|| eval_number(dc, ctx).map(|value| value.floor() as i32))
    }

    /// The one-shot item a nested workflow runs for this effect.
    pub fn to_item(&self, effect: &ActiveEffect, dc: Option<i32>) -> ItemSnapshot {
        let name = self.label.clone().unwrap_or_else(|| effect.label.clone());
        let action_type = match (self.save_ability, dc) {
            (Some(_), Some(_)) => ActionType::Save,
            _ if self.damage_type.is_restorative() => ActionType::Heal,
            _ => ActionType::Other,
        };
        let mut item = ItemSnapshot {
            uuid: ItemUuid::new(format!("OverTime.{}", effect.id)),
            name,
            action_type,
            activation: ActivationType::Special,
            ..ItemSnapshot::default()
        };
        if let Some(formula) = &self.damage_roll {
            item.damage_parts
                .push(DamagePart::new(formula.clone(), self.damage_type.clone()));
        }
        if let (Some(ability), Some(dc)) = (self.save_ability, dc) {
            item.save = Some(SaveSpec {
                ability,
                dc,
                on_save: self.save_damage.into(),
            });
        }
        item
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Splits on commas that start a new `key=` entry, so expressions such as
/// `removeCondition=a == 1, b` keep their commas.
fn split_entries(value: &str) -> Result<Vec<(&str, &str)>, OvertimeError> {
    let mut entries: Vec<(&str, &str)> = Vec::new();
    let mut start = 0;
    let bytes = value.as_bytes();
    let mut boundaries = Vec::new();
    for (index, byte) in bytes.iter().enumerate() {
        if *byte == b',' && starts_entry(&value[index + 1..]) {
            boundaries.push(index);
        }
    }
    boundaries.push(value.len());

    for end in boundaries {
        let segment = value[start..end].trim();
        start = end + 1;
        if segment.is_empty() {
            continue;
        }
        let (key, raw) = segment
            .split_once('=')
            .ok_or_else(|| OvertimeError::MalformedEntry(segment.to_owned()))?;
        entries.push((key.trim(), raw.trim()));
    }
    Ok(entries)
}

fn starts_entry(rest: &str) -> bool {
    let rest = rest.trim_start();
    let key_len = rest
        .bytes()
        .take_while(|b| b.is_ascii_alphanumeric())
        .count();
    if key_len == 0 {
        return false;
    }
    let after = rest[key_len..].trim_start();
    after.starts_with('=') && !after.starts_with("==")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const BURNING: &str = "turn=start, label=Burning, damageRoll=1d6, damageType=fire, \
        saveDC=13, saveAbility=dex, saveDamage=halfdamage, saveRemove=true";

    #[test]
    fn parses_full_entry() {
        let spec = OvertimeSpec::parse(BURNING).unwrap();
        assert_eq!(spec.turn, TurnPhase::Start);
        assert_eq!(spec.label.as_deref(), Some("Burning"));
        assert_eq!(spec.damage_type, DamageType::Fire);
        assert_eq!(spec.save_ability, Some(Ability::Dex));
        assert_eq!(spec.save_damage, SaveDamage::HalfDamage);
        assert!(spec.save_remove && spec.has_save());
    }

    #[test]
    fn expressions_keep_their_commas() {
        let spec = OvertimeSpec::parse(
            "turn=end,damageRoll=2d4,removeCondition=actor.flags.x.includes('a,b') || actor.hp.value == 0",
        )
        .unwrap();
        assert_eq!(
            spec.remove_condition.as_deref(),
            Some("actor.flags.x.includes('a,b') || actor.hp.value == 0")
        );
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            OvertimeSpec::parse("turn=middle,damageRoll=1d4"),
            Err(OvertimeError::InvalidValue { .. })
        ));
        assert_eq!(OvertimeSpec::parse("turn=end"), Err(OvertimeError::Empty));
        assert!(matches!(
            OvertimeSpec::parse("damageRoll"),
            Err(OvertimeError::MalformedEntry(_))
        ));
    }

    #[test]
    fn dc_resolves_from_context() {
        let mut spec = OvertimeSpec::parse(BURNING).unwrap();
        assert_eq!(spec.resolve_dc(&json!({})), Some(13));
        spec.save_dc = Some("8 + roll.prof".into());
        assert_eq!(spec.resolve_dc(&json!({ "roll": { "prof": 3 } })), Some(11));
    }

    #[test]
    fn remove_condition_defaults_to_keep() {
        let spec = OvertimeSpec::parse("damageRoll=1d4,removeCondition=actor.hp.value <= 0").unwrap();
        assert!(spec.should_remove(&json!({ "actor": { "hp": { "value": 0 } } })));
        assert!(!spec.should_remove(&json!({ "actor": { "hp": { "value": 5 } } })));

        let broken = OvertimeSpec::parse("damageRoll=1d4,removeCondition=((").unwrap();
        assert!(!broken.should_remove(&json!({})));
    }

    #[test]
    fn synthesised_item_carries_damage_and_save() {
        let spec = OvertimeSpec::parse(BURNING).unwrap();
        let effect = ActiveEffect::new("fx1", "On Fire");
        let item = spec.to_item(&effect, Some(13));
        assert_eq!(item.uuid.as_str(), "OverTime.fx1");
        assert_eq!(item.name, "Burning");
        assert_eq!(item.action_type, ActionType::Save);
        assert_eq!(item.damage_parts, vec![DamagePart::new("1d6", DamageType::Fire)]);
        assert_eq!(item.save.map(|s| s.on_save), Some(OnSave::Half));
    }
}
