//! Actor and token snapshots.

use std::collections::{BTreeMap, BTreeSet};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::effect::ActiveEffect;
use super::item::Ability;
use crate::concentration::ConcentrationData;
use crate::dice::RollData;
use crate::ids::{ActorUuid, TokenUuid, UserId};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct HitPoints {
    pub value: i32,
    pub max: i32,
    pub temp: i32,
    /// Temporary bonus to maximum hit points.
    pub tempmax: i32,
}

impl HitPoints {
    pub fn new(value: i32, max: i32) -> Self {
        Self {
            value,
            max,
            temp: 0,
            tempmax: 0,
        }
    }

    /// Upper bound for `value`.
    pub fn effective_max(&self) -> i32 {
        (self.max + self.tempmax).max(0)
    }
}

bitflags! {
    /// Materials that defeat a physical resistance or immunity.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Bypass: u8 {
        /// `mgc`: magical attacks ignore the trait.
        const MAGICAL    = 1 << 0;
        /// `sil`: silvered weapons ignore the trait.
        const SILVERED   = 1 << 1;
        /// `ada`: adamantine weapons ignore the trait.
        const ADAMANTINE = 1 << 2;
    }
}

/// One of the immunity / resistance / vulnerability trait lists.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraitSet {
    /// Damage type names plus the `physical` and `nonmagic` buckets.
    pub value: BTreeSet<String>,
    pub bypasses: Bypass,
    /// Free text, `;` separated.
    pub custom: String,
}

impl TraitSet {
    pub fn of(values: &[&str]) -> Self {
        Self {
            value: values.iter().map(|v| (*v).to_owned()).collect(),
            ..Self::default()
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.value.contains(name)
    }

    pub fn custom_entries(&self) -> impl Iterator<Item = &str> {
        self.custom
            .split(';')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty() && self.custom.trim().is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DamageTraits {
    /// Immunities.
    pub di: TraitSet,
    /// Resistances.
    pub dr: TraitSet,
    /// Vulnerabilities.
    pub dv: TraitSet,
}

/// Per-combat-round action economy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundUsage {
    pub action: bool,
    pub bonus: bool,
    pub reaction: bool,
}

/// Read-only actor view captured once per workflow invocation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorSnapshot {
    pub uuid: ActorUuid,
    pub name: String,
    pub hp: HitPoints,
    pub ac: i32,
    pub traits: DamageTraits,
    /// Saving throw modifiers.
    pub saves: BTreeMap<Ability, i32>,
    pub incapacitated: bool,
    pub round_usage: RoundUsage,
    /// Controlling player, `None` for coordinator-owned actors.
    pub owner: Option<UserId>,
    /// Damage below this is ignored entirely.
    pub damage_threshold: Option<i32>,
    pub effects: Vec<ActiveEffect>,
    /// Raw document flags (`flags.combat.*`), overridden by effect changes.
    pub flags: BTreeMap<String, String>,
    pub roll_data: RollData,
    pub concentration: Option<ConcentrationData>,
    /// Reaction-capable items the actor carries.
    pub items: Vec<super::item::ItemSnapshot>,
}

impl ActorSnapshot {
    pub fn new(uuid: impl Into<String>, name: impl Into<String>, hp: HitPoints, ac: i32) -> Self {
        Self {
            uuid: ActorUuid::new(uuid),
            name: name.into(),
            hp,
            ac,
            ..Self::default()
        }
    }

    pub fn with_effect(mut self, effect: ActiveEffect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_flag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.flags.insert(key.into(), value.into());
        self
    }

    pub fn save_modifier(&self, ability: Ability) -> i32 {
        self.saves.get(&ability).copied().unwrap_or(0)
    }

    /// Unconscious, dead or explicitly incapacitated.
    pub fn is_incapacitated(&self) -> bool {
        self.incapacitated || self.hp.value <= 0
    }

    /// Flag key/value pairs: document flags first, then enabled effect changes
    /// in effect order, so later sources win when collected into a map.
    pub fn flag_changes(&self) -> impl Iterator<Item = (&str, &str)> {
        let document = self.flags.iter().map(|(k, v)| (k.as_str(), v.as_str()));
        let effects = self
            .effects
            .iter()
            .filter(|effect| !effect.disabled)
            .flat_map(|effect| effect.changes.iter())
            .map(|change| (change.key.as_str(), change.value.as_str()));
        document.chain(effects)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenSnapshot {
    pub uuid: TokenUuid,
    pub actor: ActorUuid,
    pub name: String,
}

impl TokenSnapshot {
    pub fn new(uuid: impl Into<String>, actor: ActorUuid, name: impl Into<String>) -> Self {
        Self {
            uuid: TokenUuid::new(uuid),
            actor,
            name: name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_max_includes_tempmax() {
        let hp = HitPoints {
            value: 10,
            max: 20,
            temp: 0,
            tempmax: 5,
        };
        assert_eq!(hp.effective_max(), 25);
    }

    #[test]
    fn custom_traits_split_on_semicolons() {
        let set = TraitSet {
            custom: "Ectoplasm; ; Spectral fire".into(),
            ..TraitSet::default()
        };
        assert_eq!(
            set.custom_entries().collect::<Vec<_>>(),
            vec!["Ectoplasm", "Spectral fire"]
        );
    }

    #[test]
    fn disabled_effects_contribute_no_flags() {
        let mut disabled = ActiveEffect::new("e2", "Bless").with_change("flags.combat.b", "1");
        disabled.disabled = true;
        let actor = ActorSnapshot::new("Actor.a", "A", HitPoints::new(5, 5), 10)
            .with_flag("flags.combat.a", "1")
            .with_effect(disabled);

        let keys: Vec<_> = actor.flag_changes().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["flags.combat.a"]);
    }
}
