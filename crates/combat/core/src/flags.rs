//! Typed accessors over the `flags.combat.*` namespace.
//!
//! Flag values arrive as strings on actor documents and effect changes.
//! [`ActorFlags::from_actor`] parses them once per workflow invocation so the
//! rest of the engine reads typed fields instead of re-walking string paths.
//!
//! | key                                     | meaning                               |
//! |-----------------------------------------|---------------------------------------|
//! | `advantage.<path>`                      | conditional advantage on own rolls    |
//! | `disadvantage.<path>`                   | conditional disadvantage              |
//! | `grants.advantage.<path>`               | attackers against this actor gain adv |
//! | `grants.disadvantage.<path>`            | attackers suffer disadvantage         |
//! | `fail.<path>`                           | roll automatically fails              |
//! | `DR.<source>`                           | damage reduction formula              |
//! | `superSaver.<abl or all>`               | no damage on save, half on fail       |
//! | `semiSuperSaver.<abl or all>`           | half damage on a failed save          |
//! | `optional.<name>.<kind>`                | optional bonus (formula or `reroll`)  |
//! | `optional.<name>.count` / `.label`      | uses left and dialog label            |
//! | `max.damage.all` / `min.damage.all`     | damage dice maximised / floored       |
//! | `damageMultiplier.<type>`               | explicit trait multiplier override    |

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::document::ActorSnapshot;
use crate::expr::eval_condition;

pub const FLAG_PREFIX: &str = "flags.combat.";

/// A flag that may hold unconditionally or only when an expression is true.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlagCondition {
    Always,
    Never,
    Expr(String),
}

impl FlagCondition {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "" | "0" | "false" => Self::Never,
            "1" | "true" => Self::Always,
            other => Self::Expr(other.to_owned()),
        }
    }

    /// Whether the flag applies; malformed expressions count as applying.
    pub fn holds(&self, ctx: &Value) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Expr(source) => eval_condition(source, ctx, true),
        }
    }
}

/// Roll an optional bonus modifies.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OptionalKind {
    Attack,
    Damage,
    Save,
    Ac,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "formula", rename_all = "lowercase")]
pub enum BonusValue {
    Formula(String),
    /// Re-roll the kept d20 and keep the new result.
    Reroll,
}

/// One optional bonus grant an actor may choose to spend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionalBonus {
    pub name: String,
    pub kind: OptionalKind,
    pub value: BonusValue,
    /// Remaining uses; `None` is unlimited.
    pub count: Option<u32>,
    pub label: String,
}

impl OptionalBonus {
    pub fn is_available(&self) -> bool {
        self.count.is_none_or(|count| count > 0)
    }

    pub fn is_reroll(&self) -> bool {
        self.value == BonusValue::Reroll
    }

    /// Full flag key of the use counter.
    pub fn count_key(&self) -> String {
        format!("{FLAG_PREFIX}optional.{}.count", self.name)
    }
}

/// Parsed view of every `flags.combat.*` entry on an actor.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ActorFlags {
    pub advantage: BTreeMap<String, FlagCondition>,
    pub disadvantage: BTreeMap<String, FlagCondition>,
    pub grants_advantage: BTreeMap<String, FlagCondition>,
    pub grants_disadvantage: BTreeMap<String, FlagCondition>,
    pub fail: BTreeMap<String, FlagCondition>,
    /// DR source key (after `DR.`) to formula.
    pub damage_reduction: BTreeMap<String, String>,
    pub super_saver: BTreeMap<String, FlagCondition>,
    pub semi_super_saver: BTreeMap<String, FlagCondition>,
    pub optional: Vec<OptionalBonus>,
    pub max_damage: bool,
    pub min_damage: Option<u32>,
    pub damage_multiplier: BTreeMap<String, f64>,
}

impl ActorFlags {
    pub fn from_actor(actor: &ActorSnapshot) -> Self {
        Self::from_changes(actor.flag_changes())
    }

    /// Later entries override earlier ones with the same key.
    pub fn from_changes<'a>(changes: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut raw: BTreeMap<&str, &str> = BTreeMap::new();
        for (key, value) in changes {
            if let Some(path) = key.strip_prefix(FLAG_PREFIX) {
                raw.insert(path, value);
            }
        }

        let mut flags = Self::default();
        let mut optional: BTreeMap<&str, OptionalParts<'_>> = BTreeMap::new();

        for (path, value) in raw {
            if let Some(rest) = path.strip_prefix("advantage.") {
                flags.advantage.insert(rest.to_owned(), FlagCondition::parse(value));
            } else if let Some(rest) = path.strip_prefix("disadvantage.") {
                flags.disadvantage.insert(rest.to_owned(), FlagCondition::parse(value));
            } else if let Some(rest) = path.strip_prefix("grants.advantage.") {
                flags.grants_advantage.insert(rest.to_owned(), FlagCondition::parse(value));
            } else if let Some(rest) = path.strip_prefix("grants.disadvantage.") {
                flags.grants_disadvantage.insert(rest.to_owned(), FlagCondition::parse(value));
            } else if let Some(rest) = path.strip_prefix("fail.") {
                flags.fail.insert(rest.to_owned(), FlagCondition::parse(value));
            } else if let Some(rest) = path.strip_prefix("DR.") {
                flags.damage_reduction.insert(rest.to_owned(), value.to_owned());
            } else if let Some(rest) = path.strip_prefix("superSaver.") {
                flags.super_saver.insert(rest.to_owned(), FlagCondition::parse(value));
            } else if let Some(rest) = path.strip_prefix("semiSuperSaver.") {
                flags.semi_super_saver.insert(rest.to_owned(), FlagCondition::parse(value));
            } else if let Some(rest) = path.strip_prefix("damageMultiplier.") {
                match value.trim().parse::<f64>() {
                    Ok(multiplier) => {
                        flags.damage_multiplier.insert(rest.to_owned(), multiplier);
                    }
                    Err(_) => warn!(
                        target: "combat_core::flags",
                        key = path,
                        value,
                        "ignoring non-numeric damage multiplier"
                    ),
                }
            } else if path == "max.damage.all" {
                flags.max_damage = FlagCondition::parse(value) == FlagCondition::Always;
            } else if path == "min.damage.all" {
                flags.min_damage = value.trim().parse().ok();
            } else if let Some(rest) = path.strip_prefix("optional.") {
                let Some((name, field)) = rest.split_once('.') else {
                    continue;
                };
                let parts = optional.entry(name).or_default();
                match field {
                    "count" => parts.count = Some(value),
                    "label" => parts.label = Some(value),
                    other => {
                        let kind = other.split('.').next().unwrap_or(other);
                        if let Ok(kind) = kind.parse::<OptionalKind>() {
                            parts.grants.push((kind, value));
                        }
                    }
                }
            }
        }

        for (name, parts) in optional {
            let count = parts.count.and_then(|count| match count.trim().parse::<u32>() {
                Ok(n) => Some(n),
                Err(_) => {
                    warn!(
                        target: "combat_core::flags",
                        name,
                        count,
                        "optional bonus count is not numeric, treating as unlimited"
                    );
                    None
                }
            });
            for (kind, value) in parts.grants {
                let value = if value.trim().eq_ignore_ascii_case("reroll") {
                    BonusValue::Reroll
                } else {
                    BonusValue::Formula(value.trim().to_owned())
                };
                flags.optional.push(OptionalBonus {
                    name: name.to_owned(),
                    kind,
                    value,
                    count,
                    label: parts.label.unwrap_or(name).to_owned(),
                });
            }
        }

        flags
    }

    /// Optional bonuses of `kind` that still have uses left.
    pub fn optional_bonuses(&self, kind: OptionalKind) -> impl Iterator<Item = &OptionalBonus> {
        self.optional
            .iter()
            .filter(move |bonus| bonus.kind == kind && bonus.is_available())
    }

    /// True when any of `paths` is present in `map` and holds in `ctx`.
    pub fn any_holds(map: &BTreeMap<String, FlagCondition>, paths: &[&str], ctx: &Value) -> bool {
        Self::holding(map, paths, ctx).next().is_some()
    }

    /// Paths from `paths` present in `map` whose condition holds in `ctx`.
    pub fn holding<'a>(
        map: &'a BTreeMap<String, FlagCondition>,
        paths: &'a [&'a str],
        ctx: &'a Value,
    ) -> impl Iterator<Item = &'a str> + 'a {
        paths.iter().copied().filter(move |path| {
            map.get(*path)
                .is_some_and(|condition| condition.holds(ctx))
        })
    }
}

#[derive(Default)]
struct OptionalParts<'a> {
    grants: Vec<(OptionalKind, &'a str)>,
    count: Option<&'a str>,
    label: Option<&'a str>,
}
