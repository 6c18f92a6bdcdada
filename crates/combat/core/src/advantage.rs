//! Advantage and disadvantage resolution.
//!
//! Sources are merged into one [`RollModeResolution`]: the caller's explicit
//! option, held modifier keys, the roller's own conditional flags and, for
//! attacks, grants on the target. Advantage and disadvantage together cancel.

use core::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{Ability, ActionType};
use crate::flags::{ActorFlags, FLAG_PREFIX};

/// How the d20 of a roll is rolled.
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
pub enum RollMode {
    #[default]
    Normal,
    Advantage,
    Disadvantage,
}

impl RollMode {
    /// The d20 term for this mode.
    pub fn d20(self) -> &'static str {
        match self {
            Self::Normal => "1d20",
            Self::Advantage => "2d20kh",
            Self::Disadvantage => "2d20kl",
        }
    }
}

/// Modifier keys held when the roll was requested.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyModifiers {
    pub advantage: bool,
    pub disadvantage: bool,
    /// Skip the roll dialog and roll straight away.
    pub fast_forward: bool,
}

/// Why a mode fired, for chat display.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "camelCase")]
pub enum ModeSource {
    Option,
    Keys,
    /// The roller's own flag, by path below `advantage.` / `disadvantage.`.
    Flag(String),
    /// A target grant, by path below `grants.advantage.` / `grants.disadvantage.`.
    Grant(String),
}

impl fmt::Display for ModeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Option => f.write_str("Roll option"),
            Self::Keys => f.write_str("Modifier keys"),
            Self::Flag(path) => write!(f, "{FLAG_PREFIX}{path}"),
            Self::Grant(path) => write!(f, "{FLAG_PREFIX}grants.{path}"),
        }
    }
}

/// Final roll mode plus every source that asserted each side.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollModeResolution {
    pub mode: RollMode,
    pub advantage: Vec<ModeSource>,
    pub disadvantage: Vec<ModeSource>,
}

impl RollModeResolution {
    fn finish(mut self) -> Self {
        self.mode = match (self.advantage.is_empty(), self.disadvantage.is_empty()) {
            (false, true) => RollMode::Advantage,
            (true, false) => RollMode::Disadvantage,
            _ => RollMode::Normal,
        };
        self
    }

    /// Human-readable attribution lines.
    pub fn attributions(&self) -> Vec<String> {
        let adv = self.advantage.iter().map(|s| format!("Advantage: {s}"));
        let dis = self.disadvantage.iter().map(|s| format!("Disadvantage: {s}"));
        adv.chain(dis).collect()
    }

    fn with_caller(mut self, explicit: Option<RollMode>, keys: KeyModifiers) -> Self {
        match explicit {
            Some(RollMode::Advantage) => self.advantage.push(ModeSource::Option),
            Some(RollMode::Disadvantage) => self.disadvantage.push(ModeSource::Option),
            Some(RollMode::Normal) | None => {}
        }
        if keys.advantage {
            self.advantage.push(ModeSource::Keys);
        }
        if keys.disadvantage {
            self.disadvantage.push(ModeSource::Keys);
        }
        self
    }
}

/// Flag paths consulted for an attack roll.
pub fn attack_paths(action: ActionType, ability: Option<Ability>) -> Vec<String> {
    let mut paths = vec![
        "all".to_owned(),
        "attack.all".to_owned(),
        format!("attack.{action}"),
    ];
    if let Some(ability) = ability {
        paths.push(format!("attack.{ability}"));
    }
    paths
}

/// Flag paths consulted for a saving throw.
pub fn save_paths(ability: Ability) -> Vec<String> {
    vec![
        "all".to_owned(),
        "ability.all".to_owned(),
        "ability.save.all".to_owned(),
        format!("ability.save.{ability}"),
    ]
}

fn collect(
    out: &mut Vec<ModeSource>,
    map: &std::collections::BTreeMap<String, crate::flags::FlagCondition>,
    paths: &[&str],
    ctx: &Value,
    wrap: impl Fn(String) -> ModeSource,
) {
    for source in ActorFlags::holding(map, paths, ctx).map(|path| wrap(path.to_owned())) {
        if !out.contains(&source) {
            out.push(source);
        }
    }
}

/// Resolves the mode of an attack roll.
///
/// `ctx` is the condition context with `actor` as the attacker. Each target
/// comes with its own context, in which its grant conditions are evaluated;
/// grants from every target count.
pub fn resolve_attack_mode(
    explicit: Option<RollMode>,
    keys: KeyModifiers,
    attacker: &ActorFlags,
    targets: &[(&ActorFlags, &Value)],
    action: ActionType,
    ability: Option<Ability>,
    ctx: &Value,
) -> RollModeResolution {
    let owned = attack_paths(action, ability);
    let paths: Vec<&str> = owned.iter().map(String::as_str).collect();
    let mut out = RollModeResolution::default().with_caller(explicit, keys);

    collect(&mut out.advantage, &attacker.advantage, &paths, ctx, |p| {
        ModeSource::Flag(format!("advantage.{p}"))
    });
    collect(&mut out.disadvantage, &attacker.disadvantage, &paths, ctx, |p| {
        ModeSource::Flag(format!("disadvantage.{p}"))
    });
    for (target, target_ctx) in targets {
        collect(&mut out.advantage, &target.grants_advantage, &paths, target_ctx, |p| {
            ModeSource::Grant(format!("advantage.{p}"))
        });
        collect(&mut out.disadvantage, &target.grants_disadvantage, &paths, target_ctx, |p| {
            ModeSource::Grant(format!("disadvantage.{p}"))
        });
    }
    out.finish()
}

/// Resolves the mode of a saving throw made by the actor behind `saver`.
pub fn resolve_save_mode(
    explicit: Option<RollMode>,
    keys: KeyModifiers,
    saver: &ActorFlags,
    ability: Ability,
    ctx: &Value,
) -> RollModeResolution {
    let owned = save_paths(ability);
    let paths: Vec<&str> = owned.iter().map(String::as_str).collect();
    let mut out = RollModeResolution::default().with_caller(explicit, keys);
    collect(&mut out.advantage, &saver.advantage, &paths, ctx, |p| {
        ModeSource::Flag(format!("advantage.{p}"))
    });
    collect(&mut out.disadvantage, &saver.disadvantage, &paths, ctx, |p| {
        ModeSource::Flag(format!("disadvantage.{p}"))
    });
    out.finish()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn flags(pairs: &[(&str, &str)]) -> ActorFlags {
        ActorFlags::from_changes(pairs.iter().copied())
    }

    fn attack(
        explicit: Option<RollMode>,
        keys: KeyModifiers,
        attacker: &ActorFlags,
        target: Option<&ActorFlags>,
    ) -> RollModeResolution {
        let ctx = json!({});
        let targets: Vec<(&ActorFlags, &Value)> = target.into_iter().map(|t| (t, &ctx)).collect();
        resolve_attack_mode(
            explicit,
            keys,
            attacker,
            &targets,
            ActionType::Mwak,
            Some(Ability::Str),
            &ctx,
        )
    }

    #[test]
    fn single_sources_set_the_mode() {
        let none = ActorFlags::default();
        let keys = KeyModifiers {
            advantage: true,
            ..KeyModifiers::default()
        };
        let out = attack(None, keys, &none, None);
        assert_eq!(out.mode, RollMode::Advantage);
        assert_eq!(out.advantage, vec![ModeSource::Keys]);

        let attacker = flags(&[("flags.combat.disadvantage.attack.mwak", "1")]);
        let out = attack(None, KeyModifiers::default(), &attacker, None);
        assert_eq!(out.mode, RollMode::Disadvantage);
        assert_eq!(
            out.attributions(),
            vec!["Disadvantage: flags.combat.disadvantage.attack.mwak".to_owned()]
        );
    }

    #[test]
    fn any_mix_of_both_sides_cancels() {
        let attacker = flags(&[("flags.combat.advantage.attack.all", "1")]);
        let target = flags(&[("flags.combat.grants.disadvantage.all", "true")]);
        let dis_keys = KeyModifiers {
            disadvantage: true,
            ..KeyModifiers::default()
        };
        let none = ActorFlags::default();

        let cases = [
            attack(Some(RollMode::Advantage), dis_keys, &none, None),
            attack(None, KeyModifiers::default(), &attacker, Some(&target)),
            attack(Some(RollMode::Disadvantage), KeyModifiers::default(), &attacker, None),
            attack(None, dis_keys, &attacker, Some(&target)),
        ];
        for out in cases {
            assert_eq!(out.mode, RollMode::Normal, "{out:?}");
            assert!(!out.advantage.is_empty() && !out.disadvantage.is_empty());
        }
    }

    #[test]
    fn conditional_flags_use_the_context() {
        let attacker = flags(&[("flags.combat.advantage.attack.all", "target.hp.value < 5")]);
        let low = json!({ "target": { "hp": { "value": 2 } } });
        let out = resolve_attack_mode(
            None,
            KeyModifiers::default(),
            &attacker,
            &[],
            ActionType::Rwak,
            None,
            &low,
        );
        assert_eq!(out.mode, RollMode::Advantage);
    }

    #[test]
    fn ability_flags_apply_to_matching_attacks() {
        let attacker = flags(&[("flags.combat.advantage.attack.dex", "1")]);
        let ctx = json!({});
        let resolve = |ability| {
            resolve_attack_mode(
                None,
                KeyModifiers::default(),
                &attacker,
                &[],
                ActionType::Rwak,
                ability,
                &ctx,
            )
            .mode
        };
        assert_eq!(resolve(Some(Ability::Dex)), RollMode::Advantage);
        assert_eq!(resolve(Some(Ability::Str)), RollMode::Normal);
        assert_eq!(resolve(None), RollMode::Normal);
    }

    #[test]
    fn grants_come_from_every_target() {
        let none = ActorFlags::default();
        let plain = ActorFlags::default();
        let prone = flags(&[("flags.combat.grants.advantage.attack.all", "target.prone")]);
        let standing = json!({ "target": { "prone": false } });
        let lying = json!({ "target": { "prone": true } });

        let out = resolve_attack_mode(
            None,
            KeyModifiers::default(),
            &none,
            &[(&plain, &standing), (&prone, &lying)],
            ActionType::Mwak,
            Some(Ability::Str),
            &json!({}),
        );
        assert_eq!(out.mode, RollMode::Advantage);
        assert_eq!(out.advantage.len(), 1);

        let out = resolve_attack_mode(
            None,
            KeyModifiers::default(),
            &none,
            &[(&prone, &standing)],
            ActionType::Mwak,
            Some(Ability::Str),
            &json!({}),
        );
        assert_eq!(out.mode, RollMode::Normal);
    }

    #[test]
    fn save_mode_checks_ability_paths() {
        let saver = flags(&[
            ("flags.combat.advantage.ability.save.dex", "1"),
            ("flags.combat.disadvantage.ability.save.wis", "1"),
        ]);
        let ctx = json!({});
        let dex = resolve_save_mode(None, KeyModifiers::default(), &saver, Ability::Dex, &ctx);
        let wis = resolve_save_mode(None, KeyModifiers::default(), &saver, Ability::Wis, &ctx);
        let con = resolve_save_mode(None, KeyModifiers::default(), &saver, Ability::Con, &ctx);
        assert_eq!(dex.mode, RollMode::Advantage);
        assert_eq!(wis.mode, RollMode::Disadvantage);
        assert_eq!(con.mode, RollMode::Normal);
    }

    #[test]
    fn d20_terms() {
        assert_eq!(RollMode::Advantage.d20(), "2d20kh");
        assert_eq!(RollMode::Normal.to_string(), "normal");
    }
}
