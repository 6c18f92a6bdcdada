//! Critical-hit transforms over damage-part term sequences.

use super::formula::{DiceTerm, Operator, RollTerm};
use crate::config::CriticalDamage;

/// Rewrites one damage part's terms for a critical hit.
///
/// `base_part` marks the item's first declared damage line, which is the only
/// one [`CriticalDamage::BaseWeaponOnly`] boosts.
pub fn apply_critical(
    terms: Vec<RollTerm>,
    strategy: CriticalDamage,
    base_part: bool,
) -> Vec<RollTerm> {
    match strategy {
        CriticalDamage::Default => double_dice_count(terms),
        CriticalDamage::BaseWeaponOnly if base_part => double_dice_count(terms),
        CriticalDamage::BaseWeaponOnly => terms,
        CriticalDamage::DoubleDice => {
            let mut out = Vec::with_capacity(terms.len() * 2);
            for term in terms {
                let is_dice = matches!(term, RollTerm::Dice(_));
                out.push(term);
                if is_dice {
                    out.push(RollTerm::Operator(Operator::Mul));
                    out.push(RollTerm::number(2.0));
                }
            }
            out
        }
        CriticalDamage::MaxNormal => extra_dice(terms, true, false, false),
        CriticalDamage::MaxCriticalDice => extra_dice(terms, false, true, false),
        CriticalDamage::Explode => extra_dice(terms, false, false, true),
    }
}

/// Maximises every dice term (damage max override).
pub fn maximize(terms: &mut [RollTerm]) {
    for term in terms {
        if let RollTerm::Dice(d) = term {
            d.modifiers.min = Some(d.faces);
        }
    }
}

/// Raises every die result below `min` (damage min override).
pub fn minimum(terms: &mut [RollTerm], min: u32) {
    for term in terms {
        if let RollTerm::Dice(d) = term {
            let floor = min.min(d.faces);
            d.modifiers.min = Some(d.modifiers.min.map_or(floor, |m| m.max(floor)));
        }
    }
}

fn double_dice_count(terms: Vec<RollTerm>) -> Vec<RollTerm> {
    terms
        .into_iter()
        .map(|term| match term {
            RollTerm::Dice(mut d) => {
                d.number = d.number.checked_mul(2).unwrap_or(u32::MAX);
                RollTerm::Dice(d)
            }
            other => other,
        })
        .collect()
}

/// Appends one extra dice term per base dice term as a trailing `+` chunk.
fn extra_dice(
    mut terms: Vec<RollTerm>,
    max_base: bool,
    max_extra: bool,
    explode: bool,
) -> Vec<RollTerm> {
    let mut extras: Vec<DiceTerm> = Vec::new();
    for term in &mut terms {
        if let RollTerm::Dice(d) = term {
            let mut extra = DiceTerm::new(d.number, d.faces);
            extra.flavor = d.flavor.clone();
            if max_extra {
                extra.modifiers.min = Some(d.faces);
            }
            if explode {
                extra.modifiers.explode = true;
                d.modifiers.explode = true;
            }
            if max_base {
                d.modifiers.min = Some(d.faces);
            }
            extras.push(extra);
        }
    }
    for extra in extras {
        terms.push(RollTerm::Operator(Operator::Add));
        terms.push(RollTerm::Dice(extra));
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dice::{Roll, ScriptedRoller, format_terms, parse_terms};

    fn crit(formula: &str, strategy: CriticalDamage) -> String {
        format_terms(&apply_critical(parse_terms(formula).unwrap(), strategy, true))
    }

    #[test]
    fn default_doubles_dice_count() {
        assert_eq!(crit("1d8 + 3", CriticalDamage::Default), "2d8 + 3");
    }

    #[test]
    fn doubling_a_huge_count_saturates() {
        let terms = vec![RollTerm::Dice(DiceTerm::new(3_000_000_000, 6))];
        let out = apply_critical(terms, CriticalDamage::Default, true);
        assert!(matches!(&out[0], RollTerm::Dice(d) if d.number == u32::MAX));
    }

    #[test]
    fn base_weapon_only_skips_secondary_parts() {
        let terms = parse_terms("2d6[fire]").unwrap();
        let out = apply_critical(terms, CriticalDamage::BaseWeaponOnly, false);
        assert_eq!(format_terms(&out), "2d6[fire]");
    }

    #[test]
    fn max_strategies_add_trailing_dice() {
        assert_eq!(crit("1d8 + 3", CriticalDamage::MaxNormal), "1d8min8 + 3 + 1d8");
        assert_eq!(
            crit("1d8[slashing]", CriticalDamage::MaxCriticalDice),
            "1d8[slashing] + 1d8min8[slashing]"
        );
        assert_eq!(crit("1d6", CriticalDamage::Explode), "1d6x + 1d6x");
    }

    #[test]
    fn double_dice_multiplies_each_dice_term() {
        let terms =
            apply_critical(parse_terms("1d8 + 2").unwrap(), CriticalDamage::DoubleDice, true);
        let mut roller = ScriptedRoller::new([5]);
        let roll = Roll::from_terms(terms, &mut roller).unwrap();
        assert_eq!(roll.total, 12.0);
    }

    #[test]
    fn min_override_keeps_strongest_floor() {
        let mut terms = parse_terms("2d6min5 + 1d4").unwrap();
        minimum(&mut terms, 3);
        assert_eq!(format_terms(&terms), "2d6min5 + 1d4min3");
    }
}
