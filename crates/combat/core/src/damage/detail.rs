//! Damage-detail classification: which share of a roll is which type.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::DamageType;
use crate::config::CriticalDamage;
use crate::dice::{
    Operator, Roll, RollData, RollTerm, additive_chunks, apply_critical, evaluate_terms, maximize,
    minimum, parse_terms, resolve_references,
};
use crate::document::{DamagePart, ItemSnapshot};

/// One typed share of a damage roll.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DamageDetail {
    pub damage: f64,
    #[serde(rename = "type")]
    pub damage_type: DamageType,
    /// Absolute reduction applied to this line, clamped to `[0, damage]`.
    #[serde(rename = "DR", default, skip_serializing_if = "Option::is_none")]
    pub dr: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub damage_multiplier: Option<f64>,
}

impl DamageDetail {
    pub fn new(damage: f64, damage_type: DamageType) -> Self {
        Self {
            damage,
            damage_type,
            dr: None,
            damage_multiplier: None,
        }
    }
}

/// Sum of the pre-reduction amounts.
pub fn detail_total(details: &[DamageDetail]) -> f64 {
    details.iter().map(|d| d.damage).sum()
}

/// Classifies `roll` against the item's damage lines (and ammunition).
///
/// `versatile` swaps the first line for the item's versatile formula.
pub fn create_damage_detail(
    roll: &Roll,
    item: Option<&ItemSnapshot>,
    versatile: bool,
    default_type: &DamageType,
    ammo: Option<&ItemSnapshot>,
) -> Vec<DamageDetail> {
    let mut parts = item
        .map(|item| item.effective_damage_parts(versatile))
        .unwrap_or_default();
    if let Some(ammo) = ammo {
        parts.extend(ammo.damage_parts.iter().cloned());
    }
    let mut data = item.map(|item| item.roll_data.clone()).unwrap_or_default();
    if let Some(ammo) = ammo {
        data.merge(&ammo.roll_data);
    }
    let default_type = item
        .and_then(ItemSnapshot::primary_damage_type)
        .filter(|_| *default_type == DamageType::None)
        .unwrap_or(default_type);
    classify_damage(roll, &parts, &data, default_type)
}

/// Walks the declared lines in lockstep with the roll's terms, then types
/// whatever remains one additive chunk at a time by flavor.
///
/// Lockstep stops at the first line whose formula fails to parse or whose
/// shape no longer matches the roll; everything from there on is classified
/// by flavor. The classified amounts always sum to the roll total.
pub fn classify_damage(
    roll: &Roll,
    parts: &[DamagePart],
    data: &RollData,
    default_type: &DamageType,
) -> Vec<DamageDetail> {
    let terms = &roll.terms;
    let mut details: Vec<DamageDetail> = Vec::new();
    let mut pos = 0;

    for (index, part) in parts.iter().enumerate() {
        let part_terms = match resolve_references(&part.formula, data)
            .and_then(|resolved| parse_terms(&resolved))
        {
            Ok(part_terms) => part_terms,
            Err(error) => {
                warn!(
                    target: "combat_core::damage",
                    formula = %part.formula,
                    %error,
                    "damage line does not parse, classifying the rest by flavor"
                );
                break;
            }
        };

        let mut start = pos;
        if index > 0 {
            if terms.get(start).and_then(RollTerm::as_operator) != Some(Operator::Add) {
                break;
            }
            start += 1;
        }
        let end = start + part_terms.len();
        let Some(slice) = terms.get(start..end) else {
            break;
        };
        let aligned = slice
            .iter()
            .zip(&part_terms)
            .all(|(rolled, declared)| rolled.same_shape(declared));
        // The line must end at a chunk boundary or the end of the roll.
        let closes = match terms.get(end) {
            None => true,
            Some(term) => term.as_operator().is_some_and(Operator::is_additive),
        };
        if !aligned || !closes {
            break;
        }
        let Ok(amount) = evaluate_terms(slice) else {
            break;
        };
        push_merged(&mut details, amount, part.damage_type.clone());
        pos = end;
    }

    if pos < terms.len() {
        for (sign, chunk) in additive_chunks(&terms[pos..]) {
            let amount = sign * evaluate_terms(chunk).unwrap_or(0.0);
            let damage_type = chunk_type(chunk, parts).unwrap_or_else(|| default_type.clone());
            push_merged(&mut details, amount, damage_type);
        }
    }

    details
}

fn chunk_type(chunk: &[RollTerm], parts: &[DamagePart]) -> Option<DamageType> {
    chunk.iter().filter_map(RollTerm::flavor).find_map(|flavor| {
        DamageType::from_flavor(flavor).or_else(|| {
            parts
                .iter()
                .map(|part| &part.damage_type)
                .find(|declared| declared.as_str().eq_ignore_ascii_case(flavor.trim()))
                .cloned()
        })
    })
}

fn push_merged(details: &mut Vec<DamageDetail>, amount: f64, damage_type: DamageType) {
    match details.iter_mut().find(|d| d.damage_type == damage_type) {
        Some(existing) => existing.damage += amount,
        None => details.push(DamageDetail::new(amount, damage_type)),
    }
}

/// Dice modifications applied while building a damage roll.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DamageRollOptions {
    pub critical: Option<CriticalDamage>,
    pub maximize: bool,
    pub minimum: Option<u32>,
}

/// Builds the unevaluated term sequence for a damage roll.
///
/// Each line's terms are tagged with its declared type as flavor so that
/// classification survives critical transforms that change the shape.
/// Lines that fail to parse are dropped with a warning.
pub fn build_damage_terms(
    parts: &[DamagePart],
    data: &RollData,
    options: DamageRollOptions,
) -> Vec<RollTerm> {
    let mut terms: Vec<RollTerm> = Vec::new();
    for (index, part) in parts.iter().enumerate() {
        let parsed = resolve_references(&part.formula, data)
            .and_then(|resolved| parse_terms(&resolved));
        let mut part_terms = match parsed {
            Ok(part_terms) => part_terms,
            Err(error) => {
                warn!(
                    target: "combat_core::damage",
                    formula = %part.formula,
                    %error,
                    "dropping malformed damage line"
                );
                continue;
            }
        };
        if part.damage_type != DamageType::None {
            for term in &mut part_terms {
                term.default_flavor(part.damage_type.as_str());
            }
        }
        if let Some(strategy) = options.critical {
            part_terms = apply_critical(part_terms, strategy, index == 0);
        }
        if options.maximize {
            maximize(&mut part_terms);
        } else if let Some(min) = options.minimum {
            minimum(&mut part_terms, min);
        }
        if !terms.is_empty() {
            terms.push(RollTerm::Operator(Operator::Add));
        }
        terms.extend(part_terms);
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dice::ScriptedRoller;
    use crate::document::ActionType;

    fn evaluate(formula: &str, dice: &[u32]) -> Roll {
        let mut roller = ScriptedRoller::new(dice.iter().copied());
        Roll::evaluate(formula, &RollData::new(), &mut roller).unwrap()
    }

    fn total(details: &[DamageDetail]) -> f64 {
        detail_total(details)
    }

    #[test]
    fn lockstep_assigns_declared_types() {
        let item = ItemSnapshot::new("Item.fs", "Flame Tongue", ActionType::Mwak)
            .with_damage("1d8 + 3", DamageType::Slashing)
            .with_damage("2d6", DamageType::Fire);
        let roll = evaluate("1d8 + 3 + 2d6", &[5, 4, 2]);

        let details = create_damage_detail(&roll, Some(&item), false, &DamageType::None, None);
        assert_eq!(
            details,
            vec![
                DamageDetail::new(8.0, DamageType::Slashing),
                DamageDetail::new(6.0, DamageType::Fire),
            ]
        );
        assert_eq!(total(&details), roll.total);
    }

    #[test]
    fn remainder_uses_flavor_then_default() {
        let parts = vec![DamagePart::new("1d6", DamageType::Piercing)];
        let roll = evaluate("1d6 + 1d4[cold] + 2 - 1", &[3, 2]);

        let details = classify_damage(&roll, &parts, &RollData::new(), &DamageType::Force);
        assert_eq!(
            details,
            vec![
                DamageDetail::new(3.0, DamageType::Piercing),
                DamageDetail::new(2.0, DamageType::Cold),
                DamageDetail::new(1.0, DamageType::Force),
            ]
        );
        assert_eq!(total(&details), roll.total);
    }

    #[test]
    fn malformed_line_falls_back_to_flavor_for_the_rest() {
        let parts = vec![
            DamagePart::new("1d6 + @missing", DamageType::Slashing),
            DamagePart::new("1d4", DamageType::Acid),
        ];
        let roll = evaluate("1d6[slashing] + 2 + 1d4[acid]", &[4, 3]);

        let details = classify_damage(&roll, &parts, &RollData::new(), &DamageType::Bludgeoning);
        assert_eq!(details.len(), 3);
        assert_eq!(details[0], DamageDetail::new(4.0, DamageType::Slashing));
        assert_eq!(details[1], DamageDetail::new(2.0, DamageType::Bludgeoning));
        assert_eq!(details[2], DamageDetail::new(3.0, DamageType::Acid));
        assert_eq!(total(&details), roll.total);
    }

    #[test]
    fn built_critical_rolls_still_classify_by_type() {
        let parts = vec![
            DamagePart::new("1d8 + 2", DamageType::Slashing),
            DamagePart::new("1d6", DamageType::Fire),
        ];
        let options = DamageRollOptions {
            critical: Some(CriticalDamage::MaxNormal),
            ..DamageRollOptions::default()
        };
        let terms = build_damage_terms(&parts, &RollData::new(), options);
        let mut roller = ScriptedRoller::new([1, 3, 1, 2]);
        let roll = Roll::from_terms(terms, &mut roller).unwrap();

        let details = classify_damage(&roll, &parts, &RollData::new(), &DamageType::None);
        // 8 + 2 + 3 slashing, 6 + 2 fire.
        assert_eq!(details[0], DamageDetail::new(13.0, DamageType::Slashing));
        assert_eq!(details[1], DamageDetail::new(8.0, DamageType::Fire));
        assert_eq!(total(&details), roll.total);
    }

    #[test]
    fn sum_matches_total_for_mixed_operators() {
        let parts = vec![DamagePart::new("2d6", DamageType::Fire)];
        for formula in ["2d6 * 2 + 3", "2d6 - 1d4[cold]", "10 / 4 + 2d6[fire]", "-1d4 + 2d6"] {
            let roll = evaluate(formula, &[3, 5, 2, 6, 1]);
            let details = classify_damage(&roll, &parts, &RollData::new(), &DamageType::None);
            assert!(
                (total(&details) - roll.total).abs() < 1e-9,
                "{formula}: {details:?} vs {}",
                roll.total
            );
        }
    }

    #[test]
    fn build_drops_malformed_lines() {
        let parts = vec![
            DamagePart::new("1d6 +", DamageType::Fire),
            DamagePart::new("1d4", DamageType::Cold),
        ];
        let terms = build_damage_terms(&parts, &RollData::new(), DamageRollOptions::default());
        assert_eq!(crate::dice::format_terms(&terms), "1d4[cold]");
    }
}
