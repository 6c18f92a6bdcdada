//! Evaluated rolls.

use serde::{Deserialize, Serialize};

use super::formula::{
    DiceTerm, DieResult, FormulaError, Keep, MAX_DICE, Operator, RollData, RollTerm,
    format_terms, parse_terms, resolve_references,
};
use super::roller::DieRoller;

/// An evaluated roll: the term sequence with die results and the total.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Roll {
    pub formula: String,
    pub terms: Vec<RollTerm>,
    pub total: f64,
}

impl Roll {
    /// Resolves references, parses and rolls `formula`.
    pub fn evaluate(
        formula: &str,
        data: &RollData,
        roller: &mut dyn DieRoller,
    ) -> Result<Self, FormulaError> {
        let resolved = resolve_references(formula, data)?;
        let terms = parse_terms(&resolved)?;
        Self::from_terms(terms, roller)
    }

    /// Rolls every unevaluated dice term in `terms`.
    pub fn from_terms(
        mut terms: Vec<RollTerm>,
        roller: &mut dyn DieRoller,
    ) -> Result<Self, FormulaError> {
        for term in &mut terms {
            if let RollTerm::Dice(dice) = term
                && !dice.is_evaluated()
            {
                roll_dice(dice, roller);
            }
        }
        let total = evaluate_terms(&terms)?;
        Ok(Self {
            formula: format_terms(&terms),
            terms,
            total,
        })
    }

    /// Total rounded toward negative infinity, as hit-point math expects.
    pub fn total_floor(&self) -> i32 {
        self.total.floor() as i32
    }

    /// The kept result of the first d20 term, if any.
    pub fn natural_d20(&self) -> Option<u32> {
        self.terms.iter().find_map(|term| match term {
            RollTerm::Dice(d) if d.faces == 20 => d
                .results
                .iter()
                .find(|r| r.active && !r.exploded)
                .map(|r| r.value),
            _ => None,
        })
    }

    pub fn is_critical(&self, threshold: u32) -> bool {
        self.natural_d20().is_some_and(|n| n >= threshold)
    }

    pub fn is_fumble(&self) -> bool {
        self.natural_d20() == Some(1)
    }

    /// Replaces the kept d20 with `value` and recomputes the total.
    ///
    /// Used by re-roll bonuses. Returns false when the roll has no d20.
    pub fn replace_d20(&mut self, value: u32) -> bool {
        let Some(dice) = self.terms.iter_mut().find_map(|term| match term {
            RollTerm::Dice(d) if d.faces == 20 => Some(d),
            _ => None,
        }) else {
            return false;
        };
        dice.results = vec![DieResult {
            value: value.clamp(1, 20),
            active: true,
            exploded: false,
        }];
        dice.number = 1;
        dice.modifiers.keep = None;
        self.recompute();
        true
    }

    /// Appends `+ bonus` terms (already evaluated) and recomputes the total.
    pub fn append(&mut self, bonus: Roll) {
        let mut bonus_terms = bonus.terms;
        match bonus_terms.first() {
            Some(RollTerm::Number { value, .. }) if *value < 0.0 => {
                if let Some(RollTerm::Number { value, .. }) = bonus_terms.first_mut() {
                    *value = -*value;
                }
                self.terms.push(RollTerm::Operator(Operator::Sub));
            }
            _ => self.terms.push(RollTerm::Operator(Operator::Add)),
        }
        self.terms.extend(bonus_terms);
        self.recompute();
    }

    fn recompute(&mut self) {
        // Terms only ever come from a successful evaluation, so this cannot fail
        // short of a division by a die that was edited to zero.
        self.total = evaluate_terms(&self.terms).unwrap_or(self.total);
        self.formula = format_terms(&self.terms);
    }
}

fn roll_dice(dice: &mut DiceTerm, roller: &mut dyn DieRoller) {
    let mods = dice.modifiers;
    // Room for a critical doubling of the largest parseable term.
    let count = dice.number.min(MAX_DICE * 2);
    let mut results = Vec::with_capacity(count as usize);

    for _ in 0..count {
        let raw = roller.roll_die(dice.faces);
        results.push(DieResult {
            value: clamp_result(raw, &mods),
            active: true,
            exploded: false,
        });
        if mods.explode && raw == dice.faces {
            let extra = roller.roll_die(dice.faces);
            results.push(DieResult {
                value: clamp_result(extra, &mods),
                active: true,
                exploded: true,
            });
        }
    }

    if let Some(keep) = mods.keep {
        apply_keep(&mut results, keep);
    }
    dice.results = results;
}

fn clamp_result(value: u32, mods: &super::formula::DiceModifiers) -> u32 {
    let mut value = value;
    if let Some(min) = mods.min {
        value = value.max(min);
    }
    if let Some(max) = mods.max {
        value = value.min(max);
    }
    value
}

fn apply_keep(results: &mut [DieResult], keep: Keep) {
    let (count, highest) = match keep {
        Keep::Highest(n) => (n as usize, true),
        Keep::Lowest(n) => (n as usize, false),
    };
    let mut order: Vec<usize> = (0..results.len()).collect();
    // Stable sort keeps the earliest die on ties.
    order.sort_by(|&a, &b| {
        let cmp = results[a].value.cmp(&results[b].value);
        if highest { cmp.reverse() } else { cmp }
    });
    for (rank, &index) in order.iter().enumerate() {
        results[index].active = rank < count;
    }
}

/// Evaluates a term sequence with `*` and `/` binding tighter than `+`/`-`.
///
/// Dice terms must already be rolled; unrolled dice count as zero. A leading
/// operator is treated as a sign on the first chunk.
pub fn evaluate_terms(terms: &[RollTerm]) -> Result<f64, FormulaError> {
    let mut total = 0.0;
    for (sign, chunk) in additive_chunks(terms) {
        total += sign * evaluate_chunk(chunk)?;
    }
    Ok(total)
}

/// Splits terms at top-level `+`/`-` operators into signed chunks.
pub fn additive_chunks(terms: &[RollTerm]) -> Vec<(f64, &[RollTerm])> {
    let mut chunks = Vec::new();
    let mut sign = 1.0;
    let mut start = 0;

    for (index, term) in terms.iter().enumerate() {
        if let RollTerm::Operator(op) = term
            && op.is_additive()
        {
            if index > start {
                chunks.push((sign, &terms[start..index]));
            }
            sign = if *op == Operator::Sub { -1.0 } else { 1.0 };
            start = index + 1;
        }
    }
    if start < terms.len() {
        chunks.push((sign, &terms[start..]));
    }
    chunks
}

fn evaluate_chunk(chunk: &[RollTerm]) -> Result<f64, FormulaError> {
    let mut value: Option<f64> = None;
    let mut pending: Option<Operator> = None;

    for term in chunk {
        let operand = match term {
            RollTerm::Operator(op) => {
                pending = Some(*op);
                continue;
            }
            RollTerm::Dice(d) => d.total(),
            RollTerm::Number { value, .. } => *value,
        };
        value = Some(match (value, pending.take()) {
            (None, _) => operand,
            (Some(acc), Some(Operator::Div)) => {
                if operand == 0.0 {
                    return Err(FormulaError::DivisionByZero);
                }
                acc / operand
            }
            (Some(acc), _) => acc * operand,
        });
    }
    Ok(value.unwrap_or(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dice::ScriptedRoller;

    fn roll(formula: &str, results: &[u32]) -> Roll {
        let mut roller = ScriptedRoller::new(results.iter().copied());
        Roll::evaluate(formula, &RollData::new(), &mut roller).unwrap()
    }

    #[test]
    fn totals_respect_precedence() {
        assert_eq!(roll("2d6 + 3", &[4, 5]).total, 12.0);
        assert_eq!(roll("1d8 * 2 + 1", &[3]).total, 7.0);
        assert_eq!(roll("10 - 1d4 - 2", &[3]).total, 5.0);
        assert_eq!(roll("9 / 2", &[]).total, 4.5);
    }

    #[test]
    fn oversized_terms_roll_a_bounded_number_of_dice() {
        let terms = vec![RollTerm::Dice(DiceTerm::new(u32::MAX, 6))];
        let mut roller = ScriptedRoller::new([]).with_fallback(1);
        let r = Roll::from_terms(terms, &mut roller).unwrap();
        assert_eq!(r.total, f64::from(MAX_DICE * 2));
    }

    #[test]
    fn keep_highest_marks_dropped_dice_inactive() {
        let r = roll("2d20kh + 5", &[7, 15]);
        assert_eq!(r.total, 20.0);
        assert_eq!(r.natural_d20(), Some(15));

        let r = roll("2d20kl", &[7, 15]);
        assert_eq!(r.natural_d20(), Some(7));
    }

    #[test]
    fn explode_adds_one_die_per_max() {
        let r = roll("2d6x", &[6, 3, 2]);
        // First die 6 explodes into a 3, second die rolls 2.
        assert_eq!(r.total, 11.0);
        let RollTerm::Dice(d) = &r.terms[0] else {
            panic!("expected dice")
        };
        assert_eq!(d.results.iter().filter(|r| r.exploded).count(), 1);
    }

    #[test]
    fn min_clamp_maximises_dice() {
        assert_eq!(roll("2d6min6", &[1, 2]).total, 12.0);
    }

    #[test]
    fn crit_and_fumble_detection() {
        assert!(roll("1d20 + 2", &[20]).is_critical(20));
        assert!(roll("1d20 + 2", &[19]).is_critical(19));
        assert!(roll("1d20", &[1]).is_fumble());
        assert!(!roll("1d6", &[1]).is_fumble());
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let mut roller = ScriptedRoller::default();
        assert_eq!(
            Roll::evaluate("4 / 0", &RollData::new(), &mut roller),
            Err(FormulaError::DivisionByZero)
        );
    }

    #[test]
    fn replace_d20_and_append_recompute_total() {
        let mut r = roll("1d20 + 4", &[3]);
        assert!(r.replace_d20(17));
        assert_eq!(r.total, 21.0);

        r.append(roll("1d4", &[2]));
        assert_eq!(r.total, 23.0);

        r.append(roll("-2", &[]));
        assert_eq!(r.total, 21.0);
    }
}
