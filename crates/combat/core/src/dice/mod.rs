//! Dice formulas, evaluated rolls and die rollers.

mod critical;
mod formula;
mod roll;
mod roller;

pub use critical::{apply_critical, maximize, minimum};
pub use formula::{
    DiceModifiers, DiceTerm, DieResult, FormulaError, Keep, MAX_DICE, Operator, RollData,
    RollTerm, format_terms, parse_terms, resolve_references,
};
pub use roll::{Roll, additive_chunks, evaluate_terms};
pub use roller::{DieRoller, RandomRoller, ScriptedRoller};
