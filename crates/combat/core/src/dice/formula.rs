//! Roll formula grammar.
//!
//! ```text
//! formula  := term (op term)*
//! term     := '-'? (dice | number) flavor?
//! dice     := INT? 'd' INT modifier*
//! modifier := 'kh' INT? | 'kl' INT? | 'x' | 'min' INT | 'max' INT
//! flavor   := '[' text ']'
//! op       := '+' | '-' | '*' | '/'
//! ```
//!
//! `@path` references are substituted from [`RollData`] before tokenizing.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Errors raised while parsing or evaluating a formula.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FormulaError {
    #[error("unexpected character '{found}' at offset {offset} in '{formula}'")]
    UnexpectedChar {
        formula: String,
        found: char,
        offset: usize,
    },

    #[error("unterminated flavor tag in '{0}'")]
    UnterminatedFlavor(String),

    #[error("formula '{0}' is empty")]
    Empty(String),

    #[error("operator without operand in '{0}'")]
    DanglingOperator(String),

    #[error("unresolved reference @{0}")]
    UnresolvedReference(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("invalid dice '{0}'")]
    InvalidDice(String),
}

/// Most dice a single term may declare.
pub const MAX_DICE: u32 = 1_000;

/// Numeric values available to `@path` references.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RollData {
    values: BTreeMap<String, f64>,
}

impl RollData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, value: f64) {
        self.values.insert(path.into(), value);
    }

    pub fn with(mut self, path: impl Into<String>, value: f64) -> Self {
        self.insert(path, value);
        self
    }

    pub fn get(&self, path: &str) -> Option<f64> {
        self.values.get(path).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Copies every entry of `other` over this one.
    pub fn merge(&mut self, other: &RollData) {
        for (key, value) in other.iter() {
            self.insert(key, value);
        }
    }
}

/// Replaces `@path` references with their numeric values.
pub fn resolve_references(formula: &str, data: &RollData) -> Result<String, FormulaError> {
    let mut out = String::with_capacity(formula.len());
    let mut chars = formula.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '@' {
            out.push(c);
            continue;
        }
        let mut path = String::new();
        while let Some(&(_, next)) = chars.peek() {
            if next.is_ascii_alphanumeric() || next == '.' || next == '_' || next == '-' {
                path.push(next);
                chars.next();
            } else {
                break;
            }
        }
        let value = data
            .get(&path)
            .ok_or_else(|| FormulaError::UnresolvedReference(path.clone()))?;
        out.push_str(&format_number(value));
    }

    Ok(out)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
}

impl Operator {
    pub fn is_additive(self) -> bool {
        matches!(self, Self::Add | Self::Sub)
    }

    fn symbol(self) -> char {
        match self {
            Self::Add => '+',
            Self::Sub => '-',
            Self::Mul => '*',
            Self::Div => '/',
        }
    }
}

/// Keep-highest / keep-lowest selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Keep {
    Highest(u32),
    Lowest(u32),
}

/// Per-term dice modifiers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceModifiers {
    pub keep: Option<Keep>,
    /// Each maximum result adds one extra die (no chaining).
    pub explode: bool,
    /// Results below this are raised to it. `min == faces` maximises the die.
    pub min: Option<u32>,
    /// Results above this are lowered to it.
    pub max: Option<u32>,
}

/// A single die result within a dice term.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DieResult {
    pub value: u32,
    /// False when dropped by keep-highest/lowest.
    pub active: bool,
    /// True for extra dice produced by an explosion.
    pub exploded: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiceTerm {
    pub number: u32,
    pub faces: u32,
    pub modifiers: DiceModifiers,
    pub flavor: Option<String>,
    /// Empty until the owning roll is evaluated.
    pub results: Vec<DieResult>,
}

impl DiceTerm {
    pub fn new(number: u32, faces: u32) -> Self {
        Self {
            number,
            faces,
            modifiers: DiceModifiers::default(),
            flavor: None,
            results: Vec::new(),
        }
    }

    /// Sum of active results.
    pub fn total(&self) -> f64 {
        self.results
            .iter()
            .filter(|r| r.active)
            .map(|r| f64::from(r.value))
            .sum()
    }

    pub fn is_evaluated(&self) -> bool {
        !self.results.is_empty() || self.number == 0
    }
}

/// One element of a roll's term sequence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RollTerm {
    Dice(DiceTerm),
    Number { value: f64, flavor: Option<String> },
    Operator(Operator),
}

impl RollTerm {
    pub fn number(value: f64) -> Self {
        Self::Number {
            value,
            flavor: None,
        }
    }

    pub fn flavor(&self) -> Option<&str> {
        match self {
            Self::Dice(d) => d.flavor.as_deref(),
            Self::Number { flavor, .. } => flavor.as_deref(),
            Self::Operator(_) => None,
        }
    }

    /// Sets the flavor on operand terms that have none.
    pub fn default_flavor(&mut self, flavor: &str) {
        match self {
            Self::Dice(d) if d.flavor.is_none() => d.flavor = Some(flavor.to_owned()),
            Self::Number { flavor: f, .. } if f.is_none() => *f = Some(flavor.to_owned()),
            _ => {}
        }
    }

    pub fn as_operator(&self) -> Option<Operator> {
        match self {
            Self::Operator(op) => Some(*op),
            _ => None,
        }
    }

    /// True when both terms have the same shape (ignores results and flavor).
    pub fn same_shape(&self, other: &RollTerm) -> bool {
        match (self, other) {
            (Self::Dice(a), Self::Dice(b)) => a.faces == b.faces,
            (Self::Number { .. }, Self::Number { .. }) => true,
            (Self::Operator(a), Self::Operator(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for RollTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dice(d) => {
                write!(f, "{}d{}", d.number, d.faces)?;
                match d.modifiers.keep {
                    Some(Keep::Highest(n)) => write!(f, "kh{n}")?,
                    Some(Keep::Lowest(n)) => write!(f, "kl{n}")?,
                    None => {}
                }
                if d.modifiers.explode {
                    f.write_str("x")?;
                }
                if let Some(min) = d.modifiers.min {
                    write!(f, "min{min}")?;
                }
                if let Some(max) = d.modifiers.max {
                    write!(f, "max{max}")?;
                }
                if let Some(flavor) = &d.flavor {
                    write!(f, "[{flavor}]")?;
                }
                Ok(())
            }
            Self::Number { value, flavor } => {
                f.write_str(&format_number(*value))?;
                if let Some(flavor) = flavor {
                    write!(f, "[{flavor}]")?;
                }
                Ok(())
            }
            Self::Operator(op) => write!(f, "{}", op.symbol()),
        }
    }
}

/// Renders a term sequence back into formula text.
pub fn format_terms(terms: &[RollTerm]) -> String {
    terms
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Parses a formula (references already resolved) into unevaluated terms.
pub fn parse_terms(formula: &str) -> Result<Vec<RollTerm>, FormulaError> {
    let mut parser = FormulaParser {
        formula,
        bytes: formula.as_bytes(),
        pos: 0,
    };
    parser.parse()
}

struct FormulaParser<'a> {
    formula: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl FormulaParser<'_> {
    fn parse(&mut self) -> Result<Vec<RollTerm>, FormulaError> {
        let mut terms = Vec::new();
        let mut expect_operand = true;

        loop {
            self.skip_ws();
            let Some(c) = self.peek() else { break };

            match c {
                b'+' | b'-' | b'*' | b'/' => {
                    let op = match c {
                        b'+' => Operator::Add,
                        b'-' => Operator::Sub,
                        b'*' => Operator::Mul,
                        _ => Operator::Div,
                    };
                    self.pos += 1;
                    if expect_operand {
                        // Only a sign may start a formula or follow another operator.
                        if !op.is_additive() {
                            return Err(FormulaError::DanglingOperator(self.formula.to_owned()));
                        }
                        if op == Operator::Sub {
                            self.negate_next(&mut terms)?;
                            expect_operand = false;
                        }
                        continue;
                    }
                    terms.push(RollTerm::Operator(op));
                    expect_operand = true;
                }
                b'0'..=b'9' | b'd' | b'D' | b'.' => {
                    if !expect_operand {
                        return Err(self.unexpected());
                    }
                    let term = self.operand()?;
                    terms.push(term);
                    expect_operand = false;
                }
                _ => return Err(self.unexpected()),
            }
        }

        if terms.is_empty() {
            return Err(FormulaError::Empty(self.formula.to_owned()));
        }
        if expect_operand {
            return Err(FormulaError::DanglingOperator(self.formula.to_owned()));
        }
        Ok(terms)
    }

    /// Parses the operand after a unary minus.
    ///
    /// A leading minus on a number folds into the literal. On dice it becomes
    /// a `Sub` operator when something precedes it, or `0 - dice` otherwise.
    fn negate_next(&mut self, terms: &mut Vec<RollTerm>) -> Result<(), FormulaError> {
        self.skip_ws();
        let operand = self.operand()?;
        match operand {
            RollTerm::Number { value, flavor } => {
                if let Some(RollTerm::Operator(prev)) = terms.last_mut()
                    && prev.is_additive()
                {
                    *prev = if *prev == Operator::Add {
                        Operator::Sub
                    } else {
                        Operator::Add
                    };
                    terms.push(RollTerm::Number { value, flavor });
                } else {
                    terms.push(RollTerm::Number {
                        value: -value,
                        flavor,
                    });
                }
            }
            dice => {
                if let Some(RollTerm::Operator(prev)) = terms.last_mut()
                    && prev.is_additive()
                {
                    *prev = if *prev == Operator::Add {
                        Operator::Sub
                    } else {
                        Operator::Add
                    };
                } else if terms.is_empty() {
                    terms.push(RollTerm::number(0.0));
                    terms.push(RollTerm::Operator(Operator::Sub));
                } else {
                    return Err(FormulaError::DanglingOperator(self.formula.to_owned()));
                }
                terms.push(dice);
            }
        }
        Ok(())
    }

    fn operand(&mut self) -> Result<RollTerm, FormulaError> {
        let count = self.integer();
        let mut term = if matches!(self.peek(), Some(b'd' | b'D')) {
            self.pos += 1;
            let faces = self
                .integer()
                .ok_or_else(|| FormulaError::InvalidDice(self.formula.to_owned()))?;
            if faces == 0 {
                return Err(FormulaError::InvalidDice(self.formula.to_owned()));
            }
            let count = count.unwrap_or(1);
            if count > MAX_DICE {
                return Err(FormulaError::InvalidDice(self.formula.to_owned()));
            }
            let mut dice = DiceTerm::new(count, faces);
            self.modifiers(&mut dice.modifiers)?;
            RollTerm::Dice(dice)
        } else {
            let mut value = f64::from(count.ok_or_else(|| self.unexpected())?);
            if self.peek() == Some(b'.') {
                self.pos += 1;
                let start = self.pos;
                while matches!(self.peek(), Some(b'0'..=b'9')) {
                    self.pos += 1;
                }
                let fraction = &self.formula[start..self.pos];
                if !fraction.is_empty() {
                    let digits: f64 = fraction.parse().unwrap_or(0.0);
                    value += digits / 10f64.powi(fraction.len() as i32);
                }
            }
            RollTerm::number(value)
        };

        self.skip_ws();
        if self.peek() == Some(b'[') {
            let flavor = self.flavor()?;
            match &mut term {
                RollTerm::Dice(d) => d.flavor = Some(flavor),
                RollTerm::Number { flavor: f, .. } => *f = Some(flavor),
                RollTerm::Operator(_) => {}
            }
        }
        Ok(term)
    }

    fn modifiers(&mut self, modifiers: &mut DiceModifiers) -> Result<(), FormulaError> {
        loop {
            let rest = &self.formula[self.pos..];
            if rest.starts_with("kh") || rest.starts_with("kl") {
                let highest = rest.starts_with("kh");
                self.pos += 2;
                let n = self.integer().unwrap_or(1);
                modifiers.keep = Some(if highest {
                    Keep::Highest(n)
                } else {
                    Keep::Lowest(n)
                });
            } else if rest.starts_with("min") {
                self.pos += 3;
                modifiers.min = Some(self.integer().ok_or_else(|| self.unexpected())?);
            } else if rest.starts_with("max") {
                self.pos += 3;
                modifiers.max = Some(self.integer().ok_or_else(|| self.unexpected())?);
            } else if rest.starts_with('x') {
                self.pos += 1;
                modifiers.explode = true;
            } else {
                return Ok(());
            }
        }
    }

    fn flavor(&mut self) -> Result<String, FormulaError> {
        // Caller guarantees the current byte is '['.
        self.pos += 1;
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == b']' {
                let flavor = self.formula[start..self.pos].trim().to_owned();
                self.pos += 1;
                return Ok(flavor);
            }
            self.pos += 1;
        }
        Err(FormulaError::UnterminatedFlavor(self.formula.to_owned()))
    }

    fn integer(&mut self) -> Option<u32> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        if start == self.pos {
            return None;
        }
        self.formula[start..self.pos].parse().ok()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn unexpected(&self) -> FormulaError {
        let found = self.formula[self.pos.min(self.formula.len())..]
            .chars()
            .next()
            .unwrap_or('\0');
        FormulaError::UnexpectedChar {
            formula: self.formula.to_owned(),
            found,
            offset: self.pos,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dice_numbers_operators_and_flavor() {
        let terms = parse_terms("2d6[fire] + 3 - 1d4").unwrap();
        assert_eq!(terms.len(), 5);
        assert!(matches!(&terms[0], RollTerm::Dice(d) if d.number == 2 && d.faces == 6));
        assert_eq!(terms[0].flavor(), Some("fire"));
        assert_eq!(terms[1], RollTerm::Operator(Operator::Add));
        assert_eq!(terms[3], RollTerm::Operator(Operator::Sub));
    }

    #[test]
    fn rejects_oversized_dice_counts() {
        assert!(parse_terms("1000d6").is_ok());
        assert!(matches!(parse_terms("1001d6"), Err(FormulaError::InvalidDice(_))));
        assert!(matches!(
            parse_terms("3000000000d6"),
            Err(FormulaError::InvalidDice(_))
        ));
    }

    #[test]
    fn parses_modifiers() {
        let terms = parse_terms("2d20kh + 4d6kl3 + 1d6xmin2max5").unwrap();
        let RollTerm::Dice(adv) = &terms[0] else {
            panic!("expected dice")
        };
        assert_eq!(adv.modifiers.keep, Some(Keep::Highest(1)));
        let RollTerm::Dice(low) = &terms[2] else {
            panic!("expected dice")
        };
        assert_eq!(low.modifiers.keep, Some(Keep::Lowest(3)));
        let RollTerm::Dice(clamped) = &terms[4] else {
            panic!("expected dice")
        };
        assert!(clamped.modifiers.explode);
        assert_eq!(clamped.modifiers.min, Some(2));
        assert_eq!(clamped.modifiers.max, Some(5));
    }

    #[test]
    fn leading_minus_folds_into_number() {
        let terms = parse_terms("-2").unwrap();
        assert_eq!(terms, vec![RollTerm::number(-2.0)]);

        let terms = parse_terms("1d4 + -2").unwrap();
        assert_eq!(terms[1], RollTerm::Operator(Operator::Sub));
        assert_eq!(terms[2], RollTerm::number(2.0));
    }

    #[test]
    fn rejects_malformed_formulas() {
        assert!(matches!(parse_terms(""), Err(FormulaError::Empty(_))));
        assert!(matches!(
            parse_terms("1d6 +"),
            Err(FormulaError::DanglingOperator(_))
        ));
        assert!(matches!(
            parse_terms("1d6 [fire"),
            Err(FormulaError::UnterminatedFlavor(_))
        ));
        assert!(matches!(
            parse_terms("1d6 + banana"),
            Err(FormulaError::UnexpectedChar { found: 'b', .. })
        ));
    }

    #[test]
    fn resolves_references() {
        let data = RollData::new().with("mod", 3.0).with("prof", 2.0);
        assert_eq!(
            resolve_references("1d20 + @mod + @prof", &data).unwrap(),
            "1d20 + 3 + 2"
        );
        assert_eq!(
            resolve_references("@missing", &data),
            Err(FormulaError::UnresolvedReference("missing".into()))
        );
    }

    #[test]
    fn display_round_trips() {
        let terms = parse_terms("2d6kh1xmin3[fire] * 2").unwrap();
        assert_eq!(format_terms(&terms), "2d6kh1xmin3[fire] * 2");
        assert_eq!(parse_terms(&format_terms(&terms)).unwrap(), terms);
    }
}
