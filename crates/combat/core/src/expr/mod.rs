//! Sandboxed condition language.
//!
//! A small JavaScript-flavoured expression language used for activation
//! conditions, conditional advantage flags and overtime removal conditions.
//! It has no assignment, no loops and no host calls beyond a fixed method
//! set (`includes`, `has`, `startsWith`, `endsWith`, `toLowerCase`).
//!
//! Evaluation sites that must never fail use [`eval_condition`] and
//! [`eval_number`], which log the error under `combat_core::expr` and fall
//! back to the caller's default.

mod context;
mod eval;
mod parser;

pub use context::{CONTEXT_VERSION, ConditionContext, WorkflowView};
pub use eval::{to_number, truthy};
pub use parser::{BinaryOp, Expr, UnaryOp};

use serde_json::Value;
use tracing::warn;

use crate::error::{ErrorSeverity, GameError};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ExprError {
    #[error("expression is empty")]
    Empty,

    #[error("invalid character at offset {offset} in '{expression}'")]
    Lex { expression: String, offset: usize },

    #[error("unexpected token {token} in '{expression}'")]
    UnexpectedToken { expression: String, token: String },

    #[error("unexpected end of '{0}'")]
    UnexpectedEnd(String),

    #[error("expression nests too deeply")]
    TooDeep,

    #[error("expression has {tokens} tokens, more than {max}")]
    TooLong { tokens: usize, max: usize },

    #[error("unknown method '{0}'")]
    UnknownMethod(String),
}

impl GameError for ExprError {
    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Recoverable
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::Empty => "EXPR_EMPTY",
            Self::Lex { .. } => "EXPR_LEX",
            Self::UnexpectedToken { .. } => "EXPR_UNEXPECTED_TOKEN",
            Self::UnexpectedEnd(_) => "EXPR_UNEXPECTED_END",
            Self::TooDeep => "EXPR_TOO_DEEP",
            Self::TooLong { .. } => "EXPR_TOO_LONG",
            Self::UnknownMethod(_) => "EXPR_UNKNOWN_METHOD",
        }
    }
}

/// A parsed expression, reusable across contexts.
#[derive(Clone, Debug, PartialEq)]
pub struct Expression {
    source: String,
    root: Expr,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        let root = parser::Parser::new(source)?.parse()?;
        Ok(Self {
            source: source.to_owned(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, ctx: &Value) -> Result<Value, ExprError> {
        eval::evaluate(&self.root, ctx)
    }

    pub fn evaluate_bool(&self, ctx: &Value) -> Result<bool, ExprError> {
        self.evaluate(ctx).map(|value| truthy(&value))
    }
}

/// Evaluates `source` as a boolean, returning `default` on any error.
pub fn eval_condition(source: &str, ctx: &Value, default: bool) -> bool {
    match Expression::parse(source).and_then(|expr| expr.evaluate_bool(ctx)) {
        Ok(result) => result,
        Err(error) => {
            warn!(
                target: "combat_core::expr",
                expression = source,
                code = error.error_code(),
                %error,
                default,
                "condition evaluation failed"
            );
            default
        }
    }
}

/// Evaluates `source` as a number; errors and non-numeric results are `None`.
pub fn eval_number(source: &str, ctx: &Value) -> Option<f64> {
    match Expression::parse(source).and_then(|expr| expr.evaluate(ctx)) {
        Ok(value) => Some(to_number(&value)).filter(|n| n.is_finite()),
        Err(error) => {
            warn!(
                target: "combat_core::expr",
                expression = source,
                code = error.error_code(),
                %error,
                "numeric expression failed"
            );
            None
        }
    }
}
