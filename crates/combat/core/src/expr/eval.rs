//! Tree-walking evaluator with JavaScript-like value semantics.
//!
//! Missing paths read as `null` rather than failing, so conditions written
//! against optional document fields degrade to falsy instead of erroring.

use serde_json::Value;

use super::ExprError;
use super::parser::{BinaryOp, Expr, UnaryOp, number};

pub(crate) fn evaluate(expr: &Expr, ctx: &Value) -> Result<Value, ExprError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Ident(name) => Ok(ctx.get(name).cloned().unwrap_or(Value::Null)),
        Expr::Member(target, name) => {
            let target = evaluate(target, ctx)?;
            Ok(member(&target, name))
        }
        Expr::Index(target, index) => {
            let target = evaluate(target, ctx)?;
            let index = evaluate(index, ctx)?;
            Ok(match (&target, &index) {
                (Value::Array(items), Value::Number(n)) => n
                    .as_f64()
                    .filter(|i| *i >= 0.0)
                    .and_then(|i| items.get(i as usize).cloned())
                    .unwrap_or(Value::Null),
                (_, Value::String(key)) => member(&target, key),
                _ => Value::Null,
            })
        }
        Expr::Call {
            target,
            method,
            args,
        } => {
            let target = evaluate(target, ctx)?;
            let args = args
                .iter()
                .map(|arg| evaluate(arg, ctx))
                .collect::<Result<Vec<_>, _>>()?;
            call(&target, method, &args)
        }
        Expr::Unary(op, operand) => {
            let value = evaluate(operand, ctx)?;
            Ok(match op {
                UnaryOp::Not => Value::Bool(!truthy(&value)),
                UnaryOp::Neg => number(-to_number(&value)),
            })
        }
        Expr::Binary(BinaryOp::And, lhs, rhs) => {
            let left = evaluate(lhs, ctx)?;
            if truthy(&left) {
                evaluate(rhs, ctx)
            } else {
                Ok(left)
            }
        }
        Expr::Binary(BinaryOp::Or, lhs, rhs) => {
            let left = evaluate(lhs, ctx)?;
            if truthy(&left) {
                Ok(left)
            } else {
                evaluate(rhs, ctx)
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            let left = evaluate(lhs, ctx)?;
            let right = evaluate(rhs, ctx)?;
            Ok(binary(*op, &left, &right))
        }
        Expr::Conditional(condition, then, otherwise) => {
            if truthy(&evaluate(condition, ctx)?) {
                evaluate(then, ctx)
            } else {
                evaluate(otherwise, ctx)
            }
        }
    }
}

fn member(target: &Value, name: &str) -> Value {
    match (target, name) {
        (Value::Array(items), "length" | "size") => number(items.len() as f64),
        (Value::String(s), "length") => number(s.chars().count() as f64),
        (Value::Object(map), "size") if !map.contains_key("size") => number(map.len() as f64),
        (Value::Object(map), _) => map.get(name).cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn call(target: &Value, method: &str, args: &[Value]) -> Result<Value, ExprError> {
    let first = args.first().unwrap_or(&Value::Null);
    let result = match (target, method) {
        (Value::Array(items), "includes" | "has") => {
            items.iter().any(|item| strict_equals(item, first))
        }
        (Value::Object(map), "has" | "includes") => match first {
            Value::String(key) => map.contains_key(key),
            _ => false,
        },
        (Value::String(s), "includes") => s.contains(to_string(first).as_str()),
        (Value::String(s), "startsWith") => s.starts_with(to_string(first).as_str()),
        (Value::String(s), "endsWith") => s.ends_with(to_string(first).as_str()),
        (Value::String(s), "toLowerCase") => return Ok(Value::String(s.to_lowercase())),
        (Value::Null, _) => return Ok(Value::Null),
        _ => return Err(ExprError::UnknownMethod(method.to_owned())),
    };
    Ok(Value::Bool(result))
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Add => {
            if left.is_string() || right.is_string() {
                Value::String(format!("{}{}", to_string(left), to_string(right)))
            } else {
                number(to_number(left) + to_number(right))
            }
        }
        BinaryOp::Sub => number(to_number(left) - to_number(right)),
        BinaryOp::Mul => number(to_number(left) * to_number(right)),
        BinaryOp::Div => number(to_number(left) / to_number(right)),
        BinaryOp::Rem => number(to_number(left) % to_number(right)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (left, right) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => to_number(left).partial_cmp(&to_number(right)),
            };
            let Some(ordering) = ordering else {
                return Value::Bool(false);
            };
            Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
        BinaryOp::Eq => Value::Bool(loose_equals(left, right)),
        BinaryOp::Ne => Value::Bool(!loose_equals(left, right)),
        BinaryOp::StrictEq => Value::Bool(strict_equals(left, right)),
        BinaryOp::StrictNe => Value::Bool(!strict_equals(left, right)),
        BinaryOp::And | BinaryOp::Or => unreachable!("short-circuit operators handled by caller"),
    }
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub fn to_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) if s.trim().is_empty() => 0.0,
        Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
        Value::Array(_) | Value::Object(_) => f64::NAN,
    }
}

fn to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

fn strict_equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn loose_equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Number(_) | Value::Bool(_) | Value::String(_), _)
            if !right.is_array() && !right.is_object() =>
        {
            to_number(left) == to_number(right)
        }
        _ => strict_equals(left, right),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::expr::parser::Parser;

    fn eval(source: &str, ctx: &Value) -> Value {
        let expr = Parser::new(source).unwrap().parse().unwrap();
        evaluate(&expr, ctx).unwrap()
    }

    #[test]
    fn reads_nested_paths_and_treats_missing_as_null() {
        let ctx = json!({ "target": { "hp": { "value": 3, "max": 10 } } });
        assert_eq!(eval("target.hp.value < target.hp.max / 2", &ctx), json!(true));
        assert_eq!(eval("target.missing.deeper", &ctx), Value::Null);
    }

    #[test]
    fn logical_operators_return_operands() {
        let ctx = json!({ "a": 0, "b": "fallback" });
        assert_eq!(eval("a || b", &ctx), json!("fallback"));
        assert_eq!(eval("b && 5", &ctx), json!(5.0));
        assert_eq!(eval("!a", &ctx), json!(true));
    }

    #[test]
    fn loose_and_strict_equality_differ_on_types() {
        let ctx = json!({ "n": 5, "s": "5" });
        assert_eq!(eval("n == s", &ctx), json!(true));
        assert_eq!(eval("n === s", &ctx), json!(false));
        assert_eq!(eval("n === 5", &ctx), json!(true));
    }

    #[test]
    fn includes_works_on_arrays_and_strings() {
        let ctx = json!({ "types": ["fire", "cold"], "name": "Longsword +1" });
        assert_eq!(eval("types.includes('cold')", &ctx), json!(true));
        assert_eq!(eval("name.includes('+1')", &ctx), json!(true));
        assert_eq!(eval("types.length", &ctx), json!(2.0));
    }

    #[test]
    fn unknown_methods_are_errors() {
        let expr = Parser::new("name.exec()").unwrap().parse().unwrap();
        assert_eq!(
            evaluate(&expr, &json!({ "name": "x" })),
            Err(ExprError::UnknownMethod("exec".into()))
        );
    }

    #[test]
    fn conditional_picks_branch() {
        assert_eq!(eval("1 > 2 ? 'a' : 'b'", &json!({})), json!("b"));
    }
}
