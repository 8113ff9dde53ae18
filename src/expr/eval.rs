//! Tree-walking interpreter over the context's JSON values.

use std::borrow::Cow;
use std::cmp::Ordering;

use serde_json::{json, Map, Number, Value};

use super::parser::{BinOp, Expr, UnaryOp};
use super::ExprError;
use crate::context::Context;

static NULL: Value = Value::Null;

/// Evaluate a parsed expression against a context
pub fn evaluate(expr: &Expr, ctx: &Context) -> Result<Value, ExprError> {
    // The one bound name. `data` is the live data bag, `metadata` the
    // read-only telemetry view.
    let root = json!({
        "data": Value::Object(ctx.data.clone()),
        "input": ctx.input.clone(),
        "metadata": ctx.metadata.condition_view(),
    });
    eval(expr, &root).map(Cow::into_owned)
}

/// Truthiness over JSON values: null, false, zero, and empty collections are
/// false; everything else is true.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn eval<'a>(expr: &Expr, root: &'a Value) -> Result<Cow<'a, Value>, ExprError> {
    match expr {
        Expr::Null => Ok(Cow::Owned(Value::Null)),
        Expr::Bool(b) => Ok(Cow::Owned(Value::Bool(*b))),
        Expr::Int(i) => Ok(Cow::Owned(Value::from(*i))),
        Expr::Float(f) => float_value(*f).map(Cow::Owned),
        Expr::Str(s) => Ok(Cow::Owned(Value::String(s.clone()))),
        Expr::List(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(eval(item, root)?.into_owned());
            }
            Ok(Cow::Owned(Value::Array(values)))
        }
        Expr::Dict(entries) => {
            let mut map = Map::new();
            for (key_expr, value_expr) in entries {
                let key = eval(key_expr, root)?;
                let Value::String(key) = key.as_ref() else {
                    return Err(ExprError::Eval(
                        "dict literal keys must be strings".to_string(),
                    ));
                };
                let value = eval(value_expr, root)?.into_owned();
                map.insert(key.clone(), value);
            }
            Ok(Cow::Owned(Value::Object(map)))
        }
        Expr::Name(name) => {
            if name == "context" {
                Ok(Cow::Borrowed(root))
            } else {
                Err(ExprError::Eval(format!("name '{name}' is not defined")))
            }
        }
        Expr::Attr(base, name) => match eval(base, root)? {
            Cow::Borrowed(value) => Ok(Cow::Borrowed(attr(value, name))),
            Cow::Owned(value) => Ok(Cow::Owned(attr(&value, name).clone())),
        },
        Expr::Index(base, index_expr) => {
            let index = eval(index_expr, root)?.into_owned();
            match eval(base, root)? {
                Cow::Borrowed(value) => subscript(value, &index),
                Cow::Owned(value) => {
                    let result = subscript(&value, &index)?.into_owned();
                    Ok(Cow::Owned(result))
                }
            }
        }
        Expr::Unary(op, operand) => {
            let value = eval(operand, root)?;
            match op {
                UnaryOp::Not => Ok(Cow::Owned(Value::Bool(!truthy(&value)))),
                UnaryOp::Neg => negate(&value).map(Cow::Owned),
                UnaryOp::Pos => match as_num(&value) {
                    Some(_) => Ok(value),
                    None => Err(ExprError::Eval(format!(
                        "bad operand type for unary +: {}",
                        type_name(&value)
                    ))),
                },
            }
        }
        Expr::And(left, right) => {
            let left = eval(left, root)?;
            if !truthy(&left) {
                Ok(left)
            } else {
                eval(right, root)
            }
        }
        Expr::Or(left, right) => {
            let left = eval(left, root)?;
            if truthy(&left) {
                Ok(left)
            } else {
                eval(right, root)
            }
        }
        Expr::Binary(op, left, right) => {
            let left = eval(left, root)?;
            let right = eval(right, root)?;
            binary(*op, &left, &right).map(Cow::Owned)
        }
    }
}

/// Attribute access: mapping lookup, `Null` on anything missing.
fn attr<'a>(value: &'a Value, name: &str) -> &'a Value {
    match value {
        Value::Object(map) => map.get(name).unwrap_or(&NULL),
        _ => &NULL,
    }
}

fn subscript<'a>(base: &'a Value, index: &Value) -> Result<Cow<'a, Value>, ExprError> {
    match base {
        Value::Array(items) => {
            let Some(i) = index.as_i64() else {
                return Err(ExprError::Eval(format!(
                    "list indices must be integers, not {}",
                    type_name(index)
                )));
            };
            let len = items.len() as i64;
            let effective = if i < 0 { i + len } else { i };
            if effective < 0 || effective >= len {
                Ok(Cow::Borrowed(&NULL))
            } else {
                Ok(Cow::Borrowed(&items[effective as usize]))
            }
        }
        Value::Object(map) => {
            let Value::String(key) = index else {
                return Err(ExprError::Eval(format!(
                    "mapping keys must be strings, not {}",
                    type_name(index)
                )));
            };
            Ok(Cow::Borrowed(map.get(key).unwrap_or(&NULL)))
        }
        Value::String(s) => {
            let Some(i) = index.as_i64() else {
                return Err(ExprError::Eval(format!(
                    "string indices must be integers, not {}",
                    type_name(index)
                )));
            };
            let chars: Vec<char> = s.chars().collect();
            let len = chars.len() as i64;
            let effective = if i < 0 { i + len } else { i };
            if effective < 0 || effective >= len {
                Ok(Cow::Owned(Value::Null))
            } else {
                Ok(Cow::Owned(Value::String(
                    chars[effective as usize].to_string(),
                )))
            }
        }
        Value::Null => Ok(Cow::Borrowed(&NULL)),
        other => Err(ExprError::Eval(format!(
            "{} is not subscriptable",
            type_name(other)
        ))),
    }
}

fn binary(op: BinOp, left: &Value, right: &Value) -> Result<Value, ExprError> {
    match op {
        BinOp::Eq => Ok(Value::Bool(value_eq(left, right))),
        BinOp::Ne => Ok(Value::Bool(!value_eq(left, right))),
        BinOp::Lt => Ok(Value::Bool(order(left, right)? == Ordering::Less)),
        BinOp::Le => Ok(Value::Bool(order(left, right)? != Ordering::Greater)),
        BinOp::Gt => Ok(Value::Bool(order(left, right)? == Ordering::Greater)),
        BinOp::Ge => Ok(Value::Bool(order(left, right)? != Ordering::Less)),
        BinOp::In => Ok(Value::Bool(contains(right, left)?)),
        BinOp::NotIn => Ok(Value::Bool(!contains(right, left)?)),
        BinOp::Is => identity(left, right),
        BinOp::IsNot => identity(left, right).map(|v| Value::Bool(!truthy(&v))),
        BinOp::Add => add(left, right),
        BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::FloorDiv | BinOp::Mod => {
            numeric_binary(op, left, right)
        }
    }
}

/// `is` / `is not` support identity against the null sentinel only.
fn identity(left: &Value, right: &Value) -> Result<Value, ExprError> {
    if left.is_null() || right.is_null() {
        Ok(Value::Bool(left.is_null() && right.is_null()))
    } else {
        Err(ExprError::Eval(
            "'is' comparisons are only supported against None".to_string(),
        ))
    }
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

fn as_num(value: &Value) -> Option<Num> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Num::Int(i))
            } else {
                n.as_f64().map(Num::Float)
            }
        }
        // Booleans participate in arithmetic and comparison as 0/1.
        Value::Bool(b) => Some(Num::Int(*b as i64)),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

fn float_value(f: f64) -> Result<Value, ExprError> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| ExprError::Eval("non-finite float result".to_string()))
}

/// Equality: numeric across int/float/bool, structural otherwise; values of
/// different kinds are unequal rather than an error.
fn value_eq(left: &Value, right: &Value) -> bool {
    if let (Some(l), Some(r)) = (as_num(left), as_num(right)) {
        return match (l, r) {
            (Num::Int(a), Num::Int(b)) => a == b,
            _ => l.as_f64() == r.as_f64(),
        };
    }
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| value_eq(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).map(|w| value_eq(v, w)).unwrap_or(false))
        }
        _ => false,
    }
}

fn order(left: &Value, right: &Value) -> Result<Ordering, ExprError> {
    if let (Some(l), Some(r)) = (as_num(left), as_num(right)) {
        return l
            .as_f64()
            .partial_cmp(&r.as_f64())
            .ok_or_else(|| ExprError::Eval("cannot order NaN".to_string()));
    }
    if let (Value::String(a), Value::String(b)) = (left, right) {
        return Ok(a.cmp(b));
    }
    Err(ExprError::Eval(format!(
        "'<' not supported between {} and {}",
        type_name(left),
        type_name(right)
    )))
}

fn contains(haystack: &Value, needle: &Value) -> Result<bool, ExprError> {
    match haystack {
        Value::Array(items) => Ok(items.iter().any(|item| value_eq(item, needle))),
        Value::String(s) => {
            let Value::String(sub) = needle else {
                return Err(ExprError::Eval(
                    "'in <string>' requires a string operand".to_string(),
                ));
            };
            Ok(s.contains(sub.as_str()))
        }
        Value::Object(map) => {
            let Value::String(key) = needle else {
                return Err(ExprError::Eval(
                    "'in <mapping>' requires a string key".to_string(),
                ));
            };
            Ok(map.contains_key(key))
        }
        other => Err(ExprError::Eval(format!(
            "argument of type {} is not iterable",
            type_name(other)
        ))),
    }
}

fn negate(value: &Value) -> Result<Value, ExprError> {
    match as_num(value) {
        Some(Num::Int(i)) => i
            .checked_neg()
            .map(Value::from)
            .ok_or_else(|| ExprError::Eval("integer overflow".to_string())),
        Some(Num::Float(f)) => float_value(-f),
        None => Err(ExprError::Eval(format!(
            "bad operand type for unary -: {}",
            type_name(value)
        ))),
    }
}

fn add(left: &Value, right: &Value) -> Result<Value, ExprError> {
    if let (Some(l), Some(r)) = (as_num(left), as_num(right)) {
        return match (l, r) {
            (Num::Int(a), Num::Int(b)) => match a.checked_add(b) {
                Some(sum) => Ok(Value::from(sum)),
                None => float_value(a as f64 + b as f64),
            },
            _ => float_value(l.as_f64() + r.as_f64()),
        };
    }
    match (left, right) {
        (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
        (Value::Array(a), Value::Array(b)) => {
            let mut items = a.clone();
            items.extend(b.iter().cloned());
            Ok(Value::Array(items))
        }
        _ => Err(ExprError::Eval(format!(
            "unsupported operand types for +: {} and {}",
            type_name(left),
            type_name(right)
        ))),
    }
}

fn numeric_binary(op: BinOp, left: &Value, right: &Value) -> Result<Value, ExprError> {
    let (Some(l), Some(r)) = (as_num(left), as_num(right)) else {
        return Err(ExprError::Eval(format!(
            "unsupported operand types: {} and {}",
            type_name(left),
            type_name(right)
        )));
    };

    match op {
        BinOp::Sub => match (l, r) {
            (Num::Int(a), Num::Int(b)) => match a.checked_sub(b) {
                Some(diff) => Ok(Value::from(diff)),
                None => float_value(a as f64 - b as f64),
            },
            _ => float_value(l.as_f64() - r.as_f64()),
        },
        BinOp::Mul => match (l, r) {
            (Num::Int(a), Num::Int(b)) => match a.checked_mul(b) {
                Some(product) => Ok(Value::from(product)),
                None => float_value(a as f64 * b as f64),
            },
            _ => float_value(l.as_f64() * r.as_f64()),
        },
        BinOp::Div => {
            if r.as_f64() == 0.0 {
                return Err(ExprError::Eval("division by zero".to_string()));
            }
            float_value(l.as_f64() / r.as_f64())
        }
        BinOp::FloorDiv => {
            if r.as_f64() == 0.0 {
                return Err(ExprError::Eval("division by zero".to_string()));
            }
            let quotient = (l.as_f64() / r.as_f64()).floor();
            match (l, r) {
                (Num::Int(_), Num::Int(_)) => Ok(Value::from(quotient as i64)),
                _ => float_value(quotient),
            }
        }
        BinOp::Mod => {
            if r.as_f64() == 0.0 {
                return Err(ExprError::Eval("modulo by zero".to_string()));
            }
            // Sign follows the divisor.
            let remainder = l.as_f64() - r.as_f64() * (l.as_f64() / r.as_f64()).floor();
            match (l, r) {
                (Num::Int(_), Num::Int(_)) => Ok(Value::from(remainder as i64)),
                _ => float_value(remainder),
            }
        }
        _ => unreachable!("non-numeric operator routed to numeric_binary"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse;

    fn eval_src(source: &str, ctx: &Context) -> Result<Value, ExprError> {
        evaluate(&parse(source).unwrap(), ctx)
    }

    #[test]
    fn test_numeric_equality_across_kinds() {
        let ctx = Context::new();
        assert_eq!(eval_src("1 == 1.0", &ctx).unwrap(), Value::Bool(true));
        assert_eq!(eval_src("True == 1", &ctx).unwrap(), Value::Bool(true));
        assert_eq!(eval_src("1 == \"1\"", &ctx).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_short_circuit_returns_operand() {
        let mut ctx = Context::new();
        ctx.set("fallback", json!("default"));
        let value = eval_src("context.data.missing or context.data.fallback", &ctx).unwrap();
        assert_eq!(value, json!("default"));
    }

    #[test]
    fn test_negative_indexing() {
        let mut ctx = Context::new();
        ctx.set("items", json!([1, 2, 3]));
        assert_eq!(eval_src("context.data.items[-1]", &ctx).unwrap(), json!(3));
        assert_eq!(
            eval_src("context.data.items[9]", &ctx).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_floor_division_matches_floor_semantics() {
        let ctx = Context::new();
        assert_eq!(eval_src("7 // 2", &ctx).unwrap(), json!(3));
        assert_eq!(eval_src("-7 // 2", &ctx).unwrap(), json!(-4));
        assert_eq!(eval_src("-7 % 3", &ctx).unwrap(), json!(2));
    }

    #[test]
    fn test_division_by_zero_is_eval_error() {
        let ctx = Context::new();
        assert!(matches!(
            eval_src("1 / 0", &ctx).unwrap_err(),
            ExprError::Eval(_)
        ));
    }

    #[test]
    fn test_ordering_across_types_is_eval_error() {
        let ctx = Context::new();
        assert!(matches!(
            eval_src("1 < \"2\"", &ctx).unwrap_err(),
            ExprError::Eval(_)
        ));
    }

    #[test]
    fn test_is_against_non_none_rejected() {
        let ctx = Context::new();
        assert!(matches!(
            eval_src("1 is 1", &ctx).unwrap_err(),
            ExprError::Eval(_)
        ));
    }

    #[test]
    fn test_unknown_name_is_eval_error() {
        let ctx = Context::new();
        let err = eval_src("data.x", &ctx).unwrap_err();
        assert!(matches!(err, ExprError::Eval(_)));
    }

    #[test]
    fn test_truthiness() {
        assert!(!truthy(&Value::Null));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!([])));
        assert!(truthy(&json!("x")));
        assert!(truthy(&json!([0])));
        assert!(truthy(&json!(-1)));
    }
}
