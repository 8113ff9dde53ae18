//! Safe evaluation of step conditions.
//!
//! Conditions are written in a small expression language over the execution
//! context: comparisons, boolean combinators, `is [not] None`, membership,
//! arithmetic, literals, and attribute/subscript access rooted at the single
//! bound name `context`. The language is parsed by a dedicated grammar and
//! interpreted over the context's JSON values; nothing is ever handed to a
//! general-purpose evaluator. Call forms, lambdas, comprehensions, and
//! assignments are rejected at parse time, before any evaluation occurs.

mod eval;
mod lexer;
mod parser;

pub use eval::truthy;
pub use parser::Expr;

use std::fmt;

use crate::context::Context;

/// Why a condition failed to produce a boolean
#[derive(Debug, Clone, PartialEq)]
pub enum ExprError {
    /// The expression text does not parse
    Parse(String),
    /// The expression parses but uses a construct outside the safe subset
    UnsupportedConstruct(String),
    /// The expression failed during evaluation
    Eval(String),
}

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprError::Parse(msg) => write!(f, "parse error: {msg}"),
            ExprError::UnsupportedConstruct(msg) => write!(f, "unsupported construct: {msg}"),
            ExprError::Eval(msg) => write!(f, "evaluation error: {msg}"),
        }
    }
}

impl std::error::Error for ExprError {}

/// Parse an expression without evaluating it
pub fn parse(expression: &str) -> Result<Expr, ExprError> {
    let tokens = lexer::tokenize(expression)?;
    parser::parse(&tokens)
}

/// Evaluate a condition expression against a context, coercing the result to
/// a boolean by truthiness.
pub fn evaluate_condition(expression: &str, ctx: &Context) -> Result<bool, ExprError> {
    let expr = parse(expression)?;
    let value = eval::evaluate(&expr, ctx)?;
    Ok(truthy(&value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx_with(data: serde_json::Value) -> Context {
        let mut ctx = Context::new();
        if let serde_json::Value::Object(map) = data {
            ctx.data = map;
        }
        ctx
    }

    #[test]
    fn test_comparisons_over_data() {
        let ctx = ctx_with(json!({"count": 3, "kind": "order"}));
        assert!(evaluate_condition("context.data.count > 2", &ctx).unwrap());
        assert!(evaluate_condition("context.data.kind == \"order\"", &ctx).unwrap());
        assert!(!evaluate_condition("context.data.count >= 10", &ctx).unwrap());
    }

    #[test]
    fn test_boolean_combinators() {
        let ctx = ctx_with(json!({"a": true, "b": false}));
        assert!(evaluate_condition("context.data.a or context.data.b", &ctx).unwrap());
        assert!(!evaluate_condition("context.data.a and context.data.b", &ctx).unwrap());
        assert!(evaluate_condition("not context.data.b", &ctx).unwrap());
    }

    #[test]
    fn test_missing_paths_never_raise() {
        let ctx = ctx_with(json!({}));
        assert!(!evaluate_condition("context.data.x is not None", &ctx).unwrap());
        assert!(evaluate_condition("context.data.x is None", &ctx).unwrap());
        assert!(!evaluate_condition("context.data.deeply.nested.path", &ctx).unwrap());
    }

    #[test]
    fn test_membership() {
        let ctx = ctx_with(json!({"tags": ["a", "b"], "name": "alphabet"}));
        assert!(evaluate_condition("\"a\" in context.data.tags", &ctx).unwrap());
        assert!(evaluate_condition("\"c\" not in context.data.tags", &ctx).unwrap());
        assert!(evaluate_condition("\"pha\" in context.data.name", &ctx).unwrap());
    }

    #[test]
    fn test_arithmetic() {
        let ctx = ctx_with(json!({"n": 7}));
        assert!(evaluate_condition("context.data.n % 2 == 1", &ctx).unwrap());
        assert!(evaluate_condition("context.data.n // 2 == 3", &ctx).unwrap());
        assert!(evaluate_condition("context.data.n / 2 == 3.5", &ctx).unwrap());
        assert!(evaluate_condition("context.data.n + 1 == 8", &ctx).unwrap());
    }

    #[test]
    fn test_metadata_access() {
        let mut ctx = Context::new();
        assert!(!evaluate_condition("context.metadata.has_errors", &ctx).unwrap());
        ctx.metadata.record_error("fetch", "boom", "component");
        assert!(evaluate_condition("context.metadata.has_errors", &ctx).unwrap());
    }

    #[test]
    fn test_call_forms_rejected() {
        let ctx = Context::new();
        for expression in [
            "context.data.name.upper()",
            "len(context.data.items)",
            "(lambda: 1)()",
        ] {
            let err = evaluate_condition(expression, &ctx).unwrap_err();
            assert!(
                matches!(
                    err,
                    ExprError::UnsupportedConstruct(_) | ExprError::Parse(_)
                ),
                "expected rejection for {expression}, got {err:?}"
            );
        }
    }

    #[test]
    fn test_comprehensions_and_assignments_rejected() {
        let ctx = Context::new();
        let err = evaluate_condition("[x for x in context.data.items]", &ctx).unwrap_err();
        assert!(matches!(err, ExprError::UnsupportedConstruct(_)));

        let err = evaluate_condition("context.data.x = 1", &ctx).unwrap_err();
        assert!(matches!(err, ExprError::UnsupportedConstruct(_)));
    }

    #[test]
    fn test_not_in_on_non_iterable_is_eval_error() {
        let ctx = ctx_with(json!({"n": 4}));
        let err = evaluate_condition("1 not in context.data.n", &ctx).unwrap_err();
        assert!(matches!(err, ExprError::Eval(_)));
    }

    #[test]
    fn test_list_and_dict_literals() {
        let ctx = ctx_with(json!({"kind": "b"}));
        assert!(evaluate_condition("context.data.kind in [\"a\", \"b\"]", &ctx).unwrap());
        assert!(evaluate_condition("context.data.kind in {\"b\": 1}", &ctx).unwrap());
        assert!(evaluate_condition("context.data.kind in (\"a\", \"b\")", &ctx).unwrap());
    }
}
