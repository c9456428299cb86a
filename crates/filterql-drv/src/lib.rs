//! The public entry point: chains parse → validate → evaluate and exposes
//! the single `run` call the CLI (and any embedder) drives against.

use std::collections::BTreeMap;

use filterql_eval::{Env, ErrorKind, Limits, RuntimeError, Signal, Value};
use filterql_par::ParseError;
use filterql_sem::ValidateError;
use filterql_util::Span;
use thiserror::Error;

/// Everything a caller can configure about one `run`: resource limits and
/// the `$name`-bound variables visible inside the filter.
///
/// `limits` alone is `serde`-round-trippable (an embedder can ship it across
/// a process boundary as JSON); `vars` holds the hand-rolled [`Value`]
/// rather than `serde_json::Value`, so the whole struct is assembled by the
/// caller in-process rather than deserialized wholesale.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub limits: Limits,
    pub vars: BTreeMap<String, Value>,
}

/// The four-category error surface (parse, validate, runtime, and the lex
/// faults folded into parse): lex faults surface through
/// [`ParseError::Lex`], so there is no separate `Lex` variant here.
#[derive(Debug, Clone, Error)]
pub enum FilterError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("validation error: {0}")]
    Validate(#[from] ValidateError),

    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

impl FilterError {
    /// The source span of the offending text, for a caller that wants to
    /// underline it against the original program.
    pub fn span(&self) -> Span {
        match self {
            FilterError::Parse(e) => e.span(),
            FilterError::Validate(e) => e.span(),
            FilterError::Runtime(e) => e.span,
        }
    }
}

/// Parses, validates, and evaluates `source` against `input`.
///
/// A `break` that escapes every enclosing `label` is a programmer error in
/// the filter, not a sandbox violation — it is folded into a `RuntimeError`
/// here rather than leaking the evaluator's internal `Signal::Break`
/// representation across the library boundary.
pub fn run(source: &str, input: Value, options: RunOptions) -> Result<Vec<Value>, FilterError> {
    let ast = filterql_par::parse(source)?;
    filterql_sem::validate(&ast)?;

    let mut env = Env::root();
    for (name, value) in &options.vars {
        env = env.define_var(name, value.clone());
    }

    match filterql_eval::run(&ast, input, &env, options.limits) {
        Ok(outputs) => Ok(outputs),
        Err(Signal::Fault(e)) => Err(FilterError::Runtime(e)),
        Err(Signal::Break(label)) => Err(FilterError::Runtime(RuntimeError::new(
            ErrorKind::User,
            format!("break ${label} escaped every enclosing label"),
            Span::DUMMY,
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_src(src: &str, input: Value) -> Result<Vec<Value>, FilterError> {
        run(src, input, RunOptions::default())
    }

    #[test]
    fn alternative_operator_substitutes_null() {
        let input: Value = serde_json::json!({"foo": null}).into();
        let out = run_src(r#".foo // "fallback""#, input).unwrap();
        assert_eq!(out, vec![Value::String("fallback".into())]);
    }

    #[test]
    fn select_and_comprehension_filter_even_numbers() {
        let input: Value = serde_json::json!([1, 2, 3, 4, 5]).into();
        let out = run_src("[.[] | select(. % 2 == 0)]", input).unwrap();
        assert_eq!(out, vec![Value::from(serde_json::json!([2, 4]))]);
    }

    #[test]
    fn reduce_sums_an_array() {
        let input: Value = serde_json::json!([1, 2, 3, 4]).into();
        let out = run_src("reduce .[] as $x (0; . + $x)", input).unwrap();
        assert_eq!(out, vec![Value::Number(10.0)]);
    }

    #[test]
    fn keys_are_lexicographically_sorted() {
        let input: Value = serde_json::json!({"b": 1, "a": 2}).into();
        let out = run_src("keys", input).unwrap();
        assert_eq!(out, vec![Value::from(serde_json::json!(["a", "b"]))]);
    }

    #[test]
    fn setpath_builds_intermediate_containers() {
        let out = run_src(r#"setpath(["a", 0]; 7)"#, Value::Null).unwrap();
        assert_eq!(out, vec![Value::from(serde_json::json!({"a": [7]}))]);
    }

    #[test]
    fn recursive_user_function_computes_factorial() {
        let src = "def f: if . == 0 then 1 else . * (. - 1 | f) end; 5 | f";
        let out = run_src(src, Value::Null).unwrap();
        assert_eq!(out, vec![Value::Number(120.0)]);
    }

    #[test]
    fn forbidden_builtin_fails_validation() {
        let err = run_src("now", Value::Null).unwrap_err();
        assert!(matches!(err, FilterError::Validate(ValidateError::ForbiddenBuiltin { .. })));
    }

    #[test]
    fn division_by_zero_is_a_runtime_fault() {
        let err = run_src("1 / 0", Value::Null).unwrap_err();
        assert!(matches!(err, FilterError::Runtime(e) if e.kind == ErrorKind::Arith));
    }

    #[test]
    fn exceeding_the_output_cap_is_a_resource_fault() {
        let options = RunOptions {
            limits: Limits {
                max_outputs: 100_000,
                ..Limits::default()
            },
            vars: BTreeMap::new(),
        };
        let err = run("[range(100001)]", Value::Null, options).unwrap_err();
        assert!(matches!(err, FilterError::Runtime(e) if e.kind == ErrorKind::Resource));
    }

    #[test]
    fn vars_are_bound_as_dollar_names() {
        let mut vars = BTreeMap::new();
        vars.insert("greeting".to_string(), Value::String("hi".into()));
        let options = RunOptions {
            limits: Limits::default(),
            vars,
        };
        let out = run("$greeting", Value::Null, options).unwrap();
        assert_eq!(out, vec![Value::String("hi".into())]);
    }
}
