//! Tree-walking evaluator for the filterql jq subset.
//!
//! Consumes a validated [`filterql_par::Expr`] and a [`Value`] input, and
//! drives evaluation through [`eval::eval`]'s callback-based emission, with
//! every step, recursion level, and output charged against a
//! [`ResourceTracker`] so a filter program can only ever run for a bounded
//! amount of work.

mod assign;
mod builtins;
mod env;
mod error;
mod eval;
mod path;
mod signal;
mod tracker;
mod value;

pub use assign::AssignOp;
pub use env::Env;
pub use error::{ErrorKind, RuntimeError};
pub use eval::{eval, eval_to_vec, number_of};
pub use path::{Path, PathSegment};
pub use signal::Signal;
pub use tracker::{Limits, ResourceTracker};
pub use value::Value;

/// Runs `expr` against `input` to completion, under `limits`, collecting
/// every emitted value. The entry point `filterql-drv` drives against; most
/// callers want this rather than [`eval`] directly, since it owns the
/// tracker and environment setup a single run needs.
pub fn run(expr: &filterql_par::Expr, input: Value, env: &Env, limits: Limits) -> Result<Vec<Value>, Signal> {
    let tracker = std::cell::RefCell::new(ResourceTracker::new(limits));
    eval_to_vec(expr, &input, env, &tracker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filterql_par::parse;

    fn run_src(src: &str, input: Value) -> Result<Vec<Value>, Signal> {
        let expr = parse(src).expect("parse should succeed");
        run(&expr, input, &Env::root(), Limits::default())
    }

    #[test]
    fn identity_returns_input() {
        let out = run_src(".", Value::Number(1.0)).unwrap();
        assert_eq!(out, vec![Value::Number(1.0)]);
    }

    #[test]
    fn map_applies_filter_to_each_element() {
        let out = run_src("map(. + 1)", Value::Array(vec![Value::Number(1.0), Value::Number(2.0)])).unwrap();
        assert_eq!(out, vec![Value::Array(vec![Value::Number(2.0), Value::Number(3.0)])]);
    }

    #[test]
    fn select_filters_truthy_values() {
        let out = run_src(".[] | select(. > 1)", Value::Array(vec![Value::Number(1.0), Value::Number(2.0)])).unwrap();
        assert_eq!(out, vec![Value::Number(2.0)]);
    }

    #[test]
    fn limit_stops_an_infinite_generator() {
        let out = run_src("[limit(3; repeat(. + 1))]", Value::Number(0.0)).unwrap();
        assert_eq!(
            out,
            vec![Value::Array(vec![Value::Number(1.0), Value::Number(1.0), Value::Number(1.0)])]
        );
    }

    #[test]
    fn division_by_zero_faults() {
        let err = run_src("1 / 0", Value::Null).unwrap_err();
        assert!(matches!(err, Signal::Fault(e) if e.kind == ErrorKind::Arith));
    }

    #[test]
    fn step_cap_trips_on_unbounded_recursion() {
        let tight = Limits {
            max_steps: 50,
            ..Limits::default()
        };
        let expr = parse("repeat(. + 1)").unwrap();
        let tracker = std::cell::RefCell::new(ResourceTracker::new(tight));
        let err = eval_to_vec(&expr, &Value::Number(0.0), &Env::root(), &tracker).unwrap_err();
        assert!(matches!(err, Signal::Fault(e) if e.kind == ErrorKind::Resource));
    }
}
