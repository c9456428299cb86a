//! The assignment engine: `=`, `|=`, and the compound arithmetic/alternative
//! update operators.
//!
//! `lhs = rhs` and the compound operators all resolve `lhs` to a set of
//! paths against the *original* input and apply every path's update to a
//! single accumulating document, once per value `rhs` emits. Resolved paths
//! are sorted into descending order first (same comparison `path::
//! delete_paths` already sorts by, just without the dedupe) so a path that
//! is a prefix of another — `.a` and `.a.b` from `(.a, .a.b) = 1` — is
//! applied deepest-first, before the shallower write can change the parent's
//! type out from under it. `|=` differs: its right side is the update
//! filter itself, run once per path with that path's current value as
//! input, and an update that emits no value deletes the path it was run for
//! — mirroring `reduce`'s "exactly one output, or none" contract rather
//! than a plain substitution.

use filterql_par::{BinOp, Expr};
use filterql_util::Span;

use crate::env::Env;
use crate::error::RuntimeError;
use crate::eval::{self, Emit, Tracker};
use crate::path;
use crate::signal::Signal;
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AssignOp {
    /// `=`
    Set,
    /// `|=`
    Update,
    /// `+=`, `-=`, `*=`, `/=`, `%=`
    Arith(BinOp),
    /// `//=`
    Alt,
}

pub fn eval_assign(
    op: AssignOp,
    lhs: &Expr,
    rhs: &Expr,
    input: &Value,
    env: &Env,
    tracker: &Tracker,
    span: Span,
    emit: &mut Emit,
) -> Result<(), Signal> {
    match op {
        AssignOp::Set => eval::eval(rhs, input, env, tracker, &mut |rv| {
            let mut paths = eval::resolve_paths(lhs, input, env, tracker)?;
            paths.sort_by(|a, b| b.cmp(a));
            let mut result = input.clone();
            for p in &paths {
                result = path::update_path(&result, p, &mut |_| Ok(rv.clone()), span).map_err(Signal::from)?;
            }
            tracker.borrow_mut().emit(span)?;
            emit(result)
        }),

        AssignOp::Update => {
            let paths = eval::resolve_paths(lhs, input, env, tracker)?;
            let mut result = input.clone();
            let mut to_delete = Vec::new();
            for p in &paths {
                let current = path::get_path(&result, p);
                let outputs = eval::eval_to_vec(rhs, &current, env, tracker)?;
                match outputs.len() {
                    0 => to_delete.push(p.clone()),
                    1 => {
                        let v = outputs.into_iter().next().unwrap();
                        result = path::update_path(&result, p, &mut |_| Ok(v.clone()), span).map_err(Signal::from)?;
                    }
                    _ => {
                        return Err(Signal::from(RuntimeError::type_(
                            "update expression produced multiple values for one path",
                            span,
                        )))
                    }
                }
            }
            if !to_delete.is_empty() {
                result = path::delete_paths(&result, to_delete, span).map_err(Signal::from)?;
            }
            tracker.borrow_mut().emit(span)?;
            emit(result)
        }

        AssignOp::Arith(binop) => eval::eval(rhs, input, env, tracker, &mut |rv| {
            let mut paths = eval::resolve_paths(lhs, input, env, tracker)?;
            paths.sort_by(|a, b| b.cmp(a));
            let mut result = input.clone();
            for p in &paths {
                let current = path::get_path(&result, p);
                let combined = eval::apply_binop(binop, &current, &rv, span).map_err(Signal::from)?;
                result = path::update_path(&result, p, &mut |_| Ok(combined.clone()), span).map_err(Signal::from)?;
            }
            tracker.borrow_mut().emit(span)?;
            emit(result)
        }),

        AssignOp::Alt => eval::eval(rhs, input, env, tracker, &mut |rv| {
            let mut paths = eval::resolve_paths(lhs, input, env, tracker)?;
            paths.sort_by(|a, b| b.cmp(a));
            let mut result = input.clone();
            for p in &paths {
                let current = path::get_path(&result, p);
                let combined = if current.is_truthy() { current } else { rv.clone() };
                result = path::update_path(&result, p, &mut |_| Ok(combined), span).map_err(Signal::from)?;
            }
            tracker.borrow_mut().emit(span)?;
            emit(result)
        }),
    }
}

#[cfg(test)]
mod tests {
    use filterql_par::parse;

    use crate::env::Env;
    use crate::tracker::Limits;
    use crate::value::Value;

    fn run_src(src: &str, input: Value) -> Value {
        let expr = parse(src).expect("parse should succeed");
        let mut out = crate::run(&expr, input, &Env::root(), Limits::default()).expect("run should succeed");
        assert_eq!(out.len(), 1, "expected exactly one output");
        out.remove(0)
    }

    #[test]
    fn plain_set_applies_to_every_resolved_path() {
        let input = Value::Object(
            [("a".to_string(), Value::Number(1.0)), ("b".to_string(), Value::Number(2.0))]
                .into_iter()
                .collect(),
        );
        let out = run_src(".a = 9", input);
        match out {
            Value::Object(m) => assert_eq!(m.get("a"), Some(&Value::Number(9.0))),
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn update_op_deletes_path_when_rhs_yields_nothing() {
        let input = Value::Object(
            [("a".to_string(), Value::Number(1.0)), ("b".to_string(), Value::Number(2.0))]
                .into_iter()
                .collect(),
        );
        let out = run_src(".a |= empty", input);
        match out {
            Value::Object(m) => {
                assert!(!m.contains_key("a"));
                assert_eq!(m.get("b"), Some(&Value::Number(2.0)));
            }
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn arithmetic_compound_assign_combines_current_and_rhs() {
        let input = Value::Object([("a".to_string(), Value::Number(1.0))].into_iter().collect());
        let out = run_src(".a += 5", input);
        match out {
            Value::Object(m) => assert_eq!(m.get("a"), Some(&Value::Number(6.0))),
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn alternative_assign_only_replaces_falsey_current_value() {
        let input = Value::Object(
            [("a".to_string(), Value::Null), ("b".to_string(), Value::Number(7.0))]
                .into_iter()
                .collect(),
        );
        let out_a = run_src(".a //= 42 | .a", input.clone());
        assert_eq!(out_a, Value::Number(42.0));
        let out_b = run_src(".b //= 42 | .b", input);
        assert_eq!(out_b, Value::Number(7.0));
    }

    #[test]
    fn set_fans_out_across_multiple_rhs_values() {
        let input = Value::Object([("a".to_string(), Value::Number(1.0))].into_iter().collect());
        let expr = parse(".a = (1, 2)").expect("parse should succeed");
        let out = crate::run(&expr, input, &Env::root(), Limits::default()).expect("run should succeed");
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn set_applies_overlapping_paths_deepest_first() {
        // Without descending order, `.a` would be written first, turning it
        // into a number, and the write to `.a.b` would then fault trying to
        // index that number.
        let out = run_src("(.a, .a.b) = 1", Value::Null);
        assert_eq!(
            out,
            Value::Object([("a".to_string(), Value::Number(1.0))].into_iter().collect())
        );
    }
}
