//! The builtin library: every `(name, arity)` the validator's registry in
//! `filterql-sem::builtins` accepts resolves here, keyed the same way. Each
//! entry receives the unevaluated argument ASTs plus the evaluator's
//! callback so it can honor jq's pass-by-filter argument semantics.
//!
//! Accounting convention: a value this module builds itself (a new array,
//! a converted scalar, a boolean verdict, a `null` fallback) goes through
//! `emit1`, which charges one output. A value forwarded verbatim from
//! evaluating a caller-supplied sub-filter (`select`'s truthy values,
//! `limit`'s wrapped generator, `walk`'s recursive result) was already
//! charged when the nested `eval` produced it, so it's forwarded with a
//! bare `emit` call — charging it twice would double-count the same unit
//! of work against the output cap.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use filterql_par::{BinOp, Expr};
use filterql_util::Span;

use crate::env::Env;
use crate::error::RuntimeError;
use crate::eval::{self, Emit, Tracker};
use crate::path::{self, Path, PathSegment};
use crate::signal::Signal;
use crate::value::Value;

/// A label no source program can type (`break` names come from identifier
/// syntax only) used to unwind exactly one internal early-exit, the way
/// `limit`/`first`/`isempty`/`any`/`all` stop pulling from a generator that
/// may otherwise be infinite (`repeat`, `recurse` with no base case).
const STOP: &str = "\0builtin-stop";

fn stop() -> Signal {
    Signal::Break(STOP.to_string())
}

fn absorb_stop(result: Result<(), Signal>) -> Result<(), Signal> {
    match result {
        Err(Signal::Break(l)) if l == STOP => Ok(()),
        other => other,
    }
}

fn emit1(tracker: &Tracker, span: Span, emit: &mut Emit, v: Value) -> Result<(), Signal> {
    tracker.borrow_mut().emit(span)?;
    emit(v)
}

fn fault(kind_msg: impl Into<String>, span: Span) -> Signal {
    Signal::Fault(RuntimeError::type_(kind_msg, span))
}

pub fn dispatch(
    name: &str,
    args: &[Expr],
    input: &Value,
    env: &Env,
    tracker: &Tracker,
    span: Span,
    emit: &mut Emit,
) -> Result<(), Signal> {
    match (name, args.len()) {
        ("type", 0) => emit1(tracker, span, emit, Value::String(input.type_name().to_string())),
        ("tostring", 0) => emit1(tracker, span, emit, tostring(input)),
        ("tonumber", 0) => {
            let v = tonumber(input, span)?;
            emit1(tracker, span, emit, v)
        }
        ("length", 0) => {
            let v = length(input, span)?;
            emit1(tracker, span, emit, v)
        }
        ("toboolean", 0) => {
            let v = toboolean(input, span)?;
            emit1(tracker, span, emit, v)
        }
        ("not", 0) => emit1(tracker, span, emit, Value::Bool(!input.is_truthy())),
        ("empty", 0) => Ok(()),

        ("keys", 0) => {
            let v = keys(input, span)?;
            emit1(tracker, span, emit, v)
        }
        ("keys_unsorted", 0) => {
            // `Value::Object` is a `BTreeMap`, already sorted; there is no
            // insertion order left to preserve, so this coincides with
            // `keys`.
            let v = keys(input, span)?;
            emit1(tracker, span, emit, v)
        }
        ("has", 1) => {
            for kv in eval::eval_to_vec(&args[0], input, env, tracker)? {
                let v = has(input, &kv, span)?;
                emit1(tracker, span, emit, v)?;
            }
            Ok(())
        }
        ("in", 1) => {
            for container in eval::eval_to_vec(&args[0], input, env, tracker)? {
                let v = has(&container, input, span)?;
                emit1(tracker, span, emit, v)?;
            }
            Ok(())
        }
        ("contains", 1) => {
            for b in eval::eval_to_vec(&args[0], input, env, tracker)? {
                emit1(tracker, span, emit, Value::Bool(value_contains(input, &b)))?;
            }
            Ok(())
        }
        ("inside", 1) => {
            for b in eval::eval_to_vec(&args[0], input, env, tracker)? {
                emit1(tracker, span, emit, Value::Bool(value_contains(&b, input)))?;
            }
            Ok(())
        }

        ("map", 1) => {
            let out = map_values(&args[0], input, env, tracker, span)?;
            emit1(tracker, span, emit, Value::Array(out))
        }
        ("select", 1) => eval::eval(&args[0], input, env, tracker, &mut |cv| {
            if cv.is_truthy() {
                emit1(tracker, span, emit, input.clone())
            } else {
                Ok(())
            }
        }),
        ("sort", 0) => {
            let mut items = as_array(input, "sort", span)?;
            items.sort_by(|a, b| a.total_cmp(b));
            emit1(tracker, span, emit, Value::Array(items))
        }
        ("sort_by", 1) => {
            let items = as_array(input, "sort_by", span)?;
            let mut keyed = keyed_items(&args[0], &items, input, env, tracker)?;
            keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
            emit1(tracker, span, emit, Value::Array(keyed.into_iter().map(|(_, v)| v).collect()))
        }
        ("unique", 0) => {
            let mut items = as_array(input, "unique", span)?;
            items.sort_by(|a, b| a.total_cmp(b));
            items.dedup_by(|a, b| a.total_cmp(b) == Ordering::Equal);
            emit1(tracker, span, emit, Value::Array(items))
        }
        ("unique_by", 1) => {
            let items = as_array(input, "unique_by", span)?;
            let mut keyed = keyed_items(&args[0], &items, input, env, tracker)?;
            keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
            keyed.dedup_by(|a, b| a.0.total_cmp(&b.0) == Ordering::Equal);
            emit1(tracker, span, emit, Value::Array(keyed.into_iter().map(|(_, v)| v).collect()))
        }
        ("group_by", 1) => {
            let items = as_array(input, "group_by", span)?;
            let mut keyed = keyed_items(&args[0], &items, input, env, tracker)?;
            keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
            let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();
            for (k, v) in keyed {
                match groups.last_mut() {
                    Some((last_key, group)) if last_key.total_cmp(&k) == Ordering::Equal => group.push(v),
                    _ => groups.push((k, vec![v])),
                }
            }
            emit1(
                tracker,
                span,
                emit,
                Value::Array(groups.into_iter().map(|(_, g)| Value::Array(g)).collect()),
            )
        }
        ("reverse", 0) => {
            let v = reverse(input, span)?;
            emit1(tracker, span, emit, v)
        }
        ("flatten", 0) => {
            let items = as_array(input, "flatten", span)?;
            let mut out = Vec::new();
            flatten_into(&items, None, &mut out);
            emit1(tracker, span, emit, Value::Array(out))
        }
        ("flatten", 1) => {
            for depth_v in eval::eval_to_vec(&args[0], input, env, tracker)? {
                let depth = eval::number_of(&depth_v, span).map_err(Signal::from)?;
                if depth < 0.0 {
                    return Err(fault("flatten depth must not be negative", span));
                }
                let items = as_array(input, "flatten", span)?;
                let mut out = Vec::new();
                flatten_into(&items, Some(depth as i64), &mut out);
                emit1(tracker, span, emit, Value::Array(out))?;
            }
            Ok(())
        }
        ("transpose", 0) => {
            let v = transpose(input, span)?;
            emit1(tracker, span, emit, v)
        }
        ("bsearch", 1) => {
            for target in eval::eval_to_vec(&args[0], input, env, tracker)? {
                let items = as_array(input, "bsearch", span)?;
                let idx = bsearch(&items, &target);
                emit1(tracker, span, emit, Value::Number(idx as f64))?;
            }
            Ok(())
        }
        ("combinations", 0) => {
            let items = as_array(input, "combinations", span)?;
            let pools: Vec<Vec<Value>> = items
                .into_iter()
                .map(|v| as_array(&v, "combinations", span))
                .collect::<Result<_, _>>()?;
            combinations(&pools, &mut Vec::new(), tracker, span, &mut |combo| {
                emit1(tracker, span, emit, Value::Array(combo.to_vec()))
            })
        }
        ("combinations", 1) => {
            for n_v in eval::eval_to_vec(&args[0], input, env, tracker)? {
                let n = eval::number_of(&n_v, span).map_err(Signal::from)? as usize;
                let items = as_array(input, "combinations", span)?;
                let pools: Vec<Vec<Value>> = std::iter::repeat(items.clone()).take(n).collect();
                combinations(&pools, &mut Vec::new(), tracker, span, &mut |combo| {
                    emit1(tracker, span, emit, Value::Array(combo.to_vec()))
                })?;
            }
            Ok(())
        }

        ("to_entries", 0) => {
            let v = to_entries(input, span)?;
            emit1(tracker, span, emit, v)
        }
        ("from_entries", 0) => {
            let v = from_entries(input, span)?;
            emit1(tracker, span, emit, v)
        }
        ("with_entries", 1) => {
            // `to_entries | map(f) | from_entries`, per the jq manual's own
            // definition.
            let entries = to_entries(input, span)?;
            let mapped = map_values(&args[0], &entries, env, tracker, span)?;
            let result = from_entries(&Value::Array(mapped), span)?;
            emit1(tracker, span, emit, result)
        }

        ("split", 1) => {
            for sep_v in eval::eval_to_vec(&args[0], input, env, tracker)? {
                let v = split(input, &sep_v, span)?;
                emit1(tracker, span, emit, v)?;
            }
            Ok(())
        }
        ("join", 1) => {
            for sep_v in eval::eval_to_vec(&args[0], input, env, tracker)? {
                let v = join(input, &sep_v, span)?;
                emit1(tracker, span, emit, v)?;
            }
            Ok(())
        }
        ("startswith", 1) => {
            for s in eval::eval_to_vec(&args[0], input, env, tracker)? {
                let (a, b) = (string_of(input, span)?, string_of(&s, span)?);
                emit1(tracker, span, emit, Value::Bool(a.starts_with(&b)))?;
            }
            Ok(())
        }
        ("endswith", 1) => {
            for s in eval::eval_to_vec(&args[0], input, env, tracker)? {
                let (a, b) = (string_of(input, span)?, string_of(&s, span)?);
                emit1(tracker, span, emit, Value::Bool(a.ends_with(&b)))?;
            }
            Ok(())
        }
        ("index", 1) => {
            for needle in eval::eval_to_vec(&args[0], input, env, tracker)? {
                let v = find_index(input, &needle, span, false)?;
                emit1(tracker, span, emit, v)?;
            }
            Ok(())
        }
        ("rindex", 1) => {
            for needle in eval::eval_to_vec(&args[0], input, env, tracker)? {
                let v = find_index(input, &needle, span, true)?;
                emit1(tracker, span, emit, v)?;
            }
            Ok(())
        }
        ("indices", 1) => {
            for needle in eval::eval_to_vec(&args[0], input, env, tracker)? {
                let v = find_indices(input, &needle, span)?;
                emit1(tracker, span, emit, v)?;
            }
            Ok(())
        }
        ("explode", 0) => {
            let s = string_of(input, span)?;
            let arr = s.chars().map(|c| Value::Number(c as u32 as f64)).collect();
            emit1(tracker, span, emit, Value::Array(arr))
        }
        ("implode", 0) => {
            let items = as_array(input, "implode", span)?;
            let mut s = String::with_capacity(items.len());
            for item in items {
                let n = eval::number_of(&item, span).map_err(Signal::from)?;
                let cp = n as u32;
                let c = char::from_u32(cp).ok_or_else(|| fault("invalid codepoint in implode", span))?;
                s.push(c);
            }
            emit1(tracker, span, emit, Value::String(s))
        }
        ("ltrimstr", 1) => {
            for prefix in eval::eval_to_vec(&args[0], input, env, tracker)? {
                let v = match (input, &prefix) {
                    (Value::String(s), Value::String(p)) => {
                        Value::String(s.strip_prefix(p.as_str()).unwrap_or(s).to_string())
                    }
                    _ => input.clone(),
                };
                emit1(tracker, span, emit, v)?;
            }
            Ok(())
        }
        ("rtrimstr", 1) => {
            for suffix in eval::eval_to_vec(&args[0], input, env, tracker)? {
                let v = match (input, &suffix) {
                    (Value::String(s), Value::String(p)) => {
                        Value::String(s.strip_suffix(p.as_str()).unwrap_or(s).to_string())
                    }
                    _ => input.clone(),
                };
                emit1(tracker, span, emit, v)?;
            }
            Ok(())
        }
        ("ascii_upcase", 0) => {
            let s = string_of(input, span)?;
            emit1(tracker, span, emit, Value::String(s.chars().map(|c| c.to_ascii_uppercase()).collect()))
        }
        ("ascii_downcase", 0) => {
            let s = string_of(input, span)?;
            emit1(tracker, span, emit, Value::String(s.chars().map(|c| c.to_ascii_lowercase()).collect()))
        }

        ("paths", 0) => {
            let mut out = Vec::new();
            collect_paths(input, &mut Vec::new(), &mut out);
            for p in out {
                emit1(tracker, span, emit, path::path_to_value(&p))?;
            }
            Ok(())
        }
        ("getpath", 1) => {
            for pv in eval::eval_to_vec(&args[0], input, env, tracker)? {
                let p = path::value_to_path(&pv, span).map_err(Signal::from)?;
                emit1(tracker, span, emit, path::get_path(input, &p))?;
            }
            Ok(())
        }
        ("setpath", 2) => {
            for pv in eval::eval_to_vec(&args[0], input, env, tracker)? {
                let p = path::value_to_path(&pv, span).map_err(Signal::from)?;
                for vv in eval::eval_to_vec(&args[1], input, env, tracker)? {
                    let result = path::update_path(input, &p, &mut |_| Ok(vv.clone()), span).map_err(Signal::from)?;
                    emit1(tracker, span, emit, result)?;
                }
            }
            Ok(())
        }
        ("delpaths", 1) => {
            for ps_v in eval::eval_to_vec(&args[0], input, env, tracker)? {
                let Value::Array(raw_paths) = ps_v else {
                    return Err(fault("delpaths argument must be an array of paths", span));
                };
                let paths: Vec<Path> = raw_paths
                    .iter()
                    .map(|p| path::value_to_path(p, span))
                    .collect::<Result<_, _>>()
                    .map_err(Signal::from)?;
                let result = path::delete_paths(input, paths, span).map_err(Signal::from)?;
                emit1(tracker, span, emit, result)?;
            }
            Ok(())
        }
        ("path", 1) => {
            for p in eval::resolve_paths(&args[0], input, env, tracker)? {
                emit1(tracker, span, emit, path::path_to_value(&p))?;
            }
            Ok(())
        }

        ("range", 1) => {
            for upto in eval::eval_to_vec(&args[0], input, env, tracker)? {
                let upto = eval::number_of(&upto, span).map_err(Signal::from)?;
                emit_range(0.0, upto, 1.0, tracker, span, emit)?;
            }
            Ok(())
        }
        ("range", 2) => {
            for from in eval::eval_to_vec(&args[0], input, env, tracker)? {
                let from = eval::number_of(&from, span).map_err(Signal::from)?;
                for upto in eval::eval_to_vec(&args[1], input, env, tracker)? {
                    let upto = eval::number_of(&upto, span).map_err(Signal::from)?;
                    emit_range(from, upto, 1.0, tracker, span, emit)?;
                }
            }
            Ok(())
        }
        ("range", 3) => {
            for from in eval::eval_to_vec(&args[0], input, env, tracker)? {
                let from = eval::number_of(&from, span).map_err(Signal::from)?;
                for upto in eval::eval_to_vec(&args[1], input, env, tracker)? {
                    let upto = eval::number_of(&upto, span).map_err(Signal::from)?;
                    for by in eval::eval_to_vec(&args[2], input, env, tracker)? {
                        let by = eval::number_of(&by, span).map_err(Signal::from)?;
                        if by == 0.0 {
                            return Err(Signal::from(RuntimeError::arith("range step must not be zero", span)));
                        }
                        emit_range(from, upto, by, tracker, span, emit)?;
                    }
                }
            }
            Ok(())
        }
        ("limit", 2) => {
            for n_v in eval::eval_to_vec(&args[0], input, env, tracker)? {
                let n = eval::number_of(&n_v, span).map_err(Signal::from)?;
                limit_n(n, &args[1], input, env, tracker, emit)?;
            }
            Ok(())
        }
        ("first", 1) => {
            let mut found = None;
            absorb_stop(eval::eval(&args[0], input, env, tracker, &mut |v| {
                found = Some(v);
                Err(stop())
            }))?;
            if let Some(v) = found {
                emit(v)?;
            }
            Ok(())
        }
        ("last", 1) => {
            let values = eval::eval_to_vec(&args[0], input, env, tracker)?;
            match values.into_iter().last() {
                Some(v) => emit(v),
                None => emit1(tracker, span, emit, Value::Null),
            }
        }
        ("nth", 2) => {
            for n_v in eval::eval_to_vec(&args[0], input, env, tracker)? {
                let n = eval::number_of(&n_v, span).map_err(Signal::from)?;
                if n < 0.0 {
                    return Err(Signal::from(RuntimeError::index(
                        "out of bounds negative array index",
                        span,
                    )));
                }
                let mut collected = Vec::new();
                let limit_count = n as u64 + 1;
                absorb_stop(eval::eval(&args[1], input, env, tracker, &mut |v| {
                    collected.push(v);
                    if collected.len() as u64 >= limit_count {
                        Err(stop())
                    } else {
                        Ok(())
                    }
                }))?;
                match collected.into_iter().last() {
                    Some(v) => emit(v)?,
                    None => emit1(tracker, span, emit, Value::Null)?,
                }
            }
            Ok(())
        }
        ("isempty", 1) => {
            let mut any = false;
            absorb_stop(eval::eval(&args[0], input, env, tracker, &mut |_| {
                any = true;
                Err(stop())
            }))?;
            emit1(tracker, span, emit, Value::Bool(!any))
        }
        ("all", 1) => {
            let v = scan_elements(input, span, |elem| {
                let mut ok = true;
                absorb_stop(eval::eval(&args[0], elem, env, tracker, &mut |cv| {
                    if !cv.is_truthy() {
                        ok = false;
                        Err(stop())
                    } else {
                        Ok(())
                    }
                }))?;
                Ok(ok)
            })?;
            emit1(tracker, span, emit, Value::Bool(v))
        }
        ("any", 1) => {
            let v = scan_elements(input, span, |elem| {
                let mut ok = false;
                absorb_stop(eval::eval(&args[0], elem, env, tracker, &mut |cv| {
                    if cv.is_truthy() {
                        ok = true;
                        Err(stop())
                    } else {
                        Ok(())
                    }
                }))?;
                Ok(ok)
            })?;
            emit1(tracker, span, emit, Value::Bool(v))
        }
        ("recurse", 1) => recurse_with(&args[0], input.clone(), env, tracker, span, emit),
        ("while", 2) => while_with(&args[0], &args[1], input.clone(), env, tracker, span, emit),
        ("until", 2) => until_with(&args[0], &args[1], input.clone(), env, tracker, span, emit),
        ("repeat", 1) => repeat_with(&args[0], input.clone(), env, tracker, span, emit),
        ("walk", 1) => walk_with(&args[0], input, env, tracker, span, emit),

        ("floor", 0) => emit1(tracker, span, emit, Value::Number(number_of_self(input, span)?.floor())),
        ("ceil", 0) => emit1(tracker, span, emit, Value::Number(number_of_self(input, span)?.ceil())),
        ("round", 0) => {
            let n = number_of_self(input, span)?;
            let rounded = if n >= 0.0 { (n + 0.5).floor() } else { (n - 0.5).ceil() };
            emit1(tracker, span, emit, Value::Number(rounded))
        }
        ("abs", 0) => emit1(tracker, span, emit, Value::Number(number_of_self(input, span)?.abs())),
        ("sqrt", 0) => emit1(tracker, span, emit, Value::Number(number_of_self(input, span)?.sqrt())),
        ("isnan", 0) => emit1(tracker, span, emit, Value::Bool(number_of_self(input, span)?.is_nan())),
        ("isfinite", 0) => emit1(tracker, span, emit, Value::Bool(number_of_self(input, span)?.is_finite())),
        ("infinite", 0) => emit1(tracker, span, emit, Value::Number(f64::INFINITY)),
        ("min", 0) => {
            let items = as_array(input, "min", span)?;
            let v = items.into_iter().min_by(|a, b| a.total_cmp(b)).unwrap_or(Value::Null);
            emit1(tracker, span, emit, v)
        }
        ("max", 0) => {
            let items = as_array(input, "max", span)?;
            let v = items
                .into_iter()
                .fold(None, |acc: Option<Value>, cur| match acc {
                    None => Some(cur),
                    Some(best) => {
                        if cur.total_cmp(&best) != Ordering::Less {
                            Some(cur)
                        } else {
                            Some(best)
                        }
                    }
                })
                .unwrap_or(Value::Null);
            emit1(tracker, span, emit, v)
        }
        ("min_by", 1) => {
            let items = as_array(input, "min_by", span)?;
            let keyed = keyed_items(&args[0], &items, input, env, tracker)?;
            let v = keyed
                .into_iter()
                .min_by(|a, b| a.0.total_cmp(&b.0))
                .map(|(_, v)| v)
                .unwrap_or(Value::Null);
            emit1(tracker, span, emit, v)
        }
        ("max_by", 1) => {
            let items = as_array(input, "max_by", span)?;
            let keyed = keyed_items(&args[0], &items, input, env, tracker)?;
            let v = keyed
                .into_iter()
                .fold(None, |acc: Option<(Value, Value)>, (k, cur)| match acc {
                    None => Some((k, cur)),
                    Some((bk, bv)) => {
                        if k.total_cmp(&bk) != Ordering::Less {
                            Some((k, cur))
                        } else {
                            Some((bk, bv))
                        }
                    }
                })
                .map(|(_, v)| v)
                .unwrap_or(Value::Null);
            emit1(tracker, span, emit, v)
        }
        ("add", 0) => {
            let items = match input {
                Value::Array(a) => a.clone(),
                Value::Object(m) => m.values().cloned().collect(),
                Value::Null => Vec::new(),
                other => return Err(fault(format!("cannot iterate over {}", other.type_name()), span)),
            };
            let mut acc = Value::Null;
            for v in items {
                tracker.borrow_mut().step(span)?;
                acc = eval::apply_binop(BinOp::Add, &acc, &v, span).map_err(Signal::from)?;
            }
            emit1(tracker, span, emit, acc)
        }

        ("error", 1) => {
            let mut raised = None;
            absorb_stop(eval::eval(&args[0], input, env, tracker, &mut |v| {
                raised = Some(v);
                Err(stop())
            }))?;
            match raised {
                Some(Value::String(s)) => Err(Signal::from(RuntimeError::user(s, span))),
                Some(other) => Err(Signal::from(RuntimeError::user(other.to_string(), span))),
                None => Ok(()),
            }
        }

        (name, arity) => Err(fault(format!("unimplemented builtin `{name}/{arity}`"), span)),
    }
}

// --- type/conversion helpers ------------------------------------------------

fn tostring(v: &Value) -> Value {
    match v {
        Value::String(s) => Value::String(s.clone()),
        other => Value::String(other.to_string()),
    }
}

fn tonumber(v: &Value, span: Span) -> Result<Value, Signal> {
    match v {
        Value::Number(_) => Ok(v.clone()),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Number)
            .map_err(|_| fault(format!("cannot parse '{s}' as number"), span)),
        other => Err(fault(format!("cannot parse {} as number", other.type_name()), span)),
    }
}

fn toboolean(v: &Value, span: Span) -> Result<Value, Signal> {
    match v {
        Value::Bool(_) => Ok(v.clone()),
        Value::String(s) if s == "true" => Ok(Value::Bool(true)),
        Value::String(s) if s == "false" => Ok(Value::Bool(false)),
        other => Err(fault(format!("cannot convert {} to boolean", other.type_name()), span)),
    }
}

fn length(v: &Value, span: Span) -> Result<Value, Signal> {
    match v {
        Value::Null => Ok(Value::Number(0.0)),
        Value::Number(n) => Ok(Value::Number(n.abs())),
        Value::String(s) => Ok(Value::Number(s.chars().count() as f64)),
        Value::Array(a) => Ok(Value::Number(a.len() as f64)),
        Value::Object(m) => Ok(Value::Number(m.len() as f64)),
        Value::Bool(_) => Err(fault("boolean has no length", span)),
    }
}

fn number_of_self(v: &Value, span: Span) -> Result<f64, Signal> {
    eval::number_of(v, span).map_err(Signal::from)
}

fn string_of(v: &Value, span: Span) -> Result<String, Signal> {
    match v {
        Value::String(s) => Ok(s.clone()),
        other => Err(fault(format!("expected a string, got {}", other.type_name()), span)),
    }
}

fn as_array(v: &Value, who: &str, span: Span) -> Result<Vec<Value>, Signal> {
    match v {
        Value::Array(a) => Ok(a.clone()),
        other => Err(fault(format!("{who} input must be an array, got {}", other.type_name()), span)),
    }
}

// --- keys / membership -------------------------------------------------------

fn keys(v: &Value, span: Span) -> Result<Value, Signal> {
    match v {
        Value::Object(m) => Ok(Value::Array(m.keys().map(|k| Value::String(k.clone())).collect())),
        Value::Array(a) => Ok(Value::Array((0..a.len()).map(|i| Value::Number(i as f64)).collect())),
        other => Err(fault(format!("{} has no keys", other.type_name()), span)),
    }
}

fn has(container: &Value, key: &Value, span: Span) -> Result<Value, Signal> {
    match (container, key) {
        (Value::Object(m), Value::String(k)) => Ok(Value::Bool(m.contains_key(k))),
        (Value::Array(a), Value::Number(n)) => {
            let idx = *n as i64;
            Ok(Value::Bool(idx >= 0 && (idx as usize) < a.len()))
        }
        _ => Err(fault("has() requires object+string or array+number", span)),
    }
}

fn value_contains(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(am), Value::Object(bm)) => {
            bm.iter().all(|(k, bv)| am.get(k).is_some_and(|av| value_contains(av, bv)))
        }
        (Value::Array(aa), Value::Array(ba)) => ba.iter().all(|bv| aa.iter().any(|av| value_contains(av, bv))),
        (Value::String(a_s), Value::String(b_s)) => a_s.contains(b_s.as_str()),
        _ => a == b,
    }
}

// --- collection transforms ---------------------------------------------------

fn map_values(f: &Expr, input: &Value, env: &Env, tracker: &Tracker, span: Span) -> Result<Vec<Value>, Signal> {
    let items: Vec<Value> = match input {
        Value::Array(a) => a.clone(),
        Value::Object(m) => m.values().cloned().collect(),
        Value::Null => Vec::new(),
        other => return Err(fault(format!("cannot iterate over {}", other.type_name()), span)),
    };
    let mut out = Vec::new();
    for item in items {
        tracker.borrow_mut().step(span)?;
        eval::eval(f, &item, env, tracker, &mut |v| {
            out.push(v);
            Ok(())
        })?;
    }
    Ok(out)
}

fn keyed_items(
    f: &Expr,
    items: &[Value],
    _input: &Value,
    env: &Env,
    tracker: &Tracker,
) -> Result<Vec<(Value, Value)>, Signal> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        tracker.borrow_mut().step(item_span(f))?;
        let key_values = eval::eval_to_vec(f, item, env, tracker)?;
        out.push((Value::Array(key_values), item.clone()));
    }
    Ok(out)
}

fn item_span(e: &Expr) -> Span {
    e.span()
}

fn reverse(v: &Value, span: Span) -> Result<Value, Signal> {
    match v {
        Value::Array(a) => {
            let mut r = a.clone();
            r.reverse();
            Ok(Value::Array(r))
        }
        Value::String(s) => Ok(Value::String(s.chars().rev().collect())),
        Value::Null => Ok(Value::Array(Vec::new())),
        other => Err(fault(format!("cannot reverse {}", other.type_name()), span)),
    }
}

fn flatten_into(items: &[Value], depth: Option<i64>, out: &mut Vec<Value>) {
    for item in items {
        match item {
            Value::Array(inner) if depth != Some(0) => {
                flatten_into(inner, depth.map(|d| d - 1), out);
            }
            other => out.push(other.clone()),
        }
    }
}

fn transpose(v: &Value, span: Span) -> Result<Value, Signal> {
    let rows = as_array(v, "transpose", span)?;
    let mut inner_rows = Vec::with_capacity(rows.len());
    let mut max_len = 0;
    for row in &rows {
        let r = as_array(row, "transpose", span)?;
        max_len = max_len.max(r.len());
        inner_rows.push(r);
    }
    let mut cols = vec![Vec::with_capacity(inner_rows.len()); max_len];
    for row in &inner_rows {
        for i in 0..max_len {
            cols[i].push(row.get(i).cloned().unwrap_or(Value::Null));
        }
    }
    Ok(Value::Array(cols.into_iter().map(Value::Array).collect()))
}

fn bsearch(items: &[Value], target: &Value) -> i64 {
    match items.binary_search_by(|probe| probe.total_cmp(target)) {
        Ok(idx) => idx as i64,
        Err(idx) => -(idx as i64) - 1,
    }
}

fn combinations(
    pools: &[Vec<Value>],
    acc: &mut Vec<Value>,
    tracker: &Tracker,
    span: Span,
    emit: &mut dyn FnMut(&[Value]) -> Result<(), Signal>,
) -> Result<(), Signal> {
    let Some((first, rest)) = pools.split_first() else {
        return emit(acc);
    };
    for item in first {
        tracker.borrow_mut().step(span)?;
        acc.push(item.clone());
        combinations(rest, acc, tracker, span, emit)?;
        acc.pop();
    }
    Ok(())
}

// --- entries ------------------------------------------------------------------

fn to_entries(v: &Value, span: Span) -> Result<Value, Signal> {
    match v {
        Value::Object(m) => Ok(Value::Array(
            m.iter()
                .map(|(k, v)| {
                    let mut entry = BTreeMap::new();
                    entry.insert("key".to_string(), Value::String(k.clone()));
                    entry.insert("value".to_string(), v.clone());
                    Value::Object(entry)
                })
                .collect(),
        )),
        other => Err(fault(format!("{} has no entries", other.type_name()), span)),
    }
}

fn from_entries(v: &Value, span: Span) -> Result<Value, Signal> {
    let items = as_array(v, "from_entries", span)?;
    let mut out = BTreeMap::new();
    for entry in items {
        let Value::Object(m) = entry else {
            return Err(fault("from_entries requires an array of objects", span));
        };
        let key = m
            .get("key")
            .or_else(|| m.get("k"))
            .or_else(|| m.get("name"))
            .or_else(|| m.get("Name"))
            .or_else(|| m.get("K"))
            .or_else(|| m.get("Key"))
            .cloned()
            .unwrap_or(Value::Null);
        let key_str = match key {
            Value::String(s) => s,
            other => other.to_string(),
        };
        let value = m.get("value").or_else(|| m.get("v")).or_else(|| m.get("Value")).cloned().unwrap_or(Value::Null);
        out.insert(key_str, value);
    }
    Ok(Value::Object(out))
}

// --- strings --------------------------------------------------------------------

/// `split($sep)` is literally `./ $sep` in jq; reuse the `/` operator's
/// string-splitting case rather than duplicating it.
fn split(input: &Value, sep_v: &Value, span: Span) -> Result<Value, Signal> {
    eval::apply_binop(BinOp::Div, input, sep_v, span).map_err(Signal::from)
}

fn join(input: &Value, sep_v: &Value, span: Span) -> Result<Value, Signal> {
    let items = as_array(input, "join", span)?;
    let sep = string_of(sep_v, span)?;
    let parts: Vec<String> = items
        .iter()
        .map(|v| match v {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    Ok(Value::String(parts.join(&sep)))
}

fn find_index(container: &Value, needle: &Value, span: Span, last: bool) -> Result<Value, Signal> {
    let idxs = indices_of(container, needle, span)?;
    let v = if last { idxs.last() } else { idxs.first() };
    Ok(v.map(|i| Value::Number(*i as f64)).unwrap_or(Value::Null))
}

fn find_indices(container: &Value, needle: &Value, span: Span) -> Result<Value, Signal> {
    let idxs = indices_of(container, needle, span)?;
    Ok(Value::Array(idxs.into_iter().map(|i| Value::Number(i as f64)).collect()))
}

fn indices_of(container: &Value, needle: &Value, span: Span) -> Result<Vec<usize>, Signal> {
    match container {
        Value::String(s) => {
            let Value::String(n) = needle else {
                return Err(fault("indices of a string require a string needle", span));
            };
            if n.is_empty() {
                return Ok(Vec::new());
            }
            let chars: Vec<char> = s.chars().collect();
            let needle_chars: Vec<char> = n.chars().collect();
            Ok(windows_matching(&chars, &needle_chars))
        }
        Value::Array(a) => match needle {
            Value::Array(n) if !n.is_empty() => Ok(windows_matching(a, n)),
            _ => Ok(a.iter().enumerate().filter(|(_, v)| *v == needle).map(|(i, _)| i).collect()),
        },
        Value::Null => Ok(Vec::new()),
        other => Err(fault(format!("cannot search in {}", other.type_name()), span)),
    }
}

fn windows_matching<T: PartialEq>(haystack: &[T], needle: &[T]) -> Vec<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return Vec::new();
    }
    (0..=haystack.len() - needle.len()).filter(|&i| haystack[i..i + needle.len()] == *needle).collect()
}

// --- paths ------------------------------------------------------------------

fn collect_paths(value: &Value, prefix: &mut Path, out: &mut Vec<Path>) {
    match value {
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                prefix.push(PathSegment::Index(i as i64));
                out.push(prefix.clone());
                collect_paths(item, prefix, out);
                prefix.pop();
            }
        }
        Value::Object(m) => {
            for (k, v) in m {
                prefix.push(PathSegment::Key(k.clone()));
                out.push(prefix.clone());
                collect_paths(v, prefix, out);
                prefix.pop();
            }
        }
        _ => {}
    }
}

// --- generators / iterators --------------------------------------------------

fn emit_range(from: f64, upto: f64, by: f64, tracker: &Tracker, span: Span, emit: &mut Emit) -> Result<(), Signal> {
    let mut i = from;
    if by > 0.0 {
        while i < upto {
            tracker.borrow_mut().step(span)?;
            emit1(tracker, span, emit, Value::Number(i))?;
            i += by;
        }
    } else {
        while i > upto {
            tracker.borrow_mut().step(span)?;
            emit1(tracker, span, emit, Value::Number(i))?;
            i += by;
        }
    }
    Ok(())
}

fn limit_n(n: f64, f: &Expr, input: &Value, env: &Env, tracker: &Tracker, emit: &mut Emit) -> Result<(), Signal> {
    if n <= 0.0 {
        return Ok(());
    }
    let target = n as u64;
    let mut count = 0u64;
    absorb_stop(eval::eval(f, input, env, tracker, &mut |v| {
        count += 1;
        emit(v)?;
        if count >= target {
            Err(stop())
        } else {
            Ok(())
        }
    }))
}

fn scan_elements(input: &Value, span: Span, mut check: impl FnMut(&Value) -> Result<bool, Signal>) -> Result<bool, Signal> {
    let items: Vec<Value> = match input {
        Value::Array(a) => a.clone(),
        Value::Object(m) => m.values().cloned().collect(),
        Value::Null => Vec::new(),
        other => return Err(fault(format!("cannot iterate over {}", other.type_name()), span)),
    };
    for item in &items {
        if !check(item)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// `recurse(f)`: emit the current value, then recurse into every value `f`
/// produces from it. `enter_node`/`exit_node` charge this builtin's own
/// unrolling against the same `depth` budget AST recursion uses, so an
/// unbounded `recurse` faults at `max_depth` instead of overflowing the
/// native call stack. See `repeat_with` below for the distinct (unpiped)
/// shape `repeat(f)` needs.
fn recurse_with(f: &Expr, value: Value, env: &Env, tracker: &Tracker, span: Span, emit: &mut Emit) -> Result<(), Signal> {
    tracker.borrow_mut().enter_node(span)?;
    let result = recurse_with_inner(f, value, env, tracker, span, emit);
    tracker.borrow_mut().exit_node();
    result
}

fn recurse_with_inner(f: &Expr, value: Value, env: &Env, tracker: &Tracker, span: Span, emit: &mut Emit) -> Result<(), Signal> {
    emit1(tracker, span, emit, value.clone())?;
    eval::eval(f, &value, env, tracker, &mut |next| recurse_with(f, next, env, tracker, span, emit))
}

/// `repeat(f)`: unlike `recurse_with`, `f` is re-evaluated against the same
/// original input every iteration rather than piped through its own prior
/// output — `def repeat(f): def _repeat: f, _repeat; _repeat;` never
/// rebinds `.` inside `_repeat`, so every call to `f` sees the input that
/// was current when `repeat` was first invoked. `[limit(3; repeat(.+1))]`
/// on `0` is therefore `[1, 1, 1]`, not `[1, 2, 3]`.
fn repeat_with(f: &Expr, input: Value, env: &Env, tracker: &Tracker, span: Span, emit: &mut Emit) -> Result<(), Signal> {
    tracker.borrow_mut().enter_node(span)?;
    let result = repeat_with_inner(f, &input, env, tracker, span, emit);
    tracker.borrow_mut().exit_node();
    result
}

fn repeat_with_inner(f: &Expr, input: &Value, env: &Env, tracker: &Tracker, span: Span, emit: &mut Emit) -> Result<(), Signal> {
    eval::eval(f, input, env, tracker, emit)?;
    repeat_with(f, input.clone(), env, tracker, span, emit)
}

fn while_with(cond: &Expr, update: &Expr, value: Value, env: &Env, tracker: &Tracker, span: Span, emit: &mut Emit) -> Result<(), Signal> {
    tracker.borrow_mut().enter_node(span)?;
    let result = while_with_inner(cond, update, value, env, tracker, span, emit);
    tracker.borrow_mut().exit_node();
    result
}

fn while_with_inner(cond: &Expr, update: &Expr, value: Value, env: &Env, tracker: &Tracker, span: Span, emit: &mut Emit) -> Result<(), Signal> {
    eval::eval(cond, &value, env, tracker, &mut |cv| {
        if !cv.is_truthy() {
            return Ok(());
        }
        emit1(tracker, span, emit, value.clone())?;
        eval::eval(update, &value, env, tracker, &mut |next| {
            while_with(cond, update, next, env, tracker, span, emit)
        })
    })
}

fn until_with(cond: &Expr, update: &Expr, value: Value, env: &Env, tracker: &Tracker, span: Span, emit: &mut Emit) -> Result<(), Signal> {
    tracker.borrow_mut().enter_node(span)?;
    let result = until_with_inner(cond, update, value, env, tracker, span, emit);
    tracker.borrow_mut().exit_node();
    result
}

fn until_with_inner(cond: &Expr, update: &Expr, value: Value, env: &Env, tracker: &Tracker, span: Span, emit: &mut Emit) -> Result<(), Signal> {
    let mut done = false;
    eval::eval(cond, &value, env, tracker, &mut |cv| {
        done = done || cv.is_truthy();
        Ok(())
    })?;
    if done {
        emit1(tracker, span, emit, value.clone())
    } else {
        eval::eval(update, &value, env, tracker, &mut |next| {
            until_with(cond, update, next, env, tracker, span, emit)
        })
    }
}

fn walk_with(f: &Expr, value: &Value, env: &Env, tracker: &Tracker, span: Span, emit: &mut Emit) -> Result<(), Signal> {
    tracker.borrow_mut().enter_node(span)?;
    let result = walk_with_inner(f, value, env, tracker, span, emit);
    tracker.borrow_mut().exit_node();
    result
}


fn walk_with_inner(f: &Expr, value: &Value, env: &Env, tracker: &Tracker, span: Span, emit: &mut Emit) -> Result<(), Signal> {
    let rebuilt = match value {
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let mut child = None;
                walk_with(f, item, env, tracker, span, &mut |v| {
                    child = Some(v);
                    Ok(())
                })?;
                out.push(child.unwrap_or(Value::Null));
            }
            Value::Array(out)
        }
        Value::Object(m) => {
            let mut out = BTreeMap::new();
            for (k, v) in m {
                let mut child = None;
                walk_with(f, v, env, tracker, span, &mut |cv| {
                    child = Some(cv);
                    Ok(())
                })?;
                out.insert(k.clone(), child.unwrap_or(Value::Null));
            }
            Value::Object(out)
        }
        other => other.clone(),
    };
    eval::eval(f, &rebuilt, env, tracker, emit)
}

#[cfg(test)]
mod tests {
    use filterql_par::parse;

    use crate::env::Env;
    use crate::tracker::Limits;
    use crate::value::Value;

    fn run_src(src: &str, input: Value) -> Vec<Value> {
        let expr = parse(src).expect("parse should succeed");
        crate::run(&expr, input, &Env::root(), Limits::default()).expect("run should succeed")
    }

    fn arr(items: impl IntoIterator<Item = Value>) -> Value {
        Value::Array(items.into_iter().collect())
    }

    #[test]
    fn sort_by_is_stable_for_equal_keys() {
        let input = arr([
            arr([Value::Number(1.0), Value::String("a".into())]),
            arr([Value::Number(1.0), Value::String("b".into())]),
            arr([Value::Number(0.0), Value::String("c".into())]),
        ]);
        let out = run_src("sort_by(.[0])", input);
        assert_eq!(
            out,
            vec![arr([
                arr([Value::Number(0.0), Value::String("c".into())]),
                arr([Value::Number(1.0), Value::String("a".into())]),
                arr([Value::Number(1.0), Value::String("b".into())]),
            ])]
        );
    }

    #[test]
    fn group_by_groups_equal_keys_in_sorted_order() {
        let input = arr([Value::Number(3.0), Value::Number(1.0), Value::Number(1.0), Value::Number(2.0)]);
        let out = run_src("group_by(.)", input);
        assert_eq!(
            out,
            vec![arr([
                arr([Value::Number(1.0), Value::Number(1.0)]),
                arr([Value::Number(2.0)]),
                arr([Value::Number(3.0)]),
            ])]
        );
    }

    #[test]
    fn unique_sorts_then_dedupes() {
        let input = arr([Value::Number(3.0), Value::Number(1.0), Value::Number(3.0), Value::Number(2.0)]);
        let out = run_src("unique", input);
        assert_eq!(out, vec![arr([Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)])]);
    }

    #[test]
    fn to_entries_from_entries_round_trip() {
        let input = Value::Object(
            [("a".to_string(), Value::Number(1.0)), ("b".to_string(), Value::Number(2.0))]
                .into_iter()
                .collect(),
        );
        let out = run_src("to_entries | from_entries", input.clone());
        assert_eq!(out, vec![input]);
    }

    #[test]
    fn contains_is_recursive_over_objects_and_arrays() {
        let input = Value::Object(
            [(
                "a".to_string(),
                arr([Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]),
            )]
            .into_iter()
            .collect(),
        );
        let needle = Value::Object([("a".to_string(), arr([Value::Number(2.0)]))].into_iter().collect());
        let expr = parse("contains($n)").expect("parse should succeed");
        let env = Env::root().define_var("n", needle);
        let out = crate::eval::eval_to_vec(&expr, &input, &env, &std::cell::RefCell::new(crate::tracker::ResourceTracker::new(Limits::default())))
            .expect("eval should succeed");
        assert_eq!(out, vec![Value::Bool(true)]);
    }

    #[test]
    fn flatten_with_depth_stops_nesting() {
        let input = arr([arr([Value::Number(1.0), arr([Value::Number(2.0)])]), Value::Number(3.0)]);
        let out = run_src("flatten(1)", input);
        assert_eq!(
            out,
            vec![arr([Value::Number(1.0), arr([Value::Number(2.0)]), Value::Number(3.0)])]
        );
    }

    #[test]
    fn range_with_three_args_respects_step() {
        let out = run_src("[range(0; 10; 3)]", Value::Null);
        assert_eq!(
            out,
            vec![arr([Value::Number(0.0), Value::Number(3.0), Value::Number(6.0), Value::Number(9.0)])]
        );
    }

    #[test]
    fn range_rejects_zero_step() {
        let expr = parse("range(0; 10; 0)").expect("parse should succeed");
        let err = crate::run(&expr, Value::Null, &Env::root(), Limits::default()).unwrap_err();
        assert!(matches!(err, crate::signal::Signal::Fault(e) if e.kind == crate::error::ErrorKind::Arith));
    }

    #[test]
    fn first_stops_an_infinite_generator() {
        let out = run_src("first(repeat(.))", Value::Number(1.0));
        assert_eq!(out, vec![Value::Number(1.0)]);
    }

    #[test]
    fn walk_transforms_every_nested_value() {
        let input = arr([Value::Number(1.0), arr([Value::Number(2.0), Value::Number(3.0)])]);
        let out = run_src("walk(if type == \"number\" then . + 1 else . end)", input);
        assert_eq!(out, vec![arr([Value::Number(2.0), arr([Value::Number(3.0), Value::Number(4.0)])])]);
    }

    #[test]
    fn min_by_and_max_by_use_tie_break_rules() {
        let input = arr([
            arr([Value::Number(1.0), Value::String("x".into())]),
            arr([Value::Number(1.0), Value::String("y".into())]),
        ]);
        let min_out = run_src("min_by(.[0])", input.clone());
        assert_eq!(min_out, vec![arr([Value::Number(1.0), Value::String("x".into())])]);
        let max_out = run_src("max_by(.[0])", input);
        assert_eq!(max_out, vec![arr([Value::Number(1.0), Value::String("y".into())])]);
    }
}
