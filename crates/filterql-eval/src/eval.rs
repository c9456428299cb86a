//! The evaluator core: dispatches every AST node kind to a lazy, callback-
//! driven emission of values.
//!
//! A filter is, conceptually, a generator that may suspend between
//! emissions. Rust has no native generators usable across this crate's
//! MSRV, so this translates the generator as continuation-passing style:
//! `eval` never returns a collection, it calls `emit` once per value and
//! lets the caller decide whether to keep pulling. `emit` returning `Err`
//! (a cap tripped downstream, or a caller that only wanted the first value)
//! unwinds back out through every enclosing `eval` frame exactly like any
//! other fault, so early termination costs nothing extra to support.
//!
//! Resource accounting goes through `tracker: &RefCell<ResourceTracker>`
//! rather than `&mut ResourceTracker`: a plain unique reference can't be
//! both the direct argument to this call *and* captured by the emit
//! closure built for a nested call in the same expression, which this
//! evaluator needs constantly (e.g. string interpolation, binary ops). The
//! `RefCell` sidesteps that by making every access a short, dynamically
//! checked borrow instead of a single static one.

use std::cell::RefCell;
use std::rc::Rc;

use filterql_par::{AssignOp as AstAssignOp, BinOp, BoolOp, Expr, Key, Literal, ObjectEntry, StringPart};
use filterql_util::Span;

use crate::env::Env;
use crate::error::RuntimeError;
use crate::path::{self, Path, PathSegment};
use crate::signal::Signal;
use crate::tracker::ResourceTracker;
use crate::value::Value;
use crate::{assign, builtins};

pub type Tracker = RefCell<ResourceTracker>;
pub type Emit<'a> = dyn FnMut(Value) -> Result<(), Signal> + 'a;

pub fn eval(expr: &Expr, input: &Value, env: &Env, tracker: &Tracker, emit: &mut Emit) -> Result<(), Signal> {
    tracker.borrow_mut().enter_node(expr.span())?;
    let result = eval_inner(expr, input, env, tracker, emit);
    tracker.borrow_mut().exit_node();
    result
}

/// Collects every emission of `expr` into a `Vec`. Used only where the
/// semantics genuinely need the whole sequence before proceeding (`//`'s
/// collect-then-filter policy, `reduce`/`foreach`'s exactly-one checks,
/// assignment's path collection) — everywhere else `eval` streams directly
/// through nested callbacks to stay lazy.
pub fn eval_to_vec(expr: &Expr, input: &Value, env: &Env, tracker: &Tracker) -> Result<Vec<Value>, Signal> {
    let mut out = Vec::new();
    eval(expr, input, env, tracker, &mut |v| {
        out.push(v);
        Ok(())
    })?;
    Ok(out)
}

pub fn eval_exactly_one(
    expr: &Expr,
    input: &Value,
    env: &Env,
    tracker: &Tracker,
    what: &str,
) -> Result<Value, Signal> {
    let values = eval_to_vec(expr, input, env, tracker)?;
    match values.len() {
        1 => Ok(values.into_iter().next().unwrap()),
        0 => Err(Signal::from(RuntimeError::type_(
            format!("{what} produced no value"),
            expr.span(),
        ))),
        _ => Err(Signal::from(RuntimeError::type_(
            format!("{what} produced multiple values"),
            expr.span(),
        ))),
    }
}

/// Resolves a path expression (the restricted subset of addressable forms:
/// identity, field, index, slice, iterate, pipe, comma, `select(f)`) into
/// the sequence of [`Path`]s it addresses, relative to `input`. Lives here
/// rather than in `path.rs` because index expressions, slice bounds, and
/// `select`'s predicate are themselves filters that must be evaluated —
/// putting it alongside `eval` avoids a dependency cycle between the two
/// modules.
pub fn resolve_paths(expr: &Expr, input: &Value, env: &Env, tracker: &Tracker) -> Result<Vec<Path>, Signal> {
    match expr {
        Expr::Identity(_) => Ok(vec![Vec::new()]),

        Expr::Field { target, name, .. } => {
            let target_paths = resolve_paths(target, input, env, tracker)?;
            Ok(target_paths
                .into_iter()
                .map(|mut p| {
                    p.push(PathSegment::Key(name.clone()));
                    p
                })
                .collect())
        }

        Expr::Index { target, index, span } => {
            let idx_vals = eval_to_vec(index, input, env, tracker)?;
            let target_paths = resolve_paths(target, input, env, tracker)?;
            let mut out = Vec::new();
            for iv in &idx_vals {
                let seg = match iv {
                    Value::Number(n) => PathSegment::Index(*n as i64),
                    Value::String(s) => PathSegment::Key(s.clone()),
                    other => {
                        return Err(Signal::from(RuntimeError::type_(
                            format!("cannot index path with {}", other.type_name()),
                            *span,
                        )))
                    }
                };
                for tp in &target_paths {
                    let mut p = tp.clone();
                    p.push(seg.clone());
                    out.push(p);
                }
            }
            Ok(out)
        }

        Expr::Slice { target, from, to, .. } => {
            let target_paths = resolve_paths(target, input, env, tracker)?;
            let froms = eval_opt_number_vec(from, input, env, tracker)?;
            let tos = eval_opt_number_vec(to, input, env, tracker)?;
            let mut out = Vec::new();
            for tp in &target_paths {
                for f in &froms {
                    for t in &tos {
                        let mut p = tp.clone();
                        p.push(PathSegment::Slice { start: *f, end: *t });
                        out.push(p);
                    }
                }
            }
            Ok(out)
        }

        Expr::Iterate { target, span } => {
            let target_paths = resolve_paths(target, input, env, tracker)?;
            let mut out = Vec::new();
            for tp in target_paths {
                let sub = path::get_path(input, &tp);
                match sub {
                    Value::Array(items) => {
                        for i in 0..items.len() {
                            let mut p = tp.clone();
                            p.push(PathSegment::Index(i as i64));
                            out.push(p);
                        }
                    }
                    Value::Object(m) => {
                        for k in m.keys() {
                            let mut p = tp.clone();
                            p.push(PathSegment::Key(k.clone()));
                            out.push(p);
                        }
                    }
                    Value::Null => {}
                    other => {
                        return Err(Signal::from(RuntimeError::type_(
                            format!("cannot iterate over {} in a path expression", other.type_name()),
                            *span,
                        )))
                    }
                }
            }
            Ok(out)
        }

        Expr::Pipe { lhs, rhs, .. } => {
            let lhs_paths = resolve_paths(lhs, input, env, tracker)?;
            let mut out = Vec::new();
            for lp in lhs_paths {
                let sub = path::get_path(input, &lp);
                for rp in resolve_paths(rhs, &sub, env, tracker)? {
                    let mut p = lp.clone();
                    p.extend(rp);
                    out.push(p);
                }
            }
            Ok(out)
        }

        Expr::Comma { lhs, rhs, .. } => {
            let mut out = resolve_paths(lhs, input, env, tracker)?;
            out.extend(resolve_paths(rhs, input, env, tracker)?);
            Ok(out)
        }

        Expr::Bind { source, name, body, .. } => {
            let mut out = Vec::new();
            eval(source, input, env, tracker, &mut |v| {
                let child_env = env.define_var(name, v);
                out.extend(resolve_paths(body, input, &child_env, tracker)?);
                Ok(())
            })?;
            Ok(out)
        }

        Expr::Recurse(span) => {
            let mut out = vec![Vec::new()];
            match input {
                Value::Array(items) => {
                    for (i, item) in items.iter().enumerate() {
                        for sp in resolve_paths(&Expr::Recurse(*span), item, env, tracker)? {
                            let mut p = vec![PathSegment::Index(i as i64)];
                            p.extend(sp);
                            out.push(p);
                        }
                    }
                }
                Value::Object(m) => {
                    for (k, v) in m {
                        for sp in resolve_paths(&Expr::Recurse(*span), v, env, tracker)? {
                            let mut p = vec![PathSegment::Key(k.clone())];
                            p.extend(sp);
                            out.push(p);
                        }
                    }
                }
                _ => {}
            }
            Ok(out)
        }

        Expr::Call { name, args, .. } if name == "select" && args.len() == 1 => {
            let mut out = Vec::new();
            eval(&args[0], input, env, tracker, &mut |v| {
                if v.is_truthy() {
                    out.push(Vec::new());
                }
                Ok(())
            })?;
            Ok(out)
        }

        Expr::Call { name, args, .. } if name == "empty" && args.is_empty() => Ok(Vec::new()),

        other => Err(Signal::from(RuntimeError::type_(
            "invalid path expression",
            other.span(),
        ))),
    }
}

fn eval_opt_number_vec(
    opt: &Option<Box<Expr>>,
    input: &Value,
    env: &Env,
    tracker: &Tracker,
) -> Result<Vec<Option<i64>>, Signal> {
    match opt {
        None => Ok(vec![None]),
        Some(e) => {
            let vals = eval_to_vec(e, input, env, tracker)?;
            vals.iter()
                .map(|v| number_of(v, e.span()).map(|n| Some(n as i64)).map_err(Signal::from))
                .collect()
        }
    }
}

fn eval_inner(expr: &Expr, input: &Value, env: &Env, tracker: &Tracker, emit: &mut Emit) -> Result<(), Signal> {
    match expr {
        Expr::Identity(span) => {
            tracker.borrow_mut().emit(*span)?;
            emit(input.clone())
        }

        Expr::Literal(lit, span) => {
            tracker.borrow_mut().emit(*span)?;
            emit(literal_to_value(lit))
        }

        Expr::StringInterp(parts, span) => eval_string_interp(parts, 0, String::new(), input, env, tracker, *span, emit),

        Expr::Var(name, span) => match env.lookup_var(name) {
            Some(v) => {
                tracker.borrow_mut().emit(*span)?;
                emit(v)
            }
            None => Err(Signal::from(RuntimeError::unbound(
                format!("${name} is not defined"),
                *span,
            ))),
        },

        Expr::Field { target, name, span } => eval(target, input, env, tracker, &mut |tv| {
            let result = field_access(&tv, name, *span)?;
            tracker.borrow_mut().emit(*span)?;
            emit(result)
        }),

        Expr::Index { target, index, span } => eval(index, input, env, tracker, &mut |iv| {
            eval(target, input, env, tracker, &mut |tv| {
                let result = index_into(&tv, &iv, *span)?;
                tracker.borrow_mut().emit(*span)?;
                emit(result)
            })
        }),

        Expr::Slice { target, from, to, span } => {
            eval_opt_number(from, input, env, tracker, &mut |fv| {
                eval_opt_number(to, input, env, tracker, &mut |tv| {
                    eval(target, input, env, tracker, &mut |container| {
                        let sliced = slice_value(&container, fv, tv, *span)?;
                        tracker.borrow_mut().emit(*span)?;
                        emit(sliced)
                    })
                })
            })
        }

        Expr::Iterate { target, span } => eval(target, input, env, tracker, &mut |tv| match tv {
            Value::Array(items) => {
                for item in items {
                    tracker.borrow_mut().emit(*span)?;
                    emit(item)?;
                }
                Ok(())
            }
            Value::Object(m) => {
                for (_, v) in m {
                    tracker.borrow_mut().emit(*span)?;
                    emit(v)?;
                }
                Ok(())
            }
            Value::Null => Ok(()),
            other => Err(Signal::from(RuntimeError::type_(
                format!("cannot iterate over {}", other.type_name()),
                *span,
            ))),
        }),

        Expr::Array { item, span } => {
            let mut items = Vec::new();
            if let Some(e) = item {
                eval(e, input, env, tracker, &mut |v| {
                    items.push(v);
                    Ok(())
                })?;
            }
            tracker.borrow_mut().emit(*span)?;
            emit(Value::Array(items))
        }

        Expr::Object { entries, span } => {
            eval_object_entries(entries, 0, std::collections::BTreeMap::new(), input, env, tracker, *span, emit)
        }

        Expr::Pipe { lhs, rhs, .. } => eval(lhs, input, env, tracker, &mut |v| eval(rhs, &v, env, tracker, emit)),

        Expr::Comma { lhs, rhs, .. } => {
            eval(lhs, input, env, tracker, emit)?;
            eval(rhs, input, env, tracker, emit)
        }

        Expr::Alternative { lhs, rhs, span } => eval_alternative(lhs, rhs, input, env, tracker, *span, emit),

        Expr::Neg { operand, span } => eval(operand, input, env, tracker, &mut |v| match v {
            Value::Number(n) => {
                tracker.borrow_mut().emit(*span)?;
                emit(Value::Number(-n))
            }
            other => Err(Signal::from(RuntimeError::type_(
                format!("{} cannot be negated", other.type_name()),
                *span,
            ))),
        }),

        Expr::Not { operand, span } => eval(operand, input, env, tracker, &mut |v| {
            tracker.borrow_mut().emit(*span)?;
            emit(Value::Bool(!v.is_truthy()))
        }),

        Expr::Binary { op, lhs, rhs, span } => eval(lhs, input, env, tracker, &mut |lv| {
            eval(rhs, input, env, tracker, &mut |rv| {
                let result = apply_binop(*op, &lv, &rv, *span)?;
                tracker.borrow_mut().emit(*span)?;
                emit(result)
            })
        }),

        Expr::Bool { op, lhs, rhs, span } => eval(lhs, input, env, tracker, &mut |lv| {
            if *op == BoolOp::Or && lv.is_truthy() {
                tracker.borrow_mut().emit(*span)?;
                return emit(Value::Bool(true));
            }
            if *op == BoolOp::And && !lv.is_truthy() {
                tracker.borrow_mut().emit(*span)?;
                return emit(Value::Bool(false));
            }
            eval(rhs, input, env, tracker, &mut |rv| {
                let result = match op {
                    BoolOp::And => lv.is_truthy() && rv.is_truthy(),
                    BoolOp::Or => lv.is_truthy() || rv.is_truthy(),
                };
                tracker.borrow_mut().emit(*span)?;
                emit(Value::Bool(result))
            })
        }),

        Expr::If { branches, else_, span } => eval_if(branches, else_, input, env, tracker, *span, emit),

        Expr::Bind { source, name, body, .. } => eval(source, input, env, tracker, &mut |v| {
            let child_env = env.define_var(name, v);
            eval(body, input, &child_env, tracker, emit)
        }),

        Expr::Call { name, args, span } => eval_call(name, args, input, env, tracker, *span, emit),

        Expr::FuncDef { name, params, body, rest, .. } => {
            let new_env = env.define_user_fn(name, params.clone(), Rc::new((**body).clone()));
            eval(rest, input, &new_env, tracker, emit)
        }

        Expr::Label { name, body, .. } => match eval(body, input, env, tracker, emit) {
            Err(Signal::Break(label)) if label == *name => Ok(()),
            other => other,
        },

        Expr::Break { name, .. } => Err(Signal::Break(name.clone())),

        Expr::Reduce { source, name, init, update, span } => {
            let mut acc = eval_exactly_one(init, input, env, tracker, "reduce init")?;
            eval(source, input, env, tracker, &mut |sv| {
                tracker.borrow_mut().step(*span)?;
                let child_env = env.define_var(name, sv);
                acc = eval_exactly_one(update, &acc, &child_env, tracker, "reduce update")?;
                Ok(())
            })?;
            tracker.borrow_mut().emit(*span)?;
            emit(acc)
        }

        Expr::Foreach { source, name, init, update, extract, span } => {
            let mut acc = eval_exactly_one(init, input, env, tracker, "foreach init")?;
            eval(source, input, env, tracker, &mut |sv| {
                tracker.borrow_mut().step(*span)?;
                let child_env = env.define_var(name, sv);
                acc = eval_exactly_one(update, &acc, &child_env, tracker, "foreach update")?;
                match extract {
                    None => {
                        tracker.borrow_mut().emit(*span)?;
                        emit(acc.clone())
                    }
                    Some(e) => eval(e, &acc, &child_env, tracker, emit),
                }
            })
        }

        Expr::TryCatch { body, handler, .. } => match eval(body, input, env, tracker, emit) {
            Ok(()) => Ok(()),
            Err(Signal::Fault(e)) if e.is_catchable() => match handler {
                Some(h) => eval(h, &Value::String(e.message.clone()), env, tracker, emit),
                None => Ok(()),
            },
            Err(other) => Err(other),
        },

        Expr::Recurse(span) => {
            tracker.borrow_mut().emit(*span)?;
            emit(input.clone())?;
            match input {
                Value::Array(items) => {
                    for item in items {
                        eval(&Expr::Recurse(*span), item, env, tracker, emit)?;
                    }
                    Ok(())
                }
                Value::Object(m) => {
                    for v in m.values() {
                        eval(&Expr::Recurse(*span), v, env, tracker, emit)?;
                    }
                    Ok(())
                }
                _ => Ok(()),
            }
        }

        Expr::Assign { op, lhs, rhs, span } => {
            assign::eval_assign(ast_op_to_assign_op(*op), lhs, rhs, input, env, tracker, *span, emit)
        }
    }
}

fn ast_op_to_assign_op(op: AstAssignOp) -> assign::AssignOp {
    match op {
        AstAssignOp::Set => assign::AssignOp::Set,
        AstAssignOp::Update => assign::AssignOp::Update,
        AstAssignOp::AddUpdate => assign::AssignOp::Arith(BinOp::Add),
        AstAssignOp::SubUpdate => assign::AssignOp::Arith(BinOp::Sub),
        AstAssignOp::MulUpdate => assign::AssignOp::Arith(BinOp::Mul),
        AstAssignOp::DivUpdate => assign::AssignOp::Arith(BinOp::Div),
        AstAssignOp::ModUpdate => assign::AssignOp::Arith(BinOp::Mod),
        AstAssignOp::AltUpdate => assign::AssignOp::Alt,
    }
}

fn literal_to_value(lit: &Literal) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Number(n) => Value::Number(*n),
        Literal::Str(s) => Value::String(s.clone()),
    }
}

fn eval_string_interp(
    parts: &[StringPart],
    idx: usize,
    acc: String,
    input: &Value,
    env: &Env,
    tracker: &Tracker,
    span: Span,
    emit: &mut Emit,
) -> Result<(), Signal> {
    if idx == parts.len() {
        tracker.borrow_mut().emit(span)?;
        return emit(Value::String(acc));
    }
    match &parts[idx] {
        StringPart::Text(s) => {
            let mut acc2 = acc;
            acc2.push_str(s);
            eval_string_interp(parts, idx + 1, acc2, input, env, tracker, span, emit)
        }
        StringPart::Embed(e) => eval(e, input, env, tracker, &mut |v| {
            let mut acc2 = acc.clone();
            acc2.push_str(&v.to_string());
            eval_string_interp(parts, idx + 1, acc2, input, env, tracker, span, emit)
        }),
    }
}

fn eval_object_entries(
    entries: &[ObjectEntry],
    idx: usize,
    acc: std::collections::BTreeMap<String, Value>,
    input: &Value,
    env: &Env,
    tracker: &Tracker,
    span: Span,
    emit: &mut Emit,
) -> Result<(), Signal> {
    let Some(entry) = entries.get(idx) else {
        tracker.borrow_mut().emit(span)?;
        return emit(Value::Object(acc));
    };
    match &entry.key {
        Key::Name(name) => eval(&entry.value, input, env, tracker, &mut |v| {
            let mut acc2 = acc.clone();
            acc2.insert(name.clone(), v);
            eval_object_entries(entries, idx + 1, acc2, input, env, tracker, span, emit)
        }),
        Key::Computed(key_expr) => eval(key_expr, input, env, tracker, &mut |kv| {
            let Value::String(key) = kv else {
                return Err(Signal::from(RuntimeError::type_(
                    "object keys must be strings",
                    key_expr.span(),
                )));
            };
            eval(&entry.value, input, env, tracker, &mut |v| {
                let mut acc2 = acc.clone();
                acc2.insert(key.clone(), v);
                eval_object_entries(entries, idx + 1, acc2, input, env, tracker, span, emit)
            })
        }),
    }
}

fn eval_if(
    branches: &[(Expr, Expr)],
    else_: &Option<Box<Expr>>,
    input: &Value,
    env: &Env,
    tracker: &Tracker,
    span: Span,
    emit: &mut Emit,
) -> Result<(), Signal> {
    let Some(((cond, then), rest)) = branches.split_first() else {
        return match else_ {
            Some(e) => eval(e, input, env, tracker, emit),
            None => {
                tracker.borrow_mut().emit(span)?;
                emit(input.clone())
            }
        };
    };
    eval(cond, input, env, tracker, &mut |cv| {
        if cv.is_truthy() {
            eval(then, input, env, tracker, emit)
        } else {
            eval_if(rest, else_, input, env, tracker, span, emit)
        }
    })
}

fn eval_alternative(
    lhs: &Expr,
    rhs: &Expr,
    input: &Value,
    env: &Env,
    tracker: &Tracker,
    span: Span,
    emit: &mut Emit,
) -> Result<(), Signal> {
    let mut collected = Vec::new();
    match eval(lhs, input, env, tracker, &mut |v| {
        collected.push(v);
        Ok(())
    }) {
        Ok(()) => {}
        Err(Signal::Fault(e)) if e.is_catchable() => {}
        Err(other) => return Err(other),
    }
    let mut any = false;
    for v in collected {
        if v.is_truthy() {
            any = true;
            tracker.borrow_mut().emit(span)?;
            emit(v)?;
        }
    }
    if !any {
        eval(rhs, input, env, tracker, emit)?;
    }
    Ok(())
}

fn eval_call(name: &str, args: &[Expr], input: &Value, env: &Env, tracker: &Tracker, span: Span, emit: &mut Emit) -> Result<(), Signal> {
    if let Some(closure) = env.lookup_func(name, args.len()) {
        let mut call_env = closure.env.clone();
        for (param, arg_expr) in closure.params.iter().zip(args.iter()) {
            call_env = call_env.define_arg_fn(param, Rc::new(arg_expr.clone()), env.clone());
        }
        return eval(&closure.body, input, &call_env, tracker, emit);
    }
    builtins::dispatch(name, args, input, env, tracker, span, emit)
}

fn eval_opt_number(
    opt: &Option<Box<Expr>>,
    input: &Value,
    env: &Env,
    tracker: &Tracker,
    cb: &mut dyn FnMut(Option<f64>) -> Result<(), Signal>,
) -> Result<(), Signal> {
    match opt {
        None => cb(None),
        Some(e) => eval(e, input, env, tracker, &mut |v| {
            let n = number_of(&v, e.span())?;
            cb(Some(n))
        }),
    }
}

pub fn number_of(v: &Value, span: Span) -> Result<f64, RuntimeError> {
    match v {
        Value::Number(n) => Ok(*n),
        other => Err(RuntimeError::type_(
            format!("expected a number, got {}", other.type_name()),
            span,
        )),
    }
}

pub fn field_access(value: &Value, name: &str, span: Span) -> Result<Value, RuntimeError> {
    match value {
        Value::Object(m) => Ok(m.get(name).cloned().unwrap_or(Value::Null)),
        Value::Null => Ok(Value::Null),
        other => Err(RuntimeError::type_(
            format!("cannot index {} with \"{name}\"", other.type_name()),
            span,
        )),
    }
}

fn index_into(container: &Value, idx: &Value, span: Span) -> Result<Value, RuntimeError> {
    match (container, idx) {
        (Value::Null, _) => Ok(Value::Null),
        (Value::Array(a), Value::Number(n)) => {
            if n.fract() != 0.0 {
                return Err(RuntimeError::type_("array index must be an integer", span));
            }
            Ok(path::normalize_read_index(*n as i64, a.len())
                .map(|i| a[i].clone())
                .unwrap_or(Value::Null))
        }
        (Value::Object(m), Value::String(k)) => Ok(m.get(k).cloned().unwrap_or(Value::Null)),
        (Value::Array(_), other) => Err(RuntimeError::type_(
            format!("cannot index array with {}", other.type_name()),
            span,
        )),
        (Value::Object(_), other) => Err(RuntimeError::type_(
            format!("cannot index object with {}", other.type_name()),
            span,
        )),
        (other, _) => Err(RuntimeError::type_(format!("cannot index {}", other.type_name()), span)),
    }
}

pub fn slice_value(value: &Value, from: Option<f64>, to: Option<f64>, span: Span) -> Result<Value, RuntimeError> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Array(a) => {
            let (s, e) = path::slice_bounds(from.map(|f| f as i64), to.map(|t| t as i64), a.len());
            Ok(Value::Array(a[s..e].to_vec()))
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (st, e) = path::slice_bounds(from.map(|f| f as i64), to.map(|t| t as i64), chars.len());
            Ok(Value::String(chars[st..e].iter().collect()))
        }
        other => Err(RuntimeError::type_(format!("cannot slice {}", other.type_name()), span)),
    }
}

pub fn apply_binop(op: BinOp, l: &Value, r: &Value, span: Span) -> Result<Value, RuntimeError> {
    use Value::*;
    match op {
        BinOp::Add => match (l, r) {
            (Null, v) | (v, Null) => Ok(v.clone()),
            (Number(a), Number(b)) => Ok(Number(a + b)),
            (String(a), String(b)) => Ok(String(format!("{a}{b}"))),
            (Array(a), Array(b)) => Ok(Array(a.iter().chain(b.iter()).cloned().collect())),
            (Object(a), Object(b)) => {
                let mut m = a.clone();
                for (k, v) in b {
                    m.insert(k.clone(), v.clone());
                }
                Ok(Object(m))
            }
            _ => Err(type_mismatch("added", l, r, span)),
        },
        BinOp::Sub => match (l, r) {
            (Number(a), Number(b)) => Ok(Number(a - b)),
            (Array(a), Array(b)) => Ok(Array(a.iter().filter(|v| !b.contains(v)).cloned().collect())),
            _ => Err(type_mismatch("subtracted", l, r, span)),
        },
        BinOp::Mul => match (l, r) {
            (Number(a), Number(b)) => Ok(Number(a * b)),
            (String(s), Number(n)) | (Number(n), String(s)) => {
                if *n <= 0.0 {
                    Ok(Null)
                } else {
                    Ok(String(s.repeat(*n as usize)))
                }
            }
            (Object(a), Object(b)) => Ok(Object(deep_merge(a, b))),
            _ => Err(type_mismatch("multiplied", l, r, span)),
        },
        BinOp::Div => match (l, r) {
            (Number(_), Number(b)) if *b == 0.0 => Err(RuntimeError::arith("division by zero", span)),
            (Number(a), Number(b)) => Ok(Number(a / b)),
            (String(a), String(b)) => {
                if b.is_empty() {
                    Ok(Array(a.chars().map(|c| String(c.to_string())).collect()))
                } else {
                    Ok(Array(a.split(b.as_str()).map(|s| String(s.to_string())).collect()))
                }
            }
            _ => Err(type_mismatch("divided", l, r, span)),
        },
        // `%` truncates both operands to an integer before dividing, matching
        // jq's own behavior: `1 % 0.5` faults with "division by zero" because
        // the divisor truncates to `0`, the same as `1 % 0` would. The zero
        // check below inspects the same truncated `b` the division on the
        // next line uses, so the two never disagree.
        BinOp::Mod => match (l, r) {
            (Number(_), Number(b)) if *b as i64 == 0 => Err(RuntimeError::arith("division by zero", span)),
            (Number(a), Number(b)) => Ok(Number((*a as i64 % *b as i64) as f64)),
            _ => Err(type_mismatch("divided (mod)", l, r, span)),
        },
        BinOp::Eq => Ok(Bool(l == r)),
        BinOp::Ne => Ok(Bool(l != r)),
        BinOp::Lt => Ok(Bool(l.total_cmp(r) == std::cmp::Ordering::Less)),
        BinOp::Le => Ok(Bool(l.total_cmp(r) != std::cmp::Ordering::Greater)),
        BinOp::Gt => Ok(Bool(l.total_cmp(r) == std::cmp::Ordering::Greater)),
        BinOp::Ge => Ok(Bool(l.total_cmp(r) != std::cmp::Ordering::Less)),
    }
}

fn deep_merge(a: &std::collections::BTreeMap<String, Value>, b: &std::collections::BTreeMap<String, Value>) -> std::collections::BTreeMap<String, Value> {
    let mut m = a.clone();
    for (k, v) in b {
        match (m.get(k), v) {
            (Some(Value::Object(av)), Value::Object(bv)) => {
                m.insert(k.clone(), Value::Object(deep_merge(av, bv)));
            }
            _ => {
                m.insert(k.clone(), v.clone());
            }
        }
    }
    m
}

fn type_mismatch(verb: &str, l: &Value, r: &Value, span: Span) -> RuntimeError {
    RuntimeError::type_(
        format!("{} and {} cannot be {verb}", l.type_name(), r.type_name()),
        span,
    )
}
