//! AST-walking validator.
//!
//! A stack of name sets, pushed on entry to a binding construct and popped
//! on exit, specialized to this language's one binding construct that
//! matters for call resolution: function definitions. Value variables
//! (`$x`) are intentionally left unchecked here — an unbound variable is a
//! runtime fault, not a static one.

use filterql_par::{Expr, Key, ObjectEntry, StringPart};
use filterql_util::FxHashSet;

use crate::builtins::{arities_for, is_builtin, is_forbidden};
use crate::error::ValidateError;

pub fn validate(expr: &Expr) -> Result<(), ValidateError> {
    let mut scopes: Vec<FxHashSet<String>> = Vec::new();
    walk(expr, &mut scopes)
}

fn walk(expr: &Expr, scopes: &mut Vec<FxHashSet<String>>) -> Result<(), ValidateError> {
    match expr {
        Expr::Identity(_) | Expr::Literal(_, _) | Expr::Recurse(_) | Expr::Break { .. } => Ok(()),

        Expr::Var(name, span) => {
            if name == "ENV" {
                return Err(ValidateError::ForbiddenVariable {
                    name: name.clone(),
                    span: *span,
                });
            }
            Ok(())
        }

        Expr::StringInterp(parts, _) => {
            for part in parts {
                if let StringPart::Embed(e) = part {
                    walk(e, scopes)?;
                }
            }
            Ok(())
        }

        Expr::Field { target, .. } | Expr::Iterate { target, .. } => walk(target, scopes),

        Expr::Index { target, index, .. } => {
            walk(target, scopes)?;
            walk(index, scopes)
        }

        Expr::Slice { target, from, to, .. } => {
            walk(target, scopes)?;
            if let Some(f) = from {
                walk(f, scopes)?;
            }
            if let Some(t) = to {
                walk(t, scopes)?;
            }
            Ok(())
        }

        Expr::Array { item, .. } => match item {
            Some(e) => walk(e, scopes),
            None => Ok(()),
        },

        Expr::Object { entries, .. } => {
            for ObjectEntry { key, value } in entries {
                if let Key::Computed(k) = key {
                    walk(k, scopes)?;
                }
                walk(value, scopes)?;
            }
            Ok(())
        }

        Expr::Pipe { lhs, rhs, .. }
        | Expr::Comma { lhs, rhs, .. }
        | Expr::Alternative { lhs, rhs, .. }
        | Expr::Binary { lhs, rhs, .. }
        | Expr::Bool { lhs, rhs, .. } => {
            walk(lhs, scopes)?;
            walk(rhs, scopes)
        }

        Expr::Neg { operand, .. } | Expr::Not { operand, .. } => walk(operand, scopes),

        Expr::If { branches, else_, .. } => {
            for (cond, then) in branches {
                walk(cond, scopes)?;
                walk(then, scopes)?;
            }
            if let Some(e) = else_ {
                walk(e, scopes)?;
            }
            Ok(())
        }

        Expr::Bind { source, body, .. } => {
            walk(source, scopes)?;
            walk(body, scopes)
        }

        Expr::Call { name, args, span } => {
            for arg in args {
                walk(arg, scopes)?;
            }
            resolve_call(name, args.len(), *span, scopes)
        }

        Expr::FuncDef {
            name,
            params,
            body,
            rest,
            ..
        } => {
            scopes.push(FxHashSet::from_iter([name.clone()]));
            scopes.push(params.iter().cloned().collect());
            let body_result = walk(body, scopes);
            scopes.pop();
            body_result?;
            let rest_result = walk(rest, scopes);
            scopes.pop();
            rest_result
        }

        Expr::Label { body, .. } => walk(body, scopes),

        Expr::Reduce {
            source,
            init,
            update,
            ..
        } => {
            walk(source, scopes)?;
            walk(init, scopes)?;
            walk(update, scopes)
        }

        Expr::Foreach {
            source,
            init,
            update,
            extract,
            ..
        } => {
            walk(source, scopes)?;
            walk(init, scopes)?;
            walk(update, scopes)?;
            if let Some(e) = extract {
                walk(e, scopes)?;
            }
            Ok(())
        }

        Expr::TryCatch { body, handler, .. } => {
            walk(body, scopes)?;
            if let Some(h) = handler {
                walk(h, scopes)?;
            }
            Ok(())
        }

        Expr::Assign { lhs, rhs, .. } => {
            walk(lhs, scopes)?;
            walk(rhs, scopes)
        }
    }
}

fn resolve_call(
    name: &str,
    arity: usize,
    span: filterql_util::Span,
    scopes: &[FxHashSet<String>],
) -> Result<(), ValidateError> {
    if scopes.iter().any(|frame| frame.contains(name)) {
        return Ok(());
    }
    if is_forbidden(name) {
        return Err(ValidateError::ForbiddenBuiltin {
            name: name.to_string(),
            span,
        });
    }
    if is_builtin(name, arity) {
        return Ok(());
    }
    let expected = arities_for(name);
    if expected.is_empty() {
        Err(ValidateError::UnknownFunction {
            name: name.to_string(),
            arity,
            span,
        })
    } else {
        Err(ValidateError::ArityMismatch {
            name: name.to_string(),
            arity,
            expected,
            span,
        })
    }
}
