//! Lexical environment: variable bindings and function closures.
//!
//! Modeled as a persistent chain of frames (`Rc<RefCell<FrameData>>`)
//! rather than a plain `Vec<HashMap<_, _>>` scope stack, because a
//! filter's closures — both user `def`s and pass-by-filter call arguments —
//! must outlive the lexical block that created them (a returned closure can
//! still be invoked long after its defining `Bind`/`Call` frame would have
//! been popped off a plain stack). `Bind`/`Reduce`/`Foreach` each push one
//! frame per emitted value and let it drop when that branch of evaluation
//! finishes; `FuncDef` pushes a frame that self-references through its own
//! closure so the body can recurse — the closure captures the stack
//! including that very frame. That self-reference is a deliberate
//! `Rc` cycle — see `define_user_fn` — which leaks one frame per distinct
//! function definition entered during a run; bounded by the program's
//! static `def` count, not by recursion depth, and reclaimed wholesale when
//! the process exits after the `run` call completes.

use std::cell::RefCell;
use std::rc::Rc;

use filterql_par::Expr;
use filterql_util::FxHashMap;

use crate::value::Value;

pub struct Closure {
    pub params: Vec<String>,
    pub body: Rc<Expr>,
    pub env: Env,
}

struct FrameData {
    parent: Option<Env>,
    vars: FxHashMap<String, Value>,
    funcs: FxHashMap<(String, usize), Rc<Closure>>,
}

#[derive(Clone)]
pub struct Env(Rc<RefCell<FrameData>>);

impl Env {
    pub fn root() -> Env {
        Env(Rc::new(RefCell::new(FrameData {
            parent: None,
            vars: FxHashMap::default(),
            funcs: FxHashMap::default(),
        })))
    }

    pub fn define_var(&self, name: &str, value: Value) -> Env {
        Env(Rc::new(RefCell::new(FrameData {
            parent: Some(self.clone()),
            vars: [(name.to_string(), value)].into_iter().collect(),
            funcs: FxHashMap::default(),
        })))
    }

    /// Binds a recursive user function: the closure's environment is the
    /// very frame being constructed, so a call to `name` from inside `body`
    /// resolves back to this same closure.
    pub fn define_user_fn(&self, name: &str, params: Vec<String>, body: Rc<Expr>) -> Env {
        let frame = Rc::new(RefCell::new(FrameData {
            parent: Some(self.clone()),
            vars: FxHashMap::default(),
            funcs: FxHashMap::default(),
        }));
        let env = Env(frame.clone());
        let arity = params.len();
        let closure = Rc::new(Closure {
            params,
            body,
            env: env.clone(),
        });
        frame.borrow_mut().funcs.insert((name.to_string(), arity), closure);
        env
    }

    /// Binds a zero-arity call argument (pass-by-filter): its closure's
    /// environment is the call site's environment, not this frame, so it
    /// cannot see the callee's own locals — only what was visible where the
    /// argument expression was written.
    pub fn define_arg_fn(&self, name: &str, body: Rc<Expr>, call_site_env: Env) -> Env {
        let closure = Rc::new(Closure {
            params: Vec::new(),
            body,
            env: call_site_env,
        });
        Env(Rc::new(RefCell::new(FrameData {
            parent: Some(self.clone()),
            vars: FxHashMap::default(),
            funcs: [((name.to_string(), 0), closure)].into_iter().collect(),
        })))
    }

    pub fn lookup_var(&self, name: &str) -> Option<Value> {
        let frame = self.0.borrow();
        if let Some(v) = frame.vars.get(name) {
            return Some(v.clone());
        }
        frame.parent.as_ref().and_then(|p| p.lookup_var(name))
    }

    pub fn lookup_func(&self, name: &str, arity: usize) -> Option<Rc<Closure>> {
        let frame = self.0.borrow();
        if let Some(c) = frame.funcs.get(&(name.to_string(), arity)) {
            return Some(c.clone());
        }
        frame.parent.as_ref().and_then(|p| p.lookup_func(name, arity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filterql_util::Span;

    fn dummy_body() -> Rc<Expr> {
        Rc::new(Expr::Identity(Span::DUMMY))
    }

    #[test]
    fn var_lookup_walks_chain() {
        let root = Env::root();
        let inner = root.define_var("x", Value::Number(1.0));
        assert_eq!(inner.lookup_var("x"), Some(Value::Number(1.0)));
        assert_eq!(inner.lookup_var("y"), None);
    }

    #[test]
    fn inner_var_shadows_outer() {
        let root = Env::root().define_var("x", Value::Number(1.0));
        let inner = root.define_var("x", Value::Number(2.0));
        assert_eq!(inner.lookup_var("x"), Some(Value::Number(2.0)));
    }

    #[test]
    fn recursive_closure_sees_itself() {
        let root = Env::root();
        let env = root.define_user_fn("fact", vec![], dummy_body());
        let closure = env.lookup_func("fact", 0).unwrap();
        assert!(closure.env.lookup_func("fact", 0).is_some());
    }

    #[test]
    fn arg_closure_uses_call_site_env_not_callee_locals() {
        let call_site = Env::root().define_var("x", Value::Number(9.0));
        let callee_locals = Env::root().define_var("x", Value::Number(1.0));
        let bound = callee_locals.define_arg_fn("g", dummy_body(), call_site);
        let closure = bound.lookup_func("g", 0).unwrap();
        assert_eq!(closure.env.lookup_var("x"), Some(Value::Number(9.0)));
    }
}
