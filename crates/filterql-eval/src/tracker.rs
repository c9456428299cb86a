//! Resource accounting: the bound that keeps a sandboxed filter from running
//! forever or building unbounded output.

use filterql_util::Span;

use crate::error::RuntimeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Limits {
    pub max_steps: u64,
    pub max_depth: u32,
    pub max_outputs: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_steps: 100_000,
            max_depth: 200,
            max_outputs: 10_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResourceTracker {
    limits: Limits,
    steps: u64,
    depth: u32,
    outputs: u64,
}

impl ResourceTracker {
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            steps: 0,
            depth: 0,
            outputs: 0,
        }
    }

    /// Call on entering every AST node. Increments and bounds both `steps`
    /// and `depth`; pair with [`Self::exit_node`] on the way back out.
    pub fn enter_node(&mut self, span: Span) -> Result<(), RuntimeError> {
        self.step(span)?;
        self.depth += 1;
        if self.depth > self.limits.max_depth {
            return Err(RuntimeError::resource("recursion depth exceeded", span));
        }
        Ok(())
    }

    pub fn exit_node(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Call once per loop iteration inside loop-like builtins (`map`,
    /// `reduce`, `range`, ...) in addition to the per-node accounting their
    /// evaluated sub-filters already perform, so tight internal loops can't
    /// undercount work. Does not touch `depth`.
    pub fn step(&mut self, span: Span) -> Result<(), RuntimeError> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            return Err(RuntimeError::resource("step limit exceeded", span));
        }
        Ok(())
    }

    /// Call once per value a filter emits.
    pub fn emit(&mut self, span: Span) -> Result<(), RuntimeError> {
        self.outputs += 1;
        if self.outputs > self.limits.max_outputs {
            return Err(RuntimeError::resource("output limit exceeded", span));
        }
        Ok(())
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn outputs(&self) -> u64 {
        self.outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filterql_util::Span;

    #[test]
    fn trips_step_cap() {
        let mut t = ResourceTracker::new(Limits {
            max_steps: 2,
            ..Default::default()
        });
        assert!(t.step(Span::DUMMY).is_ok());
        assert!(t.step(Span::DUMMY).is_ok());
        assert!(t.step(Span::DUMMY).is_err());
    }

    #[test]
    fn depth_rebalances_on_exit() {
        let mut t = ResourceTracker::new(Limits::default());
        t.enter_node(Span::DUMMY).unwrap();
        t.enter_node(Span::DUMMY).unwrap();
        t.exit_node();
        assert_eq!(t.depth(), 1);
    }
}
