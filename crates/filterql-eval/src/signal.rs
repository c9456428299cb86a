//! The error type threaded through the evaluator's callback-driven walk.
//!
//! `Signal` is not just `RuntimeError`: `break $label` unwinds the call
//! stack the same way a fault does, but it is not a fault — it must pass
//! through `try`/`catch` and through resource accounting untouched, and be
//! caught only by the matching `label`. Keeping it a distinct variant
//! instead of folding it into `RuntimeError`'s kinds keeps that asymmetry
//! explicit at every propagation site.

use crate::error::RuntimeError;

#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Fault(RuntimeError),
    Break(String),
}

impl From<RuntimeError> for Signal {
    fn from(e: RuntimeError) -> Self {
        Signal::Fault(e)
    }
}
