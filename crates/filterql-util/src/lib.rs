//! Shared primitives for the filterql workspace.
//!
//! This crate carries exactly the pieces every phase (lexer, parser,
//! validator, evaluator, driver) needs in common: byte-offset [`Span`]s and
//! a small [`Diagnostic`]/[`Handler`] pair. Everything phase-specific
//! (tokens, AST nodes, values) lives in the crate that owns that phase.

mod diagnostic;
mod span;

pub use diagnostic::{Diagnostic, Handler, Level};
pub use span::Span;

pub use rustc_hash::{FxHashMap, FxHashSet};
