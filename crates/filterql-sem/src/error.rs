//! Validation errors.

use filterql_util::Span;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidateError {
    #[error("unknown function `{name}/{arity}`")]
    UnknownFunction { name: String, arity: usize, span: Span },

    #[error("`{name}` called with {arity} argument(s), expected {expected:?}")]
    ArityMismatch {
        name: String,
        arity: usize,
        expected: Vec<usize>,
        span: Span,
    },

    #[error("`{name}` is disallowed in this sandbox")]
    ForbiddenBuiltin { name: String, span: Span },

    #[error("`${name}` is disallowed in this sandbox")]
    ForbiddenVariable { name: String, span: Span },
}

impl ValidateError {
    pub fn span(&self) -> Span {
        match self {
            ValidateError::UnknownFunction { span, .. } => *span,
            ValidateError::ArityMismatch { span, .. } => *span,
            ValidateError::ForbiddenBuiltin { span, .. } => *span,
            ValidateError::ForbiddenVariable { span, .. } => *span,
        }
    }
}
