//! Runtime faults.

use filterql_util::Span;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Index,
    Type,
    Arity,
    Arith,
    Unbound,
    User,
    Resource,
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("{kind:?}: {message}")]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
    pub span: Span,
}

impl RuntimeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            message: message.into(),
            span,
        }
    }

    pub fn index(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Index, message, span)
    }

    pub fn type_(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Type, message, span)
    }

    pub fn arity(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Arity, message, span)
    }

    pub fn arith(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Arith, message, span)
    }

    pub fn unbound(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Unbound, message, span)
    }

    pub fn user(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::User, message, span)
    }

    pub fn resource(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Resource, message, span)
    }

    /// Resource-exhaustion faults are fatal: `try`/`catch` never intercepts
    /// them.
    pub fn is_catchable(&self) -> bool {
        self.kind != ErrorKind::Resource
    }
}
