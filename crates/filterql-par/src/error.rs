//! Parse errors.

use filterql_lex::LexError;
use filterql_util::Span;
use thiserror::Error;

/// A fault raised while building the AST from a token stream.
///
/// There is no error recovery: the parser aborts at the first fault —
/// well-formed tokens in an order the grammar forbids.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseError {
    #[error("{0}")]
    Lex(#[from] LexError),

    #[error("expected {expected}, found {found}")]
    UnexpectedToken {
        expected: String,
        found: String,
        span: Span,
    },

    #[error("unexpected end of input, expected {expected}")]
    UnexpectedEof { expected: String, span: Span },
}

impl ParseError {
    pub fn span(&self) -> Span {
        match self {
            ParseError::Lex(e) => e.span(),
            ParseError::UnexpectedToken { span, .. } => *span,
            ParseError::UnexpectedEof { span, .. } => *span,
        }
    }
}
