//! Precedence-climbing parser.
//!
//! The grammar is layered loosest to tightest:
//! function-def introduction, `as`-binding/label, pipe, comma, assignment,
//! alternative `//`, `or`, `and`, comparisons, additive, multiplicative,
//! unary, the postfix chain (`.field`, `[...]`, `?`), then primary. Each
//! layer is one method that falls through to the next-tighter one, written
//! as plain recursive descent rather than a table, since this grammar's
//! layers don't share a single token set the way arithmetic operators do.

use filterql_lex::{Lexer, Token, TokenKind};
use filterql_util::Span;

use crate::ast::{AssignOp, BinOp, BoolOp, Expr, Key, Literal, ObjectEntry, StringPart};
use crate::error::ParseError;

pub fn parse(source: &str) -> Result<Expr, ParseError> {
    let tokens = Lexer::tokenize(source).map_err(ParseError::Lex)?;
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_program()?;
    parser.expect_eof()?;
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn peek_span(&self) -> Span {
        self.tokens[self.pos].span
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(kind)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> Result<Token, ParseError> {
        if self.check(&kind) {
            Ok(self.advance())
        } else if matches!(self.peek(), TokenKind::Eof) {
            Err(ParseError::UnexpectedEof {
                expected: expected.to_string(),
                span: self.peek_span(),
            })
        } else {
            Err(ParseError::UnexpectedToken {
                expected: expected.to_string(),
                found: describe(self.peek()),
                span: self.peek_span(),
            })
        }
    }

    fn expect_eof(&mut self) -> Result<(), ParseError> {
        if matches!(self.peek(), TokenKind::Eof) {
            Ok(())
        } else {
            Err(ParseError::UnexpectedToken {
                expected: "end of input".to_string(),
                found: describe(self.peek()),
                span: self.peek_span(),
            })
        }
    }

    fn expect_variable(&mut self) -> Result<(String, Span), ParseError> {
        let span = self.peek_span();
        match self.peek().clone() {
            TokenKind::Variable(name) => {
                self.advance();
                Ok((name, span))
            }
            _ => Err(ParseError::UnexpectedToken {
                expected: "$variable".to_string(),
                found: describe(self.peek()),
                span,
            }),
        }
    }

    fn expect_ident(&mut self, expected: &str) -> Result<(String, Span), ParseError> {
        let span = self.peek_span();
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok((name, span))
            }
            _ => Err(ParseError::UnexpectedToken {
                expected: expected.to_string(),
                found: describe(self.peek()),
                span,
            }),
        }
    }

    // --- layer 1: function-def introduction --------------------------------

    fn parse_program(&mut self) -> Result<Expr, ParseError> {
        self.parse_defs_then(Self::parse_pipe)
    }

    fn parse_defs_then(
        &mut self,
        next: fn(&mut Self) -> Result<Expr, ParseError>,
    ) -> Result<Expr, ParseError> {
        if matches!(self.peek(), TokenKind::Def) {
            let start = self.peek_span();
            self.advance();
            let (name, _) = self.expect_ident("function name")?;
            let mut params = Vec::new();
            if self.eat(&TokenKind::LParen) {
                loop {
                    let (p, _) = self.expect_ident("parameter name")?;
                    params.push(p);
                    if self.eat(&TokenKind::Comma) {
                        continue;
                    }
                    break;
                }
                self.expect(TokenKind::RParen, ")")?;
            }
            self.expect(TokenKind::Colon, ":")?;
            let body = self.parse_defs_then(Self::parse_pipe)?;
            self.expect(TokenKind::Semicolon, ";")?;
            let rest = self.parse_defs_then(next)?;
            let span = start.to(rest.span());
            Ok(Expr::FuncDef {
                name,
                params,
                body: Box::new(body),
                rest: Box::new(rest),
                span,
            })
        } else {
            next(self)
        }
    }

    // --- layer 2/3: as-binding, label, pipe ---------------------------------

    fn parse_pipe(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_comma()?;
        if self.eat(&TokenKind::As) {
            let (name, _) = self.expect_variable()?;
            self.expect(TokenKind::Pipe, "|")?;
            let body = self.parse_pipe()?;
            let span = left.span().to(body.span());
            return Ok(Expr::Bind {
                source: Box::new(left),
                name,
                body: Box::new(body),
                span,
            });
        }
        if self.eat(&TokenKind::Pipe) {
            let right = self.parse_pipe()?;
            let span = left.span().to(right.span());
            return Ok(Expr::Pipe {
                lhs: Box::new(left),
                rhs: Box::new(right),
                span,
            });
        }
        Ok(left)
    }

    // --- layer 4: comma ------------------------------------------------------

    fn parse_comma(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_assign()?;
        while self.eat(&TokenKind::Comma) {
            let right = self.parse_assign()?;
            let span = left.span().to(right.span());
            left = Expr::Comma {
                lhs: Box::new(left),
                rhs: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    // --- layer 5: assignment (right-assoc) -----------------------------------

    fn parse_assign(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_alt()?;
        let op = match self.peek() {
            TokenKind::Eq => AssignOp::Set,
            TokenKind::PipeEq => AssignOp::Update,
            TokenKind::PlusEq => AssignOp::AddUpdate,
            TokenKind::MinusEq => AssignOp::SubUpdate,
            TokenKind::StarEq => AssignOp::MulUpdate,
            TokenKind::SlashEq => AssignOp::DivUpdate,
            TokenKind::PercentEq => AssignOp::ModUpdate,
            TokenKind::SlashSlashEq => AssignOp::AltUpdate,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_assign()?;
        let span = left.span().to(right.span());
        Ok(Expr::Assign {
            op,
            lhs: Box::new(left),
            rhs: Box::new(right),
            span,
        })
    }

    // --- layer 6: alternative `//` -------------------------------------------

    fn parse_alt(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_or()?;
        while self.eat(&TokenKind::SlashSlash) {
            let right = self.parse_or()?;
            let span = left.span().to(right.span());
            left = Expr::Alternative {
                lhs: Box::new(left),
                rhs: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    // --- layer 7/8: or, and ---------------------------------------------------

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while self.eat(&TokenKind::Or) {
            let right = self.parse_and()?;
            let span = left.span().to(right.span());
            left = Expr::Bool {
                op: BoolOp::Or,
                lhs: Box::new(left),
                rhs: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_cmp()?;
        while self.eat(&TokenKind::And) {
            let right = self.parse_cmp()?;
            let span = left.span().to(right.span());
            left = Expr::Bool {
                op: BoolOp::And,
                lhs: Box::new(left),
                rhs: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    // --- layer 9: comparisons --------------------------------------------------

    fn parse_cmp(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_add()?;
        loop {
            let op = match self.peek() {
                TokenKind::EqEq => BinOp::Eq,
                TokenKind::NotEq => BinOp::Ne,
                TokenKind::Lt => BinOp::Lt,
                TokenKind::Le => BinOp::Le,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::Ge => BinOp::Ge,
                _ => break,
            };
            self.advance();
            let right = self.parse_add()?;
            let span = left.span().to(right.span());
            left = Expr::Binary {
                op,
                lhs: Box::new(left),
                rhs: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    // --- layer 10/11: additive, multiplicative ----------------------------------

    fn parse_add(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_mul()?;
            let span = left.span().to(right.span());
            left = Expr::Binary {
                op,
                lhs: Box::new(left),
                rhs: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_mul(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Percent => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            let span = left.span().to(right.span());
            left = Expr::Binary {
                op,
                lhs: Box::new(left),
                rhs: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    // --- layer 12: unary ----------------------------------------------------------

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if matches!(self.peek(), TokenKind::Minus) {
            let start = self.peek_span();
            self.advance();
            let operand = self.parse_postfix()?;
            let span = start.to(operand.span());
            return Ok(Expr::Neg {
                operand: Box::new(operand),
                span,
            });
        }
        if matches!(self.peek(), TokenKind::Not) {
            let start = self.peek_span();
            self.advance();
            if self.starts_unary() {
                let operand = self.parse_unary()?;
                let span = start.to(operand.span());
                return Ok(Expr::Not {
                    operand: Box::new(operand),
                    span,
                });
            }
            // Bare `not`, e.g. as a filter argument: `map(not)`. Equivalent
            // to calling the zero-arity builtin on the implicit input.
            return Ok(Expr::Call {
                name: "not".to_string(),
                args: Vec::new(),
                span: start,
            });
        }
        self.parse_postfix()
    }

    /// Whether the current token can start a unary/postfix/primary
    /// expression — used to disambiguate prefix `not EXPR` from bare `not`.
    fn starts_unary(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Minus
                | TokenKind::Not
                | TokenKind::Number(_)
                | TokenKind::StringLit(_)
                | TokenKind::StringStart(_)
                | TokenKind::Ident(_)
                | TokenKind::Variable(_)
                | TokenKind::LParen
                | TokenKind::LBracket
                | TokenKind::LBrace
                | TokenKind::If
                | TokenKind::Reduce
                | TokenKind::Foreach
                | TokenKind::Try
                | TokenKind::Label
                | TokenKind::Break
                | TokenKind::Dot
                | TokenKind::DotDot
                | TokenKind::Null
                | TokenKind::True
                | TokenKind::False
        )
    }

    // --- layer 13: postfix chain -----------------------------------------------

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                TokenKind::Dot => {
                    self.advance();
                    expr = self.parse_dotted_suffix(expr)?;
                }
                TokenKind::LBracket => {
                    expr = self.parse_bracket(expr)?;
                }
                TokenKind::Question => {
                    let span = expr.span().to(self.peek_span());
                    self.advance();
                    expr = Expr::TryCatch {
                        body: Box::new(expr),
                        handler: None,
                        span,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    /// Parses what follows a `.` already consumed, applied to `target`:
    /// `.name`, `."name"`, or `.[...]`.
    fn parse_dotted_suffix(&mut self, target: Expr) -> Result<Expr, ParseError> {
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                let span = target.span().to(self.peek_span());
                self.advance();
                Ok(Expr::Field {
                    target: Box::new(target),
                    name,
                    span,
                })
            }
            TokenKind::StringLit(name) => {
                let span = target.span().to(self.peek_span());
                self.advance();
                Ok(Expr::Field {
                    target: Box::new(target),
                    name,
                    span,
                })
            }
            TokenKind::LBracket => self.parse_bracket(target),
            _ => Err(ParseError::UnexpectedToken {
                expected: "field name or '['".to_string(),
                found: describe(self.peek()),
                span: self.peek_span(),
            }),
        }
    }

    /// Parses `[...]` applied to `target`: index, slice, or bare iterate.
    fn parse_bracket(&mut self, target: Expr) -> Result<Expr, ParseError> {
        let start = target.span();
        self.expect(TokenKind::LBracket, "[")?;

        if matches!(self.peek(), TokenKind::RBracket) {
            let end = self.peek_span();
            self.advance();
            return Ok(Expr::Iterate {
                target: Box::new(target),
                span: start.to(end),
            });
        }

        if self.eat(&TokenKind::Colon) {
            let to = self.parse_pipe()?;
            let end = self.expect(TokenKind::RBracket, "]")?.span;
            return Ok(Expr::Slice {
                target: Box::new(target),
                from: None,
                to: Some(Box::new(to)),
                span: start.to(end),
            });
        }

        let first = self.parse_pipe()?;
        if self.eat(&TokenKind::Colon) {
            if matches!(self.peek(), TokenKind::RBracket) {
                let end = self.peek_span();
                self.advance();
                return Ok(Expr::Slice {
                    target: Box::new(target),
                    from: Some(Box::new(first)),
                    to: None,
                    span: start.to(end),
                });
            }
            let to = self.parse_pipe()?;
            let end = self.expect(TokenKind::RBracket, "]")?.span;
            return Ok(Expr::Slice {
                target: Box::new(target),
                from: Some(Box::new(first)),
                to: Some(Box::new(to)),
                span: start.to(end),
            });
        }

        let end = self.expect(TokenKind::RBracket, "]")?.span;
        Ok(Expr::Index {
            target: Box::new(target),
            index: Box::new(first),
            span: start.to(end),
        })
    }

    // --- layer 14: primary ----------------------------------------------------

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let span = self.peek_span();
        match self.peek().clone() {
            TokenKind::Dot => {
                self.advance();
                match self.peek().clone() {
                    TokenKind::Ident(name) => {
                        let end = self.peek_span();
                        self.advance();
                        Ok(Expr::Field {
                            target: Box::new(Expr::Identity(span)),
                            name,
                            span: span.to(end),
                        })
                    }
                    TokenKind::StringLit(name) => {
                        let end = self.peek_span();
                        self.advance();
                        Ok(Expr::Field {
                            target: Box::new(Expr::Identity(span)),
                            name,
                            span: span.to(end),
                        })
                    }
                    TokenKind::LBracket => self.parse_bracket(Expr::Identity(span)),
                    _ => Ok(Expr::Identity(span)),
                }
            }
            TokenKind::DotDot => {
                self.advance();
                Ok(Expr::Recurse(span))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::Literal(Literal::Null, span))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(true), span))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(false), span))
            }
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Literal(Literal::Number(n), span))
            }
            TokenKind::StringLit(s) => {
                self.advance();
                Ok(Expr::Literal(Literal::Str(s), span))
            }
            TokenKind::StringStart(_) => self.parse_string_interp(),
            TokenKind::Variable(name) => {
                self.advance();
                Ok(Expr::Var(name, span))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_defs_then(Self::parse_pipe)?;
                self.expect(TokenKind::RParen, ")")?;
                Ok(inner)
            }
            TokenKind::LBracket => self.parse_array(),
            TokenKind::LBrace => self.parse_object(),
            TokenKind::If => self.parse_if(),
            TokenKind::Reduce => self.parse_reduce(),
            TokenKind::Foreach => self.parse_foreach(),
            TokenKind::Try => self.parse_try(),
            TokenKind::Label => self.parse_label(),
            TokenKind::Break => {
                self.advance();
                let (name, end) = self.expect_variable()?;
                Ok(Expr::Break {
                    name,
                    span: span.to(end),
                })
            }
            TokenKind::Ident(name) => self.parse_call(name, span),
            TokenKind::Eof => Err(ParseError::UnexpectedEof {
                expected: "an expression".to_string(),
                span,
            }),
            other => Err(ParseError::UnexpectedToken {
                expected: "an expression".to_string(),
                found: describe(&other),
                span,
            }),
        }
    }

    fn parse_call(&mut self, name: String, span: Span) -> Result<Expr, ParseError> {
        self.advance();
        let mut args = Vec::new();
        let mut end = span;
        if self.eat(&TokenKind::LParen) {
            loop {
                args.push(self.parse_pipe()?);
                if self.eat(&TokenKind::Semicolon) {
                    continue;
                }
                break;
            }
            end = self.expect(TokenKind::RParen, ")")?.span;
        }
        Ok(Expr::Call {
            name,
            args,
            span: span.to(end),
        })
    }

    /// Folds a `StringStart`/embedded-token/`StringMiddle`.../`StringEnd` run
    /// into a single interpolated-string node.
    fn parse_string_interp(&mut self) -> Result<Expr, ParseError> {
        let start = self.peek_span();
        let mut parts = Vec::new();
        let lead = match self.advance().kind {
            TokenKind::StringStart(s) => s,
            _ => unreachable!("caller checked StringStart"),
        };
        if !lead.is_empty() {
            parts.push(StringPart::Text(lead));
        }
        let mut end = start;
        loop {
            let embed = self.parse_pipe()?;
            end = embed.span();
            parts.push(StringPart::Embed(Box::new(embed)));
            match self.peek().clone() {
                TokenKind::StringMiddle(s) => {
                    end = self.peek_span();
                    self.advance();
                    if !s.is_empty() {
                        parts.push(StringPart::Text(s));
                    }
                }
                TokenKind::StringEnd(s) => {
                    end = self.peek_span();
                    self.advance();
                    if !s.is_empty() {
                        parts.push(StringPart::Text(s));
                    }
                    break;
                }
                _ => {
                    return Err(ParseError::UnexpectedToken {
                        expected: "continuation of interpolated string".to_string(),
                        found: describe(self.peek()),
                        span: self.peek_span(),
                    })
                }
            }
        }
        Ok(Expr::StringInterp(parts, start.to(end)))
    }

    fn parse_array(&mut self) -> Result<Expr, ParseError> {
        let start = self.peek_span();
        self.advance();
        if self.eat(&TokenKind::RBracket) {
            return Ok(Expr::Array {
                item: None,
                span: start.to(self.tokens[self.pos - 1].span),
            });
        }
        let item = self.parse_pipe()?;
        let end = self.expect(TokenKind::RBracket, "]")?.span;
        Ok(Expr::Array {
            item: Some(Box::new(item)),
            span: start.to(end),
        })
    }

    fn parse_object(&mut self) -> Result<Expr, ParseError> {
        let start = self.peek_span();
        self.advance();
        let mut entries = Vec::new();
        if !self.eat(&TokenKind::RBrace) {
            loop {
                entries.push(self.parse_object_entry()?);
                if self.eat(&TokenKind::Comma) {
                    continue;
                }
                break;
            }
            self.expect(TokenKind::RBrace, "}")?;
        }
        let end = self.tokens[self.pos - 1].span;
        Ok(Expr::Object {
            entries,
            span: start.to(end),
        })
    }

    fn parse_object_entry(&mut self) -> Result<ObjectEntry, ParseError> {
        let key_span = self.peek_span();
        let key = match self.peek().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Key::Name(name)
            }
            TokenKind::StringLit(s) => {
                self.advance();
                Key::Name(s)
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_pipe()?;
                self.expect(TokenKind::RParen, ")")?;
                Key::Computed(Box::new(expr))
            }
            other => {
                return Err(ParseError::UnexpectedToken {
                    expected: "object key".to_string(),
                    found: describe(&other),
                    span: key_span,
                })
            }
        };

        if self.eat(&TokenKind::Colon) {
            let value = self.parse_alt()?;
            return Ok(ObjectEntry { key, value });
        }

        // Shorthand `{foo}` desugars to `{foo: .foo}`.
        match &key {
            Key::Name(name) => {
                let value = Expr::Field {
                    target: Box::new(Expr::Identity(key_span)),
                    name: name.clone(),
                    span: key_span,
                };
                Ok(ObjectEntry { key, value })
            }
            Key::Computed(_) => Err(ParseError::UnexpectedToken {
                expected: ":".to_string(),
                found: describe(self.peek()),
                span: self.peek_span(),
            }),
        }
    }

    fn parse_if(&mut self) -> Result<Expr, ParseError> {
        let start = self.peek_span();
        self.advance();
        let mut branches = Vec::new();
        let cond = self.parse_pipe()?;
        self.expect(TokenKind::Then, "then")?;
        let then = self.parse_pipe()?;
        branches.push((cond, then));
        loop {
            if self.eat(&TokenKind::Elif) {
                let cond = self.parse_pipe()?;
                self.expect(TokenKind::Then, "then")?;
                let then = self.parse_pipe()?;
                branches.push((cond, then));
                continue;
            }
            break;
        }
        let else_ = if self.eat(&TokenKind::Else) {
            Some(Box::new(self.parse_pipe()?))
        } else {
            None
        };
        let end = self.expect(TokenKind::End, "end")?.span;
        Ok(Expr::If {
            branches,
            else_,
            span: start.to(end),
        })
    }

    fn parse_reduce(&mut self) -> Result<Expr, ParseError> {
        let start = self.peek_span();
        self.advance();
        let source = self.parse_postfix()?;
        self.expect(TokenKind::As, "as")?;
        let (name, _) = self.expect_variable()?;
        self.expect(TokenKind::LParen, "(")?;
        let init = self.parse_pipe()?;
        self.expect(TokenKind::Semicolon, ";")?;
        let update = self.parse_pipe()?;
        let end = self.expect(TokenKind::RParen, ")")?.span;
        Ok(Expr::Reduce {
            source: Box::new(source),
            name,
            init: Box::new(init),
            update: Box::new(update),
            span: start.to(end),
        })
    }

    fn parse_foreach(&mut self) -> Result<Expr, ParseError> {
        let start = self.peek_span();
        self.advance();
        let source = self.parse_postfix()?;
        self.expect(TokenKind::As, "as")?;
        let (name, _) = self.expect_variable()?;
        self.expect(TokenKind::LParen, "(")?;
        let init = self.parse_pipe()?;
        self.expect(TokenKind::Semicolon, ";")?;
        let update = self.parse_pipe()?;
        let extract = if self.eat(&TokenKind::Semicolon) {
            Some(Box::new(self.parse_pipe()?))
        } else {
            None
        };
        let end = self.expect(TokenKind::RParen, ")")?.span;
        Ok(Expr::Foreach {
            source: Box::new(source),
            name,
            init: Box::new(init),
            update: Box::new(update),
            extract,
            span: start.to(end),
        })
    }

    fn parse_try(&mut self) -> Result<Expr, ParseError> {
        let start = self.peek_span();
        self.advance();
        let body = self.parse_postfix()?;
        let mut end = body.span();
        let handler = if self.eat(&TokenKind::Catch) {
            let h = self.parse_postfix()?;
            end = h.span();
            Some(Box::new(h))
        } else {
            None
        };
        Ok(Expr::TryCatch {
            body: Box::new(body),
            handler,
            span: start.to(end),
        })
    }

    fn parse_label(&mut self) -> Result<Expr, ParseError> {
        let start = self.peek_span();
        self.advance();
        let (name, _) = self.expect_variable()?;
        self.expect(TokenKind::Pipe, "|")?;
        let body = self.parse_pipe()?;
        let span = start.to(body.span());
        Ok(Expr::Label {
            name,
            body: Box::new(body),
            span,
        })
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Eof => "end of input".to_string(),
        TokenKind::Ident(s) => format!("identifier `{s}`"),
        TokenKind::Variable(s) => format!("`${s}`"),
        TokenKind::Number(n) => format!("number `{n}`"),
        TokenKind::StringLit(_) => "string literal".to_string(),
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Expr {
        parse(src).unwrap_or_else(|e| panic!("parse({src:?}) failed: {e}"))
    }

    #[test]
    fn identity() {
        assert!(matches!(parse_ok("."), Expr::Identity(_)));
    }

    #[test]
    fn field_chain() {
        match parse_ok(".a.b") {
            Expr::Field { target, name, .. } => {
                assert_eq!(name, "b");
                assert!(matches!(*target, Expr::Field { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn pipe_and_comma_precedence() {
        // `,` binds tighter than `|`: `a, b | c` is `(a, b) | c`.
        match parse_ok(".a, .b | .c") {
            Expr::Pipe { lhs, rhs, .. } => {
                assert!(matches!(*lhs, Expr::Comma { .. }));
                assert!(matches!(*rhs, Expr::Field { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn arithmetic_precedence() {
        // `1 + 2 * 3` groups as `1 + (2 * 3)`.
        match parse_ok("1 + 2 * 3") {
            Expr::Binary {
                op: BinOp::Add,
                rhs,
                ..
            } => {
                assert!(matches!(*rhs, Expr::Binary { op: BinOp::Mul, .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn index_and_slice() {
        assert!(matches!(parse_ok(".[0]"), Expr::Index { .. }));
        assert!(matches!(parse_ok(".[1:3]"), Expr::Slice { .. }));
        assert!(matches!(parse_ok(".[]"), Expr::Iterate { .. }));
    }

    #[test]
    fn object_shorthand() {
        match parse_ok("{foo, bar: 1}") {
            Expr::Object { entries, .. } => {
                assert_eq!(entries.len(), 2);
                assert!(matches!(entries[0].value, Expr::Field { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn if_then_elif_else_end() {
        match parse_ok("if .a then 1 elif .b then 2 else 3 end") {
            Expr::If { branches, else_, .. } => {
                assert_eq!(branches.len(), 2);
                assert!(else_.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reduce_and_foreach() {
        assert!(matches!(
            parse_ok("reduce .[] as $x (0; . + $x)"),
            Expr::Reduce { .. }
        ));
        assert!(matches!(
            parse_ok("foreach .[] as $x (0; . + $x; . * 2)"),
            Expr::Foreach { .. }
        ));
    }

    #[test]
    fn try_catch_and_question() {
        assert!(matches!(parse_ok("try .a catch .b"), Expr::TryCatch { .. }));
        match parse_ok(".a?") {
            Expr::TryCatch { handler, .. } => assert!(handler.is_none()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bind_and_label() {
        assert!(matches!(parse_ok(".a as $x | $x"), Expr::Bind { .. }));
        assert!(matches!(
            parse_ok("label $out | ., break $out"),
            Expr::Label { .. }
        ));
    }

    #[test]
    fn func_def_and_call() {
        match parse_ok("def inc(x): x + 1; inc(.)") {
            Expr::FuncDef { name, params, rest, .. } => {
                assert_eq!(name, "inc");
                assert_eq!(params, vec!["x".to_string()]);
                assert!(matches!(*rest, Expr::Call { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn nested_def_inside_parens() {
        match parse_ok("(def helper: 1; helper) + 1") {
            Expr::Binary { lhs, .. } => assert!(matches!(*lhs, Expr::FuncDef { .. })),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn assignment_operators() {
        match parse_ok(".a |= . + 1") {
            Expr::Assign { op: AssignOp::Update, .. } => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn string_interpolation() {
        match parse_ok(r#""x \(.a) y""#) {
            Expr::StringInterp(parts, _) => {
                assert_eq!(parts.len(), 3);
                assert!(matches!(parts[0], StringPart::Text(_)));
                assert!(matches!(parts[1], StringPart::Embed(_)));
                assert!(matches!(parts[2], StringPart::Text(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn not_prefix_vs_bare_call() {
        assert!(matches!(parse_ok("not ."), Expr::Not { .. }));
        match parse_ok("map(not)") {
            Expr::Call { args, .. } => match &args[0] {
                Expr::Call { name, args, .. } => {
                    assert_eq!(name, "not");
                    assert!(args.is_empty());
                }
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unexpected_token_reports_span() {
        let err = parse("1 +").unwrap_err();
        match err {
            ParseError::UnexpectedEof { .. } => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    // ------------------------------------------------------------------
    // property-based tests: the parser never panics, and accepted spans
    // always fall within the source it was given.
    // ------------------------------------------------------------------

    proptest::proptest! {
        #[test]
        fn property_field_chains_never_panic(names in proptest::collection::vec("[a-z][a-z0-9]{0,5}", 1..8)) {
            let src = names.iter().map(|n| format!(".{n}")).collect::<Vec<_>>().join("");
            let result = parse(&src);
            proptest::prop_assert!(result.is_ok());
        }

        #[test]
        fn property_arithmetic_chains_parse_without_panicking(
            nums in proptest::collection::vec(0u32..1000, 1..10),
            ops in proptest::collection::vec(proptest::prelude::any::<bool>(), 0..10),
        ) {
            let mut src = nums[0].to_string();
            for (n, plus) in nums.iter().skip(1).zip(ops.iter()) {
                src.push_str(if *plus { " + " } else { " * " });
                src.push_str(&n.to_string());
            }
            let result = parse(&src);
            proptest::prop_assert!(result.is_ok());
        }

        #[test]
        fn property_random_token_soup_never_panics(src in "[a-zA-Z0-9_.|,()\\[\\]{}:;+\\-*/%<>=!? \"]{0,40}") {
            // Garbage input may legitimately fail to parse, but must never panic.
            let _ = parse(&src);
        }
    }
}
