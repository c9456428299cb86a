//! The lexer: source text to a finite [`Token`] stream.
//!
//! The hard part is string interpolation. A `"..."` literal that contains
//! `\(expr)` lexes to a `StringStart`, then ordinary tokens for `expr`, then
//! (if another `\(` follows the closing `)`) a `StringMiddle` and more
//! tokens, finally a `StringEnd`. Interpolations nest (`"\(f("\(g)")))"`),
//! so the lexer keeps a stack of paren-depth counters — one per currently
//! open interpolation — rather than a single flag. A counter's value is how
//! many `(`/`)` pairs have been opened *inside* that interpolation's
//! expression; when a `)` arrives with its frame's counter at zero, that
//! paren belongs to the string syntax, not to the embedded expression, and
//! the lexer pops the frame and resumes scanning string content.

use filterql_util::Span;

use crate::cursor::Cursor;
use crate::error::LexError;
use crate::token::{Token, TokenKind};

pub struct Lexer<'a> {
    cursor: Cursor<'a>,
    tokens: Vec<Token>,
    interp_stack: Vec<u32>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            cursor: Cursor::new(source),
            tokens: Vec::new(),
            interp_stack: Vec::new(),
        }
    }

    /// Tokenize the whole source, returning the token stream terminated by
    /// `Eof`, or the first lexical fault encountered.
    pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
        let mut lexer = Lexer::new(source);
        lexer.run()?;
        Ok(lexer.tokens)
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        let span = Span::new(start as u32, self.cursor.position() as u32);
        self.tokens.push(Token::new(kind, span));
    }

    fn run(&mut self) -> Result<(), LexError> {
        loop {
            self.skip_trivia();

            if self.cursor.is_at_end() {
                if let Some(&depth) = self.interp_stack.last() {
                    let _ = depth;
                    let pos = self.cursor.position() as u32;
                    return Err(LexError::UnterminatedString {
                        span: Span::new(pos, pos),
                    });
                }
                self.push(TokenKind::Eof, self.cursor.position());
                return Ok(());
            }

            let start = self.cursor.position();
            let c = self.cursor.current();

            match c {
                '"' => self.lex_string(start)?,
                '0'..='9' => self.lex_number(start)?,
                c if is_ident_start(c) => self.lex_ident(start),
                '$' => self.lex_variable(start)?,
                '(' => {
                    if let Some(depth) = self.interp_stack.last_mut() {
                        *depth += 1;
                    }
                    self.cursor.advance();
                    self.push(TokenKind::LParen, start);
                }
                ')' => {
                    let closes_interp = matches!(self.interp_stack.last(), Some(0));
                    if closes_interp {
                        self.interp_stack.pop();
                        self.cursor.advance();
                        self.resume_string(start)?;
                    } else {
                        if let Some(depth) = self.interp_stack.last_mut() {
                            *depth -= 1;
                        }
                        self.cursor.advance();
                        self.push(TokenKind::RParen, start);
                    }
                }
                '[' => {
                    self.cursor.advance();
                    self.push(TokenKind::LBracket, start);
                }
                ']' => {
                    self.cursor.advance();
                    self.push(TokenKind::RBracket, start);
                }
                '{' => {
                    self.cursor.advance();
                    self.push(TokenKind::LBrace, start);
                }
                '}' => {
                    self.cursor.advance();
                    self.push(TokenKind::RBrace, start);
                }
                ',' => {
                    self.cursor.advance();
                    self.push(TokenKind::Comma, start);
                }
                ':' => {
                    self.cursor.advance();
                    self.push(TokenKind::Colon, start);
                }
                ';' => {
                    self.cursor.advance();
                    self.push(TokenKind::Semicolon, start);
                }
                '?' => {
                    self.cursor.advance();
                    self.push(TokenKind::Question, start);
                }
                '.' => {
                    self.cursor.advance();
                    if self.cursor.current() == '.' {
                        self.cursor.advance();
                        self.push(TokenKind::DotDot, start);
                    } else {
                        self.push(TokenKind::Dot, start);
                    }
                }
                '|' => {
                    self.cursor.advance();
                    if self.cursor.current() == '=' {
                        self.cursor.advance();
                        self.push(TokenKind::PipeEq, start);
                    } else {
                        self.push(TokenKind::Pipe, start);
                    }
                }
                '+' => {
                    self.cursor.advance();
                    if self.cursor.current() == '=' {
                        self.cursor.advance();
                        self.push(TokenKind::PlusEq, start);
                    } else {
                        self.push(TokenKind::Plus, start);
                    }
                }
                '-' => {
                    self.cursor.advance();
                    if self.cursor.current() == '=' {
                        self.cursor.advance();
                        self.push(TokenKind::MinusEq, start);
                    } else {
                        self.push(TokenKind::Minus, start);
                    }
                }
                '*' => {
                    self.cursor.advance();
                    if self.cursor.current() == '=' {
                        self.cursor.advance();
                        self.push(TokenKind::StarEq, start);
                    } else {
                        self.push(TokenKind::Star, start);
                    }
                }
                '/' => {
                    self.cursor.advance();
                    if self.cursor.current() == '/' {
                        self.cursor.advance();
                        if self.cursor.current() == '=' {
                            self.cursor.advance();
                            self.push(TokenKind::SlashSlashEq, start);
                        } else {
                            self.push(TokenKind::SlashSlash, start);
                        }
                    } else if self.cursor.current() == '=' {
                        self.cursor.advance();
                        self.push(TokenKind::SlashEq, start);
                    } else {
                        self.push(TokenKind::Slash, start);
                    }
                }
                '%' => {
                    self.cursor.advance();
                    if self.cursor.current() == '=' {
                        self.cursor.advance();
                        self.push(TokenKind::PercentEq, start);
                    } else {
                        self.push(TokenKind::Percent, start);
                    }
                }
                '=' => {
                    self.cursor.advance();
                    if self.cursor.current() == '=' {
                        self.cursor.advance();
                        self.push(TokenKind::EqEq, start);
                    } else {
                        self.push(TokenKind::Eq, start);
                    }
                }
                '!' => {
                    self.cursor.advance();
                    if self.cursor.current() == '=' {
                        self.cursor.advance();
                        self.push(TokenKind::NotEq, start);
                    } else {
                        return Err(LexError::UnknownCharacter {
                            found: '!',
                            span: Span::new(start as u32, self.cursor.position() as u32),
                        });
                    }
                }
                '<' => {
                    self.cursor.advance();
                    if self.cursor.current() == '=' {
                        self.cursor.advance();
                        self.push(TokenKind::Le, start);
                    } else {
                        self.push(TokenKind::Lt, start);
                    }
                }
                '>' => {
                    self.cursor.advance();
                    if self.cursor.current() == '=' {
                        self.cursor.advance();
                        self.push(TokenKind::Ge, start);
                    } else {
                        self.push(TokenKind::Gt, start);
                    }
                }
                other => {
                    self.cursor.advance();
                    return Err(LexError::UnknownCharacter {
                        found: other,
                        span: Span::new(start as u32, self.cursor.position() as u32),
                    });
                }
            }
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            self.cursor.eat_while(|c| c.is_whitespace());
            if self.cursor.current() == '#' {
                self.cursor.eat_while(|c| c != '\n');
                continue;
            }
            break;
        }
    }

    fn lex_number(&mut self, start: usize) -> Result<(), LexError> {
        self.cursor.eat_while(|c| c.is_ascii_digit());
        if self.cursor.current() == '.' && self.cursor.peek_at(1).is_ascii_digit() {
            self.cursor.advance();
            self.cursor.eat_while(|c| c.is_ascii_digit());
        }
        if matches!(self.cursor.current(), 'e' | 'E') {
            let save = self.cursor.position();
            self.cursor.advance();
            if matches!(self.cursor.current(), '+' | '-') {
                self.cursor.advance();
            }
            if !self.cursor.current().is_ascii_digit() {
                let span = Span::new(save as u32, self.cursor.position() as u32);
                return Err(LexError::InvalidNumber { span });
            }
            self.cursor.eat_while(|c| c.is_ascii_digit());
        }
        let text = self.cursor.slice_from(start);
        let span = Span::new(start as u32, self.cursor.position() as u32);
        let value: f64 = text.parse().map_err(|_| LexError::InvalidNumber { span })?;
        self.tokens.push(Token::new(TokenKind::Number(value), span));
        Ok(())
    }

    fn lex_ident(&mut self, start: usize) {
        self.cursor
            .eat_while(|c| c.is_alphanumeric() || c == '_');
        let text = self.cursor.slice_from(start);
        let kind = TokenKind::keyword(text).unwrap_or_else(|| TokenKind::Ident(text.to_owned()));
        self.push(kind, start);
    }

    fn lex_variable(&mut self, start: usize) -> Result<(), LexError> {
        self.cursor.advance(); // '$'
        let name_start = self.cursor.position();
        self.cursor
            .eat_while(|c| c.is_alphanumeric() || c == '_');
        if self.cursor.position() == name_start {
            return Err(LexError::UnknownCharacter {
                found: '$',
                span: Span::new(start as u32, self.cursor.position() as u32),
            });
        }
        let name = self.cursor.slice_from(name_start).to_owned();
        self.push(TokenKind::Variable(name), start);
        Ok(())
    }

    /// Lex a string literal starting at the opening `"`.
    fn lex_string(&mut self, start: usize) -> Result<(), LexError> {
        self.cursor.advance(); // opening quote
        self.scan_string_body(start, true)
    }

    /// Resume lexing string content right after an interpolation's closing
    /// `)`. `start` is the position of that `)`, used as the emitted
    /// token's span start so `StringMiddle`/`StringEnd` spans cover the
    /// continuation, not the whole literal.
    fn resume_string(&mut self, start: usize) -> Result<(), LexError> {
        self.scan_string_body(start, false)
    }

    fn scan_string_body(&mut self, start: usize, is_first_segment: bool) -> Result<(), LexError> {
        let mut content = String::new();
        loop {
            if self.cursor.is_at_end() {
                let pos = self.cursor.position() as u32;
                return Err(LexError::UnterminatedString {
                    span: Span::new(start as u32, pos),
                });
            }
            match self.cursor.current() {
                '"' => {
                    self.cursor.advance();
                    let kind = if is_first_segment {
                        TokenKind::StringLit(content)
                    } else {
                        TokenKind::StringEnd(content)
                    };
                    self.push(kind, start);
                    return Ok(());
                }
                '\n' => {
                    let pos = self.cursor.position() as u32;
                    return Err(LexError::UnterminatedString {
                        span: Span::new(start as u32, pos),
                    });
                }
                '\\' => {
                    let esc_start = self.cursor.position();
                    self.cursor.advance();
                    if self.cursor.current() == '(' {
                        self.cursor.advance();
                        let kind = if is_first_segment {
                            TokenKind::StringStart(content)
                        } else {
                            TokenKind::StringMiddle(content)
                        };
                        self.push(kind, start);
                        self.interp_stack.push(0);
                        return Ok(());
                    }
                    content.push(self.parse_escape(esc_start)?);
                }
                c => {
                    content.push(c);
                    self.cursor.advance();
                }
            }
        }
    }

    /// Parses the escape following a backslash; cursor sits on the
    /// character right after the backslash.
    fn parse_escape(&mut self, esc_start: usize) -> Result<char, LexError> {
        let c = self.cursor.current();
        let decoded = match c {
            'n' => {
                self.cursor.advance();
                '\n'
            }
            't' => {
                self.cursor.advance();
                '\t'
            }
            'r' => {
                self.cursor.advance();
                '\r'
            }
            'b' => {
                self.cursor.advance();
                '\u{0008}'
            }
            'f' => {
                self.cursor.advance();
                '\u{000C}'
            }
            '"' => {
                self.cursor.advance();
                '"'
            }
            '\\' => {
                self.cursor.advance();
                '\\'
            }
            '/' => {
                self.cursor.advance();
                '/'
            }
            'u' => {
                self.cursor.advance();
                let high = self.parse_hex4(esc_start)?;
                if (0xD800..=0xDBFF).contains(&high) {
                    if self.cursor.current() == '\\' && self.cursor.peek_at(1) == 'u' {
                        self.cursor.advance();
                        self.cursor.advance();
                        let low = self.parse_hex4(esc_start)?;
                        if (0xDC00..=0xDFFF).contains(&low) {
                            let c =
                                0x10000 + (high - 0xD800) * 0x400 + (low - 0xDC00);
                            char::from_u32(c).ok_or(LexError::InvalidEscape {
                                span: self.escape_span(esc_start),
                            })?
                        } else {
                            return Err(LexError::InvalidEscape {
                                span: self.escape_span(esc_start),
                            });
                        }
                    } else {
                        return Err(LexError::InvalidEscape {
                            span: self.escape_span(esc_start),
                        });
                    }
                } else {
                    char::from_u32(high).ok_or(LexError::InvalidEscape {
                        span: self.escape_span(esc_start),
                    })?
                }
            }
            _ => {
                return Err(LexError::InvalidEscape {
                    span: self.escape_span(esc_start),
                });
            }
        };
        Ok(decoded)
    }

    fn escape_span(&self, esc_start: usize) -> Span {
        Span::new(esc_start as u32, self.cursor.position() as u32)
    }

    fn parse_hex4(&mut self, esc_start: usize) -> Result<u32, LexError> {
        let mut value: u32 = 0;
        for _ in 0..4 {
            let c = self.cursor.current();
            let digit = c.to_digit(16).ok_or(LexError::InvalidEscape {
                span: self.escape_span(esc_start),
            })?;
            value = value * 16 + digit;
            self.cursor.advance();
        }
        Ok(value)
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexes_field_access() {
        assert_eq!(
            kinds(".foo"),
            vec![TokenKind::Dot, TokenKind::Ident("foo".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn lexes_plain_string() {
        assert_eq!(
            kinds("\"hi\""),
            vec![TokenKind::StringLit("hi".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn lexes_simple_interpolation() {
        assert_eq!(
            kinds("\"a\\(1)b\""),
            vec![
                TokenKind::StringStart("a".into()),
                TokenKind::Number(1.0),
                TokenKind::StringEnd("b".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_nested_parens_inside_interpolation() {
        assert_eq!(
            kinds("\"x\\(f(1,2))y\""),
            vec![
                TokenKind::StringStart("x".into()),
                TokenKind::Ident("f".into()),
                TokenKind::LParen,
                TokenKind::Number(1.0),
                TokenKind::Comma,
                TokenKind::Number(2.0),
                TokenKind::RParen,
                TokenKind::StringEnd("y".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_multiple_interpolations() {
        assert_eq!(
            kinds("\"a\\(1)b\\(2)c\""),
            vec![
                TokenKind::StringStart("a".into()),
                TokenKind::Number(1.0),
                TokenKind::StringMiddle("b".into()),
                TokenKind::Number(2.0),
                TokenKind::StringEnd("c".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn unterminated_string_errors() {
        assert!(Lexer::tokenize("\"abc").is_err());
    }

    #[test]
    fn compound_assignment_operators() {
        assert_eq!(
            kinds("//="),
            vec![TokenKind::SlashSlashEq, TokenKind::Eof]
        );
        assert_eq!(kinds("|="), vec![TokenKind::PipeEq, TokenKind::Eof]);
    }

    #[test]
    fn comment_is_skipped() {
        assert_eq!(kinds("# comment\n.  "), vec![TokenKind::Dot, TokenKind::Eof]);
    }

    #[test]
    fn keywords_vs_identifiers() {
        assert_eq!(kinds("reduce"), vec![TokenKind::Reduce, TokenKind::Eof]);
        assert_eq!(
            kinds("reducer"),
            vec![TokenKind::Ident("reducer".into()), TokenKind::Eof]
        );
    }

    // ------------------------------------------------------------------
    // property-based tests over arbitrary inputs
    // ------------------------------------------------------------------

    #[test]
    fn property_arbitrary_identifier_strings_lex_to_one_token() {
        use proptest::prelude::*;

        proptest!(|(input in "[a-zA-Z_][a-zA-Z0-9_]{0,40}")| {
            let tokens = Lexer::tokenize(&input).unwrap();
            prop_assert_eq!(tokens.len(), 2); // identifier + Eof
            prop_assert!(matches!(tokens[0].kind, TokenKind::Ident(_) | TokenKind::If | TokenKind::Then
                | TokenKind::Elif | TokenKind::Else | TokenKind::End | TokenKind::As | TokenKind::And
                | TokenKind::Or | TokenKind::Not | TokenKind::Reduce | TokenKind::Foreach | TokenKind::Try
                | TokenKind::Catch | TokenKind::Def | TokenKind::Label | TokenKind::Break
                | TokenKind::Null | TokenKind::True | TokenKind::False));
        });
    }

    #[test]
    fn property_arbitrary_integer_strings_lex_to_one_number() {
        use proptest::prelude::*;

        proptest!(|(digits in "[0-9]{1,15}")| {
            let tokens = Lexer::tokenize(&digits).unwrap();
            prop_assert_eq!(tokens.len(), 2); // number + Eof
            prop_assert!(matches!(tokens[0].kind, TokenKind::Number(_)));
        });
    }

    #[test]
    fn property_arbitrary_plain_strings_round_trip_through_one_token() {
        use proptest::prelude::*;

        proptest!(|(body in "[ -!#-\\[\\]-~]{0,40}")| {
            let source = format!("\"{body}\"");
            let tokens = Lexer::tokenize(&source).unwrap();
            prop_assert_eq!(tokens.len(), 2); // string + Eof
            prop_assert_eq!(&tokens[0].kind, &TokenKind::StringLit(body));
        });
    }

    #[test]
    fn property_spans_never_exceed_source_length() {
        use proptest::prelude::*;

        proptest!(|(input in "[a-z0-9 \\.\\|,]{0,60}")| {
            if let Ok(tokens) = Lexer::tokenize(&input) {
                for tok in &tokens {
                    prop_assert!(tok.span.end as usize <= input.len());
                    prop_assert!(tok.span.start <= tok.span.end);
                }
            }
        });
    }
}
