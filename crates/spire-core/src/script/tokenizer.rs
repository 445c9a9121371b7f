//! DApp script tokenizer — converts program text into a token stream
//!
//! Handles: keywords, identifiers, string literals (single or double quoted),
//! integer/float literals, operators and punctuation.
//! Line (`//`) and block (`/* */`) comments are discarded.
//!
//! Guarantees:
//! - Deterministic: same input always produces same token stream
//! - Every error carries a line:column position

use crate::{Error, Result};

/// Token types for DApp script syntax
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Keywords
    Let,
    If,
    Else,
    While,
    For,
    Of,
    Return,
    Throw,
    Break,
    Continue,

    // Literals
    StringLiteral(String),
    IntegerLiteral(i64),
    FloatLiteral(f64),
    BooleanLiteral(bool),
    Null,

    // Punctuation
    LBrace,    // {
    RBrace,    // }
    LBracket,  // [
    RBracket,  // ]
    LParen,    // (
    RParen,    // )
    Colon,     // :
    Comma,     // ,
    Semicolon, // ;
    Dot,       // .
    Question,  // ?

    // Operators
    Assign,      // =
    PlusAssign,  // +=
    MinusAssign, // -=
    Plus,        // +
    Minus,       // -
    Star,        // *
    Slash,       // /
    Percent,     // %
    Bang,        // !
    EqEq,        // == or ===
    NotEq,       // != or !==
    Lt,          // <
    Le,          // <=
    Gt,          // >
    Ge,          // >=
    AndAnd,      // &&
    OrOr,        // ||

    // Other
    Identifier(String),
    Eof,
}

/// Position in source text for error reporting
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Token with source position
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// Tokenizer for DApp program text
pub struct Tokenizer {
    input: Vec<char>,
    position: usize,
    line: usize,
    column: usize,
}

impl Tokenizer {
    /// Create a new tokenizer for the given program text
    pub fn new(text: &str) -> Self {
        Tokenizer {
            input: text.chars().collect(),
            position: 0,
            line: 1,
            column: 1,
        }
    }

    /// Tokenize the entire input into a stream of spanned tokens
    pub fn tokenize(&mut self) -> Result<Vec<SpannedToken>> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace_and_comments()?;

            if self.is_at_end() {
                tokens.push(SpannedToken {
                    token: Token::Eof,
                    span: self.current_span(),
                });
                break;
            }

            let token = self.next_token()?;
            tokens.push(token);
        }

        Ok(tokens)
    }

    // ── Character helpers ──────────────────────────────────

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek_ahead(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.input.get(self.position).copied();
        if let Some(c) = ch {
            self.position += 1;
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        ch
    }

    /// Consume `expected` if it is the next character
    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn current_span(&self) -> Span {
        Span {
            line: self.line,
            column: self.column,
            offset: self.position,
        }
    }

    // ── Whitespace & Comments ──────────────────────────────

    fn skip_whitespace_and_comments(&mut self) -> Result<()> {
        loop {
            while let Some(ch) = self.peek() {
                if ch.is_whitespace() {
                    self.advance();
                } else {
                    break;
                }
            }

            if self.peek() == Some('/') && self.peek_ahead(1) == Some('/') {
                while let Some(ch) = self.peek() {
                    if ch == '\n' {
                        break;
                    }
                    self.advance();
                }
                continue;
            }

            if self.peek() == Some('/') && self.peek_ahead(1) == Some('*') {
                let span = self.current_span();
                self.advance();
                self.advance();
                loop {
                    match self.advance() {
                        None => {
                            return Err(Error::Syntax(format!(
                                "Unterminated block comment starting at {}",
                                span
                            )));
                        }
                        Some('*') if self.peek() == Some('/') => {
                            self.advance();
                            break;
                        }
                        Some(_) => {}
                    }
                }
                continue;
            }

            return Ok(());
        }
    }

    // ── Main dispatch ──────────────────────────────────────

    fn next_token(&mut self) -> Result<SpannedToken> {
        let span = self.current_span();
        let ch = match self.advance() {
            Some(c) => c,
            None => {
                return Ok(SpannedToken {
                    token: Token::Eof,
                    span,
                })
            }
        };

        let token = match ch {
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            '(' => Token::LParen,
            ')' => Token::RParen,
            ':' => Token::Colon,
            ',' => Token::Comma,
            ';' => Token::Semicolon,
            '.' => Token::Dot,
            '?' => Token::Question,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '+' if self.eat('=') => Token::PlusAssign,
            '+' => Token::Plus,
            '-' if self.eat('=') => Token::MinusAssign,
            '-' => Token::Minus,
            '=' if self.eat('=') => {
                self.eat('=');
                Token::EqEq
            }
            '=' => Token::Assign,
            '!' if self.eat('=') => {
                self.eat('=');
                Token::NotEq
            }
            '!' => Token::Bang,
            '<' if self.eat('=') => Token::Le,
            '<' => Token::Lt,
            '>' if self.eat('=') => Token::Ge,
            '>' => Token::Gt,
            '&' if self.eat('&') => Token::AndAnd,
            '|' if self.eat('|') => Token::OrOr,
            '"' | '\'' => return self.read_string(ch, span),
            c if c.is_ascii_digit() => return self.read_number(span),
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                return Ok(self.read_identifier_or_keyword(span))
            }
            _ => {
                return Err(Error::Syntax(format!(
                    "Unexpected character '{}' at {}",
                    ch, span
                )))
            }
        };

        Ok(SpannedToken { token, span })
    }

    // ── String literals ────────────────────────────────────

    /// Read a string literal; the opening quote is already consumed
    fn read_string(&mut self, quote: char, span: Span) -> Result<SpannedToken> {
        let mut value = String::new();

        loop {
            match self.advance() {
                None | Some('\n') => {
                    return Err(Error::Syntax(format!(
                        "Unterminated string starting at {}",
                        span
                    )));
                }
                Some(c) if c == quote => break,
                Some('\\') => match self.advance() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some('\\') => value.push('\\'),
                    Some('"') => value.push('"'),
                    Some('\'') => value.push('\''),
                    Some(c) => {
                        return Err(Error::Syntax(format!(
                            "Invalid escape sequence '\\{}' at {}",
                            c,
                            self.current_span()
                        )));
                    }
                    None => {
                        return Err(Error::Syntax(format!(
                            "Unterminated escape sequence at {}",
                            self.current_span()
                        )));
                    }
                },
                Some(c) => value.push(c),
            }
        }

        Ok(SpannedToken {
            token: Token::StringLiteral(value),
            span,
        })
    }

    // ── Numbers ────────────────────────────────────────────

    /// Read a number literal; its first digit is already consumed
    fn read_number(&mut self, span: Span) -> Result<SpannedToken> {
        let start = self.position - 1;
        let mut is_float = false;

        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.advance();
        }

        // Fraction only when a digit follows the dot, so `1.x` stays a member access
        if self.peek() == Some('.') && matches!(self.peek_ahead(1), Some(c) if c.is_ascii_digit())
        {
            is_float = true;
            self.advance();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
        }

        if matches!(self.peek(), Some('e') | Some('E')) {
            let signed = matches!(self.peek_ahead(1), Some('+') | Some('-'));
            let digit_at = if signed { 2 } else { 1 };
            if matches!(self.peek_ahead(digit_at), Some(c) if c.is_ascii_digit()) {
                is_float = true;
                for _ in 0..digit_at {
                    self.advance();
                }
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    self.advance();
                }
            }
        }

        let text: String = self.input[start..self.position].iter().collect();

        let token = if is_float {
            let val: f64 = text
                .parse()
                .map_err(|_| Error::Syntax(format!("Invalid float '{}' at {}", text, span)))?;
            if !val.is_finite() {
                return Err(Error::Syntax(format!(
                    "Number '{}' out of range at {}",
                    text, span
                )));
            }
            Token::FloatLiteral(val)
        } else {
            let val: i64 = text
                .parse()
                .map_err(|_| Error::Syntax(format!("Invalid integer '{}' at {}", text, span)))?;
            Token::IntegerLiteral(val)
        };

        Ok(SpannedToken { token, span })
    }

    // ── Identifiers & Keywords ─────────────────────────────

    /// Read an identifier or keyword; its first character is already consumed
    fn read_identifier_or_keyword(&mut self, span: Span) -> SpannedToken {
        let start = self.position - 1;

        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == '$' {
                self.advance();
            } else {
                break;
            }
        }

        let text: String = self.input[start..self.position].iter().collect();

        let token = match text.as_str() {
            "let" | "const" | "var" => Token::Let,
            "if" => Token::If,
            "else" => Token::Else,
            "while" => Token::While,
            "for" => Token::For,
            "of" => Token::Of,
            "return" => Token::Return,
            "throw" => Token::Throw,
            "break" => Token::Break,
            "continue" => Token::Continue,
            "true" => Token::BooleanLiteral(true),
            "false" => Token::BooleanLiteral(false),
            "null" | "undefined" => Token::Null,
            _ => Token::Identifier(text),
        };

        SpannedToken { token, span }
    }
}
