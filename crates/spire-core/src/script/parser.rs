//! Recursive descent parser for DApp scripts
//!
//! Grammar (precedence from loosest to tightest):
//!
//! ```text
//! program     := stmt*
//! stmt        := let | if | while | for-of | return | throw | break
//!              | continue | block | expr
//! expr        := assignment
//! assignment  := conditional (("=" | "+=" | "-=") assignment)?
//! conditional := or ("?" expr ":" expr)?
//! or          := and ("||" and)*
//! and         := equality ("&&" equality)*
//! equality    := comparison (("==" | "!=") comparison)*
//! comparison  := additive (("<" | "<=" | ">" | ">=") additive)*
//! additive    := mult (("+" | "-") mult)*
//! mult        := unary (("*" | "/" | "%") unary)*
//! unary       := ("!" | "-") unary | postfix
//! postfix     := primary ("." name | "[" expr "]" | "(" args ")")*
//! ```
//!
//! Statement terminators follow the usual rule: `;` may be omitted before
//! `}`, at end of input, or when the next token starts a new line.

use super::ast::*;
use super::tokenizer::{Span, SpannedToken, Token, Tokenizer};
use crate::value::Value;
use crate::{Error, Result};

/// Maximum nesting of statements and expressions.
///
/// Every operator or postfix link in a chain counts as one level, so the
/// depth of the resulting syntax tree stays within this bound.
pub const MAX_NESTING_DEPTH: usize = 128;

/// Largest accepted program text
pub const MAX_PROGRAM_BYTES: usize = 64 * 1024;

/// Parse program text into a [`Program`]
pub fn parse(text: &str) -> Result<Program> {
    if text.len() > MAX_PROGRAM_BYTES {
        return Err(Error::Syntax(format!(
            "Program of {} bytes exceeds limit of {} bytes",
            text.len(),
            MAX_PROGRAM_BYTES
        )));
    }
    let tokens = Tokenizer::new(text).tokenize()?;
    Parser::new(tokens).parse_program()
}

struct Parser {
    tokens: Vec<SpannedToken>,
    position: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<SpannedToken>) -> Self {
        Parser {
            tokens,
            position: 0,
            depth: 0,
        }
    }

    fn parse_program(mut self) -> Result<Program> {
        let mut body = Vec::new();
        while !self.check(&Token::Eof) {
            body.push(self.parse_statement()?);
        }
        Ok(Program { body })
    }

    // ── Token helpers ──────────────────────────────────────

    fn peek(&self) -> &Token {
        // tokenize() always ends the stream with Eof
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.position.min(last)].token
    }

    fn span(&self) -> Span {
        let last = self.tokens.len().saturating_sub(1);
        self.tokens[self.position.min(last)].span.clone()
    }

    fn previous_line(&self) -> usize {
        if self.position == 0 {
            return 0;
        }
        self.tokens[self.position - 1].span.line
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == token
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.position < self.tokens.len() {
            self.position += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(&format!("Expected {}", what)))
        }
    }

    fn error(&self, message: &str) -> Error {
        Error::Syntax(format!(
            "{} at {}, found {}",
            message,
            self.span(),
            describe(self.peek())
        ))
    }

    fn expect_identifier(&mut self) -> Result<String> {
        match self.peek().clone() {
            Token::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.error("Expected identifier")),
        }
    }

    fn end_statement(&mut self) -> Result<()> {
        if self.eat(&Token::Semicolon)
            || self.check(&Token::RBrace)
            || self.check(&Token::Eof)
            || self.span().line > self.previous_line()
        {
            Ok(())
        } else {
            Err(self.error("Expected ';'"))
        }
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(Error::Syntax(format!(
                "Nesting deeper than {} levels at {}",
                MAX_NESTING_DEPTH,
                self.span()
            )));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Release the levels taken by the links of one operator chain
    fn leave_links(&mut self, links: usize) {
        self.depth -= links;
    }

    // ── Statements ─────────────────────────────────────────

    fn parse_statement(&mut self) -> Result<Stmt> {
        self.enter()?;
        let stmt = self.parse_statement_inner()?;
        self.leave();
        Ok(stmt)
    }

    fn parse_statement_inner(&mut self) -> Result<Stmt> {
        match self.peek() {
            Token::LBrace => Ok(Stmt::Block(self.parse_block()?)),
            Token::Let => {
                self.advance();
                let name = self.expect_identifier()?;
                let init = if self.eat(&Token::Assign) {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                self.end_statement()?;
                Ok(Stmt::Let { name, init })
            }
            Token::If => self.parse_if(),
            Token::While => {
                self.advance();
                self.expect(&Token::LParen, "'(' after 'while'")?;
                let cond = self.parse_expression()?;
                self.expect(&Token::RParen, "')' after loop condition")?;
                let body = self.parse_body()?;
                Ok(Stmt::While { cond, body })
            }
            Token::For => {
                self.advance();
                self.expect(&Token::LParen, "'(' after 'for'")?;
                self.expect(&Token::Let, "'let' in for-of loop")?;
                let name = self.expect_identifier()?;
                self.expect(&Token::Of, "'of' in for-of loop")?;
                let iterable = self.parse_expression()?;
                self.expect(&Token::RParen, "')' after for-of header")?;
                let body = self.parse_body()?;
                Ok(Stmt::ForOf {
                    name,
                    iterable,
                    body,
                })
            }
            Token::Return => {
                self.advance();
                let value = if self.check(&Token::Semicolon)
                    || self.check(&Token::RBrace)
                    || self.check(&Token::Eof)
                    || self.span().line > self.previous_line()
                {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.end_statement()?;
                Ok(Stmt::Return(value))
            }
            Token::Throw => {
                self.advance();
                let value = self.parse_expression()?;
                self.end_statement()?;
                Ok(Stmt::Throw(value))
            }
            Token::Break => {
                self.advance();
                self.end_statement()?;
                Ok(Stmt::Break)
            }
            Token::Continue => {
                self.advance();
                self.end_statement()?;
                Ok(Stmt::Continue)
            }
            Token::Semicolon => {
                self.advance();
                Ok(Stmt::Block(Vec::new()))
            }
            _ => {
                let expr = self.parse_expression()?;
                self.end_statement()?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        self.expect(&Token::If, "'if'")?;
        self.expect(&Token::LParen, "'(' after 'if'")?;
        let cond = self.parse_expression()?;
        self.expect(&Token::RParen, "')' after condition")?;
        let then_branch = self.parse_body()?;
        let else_branch = if self.eat(&Token::Else) {
            if self.check(&Token::If) {
                self.enter()?;
                let nested = self.parse_if()?;
                self.leave();
                Some(vec![nested])
            } else {
                Some(self.parse_body()?)
            }
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    /// Loop or branch body: a block, or a single statement
    fn parse_body(&mut self) -> Result<Vec<Stmt>> {
        if self.check(&Token::LBrace) {
            self.parse_block()
        } else {
            Ok(vec![self.parse_statement()?])
        }
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>> {
        self.expect(&Token::LBrace, "'{'")?;
        let mut body = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.check(&Token::Eof) {
                return Err(self.error("Expected '}' to close block"));
            }
            body.push(self.parse_statement()?);
        }
        self.advance();
        Ok(body)
    }

    // ── Expressions ────────────────────────────────────────

    fn parse_expression(&mut self) -> Result<Expr> {
        self.enter()?;
        let expr = self.parse_assignment()?;
        self.leave();
        Ok(expr)
    }

    fn parse_assignment(&mut self) -> Result<Expr> {
        let span = self.span();
        let target = self.parse_conditional()?;

        let op = match self.peek() {
            Token::Assign => AssignOp::Set,
            Token::PlusAssign => AssignOp::Add,
            Token::MinusAssign => AssignOp::Sub,
            _ => return Ok(target),
        };
        self.advance();

        if !is_place(&target) {
            return Err(Error::Syntax(format!(
                "Invalid assignment target at {}",
                span
            )));
        }

        let value = self.parse_expression()?;
        Ok(Expr::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    fn parse_conditional(&mut self) -> Result<Expr> {
        let cond = self.parse_or()?;
        if !self.eat(&Token::Question) {
            return Ok(cond);
        }
        let then_expr = self.parse_expression()?;
        self.expect(&Token::Colon, "':' in conditional expression")?;
        let else_expr = self.parse_expression()?;
        Ok(Expr::Conditional {
            cond: Box::new(cond),
            then_expr: Box::new(then_expr),
            else_expr: Box::new(else_expr),
        })
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        let mut links = 0;
        while self.eat(&Token::OrOr) {
            self.enter()?;
            links += 1;
            let right = self.parse_and()?;
            left = Expr::Logical(LogicalOp::Or, Box::new(left), Box::new(right));
        }
        self.leave_links(links);
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_equality()?;
        let mut links = 0;
        while self.eat(&Token::AndAnd) {
            self.enter()?;
            links += 1;
            let right = self.parse_equality()?;
            left = Expr::Logical(LogicalOp::And, Box::new(left), Box::new(right));
        }
        self.leave_links(links);
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        let mut left = self.parse_comparison()?;
        let mut links = 0;
        loop {
            let op = match self.peek() {
                Token::EqEq => BinaryOp::Eq,
                Token::NotEq => BinaryOp::NotEq,
                _ => break,
            };
            self.advance();
            self.enter()?;
            links += 1;
            let right = self.parse_comparison()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        self.leave_links(links);
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let mut left = self.parse_additive()?;
        let mut links = 0;
        loop {
            let op = match self.peek() {
                Token::Lt => BinaryOp::Lt,
                Token::Le => BinaryOp::Le,
                Token::Gt => BinaryOp::Gt,
                Token::Ge => BinaryOp::Ge,
                _ => break,
            };
            self.advance();
            self.enter()?;
            links += 1;
            let right = self.parse_additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        self.leave_links(links);
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative()?;
        let mut links = 0;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            self.enter()?;
            links += 1;
            let right = self.parse_multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        self.leave_links(links);
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        let mut links = 0;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Rem,
                _ => break,
            };
            self.advance();
            self.enter()?;
            links += 1;
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        self.leave_links(links);
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let op = match self.peek() {
            Token::Bang => UnaryOp::Not,
            Token::Minus => UnaryOp::Neg,
            _ => return self.parse_postfix(),
        };
        self.advance();
        self.enter()?;
        let operand = self.parse_unary()?;
        self.leave();
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        let mut links = 0;
        loop {
            match self.peek() {
                Token::Dot => {
                    self.enter()?;
                    links += 1;
                    self.advance();
                    let name = match property_name(self.peek()) {
                        Some(name) => name,
                        None => return Err(self.error("Expected property name after '.'")),
                    };
                    self.advance();
                    expr = Expr::Member(Box::new(expr), name);
                }
                Token::LBracket => {
                    self.enter()?;
                    links += 1;
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect(&Token::RBracket, "']' after index")?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                Token::LParen => {
                    let callee = match &expr {
                        Expr::Ident(name) => name.clone(),
                        _ => return Err(self.error("Only built-in functions can be called")),
                    };
                    self.advance();
                    let args = self.parse_list(&Token::RParen, "')' after arguments")?;
                    expr = Expr::Call { callee, args };
                }
                _ => break,
            }
        }
        self.leave_links(links);
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.peek().clone() {
            Token::IntegerLiteral(i) => {
                self.advance();
                Ok(Expr::Literal(Value::Integer(i)))
            }
            Token::FloatLiteral(f) => {
                self.advance();
                Ok(Expr::Literal(Value::Float(f)))
            }
            Token::StringLiteral(s) => {
                self.advance();
                Ok(Expr::Literal(Value::String(s)))
            }
            Token::BooleanLiteral(b) => {
                self.advance();
                Ok(Expr::Literal(Value::Boolean(b)))
            }
            Token::Null => {
                self.advance();
                Ok(Expr::Literal(Value::Null))
            }
            Token::Identifier(name) => {
                self.advance();
                Ok(Expr::Ident(name))
            }
            Token::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(expr)
            }
            Token::LBracket => {
                self.advance();
                let items = self.parse_list(&Token::RBracket, "']' after array elements")?;
                Ok(Expr::Array(items))
            }
            Token::LBrace => self.parse_object(),
            _ => Err(self.error("Expected expression")),
        }
    }

    /// Comma-separated expressions up to `close`, trailing comma allowed
    fn parse_list(&mut self, close: &Token, what: &str) -> Result<Vec<Expr>> {
        let mut items = Vec::new();
        while !self.check(close) {
            items.push(self.parse_expression()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(close, what)?;
        Ok(items)
    }

    fn parse_object(&mut self) -> Result<Expr> {
        self.expect(&Token::LBrace, "'{'")?;
        let mut props = Vec::new();
        while !self.check(&Token::RBrace) {
            let key = match property_name(self.peek()) {
                Some(key) => key,
                None => return Err(self.error("Expected property name")),
            };
            self.advance();
            let value = if self.eat(&Token::Colon) {
                self.parse_expression()?
            } else {
                // shorthand `{ owner }`
                Expr::Ident(key.clone())
            };
            props.push((key, value));
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RBrace, "'}' after object properties")?;
        Ok(Expr::Object(props))
    }
}

/// Whether the expression is a chain rooted at a variable
pub(super) fn is_place(expr: &Expr) -> bool {
    match expr {
        Expr::Ident(_) => true,
        Expr::Member(base, _) | Expr::Index(base, _) => is_place(base),
        _ => false,
    }
}

/// Tokens usable as a property name after `.` or as an object key
fn property_name(token: &Token) -> Option<String> {
    let name = match token {
        Token::Identifier(name) | Token::StringLiteral(name) => return Some(name.clone()),
        Token::Let => "let",
        Token::If => "if",
        Token::Else => "else",
        Token::While => "while",
        Token::For => "for",
        Token::Of => "of",
        Token::Return => "return",
        Token::Throw => "throw",
        Token::Break => "break",
        Token::Continue => "continue",
        Token::Null => "null",
        Token::BooleanLiteral(true) => "true",
        Token::BooleanLiteral(false) => "false",
        _ => return None,
    };
    Some(name.to_string())
}

fn describe(token: &Token) -> String {
    match token {
        Token::Eof => "end of input".to_string(),
        Token::Identifier(name) => format!("identifier '{}'", name),
        Token::StringLiteral(s) => format!("string \"{}\"", s),
        other => format!("{:?}", other),
    }
}
