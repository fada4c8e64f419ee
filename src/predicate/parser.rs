//! Recursive-descent parser producing the predicate AST.
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! program     := ("let" IDENT "=" expr ";")* expr ";"?
//! expr        := or ("?" expr ":" expr)?
//! or          := and (("||" | "or") and)*
//! and         := equality (("&&" | "and") equality)*
//! equality    := comparison (("==" | "!=") comparison)*
//! comparison  := additive (("<" | "<=" | ">" | ">=" | "in") additive)*
//! additive    := term (("+" | "-") term)*
//! term        := unary (("*" | "/" | "%") unary)*
//! unary       := ("!" | "not" | "-") unary | postfix
//! postfix     := primary ("." IDENT | "[" expr "]")*
//! primary     := literal | "[" args? "]" | "(" expr ")" | IDENT | IDENT "(" args? ")"
//! arg         := IDENT "=>" expr | expr
//! ```

use serde_json::Value;

use super::lexer::{Position, Spanned, Token};
use super::PredicateError;

/// Maximum nesting of sub-expressions before the parser gives up.
pub(crate) const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    In,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    Array(Vec<Expr>),
    Name(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call { name: String, args: Vec<Expr> },
    Lambda { param: String, body: Box<Expr> },
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
}

/// How a left-associative chain joins its operands.
#[derive(Debug, Clone, Copy)]
enum Fold {
    Or,
    And,
    Binary(BinaryOp),
}

impl Fold {
    fn combine(self, left: Expr, right: Expr) -> Expr {
        let (left, right) = (Box::new(left), Box::new(right));
        match self {
            Fold::Or => Expr::Or(left, right),
            Fold::And => Expr::And(left, right),
            Fold::Binary(op) => Expr::Binary(op, left, right),
        }
    }
}

/// A parsed predicate: ordered `let` bindings and the verdict expression.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Program {
    pub bindings: Vec<(String, Expr)>,
    pub result: Expr,
}

pub(crate) fn parse(tokens: Vec<Spanned>) -> Result<Program, PredicateError> {
    let mut parser = Parser {
        tokens,
        index: 0,
        depth: 0,
    };
    parser.program()
}

struct Parser {
    tokens: Vec<Spanned>,
    index: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.tokens
            .get(self.index)
            .map(|s| &s.token)
            .unwrap_or(&Token::Eof)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens
            .get(self.index.saturating_add(offset))
            .map(|s| &s.token)
            .unwrap_or(&Token::Eof)
    }

    fn pos(&self) -> Position {
        self.tokens
            .get(self.index)
            .or_else(|| self.tokens.last())
            .map(|s| s.pos)
            .unwrap_or(Position { line: 1, column: 1 })
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.index < self.tokens.len() {
            self.index = self.index.saturating_add(1);
        }
        token
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, context: &str) -> Result<(), PredicateError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.unexpected(context))
        }
    }

    fn error(&self, message: impl Into<String>) -> PredicateError {
        let pos = self.pos();
        PredicateError::Syntax {
            line: pos.line,
            column: pos.column,
            message: message.into(),
        }
    }

    fn unexpected(&self, expected: &str) -> PredicateError {
        self.error(format!("expected {expected}, found {}", self.peek().describe()))
    }

    fn expect_ident(&mut self, context: &str) -> Result<String, PredicateError> {
        match self.peek().clone() {
            Token::Ident(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected(context)),
        }
    }

    /// Guard against runaway nesting; pair every call with [`Parser::leave`].
    fn enter(&mut self) -> Result<(), PredicateError> {
        self.depth = self.depth.saturating_add(1);
        if self.depth > MAX_DEPTH {
            return Err(self.error(format!("expression nested deeper than {MAX_DEPTH} levels")));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn program(&mut self) -> Result<Program, PredicateError> {
        if self.check(&Token::Eof) {
            return Err(self.error("predicate is empty"));
        }

        let mut bindings = Vec::new();
        while self.eat(&Token::Let) {
            let name = self.expect_ident("a name after `let`")?;
            self.expect(&Token::Assign, "`=`")?;
            let value = self.expr()?;
            self.expect(&Token::Semicolon, "`;` after binding")?;
            bindings.push((name, value));
        }

        let result = self.expr()?;
        self.eat(&Token::Semicolon);
        if !self.check(&Token::Eof) {
            return Err(self.unexpected("end of predicate"));
        }
        Ok(Program { bindings, result })
    }

    fn expr(&mut self) -> Result<Expr, PredicateError> {
        self.enter()?;
        let result = self.conditional();
        self.leave();
        result
    }

    fn conditional(&mut self) -> Result<Expr, PredicateError> {
        let condition = self.or()?;
        if !self.eat(&Token::Question) {
            return Ok(condition);
        }
        let then = self.expr()?;
        self.expect(&Token::Colon, "`:` in conditional")?;
        let otherwise = self.expr()?;
        Ok(Expr::Conditional(
            Box::new(condition),
            Box::new(then),
            Box::new(otherwise),
        ))
    }

    fn or(&mut self) -> Result<Expr, PredicateError> {
        self.fold_left(Self::and, |token| {
            matches!(token, Token::OrOr | Token::Or).then_some(Fold::Or)
        })
    }

    fn and(&mut self) -> Result<Expr, PredicateError> {
        self.fold_left(Self::equality, |token| {
            matches!(token, Token::AndAnd | Token::And).then_some(Fold::And)
        })
    }

    fn equality(&mut self) -> Result<Expr, PredicateError> {
        self.fold_left(Self::comparison, |token| match token {
            Token::EqEq => Some(Fold::Binary(BinaryOp::Eq)),
            Token::NotEq => Some(Fold::Binary(BinaryOp::NotEq)),
            _ => None,
        })
    }

    fn comparison(&mut self) -> Result<Expr, PredicateError> {
        self.fold_left(Self::additive, |token| match token {
            Token::Lt => Some(Fold::Binary(BinaryOp::Lt)),
            Token::LtEq => Some(Fold::Binary(BinaryOp::LtEq)),
            Token::Gt => Some(Fold::Binary(BinaryOp::Gt)),
            Token::GtEq => Some(Fold::Binary(BinaryOp::GtEq)),
            Token::In => Some(Fold::Binary(BinaryOp::In)),
            _ => None,
        })
    }

    fn additive(&mut self) -> Result<Expr, PredicateError> {
        self.fold_left(Self::term, |token| match token {
            Token::Plus => Some(Fold::Binary(BinaryOp::Add)),
            Token::Minus => Some(Fold::Binary(BinaryOp::Sub)),
            _ => None,
        })
    }

    fn term(&mut self) -> Result<Expr, PredicateError> {
        self.fold_left(Self::unary, |token| match token {
            Token::Star => Some(Fold::Binary(BinaryOp::Mul)),
            Token::Slash => Some(Fold::Binary(BinaryOp::Div)),
            Token::Percent => Some(Fold::Binary(BinaryOp::Rem)),
            _ => None,
        })
    }

    /// Left-associative chain of `operand`s joined by operators recognised by
    /// `operator`. Every fold deepens the tree by one, so each counts against
    /// [`MAX_DEPTH`] until the chain ends.
    fn fold_left(
        &mut self,
        operand: fn(&mut Self) -> Result<Expr, PredicateError>,
        operator: fn(&Token) -> Option<Fold>,
    ) -> Result<Expr, PredicateError> {
        let mut left = operand(self)?;
        let mut folds = 0_usize;
        let result = loop {
            let Some(fold) = operator(self.peek()) else {
                break Ok(left);
            };
            self.advance();
            folds = folds.saturating_add(1);
            if let Err(e) = self.enter() {
                break Err(e);
            }
            match operand(self) {
                Ok(right) => left = fold.combine(left, right),
                Err(e) => break Err(e),
            }
        };
        self.depth = self.depth.saturating_sub(folds);
        result
    }

    fn unary(&mut self) -> Result<Expr, PredicateError> {
        let op = match self.peek() {
            Token::Bang | Token::Not => UnaryOp::Not,
            Token::Minus => UnaryOp::Neg,
            _ => return self.postfix(),
        };
        self.advance();
        self.enter()?;
        let operand = self.unary();
        self.leave();
        Ok(Expr::Unary(op, Box::new(operand?)))
    }

    fn postfix(&mut self) -> Result<Expr, PredicateError> {
        let mut expr = self.primary()?;
        let mut accesses = 0_usize;
        let result = loop {
            if !matches!(self.peek(), Token::Dot | Token::LBracket) {
                break Ok(expr);
            }
            accesses = accesses.saturating_add(1);
            if let Err(e) = self.enter() {
                break Err(e);
            }
            match self.access(expr) {
                Ok(next) => expr = next,
                Err(e) => break Err(e),
            }
        };
        self.depth = self.depth.saturating_sub(accesses);
        result
    }

    /// One `.field` or `[index]` applied to `target`.
    fn access(&mut self, target: Expr) -> Result<Expr, PredicateError> {
        if self.eat(&Token::Dot) {
            let field = self.expect_ident("a field name after `.`")?;
            return Ok(Expr::Member(Box::new(target), field));
        }
        self.expect(&Token::LBracket, "`[`")?;
        let index = self.expr()?;
        self.expect(&Token::RBracket, "`]`")?;
        Ok(Expr::Index(Box::new(target), Box::new(index)))
    }

    fn primary(&mut self) -> Result<Expr, PredicateError> {
        match self.peek().clone() {
            Token::Number(n) => {
                self.advance();
                let number = serde_json::Number::from_f64(n)
                    .ok_or_else(|| self.error("number literal is not finite"))?;
                Ok(Expr::Literal(Value::Number(number)))
            }
            Token::Str(s) => {
                self.advance();
                Ok(Expr::Literal(Value::String(s)))
            }
            Token::True => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(true)))
            }
            Token::False => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(false)))
            }
            Token::Null => {
                self.advance();
                Ok(Expr::Literal(Value::Null))
            }
            Token::LParen => {
                self.advance();
                let inner = self.expr()?;
                self.expect(&Token::RParen, "`)`")?;
                Ok(inner)
            }
            Token::LBracket => {
                self.advance();
                let items = self.list(&Token::RBracket, false)?;
                Ok(Expr::Array(items))
            }
            Token::Ident(name) => {
                self.advance();
                if self.eat(&Token::LParen) {
                    let args = self.list(&Token::RParen, true)?;
                    Ok(Expr::Call { name, args })
                } else {
                    Ok(Expr::Name(name))
                }
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    /// Comma-separated items up to `close`; trailing comma allowed.
    fn list(&mut self, close: &Token, allow_lambdas: bool) -> Result<Vec<Expr>, PredicateError> {
        let mut items = Vec::new();
        while !self.eat(close) {
            let item = if allow_lambdas && self.at_lambda() {
                self.lambda()?
            } else {
                self.expr()?
            };
            items.push(item);
            if !self.eat(&Token::Comma) {
                self.expect(close, "`,` or closing bracket")?;
                break;
            }
        }
        Ok(items)
    }

    fn at_lambda(&self) -> bool {
        matches!(self.peek(), Token::Ident(_)) && matches!(self.peek_at(1), Token::Arrow)
    }

    fn lambda(&mut self) -> Result<Expr, PredicateError> {
        let param = self.expect_ident("a parameter name")?;
        self.expect(&Token::Arrow, "`=>`")?;
        let body = self.expr()?;
        Ok(Expr::Lambda {
            param,
            body: Box::new(body),
        })
    }
}
