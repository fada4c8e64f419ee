//! Tokenizer for predicate source text.

use super::PredicateError;

/// Line/column of a token, both 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Position {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(f64),
    Str(String),
    Ident(String),

    // Keywords.
    Let,
    True,
    False,
    Null,
    In,
    And,
    Or,
    Not,

    // Punctuation.
    Dot,
    Comma,
    Colon,
    Semicolon,
    Question,
    LParen,
    RParen,
    LBracket,
    RBracket,

    // Operators.
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
    Bang,
    Assign,
    Arrow,

    Eof,
}

impl Token {
    /// Short human-readable form for error messages.
    pub(crate) fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number {n}"),
            Token::Str(s) => format!("string {s:?}"),
            Token::Ident(name) => format!("`{name}`"),
            Token::Eof => "end of input".to_owned(),
            other => format!("`{}`", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Token::Let => "let",
            Token::True => "true",
            Token::False => "false",
            Token::Null => "null",
            Token::In => "in",
            Token::And => "and",
            Token::Or => "or",
            Token::Not => "not",
            Token::Dot => ".",
            Token::Comma => ",",
            Token::Colon => ":",
            Token::Semicolon => ";",
            Token::Question => "?",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::Lt => "<",
            Token::LtEq => "<=",
            Token::Gt => ">",
            Token::GtEq => ">=",
            Token::AndAnd => "&&",
            Token::OrOr => "||",
            Token::Bang => "!",
            Token::Assign => "=",
            Token::Arrow => "=>",
            Token::Number(_) | Token::Str(_) | Token::Ident(_) | Token::Eof => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub pos: Position,
}

/// Character cursor that tracks line and column.
struct Cursor<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Cursor<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn pos(&self) -> Position {
        Position {
            line: self.line,
            column: self.column,
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.chars.next()?;
        if ch == '\n' {
            self.line = self.line.saturating_add(1);
            self.column = 1;
        } else {
            self.column = self.column.saturating_add(1);
        }
        Some(ch)
    }

    /// Consume `expected` if it is next.
    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }
}

fn syntax(pos: Position, message: impl Into<String>) -> PredicateError {
    PredicateError::Syntax {
        line: pos.line,
        column: pos.column,
        message: message.into(),
    }
}

/// Split predicate source into tokens. The last token is always [`Token::Eof`].
pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>, PredicateError> {
    let mut cursor = Cursor::new(source);
    let mut tokens = Vec::new();

    loop {
        skip_trivia(&mut cursor);
        let pos = cursor.pos();
        let Some(ch) = cursor.peek() else {
            tokens.push(Spanned {
                token: Token::Eof,
                pos,
            });
            return Ok(tokens);
        };

        let token = if ch.is_ascii_digit() {
            lex_number(&mut cursor, pos)?
        } else if ch == '"' || ch == '\'' {
            lex_string(&mut cursor, pos)?
        } else if ch.is_ascii_alphabetic() || ch == '_' {
            lex_word(&mut cursor)
        } else {
            cursor.bump();
            match ch {
                '.' => Token::Dot,
                ',' => Token::Comma,
                ':' => Token::Colon,
                ';' => Token::Semicolon,
                '?' => Token::Question,
                '(' => Token::LParen,
                ')' => Token::RParen,
                '[' => Token::LBracket,
                ']' => Token::RBracket,
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => Token::Star,
                '/' => Token::Slash,
                '%' => Token::Percent,
                '=' if cursor.eat('=') => Token::EqEq,
                '=' if cursor.eat('>') => Token::Arrow,
                '=' => Token::Assign,
                '!' if cursor.eat('=') => Token::NotEq,
                '!' => Token::Bang,
                '<' if cursor.eat('=') => Token::LtEq,
                '<' => Token::Lt,
                '>' if cursor.eat('=') => Token::GtEq,
                '>' => Token::Gt,
                '&' if cursor.eat('&') => Token::AndAnd,
                '|' if cursor.eat('|') => Token::OrOr,
                other => return Err(syntax(pos, format!("unexpected character {other:?}"))),
            }
        };

        tokens.push(Spanned { token, pos });
    }
}

/// Skip whitespace and `//` line comments.
fn skip_trivia(cursor: &mut Cursor<'_>) {
    loop {
        match cursor.peek() {
            Some(ch) if ch.is_whitespace() => {
                cursor.bump();
            }
            Some('/') => {
                let mut lookahead = cursor.chars.clone();
                lookahead.next();
                if lookahead.peek() != Some(&'/') {
                    return;
                }
                while let Some(ch) = cursor.bump() {
                    if ch == '\n' {
                        break;
                    }
                }
            }
            _ => return,
        }
    }
}

fn lex_number(cursor: &mut Cursor<'_>, pos: Position) -> Result<Token, PredicateError> {
    let mut text = String::new();
    while let Some(ch) = cursor.peek() {
        if ch.is_ascii_digit() || ch == '_' {
            cursor.bump();
            if ch != '_' {
                text.push(ch);
            }
        } else {
            break;
        }
    }

    // A fraction needs a digit after the dot, otherwise `.` is member access.
    if cursor.peek() == Some('.') {
        let mut lookahead = cursor.chars.clone();
        lookahead.next();
        if lookahead.peek().is_some_and(char::is_ascii_digit) {
            cursor.bump();
            text.push('.');
            while let Some(ch) = cursor.peek().filter(char::is_ascii_digit) {
                cursor.bump();
                text.push(ch);
            }
        }
    }

    if matches!(cursor.peek(), Some('e' | 'E')) {
        cursor.bump();
        text.push('e');
        if let Some(sign) = cursor.peek().filter(|c| *c == '+' || *c == '-') {
            cursor.bump();
            text.push(sign);
        }
        let mut digits = 0_usize;
        while let Some(ch) = cursor.peek().filter(char::is_ascii_digit) {
            cursor.bump();
            text.push(ch);
            digits = digits.saturating_add(1);
        }
        if digits == 0 {
            return Err(syntax(pos, "exponent has no digits"));
        }
    }

    text.parse::<f64>()
        .map(Token::Number)
        .map_err(|_| syntax(pos, format!("invalid number literal {text:?}")))
}

fn lex_string(cursor: &mut Cursor<'_>, pos: Position) -> Result<Token, PredicateError> {
    let quote = cursor.bump().unwrap_or('"');
    let mut text = String::new();
    loop {
        let Some(ch) = cursor.bump() else {
            return Err(syntax(pos, "unterminated string literal"));
        };
        if ch == quote {
            return Ok(Token::Str(text));
        }
        if ch != '\\' {
            text.push(ch);
            continue;
        }
        let escape_pos = cursor.pos();
        match cursor.bump() {
            Some('n') => text.push('\n'),
            Some('t') => text.push('\t'),
            Some('r') => text.push('\r'),
            Some('0') => text.push('\0'),
            Some(c @ ('\\' | '"' | '\'' | '/')) => text.push(c),
            Some(other) => {
                return Err(syntax(escape_pos, format!("unknown escape sequence \\{other}")));
            }
            None => return Err(syntax(pos, "unterminated string literal")),
        }
    }
}

fn lex_word(cursor: &mut Cursor<'_>) -> Token {
    let mut word = String::new();
    while let Some(ch) = cursor.peek() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            cursor.bump();
            word.push(ch);
        } else {
            break;
        }
    }
    match word.as_str() {
        "let" => Token::Let,
        "true" => Token::True,
        "false" => Token::False,
        "null" => Token::Null,
        "in" => Token::In,
        "and" => Token::And,
        "or" => Token::Or,
        "not" => Token::Not,
        _ => Token::Ident(word),
    }
}
