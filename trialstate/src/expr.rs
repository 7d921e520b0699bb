//! Text syntax for references
//!
//! Session files and the command line describe conditions and values as
//! expressions that compile to a [`Ref`]:
//!
//! ```text
//! @response.rt + 0.5
//! @trials.i < 3 and $practice == false
//! @response.pressed in ["J", "K"]
//! ```
//!
//! `@name.attr` reads a state attribute, `$name` reads an experiment variable.
//! `jitter(low, range)` and `shuffle(list)` draw random values when read.
//! Operators bind, loosest first: `or`/`||`, `and`/`&&`, `not`, `==`/`!=`,
//! `<`/`<=`/`>`/`>=`/`in`, `+`/`-`, `*`/`/`/`%`, then unary `-`/`!`.

use crate::reference::{BinaryOp, Ref, UnaryOp};
use crate::types::{EngineError, Result, StateId, Value};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    State(String),
    Var(String),
    Op(&'static str),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
}

fn parse_error(position: usize, message: impl Into<String>) -> EngineError {
    EngineError::Parse {
        position,
        message: message.into(),
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let take_word = |chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>| {
            let mut word = String::new();
            while let Some(&(_, c)) = chars.peek() {
                if !is_ident_char(c) {
                    break;
                }
                word.push(c);
                chars.next();
            }
            word
        };

        let token = match c {
            '0'..='9' => {
                let mut text = String::new();
                let mut float = false;
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_digit() {
                        text.push(c);
                    } else if c == '.' && !float {
                        float = true;
                        text.push(c);
                    } else if (c == 'e' || c == 'E') && !text.contains(['e', 'E']) {
                        float = true;
                        text.push(c);
                        chars.next();
                        if let Some(&(_, sign)) = chars.peek() {
                            if sign == '-' || sign == '+' {
                                text.push(sign);
                                chars.next();
                            }
                        }
                        continue;
                    } else {
                        break;
                    }
                    chars.next();
                }
                if float {
                    let value = text
                        .parse::<f64>()
                        .map_err(|_| parse_error(pos, format!("invalid number `{}`", text)))?;
                    Token::Float(value)
                } else {
                    let value = text
                        .parse::<i64>()
                        .map_err(|_| parse_error(pos, format!("invalid integer `{}`", text)))?;
                    Token::Int(value)
                }
            }
            '"' | '\'' => {
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                while let Some((_, next)) = chars.next() {
                    match next {
                        '\\' => match chars.next() {
                            Some((_, 'n')) => text.push('\n'),
                            Some((_, 't')) => text.push('\t'),
                            Some((_, escaped)) => text.push(escaped),
                            None => break,
                        },
                        _ if next == c => {
                            closed = true;
                            break;
                        }
                        _ => text.push(next),
                    }
                }
                if !closed {
                    return Err(parse_error(pos, "unterminated string"));
                }
                tokens.push((pos, Token::Str(text)));
                continue;
            }
            '@' | '$' => {
                chars.next();
                let name = take_word(&mut chars);
                if name.is_empty() {
                    return Err(parse_error(pos, format!("expected a name after `{}`", c)));
                }
                tokens.push((pos, if c == '@' { Token::State(name) } else { Token::Var(name) }));
                continue;
            }
            c if is_ident_char(c) => {
                let word = take_word(&mut chars);
                tokens.push((pos, Token::Ident(word)));
                continue;
            }
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            ',' => Token::Comma,
            '.' => Token::Dot,
            _ => {
                chars.next();
                let next = chars.peek().map(|&(_, n)| n);
                let op = match (c, next) {
                    ('=', Some('=')) => "==",
                    ('!', Some('=')) => "!=",
                    ('<', Some('=')) => "<=",
                    ('>', Some('=')) => ">=",
                    ('&', Some('&')) => "&&",
                    ('|', Some('|')) => "||",
                    ('<', _) => "<",
                    ('>', _) => ">",
                    ('!', _) => "!",
                    ('+', _) => "+",
                    ('-', _) => "-",
                    ('*', _) => "*",
                    ('/', _) => "/",
                    ('%', _) => "%",
                    _ => return Err(parse_error(pos, format!("unexpected character `{}`", c))),
                };
                if op.len() == 2 {
                    chars.next();
                }
                tokens.push((pos, Token::Op(op)));
                continue;
            }
        };
        // Single-character punctuation and numbers land here
        if matches!(
            token,
            Token::LParen | Token::RParen | Token::LBracket | Token::RBracket | Token::Comma | Token::Dot
        ) {
            chars.next();
        }
        tokens.push((pos, token));
    }
    Ok(tokens)
}

/// Binding power of an infix operator; higher binds tighter
fn infix(token: &Token) -> Option<(BinaryOp, u8)> {
    let op = match token {
        Token::Op("||") => (BinaryOp::Or, 1),
        Token::Ident(word) if word == "or" => (BinaryOp::Or, 1),
        Token::Op("&&") => (BinaryOp::And, 2),
        Token::Ident(word) if word == "and" => (BinaryOp::And, 2),
        Token::Op("==") => (BinaryOp::Eq, 3),
        Token::Op("!=") => (BinaryOp::Ne, 3),
        Token::Op("<") => (BinaryOp::Lt, 4),
        Token::Op("<=") => (BinaryOp::Le, 4),
        Token::Op(">") => (BinaryOp::Gt, 4),
        Token::Op(">=") => (BinaryOp::Ge, 4),
        Token::Ident(word) if word == "in" => (BinaryOp::In, 4),
        Token::Op("+") => (BinaryOp::Add, 5),
        Token::Op("-") => (BinaryOp::Sub, 5),
        Token::Op("*") => (BinaryOp::Mul, 6),
        Token::Op("/") => (BinaryOp::Div, 6),
        Token::Op("%") => (BinaryOp::Rem, 6),
        _ => return None,
    };
    Some(op)
}

const PREFIX_POWER: u8 = 7;
/// Word `not` negates a whole comparison: `not a == b` is `not (a == b)`
const NOT_POWER: u8 = 3;

struct Parser<'a> {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
    resolve: &'a mut dyn FnMut(&str) -> Option<StateId>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, token)| token)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |(offset, _)| *offset)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, token)| token.clone());
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<()> {
        let offset = self.offset();
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(_) => Err(parse_error(offset, format!("expected {}", what))),
            None => Err(parse_error(offset, format!("expected {}, found end of input", what))),
        }
    }

    fn expression(&mut self, min_power: u8) -> Result<Ref> {
        let mut lhs = self.prefix()?;
        while let Some((op, power)) = self.peek().and_then(infix) {
            if power < min_power {
                break;
            }
            self.next();
            let rhs = self.expression(power + 1)?;
            lhs = Ref::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<Ref> {
        let offset = self.offset();
        let Some(token) = self.next() else {
            return Err(parse_error(offset, "unexpected end of input"));
        };
        let reference = match token {
            Token::Int(value) => Ref::Literal(Value::Int(value)),
            Token::Float(value) => Ref::Literal(Value::Float(value)),
            Token::Str(text) => Ref::Literal(Value::Str(text)),
            Token::Ident(word) => match word.as_str() {
                "true" => Ref::Literal(Value::Bool(true)),
                "false" => Ref::Literal(Value::Bool(false)),
                "null" => Ref::Literal(Value::Null),
                "not" => Ref::Unary(UnaryOp::Not, Box::new(self.expression(NOT_POWER)?)),
                "jitter" | "shuffle" => self.call(&word, offset)?,
                _ => return Err(parse_error(offset, format!("unexpected word `{}`", word))),
            },
            Token::Var(name) => Ref::Var(name),
            Token::State(name) => {
                let state = (self.resolve)(&name).ok_or_else(|| EngineError::UnknownState(name.clone()))?;
                self.expect(Token::Dot, "`.` after state name")?;
                let attr_offset = self.offset();
                match self.next() {
                    Some(Token::Ident(attr)) => Ref::attr(state, attr),
                    _ => return Err(parse_error(attr_offset, "expected attribute name")),
                }
            }
            Token::Op("-") => match self.expression(PREFIX_POWER)? {
                Ref::Literal(Value::Int(value)) => Ref::Literal(Value::Int(-value)),
                Ref::Literal(Value::Float(value)) => Ref::Literal(Value::Float(-value)),
                operand => Ref::Unary(UnaryOp::Neg, Box::new(operand)),
            },
            Token::Op("!") => Ref::Unary(UnaryOp::Not, Box::new(self.expression(PREFIX_POWER)?)),
            Token::LParen => {
                let inner = self.expression(0)?;
                self.expect(Token::RParen, "`)`")?;
                inner
            }
            Token::LBracket => Ref::Literal(Value::List(self.list()?)),
            _ => return Err(parse_error(offset, "expected a value")),
        };
        Ok(reference)
    }

    /// Arguments of a built-in call, after its name
    fn call(&mut self, name: &str, offset: usize) -> Result<Ref> {
        self.expect(Token::LParen, "`(` after function name")?;
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.next();
        } else {
            loop {
                args.push(self.expression(0)?);
                let separator = self.offset();
                match self.next() {
                    Some(Token::Comma) => continue,
                    Some(Token::RParen) => break,
                    _ => return Err(parse_error(separator, "expected `,` or `)`")),
                }
            }
        }

        let mut args = args.into_iter();
        match (name, args.next(), args.next(), args.next()) {
            ("jitter", Some(low), Some(range), None) => Ok(Ref::Jitter(Box::new(low), Box::new(range))),
            ("shuffle", Some(items), None, None) => Ok(Ref::Shuffle(Box::new(items))),
            ("jitter", ..) => Err(parse_error(offset, "jitter takes (low, range)")),
            _ => Err(parse_error(offset, format!("{} takes one argument", name))),
        }
    }

    /// Literal list items up to the closing bracket
    fn list(&mut self) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        if self.peek() == Some(&Token::RBracket) {
            self.next();
            return Ok(items);
        }
        loop {
            let offset = self.offset();
            match self.expression(0)? {
                Ref::Literal(value) => items.push(value),
                _ => return Err(parse_error(offset, "list items must be literals")),
            }
            let offset = self.offset();
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RBracket) => return Ok(items),
                _ => return Err(parse_error(offset, "expected `,` or `]`")),
            }
        }
    }
}

/// Compile an expression, resolving `@name` through `resolve`
pub fn parse(source: &str, resolve: &mut dyn FnMut(&str) -> Option<StateId>) -> Result<Ref> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: source.len(),
        resolve,
    };
    let reference = parser.expression(0)?;
    if parser.pos < parser.tokens.len() {
        return Err(parse_error(parser.offset(), "unexpected trailing input"));
    }
    Ok(reference)
}
