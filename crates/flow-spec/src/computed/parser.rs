//! Lexer and recursive-descent parser for computed-field expressions.

use serde_json::Value;

use super::builtins::number_value;
use crate::error::ComputeError;

const MAX_DEPTH: usize = 64;
// Binary operators and member/index accesses each add a level to the tree
// even without parentheses.
const MAX_CHAIN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Neq,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Array(Vec<Expr>),
    Ident(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
    End,
}

// Longest operators first so `<=` wins over `<`.
const OPERATORS: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "+", "-", "*", "/", "%", "<", ">", "!",
    "?", ":", "(", ")", "[", "]", ",", ".",
];

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, ComputeError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let ch = bytes[pos];
        if ch.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        let start = pos;
        if ch.is_ascii_digit()
            || (ch == b'.' && bytes.get(pos + 1).is_some_and(u8::is_ascii_digit))
        {
            while pos < bytes.len() && (bytes[pos].is_ascii_digit() || bytes[pos] == b'.') {
                pos += 1;
            }
            if pos < bytes.len() && matches!(bytes[pos], b'e' | b'E') {
                pos += 1;
                if pos < bytes.len() && matches!(bytes[pos], b'+' | b'-') {
                    pos += 1;
                }
                while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                    pos += 1;
                }
            }
            let text = &source[start..pos];
            let number = text.parse::<f64>().map_err(|_| ComputeError::Parse {
                offset: start,
                message: format!("invalid number '{text}'"),
            })?;
            tokens.push((Token::Number(number), start));
            continue;
        }

        if ch == b'\'' || ch == b'"' {
            let quote = ch;
            pos += 1;
            let mut text = String::new();
            loop {
                let Some(&next) = bytes.get(pos) else {
                    return Err(ComputeError::Parse {
                        offset: start,
                        message: "unterminated string".into(),
                    });
                };
                if next == quote {
                    pos += 1;
                    break;
                }
                if next == b'\\' {
                    let Some(escaped) = source[pos + 1..].chars().next() else {
                        pos += 1;
                        continue;
                    };
                    text.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                    pos += 1 + escaped.len_utf8();
                    continue;
                }
                // Copy a whole UTF-8 scalar.
                let rest = &source[pos..];
                let Some(scalar) = rest.chars().next() else {
                    break;
                };
                text.push(scalar);
                pos += scalar.len_utf8();
            }
            tokens.push((Token::Str(text), start));
            continue;
        }

        if ch.is_ascii_alphabetic() || ch == b'_' || ch == b'$' {
            while pos < bytes.len()
                && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_' || bytes[pos] == b'$')
            {
                pos += 1;
            }
            tokens.push((Token::Ident(source[start..pos].to_string()), start));
            continue;
        }

        let Some(op) = OPERATORS
            .iter()
            .copied()
            .find(|op| source[pos..].starts_with(*op))
        else {
            return Err(ComputeError::Parse {
                offset: start,
                message: format!(
                    "unexpected character '{}'",
                    source[pos..].chars().next().unwrap_or('?')
                ),
            });
        };
        pos += op.len();
        tokens.push((Token::Op(op), start));
    }

    tokens.push((Token::End, source.len()));
    Ok(tokens)
}

/// Parses an expression source string.
pub fn parse(source: &str) -> Result<Expr, ComputeError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        chain: 0,
    };
    let expr = parser.parse_conditional()?;
    match parser.peek() {
        Token::End => Ok(expr),
        other => Err(parser.err(format!("unexpected trailing token {other:?}"))),
    }
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    depth: usize,
    chain: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].0
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].1
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn err(&self, message: impl Into<String>) -> ComputeError {
        ComputeError::Parse {
            offset: self.offset(),
            message: message.into(),
        }
    }

    fn eat(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Token::Op(current) if *current == op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, op: &str) -> Result<(), ComputeError> {
        if self.eat(op) {
            Ok(())
        } else {
            Err(self.err(format!("expected '{op}', got {:?}", self.peek())))
        }
    }

    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ComputeError>,
    ) -> Result<T, ComputeError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.err("expression nested too deeply"));
        }
        let result = parse(self);
        self.depth -= 1;
        result
    }

    /// Counts one more link of an operator or postfix chain. The counter is
    /// released by the caller once the chain is complete.
    fn link(&mut self) -> Result<(), ComputeError> {
        self.chain += 1;
        if self.chain > MAX_CHAIN {
            return Err(self.err("expression chains too many operations"));
        }
        Ok(())
    }

    fn parse_conditional(&mut self) -> Result<Expr, ComputeError> {
        self.nested(|parser| {
            let condition = parser.parse_binary(0)?;
            if !parser.eat("?") {
                return Ok(condition);
            }
            let then = parser.parse_conditional()?;
            parser.expect(":")?;
            let otherwise = parser.parse_conditional()?;
            Ok(Expr::Conditional(
                Box::new(condition),
                Box::new(then),
                Box::new(otherwise),
            ))
        })
    }

    /// Precedence climbing over the binary operator table.
    fn parse_binary(&mut self, level: usize) -> Result<Expr, ComputeError> {
        const LEVELS: &[&[(&str, BinaryOp)]] = &[
            &[("||", BinaryOp::Or)],
            &[("&&", BinaryOp::And)],
            &[
                ("===", BinaryOp::Eq),
                ("!==", BinaryOp::Neq),
                ("==", BinaryOp::Eq),
                ("!=", BinaryOp::Neq),
            ],
            &[
                ("<=", BinaryOp::Lte),
                (">=", BinaryOp::Gte),
                ("<", BinaryOp::Lt),
                (">", BinaryOp::Gt),
            ],
            &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
            &[
                ("*", BinaryOp::Mul),
                ("/", BinaryOp::Div),
                ("%", BinaryOp::Rem),
            ],
        ];

        let Some(operators) = LEVELS.get(level) else {
            return self.parse_unary();
        };

        let mut left = self.parse_binary(level + 1)?;
        let mut links = 0;
        'outer: loop {
            for (symbol, op) in operators.iter() {
                if self.eat(symbol) {
                    self.link()?;
                    links += 1;
                    let right = self.parse_binary(level + 1)?;
                    left = Expr::Binary(*op, Box::new(left), Box::new(right));
                    continue 'outer;
                }
            }
            self.chain -= links;
            return Ok(left);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ComputeError> {
        let op = if self.eat("-") {
            UnaryOp::Neg
        } else if self.eat("+") {
            UnaryOp::Plus
        } else if self.eat("!") {
            UnaryOp::Not
        } else {
            return self.parse_postfix();
        };
        self.nested(|parser| {
            let operand = parser.parse_unary()?;
            Ok(Expr::Unary(op, Box::new(operand)))
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, ComputeError> {
        let mut expr = self.parse_primary()?;
        let mut links = 0;
        loop {
            if matches!(self.peek(), Token::Op("." | "[")) {
                self.link()?;
                links += 1;
            }
            if self.eat(".") {
                match self.advance() {
                    Token::Ident(name) => expr = Expr::Member(Box::new(expr), name),
                    other => return Err(self.err(format!("expected property name, got {other:?}"))),
                }
            } else if self.eat("[") {
                let index = self.parse_conditional()?;
                self.expect("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if matches!(self.peek(), Token::Op("(")) {
                let Expr::Ident(name) = expr else {
                    return Err(self.err("only named functions can be called"));
                };
                self.advance();
                let args = self.parse_list(")")?;
                expr = Expr::Call(name, args);
            } else {
                self.chain -= links;
                return Ok(expr);
            }
        }
    }

    fn parse_list(&mut self, close: &str) -> Result<Vec<Expr>, ComputeError> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_conditional()?);
            if self.eat(close) {
                return Ok(items);
            }
            self.expect(",")?;
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ComputeError> {
        match self.advance() {
            Token::Number(number) => number_value(number)
                .map(Expr::Literal)
                .map_err(|message| self.err(message)),
            Token::Str(text) => Ok(Expr::Literal(Value::String(text))),
            Token::Ident(name) => Ok(match name.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" | "undefined" => Expr::Literal(Value::Null),
                _ => Expr::Ident(name),
            }),
            Token::Op("(") => {
                let inner = self.parse_conditional()?;
                self.expect(")")?;
                Ok(inner)
            }
            Token::Op("[") => Ok(Expr::Array(self.parse_list("]")?)),
            Token::End => Err(self.err("unexpected end of expression")),
            other => Err(self.err(format!("unexpected token {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn num(value: i64) -> Box<Expr> {
        Box::new(Expr::Literal(json!(value)))
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let expr = parse("1 + 2 * 3").expect("parse");
        assert_eq!(
            expr,
            Expr::Binary(
                BinaryOp::Add,
                num(1),
                Box::new(Expr::Binary(BinaryOp::Mul, num(2), num(3)))
            )
        );
    }

    #[test]
    fn parses_calls_members_and_conditionals() {
        let expr = parse("count(data.items) > 0 ? upper(user.name) : 'none'").expect("parse");
        let Expr::Conditional(condition, then, otherwise) = expr else {
            panic!("expected conditional");
        };
        assert!(matches!(*condition, Expr::Binary(BinaryOp::Gt, _, _)));
        assert!(matches!(*then, Expr::Call(ref name, _) if name == "upper"));
        assert_eq!(*otherwise, Expr::Literal(json!("none")));
    }

    #[test]
    fn reports_offset_of_parse_errors() {
        let err = parse("price * ").unwrap_err();
        assert!(matches!(err, ComputeError::Parse { offset: 8, .. }));

        let err = parse("price # qty").unwrap_err();
        assert!(matches!(err, ComputeError::Parse { offset: 6, .. }));
    }

    #[test]
    fn rejects_runaway_nesting() {
        let source = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        assert!(parse(&source).is_err());
    }

    #[test]
    fn rejects_long_operator_chains() {
        let source = format!("{}1", "1+".repeat(3_000));
        let err = parse(&source).unwrap_err();
        assert!(matches!(err, ComputeError::Parse { ref message, .. } if message.contains("chains")));

        let source = format!("data{}", ".a".repeat(3_000));
        assert!(parse(&source).is_err());
    }

    #[test]
    fn sibling_chains_do_not_accumulate() {
        let term = format!("{}1", "1+".repeat(200));
        let source = format!("max({term}, {term}) + min({term}, {term})");
        assert!(parse(&source).is_ok());
    }
}
