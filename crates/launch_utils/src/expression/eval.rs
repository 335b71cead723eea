//! Tokenizer, parser and interpreter for inline conditional expressions
//!
//! The accepted language is a small subset of Python expression syntax:
//!
//! ```text
//! expr       := or_expr [ "if" or_expr "else" expr ]
//! or_expr    := and_expr { "or" and_expr }
//! and_expr   := not_expr { "and" not_expr }
//! not_expr   := "not" not_expr | comparison
//! comparison := unary [ ("==" | "!=") unary ]
//! unary      := ("-" | "+") unary | postfix
//! postfix    := primary { "." IDENT "(" ")" }
//! primary    := STRING | NUMBER | "True" | "False"
//!             | "(" expr ")" | IDENT "(" expr ")"
//! ```
//!
//! Only the selected branch of a conditional is evaluated. Nesting is
//! limited to `MAX_DEPTH` levels.

use super::{ExpressionError, Value};
use std::fmt;

/// Deepest nesting of sub-expressions accepted by the parser
const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Str(String),
    Int(i64),
    Float(f64),
    Ident(String),
    LParen,
    RParen,
    Dot,
    Eq,
    NotEq,
    Minus,
    Plus,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Str(s) => write!(f, "string {:?}", s),
            Token::Int(i) => write!(f, "number {}", i),
            Token::Float(x) => write!(f, "number {:?}", x),
            Token::Ident(name) => write!(f, "identifier '{}'", name),
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
            Token::Dot => write!(f, "'.'"),
            Token::Eq => write!(f, "'=='"),
            Token::NotEq => write!(f, "'!='"),
            Token::Minus => write!(f, "'-'"),
            Token::Plus => write!(f, "'+'"),
        }
    }
}

struct Lexer<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.text[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn unexpected_char(&self, ch: char) -> ExpressionError {
        ExpressionError::UnexpectedChar {
            ch,
            offset: self.pos,
            text: self.text.to_string(),
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ExpressionError> {
        let mut tokens = Vec::new();

        while let Some(ch) = self.peek() {
            match ch {
                c if c.is_whitespace() => {
                    self.bump();
                }
                '(' => {
                    self.bump();
                    tokens.push(Token::LParen);
                }
                ')' => {
                    self.bump();
                    tokens.push(Token::RParen);
                }
                '-' => {
                    self.bump();
                    tokens.push(Token::Minus);
                }
                '+' => {
                    self.bump();
                    tokens.push(Token::Plus);
                }
                '=' | '!' => {
                    if self.peek_second() != Some('=') {
                        return Err(self.unexpected_char(ch));
                    }
                    self.bump();
                    self.bump();
                    tokens.push(if ch == '=' { Token::Eq } else { Token::NotEq });
                }
                '"' | '\'' => tokens.push(self.string()?),
                '.' if !self.peek_second().is_some_and(|c| c.is_ascii_digit()) => {
                    self.bump();
                    tokens.push(Token::Dot);
                }
                c if c.is_ascii_digit() || c == '.' => tokens.push(self.number()?),
                c if c.is_alphabetic() || c == '_' => tokens.push(self.ident()),
                other => return Err(self.unexpected_char(other)),
            }
        }

        Ok(tokens)
    }

    fn string(&mut self) -> Result<Token, ExpressionError> {
        let start = self.pos;
        let quote = self.bump();
        let mut value = String::new();

        loop {
            match self.bump() {
                None => {
                    return Err(ExpressionError::UnterminatedString(
                        self.text[start..].to_string(),
                    ))
                }
                Some(c) if Some(c) == quote => break,
                Some('\\') => match self.bump() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some(c @ ('\\' | '"' | '\'')) => value.push(c),
                    Some(other) => {
                        value.push('\\');
                        value.push(other);
                    }
                    None => {
                        return Err(ExpressionError::UnterminatedString(
                            self.text[start..].to_string(),
                        ))
                    }
                },
                Some(c) => value.push(c),
            }
        }

        Ok(Token::Str(value))
    }

    fn number(&mut self) -> Result<Token, ExpressionError> {
        let start = self.pos;
        let mut is_float = false;

        self.eat_digits();
        if self.peek() == Some('.') {
            is_float = true;
            self.bump();
            self.eat_digits();
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let mark = self.pos;
            self.bump();
            if matches!(self.peek(), Some('+' | '-')) {
                self.bump();
            }
            if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.eat_digits();
            } else {
                // not an exponent, leave the letter for the next token
                self.pos = mark;
            }
        }

        let literal = &self.text[start..self.pos];
        let invalid = || ExpressionError::InvalidNumber(literal.to_string());
        if is_float {
            literal.parse::<f64>().map(Token::Float).map_err(|_| invalid())
        } else {
            literal.parse::<i64>().map(Token::Int).map_err(|_| invalid())
        }
    }

    fn eat_digits(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
    }

    fn ident(&mut self) -> Token {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.bump();
        }
        Token::Ident(self.text[start..self.pos].to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnaryOp {
    Neg,
    Pos,
}

impl UnaryOp {
    fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Pos => "+",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Float,
    Int,
    Str,
    Bool,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        match name {
            "float" => Some(Function::Float),
            "int" => Some(Function::Int),
            "str" => Some(Function::Str),
            "bool" => Some(Function::Bool),
            _ => None,
        }
    }

    fn apply(self, value: Value) -> Result<Value, ExpressionError> {
        let invalid = |target: &'static str, value: &Value| ExpressionError::InvalidConversion {
            value: value.to_string(),
            target,
        };

        match self {
            Function::Float => value
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| invalid("float", &value)),
            Function::Int => match &value {
                Value::Int(i) => Ok(Value::Int(*i)),
                Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
                Value::Float(f) if f.is_finite() => Ok(Value::Int(f.trunc() as i64)),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| invalid("int", &value)),
                Value::Float(_) => Err(invalid("int", &value)),
            },
            Function::Str => Ok(Value::String(value.to_string())),
            Function::Bool => Ok(Value::Bool(value.is_truthy())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Literal(Value),
    Unary {
        op: UnaryOp,
        operand: Box<Node>,
    },
    Not(Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Compare {
        negated: bool,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    Conditional {
        condition: Box<Node>,
        then: Box<Node>,
        otherwise: Box<Node>,
    },
    Call {
        function: Function,
        argument: Box<Node>,
    },
    Method {
        receiver: Box<Node>,
        method: String,
    },
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    text: &'a str,
}

impl<'a> Parser<'a> {
    /// Enter one more level of the syntax tree
    fn descend(&mut self) -> Result<(), ExpressionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExpressionError::TooDeep(MAX_DEPTH));
        }
        Ok(())
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(word)) if word == keyword)
    }

    fn unexpected(&self, token: Option<&Token>) -> ExpressionError {
        ExpressionError::UnexpectedToken {
            found: token
                .map(|t| t.to_string())
                .unwrap_or_else(|| "end of input".to_string()),
            text: self.text.to_string(),
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExpressionError> {
        match self.advance() {
            Some(token) if token == expected => Ok(()),
            other => Err(self.unexpected(other.as_ref())),
        }
    }

    fn parse(mut self) -> Result<Node, ExpressionError> {
        let node = self.expression()?;
        if self.pos < self.tokens.len() {
            return Err(self.unexpected(self.peek()));
        }
        Ok(node)
    }

    fn expression(&mut self) -> Result<Node, ExpressionError> {
        let depth = self.depth;
        self.descend()?;

        let then = self.or_expr()?;
        if !self.at_keyword("if") {
            self.depth = depth;
            return Ok(then);
        }
        self.pos += 1;

        let condition = self.or_expr()?;
        if !self.at_keyword("else") {
            return Err(self.unexpected(self.peek()));
        }
        self.pos += 1;

        let otherwise = self.expression()?;
        self.depth = depth;
        Ok(Node::Conditional {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn or_expr(&mut self) -> Result<Node, ExpressionError> {
        let depth = self.depth;
        let mut lhs = self.and_expr()?;
        while self.at_keyword("or") {
            self.pos += 1;
            // each operator wraps the tree built so far
            self.descend()?;
            let rhs = self.and_expr()?;
            lhs = Node::Or(Box::new(lhs), Box::new(rhs));
        }
        self.depth = depth;
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Node, ExpressionError> {
        let depth = self.depth;
        let mut lhs = self.not_expr()?;
        while self.at_keyword("and") {
            self.pos += 1;
            self.descend()?;
            let rhs = self.not_expr()?;
            lhs = Node::And(Box::new(lhs), Box::new(rhs));
        }
        self.depth = depth;
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<Node, ExpressionError> {
        if self.at_keyword("not") {
            self.pos += 1;
            let depth = self.depth;
            self.descend()?;
            let operand = self.not_expr()?;
            self.depth = depth;
            return Ok(Node::Not(Box::new(operand)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Node, ExpressionError> {
        let lhs = self.unary()?;
        let negated = match self.peek() {
            Some(Token::Eq) => false,
            Some(Token::NotEq) => true,
            _ => return Ok(lhs),
        };
        self.pos += 1;

        let rhs = self.unary()?;
        Ok(Node::Compare {
            negated,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn unary(&mut self) -> Result<Node, ExpressionError> {
        let op = match self.peek() {
            Some(Token::Minus) => UnaryOp::Neg,
            Some(Token::Plus) => UnaryOp::Pos,
            _ => return self.postfix(),
        };
        self.pos += 1;

        let depth = self.depth;
        self.descend()?;
        let operand = self.unary()?;
        self.depth = depth;
        Ok(Node::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn postfix(&mut self) -> Result<Node, ExpressionError> {
        let depth = self.depth;
        let mut node = self.primary()?;
        while self.peek() == Some(&Token::Dot) {
            self.pos += 1;
            self.descend()?;
            let method = match self.advance() {
                Some(Token::Ident(name)) => name,
                other => return Err(self.unexpected(other.as_ref())),
            };
            self.expect(Token::LParen)?;
            self.expect(Token::RParen)?;
            node = Node::Method {
                receiver: Box::new(node),
                method,
            };
        }
        self.depth = depth;
        Ok(node)
    }

    fn primary(&mut self) -> Result<Node, ExpressionError> {
        let token = self.advance();
        match token {
            Some(Token::Str(s)) => Ok(Node::Literal(Value::String(s))),
            Some(Token::Int(i)) => Ok(Node::Literal(Value::Int(i))),
            Some(Token::Float(x)) => Ok(Node::Literal(Value::Float(x))),
            Some(Token::LParen) => {
                let inner = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) if name == "True" => Ok(Node::Literal(Value::Bool(true))),
            Some(Token::Ident(name)) if name == "False" => Ok(Node::Literal(Value::Bool(false))),
            Some(Token::Ident(name)) if self.peek() == Some(&Token::LParen) => {
                let function = Function::lookup(&name)
                    .ok_or_else(|| ExpressionError::UnknownFunction(name.clone()))?;
                self.pos += 1;
                let argument = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(Node::Call {
                    function,
                    argument: Box::new(argument),
                })
            }
            other => Err(self.unexpected(other.as_ref())),
        }
    }
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (a, b) => match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

fn eval(node: &Node) -> Result<Value, ExpressionError> {
    match node {
        Node::Literal(value) => Ok(value.clone()),
        Node::Unary { op, operand } => {
            let value = eval(operand)?;
            let invalid = |value: &Value| ExpressionError::InvalidOperand {
                op: op.symbol(),
                kind: value.kind(),
            };
            match (op, &value) {
                (UnaryOp::Neg, Value::Int(i)) => {
                    i.checked_neg().map(Value::Int).ok_or_else(|| invalid(&value))
                }
                (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
                (UnaryOp::Neg, Value::Bool(b)) => Ok(Value::Int(-i64::from(*b))),
                (UnaryOp::Pos, Value::Bool(b)) => Ok(Value::Int(i64::from(*b))),
                (UnaryOp::Pos, Value::Int(_) | Value::Float(_)) => Ok(value.clone()),
                _ => Err(invalid(&value)),
            }
        }
        Node::Not(inner) => Ok(Value::Bool(!eval(inner)?.is_truthy())),
        Node::And(lhs, rhs) => {
            let value = eval(lhs)?;
            if value.is_truthy() {
                eval(rhs)
            } else {
                Ok(value)
            }
        }
        Node::Or(lhs, rhs) => {
            let value = eval(lhs)?;
            if value.is_truthy() {
                Ok(value)
            } else {
                eval(rhs)
            }
        }
        Node::Compare { negated, lhs, rhs } => {
            let equal = values_equal(&eval(lhs)?, &eval(rhs)?);
            Ok(Value::Bool(equal != *negated))
        }
        Node::Conditional {
            condition,
            then,
            otherwise,
        } => {
            if eval(condition)?.is_truthy() {
                eval(then)
            } else {
                eval(otherwise)
            }
        }
        Node::Call { function, argument } => function.apply(eval(argument)?),
        Node::Method { receiver, method } => {
            let value = eval(receiver)?;
            match (&value, method.as_str()) {
                (Value::String(s), "lower") => Ok(Value::String(s.to_lowercase())),
                (Value::String(s), "upper") => Ok(Value::String(s.to_uppercase())),
                (Value::String(s), "strip") => Ok(Value::String(s.trim().to_string())),
                _ => Err(ExpressionError::UnknownMethod {
                    method: method.clone(),
                    kind: value.kind(),
                }),
            }
        }
    }
}

/// Parse and evaluate expression source text
pub fn evaluate_text(text: &str) -> Result<Value, ExpressionError> {
    let tokens = Lexer::new(text).tokenize()?;
    let node = Parser {
        tokens,
        pos: 0,
        depth: 0,
        text,
    }
    .parse()?;
    eval(&node)
}
