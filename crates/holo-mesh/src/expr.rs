//! Size-field expressions.
//!
//! The target element size is given as an arithmetic expression over the
//! point coordinates, e.g. `20 + 0.05*sqrt((x-400)^2 + (y-300)^2)`.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! sum     := product (('+' | '-') product)*
//! product := unary (('*' | '/') unary)*
//! unary   := ('-' | '+') unary | power
//! power   := atom ('^' unary)?
//! atom    := number | 'x' | 'y' | 'Pi' | func '(' sum (',' sum)* ')' | '(' sum ')'
//! ```
//!
//! `^` is right-associative and binds tighter than unary minus, so `-2^2`
//! is `-4`. Function names are case-insensitive.

use thiserror::Error;

/// Errors raised while parsing an expression. Offsets are byte offsets into
/// the source text.
#[derive(Debug, Error, PartialEq)]
pub enum ExprError {
    #[error("Unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { offset: usize, ch: char },

    #[error("Invalid number '{text}' at offset {offset}")]
    InvalidNumber { offset: usize, text: String },

    #[error("Unexpected {found} at offset {offset}, expected {expected}")]
    UnexpectedToken {
        offset: usize,
        found: String,
        expected: &'static str,
    },

    #[error("Unknown identifier '{name}' at offset {offset}")]
    UnknownIdentifier { offset: usize, name: String },

    #[error("Function '{name}' takes {expected} argument(s), got {found} (offset {offset})")]
    Arity {
        offset: usize,
        name: String,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
    Comma,
    End,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Num(v) => format!("number {}", v),
            Token::Ident(name) => format!("identifier '{}'", name),
            Token::Op(c) => format!("'{}'", c),
            Token::LParen => "'('".into(),
            Token::RParen => "')'".into(),
            Token::Comma => "','".into(),
            Token::End => "end of expression".into(),
        }
    }
}

fn tokenize(src: &str) -> Result<Vec<(usize, Token)>, ExprError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '+' | '-' | '*' | '/' | '^' => {
                tokens.push((i, Token::Op(c)));
                i += 1;
            }
            '(' => {
                tokens.push((i, Token::LParen));
                i += 1;
            }
            ')' => {
                tokens.push((i, Token::RParen));
                i += 1;
            }
            ',' => {
                tokens.push((i, Token::Comma));
                i += 1;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                    i += 1;
                }
                // Exponent: e, e+, e- followed by at least one digit
                if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
                    let mut j = i + 1;
                    if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
                        j += 1;
                    }
                    if j < bytes.len() && bytes[j].is_ascii_digit() {
                        while j < bytes.len() && bytes[j].is_ascii_digit() {
                            j += 1;
                        }
                        i = j;
                    }
                }
                let text = &src[start..i];
                let value = text.parse().map_err(|_| ExprError::InvalidNumber {
                    offset: start,
                    text: text.to_string(),
                })?;
                tokens.push((start, Token::Num(value)));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                tokens.push((start, Token::Ident(src[start..i].to_string())));
            }
            _ => {
                let ch = src[i..].chars().next().unwrap_or(c);
                return Err(ExprError::UnexpectedChar { offset: i, ch });
            }
        }
    }
    tokens.push((src.len(), Token::End));
    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Func {
    Sqrt,
    Abs,
    Sin,
    Cos,
    Tan,
    Exp,
    Log,
    Min,
    Max,
}

impl Func {
    fn lookup(name: &str) -> Option<Self> {
        let f = match name.to_ascii_lowercase().as_str() {
            "sqrt" => Self::Sqrt,
            "abs" => Self::Abs,
            "sin" => Self::Sin,
            "cos" => Self::Cos,
            "tan" => Self::Tan,
            "exp" => Self::Exp,
            "log" => Self::Log,
            "min" => Self::Min,
            "max" => Self::Max,
            _ => return None,
        };
        Some(f)
    }

    fn arity(self) -> usize {
        match self {
            Self::Min | Self::Max => 2,
            _ => 1,
        }
    }

    fn apply(self, args: &[f64]) -> f64 {
        match (self, args) {
            (Self::Sqrt, [a]) => a.sqrt(),
            (Self::Abs, [a]) => a.abs(),
            (Self::Sin, [a]) => a.sin(),
            (Self::Cos, [a]) => a.cos(),
            (Self::Tan, [a]) => a.tan(),
            (Self::Exp, [a]) => a.exp(),
            (Self::Log, [a]) => a.ln(),
            (Self::Min, [a, b]) => a.min(*b),
            (Self::Max, [a, b]) => a.max(*b),
            _ => f64::NAN,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Num(f64),
    X,
    Y,
    Neg(Box<Expr>),
    Binary(char, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
}

impl Expr {
    fn eval(&self, x: f64, y: f64) -> f64 {
        match self {
            Expr::Num(v) => *v,
            Expr::X => x,
            Expr::Y => y,
            Expr::Neg(e) => -e.eval(x, y),
            Expr::Binary(op, a, b) => {
                let (a, b) = (a.eval(x, y), b.eval(x, y));
                match op {
                    '+' => a + b,
                    '-' => a - b,
                    '*' => a * b,
                    '/' => a / b,
                    _ => a.powf(b),
                }
            }
            Expr::Call(f, args) => {
                let values: Vec<f64> = args.iter().map(|a| a.eval(x, y)).collect();
                f.apply(&values)
            }
        }
    }
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].1
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].0
    }

    fn advance(&mut self) -> (usize, Token) {
        let tok = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn unexpected(&self, expected: &'static str) -> ExprError {
        ExprError::UnexpectedToken {
            offset: self.offset(),
            found: self.peek().describe(),
            expected,
        }
    }

    fn sum(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.product()?;
        while let Token::Op(op @ ('+' | '-')) = *self.peek() {
            self.advance();
            let rhs = self.product()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn product(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.unary()?;
        while let Token::Op(op @ ('*' | '/')) = *self.peek() {
            self.advance();
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        match self.peek() {
            Token::Op('-') => {
                self.advance();
                Ok(Expr::Neg(Box::new(self.unary()?)))
            }
            Token::Op('+') => {
                self.advance();
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Expr, ExprError> {
        let base = self.atom()?;
        if let Token::Op('^') = self.peek() {
            self.advance();
            let exponent = self.unary()?;
            return Ok(Expr::Binary('^', Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Expr, ExprError> {
        let offset = self.offset();
        match self.peek().clone() {
            Token::Num(v) => {
                self.advance();
                Ok(Expr::Num(v))
            }
            Token::LParen => {
                self.advance();
                let inner = self.sum()?;
                self.expect_rparen()?;
                Ok(inner)
            }
            Token::Ident(name) => {
                self.advance();
                match name.as_str() {
                    "x" | "X" => return Ok(Expr::X),
                    "y" | "Y" => return Ok(Expr::Y),
                    "Pi" | "pi" | "PI" => return Ok(Expr::Num(std::f64::consts::PI)),
                    _ => {}
                }
                let func = Func::lookup(&name)
                    .ok_or_else(|| ExprError::UnknownIdentifier { offset, name: name.clone() })?;
                if *self.peek() != Token::LParen {
                    return Err(self.unexpected("'(' after function name"));
                }
                self.advance();
                let mut args = vec![self.sum()?];
                while *self.peek() == Token::Comma {
                    self.advance();
                    args.push(self.sum()?);
                }
                self.expect_rparen()?;
                if args.len() != func.arity() {
                    return Err(ExprError::Arity {
                        offset,
                        name,
                        expected: func.arity(),
                        found: args.len(),
                    });
                }
                Ok(Expr::Call(func, args))
            }
            _ => Err(self.unexpected("a value")),
        }
    }

    fn expect_rparen(&mut self) -> Result<(), ExprError> {
        if *self.peek() != Token::RParen {
            return Err(self.unexpected("')'"));
        }
        self.advance();
        Ok(())
    }
}

/// A parsed size field, evaluable at any point.
#[derive(Debug, Clone, PartialEq)]
pub struct SizeField {
    source: String,
    expr: Expr,
}

impl SizeField {
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        let mut parser = Parser {
            tokens: tokenize(source)?,
            pos: 0,
        };
        let expr = parser.sum()?;
        if *parser.peek() != Token::End {
            return Err(parser.unexpected("end of expression"));
        }
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn eval(&self, x: f64, y: f64) -> f64 {
        self.expr.eval(x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn eval(src: &str, x: f64, y: f64) -> f64 {
        SizeField::parse(src).unwrap().eval(x, y)
    }

    #[test]
    fn test_precedence() {
        assert_relative_eq!(eval("1 + 2 * 3", 0.0, 0.0), 7.0);
        assert_relative_eq!(eval("(1 + 2) * 3", 0.0, 0.0), 9.0);
        assert_relative_eq!(eval("2 ^ 3 ^ 2", 0.0, 0.0), 512.0);
        assert_relative_eq!(eval("-2^2", 0.0, 0.0), -4.0);
        assert_relative_eq!(eval("8 / 4 / 2", 0.0, 0.0), 1.0);
        assert_relative_eq!(eval("2^-1", 0.0, 0.0), 0.5);
    }

    #[test]
    fn test_variables_and_functions() {
        assert_relative_eq!(eval("sqrt(x^2 + y^2)", 3.0, 4.0), 5.0);
        assert_relative_eq!(eval("max(x, y) - min(x, y)", 3.0, 10.0), 7.0);
        assert_relative_eq!(eval("Cos(Pi)", 0.0, 0.0), -1.0);
        assert_relative_eq!(eval("log(exp(2.5))", 0.0, 0.0), 2.5);
        assert_relative_eq!(eval("1.5e2 + abs(-x)", 2.0, 0.0), 152.0);
    }

    #[test]
    fn test_error_offsets() {
        assert_eq!(
            SizeField::parse("1 + $"),
            Err(ExprError::UnexpectedChar { offset: 4, ch: '$' })
        );
        assert!(matches!(
            SizeField::parse("2 * foo(x)"),
            Err(ExprError::UnknownIdentifier { offset: 4, .. })
        ));
        assert!(matches!(
            SizeField::parse("(x + 1"),
            Err(ExprError::UnexpectedToken { offset: 6, .. })
        ));
        assert!(matches!(
            SizeField::parse("min(x)"),
            Err(ExprError::Arity { expected: 2, found: 1, .. })
        ));
        assert!(matches!(
            SizeField::parse("x y"),
            Err(ExprError::UnexpectedToken { offset: 2, .. })
        ));
        assert!(matches!(
            SizeField::parse("1.2.3"),
            Err(ExprError::InvalidNumber { offset: 0, .. })
        ));
    }

    #[test]
    fn test_empty_expression() {
        assert!(matches!(
            SizeField::parse("   "),
            Err(ExprError::UnexpectedToken { offset: 3, .. })
        ));
    }
}
