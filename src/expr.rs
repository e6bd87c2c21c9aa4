//! Decimal arithmetic over record fields.
//!
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := factor (('*' | '/') factor)*
//! factor := number | identifier | '(' expr ')'
//! ```

use std::{collections::BTreeSet, fmt};

use rust_decimal::{Decimal, RoundingStrategy};

use crate::{
    data::{Record, parse_decimal_literal},
    error::LoadError,
    model::DEFAULT_SCALE,
};

/// Fractional digits kept for intermediate quotients.
pub const WORKING_SCALE: u32 = 16;

/// Deepest parenthesis nesting accepted by the parser.
pub const MAX_NESTING: usize = 256;

/// Longest expression accepted, in tokens. Bounds the height of operator chains.
pub const MAX_TOKENS: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl Operator {
    fn from_symbol(symbol: char) -> Option<Self> {
        match symbol {
            '+' => Some(Operator::Add),
            '-' => Some(Operator::Subtract),
            '*' => Some(Operator::Multiply),
            '/' => Some(Operator::Divide),
            _ => None,
        }
    }

    pub fn symbol(&self) -> char {
        match self {
            Operator::Add => '+',
            Operator::Subtract => '-',
            Operator::Multiply => '*',
            Operator::Divide => '/',
        }
    }

    fn apply(&self, left: Decimal, right: Decimal, source: &str) -> Result<Decimal, LoadError> {
        let overflow = || LoadError::ArithmeticOverflow(source.to_string());
        match self {
            Operator::Add => left.checked_add(right).ok_or_else(overflow),
            Operator::Subtract => left.checked_sub(right).ok_or_else(overflow),
            Operator::Multiply => left.checked_mul(right).ok_or_else(overflow),
            Operator::Divide => {
                if right.is_zero() {
                    return Err(LoadError::ArithmeticDivideByZero);
                }
                let quotient = left.checked_div(right).ok_or_else(overflow)?;
                Ok(quotient.round_dp_with_strategy(
                    WORKING_SCALE,
                    RoundingStrategy::MidpointAwayFromZero,
                ))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(Decimal),
    Ident(String),
    Op(Operator),
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{n}"),
            Token::Ident(name) => f.write_str(name),
            Token::Op(op) => write!(f, "{}", op.symbol()),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, LoadError> {
    let compact: Vec<char> = source.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(LoadError::parse_error(source, "expression is empty"));
    }
    let mut tokens = Vec::new();
    let mut idx = 0;
    while idx < compact.len() {
        let ch = compact[idx];
        if ch.is_ascii_digit() || ch == '.' {
            let start = idx;
            while idx < compact.len() && (compact[idx].is_ascii_digit() || compact[idx] == '.') {
                idx += 1;
            }
            let literal: String = compact[start..idx].iter().collect();
            let number = parse_decimal_literal(&literal).ok_or_else(|| {
                LoadError::parse_error(source, format!("invalid number '{literal}'"))
            })?;
            tokens.push(Token::Number(number));
        } else if ch.is_ascii_alphabetic() {
            let start = idx;
            while idx < compact.len() && (compact[idx].is_ascii_alphanumeric() || compact[idx] == '_')
            {
                idx += 1;
            }
            tokens.push(Token::Ident(compact[start..idx].iter().collect()));
        } else {
            let token = match ch {
                '(' => Token::LParen,
                ')' => Token::RParen,
                other => Token::Op(Operator::from_symbol(other).ok_or_else(|| {
                    LoadError::parse_error(source, format!("unexpected character '{other}'"))
                })?),
            };
            tokens.push(token);
            idx += 1;
        }
        if tokens.len() > MAX_TOKENS {
            return Err(LoadError::parse_error(
                source,
                format!("expression exceeds {MAX_TOKENS} tokens"),
            ));
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Number(Decimal),
    Field(String),
    Binary {
        op: Operator,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn evaluate(&self, context: &Record, source: &str) -> Result<Decimal, LoadError> {
        match self {
            Node::Number(n) => Ok(*n),
            Node::Field(name) => context
                .get(name)
                .ok_or_else(|| LoadError::FieldNotFound(name.clone()))?
                .to_decimal(name),
            Node::Binary { op, left, right } => {
                let lhs = left.evaluate(context, source)?;
                let rhs = right.evaluate(context, source)?;
                op.apply(lhs, rhs, source)
            }
        }
    }

    fn collect_fields(&self, fields: &mut BTreeSet<String>) {
        match self {
            Node::Number(_) => {}
            Node::Field(name) => {
                fields.insert(name.clone());
            }
            Node::Binary { left, right, .. } => {
                left.collect_fields(fields);
                right.collect_fields(fields);
            }
        }
    }
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn error(&self, message: impl Into<String>) -> LoadError {
        LoadError::parse_error(self.source, message)
    }

    fn parse_expr(&mut self) -> Result<Node, LoadError> {
        let mut node = self.parse_term()?;
        while let Some(Token::Op(op @ (Operator::Add | Operator::Subtract))) = self.peek() {
            let op = *op;
            self.pos += 1;
            let right = self.parse_term()?;
            node = Node::Binary {
                op,
                left: Box::new(node),
                right: Box::new(right),
            };
        }
        Ok(node)
    }

    fn parse_term(&mut self) -> Result<Node, LoadError> {
        let mut node = self.parse_factor()?;
        while let Some(Token::Op(op @ (Operator::Multiply | Operator::Divide))) = self.peek() {
            let op = *op;
            self.pos += 1;
            let right = self.parse_factor()?;
            node = Node::Binary {
                op,
                left: Box::new(node),
                right: Box::new(right),
            };
        }
        Ok(node)
    }

    fn parse_factor(&mut self) -> Result<Node, LoadError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Node::Number(n)),
            Some(Token::Ident(name)) => Ok(Node::Field(name)),
            Some(Token::LParen) => {
                if self.depth >= MAX_NESTING {
                    return Err(self.error(format!(
                        "parentheses nested deeper than {MAX_NESTING} levels"
                    )));
                }
                self.depth += 1;
                let inner = self.parse_expr()?;
                self.depth -= 1;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    Some(other) => Err(self.error(format!("expected ')' but found '{other}'"))),
                    None => Err(self.error("missing closing parenthesis")),
                }
            }
            Some(other) => Err(self.error(format!("unexpected token '{other}'"))),
            None => Err(self.error("unexpected end of expression")),
        }
    }
}

/// A parsed arithmetic expression, reusable across records.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Node,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, LoadError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            source,
            tokens,
            pos: 0,
            depth: 0,
        };
        let root = parser.parse_expr()?;
        if let Some(extra) = parser.peek() {
            return Err(parser.error(format!("unexpected trailing token '{extra}'")));
        }
        Ok(Expression {
            source: source.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates and rounds half-up to `scale` fractional digits.
    pub fn evaluate(&self, context: &Record, scale: u32) -> Result<Decimal, LoadError> {
        let raw = self.root.evaluate(context, &self.source)?;
        Ok(raw
            .round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
            .normalize())
    }

    pub fn field_names(&self) -> BTreeSet<String> {
        let mut fields = BTreeSet::new();
        self.root.collect_fields(&mut fields);
        fields
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parses and evaluates in one step with the default result scale.
pub fn evaluate(expression: &str, context: &Record) -> Result<Decimal, LoadError> {
    Expression::parse(expression)?.evaluate(context, DEFAULT_SCALE)
}

/// Returns every field identifier referenced by the expression.
pub fn extract_field_names(expression: &str) -> Result<BTreeSet<String>, LoadError> {
    Ok(tokenize(expression)?
        .into_iter()
        .filter_map(|token| match token {
            Token::Ident(name) => Some(name),
            _ => None,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn parser_builds_left_associative_tree() {
        let parsed = Expression::parse("a-b-c").unwrap();
        let Node::Binary { op, left, right } = &parsed.root else {
            panic!("expected binary root");
        };
        assert_eq!(*op, Operator::Subtract);
        assert_eq!(**right, Node::Field("c".into()));
        assert!(matches!(**left, Node::Binary { op: Operator::Subtract, .. }));
    }

    #[test]
    fn nesting_is_bounded() {
        let nested = |depth: usize| format!("{}1{}", "(".repeat(depth), ")".repeat(depth));
        assert_eq!(
            evaluate(&nested(MAX_NESTING), &Record::new()).unwrap(),
            Decimal::ONE
        );
        assert!(matches!(
            Expression::parse(&nested(MAX_NESTING + 1)),
            Err(LoadError::ExpressionParseError { .. })
        ));
        assert!(matches!(
            Expression::parse(&nested(10_000)),
            Err(LoadError::ExpressionParseError { .. })
        ));
    }

    #[test]
    fn overlong_chains_are_rejected() {
        let chain = vec!["1"; MAX_TOKENS].join("+");
        assert!(matches!(
            Expression::parse(&chain),
            Err(LoadError::ExpressionParseError { .. })
        ));
        let short = vec!["1"; 1000].join("+");
        assert_eq!(evaluate(&short, &Record::new()).unwrap(), Decimal::from(1000));
    }

    #[test]
    fn whitespace_is_not_significant() {
        let ctx = record(&[("ab", Value::Integer(4))]);
        assert_eq!(evaluate(" a b * 2 ", &ctx).unwrap(), Decimal::from(8));
    }

    #[test]
    fn rejects_unary_minus_and_garbage() {
        for bad in ["-3", "3+", "(1+2", "1+2)", "2a", "a % b", "", "1..2"] {
            assert!(
                matches!(
                    Expression::parse(bad),
                    Err(LoadError::ExpressionParseError { .. })
                ),
                "expected parse error for {bad:?}"
            );
        }
    }

    #[test]
    fn intermediate_division_keeps_working_precision() {
        let ctx = Record::new();
        assert_eq!(evaluate("1/3*3", &ctx).unwrap(), Decimal::from(1));
        assert_eq!(evaluate("2/3", &ctx).unwrap(), Decimal::new(67, 2));
    }

    #[test]
    fn rounding_is_half_up_at_requested_scale() {
        let ctx = Record::new();
        let parsed = Expression::parse("1/8").unwrap();
        assert_eq!(parsed.evaluate(&ctx, 2).unwrap(), Decimal::new(13, 2));
        assert_eq!(parsed.evaluate(&ctx, 0).unwrap(), Decimal::ZERO);
        assert_eq!(parsed.evaluate(&ctx, 3).unwrap(), Decimal::new(125, 3));
    }

    #[test]
    fn field_names_come_from_the_tree() {
        let parsed = Expression::parse("(price+tax)*qty/price").unwrap();
        let names: Vec<_> = parsed.field_names().into_iter().collect();
        assert_eq!(names, vec!["price", "qty", "tax"]);
    }
}
