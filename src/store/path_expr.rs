//! Purpose: Evaluate JSONPath predicates (`data @@ '$.year > 1989'`) for the in-process store.
//! Exports: `PathPredicate`, `compile`.
//! Role: Parses the predicate subset once, then evaluates it against each row in lax mode.
//! Invariants: Unsupported constructs and syntax errors are usage errors at compile time.
//! Invariants: Missing members select nothing; `[*]` and `[n]` treat a non-array as `[value]`.
//! Invariants: Predicates are three-valued; only `true` matches, like `@@` returning null.
//! Notes: Comparisons of different JSON types are unknown, except null which is only `!=`.
use std::cmp::Ordering;
use std::fmt;

use serde_json::Value;

use crate::core::error::{Error, ErrorKind};

#[derive(Clone)]
pub(crate) struct PathPredicate {
    expr: String,
    root: Expr,
}

impl fmt::Debug for PathPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathPredicate")
            .field("expr", &self.expr)
            .finish()
    }
}

impl PathPredicate {
    pub(crate) fn matches(&self, document: &Value) -> bool {
        self.root.eval(document) == Truth::True
    }
}

pub(crate) fn compile(expr: &str) -> Result<PathPredicate, Error> {
    let tokens = tokenize(expr)?;
    if tokens.is_empty() {
        return Err(Error::new(ErrorKind::Usage).with_message("path query must not be empty"));
    }
    let mut parser = Parser {
        expr,
        tokens,
        pos: 0,
    };
    let root = parser.parse_or()?;
    if let Some(token) = parser.peek() {
        return Err(parser.error(&format!("unexpected {token}")));
    }
    Ok(PathPredicate {
        expr: expr.to_string(),
        root,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Truth {
    True,
    False,
    Unknown,
}

impl std::ops::Not for Truth {
    type Output = Self;

    fn not(self) -> Self {
        match self {
            Self::True => Self::False,
            Self::False => Self::True,
            Self::Unknown => Self::Unknown,
        }
    }
}

impl From<bool> for Truth {
    fn from(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Root,
    Dot,
    Star,
    LBracket,
    RBracket,
    LParen,
    RParen,
    And,
    Or,
    Not,
    Cmp(CmpOp),
    Word(String),
    Str(String),
    Num(f64),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => f.write_str("`$`"),
            Self::Dot => f.write_str("`.`"),
            Self::Star => f.write_str("`*`"),
            Self::LBracket => f.write_str("`[`"),
            Self::RBracket => f.write_str("`]`"),
            Self::LParen => f.write_str("`(`"),
            Self::RParen => f.write_str("`)`"),
            Self::And => f.write_str("`&&`"),
            Self::Or => f.write_str("`||`"),
            Self::Not => f.write_str("`!`"),
            Self::Cmp(op) => write!(f, "`{}`", op.symbol()),
            Self::Word(word) => write!(f, "`{word}`"),
            Self::Str(s) => write!(f, "string {s:?}"),
            Self::Num(n) => write!(f, "number {n}"),
        }
    }
}

fn tokenize(expr: &str) -> Result<Vec<Token>, Error> {
    let unsupported = |what: &str| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("unsupported path query construct {what} in `{expr}`"))
    };
    let chars: Vec<(usize, char)> = expr.char_indices().collect();
    let mut tokens = Vec::new();
    let mut idx = 0;
    while idx < chars.len() {
        let (at, ch) = chars[idx];
        let next = chars.get(idx + 1).map(|(_, c)| *c);
        let mut width = 1;
        let token = match (ch, next) {
            (c, _) if c.is_whitespace() => {
                idx += 1;
                continue;
            }
            ('$', _) => Token::Root,
            ('.', _) => Token::Dot,
            ('*', _) => Token::Star,
            ('[', _) => Token::LBracket,
            (']', _) => Token::RBracket,
            ('(', _) => Token::LParen,
            (')', _) => Token::RParen,
            ('&', Some('&')) => {
                width = 2;
                Token::And
            }
            ('|', Some('|')) => {
                width = 2;
                Token::Or
            }
            ('=', Some('=')) => {
                width = 2;
                Token::Cmp(CmpOp::Eq)
            }
            ('!', Some('=')) | ('<', Some('>')) => {
                width = 2;
                Token::Cmp(CmpOp::Ne)
            }
            ('<', Some('=')) => {
                width = 2;
                Token::Cmp(CmpOp::Le)
            }
            ('>', Some('=')) => {
                width = 2;
                Token::Cmp(CmpOp::Ge)
            }
            ('<', _) => Token::Cmp(CmpOp::Lt),
            ('>', _) => Token::Cmp(CmpOp::Gt),
            ('!', _) => Token::Not,
            ('"', _) => {
                let mut end = idx + 1;
                let mut escaped = false;
                loop {
                    let Some((_, c)) = chars.get(end) else {
                        return Err(unsupported("unterminated string"));
                    };
                    match c {
                        '\\' if !escaped => escaped = true,
                        '"' if !escaped => break,
                        _ => escaped = false,
                    }
                    end += 1;
                }
                let close = chars[end].0;
                let literal: String = serde_json::from_str(&expr[at..=close])
                    .map_err(|_| unsupported("string escape"))?;
                width = end + 1 - idx;
                Token::Str(literal)
            }
            (c, n) if c.is_ascii_digit() || (c == '-' && n.is_some_and(|n| n.is_ascii_digit())) => {
                let mut end = idx + 1;
                while let Some((_, c)) = chars.get(end) {
                    let exponent_sign = matches!(c, '+' | '-')
                        && matches!(chars.get(end - 1), Some((_, 'e' | 'E')));
                    if !(c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E') || exponent_sign) {
                        break;
                    }
                    end += 1;
                }
                let stop = chars.get(end).map_or(expr.len(), |(pos, _)| *pos);
                let text = &expr[at..stop];
                let number = text
                    .parse::<f64>()
                    .map_err(|_| unsupported(&format!("number `{text}`")))?;
                width = end - idx;
                Token::Num(number)
            }
            (c, _) if c.is_alphabetic() || c == '_' => {
                let mut end = idx + 1;
                while let Some((_, c)) = chars.get(end) {
                    if !(c.is_alphanumeric() || *c == '_') {
                        break;
                    }
                    end += 1;
                }
                let stop = chars.get(end).map_or(expr.len(), |(pos, _)| *pos);
                width = end - idx;
                Token::Word(expr[at..stop].to_string())
            }
            (c, _) => return Err(unsupported(&format!("`{c}`"))),
        };
        tokens.push(token);
        idx += width;
    }
    Ok(tokens)
}

#[derive(Clone, Debug)]
enum Step {
    Member(String),
    AnyMember,
    Element(usize),
    AnyElement,
}

#[derive(Clone, Debug)]
enum Operand {
    Path(Vec<Step>),
    Literal(Value),
}

impl Operand {
    fn select<'a>(&'a self, document: &'a Value) -> Vec<&'a Value> {
        let steps = match self {
            Self::Literal(value) => return vec![value],
            Self::Path(steps) => steps,
        };
        let mut current = vec![document];
        for step in steps {
            let mut next = Vec::new();
            for value in current {
                match (step, value) {
                    (Step::Member(key), Value::Object(fields)) => next.extend(fields.get(key)),
                    (Step::Member(key), Value::Array(items)) => next.extend(
                        items
                            .iter()
                            .filter_map(|item| item.as_object().and_then(|o| o.get(key))),
                    ),
                    (Step::AnyMember, Value::Object(fields)) => next.extend(fields.values()),
                    (Step::AnyMember, Value::Array(items)) => next.extend(
                        items
                            .iter()
                            .filter_map(Value::as_object)
                            .flat_map(|fields| fields.values()),
                    ),
                    (Step::Element(at), Value::Array(items)) => next.extend(items.get(*at)),
                    (Step::Element(0), other) => next.push(other),
                    (Step::AnyElement, Value::Array(items)) => next.extend(items),
                    (Step::AnyElement, other) => next.push(other),
                    _ => {}
                }
            }
            current = next;
        }
        current
    }
}

#[derive(Clone, Debug)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare(Operand, CmpOp, Operand),
    Bare(Operand),
}

impl Expr {
    fn eval(&self, document: &Value) -> Truth {
        match self {
            Self::Or(left, right) => match (left.eval(document), right.eval(document)) {
                (Truth::True, _) | (_, Truth::True) => Truth::True,
                (Truth::False, Truth::False) => Truth::False,
                _ => Truth::Unknown,
            },
            Self::And(left, right) => match (left.eval(document), right.eval(document)) {
                (Truth::False, _) | (_, Truth::False) => Truth::False,
                (Truth::True, Truth::True) => Truth::True,
                _ => Truth::Unknown,
            },
            Self::Not(inner) => !inner.eval(document),
            Self::Compare(left, op, right) => {
                let right = unwrap_arrays(right.select(document));
                let mut unknown = false;
                for l in unwrap_arrays(left.select(document)) {
                    for r in &right {
                        match compare_items(l, *op, r) {
                            Truth::True => return Truth::True,
                            Truth::Unknown => unknown = true,
                            Truth::False => {}
                        }
                    }
                }
                if unknown {
                    Truth::Unknown
                } else {
                    Truth::False
                }
            }
            // A lone path is a predicate only when its first item is a boolean.
            Self::Bare(operand) => match operand.select(document).first() {
                Some(Value::Bool(b)) => Truth::from(*b),
                _ => Truth::Unknown,
            },
        }
    }
}

/// Comparison operands unwrap one array level before items are paired.
fn unwrap_arrays(items: Vec<&Value>) -> Vec<&Value> {
    items
        .into_iter()
        .flat_map(|item| match item {
            Value::Array(elements) => elements.iter().collect(),
            other => vec![other],
        })
        .collect()
}

fn compare_items(left: &Value, op: CmpOp, right: &Value) -> Truth {
    let ordering = match (left, right) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => {
            match (a.as_f64(), b.as_f64()) {
                (Some(a), Some(b)) => match a.partial_cmp(&b) {
                    Some(ordering) => ordering,
                    None => return Truth::Unknown,
                },
                _ => return Truth::Unknown,
            }
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Null, _) | (_, Value::Null) => return Truth::from(op == CmpOp::Ne),
        _ => return Truth::Unknown,
    };
    Truth::from(op.holds(ordering))
}

struct Parser<'e> {
    expr: &'e str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, what: &str) -> Error {
        Error::new(ErrorKind::Usage)
            .with_message(format!("invalid path query `{}`: {what}", self.expr))
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn advance(&mut self) -> Result<Token, Error> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| self.error("unexpected end of input"))?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, token: &Token) -> Result<(), Error> {
        match self.advance()? {
            found if &found == token => Ok(()),
            found => Err(self.error(&format!("expected {token}, found {found}"))),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_unary()?;
        while self.eat(&Token::And) {
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, Error> {
        if self.eat(&Token::Not) {
            self.expect(&Token::LParen)?;
            let inner = self.parse_or()?;
            self.expect(&Token::RParen)?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        if self.eat(&Token::LParen) {
            let inner = self.parse_or()?;
            self.expect(&Token::RParen)?;
            return Ok(inner);
        }
        let left = self.parse_operand()?;
        match self.peek() {
            Some(Token::Cmp(op)) => {
                let op = *op;
                self.pos += 1;
                let right = self.parse_operand()?;
                Ok(Expr::Compare(left, op, right))
            }
            _ => Ok(Expr::Bare(left)),
        }
    }

    fn parse_operand(&mut self) -> Result<Operand, Error> {
        match self.advance()? {
            Token::Root => self.parse_steps().map(Operand::Path),
            Token::Str(s) => Ok(Operand::Literal(Value::String(s))),
            Token::Num(n) => serde_json::Number::from_f64(n)
                .map(|n| Operand::Literal(Value::Number(n)))
                .ok_or_else(|| self.error("number out of range")),
            Token::Word(word) => match word.as_str() {
                "true" => Ok(Operand::Literal(Value::Bool(true))),
                "false" => Ok(Operand::Literal(Value::Bool(false))),
                "null" => Ok(Operand::Literal(Value::Null)),
                _ => Err(self.error(&format!("unsupported `{word}`"))),
            },
            found => Err(self.error(&format!("expected a path or literal, found {found}"))),
        }
    }

    fn parse_steps(&mut self) -> Result<Vec<Step>, Error> {
        let mut steps = Vec::new();
        loop {
            if self.eat(&Token::Dot) {
                let step = match self.advance()? {
                    Token::Word(key) | Token::Str(key) => Step::Member(key),
                    Token::Star => Step::AnyMember,
                    found => return Err(self.error(&format!("expected a member, found {found}"))),
                };
                steps.push(step);
            } else if self.eat(&Token::LBracket) {
                let step = match self.advance()? {
                    Token::Star => Step::AnyElement,
                    Token::Num(n) if n >= 0.0 && n.fract() == 0.0 => Step::Element(n as usize),
                    found => return Err(self.error(&format!("unsupported subscript {found}"))),
                };
                self.expect(&Token::RBracket)?;
                steps.push(step);
            } else {
                return Ok(steps);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::compile;
    use crate::core::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn unsupported_constructs_are_usage_errors() {
        for expr in [
            "$.a ? (@ > 1)",
            "$.a | 1",
            "",
            "   ",
            "$.year >",
            "$.a + 1 > 2",
            "$.a like_regex \"x\"",
            "$.a == 1 $.b",
            "$.a[-1] == 1",
            "$.a == \"open",
            "($.a == 1",
        ] {
            let err = compile(expr).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Usage, "{expr}");
        }
    }

    #[test]
    fn predicate_matches_comparisons() {
        let pred = compile("$.year > 1989").unwrap();
        assert!(pred.matches(&json!({"_id": "a", "year": 1990})));
        assert!(pred.matches(&json!({"_id": "a", "year": 1989.5})));
        assert!(!pred.matches(&json!({"_id": "b", "year": 1980})));
        assert!(!pred.matches(&json!({"_id": "c"})));
    }

    #[test]
    fn integers_and_floats_compare_equal() {
        let pred = compile("$.year == 1990").unwrap();
        assert!(pred.matches(&json!({"year": 1990.0})));
        assert!(pred.matches(&json!({"year": 1990})));
        assert!(compile("$.n < 1e3").unwrap().matches(&json!({"n": -2.5})));
    }

    #[test]
    fn predicate_combines_and_or() {
        let pred = compile("$.year >= 1990 && $.kind == \"film\"").unwrap();
        assert!(pred.matches(&json!({"year": 1990, "kind": "film"})));
        assert!(!pred.matches(&json!({"year": 1990, "kind": "book"})));

        let pred = compile("($.year < 1900) || $.kind == \"book\"").unwrap();
        assert!(pred.matches(&json!({"year": 1990, "kind": "book"})));

        let pred = compile("$.kind == \"film\" || $.kind == \"book\" && $.year > 2000").unwrap();
        assert!(pred.matches(&json!({"kind": "film", "year": 1990})));
        assert!(!pred.matches(&json!({"kind": "book", "year": 1990})));
    }

    #[test]
    fn missing_member_only_affects_its_own_operand() {
        let pred = compile("$.missing == 1 || $.kind == \"book\"").unwrap();
        assert!(pred.matches(&json!({"kind": "book"})));

        let pred = compile("$.missing == 1 && $.kind == \"book\"").unwrap();
        assert!(!pred.matches(&json!({"kind": "book"})));
    }

    #[test]
    fn mismatched_types_never_match() {
        let pred = compile("$.year > 1989").unwrap();
        assert!(!pred.matches(&json!({"year": "unknown"})));
        assert!(!pred.matches(&json!({"year": {"from": 1990}})));
        assert!(pred.matches(&json!({"year": ["unknown", 1990]})));

        let pred = compile("$.year < 1989").unwrap();
        assert!(!pred.matches(&json!({"year": null})));
        assert!(!pred.matches(&json!({"year": true})));

        // Unknown stays unknown under negation.
        let pred = compile("!($.year > 1989)").unwrap();
        assert!(!pred.matches(&json!({"year": "unknown"})));
        assert!(pred.matches(&json!({"year": 1980})));
    }

    #[test]
    fn null_equals_only_null() {
        assert!(compile("$.a == null").unwrap().matches(&json!({"a": null})));
        assert!(!compile("$.a == null").unwrap().matches(&json!({"a": 0})));
        assert!(compile("$.a != null").unwrap().matches(&json!({"a": 0})));
        assert!(!compile("$.a != 1").unwrap().matches(&json!({"a": "1"})));
        assert!(compile("$.a != 1").unwrap().matches(&json!({"a": null})));
    }

    #[test]
    fn nested_members_and_indexes() {
        let pred = compile("$.owner.name == \"Bob\" && $.tags[0] == \"red\"").unwrap();
        assert!(pred.matches(&json!({"owner": {"name": "Bob"}, "tags": ["red"]})));
        assert!(!pred.matches(&json!({"owner": {"name": "Bob"}, "tags": []})));
        assert!(pred.matches(&json!({"owner": {"name": "Bob"}, "tags": "red"})));

        let pred = compile("$.\"first name\" == \"Ann\"").unwrap();
        assert!(pred.matches(&json!({"first name": "Ann"})));
    }

    #[test]
    fn wildcard_matches_any_element() {
        let pred = compile("$.tags[*] == \"red\"").unwrap();
        assert!(pred.matches(&json!({"tags": ["blue", "red"]})));
        assert!(!pred.matches(&json!({"tags": ["blue"]})));
        assert!(pred.matches(&json!({"tags": "red"})));

        let pred = compile("$.cast.name == \"Pacino\"").unwrap();
        assert!(pred.matches(&json!({"cast": [{"name": "De Niro"}, {"name": "Pacino"}]})));

        let pred = compile("$.ratings.* > 8").unwrap();
        assert!(pred.matches(&json!({"ratings": {"imdb": 8.3, "critics": 7}})));
    }

    #[test]
    fn bare_paths_match_only_true_booleans() {
        let pred = compile("$.released").unwrap();
        assert!(pred.matches(&json!({"released": true})));
        assert!(!pred.matches(&json!({"released": false})));
        assert!(!compile("$.year").unwrap().matches(&json!({"year": 1990})));
    }
}
