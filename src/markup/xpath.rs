//! Path expressions over a [`MarkupDocument`].
//!
//! Supported subset: absolute and relative location paths with `/` and `//`,
//! name tests (`tag`, `*`), `.` and `..`, and predicates built from
//! attributes (`@name`), `text()`, string and number literals, comparisons,
//! `and`/`or`, positional predicates (`[2]`, `[last()]`) and the functions
//! `contains`, `starts-with`, `not`, `normalize-space`, `string-length`,
//! `count`, `string`, `position`, `last`, `true` and `false`.

use thiserror::Error;

use crate::markup::parse::{DOCUMENT_NODE, MarkupDocument};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PathError {
    #[error("invalid path expression '{expr}': {reason}")]
    Invalid { expr: String, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Slash,
    DoubleSlash,
    LBracket,
    RBracket,
    LParen,
    RParen,
    At,
    Comma,
    Dot,
    DotDot,
    Star,
    Op(CmpOp),
    Name(String),
    Str(String),
    Num(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Axis {
    Child,
    DescendantOrSelf,
}

#[derive(Debug, Clone, PartialEq)]
enum NodeTest {
    Name(String),
    Any,
    SelfNode,
    Parent,
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
struct LocationPath {
    absolute: bool,
    steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    Attr(String),
    Literal(String),
    Number(f64),
    Call(String, Vec<Expr>),
    Path(LocationPath),
}

/// A compiled path expression.
#[derive(Debug, Clone, PartialEq)]
pub struct PathExpr {
    source: String,
    path: LocationPath,
}

impl PathExpr {
    pub fn parse(source: &str) -> Result<Self, PathError> {
        let tokens = tokenize(source)?;
        let mut parser = ExprParser {
            source,
            tokens,
            pos: 0,
        };
        let path = parser.location_path()?;
        if parser.pos != parser.tokens.len() {
            return Err(parser.error("trailing input"));
        }
        if path.steps.is_empty() {
            return Err(parser.error("empty path"));
        }
        Ok(Self {
            source: source.to_string(),
            path,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Matched nodes in document order.
    pub fn evaluate(&self, doc: &MarkupDocument) -> Vec<usize> {
        let start = if self.path.absolute {
            DOCUMENT_NODE
        } else {
            match doc.root_element() {
                Some(root) => root,
                None => return Vec::new(),
            }
        };
        eval_path(doc, &self.path, start)
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, PathError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let err = |reason: String| PathError::Invalid {
        expr: source.to_string(),
        reason,
    };
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '/' => {
                if chars.get(i + 1) == Some(&'/') {
                    tokens.push(Token::DoubleSlash);
                    i += 2;
                } else {
                    tokens.push(Token::Slash);
                    i += 1;
                }
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '@' => {
                tokens.push(Token::At);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Op(CmpOp::Eq));
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op(CmpOp::Ne));
                i += 2;
            }
            '<' | '>' => {
                let with_eq = chars.get(i + 1) == Some(&'=');
                let op = match (c, with_eq) {
                    ('<', true) => CmpOp::Le,
                    ('<', false) => CmpOp::Lt,
                    (_, true) => CmpOp::Ge,
                    (_, false) => CmpOp::Gt,
                };
                tokens.push(Token::Op(op));
                i += if with_eq { 2 } else { 1 };
            }
            '\'' | '"' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == c)
                    .ok_or_else(|| err("unterminated string literal".into()))?;
                tokens.push(Token::Str(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            '.' => {
                if chars.get(i + 1) == Some(&'.') {
                    tokens.push(Token::DotDot);
                    i += 2;
                } else if chars.get(i + 1).is_some_and(|ch| ch.is_ascii_digit()) {
                    let (num, len) = read_number(&chars[i..]);
                    tokens.push(Token::Num(num));
                    i += len;
                } else {
                    tokens.push(Token::Dot);
                    i += 1;
                }
            }
            _ if c.is_ascii_digit() => {
                let (num, len) = read_number(&chars[i..]);
                tokens.push(Token::Num(num));
                i += len;
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '-' | ':'))
                {
                    i += 1;
                }
                tokens.push(Token::Name(chars[start..i].iter().collect()));
            }
            _ => return Err(err(format!("unexpected character '{}'", c))),
        }
    }
    Ok(tokens)
}

fn read_number(chars: &[char]) -> (f64, usize) {
    let len = chars
        .iter()
        .position(|c| !(c.is_ascii_digit() || *c == '.'))
        .unwrap_or(chars.len());
    let text: String = chars[..len].iter().collect();
    (text.parse().unwrap_or(0.0), len)
}

struct ExprParser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> ExprParser<'a> {
    fn error(&self, reason: &str) -> PathError {
        PathError::Invalid {
            expr: self.source.to_string(),
            reason: format!("{} (token {})", reason, self.pos),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), PathError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {}", what)))
        }
    }

    fn location_path(&mut self) -> Result<LocationPath, PathError> {
        let mut steps = Vec::new();
        let absolute = matches!(self.peek(), Some(Token::Slash | Token::DoubleSlash));
        let mut axis = Axis::Child;
        if absolute && self.next() == Some(Token::DoubleSlash) {
            axis = Axis::DescendantOrSelf;
        }
        loop {
            steps.push(self.step(axis)?);
            match self.peek() {
                Some(Token::Slash) => {
                    self.pos += 1;
                    axis = Axis::Child;
                }
                Some(Token::DoubleSlash) => {
                    self.pos += 1;
                    axis = Axis::DescendantOrSelf;
                }
                _ => break,
            }
        }
        Ok(LocationPath { absolute, steps })
    }

    fn step(&mut self, axis: Axis) -> Result<Step, PathError> {
        let test = match self.next() {
            Some(Token::Name(name)) => NodeTest::Name(name),
            Some(Token::Star) => NodeTest::Any,
            Some(Token::Dot) => NodeTest::SelfNode,
            Some(Token::DotDot) => NodeTest::Parent,
            _ => return Err(self.error("expected a step")),
        };
        let mut predicates = Vec::new();
        while self.eat(&Token::LBracket) {
            predicates.push(self.or_expr()?);
            self.expect(&Token::RBracket, "']'")?;
        }
        Ok(Step {
            axis,
            test,
            predicates,
        })
    }

    fn or_expr(&mut self) -> Result<Expr, PathError> {
        let mut left = self.and_expr()?;
        while self.peek() == Some(&Token::Name("or".into())) {
            self.pos += 1;
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, PathError> {
        let mut left = self.cmp_expr()?;
        while self.peek() == Some(&Token::Name("and".into())) {
            self.pos += 1;
            let right = self.cmp_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn cmp_expr(&mut self) -> Result<Expr, PathError> {
        let left = self.primary()?;
        if let Some(Token::Op(op)) = self.peek().cloned() {
            self.pos += 1;
            let right = self.primary()?;
            return Ok(Expr::Compare(op, Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn primary(&mut self) -> Result<Expr, PathError> {
        match self.peek().cloned() {
            Some(Token::At) => {
                self.pos += 1;
                match self.next() {
                    Some(Token::Name(name)) => Ok(Expr::Attr(name)),
                    _ => Err(self.error("expected attribute name after '@'")),
                }
            }
            Some(Token::Str(s)) => {
                self.pos += 1;
                Ok(Expr::Literal(s))
            }
            Some(Token::Num(n)) => {
                self.pos += 1;
                Ok(Expr::Number(n))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.or_expr()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Name(name)) if self.tokens.get(self.pos + 1) == Some(&Token::LParen) => {
                self.pos += 2;
                let mut args = Vec::new();
                if !self.eat(&Token::RParen) {
                    loop {
                        args.push(self.or_expr()?);
                        if self.eat(&Token::Comma) {
                            continue;
                        }
                        self.expect(&Token::RParen, "')'")?;
                        break;
                    }
                }
                Ok(Expr::Call(name, args))
            }
            Some(Token::Name(_) | Token::Star | Token::Dot | Token::DotDot | Token::Slash | Token::DoubleSlash) => {
                Ok(Expr::Path(self.location_path()?))
            }
            _ => Err(self.error("expected an expression")),
        }
    }
}

// ============================================================================
// Evaluation
// ============================================================================

#[derive(Debug, Clone)]
enum XValue {
    Nodes(Vec<usize>),
    Strings(Vec<String>),
    Str(String),
    Num(f64),
    Bool(bool),
}

impl XValue {
    fn strings(&self, doc: &MarkupDocument) -> Option<Vec<String>> {
        match self {
            XValue::Nodes(nodes) => Some(nodes.iter().map(|&n| doc.string_value(n)).collect()),
            XValue::Strings(s) => Some(s.clone()),
            _ => None,
        }
    }

    fn to_bool(&self) -> bool {
        match self {
            XValue::Nodes(n) => !n.is_empty(),
            XValue::Strings(s) => !s.is_empty(),
            XValue::Str(s) => !s.is_empty(),
            XValue::Num(n) => *n != 0.0 && !n.is_nan(),
            XValue::Bool(b) => *b,
        }
    }

    fn to_string(&self, doc: &MarkupDocument) -> String {
        match self {
            XValue::Nodes(n) => n.first().map(|&i| doc.string_value(i)).unwrap_or_default(),
            XValue::Strings(s) => s.first().cloned().unwrap_or_default(),
            XValue::Str(s) => s.clone(),
            XValue::Num(n) => format_number(*n),
            XValue::Bool(b) => b.to_string(),
        }
    }

    fn to_number(&self, doc: &MarkupDocument) -> f64 {
        match self {
            XValue::Num(n) => *n,
            XValue::Bool(b) => f64::from(u8::from(*b)),
            other => other.to_string(doc).trim().parse().unwrap_or(f64::NAN),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

struct Context {
    node: usize,
    position: usize,
    size: usize,
}

fn eval_path(doc: &MarkupDocument, path: &LocationPath, start: usize) -> Vec<usize> {
    let mut current = vec![start];
    for step in &path.steps {
        let mut next = Vec::new();
        for &node in &current {
            match step.axis {
                Axis::Child => next.extend(eval_step(doc, step, node)),
                Axis::DescendantOrSelf => {
                    let mut stack = vec![node];
                    while let Some(n) = stack.pop() {
                        next.extend(eval_step(doc, step, n));
                        stack.extend(doc.node(n).children.iter().rev());
                    }
                }
            }
        }
        next.sort_unstable();
        next.dedup();
        current = next;
    }
    current
}

fn eval_step(doc: &MarkupDocument, step: &Step, node: usize) -> Vec<usize> {
    let candidates: Vec<usize> = match &step.test {
        NodeTest::SelfNode => vec![node],
        NodeTest::Parent => doc.node(node).parent.into_iter().collect(),
        NodeTest::Any => doc.node(node).children.clone(),
        NodeTest::Name(name) => doc
            .node(node)
            .children
            .iter()
            .copied()
            .filter(|&c| doc.node(c).tag == *name)
            .collect(),
    };
    step.predicates.iter().fold(candidates, |nodes, pred| {
        let size = nodes.len();
        nodes
            .into_iter()
            .enumerate()
            .filter(|(i, n)| {
                let ctx = Context {
                    node: *n,
                    position: i + 1,
                    size,
                };
                match eval_expr(doc, pred, &ctx) {
                    XValue::Num(p) => p == ctx.position as f64,
                    other => other.to_bool(),
                }
            })
            .map(|(_, n)| n)
            .collect()
    })
}

fn eval_expr(doc: &MarkupDocument, expr: &Expr, ctx: &Context) -> XValue {
    match expr {
        Expr::Or(l, r) => XValue::Bool(eval_expr(doc, l, ctx).to_bool() || eval_expr(doc, r, ctx).to_bool()),
        Expr::And(l, r) => XValue::Bool(eval_expr(doc, l, ctx).to_bool() && eval_expr(doc, r, ctx).to_bool()),
        Expr::Compare(op, l, r) => {
            let lv = eval_expr(doc, l, ctx);
            let rv = eval_expr(doc, r, ctx);
            XValue::Bool(compare(doc, *op, &lv, &rv))
        }
        Expr::Attr(name) => XValue::Strings(doc.node(ctx.node).attr(name).map(str::to_string).into_iter().collect()),
        Expr::Literal(s) => XValue::Str(s.clone()),
        Expr::Number(n) => XValue::Num(*n),
        Expr::Path(path) => XValue::Nodes(eval_path(doc, path, if path.absolute { DOCUMENT_NODE } else { ctx.node })),
        Expr::Call(name, args) => call(doc, name, args, ctx),
    }
}

fn call(doc: &MarkupDocument, name: &str, args: &[Expr], ctx: &Context) -> XValue {
    let arg = |i: usize| args.get(i).map(|a| eval_expr(doc, a, ctx));
    let arg_str = |i: usize| {
        arg(i)
            .map(|v| v.to_string(doc))
            .unwrap_or_else(|| doc.string_value(ctx.node))
    };
    match name {
        "text" => {
            let text = &doc.node(ctx.node).text;
            XValue::Strings(if text.is_empty() { vec![] } else { vec![text.clone()] })
        }
        "position" => XValue::Num(ctx.position as f64),
        "last" => XValue::Num(ctx.size as f64),
        "true" => XValue::Bool(true),
        "false" => XValue::Bool(false),
        "not" => XValue::Bool(!arg(0).is_some_and(|v| v.to_bool())),
        "contains" => XValue::Bool(arg_str(0).contains(&arg_str(1))),
        "starts-with" => XValue::Bool(arg_str(0).starts_with(&arg_str(1))),
        "string" => XValue::Str(arg_str(0)),
        "normalize-space" => XValue::Str(arg_str(0).split_whitespace().collect::<Vec<_>>().join(" ")),
        "string-length" => XValue::Num(arg_str(0).chars().count() as f64),
        "count" => match arg(0) {
            Some(XValue::Nodes(n)) => XValue::Num(n.len() as f64),
            Some(XValue::Strings(s)) => XValue::Num(s.len() as f64),
            _ => XValue::Num(0.0),
        },
        _ => XValue::Bool(false),
    }
}

fn compare(doc: &MarkupDocument, op: CmpOp, l: &XValue, r: &XValue) -> bool {
    match (l.strings(doc), r.strings(doc)) {
        (Some(ls), Some(rs)) => ls
            .iter()
            .any(|a| rs.iter().any(|b| compare_scalar(op, &XValue::Str(a.clone()), &XValue::Str(b.clone()), doc))),
        (Some(ls), None) => ls.iter().any(|a| compare_scalar(op, &XValue::Str(a.clone()), r, doc)),
        (None, Some(rs)) => rs.iter().any(|b| compare_scalar(op, l, &XValue::Str(b.clone()), doc)),
        (None, None) => compare_scalar(op, l, r, doc),
    }
}

fn compare_scalar(op: CmpOp, l: &XValue, r: &XValue, doc: &MarkupDocument) -> bool {
    match op {
        CmpOp::Eq | CmpOp::Ne => {
            let equal = match (l, r) {
                (XValue::Bool(_), _) | (_, XValue::Bool(_)) => l.to_bool() == r.to_bool(),
                (XValue::Num(_), _) | (_, XValue::Num(_)) => l.to_number(doc) == r.to_number(doc),
                _ => l.to_string(doc) == r.to_string(doc),
            };
            (op == CmpOp::Eq) == equal
        }
        CmpOp::Lt => l.to_number(doc) < r.to_number(doc),
        CmpOp::Le => l.to_number(doc) <= r.to_number(doc),
        CmpOp::Gt => l.to_number(doc) > r.to_number(doc),
        CmpOp::Ge => l.to_number(doc) >= r.to_number(doc),
    }
}
