use crate::script::ast::{Arg, BinOp, CmpOp, ExceptClause, Expr, FStringPart, Param, Stmt, StmtKind, Target, UnaryOp};
use crate::script::error::ScriptError;
use crate::script::lexer::{Tok, Token, tokenize};

const KEYWORDS: [&str; 27] = [
    "and", "as", "assert", "break", "class", "continue", "def", "del", "elif", "else", "except", "finally", "for",
    "from", "global", "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "while",
];

pub fn parse_program(src: &str) -> Result<Vec<Stmt>, ScriptError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let mut body = Vec::new();
    while !parser.at(&Tok::Eof) {
        if parser.eat(&Tok::Newline) {
            continue;
        }
        body.extend(parser.statement()?);
    }
    Ok(body)
}

/// Parse a single expression, as found inside an f-string replacement field.
pub fn parse_expression(src: &str, line: usize) -> Result<Expr, ScriptError> {
    let mut tokens = tokenize(src.trim())?;
    for token in &mut tokens {
        token.line = line;
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.exprlist()?;
    parser.eat(&Tok::Newline);
    if !parser.at(&Tok::Eof) {
        return Err(parser.error("unexpected trailing tokens in expression"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        self.tokens.get(self.pos).map(|t| &t.tok).unwrap_or(&Tok::Eof)
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        self.tokens.get(self.pos + offset).map(|t| &t.tok).unwrap_or(&Tok::Eof)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn at_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if n == kw)
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.at(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.at_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.at_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::syntax(self.line(), message)
    }

    fn expect_op(&mut self, op: &str) -> Result<(), ScriptError> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}', found {}", op, describe(self.peek()))))
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), ScriptError> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}', found {}", kw, describe(self.peek()))))
        }
    }

    fn identifier(&mut self) -> Result<String, ScriptError> {
        match self.peek().clone() {
            Tok::Name(name) if !KEYWORDS.contains(&name.as_str()) => {
                self.pos += 1;
                Ok(name)
            }
            other => Err(self.error(format!("expected a name, found {}", describe(&other)))),
        }
    }

    // ---- statements ----

    fn statement(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        let line = self.line();
        let kind = match self.peek() {
            Tok::Name(n) if n == "if" => {
                self.pos += 1;
                self.if_rest()?
            }
            Tok::Name(n) if n == "while" => {
                self.pos += 1;
                let cond = self.expr()?;
                let body = self.block()?;
                StmtKind::While { cond, body }
            }
            Tok::Name(n) if n == "for" => {
                self.pos += 1;
                let target = self.target_list()?;
                self.expect_keyword("in")?;
                let iter = self.exprlist()?;
                let body = self.block()?;
                if self.at_keyword("else") {
                    return Err(self.error("'for ... else' is not supported"));
                }
                StmtKind::For { target, iter, body }
            }
            Tok::Name(n) if n == "def" => {
                self.pos += 1;
                self.function_def()?
            }
            Tok::Name(n) if n == "try" => {
                self.pos += 1;
                self.try_rest()?
            }
            Tok::Name(n) if n == "class" => return Err(self.error("class definitions are not supported")),
            _ => return self.simple_statement(),
        };
        Ok(vec![Stmt { line, kind }])
    }

    fn if_rest(&mut self) -> Result<StmtKind, ScriptError> {
        let cond = self.expr()?;
        let body = self.block()?;
        let orelse = if self.at_keyword("elif") {
            let line = self.line();
            self.pos += 1;
            vec![Stmt {
                line,
                kind: self.if_rest()?,
            }]
        } else if self.eat_keyword("else") {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(StmtKind::If { cond, body, orelse })
    }

    fn function_def(&mut self) -> Result<StmtKind, ScriptError> {
        let name = self.identifier()?;
        self.expect_op("(")?;
        let params = self.params(")")?;
        self.expect_op(")")?;
        if self.eat_op("->") {
            self.expr()?;
        }
        let body = self.block()?;
        Ok(StmtKind::FunctionDef { name, params, body })
    }

    fn params(&mut self, close: &str) -> Result<Vec<Param>, ScriptError> {
        let mut params = Vec::new();
        while !self.at_op(close) {
            let name = self.identifier()?;
            if close == ")" && self.eat_op(":") {
                self.expr()?;
            }
            let default = if self.eat_op("=") { Some(self.expr()?) } else { None };
            params.push(Param { name, default });
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(params)
    }

    fn try_rest(&mut self) -> Result<StmtKind, ScriptError> {
        let body = self.block()?;
        let mut handlers = Vec::new();
        while self.eat_keyword("except") {
            let mut name = None;
            if !self.at_op(":") {
                self.expr()?;
                if self.eat_keyword("as") {
                    name = Some(self.identifier()?);
                }
            }
            let body = self.block()?;
            handlers.push(ExceptClause { name, body });
        }
        if self.at_keyword("else") {
            return Err(self.error("'try ... else' is not supported"));
        }
        let finally = if self.eat_keyword("finally") {
            self.block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finally.is_empty() {
            return Err(self.error("'try' needs an 'except' or 'finally' clause"));
        }
        Ok(StmtKind::Try {
            body,
            handlers,
            finally,
        })
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        self.expect_op(":")?;
        if !self.eat(&Tok::Newline) {
            return self.simple_statement();
        }
        if !self.eat(&Tok::Indent) {
            return Err(self.error("expected an indented block"));
        }
        let mut body = Vec::new();
        while !self.eat(&Tok::Dedent) {
            if self.at(&Tok::Eof) {
                break;
            }
            if self.eat(&Tok::Newline) {
                continue;
            }
            body.extend(self.statement()?);
        }
        Ok(body)
    }

    fn simple_statement(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        let mut out = Vec::new();
        loop {
            let line = self.line();
            let kind = self.small_statement()?;
            out.push(Stmt { line, kind });
            if !self.eat_op(";") || self.at(&Tok::Newline) || self.at(&Tok::Eof) {
                break;
            }
        }
        if !self.eat(&Tok::Newline) && !self.at(&Tok::Eof) {
            return Err(self.error(format!("unexpected {}", describe(self.peek()))));
        }
        Ok(out)
    }

    fn small_statement(&mut self) -> Result<StmtKind, ScriptError> {
        if self.eat_keyword("pass") {
            return Ok(StmtKind::Pass);
        }
        if self.eat_keyword("break") {
            return Ok(StmtKind::Break);
        }
        if self.eat_keyword("continue") {
            return Ok(StmtKind::Continue);
        }
        if self.eat_keyword("return") {
            let value = if self.ends_statement() { None } else { Some(self.exprlist()?) };
            return Ok(StmtKind::Return(value));
        }
        if self.eat_keyword("raise") {
            let value = if self.ends_statement() { None } else { Some(self.expr()?) };
            return Ok(StmtKind::Raise(value));
        }
        if self.eat_keyword("assert") {
            let test = self.expr()?;
            let message = if self.eat_op(",") { Some(self.expr()?) } else { None };
            return Ok(StmtKind::Assert { test, message });
        }
        if self.at_keyword("import") || self.at_keyword("from") || self.at_keyword("global") || self.at_keyword("nonlocal")
        {
            while !self.ends_statement() {
                self.advance();
            }
            return Ok(StmtKind::Import);
        }
        if self.at_keyword("del") {
            return Err(self.error("'del' is not supported"));
        }

        let first = self.exprlist()?;
        if let Some(op) = self.aug_op() {
            self.pos += 1;
            let target = to_target(first).map_err(|m| self.error(m))?;
            let value = self.exprlist()?;
            return Ok(StmtKind::AugAssign { target, op, value });
        }
        if self.at_op("=") {
            let mut exprs = vec![first];
            while self.eat_op("=") {
                exprs.push(self.exprlist()?);
            }
            let value = exprs.pop().ok_or_else(|| self.error("empty assignment"))?;
            let targets = exprs
                .into_iter()
                .map(to_target)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|m| self.error(m))?;
            return Ok(StmtKind::Assign { targets, value });
        }
        Ok(StmtKind::Expr(first))
    }

    fn ends_statement(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::Eof) || self.at_op(";")
    }

    fn aug_op(&self) -> Option<BinOp> {
        match self.peek() {
            Tok::Op("+=") => Some(BinOp::Add),
            Tok::Op("-=") => Some(BinOp::Sub),
            Tok::Op("*=") => Some(BinOp::Mul),
            Tok::Op("/=") => Some(BinOp::Div),
            Tok::Op("//=") => Some(BinOp::FloorDiv),
            Tok::Op("%=") => Some(BinOp::Mod),
            Tok::Op("**=") => Some(BinOp::Pow),
            _ => None,
        }
    }

    // ---- expressions ----

    /// Comma-separated expressions; more than one (or a trailing comma) builds a tuple.
    fn exprlist(&mut self) -> Result<Expr, ScriptError> {
        let first = self.expr()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.ends_statement() || self.at_op("=") || self.at_op(")") || self.aug_op().is_some() {
                break;
            }
            items.push(self.expr()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn target_list(&mut self) -> Result<Target, ScriptError> {
        let mut items = vec![self.or_operand()?];
        let mut tuple = false;
        while self.eat_op(",") {
            tuple = true;
            if self.at_keyword("in") {
                break;
            }
            items.push(self.or_operand()?);
        }
        let expr = if tuple {
            Expr::Tuple(items)
        } else {
            items.remove(0)
        };
        to_target(expr).map_err(|m| self.error(m))
    }

    /// Loop targets stop before `in`, so they are parsed below comparisons.
    fn or_operand(&mut self) -> Result<Expr, ScriptError> {
        self.arith()
    }

    fn expr(&mut self) -> Result<Expr, ScriptError> {
        if self.eat_keyword("lambda") {
            let params = self.params(":")?;
            self.expect_op(":")?;
            let body = self.expr()?;
            return Ok(Expr::Lambda {
                params,
                body: Box::new(body),
            });
        }
        let value = self.or_test()?;
        if self.at_keyword("if") && !self.in_comprehension_condition() {
            self.pos += 1;
            let cond = self.or_test()?;
            self.expect_keyword("else")?;
            let otherwise = self.expr()?;
            return Ok(Expr::IfElse {
                cond: Box::new(cond),
                then: Box::new(value),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(value)
    }

    /// `[x for x in y if cond]`: an `if` without a matching `else` on the
    /// same bracket level belongs to the comprehension.
    fn in_comprehension_condition(&self) -> bool {
        let mut depth = 0i32;
        let mut i = self.pos + 1;
        while let Some(token) = self.tokens.get(i) {
            match &token.tok {
                Tok::Op("(" | "[" | "{") => depth += 1,
                Tok::Op(")" | "]" | "}") => {
                    if depth == 0 {
                        return true;
                    }
                    depth -= 1;
                }
                Tok::Name(n) if depth == 0 && n == "else" => return false,
                Tok::Name(n) if depth == 0 && (n == "for" || n == "if") => return true,
                Tok::Newline | Tok::Eof => return true,
                _ => {}
            }
            i += 1;
        }
        true
    }

    fn or_test(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.and_test()?;
        while self.eat_keyword("or") {
            let right = self.and_test()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_test(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.not_test()?;
        while self.eat_keyword("and") {
            let right = self.not_test()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_test(&mut self) -> Result<Expr, ScriptError> {
        if self.eat_keyword("not") {
            let operand = self.not_test()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ScriptError> {
        let first = self.arith()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::Op("==") => CmpOp::Eq,
                Tok::Op("!=") => CmpOp::NotEq,
                Tok::Op("<") => CmpOp::Lt,
                Tok::Op("<=") => CmpOp::LtE,
                Tok::Op(">") => CmpOp::Gt,
                Tok::Op(">=") => CmpOp::GtE,
                Tok::Name(n) if n == "in" => CmpOp::In,
                Tok::Name(n) if n == "not" && matches!(self.peek_at(1), Tok::Name(m) if m == "in") => {
                    self.pos += 1;
                    CmpOp::NotIn
                }
                Tok::Name(n) if n == "is" => {
                    if matches!(self.peek_at(1), Tok::Name(m) if m == "not") {
                        self.pos += 1;
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                _ => break,
            };
            self.pos += 1;
            rest.push((op, self.arith()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare {
                first: Box::new(first),
                rest,
            })
        }
    }

    fn arith(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Tok::Op("+") => BinOp::Add,
                Tok::Op("-") => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.term()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek() {
                Tok::Op("*") => BinOp::Mul,
                Tok::Op("/") => BinOp::Div,
                Tok::Op("//") => BinOp::FloorDiv,
                Tok::Op("%") => BinOp::Mod,
                _ => break,
            };
            self.pos += 1;
            let right = self.factor()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr, ScriptError> {
        let op = match self.peek() {
            Tok::Op("-") => Some(UnaryOp::Neg),
            Tok::Op("+") => Some(UnaryOp::Pos),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let operand = self.factor()?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            });
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, ScriptError> {
        let base = self.postfix()?;
        if self.eat_op("**") {
            let exponent = self.factor()?;
            return Ok(binary(BinOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, ScriptError> {
        let mut value = self.atom()?;
        loop {
            if self.eat_op("(") {
                let args = self.call_args()?;
                value = Expr::Call {
                    func: Box::new(value),
                    args,
                };
            } else if self.eat_op("[") {
                value = self.subscript(value)?;
            } else if self.eat_op(".") {
                let attr = self.identifier()?;
                value = Expr::Attribute {
                    value: Box::new(value),
                    attr,
                };
            } else {
                return Ok(value);
            }
        }
    }

    fn call_args(&mut self) -> Result<Vec<Arg>, ScriptError> {
        let mut args = Vec::new();
        while !self.eat_op(")") {
            if matches!(self.peek(), Tok::Op("*" | "**")) {
                return Err(self.error("argument unpacking is not supported"));
            }
            let name = match self.peek() {
                Tok::Name(n) if matches!(self.peek_at(1), Tok::Op("=")) => Some(n.clone()),
                _ => None,
            };
            if name.is_some() {
                self.pos += 2;
            }
            let mut value = self.expr()?;
            if name.is_none() && self.at_keyword("for") {
                value = self.comprehension(value)?;
            }
            args.push(Arg { name, value });
            if !self.eat_op(",") {
                self.expect_op(")")?;
                break;
            }
        }
        Ok(args)
    }

    fn subscript(&mut self, value: Expr) -> Result<Expr, ScriptError> {
        let lower = if self.at_op(":") { None } else { Some(self.exprlist()?) };
        if self.eat_op("]") {
            let index = lower.ok_or_else(|| self.error("empty subscript"))?;
            return Ok(Expr::Index {
                value: Box::new(value),
                index: Box::new(index),
            });
        }
        self.expect_op(":")?;
        let upper = if self.at_op(":") || self.at_op("]") { None } else { Some(self.expr()?) };
        let step = if self.eat_op(":") && !self.at_op("]") { Some(self.expr()?) } else { None };
        self.expect_op("]")?;
        Ok(Expr::Slice {
            value: Box::new(value),
            lower: lower.map(Box::new),
            upper: upper.map(Box::new),
            step: step.map(Box::new),
        })
    }

    fn comprehension(&mut self, element: Expr) -> Result<Expr, ScriptError> {
        self.expect_keyword("for")?;
        let target = self.target_list()?;
        self.expect_keyword("in")?;
        let iter = self.or_test()?;
        let mut conditions = Vec::new();
        while self.eat_keyword("if") {
            conditions.push(self.or_test()?);
        }
        if self.at_keyword("for") {
            return Err(self.error("nested comprehensions are not supported"));
        }
        Ok(Expr::ListComp {
            element: Box::new(element),
            target: Box::new(target),
            iter: Box::new(iter),
            conditions,
        })
    }

    fn atom(&mut self) -> Result<Expr, ScriptError> {
        let line = self.line();
        match self.advance() {
            Tok::Int(v) => Ok(Expr::Int(v)),
            Tok::Float(v) => Ok(Expr::Float(v)),
            Tok::Str(s) => self.string_concat(vec![FStringPart::Literal(s)]),
            Tok::FStr(s) => {
                let parts = parse_fstring(&s, line)?;
                self.string_concat(parts)
            }
            Tok::Name(n) => match n.as_str() {
                "True" => Ok(Expr::Bool(true)),
                "False" => Ok(Expr::Bool(false)),
                "None" => Ok(Expr::None),
                kw if KEYWORDS.contains(&kw) => Err(ScriptError::syntax(line, format!("unexpected keyword '{}'", kw))),
                _ => Ok(Expr::Name(n)),
            },
            Tok::Op("(") => {
                if self.eat_op(")") {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.expr()?;
                if self.at_keyword("for") {
                    let comp = self.comprehension(first)?;
                    self.expect_op(")")?;
                    return Ok(comp);
                }
                if self.eat_op(")") {
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.at_op(")") {
                        break;
                    }
                    items.push(self.expr()?);
                }
                self.expect_op(")")?;
                Ok(Expr::Tuple(items))
            }
            Tok::Op("[") => {
                if self.eat_op("]") {
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.expr()?;
                if self.at_keyword("for") {
                    let comp = self.comprehension(first)?;
                    self.expect_op("]")?;
                    return Ok(comp);
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.at_op("]") {
                        break;
                    }
                    items.push(self.expr()?);
                }
                self.expect_op("]")?;
                Ok(Expr::List(items))
            }
            Tok::Op("{") => {
                let mut pairs = Vec::new();
                while !self.eat_op("}") {
                    let key = self.expr()?;
                    self.expect_op(":")?;
                    let value = self.expr()?;
                    pairs.push((key, value));
                    if !self.eat_op(",") {
                        self.expect_op("}")?;
                        break;
                    }
                }
                Ok(Expr::Dict(pairs))
            }
            other => Err(ScriptError::syntax(line, format!("unexpected {}", describe(&other)))),
        }
    }

    /// Adjacent string literals concatenate.
    fn string_concat(&mut self, mut parts: Vec<FStringPart>) -> Result<Expr, ScriptError> {
        loop {
            let line = self.line();
            match self.peek().clone() {
                Tok::Str(s) => {
                    self.pos += 1;
                    parts.push(FStringPart::Literal(s));
                }
                Tok::FStr(s) => {
                    self.pos += 1;
                    parts.extend(parse_fstring(&s, line)?);
                }
                _ => break,
            }
        }
        if parts.iter().all(|p| matches!(p, FStringPart::Literal(_))) {
            let joined = parts
                .into_iter()
                .map(|p| match p {
                    FStringPart::Literal(s) => s,
                    FStringPart::Expr { .. } => String::new(),
                })
                .collect();
            return Ok(Expr::Str(joined));
        }
        Ok(Expr::FString(parts))
    }
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn to_target(expr: Expr) -> Result<Target, String> {
    match expr {
        Expr::Name(n) => Ok(Target::Name(n)),
        Expr::Tuple(items) | Expr::List(items) => {
            Ok(Target::Tuple(items.into_iter().map(to_target).collect::<Result<_, _>>()?))
        }
        Expr::Index { value, index } => Ok(Target::Index {
            value: *value,
            index: *index,
        }),
        Expr::Attribute { value, attr } => Ok(Target::Attribute { value: *value, attr }),
        other => Err(format!("cannot assign to {}", expr_kind(&other))),
    }
}

fn expr_kind(expr: &Expr) -> &'static str {
    match expr {
        Expr::Call { .. } => "function call",
        Expr::Int(_) | Expr::Float(_) | Expr::Str(_) | Expr::Bool(_) | Expr::None => "literal",
        _ => "expression",
    }
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Name(n) => format!("'{}'", n),
        Tok::Int(v) => format!("'{}'", v),
        Tok::Float(v) => format!("'{}'", v),
        Tok::Str(_) | Tok::FStr(_) => "string".into(),
        Tok::Op(op) => format!("'{}'", op),
        Tok::Newline => "end of line".into(),
        Tok::Indent => "unexpected indent".into(),
        Tok::Dedent => "unexpected dedent".into(),
        Tok::Eof => "end of input".into(),
    }
}

fn parse_fstring(body: &str, line: usize) -> Result<Vec<FStringPart>, ScriptError> {
    let chars: Vec<char> = body.chars().collect();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '{' && chars.get(i + 1) == Some(&'{') {
            literal.push('{');
            i += 2;
            continue;
        }
        if c == '}' && chars.get(i + 1) == Some(&'}') {
            literal.push('}');
            i += 2;
            continue;
        }
        if c != '{' {
            literal.push(c);
            i += 1;
            continue;
        }

        let mut depth = 0i32;
        let mut quote: Option<char> = None;
        let mut j = i + 1;
        let mut spec_at: Option<usize> = None;
        while j < chars.len() {
            let ch = chars[j];
            match quote {
                Some(q) if ch == q => quote = None,
                Some(_) => {}
                None => match ch {
                    '\'' | '"' => quote = Some(ch),
                    '(' | '[' | '{' => depth += 1,
                    ')' | ']' => depth -= 1,
                    '}' if depth == 0 => break,
                    '}' => depth -= 1,
                    ':' if depth == 0 && spec_at.is_none() => spec_at = Some(j),
                    '!' if depth == 0 && spec_at.is_none() && chars.get(j + 1) != Some(&'=') => spec_at = Some(j),
                    _ => {}
                },
            }
            j += 1;
        }
        if j >= chars.len() {
            return Err(ScriptError::syntax(line, "f-string: expecting '}'"));
        }
        let expr_end = spec_at.unwrap_or(j);
        let source: String = chars[i + 1..expr_end].iter().collect();
        let spec = spec_at.map(|s| {
            let raw: String = chars[s..j].iter().collect();
            match raw.strip_prefix('!') {
                Some(conv) => conv.split_once(':').map(|(_, spec)| spec.to_string()).unwrap_or_default(),
                None => raw[1..].to_string(),
            }
        });
        if !literal.is_empty() {
            parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
        }
        parts.push(FStringPart::Expr {
            expr: parse_expression(&source, line)?,
            spec: spec.filter(|s| !s.is_empty()),
        });
        i = j + 1;
    }
    if !literal.is_empty() {
        parts.push(FStringPart::Literal(literal));
    }
    Ok(parts)
}
