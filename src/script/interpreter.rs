//! Tree-walking interpreter for the executable form of a script.
//!
//! Every statement reports its line to the host before it runs, so engine
//! calls and failures are attributed to an exact executable line without any
//! runtime introspection.

use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info};

use crate::engine::error::EngineError;
use crate::engine::selector::Selector;
use crate::screen::element::ScrollDirection;
use crate::script::ast::{Arg, BinOp, CmpOp, Expr, FStringPart, Stmt, StmtKind, Target, UnaryOp};
use crate::script::compiler::{CompiledScript, ENGINE_NAME, SymbolRef};
use crate::script::error::ScriptError;
use crate::script::host::{MatchQuery, ScriptHost};
use crate::script::parser::parse_program;
use crate::script::value::{
    Builtin, Env, Function, FunctionBody, Scope, Value, assign, format_with_spec, lookup,
};

const MAX_CALL_DEPTH: usize = 200;
const MAX_RANGE_LEN: i64 = 10_000_000;
const MAX_REPEAT_LEN: usize = 10_000_000;
const MAX_SLEEP_SECS: f64 = 60.0;

type Exec<T> = Result<T, ScriptError>;

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// Parse and run a compiled script against `host`. Returns what the script printed.
pub fn run_compiled<H: ScriptHost>(
    script: &CompiledScript,
    host: &mut H,
    max_steps: usize,
) -> Result<Vec<String>, ScriptError> {
    let program = parse_program(&script.executable)?;
    let mut interpreter = Interpreter::new(host, max_steps).with_symbols(&script.symbols);
    interpreter.run(&program)?;
    Ok(interpreter.into_output())
}

pub struct Interpreter<'h, H: ScriptHost> {
    host: &'h mut H,
    globals: Env,
    /// Handle identifier -> document symbol, for handles used before their declaration runs.
    handles: HashMap<String, String>,
    line: usize,
    steps: usize,
    max_steps: usize,
    depth: usize,
    output: Vec<String>,
}

impl<'h, H: ScriptHost> Interpreter<'h, H> {
    pub fn new(host: &'h mut H, max_steps: usize) -> Self {
        let globals = Scope::root();
        assign(&globals, ENGINE_NAME, Value::Api);
        assign(&globals, "time", Value::TimeModule);
        Self {
            host,
            globals,
            handles: HashMap::new(),
            line: 0,
            steps: 0,
            max_steps,
            depth: 0,
            output: Vec::new(),
        }
    }

    pub fn with_symbols(mut self, symbols: &[SymbolRef]) -> Self {
        self.handles = symbols.iter().map(|s| (s.handle.clone(), s.name.clone())).collect();
        self
    }

    pub fn output(&self) -> &[String] {
        &self.output
    }

    pub fn into_output(self) -> Vec<String> {
        self.output
    }

    pub fn run_source(&mut self, src: &str) -> Exec<()> {
        let program = parse_program(src)?;
        self.run(&program)
    }

    pub fn run(&mut self, program: &[Stmt]) -> Exec<()> {
        let env = Rc::clone(&self.globals);
        match self.exec_block(program, &env)? {
            Flow::Normal | Flow::Return(_) => Ok(()),
            Flow::Break => Err(self.err("SyntaxError: 'break' outside loop")),
            Flow::Continue => Err(self.err("SyntaxError: 'continue' not properly in loop")),
        }
    }

    fn err(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::runtime(self.line, message)
    }

    fn engine(&self, source: EngineError) -> ScriptError {
        ScriptError::Engine {
            line: self.line,
            source,
        }
    }

    // ---- statements ----

    fn exec_block(&mut self, body: &[Stmt], env: &Env) -> Exec<Flow> {
        for stmt in body {
            match self.exec(stmt, env)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt, env: &Env) -> Exec<Flow> {
        self.line = stmt.line;
        self.host.set_line(stmt.line);
        self.steps += 1;
        if self.steps > self.max_steps {
            return Err(self.err(format!(
                "RuntimeError: step limit of {} exceeded; the script probably loops forever",
                self.max_steps
            )));
        }

        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr, env)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value, env)?;
                for target in targets {
                    self.assign_target(target, value.clone(), env)?;
                }
            }
            StmtKind::AugAssign { target, op, value } => {
                let current = self.eval(&target_expr(target), env)?;
                let rhs = self.eval(value, env)?;
                let updated = match (&current, op) {
                    (Value::List(list), BinOp::Add) => {
                        let items = self.iterate(rhs)?;
                        list.borrow_mut().extend(items);
                        current.clone()
                    }
                    _ => binop(*op, &current, &rhs).map_err(|m| self.err(m))?,
                };
                self.assign_target(target, updated, env)?;
            }
            StmtKind::If { cond, body, orelse } => {
                let branch = if self.eval(cond, env)?.truthy() { body } else { orelse };
                return self.exec_block(branch, env);
            }
            StmtKind::While { cond, body } => {
                while self.eval(cond, env)?.truthy() {
                    match self.exec_block(body, env)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::For { target, iter, body } => {
                let iterable = self.eval(iter, env)?;
                for item in self.iterate(iterable)? {
                    self.assign_target(target, item, env)?;
                    match self.exec_block(body, env)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::FunctionDef { name, params, body } => {
                let defaults = params
                    .iter()
                    .map(|p| p.default.as_ref().map(|d| self.eval(d, env)).transpose())
                    .collect::<Exec<Vec<_>>>()?;
                let function = Function {
                    name: name.clone(),
                    params: params.clone(),
                    defaults,
                    body: FunctionBody::Block(body.clone()),
                    closure: Rc::clone(env),
                };
                assign(env, name, Value::Function(Rc::new(function)));
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(v) => self.eval(v, env)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Try {
                body,
                handlers,
                finally,
            } => {
                let mut result = self.exec_block(body, env);
                let caught = match (&result, handlers.first()) {
                    (Err(ScriptError::Runtime { message, .. }), Some(handler)) => Some((message.clone(), handler)),
                    _ => None,
                };
                if let Some((message, handler)) = caught {
                    debug!(line = self.line, error = %message, "exception handled by script");
                    if let Some(name) = &handler.name {
                        assign(env, name, Value::Str(message));
                    }
                    result = self.exec_block(&handler.body, env);
                }
                if !finally.is_empty() {
                    match self.exec_block(finally, env)? {
                        Flow::Normal => {}
                        other => return Ok(other),
                    }
                }
                return result;
            }
            StmtKind::Raise(value) => {
                let message = match value {
                    Some(expr) => self.exception_message(expr, env)?,
                    None => "RuntimeError: No active exception to reraise".to_string(),
                };
                return Err(self.err(message));
            }
            StmtKind::Assert { test, message } => {
                if !self.eval(test, env)?.truthy() {
                    let detail = match message {
                        Some(m) => format!("AssertionError: {}", self.eval(m, env)?.to_str()),
                        None => "AssertionError".to_string(),
                    };
                    return Err(self.err(detail));
                }
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass | StmtKind::Import => {}
        }
        Ok(Flow::Normal)
    }

    /// `raise ValueError("x")` reads as `ValueError: x`.
    fn exception_message(&mut self, expr: &Expr, env: &Env) -> Exec<String> {
        if let Expr::Call { func, args } = expr {
            if let Expr::Name(name) = func.as_ref() {
                if is_exception_name(name) {
                    let parts = args
                        .iter()
                        .map(|a| self.eval(&a.value, env).map(|v| v.to_str()))
                        .collect::<Exec<Vec<_>>>()?;
                    return Ok(if parts.is_empty() {
                        name.clone()
                    } else {
                        format!("{}: {}", name, parts.join(", "))
                    });
                }
            }
        }
        if let Expr::Name(name) = expr {
            if is_exception_name(name) {
                return Ok(name.clone());
            }
        }
        Ok(self.eval(expr, env)?.to_str())
    }

    fn assign_target(&mut self, target: &Target, value: Value, env: &Env) -> Exec<()> {
        match target {
            Target::Name(name) => assign(env, name, value),
            Target::Tuple(targets) => {
                let items = self.iterate(value)?;
                if items.len() != targets.len() {
                    return Err(self.err(format!(
                        "ValueError: expected {} values to unpack, got {}",
                        targets.len(),
                        items.len()
                    )));
                }
                for (t, v) in targets.iter().zip(items) {
                    self.assign_target(t, v, env)?;
                }
            }
            Target::Index { value: container, index } => {
                let container = self.eval(container, env)?;
                let index = self.eval(index, env)?;
                match container {
                    Value::List(list) => {
                        let len = list.borrow().len();
                        let i = self.normalize_index(&index, len)?;
                        list.borrow_mut()[i] = value;
                    }
                    Value::Dict(dict) => {
                        let mut dict = dict.borrow_mut();
                        match dict.iter_mut().find(|(k, _)| k.py_eq(&index)) {
                            Some(entry) => entry.1 = value,
                            None => dict.push((index, value)),
                        }
                    }
                    other => {
                        return Err(self.err(format!(
                            "TypeError: '{}' object does not support item assignment",
                            other.type_name()
                        )));
                    }
                }
            }
            Target::Attribute { value: owner, attr } => {
                let owner = self.eval(owner, env)?;
                return Err(self.err(format!(
                    "AttributeError: cannot set attribute '{}' on '{}'",
                    attr,
                    owner.type_name()
                )));
            }
        }
        Ok(())
    }

    // ---- expressions ----

    fn eval(&mut self, expr: &Expr, env: &Env) -> Exec<Value> {
        Ok(match expr {
            Expr::None => Value::None,
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Int(i) => Value::Int(*i),
            Expr::Float(f) => Value::Float(*f),
            Expr::Str(s) => Value::Str(s.clone()),
            Expr::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FStringPart::Literal(s) => out.push_str(s),
                        FStringPart::Expr { expr, spec } => {
                            let value = self.eval(expr, env)?;
                            match spec {
                                Some(spec) => out.push_str(&format_with_spec(&value, spec).map_err(|m| self.err(m))?),
                                None => out.push_str(&value.to_str()),
                            }
                        }
                    }
                }
                Value::Str(out)
            }
            Expr::Name(name) => self.load_name(name, env)?,
            Expr::List(items) => Value::list(self.eval_all(items, env)?),
            Expr::Tuple(items) => Value::tuple(self.eval_all(items, env)?),
            Expr::Dict(pairs) => {
                let mut out: Vec<(Value, Value)> = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    let key = self.eval(k, env)?;
                    let value = self.eval(v, env)?;
                    match out.iter_mut().find(|(existing, _)| existing.py_eq(&key)) {
                        Some(entry) => entry.1 = value,
                        None => out.push((key, value)),
                    }
                }
                Value::dict(out)
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left, env)?;
                let r = self.eval(right, env)?;
                binop(*op, &l, &r).map_err(|m| self.err(m))?
            }
            Expr::Unary { op, operand } => {
                let v = self.eval(operand, env)?;
                match op {
                    UnaryOp::Not => Value::Bool(!v.truthy()),
                    UnaryOp::Pos => match v {
                        Value::Bool(b) => Value::Int(b as i64),
                        Value::Int(_) | Value::Float(_) => v,
                        other => return Err(self.err(format!("TypeError: bad operand type for unary +: '{}'", other.type_name()))),
                    },
                    UnaryOp::Neg => match v {
                        Value::Bool(b) => Value::Int(-(b as i64)),
                        Value::Int(i) => Value::Int(i.checked_neg().ok_or_else(|| self.err("OverflowError: integer overflow"))?),
                        Value::Float(f) => Value::Float(-f),
                        other => return Err(self.err(format!("TypeError: bad operand type for unary -: '{}'", other.type_name()))),
                    },
                }
            }
            Expr::Compare { first, rest } => {
                let mut left = self.eval(first, env)?;
                for (op, right) in rest {
                    let right = self.eval(right, env)?;
                    if !self.compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Value::Bool(true)
            }
            Expr::And(l, r) => {
                let left = self.eval(l, env)?;
                if !left.truthy() {
                    return Ok(left);
                }
                self.eval(r, env)?
            }
            Expr::Or(l, r) => {
                let left = self.eval(l, env)?;
                if left.truthy() {
                    return Ok(left);
                }
                self.eval(r, env)?
            }
            Expr::IfElse { cond, then, otherwise } => {
                if self.eval(cond, env)?.truthy() {
                    self.eval(then, env)?
                } else {
                    self.eval(otherwise, env)?
                }
            }
            Expr::Call { func, args } => {
                let callee = self.eval(func, env)?;
                let (positional, keywords) = self.eval_args(args, env)?;
                self.call_value(callee, positional, keywords)?
            }
            Expr::Attribute { value, attr } => {
                let owner = self.eval(value, env)?;
                self.get_attribute(owner, attr)?
            }
            Expr::Index { value, index } => {
                let container = self.eval(value, env)?;
                let index = self.eval(index, env)?;
                self.index(container, index)?
            }
            Expr::Slice {
                value,
                lower,
                upper,
                step,
            } => {
                let container = self.eval(value, env)?;
                let bound = |e: &Option<Box<Expr>>, this: &mut Self| -> Exec<Option<i64>> {
                    match e {
                        None => Ok(None),
                        Some(e) => match this.eval(e, env)? {
                            Value::None => Ok(None),
                            v => v
                                .as_int()
                                .map(Some)
                                .ok_or_else(|| this.err("TypeError: slice indices must be integers or None")),
                        },
                    }
                };
                let lower = bound(lower, self)?;
                let upper = bound(upper, self)?;
                let step = bound(step, self)?;
                self.slice(container, lower, upper, step)?
            }
            Expr::ListComp {
                element,
                target,
                iter,
                conditions,
            } => {
                let iterable = self.eval(iter, env)?;
                let scope = Scope::child(env);
                let mut out = Vec::new();
                'items: for item in self.iterate(iterable)? {
                    self.assign_target(target, item, &scope)?;
                    for cond in conditions {
                        if !self.eval(cond, &scope)?.truthy() {
                            continue 'items;
                        }
                    }
                    out.push(self.eval(element, &scope)?);
                }
                Value::list(out)
            }
            Expr::Lambda { params, body } => {
                let defaults = params
                    .iter()
                    .map(|p| p.default.as_ref().map(|d| self.eval(d, env)).transpose())
                    .collect::<Exec<Vec<_>>>()?;
                Value::Function(Rc::new(Function {
                    name: "<lambda>".into(),
                    params: params.clone(),
                    defaults,
                    body: FunctionBody::Lambda((**body).clone()),
                    closure: Rc::clone(env),
                }))
            }
        })
    }

    fn eval_all(&mut self, items: &[Expr], env: &Env) -> Exec<Vec<Value>> {
        items.iter().map(|e| self.eval(e, env)).collect()
    }

    fn eval_args(&mut self, args: &[Arg], env: &Env) -> Exec<(Vec<Value>, Vec<(String, Value)>)> {
        let mut positional = Vec::new();
        let mut keywords = Vec::new();
        for arg in args {
            let value = self.eval(&arg.value, env)?;
            match &arg.name {
                Some(name) => keywords.push((name.clone(), value)),
                None => {
                    if !keywords.is_empty() {
                        return Err(self.err("SyntaxError: positional argument follows keyword argument"));
                    }
                    positional.push(value);
                }
            }
        }
        Ok((positional, keywords))
    }

    fn load_name(&mut self, name: &str, env: &Env) -> Exec<Value> {
        if let Some(value) = lookup(env, name) {
            return Ok(value);
        }
        if let Some(builtin) = Builtin::lookup(name) {
            return Ok(Value::Builtin(builtin));
        }
        if let Some(symbol) = self.handles.get(name).cloned() {
            let selector = self.host.declare(&symbol).map_err(|e| self.engine(e))?;
            let value = Value::Element(selector);
            assign(&self.globals, name, value.clone());
            return Ok(value);
        }
        Err(self.err(format!("NameError: name '{}' is not defined", name)))
    }

    fn compare(&mut self, op: CmpOp, left: &Value, right: &Value) -> Exec<bool> {
        use std::cmp::Ordering::*;
        let ordered = |this: &Self| left.py_cmp(right).map_err(|m| this.err(m));
        Ok(match op {
            CmpOp::Eq => left.py_eq(right),
            CmpOp::NotEq => !left.py_eq(right),
            CmpOp::Lt => ordered(self)? == Less,
            CmpOp::LtE => ordered(self)? != Greater,
            CmpOp::Gt => ordered(self)? == Greater,
            CmpOp::GtE => ordered(self)? != Less,
            CmpOp::In => self.contains(right, left)?,
            CmpOp::NotIn => !self.contains(right, left)?,
            CmpOp::Is => left.is_same(right),
            CmpOp::IsNot => !left.is_same(right),
        })
    }

    fn contains(&mut self, container: &Value, item: &Value) -> Exec<bool> {
        match container {
            Value::Str(s) => match item {
                Value::Str(needle) => Ok(s.contains(needle.as_str())),
                other => Err(self.err(format!(
                    "TypeError: 'in <string>' requires string as left operand, not {}",
                    other.type_name()
                ))),
            },
            Value::List(l) => Ok(l.borrow().iter().any(|v| v.py_eq(item))),
            Value::Tuple(t) => Ok(t.iter().any(|v| v.py_eq(item))),
            Value::Dict(d) => Ok(d.borrow().iter().any(|(k, _)| k.py_eq(item))),
            Value::Element(_) => Ok(self.iterate(container.clone())?.iter().any(|v| v.py_eq(item))),
            other => Err(self.err(format!(
                "TypeError: argument of type '{}' is not iterable",
                other.type_name()
            ))),
        }
    }

    fn iterate(&mut self, value: Value) -> Exec<Vec<Value>> {
        match value {
            Value::List(l) => Ok(l.borrow().clone()),
            Value::Tuple(t) => Ok(t.as_ref().clone()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
            Value::Dict(d) => Ok(d.borrow().iter().map(|(k, _)| k.clone()).collect()),
            Value::Element(selector) => {
                let items = self.host.items(&selector).map_err(|e| self.engine(e))?;
                Ok(items.into_iter().map(Value::Element).collect())
            }
            other => Err(self.err(format!("TypeError: '{}' object is not iterable", other.type_name()))),
        }
    }

    fn normalize_index(&self, index: &Value, len: usize) -> Exec<usize> {
        let i = index
            .as_int()
            .ok_or_else(|| self.err(format!("TypeError: indices must be integers, not {}", index.type_name())))?;
        let resolved = if i < 0 { i + len as i64 } else { i };
        if resolved < 0 || resolved >= len as i64 {
            return Err(self.err("IndexError: index out of range"));
        }
        Ok(resolved as usize)
    }

    fn index(&mut self, container: Value, index: Value) -> Exec<Value> {
        match container {
            Value::List(l) => {
                let items = l.borrow();
                let i = self.normalize_index(&index, items.len())?;
                Ok(items[i].clone())
            }
            Value::Tuple(t) => {
                let i = self.normalize_index(&index, t.len())?;
                Ok(t[i].clone())
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let i = self.normalize_index(&index, chars.len())?;
                Ok(Value::Str(chars[i].to_string()))
            }
            Value::Dict(d) => d
                .borrow()
                .iter()
                .find(|(k, _)| k.py_eq(&index))
                .map(|(_, v)| v.clone())
                .ok_or_else(|| self.err(format!("KeyError: {}", index.repr()))),
            Value::Element(selector) => {
                let i = index.as_int().ok_or_else(|| {
                    self.err(format!("TypeError: element indices must be integers, not {}", index.type_name()))
                })?;
                let child = self.host.index(&selector, i).map_err(|e| self.engine(e))?;
                Ok(Value::Element(child))
            }
            other => Err(self.err(format!("TypeError: '{}' object is not subscriptable", other.type_name()))),
        }
    }

    fn slice(&mut self, container: Value, lower: Option<i64>, upper: Option<i64>, step: Option<i64>) -> Exec<Value> {
        let step = step.unwrap_or(1);
        if step == 0 {
            return Err(self.err("ValueError: slice step cannot be zero"));
        }
        let pick = |len: usize| -> Vec<usize> {
            let len = len as i64;
            let clamp = |v: i64, lo: i64, hi: i64| v.max(lo).min(hi);
            let norm = |v: i64| if v < 0 { v + len } else { v };
            let mut out = Vec::new();
            if step > 0 {
                let start = clamp(lower.map(norm).unwrap_or(0), 0, len);
                let stop = clamp(upper.map(norm).unwrap_or(len), 0, len);
                let mut i = start;
                while i < stop {
                    out.push(i as usize);
                    i += step;
                }
            } else {
                let start = clamp(lower.map(norm).unwrap_or(len - 1), -1, len - 1);
                let stop = clamp(upper.map(norm).unwrap_or(-1), -1, len - 1);
                let mut i = start;
                while i > stop {
                    out.push(i as usize);
                    i += step;
                }
            }
            out
        };
        match container {
            Value::List(l) => {
                let items = l.borrow();
                Ok(Value::list(pick(items.len()).into_iter().map(|i| items[i].clone()).collect()))
            }
            Value::Tuple(t) => Ok(Value::tuple(pick(t.len()).into_iter().map(|i| t[i].clone()).collect())),
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                Ok(Value::Str(pick(chars.len()).into_iter().map(|i| chars[i]).collect()))
            }
            Value::Element(selector) => {
                let items = self.host.items(&selector).map_err(|e| self.engine(e))?;
                Ok(Value::list(
                    pick(items.len()).into_iter().map(|i| Value::Element(items[i].clone())).collect(),
                ))
            }
            other => Err(self.err(format!("TypeError: '{}' object is not subscriptable", other.type_name()))),
        }
    }

    fn get_attribute(&mut self, owner: Value, attr: &str) -> Exec<Value> {
        match owner {
            Value::TimeModule if attr == "sleep" => Ok(Value::Builtin(Builtin::Sleep)),
            owner @ (Value::Api | Value::Element(_) | Value::Str(_) | Value::List(_) | Value::Dict(_)) => {
                Ok(Value::Method {
                    receiver: Box::new(owner),
                    name: attr.to_string(),
                })
            }
            other => Err(self.err(format!(
                "AttributeError: '{}' object has no attribute '{}'",
                other.type_name(),
                attr
            ))),
        }
    }

    // ---- calls ----

    fn call_value(&mut self, callee: Value, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Exec<Value> {
        match callee {
            Value::Function(f) => self.call_function(&f, args, kwargs),
            Value::Builtin(b) => self.call_builtin(b, args, kwargs),
            Value::Method { receiver, name } => self.call_method(*receiver, &name, args, kwargs),
            other => Err(self.err(format!("TypeError: '{}' object is not callable", other.type_name()))),
        }
    }

    fn call_function(&mut self, f: &Rc<Function>, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Exec<Value> {
        if args.len() > f.params.len() {
            return Err(self.err(format!(
                "TypeError: {}() takes {} positional arguments but {} were given",
                f.name,
                f.params.len(),
                args.len()
            )));
        }
        let scope = Scope::child(&f.closure);
        let mut args = args.into_iter();
        let mut kwargs = kwargs;
        for (param, default) in f.params.iter().zip(&f.defaults) {
            let value = match args.next() {
                Some(v) => v,
                None => match kwargs.iter().position(|(k, _)| *k == param.name) {
                    Some(pos) => kwargs.remove(pos).1,
                    None => default.clone().ok_or_else(|| {
                        self.err(format!(
                            "TypeError: {}() missing required argument: '{}'",
                            f.name, param.name
                        ))
                    })?,
                },
            };
            assign(&scope, &param.name, value);
        }
        if let Some((name, _)) = kwargs.first() {
            return Err(self.err(format!(
                "TypeError: {}() got an unexpected keyword argument '{}'",
                f.name, name
            )));
        }

        if self.depth >= MAX_CALL_DEPTH {
            return Err(self.err("RecursionError: maximum recursion depth exceeded"));
        }
        self.depth += 1;
        let saved_line = self.line;
        let result = match &f.body {
            FunctionBody::Block(body) => match self.exec_block(body, &scope) {
                Ok(Flow::Return(v)) => Ok(v),
                Ok(_) => Ok(Value::None),
                Err(e) => Err(e),
            },
            FunctionBody::Lambda(expr) => self.eval(expr, &scope),
        };
        self.depth -= 1;
        let value = result?;
        self.line = saved_line;
        self.host.set_line(saved_line);
        Ok(value)
    }

    fn call_builtin(&mut self, builtin: Builtin, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Exec<Value> {
        let kw = |name: &str| kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone());
        let name = builtin.name();
        let arity = |this: &Self, min: usize, max: usize| -> Exec<()> {
            if args.len() < min || args.len() > max {
                Err(this.err(format!(
                    "TypeError: {}() takes {} arguments ({} given)",
                    name,
                    if min == max { min.to_string() } else { format!("{} to {}", min, max) },
                    args.len()
                )))
            } else {
                Ok(())
            }
        };

        match builtin {
            Builtin::Print => {
                let sep = kw("sep").map(|v| v.to_str()).unwrap_or_else(|| " ".into());
                let text = args.iter().map(Value::to_str).collect::<Vec<_>>().join(&sep);
                info!(target: "droidscript::script", line = self.line, "{}", text);
                self.output.push(text);
                Ok(Value::None)
            }
            Builtin::Len => {
                arity(self, 1, 1)?;
                let len = match &args[0] {
                    Value::Str(s) => s.chars().count(),
                    Value::List(l) => l.borrow().len(),
                    Value::Tuple(t) => t.len(),
                    Value::Dict(d) => d.borrow().len(),
                    Value::Element(selector) => self.host.count(selector).map_err(|e| self.engine(e))?,
                    other => {
                        return Err(self.err(format!("TypeError: object of type '{}' has no len()", other.type_name())));
                    }
                };
                Ok(Value::Int(len as i64))
            }
            Builtin::Range => {
                arity(self, 1, 3)?;
                let ints = args
                    .iter()
                    .map(|a| a.as_int().ok_or_else(|| self.err("TypeError: range() arguments must be integers")))
                    .collect::<Exec<Vec<i64>>>()?;
                let (start, stop, step) = match ints.as_slice() {
                    [stop] => (0, *stop, 1),
                    [start, stop] => (*start, *stop, 1),
                    [start, stop, step] => (*start, *stop, *step),
                    _ => (0, 0, 1),
                };
                if step == 0 {
                    return Err(self.err("ValueError: range() arg 3 must not be zero"));
                }
                let span = if step > 0 { stop - start } else { start - stop };
                if span / step.abs() > MAX_RANGE_LEN {
                    return Err(self.err("MemoryError: range too large"));
                }
                let mut out = Vec::new();
                let mut i = start;
                while (step > 0 && i < stop) || (step < 0 && i > stop) {
                    out.push(Value::Int(i));
                    i += step;
                }
                Ok(Value::list(out))
            }
            Builtin::Str => {
                arity(self, 0, 1)?;
                Ok(Value::Str(args.first().map(Value::to_str).unwrap_or_default()))
            }
            Builtin::Int => {
                arity(self, 0, 2)?;
                let Some(value) = args.first() else {
                    return Ok(Value::Int(0));
                };
                match value {
                    Value::Bool(b) => Ok(Value::Int(*b as i64)),
                    Value::Int(i) => Ok(Value::Int(*i)),
                    Value::Float(f) if f.is_finite() => Ok(Value::Int(f.trunc() as i64)),
                    Value::Str(s) => {
                        let base = args.get(1).and_then(Value::as_int).unwrap_or(10) as u32;
                        i64::from_str_radix(s.trim().replace('_', "").as_str(), base)
                            .map(Value::Int)
                            .map_err(|_| self.err(format!("ValueError: invalid literal for int() with base {}: {}", base, value.repr())))
                    }
                    other => Err(self.err(format!("TypeError: int() argument must be a string or a number, not '{}'", other.type_name()))),
                }
            }
            Builtin::Float => {
                arity(self, 0, 1)?;
                let Some(value) = args.first() else {
                    return Ok(Value::Float(0.0));
                };
                match value {
                    Value::Str(s) => s
                        .trim()
                        .parse::<f64>()
                        .map(Value::Float)
                        .map_err(|_| self.err(format!("ValueError: could not convert string to float: {}", value.repr()))),
                    other => other
                        .as_number()
                        .map(Value::Float)
                        .ok_or_else(|| self.err(format!("TypeError: float() argument must be a string or a number, not '{}'", other.type_name()))),
                }
            }
            Builtin::Bool => {
                arity(self, 0, 1)?;
                Ok(Value::Bool(args.first().is_some_and(Value::truthy)))
            }
            Builtin::Enumerate => {
                arity(self, 1, 2)?;
                let start = args.get(1).cloned().or_else(|| kw("start")).and_then(|v| v.as_int()).unwrap_or(0);
                let items = self.iterate(args[0].clone())?;
                Ok(Value::list(
                    items
                        .into_iter()
                        .enumerate()
                        .map(|(i, v)| Value::tuple(vec![Value::Int(start + i as i64), v]))
                        .collect(),
                ))
            }
            Builtin::List => {
                arity(self, 0, 1)?;
                match args.into_iter().next() {
                    Some(v) => Ok(Value::list(self.iterate(v)?)),
                    None => Ok(Value::list(Vec::new())),
                }
            }
            Builtin::Tuple => {
                arity(self, 0, 1)?;
                match args.into_iter().next() {
                    Some(v) => Ok(Value::tuple(self.iterate(v)?)),
                    None => Ok(Value::tuple(Vec::new())),
                }
            }
            Builtin::Dict => {
                arity(self, 0, 1)?;
                let mut pairs: Vec<(Value, Value)> = match args.into_iter().next() {
                    Some(Value::Dict(d)) => d.borrow().clone(),
                    Some(other) => {
                        let mut pairs = Vec::new();
                        for item in self.iterate(other)? {
                            let kv = self.iterate(item)?;
                            if kv.len() != 2 {
                                return Err(self.err("ValueError: dictionary update sequence element has wrong length"));
                            }
                            pairs.push((kv[0].clone(), kv[1].clone()));
                        }
                        pairs
                    }
                    None => Vec::new(),
                };
                pairs.extend(kwargs.into_iter().map(|(k, v)| (Value::Str(k), v)));
                Ok(Value::dict(pairs))
            }
            Builtin::Min | Builtin::Max => {
                let items = if args.len() == 1 {
                    self.iterate(args[0].clone())?
                } else {
                    args.clone()
                };
                if items.is_empty() {
                    return match kw("default") {
                        Some(d) => Ok(d),
                        None => Err(self.err(format!("ValueError: {}() arg is an empty sequence", name))),
                    };
                }
                let key = kw("key");
                let mut best = items[0].clone();
                let mut best_key = self.apply_key(&key, &best)?;
                for item in items.into_iter().skip(1) {
                    let k = self.apply_key(&key, &item)?;
                    let ord = k.py_cmp(&best_key).map_err(|m| self.err(m))?;
                    let better = if builtin == Builtin::Min { ord.is_lt() } else { ord.is_gt() };
                    if better {
                        best = item;
                        best_key = k;
                    }
                }
                Ok(best)
            }
            Builtin::Sum => {
                arity(self, 1, 2)?;
                let mut total = args.get(1).cloned().or_else(|| kw("start")).unwrap_or(Value::Int(0));
                for item in self.iterate(args[0].clone())? {
                    total = binop(BinOp::Add, &total, &item).map_err(|m| self.err(m))?;
                }
                Ok(total)
            }
            Builtin::Sorted => {
                arity(self, 1, 1)?;
                let items = self.iterate(args[0].clone())?;
                let key = kw("key");
                let mut keyed = Vec::with_capacity(items.len());
                for item in items {
                    keyed.push((self.apply_key(&key, &item)?, item));
                }
                let mut failure = None;
                keyed.sort_by(|(a, _), (b, _)| {
                    a.py_cmp(b).unwrap_or_else(|m| {
                        failure.get_or_insert(m);
                        std::cmp::Ordering::Equal
                    })
                });
                if let Some(m) = failure {
                    return Err(self.err(m));
                }
                let mut out: Vec<Value> = keyed.into_iter().map(|(_, v)| v).collect();
                if kw("reverse").is_some_and(|v| v.truthy()) {
                    out.reverse();
                }
                Ok(Value::list(out))
            }
            Builtin::Reversed => {
                arity(self, 1, 1)?;
                let mut items = self.iterate(args[0].clone())?;
                items.reverse();
                Ok(Value::list(items))
            }
            Builtin::Abs => {
                arity(self, 1, 1)?;
                match &args[0] {
                    Value::Int(i) => Ok(Value::Int(i.abs())),
                    Value::Bool(b) => Ok(Value::Int(*b as i64)),
                    Value::Float(f) => Ok(Value::Float(f.abs())),
                    other => Err(self.err(format!("TypeError: bad operand type for abs(): '{}'", other.type_name()))),
                }
            }
            Builtin::Any => {
                arity(self, 1, 1)?;
                Ok(Value::Bool(self.iterate(args[0].clone())?.iter().any(Value::truthy)))
            }
            Builtin::All => {
                arity(self, 1, 1)?;
                Ok(Value::Bool(self.iterate(args[0].clone())?.iter().all(Value::truthy)))
            }
            Builtin::Zip => {
                let columns = args
                    .into_iter()
                    .map(|a| self.iterate(a))
                    .collect::<Exec<Vec<_>>>()?;
                let len = columns.iter().map(Vec::len).min().unwrap_or(0);
                Ok(Value::list(
                    (0..len)
                        .map(|i| Value::tuple(columns.iter().map(|c| c[i].clone()).collect()))
                        .collect(),
                ))
            }
            Builtin::Round => {
                arity(self, 1, 2)?;
                let x = args[0]
                    .as_number()
                    .ok_or_else(|| self.err(format!("TypeError: type {} doesn't define __round__", args[0].type_name())))?;
                match args.get(1).and_then(Value::as_int) {
                    None => Ok(Value::Int(x.round_ties_even() as i64)),
                    Some(digits) => {
                        let factor = 10f64.powi(digits as i32);
                        Ok(Value::Float((x * factor).round_ties_even() / factor))
                    }
                }
            }
            Builtin::Isinstance => {
                arity(self, 2, 2)?;
                let types = match &args[1] {
                    Value::Tuple(t) => t.as_ref().clone(),
                    other => vec![other.clone()],
                };
                let actual = args[0].type_name();
                Ok(Value::Bool(types.iter().any(|t| match t {
                    Value::Builtin(Builtin::Int) => actual == "int" || actual == "bool",
                    Value::Builtin(b) => b.name() == actual,
                    _ => false,
                })))
            }
            Builtin::ElementList => {
                arity(self, 1, 1)?;
                let symbol = match &args[0] {
                    Value::Str(s) => s.trim_start_matches('$').to_string(),
                    other => {
                        return Err(self.err(format!("TypeError: element_list() expects a name, not '{}'", other.type_name())));
                    }
                };
                let selector = self.host.declare(&symbol).map_err(|e| self.engine(e))?;
                Ok(Value::Element(selector))
            }
            Builtin::Sleep => {
                arity(self, 1, 1)?;
                let secs = args[0]
                    .as_number()
                    .ok_or_else(|| self.err("TypeError: sleep() argument must be a number"))?;
                std::thread::sleep(Duration::from_secs_f64(secs.clamp(0.0, MAX_SLEEP_SECS)));
                Ok(Value::None)
            }
        }
    }

    fn apply_key(&mut self, key: &Option<Value>, item: &Value) -> Exec<Value> {
        match key {
            None | Some(Value::None) => Ok(item.clone()),
            Some(f) => self.call_value(f.clone(), vec![item.clone()], Vec::new()),
        }
    }

    fn call_method(&mut self, receiver: Value, name: &str, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Exec<Value> {
        match receiver {
            Value::Api => self.call_engine(name, args, kwargs),
            Value::Element(selector) => self.call_handle(selector, name, args, kwargs),
            Value::Str(s) => self.call_str(&s, name, args),
            Value::List(list) => self.call_list(&list, name, args, kwargs),
            Value::Dict(dict) => self.call_dict(&dict, name, args),
            other => Err(self.err(format!(
                "AttributeError: '{}' object has no attribute '{}'",
                other.type_name(),
                name
            ))),
        }
    }

    fn to_selector(&mut self, value: &Value) -> Exec<Selector> {
        match value {
            Value::Element(selector) => Ok(selector.clone()),
            Value::Str(name) => self
                .host
                .declare(name.trim_start_matches('$'))
                .map_err(|e| self.engine(e)),
            other => Err(self.err(format!("TypeError: expected an element, not '{}'", other.type_name()))),
        }
    }

    fn direction(&self, value: Option<Value>) -> Exec<Option<ScrollDirection>> {
        match value {
            None | Some(Value::None) => Ok(None),
            Some(Value::Str(s)) => ScrollDirection::parse(&s)
                .map(Some)
                .ok_or_else(|| self.err(format!("ValueError: unknown scroll direction '{}'", s))),
            Some(other) => Err(self.err(format!("TypeError: scroll direction must be a string, not '{}'", other.type_name()))),
        }
    }

    /// `verifier.<api>(...)`.
    fn call_engine(&mut self, name: &str, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Exec<Value> {
        let arg = |i: usize, names: &[&str]| {
            args.get(i)
                .cloned()
                .or_else(|| kwargs.iter().find(|(k, _)| names.contains(&k.as_str())).map(|(_, v)| v.clone()))
        };
        let target = |this: &mut Self| -> Exec<Selector> {
            let value = arg(0, &["element_selector", "selector", "element"])
                .ok_or_else(|| this.err(format!("TypeError: {}() missing required argument: 'element_selector'", name)))?;
            this.to_selector(&value)
        };

        match name {
            "tap" => {
                let sel = target(self)?;
                self.host.tap(&sel).map_err(|e| self.engine(e))?;
                Ok(Value::None)
            }
            "long_tap" => {
                let sel = target(self)?;
                self.host.long_tap(&sel).map_err(|e| self.engine(e))?;
                Ok(Value::None)
            }
            "set_text" => {
                let sel = target(self)?;
                let text = arg(1, &["text", "input_text"])
                    .ok_or_else(|| self.err("TypeError: set_text() missing required argument: 'text'"))?
                    .to_str();
                self.host.set_text(&sel, &text).map_err(|e| self.engine(e))?;
                Ok(Value::None)
            }
            "scroll" => {
                let sel = target(self)?;
                let direction = self.direction(arg(1, &["direction"]))?;
                let at_end = self.host.scroll(&sel, direction).map_err(|e| self.engine(e))?;
                Ok(Value::Bool(at_end))
            }
            "get_text" => {
                let sel = target(self)?;
                Ok(Value::Str(self.host.get_text(&sel).map_err(|e| self.engine(e))?))
            }
            "get_attributes" => {
                let sel = target(self)?;
                let attrs = self.host.get_attributes(&sel).map_err(|e| self.engine(e))?;
                Ok(Value::from_json(&JsonValue::Object(attrs)))
            }
            "back" => {
                self.host.back().map_err(|e| self.engine(e))?;
                Ok(Value::None)
            }
            "get_ui_tree" => Ok(Value::Str(self.host.ui_tree().map_err(|e| self.engine(e))?)),
            "check_ele_exist" => {
                let sel = target(self)?;
                Ok(Value::Bool(self.host.exists(&sel).map_err(|e| self.engine(e))?))
            }
            other => Err(self.err(format!("AttributeError: 'Verifier' object has no attribute '{}'", other))),
        }
    }

    /// Methods on a list handle. With an element argument the action is
    /// scoped to the handle's subtree; without one it applies to the handle.
    fn call_handle(&mut self, handle: Selector, name: &str, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Exec<Value> {
        let scoped = |this: &mut Self, value: Option<&Value>| -> Exec<Selector> {
            match value {
                Some(v @ Value::Element(_)) => Ok(Selector::within(handle.clone(), this.to_selector(v)?)),
                Some(Value::Str(s)) if s.starts_with('$') => Ok(Selector::within(handle.clone(), this.to_selector(&Value::Str(s.clone()))?)),
                _ => Ok(handle.clone()),
            }
        };
        let engine = |this: &Self, e: EngineError| this.engine(e);

        match name {
            "tap" => {
                let sel = scoped(self, args.first())?;
                self.host.tap(&sel).map_err(|e| engine(self, e))?;
                Ok(Value::None)
            }
            "long_tap" => {
                let sel = scoped(self, args.first())?;
                self.host.long_tap(&sel).map_err(|e| engine(self, e))?;
                Ok(Value::None)
            }
            "set_text" => {
                let (sel, text) = match args.as_slice() {
                    [target @ Value::Element(_), text] => (scoped(self, Some(target))?, text.to_str()),
                    [text] => (handle.clone(), text.to_str()),
                    [] => match kwargs.iter().find(|(k, _)| k == "text") {
                        Some((_, text)) => (handle.clone(), text.to_str()),
                        None => return Err(self.err("TypeError: set_text() missing required argument: 'text'")),
                    },
                    _ => return Err(self.err("TypeError: set_text() takes an optional element and a text")),
                };
                self.host.set_text(&sel, &text).map_err(|e| engine(self, e))?;
                Ok(Value::None)
            }
            "get_text" => {
                let sel = scoped(self, args.first())?;
                Ok(Value::Str(self.host.get_text(&sel).map_err(|e| engine(self, e))?))
            }
            "get_attributes" => {
                let sel = scoped(self, args.first())?;
                let attrs = self.host.get_attributes(&sel).map_err(|e| engine(self, e))?;
                Ok(Value::from_json(&JsonValue::Object(attrs)))
            }
            "scroll" => {
                let (sel, direction) = match args.first() {
                    Some(v @ Value::Element(_)) => (scoped(self, Some(v))?, args.get(1).cloned()),
                    other => (handle.clone(), other.cloned()),
                };
                let direction = direction.or_else(|| kwargs.iter().find(|(k, _)| k == "direction").map(|(_, v)| v.clone()));
                let direction = self.direction(direction)?;
                Ok(Value::Bool(self.host.scroll(&sel, direction).map_err(|e| engine(self, e))?))
            }
            "back" => {
                self.host.back().map_err(|e| engine(self, e))?;
                Ok(Value::None)
            }
            "match" => {
                let query = match args.first() {
                    Some(Value::Str(s)) => MatchQuery::Text(s.clone()),
                    Some(d @ Value::Dict(_)) => match d.to_json().map_err(|m| self.err(m))? {
                        JsonValue::Object(map) => MatchQuery::Attributes(map),
                        _ => MatchQuery::Attributes(Map::new()),
                    },
                    _ => return Err(self.err("TypeError: match() expects a text or an attribute dict")),
                };
                let found = self.host.matching(&handle, &query).map_err(|e| engine(self, e))?;
                Ok(Value::list(found.into_iter().map(Value::Element).collect()))
            }
            "exists" => Ok(Value::Bool(self.host.exists(&handle).map_err(|e| engine(self, e))?)),
            other => Err(self.err(format!("AttributeError: 'element_list' object has no attribute '{}'", other))),
        }
    }

    fn call_str(&mut self, s: &str, name: &str, args: Vec<Value>) -> Exec<Value> {
        let str_arg = |this: &Self, i: usize| -> Exec<Option<String>> {
            match args.get(i) {
                None | Some(Value::None) => Ok(None),
                Some(Value::Str(v)) => Ok(Some(v.clone())),
                Some(other) => Err(this.err(format!("TypeError: must be str, not {}", other.type_name()))),
            }
        };
        Ok(match name {
            "lower" => Value::Str(s.to_lowercase()),
            "upper" => Value::Str(s.to_uppercase()),
            "strip" => Value::Str(match str_arg(self, 0)? {
                Some(chars) => s.trim_matches(|c| chars.contains(c)).to_string(),
                None => s.trim().to_string(),
            }),
            "lstrip" => Value::Str(match str_arg(self, 0)? {
                Some(chars) => s.trim_start_matches(|c| chars.contains(c)).to_string(),
                None => s.trim_start().to_string(),
            }),
            "rstrip" => Value::Str(match str_arg(self, 0)? {
                Some(chars) => s.trim_end_matches(|c| chars.contains(c)).to_string(),
                None => s.trim_end().to_string(),
            }),
            "split" => {
                let parts: Vec<Value> = match str_arg(self, 0)? {
                    Some(sep) if sep.is_empty() => return Err(self.err("ValueError: empty separator")),
                    Some(sep) => s.split(sep.as_str()).map(|p| Value::Str(p.to_string())).collect(),
                    None => s.split_whitespace().map(|p| Value::Str(p.to_string())).collect(),
                };
                Value::list(parts)
            }
            "join" => {
                let items = self.iterate(args.first().cloned().unwrap_or(Value::list(Vec::new())))?;
                let mut parts = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Str(p) => parts.push(p),
                        other => {
                            return Err(self.err(format!(
                                "TypeError: sequence item: expected str instance, {} found",
                                other.type_name()
                            )));
                        }
                    }
                }
                Value::Str(parts.join(s))
            }
            "replace" => {
                let from = str_arg(self, 0)?.unwrap_or_default();
                let to = str_arg(self, 1)?.unwrap_or_default();
                Value::Str(s.replace(&from, &to))
            }
            "startswith" => Value::Bool(s.starts_with(&str_arg(self, 0)?.unwrap_or_default())),
            "endswith" => Value::Bool(s.ends_with(&str_arg(self, 0)?.unwrap_or_default())),
            "find" => {
                let needle = str_arg(self, 0)?.unwrap_or_default();
                Value::Int(s.find(&needle).map(|b| s[..b].chars().count() as i64).unwrap_or(-1))
            }
            "count" => Value::Int(s.matches(&str_arg(self, 0)?.unwrap_or_default()).count() as i64),
            "isdigit" => Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())),
            "isalpha" => Value::Bool(!s.is_empty() && s.chars().all(char::is_alphabetic)),
            "format" => Value::Str(self.format_str(s, &args)?),
            other => return Err(self.err(format!("AttributeError: 'str' object has no attribute '{}'", other))),
        })
    }

    /// `str.format` with positional `{}` / `{0}` fields and optional specs.
    fn format_str(&self, template: &str, args: &[Value]) -> Exec<String> {
        let mut out = String::new();
        let mut auto = 0usize;
        let mut chars = template.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '{' => {
                    let mut field = String::new();
                    for f in chars.by_ref() {
                        if f == '}' {
                            break;
                        }
                        field.push(f);
                    }
                    let (key, spec) = match field.split_once(':') {
                        Some((k, s)) => (k.to_string(), Some(s.to_string())),
                        None => (field, None),
                    };
                    let index = if key.is_empty() {
                        auto += 1;
                        auto - 1
                    } else {
                        key.parse::<usize>()
                            .map_err(|_| self.err(format!("KeyError: '{}'", key)))?
                    };
                    let value = args
                        .get(index)
                        .ok_or_else(|| self.err("IndexError: Replacement index out of range"))?;
                    match spec {
                        Some(spec) => out.push_str(&format_with_spec(value, &spec).map_err(|m| self.err(m))?),
                        None => out.push_str(&value.to_str()),
                    }
                }
                other => out.push(other),
            }
        }
        Ok(out)
    }

    fn call_list(
        &mut self,
        list: &Rc<std::cell::RefCell<Vec<Value>>>,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Exec<Value> {
        Ok(match name {
            "append" => {
                let item = args.into_iter().next().ok_or_else(|| self.err("TypeError: append() takes exactly one argument"))?;
                list.borrow_mut().push(item);
                Value::None
            }
            "extend" => {
                let items = self.iterate(args.into_iter().next().unwrap_or(Value::None))?;
                list.borrow_mut().extend(items);
                Value::None
            }
            "insert" => {
                let index = args.first().and_then(Value::as_int).unwrap_or(0);
                let item = args.get(1).cloned().unwrap_or(Value::None);
                let mut items = list.borrow_mut();
                let len = items.len() as i64;
                let at = if index < 0 { (index + len).max(0) } else { index.min(len) };
                items.insert(at as usize, item);
                Value::None
            }
            "pop" => {
                let len = list.borrow().len();
                if len == 0 {
                    return Err(self.err("IndexError: pop from empty list"));
                }
                let i = match args.first() {
                    Some(index) => self.normalize_index(index, len)?,
                    None => len - 1,
                };
                list.borrow_mut().remove(i)
            }
            "remove" => {
                let target = args.first().cloned().unwrap_or(Value::None);
                let pos = list.borrow().iter().position(|v| v.py_eq(&target));
                match pos {
                    Some(p) => {
                        list.borrow_mut().remove(p);
                        Value::None
                    }
                    None => return Err(self.err("ValueError: list.remove(x): x not in list")),
                }
            }
            "index" => {
                let target = args.first().cloned().unwrap_or(Value::None);
                let pos = list.borrow().iter().position(|v| v.py_eq(&target));
                match pos {
                    Some(p) => Value::Int(p as i64),
                    None => return Err(self.err(format!("ValueError: {} is not in list", target.repr()))),
                }
            }
            "count" => {
                let target = args.first().cloned().unwrap_or(Value::None);
                Value::Int(list.borrow().iter().filter(|v| v.py_eq(&target)).count() as i64)
            }
            "reverse" => {
                list.borrow_mut().reverse();
                Value::None
            }
            "copy" => Value::list(list.borrow().clone()),
            "clear" => {
                list.borrow_mut().clear();
                Value::None
            }
            "sort" => {
                let sorted = self.call_builtin(Builtin::Sorted, vec![Value::List(Rc::clone(list))], kwargs)?;
                if let Value::List(sorted) = sorted {
                    let items = sorted.borrow().clone();
                    *list.borrow_mut() = items;
                }
                Value::None
            }
            other => return Err(self.err(format!("AttributeError: 'list' object has no attribute '{}'", other))),
        })
    }

    fn call_dict(&mut self, dict: &Rc<std::cell::RefCell<Vec<(Value, Value)>>>, name: &str, args: Vec<Value>) -> Exec<Value> {
        let key = args.first().cloned().unwrap_or(Value::None);
        Ok(match name {
            "get" => dict
                .borrow()
                .iter()
                .find(|(k, _)| k.py_eq(&key))
                .map(|(_, v)| v.clone())
                .unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None)),
            "keys" => Value::list(dict.borrow().iter().map(|(k, _)| k.clone()).collect()),
            "values" => Value::list(dict.borrow().iter().map(|(_, v)| v.clone()).collect()),
            "items" => Value::list(
                dict.borrow()
                    .iter()
                    .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                    .collect(),
            ),
            "pop" => {
                let pos = dict.borrow().iter().position(|(k, _)| k.py_eq(&key));
                match (pos, args.get(1)) {
                    (Some(p), _) => dict.borrow_mut().remove(p).1,
                    (None, Some(default)) => default.clone(),
                    (None, None) => return Err(self.err(format!("KeyError: {}", key.repr()))),
                }
            }
            "update" => {
                if let Some(Value::Dict(other)) = args.first() {
                    let pairs = other.borrow().clone();
                    let mut target = dict.borrow_mut();
                    for (k, v) in pairs {
                        match target.iter_mut().find(|(existing, _)| existing.py_eq(&k)) {
                            Some(entry) => entry.1 = v,
                            None => target.push((k, v)),
                        }
                    }
                }
                Value::None
            }
            other => return Err(self.err(format!("AttributeError: 'dict' object has no attribute '{}'", other))),
        })
    }
}

fn is_exception_name(name: &str) -> bool {
    name == "Exception" || name.ends_with("Error")
}

fn target_expr(target: &Target) -> Expr {
    match target {
        Target::Name(n) => Expr::Name(n.clone()),
        Target::Tuple(items) => Expr::Tuple(items.iter().map(target_expr).collect()),
        Target::Index { value, index } => Expr::Index {
            value: Box::new(value.clone()),
            index: Box::new(index.clone()),
        },
        Target::Attribute { value, attr } => Expr::Attribute {
            value: Box::new(value.clone()),
            attr: attr.clone(),
        },
    }
}

/// Length of a repeated string or list, refused past `MAX_REPEAT_LEN`.
fn repeat_len(len: usize, times: usize) -> Result<usize, String> {
    match len.checked_mul(times) {
        Some(total) if total <= MAX_REPEAT_LEN => Ok(total),
        _ => Err("MemoryError: repeated sequence too large".into()),
    }
}

/// Arithmetic with Python semantics: `/` is true division, `//` and `%`
/// floor toward negative infinity, integer overflow is an error.
pub fn binop(op: BinOp, left: &Value, right: &Value) -> Result<Value, String> {
    let unsupported = || {
        format!(
            "TypeError: unsupported operand type(s) for {}: '{}' and '{}'",
            op_symbol(op),
            left.type_name(),
            right.type_name()
        )
    };
    let overflow = || "OverflowError: integer overflow".to_string();

    match (op, left, right) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => return Ok(Value::Str(format!("{}{}", a, b))),
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            return Ok(Value::list(items));
        }
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            let mut items = a.as_ref().clone();
            items.extend(b.iter().cloned());
            return Ok(Value::tuple(items));
        }
        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if n.as_int().is_some() => {
            let times = n.as_int().unwrap_or(0).max(0) as usize;
            repeat_len(s.len(), times)?;
            return Ok(Value::Str(s.repeat(times)));
        }
        (BinOp::Mul, Value::List(l), n) | (BinOp::Mul, n, Value::List(l)) if n.as_int().is_some() => {
            let times = n.as_int().unwrap_or(0).max(0) as usize;
            let items = l.borrow();
            if items.is_empty() {
                return Ok(Value::list(Vec::new()));
            }
            let mut out = Vec::with_capacity(repeat_len(items.len(), times)?);
            for _ in 0..times {
                out.extend(items.iter().cloned());
            }
            return Ok(Value::list(out));
        }
        _ => {}
    }

    if let (Some(a), Some(b)) = (left.as_int(), right.as_int()) {
        return match op {
            BinOp::Add => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Sub => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Mul => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Div => {
                if b == 0 {
                    Err("ZeroDivisionError: division by zero".into())
                } else {
                    Ok(Value::Float(a as f64 / b as f64))
                }
            }
            BinOp::FloorDiv => {
                if b == 0 {
                    return Err("ZeroDivisionError: integer division or modulo by zero".into());
                }
                let q = a.checked_div(b).ok_or_else(overflow)?;
                Ok(Value::Int(if a % b != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q }))
            }
            BinOp::Mod => {
                if b == 0 {
                    return Err("ZeroDivisionError: integer division or modulo by zero".into());
                }
                let r = a.checked_rem(b).ok_or_else(overflow)?;
                Ok(Value::Int(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r }))
            }
            BinOp::Pow => {
                if b >= 0 {
                    u32::try_from(b)
                        .ok()
                        .and_then(|e| a.checked_pow(e))
                        .map(Value::Int)
                        .ok_or_else(overflow)
                } else {
                    Ok(Value::Float((a as f64).powf(b as f64)))
                }
            }
        };
    }

    let (Some(a), Some(b)) = (left.as_number(), right.as_number()) else {
        return Err(unsupported());
    };
    let zero = || "ZeroDivisionError: float division by zero".to_string();
    Ok(Value::Float(match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(zero());
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(zero());
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(zero());
            }
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) { r + b } else { r }
        }
        BinOp::Pow => a.powf(b),
    }))
}

fn op_symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::FloorDiv => "//",
        BinOp::Mod => "%",
        BinOp::Pow => "**",
    }
}
