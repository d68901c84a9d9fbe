use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value as JsonValue;

use crate::engine::selector::Selector;
use crate::script::ast::{Expr, Param, Stmt};

pub type Env = Rc<RefCell<Scope>>;

#[derive(Debug, Default)]
pub struct Scope {
    vars: HashMap<String, Value>,
    parent: Option<Env>,
}

impl Scope {
    pub fn root() -> Env {
        Rc::new(RefCell::new(Scope::default()))
    }

    pub fn child(parent: &Env) -> Env {
        Rc::new(RefCell::new(Scope {
            vars: HashMap::new(),
            parent: Some(Rc::clone(parent)),
        }))
    }
}

pub fn lookup(env: &Env, name: &str) -> Option<Value> {
    let scope = env.borrow();
    match scope.vars.get(name) {
        Some(v) => Some(v.clone()),
        None => scope.parent.as_ref().and_then(|p| lookup(p, name)),
    }
}

pub fn assign(env: &Env, name: &str, value: Value) {
    env.borrow_mut().vars.insert(name.to_string(), value);
}

#[derive(Debug)]
pub enum FunctionBody {
    Block(Vec<Stmt>),
    Lambda(Expr),
}

pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub defaults: Vec<Option<Value>>,
    pub body: FunctionBody,
    pub closure: Env,
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Function").field("name", &self.name).finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Print,
    Len,
    Range,
    Str,
    Int,
    Float,
    Bool,
    Enumerate,
    List,
    Dict,
    Tuple,
    Min,
    Max,
    Sum,
    Sorted,
    Reversed,
    Abs,
    Any,
    All,
    Zip,
    Round,
    Isinstance,
    ElementList,
    Sleep,
}

impl Builtin {
    pub fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "print" => Builtin::Print,
            "len" => Builtin::Len,
            "range" => Builtin::Range,
            "str" => Builtin::Str,
            "int" => Builtin::Int,
            "float" => Builtin::Float,
            "bool" => Builtin::Bool,
            "enumerate" => Builtin::Enumerate,
            "list" => Builtin::List,
            "dict" => Builtin::Dict,
            "tuple" => Builtin::Tuple,
            "min" => Builtin::Min,
            "max" => Builtin::Max,
            "sum" => Builtin::Sum,
            "sorted" => Builtin::Sorted,
            "reversed" => Builtin::Reversed,
            "abs" => Builtin::Abs,
            "any" => Builtin::Any,
            "all" => Builtin::All,
            "zip" => Builtin::Zip,
            "round" => Builtin::Round,
            "isinstance" => Builtin::Isinstance,
            "element_list" => Builtin::ElementList,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Print => "print",
            Builtin::Len => "len",
            Builtin::Range => "range",
            Builtin::Str => "str",
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::Bool => "bool",
            Builtin::Enumerate => "enumerate",
            Builtin::List => "list",
            Builtin::Dict => "dict",
            Builtin::Tuple => "tuple",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Sum => "sum",
            Builtin::Sorted => "sorted",
            Builtin::Reversed => "reversed",
            Builtin::Abs => "abs",
            Builtin::Any => "any",
            Builtin::All => "all",
            Builtin::Zip => "zip",
            Builtin::Round => "round",
            Builtin::Isinstance => "isinstance",
            Builtin::ElementList => "element_list",
            Builtin::Sleep => "sleep",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<RefCell<Vec<(Value, Value)>>>),
    Element(Selector),
    Function(Rc<Function>),
    Builtin(Builtin),
    Method { receiver: Box<Value>, name: String },
    /// The engine instance scripts call through (`verifier.tap(...)`).
    Api,
    /// The `time` module; only `sleep` is provided.
    TimeModule,
}

impl Value {
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(pairs: Vec<(Value, Value)>) -> Self {
        Value::Dict(Rc::new(RefCell::new(pairs)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Element(_) => "element_list",
            Value::Function(_) => "function",
            Value::Builtin(_) | Value::Method { .. } => "builtin_function_or_method",
            Value::Api => "Verifier",
            Value::TimeModule => "module",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            _ => true,
        }
    }

    /// `str(value)`.
    pub fn to_str(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            other => other.repr(),
        }
    }

    /// `repr(value)`.
    pub fn repr(&self) -> String {
        match self {
            Value::None => "None".into(),
            Value::Bool(true) => "True".into(),
            Value::Bool(false) => "False".into(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Value::List(l) => format!("[{}]", join_repr(&l.borrow())),
            Value::Tuple(t) if t.len() == 1 => format!("({},)", t[0].repr()),
            Value::Tuple(t) => format!("({})", join_repr(t)),
            Value::Dict(d) => {
                let parts: Vec<String> = d
                    .borrow()
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Value::Element(sel) => format!("<element {}>", sel),
            Value::Function(f) => format!("<function {}>", f.name),
            Value::Builtin(b) => format!("<built-in function {}>", b.name()),
            Value::Method { name, .. } => format!("<method {}>", name),
            Value::Api => "<verifier>".into(),
            Value::TimeModule => "<module 'time'>".into(),
        }
    }

    pub fn py_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => seq_eq(&a.borrow(), &b.borrow()),
            (Value::Tuple(a), Value::Tuple(b)) => seq_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.iter().any(|(k2, v2)| k.py_eq(k2) && v.py_eq(v2)))
            }
            (Value::Element(a), Value::Element(b)) => a == b,
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Api, Value::Api) => true,
            _ => match (self.as_number(), other.as_number()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// Identity for `is`; value types compare by value.
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::None, Value::None) => true,
            _ => self.py_eq(other),
        }
    }

    pub fn py_cmp(&self, other: &Value) -> Result<Ordering, String> {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::List(a), Value::List(b)) => seq_cmp(&a.borrow(), &b.borrow()),
            (Value::Tuple(a), Value::Tuple(b)) => seq_cmp(a, b),
            _ => match (self.as_number(), other.as_number()) {
                (Some(a), Some(b)) => a
                    .partial_cmp(&b)
                    .ok_or_else(|| "TypeError: cannot order NaN".to_string()),
                _ => Err(format!(
                    "TypeError: '<' not supported between instances of '{}' and '{}'",
                    self.type_name(),
                    other.type_name()
                )),
            },
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(*b as i64),
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn from_json(json: &JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::None,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(0.0)),
            },
            JsonValue::String(s) => Value::Str(s.clone()),
            JsonValue::Array(items) => Value::list(items.iter().map(Value::from_json).collect()),
            JsonValue::Object(map) => Value::dict(
                map.iter()
                    .map(|(k, v)| (Value::Str(k.clone()), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> Result<JsonValue, String> {
        Ok(match self {
            Value::None => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::from(*i),
            Value::Float(f) => JsonValue::from(*f),
            Value::Str(s) => JsonValue::String(s.clone()),
            Value::List(l) => JsonValue::Array(l.borrow().iter().map(Value::to_json).collect::<Result<_, _>>()?),
            Value::Tuple(t) => JsonValue::Array(t.iter().map(Value::to_json).collect::<Result<_, _>>()?),
            Value::Dict(d) => {
                let mut map = serde_json::Map::new();
                for (k, v) in d.borrow().iter() {
                    map.insert(k.to_str(), v.to_json()?);
                }
                JsonValue::Object(map)
            }
            other => return Err(format!("TypeError: {} is not JSON serializable", other.type_name())),
        })
    }
}

fn join_repr(items: &[Value]) -> String {
    items.iter().map(Value::repr).collect::<Vec<_>>().join(", ")
}

fn seq_eq(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.py_eq(y))
}

fn seq_cmp(a: &[Value], b: &[Value]) -> Result<Ordering, String> {
    for (x, y) in a.iter().zip(b) {
        if !x.py_eq(y) {
            return x.py_cmp(y);
        }
    }
    Ok(a.len().cmp(&b.len()))
}

pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".into();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf".into() } else { "-inf".into() };
    }
    if f == f.trunc() && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

const MAX_FORMAT_WIDTH: usize = 10_000;

/// Apply a format spec of the form `[[fill]align][width][,][.precision][type]`.
pub fn format_with_spec(value: &Value, spec: &str) -> Result<String, String> {
    let chars: Vec<char> = spec.chars().collect();
    let mut i = 0;
    let mut fill = ' ';
    let mut align: Option<char> = None;
    if chars.len() >= 2 && matches!(chars[1], '<' | '>' | '^') {
        fill = chars[0];
        align = Some(chars[1]);
        i = 2;
    } else if chars.first().is_some_and(|c| matches!(c, '<' | '>' | '^')) {
        align = Some(chars[0]);
        i = 1;
    }
    let mut zero_pad = false;
    if chars.get(i) == Some(&'0') {
        zero_pad = true;
        i += 1;
    }
    let too_wide = || format!("ValueError: format width too large in '{}'", spec);
    let mut width = 0usize;
    while let Some(d) = chars.get(i).and_then(|c| c.to_digit(10)) {
        width = width * 10 + d as usize;
        if width > MAX_FORMAT_WIDTH {
            return Err(too_wide());
        }
        i += 1;
    }
    let grouping = chars.get(i) == Some(&',');
    if grouping {
        i += 1;
    }
    let mut precision: Option<usize> = None;
    if chars.get(i) == Some(&'.') {
        i += 1;
        let mut p = 0usize;
        while let Some(d) = chars.get(i).and_then(|c| c.to_digit(10)) {
            p = p * 10 + d as usize;
            if p > MAX_FORMAT_WIDTH {
                return Err(too_wide());
            }
            i += 1;
        }
        precision = Some(p);
    }
    let kind = chars.get(i).copied();
    if i + kind.map_or(0, |_| 1) != chars.len() {
        return Err(format!("ValueError: invalid format specifier '{}'", spec));
    }

    let mut body = match kind {
        Some('f') | Some('F') => {
            let n = value
                .as_number()
                .ok_or_else(|| format!("ValueError: unknown format code 'f' for {}", value.type_name()))?;
            format!("{:.*}", precision.unwrap_or(6), n)
        }
        Some('%') => {
            let n = value
                .as_number()
                .ok_or_else(|| format!("ValueError: unknown format code '%' for {}", value.type_name()))?;
            format!("{:.*}%", precision.unwrap_or(6), n * 100.0)
        }
        Some('d') => value
            .as_int()
            .ok_or_else(|| format!("ValueError: unknown format code 'd' for {}", value.type_name()))?
            .to_string(),
        Some('s') | None => match (precision, value) {
            (Some(p), Value::Float(f)) => format!("{:.*}", p, f),
            (Some(p), Value::Str(s)) => s.chars().take(p).collect(),
            _ => value.to_str(),
        },
        Some(other) => return Err(format!("ValueError: unknown format code '{}'", other)),
    };
    if grouping {
        body = group_thousands(&body);
    }

    let len = body.chars().count();
    if len >= width {
        return Ok(body);
    }
    let pad = width - len;
    let numeric = value.as_number().is_some() && !matches!(value, Value::Bool(_));
    if zero_pad && align.is_none() && numeric {
        let (sign, digits) = match body.strip_prefix('-') {
            Some(rest) => ("-", rest.to_string()),
            None => ("", body.clone()),
        };
        return Ok(format!("{}{}{}", sign, "0".repeat(pad), digits));
    }
    let align = align.unwrap_or(if numeric { '>' } else { '<' });
    let fill_str = |n: usize| fill.to_string().repeat(n);
    Ok(match align {
        '>' => format!("{}{}", fill_str(pad), body),
        '^' => format!("{}{}{}", fill_str(pad / 2), body, fill_str(pad - pad / 2)),
        _ => format!("{}{}", body, fill_str(pad)),
    })
}

fn group_thousands(body: &str) -> String {
    let (sign, rest) = match body.strip_prefix('-') {
        Some(r) => ("-", r),
        None => ("", body),
    };
    let (int_part, frac) = match rest.find('.') {
        Some(p) => (&rest[..p], &rest[p..]),
        None => (rest, ""),
    };
    let mut out = String::new();
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    format!("{}{}{}", sign, out, frac)
}
