use crate::script::error::ScriptError;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    /// Body of an f-string with escapes already applied.
    FStr(String),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

const OPERATORS: [&str; 36] = [
    "**=", "//=", "->", "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "+", "-", "*", "/", "%", "<",
    ">", "=", "(", ")", "[", "]", "{", "}", ",", ":", ".", ";", "@", "&", "|", "~",
];

pub fn tokenize(src: &str) -> Result<Vec<Token>, ScriptError> {
    Lexer {
        chars: src.chars().collect(),
        pos: 0,
        line: 1,
        depth: 0,
        indents: vec![0],
        tokens: Vec::new(),
    }
    .run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    depth: usize,
    indents: Vec<usize>,
    tokens: Vec<Token>,
}

impl Lexer {
    fn run(mut self) -> Result<Vec<Token>, ScriptError> {
        let mut at_line_start = true;
        while self.pos < self.chars.len() {
            if at_line_start && self.depth == 0 {
                if self.handle_indentation()? {
                    continue;
                }
                at_line_start = false;
            }
            let c = self.chars[self.pos];
            match c {
                '\n' => {
                    self.pos += 1;
                    if self.depth == 0 {
                        self.push(Tok::Newline);
                        at_line_start = true;
                    }
                    self.line += 1;
                }
                ' ' | '\t' | '\r' => self.pos += 1,
                '#' => {
                    while self.pos < self.chars.len() && self.chars[self.pos] != '\n' {
                        self.pos += 1;
                    }
                }
                '\\' if self.peek(1) == Some('\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                '\\' if self.peek(1) == Some('\r') && self.peek(2) == Some('\n') => {
                    self.pos += 3;
                    self.line += 1;
                }
                c if c.is_ascii_digit() || (c == '.' && self.peek(1).is_some_and(|n| n.is_ascii_digit())) => {
                    self.number()?
                }
                c if c.is_alphabetic() || c == '_' => {
                    if !self.string_with_prefix()? {
                        self.name();
                    }
                }
                '\'' | '"' => {
                    let line = self.line;
                    let s = self.string(false)?;
                    self.tokens.push(Token { tok: Tok::Str(s), line });
                }
                _ => self.operator()?,
            }
        }
        if self.tokens.last().is_some_and(|t| t.tok != Tok::Newline) {
            self.push(Tok::Newline);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::Eof);
        Ok(self.tokens)
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token { tok, line: self.line });
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    /// Returns true when the whole line was blank or a comment and got consumed.
    fn handle_indentation(&mut self) -> Result<bool, ScriptError> {
        let mut width = 0usize;
        let mut p = self.pos;
        while let Some(&c) = self.chars.get(p) {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / 8 + 1) * 8,
                '\r' | '\x0c' => {}
                _ => break,
            }
            p += 1;
        }
        match self.chars.get(p) {
            None => {
                self.pos = p;
                return Ok(true);
            }
            Some('\n') => {
                self.pos = p + 1;
                self.line += 1;
                return Ok(true);
            }
            Some('#') => {
                while p < self.chars.len() && self.chars[p] != '\n' {
                    p += 1;
                }
                self.pos = p;
                if p < self.chars.len() {
                    self.pos += 1;
                    self.line += 1;
                }
                return Ok(true);
            }
            _ => {}
        }
        self.pos = p;
        let current = *self.indents.last().unwrap_or(&0);
        if width > current {
            self.indents.push(width);
            self.push(Tok::Indent);
        } else {
            while width < *self.indents.last().unwrap_or(&0) {
                self.indents.pop();
                self.push(Tok::Dedent);
            }
            if width != *self.indents.last().unwrap_or(&0) {
                return Err(ScriptError::syntax(self.line, "unindent does not match any outer indentation level"));
            }
        }
        Ok(false)
    }

    fn number(&mut self) -> Result<(), ScriptError> {
        let start = self.pos;
        let mut is_float = false;
        if self.chars[self.pos] == '0' && matches!(self.peek(1), Some('x' | 'X')) {
            self.pos += 2;
            while self.peek(0).is_some_and(|c| c.is_ascii_hexdigit() || c == '_') {
                self.pos += 1;
            }
            let text: String = self.chars[start + 2..self.pos].iter().filter(|c| **c != '_').collect();
            let value = i64::from_str_radix(&text, 16)
                .map_err(|_| ScriptError::syntax(self.line, format!("invalid hex literal '0x{}'", text)))?;
            self.push(Tok::Int(value));
            return Ok(());
        }
        while let Some(c) = self.peek(0) {
            if c.is_ascii_digit() || c == '_' {
                self.pos += 1;
            } else if c == '.' && !is_float {
                is_float = true;
                self.pos += 1;
            } else if matches!(c, 'e' | 'E') {
                is_float = true;
                self.pos += 1;
                if matches!(self.peek(0), Some('+' | '-')) {
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
        let text: String = self.chars[start..self.pos].iter().filter(|c| **c != '_').collect();
        let tok = if is_float {
            Tok::Float(
                text.parse()
                    .map_err(|_| ScriptError::syntax(self.line, format!("invalid number '{}'", text)))?,
            )
        } else {
            Tok::Int(
                text.parse()
                    .map_err(|_| ScriptError::syntax(self.line, format!("integer literal too large '{}'", text)))?,
            )
        };
        self.push(tok);
        Ok(())
    }

    fn name(&mut self) {
        let start = self.pos;
        while self.peek(0).is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect();
        self.push(Tok::Name(name));
    }

    /// String literal with an `r`, `f`, `b` or `u` prefix (or a pair of them).
    fn string_with_prefix(&mut self) -> Result<bool, ScriptError> {
        let mut len = 0;
        while len < 2 && self.peek(len).is_some_and(|c| matches!(c.to_ascii_lowercase(), 'r' | 'f' | 'b' | 'u')) {
            len += 1;
        }
        if len == 0 || !matches!(self.peek(len), Some('\'' | '"')) {
            return Ok(false);
        }
        let prefix: String = self.chars[self.pos..self.pos + len].iter().map(|c| c.to_ascii_lowercase()).collect();
        let line = self.line;
        self.pos += len;
        let raw = prefix.contains('r');
        let body = self.string(raw)?;
        let tok = if prefix.contains('f') { Tok::FStr(body) } else { Tok::Str(body) };
        self.tokens.push(Token { tok, line });
        Ok(true)
    }

    fn string(&mut self, raw: bool) -> Result<String, ScriptError> {
        let quote = self.chars[self.pos];
        let triple = self.peek(1) == Some(quote) && self.peek(2) == Some(quote);
        let start_line = self.line;
        self.pos += if triple { 3 } else { 1 };
        let mut out = String::new();
        loop {
            let Some(c) = self.peek(0) else {
                return Err(ScriptError::syntax(start_line, "unterminated string literal"));
            };
            if c == quote {
                if !triple {
                    self.pos += 1;
                    return Ok(out);
                }
                if self.peek(1) == Some(quote) && self.peek(2) == Some(quote) {
                    self.pos += 3;
                    return Ok(out);
                }
            }
            if c == '\n' {
                if !triple {
                    return Err(ScriptError::syntax(start_line, "unterminated string literal"));
                }
                self.line += 1;
            }
            if c == '\\' && !raw {
                let next = self.peek(1);
                self.pos += 2;
                match next {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('0') => out.push('\0'),
                    Some('\\') => out.push('\\'),
                    Some('\'') => out.push('\''),
                    Some('"') => out.push('"'),
                    Some('\n') => self.line += 1,
                    Some(other) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => return Err(ScriptError::syntax(start_line, "unterminated string literal")),
                }
                continue;
            }
            if c == '\\' && raw {
                if let Some(next) = self.peek(1) {
                    out.push('\\');
                    out.push(next);
                    self.pos += 2;
                    continue;
                }
            }
            out.push(c);
            self.pos += 1;
        }
    }

    fn operator(&mut self) -> Result<(), ScriptError> {
        for op in OPERATORS {
            let matches = op.chars().enumerate().all(|(i, c)| self.peek(i) == Some(c));
            if matches {
                self.pos += op.chars().count();
                match op {
                    "(" | "[" | "{" => self.depth += 1,
                    ")" | "]" | "}" => self.depth = self.depth.saturating_sub(1),
                    _ => {}
                }
                self.push(Tok::Op(op));
                return Ok(());
            }
        }
        Err(ScriptError::syntax(
            self.line,
            format!("unexpected character '{}'", self.chars[self.pos]),
        ))
    }
}
