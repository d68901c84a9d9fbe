use thiserror::Error;

use crate::markup::xpath::{PathError, PathExpr};

#[derive(Debug, Error, PartialEq)]
pub enum MarkupError {
    #[error("unexpected end of markup at offset {0}")]
    UnexpectedEof(usize),

    #[error("malformed markup at offset {offset}: {reason}")]
    Malformed { offset: usize, reason: String },

    #[error("closing tag </{found}> does not match <{expected}> at offset {offset}")]
    Mismatched {
        expected: String,
        found: String,
        offset: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkupNode {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    /// Text that directly follows the opening tag on its line.
    pub text: String,
    pub children: Vec<usize>,
    pub parent: Option<usize>,
}

impl MarkupNode {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Arena of markup elements in document order. Slot 0 is the document node.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkupDocument {
    nodes: Vec<MarkupNode>,
}

pub const DOCUMENT_NODE: usize = 0;

impl Default for MarkupDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkupDocument {
    pub fn new() -> Self {
        Self {
            nodes: vec![MarkupNode {
                tag: "#document".into(),
                attrs: Vec::new(),
                text: String::new(),
                children: Vec::new(),
                parent: None,
            }],
        }
    }

    /// Append an element under `parent`. Callers must append in document order.
    pub fn push_element(
        &mut self,
        parent: usize,
        tag: impl Into<String>,
        attrs: Vec<(String, String)>,
        text: impl Into<String>,
    ) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(MarkupNode {
            tag: tag.into(),
            attrs,
            text: text.into(),
            children: Vec::new(),
            parent: Some(parent),
        });
        self.nodes[parent].children.push(idx);
        idx
    }

    pub fn node(&self, idx: usize) -> &MarkupNode {
        &self.nodes[idx]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn root_element(&self) -> Option<usize> {
        self.nodes[DOCUMENT_NODE].children.first().copied()
    }

    /// Concatenated text of the node and all its descendants.
    pub fn string_value(&self, idx: usize) -> String {
        let mut out = self.nodes[idx].text.clone();
        for &child in &self.nodes[idx].children {
            out.push_str(&self.string_value(child));
        }
        out
    }

    pub fn select(&self, expr: &str) -> Result<Vec<usize>, PathError> {
        let compiled = PathExpr::parse(expr)?;
        Ok(compiled.evaluate(self))
    }

    /// Numeric `id` attribute of the first node matched by `expr`.
    pub fn select_first_id(&self, expr: &str) -> Result<Option<usize>, PathError> {
        let matches = self.select(expr)?;
        Ok(matches
            .first()
            .and_then(|&n| self.nodes[n].attr("id"))
            .and_then(|id| id.parse().ok()))
    }

    pub fn parse(src: &str) -> Result<Self, MarkupError> {
        let mut parser = Parser {
            src: src.as_bytes(),
            text: src,
            pos: 0,
            doc: MarkupDocument::new(),
        };
        parser.skip_ws();
        while parser.pos < parser.src.len() {
            parser.element(DOCUMENT_NODE)?;
            parser.skip_ws();
        }
        Ok(parser.doc)
    }
}

struct Parser<'a> {
    src: &'a [u8],
    text: &'a str,
    pos: usize,
    doc: MarkupDocument,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn starts_with(&self, s: &str) -> bool {
        self.src[self.pos..].starts_with(s.as_bytes())
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\n' | b'\r' | b'\t')) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, byte: u8) -> Result<(), MarkupError> {
        match self.peek() {
            Some(b) if b == byte => {
                self.pos += 1;
                Ok(())
            }
            Some(b) => Err(self.malformed(format!("expected '{}', found '{}'", byte as char, b as char))),
            None => Err(MarkupError::UnexpectedEof(self.pos)),
        }
    }

    fn malformed(&self, reason: impl Into<String>) -> MarkupError {
        MarkupError::Malformed {
            offset: self.pos,
            reason: reason.into(),
        }
    }

    fn name(&mut self) -> Result<String, MarkupError> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b':' | b'.') {
                self.pos += 1;
            } else {
                break;
            }
        }
        if start == self.pos {
            return Err(self.malformed("expected a name"));
        }
        Ok(self.text[start..self.pos].to_string())
    }

    fn element(&mut self, parent: usize) -> Result<usize, MarkupError> {
        self.expect(b'<')?;
        let tag = self.name()?;
        let mut attrs = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b'>') => {
                    self.pos += 1;
                    break;
                }
                Some(b'/') => {
                    self.pos += 1;
                    self.expect(b'>')?;
                    return Ok(self.doc.push_element(parent, tag, attrs, ""));
                }
                Some(_) => {
                    let key = self.name()?;
                    self.skip_ws();
                    self.expect(b'=')?;
                    self.skip_ws();
                    let quote = match self.peek() {
                        Some(q @ (b'\'' | b'"')) => q,
                        Some(_) => return Err(self.malformed("attribute value must be quoted")),
                        None => return Err(MarkupError::UnexpectedEof(self.pos)),
                    };
                    self.pos += 1;
                    let start = self.pos;
                    while self.peek().is_some_and(|b| b != quote) {
                        self.pos += 1;
                    }
                    if self.peek().is_none() {
                        return Err(MarkupError::UnexpectedEof(self.pos));
                    }
                    let value = unescape(&self.text[start..self.pos]);
                    self.pos += 1;
                    attrs.push((key, value));
                }
                None => return Err(MarkupError::UnexpectedEof(self.pos)),
            }
        }

        let idx = self.doc.push_element(parent, tag.clone(), attrs, "");
        let mut first_text = true;
        loop {
            let start = self.pos;
            while self.peek().is_some_and(|b| b != b'<') {
                self.pos += 1;
            }
            if self.peek().is_none() {
                return Err(MarkupError::UnexpectedEof(self.pos));
            }
            if first_text {
                let raw = &self.text[start..self.pos];
                let line = raw.split('\n').next().unwrap_or("");
                self.doc.nodes[idx].text = unescape(line);
                first_text = false;
            }
            if self.starts_with("</") {
                self.pos += 2;
                let offset = self.pos;
                let closing = self.name()?;
                if closing != tag {
                    return Err(MarkupError::Mismatched {
                        expected: tag,
                        found: closing,
                        offset,
                    });
                }
                self.skip_ws();
                self.expect(b'>')?;
                return Ok(idx);
            }
            self.element(idx)?;
        }
    }
}

pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn unescape(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let Some(semi) = rest.find(';') else {
            break;
        };
        let entity = &rest[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ if entity.starts_with("#x") => u32::from_str_radix(&entity[2..], 16).ok().and_then(char::from_u32),
            _ if entity.starts_with('#') => entity[1..].parse().ok().and_then(char::from_u32),
            _ => None,
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
