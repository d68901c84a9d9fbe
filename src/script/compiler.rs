//! Rewrites an authored script into its executable form.
//!
//! Every `$name` reference gets exactly one handle declaration
//! (`name = element_list('name')`) placed before the statement that first
//! uses it, every engine call written as a free function becomes a method
//! call on the engine instance, and the whole body is wrapped into a single
//! entry function. String literals and comments are never rewritten.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const ENGINE_NAME: &str = "verifier";
pub const ENTRY_POINT: &str = "__solution__";
pub const HANDLE_CONSTRUCTOR: &str = "element_list";

pub const API_NAMES: [&str; 9] = [
    "long_tap",
    "tap",
    "set_text",
    "scroll",
    "get_text",
    "get_attributes",
    "back",
    "get_ui_tree",
    "check_ele_exist",
];

const BODY_INDENT: &str = "    ";

static SYMBOL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$([\w%]+)").expect("valid symbol regex"));
static API_CALL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(long_tap|tap|set_text|scroll|get_text|get_attributes|back|get_ui_tree|check_ele_exist)\s*\(")
        .expect("valid api regex")
});
static NON_WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\W").expect("valid sanitize regex"));

/// One distinct symbolic reference of a script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRef {
    /// Name as written after `$`.
    pub name: String,
    /// Identifier it is bound to in the executable form.
    pub handle: String,
    /// 1-based authored line of the first use.
    pub first_line: usize,
}

/// Authored text, executable text and the line map between them. All line
/// numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledScript {
    pub original: String,
    pub executable: String,
    /// Executable line -> authored line.
    pub line_map: BTreeMap<usize, usize>,
    pub symbols: Vec<SymbolRef>,
}

impl CompiledScript {
    pub fn compile(script: &str) -> Self {
        Compiler::default().run(script)
    }

    pub fn original_line(&self, executable_line: usize) -> Option<usize> {
        self.line_map.get(&executable_line).copied()
    }

    pub fn executable_source(&self, line: usize) -> Option<&str> {
        line.checked_sub(1).and_then(|i| self.executable.lines().nth(i))
    }

    pub fn original_source(&self, line: usize) -> Option<&str> {
        line.checked_sub(1).and_then(|i| self.original.lines().nth(i))
    }

    pub fn symbol_for_handle(&self, handle: &str) -> Option<&SymbolRef> {
        self.symbols.iter().find(|s| s.handle == handle)
    }

    pub fn symbol_names(&self) -> impl Iterator<Item = &str> {
        self.symbols.iter().map(|s| s.name.as_str())
    }
}

/// `\W` becomes `_`; a leading digit gets a `_` prefix.
pub fn sanitize_name(name: &str) -> String {
    let replaced = NON_WORD_RE.replace_all(name, "_").into_owned();
    if replaced.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{}", replaced)
    } else {
        replaced
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmentKind {
    Code,
    Str,
    Comment,
}

#[derive(Debug)]
struct Segment {
    kind: SegmentKind,
    text: String,
}

struct OutLine {
    text: String,
    original: Option<usize>,
}

#[derive(Default)]
struct Compiler {
    /// Open triple-quote delimiter carried across lines.
    open_triple: Option<&'static str>,
    /// Bracket depth carried across lines.
    depth: i32,
    continued: bool,
}

impl Compiler {
    fn run(mut self, script: &str) -> CompiledScript {
        let mut body: Vec<OutLine> = Vec::new();
        let mut symbols: Vec<SymbolRef> = Vec::new();
        let mut stmt_start = 0usize;
        let mut stmt_indent = String::new();
        let mut stmt_is_clause = false;
        let mut has_code = false;

        for (idx, line) in script.split('\n').enumerate() {
            let line = line.strip_suffix('\r').unwrap_or(line);
            let original_line = idx + 1;
            let starts_statement = self.open_triple.is_none() && self.depth == 0 && !self.continued;
            if starts_statement && !line.trim().is_empty() {
                stmt_start = body.len();
                stmt_indent = leading_whitespace(line).to_string();
                let head = line.trim_start();
                stmt_is_clause = ["elif", "else", "except", "finally"]
                    .iter()
                    .any(|k| head.starts_with(k) && !head[k.len()..].starts_with(|c: char| c.is_alphanumeric() || c == '_'));
            }

            let segments = self.segment(line);
            let mut rewritten = String::with_capacity(line.len());
            for segment in &segments {
                if segment.kind != SegmentKind::Code {
                    rewritten.push_str(&segment.text);
                    continue;
                }
                if !segment.text.trim().is_empty() {
                    has_code = true;
                }
                for cap in SYMBOL_RE.captures_iter(&segment.text) {
                    let name = cap[1].to_string();
                    if symbols.iter().any(|s| s.name == name) {
                        continue;
                    }
                    let handle = sanitize_name(&name);
                    let (at, indent) = if stmt_is_clause {
                        (0, String::new())
                    } else {
                        (stmt_start, stmt_indent.clone())
                    };
                    let declaration = format!("{}{}{} = {}('{}')", BODY_INDENT, indent, handle, HANDLE_CONSTRUCTOR, name);
                    debug!(symbol = %name, handle = %handle, line = original_line, "declared handle");
                    body.insert(
                        at,
                        OutLine {
                            text: declaration,
                            original: Some(original_line),
                        },
                    );
                    if !stmt_is_clause || stmt_start >= at {
                        stmt_start += 1;
                    }
                    symbols.push(SymbolRef {
                        name,
                        handle,
                        first_line: original_line,
                    });
                }
                let replaced = SYMBOL_RE.replace_all(&segment.text, |cap: &regex::Captures| sanitize_name(&cap[1]));
                rewritten.push_str(&rewrite_api_calls(&replaced));
            }

            body.push(OutLine {
                text: if rewritten.is_empty() {
                    String::new()
                } else {
                    format!("{}{}", BODY_INDENT, rewritten)
                },
                original: Some(original_line),
            });
        }

        if !has_code {
            body.push(OutLine {
                text: format!("{}pass", BODY_INDENT),
                original: None,
            });
        }

        let mut lines = Vec::with_capacity(body.len() + 2);
        let mut line_map = BTreeMap::new();
        lines.push(format!("def {}():", ENTRY_POINT));
        for out in body {
            lines.push(out.text);
            if let Some(orig) = out.original {
                line_map.insert(lines.len(), orig);
            }
        }
        lines.push(format!("{}()", ENTRY_POINT));

        CompiledScript {
            original: script.to_string(),
            executable: lines.join("\n"),
            line_map,
            symbols,
        }
    }

    /// Split a line into code, string and comment segments while tracking
    /// brackets and open triple-quoted strings across lines.
    fn segment(&mut self, line: &str) -> Vec<Segment> {
        let mut segments = Vec::new();
        let mut rest = line;

        if let Some(delim) = self.open_triple {
            match rest.find(delim) {
                Some(end) => {
                    let (s, r) = rest.split_at(end + delim.len());
                    segments.push(Segment {
                        kind: SegmentKind::Str,
                        text: s.to_string(),
                    });
                    rest = r;
                    self.open_triple = None;
                }
                None => {
                    segments.push(Segment {
                        kind: SegmentKind::Str,
                        text: rest.to_string(),
                    });
                    return segments;
                }
            }
        }

        let mut code = String::new();
        let mut chars = rest.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            match c {
                '#' => {
                    flush(&mut segments, &mut code);
                    segments.push(Segment {
                        kind: SegmentKind::Comment,
                        text: rest[i..].to_string(),
                    });
                    self.continued = false;
                    return segments;
                }
                '\'' | '"' => {
                    flush(&mut segments, &mut code);
                    let tail = &rest[i..];
                    let triple = if c == '"' { "\"\"\"" } else { "'''" };
                    if tail.starts_with(triple) {
                        match tail[3..].find(triple) {
                            Some(end) => {
                                let len = 3 + end + 3;
                                segments.push(Segment {
                                    kind: SegmentKind::Str,
                                    text: tail[..len].to_string(),
                                });
                                skip(&mut chars, i + len);
                            }
                            None => {
                                segments.push(Segment {
                                    kind: SegmentKind::Str,
                                    text: tail.to_string(),
                                });
                                self.open_triple = Some(triple);
                                return segments;
                            }
                        }
                        continue;
                    }
                    let mut end = tail.len();
                    let mut escaped = false;
                    for (j, ch) in tail.char_indices().skip(1) {
                        if escaped {
                            escaped = false;
                        } else if ch == '\\' {
                            escaped = true;
                        } else if ch == c {
                            end = j + 1;
                            break;
                        }
                    }
                    segments.push(Segment {
                        kind: SegmentKind::Str,
                        text: tail[..end].to_string(),
                    });
                    skip(&mut chars, i + end);
                }
                '(' | '[' | '{' => {
                    self.depth += 1;
                    code.push(c);
                }
                ')' | ']' | '}' => {
                    self.depth = (self.depth - 1).max(0);
                    code.push(c);
                }
                _ => code.push(c),
            }
        }
        self.continued = code.trim_end().ends_with('\\');
        flush(&mut segments, &mut code);
        segments
    }
}

fn flush(segments: &mut Vec<Segment>, code: &mut String) {
    if !code.is_empty() {
        segments.push(Segment {
            kind: SegmentKind::Code,
            text: std::mem::take(code),
        });
    }
}

fn skip(chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>, until: usize) {
    while chars.peek().is_some_and(|(j, _)| *j < until) {
        chars.next();
    }
}

fn leading_whitespace(line: &str) -> &str {
    let end = line.len() - line.trim_start().len();
    &line[..end]
}

/// `tap(` becomes `verifier.tap(` unless it is already a method call
/// (`handle.tap(`) or a function definition (`def tap(`).
fn rewrite_api_calls(code: &str) -> String {
    let mut out = String::with_capacity(code.len() + 16);
    let mut last = 0;
    for m in API_CALL_RE.find_iter(code) {
        let before = &code[..m.start()];
        let is_method = before.trim_end().ends_with('.');
        let is_definition = before.trim_end().ends_with("def");
        out.push_str(&code[last..m.start()]);
        if !is_method && !is_definition {
            out.push_str(ENGINE_NAME);
            out.push('.');
        }
        out.push_str(m.as_str());
        last = m.end();
    }
    out.push_str(&code[last..]);
    out
}
