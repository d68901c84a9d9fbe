use std::fmt;

use serde::Serialize;

use crate::doc::error::DocError;
use crate::screen::element::ScrollDirection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DependencyKind {
    Tap,
    LongTap,
    SetText,
    Scroll(ScrollDirection),
    GetText,
    GetAttributes,
    Back,
}

impl DependencyKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            DependencyKind::Tap => "tap",
            DependencyKind::LongTap => "long_tap",
            DependencyKind::SetText => "set_text",
            DependencyKind::Scroll(_) => "scroll",
            DependencyKind::GetText => "get_text",
            DependencyKind::GetAttributes => "get_attributes",
            DependencyKind::Back => "back",
        }
    }
}

/// One recorded prerequisite step, e.g. `main_screen__tap(menu_button)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependentAction {
    pub raw: String,
    pub screen: String,
    pub kind: DependencyKind,
    pub element: Option<String>,
    pub text: Option<String>,
}

impl fmt::Display for DependentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl DependentAction {
    /// Parse `<screen>__<keyword>(<args>)`.
    ///
    /// The screen name is everything before the last `__` of the leading
    /// identifier; arguments are split on commas outside quotes.
    pub fn parse(spec: &str) -> Result<Self, DocError> {
        let raw = spec.trim();
        let malformed = |reason: &str| DocError::MalformedDependency {
            spec: raw.to_string(),
            reason: reason.to_string(),
        };

        let ident_end = raw
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(raw.len());
        let ident = &raw[..ident_end];
        let split = ident
            .rfind("__")
            .ok_or_else(|| malformed("missing '<screen>__' prefix"))?;
        let screen = &ident[..split];
        let keyword = &ident[split + 2..];
        if screen.is_empty() {
            return Err(malformed("empty screen name"));
        }

        let rest = raw[ident_end..].trim();
        let args = if rest.is_empty() {
            Vec::new()
        } else {
            if !rest.starts_with('(') || !rest.ends_with(')') {
                return Err(malformed("expected a parenthesised argument list"));
            }
            split_arguments(&rest[1..rest.len() - 1])
        };

        let arity = |n: usize| -> Result<(), DocError> {
            if args.len() == n {
                Ok(())
            } else {
                Err(malformed(&format!("'{}' takes {} argument(s), got {}", keyword, n, args.len())))
            }
        };

        let kind = match keyword {
            "tap" => {
                arity(1)?;
                DependencyKind::Tap
            }
            "long_tap" => {
                arity(1)?;
                DependencyKind::LongTap
            }
            "set_text" => {
                arity(2)?;
                DependencyKind::SetText
            }
            "scroll" => {
                arity(2)?;
                let dir = ScrollDirection::parse(&unquote(&args[1]))
                    .ok_or_else(|| malformed("scroll direction must be up, down, left or right"))?;
                DependencyKind::Scroll(dir)
            }
            "get_text" => {
                arity(1)?;
                DependencyKind::GetText
            }
            "get_attributes" => {
                arity(1)?;
                DependencyKind::GetAttributes
            }
            "back" => {
                arity(0)?;
                DependencyKind::Back
            }
            other => return Err(malformed(&format!("unknown action keyword '{}'", other))),
        };

        let element = args
            .first()
            .filter(|_| kind != DependencyKind::Back)
            .map(|a| unquote(a).trim_start_matches('$').to_string());
        let text = match kind {
            DependencyKind::SetText => Some(unquote(&args[1])),
            _ => None,
        };

        Ok(Self {
            raw: raw.to_string(),
            screen: screen.to_string(),
            kind,
            element,
            text,
        })
    }

    pub fn is_back(&self) -> bool {
        self.kind == DependencyKind::Back
    }
}

/// Split on commas that sit outside single or double quotes.
pub fn split_arguments(args: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in args.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => {
                escaped = true;
                current.push(c);
            }
            '\'' | '"' if quote.is_none() => {
                quote = Some(c);
                current.push(c);
            }
            q if Some(q) == quote => {
                quote = None;
                current.push(c);
            }
            ',' if quote.is_none() => {
                out.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        out.push(current.trim().to_string());
    }
    out
}

fn unquote(arg: &str) -> String {
    arg.trim().trim_matches(|c| c == '\'' || c == '"').to_string()
}

/// Human reading of a list of recorded dependency paths.
pub fn describe_paths(paths: &[Vec<String>]) -> String {
    if paths.is_empty() {
        return "No dependency, this UI element is in the main screen of the app".into();
    }
    paths
        .iter()
        .map(|path| {
            let steps: Vec<&str> = path.iter().map(|s| s.trim()).filter(|s| !s.is_empty()).collect();
            if steps.is_empty() {
                "this UI element could be interacted in the main screen".to_string()
            } else {
                format!("this UI element could be interacted after {}", steps.join(" then "))
            }
        })
        .collect::<Vec<_>>()
        .join(" or ")
}
