use std::fmt;

use crate::markup::xpath::PathError;
use crate::screen::tree::ElementTree;

/// How a script refers to an element.
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    /// A symbol from the API document.
    Named { name: String, path: String },
    /// An element taken out of a list at run time. `origin` is the list's
    /// symbol, used to navigate back to the list when the element is gone.
    Handle { path: String, origin: Option<String> },
    /// `target` looked up only inside the subtree of `scope`.
    Within { scope: Box<Selector>, target: Box<Selector> },
}

impl Selector {
    pub fn named(name: impl Into<String>, path: impl Into<String>) -> Self {
        Selector::Named {
            name: name.into(),
            path: path.into(),
        }
    }

    pub fn handle(tag: &str, id: usize, origin: Option<String>) -> Self {
        Selector::Handle {
            path: format!("//{}[@id='{}']", tag, id),
            origin,
        }
    }

    pub fn within(scope: Selector, target: Selector) -> Self {
        Selector::Within {
            scope: Box::new(scope),
            target: Box::new(target),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Selector::Named { path, .. } | Selector::Handle { path, .. } => path,
            Selector::Within { target, .. } => target.path(),
        }
    }

    /// Symbol whose recorded dependency paths lead to this element.
    pub fn replay_symbol(&self) -> Option<&str> {
        match self {
            Selector::Named { name, .. } => Some(name),
            Selector::Handle { origin, .. } => origin.as_deref(),
            Selector::Within { scope, .. } => scope.replay_symbol(),
        }
    }

    /// Resolve against one snapshot.
    pub fn resolve(&self, tree: &ElementTree) -> Result<Option<usize>, PathError> {
        match self {
            Selector::Named { path, .. } | Selector::Handle { path, .. } => tree.find_by_path(path),
            Selector::Within { scope, target } => {
                let Some(scope_id) = scope.resolve(tree)? else {
                    return Ok(None);
                };
                let candidates = match target.as_ref() {
                    Selector::Within { .. } => target.resolve(tree)?.into_iter().collect(),
                    other => tree.find_all(other.path())?,
                };
                Ok(candidates.into_iter().find(|&id| tree.is_descendant(scope_id, id)))
            }
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Named { name, .. } => write!(f, "${}", name),
            Selector::Handle { path, origin: Some(origin) } => write!(f, "${}{}", origin, path),
            Selector::Handle { path, origin: None } => f.write_str(path),
            Selector::Within { scope, target } => write!(f, "{} > {}", scope, target),
        }
    }
}
