use serde_json::{Map, Value as JsonValue};

use crate::engine::error::EngineError;
use crate::engine::selector::Selector;
use crate::screen::element::ScrollDirection;

/// Filter for `handle.match(...)`.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchQuery {
    /// Label, display content or raw text equal to the string.
    Text(String),
    /// Every listed property equal.
    Attributes(Map<String, JsonValue>),
}

/// Engine surface a running script talks to. Every call except `declare`
/// and `set_line` may touch the device.
pub trait ScriptHost {
    /// Executable line of the statement about to run.
    fn set_line(&mut self, line: usize);

    /// Handle for a document symbol; fails when the symbol is unknown.
    fn declare(&mut self, name: &str) -> Result<Selector, EngineError>;

    fn tap(&mut self, target: &Selector) -> Result<(), EngineError>;

    fn long_tap(&mut self, target: &Selector) -> Result<(), EngineError>;

    fn set_text(&mut self, target: &Selector, text: &str) -> Result<(), EngineError>;

    /// Returns true when the screen did not change, i.e. the end was reached.
    fn scroll(&mut self, target: &Selector, direction: Option<ScrollDirection>) -> Result<bool, EngineError>;

    fn get_text(&mut self, target: &Selector) -> Result<String, EngineError>;

    fn get_attributes(&mut self, target: &Selector) -> Result<Map<String, JsonValue>, EngineError>;

    fn back(&mut self) -> Result<(), EngineError>;

    fn ui_tree(&mut self) -> Result<String, EngineError>;

    /// Direct lookup only; never scrolls or replays.
    fn exists(&mut self, target: &Selector) -> Result<bool, EngineError>;

    /// Direct child at `index` (negative counts from the end).
    fn index(&mut self, list: &Selector, index: i64) -> Result<Selector, EngineError>;

    /// Retained leaves of the list, ascending.
    fn items(&mut self, list: &Selector) -> Result<Vec<Selector>, EngineError>;

    fn matching(&mut self, list: &Selector, query: &MatchQuery) -> Result<Vec<Selector>, EngineError>;

    /// Number of direct children.
    fn count(&mut self, list: &Selector) -> Result<usize, EngineError>;
}
