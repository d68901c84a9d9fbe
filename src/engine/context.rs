use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::engine::error::EngineError;
use crate::screen::element::ScrollDirection;

fn default_max_scroll_attempts() -> usize {
    8
}

fn default_max_action_count() -> usize {
    200
}

fn default_max_dependency_paths() -> usize {
    5
}

fn default_max_dependency_depth() -> usize {
    6
}

fn default_settle_delay_ms() -> u64 {
    2000
}

fn default_scroll_direction() -> ScrollDirection {
    ScrollDirection::Down
}

fn default_open_app() -> bool {
    true
}

fn default_max_script_steps() -> usize {
    100_000
}

/// Fixed limits of the resolution engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Scrolls per container during scroll-search
    #[serde(default = "default_max_scroll_attempts")]
    pub max_scroll_attempts: usize,

    /// Engine calls per run before the script is assumed to loop forever
    #[serde(default = "default_max_action_count")]
    pub max_action_count: usize,

    #[serde(default = "default_max_dependency_paths")]
    pub max_dependency_paths: usize,

    #[serde(default = "default_max_dependency_depth")]
    pub max_dependency_depth: usize,

    /// Blocking pause after every primitive action
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    #[serde(default = "default_scroll_direction")]
    pub default_scroll_direction: ScrollDirection,

    #[serde(default = "default_open_app")]
    pub open_app_on_first_action: bool,

    /// Interpreter statement budget
    #[serde(default = "default_max_script_steps")]
    pub max_script_steps: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_scroll_attempts: default_max_scroll_attempts(),
            max_action_count: default_max_action_count(),
            max_dependency_paths: default_max_dependency_paths(),
            max_dependency_depth: default_max_dependency_depth(),
            settle_delay_ms: default_settle_delay_ms(),
            default_scroll_direction: default_scroll_direction(),
            open_app_on_first_action: default_open_app(),
            max_script_steps: default_max_script_steps(),
        }
    }
}

/// Mutable state of one run: the action counter and the last observed screen.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    action_count: usize,
    app_opened: bool,
    last_screen: Option<String>,
    last_fingerprint: Option<String>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one engine call. Fails once `limit` calls have been made, before
    /// anything is sent to the device.
    pub fn charge(&mut self, limit: usize) -> Result<usize, EngineError> {
        if self.action_count >= limit {
            warn!(count = self.action_count, limit, "action count exceeded");
            return Err(EngineError::ActionCountExceeded { limit });
        }
        self.action_count += 1;
        Ok(self.action_count)
    }

    pub fn action_count(&self) -> usize {
        self.action_count
    }

    pub fn app_opened(&self) -> bool {
        self.app_opened
    }

    pub fn mark_app_opened(&mut self) {
        self.app_opened = true;
    }

    /// Cache the latest screen. Returns true when it differs from the previous one.
    pub fn observe(&mut self, markup: &str, fingerprint: &str) -> bool {
        let changed = self.last_screen.as_deref() != Some(markup);
        if changed {
            self.last_screen = Some(markup.to_string());
            self.last_fingerprint = Some(fingerprint.to_string());
        }
        changed
    }

    pub fn last_screen(&self) -> Option<&str> {
        self.last_screen.as_deref()
    }

    pub fn last_fingerprint(&self) -> Option<&str> {
        self.last_fingerprint.as_deref()
    }
}
