use thiserror::Error;

use crate::markup::xpath::PathError;

#[derive(Debug, Error)]
pub enum DeviceError {
    /// Helper process failed to start
    #[error("failed to spawn device bridge '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("device I/O error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The collaborator answered, but not with what was asked for
    #[error("device protocol error: {0}")]
    Protocol(String),

    #[error("device JSON error ({context}): {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("device HTTP error ({context}): {message}")]
    Http { context: String, message: String },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("selector '{selector}' is not defined in the API document; check the element name")]
    SelectorNotFound { selector: String },

    #[error("could not resolve '{selector}' (path {path}) for action '{action}'")]
    ResolutionFailed {
        selector: String,
        path: String,
        action: String,
    },

    #[error("action count exceeded the limit of {limit}; the script probably loops forever")]
    ActionCountExceeded { limit: usize },

    #[error("action '{action}' is not permitted on '{selector}'")]
    ActionNotPermitted { selector: String, action: String },

    #[error("index {index} is out of range for '{selector}' ({len} elements)")]
    InvalidIndex {
        selector: String,
        index: i64,
        len: usize,
    },

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Path(#[from] PathError),
}

impl EngineError {
    /// Only a resolution failure can be fixed by repairing the selector and retrying.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EngineError::ResolutionFailed { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::SelectorNotFound { .. } => "selector_not_found",
            EngineError::ResolutionFailed { .. } => "resolution_failed",
            EngineError::ActionCountExceeded { .. } => "action_count_exceeded",
            EngineError::ActionNotPermitted { .. } => "action_not_permitted",
            EngineError::InvalidIndex { .. } => "invalid_index",
            EngineError::Device(_) => "device",
            EngineError::Path(_) => "invalid_path",
        }
    }
}
