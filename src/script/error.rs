use thiserror::Error;

use crate::engine::error::EngineError;

/// Failure while running an executable script. Every variant carries the
/// 1-based executable line it happened on.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("line {line}: syntax error: {message}")]
    Syntax { line: usize, message: String },

    #[error("line {line}: {message}")]
    Runtime { line: usize, message: String },

    #[error("line {line}: {source}")]
    Engine {
        line: usize,
        #[source]
        source: EngineError,
    },
}

impl ScriptError {
    pub fn syntax(line: usize, message: impl Into<String>) -> Self {
        ScriptError::Syntax {
            line,
            message: message.into(),
        }
    }

    pub fn runtime(line: usize, message: impl Into<String>) -> Self {
        ScriptError::Runtime {
            line,
            message: message.into(),
        }
    }

    pub fn line(&self) -> usize {
        match self {
            ScriptError::Syntax { line, .. } | ScriptError::Runtime { line, .. } | ScriptError::Engine { line, .. } => {
                *line
            }
        }
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            ScriptError::Engine { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ScriptError::Syntax { .. } => "syntax",
            ScriptError::Runtime { .. } => "runtime",
            ScriptError::Engine { source, .. } => source.kind(),
        }
    }

    /// Message without the line prefix.
    pub fn message(&self) -> String {
        match self {
            ScriptError::Syntax { message, .. } => format!("syntax error: {}", message),
            ScriptError::Runtime { message, .. } => message.clone(),
            ScriptError::Engine { source, .. } => source.to_string(),
        }
    }

    pub fn engine_error(&self) -> Option<&EngineError> {
        match self {
            ScriptError::Engine { source, .. } => Some(source),
            _ => None,
        }
    }
}
