use thiserror::Error;

use crate::markup::parse::MarkupError;

#[derive(Debug, Error)]
pub enum DocError {
    #[error("failed to read or write API document '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("API document JSON error ({context}): {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed dependency '{spec}': {reason}")]
    MalformedDependency { spec: String, reason: String },

    #[error("malformed element name '{name}': {reason}")]
    MalformedApiName { name: String, reason: String },

    #[error("screen '{screen}' has an unreadable skeleton: {source}")]
    Skeleton {
        screen: String,
        #[source]
        source: MarkupError,
    },

    #[error("unknown element '{element}' on screen '{screen}'")]
    UnknownElement { screen: String, element: String },
}
