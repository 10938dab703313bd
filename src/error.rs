//! Error types for the remap engine

use std::io;

use thiserror::Error;

/// Result type alias for the remap engine
pub type Result<T> = std::result::Result<T, Error>;

/// Remap engine errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Mapping document failed validation
    #[error("Invalid mapping: {0}")]
    Mapping(String),

    /// Path expression failed to parse
    #[error("Invalid path expression '{path}': {reason}")]
    Path {
        /// The offending path text
        path: String,
        /// Why it was rejected
        reason: String,
    },

    /// Inbound record payload is not valid JSON
    #[error("Record payload is not valid JSON: {0}")]
    RecordParse(String),

    /// Mapping source fetch error
    #[error("Mapping source error: {0}")]
    Source(String),

    /// Fetch exceeded its per-call deadline
    #[error("Mapping fetch timed out: {0}")]
    Timeout(String),

    /// Encryption envelope error
    #[error("Encryption error: {0}")]
    Crypto(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Controller shutdown
    #[error("Shutdown")]
    Shutdown,
}

impl Error {
    /// Create a path error
    pub fn path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Path {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether another fetch attempt could plausibly succeed.
    ///
    /// Network, IO, and timeout failures clear on retry; a mapping
    /// document that failed validation or a payload that failed to
    /// parse never does.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Source(_) | Self::Http(_) | Self::Io(_) | Self::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_error_names_the_expression() {
        let e = Error::path("items[x]", "unterminated bracket");
        let msg = e.to_string();
        assert!(msg.contains("items[x]"));
        assert!(msg.contains("unterminated bracket"));
    }

    #[test]
    fn mapping_error_display() {
        let e = Error::Mapping("topic 'orders': root must be non-empty".to_string());
        assert!(e.to_string().starts_with("Invalid mapping:"));
    }

    #[test]
    fn transience_splits_fetch_from_validation_failures() {
        assert!(Error::Source("connection reset".to_string()).is_transient());
        assert!(Error::Timeout("body fetch".to_string()).is_transient());
        assert!(!Error::Mapping("root must be non-empty".to_string()).is_transient());
        assert!(!Error::RecordParse("trailing garbage".to_string()).is_transient());
    }
}
