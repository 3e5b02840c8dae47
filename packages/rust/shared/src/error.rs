//! Error types for tagrail.
//!
//! Library crates use [`TagrailError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all tagrail operations.
#[derive(Debug, thiserror::Error)]
pub enum TagrailError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to the record store or the LLM service.
    #[error("network error: {0}")]
    Network(String),

    /// Record store returned an error response.
    #[error("store error: {0}")]
    Store(String),

    /// LLM service error (API, rate limit, or empty response).
    #[error("llm error: {0}")]
    Llm(String),

    /// Structured LLM reply could not be parsed.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Data validation error (unknown collection, schema mismatch, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, TagrailError>;

/// Clip text to at most `max` bytes for embedding in an error message,
/// backing off to the nearest char boundary so multibyte input never
/// panics the formatter.
pub fn clip(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

impl TagrailError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = TagrailError::config("TAGRAIL_STORE_URL is not set");
        assert_eq!(err.to_string(), "config error: TAGRAIL_STORE_URL is not set");

        let err = TagrailError::validation("collection 'willow' not found");
        assert!(err.to_string().contains("willow"));
    }

    #[test]
    fn clip_respects_char_boundaries() {
        assert_eq!(clip("short", 80), "short");
        assert_eq!(clip("abcdef", 3), "abc");

        // 79 ASCII bytes then multibyte chars: byte 80 falls inside 'é'
        let text = format!("{}ééééé", "x".repeat(79));
        let clipped = clip(&text, 80);
        assert_eq!(clipped, "x".repeat(79));

        let emoji = "🦀🦀🦀";
        assert_eq!(clip(emoji, 5), "🦀");
    }

    #[test]
    fn store_and_llm_errors_carry_message() {
        let err = TagrailError::Store("HTTP 503".into());
        assert_eq!(err.to_string(), "store error: HTTP 503");

        let err = TagrailError::Llm("rate limited".into());
        assert_eq!(err.to_string(), "llm error: rate limited");
    }
}
