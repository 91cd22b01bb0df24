//! Custom error types for newshound

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for newshound operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Selector error: {0}")]
    Selector(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Parse error: {0}")]
    Parsing(String),

    #[error("Rendering engine error: {0}")]
    Rendering(String),

    #[error("Model output error: {0}")]
    ModelOutput(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Site not found: {0}")]
    SiteNotFound(String),

    #[error("Not initialized: run 'newshound init' first")]
    NotInitialized,

    #[error("Already initialized at {0}")]
    AlreadyInitialized(String),

    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout(err.to_string())
        } else {
            Error::Network(err.to_string())
        }
    }
}

/// Result type alias for newshound
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse failure taxonomy recorded on discovery runs.
///
/// Best-effort observability only; nothing downstream should branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    Network,
    Timeout,
    SelectorNotFound,
    RateLimit,
    Parsing,
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::SelectorNotFound => write!(f, "selector-not-found"),
            ErrorCategory::RateLimit => write!(f, "rate-limit"),
            ErrorCategory::Parsing => write!(f, "parsing"),
            ErrorCategory::Unknown => write!(f, "unknown"),
        }
    }
}

impl ErrorCategory {
    /// Guess a category from a free-text failure message
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_lowercase();

        if lower.contains("timeout") || lower.contains("timed out") {
            ErrorCategory::Timeout
        } else if lower.contains("429")
            || lower.contains("rate limit")
            || lower.contains("too many requests")
            || lower.contains("throttl")
        {
            ErrorCategory::RateLimit
        } else if lower.contains("selector") || lower.contains("no elements") {
            ErrorCategory::SelectorNotFound
        } else if lower.contains("parse") || lower.contains("malformed") {
            ErrorCategory::Parsing
        } else if lower.contains("dns")
            || lower.contains("connect")
            || lower.contains("network")
            || lower.contains("unreachable")
            || lower.contains("http ")
        {
            ErrorCategory::Network
        } else {
            ErrorCategory::Unknown
        }
    }
}

impl Error {
    /// Category of this error for run logs
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Network(_) => ErrorCategory::Network,
            Error::Timeout(_) => ErrorCategory::Timeout,
            Error::Selector(_) => ErrorCategory::SelectorNotFound,
            Error::RateLimited(_) => ErrorCategory::RateLimit,
            Error::Parsing(_) | Error::UrlParse(_) => ErrorCategory::Parsing,
            other => ErrorCategory::from_message(&other.to_string()),
        }
    }

    /// Whether a caller may reasonably try the same operation again later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::Timeout(_) | Error::RateLimited(_) | Error::Rendering(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_from_message() {
        assert_eq!(
            ErrorCategory::from_message("navigation timed out after 30s"),
            ErrorCategory::Timeout
        );
        assert_eq!(
            ErrorCategory::from_message("HTTP 429 Too Many Requests"),
            ErrorCategory::RateLimit
        );
        assert_eq!(
            ErrorCategory::from_message("link selector 'article a' matched no elements"),
            ErrorCategory::SelectorNotFound
        );
        assert_eq!(
            ErrorCategory::from_message("dns error: failed to lookup address"),
            ErrorCategory::Network
        );
        assert_eq!(ErrorCategory::from_message("boom"), ErrorCategory::Unknown);
    }

    #[test]
    fn test_category_prefers_variant() {
        // The message mentions a timeout but the variant wins
        let err = Error::RateLimited("slow down, request timed out".to_string());
        assert_eq!(err.category(), ErrorCategory::RateLimit);

        let err = Error::Other("connection refused".to_string());
        assert_eq!(err.category(), ErrorCategory::Network);
    }

    #[test]
    fn test_category_display_is_kebab() {
        assert_eq!(ErrorCategory::SelectorNotFound.to_string(), "selector-not-found");
        let json = serde_json::to_string(&ErrorCategory::RateLimit).unwrap();
        assert_eq!(json, "\"rate-limit\"");
    }
}
