//! Error types for the extraction transforms.

use thiserror::Error;

use crate::task::Stage;

/// Errors building a transform or extracting tasks from a page.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// A CSS selector rule failed to parse.
    #[error("invalid CSS selector '{selector}': {message}")]
    InvalidSelector {
        /// The selector text.
        selector: String,
        /// Parser message.
        message: String,
    },

    /// A regex rule failed to compile.
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        /// The pattern text.
        pattern: String,
        /// The underlying regex error.
        #[source]
        source: regex::Error,
    },

    /// A regex rule compiled but lacks the capture groups extraction reads.
    #[error("pattern '{pattern}' needs {expected} capture group(s)")]
    MissingCaptureGroup {
        /// The pattern text.
        pattern: String,
        /// Number of groups required.
        expected: usize,
    },

    /// The listing page URL carries no category.
    #[error("no category found in page URL {url}")]
    MissingCategory {
        /// The page URL.
        url: String,
    },

    /// The page URL cannot serve as a base for relative links.
    #[error("invalid page URL {url}: {source}")]
    InvalidPageUrl {
        /// The page URL.
        url: String,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },

    /// The task was routed to the transform of another stage.
    #[error("{transform} transform cannot handle a {stage} task")]
    WrongStage {
        /// Stage the transform serves.
        transform: Stage,
        /// Stage of the task that was passed in.
        stage: Stage,
    },
}

impl ExtractError {
    /// Creates an invalid selector error.
    pub fn invalid_selector(selector: impl Into<String>, message: impl ToString) -> Self {
        Self::InvalidSelector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Creates an invalid pattern error.
    pub fn invalid_pattern(pattern: impl Into<String>, source: regex::Error) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            source,
        }
    }
}
