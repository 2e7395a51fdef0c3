//! Error types for the fetch module.
//!
//! Every variant is recoverable from the pipeline's point of view: the
//! stage worker that sees one requeues its task. The classification in
//! [`FailureKind`] exists for logging and stats, not for choosing a policy.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while fetching a page or asset.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS resolution, connection refused, TLS, proxy).
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before response headers arrived.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Any status other than 200, redirects included.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// Response body could not be read or decoded.
    #[error("failed to read body of {url}: {source}")]
    Body {
        /// The URL whose body failed.
        url: String,
        /// The underlying read/decode error.
        #[source]
        source: reqwest::Error,
    },

    /// Response body was not fully read before the deadline.
    #[error("body of {url} not read within {after:?}")]
    BodyTimeout {
        /// The URL whose body stalled.
        url: String,
        /// The deadline that expired.
        after: Duration,
    },

    /// The URL is malformed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The proxy URL could not be turned into a client.
    #[error("invalid proxy {proxy}: {source}")]
    InvalidProxy {
        /// The proxy URL.
        proxy: String,
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },

    /// The HTTP client itself could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Coarse classification of fetch failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connection, DNS, TLS or proxy failure.
    Network,
    /// Request or body deadline expired.
    Timeout,
    /// Unexpected HTTP status.
    Status,
    /// Body could not be decoded.
    Body,
    /// URL or proxy configuration is unusable.
    Invalid,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Status => "status",
            Self::Body => "body",
            Self::Invalid => "invalid",
        };
        write!(f, "{label}")
    }
}

impl FetchError {
    /// Creates a network error, promoting reqwest timeouts to [`FetchError::Timeout`].
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { url: url.into() }
        } else {
            Self::Network {
                url: url.into(),
                source,
            }
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates a body read/decode error.
    pub fn body(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Body {
            url: url.into(),
            source,
        }
    }

    /// Creates a body deadline error.
    pub fn body_timeout(url: impl Into<String>, after: Duration) -> Self {
        Self::BodyTimeout {
            url: url.into(),
            after,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Returns the coarse classification of this failure.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Network { .. } => FailureKind::Network,
            Self::Timeout { .. } | Self::BodyTimeout { .. } => FailureKind::Timeout,
            Self::HttpStatus { .. } => FailureKind::Status,
            Self::Body { .. } => FailureKind::Body,
            Self::InvalidUrl { .. } | Self::InvalidProxy { .. } | Self::Client(_) => {
                FailureKind::Invalid
            }
        }
    }
}
