//! Error types for queue store operations.

use std::fmt;

use thiserror::Error;

/// Structured classification for SQLite-backed store failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueDbErrorKind {
    /// `SQLite` returned busy/locked under concurrent access.
    BusyOrLocked,
    /// Connection pool timed out waiting for a free connection.
    PoolTimeout,
    /// Connection pool is closed.
    PoolClosed,
    /// Filesystem or transport IO failure.
    Io,
    /// Unclassified database failure.
    Other,
}

impl QueueDbErrorKind {
    /// Classifies an sqlx error.
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut => Self::PoolTimeout,
            sqlx::Error::PoolClosed => Self::PoolClosed,
            sqlx::Error::Io(_) => Self::Io,
            sqlx::Error::Database(database_error) => {
                classify_database_error(database_error.as_ref())
            }
            _ => Self::Other,
        }
    }
}

impl fmt::Display for QueueDbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BusyOrLocked => "busy_or_locked",
            Self::PoolTimeout => "pool_timeout",
            Self::PoolClosed => "pool_closed",
            Self::Io => "io",
            Self::Other => "other",
        };
        write!(f, "{label}")
    }
}

fn classify_database_error(
    database_error: &(dyn sqlx::error::DatabaseError + 'static),
) -> QueueDbErrorKind {
    let code = database_error.code();
    if matches!(
        code.as_deref(),
        Some("SQLITE_BUSY" | "SQLITE_LOCKED" | "5" | "6")
    ) {
        return QueueDbErrorKind::BusyOrLocked;
    }

    let message = database_error.message().to_ascii_lowercase();
    if message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("database is busy")
    {
        return QueueDbErrorKind::BusyOrLocked;
    }

    QueueDbErrorKind::Other
}

/// Errors that can occur while talking to a queue store.
///
/// An empty queue is never an error: `dequeue_random` reports it as
/// `Ok(None)`. Every variant here means the store could not be consulted.
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    /// SQLite operation failed.
    #[error("database error ({kind}): {message}")]
    Database {
        /// Typed classification used for failure handling.
        kind: QueueDbErrorKind,
        /// Human-readable database error text.
        message: String,
    },

    /// Redis command failed or the connection dropped.
    #[error("redis error: {message}")]
    Redis {
        /// Human-readable redis error text.
        message: String,
    },

    /// Could not open a connection to the store.
    #[error("failed to connect to queue store {url}: {message}")]
    Connection {
        /// Store URL that was dialed.
        url: String,
        /// Why the connection failed.
        message: String,
    },

    /// The store URL scheme is not one of `redis://`, `sqlite:` or `memory`.
    #[error(
        "unsupported queue store '{0}'\n  Suggestion: use redis://host:port/db, sqlite:PATH or memory"
    )]
    UnsupportedStore(String),
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            kind: QueueDbErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        Self::Redis {
            message: err.to_string(),
        }
    }
}

impl QueueError {
    /// Creates a connection error for the given store URL.
    pub fn connection(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Connection {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Returns true when the store was reachable but momentarily contended
    /// (`SQLite` busy/locked, or no free pooled connection).
    ///
    /// Workers retry these after a short pause instead of a full idle interval.
    #[must_use]
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            Self::Database {
                kind: QueueDbErrorKind::BusyOrLocked | QueueDbErrorKind::PoolTimeout,
                ..
            }
        )
    }
}
