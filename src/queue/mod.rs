//! Set-semantics work queue store shared by every worker process.
//!
//! Each pipeline stage owns one logical queue. A queue is a set: adding a
//! payload that is already present is a no-op, and popping removes one
//! arbitrary member atomically. No operation spans two queues, so a task
//! moved from one stage to the next is delivered at least once, never
//! exactly once.
//!
//! # Backends
//!
//! - [`RedisQueueStore`] - `SADD` / `SPOP` against a shared Redis server
//! - [`SqliteQueueStore`] - persistent set table in a local `SQLite` file
//! - [`MemoryQueueStore`] - process-local store for tests and dry runs
//!
//! # Example
//!
//! ```ignore
//! use crawler_core::queue::{open_store, QueueStore};
//!
//! let store = open_store("redis://127.0.0.1:6379/0").await?;
//! store.enqueue("start_page", r#"{"url":"https://example/cat/page/1/"}"#).await?;
//! if let Some(payload) = store.dequeue_random("start_page").await? {
//!     // ... process payload ...
//! }
//! ```

mod error;
mod memory_store;
mod redis_store;
mod sqlite_store;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

pub use error::{QueueDbErrorKind, QueueError};
pub use memory_store::MemoryQueueStore;
pub use redis_store::RedisQueueStore;
pub use sqlite_store::SqliteQueueStore;

use crate::db::Database;
use crate::task::Stage;

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Default queue key for listing pages.
pub const DEFAULT_DISCOVERY_QUEUE: &str = "start_page";

/// Default queue key for detail pages.
pub const DEFAULT_DETAIL_QUEUE: &str = "detail_page";

/// Default queue key for asset downloads.
pub const DEFAULT_DOWNLOAD_QUEUE: &str = "download_page";

/// Store URL selecting a private in-memory `SQLite` database.
pub const SQLITE_MEMORY_URL: &str = "sqlite::memory:";

/// Persistent set-backed queue store.
///
/// Implementations must make each single operation atomic; callers never
/// rely on atomicity across operations.
#[async_trait]
pub trait QueueStore: Send + Sync + fmt::Debug {
    /// Adds `payload` to `queue`. Returns `true` if it was not already a member.
    async fn enqueue(&self, queue: &str, payload: &str) -> Result<bool>;

    /// Removes and returns one arbitrary member of `queue`.
    ///
    /// `Ok(None)` means the queue is empty; an `Err` means the store could
    /// not be consulted.
    async fn dequeue_random(&self, queue: &str) -> Result<Option<String>>;

    /// Returns the number of members currently in `queue`.
    async fn count(&self, queue: &str) -> Result<u64>;
}

/// Queue keys for each stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    /// Input queue of the discovery stage.
    pub discovery: String,
    /// Input queue of the detail stage.
    pub detail: String,
    /// Input queue of the download stage.
    pub download: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            discovery: DEFAULT_DISCOVERY_QUEUE.to_string(),
            detail: DEFAULT_DETAIL_QUEUE.to_string(),
            download: DEFAULT_DOWNLOAD_QUEUE.to_string(),
        }
    }
}

impl QueueNames {
    /// Returns the input queue key of `stage`.
    #[must_use]
    pub fn for_stage(&self, stage: Stage) -> &str {
        match stage {
            Stage::Discovery => &self.discovery,
            Stage::Detail => &self.detail,
            Stage::Download => &self.download,
        }
    }
}

/// Opens a queue store from a store URL.
///
/// Accepted forms:
/// - `redis://host:port/db` (or `rediss://`)
/// - `sqlite:PATH`
/// - `sqlite::memory:` (single-process `SQLite` store)
/// - `memory`
///
/// # Errors
///
/// Returns [`QueueError::UnsupportedStore`] for unknown schemes and
/// [`QueueError::Connection`] if the store cannot be reached.
#[instrument]
pub async fn open_store(store_url: &str) -> Result<Arc<dyn QueueStore>> {
    if store_url == "memory" {
        info!("using in-memory queue store; queues are not shared between processes");
        return Ok(Arc::new(MemoryQueueStore::new()));
    }

    if store_url.starts_with("redis://") || store_url.starts_with("rediss://") {
        let store = RedisQueueStore::connect(store_url).await?;
        return Ok(Arc::new(store));
    }

    if store_url == SQLITE_MEMORY_URL {
        let db = Database::new_in_memory()
            .await
            .map_err(|e| QueueError::connection(store_url, e))?;
        info!("using in-memory SQLite queue store; queues are not shared between processes");
        return Ok(Arc::new(SqliteQueueStore::new(db)));
    }

    if let Some(path) = store_url.strip_prefix("sqlite:") {
        let db = Database::new(Path::new(path))
            .await
            .map_err(|e| QueueError::connection(store_url, e))?;
        // Other processes sharing the file block on every pop without WAL.
        match db.is_wal_enabled().await {
            Ok(true) => {}
            Ok(false) => warn!(path, "WAL mode unavailable; concurrent crawlers will contend"),
            Err(e) => warn!(path, error = %e, "could not read journal mode"),
        }
        return Ok(Arc::new(SqliteQueueStore::new(db)));
    }

    Err(QueueError::UnsupportedStore(store_url.to_string()))
}
