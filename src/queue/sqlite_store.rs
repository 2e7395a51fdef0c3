//! SQLite-backed set store.

use async_trait::async_trait;
use sqlx::Row;
use tracing::instrument;

use super::{QueueStore, Result};
use crate::db::Database;

/// [`QueueStore`] persisted in the `queue_members` table.
///
/// Membership is enforced by the `(queue, payload)` primary key, and a pop
/// is a single `DELETE ... RETURNING` statement so two workers can never
/// receive the same member.
#[derive(Debug, Clone)]
pub struct SqliteQueueStore {
    db: Database,
}

impl SqliteQueueStore {
    /// Creates a store over an open database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    #[instrument(skip(self, payload))]
    async fn enqueue(&self, queue: &str, payload: &str) -> Result<bool> {
        let result = sqlx::query(
            r"INSERT OR IGNORE INTO queue_members (queue, payload)
              VALUES (?, ?)",
        )
        .bind(queue)
        .bind(payload)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn dequeue_random(&self, queue: &str) -> Result<Option<String>> {
        // Single statement: pick and delete cannot interleave with another pop.
        let row = sqlx::query(
            r"DELETE FROM queue_members
              WHERE rowid = (
                  SELECT rowid FROM queue_members
                  WHERE queue = ?
                  ORDER BY RANDOM()
                  LIMIT 1
              )
              RETURNING payload",
        )
        .bind(queue)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(|r| r.get("payload")))
    }

    #[instrument(skip(self))]
    async fn count(&self, queue: &str) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM queue_members WHERE queue = ?")
            .bind(queue)
            .fetch_one(self.db.pool())
            .await?;

        Ok(u64::try_from(count).unwrap_or(0))
    }
}
