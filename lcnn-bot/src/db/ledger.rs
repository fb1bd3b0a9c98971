//! Idempotency ledger
//!
//! Remembers which record versions have been processed. A key is
//! `recordId|publishedAt|updatedAt`, so a record edited after processing
//! gets a fresh key and is looked at again.

use chrono::{DateTime, Duration, Utc};
use lcnn_common::Result;
use sqlx::SqlitePool;

use crate::utils::retry_on_lock;

/// Default lock wait before a ledger write gives up
const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

#[derive(Debug, Clone)]
pub struct Ledger {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl Ledger {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    pub fn with_max_lock_wait_ms(mut self, max_lock_wait_ms: u64) -> Self {
        self.max_lock_wait_ms = max_lock_wait_ms;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Has this record version been processed?
    pub async fn seen(&self, key: &str) -> Result<bool> {
        let row: Option<(String,)> = sqlx::query_as("SELECT key FROM ids WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.is_some())
    }

    /// Mark a record version processed; re-recording refreshes the timestamp
    pub async fn record(&self, key: &str, record_id: &str, now: DateTime<Utc>) -> Result<()> {
        let observed_at = now.timestamp();
        let pool = &self.pool;

        retry_on_lock("ledger record", self.max_lock_wait_ms, || async move {
            sqlx::query(
                r#"
                INSERT INTO ids (key, lccn, timestamp) VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET lccn = excluded.lccn, timestamp = excluded.timestamp
                "#,
            )
            .bind(key)
            .bind(record_id)
            .bind(observed_at)
            .execute(pool)
            .await?;
            Ok(())
        })
        .await?;

        tracing::trace!(key, lccn = record_id, "Ledger entry recorded");
        Ok(())
    }

    /// Remove entries older than `retention`, returning how many went
    pub async fn prune(&self, now: DateTime<Utc>, retention: Duration) -> Result<u64> {
        let cutoff = (now - retention).timestamp();
        let pool = &self.pool;

        let removed = retry_on_lock("ledger prune", self.max_lock_wait_ms, || async move {
            let result = sqlx::query("DELETE FROM ids WHERE timestamp < ?")
                .bind(cutoff)
                .execute(pool)
                .await?;
            Ok(result.rows_affected())
        })
        .await?;

        tracing::info!(removed, cutoff, "Pruned ledger entries");
        Ok(removed)
    }

    /// Number of entries currently held
    pub async fn len(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ids")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;
    use chrono::TimeZone;

    async fn ledger() -> Ledger {
        Ledger::new(init_memory_pool().await.unwrap())
    }

    #[tokio::test]
    async fn test_record_then_seen() {
        let ledger = ledger().await;
        let key = "n79021164|2025-10-01T09:00:00Z|2025-10-17T14:02:00Z";

        assert!(!ledger.seen(key).await.unwrap());
        ledger.record(key, "n79021164", Utc::now()).await.unwrap();
        assert!(ledger.seen(key).await.unwrap());
    }

    #[tokio::test]
    async fn test_record_is_upsert() {
        let ledger = ledger().await;
        let key = "n1|a|b";

        ledger.record(key, "n1", Utc::now()).await.unwrap();
        ledger.record(key, "n1", Utc::now()).await.unwrap();
        assert_eq!(ledger.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_prune_removes_only_expired() {
        let ledger = ledger().await;
        let now = Utc.with_ymd_and_hms(2025, 10, 17, 12, 0, 0).unwrap();

        ledger.record("old", "n1", now - Duration::days(31)).await.unwrap();
        ledger.record("edge", "n2", now - Duration::days(29)).await.unwrap();
        ledger.record("new", "n3", now).await.unwrap();

        let removed = ledger.prune(now, Duration::days(30)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!ledger.seen("old").await.unwrap());
        assert!(ledger.seen("edge").await.unwrap());
        assert!(ledger.seen("new").await.unwrap());
    }
}
