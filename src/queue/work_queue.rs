use std::sync::Arc;
use std::time::Duration;

use sqlx::Row;
use tracing::debug;

use crate::db::{DbBusyError, SqlDb};
use crate::locks::LockMode;

use super::notify::NotificationChannel;

const DEFAULT_ORPHAN_THRESHOLD: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct ClaimedItem {
    pub id: i64,
    pub repo_path: String,
    pub span_hash: String,
    pub file_path: String,
    pub priority: i64,
}

/// Aggregates pending enrichment work across repositories into a single
/// queue with wake-on-push semantics (spec §4.7), backed by the same
/// sqlite file and CRIT_DB discipline as everything else.
pub struct WorkQueue {
    db: Arc<SqlDb>,
    notifications: NotificationChannel,
}

impl WorkQueue {
    pub fn new(db: Arc<SqlDb>, notifications: NotificationChannel) -> Self {
        Self { db, notifications }
    }

    /// Insert-or-ignore; emits one notification on successful insert.
    pub async fn push(
        &self,
        repo_path: &str,
        span_hash: &str,
        file_path: &str,
        priority: i64,
    ) -> Result<bool, DbBusyError> {
        let repo_path = repo_path.to_string();
        let span_hash = span_hash.to_string();
        let file_path = file_path.to_string();

        let inserted = self
            .db
            .write_transaction(LockMode::Interactive, move |mut tx| async move {
                let now = chrono::Utc::now().timestamp();
                let result = sqlx::query(
                    "INSERT OR IGNORE INTO pending_enrichments (repo_path, span_hash, file_path, priority, created_at) \
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&repo_path)
                .bind(&span_hash)
                .bind(&file_path)
                .bind(priority)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                Ok((tx, result.rows_affected() > 0))
            })
            .await?;

        if inserted {
            self.notifications.notify();
        }
        Ok(inserted)
    }

    /// Atomically claims up to `limit` unclaimed rows, lowest priority
    /// value wins.
    pub async fn pull(&self, worker_id: &str, limit: i64) -> Result<Vec<ClaimedItem>, DbBusyError> {
        let worker_id = worker_id.to_string();
        self.db
            .write_transaction(LockMode::Interactive, move |mut tx| async move {
                let now = chrono::Utc::now().timestamp();
                let rows = sqlx::query(
                    "SELECT id, repo_path, span_hash, file_path, priority FROM pending_enrichments \
                     WHERE claimed_by IS NULL ORDER BY priority ASC, created_at ASC LIMIT ?",
                )
                .bind(limit)
                .fetch_all(&mut *tx)
                .await?;

                let mut claimed = Vec::with_capacity(rows.len());
                for row in rows {
                    let id: i64 = row.get("id");
                    sqlx::query("UPDATE pending_enrichments SET claimed_by = ?, claimed_at = ? WHERE id = ?")
                        .bind(&worker_id)
                        .bind(now)
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                    claimed.push(ClaimedItem {
                        id,
                        repo_path: row.get("repo_path"),
                        span_hash: row.get("span_hash"),
                        file_path: row.get("file_path"),
                        priority: row.get("priority"),
                    });
                }
                Ok((tx, claimed))
            })
            .await
    }

    pub async fn complete(&self, id: i64) -> Result<(), DbBusyError> {
        self.db
            .write_transaction(LockMode::Interactive, move |mut tx| async move {
                sqlx::query("DELETE FROM pending_enrichments WHERE id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                Ok((tx, ()))
            })
            .await
    }

    pub async fn fail(&self, id: i64, error: &str) -> Result<(), DbBusyError> {
        let error = error.chars().take(200).collect::<String>();
        self.db
            .write_transaction(LockMode::Interactive, move |mut tx| async move {
                sqlx::query(
                    "UPDATE pending_enrichments SET attempts = attempts + 1, claimed_by = NULL, last_error = ? WHERE id = ?",
                )
                .bind(&error)
                .bind(id)
                .execute(&mut *tx)
                .await?;
                Ok((tx, ()))
            })
            .await
    }

    /// Reclaims rows whose claim is older than `threshold` (default 10
    /// minutes), returning the count recovered.
    pub async fn orphan_recovery(&self) -> Result<u64, DbBusyError> {
        self.orphan_recovery_with_threshold(DEFAULT_ORPHAN_THRESHOLD).await
    }

    pub async fn orphan_recovery_with_threshold(&self, threshold: Duration) -> Result<u64, DbBusyError> {
        let cutoff = chrono::Utc::now().timestamp() - threshold.as_secs() as i64;
        let recovered = self
            .db
            .write_transaction(LockMode::Batch, move |mut tx| async move {
                let result = sqlx::query(
                    "UPDATE pending_enrichments SET claimed_by = NULL, claimed_at = NULL \
                     WHERE claimed_at IS NOT NULL AND claimed_at < ?",
                )
                .bind(cutoff)
                .execute(&mut *tx)
                .await?;
                Ok((tx, result.rows_affected()))
            })
            .await?;
        if recovered > 0 {
            debug!(recovered, "orphan enrichment claims reclaimed");
        }
        Ok(recovered)
    }
}
