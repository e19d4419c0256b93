use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::warn;

use crate::locks::{call_with_stomp_guard, LockManager, LockMode, ResourceClass, ResourceKey};

#[derive(thiserror::Error, Debug)]
pub enum DbBusyError {
    #[error("database busy on logical db {0} after retry budget exhausted")]
    Exhausted(String),
    #[error("stale fencing token for {0:?}: the CRIT_DB lease was reassigned to a newer holder before this write committed")]
    StaleFencingToken(ResourceKey),
    #[error(transparent)]
    Resource(#[from] crate::locks::ResourceBusyError),
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

/// Owns the pool for one repository's sqlite file and serializes writes
/// through §4.6's CRIT_DB discipline: a write acquires the CRIT_DB lock,
/// begins an immediate transaction, and releases the lock only after
/// commit or rollback.
pub struct SqlDb {
    pool: SqlitePool,
    logical_name: String,
    locks: Arc<LockManager>,
}

impl SqlDb {
    pub async fn connect(path: &Path, logical_name: impl Into<String>, locks: Arc<LockManager>) -> Result<Self, sqlx::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self {
            pool,
            logical_name: logical_name.into(),
            locks,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn locks(&self) -> Arc<LockManager> {
        Arc::clone(&self.locks)
    }

    /// Read access does not acquire CRIT_DB (spec §4.6: "reads outside this
    /// guard proceed without acquiring the lock").
    pub async fn read<F, Fut, T>(&self, f: F) -> Result<T, sqlx::Error>
    where
        F: FnOnce(SqlitePool) -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        f(self.pool.clone()).await
    }

    /// Runs `body` inside a single write transaction, holding the CRIT_DB
    /// lock for its full duration. Retries the begin step with exponential
    /// backoff on `SQLITE_BUSY` up to a small cap before surfacing
    /// `DbBusyError::Exhausted`. Immediately before commit, checks that the
    /// CRIT_DB fencing token acquired at the start of the call is still the
    /// current one: if the lease expired and was reassigned to another
    /// holder while `body` ran long, the commit is rejected rather than
    /// silently landing a stale write (spec §4.5/§8).
    pub async fn write_transaction<F, Fut, T>(&self, mode: LockMode, body: F) -> Result<T, DbBusyError>
    where
        F: FnOnce(Transaction<'static, Sqlite>) -> Fut + Send,
        Fut: Future<Output = Result<(Transaction<'static, Sqlite>, T), sqlx::Error>> + Send,
        T: Send,
    {
        let resource = ResourceKey::new(ResourceClass::CritDb, self.logical_name.clone());
        let pool = self.pool.clone();
        let locks = Arc::clone(&self.locks);

        let outcome = call_with_stomp_guard(
            &self.locks,
            vec![resource],
            mode,
            "llmc-daemon",
            &uuid::Uuid::new_v4().to_string(),
            move |guards| {
                let token = guards[0].fencing_token;
                let resource = guards[0].resource_key.clone();
                async move { run_with_busy_retry(&pool, &locks, &resource, token, body).await }
            },
        )
        .await?;

        outcome
    }
}

async fn run_with_busy_retry<F, Fut, T>(
    pool: &SqlitePool,
    locks: &LockManager,
    resource: &ResourceKey,
    token: u64,
    body: F,
) -> Result<T, DbBusyError>
where
    F: FnOnce(Transaction<'static, Sqlite>) -> Fut,
    Fut: Future<Output = Result<(Transaction<'static, Sqlite>, T), sqlx::Error>>,
{
    const MAX_ATTEMPTS: u32 = 5;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match pool.begin().await {
            Ok(tx) => {
                return match body(tx).await {
                    Ok((tx, value)) => {
                        if !locks.token_is_current(resource, token) {
                            tx.rollback().await.ok();
                            return Err(DbBusyError::StaleFencingToken(resource.clone()));
                        }
                        tx.commit().await?;
                        Ok(value)
                    }
                    Err(err) => Err(err.into()),
                };
            }
            Err(sqlx::Error::Database(db_err))
                if db_err.message().contains("database is locked") && attempt < MAX_ATTEMPTS =>
            {
                let backoff = Duration::from_millis(50 * 2u64.pow(attempt));
                warn!(attempt, ?backoff, "sqlite busy on begin, retrying");
                tokio::time::sleep(backoff).await;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::config::configuration::ResourceClassOverride;

    /// ABA scenario from spec §4.5/§8: a write transaction runs long enough
    /// that its CRIT_DB lease (TTL overridden to 0 here, so it is expired
    /// the instant it is acquired) gets reassigned to another holder before
    /// this transaction commits. The stale holder's commit must be
    /// rejected, not silently accepted.
    #[tokio::test]
    async fn stale_fencing_token_rejects_commit_after_lease_reassigned() {
        let dir = tempfile::tempdir().unwrap();
        let mut overrides = std::collections::HashMap::new();
        overrides.insert(
            ResourceClass::CritDb,
            ResourceClassOverride {
                ttl_secs: Some(0),
                ..Default::default()
            },
        );
        let locks = LockManager::new(overrides);
        let db = SqlDb::connect(&dir.path().join("rag.db"), "test-repo", Arc::clone(&locks))
            .await
            .unwrap();

        let stolen_by = locks.clone();
        let result = db
            .write_transaction(LockMode::Batch, move |tx| {
                let locks = Arc::clone(&stolen_by);
                async move {
                    let key = ResourceKey::new(ResourceClass::CritDb, "test-repo");
                    locks
                        .acquire_one(&key, LockMode::Interactive, "other-agent", "other-session")
                        .await
                        .unwrap();
                    Ok((tx, ()))
                }
            })
            .await;

        assert!(matches!(result, Err(DbBusyError::StaleFencingToken(_))));
    }

    #[tokio::test]
    async fn write_transaction_commits_normally_when_lease_holds() {
        let dir = tempfile::tempdir().unwrap();
        let locks = LockManager::new(Default::default());
        let db = SqlDb::connect(&dir.path().join("rag.db"), "test-repo", locks)
            .await
            .unwrap();

        let result = db
            .write_transaction(LockMode::Batch, |tx| async move { Ok((tx, 7)) })
            .await
            .unwrap();
        assert_eq!(result, 7);
    }
}
