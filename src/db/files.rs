use sqlx::Row;

use crate::locks::LockMode;

use super::pool::{DbBusyError, SqlDb};

#[derive(Debug, Clone)]
pub struct FileUpsert {
    pub file_id: i64,
    /// False when the stored `content_hash` already matched — callers skip
    /// re-chunking in that case (spec §4.1's differential reconciler only
    /// touches spans for files whose hash changed).
    pub changed: bool,
}

/// Inserts or refreshes one file's row keyed by `(repo_path, relative_path)`
/// (spec §4.1/§4.9). `sidecar_path` is set only for binary documents
/// indexed through their markdown twin.
pub async fn upsert_file(
    db: &SqlDb,
    repo_path: &str,
    relative_path: &str,
    content_hash: &str,
    sidecar_path: Option<&str>,
) -> Result<FileUpsert, DbBusyError> {
    let repo_path = repo_path.to_string();
    let relative_path = relative_path.to_string();
    let content_hash = content_hash.to_string();
    let sidecar_path = sidecar_path.map(str::to_string);

    db.write_transaction(LockMode::Batch, move |mut tx| async move {
        let existing = sqlx::query("SELECT id, content_hash FROM files WHERE repo_path = ? AND relative_path = ?")
            .bind(&repo_path)
            .bind(&relative_path)
            .fetch_optional(&mut *tx)
            .await?;

        let now = chrono::Utc::now().timestamp();
        let result = match existing {
            Some(row) => {
                let file_id: i64 = row.get("id");
                let previous_hash: String = row.get("content_hash");
                let changed = previous_hash != content_hash;
                sqlx::query(
                    "UPDATE files SET content_hash = ?, sidecar_path = ?, last_indexed_at = ? WHERE id = ?",
                )
                .bind(&content_hash)
                .bind(&sidecar_path)
                .bind(now)
                .bind(file_id)
                .execute(&mut *tx)
                .await?;
                FileUpsert { file_id, changed }
            }
            None => {
                let inserted = sqlx::query(
                    "INSERT INTO files (repo_path, relative_path, content_hash, sidecar_path, last_indexed_at) \
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&repo_path)
                .bind(&relative_path)
                .bind(&content_hash)
                .bind(&sidecar_path)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                FileUpsert {
                    file_id: inserted.last_insert_rowid(),
                    changed: true,
                }
            }
        };

        Ok((tx, result))
    })
    .await
}

/// All relative paths currently known for `repo_path`, for diffing against
/// the live filesystem walk to find deletions.
pub async fn list_relative_paths(db: &SqlDb, repo_path: &str) -> Result<Vec<String>, sqlx::Error> {
    let repo_path = repo_path.to_string();
    db.read(move |pool| async move {
        let rows = sqlx::query("SELECT relative_path FROM files WHERE repo_path = ?")
            .bind(&repo_path)
            .fetch_all(&pool)
            .await?;
        Ok(rows.into_iter().map(|row| row.get("relative_path")).collect())
    })
    .await
}

/// Returns the sidecar path for a file, if it has one.
pub async fn sidecar_path_for(db: &SqlDb, repo_path: &str, relative_path: &str) -> Result<Option<String>, sqlx::Error> {
    let repo_path = repo_path.to_string();
    let relative_path = relative_path.to_string();
    db.read(move |pool| async move {
        let row = sqlx::query("SELECT sidecar_path FROM files WHERE repo_path = ? AND relative_path = ?")
            .bind(&repo_path)
            .bind(&relative_path)
            .fetch_optional(&pool)
            .await?;
        Ok(row.and_then(|row| row.get("sidecar_path")))
    })
    .await
}

/// Deletes a file row (cascading to its spans/enrichments/embeddings per
/// the migration's foreign keys).
pub async fn delete_file(db: &SqlDb, repo_path: &str, relative_path: &str) -> Result<(), DbBusyError> {
    let repo_path = repo_path.to_string();
    let relative_path = relative_path.to_string();
    db.write_transaction(LockMode::Batch, move |mut tx| async move {
        sqlx::query("DELETE FROM files WHERE repo_path = ? AND relative_path = ?")
            .bind(&repo_path)
            .bind(&relative_path)
            .execute(&mut *tx)
            .await?;
        Ok((tx, ()))
    })
    .await
}

#[derive(Debug, Clone)]
pub struct FileRecord {
    pub relative_path: String,
    pub content_hash: String,
    pub sidecar_path: Option<String>,
}

/// A uniform random sample of up to `limit` indexed files for `repo_path`
/// (spec §4.10's stateless candidate selection for opportunistic docgen).
pub async fn sample_files(db: &SqlDb, repo_path: &str, limit: usize) -> Result<Vec<FileRecord>, sqlx::Error> {
    let repo_path = repo_path.to_string();
    let mut rows = db
        .read(move |pool| async move {
            sqlx::query("SELECT relative_path, content_hash, sidecar_path FROM files WHERE repo_path = ?")
                .bind(&repo_path)
                .fetch_all(&pool)
                .await
        })
        .await?
        .into_iter()
        .map(|row| FileRecord {
            relative_path: row.get("relative_path"),
            content_hash: row.get("content_hash"),
            sidecar_path: row.get("sidecar_path"),
        })
        .collect::<Vec<_>>();

    use rand::seq::SliceRandom;
    rows.shuffle(&mut rand::thread_rng());
    rows.truncate(limit);
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locks::LockManager;

    #[tokio::test]
    async fn upsert_reports_changed_only_when_hash_differs() {
        let dir = tempfile::tempdir().unwrap();
        let locks = LockManager::new(Default::default());
        let db = SqlDb::connect(&dir.path().join("rag.db"), "test-repo", locks).await.unwrap();

        let first = upsert_file(&db, "repo", "a.rs", "hash1", None).await.unwrap();
        assert!(first.changed);

        let second = upsert_file(&db, "repo", "a.rs", "hash1", None).await.unwrap();
        assert!(!second.changed);
        assert_eq!(second.file_id, first.file_id);

        let third = upsert_file(&db, "repo", "a.rs", "hash2", None).await.unwrap();
        assert!(third.changed);
        assert_eq!(third.file_id, first.file_id);
    }

    #[tokio::test]
    async fn delete_file_removes_it_from_the_listing() {
        let dir = tempfile::tempdir().unwrap();
        let locks = LockManager::new(Default::default());
        let db = SqlDb::connect(&dir.path().join("rag.db"), "test-repo", locks).await.unwrap();

        upsert_file(&db, "repo", "a.rs", "hash1", None).await.unwrap();
        upsert_file(&db, "repo", "b.rs", "hash2", None).await.unwrap();
        delete_file(&db, "repo", "a.rs").await.unwrap();

        let remaining = list_relative_paths(&db, "repo").await.unwrap();
        assert_eq!(remaining, vec!["b.rs".to_string()]);
    }
}
