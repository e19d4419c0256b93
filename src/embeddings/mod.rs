use async_trait::async_trait;
use sqlx::Row;
use tracing::warn;

use crate::db::{DbBusyError, SqlDb};
use crate::locks::LockMode;

/// One embedding profile: a model + dimension pair (spec §3 "Embedding").
/// Profiles are immutable — changing the model or dimension means minting a
/// new profile name rather than mutating this one; old vectors are kept
/// until a caller explicitly drops them (`drop_profile`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingProfile {
    pub name: String,
    pub dimension: usize,
}

/// What every embedding backend must satisfy. Mirrors `BackendAdapter`'s
/// shape (§4.4) but produces a fixed-dimensional vector instead of a
/// generated text item; kept as its own trait since the two calls have
/// different retry/rate-limit characteristics in practice (embeddings are
/// batchable, generations are not).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, crate::llm::BackendError>;
}

pub fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[derive(Debug, Clone)]
pub struct PendingEmbedding {
    pub span_id: i64,
    pub text: String,
}

/// Spans that have a summary (or, failing that, raw text) but no vector
/// yet for `profile`.
pub async fn pending_embeddings(
    db: &SqlDb,
    profile: &str,
    limit: i64,
) -> Result<Vec<PendingEmbedding>, sqlx::Error> {
    let profile = profile.to_string();
    db.read(move |pool| async move {
        let rows = sqlx::query(
            "SELECT s.id, COALESCE(e.summary, s.normalized_text) AS text \
             FROM spans s \
             LEFT JOIN enrichments e ON e.span_id = s.id \
             LEFT JOIN embeddings emb ON emb.span_id = s.id AND emb.profile = ? \
             WHERE emb.id IS NULL \
             LIMIT ?",
        )
        .bind(&profile)
        .bind(limit)
        .fetch_all(&pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| PendingEmbedding {
                span_id: row.get("id"),
                text: row.get("text"),
            })
            .collect())
    })
    .await
}

/// Generates and persists embeddings for up to `limit` spans missing a
/// vector under `profile`. Returns the number of spans embedded. A span
/// whose provider call fails is skipped and logged; it stays eligible on
/// the next call (no failure-cooldown bookkeeping for embeddings, unlike
/// enrichments — the spec only specifies cooldown for §4.3's pipeline).
pub async fn generate_pending(
    db: &SqlDb,
    profile: &EmbeddingProfile,
    provider: &dyn EmbeddingProvider,
    limit: i64,
) -> Result<usize, sqlx::Error> {
    let candidates = pending_embeddings(db, &profile.name, limit).await?;
    let mut embedded = 0;
    for candidate in candidates {
        let vector = match provider.embed(&candidate.text).await {
            Ok(vector) => vector,
            Err(err) => {
                warn!(span_id = candidate.span_id, %err, "embedding generation failed, skipping");
                continue;
            }
        };
        if vector.len() != profile.dimension {
            warn!(
                span_id = candidate.span_id,
                expected = profile.dimension,
                got = vector.len(),
                "embedding provider returned wrong dimension, skipping"
            );
            continue;
        }
        if persist_embedding(db, candidate.span_id, &profile.name, &vector).await.is_ok() {
            embedded += 1;
        }
    }
    Ok(embedded)
}

async fn persist_embedding(
    db: &SqlDb,
    span_id: i64,
    profile: &str,
    vector: &[f32],
) -> Result<(), DbBusyError> {
    let profile = profile.to_string();
    let blob = vector_to_blob(vector);
    db.write_transaction(LockMode::Batch, move |mut tx| async move {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO embeddings (span_id, profile, vector, created_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(span_id, profile) DO UPDATE SET vector = excluded.vector, created_at = excluded.created_at",
        )
        .bind(span_id)
        .bind(&profile)
        .bind(&blob)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        Ok((tx, ()))
    })
    .await
}

#[derive(Debug, Clone)]
pub struct VectorHit {
    pub span_id: i64,
    pub score: f32,
}

/// Brute-force nearest-neighbour search over one profile's vectors. The
/// storage layer is a single embedded database file per repository (spec
/// §4.1); a repository-scale corpus fits comfortably in memory for a
/// linear scan, so this avoids standing up a second, externally-hosted
/// vector index just to answer "top k by cosine similarity".
pub async fn nearest(
    db: &SqlDb,
    profile: &str,
    query: &[f32],
    limit: usize,
) -> Result<Vec<VectorHit>, sqlx::Error> {
    let profile = profile.to_string();
    let mut hits: Vec<VectorHit> = db
        .read(move |pool| async move {
            let rows = sqlx::query("SELECT span_id, vector FROM embeddings WHERE profile = ?")
                .bind(&profile)
                .fetch_all(&pool)
                .await?;
            Ok(rows
                .into_iter()
                .map(|row| {
                    let span_id: i64 = row.get("span_id");
                    let blob: Vec<u8> = row.get("vector");
                    (span_id, blob_to_vector(&blob))
                })
                .collect::<Vec<_>>())
        })
        .await?
        .into_iter()
        .map(|(span_id, vector)| VectorHit {
            span_id,
            score: cosine_similarity(query, &vector),
        })
        .collect();

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(limit);
    Ok(hits)
}

/// Drops every vector stored under `profile` (spec §3: "old vectors are
/// retained until explicitly dropped").
pub async fn drop_profile(db: &SqlDb, profile: &str) -> Result<u64, DbBusyError> {
    let profile = profile.to_string();
    db.write_transaction(LockMode::Batch, move |mut tx| async move {
        let result = sqlx::query("DELETE FROM embeddings WHERE profile = ?")
            .bind(&profile)
            .execute(&mut *tx)
            .await?;
        Ok((tx, result.rows_affected()))
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locks::LockManager;

    #[test]
    fn vector_blob_round_trips() {
        let vector = vec![0.5_f32, -1.25, 3.0];
        let blob = vector_to_blob(&vector);
        assert_eq!(blob.len(), 12);
        assert_eq!(blob_to_vector(&blob), vector);
    }

    #[test]
    fn cosine_similarity_ranks_identical_vector_highest() {
        let query = vec![1.0_f32, 0.0, 0.0];
        let same = vec![1.0_f32, 0.0, 0.0];
        let orthogonal = vec![0.0_f32, 1.0, 0.0];
        assert!(cosine_similarity(&query, &same) > cosine_similarity(&query, &orthogonal));
    }

    struct StubProvider;

    #[async_trait]
    impl EmbeddingProvider for StubProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, crate::llm::BackendError> {
            Ok(vec![text.len() as f32, 0.0])
        }
    }

    #[tokio::test]
    async fn generate_pending_persists_vectors_then_nearest_finds_them() {
        let dir = tempfile::tempdir().unwrap();
        let locks = LockManager::new(Default::default());
        let db = SqlDb::connect(&dir.path().join("rag.db"), "test-repo", locks).await.unwrap();

        sqlx::query("INSERT INTO files (repo_path, relative_path, content_hash, last_indexed_at) VALUES ('r', 'a.rs', 'h', 0)")
            .execute(db.pool())
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO spans (file_id, span_hash, start_line, end_line, content_type, normalized_text) \
             VALUES (1, 'sh1', 0, 1, 'code', 'hello')",
        )
        .execute(db.pool())
        .await
        .unwrap();

        let profile = EmbeddingProfile { name: "code-v1".into(), dimension: 2 };
        let embedded = generate_pending(&db, &profile, &StubProvider, 10).await.unwrap();
        assert_eq!(embedded, 1);

        // a second pass finds nothing left to embed
        let embedded_again = generate_pending(&db, &profile, &StubProvider, 10).await.unwrap();
        assert_eq!(embedded_again, 0);

        let hits = nearest(&db, "code-v1", &[5.0, 0.0], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span_id, 1);
    }
}
