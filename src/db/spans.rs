use std::collections::HashSet;

use sqlx::Row;

use crate::locks::LockMode;

use super::pool::{DbBusyError, SqlDb};

/// A span about to be written by the differential reconciler. `span_hash`
/// is expected to already be `compute_span_hash(file_hash, start_line,
/// end_line, normalized_text)` — the identity the reconciler diffs on.
#[derive(Debug, Clone)]
pub struct NewSpan {
    pub span_hash: String,
    pub start_line: i64,
    pub end_line: i64,
    pub content_type: String,
    pub language: Option<String>,
    pub symbol: Option<String>,
    pub normalized_text: String,
}

/// Deterministic span identity: the same four inputs always produce the
/// same hash, regardless of host, process, or run.
pub fn compute_span_hash(file_hash: &str, start_line: i64, end_line: i64, normalized_text: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(file_hash.as_bytes());
    hasher.update(&start_line.to_le_bytes());
    hasher.update(&end_line.to_le_bytes());
    hasher.update(normalized_text.as_bytes());
    hasher.finalize().to_hex().to_string()
}

#[derive(Debug, Clone, Default)]
pub struct ReplaceSpansReport {
    pub deleted: usize,
    pub inserted: usize,
    pub updated: usize,
}

/// Differential reconciliation (spec §4.1): deletes spans no longer
/// present (cascading to their enrichments/embeddings/failures), inserts
/// newly seen spans, and refreshes metadata for spans whose hash survived
/// unchanged, without touching their attached enrichments.
pub async fn replace_spans(
    db: &SqlDb,
    file_id: i64,
    new_spans: &[NewSpan],
) -> Result<ReplaceSpansReport, DbBusyError> {
    let new_by_hash: std::collections::HashMap<&str, &NewSpan> =
        new_spans.iter().map(|s| (s.span_hash.as_str(), s)).collect();

    db.write_transaction(LockMode::Batch, move |mut tx| {
        let new_by_hash = new_by_hash.clone();
        let new_spans = new_spans.to_vec();
        async move {
            let existing: Vec<String> = sqlx::query("SELECT span_hash FROM spans WHERE file_id = ?")
                .bind(file_id)
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .map(|row| row.get::<String, _>(0))
                .collect();
            let old_set: HashSet<&str> = existing.iter().map(String::as_str).collect();
            let new_set: HashSet<&str> = new_by_hash.keys().copied().collect();

            let mut report = ReplaceSpansReport::default();

            for stale in old_set.difference(&new_set) {
                sqlx::query("DELETE FROM spans WHERE file_id = ? AND span_hash = ?")
                    .bind(file_id)
                    .bind(stale)
                    .execute(&mut *tx)
                    .await?;
                report.deleted += 1;
            }

            for span in &new_spans {
                if old_set.contains(span.span_hash.as_str()) {
                    sqlx::query(
                        "UPDATE spans SET start_line = ?, end_line = ?, content_type = ?, language = ?, symbol = ? \
                         WHERE file_id = ? AND span_hash = ?",
                    )
                    .bind(span.start_line)
                    .bind(span.end_line)
                    .bind(&span.content_type)
                    .bind(&span.language)
                    .bind(&span.symbol)
                    .bind(file_id)
                    .bind(&span.span_hash)
                    .execute(&mut *tx)
                    .await?;
                    report.updated += 1;
                } else {
                    sqlx::query(
                        "INSERT INTO spans (file_id, span_hash, start_line, end_line, content_type, language, symbol, normalized_text) \
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(file_id)
                    .bind(&span.span_hash)
                    .bind(span.start_line)
                    .bind(span.end_line)
                    .bind(&span.content_type)
                    .bind(&span.language)
                    .bind(&span.symbol)
                    .bind(&span.normalized_text)
                    .execute(&mut *tx)
                    .await?;
                    report.inserted += 1;
                }
            }

            Ok((tx, report))
        }
    })
    .await
}

#[derive(Debug, Clone)]
pub struct PendingSpan {
    pub span_id: i64,
    pub file_id: i64,
    pub span_hash: String,
    pub relative_path: String,
    pub content_type: String,
    pub language: Option<String>,
    pub last_enriched_at: Option<i64>,
}

/// Random sampling over a candidate pool (spec §4.1): pulls `limit * 10`
/// eligible spans and returns a uniform random subset of `limit`, so the
/// scheduler sees file-type diversity rather than a contiguous run from
/// one file.
pub async fn pending_enrichments(
    db: &SqlDb,
    limit: usize,
    max_failures_per_span: u32,
    cooldown_seconds: i64,
    now_unix: i64,
) -> Result<Vec<PendingSpan>, sqlx::Error> {
    let pool_size = (limit * 10) as i64;
    let mut rows = db
        .read(move |pool| async move {
            sqlx::query(
                "SELECT s.id, s.file_id, s.span_hash, f.relative_path, s.content_type, s.language, s.last_enriched_at, \
                        COALESCE(fail.attempts, 0) AS attempts, fail.last_attempt_at \
                 FROM spans s \
                 JOIN files f ON f.id = s.file_id \
                 LEFT JOIN span_failures fail ON fail.span_id = s.id \
                 LEFT JOIN enrichments e ON e.span_id = s.id \
                 WHERE e.id IS NULL \
                 LIMIT ?",
            )
            .bind(pool_size)
            .fetch_all(&pool)
            .await
        })
        .await?
        .into_iter()
        .filter(|row| {
            let attempts: i64 = row.get("attempts");
            if (attempts as u32) < max_failures_per_span {
                return true;
            }
            let last_attempt_at: Option<i64> = row.get("last_attempt_at");
            match last_attempt_at {
                // still in cooldown: not eligible yet
                Some(t) => now_unix - t >= cooldown_seconds,
                None => true,
            }
        })
        .map(|row| PendingSpan {
            span_id: row.get("id"),
            file_id: row.get("file_id"),
            span_hash: row.get("span_hash"),
            relative_path: row.get("relative_path"),
            content_type: row.get("content_type"),
            language: row.get("language"),
            last_enriched_at: row.get("last_enriched_at"),
        })
        .collect::<Vec<_>>();

    use rand::seq::SliceRandom;
    rows.shuffle(&mut rand::thread_rng());
    rows.truncate(limit);
    Ok(rows)
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub span_id: i64,
    pub backend: String,
    pub summary: Option<String>,
    pub rank: f64,
}

/// `search_enrichments_fts` (spec §4.1): relevance-ordered, ties broken by
/// insertion order (ascending `enrichments.id`).
pub async fn search_enrichments_fts(
    db: &SqlDb,
    query: &str,
    limit: usize,
) -> Result<Vec<SearchHit>, sqlx::Error> {
    let query = query.to_string();
    db.read(move |pool| async move {
        let rows = sqlx::query(
            "SELECT e.id, e.span_id, e.backend, e.summary, fts.rank AS rank \
             FROM enrichments_fts fts \
             JOIN enrichments e ON e.id = fts.rowid \
             WHERE enrichments_fts MATCH ? \
             ORDER BY fts.rank, e.id ASC \
             LIMIT ?",
        )
        .bind(&query)
        .bind(limit as i64)
        .fetch_all(&pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| SearchHit {
                span_id: row.get("span_id"),
                backend: row.get("backend"),
                summary: row.get("summary"),
                rank: row.get("rank"),
            })
            .collect())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_hash_is_deterministic_and_position_sensitive() {
        let a = compute_span_hash("filehash", 1, 10, "fn main() {}");
        let b = compute_span_hash("filehash", 1, 10, "fn main() {}");
        let c = compute_span_hash("filehash", 2, 10, "fn main() {}");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
