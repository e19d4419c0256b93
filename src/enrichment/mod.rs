use std::time::Instant;

use serde::Serialize;
use sqlx::Row;
use tracing::{info, warn};

use crate::application::config::configuration::{Configuration, ContentClass};
use crate::db::spans::{pending_enrichments, PendingSpan};
use crate::db::SqlDb;
use crate::llm::middleware::ReliableAdapter;
use crate::locks::LockMode;
use crate::scheduler::Scheduler;

const MAX_FAILURES_PER_SPAN: u32 = 3;
const COOLDOWN_SECONDS: i64 = 3600;
const PROGRESS_EVERY: usize = 5;

#[derive(Debug, Clone, Serialize, Default)]
pub struct EnrichmentBatchResult {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_sec: f64,
    pub success_rate: f64,
}

/// Pure function of a span item: builds the prompt handed to the backend
/// chain. Kept free of any I/O so it can be unit tested directly.
pub fn build_prompt(span: &PendingSpan) -> String {
    format!(
        "Summarize the following {} span from `{}` (lines unavailable in prompt; span_hash={}).",
        span.content_type, span.relative_path, span.span_hash
    )
}

fn content_class_for(content_type: &str) -> ContentClass {
    if content_type.eq_ignore_ascii_case("code") {
        ContentClass::Code
    } else {
        ContentClass::Docs
    }
}

/// Turns pending spans into persisted enrichment records (spec §4.3).
/// `stop_check` is polled between spans, so cancellation costs at most one
/// in-flight call.
pub async fn process_batch(
    db: &SqlDb,
    config: &Configuration,
    chains: &mut std::collections::HashMap<ContentClass, Vec<ReliableAdapter>>,
    limit: usize,
    stop_check: impl Fn() -> bool,
    mut progress_callback: impl FnMut(usize, usize),
) -> Result<EnrichmentBatchResult, sqlx::Error> {
    let started = Instant::now();
    let now_unix = chrono::Utc::now().timestamp();

    let candidates = pending_enrichments(
        db,
        limit * 10,
        MAX_FAILURES_PER_SPAN,
        COOLDOWN_SECONDS,
        now_unix,
    )
    .await?;

    let starvation_bound = 5;
    let mut scheduler = Scheduler::new(&config.routing, candidates, starvation_bound);
    let selected = scheduler.pull(limit, &stop_check);
    let total = selected.len();

    let mut result = EnrichmentBatchResult::default();

    for (index, scheduled) in selected.into_iter().enumerate() {
        if stop_check() {
            break;
        }

        if index % PROGRESS_EVERY == 0 {
            progress_callback(index, total);
        }

        result.attempted += 1;
        let span = scheduled.span;
        let prompt = build_prompt(&span);
        let class = content_class_for(&span.content_type);
        let chain = match chains.get_mut(&class) {
            Some(chain) if !chain.is_empty() => chain,
            _ => {
                warn!(path = %span.relative_path, "no backend chain configured for content class, skipping");
                result.skipped += 1;
                continue;
            }
        };

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(30);
        let mut outcome = None;
        for adapter in chain.iter_mut() {
            match adapter
                .generate(&prompt, &serde_json::json!({ "span_hash": span.span_hash }), deadline)
                .await
            {
                Ok(generated) => {
                    outcome = Some(generated);
                    break;
                }
                Err(err) => {
                    warn!(path = %span.relative_path, %err, "backend failed, advancing cascade");
                }
            }
        }

        match outcome {
            Some((item, metadata)) => {
                persist_enrichment(db, span.span_id, &metadata.backend, &item).await.ok();
                info!(
                    index,
                    total,
                    path = %span.relative_path,
                    duration_ms = metadata.duration.as_millis() as u64,
                    model = %metadata.model,
                    backend = %metadata.backend,
                    endpoint = %metadata.endpoint,
                    "span enriched"
                );
                result.succeeded += 1;
            }
            None => {
                record_failure(db, span.span_id, "cascade exhausted").await.ok();
                warn!(path = %span.relative_path, "cascade exhausted for span");
                result.failed += 1;
            }
        }
    }

    result.duration_sec = started.elapsed().as_secs_f64();
    result.success_rate = if result.attempted > 0 {
        result.succeeded as f64 / result.attempted as f64
    } else {
        0.0
    };
    Ok(result)
}

async fn persist_enrichment(
    db: &SqlDb,
    span_id: i64,
    backend: &str,
    item: &crate::llm::GeneratedItem,
) -> Result<(), crate::db::DbBusyError> {
    let backend = backend.to_string();
    let tags = serde_json::Value::Object(item.fields.clone()).to_string();
    let summary = item
        .fields
        .get("summary")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    db.write_transaction(LockMode::Batch, move |mut tx| async move {
        let now = chrono::Utc::now().timestamp();
        let symbol: Option<String> = sqlx::query("SELECT symbol FROM spans WHERE id = ?")
            .bind(span_id)
            .fetch_optional(&mut *tx)
            .await?
            .and_then(|row| row.get("symbol"));
        // `enrichments_fts` is an external-content FTS5 index over this
        // table (`content='enrichments'`); the AFTER INSERT/UPDATE
        // triggers in the migration keep it in sync with `symbol` and
        // `summary` below, so no separate write to the index is needed
        // here.
        sqlx::query(
            "INSERT INTO enrichments (span_id, backend, symbol, summary, tags, created_at) VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(span_id, backend) DO UPDATE SET symbol = excluded.symbol, summary = excluded.summary, tags = excluded.tags, created_at = excluded.created_at",
        )
        .bind(span_id)
        .bind(&backend)
        .bind(&symbol)
        .bind(&summary)
        .bind(&tags)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE spans SET last_enriched_at = ? WHERE id = ?")
            .bind(now)
            .bind(span_id)
            .execute(&mut *tx)
            .await?;
        Ok((tx, ()))
    })
    .await
}

async fn record_failure(db: &SqlDb, span_id: i64, error: &str) -> Result<(), crate::db::DbBusyError> {
    let error = error.chars().take(100).collect::<String>();
    db.write_transaction(LockMode::Batch, move |mut tx| async move {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO span_failures (span_id, attempts, last_error, last_attempt_at) VALUES (?, 1, ?, ?) \
             ON CONFLICT(span_id) DO UPDATE SET attempts = attempts + 1, last_error = excluded.last_error, last_attempt_at = excluded.last_attempt_at",
        )
        .bind(span_id)
        .bind(&error)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        Ok((tx, ()))
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::spans::PendingSpan;

    #[test]
    fn prompt_mentions_path_and_content_type() {
        let span = PendingSpan {
            span_id: 1,
            file_id: 1,
            span_hash: "abc".into(),
            relative_path: "src/lib.rs".into(),
            content_type: "code".into(),
            language: Some("rust".into()),
            last_enriched_at: None,
        };
        let prompt = build_prompt(&span);
        assert!(prompt.contains("src/lib.rs"));
        assert!(prompt.contains("code"));
    }

    /// Regression test for the dropped-FTS-row bug: a persisted enrichment
    /// must be findable through `search_enrichments_fts` immediately, with
    /// no separate reindex step.
    #[tokio::test]
    async fn persisted_enrichment_is_immediately_searchable() {
        use crate::db::files::upsert_file;
        use crate::db::spans::{replace_spans, search_enrichments_fts, NewSpan};
        use crate::locks::LockManager;

        let dir = tempfile::tempdir().unwrap();
        let locks = LockManager::new(Default::default());
        let db = SqlDb::connect(&dir.path().join("rag.db"), "test-repo", locks)
            .await
            .unwrap();

        let file = upsert_file(&db, "repo", "src/lib.rs", "filehash", None)
            .await
            .unwrap();
        let span = NewSpan {
            span_hash: "spanhash".into(),
            start_line: 1,
            end_line: 3,
            content_type: "code".into(),
            language: Some("rust".into()),
            symbol: Some("run_model".into()),
            normalized_text: "fn run_model() {}".into(),
        };
        replace_spans(&db, file.file_id, &[span]).await.unwrap();
        let span_id: i64 = sqlx::query("SELECT id FROM spans WHERE file_id = ?")
            .bind(file.file_id)
            .fetch_one(db.pool())
            .await
            .unwrap()
            .get("id");

        let item = crate::llm::GeneratedItem {
            fields: serde_json::json!({ "summary": "summarizes the model's training loop" })
                .as_object()
                .unwrap()
                .clone(),
        };
        persist_enrichment(&db, span_id, "test-backend", &item).await.unwrap();

        let hits = search_enrichments_fts(&db, "model", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span_id, span_id);
        assert!(hits[0].summary.as_deref().unwrap().contains("model"));

        let symbol_hits = search_enrichments_fts(&db, "run_model", 10).await.unwrap();
        assert_eq!(symbol_hits.len(), 1);
    }
}
