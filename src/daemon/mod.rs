use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::application::background::SyncPipes;
use crate::application::config::configuration::{Configuration, ContentClass};
use crate::chunking::languages::TSLanguageParsing;
use crate::chunking::spans::file_to_spans;
use crate::db::files::{self, FileRecord};
use crate::db::spans::replace_spans;
use crate::db::SqlDb;
use crate::docsidecar;
use crate::embeddings::{self, EmbeddingProvider};
use crate::enrichment::{self, EnrichmentBatchResult};
use crate::llm::middleware::ReliableAdapter;
use crate::locks::{call_with_stomp_guard, LockManager, LockMode, ResourceClass, ResourceKey};
use crate::queue::NotificationChannel;
use crate::repo::filesystem::FileWalker;
use crate::repo::types::RepoRef;

/// File-level content hash (spec §3: "a content hash (SHA-256)"). Distinct
/// from `span_hash`, which stays on blake3 per the chunking module's own
/// open-question resolution.
fn file_content_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// One repository the daemon is responsible for: its root on disk, the
/// database that holds its indexed state, and the per-repo workspace
/// config (sidecar/doc paths live under `<repo>/.llmc`, per
/// `Repository::workspace_dir`). Built by the binary entry point, one per
/// registered repository (spec §4.8 "for each registered repository").
pub struct RepoContext {
    pub root: PathBuf,
    pub db: Arc<SqlDb>,
    pub workspace: Configuration,
}

impl RepoContext {
    /// Builds a repo's workspace config by rooting the shared daemon
    /// config's workspace-relative paths under `<root>/.llmc`, while
    /// keeping its routing/chain/daemon/anti-stomp policy shared.
    pub fn new(root: PathBuf, db: Arc<SqlDb>, shared: &Configuration) -> Self {
        let mut workspace = shared.clone();
        workspace.index_dir = root.join(".llmc");
        Self { root, db, workspace }
    }

    fn repo_key(&self) -> String {
        self.root.to_string_lossy().to_string()
    }
}

/// Per-cycle work tally. A cycle counts as idle, for the back-off
/// computation, only when every step below did nothing (spec §4.8 step 5).
#[derive(Debug, Default, Clone)]
pub struct CycleReport {
    pub files_changed: usize,
    pub enrichment: EnrichmentBatchResult,
    pub embedded: usize,
    pub docgen: usize,
}

impl CycleReport {
    pub fn did_work(&self) -> bool {
        self.files_changed > 0 || self.enrichment.attempted > 0 || self.embedded > 0 || self.docgen > 0
    }
}

/// Drives the idle-throttled, watcher-driven loop (spec §4.8) across every
/// registered repository. Owns the backend chains and embedding providers,
/// which are configured once up front and shared across repos and cycles.
pub struct Daemon {
    config: Configuration,
    locks: Arc<LockManager>,
    parser: TSLanguageParsing,
    chains: HashMap<ContentClass, Vec<ReliableAdapter>>,
    embedding_providers: HashMap<String, Box<dyn EmbeddingProvider>>,
    notifications: Arc<NotificationChannel>,
}

impl Daemon {
    pub fn new(
        config: Configuration,
        chains: HashMap<ContentClass, Vec<ReliableAdapter>>,
        embedding_providers: HashMap<String, Box<dyn EmbeddingProvider>>,
    ) -> Self {
        let notifications = Arc::new(NotificationChannel::new(config.index_dir.join("wake.fifo")));
        Self {
            locks: LockManager::new(config.anti_stomp.overrides.clone()),
            config,
            parser: TSLanguageParsing::init(),
            chains,
            embedding_providers,
            notifications,
        }
    }

    pub fn locks(&self) -> Arc<LockManager> {
        Arc::clone(&self.locks)
    }

    pub fn notifications(&self) -> Arc<NotificationChannel> {
        Arc::clone(&self.notifications)
    }

    /// Main loop (spec §4.8). Runs every registered repo once per cycle,
    /// then backs off geometrically while nothing changes and resets the
    /// instant any repo reports real work.
    pub async fn run(&mut self, repos: &[RepoContext], running: Arc<AtomicBool>) {
        let daemon_cfg = self.config.daemon.clone();
        let mut idle_cycles: u32 = 0;

        while running.load(Ordering::Relaxed) {
            let mut work_done = false;

            for repo in repos {
                if !running.load(Ordering::Relaxed) {
                    break;
                }
                let stop_check = {
                    let running = Arc::clone(&running);
                    move || !running.load(Ordering::Relaxed)
                };
                match self.process_repo(repo, stop_check).await {
                    Ok(report) => {
                        if report.did_work() {
                            work_done = true;
                        }
                        info!(
                            repo = %repo.root.display(),
                            files_changed = report.files_changed,
                            enrichment_attempted = report.enrichment.attempted,
                            enrichment_succeeded = report.enrichment.succeeded,
                            embedded = report.embedded,
                            docgen = report.docgen,
                            "sync cycle complete"
                        );
                    }
                    Err(err) => warn!(repo = %repo.root.display(), %err, "sync cycle failed"),
                }
            }

            idle_cycles = if work_done { 0 } else { idle_cycles.saturating_add(1) };
            let capped_secs = daemon_cfg.base_interval_secs.saturating_mul(daemon_cfg.max_multiplier as u64);
            let scaled_secs = daemon_cfg
                .base_interval_secs
                .saturating_mul(2u64.saturating_pow(idle_cycles));
            let sleep_for = Duration::from_secs(scaled_secs.min(capped_secs));

            self.interruptible_sleep(sleep_for, &running).await;
        }
    }

    /// Sleeps in chunks (default 5s), returning early if `running` clears
    /// or the notification channel wakes it (spec §4.8
    /// `interruptible_sleep`).
    async fn interruptible_sleep(&self, total: Duration, running: &AtomicBool) {
        let chunk = Duration::from_secs(self.config.daemon.sleep_chunk_secs.max(1));
        let mut remaining = total;
        while !remaining.is_zero() && running.load(Ordering::Relaxed) {
            let this_chunk = remaining.min(chunk);
            if self.notifications.wait(this_chunk).await {
                return;
            }
            remaining = remaining.saturating_sub(this_chunk);
        }
    }

    /// `process_repo` (spec §4.8): sync, enrich, embed, then — only if the
    /// cycle was otherwise empty — the opportunistic docgen tail step.
    pub async fn process_repo(
        &mut self,
        repo: &RepoContext,
        stop_check: impl Fn() -> bool + Send + Sync + Clone + 'static,
    ) -> anyhow::Result<CycleReport> {
        let mut report = CycleReport::default();

        let pipes = SyncPipes::new(RepoRef::from(&repo.root));
        report.files_changed = self.sync_files(repo, &pipes).await?;

        report.enrichment = enrichment::process_batch(
            &repo.db,
            &self.config,
            &mut self.chains,
            50,
            stop_check.clone(),
            |_, _| {},
        )
        .await?;

        let profiles: Vec<_> = self.config.embedding_profiles.clone().into_iter().collect();
        for (name, profile_cfg) in profiles {
            if stop_check() {
                break;
            }
            if let Some(provider) = self.embedding_providers.get(&name) {
                let profile = embeddings::EmbeddingProfile {
                    name: name.clone(),
                    dimension: profile_cfg.dimension,
                };
                report.embedded += embeddings::generate_pending(&repo.db, &profile, provider.as_ref(), 50).await?;
            }
        }

        if !report.did_work() && !stop_check() {
            report.docgen = self.opportunistic_docgen(repo).await?;
        }

        Ok(report)
    }

    /// Differential filesystem sync (spec §4.1/§4.9): walks the repo,
    /// (re)chunks any file whose content hash changed, materializes
    /// sidecars for eligible binary documents, and deletes rows (and
    /// sidecars) for files no longer present. Returns the number of files
    /// whose spans were touched.
    async fn sync_files(&self, repo: &RepoContext, pipes: &SyncPipes) -> anyhow::Result<usize> {
        let repo_key = repo.repo_key();
        let walker = FileWalker::index_directory(&repo.root);
        let mut seen = std::collections::HashSet::new();
        let mut changed = 0usize;

        for path in &walker.file_list {
            if pipes.is_cancelled() {
                break;
            }
            let relative = match path.strip_prefix(&repo.root) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => continue,
            };
            let relative_str = relative.to_string_lossy().to_string();
            seen.insert(relative_str.clone());

            if docsidecar::is_eligible(path) {
                match self.sync_sidecar_doc(repo, path, &relative).await {
                    Ok(true) => changed += 1,
                    Ok(false) => {}
                    Err(err) => warn!(path = %path.display(), %err, "sidecar sync failed"),
                }
                continue;
            }

            let buffer = match std::fs::read_to_string(path) {
                Ok(buffer) => buffer,
                Err(_) => continue,
            };
            let file_hash = file_content_hash(buffer.as_bytes());
            let upsert = files::upsert_file(&repo.db, &repo_key, &relative_str, &file_hash, None).await?;
            if !upsert.changed {
                continue;
            }
            let new_spans = file_to_spans(&self.parser, &file_hash, &relative_str, &buffer);
            replace_spans(&repo.db, upsert.file_id, &new_spans).await?;
            changed += 1;
        }

        for known in files::list_relative_paths(&repo.db, &repo_key).await? {
            if seen.contains(&known) {
                continue;
            }
            if let Some(sidecar) = files::sidecar_path_for(&repo.db, &repo_key, &known).await? {
                docsidecar::delete_sidecar(Path::new(&sidecar)).ok();
            }
            files::delete_file(&repo.db, &repo_key, &known).await?;
            changed += 1;
        }

        let sidecar_dir = repo.workspace.sidecar_dir();
        match docsidecar::sweep_orphans(&sidecar_dir, &repo.root) {
            Ok(removed) if removed > 0 => info!(removed, "swept orphaned sidecars"),
            Ok(_) => {}
            Err(err) => warn!(%err, "sidecar orphan sweep failed"),
        }

        Ok(changed)
    }

    /// Regenerates a binary document's sidecar if stale, then indexes the
    /// sidecar's text under the *original* file's relative path (spec §4.9
    /// display contract). Returns whether the file's spans changed.
    async fn sync_sidecar_doc(&self, repo: &RepoContext, source: &Path, relative: &Path) -> anyhow::Result<bool> {
        let sidecar_dir = repo.workspace.sidecar_dir();
        let sidecar = docsidecar::ensure_sidecar(source, &sidecar_dir, relative)?;
        let text = docsidecar::read_sidecar_text(&sidecar)?;
        let file_hash = file_content_hash(text.as_bytes());
        let relative_str = relative.to_string_lossy().to_string();

        let upsert = files::upsert_file(
            &repo.db,
            &repo.repo_key(),
            &relative_str,
            &file_hash,
            Some(&sidecar.to_string_lossy()),
        )
        .await?;
        if !upsert.changed {
            return Ok(false);
        }
        let new_spans = file_to_spans(&self.parser, &file_hash, &relative_str, &text);
        replace_spans(&repo.db, upsert.file_id, &new_spans).await?;
        Ok(true)
    }

    /// Opportunistic documentation generation tail step (spec §4.10). Only
    /// called when the rest of the cycle produced nothing; generates at
    /// most one file-level summary, gated by the `IDEMP_DOCS` lock and a
    /// content-hash header so a source file unchanged since its last
    /// summary costs nothing.
    async fn opportunistic_docgen(&mut self, repo: &RepoContext) -> anyhow::Result<usize> {
        let chain = match self.chains.get_mut(&ContentClass::Docs) {
            Some(chain) if !chain.is_empty() => chain,
            _ => return Ok(0),
        };

        let candidates = files::sample_files(&repo.db, &repo.repo_key(), 10).await?;
        for candidate in candidates {
            let FileRecord { relative_path, .. } = &candidate;
            let source = repo.root.join(relative_path);
            let current_hash = match std::fs::read(&source) {
                Ok(bytes) => file_content_hash(&bytes),
                Err(_) => continue,
            };

            let doc_path = doc_path_for(&repo.workspace, relative_path);
            if read_doc_header_hash(&doc_path).as_deref() == Some(current_hash.as_str()) {
                continue;
            }

            let resource = ResourceKey::new(ResourceClass::IdempDocs, repo.repo_key());
            let prompt = format!("Write a short natural-language summary of `{}`.", relative_path);
            let generated = call_with_stomp_guard(
                &self.locks,
                vec![resource],
                LockMode::Batch,
                "llmc-daemon",
                &uuid::Uuid::new_v4().to_string(),
                |_guards| async {
                    let deadline = std::time::Instant::now() + Duration::from_secs(30);
                    for adapter in chain.iter_mut() {
                        if let Ok((item, _meta)) = adapter
                            .generate(&prompt, &serde_json::json!({ "path": relative_path }), deadline)
                            .await
                        {
                            return Some(item);
                        }
                    }
                    None
                },
            )
            .await;

            match generated {
                Ok(Some(item)) => {
                    let summary = item
                        .fields
                        .get("summary")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default();
                    write_doc_atomically(&doc_path, &current_hash, summary)?;
                    return Ok(1);
                }
                Ok(None) => continue,
                Err(err) => {
                    warn!(path = %relative_path, %err, "docgen lock busy, skipping this cycle");
                    continue;
                }
            }
        }

        Ok(0)
    }
}

fn doc_path_for(config: &Configuration, relative_path: &str) -> PathBuf {
    config.index_dir.join("docs").join(format!("{relative_path}.md"))
}

const DOC_HEADER_PREFIX: &str = "<!-- llmc:source_hash=";

fn read_doc_header_hash(doc_path: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(doc_path).ok()?;
    let first_line = contents.lines().next()?;
    let rest = first_line.strip_prefix(DOC_HEADER_PREFIX)?;
    rest.strip_suffix(" -->").map(str::to_string)
}

/// Writes the generated summary with its machine-parsable hash header,
/// atomically (temp file + rename), so a reader never observes a partial
/// write (spec §4.10 write protocol).
fn write_doc_atomically(doc_path: &Path, source_hash: &str, summary: &str) -> std::io::Result<()> {
    if let Some(parent) = doc_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = doc_path.with_extension("md.tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        writeln!(file, "{DOC_HEADER_PREFIX}{source_hash} -->")?;
        writeln!(file)?;
        file.write_all(summary.as_bytes())?;
        writeln!(file)?;
    }
    std::fs::rename(&tmp, doc_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_header_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let doc_path = dir.path().join("a.rs.md");
        write_doc_atomically(&doc_path, "abc123", "does a thing").unwrap();
        assert_eq!(read_doc_header_hash(&doc_path), Some("abc123".to_string()));

        let contents = std::fs::read_to_string(&doc_path).unwrap();
        assert!(contents.contains("does a thing"));
    }

    #[test]
    fn missing_doc_has_no_header_hash() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_doc_header_hash(&dir.path().join("missing.md")), None);
    }

    #[test]
    fn backoff_caps_at_base_times_max_multiplier() {
        let base = 180u64;
        let max_multiplier = 10u64;
        let capped = base.saturating_mul(max_multiplier);
        for idle_cycles in 0..20u32 {
            let scaled = base.saturating_mul(2u64.saturating_pow(idle_cycles));
            assert!(scaled.min(capped) <= capped);
        }
        // at idle_cycles=10, 180*2^10 already exceeds the cap
        let scaled = base.saturating_mul(2u64.saturating_pow(10));
        assert_eq!(scaled.min(capped), capped);
    }

    async fn new_repo(root: &Path, config: &Configuration, locks: Arc<LockManager>) -> RepoContext {
        let db_path = root.join(".llmc").join("rag").join("rag.db");
        let db = SqlDb::connect(&db_path, root.to_string_lossy().to_string(), locks).await.unwrap();
        RepoContext::new(root.to_path_buf(), Arc::new(db), config)
    }

    /// End-to-end exercise of `process_repo` with no backend chains or
    /// embedding providers configured (the default, since this crate does
    /// not carry provider wire formats): sync still indexes files and
    /// deletions, while enrichment/embedding/docgen are no-ops rather than
    /// errors.
    #[tokio::test]
    async fn process_repo_syncs_files_without_any_configured_backend() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn main() {}\n").unwrap();

        let config = Configuration::default();
        let mut daemon = Daemon::new(config.clone(), Default::default(), Default::default());
        let locks = daemon.locks();
        let repo = new_repo(dir.path(), &config, locks).await;

        let report = daemon.process_repo(&repo, || false).await.unwrap();
        assert_eq!(report.files_changed, 1);
        // the new span is pulled as a candidate but skipped: no backend
        // chain is configured for its content class.
        assert_eq!(report.enrichment.attempted, 1);
        assert_eq!(report.enrichment.skipped, 1);
        assert_eq!(report.enrichment.succeeded, 0);
        assert_eq!(report.embedded, 0);
        // no Docs chain configured, so the tail step is a no-op even though
        // the rest of the cycle was otherwise empty on this second pass
        let idle_report = daemon.process_repo(&repo, || false).await.unwrap();
        assert_eq!(idle_report.files_changed, 0);
        assert_eq!(idle_report.docgen, 0);

        std::fs::remove_file(dir.path().join("a.rs")).unwrap();
        let deletion_report = daemon.process_repo(&repo, || false).await.unwrap();
        assert_eq!(deletion_report.files_changed, 1);

        let remaining = files::list_relative_paths(&repo.db, &repo.repo_key()).await.unwrap();
        assert!(remaining.is_empty());
    }
}
