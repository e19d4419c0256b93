use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use crate::repo::types::{RepoRef, SyncStatus};

#[derive(serde::Serialize, Clone)]
pub struct Progress {
    #[serde(rename = "ref")]
    reporef: RepoRef,
    #[serde(rename = "ev")]
    event: ProgressEvent,
}

#[derive(serde::Serialize, Clone)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEvent {
    IndexPercent(u8),
    StatusChange(SyncStatus),
}

/// Cooperative cancellation + progress reporting handed down into every
/// long-running walk (file sync, enrichment batch, embedding batch).
///
/// This is the concrete shape of the "stop predicate" the spec asks for
/// throughout §4.3/§4.8: a shared atomic flag plus a progress counter,
/// cheap to clone and to poll from deep inside a rayon `for_each`.
#[derive(Clone)]
pub struct SyncPipes {
    reporef: RepoRef,
    cancelled: Arc<AtomicBool>,
    percent: Arc<AtomicU8>,
}

impl SyncPipes {
    pub fn new(reporef: RepoRef) -> Self {
        Self {
            reporef,
            cancelled: Arc::new(AtomicBool::new(false)),
            percent: Arc::new(AtomicU8::new(0)),
        }
    }

    pub fn reporef(&self) -> &RepoRef {
        &self.reporef
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Returns a plain `Fn() -> bool` stop predicate, the shape §4.3's
    /// `process_batch` and §4.8's `process_repo` accept.
    pub fn stop_check(&self) -> impl Fn() -> bool + Send + Sync + 'static {
        let cancelled = self.cancelled.clone();
        move || cancelled.load(Ordering::Relaxed)
    }

    pub fn index_percent(&self, percent: u8) {
        self.percent.store(percent, Ordering::Relaxed);
    }

    pub fn percent(&self) -> u8 {
        self.percent.load(Ordering::Relaxed)
    }
}

/// Ties a repo identity to the cancellation/progress handle for the
/// duration of a single sync cycle.
pub struct SyncHandle {
    pub reporef: RepoRef,
    pipes: SyncPipes,
}

impl SyncHandle {
    pub fn new(reporef: RepoRef) -> Self {
        let pipes = SyncPipes::new(reporef.clone());
        Self { reporef, pipes }
    }

    pub fn pipes(&self) -> &SyncPipes {
        &self.pipes
    }
}
