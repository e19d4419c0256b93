use std::path::{Path, PathBuf};
use std::time::Duration;

use notify_debouncer_mini::{
    new_debouncer_opt,
    notify::{self, Config as NotifyConfig, RecommendedWatcher, RecursiveMode},
    Config, DebounceEventResult, Debouncer,
};
use tracing::warn;

const ALWAYS_IGNORE: &[&str] = &[".git", "node_modules", "target", ".llmc"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub change_type: ChangeType,
    pub path: PathBuf,
}

fn is_ignored(path: &Path) -> bool {
    path.components()
        .any(|c| ALWAYS_IGNORE.contains(&c.as_os_str().to_string_lossy().as_ref()))
}

/// A recursive, debounced, gitignore-and-always-ignore-aware watcher
/// (spec §6 "Watcher contract"). The core treats every event purely as a
/// wake hint; authoritative file state is always re-derived by the
/// differential reconciler, so this layer does not need to be perfectly
/// accurate, only timely.
pub struct RepoWatcher {
    _debouncer: Debouncer<RecommendedWatcher>,
    events: tokio::sync::mpsc::UnboundedReceiver<ChangeEvent>,
}

impl RepoWatcher {
    pub fn watch(root: &Path, debounce: Duration) -> notify::Result<Self> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let gitignore = ignore::gitignore::GitignoreBuilder::new(root)
            .build()
            .unwrap_or_else(|_| ignore::gitignore::Gitignore::empty());

        let notify_config: NotifyConfig = Default::default();
        let config = Config::default()
            .with_timeout(debounce)
            .with_notify_config(notify_config.with_compare_contents(true));

        let mut debouncer = new_debouncer_opt::<_, RecommendedWatcher>(config, move |res: DebounceEventResult| {
            match res {
                Ok(events) => {
                    for event in events {
                        if is_ignored(&event.path) {
                            continue;
                        }
                        if gitignore.matched(&event.path, event.path.is_dir()).is_ignore() {
                            continue;
                        }
                        let change_type = classify(&event.path);
                        let _ = tx.send(ChangeEvent {
                            change_type,
                            path: event.path,
                        });
                    }
                }
                Err(err) => warn!(?err, "watcher error"),
            }
        })?;

        debouncer.watcher().watch(root, RecursiveMode::Recursive)?;

        Ok(Self {
            _debouncer: debouncer,
            events: rx,
        })
    }

    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }
}

fn classify(path: &Path) -> ChangeType {
    if path.exists() {
        ChangeType::Modified
    } else {
        ChangeType::Deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_always_ignored_components() {
        assert!(is_ignored(Path::new("repo/.git/HEAD")));
        assert!(is_ignored(Path::new("repo/node_modules/pkg/index.js")));
        assert!(!is_ignored(Path::new("repo/src/lib.rs")));
    }
}
