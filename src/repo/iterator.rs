use ignore::DirEntry;

use crate::application::background::SyncPipes;

/// A single entry produced while walking a repository: either a readable
/// file, a directory (kept so callers can special-case directory-only
/// indexing), or anything else (symlinks, sockets, ...) that carries no
/// useful content.
pub enum RepoDirectoryEntry {
    File(RepositoryFile),
    Dir(RepositoryDirectory),
    Other,
}

pub struct RepositoryFile {
    pub buffer: String,
    pub path: String,
}

pub struct RepositoryDirectory {
    pub path: String,
}

/// Abstraction over "a thing that can walk a repository's files", so the
/// storage layer's reconciler doesn't care whether entries come from a
/// plain filesystem walk or (in a future backend) a git tree walk.
pub trait FileSource {
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn for_each(self, signal: &SyncPipes, iterator: impl Fn(RepoDirectoryEntry) + Sync + Send);
}

const ALWAYS_IGNORE: &[&str] = &[".git", "node_modules", "target", ".llmc"];

/// Gitignore-aware predicate plus the hardcoded always-ignore set from
/// the watcher contract (spec §6).
pub fn should_index_entry(entry: &DirEntry) -> bool {
    !entry
        .path()
        .components()
        .any(|c| ALWAYS_IGNORE.contains(&c.as_os_str().to_string_lossy().as_ref()))
}
