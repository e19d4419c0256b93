use serde::Deserialize;
use serde::Serialize;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use super::types::{RepoRef, Repository};

pub type RepositoryPool = Arc<scc::HashMap<RepoRef, Repository>>;

/// Schema version tracked by the tantivy index; bumping it on an
/// incompatible schema change forces `Indexes::new` to wipe and rebuild.
const CURRENT_INDEX_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct StateSource {
    #[serde(default)]
    directory: Option<PathBuf>,
    #[serde(default)]
    repo_state_file: Option<PathBuf>,
    #[serde(default)]
    index_version_file: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("local repository must have an absolute path")]
    NonAbsoluteLocal,
    #[error("paths can't contain `..` or `.`")]
    InvalidPath,
    #[error("indexing error")]
    Anyhow {
        #[from]
        error: anyhow::Error,
    },
}

impl StateSource {
    pub fn set_default_dir(&mut self, dir: &Path) {
        std::fs::create_dir_all(dir).expect("the workspace folder can't be created");

        self.repo_state_file
            .get_or_insert_with(|| dir.join("repo_state"));

        self.index_version_file
            .get_or_insert_with(|| dir.join("index_version"));

        self.directory.get_or_insert_with(|| {
            let target = dir.join("local_cache");
            std::fs::create_dir_all(&target).unwrap();
            target
        });
    }

    fn version_path(&self) -> PathBuf {
        self.index_version_file
            .clone()
            .expect("set_default_dir must be called before use")
    }

    /// True when the on-disk tantivy schema was built by a different,
    /// incompatible crate version and must be rebuilt from scratch.
    pub fn index_version_mismatch(&self) -> bool {
        match std::fs::read_to_string(self.version_path()) {
            Ok(contents) => contents.trim().parse::<u32>().ok() != Some(CURRENT_INDEX_VERSION),
            Err(_) => true,
        }
    }

    pub fn save_index_version(&self) -> anyhow::Result<()> {
        std::fs::write(self.version_path(), CURRENT_INDEX_VERSION.to_string())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_directory_reports_mismatch_until_saved() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = StateSource::default();
        state.set_default_dir(dir.path());

        assert!(state.index_version_mismatch());
        state.save_index_version().unwrap();
        assert!(!state.index_version_mismatch());
    }
}
