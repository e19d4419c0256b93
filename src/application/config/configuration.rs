use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::llm::BackendSpec;
use crate::locks::ResourceClass;
use crate::repo::state::StateSource;

/// In-memory configuration surface (spec §6). Loading this from a TOML
/// file on disk and wiring it to CLI flags are external concerns (the
/// CLI/config-loading surface is out of scope) — this crate only defines
/// and consumes the shape.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Configuration {
    /// Directory to store all persistent state (the repo's `.llmc` workspace root).
    #[serde(default = "default_index_dir")]
    pub index_dir: PathBuf,

    #[serde(default)]
    pub state_source: StateSource,

    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub chains: HashMap<ContentClass, Vec<BackendSpec>>,

    #[serde(default)]
    pub embedding_profiles: HashMap<String, EmbeddingProfileConfig>,

    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub anti_stomp: AntiStompConfig,

    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    #[serde(default = "default_max_threads")]
    pub max_threads: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContentClass {
    Code,
    Docs,
}

/// `patterns -> weight` mapping from spec §4.2. Weights are clamped to
/// `[1, 10]`; the pessimistic collision policy (largest matching weight
/// wins) and the "unmatched defaults to 5" rule live on the scheduler.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RoutingConfig {
    pub path_weights: Vec<PathWeight>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PathWeight {
    pub glob: String,
    pub weight: u8,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EmbeddingProfileConfig {
    pub provider: String,
    pub model: String,
    pub dimension: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DaemonConfig {
    #[serde(default = "default_nice_level")]
    pub nice_level: i32,
    #[serde(default = "default_base_interval_secs")]
    pub base_interval_secs: u64,
    #[serde(default = "default_max_multiplier")]
    pub max_multiplier: u32,
    #[serde(default = "default_sleep_chunk_secs")]
    pub sleep_chunk_secs: u64,
    #[serde(default = "default_shutdown_bound_secs")]
    pub shutdown_bound_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            nice_level: default_nice_level(),
            base_interval_secs: default_base_interval_secs(),
            max_multiplier: default_max_multiplier(),
            sleep_chunk_secs: default_sleep_chunk_secs(),
            shutdown_bound_secs: default_shutdown_bound_secs(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AntiStompConfig {
    pub overrides: HashMap<ResourceClass, ResourceClassOverride>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ResourceClassOverride {
    pub ttl_secs: Option<u64>,
    pub interactive_max_wait_ms: Option<u64>,
    pub batch_max_wait_ms: Option<u64>,
}

impl Configuration {
    /// Directory where logs are written to.
    pub fn log_dir(&self) -> PathBuf {
        self.index_dir.join("logs")
    }

    /// Deterministic path for a named tantivy index under the workspace.
    pub fn index_path(&self, name: &str) -> PathBuf {
        self.index_dir.join("rag").join(name)
    }

    /// Deterministic path for the per-repo sqlite database (spec §6).
    pub fn db_path(&self) -> PathBuf {
        self.index_dir.join("rag").join("rag.db")
    }

    pub fn sidecar_dir(&self) -> PathBuf {
        self.index_dir.join("sidecars")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.index_dir.join("locks")
    }
}

fn default_index_dir() -> PathBuf {
    ".llmc".into()
}

fn default_buffer_size() -> usize {
    50_000_000
}

fn default_max_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_nice_level() -> i32 {
    10
}

fn default_base_interval_secs() -> u64 {
    180
}

fn default_max_multiplier() -> u32 {
    10
}

fn default_sleep_chunk_secs() -> u64 {
    5
}

fn default_shutdown_bound_secs() -> u64 {
    15
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            index_dir: default_index_dir(),
            state_source: StateSource::default(),
            routing: RoutingConfig::default(),
            chains: HashMap::new(),
            embedding_profiles: HashMap::new(),
            daemon: DaemonConfig::default(),
            anti_stomp: AntiStompConfig::default(),
            buffer_size: default_buffer_size(),
            max_threads: default_max_threads(),
        }
    }
}
