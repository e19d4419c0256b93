use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One entry in a repository's backend chain (spec §4.4). `auth_ref` names
/// a secret outside this crate's keeping (an env var name, a keychain
/// entry) rather than carrying a credential value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BackendSpec {
    pub name: String,
    pub provider: String,
    pub model: String,
    pub endpoint: String,
    pub auth_ref: String,
    pub tier: u8,
}

/// The parsed, domain-shaped result of a single generation call (summary
/// text, tags, whatever the prompt asked for) plus call bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedItem {
    pub fields: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct CallMetadata {
    pub model: String,
    pub backend: String,
    pub endpoint: String,
    pub duration: std::time::Duration,
}

/// The only error type the cascade (§4.4) interprets. `Transient` covers
/// network errors, 5xx and 429 — the cascade retries these through
/// middleware before moving on; `Permanent` (bad prompt, budget exceeded,
/// auth failure) short-circuits straight to the next backend.
#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("transient backend failure: {0}")]
    Transient(String),
    #[error("permanent backend failure: {0}")]
    Permanent(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}

/// What every provider implementation must satisfy (spec §4.4). Adapters
/// need not be internally thread-safe; concurrency is governed by how many
/// are constructed, not by sharing one across threads.
#[async_trait]
pub trait BackendAdapter: Send {
    async fn generate(
        &mut self,
        prompt: &str,
        item: &serde_json::Value,
    ) -> Result<(GeneratedItem, CallMetadata), BackendError>;

    async fn close(&mut self);
}
