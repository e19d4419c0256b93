use std::time::{Duration, Instant};

use tracing::warn;

use super::adapter::{BackendError, CallMetadata, GeneratedItem};
use super::middleware::ReliableAdapter;

/// Executes the cascade: try each adapter in order, advancing to the next
/// on any `BackendError`. No state is shared between adapters. Returns the
/// first success, or the last error once every adapter has failed (spec
/// §4.4 "Cascade semantics").
pub async fn run_cascade(
    chain: &mut [ReliableAdapter],
    prompt: &str,
    item: &serde_json::Value,
    per_call_budget: Duration,
) -> Result<(GeneratedItem, CallMetadata), BackendError> {
    let mut last_err = BackendError::Permanent("empty backend chain".into());
    for (index, adapter) in chain.iter_mut().enumerate() {
        let deadline = Instant::now() + per_call_budget;
        match adapter.generate(prompt, item, deadline).await {
            Ok(result) => return Ok(result),
            Err(err) => {
                warn!(backend_index = index, %err, "cascade adapter failed, advancing");
                last_err = err;
            }
        }
    }
    Err(last_err)
}
