use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use scc::hash_map::Entry;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

/// The four resource classes a writer can stomp on (spec §4.5). Used as a
/// map key in `AntiStompConfig` overrides, so it needs to be hashable.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    CritCode,
    CritDb,
    MergeMeta,
    IdempDocs,
}

impl ResourceClass {
    fn policy(self) -> ClassPolicy {
        match self {
            ResourceClass::CritCode => ClassPolicy {
                ttl: Duration::from_secs(30),
                interactive_max_wait: Duration::from_millis(500),
                batch_max_wait: Some(Duration::from_millis(3000)),
                fail_open: false,
            },
            ResourceClass::CritDb => ClassPolicy {
                ttl: Duration::from_secs(60),
                interactive_max_wait: Duration::from_millis(1000),
                batch_max_wait: Some(Duration::from_millis(10_000)),
                fail_open: false,
            },
            ResourceClass::MergeMeta => ClassPolicy {
                ttl: Duration::from_secs(15),
                interactive_max_wait: Duration::from_millis(2000),
                batch_max_wait: Some(Duration::from_millis(5000)),
                fail_open: true,
            },
            ResourceClass::IdempDocs => ClassPolicy {
                ttl: Duration::from_secs(120),
                interactive_max_wait: Duration::from_millis(500),
                batch_max_wait: None,
                fail_open: false,
            },
        }
    }
}

struct ClassPolicy {
    ttl: Duration,
    interactive_max_wait: Duration,
    batch_max_wait: Option<Duration>,
    fail_open: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Interactive,
    Batch,
}

/// A resource identity: its class plus a scope-specific identifier (a file
/// path for `CritCode`, a logical db name for `CritDb`, a graph id for
/// `MergeMeta`, a repository root for `IdempDocs`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub class: ResourceClass,
    pub id: String,
}

impl ResourceKey {
    pub fn new(class: ResourceClass, id: impl Into<String>) -> Self {
        Self {
            class,
            id: id.into(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
#[error("resource busy: {resource_key:?} held by {holder_agent_id}, waited {wait_ms}ms (max {max_wait_ms}ms)")]
pub struct ResourceBusyError {
    pub resource_key: ResourceKey,
    pub holder_agent_id: String,
    pub wait_ms: u64,
    pub max_wait_ms: u64,
}

struct Holder {
    agent_id: String,
    session_id: String,
    acquired_at: Instant,
    ttl: Duration,
    fencing_token: u64,
}

impl Holder {
    fn expired(&self) -> bool {
        self.acquired_at.elapsed() >= self.ttl
    }
}

/// Returned by `snapshot()` for introspection (spec §4.5).
#[derive(Debug, Clone)]
pub struct ResourceSnapshot {
    pub resource_key: ResourceKey,
    pub holder: String,
    pub held_duration_ms: u64,
    pub ttl_remaining_s: i64,
    pub fencing_token: u64,
}

/// Holds an acquired lock; releasing happens on drop via `LockManager::release`
/// called from `call_with_stomp_guard`, not from this guard's own `Drop` impl,
/// so that release order (reverse acquisition order) is explicit and
/// deterministic rather than dependent on destructor ordering.
pub struct LockGuard {
    pub resource_key: ResourceKey,
    pub fencing_token: u64,
}

#[derive(Default, Clone)]
struct MergeMetaState {
    nodes: BTreeMap<String, serde_json::Value>,
    edges: BTreeMap<String, serde_json::Value>,
}

/// A patch applied by a `MergeMeta` writer: last-writer-wins at the
/// property granularity, node/edge keys resolved deterministically.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergePatch {
    pub nodes: BTreeMap<String, serde_json::Value>,
    pub edges: BTreeMap<String, serde_json::Value>,
    pub property_updates: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
}

pub struct LockManager {
    holders: scc::HashMap<ResourceKey, Holder>,
    fencing_counters: scc::HashMap<ResourceKey, AtomicU64>,
    merge_state: scc::HashMap<String, MergeMetaState>,
    overrides: std::collections::HashMap<ResourceClass, crate::application::config::configuration::ResourceClassOverride>,
}

impl LockManager {
    pub fn new(
        overrides: std::collections::HashMap<
            ResourceClass,
            crate::application::config::configuration::ResourceClassOverride,
        >,
    ) -> Arc<Self> {
        Arc::new(Self {
            holders: scc::HashMap::default(),
            fencing_counters: scc::HashMap::default(),
            merge_state: scc::HashMap::default(),
            overrides,
        })
    }

    fn policy_for(&self, class: ResourceClass) -> (Duration, Duration, Option<Duration>, bool) {
        let base = class.policy();
        let ov = self.overrides.get(&class);
        let ttl = ov
            .and_then(|o| o.ttl_secs)
            .map(Duration::from_secs)
            .unwrap_or(base.ttl);
        let interactive = ov
            .and_then(|o| o.interactive_max_wait_ms)
            .map(Duration::from_millis)
            .unwrap_or(base.interactive_max_wait);
        let batch = ov
            .and_then(|o| o.batch_max_wait_ms)
            .map(Duration::from_millis)
            .or(base.batch_max_wait);
        (ttl, interactive, batch, base.fail_open)
    }

    fn next_fencing_token(&self, key: &ResourceKey) -> u64 {
        match self.fencing_counters.entry(key.clone()) {
            Entry::Occupied(existing) => existing.get().fetch_add(1, Ordering::SeqCst) + 1,
            Entry::Vacant(vacant) => {
                vacant.insert_entry(AtomicU64::new(1));
                1
            }
        }
    }

    /// Attempts to acquire a single resource within its class's max-wait for
    /// `mode`. Polls at a short fixed interval; a held lock is treated as
    /// free the instant its TTL has elapsed (lease expiry, §4.5).
    pub(crate) async fn acquire_one(
        &self,
        key: &ResourceKey,
        mode: LockMode,
        agent_id: &str,
        session_id: &str,
    ) -> Result<u64, ResourceBusyError> {
        let (ttl, interactive_wait, batch_wait, fail_open) = self.policy_for(key.class);
        let max_wait = match mode {
            LockMode::Interactive => interactive_wait,
            LockMode::Batch => batch_wait.unwrap_or(interactive_wait),
        };
        let deadline = Instant::now() + max_wait;
        const POLL: Duration = Duration::from_millis(10);

        loop {
            let acquired = match self.holders.entry(key.clone()) {
                Entry::Occupied(mut existing) if existing.get().expired() => {
                    let token = self.next_fencing_token(key);
                    *existing.get_mut() = Holder {
                        agent_id: agent_id.to_string(),
                        session_id: session_id.to_string(),
                        acquired_at: Instant::now(),
                        ttl,
                        fencing_token: token,
                    };
                    Some(token)
                }
                Entry::Occupied(_) => None,
                Entry::Vacant(vacant) => {
                    let token = self.next_fencing_token(key);
                    vacant.insert_entry(Holder {
                        agent_id: agent_id.to_string(),
                        session_id: session_id.to_string(),
                        acquired_at: Instant::now(),
                        ttl,
                        fencing_token: token,
                    });
                    Some(token)
                }
            };

            if let Some(token) = acquired {
                return Ok(token);
            }

            if Instant::now() >= deadline {
                let holder_agent_id = self
                    .holders
                    .read(key, |_, h| h.agent_id.clone())
                    .unwrap_or_else(|| "<unknown>".to_string());
                if fail_open {
                    debug!(?key, "lock contended, fail-open class proceeds without the lock");
                    return Ok(0);
                }
                return Err(ResourceBusyError {
                    resource_key: key.clone(),
                    holder_agent_id,
                    wait_ms: max_wait.as_millis() as u64,
                    max_wait_ms: max_wait.as_millis() as u64,
                });
            }

            tokio::time::sleep(POLL).await;
        }
    }

    /// True if `token` is still the fencing token currently held for `key`
    /// (spec §4.5/§8: a holder whose lease lapsed and was reassigned must
    /// not have its writes accepted just because its own copy of the token
    /// is still around). A token of `0` (the fail-open sentinel returned
    /// when a contended fail-open class proceeds without ever acquiring a
    /// holder entry) is always considered current, since no lease was ever
    /// taken out to go stale.
    pub fn token_is_current(&self, key: &ResourceKey, token: u64) -> bool {
        if token == 0 {
            return true;
        }
        self.holders
            .read(key, |_, holder| holder.fencing_token == token)
            .unwrap_or(false)
    }

    fn release(&self, key: &ResourceKey, session_id: &str) {
        let released = self
            .holders
            .remove_if(key, |h| h.session_id == session_id);
        if released.is_none() {
            debug!(?key, "release skipped, lock already reassigned past our lease");
        }
    }

    pub fn snapshot(&self) -> Vec<ResourceSnapshot> {
        let mut out = Vec::new();
        self.holders.scan(|key, holder| {
            let ttl_remaining = holder.ttl.as_secs() as i64 - holder.acquired_at.elapsed().as_secs() as i64;
            out.push(ResourceSnapshot {
                resource_key: key.clone(),
                holder: holder.agent_id.clone(),
                held_duration_ms: holder.acquired_at.elapsed().as_millis() as u64,
                ttl_remaining_s: ttl_remaining,
                fencing_token: holder.fencing_token,
            });
        });
        out
    }

    /// Applies a `MergeMeta` patch: last-writer-wins at property
    /// granularity, node/edge keys resolved deterministically by sorting on
    /// id (guaranteed by `BTreeMap`'s iteration order). Conflicts (an
    /// existing key overwritten by a different value) are logged, never
    /// rejected.
    pub fn apply_merge_patch(&self, graph_id: &str, patch: &MergePatch) {
        let mut entry = self
            .merge_state
            .entry(graph_id.to_string())
            .or_insert_with(MergeMetaState::default);
        let state = entry.get_mut();
        for (id, value) in &patch.nodes {
            if let Some(prior) = state.nodes.get(id) {
                if prior != value {
                    warn!(graph_id, node = id, "merge_meta node conflict, last-writer-wins");
                }
            }
            state.nodes.insert(id.clone(), value.clone());
        }
        for (id, value) in &patch.edges {
            if let Some(prior) = state.edges.get(id) {
                if prior != value {
                    warn!(graph_id, edge = id, "merge_meta edge conflict, last-writer-wins");
                }
            }
            state.edges.insert(id.clone(), value.clone());
        }
        for (id, props) in &patch.property_updates {
            let target = state
                .nodes
                .entry(id.clone())
                .or_insert_with(|| serde_json::json!({}));
            if let Some(obj) = target.as_object_mut() {
                for (k, v) in props {
                    obj.insert(k.clone(), v.clone());
                }
            }
        }
    }
}

/// Acquires every resource (sorted for deadlock avoidance), invokes `op`
/// exactly once with the acquired guards (so a caller can validate its
/// fencing token is still current right before it commits, per §4.5/§8's
/// ABA-rejection path), then releases in reverse order regardless of
/// outcome (spec §4.5 steps 1-4).
pub async fn call_with_stomp_guard<F, Fut, T>(
    manager: &LockManager,
    mut resources: Vec<ResourceKey>,
    mode: LockMode,
    agent_id: &str,
    session_id: &str,
    op: F,
) -> Result<T, ResourceBusyError>
where
    F: FnOnce(&[LockGuard]) -> Fut,
    Fut: Future<Output = T>,
{
    resources.sort();
    resources.dedup();

    let mut acquired = Vec::with_capacity(resources.len());
    for key in &resources {
        match manager.acquire_one(key, mode, agent_id, session_id).await {
            Ok(token) => acquired.push(LockGuard {
                resource_key: key.clone(),
                fencing_token: token,
            }),
            Err(err) => {
                for guard in acquired.iter().rev() {
                    manager.release(&guard.resource_key, session_id);
                }
                return Err(err);
            }
        }
    }

    let result = op(&acquired).await;

    for guard in acquired.iter().rev() {
        manager.release(&guard.resource_key, session_id);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquires_and_releases_around_op() {
        let manager = LockManager::new(Default::default());
        let key = ResourceKey::new(ResourceClass::CritCode, "src/lib.rs");
        let result = call_with_stomp_guard(
            &manager,
            vec![key.clone()],
            LockMode::Interactive,
            "agent-1",
            "session-1",
            |_guards| async { 42 },
        )
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert!(manager.snapshot().is_empty());
    }

    #[tokio::test]
    async fn contended_critcode_lock_times_out_fail_closed() {
        let manager = LockManager::new(Default::default());
        let key = ResourceKey::new(ResourceClass::CritCode, "src/lib.rs");

        let manager2 = Arc::clone(&manager);
        let key2 = key.clone();
        let held = tokio::spawn(async move {
            call_with_stomp_guard(
                &manager2,
                vec![key2],
                LockMode::Interactive,
                "agent-1",
                "session-1",
                |_guards| async {
                    tokio::time::sleep(Duration::from_millis(600)).await;
                },
            )
            .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let contended = call_with_stomp_guard(
            &manager,
            vec![key.clone()],
            LockMode::Interactive,
            "agent-2",
            "session-2",
            |_guards| async {},
        )
        .await;

        assert!(contended.is_err());
        held.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn fencing_token_strictly_increases_across_reacquisitions() {
        let manager = LockManager::new(Default::default());
        let key = ResourceKey::new(ResourceClass::CritDb, "repo.db");

        let first = manager
            .acquire_one(&key, LockMode::Interactive, "agent-1", "s1")
            .await
            .unwrap();
        manager.release(&key, "s1");
        let second = manager
            .acquire_one(&key, LockMode::Interactive, "agent-2", "s2")
            .await
            .unwrap();
        manager.release(&key, "s2");

        assert!(second > first);
    }

    #[test]
    fn merge_patch_is_last_writer_wins() {
        let manager = LockManager::new(Default::default());
        let mut patch_a = MergePatch::default();
        patch_a
            .nodes
            .insert("n1".into(), serde_json::json!({"label": "a"}));
        manager.apply_merge_patch("g1", &patch_a);

        let mut patch_b = MergePatch::default();
        patch_b
            .nodes
            .insert("n1".into(), serde_json::json!({"label": "b"}));
        manager.apply_merge_patch("g1", &patch_b);

        let state = manager.merge_state.get("g1").unwrap();
        assert_eq!(state.get().nodes["n1"]["label"], "b");
    }
}
