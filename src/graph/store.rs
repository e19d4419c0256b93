use std::sync::Arc;

use petgraph::graphmap::DiGraphMap;

use crate::locks::{LockManager, MergePatch};

use super::extract::{Entity, Relation, RelationKind};

/// In-memory view of one repository's code graph, built from the
/// `MergeMeta` patches accumulated in the lock manager (spec §4.5's merge
/// semantics apply at the patch layer; this store is the materialized
/// result consumed by callers).
pub struct GraphStore {
    graph_id: String,
    locks: Arc<LockManager>,
}

impl GraphStore {
    pub fn new(graph_id: impl Into<String>, locks: Arc<LockManager>) -> Self {
        Self {
            graph_id: graph_id.into(),
            locks,
        }
    }

    /// Converts one file's extracted entities/relations into a
    /// `MergeMeta` patch and applies it.
    pub fn ingest_file(&self, entities: &[Entity], relations: &[Relation]) {
        let mut patch = MergePatch::default();
        for entity in entities {
            patch.nodes.insert(
                entity.name.clone(),
                serde_json::json!({
                    "kind": entity.kind,
                    "start_line": entity.start_line,
                    "end_line": entity.end_line,
                }),
            );
        }
        for relation in relations {
            let edge_id = format!("{}->{}:{:?}", relation.from, relation.to, relation.kind);
            patch.edges.insert(
                edge_id,
                serde_json::json!({
                    "kind": relation.kind,
                    "from": relation.from,
                    "to": relation.to,
                }),
            );
        }
        self.locks.apply_merge_patch(&self.graph_id, &patch);
    }

    /// Builds a directed graph over the current merged node/edge state,
    /// for callers that want traversal (callers-of, extends-chain, etc.)
    /// rather than the raw patch view.
    pub fn as_digraph<'a>(&self, relations: &'a [Relation]) -> DiGraphMap<&'a str, RelationKind> {
        let mut graph: DiGraphMap<&'a str, RelationKind> = DiGraphMap::new();
        for relation in relations {
            graph.add_edge(relation.from.as_str(), relation.to.as_str(), relation.kind);
        }
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::extract::EntityKind;

    #[test]
    fn ingest_file_applies_a_merge_patch() {
        let locks = LockManager::new(Default::default());
        let store = GraphStore::new("repo-graph", Arc::clone(&locks));
        let entities = vec![Entity {
            kind: EntityKind::Function,
            name: "greet".into(),
            start_line: 0,
            end_line: 2,
        }];
        let relations = vec![Relation {
            kind: RelationKind::Calls,
            from: "main".into(),
            to: "greet".into(),
        }];
        store.ingest_file(&entities, &relations);
        // a second ingest with the same content must not error (idempotent merge)
        store.ingest_file(&entities, &relations);
    }
}
