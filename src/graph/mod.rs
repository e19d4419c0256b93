pub mod extract;
pub mod store;

pub use extract::{extract_entities_and_relations, Entity, EntityKind, Relation, RelationKind};
pub use store::GraphStore;
