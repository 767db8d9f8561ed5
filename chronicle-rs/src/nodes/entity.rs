//! EntityNode: a named node referenced by statements as subject, predicate or object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named node in the graph.
///
/// Predicates are modeled as entities too, so the same record type covers
/// "Alice", "works at" and "Acme Corp". The name embedding lives in the
/// vector index, not on the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityNode {
    pub uuid: Uuid,
    pub name: String,
    /// Free-form type label (e.g. `Person`, `Organization`, `Predicate`).
    pub entity_type: String,
    pub user_id: String,
    /// Free-form attribute map.
    pub attributes: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl EntityNode {
    /// Build a fresh entity with an empty attribute map.
    pub fn new(
        name: impl Into<String>,
        entity_type: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
            entity_type: entity_type.into(),
            user_id: user_id.into(),
            attributes: serde_json::Value::Object(Default::default()),
            created_at: Utc::now(),
        }
    }

    /// Replace the attribute map.
    pub fn with_attributes(mut self, attributes: serde_json::Value) -> Self {
        self.attributes = attributes;
        self
    }
}
