//! ProvenanceEdge: links an episode to a statement it supports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An edge recording that an episode supports a statement.
///
/// Every live statement has at least one. Moving provenance is a set union:
/// an edge is identified by its `(episode, statement)` pair, not by `uuid`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceEdge {
    /// Unique identifier for this edge.
    pub uuid: Uuid,
    /// UUID of the supporting EpisodicNode.
    pub episode_uuid: Uuid,
    /// UUID of the supported StatementNode.
    pub statement_uuid: Uuid,
    /// When this edge was created in the graph.
    pub created_at: DateTime<Utc>,
}

impl ProvenanceEdge {
    pub fn new(episode_uuid: Uuid, statement_uuid: Uuid) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            episode_uuid,
            statement_uuid,
            created_at: Utc::now(),
        }
    }

    /// Identity used for set semantics.
    pub fn key(&self) -> (Uuid, Uuid) {
        (self.episode_uuid, self.statement_uuid)
    }
}
