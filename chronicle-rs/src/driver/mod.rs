//! Storage collaborator contracts.
//!
//! The graph store, vector index and episode store are external engines; the
//! core only talks to them through these traits. [`memory`] provides an
//! in-process implementation of all three.
//!
//! Every mutating operation targets records by uuid and is a no-op for uuids
//! that no longer exist, so a resolution run can be replayed after a partial
//! failure.

pub mod memory;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::Result;
use crate::nodes::{EntityNode, EpisodicNode, StatementNode};

/// Batch lookup key: `(subject, predicate)` or `(subject, object)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityPair {
    pub first: Uuid,
    pub second: Uuid,
}

impl EntityPair {
    pub fn new(first: Uuid, second: Uuid) -> Self {
        Self { first, second }
    }
}

/// Same-subject, same-object lookup that skips statements using `predicate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubjectObjectQuery {
    pub subject: Uuid,
    pub object: Uuid,
    pub predicate: Uuid,
}

impl SubjectObjectQuery {
    pub fn key(&self) -> EntityPair {
        EntityPair::new(self.subject, self.object)
    }
}

/// Result of an orphan sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrphanSweep {
    pub count: usize,
    pub deleted_uuids: Vec<Uuid>,
}

/// Graph query/command interface used by the resolution engine.
///
/// Statement lookups only ever return live statements (`invalid_at == None`)
/// belonging to `user_id`.
#[allow(async_fn_in_trait)]
pub trait GraphStore: Send + Sync {
    /// Entities whose name embedding scores at least `threshold`, best first.
    async fn find_similar_entities(
        &self,
        user_id: &str,
        embedding: &[f32],
        limit: usize,
        threshold: f32,
        exclude: &[Uuid],
    ) -> Result<Vec<EntityNode>>;

    /// Live statements whose fact embedding scores at least `threshold`, best first.
    async fn find_similar_statements(
        &self,
        user_id: &str,
        embedding: &[f32],
        limit: usize,
        threshold: f32,
        exclude: &[Uuid],
    ) -> Result<Vec<StatementNode>>;

    /// For each `(subject, predicate)` pair, the live statements sharing both.
    /// Pairs with no match may be absent from the map.
    async fn find_contradictory_statements_batch(
        &self,
        user_id: &str,
        pairs: &[EntityPair],
        exclude: &[Uuid],
    ) -> Result<HashMap<EntityPair, Vec<StatementNode>>>;

    /// For each query, the live statements with the same subject and object
    /// but a different predicate, keyed by `(subject, object)`.
    async fn find_statements_with_same_subject_object_batch(
        &self,
        user_id: &str,
        queries: &[SubjectObjectQuery],
        exclude: &[Uuid],
    ) -> Result<HashMap<EntityPair, Vec<StatementNode>>>;

    /// Live statements supported by the `episode_window` most recent session
    /// episodes created before `exclude_episode`.
    async fn find_recent_session_statements(
        &self,
        user_id: &str,
        session_id: &str,
        exclude_episode: Uuid,
        episode_window: usize,
    ) -> Result<Vec<StatementNode>>;

    /// Rewire every relationship of `source` onto `target`, then remove
    /// `source`. Returns `false` if either entity no longer exists.
    async fn merge_entities(&self, source: Uuid, target: Uuid) -> Result<bool>;

    /// Physically delete statements and their provenance. Returns how many existed.
    async fn delete_statements(&self, ids: &[Uuid]) -> Result<usize>;

    /// Set `invalid_at` on live statements. Returns how many changed.
    async fn invalidate_statements(&self, ids: &[Uuid], invalidated_by: Uuid) -> Result<usize>;

    /// Union every provenance edge of `from` (from any episode) into `to`.
    /// Returns how many edges were newly attached to `to`, or `None` when
    /// `to` does not exist (or is `from`) and nothing may be folded into it.
    async fn move_all_provenance_to_statement(&self, from: Uuid, to: Uuid)
        -> Result<Option<usize>>;

    /// Delete the user's entities that no statement references.
    async fn delete_orphaned_entities(&self, user_id: &str) -> Result<OrphanSweep>;
}

/// Derived embedding cache. Safe to rebuild from the graph.
#[allow(async_fn_in_trait)]
pub trait VectorIndex: Send + Sync {
    async fn batch_get_entity_embeddings(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<f32>>>;

    async fn batch_get_statement_embeddings(
        &self,
        ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<f32>>>;

    async fn batch_delete_entity_embeddings(&self, ids: &[Uuid]) -> Result<usize>;

    async fn batch_delete_statement_embeddings(&self, ids: &[Uuid]) -> Result<usize>;
}

/// Episode persistence used by preprocessing and adjudication context.
#[allow(async_fn_in_trait)]
pub trait EpisodeStore: Send + Sync {
    async fn get_episode(&self, uuid: Uuid) -> Result<Option<EpisodicNode>>;

    /// Every episode of the session, any version, any order.
    async fn session_episodes(&self, user_id: &str, session_id: &str) -> Result<Vec<EpisodicNode>>;

    /// Up to `limit` session episodes created before `before`, newest first.
    async fn recent_episodes(
        &self,
        user_id: &str,
        session_id: &str,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<EpisodicNode>>;

    async fn save_episodes(&self, episodes: &[EpisodicNode]) -> Result<()>;

    /// Invalidate live statements whose every supporting episode is in
    /// `episode_ids` (or already invalidated), and mark those episodes
    /// invalidated. Statements still backed by another live episode survive.
    async fn invalidate_statements_for_episodes(
        &self,
        episode_ids: &[Uuid],
        invalidated_by: Uuid,
    ) -> Result<usize>;
}
