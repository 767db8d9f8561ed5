//! In-process graph, vector index and episode store.
//!
//! Backs tests and single-process deployments. All three traits share one
//! state behind a `RwLock`, so a merge and the provenance it rewires are
//! always observed together.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::driver::{EntityPair, EpisodeStore, GraphStore, OrphanSweep, SubjectObjectQuery, VectorIndex};
use crate::edges::{ProvenanceEdge, Triple};
use crate::errors::{ChronicleError, Result};
use crate::nodes::{EntityNode, EpisodicNode, StatementNode};
use crate::utils::rank_by_similarity;

#[derive(Debug, Clone)]
struct StoredStatement {
    node: StatementNode,
    subject: Uuid,
    predicate: Uuid,
    object: Uuid,
}

impl StoredStatement {
    fn references(&self, entity: Uuid) -> bool {
        self.subject == entity || self.predicate == entity || self.object == entity
    }
}

#[derive(Debug, Default)]
struct GraphState {
    entities: HashMap<Uuid, EntityNode>,
    statements: HashMap<Uuid, StoredStatement>,
    /// Keyed by `(episode, statement)`.
    provenance: HashMap<(Uuid, Uuid), ProvenanceEdge>,
    episodes: HashMap<Uuid, EpisodicNode>,
    entity_embeddings: HashMap<Uuid, Vec<f32>>,
    statement_embeddings: HashMap<Uuid, Vec<f32>>,
}

impl GraphState {
    fn supporting_episodes(&self, statement: Uuid) -> impl Iterator<Item = Uuid> + '_ {
        self.provenance
            .keys()
            .filter(move |(_, s)| *s == statement)
            .map(|(e, _)| *e)
    }

    fn live_statements<'a>(
        &'a self,
        user_id: &'a str,
        exclude: &'a [Uuid],
    ) -> impl Iterator<Item = &'a StoredStatement> + 'a {
        self.statements.values().filter(move |s| {
            s.node.user_id == user_id && s.node.is_live() && !exclude.contains(&s.node.uuid)
        })
    }
}

/// In-memory implementation of [`GraphStore`], [`VectorIndex`] and [`EpisodeStore`].
#[derive(Debug, Default)]
pub struct InMemoryGraph {
    state: RwLock<GraphState>,
    fail_vector_deletes: AtomicBool,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every vector delete fail, to exercise commit-phase error handling.
    pub fn set_fail_vector_deletes(&self, fail: bool) {
        self.fail_vector_deletes.store(fail, Ordering::SeqCst);
    }

    /// Insert (or replace) an entity and optionally its name embedding.
    pub async fn insert_entity(&self, entity: EntityNode, embedding: Option<Vec<f32>>) {
        let mut state = self.state.write().await;
        if let Some(embedding) = embedding {
            state.entity_embeddings.insert(entity.uuid, embedding);
        }
        state.entities.insert(entity.uuid, entity);
    }

    /// Persist a triple: its entities (unless already present), the statement
    /// and a provenance edge from the producing episode.
    pub async fn insert_triple(&self, triple: &Triple, fact_embedding: Option<Vec<f32>>) {
        let mut state = self.state.write().await;
        for entity in triple.entities() {
            state
                .entities
                .entry(entity.uuid)
                .or_insert_with(|| entity.clone());
        }
        let statement = triple.statement.uuid;
        state.statements.insert(
            statement,
            StoredStatement {
                node: triple.statement.clone(),
                subject: triple.subject.uuid,
                predicate: triple.predicate.uuid,
                object: triple.object.uuid,
            },
        );
        state
            .provenance
            .entry((triple.episode_uuid, statement))
            .or_insert_with(|| ProvenanceEdge::new(triple.episode_uuid, statement));
        if let Some(embedding) = fact_embedding {
            state.statement_embeddings.insert(statement, embedding);
        }
    }

    pub async fn set_entity_embedding(&self, entity: Uuid, embedding: Vec<f32>) {
        self.state.write().await.entity_embeddings.insert(entity, embedding);
    }

    pub async fn entity(&self, uuid: Uuid) -> Option<EntityNode> {
        self.state.read().await.entities.get(&uuid).cloned()
    }

    pub async fn statement(&self, uuid: Uuid) -> Option<StatementNode> {
        self.state.read().await.statements.get(&uuid).map(|s| s.node.clone())
    }

    /// `(subject, predicate, object)` of a stored statement.
    pub async fn statement_entities(&self, uuid: Uuid) -> Option<(Uuid, Uuid, Uuid)> {
        self.state
            .read()
            .await
            .statements
            .get(&uuid)
            .map(|s| (s.subject, s.predicate, s.object))
    }

    pub async fn entities_for_user(&self, user_id: &str) -> Vec<EntityNode> {
        let state = self.state.read().await;
        let mut out: Vec<EntityNode> = state
            .entities
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub async fn statements_for_user(&self, user_id: &str) -> Vec<StatementNode> {
        let state = self.state.read().await;
        let mut out: Vec<StatementNode> = state
            .statements
            .values()
            .filter(|s| s.node.user_id == user_id)
            .map(|s| s.node.clone())
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.fact.cmp(&b.fact)));
        out
    }

    /// Episodes supporting a statement.
    pub async fn provenance_of(&self, statement: Uuid) -> HashSet<Uuid> {
        self.state.read().await.supporting_episodes(statement).collect()
    }

    pub async fn episode(&self, uuid: Uuid) -> Option<EpisodicNode> {
        self.state.read().await.episodes.get(&uuid).cloned()
    }

    pub async fn has_entity_embedding(&self, uuid: Uuid) -> bool {
        self.state.read().await.entity_embeddings.contains_key(&uuid)
    }

    pub async fn has_statement_embedding(&self, uuid: Uuid) -> bool {
        self.state.read().await.statement_embeddings.contains_key(&uuid)
    }

    fn check_vector_writes(&self) -> Result<()> {
        if self.fail_vector_deletes.load(Ordering::SeqCst) {
            return Err(ChronicleError::Store("vector index unavailable".to_string()));
        }
        Ok(())
    }
}

impl GraphStore for InMemoryGraph {
    async fn find_similar_entities(
        &self,
        user_id: &str,
        embedding: &[f32],
        limit: usize,
        threshold: f32,
        exclude: &[Uuid],
    ) -> Result<Vec<EntityNode>> {
        let state = self.state.read().await;
        let candidates = state
            .entities
            .values()
            .filter(|e| e.user_id == user_id && !exclude.contains(&e.uuid))
            .filter_map(|e| {
                state
                    .entity_embeddings
                    .get(&e.uuid)
                    .map(|v| (e.uuid, v.as_slice()))
            });
        Ok(rank_by_similarity(embedding, candidates, threshold, limit)
            .into_iter()
            .filter_map(|(uuid, _)| state.entities.get(&uuid).cloned())
            .collect())
    }

    async fn find_similar_statements(
        &self,
        user_id: &str,
        embedding: &[f32],
        limit: usize,
        threshold: f32,
        exclude: &[Uuid],
    ) -> Result<Vec<StatementNode>> {
        let state = self.state.read().await;
        let candidates = state.live_statements(user_id, exclude).filter_map(|s| {
            state
                .statement_embeddings
                .get(&s.node.uuid)
                .map(|v| (s.node.uuid, v.as_slice()))
        });
        Ok(rank_by_similarity(embedding, candidates, threshold, limit)
            .into_iter()
            .filter_map(|(uuid, _)| state.statements.get(&uuid).map(|s| s.node.clone()))
            .collect())
    }

    async fn find_contradictory_statements_batch(
        &self,
        user_id: &str,
        pairs: &[EntityPair],
        exclude: &[Uuid],
    ) -> Result<HashMap<EntityPair, Vec<StatementNode>>> {
        let state = self.state.read().await;
        let mut out = HashMap::new();
        for pair in pairs {
            let matches: Vec<StatementNode> = state
                .live_statements(user_id, exclude)
                .filter(|s| s.subject == pair.first && s.predicate == pair.second)
                .map(|s| s.node.clone())
                .collect();
            if !matches.is_empty() {
                out.insert(*pair, matches);
            }
        }
        Ok(out)
    }

    async fn find_statements_with_same_subject_object_batch(
        &self,
        user_id: &str,
        queries: &[SubjectObjectQuery],
        exclude: &[Uuid],
    ) -> Result<HashMap<EntityPair, Vec<StatementNode>>> {
        let state = self.state.read().await;
        let mut out: HashMap<EntityPair, Vec<StatementNode>> = HashMap::new();
        for query in queries {
            let matches: Vec<StatementNode> = state
                .live_statements(user_id, exclude)
                .filter(|s| {
                    s.subject == query.subject
                        && s.object == query.object
                        && s.predicate != query.predicate
                })
                .map(|s| s.node.clone())
                .collect();
            if !matches.is_empty() {
                let slot = out.entry(query.key()).or_default();
                for m in matches {
                    if !slot.iter().any(|existing| existing.uuid == m.uuid) {
                        slot.push(m);
                    }
                }
            }
        }
        Ok(out)
    }

    async fn find_recent_session_statements(
        &self,
        user_id: &str,
        session_id: &str,
        exclude_episode: Uuid,
        episode_window: usize,
    ) -> Result<Vec<StatementNode>> {
        let state = self.state.read().await;
        let cutoff = state.episodes.get(&exclude_episode).map(|e| e.created_at);

        let mut window: Vec<&EpisodicNode> = state
            .episodes
            .values()
            .filter(|e| {
                e.user_id == user_id
                    && e.session_id == session_id
                    && e.uuid != exclude_episode
                    && cutoff.map_or(true, |c| e.created_at < c)
            })
            .collect();
        window.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        window.truncate(episode_window);
        let window: HashSet<Uuid> = window.into_iter().map(|e| e.uuid).collect();

        let ids: HashSet<Uuid> = state
            .provenance
            .keys()
            .filter(|(episode, _)| window.contains(episode))
            .map(|(_, statement)| *statement)
            .collect();

        let mut out: Vec<StatementNode> = state
            .live_statements(user_id, &[])
            .filter(|s| ids.contains(&s.node.uuid))
            .map(|s| s.node.clone())
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn merge_entities(&self, source: Uuid, target: Uuid) -> Result<bool> {
        if source == target {
            return Ok(false);
        }
        let mut state = self.state.write().await;
        if !state.entities.contains_key(&source) || !state.entities.contains_key(&target) {
            return Ok(false);
        }
        for stored in state.statements.values_mut() {
            for slot in [&mut stored.subject, &mut stored.predicate, &mut stored.object] {
                if *slot == source {
                    *slot = target;
                }
            }
        }
        state.entities.remove(&source);
        debug!(%source, %target, "merged entity");
        Ok(true)
    }

    async fn delete_statements(&self, ids: &[Uuid]) -> Result<usize> {
        let mut state = self.state.write().await;
        let mut deleted = 0;
        for id in ids {
            if state.statements.remove(id).is_some() {
                deleted += 1;
            }
        }
        state.provenance.retain(|(_, statement), _| !ids.contains(statement));
        Ok(deleted)
    }

    async fn invalidate_statements(&self, ids: &[Uuid], invalidated_by: Uuid) -> Result<usize> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let mut invalidated = 0;
        for id in ids {
            if let Some(stored) = state.statements.get_mut(id) {
                if stored.node.invalidate(now, invalidated_by) {
                    invalidated += 1;
                }
            }
        }
        Ok(invalidated)
    }

    async fn move_all_provenance_to_statement(
        &self,
        from: Uuid,
        to: Uuid,
    ) -> Result<Option<usize>> {
        let mut state = self.state.write().await;
        if from == to || !state.statements.contains_key(&to) {
            return Ok(None);
        }
        let episodes: Vec<Uuid> = state.supporting_episodes(from).collect();
        let mut moved = 0;
        for episode in episodes {
            if let Entry::Vacant(slot) = state.provenance.entry((episode, to)) {
                slot.insert(ProvenanceEdge::new(episode, to));
                moved += 1;
            }
        }
        Ok(Some(moved))
    }

    async fn delete_orphaned_entities(&self, user_id: &str) -> Result<OrphanSweep> {
        let mut state = self.state.write().await;
        let orphans: Vec<Uuid> = state
            .entities
            .values()
            .filter(|e| e.user_id == user_id)
            .filter(|e| !state.statements.values().any(|s| s.references(e.uuid)))
            .map(|e| e.uuid)
            .collect();
        for uuid in &orphans {
            state.entities.remove(uuid);
        }
        Ok(OrphanSweep {
            count: orphans.len(),
            deleted_uuids: orphans,
        })
    }
}

impl VectorIndex for InMemoryGraph {
    async fn batch_get_entity_embeddings(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<f32>>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.entity_embeddings.get(id).map(|v| (*id, v.clone())))
            .collect())
    }

    async fn batch_get_statement_embeddings(
        &self,
        ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<f32>>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.statement_embeddings.get(id).map(|v| (*id, v.clone())))
            .collect())
    }

    async fn batch_delete_entity_embeddings(&self, ids: &[Uuid]) -> Result<usize> {
        self.check_vector_writes()?;
        let mut state = self.state.write().await;
        Ok(ids
            .iter()
            .filter(|id| state.entity_embeddings.remove(*id).is_some())
            .count())
    }

    async fn batch_delete_statement_embeddings(&self, ids: &[Uuid]) -> Result<usize> {
        self.check_vector_writes()?;
        let mut state = self.state.write().await;
        Ok(ids
            .iter()
            .filter(|id| state.statement_embeddings.remove(*id).is_some())
            .count())
    }
}

impl EpisodeStore for InMemoryGraph {
    async fn get_episode(&self, uuid: Uuid) -> Result<Option<EpisodicNode>> {
        Ok(self.state.read().await.episodes.get(&uuid).cloned())
    }

    async fn session_episodes(&self, user_id: &str, session_id: &str) -> Result<Vec<EpisodicNode>> {
        let state = self.state.read().await;
        Ok(state
            .episodes
            .values()
            .filter(|e| e.user_id == user_id && e.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn recent_episodes(
        &self,
        user_id: &str,
        session_id: &str,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<EpisodicNode>> {
        let state = self.state.read().await;
        let mut out: Vec<EpisodicNode> = state
            .episodes
            .values()
            .filter(|e| e.user_id == user_id && e.session_id == session_id && e.created_at < before)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit);
        Ok(out)
    }

    async fn save_episodes(&self, episodes: &[EpisodicNode]) -> Result<()> {
        let mut state = self.state.write().await;
        for episode in episodes {
            state.episodes.insert(episode.uuid, episode.clone());
        }
        Ok(())
    }

    async fn invalidate_statements_for_episodes(
        &self,
        episode_ids: &[Uuid],
        invalidated_by: Uuid,
    ) -> Result<usize> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let retired: HashSet<Uuid> = episode_ids.iter().copied().collect();

        let candidates: HashSet<Uuid> = state
            .provenance
            .keys()
            .filter(|(episode, _)| retired.contains(episode))
            .map(|(_, statement)| *statement)
            .collect();

        let doomed: Vec<Uuid> = candidates
            .into_iter()
            .filter(|statement| {
                state.supporting_episodes(*statement).all(|episode| {
                    retired.contains(&episode)
                        || state
                            .episodes
                            .get(&episode)
                            .is_some_and(|e| e.invalidated_at.is_some())
                })
            })
            .collect();

        let mut invalidated = 0;
        for id in doomed {
            if let Some(stored) = state.statements.get_mut(&id) {
                if stored.node.invalidate(now, invalidated_by) {
                    invalidated += 1;
                }
            }
        }
        for id in &retired {
            if let Some(episode) = state.episodes.get_mut(id) {
                episode.invalidated_at.get_or_insert(now);
            }
        }
        Ok(invalidated)
    }
}
