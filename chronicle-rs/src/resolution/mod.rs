//! Graph resolution engine.
//!
//! Runs once per episode after its triples are written:
//! 1. **Entity pass**: deduplicate the episode's entities against the graph
//!    and rewrite triples onto the winners ([`entity`])
//! 2. **Statement pass**: find duplicates and contradictions among the
//!    rewritten statements ([`statement`])
//! 3. **Commit**: merges, provenance moves, duplicate deletion,
//!    invalidation, orphan sweep, then vector-index cleanup
//!
//! Every commit step targets records by uuid and is a no-op for records that
//! are already gone, so a failed run can simply be repeated.

pub mod adjudicator;
pub mod entity;
pub mod merge;
pub mod statement;
pub mod usage;

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::driver::{EpisodeStore, GraphStore, OrphanSweep, VectorIndex};
use crate::edges::Triple;
use crate::errors::{ChronicleError, Result};
use crate::nodes::EpisodicNode;
use crate::types::ResolutionConfig;
use crate::utils::truncate_with_ellipsis;

pub use adjudicator::{
    Adjudication, AdjudicationRequest, Adjudicator, LlmAdjudicator, ParseError, StatementVerdict,
};
pub use entity::EntityPassOutcome;
pub use merge::{EntityMerge, MergeForest};
pub use statement::{DuplicateStatement, StatementPassOutcome};
pub use usage::UsageAccumulator;

/// What the commit phase changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    pub merged_entities: usize,
    pub moved_provenance: usize,
    pub deleted_statements: usize,
    pub invalidated_statements: usize,
    /// Duplicates left live because the statement they repeat is gone.
    pub kept_duplicates: usize,
    pub orphaned_entities: Vec<Uuid>,
    /// Vector-index cleanup failed; the entries are stale until rebuilt.
    pub vector_cleanup_failed: bool,
}

/// Outcome of resolving one episode. Failures are reported here, never raised.
#[derive(Debug, Clone, Default)]
pub struct ResolutionReport {
    pub episode_uuid: Uuid,
    pub success: bool,
    pub error: Option<String>,
    /// Surviving triples with resolved entity references.
    pub triples: Vec<Triple>,
    pub merges: Vec<EntityMerge>,
    pub duplicates: Vec<DuplicateStatement>,
    pub invalidations: Vec<Uuid>,
    pub commit: CommitSummary,
    pub usage: UsageAccumulator,
}

/// Entity and statement resolution over a graph, vector index and adjudicator.
pub struct ResolutionEngine<G, V, A> {
    graph: Arc<G>,
    vectors: Arc<V>,
    adjudicator: A,
    config: ResolutionConfig,
}

impl<G, V, A> ResolutionEngine<G, V, A>
where
    G: GraphStore + EpisodeStore,
    V: VectorIndex,
    A: Adjudicator,
{
    /// A `fan_out` of zero is raised to one.
    pub fn new(graph: Arc<G>, vectors: Arc<V>, adjudicator: A, mut config: ResolutionConfig) -> Self {
        config.fan_out = config.fan_out.max(1);
        Self {
            graph,
            vectors,
            adjudicator,
            config,
        }
    }

    pub fn config(&self) -> &ResolutionConfig {
        &self.config
    }

    /// Resolve and commit one episode's triples.
    pub async fn resolve_episode(&self, episode: &EpisodicNode, triples: Vec<Triple>) -> ResolutionReport {
        let mut report = ResolutionReport {
            episode_uuid: episode.uuid,
            ..Default::default()
        };
        match self.run(episode, triples, &mut report).await {
            Ok(()) => report.success = true,
            Err(e) => {
                warn!(episode = %episode.uuid, error = %e, "resolution failed");
                report.error = Some(e.to_string());
            }
        }
        report
    }

    async fn run(
        &self,
        episode: &EpisodicNode,
        triples: Vec<Triple>,
        report: &mut ResolutionReport,
    ) -> Result<()> {
        if self.graph.get_episode(episode.uuid).await?.is_none() {
            return Err(ChronicleError::EpisodeNotFound(episode.uuid.to_string()));
        }
        let previous = self.previous_episode_context(episode).await?;

        let entities = self.resolve_entities(episode, &previous, triples).await?;
        report.usage += entities.usage;
        report.merges = entities.merges;

        let statements = self
            .resolve_statements(episode, &previous, entities.triples)
            .await?;
        report.usage += statements.usage;
        report.duplicates = statements.duplicates;
        report.invalidations = statements.invalidations;
        report.triples = statements.kept;

        report.commit = self
            .commit(episode, &report.merges, &report.duplicates, &report.invalidations)
            .await?;

        info!(
            episode = %episode.uuid,
            merges = report.merges.len(),
            duplicates = report.duplicates.len(),
            invalidated = report.commit.invalidated_statements,
            orphans = report.commit.orphaned_entities.len(),
            adjudications = report.usage.adjudication_calls,
            "episode resolved"
        );
        Ok(())
    }

    /// Entity pass only. Nothing is written.
    pub async fn resolve_entities(
        &self,
        episode: &EpisodicNode,
        previous_episodes: &[String],
        triples: Vec<Triple>,
    ) -> Result<EntityPassOutcome> {
        entity::resolve_entities(
            self.graph.as_ref(),
            self.vectors.as_ref(),
            &self.adjudicator,
            &self.config,
            episode,
            previous_episodes,
            triples,
        )
        .await
    }

    /// Statement pass only. Nothing is written.
    pub async fn resolve_statements(
        &self,
        episode: &EpisodicNode,
        previous_episodes: &[String],
        triples: Vec<Triple>,
    ) -> Result<StatementPassOutcome> {
        statement::resolve_statements(
            self.graph.as_ref(),
            self.vectors.as_ref(),
            &self.adjudicator,
            &self.config,
            episode,
            previous_episodes,
            triples,
        )
        .await
    }

    /// Apply pass results to the graph, one mutation at a time.
    pub async fn commit(
        &self,
        episode: &EpisodicNode,
        merges: &[EntityMerge],
        duplicates: &[DuplicateStatement],
        invalidations: &[Uuid],
    ) -> Result<CommitSummary> {
        let mut summary = CommitSummary::default();

        let mut forest = MergeForest::new();
        for m in merges {
            forest.union(m.source, m.target);
        }
        let merges = forest.merges();
        for m in &merges {
            if self.graph.merge_entities(m.source, m.target).await? {
                summary.merged_entities += 1;
            }
        }

        let mut duplicate_ids = Vec::with_capacity(duplicates.len());
        for d in duplicates {
            match self
                .graph
                .move_all_provenance_to_statement(d.new_statement, d.existing_statement)
                .await?
            {
                Some(moved) => {
                    summary.moved_provenance += moved;
                    duplicate_ids.push(d.new_statement);
                }
                None => {
                    warn!(
                        statement = %d.new_statement,
                        existing = %d.existing_statement,
                        "duplicate target is gone, keeping statement"
                    );
                    summary.kept_duplicates += 1;
                }
            }
        }
        if !duplicate_ids.is_empty() {
            summary.deleted_statements = self.graph.delete_statements(&duplicate_ids).await?;
        }

        if !invalidations.is_empty() {
            summary.invalidated_statements = self
                .graph
                .invalidate_statements(invalidations, episode.uuid)
                .await?;
        }

        let OrphanSweep { deleted_uuids, .. } =
            self.graph.delete_orphaned_entities(&episode.user_id).await?;
        summary.orphaned_entities = deleted_uuids;

        let mut stale_entities: Vec<Uuid> = merges.iter().map(|m| m.source).collect();
        stale_entities.extend(summary.orphaned_entities.iter().copied());
        summary.vector_cleanup_failed = !self.cleanup_vectors(&stale_entities, &duplicate_ids).await;

        Ok(summary)
    }

    /// Drop index entries for removed records. Returns `false` on failure,
    /// which is logged and otherwise ignored.
    async fn cleanup_vectors(&self, entities: &[Uuid], statements: &[Uuid]) -> bool {
        let mut ok = true;
        if !entities.is_empty() {
            if let Err(e) = self.vectors.batch_delete_entity_embeddings(entities).await {
                warn!(count = entities.len(), error = %e, "entity embedding cleanup failed");
                ok = false;
            }
        }
        if !statements.is_empty() {
            if let Err(e) = self.vectors.batch_delete_statement_embeddings(statements).await {
                warn!(count = statements.len(), error = %e, "statement embedding cleanup failed");
                ok = false;
            }
        }
        ok
    }

    /// Content of recent session episodes, newest first, truncated.
    async fn previous_episode_context(&self, episode: &EpisodicNode) -> Result<Vec<String>> {
        let recent = self
            .graph
            .recent_episodes(
                &episode.user_id,
                &episode.session_id,
                episode.created_at,
                self.config.context_episode_window,
            )
            .await?;
        Ok(recent
            .iter()
            .filter(|e| e.uuid != episode.uuid)
            .map(|e| truncate_with_ellipsis(&e.content, self.config.context_episode_chars))
            .collect())
    }
}
