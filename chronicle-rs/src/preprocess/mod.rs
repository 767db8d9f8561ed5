//! Episode preprocessing.
//!
//! Turns one submission into the ordered list of episodes to ingest:
//! 1. **Chunk**: split and hash the content ([`chunker`])
//! 2. **Analyze**: compare against the previous version, if any ([`differ`])
//! 3. **Select**: keep the chunks (or diff) the chosen strategy needs
//! 4. **Persist**: save the episodes before any graph write
//! 5. **Invalidate**: retire statements the new version replaces

pub mod chunker;
pub mod differ;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::driver::EpisodeStore;
use crate::errors::{ChronicleError, Result};
use crate::nodes::{EpisodeType, EpisodicNode};
use crate::types::{ChunkerConfig, DifferConfig};

pub use chunker::{Chunk, ChunkedEpisode, ContentChunker};
pub use differ::{
    ChunkLevelChanges, DifferentialStrategy, StrategyDecision, VersionAnalysis, VersionDiffer,
    DIFF_METADATA_KEY,
};

/// A conversation turn or document as submitted for ingestion.
#[derive(Debug, Clone)]
pub struct EpisodeSubmission {
    pub user_id: String,
    pub session_id: String,
    pub episode_type: EpisodeType,
    pub content: String,
    pub title: Option<String>,
    pub metadata: serde_json::Value,
    pub reference_time: DateTime<Utc>,
    /// A conversation resubmitted as a whole (e.g. a compacted transcript).
    /// Documents are always versioned.
    pub revision: bool,
}

impl EpisodeSubmission {
    fn is_versioned(&self) -> bool {
        self.episode_type == EpisodeType::Document || self.revision
    }
}

/// Preprocessing result.
#[derive(Debug, Clone)]
pub struct PreparedSubmission {
    /// Episodes to ingest, in chunk order. Empty when nothing changed.
    pub episodes: Vec<EpisodicNode>,
    pub strategy: DifferentialStrategy,
    pub analysis: Option<VersionAnalysis>,
    pub total_chunks: usize,
    /// Statements retired because the new version replaces their source.
    pub invalidated_statements: usize,
}

/// Chunker + version differ over an episode store.
pub struct EpisodePreprocessor<S> {
    store: Arc<S>,
    chunker: ContentChunker,
    differ: VersionDiffer<S>,
}

impl<S: EpisodeStore> EpisodePreprocessor<S> {
    pub fn new(store: Arc<S>, chunker: ChunkerConfig, differ: DifferConfig) -> Self {
        Self {
            differ: VersionDiffer::new(store.clone(), differ),
            chunker: ContentChunker::new(chunker),
            store,
        }
    }

    fn validate(&self, submission: &EpisodeSubmission) -> Result<()> {
        if submission.content.trim().is_empty() {
            return Err(ChronicleError::Validation("episode content is empty".to_string()));
        }
        Ok(())
    }

    /// Split a submission with the configured chunker.
    pub fn chunk(&self, submission: &EpisodeSubmission) -> ChunkedEpisode {
        self.chunker.chunk_episode(
            &submission.content,
            submission.episode_type,
            &submission.session_id,
            submission.title.as_deref(),
            submission.metadata.clone(),
        )
    }

    /// Chunk, diff, persist and invalidate for one submission.
    pub async fn preprocess(&self, submission: &EpisodeSubmission) -> Result<PreparedSubmission> {
        self.validate(submission)?;
        self.preprocess_chunked(submission, self.chunk(submission)).await
    }

    /// [`preprocess`](Self::preprocess) over an already chunked submission.
    /// `chunked` must come from [`chunk`](Self::chunk) on the same submission.
    pub async fn preprocess_chunked(
        &self,
        submission: &EpisodeSubmission,
        chunked: ChunkedEpisode,
    ) -> Result<PreparedSubmission> {
        self.validate(submission)?;

        if !submission.is_versioned() {
            let episodes = build_episodes(
                submission,
                &chunked,
                chunked.chunks.iter().map(|c| (c.index, c.content.clone())).collect(),
                None,
                DifferentialStrategy::FullContent,
                None,
            );
            self.store.save_episodes(&episodes).await?;
            return Ok(PreparedSubmission {
                episodes,
                strategy: DifferentialStrategy::FullContent,
                analysis: None,
                total_chunks: chunked.total_chunks,
                invalidated_statements: 0,
            });
        }

        let analysis = self
            .differ
            .analyze_version_changes(
                &submission.session_id,
                &submission.user_id,
                &chunked.content_hash,
                &chunked.chunk_hashes,
                submission.episode_type,
            )
            .await?;
        let decision =
            self.differ
                .choose_strategy(&analysis, submission.episode_type, &chunked.original_content);

        let bodies: Vec<(usize, String)> = match decision.strategy {
            DifferentialStrategy::SkipProcessing => Vec::new(),
            DifferentialStrategy::ChunkLevelDiff => {
                let changed = &analysis.chunk_level_changes.changed_chunk_indices;
                chunked
                    .chunks
                    .iter()
                    .filter(|c| changed.contains(&c.index))
                    .map(|c| (c.index, c.content.clone()))
                    .collect()
            }
            DifferentialStrategy::WholeDocumentDiff | DifferentialStrategy::CompactConversationDiff => {
                let diff = decision.diff.clone().unwrap_or_default();
                self.chunker
                    .chunk_episode(
                        &diff,
                        submission.episode_type,
                        &submission.session_id,
                        None,
                        serde_json::Value::Null,
                    )
                    .chunks
                    .into_iter()
                    .map(|c| (c.index, c.content))
                    .collect()
            }
            DifferentialStrategy::FullReingest | DifferentialStrategy::FullContent => chunked
                .chunks
                .iter()
                .map(|c| (c.index, c.content.clone()))
                .collect(),
        };

        let episodes = build_episodes(
            submission,
            &chunked,
            bodies,
            Some(analysis.new_version),
            decision.strategy,
            analysis.previous_version_session_id.clone(),
        );

        if episodes.is_empty() {
            info!(
                session = %submission.session_id,
                version = analysis.new_version - 1,
                "content unchanged, skipping ingestion"
            );
            return Ok(PreparedSubmission {
                episodes,
                strategy: decision.strategy,
                total_chunks: chunked.total_chunks,
                analysis: Some(analysis),
                invalidated_statements: 0,
            });
        }

        self.store.save_episodes(&episodes).await?;

        let superseded = superseded_episodes(&analysis, decision.strategy);
        let invalidated_statements = if superseded.is_empty() {
            0
        } else {
            self.store
                .invalidate_statements_for_episodes(&superseded, episodes[0].uuid)
                .await?
        };

        info!(
            session = %submission.session_id,
            version = analysis.new_version,
            strategy = ?decision.strategy,
            episodes = episodes.len(),
            invalidated = invalidated_statements,
            "preprocessed submission"
        );

        Ok(PreparedSubmission {
            episodes,
            strategy: decision.strategy,
            total_chunks: chunked.total_chunks,
            analysis: Some(analysis),
            invalidated_statements,
        })
    }
}

/// Previous episodes whose statements the new version replaces.
fn superseded_episodes(analysis: &VersionAnalysis, strategy: DifferentialStrategy) -> Vec<Uuid> {
    match strategy {
        DifferentialStrategy::FullReingest => analysis.previous_episode_ids.clone(),
        DifferentialStrategy::ChunkLevelDiff => {
            let changes = &analysis.chunk_level_changes;
            changes
                .changed_chunk_indices
                .iter()
                .chain(&changes.removed_chunk_indices)
                .filter_map(|i| analysis.previous_chunk_episodes.get(i))
                .map(|e| e.uuid)
                .collect()
        }
        _ => Vec::new(),
    }
}

/// One episode per body. The first carries the version's full content and
/// hash list.
fn build_episodes(
    submission: &EpisodeSubmission,
    chunked: &ChunkedEpisode,
    bodies: Vec<(usize, String)>,
    version: Option<u32>,
    strategy: DifferentialStrategy,
    previous_version_session_id: Option<String>,
) -> Vec<EpisodicNode> {
    let now = Utc::now();
    let is_diff = strategy.ingests_diff();
    let total_chunks = if is_diff { bodies.len() } else { chunked.total_chunks };

    bodies
        .into_iter()
        .enumerate()
        .map(|(position, (chunk_index, content))| {
            let carrier = position == 0;
            let mut metadata = match &submission.metadata {
                serde_json::Value::Object(map) => map.clone(),
                _ => serde_json::Map::new(),
            };
            metadata.insert("strategy".to_string(), json!(strategy));
            metadata.insert(DIFF_METADATA_KEY.to_string(), json!(is_diff));

            EpisodicNode {
                uuid: Uuid::new_v4(),
                user_id: submission.user_id.clone(),
                session_id: submission.session_id.clone(),
                episode_type: submission.episode_type,
                title: submission.title.clone(),
                content,
                original_content: carrier.then(|| chunked.original_content.clone()),
                content_hash: chunked.content_hash.clone(),
                chunk_hashes: if carrier { chunked.chunk_hashes.clone() } else { Vec::new() },
                chunk_index,
                total_chunks,
                version,
                previous_version_session_id: previous_version_session_id.clone(),
                metadata: serde_json::Value::Object(metadata),
                valid_at: submission.reference_time,
                created_at: now,
                invalidated_at: None,
            }
        })
        .collect()
}
