//! Version differ: detects resubmissions and decides how much to reprocess.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use similar::TextDiff;
use tracing::debug;

use crate::driver::EpisodeStore;
use crate::errors::Result;
use crate::nodes::{EpisodeType, EpisodicNode};
use crate::types::DifferConfig;

/// Metadata key marking an episode whose body is a diff, not real content.
pub const DIFF_METADATA_KEY: &str = "is_diff";

/// How a submission is processed relative to its previous version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifferentialStrategy {
    /// Nothing changed.
    SkipProcessing,
    /// Re-ingest only the changed chunks; invalidate only their statements.
    ChunkLevelDiff,
    /// Invalidate everything from previous versions, then ingest as new.
    FullReingest,
    /// Ingest a unified diff of the whole document.
    WholeDocumentDiff,
    /// Ingest a unified diff of a revised conversation transcript.
    CompactConversationDiff,
    /// Ingest everything as new content (first version, or no usable history).
    FullContent,
}

impl DifferentialStrategy {
    /// `true` when the ingested body is a diff rather than content.
    pub fn ingests_diff(&self) -> bool {
        matches!(
            self,
            DifferentialStrategy::WholeDocumentDiff | DifferentialStrategy::CompactConversationDiff
        )
    }
}

/// Positional chunk-hash comparison.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkLevelChanges {
    /// Indices in the new chunking whose hash differs or that did not exist before.
    pub changed_chunk_indices: Vec<usize>,
    /// Indices that existed before but not anymore.
    pub removed_chunk_indices: Vec<usize>,
    /// `changed / new_total * 100`.
    pub change_percentage: f64,
    /// Chunk count changed, so old and new indices don't line up.
    pub boundaries_shifted: bool,
}

/// Outcome of comparing a submission against its previous version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionAnalysis {
    pub is_new_session: bool,
    pub new_version: u32,
    pub has_content_changed: bool,
    pub chunk_level_changes: ChunkLevelChanges,
    /// Carrier episode (first episode) of the previous version.
    pub existing_first_episode: Option<EpisodicNode>,
    pub previous_version_session_id: Option<String>,
    /// Full previous content, when it can be reconstructed.
    pub previous_content: Option<String>,
    /// Newest episode per chunk index, across all previous versions.
    pub previous_chunk_episodes: BTreeMap<usize, EpisodicNode>,
    /// Every previous episode of the session.
    pub previous_episode_ids: Vec<uuid::Uuid>,
}

/// Strategy plus the diff body when the strategy ingests one.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyDecision {
    pub strategy: DifferentialStrategy,
    pub diff: Option<String>,
}

/// Compare hash lists index by index.
pub fn compare_chunk_hashes(previous: &[String], current: &[String]) -> ChunkLevelChanges {
    let changed_chunk_indices: Vec<usize> = current
        .iter()
        .enumerate()
        .filter(|(i, hash)| previous.get(*i) != Some(*hash))
        .map(|(i, _)| i)
        .collect();
    let removed_chunk_indices: Vec<usize> = (current.len()..previous.len()).collect();

    let change_percentage = if current.is_empty() {
        0.0
    } else {
        changed_chunk_indices.len() as f64 / current.len() as f64 * 100.0
    };

    ChunkLevelChanges {
        change_percentage,
        boundaries_shifted: previous.len() != current.len(),
        changed_chunk_indices,
        removed_chunk_indices,
    }
}

/// Unified line diff between two texts.
pub fn unified_diff(previous: &str, current: &str, context_lines: usize) -> String {
    TextDiff::from_lines(previous, current)
        .unified_diff()
        .context_radius(context_lines)
        .header("previous", "current")
        .to_string()
}

/// Looks up prior versions and classifies changes.
pub struct VersionDiffer<S> {
    store: Arc<S>,
    config: DifferConfig,
}

impl<S: EpisodeStore> VersionDiffer<S> {
    pub fn new(store: Arc<S>, config: DifferConfig) -> Self {
        Self { store, config }
    }

    /// Compare a submission's hashes against the latest stored version of the session.
    pub async fn analyze_version_changes(
        &self,
        session_id: &str,
        user_id: &str,
        new_content_hash: &str,
        new_chunk_hashes: &[String],
        episode_type: EpisodeType,
    ) -> Result<VersionAnalysis> {
        let history: Vec<EpisodicNode> = self
            .store
            .session_episodes(user_id, session_id)
            .await?
            .into_iter()
            .filter(|e| e.episode_type == episode_type && e.version.is_some())
            .collect();

        let Some(latest_version) = history.iter().filter_map(|e| e.version).max() else {
            return Ok(VersionAnalysis {
                is_new_session: true,
                new_version: 1,
                has_content_changed: true,
                chunk_level_changes: compare_chunk_hashes(&[], new_chunk_hashes),
                existing_first_episode: None,
                previous_version_session_id: None,
                previous_content: None,
                previous_chunk_episodes: BTreeMap::new(),
                previous_episode_ids: Vec::new(),
            });
        };

        let carrier = history
            .iter()
            .filter(|e| e.version == Some(latest_version) && e.is_version_carrier())
            .min_by_key(|e| (e.created_at, e.chunk_index))
            .cloned();

        let mut previous_chunk_episodes: BTreeMap<usize, EpisodicNode> = BTreeMap::new();
        for episode in history.iter().filter(|e| !is_diff_episode(e)) {
            let newer = previous_chunk_episodes
                .get(&episode.chunk_index)
                .map_or(true, |seen| (episode.version, episode.created_at) > (seen.version, seen.created_at));
            if newer {
                previous_chunk_episodes.insert(episode.chunk_index, episode.clone());
            }
        }

        let (chunk_level_changes, has_content_changed) = match &carrier {
            Some(c) => {
                let changes = compare_chunk_hashes(&c.chunk_hashes, new_chunk_hashes);
                let changed = c.content_hash != new_content_hash
                    || !changes.changed_chunk_indices.is_empty()
                    || !changes.removed_chunk_indices.is_empty();
                (changes, changed)
            }
            // No hash list to compare against: every chunk counts as changed.
            None => (compare_chunk_hashes(&[], new_chunk_hashes), true),
        };

        let previous_content = carrier
            .as_ref()
            .and_then(|c| reconstruct_content(c, &previous_chunk_episodes));

        debug!(
            session = session_id,
            version = latest_version,
            changed = chunk_level_changes.changed_chunk_indices.len(),
            reconstructed = previous_content.is_some(),
            "analyzed version changes"
        );

        Ok(VersionAnalysis {
            is_new_session: false,
            new_version: latest_version + 1,
            has_content_changed,
            chunk_level_changes,
            previous_version_session_id: carrier.as_ref().map(|c| c.session_id.clone()),
            existing_first_episode: carrier,
            previous_content,
            previous_chunk_episodes,
            previous_episode_ids: history.iter().map(|e| e.uuid).collect(),
        })
    }

    /// Pick a differential strategy for an analyzed submission.
    pub fn choose_strategy(
        &self,
        analysis: &VersionAnalysis,
        episode_type: EpisodeType,
        new_content: &str,
    ) -> StrategyDecision {
        let plain = |strategy| StrategyDecision { strategy, diff: None };

        if analysis.is_new_session {
            return plain(DifferentialStrategy::FullContent);
        }
        if !analysis.has_content_changed {
            return plain(DifferentialStrategy::SkipProcessing);
        }
        let Some(previous) = analysis.previous_content.as_deref() else {
            // Reprocessing costs less than losing the new version.
            return plain(DifferentialStrategy::FullContent);
        };

        let changes = &analysis.chunk_level_changes;
        match episode_type {
            EpisodeType::Conversation => StrategyDecision {
                strategy: DifferentialStrategy::CompactConversationDiff,
                diff: Some(unified_diff(previous, new_content, self.config.diff_context_lines)),
            },
            EpisodeType::Document => {
                if !changes.boundaries_shifted
                    && !changes.changed_chunk_indices.is_empty()
                    && changes.change_percentage <= self.config.chunk_diff_max_percentage
                {
                    return plain(DifferentialStrategy::ChunkLevelDiff);
                }
                if self.config.diff_ingestion_enabled {
                    let diff = unified_diff(previous, new_content, self.config.diff_context_lines);
                    let ratio = diff.chars().count() as f64 / new_content.chars().count().max(1) as f64;
                    if ratio <= self.config.max_diff_ratio {
                        return StrategyDecision {
                            strategy: DifferentialStrategy::WholeDocumentDiff,
                            diff: Some(diff),
                        };
                    }
                }
                plain(DifferentialStrategy::FullReingest)
            }
        }
    }
}

fn is_diff_episode(episode: &EpisodicNode) -> bool {
    episode
        .metadata
        .get(DIFF_METADATA_KEY)
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false)
}

/// Full previous content: the carrier's stored original, or the chunk bodies
/// joined in index order when every chunk is still on record.
fn reconstruct_content(
    carrier: &EpisodicNode,
    chunks: &BTreeMap<usize, EpisodicNode>,
) -> Option<String> {
    if let Some(original) = &carrier.original_content {
        return Some(original.clone());
    }
    let total = carrier.chunk_hashes.len();
    let parts: Option<Vec<&str>> = (0..total)
        .map(|i| chunks.get(&i).map(|e| e.content.as_str()))
        .collect();
    parts.map(|p| p.join("\n\n"))
}
