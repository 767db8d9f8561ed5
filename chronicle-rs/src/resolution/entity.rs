//! Entity resolution pass.

use std::collections::{HashMap, HashSet};

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::driver::{GraphStore, VectorIndex};
use crate::edges::Triple;
use crate::errors::{ChronicleError, Result};
use crate::nodes::{EntityNode, EpisodicNode};
use crate::prompts::dedupe_entities::{AmbiguousEntity, EntityCandidate, EntityDedupeContext};
use crate::types::ResolutionConfig;
use crate::utils::normalize_whitespace;

use super::adjudicator::{parse_entity_verdicts, AdjudicationRequest, Adjudicator};
use super::merge::{EntityMerge, MergeForest};
use super::usage::UsageAccumulator;

/// Result of the entity pass.
#[derive(Debug, Clone, Default)]
pub struct EntityPassOutcome {
    /// Input triples with entity references rewritten to the winners.
    pub triples: Vec<Triple>,
    /// Superseded entity uuid → winning entity.
    pub resolved: HashMap<Uuid, EntityNode>,
    /// Merges to apply at commit.
    pub merges: Vec<EntityMerge>,
    /// Entities that had candidates and were kept.
    pub kept_ambiguous: usize,
    /// Adjudication was needed but its answer was unusable.
    pub adjudication_failed: bool,
    pub usage: UsageAccumulator,
}

/// Distinct entities referenced by `triples`, in first-seen order.
pub fn distinct_entities(triples: &[Triple]) -> Vec<EntityNode> {
    let mut seen = HashSet::new();
    triples
        .iter()
        .flat_map(|t| t.entities())
        .filter(|e| seen.insert(e.uuid))
        .cloned()
        .collect()
}

pub(crate) async fn resolve_entities<G, V, A>(
    graph: &G,
    vectors: &V,
    adjudicator: &A,
    config: &ResolutionConfig,
    episode: &EpisodicNode,
    previous_episodes: &[String],
    mut triples: Vec<Triple>,
) -> Result<EntityPassOutcome>
where
    G: GraphStore,
    V: VectorIndex,
    A: Adjudicator,
{
    let entities = distinct_entities(&triples);
    if entities.is_empty() {
        return Ok(EntityPassOutcome {
            triples,
            ..Default::default()
        });
    }
    let episode_ids: Vec<Uuid> = entities.iter().map(|e| e.uuid).collect();
    let embeddings = vectors.batch_get_entity_embeddings(&episode_ids).await?;

    let searches = stream::iter(entities.iter())
        .map(|entity| {
            let embedding = embeddings.get(&entity.uuid);
            let exclude = episode_ids.as_slice();
            async move {
                let candidates = match embedding {
                    Some(v) => {
                        graph
                            .find_similar_entities(
                                &episode.user_id,
                                v,
                                config.entity_candidate_limit,
                                config.entity_similarity_threshold,
                                exclude,
                            )
                            .await?
                    }
                    None => Vec::new(),
                };
                Ok::<_, ChronicleError>((entity, candidates))
            }
        })
        .buffered(config.fan_out)
        .collect::<Vec<_>>()
        .await;

    let mut ambiguous: Vec<(&EntityNode, Vec<EntityNode>)> = Vec::new();
    for result in searches {
        let (entity, candidates) = result?;
        debug!(entity = %entity.name, candidates = candidates.len(), "entity candidates");
        if !candidates.is_empty() {
            ambiguous.push((entity, candidates));
        }
    }

    let mut outcome = EntityPassOutcome::default();
    if ambiguous.is_empty() {
        outcome.triples = triples;
        return Ok(outcome);
    }

    let context = EntityDedupeContext {
        episode_content: episode.content.clone(),
        previous_episodes: previous_episodes.to_vec(),
        entities: ambiguous
            .iter()
            .enumerate()
            .map(|(id, (entity, candidates))| AmbiguousEntity {
                id,
                name: normalize_whitespace(&entity.name),
                entity_type: entity.entity_type.clone(),
                attributes: entity.attributes.clone(),
                candidates: candidates
                    .iter()
                    .enumerate()
                    .map(|(idx, c)| EntityCandidate {
                        idx,
                        name: normalize_whitespace(&c.name),
                        entity_type: c.entity_type.clone(),
                        attributes: c.attributes.clone(),
                    })
                    .collect(),
            })
            .collect(),
    };

    let verdicts = match adjudicator
        .adjudicate(&AdjudicationRequest::Entities(context))
        .await
    {
        Ok(answer) => {
            outcome.usage.record(answer.usage);
            let counts: Vec<usize> = ambiguous.iter().map(|(_, c)| c.len()).collect();
            match parse_entity_verdicts(&answer.text, &counts) {
                Ok(v) => v,
                Err(e) => {
                    warn!(episode = %episode.uuid, error = %e, "entity adjudication unparseable, keeping all");
                    outcome.adjudication_failed = true;
                    HashMap::new()
                }
            }
        }
        Err(e) => {
            warn!(episode = %episode.uuid, error = %e, "entity adjudication failed, keeping all");
            outcome.adjudication_failed = true;
            HashMap::new()
        }
    };

    let mut forest = MergeForest::new();
    let mut winners: HashMap<Uuid, EntityNode> = HashMap::new();
    for (id, (entity, candidates)) in ambiguous.iter().enumerate() {
        let Some(&idx) = verdicts.get(&id) else {
            continue;
        };
        let target = &candidates[idx];
        if forest.union(entity.uuid, target.uuid) {
            winners.insert(target.uuid, target.clone());
        }
    }

    for entity in &entities {
        let root = forest.find(entity.uuid);
        if root != entity.uuid {
            if let Some(winner) = winners.get(&root) {
                outcome.resolved.insert(entity.uuid, winner.clone());
            }
        }
    }
    for triple in &mut triples {
        triple.rewrite_entities(&outcome.resolved);
    }

    outcome.merges = forest.merges();
    outcome.kept_ambiguous = ambiguous.len().saturating_sub(outcome.merges.len());
    outcome.triples = triples;

    info!(
        episode = %episode.uuid,
        entities = entities.len(),
        ambiguous = ambiguous.len(),
        merges = outcome.merges.len(),
        "entity resolution complete"
    );
    Ok(outcome)
}
