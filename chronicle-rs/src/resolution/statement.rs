//! Statement resolution pass.
//!
//! Candidates per new statement come from three sources, in priority order:
//! structural (shared subject/predicate or subject/object), semantic (fact
//! embedding neighbours) and temporal (statements of recent session episodes).
//! Statements with no candidates skip adjudication entirely.

use std::collections::{HashMap, HashSet};

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::driver::{EntityPair, GraphStore, SubjectObjectQuery, VectorIndex};
use crate::edges::Triple;
use crate::errors::Result;
use crate::nodes::{EpisodicNode, StatementNode};
use crate::prompts::resolve_statements::{
    CandidateSource, CandidateStatement, NewStatement, StatementResolutionContext,
};
use crate::types::ResolutionConfig;
use crate::utils::{format_reference_time, normalize_whitespace};

use super::adjudicator::{parse_statement_verdicts, AdjudicationRequest, Adjudicator};
use super::usage::UsageAccumulator;

/// `new_statement` repeats `existing_statement` and will be folded into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DuplicateStatement {
    pub new_statement: Uuid,
    pub existing_statement: Uuid,
}

/// Result of the statement pass.
#[derive(Debug, Clone, Default)]
pub struct StatementPassOutcome {
    /// Triples whose statement survives.
    pub kept: Vec<Triple>,
    pub duplicates: Vec<DuplicateStatement>,
    /// Existing statements to invalidate.
    pub invalidations: Vec<Uuid>,
    /// New statements that had at least one candidate.
    pub adjudicated: usize,
    pub adjudication_failed: bool,
    pub usage: UsageAccumulator,
}

/// Ordered, de-duplicated candidate list for one new statement.
#[derive(Debug, Default)]
struct CandidateSet {
    items: Vec<(StatementNode, CandidateSource)>,
    ids: HashSet<Uuid>,
}

impl CandidateSet {
    fn push(&mut self, statement: StatementNode, source: CandidateSource) {
        if self.ids.insert(statement.uuid) {
            self.items.push((statement, source));
        }
    }

    fn ids(&self) -> Vec<Uuid> {
        self.items.iter().map(|(s, _)| s.uuid).collect()
    }
}

pub(crate) async fn resolve_statements<G, V, A>(
    graph: &G,
    vectors: &V,
    adjudicator: &A,
    config: &ResolutionConfig,
    episode: &EpisodicNode,
    previous_episodes: &[String],
    triples: Vec<Triple>,
) -> Result<StatementPassOutcome>
where
    G: GraphStore,
    V: VectorIndex,
    A: Adjudicator,
{
    if triples.is_empty() {
        return Ok(StatementPassOutcome::default());
    }
    let user_id = episode.user_id.as_str();
    let new_ids: Vec<Uuid> = triples.iter().map(|t| t.statement.uuid).collect();

    // Structural: both batch lookups in one round-trip each.
    let pairs: Vec<EntityPair> = unique(
        triples
            .iter()
            .map(|t| EntityPair::new(t.subject.uuid, t.predicate.uuid)),
    );
    let queries: Vec<SubjectObjectQuery> = unique(triples.iter().map(|t| SubjectObjectQuery {
        subject: t.subject.uuid,
        object: t.object.uuid,
        predicate: t.predicate.uuid,
    }));
    let (by_subject_predicate, by_subject_object) = futures::try_join!(
        graph.find_contradictory_statements_batch(user_id, &pairs, &new_ids),
        graph.find_statements_with_same_subject_object_batch(user_id, &queries, &new_ids),
    )?;

    let mut candidates: Vec<CandidateSet> = triples
        .iter()
        .map(|t| {
            let mut set = CandidateSet::default();
            let sp = EntityPair::new(t.subject.uuid, t.predicate.uuid);
            for s in by_subject_predicate.get(&sp).into_iter().flatten() {
                set.push(s.clone(), CandidateSource::SubjectPredicate);
            }
            let so = EntityPair::new(t.subject.uuid, t.object.uuid);
            for s in by_subject_object.get(&so).into_iter().flatten() {
                set.push(s.clone(), CandidateSource::SubjectObject);
            }
            set
        })
        .collect();

    // Semantic: exclude structural hits and this episode's statements.
    let embeddings = vectors.batch_get_statement_embeddings(&new_ids).await?;
    let semantic = stream::iter(triples.iter().zip(candidates.iter()))
        .map(|(triple, set)| {
            let embedding = embeddings.get(&triple.statement.uuid);
            let mut exclude = new_ids.clone();
            exclude.extend(set.ids());
            async move {
                match embedding {
                    Some(v) => {
                        graph
                            .find_similar_statements(
                                user_id,
                                v,
                                config.statement_candidate_limit,
                                config.statement_similarity_threshold,
                                &exclude,
                            )
                            .await
                    }
                    None => Ok(Vec::new()),
                }
            }
        })
        .buffered(config.fan_out)
        .collect::<Vec<Result<Vec<StatementNode>>>>()
        .await;
    for (set, hits) in candidates.iter_mut().zip(semantic) {
        for s in hits? {
            set.push(s, CandidateSource::Semantic);
        }
    }

    // Temporal: recall net over recent session episodes.
    let new_id_set: HashSet<Uuid> = new_ids.iter().copied().collect();
    let recent: Vec<StatementNode> = graph
        .find_recent_session_statements(
            user_id,
            &episode.session_id,
            episode.uuid,
            config.temporal_episode_window,
        )
        .await?
        .into_iter()
        .filter(|s| !new_id_set.contains(&s.uuid))
        .collect();
    for set in candidates.iter_mut() {
        for s in recent.iter().rev().take(config.statement_candidate_limit) {
            set.push(s.clone(), CandidateSource::Temporal);
        }
    }

    let mut outcome = StatementPassOutcome::default();
    let mut shown: HashMap<Uuid, HashSet<Uuid>> = HashMap::new();
    let mut to_adjudicate = Vec::new();
    for (triple, set) in triples.iter().zip(&candidates) {
        debug!(statement = %triple.statement.uuid, candidates = set.items.len(), "statement candidates");
        if set.items.is_empty() {
            continue;
        }
        shown.insert(triple.statement.uuid, set.ids.clone());
        to_adjudicate.push(NewStatement {
            statement_id: triple.statement.uuid.to_string(),
            fact: normalize_whitespace(&triple.statement.fact),
            candidates: set
                .items
                .iter()
                .map(|(s, source)| CandidateStatement {
                    statement_id: s.uuid.to_string(),
                    fact: normalize_whitespace(&s.fact),
                    valid_at: format_reference_time(&s.valid_at),
                    source: *source,
                })
                .collect(),
        });
    }
    outcome.adjudicated = to_adjudicate.len();

    if to_adjudicate.is_empty() {
        outcome.kept = triples;
        return Ok(outcome);
    }

    let context = StatementResolutionContext {
        episode_content: episode.content.clone(),
        reference_time: format_reference_time(&episode.valid_at),
        previous_episodes: previous_episodes.to_vec(),
        statements: to_adjudicate,
    };
    let verdicts = match adjudicator
        .adjudicate(&AdjudicationRequest::Statements(context))
        .await
    {
        Ok(answer) => {
            outcome.usage.record(answer.usage);
            parse_statement_verdicts(&answer.text, &shown).map_err(|e| e.to_string())
        }
        Err(e) => Err(e.to_string()),
    };
    let verdicts = match verdicts {
        Ok(v) => v,
        Err(error) => {
            warn!(episode = %episode.uuid, %error, "statement adjudication unusable, keeping all");
            outcome.adjudication_failed = true;
            outcome.kept = triples;
            return Ok(outcome);
        }
    };

    let mut duplicate_of: HashMap<Uuid, Uuid> = HashMap::new();
    let mut stale: Vec<Uuid> = Vec::new();
    for verdict in verdicts {
        match verdict.duplicate_of {
            Some(existing) => {
                duplicate_of.insert(verdict.statement, existing);
            }
            None => stale.extend(verdict.contradicts),
        }
    }

    // A statement another one folds into must stay live.
    let targets: HashSet<Uuid> = duplicate_of.values().copied().collect();
    let mut seen = HashSet::new();
    outcome.invalidations = stale
        .into_iter()
        .filter(|id| !targets.contains(id) && seen.insert(*id))
        .collect();

    for triple in triples {
        match duplicate_of.get(&triple.statement.uuid) {
            Some(&existing) => outcome.duplicates.push(DuplicateStatement {
                new_statement: triple.statement.uuid,
                existing_statement: existing,
            }),
            None => outcome.kept.push(triple),
        }
    }

    info!(
        episode = %episode.uuid,
        adjudicated = outcome.adjudicated,
        duplicates = outcome.duplicates.len(),
        invalidations = outcome.invalidations.len(),
        "statement resolution complete"
    );
    Ok(outcome)
}

fn unique<T: Eq + std::hash::Hash + Copy>(items: impl Iterator<Item = T>) -> Vec<T> {
    let mut seen = HashSet::new();
    items.filter(|item| seen.insert(*item)).collect()
}
