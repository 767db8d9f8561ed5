//! Adjudicator contract and response parsing.
//!
//! The adjudicator returns free-form text that should contain one
//! `<output>` block. Nothing about that text is trusted: parsing yields either
//! validated verdicts or a [`ParseError`], and every id the model mentions is
//! checked against what it was actually shown.

use std::collections::{HashMap, HashSet};

use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use crate::errors::Result;
use crate::llm_client::{LlmClient, TokenUsage};
use crate::prompts::dedupe_entities::{EntityDedupeContext, EntityResolutions};
use crate::prompts::resolve_statements::{StatementJudgments, StatementResolutionContext};
use crate::prompts::{self, OUTPUT_TAG};
use crate::utils::{extract_json_from_response, extract_tagged_block};

/// One batched adjudication call.
#[derive(Debug, Clone)]
pub enum AdjudicationRequest {
    Entities(EntityDedupeContext),
    Statements(StatementResolutionContext),
}

/// Raw adjudicator answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adjudication {
    pub text: String,
    pub usage: TokenUsage,
}

/// Judges ambiguous entities and statements.
#[allow(async_fn_in_trait)]
pub trait Adjudicator: Send + Sync {
    async fn adjudicate(&self, request: &AdjudicationRequest) -> Result<Adjudication>;
}

/// [`Adjudicator`] backed by a chat model.
pub struct LlmAdjudicator<C> {
    client: C,
}

impl<C: LlmClient> LlmAdjudicator<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

impl<C: LlmClient> Adjudicator for LlmAdjudicator<C> {
    async fn adjudicate(&self, request: &AdjudicationRequest) -> Result<Adjudication> {
        let messages = match request {
            AdjudicationRequest::Entities(ctx) => prompts::dedupe_entities::messages(ctx)?,
            AdjudicationRequest::Statements(ctx) => prompts::resolve_statements::messages(ctx)?,
        };
        let completion = self.client.generate(&messages).await?;
        Ok(Adjudication {
            text: completion.content,
            usage: completion.usage,
        })
    }
}

/// Why an adjudicator answer was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("no <output> block or JSON object in response")]
    MissingBlock,

    #[error("malformed JSON: {0}")]
    Malformed(String),

    #[error("unexpected response shape: {0}")]
    InvalidShape(String),
}

/// Deserialize the `<output>` block, falling back to the first JSON object
/// in the text when the tags are missing.
pub fn parse_output<T: DeserializeOwned>(text: &str) -> std::result::Result<T, ParseError> {
    let block = match extract_tagged_block(text, OUTPUT_TAG) {
        Some(inner) => extract_json_from_response(inner).unwrap_or(inner),
        None => extract_json_from_response(text).ok_or(ParseError::MissingBlock)?,
    };
    let value: serde_json::Value =
        serde_json::from_str(block).map_err(|e| ParseError::Malformed(e.to_string()))?;
    serde_json::from_value(value).map_err(|e| ParseError::InvalidShape(e.to_string()))
}

/// Entity verdicts as `entity id -> candidate idx`, only for confirmed duplicates.
///
/// `candidate_counts[id]` is how many candidates entity `id` was shown.
/// Unknown ids, `-1` and out-of-range indices are dropped (kept as original).
pub fn parse_entity_verdicts(
    text: &str,
    candidate_counts: &[usize],
) -> std::result::Result<HashMap<usize, usize>, ParseError> {
    let parsed: EntityResolutions = parse_output(text)?;
    let mut out = HashMap::new();
    for verdict in parsed.entity_resolutions {
        let Some(&count) = candidate_counts.get(verdict.id) else {
            debug!(id = verdict.id, "adjudicator named an unknown entity");
            continue;
        };
        match usize::try_from(verdict.duplicate_idx) {
            Ok(idx) if idx < count => {
                out.insert(verdict.id, idx);
            }
            Ok(idx) => debug!(id = verdict.id, idx, "duplicate_idx out of range, keeping"),
            Err(_) => {}
        }
    }
    Ok(out)
}

/// Validated disposition of one flagged statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementVerdict {
    pub statement: Uuid,
    /// Existing statement this one duplicates.
    pub duplicate_of: Option<Uuid>,
    /// Existing statements made stale. Empty when `duplicate_of` is set.
    pub contradicts: Vec<Uuid>,
}

/// Sparse statement verdicts.
///
/// `shown` maps each new statement to the candidates it was shown. A verdict
/// for an unknown statement is dropped. A duplicate or contradiction id
/// outside that statement's candidates is ignored.
pub fn parse_statement_verdicts(
    text: &str,
    shown: &HashMap<Uuid, HashSet<Uuid>>,
) -> std::result::Result<Vec<StatementVerdict>, ParseError> {
    let parsed: StatementJudgments = parse_output(text)?;
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for judgment in parsed.results {
        let Some(statement) = parse_uuid(&judgment.statement_id) else {
            debug!(id = %judgment.statement_id, "unparseable statement id");
            continue;
        };
        let Some(candidates) = shown.get(&statement) else {
            debug!(%statement, "adjudicator named an unknown statement");
            continue;
        };
        if !seen.insert(statement) {
            continue;
        }

        let duplicate_of = judgment
            .is_duplicate
            .then(|| judgment.duplicate_id.as_deref().and_then(parse_uuid))
            .flatten()
            .filter(|id| candidates.contains(id));

        let contradicts = if duplicate_of.is_some() {
            Vec::new()
        } else {
            let mut ids: Vec<Uuid> = judgment
                .contradictions
                .iter()
                .filter_map(|id| parse_uuid(id))
                .filter(|id| candidates.contains(id))
                .collect();
            ids.sort();
            ids.dedup();
            ids
        };

        if duplicate_of.is_some() || !contradicts.is_empty() {
            out.push(StatementVerdict {
                statement,
                duplicate_of,
                contradicts,
            });
        }
    }
    Ok(out)
}

fn parse_uuid(s: &str) -> Option<Uuid> {
    Uuid::parse_str(s.trim()).ok()
}
