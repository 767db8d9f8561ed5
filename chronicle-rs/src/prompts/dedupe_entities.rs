//! Entity deduplication prompt.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::llm_client::Message;

use super::{output_instructions, render_previous_episodes, schema_json};

pub const SYSTEM_PROMPT: &str = r#"You are a knowledge-graph entity resolver. Each NEW entity was just extracted from an episode. For each one you are given existing graph entities that look similar.

Decide, for every new entity, whether it refers to the SAME real-world thing as one of its candidates.

Rules:
- Mark a duplicate only when you are confident: same person, place, organization, concept or relation.
- Similar names are not enough. "Apple" the company and "apple" the fruit are different entities.
- Predicates are entities too. "works at" and "is employed by" are duplicates; "works at" and "worked at" are not if the episode distinguishes past and present.
- Use the episode text and previous episodes to disambiguate.
- When unsure, answer -1 (no duplicate). A missed merge is cheap; a wrong merge corrupts the graph."#;

/// One candidate shown for a new entity, addressed by `idx`.
#[derive(Debug, Clone, Serialize)]
pub struct EntityCandidate {
    pub idx: usize,
    pub name: String,
    pub entity_type: String,
    pub attributes: serde_json::Value,
}

/// A new entity with at least one candidate, addressed by `id`.
#[derive(Debug, Clone, Serialize)]
pub struct AmbiguousEntity {
    pub id: usize,
    pub name: String,
    pub entity_type: String,
    pub attributes: serde_json::Value,
    pub candidates: Vec<EntityCandidate>,
}

/// Everything the model sees for one entity pass.
#[derive(Debug, Clone, Serialize)]
pub struct EntityDedupeContext {
    pub episode_content: String,
    /// Recent session episodes, newest first.
    pub previous_episodes: Vec<String>,
    pub entities: Vec<AmbiguousEntity>,
}

/// Verdict for one new entity.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, JsonSchema)]
pub struct EntityResolution {
    /// `id` of the new entity.
    pub id: usize,
    /// `idx` of the matching candidate, or -1 for none.
    #[serde(alias = "duplicateIdx")]
    pub duplicate_idx: i64,
}

/// Expected `<output>` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, JsonSchema)]
pub struct EntityResolutions {
    #[serde(alias = "entityResolutions")]
    pub entity_resolutions: Vec<EntityResolution>,
}

/// Render the chat request.
pub fn messages(context: &EntityDedupeContext) -> Result<Vec<Message>> {
    let system = format!(
        "{SYSTEM_PROMPT}\n\n{}",
        output_instructions(&schema_json::<EntityResolutions>()?)
    );
    let user = format!(
        "<previous_episodes>\n{}\n</previous_episodes>\n\n\
         <current_episode>\n{}\n</current_episode>\n\n\
         <new_entities>\n{}\n</new_entities>",
        render_previous_episodes(&context.previous_episodes),
        context.episode_content,
        serde_json::to_string_pretty(&context.entities)?,
    );
    Ok(vec![Message::system(system), Message::user(user)])
}
