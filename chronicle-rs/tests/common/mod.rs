//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use chronicle_rs::driver::memory::InMemoryGraph;
use chronicle_rs::edges::Triple;
use chronicle_rs::llm_client::TokenUsage;
use chronicle_rs::nodes::{EntityNode, EpisodeType, EpisodicNode, StatementNode};
use chronicle_rs::resolution::{Adjudication, AdjudicationRequest, Adjudicator, ResolutionEngine};
use chronicle_rs::types::{ChunkerConfig, ResolutionConfig};
use chronicle_rs::{ChronicleError, Result};

pub const USER: &str = "user-1";

type Reply = Box<dyn Fn(&AdjudicationRequest) -> Result<String> + Send + Sync>;

/// Adjudicator answering from a closure, counting calls.
pub struct ScriptedAdjudicator {
    reply: Reply,
    calls: Arc<AtomicUsize>,
}

impl ScriptedAdjudicator {
    pub fn new(reply: impl Fn(&AdjudicationRequest) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            reply: Box::new(reply),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Finds nothing: no duplicates, no contradictions.
    pub fn silent() -> Self {
        Self::new(|request| {
            Ok(match request {
                AdjudicationRequest::Entities(_) => entity_reply(&[]),
                AdjudicationRequest::Statements(_) => statement_reply(json!([])),
            })
        })
    }

    /// Every call fails at the transport level.
    pub fn failing() -> Self {
        Self::new(|_| Err(ChronicleError::Store("adjudicator unreachable".to_string())))
    }

    /// Shared call counter, readable after the adjudicator is moved.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl Adjudicator for ScriptedAdjudicator {
    async fn adjudicate(&self, request: &AdjudicationRequest) -> Result<Adjudication> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = (self.reply)(request)?;
        Ok(Adjudication {
            text,
            usage: TokenUsage {
                prompt_tokens: 200,
                completion_tokens: 40,
            },
        })
    }
}

/// `<output>` block with `(entity id, duplicate idx)` pairs.
pub fn entity_reply(verdicts: &[(usize, i64)]) -> String {
    let resolutions: Vec<_> = verdicts
        .iter()
        .map(|(id, idx)| json!({ "id": id, "duplicate_idx": idx }))
        .collect();
    format!(
        "<output>\n{}\n</output>",
        json!({ "entity_resolutions": resolutions })
    )
}

/// `<output>` block with raw statement judgments.
pub fn statement_reply(results: serde_json::Value) -> String {
    format!("<output>\n{}\n</output>", json!({ "results": results }))
}

pub fn duplicate_judgment(new: Uuid, existing: Uuid) -> serde_json::Value {
    json!({
        "statement_id": new.to_string(),
        "is_duplicate": true,
        "duplicate_id": existing.to_string(),
        "contradictions": []
    })
}

pub fn contradiction_judgment(new: Uuid, stale: &[Uuid]) -> serde_json::Value {
    json!({
        "statement_id": new.to_string(),
        "is_duplicate": false,
        "contradictions": stale.iter().map(Uuid::to_string).collect::<Vec<_>>()
    })
}

pub fn entity(name: &str, entity_type: &str) -> EntityNode {
    EntityNode::new(name, entity_type, USER)
}

pub fn conversation_episode(session: &str, content: &str) -> EpisodicNode {
    EpisodicNode::new(USER, session, EpisodeType::Conversation, content, Utc::now())
}

pub fn triple(
    episode: &EpisodicNode,
    subject: &EntityNode,
    predicate: &EntityNode,
    object: &EntityNode,
    fact: &str,
) -> Triple {
    Triple {
        statement: StatementNode::new(fact, USER, episode.valid_at),
        subject: subject.clone(),
        predicate: predicate.clone(),
        object: object.clone(),
        episode_uuid: episode.uuid,
    }
}

/// Save the episode and write its triples, as the extraction writer would.
pub async fn write_episode(graph: &InMemoryGraph, episode: &EpisodicNode, triples: &[Triple]) {
    use chronicle_rs::driver::EpisodeStore;
    graph.save_episodes(std::slice::from_ref(episode)).await.unwrap();
    for t in triples {
        graph.insert_triple(t, None).await;
    }
}

pub fn resolution_config() -> ResolutionConfig {
    ResolutionConfig {
        fan_out: 2,
        ..ResolutionConfig::default()
    }
}

pub fn engine(
    graph: Arc<InMemoryGraph>,
    adjudicator: ScriptedAdjudicator,
) -> ResolutionEngine<InMemoryGraph, InMemoryGraph, ScriptedAdjudicator> {
    ResolutionEngine::new(graph.clone(), graph, adjudicator, resolution_config())
}

/// Small chunk sizes so a few paragraphs span several chunks.
pub fn small_chunker_config() -> ChunkerConfig {
    ChunkerConfig {
        document_threshold_tokens: 100,
        conversation_threshold_tokens: 50,
        document_chunk_min_tokens: 25,
        document_chunk_max_tokens: 50,
        conversation_chunk_min_tokens: 10,
        conversation_chunk_max_tokens: 25,
    }
}

/// Markdown document of `sections` self-contained sections, each small
/// enough to land in its own chunk under [`small_chunker_config`].
pub fn sectioned_document(sections: usize) -> String {
    (0..sections)
        .map(section)
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn section(i: usize) -> String {
    format!(
        "# Section {i}\n\nThis paragraph belongs to section number {i} and \
         describes one self-contained topic in roughly a hundred characters."
    )
}
