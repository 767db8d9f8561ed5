//! EpisodicNode: one ingested unit (a conversation turn or a document chunk).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The source type of an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeType {
    Conversation,
    Document,
}

/// An ingested episode.
///
/// Created during preprocessing, before any graph write, and immutable after
/// that except for `invalidated_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodicNode {
    pub uuid: Uuid,
    pub user_id: String,
    /// Groups episodes. For documents it is also the stable document identity
    /// across versions.
    pub session_id: String,
    pub episode_type: EpisodeType,
    pub title: Option<String>,
    /// The body handed to extraction. For diffed updates this is the diff text.
    pub content: String,
    /// Full, non-diffed content kept for future version comparisons. Only the
    /// version carrier (first episode of a version) has it.
    pub original_content: Option<String>,
    /// Hash of the full submitted content.
    pub content_hash: String,
    /// Per-chunk hashes of the whole submission. Only the version carrier has them.
    pub chunk_hashes: Vec<String>,
    pub chunk_index: usize,
    pub total_chunks: usize,
    /// Document version number. `None` for unversioned conversation turns.
    pub version: Option<u32>,
    pub previous_version_session_id: Option<String>,
    pub metadata: serde_json::Value,
    /// Reference time of the content.
    pub valid_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub invalidated_at: Option<DateTime<Utc>>,
}

impl EpisodicNode {
    /// A single-chunk, unversioned episode.
    pub fn new(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        episode_type: EpisodeType,
        content: impl Into<String>,
        valid_at: DateTime<Utc>,
    ) -> Self {
        let content = content.into();
        Self {
            uuid: Uuid::new_v4(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            episode_type,
            title: None,
            content_hash: crate::utils::content_hash(&content),
            content,
            original_content: None,
            chunk_hashes: Vec::new(),
            chunk_index: 0,
            total_chunks: 1,
            version: None,
            previous_version_session_id: None,
            metadata: serde_json::Value::Object(Default::default()),
            valid_at,
            created_at: Utc::now(),
            invalidated_at: None,
        }
    }

    /// `true` when this episode carries the hash list and full content for its version.
    pub fn is_version_carrier(&self) -> bool {
        !self.chunk_hashes.is_empty()
    }
}
