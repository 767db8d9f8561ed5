//! Content chunker: splits episode bodies into size-bounded, hashed chunks.

use serde::{Deserialize, Serialize};
use text_splitter::{MarkdownSplitter, TextSplitter};

use crate::nodes::EpisodeType;
use crate::types::ChunkerConfig;
use crate::utils::{content_hash, estimate_tokens, text::CHARS_PER_TOKEN};

/// One piece of a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub content: String,
    pub content_hash: String,
}

/// A submission split into chunks, with the hashes later versions are compared against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkedEpisode {
    pub session_id: String,
    pub title: Option<String>,
    pub metadata: serde_json::Value,
    pub chunks: Vec<Chunk>,
    pub total_chunks: usize,
    pub original_content: String,
    pub content_hash: String,
    pub chunk_hashes: Vec<String>,
}

/// Splits content using a type-specific threshold and chunk size.
#[derive(Debug, Clone)]
pub struct ContentChunker {
    config: ChunkerConfig,
}

impl ContentChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// `true` when `content` exceeds the threshold for its episode type.
    pub fn needs_chunking(&self, content: &str, episode_type: EpisodeType) -> bool {
        let threshold = match episode_type {
            EpisodeType::Document => self.config.document_threshold_tokens,
            EpisodeType::Conversation => self.config.conversation_threshold_tokens,
        };
        estimate_tokens(content) > threshold
    }

    /// Split `content` and hash every chunk.
    ///
    /// Content under the threshold yields exactly one chunk, hashed the same
    /// way as any other.
    pub fn chunk_episode(
        &self,
        content: &str,
        episode_type: EpisodeType,
        session_id: &str,
        title: Option<&str>,
        metadata: serde_json::Value,
    ) -> ChunkedEpisode {
        let pieces = if self.needs_chunking(content, episode_type) {
            self.split(content, episode_type)
        } else {
            vec![content.to_string()]
        };

        let chunks: Vec<Chunk> = pieces
            .into_iter()
            .enumerate()
            .map(|(index, content)| Chunk {
                index,
                content_hash: content_hash(&content),
                content,
            })
            .collect();

        ChunkedEpisode {
            session_id: session_id.to_string(),
            title: title.map(str::to_string),
            metadata,
            total_chunks: chunks.len(),
            chunk_hashes: chunks.iter().map(|c| c.content_hash.clone()).collect(),
            original_content: content.to_string(),
            content_hash: content_hash(content),
            chunks,
        }
    }

    fn split(&self, content: &str, episode_type: EpisodeType) -> Vec<String> {
        let (min_tokens, max_tokens) = match episode_type {
            EpisodeType::Document => (
                self.config.document_chunk_min_tokens,
                self.config.document_chunk_max_tokens,
            ),
            EpisodeType::Conversation => (
                self.config.conversation_chunk_min_tokens,
                self.config.conversation_chunk_max_tokens,
            ),
        };
        let min_chars = min_tokens * CHARS_PER_TOKEN;
        let max_chars = (max_tokens * CHARS_PER_TOKEN).max(min_chars + 1);

        let pieces: Vec<String> = match episode_type {
            EpisodeType::Document => MarkdownSplitter::new(min_chars..max_chars)
                .chunks(content)
                .map(str::to_string)
                .collect(),
            EpisodeType::Conversation => TextSplitter::new(min_chars..max_chars)
                .chunks(content)
                .map(str::to_string)
                .collect(),
        };

        if pieces.is_empty() {
            vec![content.to_string()]
        } else {
            pieces
        }
    }
}
