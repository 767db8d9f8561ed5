//! Configuration types.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::errors::{ChronicleError, Result};

/// Chunk sizing. Token budgets are converted to characters at
/// [`crate::utils::text::CHARS_PER_TOKEN`] characters per token.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ChunkerConfig {
    /// Documents larger than this are split.
    #[validate(range(min = 1))]
    pub document_threshold_tokens: usize,
    /// Conversations larger than this are split. Lower than the document
    /// threshold because conversational turns carry more facts per token.
    #[validate(range(min = 1))]
    pub conversation_threshold_tokens: usize,
    #[validate(range(min = 1))]
    pub document_chunk_min_tokens: usize,
    #[validate(range(min = 1))]
    pub document_chunk_max_tokens: usize,
    #[validate(range(min = 1))]
    pub conversation_chunk_min_tokens: usize,
    #[validate(range(min = 1))]
    pub conversation_chunk_max_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            document_threshold_tokens: 4_000,
            conversation_threshold_tokens: 2_000,
            document_chunk_min_tokens: 1_000,
            document_chunk_max_tokens: 3_000,
            conversation_chunk_min_tokens: 500,
            conversation_chunk_max_tokens: 1_500,
        }
    }
}

/// Thresholds for choosing a differential strategy.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DifferConfig {
    /// Change percentage (0–100) at or below which only changed chunks are re-ingested.
    #[validate(range(min = 0.0, max = 100.0))]
    pub chunk_diff_max_percentage: f64,
    /// Ingest a unified diff instead of full content when the change is too
    /// large for chunk-level processing.
    pub diff_ingestion_enabled: bool,
    /// Upper bound on `diff_len / new_content_len` for diff ingestion. Above
    /// it the diff is no denser than the document itself and a full re-ingest
    /// is used instead.
    #[validate(range(min = 0.0, max = 1.0))]
    pub max_diff_ratio: f64,
    /// Lines of context around each diff hunk.
    pub diff_context_lines: usize,
}

impl Default for DifferConfig {
    fn default() -> Self {
        Self {
            chunk_diff_max_percentage: 30.0,
            diff_ingestion_enabled: true,
            max_diff_ratio: 0.6,
            diff_context_lines: 3,
        }
    }
}

/// Resolution engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ResolutionConfig {
    #[validate(range(min = 0.0, max = 1.0))]
    pub entity_similarity_threshold: f32,
    #[validate(range(min = 1))]
    pub entity_candidate_limit: usize,
    #[validate(range(min = 0.0, max = 1.0))]
    pub statement_similarity_threshold: f32,
    #[validate(range(min = 1))]
    pub statement_candidate_limit: usize,
    /// Concurrent similarity searches per pass.
    #[validate(range(min = 1))]
    pub fan_out: usize,
    /// Prior session episodes whose statements are temporal candidates.
    #[validate(range(min = 1))]
    pub temporal_episode_window: usize,
    /// Prior session episodes shown to the adjudicator as context.
    #[validate(range(min = 1))]
    pub context_episode_window: usize,
    /// Per-episode character cap for adjudication context.
    #[validate(range(min = 16))]
    pub context_episode_chars: usize,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            entity_similarity_threshold: 0.7,
            entity_candidate_limit: 5,
            statement_similarity_threshold: 0.7,
            statement_candidate_limit: 10,
            fan_out: 8,
            temporal_episode_window: 3,
            context_episode_window: 5,
            context_episode_chars: 2_000,
        }
    }
}

/// Credit accounting.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BillingConfig {
    /// When `false` the ledger is a no-op that authorizes every request.
    pub enabled: bool,
    /// Reservation estimate per ingested chunk.
    pub credits_per_chunk: u64,
    /// Charge per adjudication call made by the resolution engine.
    pub credits_per_adjudication: u64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            credits_per_chunk: 10,
            credits_per_adjudication: 1,
        }
    }
}

/// Central configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ChronicleConfig {
    /// OpenAI API key used by the adjudicator.
    #[validate(length(min = 1))]
    pub openai_api_key: String,

    /// Adjudicator model name.
    #[validate(length(min = 1))]
    pub model_name: String,

    #[validate(nested)]
    pub chunker: ChunkerConfig,

    #[validate(nested)]
    pub differ: DifferConfig,

    #[validate(nested)]
    pub resolution: ResolutionConfig,

    #[validate(nested)]
    pub billing: BillingConfig,
}

impl Default for ChronicleConfig {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            model_name: "gpt-4o".to_string(),
            chunker: ChunkerConfig::default(),
            differ: DifferConfig::default(),
            resolution: ResolutionConfig::default(),
            billing: BillingConfig::default(),
        }
    }
}

impl ChronicleConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` first (non-fatal if `.env` is absent).
    /// `OPENAI_API_KEY` is required; everything else falls back to defaults.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let openai_api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            ChronicleError::Validation("OPENAI_API_KEY is required".to_string())
        })?;

        let model_name = std::env::var("MODEL_NAME").unwrap_or(defaults.model_name);

        let billing = BillingConfig {
            enabled: env_or("BILLING_ENABLED", defaults.billing.enabled)?,
            ..defaults.billing
        };

        let resolution = ResolutionConfig {
            entity_similarity_threshold: env_or(
                "ENTITY_SIMILARITY_THRESHOLD",
                defaults.resolution.entity_similarity_threshold,
            )?,
            entity_candidate_limit: env_or(
                "ENTITY_CANDIDATE_LIMIT",
                defaults.resolution.entity_candidate_limit,
            )?,
            statement_similarity_threshold: env_or(
                "STATEMENT_SIMILARITY_THRESHOLD",
                defaults.resolution.statement_similarity_threshold,
            )?,
            statement_candidate_limit: env_or(
                "STATEMENT_CANDIDATE_LIMIT",
                defaults.resolution.statement_candidate_limit,
            )?,
            fan_out: env_or("RESOLUTION_FAN_OUT", defaults.resolution.fan_out)?,
            temporal_episode_window: env_or(
                "TEMPORAL_EPISODE_WINDOW",
                defaults.resolution.temporal_episode_window,
            )?,
            context_episode_window: env_or(
                "CONTEXT_EPISODE_WINDOW",
                defaults.resolution.context_episode_window,
            )?,
            ..defaults.resolution
        };

        let chunker = ChunkerConfig {
            document_threshold_tokens: env_or(
                "DOCUMENT_CHUNK_THRESHOLD_TOKENS",
                defaults.chunker.document_threshold_tokens,
            )?,
            conversation_threshold_tokens: env_or(
                "CONVERSATION_CHUNK_THRESHOLD_TOKENS",
                defaults.chunker.conversation_threshold_tokens,
            )?,
            ..defaults.chunker
        };

        let config = Self {
            openai_api_key,
            model_name,
            chunker,
            differ: defaults.differ,
            resolution,
            billing,
        };

        config
            .validate()
            .map_err(|e| ChronicleError::Validation(e.to_string()))?;

        Ok(config)
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(val) => val
            .trim()
            .parse::<T>()
            .map_err(|_| ChronicleError::Validation(format!("{name} has an invalid value: {val}"))),
        Err(_) => Ok(default),
    }
}
