//! OpenAI chat-completions client.
//!
//! Uses `async-openai` (bring-your-own-types requests) for API calls, `moka`
//! for response caching and `backoff` for retry on rate limits and 5xx.

use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use moka::future::Cache;
use serde_json::json;
use tracing::{debug, warn};

use crate::errors::{ChronicleError, LlmError, Result};
use crate::types::ChronicleConfig;

use super::{Completion, LlmClient, Message, Role, TokenUsage};

// ── Configuration ─────────────────────────────────────────────────────────────

/// In-process response cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_capacity: u64,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 1_000,
            ttl: Duration::from_secs(3_600),
        }
    }
}

/// Exponential backoff settings for retryable API errors.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// Give up after this much total time.
    pub max_elapsed: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(60),
            max_elapsed: Duration::from_secs(300),
        }
    }
}

// ── Client ────────────────────────────────────────────────────────────────────

/// OpenAI client implementing [`LlmClient`].
pub struct OpenAiClient {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    retry: RetryConfig,
    /// `md5(model + messages)` → response text.
    cache: Cache<String, String>,
}

impl OpenAiClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        cache_config: CacheConfig,
    ) -> Self {
        let config = async_openai::config::OpenAIConfig::new().with_api_key(api_key);
        Self::with_openai_config(config, model, cache_config)
    }

    /// Client for the configured key and model.
    pub fn from_config(config: &ChronicleConfig) -> Self {
        Self::new(
            config.openai_api_key.clone(),
            config.model_name.clone(),
            CacheConfig::default(),
        )
    }

    fn with_openai_config(
        config: async_openai::config::OpenAIConfig,
        model: impl Into<String>,
        cache_config: CacheConfig,
    ) -> Self {
        Self {
            client: async_openai::Client::with_config(config),
            model: model.into(),
            temperature: 0.0,
            max_tokens: 4_096,
            retry: RetryConfig::default(),
            cache: Cache::builder()
                .max_capacity(cache_config.max_capacity)
                .time_to_live(cache_config.ttl)
                .build(),
        }
    }

    /// Point the client at another OpenAI-compatible endpoint.
    pub fn with_api_base(self, api_base: impl Into<String>) -> Self {
        let config = self.client.config().clone().with_api_base(api_base);
        Self {
            client: async_openai::Client::with_config(config),
            ..self
        }
    }

    /// Override the sampling temperature (default `0.0`).
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Override the max output token limit (default `4096`).
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn cache_key(&self, messages: &[Message]) -> String {
        use md5::{Digest, Md5};
        let mut h = Md5::new();
        h.update(self.model.as_bytes());
        for m in messages {
            h.update(role_str(&m.role).as_bytes());
            h.update([0u8]);
            h.update(m.content.as_bytes());
            h.update([0u8]);
        }
        format!("{:x}", h.finalize())
    }

    fn request_body(&self, messages: &[Message]) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| json!({ "role": role_str(&m.role), "content": m.content }))
            .collect();
        json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        })
    }

    /// POST with retry on 429 and 5xx. Everything else fails immediately.
    async fn call_with_retry(&self, request: serde_json::Value) -> Result<serde_json::Value> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.retry.initial_interval)
            .with_max_interval(self.retry.max_interval)
            .with_max_elapsed_time(Some(self.retry.max_elapsed))
            .build();

        backoff::future::retry(policy, || async {
            let outcome: std::result::Result<serde_json::Value, async_openai::error::OpenAIError> =
                self.client.chat().create_byot(request.clone()).await;

            outcome.map_err(|e| match map_openai_error(e) {
                LlmError::RateLimit => {
                    warn!(model = %self.model, "rate limited, backing off");
                    backoff::Error::transient(LlmError::RateLimit)
                }
                LlmError::Api { status, message } if status >= 500 => {
                    warn!(model = %self.model, status, "server error, backing off");
                    backoff::Error::transient(LlmError::Api { status, message })
                }
                err => backoff::Error::permanent(err),
            })
        })
        .await
        .map_err(ChronicleError::Llm)
    }
}

impl LlmClient for OpenAiClient {
    async fn generate(&self, messages: &[Message]) -> Result<Completion> {
        let key = self.cache_key(messages);
        if let Some(cached) = self.cache.get(&key).await {
            debug!("LLM cache hit");
            return Ok(Completion {
                content: cached,
                usage: TokenUsage::default(),
            });
        }

        let response = self.call_with_retry(self.request_body(messages)).await?;
        let content = extract_content(&response)?;
        let usage = extract_usage(&response);
        debug!(
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "LLM call completed"
        );

        self.cache.insert(key, content.clone()).await;
        Ok(Completion { content, usage })
    }
}

// ── Response helpers ──────────────────────────────────────────────────────────

fn extract_content(response: &serde_json::Value) -> Result<String> {
    let message = &response["choices"][0]["message"];
    if message["refusal"].as_str().is_some_and(|r| !r.is_empty()) {
        return Err(ChronicleError::Llm(LlmError::Refusal));
    }
    message["content"]
        .as_str()
        .filter(|c| !c.trim().is_empty())
        .map(ToOwned::to_owned)
        .ok_or(ChronicleError::Llm(LlmError::EmptyResponse))
}

fn extract_usage(response: &serde_json::Value) -> TokenUsage {
    let usage = &response["usage"];
    TokenUsage {
        prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0),
        completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
    }
}

fn role_str(role: &Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn map_openai_error(err: async_openai::error::OpenAIError) -> LlmError {
    use async_openai::error::OpenAIError;

    match err {
        OpenAIError::ApiError(api_err) => match api_err.status.unwrap_or(0) {
            401 | 403 => LlmError::Authentication,
            429 => LlmError::RateLimit,
            status => LlmError::Api {
                status,
                message: api_err.message,
            },
        },
        other => LlmError::Api {
            status: 0,
            message: other.to_string(),
        },
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
