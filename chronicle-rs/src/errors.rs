//! Error types for chronicle-rs.

/// Alias for Results returning [`ChronicleError`].
pub type Result<T> = std::result::Result<T, ChronicleError>;

/// Top-level error type for chronicle-rs.
#[derive(Debug, thiserror::Error)]
pub enum ChronicleError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Episode not found: {0}")]
    EpisodeNotFound(String),
}

/// LLM-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Rate limited")]
    RateLimit,

    #[error("Model refused to respond")]
    Refusal,

    #[error("Empty response from LLM")]
    EmptyResponse,

    #[error("Authentication failed")]
    Authentication,

    #[error("API error: HTTP {status}: {message}")]
    Api { status: u16, message: String },
}

/// Credit ledger errors.
///
/// `InsufficientCredits` and `RaceLost` are expected outcomes of contention and
/// are surfaced to the caller as "no credits". Neither is retried internally.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient credits: requested {requested}, available {available}")]
    InsufficientCredits { requested: u64, available: i64 },

    #[error("ledger entry changed concurrently")]
    RaceLost,

    #[error("no ledger entry for account {0}")]
    AccountNotFound(String),

    #[error("ledger store error: {0}")]
    Store(String),
}

impl LedgerError {
    /// `true` for outcomes the caller should treat as "no credits right now".
    pub fn is_insufficient(&self) -> bool {
        matches!(
            self,
            LedgerError::InsufficientCredits { .. }
                | LedgerError::RaceLost
                | LedgerError::AccountNotFound(_)
        )
    }
}
