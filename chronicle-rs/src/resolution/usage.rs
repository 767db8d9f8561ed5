//! Adjudication usage accounting.

use std::ops::AddAssign;

use serde::Serialize;

use crate::llm_client::TokenUsage;

/// Adjudication calls and tokens spent by one resolution run.
///
/// Each pass returns its own accumulator; the caller merges them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageAccumulator {
    pub adjudication_calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl UsageAccumulator {
    /// Count one adjudication call.
    pub fn record(&mut self, usage: TokenUsage) {
        self.adjudication_calls += 1;
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Credits owed at `per_call` credits per adjudication.
    pub fn credits(&self, per_call: u64) -> u64 {
        self.adjudication_calls.saturating_mul(per_call)
    }
}

impl AddAssign for UsageAccumulator {
    fn add_assign(&mut self, other: Self) {
        self.adjudication_calls += other.adjudication_calls;
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}
