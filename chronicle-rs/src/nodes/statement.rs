//! StatementNode: the fact node of a subject–predicate–object triple.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Category tag consumed by persona logic. Resolution ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Aspect {
    Identity,
    Preference,
    Goal,
    Belief,
    Relationship,
    Event,
    Knowledge,
}

/// A factual statement, with bi-temporal bookkeeping.
///
/// - `valid_at` / `invalid_at`: when the fact held in the real world.
/// - `created_at`: when the statement entered the graph.
///
/// A statement with `invalid_at == None` is live. Once invalidated it is
/// logically dead but stays in the graph; only confirmed exact duplicates are
/// physically deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementNode {
    pub uuid: Uuid,
    pub user_id: String,
    /// Natural-language fact text.
    pub fact: String,
    pub aspect: Option<Aspect>,
    pub attributes: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub valid_at: DateTime<Utc>,
    pub invalid_at: Option<DateTime<Utc>>,
    /// Episode whose ingestion superseded this statement.
    pub invalidated_by: Option<Uuid>,
}

impl StatementNode {
    /// Build a live statement valid from `valid_at`.
    pub fn new(fact: impl Into<String>, user_id: impl Into<String>, valid_at: DateTime<Utc>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            user_id: user_id.into(),
            fact: fact.into(),
            aspect: None,
            attributes: serde_json::Value::Object(Default::default()),
            created_at: Utc::now(),
            valid_at,
            invalid_at: None,
            invalidated_by: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.invalid_at.is_none()
    }

    /// Mark the statement dead. Invalidation is one-way: an already-invalid
    /// statement keeps its original timestamp and superseding episode.
    pub fn invalidate(&mut self, at: DateTime<Utc>, by: Uuid) -> bool {
        if self.invalid_at.is_some() {
            return false;
        }
        self.invalid_at = Some(at);
        self.invalidated_by = Some(by);
        true
    }
}
