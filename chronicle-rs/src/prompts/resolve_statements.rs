//! Statement duplicate/contradiction prompt.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::llm_client::Message;

use super::{output_instructions, render_previous_episodes, schema_json};

pub const SYSTEM_PROMPT: &str = r#"You maintain a temporal knowledge graph of factual statements. NEW statements were just extracted from an episode. Each comes with EXISTING statements that might repeat or conflict with it.

For each new statement decide:
- DUPLICATE: an existing statement states the same fact (paraphrases count). Give its id.
- CONTRADICTION: existing statements that the new one makes no longer true (e.g. "lives in Paris" vs "moved to Berlin"). List their ids.
- Otherwise nothing.

Rules:
- Report ONLY new statements that have a duplicate or contradictions. Leave everything else out.
- Use only ids shown in that statement's candidate list.
- A duplicate is the same fact, not a related one. Different time periods are different facts.
- Contradiction means the old fact stopped holding. Additional detail is not a contradiction.
- When unsure, report nothing for that statement."#;

/// Why a candidate was retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    /// Same subject and predicate.
    SubjectPredicate,
    /// Same subject and object, different predicate.
    SubjectObject,
    /// Nearby fact embedding.
    Semantic,
    /// Attached to a recent episode of the same session.
    Temporal,
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateStatement {
    pub statement_id: String,
    pub fact: String,
    pub valid_at: String,
    pub source: CandidateSource,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewStatement {
    pub statement_id: String,
    pub fact: String,
    pub candidates: Vec<CandidateStatement>,
}

/// Everything the model sees for one statement pass.
#[derive(Debug, Clone, Serialize)]
pub struct StatementResolutionContext {
    pub episode_content: String,
    pub reference_time: String,
    /// Recent session episodes, newest first.
    pub previous_episodes: Vec<String>,
    pub statements: Vec<NewStatement>,
}

/// One flagged statement. Unlisted statements are kept as-is.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, JsonSchema)]
pub struct StatementJudgment {
    #[serde(alias = "statementId")]
    pub statement_id: String,
    #[serde(default, alias = "isDuplicate")]
    pub is_duplicate: bool,
    /// Existing statement this one duplicates.
    #[serde(default, alias = "duplicateId")]
    pub duplicate_id: Option<String>,
    /// Existing statements this one makes stale.
    #[serde(default)]
    pub contradictions: Vec<String>,
}

/// Expected `<output>` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, JsonSchema)]
pub struct StatementJudgments {
    pub results: Vec<StatementJudgment>,
}

/// Render the chat request.
pub fn messages(context: &StatementResolutionContext) -> Result<Vec<Message>> {
    let system = format!(
        "{SYSTEM_PROMPT}\n\n{}",
        output_instructions(&schema_json::<StatementJudgments>()?)
    );
    let user = format!(
        "<reference_time>{}</reference_time>\n\n\
         <previous_episodes>\n{}\n</previous_episodes>\n\n\
         <current_episode>\n{}\n</current_episode>\n\n\
         <new_statements>\n{}\n</new_statements>",
        context.reference_time,
        render_previous_episodes(&context.previous_episodes),
        context.episode_content,
        serde_json::to_string_pretty(&context.statements)?,
    );
    Ok(vec![Message::system(system), Message::user(user)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_list_candidates_with_source() {
        let ctx = StatementResolutionContext {
            episode_content: "Alice moved to Berlin.".to_string(),
            reference_time: "2024-03-01T00:00:00Z".to_string(),
            previous_episodes: vec![],
            statements: vec![NewStatement {
                statement_id: "new-1".to_string(),
                fact: "Alice lives in Berlin".to_string(),
                candidates: vec![CandidateStatement {
                    statement_id: "old-1".to_string(),
                    fact: "Alice lives in Paris".to_string(),
                    valid_at: "2023-01-01T00:00:00Z".to_string(),
                    source: CandidateSource::SubjectPredicate,
                }],
            }],
        };
        let msgs = messages(&ctx).unwrap();
        assert!(msgs[0].content.contains("contradictions"));
        assert!(msgs[1].content.contains("\"subject_predicate\""));
        assert!(msgs[1].content.contains("<reference_time>2024-03-01T00:00:00Z</reference_time>"));
        assert!(msgs[1].content.contains("(none)"));
    }

    #[test]
    fn test_sparse_judgment_defaults() {
        let parsed: StatementJudgments = serde_json::from_str(
            r#"{"results":[{"statementId":"a","contradictions":["b"]}]}"#,
        )
        .unwrap();
        let j = &parsed.results[0];
        assert!(!j.is_duplicate);
        assert_eq!(j.duplicate_id, None);
        assert_eq!(j.contradictions, vec!["b".to_string()]);
    }
}
