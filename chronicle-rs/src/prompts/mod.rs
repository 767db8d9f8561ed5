//! Adjudicator prompt templates.
//!
//! Prompt texts live here as string constants, one submodule per resolution
//! pass. Each pass defines:
//! - a context type (what the model is shown)
//! - an output type (what the `<output>` block must deserialize into; its
//!   `schemars` schema is embedded in the prompt)
//! - `messages(&context)` to render the chat request

pub mod dedupe_entities;
pub mod resolve_statements;

use schemars::JsonSchema;

use crate::errors::Result;

/// Tag delimiting the structured block in every adjudicator answer.
pub const OUTPUT_TAG: &str = "output";

/// Pretty-printed JSON schema for `T`.
pub(crate) fn schema_json<T: JsonSchema>() -> Result<String> {
    let schema = schemars::schema_for!(T);
    Ok(serde_json::to_string_pretty(&schema)?)
}

/// Shared answer-format instructions appended to every system prompt.
pub(crate) fn output_instructions(schema: &str) -> String {
    format!(
        "Think through the cases briefly, then answer with exactly one \
         <{OUTPUT_TAG}>...</{OUTPUT_TAG}> block containing JSON that matches this schema:\n\
         {schema}\n\
         Do not put anything after the closing tag."
    )
}

/// Render recent episodes, newest first, for context blocks.
pub(crate) fn render_previous_episodes(previous: &[String]) -> String {
    if previous.is_empty() {
        return "(none)".to_string();
    }
    previous
        .iter()
        .enumerate()
        .map(|(i, content)| format!("[{}] {}", i + 1, content))
        .collect::<Vec<_>>()
        .join("\n\n")
}
