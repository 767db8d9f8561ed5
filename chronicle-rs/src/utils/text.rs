//! Text processing utilities.

use regex::Regex;
use std::sync::OnceLock;

static WHITESPACE_RE: OnceLock<Regex> = OnceLock::new();

fn whitespace_re() -> &'static Regex {
    WHITESPACE_RE.get_or_init(|| Regex::new(r"\s+").expect("static regex is valid"))
}

/// Average characters per token used for size budgeting.
pub const CHARS_PER_TOKEN: usize = 4;

/// Rough token count: one token per [`CHARS_PER_TOKEN`] characters, rounded up.
pub fn estimate_tokens(s: &str) -> usize {
    s.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Collapse whitespace runs to single spaces and trim.
pub fn normalize_whitespace(s: &str) -> String {
    whitespace_re().replace_all(s, " ").trim().to_string()
}

/// Truncate `s` to at most `max_len` characters, ending in `"..."` when cut.
/// Counts `char`s, so multi-byte content is never split mid-character.
pub fn truncate_with_ellipsis(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    if max_len <= 3 {
        return ".".repeat(max_len);
    }

    let byte_offset = s
        .char_indices()
        .nth(max_len - 3)
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    format!("{}...", &s[..byte_offset])
}

/// Return the trimmed text between `<tag>` and the next `</tag>`.
///
/// `None` when either delimiter is missing or the block is empty.
pub fn extract_tagged_block<'a>(s: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = s.find(&open)? + open.len();
    let end = s[start..].find(&close)? + start;
    let inner = s[start..end].trim();
    (!inner.is_empty()).then_some(inner)
}

/// Extract the first JSON object or array from a model response.
///
/// Tries a ```` ```json ```` fence, then a plain ```` ``` ```` fence, then the
/// outermost `{...}` and finally the outermost `[...]`.
pub fn extract_json_from_response(s: &str) -> Option<&str> {
    extract_fenced_block(s, "```json")
        .or_else(|| extract_fenced_block(s, "```"))
        .or_else(|| outermost(s, '{', '}'))
        .or_else(|| outermost(s, '[', ']'))
}

fn outermost(s: &str, open: char, close: char) -> Option<&str> {
    let start = s.find(open)?;
    let end = s.rfind(close)?;
    (end > start).then(|| &s[start..=end])
}

fn extract_fenced_block<'a>(s: &'a str, fence: &str) -> Option<&'a str> {
    let after_fence = s.find(fence)? + fence.len();
    let content_start = after_fence + s[after_fence..].find('\n')? + 1;
    let close = s[content_start..].find("```")?;
    let content = s[content_start..content_start + close].trim();
    (!content.is_empty()).then_some(content)
}
