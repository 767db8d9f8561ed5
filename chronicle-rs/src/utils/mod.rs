//! Shared utilities.
//!
//! Includes:
//! - Content hashing (SHA-256 hex of chunk text)
//! - Text helpers (token estimates, truncation, delimited-block extraction)
//! - Vector similarity
//! - Date/time formatting for prompts

pub mod datetime;
pub mod hash;
pub mod similarity;
pub mod text;

pub use datetime::format_reference_time;
pub use hash::content_hash;
pub use similarity::{cosine_similarity, rank_by_similarity};
pub use text::{
    estimate_tokens, extract_json_from_response, extract_tagged_block, normalize_whitespace,
    truncate_with_ellipsis,
};
