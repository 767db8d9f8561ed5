//! # chronicle-rs
//!
//! Ingestion core for a personal temporal knowledge graph: turns conversation
//! turns and documents into episodes, then keeps the statement graph built
//! from them deduplicated and current.
//!
//! ## Architecture
//!
//! - **Preprocessing**: chunking with stable hashes, version detection and a
//!   differential strategy per resubmission
//! - **Scoped invalidation**: only statements sourced from replaced content are retired
//! - **Resolution**: batched, LLM-adjudicated entity and statement deduplication
//!   with idempotent commit
//! - **Credit ledger**: reserve / refund / reconcile over compare-and-set

pub mod edges;
pub mod errors;
pub mod nodes;
pub mod types;

pub mod driver;
pub mod ledger;
pub mod llm_client;

pub mod preprocess;
pub mod prompts;
pub mod resolution;

pub mod pipeline;
pub mod utils;

pub use errors::{ChronicleError, Result};
