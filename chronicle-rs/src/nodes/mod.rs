//! Node types for the knowledge graph.
//!
//! Three node types:
//! - [`EntityNode`]: named things (people, places, concepts, and predicates)
//! - [`EpisodicNode`]: ingested units (conversation turns, document chunks)
//! - [`StatementNode`]: factual statements linking a subject, predicate and object
//!
//! [`EntityNode`]: entity::EntityNode
//! [`EpisodicNode`]: episodic::EpisodicNode
//! [`StatementNode`]: statement::StatementNode

pub mod entity;
pub mod episodic;
pub mod statement;

pub use entity::EntityNode;
pub use episodic::{EpisodeType, EpisodicNode};
pub use statement::{Aspect, StatementNode};
