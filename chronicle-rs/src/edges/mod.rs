//! Edge types for the knowledge graph.
//!
//! - [`ProvenanceEdge`]: episode → statement support links
//! - [`Triple`]: a statement with its subject, predicate and object entities
//!
//! [`ProvenanceEdge`]: provenance::ProvenanceEdge
//! [`Triple`]: triple::Triple

pub mod provenance;
pub mod triple;

pub use provenance::ProvenanceEdge;
pub use triple::Triple;
