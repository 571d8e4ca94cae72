//! Relationship graph and graph-based constraint inference.
//!
//! The third extraction phase. [`graph::RelationshipGraph`] turns the
//! canonical spec's entities and relationships into an immutable directed
//! graph; [`infer::ConstraintInference`] walks it and derives structural
//! rules no single field declaration states.

pub mod graph;
pub mod infer;

pub use graph::{EntityNode, RelationEdge, RelationshipGraph};
pub use infer::ConstraintInference;
