//! Rule extractors.
//!
//! Two of the three extraction phases live here: the deterministic
//! [`pattern::PatternExtractor`], a pure matcher over a declarative pattern
//! library, and the [`model::ModelExtractor`], which batches structured
//! extraction requests to the external language-model service. The graph
//! phase lives in `rulesmith-graph`.

pub mod model;
pub mod pattern;

pub use model::{ModelExtractor, RuleCandidate};
pub use pattern::{PatternCategory, PatternDef, PatternError, PatternExtractor, PatternLibrary};
