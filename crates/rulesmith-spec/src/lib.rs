//! Canonical specification model for rulesmith.
//!
//! Everything downstream of normalization works against the types in this
//! crate: a `CanonicalSpec` describing entities, fields, relationships and
//! endpoints, and the `ValidationRule` value objects the extractors emit.
//!
//! ## Lifecycle
//!
//! A `CanonicalSpec` is produced once per pipeline run by the normalizer and
//! is immutable afterwards; every extractor reads the same instance. Rules
//! are immutable value objects created by exactly one extractor; only the
//! merge engine decides which survive.

pub mod rule;
pub mod spec;

pub use rule::{Confidence, Provenance, RuleKey, RuleKind, RuleKindParseError, ValidationRule};
pub use spec::{
    CanonicalSpec, Cardinality, EndpointDescriptor, EntityDescriptor, FieldDescriptor, HttpMethod,
    RelationshipDescriptor, ShapeViolation, SpecShapeError,
};
