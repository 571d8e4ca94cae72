//! Validation rule value objects.

use serde::{Deserialize, Serialize};

// ============================================================================
// Confidence
// ============================================================================

/// Confidence attached to a rule, clamped to [0, 1] at construction.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Confidence(f64);

impl Confidence {
    pub fn new(value: f64) -> Self {
        Self(value.clamp(0.0, 1.0))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl Default for Confidence {
    fn default() -> Self {
        Self(0.5)
    }
}

// ============================================================================
// Rule Kind
// ============================================================================

/// The closed set of rule kinds the code generator understands.
///
/// The source of a rule may describe its kind loosely ("unique", "enum",
/// "foreign key"); `RuleKind::parse` maps those spellings onto this set so
/// the merge key and the generator's dispatch are exhaustively checked.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleKind {
    Presence,
    Format,
    Range,
    Uniqueness,
    Relationship,
    StatusTransition,
    WorkflowConstraint,
    StockConstraint,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Presence => "PRESENCE",
            RuleKind::Format => "FORMAT",
            RuleKind::Range => "RANGE",
            RuleKind::Uniqueness => "UNIQUENESS",
            RuleKind::Relationship => "RELATIONSHIP",
            RuleKind::StatusTransition => "STATUS_TRANSITION",
            RuleKind::WorkflowConstraint => "WORKFLOW_CONSTRAINT",
            RuleKind::StockConstraint => "STOCK_CONSTRAINT",
        }
    }

    /// Parse a loosely spelled kind from an external source.
    pub fn parse(raw: &str) -> Result<Self, RuleKindParseError> {
        let normalized = raw.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        let kind = match normalized.as_str() {
            "PRESENCE" | "REQUIRED" | "NOT_NULL" => RuleKind::Presence,
            "FORMAT" | "TYPE" | "ENUM" | "PATTERN" => RuleKind::Format,
            "RANGE" | "BOUNDS" | "LENGTH" | "MIN_MAX" => RuleKind::Range,
            "UNIQUENESS" | "UNIQUE" => RuleKind::Uniqueness,
            "RELATIONSHIP" | "REFERENCE" | "FOREIGN_KEY" => RuleKind::Relationship,
            "STATUS_TRANSITION" | "STATE_TRANSITION" => RuleKind::StatusTransition,
            "WORKFLOW_CONSTRAINT" | "WORKFLOW" | "BUSINESS_RULE" | "CASCADE" => {
                RuleKind::WorkflowConstraint
            }
            "STOCK_CONSTRAINT" | "STOCK" | "INVENTORY" => RuleKind::StockConstraint,
            _ => return Err(RuleKindParseError(raw.to_string())),
        };
        Ok(kind)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown rule kind: {0}")]
pub struct RuleKindParseError(pub String);

// ============================================================================
// Provenance
// ============================================================================

/// Which extraction phase produced a rule. Used to break merge conflicts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Provenance {
    /// Stated explicitly by the normalized document itself.
    NormalizedDirect,
    /// Matched by the declarative pattern library.
    Pattern,
    /// Inferred from the relationship graph.
    Graph,
    /// Returned by the external language-model service.
    Model,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::NormalizedDirect => "NORMALIZED_DIRECT",
            Provenance::Pattern => "PATTERN",
            Provenance::Graph => "GRAPH",
            Provenance::Model => "MODEL",
        }
    }

    /// Default priority ordering, most explicit evidence first.
    pub fn default_priority() -> [Provenance; 4] {
        [
            Provenance::NormalizedDirect,
            Provenance::Pattern,
            Provenance::Graph,
            Provenance::Model,
        ]
    }
}

// ============================================================================
// Validation Rule
// ============================================================================

/// A single extracted constraint on an entity attribute.
///
/// For endpoint-level rules the attribute is a synthetic scope
/// (`request` / `response`) rather than a field name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    pub entity: String,
    pub attribute: String,
    pub kind: RuleKind,
    pub condition: String,
    pub message: String,
    pub confidence: Confidence,
    pub provenance: Provenance,
}

impl ValidationRule {
    pub fn new(
        entity: impl Into<String>,
        attribute: impl Into<String>,
        kind: RuleKind,
        condition: impl Into<String>,
        message: impl Into<String>,
        confidence: f64,
        provenance: Provenance,
    ) -> Self {
        Self {
            entity: entity.into(),
            attribute: attribute.into(),
            kind,
            condition: condition.into(),
            message: message.into(),
            confidence: Confidence::new(confidence),
            provenance,
        }
    }

    /// The deduplication key: two rules with the same key describe
    /// "the same" constraint and the merge engine keeps at most one.
    pub fn key(&self) -> RuleKey {
        RuleKey {
            entity: self.entity.clone(),
            attribute: self.attribute.clone(),
            kind: self.kind,
        }
    }
}

/// `(entity, attribute, kind)`, the merge engine's grouping key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleKey {
    pub entity: String,
    pub attribute: String,
    pub kind: RuleKind,
}
