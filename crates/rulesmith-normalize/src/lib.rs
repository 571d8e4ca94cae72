//! Specification normalizer.
//!
//! Converts an arbitrary input document into a [`CanonicalSpec`]. Already
//! canonical input (structured JSON) short-circuits the model entirely;
//! free-form text goes through the language model with a bounded number of
//! retries, and a caller-supplied fallback document is used when every
//! attempt produces structurally invalid output.
//!
//! The normalizer also owns the `NORMALIZED_DIRECT` rule stream: rules the
//! canonical document states explicitly (required flags, uniqueness,
//! numeric bounds, enumerations) carry full confidence and outrank every
//! inferred source in the merge.

use rulesmith_llm::{call_with_retry, strip_code_fences, ModelClient, ModelRequest, RetryPolicy};
use rulesmith_spec::{
    CanonicalSpec, Provenance, RuleKind, ShapeViolation, SpecShapeError, ValidationRule,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

// ============================================================================
// Input & Errors
// ============================================================================

/// The raw specification handed over by the upstream reader.
#[derive(Debug, Clone)]
pub enum RawSpec {
    /// Structured document already claiming the canonical shape.
    Canonical(Value),
    /// Free-form (markdown-like) prose.
    Text(String),
}

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("input is not valid JSON: {0}")]
    Parse(String),
    #[error(transparent)]
    Shape(#[from] SpecShapeError),
    #[error("normalization exhausted after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

#[derive(Clone)]
pub struct NormalizerOptions {
    /// Additional model attempts after the first one fails validation.
    pub max_retries: u32,
    /// Returned (with a warning) when every attempt fails.
    pub fallback: Option<CanonicalSpec>,
    /// Transient-failure policy for the underlying model calls.
    pub retry: RetryPolicy,
}

impl Default for NormalizerOptions {
    fn default() -> Self {
        Self {
            max_retries: 2,
            fallback: None,
            retry: RetryPolicy::default(),
        }
    }
}

// ============================================================================
// Normalizer
// ============================================================================

pub struct Normalizer {
    client: Arc<dyn ModelClient>,
    options: NormalizerOptions,
}

const NORMALIZE_SYSTEM: &str = r#"
You convert software specifications into a canonical JSON document with this
shape: {"entities": [{"name", "fields": [{"name", "type", "required",
"unique", "min", "max", "max_length", "allowed_values", "description"}],
"state_field", "state_values"}], "relationships": [{"source", "target",
"source_cardinality": "one"|"many", "target_cardinality", "fk_field",
"required", "cascade_delete"}], "endpoints": [{"method", "path", "entity",
"request_fields", "response_fields"}]}.

Extract every entity, field, relationship and endpoint the specification
describes. Omit optional keys you have no evidence for. Respond with the
JSON document only.
"#;

const CORRECTION_NOTE: &str = "\n\nYour previous answer was not a structurally \
valid canonical document. Respond with plain JSON only: at least one entity, \
every entity named with at least one field, every field named and typed.";

impl Normalizer {
    pub fn new(client: Arc<dyn ModelClient>, options: NormalizerOptions) -> Self {
        Self { client, options }
    }

    /// Convert a raw specification into the canonical model.
    ///
    /// This is the only pipeline stage allowed to fail the whole run, and
    /// only when every attempt is invalid and no fallback is configured.
    pub async fn normalize(&self, raw: &RawSpec) -> Result<CanonicalSpec, NormalizeError> {
        match raw {
            RawSpec::Canonical(value) => match Self::parse_canonical(value) {
                Ok(spec) => Ok(spec),
                Err(error) => self.fallback_or(error),
            },
            RawSpec::Text(text) => self.normalize_text(text).await,
        }
    }

    async fn normalize_text(&self, text: &str) -> Result<CanonicalSpec, NormalizeError> {
        // Structured input arriving as a string needs no model call.
        if let Ok(value) = serde_json::from_str::<Value>(text) {
            debug!("input text is already structured, skipping model call");
            return match Self::parse_canonical(&value) {
                Ok(spec) => Ok(spec),
                Err(error) => self.fallback_or(error),
            };
        }

        let attempts = 1 + self.options.max_retries;
        let mut last_error = String::new();

        for attempt in 0..attempts {
            let mut system = NORMALIZE_SYSTEM.to_string();
            if attempt > 0 {
                system.push_str(CORRECTION_NOTE);
            }
            let request = ModelRequest::extraction(system, text.to_string(), canonical_schema());

            match call_with_retry(self.client.as_ref(), request, &self.options.retry).await {
                Ok(response) => {
                    match Self::parse_model_output(&response.content) {
                        Ok(spec) => return Ok(spec),
                        Err(error) => {
                            debug!(attempt, %error, "model output failed canonical validation");
                            last_error = error.to_string();
                        }
                    }
                }
                Err(error) => {
                    debug!(attempt, %error, "normalization call failed");
                    last_error = error.to_string();
                }
            }
        }

        self.fallback_or(NormalizeError::Exhausted {
            attempts,
            last_error,
        })
    }

    /// Caller-supplied canonical documents may legitimately be empty; the
    /// at-least-one-entity requirement applies to model output only.
    fn parse_canonical(value: &Value) -> Result<CanonicalSpec, NormalizeError> {
        let spec = CanonicalSpec::from_json_value(value)
            .map_err(|e| NormalizeError::Parse(e.to_string()))?;
        let violations: Vec<ShapeViolation> = spec
            .shape_violations()
            .into_iter()
            .filter(|v| !matches!(v, ShapeViolation::NoEntities))
            .collect();
        if violations.is_empty() {
            Ok(spec)
        } else {
            Err(SpecShapeError { violations }.into())
        }
    }

    fn parse_model_output(content: &str) -> Result<CanonicalSpec, NormalizeError> {
        let body = strip_code_fences(content);
        let value: Value =
            serde_json::from_str(body).map_err(|e| NormalizeError::Parse(e.to_string()))?;
        let spec = CanonicalSpec::from_json_value(&value)
            .map_err(|e| NormalizeError::Parse(e.to_string()))?;
        spec.validate_shape()?;
        Ok(spec)
    }

    fn fallback_or(&self, error: NormalizeError) -> Result<CanonicalSpec, NormalizeError> {
        match &self.options.fallback {
            Some(fallback) => {
                warn!(%error, "normalization failed, using configured fallback document");
                Ok(fallback.clone())
            }
            None => Err(error),
        }
    }
}

// ============================================================================
// Direct Rules
// ============================================================================

/// Rules the canonical document states explicitly, provenance
/// `NORMALIZED_DIRECT`. Full confidence: this is the spec talking, not an
/// inference.
pub fn direct_rules(spec: &CanonicalSpec) -> Vec<ValidationRule> {
    let mut rules = Vec::new();

    for entity in &spec.entities {
        for field in &entity.fields {
            if field.required {
                rules.push(ValidationRule::new(
                    &entity.name,
                    &field.name,
                    RuleKind::Presence,
                    format!("{} != null", field.name),
                    format!("{}.{} is required", entity.name, field.name),
                    1.0,
                    Provenance::NormalizedDirect,
                ));
            }
            if field.unique {
                rules.push(ValidationRule::new(
                    &entity.name,
                    &field.name,
                    RuleKind::Uniqueness,
                    format!("unique({})", field.name),
                    format!("{}.{} must be unique", entity.name, field.name),
                    1.0,
                    Provenance::NormalizedDirect,
                ));
            }

            let mut bounds = Vec::new();
            if let Some(min) = field.min {
                bounds.push(format!("{} >= {}", field.name, min));
            }
            if let Some(max) = field.max {
                bounds.push(format!("{} <= {}", field.name, max));
            }
            if let Some(max_length) = field.max_length {
                bounds.push(format!("len({}) <= {}", field.name, max_length));
            }
            if !bounds.is_empty() {
                rules.push(ValidationRule::new(
                    &entity.name,
                    &field.name,
                    RuleKind::Range,
                    bounds.join(" AND "),
                    format!("{}.{} is out of bounds", entity.name, field.name),
                    1.0,
                    Provenance::NormalizedDirect,
                ));
            }

            if !field.allowed_values.is_empty() {
                rules.push(ValidationRule::new(
                    &entity.name,
                    &field.name,
                    RuleKind::Format,
                    format!("{} IN [{}]", field.name, field.allowed_values.join(", ")),
                    format!(
                        "{}.{} must be one of the allowed values",
                        entity.name, field.name
                    ),
                    1.0,
                    Provenance::NormalizedDirect,
                ));
            }
        }

        if let (Some(state_field), false) = (&entity.state_field, entity.state_values.is_empty()) {
            rules.push(ValidationRule::new(
                &entity.name,
                state_field,
                RuleKind::StatusTransition,
                format!("{} IN [{}]", state_field, entity.state_values.join(", ")),
                format!(
                    "{}.{} must stay within its declared lifecycle",
                    entity.name, state_field
                ),
                0.97,
                Provenance::NormalizedDirect,
            ));
        }
    }

    rules
}

/// JSON schema handed to providers that support JSON mode.
fn canonical_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "entities": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "fields": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "name": {"type": "string"},
                                    "type": {"type": "string"},
                                    "required": {"type": "boolean"},
                                    "unique": {"type": "boolean"},
                                    "min": {"type": "number"},
                                    "max": {"type": "number"},
                                    "max_length": {"type": "integer"},
                                    "allowed_values": {"type": "array", "items": {"type": "string"}}
                                },
                                "required": ["name", "type"]
                            }
                        },
                        "state_field": {"type": "string"},
                        "state_values": {"type": "array", "items": {"type": "string"}}
                    },
                    "required": ["name", "fields"]
                }
            },
            "relationships": {"type": "array"},
            "endpoints": {"type": "array"}
        },
        "required": ["entities"]
    })
}

// ============================================================================
// Tests
// ============================================================================
