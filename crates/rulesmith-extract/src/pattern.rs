//! Declarative pattern library and the pure pattern extractor.
//!
//! The library is an explicit immutable value built once at startup and
//! passed into the extractor by reference; there is no hidden global state.
//! Malformed custom pattern definitions are rejected when the library is
//! built, never during extraction.

use regex::Regex;
use rulesmith_spec::{
    CanonicalSpec, EndpointDescriptor, EntityDescriptor, FieldDescriptor, HttpMethod, Provenance,
    RuleKind, ValidationRule,
};
use serde::{Deserialize, Serialize};
use tracing::trace;

// ============================================================================
// Pattern Model
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternCategory {
    Type,
    SemanticName,
    Structural,
    EndpointMethod,
    DomainKeyword,
}

enum Emit {
    Builtin(fn(&EntityDescriptor, &FieldDescriptor) -> (RuleKind, String, String)),
    /// Custom patterns carry templates; `{entity}` and `{field}` expand.
    Template {
        kind: RuleKind,
        condition: String,
        message: String,
    },
}

pub struct FieldPattern {
    name: String,
    category: PatternCategory,
    confidence: f64,
    name_regex: Option<Regex>,
    description_regex: Option<Regex>,
    type_one_of: Option<&'static [&'static str]>,
    type_equals: Option<String>,
    structural: Option<fn(&FieldDescriptor) -> bool>,
    emit: Emit,
}

impl FieldPattern {
    fn builtin(
        name: &str,
        category: PatternCategory,
        confidence: f64,
        emit: fn(&EntityDescriptor, &FieldDescriptor) -> (RuleKind, String, String),
    ) -> Self {
        Self {
            name: name.to_string(),
            category,
            confidence,
            name_regex: None,
            description_regex: None,
            type_one_of: None,
            type_equals: None,
            structural: None,
            emit: Emit::Builtin(emit),
        }
    }

    fn named(mut self, raw: &str) -> Self {
        self.name_regex = Some(Regex::new(raw).expect("builtin pattern regex"));
        self
    }

    fn described(mut self, raw: &str) -> Self {
        self.description_regex = Some(Regex::new(raw).expect("builtin pattern regex"));
        self
    }

    fn typed(mut self, types: &'static [&'static str]) -> Self {
        self.type_one_of = Some(types);
        self
    }

    fn when(mut self, predicate: fn(&FieldDescriptor) -> bool) -> Self {
        self.structural = Some(predicate);
        self
    }

    fn matches(&self, field: &FieldDescriptor) -> bool {
        if let Some(regex) = &self.name_regex {
            if !regex.is_match(&field.name) {
                return false;
            }
        }
        if let Some(regex) = &self.description_regex {
            match &field.description {
                Some(description) if regex.is_match(description) => {}
                _ => return false,
            }
        }
        if let Some(types) = self.type_one_of {
            if !types.contains(&field.field_type.to_ascii_lowercase().as_str()) {
                return false;
            }
        }
        if let Some(expected) = &self.type_equals {
            if !field.field_type.eq_ignore_ascii_case(expected) {
                return false;
            }
        }
        if let Some(predicate) = self.structural {
            if !predicate(field) {
                return false;
            }
        }
        true
    }

    fn emit(&self, entity: &EntityDescriptor, field: &FieldDescriptor) -> ValidationRule {
        let (kind, condition, message) = match &self.emit {
            Emit::Builtin(build) => build(entity, field),
            Emit::Template {
                kind,
                condition,
                message,
            } => {
                let expand = |template: &str| {
                    template
                        .replace("{entity}", &entity.name)
                        .replace("{field}", &field.name)
                };
                (*kind, expand(condition), expand(message))
            }
        };
        ValidationRule::new(
            &entity.name,
            &field.name,
            kind,
            condition,
            message,
            self.confidence,
            Provenance::Pattern,
        )
    }
}

struct EndpointPattern {
    name: String,
    confidence: f64,
    methods: &'static [HttpMethod],
    path_regex: Option<Regex>,
    attribute: &'static str,
    emit: fn(&EndpointDescriptor, &str) -> (RuleKind, String, String),
}

impl EndpointPattern {
    fn matches(&self, endpoint: &EndpointDescriptor) -> bool {
        if !self.methods.contains(&endpoint.method) {
            return false;
        }
        match &self.path_regex {
            Some(regex) => regex.is_match(&endpoint.path),
            None => true,
        }
    }
}

// ============================================================================
// Custom Pattern Definitions
// ============================================================================

/// A declarative, serializable pattern definition supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternDef {
    pub name: String,
    pub kind: String,
    pub confidence: f64,
    #[serde(default)]
    pub field_name_regex: Option<String>,
    #[serde(default)]
    pub field_type: Option<String>,
    #[serde(default)]
    pub description_regex: Option<String>,
    pub condition: String,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("pattern '{name}': invalid regex: {source}")]
    Regex {
        name: String,
        source: regex::Error,
    },
    #[error("pattern '{name}': unknown rule kind '{kind}'")]
    UnknownKind { name: String, kind: String },
    #[error("pattern '{name}': confidence {confidence} outside [0, 1]")]
    Confidence { name: String, confidence: f64 },
    #[error("pattern '{name}': no predicate (name regex, type, or description regex)")]
    NoPredicate { name: String },
}

impl PatternDef {
    fn compile(self) -> Result<FieldPattern, PatternError> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(PatternError::Confidence {
                name: self.name,
                confidence: self.confidence,
            });
        }
        let kind = RuleKind::parse(&self.kind).map_err(|_| PatternError::UnknownKind {
            name: self.name.clone(),
            kind: self.kind.clone(),
        })?;
        if self.field_name_regex.is_none()
            && self.field_type.is_none()
            && self.description_regex.is_none()
        {
            return Err(PatternError::NoPredicate { name: self.name });
        }

        let compile = |raw: &str, name: &str| {
            Regex::new(raw).map_err(|source| PatternError::Regex {
                name: name.to_string(),
                source,
            })
        };
        let name_regex = match &self.field_name_regex {
            Some(raw) => Some(compile(raw, &self.name)?),
            None => None,
        };
        let description_regex = match &self.description_regex {
            Some(raw) => Some(compile(raw, &self.name)?),
            None => None,
        };

        Ok(FieldPattern {
            name: self.name,
            category: PatternCategory::SemanticName,
            confidence: self.confidence,
            name_regex,
            description_regex,
            type_one_of: None,
            type_equals: self.field_type,
            structural: None,
            emit: Emit::Template {
                kind,
                condition: self.condition,
                message: self.message,
            },
        })
    }
}

// ============================================================================
// Library
// ============================================================================

pub struct PatternLibrary {
    field_patterns: Vec<FieldPattern>,
    endpoint_patterns: Vec<EndpointPattern>,
}

fn path_re(raw: &str) -> Option<Regex> {
    Some(Regex::new(raw).expect("builtin pattern regex"))
}

impl PatternLibrary {
    /// The built-in library: type-based, semantic-name, structural,
    /// endpoint-method, and domain-keyword patterns.
    pub fn standard() -> Self {
        use PatternCategory::*;

        let field_patterns = vec![
            // ---- type-based ------------------------------------------------
            FieldPattern::builtin("integer-type", Type, 0.93, |e, f| (
                RuleKind::Format,
                format!("typeof({}) == integer", f.name),
                format!("{}.{} must be an integer", e.name, f.name),
            ))
            .typed(&["integer", "int", "long", "i32", "i64"]),
            FieldPattern::builtin("float-type", Type, 0.93, |e, f| (
                RuleKind::Format,
                format!("typeof({}) == number", f.name),
                format!("{}.{} must be numeric", e.name, f.name),
            ))
            .typed(&["float", "double", "decimal", "number", "f32", "f64"]),
            FieldPattern::builtin("boolean-type", Type, 0.93, |e, f| (
                RuleKind::Format,
                format!("typeof({}) == boolean", f.name),
                format!("{}.{} must be a boolean", e.name, f.name),
            ))
            .typed(&["boolean", "bool"]),
            FieldPattern::builtin("date-type", Type, 0.92, |e, f| (
                RuleKind::Format,
                format!("iso8601({})", f.name),
                format!("{}.{} must be an ISO-8601 date", e.name, f.name),
            ))
            .typed(&["date", "datetime", "timestamp"]),
            FieldPattern::builtin("uuid-type", Type, 0.95, |e, f| (
                RuleKind::Format,
                format!("uuid({})", f.name),
                format!("{}.{} must be a valid UUID", e.name, f.name),
            ))
            .typed(&["uuid", "guid"]),
            // ---- semantic names --------------------------------------------
            FieldPattern::builtin("email-field", SemanticName, 0.97, |e, f| (
                RuleKind::Format,
                format!("email({})", f.name),
                format!("{}.{} must be a valid email address", e.name, f.name),
            ))
            .named(r"(?i)(^|_)e?mail(_address)?$"),
            FieldPattern::builtin("url-field", SemanticName, 0.90, |e, f| (
                RuleKind::Format,
                format!("url({})", f.name),
                format!("{}.{} must be a valid URL", e.name, f.name),
            ))
            .named(r"(?i)(^|_)(url|link|website)$"),
            FieldPattern::builtin("phone-field", SemanticName, 0.88, |e, f| (
                RuleKind::Format,
                format!("phone({})", f.name),
                format!("{}.{} must be a valid phone number", e.name, f.name),
            ))
            .named(r"(?i)(^|_)(phone|mobile|tel)(_number)?$"),
            FieldPattern::builtin("money-field", SemanticName, 0.92, |e, f| (
                RuleKind::Range,
                format!("{} >= 0", f.name),
                format!("{}.{} cannot be negative", e.name, f.name),
            ))
            .named(r"(?i)(^|_)(price|amount|total|cost|fee)$"),
            FieldPattern::builtin("stock-field", SemanticName, 0.90, |e, f| (
                RuleKind::StockConstraint,
                format!("{} >= 0", f.name),
                format!("{}.{} cannot go below zero", e.name, f.name),
            ))
            .named(r"(?i)(^|_)(stock|quantity|inventory)(_count|_level)?$"),
            FieldPattern::builtin("percent-field", SemanticName, 0.90, |e, f| (
                RuleKind::Range,
                format!("{} >= 0 AND {} <= 100", f.name, f.name),
                format!("{}.{} must be between 0 and 100", e.name, f.name),
            ))
            .named(r"(?i)percent"),
            FieldPattern::builtin("username-field", SemanticName, 0.87, |e, f| (
                RuleKind::Format,
                format!("len({}) >= 3", f.name),
                format!("{}.{} must be at least 3 characters", e.name, f.name),
            ))
            .named(r"(?i)(^|_)user_?name$"),
            FieldPattern::builtin("password-field", SemanticName, 0.90, |e, f| (
                RuleKind::Format,
                format!("len({}) >= 8", f.name),
                format!("{}.{} must be at least 8 characters", e.name, f.name),
            ))
            .named(r"(?i)password"),
            FieldPattern::builtin("timestamp-field", SemanticName, 0.89, |e, f| (
                RuleKind::Format,
                format!("iso8601({})", f.name),
                format!("{}.{} must be an ISO-8601 timestamp", e.name, f.name),
            ))
            .named(r"(?i)(^|_)(created|updated|deleted)_at$"),
            FieldPattern::builtin("identifier-field", SemanticName, 0.95, |e, f| (
                RuleKind::Uniqueness,
                format!("unique({})", f.name),
                format!("{}.{} must be unique", e.name, f.name),
            ))
            .named(r"^id$"),
            // ---- structural ------------------------------------------------
            FieldPattern::builtin("required-flag", Structural, 0.99, |e, f| (
                RuleKind::Presence,
                format!("{} != null", f.name),
                format!("{}.{} is required", e.name, f.name),
            ))
            .when(|f| f.required),
            FieldPattern::builtin("unique-flag", Structural, 0.99, |e, f| (
                RuleKind::Uniqueness,
                format!("unique({})", f.name),
                format!("{}.{} must be unique", e.name, f.name),
            ))
            .when(|f| f.unique),
            FieldPattern::builtin("declared-bounds", Structural, 0.98, |e, f| {
                let mut bounds = Vec::new();
                if let Some(min) = f.min {
                    bounds.push(format!("{} >= {}", f.name, min));
                }
                if let Some(max) = f.max {
                    bounds.push(format!("{} <= {}", f.name, max));
                }
                if let Some(max_length) = f.max_length {
                    bounds.push(format!("len({}) <= {}", f.name, max_length));
                }
                (
                    RuleKind::Range,
                    bounds.join(" AND "),
                    format!("{}.{} is out of bounds", e.name, f.name),
                )
            })
            .when(|f| f.min.is_some() || f.max.is_some() || f.max_length.is_some()),
            FieldPattern::builtin("declared-enum", Structural, 0.98, |e, f| (
                RuleKind::Format,
                format!("{} IN [{}]", f.name, f.allowed_values.join(", ")),
                format!("{}.{} must be one of the allowed values", e.name, f.name),
            ))
            .when(|f| !f.allowed_values.is_empty()),
            // ---- domain keywords -------------------------------------------
            FieldPattern::builtin("positive-keyword", DomainKeyword, 0.87, |e, f| (
                RuleKind::Range,
                format!("{} > 0", f.name),
                format!("{}.{} must be positive", e.name, f.name),
            ))
            .described(r"(?i)positive|greater than zero"),
            FieldPattern::builtin("non-negative-keyword", DomainKeyword, 0.86, |e, f| (
                RuleKind::Range,
                format!("{} >= 0", f.name),
                format!("{}.{} cannot be negative", e.name, f.name),
            ))
            .described(r"(?i)non-negative|at least 0|cannot be negative"),
            FieldPattern::builtin("unique-keyword", DomainKeyword, 0.90, |e, f| (
                RuleKind::Uniqueness,
                format!("unique({})", f.name),
                format!("{}.{} must be unique", e.name, f.name),
            ))
            .described(r"(?i)\bunique\b|no duplicates"),
            FieldPattern::builtin("required-keyword", DomainKeyword, 0.90, |e, f| (
                RuleKind::Presence,
                format!("{} != null", f.name),
                format!("{}.{} is required", e.name, f.name),
            ))
            .described(r"(?i)\brequired\b|must be provided|mandatory"),
            FieldPattern::builtin("stock-keyword", DomainKeyword, 0.85, |e, f| (
                RuleKind::StockConstraint,
                format!("{} >= 0", f.name),
                format!("{}.{} must reflect available stock", e.name, f.name),
            ))
            .described(r"(?i)in stock|inventory|available quantity"),
        ];

        let endpoint_patterns = vec![
            EndpointPattern {
                name: "create-update-body".to_string(),
                confidence: 0.90,
                methods: &[HttpMethod::Post, HttpMethod::Put],
                path_regex: None,
                attribute: "request",
                emit: |_, entity| {
                    (
                        RuleKind::Presence,
                        format!("request body includes required fields of {entity}"),
                        format!("request body must include all required {entity} fields"),
                    )
                },
            },
            EndpointPattern {
                name: "partial-update-body".to_string(),
                confidence: 0.86,
                methods: &[HttpMethod::Patch],
                path_regex: None,
                attribute: "request",
                emit: |_, entity| {
                    (
                        RuleKind::Presence,
                        format!("request body includes at least one {entity} field"),
                        format!("a {entity} update must change at least one field"),
                    )
                },
            },
            EndpointPattern {
                name: "delete-guard".to_string(),
                confidence: 0.85,
                methods: &[HttpMethod::Delete],
                path_regex: None,
                attribute: "request",
                emit: |_, entity| {
                    (
                        RuleKind::WorkflowConstraint,
                        format!("{entity} exists and is deletable"),
                        format!("{entity} must exist and be deletable"),
                    )
                },
            },
            EndpointPattern {
                name: "path-identifier".to_string(),
                confidence: 0.88,
                methods: &[HttpMethod::Get, HttpMethod::Put, HttpMethod::Patch, HttpMethod::Delete],
                path_regex: path_re(r"\{id\}|:id\b"),
                attribute: "request",
                emit: |_, entity| {
                    (
                        RuleKind::Format,
                        "valid_identifier(path.id)".to_string(),
                        format!("the {entity} identifier in the path must be valid"),
                    )
                },
            },
        ];

        Self {
            field_patterns,
            endpoint_patterns,
        }
    }

    /// The standard library plus caller-supplied definitions. Malformed
    /// definitions fail here, never during extraction.
    pub fn with_custom(defs: Vec<PatternDef>) -> Result<Self, PatternError> {
        let mut library = Self::standard();
        for def in defs {
            library.field_patterns.push(def.compile()?);
        }
        Ok(library)
    }

}

// ============================================================================
// Extractor
// ============================================================================

/// Stateless matcher over the library. Pure: same spec in, same rules out,
/// and it cannot fail.
pub struct PatternExtractor<'a> {
    library: &'a PatternLibrary,
}

impl<'a> PatternExtractor<'a> {
    pub fn new(library: &'a PatternLibrary) -> Self {
        Self { library }
    }

    pub fn extract(&self, spec: &CanonicalSpec) -> Vec<ValidationRule> {
        let mut rules = Vec::new();

        for entity in &spec.entities {
            for field in &entity.fields {
                for pattern in &self.library.field_patterns {
                    if pattern.matches(field) {
                        rules.push(pattern.emit(entity, field));
                    }
                }
            }
        }

        for endpoint in &spec.endpoints {
            let Some(entity) = endpoint.entity.as_deref() else {
                continue;
            };
            for pattern in &self.library.endpoint_patterns {
                if pattern.matches(endpoint) {
                    trace!(pattern = %pattern.name, path = %endpoint.path, "endpoint pattern matched");
                    let (kind, condition, message) = (pattern.emit)(endpoint, entity);
                    rules.push(ValidationRule::new(
                        entity,
                        pattern.attribute,
                        kind,
                        condition,
                        message,
                        pattern.confidence,
                        Provenance::Pattern,
                    ));
                }
            }
        }

        rules
    }
}

// ============================================================================
// Tests
// ============================================================================
