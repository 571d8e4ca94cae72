//! Canonical spec document: entities, fields, relationships, endpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Descriptors
// ============================================================================

/// One/many multiplicity on a relationship side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    One,
    Many,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// A single field of an entity as the normalizer produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub max_length: Option<u64>,
    #[serde(default)]
    pub allowed_values: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            required: false,
            unique: false,
            min: None,
            max: None,
            max_length: None,
            allowed_values: Vec::new(),
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
    /// Explicit lifecycle attribute, when the document names one.
    #[serde(default)]
    pub state_field: Option<String>,
    #[serde(default)]
    pub state_values: Vec<String>,
}

impl EntityDescriptor {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        Self {
            name: name.into(),
            fields,
            state_field: None,
            state_values: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipDescriptor {
    pub source: String,
    pub target: String,
    pub source_cardinality: Cardinality,
    pub target_cardinality: Cardinality,
    /// Foreign-key field on the referencing (usually "many") side.
    pub fk_field: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub cascade_delete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub method: HttpMethod,
    pub path: String,
    /// Entity this endpoint operates on, when known.
    #[serde(default)]
    pub entity: Option<String>,
    #[serde(default)]
    pub request_fields: Vec<String>,
    #[serde(default)]
    pub response_fields: Vec<String>,
}

// ============================================================================
// Canonical Spec
// ============================================================================

/// The normalized specification. Built once per run, read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalSpec {
    #[serde(default)]
    pub entities: Vec<EntityDescriptor>,
    #[serde(default)]
    pub relationships: Vec<RelationshipDescriptor>,
    #[serde(default)]
    pub endpoints: Vec<EndpointDescriptor>,
}

/// Synthetic attributes endpoint-level rules may legally reference.
pub const ENDPOINT_SCOPES: [&str; 3] = ["request", "response", "request+response"];

impl CanonicalSpec {
    pub fn entity(&self, name: &str) -> Option<&EntityDescriptor> {
        self.entities.iter().find(|e| e.name == name)
    }

    pub fn has_entity(&self, name: &str) -> bool {
        self.entity(name).is_some()
    }

    /// Whether `attribute` is something a rule on `entity` may reference:
    /// a declared field, the lifecycle field, a foreign key named by a
    /// relationship touching the entity, or a synthetic endpoint scope.
    pub fn is_known_attribute(&self, entity: &str, attribute: &str) -> bool {
        if ENDPOINT_SCOPES.contains(&attribute) {
            return true;
        }
        let Some(descriptor) = self.entity(entity) else {
            return false;
        };
        if descriptor.field(attribute).is_some() {
            return true;
        }
        if descriptor.state_field.as_deref() == Some(attribute) {
            return true;
        }
        self.relationships
            .iter()
            .any(|r| (r.source == entity || r.target == entity) && r.fk_field == attribute)
    }

    /// Parse a canonical JSON document.
    pub fn from_json_value(value: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }

    /// Structural problems with this document, if any.
    ///
    /// An empty list means the document satisfies the canonical shape:
    /// at least one entity, every entity named with at least one field,
    /// every field named and typed.
    pub fn shape_violations(&self) -> Vec<ShapeViolation> {
        let mut violations = Vec::new();
        if self.entities.is_empty() {
            violations.push(ShapeViolation::NoEntities);
        }
        for (idx, entity) in self.entities.iter().enumerate() {
            if entity.name.trim().is_empty() {
                violations.push(ShapeViolation::UnnamedEntity { index: idx });
                continue;
            }
            if entity.fields.is_empty() {
                violations.push(ShapeViolation::EntityWithoutFields {
                    entity: entity.name.clone(),
                });
            }
            for field in &entity.fields {
                if field.name.trim().is_empty() {
                    violations.push(ShapeViolation::UnnamedField {
                        entity: entity.name.clone(),
                    });
                }
                if field.field_type.trim().is_empty() {
                    violations.push(ShapeViolation::UntypedField {
                        entity: entity.name.clone(),
                        field: field.name.clone(),
                    });
                }
            }
        }
        violations
    }

    /// Enforce the canonical shape, failing with all violations at once.
    pub fn validate_shape(&self) -> Result<(), SpecShapeError> {
        let violations = self.shape_violations();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(SpecShapeError { violations })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeViolation {
    NoEntities,
    UnnamedEntity { index: usize },
    EntityWithoutFields { entity: String },
    UnnamedField { entity: String },
    UntypedField { entity: String, field: String },
}

impl std::fmt::Display for ShapeViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShapeViolation::NoEntities => write!(f, "document contains no entities"),
            ShapeViolation::UnnamedEntity { index } => {
                write!(f, "entity at index {index} has no name")
            }
            ShapeViolation::EntityWithoutFields { entity } => {
                write!(f, "entity '{entity}' has no fields")
            }
            ShapeViolation::UnnamedField { entity } => {
                write!(f, "entity '{entity}' has an unnamed field")
            }
            ShapeViolation::UntypedField { entity, field } => {
                write!(f, "field '{entity}.{field}' has no type")
            }
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("canonical spec failed shape validation: {}", .violations.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("; "))]
pub struct SpecShapeError {
    pub violations: Vec<ShapeViolation>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user_order_spec() -> CanonicalSpec {
        CanonicalSpec {
            entities: vec![
                EntityDescriptor::new(
                    "User",
                    vec![
                        FieldDescriptor::new("id", "uuid").unique(),
                        FieldDescriptor::new("email", "string").required(),
                    ],
                ),
                EntityDescriptor::new(
                    "Order",
                    vec![
                        FieldDescriptor::new("id", "uuid").unique(),
                        FieldDescriptor::new("total", "float"),
                    ],
                ),
            ],
            relationships: vec![RelationshipDescriptor {
                source: "User".into(),
                target: "Order".into(),
                source_cardinality: Cardinality::One,
                target_cardinality: Cardinality::Many,
                fk_field: "user_id".into(),
                required: true,
                cascade_delete: false,
            }],
            endpoints: vec![],
        }
    }

    #[test]
    fn parses_canonical_json() {
        let value = json!({
            "entities": [
                {"name": "User", "fields": [
                    {"name": "email", "type": "string", "required": true}
                ]}
            ],
            "relationships": [],
            "endpoints": [
                {"method": "POST", "path": "/users", "entity": "User"}
            ]
        });
        let spec = CanonicalSpec::from_json_value(&value).unwrap();
        assert_eq!(spec.entities.len(), 1);
        assert!(spec.entities[0].fields[0].required);
        assert_eq!(spec.endpoints[0].method, HttpMethod::Post);
        assert!(spec.validate_shape().is_ok());
    }

    #[test]
    fn shape_violations_are_collected() {
        let spec = CanonicalSpec {
            entities: vec![
                EntityDescriptor::new("Ghost", vec![]),
                EntityDescriptor::new("Typed", vec![FieldDescriptor::new("x", "")]),
            ],
            ..Default::default()
        };
        let violations = spec.shape_violations();
        assert!(violations.contains(&ShapeViolation::EntityWithoutFields {
            entity: "Ghost".into()
        }));
        assert!(violations.contains(&ShapeViolation::UntypedField {
            entity: "Typed".into(),
            field: "x".into()
        }));
    }

    #[test]
    fn empty_document_reports_no_entities() {
        let spec = CanonicalSpec::default();
        assert_eq!(spec.shape_violations(), vec![ShapeViolation::NoEntities]);
    }

    #[test]
    fn fk_fields_count_as_known_attributes() {
        let spec = user_order_spec();
        assert!(spec.is_known_attribute("Order", "total"));
        assert!(spec.is_known_attribute("Order", "user_id"));
        assert!(spec.is_known_attribute("User", "user_id"));
        assert!(spec.is_known_attribute("User", "request"));
        assert!(!spec.is_known_attribute("Order", "nonexistent"));
        assert!(!spec.is_known_attribute("Invoice", "id"));
    }
}
