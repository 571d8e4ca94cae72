//! Model-based extraction.
//!
//! Three batched passes run concurrently against the language-model
//! service: one request per entity for field-level rules, one per entity
//! with endpoints for request/response rules, and a single cross-entity
//! request covering relationships. Every sub-request degrades on failure;
//! the pass contributes nothing instead of aborting the run. Candidates
//! that reference unknown entities or attributes are dropped here so the
//! merge engine only ever sees grounded rules.

use rulesmith_llm::{
    call_with_retry, strip_code_fences, ModelClient, ModelRequest, RateLimiter, RetryPolicy,
};
use rulesmith_spec::{CanonicalSpec, EndpointDescriptor, Provenance, RuleKind, ValidationRule};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

// ============================================================================
// Prompts
// ============================================================================

const FIELD_SYSTEM: &str = "You extract validation rules from entity schemas. \
Given one entity with its fields, return every validation constraint the \
schema states or strongly implies. Respond with JSON only, an object with a \
\"rules\" array matching the provided schema. Reference only fields that \
exist on the entity. Do not invent constraints the schema gives no evidence \
for.";

const ENDPOINT_SYSTEM: &str = "You extract request and response validation \
rules from API endpoint definitions. Given one entity and its endpoints, \
return the constraints a server must enforce on requests and responses. Use \
the attribute \"request\" or \"response\" (or scope \"both\") rather than a \
field name. Respond with JSON only, an object with a \"rules\" array \
matching the provided schema.";

const CROSS_SYSTEM: &str = "You extract cross-entity validation rules from a \
data model. Given the entities and their relationships, return referential \
and workflow constraints that span two entities. Every rule must name its \
related_entity. Respond with JSON only, an object with a \"rules\" array \
matching the provided schema.";

/// JSON schema sent alongside every extraction request; providers with
/// JSON mode enforce it, the rest treat it as documentation.
pub fn candidate_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "rules": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "entity": { "type": "string" },
                        "attribute": { "type": "string" },
                        "type": {
                            "type": "string",
                            "enum": [
                                "PRESENCE", "FORMAT", "RANGE", "UNIQUENESS",
                                "RELATIONSHIP", "STATUS_TRANSITION",
                                "WORKFLOW_CONSTRAINT", "STOCK_CONSTRAINT"
                            ]
                        },
                        "condition": { "type": "string" },
                        "message": { "type": "string" },
                        "confidence": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
                        "scope": { "type": "string", "enum": ["request", "response", "both"] },
                        "related_entity": { "type": "string" },
                        "rationale": { "type": "string" }
                    },
                    "required": ["entity", "type", "condition", "message", "confidence"]
                }
            }
        },
        "required": ["rules"]
    })
}

// ============================================================================
// Candidates
// ============================================================================

/// One rule as returned by the model, before grounding checks.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleCandidate {
    pub entity: String,
    #[serde(default)]
    pub attribute: String,
    #[serde(rename = "type", alias = "kind")]
    pub kind: String,
    pub condition: String,
    pub message: String,
    pub confidence: f64,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub related_entity: Option<String>,
    #[serde(default)]
    pub rationale: Option<String>,
}

impl RuleCandidate {
    /// Ground the candidate against the spec, or explain why it is dropped.
    fn into_rule(
        self,
        spec: &CanonicalSpec,
        require_related: bool,
    ) -> Result<ValidationRule, String> {
        let kind = RuleKind::parse(&self.kind)
            .map_err(|_| format!("unknown rule kind '{}'", self.kind))?;
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!("confidence {} outside [0, 1]", self.confidence));
        }
        if !spec.has_entity(&self.entity) {
            return Err(format!("unknown entity '{}'", self.entity));
        }
        if self.condition.trim().is_empty() {
            return Err("empty condition".to_string());
        }
        if self.message.trim().is_empty() {
            return Err("empty message".to_string());
        }

        let attribute = if self.attribute.trim().is_empty() {
            match self.scope.as_deref() {
                Some("request") => "request".to_string(),
                Some("response") => "response".to_string(),
                Some("both") | Some("request+response") => "request+response".to_string(),
                Some(other) => return Err(format!("unknown scope '{other}'")),
                None => return Err("no attribute or scope".to_string()),
            }
        } else {
            self.attribute.clone()
        };
        if !spec.is_known_attribute(&self.entity, &attribute) {
            return Err(format!(
                "unknown attribute '{}.{}'",
                self.entity, attribute
            ));
        }

        match &self.related_entity {
            Some(related) if !spec.has_entity(related) => {
                return Err(format!("unknown related entity '{related}'"));
            }
            None if require_related => {
                return Err("cross-entity rule without related_entity".to_string());
            }
            _ => {}
        }

        Ok(ValidationRule::new(
            self.entity,
            attribute,
            kind,
            self.condition,
            self.message,
            self.confidence,
            Provenance::Model,
        ))
    }
}

// ============================================================================
// Extractor
// ============================================================================

pub struct ModelExtractor {
    client: Arc<dyn ModelClient>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl ModelExtractor {
    pub fn new(client: Arc<dyn ModelClient>, limiter: Arc<RateLimiter>, retry: RetryPolicy) -> Self {
        Self {
            client,
            limiter,
            retry,
        }
    }

    /// Run all three passes. Never fails: a failed sub-request is logged
    /// and contributes no rules.
    pub async fn extract(&self, spec: &CanonicalSpec) -> Vec<ValidationRule> {
        let (field, endpoint, cross) = tokio::join!(
            self.run_batch(self.field_requests(spec)),
            self.run_batch(self.endpoint_requests(spec)),
            self.run_batch(self.cross_requests(spec)),
        );

        let mut rules = Vec::new();
        for (label, content) in field.into_iter().chain(endpoint) {
            rules.extend(parse_candidates(&content, spec, false, &label));
        }
        for (label, content) in cross {
            rules.extend(parse_candidates(&content, spec, true, &label));
        }
        debug!(count = rules.len(), "model extraction finished");
        rules
    }

    fn field_requests(&self, spec: &CanonicalSpec) -> Vec<(String, ModelRequest)> {
        spec.entities
            .iter()
            .map(|entity| {
                let body = serde_json::to_string_pretty(entity).unwrap_or_default();
                let user = format!("Entity under analysis:\n{body}");
                (
                    format!("fields/{}", entity.name),
                    ModelRequest::extraction(FIELD_SYSTEM, user, candidate_schema()),
                )
            })
            .collect()
    }

    fn endpoint_requests(&self, spec: &CanonicalSpec) -> Vec<(String, ModelRequest)> {
        let mut by_entity: BTreeMap<&str, Vec<&EndpointDescriptor>> =
            BTreeMap::new();
        for endpoint in &spec.endpoints {
            if let Some(entity) = endpoint.entity.as_deref() {
                by_entity.entry(entity).or_default().push(endpoint);
            }
        }
        by_entity
            .into_iter()
            .map(|(entity, endpoints)| {
                let body = serde_json::to_string_pretty(&endpoints).unwrap_or_default();
                let user = format!("Endpoints for entity {entity}:\n{body}");
                (
                    format!("endpoints/{entity}"),
                    ModelRequest::extraction(
                        ENDPOINT_SYSTEM,
                        user,
                        candidate_schema(),
                    ),
                )
            })
            .collect()
    }

    fn cross_requests(&self, spec: &CanonicalSpec) -> Vec<(String, ModelRequest)> {
        if spec.entities.len() < 2 && spec.relationships.is_empty() {
            return Vec::new();
        }
        let entities: Vec<&str> = spec.entities.iter().map(|e| e.name.as_str()).collect();
        let relationships = serde_json::to_string_pretty(&spec.relationships).unwrap_or_default();
        let endpoints: Vec<String> = spec
            .endpoints
            .iter()
            .map(|e| format!("{} {}", e.method.as_str(), e.path))
            .collect();
        let user = format!(
            "Entities: {}\nRelationships:\n{relationships}\nEndpoints: {}",
            entities.join(", "),
            endpoints.join(", ")
        );
        vec![(
            "cross".to_string(),
            ModelRequest::extraction(CROSS_SYSTEM, user, candidate_schema()),
        )]
    }

    /// Fire a batch of labelled requests concurrently through the shared
    /// limiter; return the responses that succeeded.
    async fn run_batch(
        &self,
        requests: Vec<(String, ModelRequest)>,
    ) -> Vec<(String, String)> {
        let mut set = JoinSet::new();
        for (label, request) in requests {
            let client = Arc::clone(&self.client);
            let limiter = Arc::clone(&self.limiter);
            let retry = self.retry.clone();
            set.spawn(async move {
                limiter.acquire().await;
                let result = call_with_retry(client.as_ref(), request, &retry).await;
                (label, result)
            });
        }

        let mut contents = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((label, Ok(response))) => contents.push((label, response.content)),
                Ok((label, Err(error))) => {
                    warn!(%label, %error, "model sub-request failed, skipping");
                }
                Err(error) => warn!(%error, "model sub-request panicked, skipping"),
            }
        }
        contents
    }
}

/// Parse one response body into grounded rules, dropping malformed
/// candidates individually.
fn parse_candidates(
    content: &str,
    spec: &CanonicalSpec,
    require_related: bool,
    label: &str,
) -> Vec<ValidationRule> {
    let stripped = strip_code_fences(content);
    let value: Value = match serde_json::from_str(stripped) {
        Ok(value) => value,
        Err(error) => {
            warn!(%label, %error, "model response is not JSON, skipping");
            return Vec::new();
        }
    };
    let items = match value.get("rules").and_then(Value::as_array) {
        Some(items) => items.clone(),
        None => match value.as_array() {
            Some(items) => items.clone(),
            None => {
                warn!(%label, "model response has no rules array, skipping");
                return Vec::new();
            }
        },
    };

    let mut rules = Vec::new();
    for item in items {
        let candidate: RuleCandidate = match serde_json::from_value(item) {
            Ok(candidate) => candidate,
            Err(error) => {
                warn!(%label, %error, "malformed rule candidate dropped");
                continue;
            }
        };
        match candidate.into_rule(spec, require_related) {
            Ok(rule) => rules.push(rule),
            Err(reason) => warn!(%label, %reason, "rule candidate dropped"),
        }
    }
    rules
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rulesmith_llm::ScriptedClient;
    use rulesmith_spec::{
        Cardinality, EndpointDescriptor, EntityDescriptor, FieldDescriptor, HttpMethod,
        RelationshipDescriptor,
    };

    fn extractor(client: ScriptedClient) -> ModelExtractor {
        ModelExtractor::new(
            Arc::new(client),
            Arc::new(RateLimiter::new(600)),
            RetryPolicy {
                max_retries: 0,
                base_delay: std::time::Duration::from_millis(1),
                request_timeout: std::time::Duration::from_secs(5),
            },
        )
    }

    fn two_entity_spec() -> CanonicalSpec {
        CanonicalSpec {
            entities: vec![
                EntityDescriptor::new(
                    "User",
                    vec![
                        FieldDescriptor::new("id", "uuid"),
                        FieldDescriptor::new("email", "string"),
                    ],
                ),
                EntityDescriptor::new(
                    "Order",
                    vec![
                        FieldDescriptor::new("id", "uuid"),
                        FieldDescriptor::new("user_id", "uuid"),
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

    fn rules_json(rules: Value) -> String {
        json!({ "rules": rules }).to_string()
    }

    #[tokio::test]
    async fn field_pass_routes_one_request_per_entity() {
        let user_rules = rules_json(json!([{
            "entity": "User",
            "attribute": "email",
            "type": "FORMAT",
            "condition": "email(email)",
            "message": "User.email must be a valid email",
            "confidence": 0.9
        }]));
        let order_rules = rules_json(json!([{
            "entity": "Order",
            "attribute": "user_id",
            "type": "RELATIONSHIP",
            "condition": "user_id references User.id",
            "message": "Order.user_id must reference an existing User",
            "confidence": 0.85,
            "related_entity": "User"
        }]));
        // The field-pass prompt embeds the entity as serialized JSON, so the
        // routes key on the name property.
        let client = ScriptedClient::routed(
            vec![
                (r#""name": "User""#, user_rules.as_str()),
                (r#""name": "Order""#, order_rules.as_str()),
            ],
            r#"{"rules": []}"#,
        );
        let extractor = extractor(client);

        let rules = extractor.extract(&two_entity_spec()).await;
        assert!(rules
            .iter()
            .any(|r| r.entity == "User" && r.kind == RuleKind::Format));
        assert!(rules
            .iter()
            .any(|r| r.entity == "Order" && r.kind == RuleKind::Relationship));
        assert!(rules.iter().all(|r| r.provenance == Provenance::Model));
    }

    #[tokio::test]
    async fn malformed_candidates_are_dropped_individually() {
        let mixed = rules_json(json!([
            {
                "entity": "User",
                "attribute": "email",
                "type": "FORMAT",
                "condition": "email(email)",
                "message": "valid email required",
                "confidence": 0.9
            },
            { "entity": "User", "type": "FORMAT" },
            {
                "entity": "User",
                "attribute": "email",
                "type": "NO_SUCH_KIND",
                "condition": "x",
                "message": "x",
                "confidence": 0.9
            },
            {
                "entity": "User",
                "attribute": "email",
                "type": "FORMAT",
                "condition": "x",
                "message": "x",
                "confidence": 1.4
            }
        ]));
        let spec = CanonicalSpec {
            entities: vec![EntityDescriptor::new(
                "User",
                vec![FieldDescriptor::new("email", "string")],
            )],
            ..Default::default()
        };
        let extractor = extractor(ScriptedClient::constant(mixed));

        let rules = extractor.extract(&spec).await;
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].condition, "email(email)");
    }

    #[tokio::test]
    async fn dangling_references_are_dropped() {
        let dangling = rules_json(json!([
            {
                "entity": "Ghost",
                "attribute": "x",
                "type": "PRESENCE",
                "condition": "x != null",
                "message": "x",
                "confidence": 0.9
            },
            {
                "entity": "User",
                "attribute": "no_such_field",
                "type": "PRESENCE",
                "condition": "no_such_field != null",
                "message": "x",
                "confidence": 0.9
            }
        ]));
        let spec = CanonicalSpec {
            entities: vec![EntityDescriptor::new(
                "User",
                vec![FieldDescriptor::new("email", "string")],
            )],
            ..Default::default()
        };
        let extractor = extractor(ScriptedClient::constant(dangling));

        let rules = extractor.extract(&spec).await;
        assert!(rules.is_empty());
    }

    #[tokio::test]
    async fn failed_sub_request_degrades_to_nothing() {
        let spec = CanonicalSpec {
            entities: vec![EntityDescriptor::new(
                "User",
                vec![FieldDescriptor::new("email", "string")],
            )],
            ..Default::default()
        };
        let client = ScriptedClient::new(vec![Err(rulesmith_llm::ModelClientError::Api(
            "invalid key".into(),
        ))]);
        let extractor = extractor(client);

        let rules = extractor.extract(&spec).await;
        assert!(rules.is_empty());
    }

    #[tokio::test]
    async fn cross_pass_requires_related_entity() {
        let cross = rules_json(json!([
            {
                "entity": "Order",
                "attribute": "user_id",
                "type": "RELATIONSHIP",
                "condition": "user_id references User.id",
                "message": "order must belong to a user",
                "confidence": 0.88,
                "related_entity": "User"
            },
            {
                "entity": "Order",
                "attribute": "user_id",
                "type": "RELATIONSHIP",
                "condition": "dangling",
                "message": "dropped, no related entity",
                "confidence": 0.88
            }
        ]));
        let client = ScriptedClient::routed(
            vec![("Relationships:", cross.as_str())],
            r#"{"rules": []}"#,
        );
        let extractor = extractor(client);

        let rules = extractor.extract(&two_entity_spec()).await;
        let cross_rules: Vec<_> = rules
            .iter()
            .filter(|r| r.kind == RuleKind::Relationship)
            .collect();
        assert_eq!(cross_rules.len(), 1);
        assert_eq!(cross_rules[0].condition, "user_id references User.id");
    }

    #[tokio::test]
    async fn scope_maps_to_synthetic_attribute() {
        let endpoint_rules = rules_json(json!([{
            "entity": "User",
            "type": "PRESENCE",
            "condition": "request body includes email",
            "message": "email is required on create",
            "confidence": 0.8,
            "scope": "request"
        }]));
        let spec = CanonicalSpec {
            entities: vec![EntityDescriptor::new(
                "User",
                vec![FieldDescriptor::new("email", "string")],
            )],
            endpoints: vec![EndpointDescriptor {
                method: HttpMethod::Post,
                path: "/users".into(),
                entity: Some("User".into()),
                request_fields: vec!["email".into()],
                response_fields: vec![],
            }],
            ..Default::default()
        };
        let client = ScriptedClient::routed(
            vec![("Endpoints for entity User", endpoint_rules.as_str())],
            r#"{"rules": []}"#,
        );
        let extractor = extractor(client);

        let rules = extractor.extract(&spec).await;
        assert!(rules
            .iter()
            .any(|r| r.attribute == "request" && r.kind == RuleKind::Presence));
    }

    #[tokio::test]
    async fn batches_one_call_per_entity_plus_endpoints_and_cross() {
        let client = Arc::new(ScriptedClient::constant(r#"{"rules": []}"#));
        let extractor = ModelExtractor::new(
            Arc::clone(&client) as Arc<dyn ModelClient>,
            Arc::new(RateLimiter::new(600)),
            RetryPolicy::default(),
        );
        let mut spec = two_entity_spec();
        spec.endpoints.push(EndpointDescriptor {
            method: HttpMethod::Post,
            path: "/orders".into(),
            entity: Some("Order".into()),
            request_fields: vec![],
            response_fields: vec![],
        });

        let _ = extractor.extract(&spec).await;
        // Two field requests, one endpoint group, one cross request.
        assert_eq!(client.calls(), 4);
    }

    #[test]
    fn fenced_output_is_parsed() {
        let spec = CanonicalSpec {
            entities: vec![EntityDescriptor::new(
                "User",
                vec![FieldDescriptor::new("email", "string")],
            )],
            ..Default::default()
        };
        let content = "```json\n{\"rules\": [{\"entity\": \"User\", \
            \"attribute\": \"email\", \"type\": \"FORMAT\", \
            \"condition\": \"email(email)\", \"message\": \"m\", \
            \"confidence\": 0.9}]}\n```";
        let rules = parse_candidates(content, &spec, false, "test");
        assert_eq!(rules.len(), 1);
    }
}
