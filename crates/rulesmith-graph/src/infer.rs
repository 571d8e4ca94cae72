//! Constraint inference over the relationship graph.
//!
//! Each rule class is computed independently; everything carries the
//! `Graph` provenance and a class-specific confidence. Rules below the
//! configured floor are dropped before returning.

use crate::graph::RelationshipGraph;
use rulesmith_spec::{Cardinality, Provenance, RuleKind, ValidationRule};
use tracing::debug;

const CARDINALITY_CONFIDENCE: f64 = 0.95;
const UNIQUENESS_CONFIDENCE: f64 = 0.99;
const WORKFLOW_CONFIDENCE: f64 = 0.85;
const CASCADE_CONFIDENCE: f64 = 0.90;
const OWNERSHIP_CONFIDENCE: f64 = 0.88;
const TRANSITIVE_CONFIDENCE: f64 = 0.75;

pub struct ConstraintInference {
    pub confidence_floor: f64,
}

impl Default for ConstraintInference {
    fn default() -> Self {
        Self {
            confidence_floor: 0.70,
        }
    }
}

impl ConstraintInference {
    pub fn with_floor(confidence_floor: f64) -> Self {
        Self { confidence_floor }
    }

    pub fn infer(&self, graph: &RelationshipGraph) -> Vec<ValidationRule> {
        let mut rules = Vec::new();
        self.cardinality(graph, &mut rules);
        self.uniqueness(graph, &mut rules);
        self.workflow(graph, &mut rules);
        self.cascade(graph, &mut rules);
        self.ownership(graph, &mut rules);
        self.transitive(graph, &mut rules);

        let before = rules.len();
        rules.retain(|r| r.confidence.value() >= self.confidence_floor);
        debug!(
            kept = rules.len(),
            dropped = before - rules.len(),
            "graph inference finished"
        );
        rules
    }

    /// A required one-to-many relationship means the foreign key on the
    /// many side must be set.
    fn cardinality(&self, graph: &RelationshipGraph, rules: &mut Vec<ValidationRule>) {
        for edge in graph.edges() {
            if !edge.required
                || edge.source_cardinality != Cardinality::One
                || edge.target_cardinality != Cardinality::Many
            {
                continue;
            }
            let source = &graph.nodes()[edge.source].name;
            let target = &graph.nodes()[edge.target].name;
            rules.push(ValidationRule::new(
                target,
                &edge.fk_field,
                RuleKind::Presence,
                format!("{} != null", edge.fk_field),
                format!("{target}.{} must reference a {source}", edge.fk_field),
                CARDINALITY_CONFIDENCE,
                Provenance::Graph,
            ));
        }
    }

    fn uniqueness(&self, graph: &RelationshipGraph, rules: &mut Vec<ValidationRule>) {
        for node in graph.nodes() {
            for field in &node.identifier_fields {
                rules.push(ValidationRule::new(
                    &node.name,
                    field,
                    RuleKind::Uniqueness,
                    format!("unique({field})"),
                    format!("{}.{field} must be unique", node.name),
                    UNIQUENESS_CONFIDENCE,
                    Provenance::Graph,
                ));
            }
        }
    }

    fn workflow(&self, graph: &RelationshipGraph, rules: &mut Vec<ValidationRule>) {
        for node in graph.nodes() {
            let (Some(field), states) = (&node.state_field, &node.lifecycle_states) else {
                continue;
            };
            if states.is_empty() {
                continue;
            }
            rules.push(ValidationRule::new(
                &node.name,
                field,
                RuleKind::StatusTransition,
                format!("{field} IN [{}]", states.join(", ")),
                format!("{}.{field} must be one of the declared lifecycle states", node.name),
                WORKFLOW_CONFIDENCE,
                Provenance::Graph,
            ));
        }
    }

    /// A cascade-delete edge constrains deletion of the parent, not a
    /// field value: the source must not be deleted while dependents still
    /// reference it.
    fn cascade(&self, graph: &RelationshipGraph, rules: &mut Vec<ValidationRule>) {
        for edge in graph.edges() {
            if !edge.cascade_delete {
                continue;
            }
            let source = &graph.nodes()[edge.source].name;
            let target = &graph.nodes()[edge.target].name;
            rules.push(ValidationRule::new(
                source,
                &edge.fk_field,
                RuleKind::WorkflowConstraint,
                format!(
                    "no {target} references {source} via {} at delete",
                    edge.fk_field
                ),
                format!("{source} cannot be deleted while {target} rows reference it"),
                CASCADE_CONFIDENCE,
                Provenance::Graph,
            ));
        }
    }

    /// Every entity reachable from an aggregate root needs its immediate
    /// back-reference set; the chain to the root is otherwise broken.
    fn ownership(&self, graph: &RelationshipGraph, rules: &mut Vec<ValidationRule>) {
        for (root_index, root) in graph.nodes().iter().enumerate() {
            if !root.is_aggregate_root {
                continue;
            }
            for (target_index, path) in graph.paths_from(root_index) {
                let Some(&last) = path.last() else {
                    continue;
                };
                let last_edge = &graph.edges()[last];
                let owner = &graph.nodes()[last_edge.source].name;
                let target = &graph.nodes()[target_index].name;
                rules.push(ValidationRule::new(
                    target,
                    &last_edge.fk_field,
                    RuleKind::Presence,
                    format!("{} != null", last_edge.fk_field),
                    format!(
                        "{target}.{} must reference its owning {owner} within the {} aggregate",
                        last_edge.fk_field, root.name
                    ),
                    OWNERSHIP_CONFIDENCE,
                    Provenance::Graph,
                ));
            }
        }
    }

    /// Reachability over two or more edges with no direct shortcut: the
    /// far entity presupposes the near one transitively.
    fn transitive(&self, graph: &RelationshipGraph, rules: &mut Vec<ValidationRule>) {
        for start in 0..graph.nodes().len() {
            for (target_index, path) in graph.paths_from(start) {
                if path.len() < 2 || graph.has_direct_edge(start, target_index) {
                    continue;
                }
                let Some(&last) = path.last() else {
                    continue;
                };
                let last_edge = &graph.edges()[last];
                let root = &graph.nodes()[start].name;
                let target = &graph.nodes()[target_index].name;
                rules.push(ValidationRule::new(
                    target,
                    &last_edge.fk_field,
                    RuleKind::Relationship,
                    format!("{target} presupposes {root}"),
                    format!("a {target} cannot exist without a {root}"),
                    TRANSITIVE_CONFIDENCE,
                    Provenance::Graph,
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rulesmith_spec::{
        CanonicalSpec, EntityDescriptor, FieldDescriptor, RelationshipDescriptor,
    };

    fn one_to_many(source: &str, target: &str, fk: &str) -> RelationshipDescriptor {
        RelationshipDescriptor {
            source: source.into(),
            target: target.into(),
            source_cardinality: Cardinality::One,
            target_cardinality: Cardinality::Many,
            fk_field: fk.into(),
            required: true,
            cascade_delete: false,
        }
    }

    fn infer(spec: &CanonicalSpec) -> Vec<ValidationRule> {
        let graph = RelationshipGraph::build(spec);
        ConstraintInference::default().infer(&graph)
    }

    #[test]
    fn required_one_to_many_yields_presence_on_foreign_key() {
        let spec = CanonicalSpec {
            entities: vec![
                EntityDescriptor::new("User", vec![FieldDescriptor::new("id", "uuid")]),
                EntityDescriptor::new(
                    "Order",
                    vec![
                        FieldDescriptor::new("id", "uuid"),
                        FieldDescriptor::new("user_id", "uuid"),
                    ],
                ),
            ],
            relationships: vec![one_to_many("User", "Order", "user_id")],
            endpoints: vec![],
        };
        let rules = infer(&spec);
        let rule = rules
            .iter()
            .find(|r| {
                r.entity == "Order" && r.attribute == "user_id" && r.kind == RuleKind::Presence
            })
            .unwrap();
        assert!(rule.confidence.value() >= 0.9);
        assert_eq!(rule.provenance, Provenance::Graph);
        assert_eq!(rule.condition, "user_id != null");
    }

    #[test]
    fn optional_edge_skips_cardinality_but_keeps_ownership_presence() {
        let mut relationship = one_to_many("User", "Order", "user_id");
        relationship.required = false;
        let spec = CanonicalSpec {
            entities: vec![
                EntityDescriptor::new("User", vec![FieldDescriptor::new("id", "uuid")]),
                EntityDescriptor::new("Order", vec![FieldDescriptor::new("user_id", "uuid")]),
            ],
            relationships: vec![relationship],
            endpoints: vec![],
        };
        let rules = infer(&spec);
        // No 0.95 cardinality rule without the required flag, but User is an
        // aggregate root so its direct child still gets the 0.88 ownership
        // back-reference rule.
        assert!(!rules
            .iter()
            .any(|r| r.kind == RuleKind::Presence && r.confidence.value() == 0.95));
        let ownership = rules
            .iter()
            .find(|r| {
                r.entity == "Order" && r.attribute == "user_id" && r.kind == RuleKind::Presence
            })
            .unwrap();
        assert_eq!(ownership.confidence.value(), 0.88);
    }

    #[test]
    fn identifier_fields_yield_uniqueness() {
        let spec = CanonicalSpec {
            entities: vec![EntityDescriptor::new(
                "User",
                vec![
                    FieldDescriptor::new("id", "uuid"),
                    FieldDescriptor::new("email", "string").unique(),
                ],
            )],
            ..Default::default()
        };
        let rules = infer(&spec);
        let unique: Vec<_> = rules
            .iter()
            .filter(|r| r.kind == RuleKind::Uniqueness)
            .collect();
        assert_eq!(unique.len(), 2);
        assert!(unique.iter().all(|r| r.confidence.value() == 0.99));
    }

    #[test]
    fn lifecycle_yields_status_transition() {
        let mut order = EntityDescriptor::new("Order", vec![FieldDescriptor::new("id", "uuid")]);
        order.state_field = Some("status".into());
        order.state_values = vec!["pending".into(), "paid".into(), "shipped".into()];
        let spec = CanonicalSpec {
            entities: vec![order],
            ..Default::default()
        };
        let rules = infer(&spec);
        let rule = rules
            .iter()
            .find(|r| r.kind == RuleKind::StatusTransition)
            .unwrap();
        assert_eq!(rule.attribute, "status");
        assert_eq!(rule.condition, "status IN [pending, paid, shipped]");
    }

    #[test]
    fn cascade_delete_yields_workflow_constraint_on_source() {
        let mut relationship = one_to_many("Order", "OrderItem", "order_id");
        relationship.cascade_delete = true;
        let spec = CanonicalSpec {
            entities: vec![
                EntityDescriptor::new("Order", vec![FieldDescriptor::new("id", "uuid")]),
                EntityDescriptor::new(
                    "OrderItem",
                    vec![FieldDescriptor::new("order_id", "uuid")],
                ),
            ],
            relationships: vec![relationship],
            endpoints: vec![],
        };
        let rules = infer(&spec);
        let rule = rules
            .iter()
            .find(|r| r.kind == RuleKind::WorkflowConstraint)
            .unwrap();
        assert_eq!(rule.entity, "Order");
        assert_eq!(rule.attribute, "order_id");
        // The rule guards deletion of the parent rather than describing the
        // cascade itself.
        assert!(rule.message.contains("cannot be deleted"));
        assert!(rule.condition.contains("at delete"));
    }

    fn chain_spec() -> CanonicalSpec {
        CanonicalSpec {
            entities: vec![
                EntityDescriptor::new("User", vec![FieldDescriptor::new("id", "uuid")]),
                EntityDescriptor::new(
                    "Order",
                    vec![
                        FieldDescriptor::new("id", "uuid"),
                        FieldDescriptor::new("user_id", "uuid"),
                    ],
                ),
                EntityDescriptor::new(
                    "OrderItem",
                    vec![
                        FieldDescriptor::new("id", "uuid"),
                        FieldDescriptor::new("order_id", "uuid"),
                    ],
                ),
            ],
            relationships: vec![
                one_to_many("User", "Order", "user_id"),
                one_to_many("Order", "OrderItem", "order_id"),
            ],
            endpoints: vec![],
        }
    }

    #[test]
    fn deep_children_of_aggregate_root_get_ownership_presence() {
        let rules = infer(&chain_spec());
        let rule = rules
            .iter()
            .find(|r| {
                r.entity == "OrderItem"
                    && r.kind == RuleKind::Presence
                    && r.confidence.value() == 0.88
            })
            .unwrap();
        assert_eq!(rule.attribute, "order_id");
        assert!(rule.message.contains("User aggregate"));
    }

    #[test]
    fn transitive_reachability_without_direct_edge_yields_relationship() {
        let rules = infer(&chain_spec());
        let rule = rules
            .iter()
            .find(|r| r.kind == RuleKind::Relationship)
            .unwrap();
        assert_eq!(rule.entity, "OrderItem");
        assert_eq!(rule.condition, "OrderItem presupposes User");
        assert_eq!(rule.confidence.value(), 0.75);
    }

    #[test]
    fn direct_edge_suppresses_transitive_rule() {
        let mut spec = chain_spec();
        spec.entities[2]
            .fields
            .push(FieldDescriptor::new("user_id", "uuid"));
        spec.relationships
            .push(one_to_many("User", "OrderItem", "user_id"));
        let rules = infer(&spec);
        assert!(!rules
            .iter()
            .any(|r| r.kind == RuleKind::Relationship && r.entity == "OrderItem"));
    }

    #[test]
    fn floor_drops_low_confidence_classes() {
        let graph = RelationshipGraph::build(&chain_spec());
        let rules = ConstraintInference::with_floor(0.80).infer(&graph);
        assert!(!rules.iter().any(|r| r.kind == RuleKind::Relationship));
        assert!(rules.iter().any(|r| r.kind == RuleKind::Presence));
    }
}
