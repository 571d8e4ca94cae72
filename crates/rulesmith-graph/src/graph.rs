//! Directed entity graph built once from the canonical spec.

use rulesmith_spec::{CanonicalSpec, Cardinality};
use std::collections::{HashMap, VecDeque};
use tracing::warn;

/// Field names that mark a lifecycle attribute when no explicit state
/// field is declared.
const LIFECYCLE_NAMES: [&str; 3] = ["status", "state", "stage"];

#[derive(Debug, Clone)]
pub struct EntityNode {
    pub name: String,
    /// More outgoing than incoming relationships: this entity owns others.
    pub is_aggregate_root: bool,
    pub state_field: Option<String>,
    pub lifecycle_states: Vec<String>,
    /// Fields that identify a row: `id`, `<entity>_id`, or marked unique.
    pub identifier_fields: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RelationEdge {
    pub source: usize,
    pub target: usize,
    pub source_cardinality: Cardinality,
    pub target_cardinality: Cardinality,
    /// Foreign key on the target (referencing) side.
    pub fk_field: String,
    pub required: bool,
    pub cascade_delete: bool,
}

/// Immutable after [`RelationshipGraph::build`]; adjacency is index-based.
pub struct RelationshipGraph {
    nodes: Vec<EntityNode>,
    edges: Vec<RelationEdge>,
    index: HashMap<String, usize>,
    outgoing: Vec<Vec<usize>>,
}

impl RelationshipGraph {
    pub fn build(spec: &CanonicalSpec) -> Self {
        let mut nodes: Vec<EntityNode> = Vec::with_capacity(spec.entities.len());
        let mut index = HashMap::new();

        for entity in &spec.entities {
            let (state_field, lifecycle_states) = detect_lifecycle(entity);
            let entity_id = format!("{}_id", entity.name.to_lowercase());
            let identifier_fields = entity
                .fields
                .iter()
                .filter(|f| f.name == "id" || f.name == entity_id || f.unique)
                .map(|f| f.name.clone())
                .collect();
            index.insert(entity.name.clone(), nodes.len());
            nodes.push(EntityNode {
                name: entity.name.clone(),
                is_aggregate_root: false,
                state_field,
                lifecycle_states,
                identifier_fields,
            });
        }

        let mut edges = Vec::new();
        let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        let mut in_degree = vec![0usize; nodes.len()];
        for relationship in &spec.relationships {
            let (Some(&source), Some(&target)) = (
                index.get(&relationship.source),
                index.get(&relationship.target),
            ) else {
                warn!(
                    source = %relationship.source,
                    target = %relationship.target,
                    "relationship references unknown entity, skipping edge"
                );
                continue;
            };
            outgoing[source].push(edges.len());
            in_degree[target] += 1;
            edges.push(RelationEdge {
                source,
                target,
                source_cardinality: relationship.source_cardinality,
                target_cardinality: relationship.target_cardinality,
                fk_field: relationship.fk_field.clone(),
                required: relationship.required,
                cascade_delete: relationship.cascade_delete,
            });
        }

        for (i, node) in nodes.iter_mut().enumerate() {
            node.is_aggregate_root = outgoing[i].len() > in_degree[i];
        }

        Self {
            nodes,
            edges,
            index,
            outgoing,
        }
    }

    pub fn nodes(&self) -> &[EntityNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[RelationEdge] {
        &self.edges
    }

    pub fn node_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn node(&self, name: &str) -> Option<&EntityNode> {
        self.node_index(name).map(|i| &self.nodes[i])
    }

    pub fn has_direct_edge(&self, source: usize, target: usize) -> bool {
        self.outgoing[source]
            .iter()
            .any(|&e| self.edges[e].target == target)
    }

    /// Shortest edge-path from `start` to every other reachable node,
    /// keyed by target node index. BFS, first path found wins.
    pub fn paths_from(&self, start: usize) -> HashMap<usize, Vec<usize>> {
        let mut predecessor: HashMap<usize, usize> = HashMap::new();
        let mut queue = VecDeque::from([start]);
        let mut seen = vec![false; self.nodes.len()];
        seen[start] = true;

        while let Some(current) = queue.pop_front() {
            for &edge_index in &self.outgoing[current] {
                let next = self.edges[edge_index].target;
                if !seen[next] {
                    seen[next] = true;
                    predecessor.insert(next, edge_index);
                    queue.push_back(next);
                }
            }
        }

        let mut paths = HashMap::new();
        for &target in predecessor.keys() {
            let mut path = Vec::new();
            let mut at = target;
            while at != start {
                let edge_index = predecessor[&at];
                path.push(edge_index);
                at = self.edges[edge_index].source;
            }
            path.reverse();
            paths.insert(target, path);
        }
        paths
    }
}

fn detect_lifecycle(entity: &rulesmith_spec::EntityDescriptor) -> (Option<String>, Vec<String>) {
    if let Some(name) = &entity.state_field {
        let states = if entity.state_values.is_empty() {
            entity
                .field(name)
                .map(|f| f.allowed_values.clone())
                .unwrap_or_default()
        } else {
            entity.state_values.clone()
        };
        return (Some(name.clone()), states);
    }
    for field in &entity.fields {
        if LIFECYCLE_NAMES.contains(&field.name.to_lowercase().as_str())
            && !field.allowed_values.is_empty()
        {
            return (Some(field.name.clone()), field.allowed_values.clone());
        }
    }
    (None, Vec::new())
}
