//! Provenance-aware merge.
//!
//! All four rule streams end up here. Rules sharing a `RuleKey` describe
//! the same constraint; exactly one survives. The winner is picked by
//! provenance priority, then confidence, then condition text so the result
//! is fully deterministic. Range rules are special-cased: bounds from
//! different sources that do not contradict each other are conjoined onto
//! the winning rule instead of being thrown away.

use regex::Regex;
use rulesmith_spec::{Provenance, RuleKey, RuleKind, ValidationRule};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::debug;

// ============================================================================
// Priority
// ============================================================================

/// Provenance ranking used to break merge ties. Lower rank wins.
#[derive(Debug, Clone)]
pub struct PriorityOrder(Vec<Provenance>);

impl Default for PriorityOrder {
    fn default() -> Self {
        Self(Provenance::default_priority().to_vec())
    }
}

impl PriorityOrder {
    pub fn new(order: Vec<Provenance>) -> Self {
        Self(order)
    }

    /// Ignore provenance entirely; the highest confidence wins.
    pub fn confidence_only() -> Self {
        Self(Vec::new())
    }

    /// Position in the order; unlisted provenances rank last, equally.
    pub fn rank(&self, provenance: Provenance) -> usize {
        self.0
            .iter()
            .position(|&p| p == provenance)
            .unwrap_or(self.0.len())
    }
}

// ============================================================================
// Merge
// ============================================================================

#[derive(Debug)]
pub struct MergeOutcome {
    /// Sorted by (entity, attribute, kind), one rule per key.
    pub rules: Vec<ValidationRule>,
    pub duplicates_merged: usize,
}

pub fn merge(streams: Vec<Vec<ValidationRule>>, order: &PriorityOrder) -> MergeOutcome {
    let mut groups: BTreeMap<RuleKey, Vec<ValidationRule>> = BTreeMap::new();
    for rule in streams.into_iter().flatten() {
        groups.entry(rule.key()).or_default().push(rule);
    }

    let mut rules = Vec::with_capacity(groups.len());
    let mut duplicates_merged = 0;
    for (key, mut candidates) in groups {
        duplicates_merged += candidates.len() - 1;
        candidates.sort_by(|a, b| {
            order
                .rank(a.provenance)
                .cmp(&order.rank(b.provenance))
                .then_with(|| b.confidence.value().total_cmp(&a.confidence.value()))
                .then_with(|| a.condition.cmp(&b.condition))
        });
        let mut winner = candidates.remove(0);
        if key.kind == RuleKind::Range && !candidates.is_empty() {
            winner.condition = conjoin_bounds(&winner.condition, &candidates);
        }
        if !candidates.is_empty() {
            debug!(
                entity = %key.entity,
                attribute = %key.attribute,
                kind = key.kind.as_str(),
                winner = winner.provenance.as_str(),
                losers = candidates.len(),
                "merged duplicate rules"
            );
        }
        rules.push(winner);
    }

    MergeOutcome {
        rules,
        duplicates_merged,
    }
}

// ============================================================================
// Range Bounds
// ============================================================================

/// One comparison atom of a Range condition, e.g. `age >= 0` or
/// `len(name) <= 80`.
#[derive(Debug, Clone, PartialEq)]
struct Bound {
    text: String,
    /// Slot identity: subject plus bound direction. Two atoms in the same
    /// slot with different text contradict each other.
    slot: (String, bool),
}

fn bound_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(len\([A-Za-z0-9_.]+\)|[A-Za-z0-9_.]+)\s*(>=|<=|>|<)\s*(-?\d+(?:\.\d+)?)$")
            .expect("bound regex")
    })
}

fn parse_bounds(condition: &str) -> Option<Vec<Bound>> {
    let regex = bound_regex();
    condition
        .split(" AND ")
        .map(|atom| {
            let atom = atom.trim();
            let captures = regex.captures(atom)?;
            let subject = captures[1].to_string();
            let is_upper = matches!(&captures[2], "<=" | "<");
            Some(Bound {
                text: atom.to_string(),
                slot: (subject, is_upper),
            })
        })
        .collect()
}

/// Append bounds from losing candidates whose slot the winner leaves open.
/// Occupied slots keep the winner's atom; unparseable conditions are left
/// alone entirely.
fn conjoin_bounds(winner_condition: &str, losers: &[ValidationRule]) -> String {
    let Some(mut bounds) = parse_bounds(winner_condition) else {
        return winner_condition.to_string();
    };
    for loser in losers {
        let Some(candidates) = parse_bounds(&loser.condition) else {
            continue;
        };
        for candidate in candidates {
            if !bounds.iter().any(|b| b.slot == candidate.slot) {
                bounds.push(candidate);
            }
        }
    }
    bounds
        .into_iter()
        .map(|b| b.text)
        .collect::<Vec<_>>()
        .join(" AND ")
}

// ============================================================================
// Tests
// ============================================================================
