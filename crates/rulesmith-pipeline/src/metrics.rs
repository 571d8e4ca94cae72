//! Per-run accounting.

use chrono::{DateTime, Utc};
use rulesmith_spec::ValidationRule;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetrics {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_rules: usize,
    /// Rule count per kind, keyed by the wire spelling.
    pub rules_per_kind: BTreeMap<String, usize>,
    /// Surviving rules per phase; shows what each source contributed after
    /// the merge.
    pub rules_per_provenance: BTreeMap<String, usize>,
    pub average_confidence: f64,
    pub duplicates_merged: usize,
}

impl RunMetrics {
    pub fn summarize(
        rules: &[ValidationRule],
        duplicates_merged: usize,
        started_at: DateTime<Utc>,
    ) -> Self {
        let mut rules_per_kind = BTreeMap::new();
        let mut rules_per_provenance = BTreeMap::new();
        let mut confidence_sum = 0.0;
        for rule in rules {
            *rules_per_kind
                .entry(rule.kind.as_str().to_string())
                .or_insert(0) += 1;
            *rules_per_provenance
                .entry(rule.provenance.as_str().to_string())
                .or_insert(0) += 1;
            confidence_sum += rule.confidence.value();
        }
        let average_confidence = if rules.is_empty() {
            0.0
        } else {
            confidence_sum / rules.len() as f64
        };

        Self {
            run_id: Uuid::new_v4(),
            started_at,
            finished_at: Utc::now(),
            total_rules: rules.len(),
            rules_per_kind,
            rules_per_provenance,
            average_confidence,
            duplicates_merged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rulesmith_spec::{Provenance, RuleKind};

    #[test]
    fn summarize_counts_kinds_and_provenances() {
        let rules = vec![
            ValidationRule::new(
                "User",
                "email",
                RuleKind::Presence,
                "email != null",
                "required",
                1.0,
                Provenance::NormalizedDirect,
            ),
            ValidationRule::new(
                "User",
                "email",
                RuleKind::Format,
                "email(email)",
                "format",
                0.9,
                Provenance::Pattern,
            ),
            ValidationRule::new(
                "User",
                "id",
                RuleKind::Uniqueness,
                "unique(id)",
                "unique",
                0.95,
                Provenance::Graph,
            ),
        ];
        let metrics = RunMetrics::summarize(&rules, 2, Utc::now());

        assert_eq!(metrics.total_rules, 3);
        assert_eq!(metrics.rules_per_kind["PRESENCE"], 1);
        assert_eq!(metrics.rules_per_provenance["PATTERN"], 1);
        assert_eq!(metrics.duplicates_merged, 2);
        assert_relative_eq!(metrics.average_confidence, 0.95, epsilon = 1e-9);
    }

    #[test]
    fn empty_run_has_zero_average() {
        let metrics = RunMetrics::summarize(&[], 0, Utc::now());
        assert_eq!(metrics.total_rules, 0);
        assert_eq!(metrics.average_confidence, 0.0);
    }
}
