//! Pipeline orchestration.
//!
//! Wires the phases together: normalize the raw document, run the pattern,
//! graph, and model extractors concurrently over the shared canonical spec,
//! then merge all four streams (the normalizer's direct rules included)
//! into one deduplicated, provenance-tagged rule set with run metrics.
//!
//! Normalization is the only stage that can fail the run, and only when it
//! exhausts its retries with no fallback document configured. Every other
//! degradation is logged and absorbed.

pub mod merge;
pub mod metrics;

use chrono::Utc;
use rulesmith_extract::{ModelExtractor, PatternExtractor, PatternLibrary};
use rulesmith_graph::{ConstraintInference, RelationshipGraph};
use rulesmith_llm::{ModelClient, RateLimiter, RetryPolicy};
use rulesmith_normalize::{direct_rules, Normalizer, NormalizerOptions};
use rulesmith_spec::{CanonicalSpec, ValidationRule};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub use merge::{merge, MergeOutcome, PriorityOrder};
pub use metrics::RunMetrics;
pub use rulesmith_normalize::RawSpec;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Clone)]
pub struct PipelineConfig {
    /// Rules below this confidence never reach the merge.
    pub confidence_threshold: f64,
    pub max_normalization_retries: u32,
    pub max_model_retries: u32,
    pub rate_limit_calls_per_minute: usize,
    pub request_timeout: Duration,
    /// Used when normalization exhausts its retries.
    pub fallback_spec: Option<CanonicalSpec>,
    pub priority_order: PriorityOrder,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.70,
            max_normalization_retries: 2,
            max_model_retries: 3,
            rate_limit_calls_per_minute: 50,
            request_timeout: Duration::from_secs(60),
            fallback_spec: None,
            priority_order: PriorityOrder::default(),
        }
    }
}

/// The pipeline's output: merged rules plus run accounting.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub rules: Vec<ValidationRule>,
    pub metrics: RunMetrics,
}

// ============================================================================
// Entry Point
// ============================================================================

/// Run the full extraction pipeline over one raw specification.
pub async fn extract_validations(
    raw: RawSpec,
    config: PipelineConfig,
    client: Arc<dyn ModelClient>,
) -> anyhow::Result<RuleSet> {
    let started_at = Utc::now();
    let retry = RetryPolicy {
        max_retries: config.max_model_retries,
        request_timeout: config.request_timeout,
        ..RetryPolicy::default()
    };

    let normalizer = Normalizer::new(
        Arc::clone(&client),
        NormalizerOptions {
            max_retries: config.max_normalization_retries,
            fallback: config.fallback_spec.clone(),
            retry: retry.clone(),
        },
    );
    let spec = normalizer.normalize(&raw).await?;
    info!(
        entities = spec.entities.len(),
        relationships = spec.relationships.len(),
        endpoints = spec.endpoints.len(),
        "specification normalized"
    );

    let library = PatternLibrary::standard();
    let limiter = Arc::new(RateLimiter::new(config.rate_limit_calls_per_minute));
    let model_extractor = ModelExtractor::new(Arc::clone(&client), limiter, retry);

    let (pattern_stream, graph_stream, model_stream) = tokio::join!(
        async { PatternExtractor::new(&library).extract(&spec) },
        async { ConstraintInference::default().infer(&RelationshipGraph::build(&spec)) },
        model_extractor.extract(&spec),
    );
    let direct_stream = direct_rules(&spec);
    info!(
        direct = direct_stream.len(),
        pattern = pattern_stream.len(),
        graph = graph_stream.len(),
        model = model_stream.len(),
        "extraction phases finished"
    );

    let streams = vec![direct_stream, pattern_stream, graph_stream, model_stream]
        .into_iter()
        .map(|stream| admit(stream, &spec, config.confidence_threshold))
        .collect();
    let outcome = merge(streams, &config.priority_order);
    let metrics = RunMetrics::summarize(&outcome.rules, outcome.duplicates_merged, started_at);
    info!(
        run_id = %metrics.run_id,
        rules = metrics.total_rules,
        duplicates_merged = metrics.duplicates_merged,
        "pipeline finished"
    );

    Ok(RuleSet {
        rules: outcome.rules,
        metrics,
    })
}

/// Pre-merge admission: drop rules below the confidence threshold and any
/// rule whose entity or attribute the spec does not know.
fn admit(
    stream: Vec<ValidationRule>,
    spec: &CanonicalSpec,
    threshold: f64,
) -> Vec<ValidationRule> {
    stream
        .into_iter()
        .filter(|rule| {
            if rule.confidence.value() < threshold {
                return false;
            }
            if !spec.is_known_attribute(&rule.entity, &rule.attribute) {
                warn!(
                    entity = %rule.entity,
                    attribute = %rule.attribute,
                    "rule references unknown entity or attribute, dropping"
                );
                return false;
            }
            true
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rulesmith_spec::{EntityDescriptor, FieldDescriptor, Provenance, RuleKind};

    fn spec() -> CanonicalSpec {
        CanonicalSpec {
            entities: vec![EntityDescriptor::new(
                "User",
                vec![FieldDescriptor::new("email", "string")],
            )],
            ..Default::default()
        }
    }

    fn rule(entity: &str, attribute: &str, confidence: f64) -> ValidationRule {
        ValidationRule::new(
            entity,
            attribute,
            RuleKind::Presence,
            format!("{attribute} != null"),
            "required",
            confidence,
            Provenance::Model,
        )
    }

    #[test]
    fn admission_applies_threshold_and_grounding() {
        let stream = vec![
            rule("User", "email", 0.9),
            rule("User", "email", 0.5),
            rule("User", "ghost_field", 0.9),
            rule("Ghost", "email", 0.9),
        ];
        let admitted = admit(stream, &spec(), 0.70);
        assert_eq!(admitted.len(), 1);
        assert_eq!(admitted[0].attribute, "email");
    }

    #[test]
    fn endpoint_scopes_pass_admission() {
        let stream = vec![rule("User", "request", 0.9)];
        assert_eq!(admit(stream, &spec(), 0.70).len(), 1);
    }
}
