//! Client layer for the external language-model service.
//!
//! The rest of the pipeline depends only on the [`ModelClient`] trait:
//! structured request in, text response out. Concrete HTTP providers live
//! in [`providers`]; a deterministic replay client for tests and offline
//! dry runs lives in [`script`]. All outbound traffic is expected to pass
//! through the shared [`RateLimiter`] and the [`RetryPolicy`].

pub mod limiter;
pub mod providers;
pub mod retry;
pub mod script;

use async_trait::async_trait;
use serde_json::Value;

pub use limiter::RateLimiter;
pub use providers::{HttpModelClient, ModelConfig, Provider};
pub use retry::{call_with_retry, RetryPolicy};
pub use script::ScriptedClient;

// ============================================================================
// Request / Response
// ============================================================================

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    /// When set, providers that support JSON mode ask for object output.
    pub json_schema: Option<Value>,
}

impl ModelRequest {
    /// A low-temperature structured extraction request, the only shape the
    /// pipeline ever sends.
    pub fn extraction(system: impl Into<String>, user: impl Into<String>, schema: Value) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            max_tokens: Some(4096),
            temperature: Some(0.2),
            json_schema: Some(schema),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub content: String,
    pub model: String,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub max_tokens: usize,
    pub supports_json_mode: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ModelClientError {
    #[error("API error: {0}")]
    Api(String),
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("request timed out")]
    Timeout,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("network error: {0}")]
    Network(String),
}

impl ModelClientError {
    /// Transient failures are worth retrying; the rest fail fast.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ModelClientError::RateLimited { .. }
                | ModelClientError::Network(_)
                | ModelClientError::Timeout
        )
    }
}

// ============================================================================
// Client Trait
// ============================================================================

/// The single coupling point to the external language-model service.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelClientError>;

    fn model_info(&self) -> ModelInfo;
}

// ============================================================================
// Response Cleanup
// ============================================================================

/// Strip the markdown code fences models like to wrap JSON output in.
pub fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\r', '\n']);
    match rest.strip_suffix("```") {
        Some(body) => body.trim(),
        None => rest.trim(),
    }
}
