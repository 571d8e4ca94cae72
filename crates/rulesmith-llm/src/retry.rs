//! Retry with exponential backoff around individual model calls.

use crate::{ModelClient, ModelClientError, ModelRequest, ModelResponse};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first call.
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Per-attempt deadline; a timed-out call counts against the budget.
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32, error: &ModelClientError) -> Duration {
        match error {
            ModelClientError::RateLimited { retry_after_ms } => {
                Duration::from_millis(*retry_after_ms)
            }
            _ => self.base_delay * 2u32.saturating_pow(attempt),
        }
    }
}

/// Issue a model call, retrying transient failures up to the policy budget.
///
/// Non-transient errors (bad API key, unparseable response) fail fast; the
/// caller decides whether that degrades the phase or aborts the run.
pub async fn call_with_retry(
    client: &dyn ModelClient,
    request: ModelRequest,
    policy: &RetryPolicy,
) -> Result<ModelResponse, ModelClientError> {
    let mut attempt = 0;
    loop {
        let result = match tokio::time::timeout(policy.request_timeout, client.complete(request.clone()))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ModelClientError::Timeout),
        };

        match result {
            Ok(response) => return Ok(response),
            Err(error) if error.is_transient() && attempt < policy.max_retries => {
                let delay = policy.backoff(attempt, &error);
                warn!(attempt, ?delay, %error, "model call failed, backing off");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
