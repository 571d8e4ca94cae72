//! Deterministic replay client.
//!
//! Stands in for the network-backed providers in tests and offline dry
//! runs: the whole pipeline exercises its real control flow against canned
//! responses.

use crate::{ModelClient, ModelClientError, ModelInfo, ModelRequest, ModelResponse};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

enum Script {
    /// Replay responses in order; exhaustion is an API error.
    Sequence(Mutex<VecDeque<Result<String, ModelClientError>>>),
    /// The same response for every request.
    Constant(String),
    /// Route on a substring of the user prompt, with a default.
    Routed {
        routes: Vec<(String, String)>,
        default: String,
    },
    /// Fail every request.
    AlwaysErr(Box<dyn Fn() -> ModelClientError + Send + Sync>),
}

pub struct ScriptedClient {
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedClient {
    pub fn new(responses: Vec<Result<String, ModelClientError>>) -> Self {
        Self {
            script: Script::Sequence(Mutex::new(responses.into())),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn constant(content: impl Into<String>) -> Self {
        Self {
            script: Script::Constant(content.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn routed(routes: Vec<(&str, &str)>, default: &str) -> Self {
        Self {
            script: Script::Routed {
                routes: routes
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                default: default.to_string(),
            },
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always_err(make: impl Fn() -> ModelClientError + Send + Sync + 'static) -> Self {
        Self {
            script: Script::AlwaysErr(Box::new(make)),
            calls: AtomicUsize::new(0),
        }
    }

    /// Total requests received, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn respond(&self, request: &ModelRequest) -> Result<String, ModelClientError> {
        match &self.script {
            Script::Sequence(queue) => queue
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ModelClientError::Api("script exhausted".into()))),
            Script::Constant(content) => Ok(content.clone()),
            Script::Routed { routes, default } => Ok(routes
                .iter()
                .find(|(needle, _)| request.user.contains(needle))
                .map(|(_, response)| response.clone())
                .unwrap_or_else(|| default.clone())),
            Script::AlwaysErr(make) => Err(make()),
        }
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.respond(&request).map(|content| ModelResponse {
            content,
            model: "scripted".to_string(),
            prompt_tokens: 0,
            completion_tokens: 0,
        })
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: "scripted".to_string(),
            max_tokens: usize::MAX,
            supports_json_mode: true,
        }
    }
}
