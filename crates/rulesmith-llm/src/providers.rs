//! Concrete HTTP providers: OpenAI, Anthropic, and local OpenAI-compatible.

use crate::{ModelClient, ModelClientError, ModelInfo, ModelRequest, ModelResponse};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub provider: Provider,
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Anthropic,
    Local,
}

impl ModelConfig {
    /// Load from environment variables, trying providers in order.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            return Ok(Self {
                provider: Provider::OpenAI,
                api_key: key,
                model: std::env::var("OPENAI_MODEL")
                    .unwrap_or_else(|_| "gpt-4-turbo-preview".to_string()),
                base_url: std::env::var("OPENAI_BASE_URL").ok(),
                timeout_secs: 60,
            });
        }

        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            return Ok(Self {
                provider: Provider::Anthropic,
                api_key: key,
                model: std::env::var("ANTHROPIC_MODEL")
                    .unwrap_or_else(|_| "claude-3-opus-20240229".to_string()),
                base_url: None,
                timeout_secs: 60,
            });
        }

        if let Ok(url) = std::env::var("LOCAL_LLM_URL") {
            return Ok(Self {
                provider: Provider::Local,
                api_key: String::new(),
                model: std::env::var("LOCAL_LLM_MODEL").unwrap_or_else(|_| "default".to_string()),
                base_url: Some(url),
                timeout_secs: 120,
            });
        }

        Err(ConfigError::NoProviderConfigured)
    }

    pub fn openai(api_key: &str, model: &str) -> Self {
        Self {
            provider: Provider::OpenAI,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: None,
            timeout_secs: 60,
        }
    }

    pub fn anthropic(api_key: &str, model: &str) -> Self {
        Self {
            provider: Provider::Anthropic,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: None,
            timeout_secs: 60,
        }
    }

    pub fn local(url: &str, model: &str) -> Self {
        Self {
            provider: Provider::Local,
            api_key: String::new(),
            model: model.to_string(),
            base_url: Some(url.to_string()),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no model provider configured; set OPENAI_API_KEY, ANTHROPIC_API_KEY, or LOCAL_LLM_URL")]
    NoProviderConfigured,
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn http_client(config: &ModelConfig) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .expect("failed to create HTTP client")
}

// ============================================================================
// OpenAI / OpenAI-compatible
// ============================================================================

pub struct OpenAiClient {
    client: Client,
    config: ModelConfig,
}

impl OpenAiClient {
    pub fn new(config: ModelConfig) -> Self {
        let client = http_client(&config);
        Self { client, config }
    }

    fn chat_body(&self, request: &ModelRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if request.json_schema.is_some() {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }
        body
    }

    async fn complete_at(
        &self,
        base_url: &str,
        request: &ModelRequest,
    ) -> Result<ModelResponse, ModelClientError> {
        let url = format!("{}/chat/completions", base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&self.chat_body(request))
            .send()
            .await
            .map_err(|e| ModelClientError::Network(e.to_string()))?;

        if response.status() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(ModelClientError::RateLimited {
                retry_after_ms: retry_after * 1000,
            });
        }

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ModelClientError::Api(error_text));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ModelClientError::InvalidResponse(e.to_string()))?;

        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ModelClientError::InvalidResponse("missing message content".into()))?
            .to_string();

        Ok(ModelResponse {
            content,
            model: self.config.model.clone(),
            prompt_tokens: data["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as usize,
            completion_tokens: data["usage"]["completion_tokens"].as_u64().unwrap_or(0) as usize,
        })
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelClientError> {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1");
        self.complete_at(base, &request).await
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.config.model.clone(),
            max_tokens: 128_000,
            supports_json_mode: true,
        }
    }
}

// ============================================================================
// Anthropic
// ============================================================================

pub struct AnthropicClient {
    client: Client,
    config: ModelConfig,
}

impl AnthropicClient {
    pub fn new(config: ModelConfig) -> Self {
        let client = http_client(&config);
        Self { client, config }
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelClientError> {
        let url = "https://api.anthropic.com/v1/messages";

        let mut body = serde_json::json!({
            "model": self.config.model,
            "system": request.system,
            "messages": [{"role": "user", "content": request.user}],
            "max_tokens": request.max_tokens.unwrap_or(4096),
        });
        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }

        let response = self
            .client
            .post(url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelClientError::Network(e.to_string()))?;

        if response.status() == 429 {
            return Err(ModelClientError::RateLimited {
                retry_after_ms: 60_000,
            });
        }

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ModelClientError::Api(error_text));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ModelClientError::InvalidResponse(e.to_string()))?;

        let content = data["content"][0]["text"]
            .as_str()
            .ok_or_else(|| ModelClientError::InvalidResponse("missing content text".into()))?
            .to_string();

        Ok(ModelResponse {
            content,
            model: self.config.model.clone(),
            prompt_tokens: data["usage"]["input_tokens"].as_u64().unwrap_or(0) as usize,
            completion_tokens: data["usage"]["output_tokens"].as_u64().unwrap_or(0) as usize,
        })
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.config.model.clone(),
            max_tokens: 200_000,
            supports_json_mode: false,
        }
    }
}

// ============================================================================
// Unified Dispatch
// ============================================================================

/// Dispatches to the configured provider. Local endpoints (Ollama, vLLM)
/// are assumed OpenAI-compatible.
pub enum HttpModelClient {
    OpenAI(OpenAiClient),
    Anthropic(AnthropicClient),
    Local(OpenAiClient),
}

impl HttpModelClient {
    pub fn from_config(config: ModelConfig) -> Result<Self, ConfigError> {
        Ok(match config.provider {
            Provider::OpenAI => Self::OpenAI(OpenAiClient::new(config)),
            Provider::Anthropic => Self::Anthropic(AnthropicClient::new(config)),
            Provider::Local => {
                if config.base_url.is_none() {
                    return Err(ConfigError::Invalid(
                        "local provider requires a base URL".into(),
                    ));
                }
                Self::Local(OpenAiClient::new(config))
            }
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_config(ModelConfig::from_env()?)
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelClientError> {
        match self {
            Self::OpenAI(c) | Self::Local(c) => c.complete(request).await,
            Self::Anthropic(c) => c.complete(request).await,
        }
    }

    fn model_info(&self) -> ModelInfo {
        match self {
            Self::OpenAI(c) | Self::Local(c) => c.model_info(),
            Self::Anthropic(c) => c.model_info(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_constructors() {
        let config = ModelConfig::openai("test-key", "gpt-4");
        assert_eq!(config.provider, Provider::OpenAI);
        assert_eq!(config.model, "gpt-4");

        let config = ModelConfig::local("http://localhost:11434", "llama3");
        assert_eq!(config.provider, Provider::Local);
        assert_eq!(config.base_url.as_deref(), Some("http://localhost:11434"));
    }

    #[test]
    fn local_without_base_url_is_rejected() {
        let mut config = ModelConfig::local("http://localhost:8000", "m");
        config.base_url = None;
        assert!(HttpModelClient::from_config(config).is_err());
    }
}
