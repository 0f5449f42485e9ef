//! Concrete embedding and LLM providers.
//!
//! - **[`DisabledEmbedder`] / [`DisabledLlm`]**: fail every call with a
//!   permanent error; used when a provider is not configured.
//! - **[`OpenAIEmbedder`] / [`OpenAILlm`]**: `POST /v1/embeddings` and
//!   `POST /v1/chat/completions`. Require `OPENAI_API_KEY`.
//! - **[`OllamaEmbedder`] / [`OllamaLlm`]**: `POST /api/embed` and
//!   `POST /api/chat` on a local Ollama instance.
//!
//! Every provider makes exactly one HTTP request per call. Status mapping:
//! - HTTP 429 and 5xx → [`BackendError::Transient`]
//! - other 4xx → [`BackendError::Permanent`]
//! - network errors → [`BackendError::Transient`]
//! - malformed response bodies → [`BackendError::Permanent`]
//!
//! Retries, timeouts, and concurrency limits are applied by
//! [`ProviderGateway`](crate::gateway::ProviderGateway).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use careguide_core::embedding::EmbeddingProvider;
use careguide_core::provider::{BackendError, LlmProvider, LlmRequest};

use crate::config::{EmbeddingConfig, LlmConfig};

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Build the embedding provider named by `config.provider`.
pub fn create_embedding_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Build the LLM provider named by `config.provider`.
pub fn create_llm_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledLlm)),
        "openai" => Ok(Arc::new(OpenAILlm::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaLlm::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .build()?)
}

fn openai_key() -> Result<String> {
    std::env::var("OPENAI_API_KEY").map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))
}

/// Send a JSON POST and return the parsed body, mapping failures onto
/// [`BackendError`].
async fn post_json(
    request: reqwest::RequestBuilder,
    body: &serde_json::Value,
    service: &str,
) -> Result<serde_json::Value, BackendError> {
    let response = request
        .header("Content-Type", "application/json")
        .json(body)
        .send()
        .await
        .map_err(|e| BackendError::Transient(format!("{} request failed: {}", service, e)))?;

    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| BackendError::Permanent(format!("{} returned invalid JSON: {}", service, e)));
    }

    let body_text = response.text().await.unwrap_or_default();
    let msg = format!("{} API error {}: {}", service, status, body_text);
    if status.as_u16() == 429 || status.is_server_error() {
        Err(BackendError::Transient(msg))
    } else {
        Err(BackendError::Permanent(msg))
    }
}

fn parse_vector(value: &serde_json::Value, service: &str) -> Result<Vec<f32>, BackendError> {
    let array = value
        .as_array()
        .ok_or_else(|| BackendError::Permanent(format!("Invalid {} response: embedding is not an array", service)))?;
    array
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| BackendError::Permanent(format!("Invalid {} response: non-numeric value", service)))
        })
        .collect()
}

fn require_model(model: &Option<String>, section: &str, service: &str) -> Result<String> {
    model
        .clone()
        .ok_or_else(|| anyhow!("{}.model required for {} provider", section, service))
}

// ============ Disabled ============

/// Embedding provider that always fails. Retrieval degrades to keyword-only.
pub struct DisabledEmbedder;

#[async_trait]
impl EmbeddingProvider for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, BackendError> {
        Err(BackendError::Permanent("Embedding provider is disabled".to_string()))
    }
}

/// LLM provider that always fails. Every chat op takes its fallback branch.
pub struct DisabledLlm;

#[async_trait]
impl LlmProvider for DisabledLlm {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _request: &LlmRequest) -> Result<String, BackendError> {
        Err(BackendError::Permanent("LLM provider is disabled".to_string()))
    }
}

// ============ OpenAI ============

pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dims: usize,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = require_model(&config.model, "embedding", "OpenAI")?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for OpenAI provider"))?;
        Ok(Self {
            client: http_client()?,
            api_key: openai_key()?,
            base_url: config.url.clone().unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            model,
            dims,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });
        let request = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key));
        let json = post_json(request, &body, "OpenAI").await?;
        parse_openai_embedding(&json)
    }
}

fn parse_openai_embedding(json: &serde_json::Value) -> Result<Vec<f32>, BackendError> {
    let embedding = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .ok_or_else(|| BackendError::Permanent("Invalid OpenAI response: missing embedding".to_string()))?;
    parse_vector(embedding, "OpenAI")
}

pub struct OpenAILlm {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAILlm {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            api_key: openai_key()?,
            base_url: config.url.clone().unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            model: require_model(&config.model, "llm", "OpenAI")?,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAILlm {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &LlmRequest) -> Result<String, BackendError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": request.messages,
            "temperature": request.params.temperature,
            "max_tokens": request.params.max_tokens,
        });
        let http = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key));
        let json = post_json(http, &body, "OpenAI").await?;
        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| BackendError::Permanent("Invalid OpenAI response: missing message content".to_string()))
    }
}

// ============ Ollama ============

pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = require_model(&config.model, "embedding", "Ollama")?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for Ollama provider"))?;
        Ok(Self {
            client: http_client()?,
            url: config.url.clone().unwrap_or_else(|| OLLAMA_BASE_URL.to_string()),
            model,
            dims,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });
        let request = self.client.post(format!("{}/api/embed", self.url));
        let json = post_json(request, &body, "Ollama").await?;
        let first = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .and_then(|e| e.first())
            .ok_or_else(|| BackendError::Permanent("Invalid Ollama response: missing embeddings array".to_string()))?;
        parse_vector(first, "Ollama")
    }
}

pub struct OllamaLlm {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl OllamaLlm {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            url: config.url.clone().unwrap_or_else(|| OLLAMA_BASE_URL.to_string()),
            model: require_model(&config.model, "llm", "Ollama")?,
        })
    }
}

#[async_trait]
impl LlmProvider for OllamaLlm {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &LlmRequest) -> Result<String, BackendError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": request.messages,
            "stream": false,
            "options": {
                "temperature": request.params.temperature,
                "num_predict": request.params.max_tokens,
            },
        });
        let http = self.client.post(format!("{}/api/chat", self.url));
        let json = post_json(http, &body, "Ollama").await?;
        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| BackendError::Permanent("Invalid Ollama response: missing message content".to_string()))
    }
}
