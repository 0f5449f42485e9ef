//! LLM provider contract and the canonical request shapes.
//!
//! Every chat-style capability (classify, grade, rewrite, generate, safety
//! check) is expressed as one [`LlmRequest`]; there is no per-call parameter
//! naming to drift out of sync.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::ChatMessage;

/// Failure of a single provider attempt.
///
/// The gateway retries [`BackendError::Transient`] and gives up immediately
/// on [`BackendError::Permanent`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BackendError {
    /// Rate limiting, 5xx, connection resets.
    #[error("transient provider failure: {0}")]
    Transient(String),
    /// Bad request, auth failure, malformed response.
    #[error("provider rejected request: {0}")]
    Permanent(String),
}

impl BackendError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}

/// Sampling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 512,
        }
    }
}

/// The one request shape accepted by every chat op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmRequest {
    pub messages: Vec<ChatMessage>,
    pub params: GenerationParams,
}

impl LlmRequest {
    pub fn new(messages: Vec<ChatMessage>, params: GenerationParams) -> Self {
        Self { messages, params }
    }
}

/// A chat-completion capability.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn model_name(&self) -> &str;
    async fn generate(&self, request: &LlmRequest) -> Result<String, BackendError>;
}
