//! Error types shared by the core and the application crate.
//!
//! Two families:
//! - [`CoreError`] for configuration and input validation. These are fatal
//!   and surface at startup or at the ingestion boundary.
//! - [`ProviderError`] for failures of external capabilities (embedding,
//!   LLM, vector search) after the gateway has exhausted its retries.
//!   Callers always recover from these locally.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Validation and configuration failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    /// A tuning parameter is out of range (chunk sizes, alpha, min_score, ...).
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A document or its metadata failed validation at ingestion.
    #[error("invalid document '{id}': {reason}")]
    InvalidDocument { id: String, reason: String },

    /// The orchestrator attempted a step outside the transition table.
    #[error("illegal transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

impl CoreError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        CoreError::InvalidConfiguration(msg.into())
    }
}

/// The kinds of external calls routed through the provider gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderOp {
    Embed,
    Generate,
    Classify,
    Grade,
    Rewrite,
    SafetyCheck,
    /// Nearest-neighbour lookup against the vector index.
    VectorSearch,
}

impl ProviderOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderOp::Embed => "embed",
            ProviderOp::Generate => "generate",
            ProviderOp::Classify => "classify",
            ProviderOp::Grade => "grade",
            ProviderOp::Rewrite => "rewrite",
            ProviderOp::SafetyCheck => "safety_check",
            ProviderOp::VectorSearch => "vector_search",
        }
    }

    /// Whether this op is served by the LLM (chat) provider.
    pub fn is_chat(&self) -> bool {
        !matches!(self, ProviderOp::Embed | ProviderOp::VectorSearch)
    }
}

impl fmt::Display for ProviderOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a provider call ultimately failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// The last attempt exceeded the per-op timeout.
    Timeout,
    /// Every attempt failed with a transient error.
    Exhausted,
    /// The provider refused the request (non-retryable).
    Rejected,
    /// The payload shape does not match the op.
    InvalidRequest,
    /// The request was cancelled before the call was made.
    Cancelled,
}

/// Typed failure of an external capability.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("provider {op} failed ({kind:?}) after {attempts} attempt(s): {cause}")]
pub struct ProviderError {
    pub op: ProviderOp,
    pub kind: ProviderErrorKind,
    pub attempts: u32,
    pub cause: String,
}

impl ProviderError {
    pub fn new(op: ProviderOp, kind: ProviderErrorKind, cause: impl Into<String>) -> Self {
        Self {
            op,
            kind,
            attempts: 0,
            cause: cause.into(),
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn timeout(op: ProviderOp, cause: impl Into<String>) -> Self {
        Self::new(op, ProviderErrorKind::Timeout, cause)
    }
}
