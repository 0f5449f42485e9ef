//! Provider gateway: the single path every external call takes.
//!
//! Wraps the embedding and LLM providers with per-op timeouts, exponential
//! backoff on transient failures, a concurrency cap shared by all requests,
//! and cooperative cancellation. Providers themselves make exactly one
//! attempt per call.
//!
//! # Retry Strategy
//!
//! - [`BackendError::Transient`] or a timeout → retry
//! - [`BackendError::Permanent`] → fail immediately with `Rejected`
//! - Backoff before attempt `n` (n ≥ 2): `base × 2^(n-2)`, capped at `max`
//!   (defaults 500 ms, 1 s, 2 s, ... capped at 4 s)
//!
//! Exhaustion yields a [`ProviderError`] whose kind is `Timeout` if the last
//! attempt timed out and `Exhausted` otherwise.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use careguide_core::embedding::EmbeddingProvider;
use careguide_core::provider::{BackendError, LlmProvider, LlmRequest};
use careguide_core::{ProviderError, ProviderErrorKind, ProviderOp};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::cancellation::CancellationToken;
use crate::config::{GatewayConfig, TimeoutsConfig};

/// Input for one gateway call. `Embed` takes `Text`; every chat op takes
/// `Chat`.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderPayload {
    Text(String),
    Chat(LlmRequest),
}

/// Output of one gateway call.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderOutput {
    Embedding(Vec<f32>),
    Text(String),
}

/// Attempt budget and backoff curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Wait before `attempt` (1-based). The first attempt never waits.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 1u32 << (attempt - 2).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl From<&GatewayConfig> for RetryPolicy {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

/// Shared by every request; clone the `Arc` rather than the gateway.
pub struct ProviderGateway {
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LlmProvider>,
    policy: RetryPolicy,
    timeouts: TimeoutsConfig,
    permits: Semaphore,
}

impl ProviderGateway {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
        config: &GatewayConfig,
    ) -> Self {
        Self {
            embedder,
            llm,
            policy: RetryPolicy::from(config),
            timeouts: config.timeouts.clone(),
            permits: Semaphore::new(config.max_concurrent_calls.max(1)),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn timeout_for(&self, op: ProviderOp) -> Duration {
        self.timeouts.for_op(op)
    }

    pub fn embedding_model(&self) -> &str {
        self.embedder.model_name()
    }

    pub fn embedding_enabled(&self) -> bool {
        self.embedder.is_enabled()
    }

    pub fn llm_model(&self) -> &str {
        self.llm.model_name()
    }

    /// Free slots for outbound calls.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `op` with retry, timeout, and backpressure.
    pub async fn call(
        &self,
        op: ProviderOp,
        payload: ProviderPayload,
        cancel: &CancellationToken,
    ) -> Result<ProviderOutput, ProviderError> {
        check_payload(op, &payload)?;

        let timeout = self.timeout_for(op);
        let mut last: Option<ProviderError> = None;

        for attempt in 1..=self.policy.max_attempts {
            if cancel.is_cancelled() {
                return Err(cancelled(op, attempt - 1));
            }

            let delay = self.policy.delay_before(attempt);
            if !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(cancelled(op, attempt - 1)),
                }
            }

            let permit = self.permits.acquire().await.map_err(|_| {
                ProviderError::new(op, ProviderErrorKind::Rejected, "gateway is shut down")
                    .with_attempts(attempt - 1)
            })?;
            debug!(op = %op, attempt, "provider call");
            let result = tokio::time::timeout(timeout, self.dispatch(op, &payload)).await;
            drop(permit);

            match result {
                Ok(Ok(output)) => return Ok(output),
                Ok(Err(BackendError::Permanent(msg))) => {
                    warn!(op = %op, attempt, error = %msg, "provider rejected request");
                    return Err(ProviderError::new(op, ProviderErrorKind::Rejected, msg)
                        .with_attempts(attempt));
                }
                Ok(Err(BackendError::Transient(msg))) => {
                    warn!(op = %op, attempt, error = %msg, "transient provider failure");
                    last = Some(ProviderError::new(op, ProviderErrorKind::Exhausted, msg));
                }
                Err(_) => {
                    warn!(op = %op, attempt, timeout_ms = timeout.as_millis() as u64, "provider call timed out");
                    last = Some(ProviderError::timeout(
                        op,
                        format!("no response within {:?}", timeout),
                    ));
                }
            }
        }

        Err(last
            .unwrap_or_else(|| {
                ProviderError::new(op, ProviderErrorKind::Exhausted, "no attempts were made")
            })
            .with_attempts(self.policy.max_attempts))
    }

    /// Embed one text.
    pub async fn embed(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<f32>, ProviderError> {
        match self
            .call(ProviderOp::Embed, ProviderPayload::Text(text.to_string()), cancel)
            .await?
        {
            ProviderOutput::Embedding(v) => Ok(v),
            ProviderOutput::Text(_) => Err(ProviderError::new(
                ProviderOp::Embed,
                ProviderErrorKind::InvalidRequest,
                "embedding call returned text",
            )),
        }
    }

    /// Run a chat op and return the reply text.
    pub async fn complete(
        &self,
        op: ProviderOp,
        request: LlmRequest,
        cancel: &CancellationToken,
    ) -> Result<String, ProviderError> {
        match self.call(op, ProviderPayload::Chat(request), cancel).await? {
            ProviderOutput::Text(t) => Ok(t),
            ProviderOutput::Embedding(_) => Err(ProviderError::new(
                op,
                ProviderErrorKind::InvalidRequest,
                "chat call returned an embedding",
            )),
        }
    }

    /// Single attempt of an externally-owned call (the vector index) under
    /// the op's timeout and the shared concurrency cap. No retry.
    pub async fn bounded<T, F>(&self, op: ProviderOp, fut: F) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        let _permit = self.permits.acquire().await.map_err(|_| {
            ProviderError::new(op, ProviderErrorKind::Rejected, "gateway is shut down")
        })?;
        let timeout = self.timeout_for(op);
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(
                ProviderError::timeout(op, format!("no response within {:?}", timeout))
                    .with_attempts(1),
            ),
        }
    }

    async fn dispatch(
        &self,
        op: ProviderOp,
        payload: &ProviderPayload,
    ) -> Result<ProviderOutput, BackendError> {
        match payload {
            ProviderPayload::Text(text) => self.embedder.embed(text).await.map(ProviderOutput::Embedding),
            ProviderPayload::Chat(request) => {
                debug!(op = %op, messages = request.messages.len(), "chat request");
                self.llm.generate(request).await.map(ProviderOutput::Text)
            }
        }
    }
}

fn check_payload(op: ProviderOp, payload: &ProviderPayload) -> Result<(), ProviderError> {
    let ok = match payload {
        ProviderPayload::Text(_) => op == ProviderOp::Embed,
        ProviderPayload::Chat(_) => op.is_chat(),
    };
    if ok {
        Ok(())
    } else {
        Err(ProviderError::new(
            op,
            ProviderErrorKind::InvalidRequest,
            format!("payload shape does not match op '{}'", op),
        ))
    }
}

fn cancelled(op: ProviderOp, attempts: u32) -> ProviderError {
    ProviderError::new(op, ProviderErrorKind::Cancelled, "request cancelled").with_attempts(attempts)
}
