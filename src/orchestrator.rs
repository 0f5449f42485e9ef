//! Request driver for the agent state machine.
//!
//! One [`Orchestrator`] is shared by all requests; each call to
//! [`Orchestrator::answer`] owns its own [`AgentState`] and walks the
//! transition table in [`careguide_core::agent`] until a terminal state.
//!
//! Every provider failure has a local fallback:
//!
//! | Step | On failure |
//! |------|------------|
//! | classify | retrieve |
//! | embed / vector search | keyword-only retrieval |
//! | grade | verdict `unknown` (treated as relevant) |
//! | rewrite | generate with the best candidates, low confidence |
//! | generate | "unable to answer right now" |
//! | safety check | fixed refusal |
//!
//! The only error returned to the caller is [`OrchestratorError::Cancelled`].

use std::sync::Arc;

use anyhow::Result;
use careguide_core::agent::{
    after_grade, parse_route, parse_safety, parse_verdict, AgentConfig, AgentResponse, AgentState,
    Outcome, Route, State, EMERGENCY_MESSAGE, REFUSAL_MESSAGE, UNAVAILABLE_MESSAGE,
};
use careguide_core::emergency::EmergencyDetector;
use careguide_core::models::{ChatMessage, GradingVerdict};
use careguide_core::provider::GenerationParams;
use careguide_core::{ProviderError, ProviderErrorKind, ProviderOp};
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cancellation::CancellationToken;
use crate::config::Config;
use crate::gateway::ProviderGateway;
use crate::prompts;
use crate::retrieval::HybridRetriever;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("request cancelled")]
    Cancelled,
}

/// Drives requests through the agent state machine.
pub struct Orchestrator {
    detector: EmergencyDetector,
    gateway: Arc<ProviderGateway>,
    retriever: Arc<HybridRetriever>,
    config: AgentConfig,
    generation: GenerationParams,
}

/// Per-request scratch values that are not part of [`AgentState`].
#[derive(Default)]
struct Scratch {
    draft: Option<String>,
    result: Option<(String, Outcome)>,
}

impl Orchestrator {
    pub fn new(
        detector: EmergencyDetector,
        gateway: Arc<ProviderGateway>,
        retriever: Arc<HybridRetriever>,
        config: AgentConfig,
        generation: GenerationParams,
    ) -> Self {
        Self {
            detector,
            gateway,
            retriever,
            config,
            generation,
        }
    }

    pub fn from_config(
        config: &Config,
        gateway: Arc<ProviderGateway>,
        retriever: Arc<HybridRetriever>,
    ) -> Result<Self> {
        Ok(Self::new(
            config.emergency_detector()?,
            gateway,
            retriever,
            config.agent_config(),
            config.generation_params(),
        ))
    }

    pub fn agent_config(&self) -> &AgentConfig {
        &self.config
    }

    /// Answer one user query.
    pub async fn answer(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<AgentResponse, OrchestratorError> {
        let span = info_span!("answer", request_id = %Uuid::new_v4());
        self.run(query, cancel).instrument(span).await
    }

    async fn run(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<AgentResponse, OrchestratorError> {
        let mut st = AgentState::new(query);
        st.messages_log.push(ChatMessage::user(query));
        let mut scratch = Scratch::default();

        loop {
            let current = st.state();

            // Emergency detection runs before any cancellation or provider
            // check can intervene.
            if !matches!(
                current,
                State::Start | State::EmergencyCheck | State::EmergencyResponse | State::Done
            ) && cancel.is_cancelled()
            {
                debug!(state = %current, "cancelled");
                return Err(OrchestratorError::Cancelled);
            }

            let next = match current {
                State::EmergencyResponse | State::Done => {
                    return Ok(finish(st, current, scratch.result.take()));
                }
                State::Start => State::EmergencyCheck,
                State::EmergencyCheck => self.emergency_check(&mut st),
                State::Decide => self.decide(&st, cancel).await?,
                State::DirectAnswer => {
                    st.grounded = false;
                    State::Generate
                }
                State::Retrieve => {
                    let result = self.retriever.retrieve(&st.current_query, cancel).await;
                    st.record_retrieval(result.candidates);
                    State::Grade
                }
                State::Grade => self.grade(&mut st, cancel).await?,
                State::Rewrite => self.rewrite(&mut st, cancel).await?,
                State::Generate => self.generate(&mut st, &mut scratch, cancel).await?,
                State::SafetyCheck => self.safety_check(&mut st, &mut scratch, cancel).await?,
            };

            debug!(from = %current, to = %next, "transition");
            if let Err(e) = st.advance(next) {
                error!(error = %e, "state machine violation");
                return Ok(st.into_response(UNAVAILABLE_MESSAGE.to_string(), Outcome::Unavailable));
            }
        }
    }

    fn emergency_check(&self, st: &mut AgentState) -> State {
        if let Some(matched) = self.detector.matched(&st.original_query) {
            warn!(matched = %matched, "emergency detected");
            st.is_emergency = true;
            State::EmergencyResponse
        } else {
            State::Decide
        }
    }

    async fn decide(
        &self,
        st: &AgentState,
        cancel: &CancellationToken,
    ) -> Result<State, OrchestratorError> {
        // A rewritten query was already judged to need documents.
        if st.rewrite_count > 0 {
            return Ok(State::Retrieve);
        }
        let request = prompts::classify(&st.current_query);
        match self
            .gateway
            .complete(ProviderOp::Classify, request, cancel)
            .await
        {
            Ok(reply) => Ok(match parse_route(&reply) {
                Route::DirectAnswer => State::DirectAnswer,
                Route::Retrieve => State::Retrieve,
            }),
            Err(e) => {
                check_cancelled(&e, cancel)?;
                warn!(error = %e, "classifier unavailable, retrieving");
                Ok(State::Retrieve)
            }
        }
    }

    async fn grade(
        &self,
        st: &mut AgentState,
        cancel: &CancellationToken,
    ) -> Result<State, OrchestratorError> {
        if st.rewrite_count > 0 && st.at_rewrite_limit(&self.config) {
            debug!(rewrites = st.rewrite_count, "rewrite budget spent, forcing generation");
            st.use_best_with_low_confidence();
            return Ok(State::Generate);
        }

        let verdict = if st.retrieved.is_empty() {
            GradingVerdict::Irrelevant
        } else {
            let passages = self.retriever.passages(&st.retrieved);
            let request = prompts::grade(&st.current_query, &passages);
            match self.gateway.complete(ProviderOp::Grade, request, cancel).await {
                Ok(reply) => parse_verdict(&reply),
                Err(e) => {
                    check_cancelled(&e, cancel)?;
                    warn!(error = %e, "grader unavailable, treating candidates as relevant");
                    GradingVerdict::Unknown
                }
            }
        };
        st.grading_verdict = verdict;
        debug!(verdict = ?verdict, candidates = st.retrieved.len(), "graded");

        let next = after_grade(verdict, st.rewrite_count, self.config.max_rewrites);
        if next == State::Generate && !verdict.counts_as_relevant() {
            st.use_best_with_low_confidence();
        }
        Ok(next)
    }

    async fn rewrite(
        &self,
        st: &mut AgentState,
        cancel: &CancellationToken,
    ) -> Result<State, OrchestratorError> {
        let request = prompts::rewrite(&st.original_query, &st.current_query, self.generation);
        match self.gateway.complete(ProviderOp::Rewrite, request, cancel).await {
            Ok(reply) if !reply.trim().is_empty() => {
                let rewritten = reply.trim().to_string();
                debug!(query = %rewritten, "query rewritten");
                st.apply_rewrite(rewritten);
                Ok(State::Decide)
            }
            Ok(_) => {
                warn!("rewriter returned an empty query");
                st.use_best_with_low_confidence();
                Ok(State::Generate)
            }
            Err(e) => {
                check_cancelled(&e, cancel)?;
                warn!(error = %e, "rewriter unavailable, generating with best candidates");
                st.use_best_with_low_confidence();
                Ok(State::Generate)
            }
        }
    }

    async fn generate(
        &self,
        st: &mut AgentState,
        scratch: &mut Scratch,
        cancel: &CancellationToken,
    ) -> Result<State, OrchestratorError> {
        let request = if st.grounded {
            let passages = self.retriever.passages(&st.retrieved);
            prompts::generate(&st.current_query, &passages, st.regenerated, self.generation)
        } else {
            prompts::direct(&st.current_query, st.regenerated, self.generation)
        };

        match self.gateway.complete(ProviderOp::Generate, request, cancel).await {
            Ok(text) if !text.trim().is_empty() => {
                scratch.draft = Some(self.config.safety.with_disclaimer(&text));
                Ok(State::SafetyCheck)
            }
            Ok(_) => {
                warn!("generator returned an empty answer");
                scratch.result = Some((UNAVAILABLE_MESSAGE.to_string(), Outcome::Unavailable));
                Ok(State::Done)
            }
            Err(e) => {
                check_cancelled(&e, cancel)?;
                warn!(error = %e, "generator unavailable");
                scratch.result = Some((UNAVAILABLE_MESSAGE.to_string(), Outcome::Unavailable));
                Ok(State::Done)
            }
        }
    }

    async fn safety_check(
        &self,
        st: &mut AgentState,
        scratch: &mut Scratch,
        cancel: &CancellationToken,
    ) -> Result<State, OrchestratorError> {
        let draft = scratch.draft.take().unwrap_or_default();

        let passed = match self.config.safety.check(&draft) {
            Err(violation) => {
                warn!(violation = %violation, "draft failed deterministic safety check");
                false
            }
            Ok(()) => {
                let request = prompts::safety_check(&st.original_query, &draft);
                match self
                    .gateway
                    .complete(ProviderOp::SafetyCheck, request, cancel)
                    .await
                {
                    Ok(reply) => {
                        let safe = parse_safety(&reply);
                        if !safe {
                            warn!(reply = %reply.trim(), "draft failed safety review");
                        }
                        safe
                    }
                    Err(e) => {
                        check_cancelled(&e, cancel)?;
                        warn!(error = %e, "safety checker unavailable, refusing");
                        scratch.result = Some((REFUSAL_MESSAGE.to_string(), Outcome::Refused));
                        return Ok(State::Done);
                    }
                }
            }
        };

        if passed {
            scratch.result = Some((draft, Outcome::Answered));
            Ok(State::Done)
        } else if !st.regenerated {
            st.regenerated = true;
            Ok(State::Generate)
        } else {
            scratch.result = Some((REFUSAL_MESSAGE.to_string(), Outcome::Refused));
            Ok(State::Done)
        }
    }
}

fn check_cancelled(e: &ProviderError, cancel: &CancellationToken) -> Result<(), OrchestratorError> {
    if e.kind == ProviderErrorKind::Cancelled || cancel.is_cancelled() {
        Err(OrchestratorError::Cancelled)
    } else {
        Ok(())
    }
}

fn finish(
    mut st: AgentState,
    terminal: State,
    result: Option<(String, Outcome)>,
) -> AgentResponse {
    let (answer, outcome) = match terminal {
        State::EmergencyResponse => (EMERGENCY_MESSAGE.to_string(), Outcome::Emergency),
        _ => result.unwrap_or_else(|| (UNAVAILABLE_MESSAGE.to_string(), Outcome::Unavailable)),
    };
    st.messages_log.push(ChatMessage::assistant(answer.as_str()));
    info!(
        outcome = ?outcome,
        rewrites = st.rewrite_count,
        retrievals = st.retrieval_count,
        low_confidence = st.low_confidence,
        "request finished"
    );
    st.into_response(answer, outcome)
}
