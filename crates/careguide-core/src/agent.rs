//! Agent state machine: states, the transition table, and per-request state.
//!
//! The driver that calls providers lives in the application crate; this
//! module only knows which moves are legal and how to interpret provider
//! output. Every step the driver takes goes through [`AgentState::advance`],
//! which rejects anything not listed in [`State::successors`].
//!
//! ```text
//! Start ─▶ EmergencyCheck ─┬─▶ EmergencyResponse
//!                          └─▶ Decide ─┬─▶ DirectAnswer ─────────────┐
//!                               ▲      └─▶ Retrieve ─▶ Grade ─┬──────┤
//!                               │                             ▼      ▼
//!                               └───────────────────────── Rewrite ─▶ Generate ─▶ SafetyCheck ─▶ Done
//! ```

use std::fmt;

use serde::Serialize;

use crate::error::{CoreError, CoreResult};
use crate::models::{Candidate, ChatMessage, GradingVerdict};

/// Default number of query rewrites before generation is forced.
pub const DEFAULT_MAX_REWRITES: u32 = 2;

/// Returned for emergencies without consulting any provider.
pub const EMERGENCY_MESSAGE: &str = "This may be a medical emergency. Call your local emergency number \
or go to the nearest emergency department now. Do not wait for an online answer.";

/// Returned when answer generation is unavailable.
pub const UNAVAILABLE_MESSAGE: &str =
    "Sorry, I'm unable to answer right now. Please try again later or contact your care team.";

/// Returned when the safety gate rejects the answer.
pub const REFUSAL_MESSAGE: &str = "I can't provide a safe answer to that question. \
Please contact your care team for guidance.";

// ============ States ============

/// Orchestrator states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Start,
    EmergencyCheck,
    EmergencyResponse,
    Decide,
    DirectAnswer,
    Retrieve,
    Grade,
    Rewrite,
    Generate,
    SafetyCheck,
    Done,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Start => "start",
            State::EmergencyCheck => "emergency_check",
            State::EmergencyResponse => "emergency_response",
            State::Decide => "decide",
            State::DirectAnswer => "direct_answer",
            State::Retrieve => "retrieve",
            State::Grade => "grade",
            State::Rewrite => "rewrite",
            State::Generate => "generate",
            State::SafetyCheck => "safety_check",
            State::Done => "done",
        }
    }

    /// Legal next states.
    pub fn successors(&self) -> &'static [State] {
        match self {
            State::Start => &[State::EmergencyCheck],
            State::EmergencyCheck => &[State::EmergencyResponse, State::Decide],
            State::EmergencyResponse => &[],
            State::Decide => &[State::DirectAnswer, State::Retrieve],
            State::DirectAnswer => &[State::Generate],
            State::Retrieve => &[State::Grade],
            State::Grade => &[State::Rewrite, State::Generate],
            // Rewriter failure falls through to generation.
            State::Rewrite => &[State::Decide, State::Generate],
            // Generator failure ends the request directly.
            State::Generate => &[State::SafetyCheck, State::Done],
            // One regeneration is allowed after a failed check.
            State::SafetyCheck => &[State::Generate, State::Done],
            State::Done => &[],
        }
    }

    pub fn can_transition_to(&self, next: State) -> bool {
        self.successors().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.successors().is_empty()
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============ Configuration ============

/// Immutable agent tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub max_rewrites: u32,
    pub safety: SafetyRules,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rewrites: DEFAULT_MAX_REWRITES,
            safety: SafetyRules::default(),
        }
    }
}

/// Deterministic checks applied to every draft before the LLM safety check.
#[derive(Debug, Clone, PartialEq)]
pub struct SafetyRules {
    /// Appended to grounded answers; a draft without it fails the check.
    pub disclaimer: String,
    /// Case-insensitive phrases that must never reach the user.
    pub blocked_phrases: Vec<String>,
}

impl Default for SafetyRules {
    fn default() -> Self {
        Self {
            disclaimer: "This information is general guidance and not a substitute for advice \
                         from your care team."
                .to_string(),
            blocked_phrases: vec![
                "stop taking your medication".to_string(),
                "no need to see a doctor".to_string(),
                "ignore your doctor".to_string(),
            ],
        }
    }
}

/// Why the deterministic check rejected a draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyViolation {
    MissingDisclaimer,
    BlockedPhrase(String),
}

impl fmt::Display for SafetyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SafetyViolation::MissingDisclaimer => f.write_str("missing disclaimer"),
            SafetyViolation::BlockedPhrase(p) => write!(f, "blocked phrase '{}'", p),
        }
    }
}

impl SafetyRules {
    /// Append the disclaimer unless the draft already carries it.
    pub fn with_disclaimer(&self, draft: &str) -> String {
        let draft = draft.trim();
        if self.disclaimer.is_empty() || draft.contains(self.disclaimer.as_str()) {
            draft.to_string()
        } else {
            format!("{}\n\n{}", draft, self.disclaimer)
        }
    }

    pub fn check(&self, draft: &str) -> Result<(), SafetyViolation> {
        if !self.disclaimer.is_empty() && !draft.contains(self.disclaimer.as_str()) {
            return Err(SafetyViolation::MissingDisclaimer);
        }
        let lower = draft.to_lowercase();
        if let Some(p) = self
            .blocked_phrases
            .iter()
            .find(|p| !p.trim().is_empty() && lower.contains(&p.to_lowercase()))
        {
            return Err(SafetyViolation::BlockedPhrase(p.clone()));
        }
        Ok(())
    }
}

// ============ Provider output interpretation ============

/// Classifier decision at `Decide`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Retrieve,
    DirectAnswer,
}

/// Leading words of a model reply, lowercased, punctuation stripped.
fn leading_words(reply: &str, n: usize) -> Vec<String> {
    reply
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .take(n)
        .map(str::to_lowercase)
        .collect()
}

/// Read the classifier's reply. Anything other than a clear "direct"
/// is routed to retrieval.
pub fn parse_route(reply: &str) -> Route {
    match leading_words(reply, 1).first().map(String::as_str) {
        Some("direct") => Route::DirectAnswer,
        _ => Route::Retrieve,
    }
}

/// Read the grader's reply. Unrecognized output yields `Unknown`.
pub fn parse_verdict(reply: &str) -> GradingVerdict {
    let words = leading_words(reply, 2);
    let words: Vec<&str> = words.iter().map(String::as_str).collect();
    match words.as_slice() {
        ["irrelevant", ..] | ["no"] | ["no", _] | ["not", "relevant"] => GradingVerdict::Irrelevant,
        ["relevant", ..] | ["yes", ..] => GradingVerdict::Relevant,
        _ => GradingVerdict::Unknown,
    }
}

/// Read the safety checker's reply. Only an explicit "safe" passes.
pub fn parse_safety(reply: &str) -> bool {
    matches!(leading_words(reply, 1).first().map(String::as_str), Some("safe"))
}

/// Next state after a grading verdict, given the rewrite budget.
pub fn after_grade(verdict: GradingVerdict, rewrite_count: u32, max_rewrites: u32) -> State {
    if !verdict.counts_as_relevant() && rewrite_count < max_rewrites {
        State::Rewrite
    } else {
        State::Generate
    }
}

// ============ Response ============

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Emergency,
    Answered,
    Refused,
    Unavailable,
}

/// Final result handed back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentResponse {
    pub answer: String,
    pub outcome: Outcome,
    /// Set when generation was forced past the rewrite budget or the
    /// rewriter failed.
    pub low_confidence: bool,
    /// Chunk ids the answer was grounded on.
    pub citations: Vec<String>,
    pub rewrite_count: u32,
    /// Every state visited, in order.
    pub trace: Vec<State>,
}

// ============ Per-request state ============

/// Mutable state owned by exactly one request.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub original_query: String,
    pub current_query: String,
    pub rewrite_count: u32,
    /// Candidates from the latest retrieval.
    pub retrieved: Vec<Candidate>,
    pub grading_verdict: GradingVerdict,
    pub is_emergency: bool,
    pub low_confidence: bool,
    /// False on the direct-answer path.
    pub grounded: bool,
    pub retrieval_count: u32,
    pub regenerated: bool,
    pub messages_log: Vec<ChatMessage>,
    best: Vec<Candidate>,
    state: State,
    trace: Vec<State>,
}

impl AgentState {
    pub fn new(query: impl Into<String>) -> Self {
        let query = query.into();
        Self {
            current_query: query.clone(),
            original_query: query,
            rewrite_count: 0,
            retrieved: Vec::new(),
            grading_verdict: GradingVerdict::default(),
            is_emergency: false,
            low_confidence: false,
            grounded: true,
            retrieval_count: 0,
            regenerated: false,
            messages_log: Vec::new(),
            best: Vec::new(),
            state: State::Start,
            trace: vec![State::Start],
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn trace(&self) -> &[State] {
        &self.trace
    }

    /// Move to `next`, enforcing the transition table.
    pub fn advance(&mut self, next: State) -> CoreResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        self.trace.push(next);
        Ok(())
    }

    /// Store a retrieval result and remember the strongest set seen.
    pub fn record_retrieval(&mut self, candidates: Vec<Candidate>) {
        self.retrieval_count += 1;
        if top_score(&candidates) > top_score(&self.best) {
            self.best = candidates.clone();
        }
        self.retrieved = candidates;
    }

    /// The strongest candidate set across all retrievals, possibly empty.
    pub fn best_candidates(&self) -> &[Candidate] {
        &self.best
    }

    /// Whether `Grade` must skip the grader and force generation.
    pub fn at_rewrite_limit(&self, config: &AgentConfig) -> bool {
        self.rewrite_count >= config.max_rewrites
    }

    /// Replace the working query after a successful rewrite.
    pub fn apply_rewrite(&mut self, query: impl Into<String>) {
        self.current_query = query.into();
        self.rewrite_count += 1;
        self.grading_verdict = GradingVerdict::Unknown;
    }

    /// Fall back to the best candidates and flag the answer.
    pub fn use_best_with_low_confidence(&mut self) {
        self.retrieved = self.best.clone();
        self.low_confidence = true;
    }

    pub fn into_response(self, answer: String, outcome: Outcome) -> AgentResponse {
        let citations = if outcome == Outcome::Answered && self.grounded {
            self.retrieved.iter().map(|c| c.chunk_id.clone()).collect()
        } else {
            Vec::new()
        };
        AgentResponse {
            answer,
            outcome,
            low_confidence: self.low_confidence,
            citations,
            rewrite_count: self.rewrite_count,
            trace: self.trace,
        }
    }
}

fn top_score(candidates: &[Candidate]) -> Option<f64> {
    candidates.first().map(|c| c.combined_score)
}
