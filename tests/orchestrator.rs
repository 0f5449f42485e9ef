//! End-to-end tests for the answer pipeline with scripted providers.

mod common;

use std::sync::Arc;
use std::time::Duration;

use careguide::cancellation::CancellationToken;
use careguide::orchestrator::OrchestratorError;
use careguide::prompts::CORRECTIVE_INSTRUCTION;
use careguide_core::agent::{Outcome, State, EMERGENCY_MESSAGE, REFUSAL_MESSAGE, UNAVAILABLE_MESSAGE};
use careguide_core::provider::BackendError;
use careguide_core::ProviderOp;

use common::*;

fn transient() -> BackendError {
    BackendError::Transient("HTTP 503".to_string())
}

// ─── Emergency ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_emergency_short_circuits_without_provider_calls() {
    let embedder = Arc::new(HashEmbedder::new());
    let llm = Arc::new(ScriptedLlm::new());
    let engine = ingested_engine(test_config(), embedder.clone(), llm.clone()).await;
    let embeds_after_ingest = embedder.calls();

    let response = engine
        .orchestrator
        .answer(
            "I have severe chest pain and can't breathe",
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(response.outcome, Outcome::Emergency);
    assert_eq!(response.answer, EMERGENCY_MESSAGE);
    assert_eq!(
        response.trace,
        vec![State::Start, State::EmergencyCheck, State::EmergencyResponse]
    );
    assert!(response.citations.is_empty());
    assert_eq!(llm.total_calls(), 0);
    assert_eq!(embedder.calls(), embeds_after_ingest);
}

#[tokio::test]
async fn test_emergency_wins_over_failing_providers_and_cancellation() {
    let embedder = Arc::new(HashEmbedder::failing(transient()));
    let llm = Arc::new(ScriptedLlm::new().fail(ProviderOp::Classify, transient()));
    let engine = ingested_engine(test_config(), embedder, llm.clone()).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let response = engine
        .orchestrator
        .answer("my father is unconscious", &cancel)
        .await
        .unwrap();

    assert_eq!(response.outcome, Outcome::Emergency);
    assert_eq!(llm.total_calls(), 0);
}

// ─── Happy paths ────────────────────────────────────────────────────

#[tokio::test]
async fn test_grounded_answer_with_citations_and_disclaimer() {
    let llm = Arc::new(ScriptedLlm::new());
    let engine = ingested_engine(test_config(), Arc::new(HashEmbedder::new()), llm.clone()).await;

    let response = engine
        .orchestrator
        .answer("Can I eat before my colonoscopy?", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.outcome, Outcome::Answered);
    assert!(response.answer.starts_with(GROUNDED_ANSWER));
    let disclaimer = &engine.orchestrator.agent_config().safety.disclaimer;
    assert!(response.answer.contains(disclaimer.as_str()));
    assert!(!response.low_confidence);
    assert_eq!(response.rewrite_count, 0);
    assert!(response.citations.iter().any(|c| c.starts_with("colonoscopy.md")));
    assert_eq!(
        response.trace,
        vec![
            State::Start,
            State::EmergencyCheck,
            State::Decide,
            State::Retrieve,
            State::Grade,
            State::Generate,
            State::SafetyCheck,
            State::Done,
        ]
    );
    assert_eq!(llm.calls(ProviderOp::Classify), 1);
    assert_eq!(llm.calls(ProviderOp::Grade), 1);
    assert_eq!(llm.calls(ProviderOp::Generate), 1);
    assert_eq!(llm.calls(ProviderOp::SafetyCheck), 1);

    let generate = &llm.requests(ProviderOp::Generate)[0];
    assert!(generate.messages[1].content.contains("solid food"));
}

#[tokio::test]
async fn test_default_scoring_grades_only_candidates_above_the_floor() {
    let llm = Arc::new(ScriptedLlm::new());
    let engine = engine_with_query_index(
        default_scoring_config(),
        Arc::new(HashEmbedder::new()),
        llm.clone(),
        Arc::new(FixedIndex::new(&[("colonoscopy.md#0", 0.92), ("mri.md#0", -0.4)])),
    )
    .await;

    let response = engine
        .orchestrator
        .answer("Can I eat solid food before my colonoscopy?", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.outcome, Outcome::Answered);
    assert!(!response.low_confidence);
    assert_eq!(response.citations.len(), 1);
    assert!(response.citations[0].starts_with("colonoscopy.md"));

    let grade = llm.requests(ProviderOp::Grade);
    assert_eq!(grade.len(), 1);
    let passages = &grade[0].messages[1].content;
    assert!(passages.contains("apple juice"));
    assert!(!passages.contains("pacemaker"));
    assert!(!passages.contains("lab order"));
}

#[tokio::test]
async fn test_default_scoring_answers_from_keywords_when_no_vectors_match() {
    let llm = Arc::new(ScriptedLlm::new());
    let engine = engine_with_query_index(
        default_scoring_config(),
        Arc::new(HashEmbedder::new()),
        llm.clone(),
        Arc::new(FixedIndex::empty()),
    )
    .await;

    let response = engine
        .orchestrator
        .answer("Should I mention my pacemaker?", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.outcome, Outcome::Answered);
    assert!(!response.low_confidence);
    assert_eq!(response.rewrite_count, 0);
    assert!(response.citations.iter().any(|c| c.starts_with("mri.md")));
    assert_eq!(llm.calls(ProviderOp::Grade), 1);
    assert!(llm.requests(ProviderOp::Grade)[0].messages[1]
        .content
        .contains("metal objects"));
}

#[tokio::test]
async fn test_direct_answer_skips_retrieval_and_citations() {
    let llm = Arc::new(
        ScriptedLlm::new()
            .reply(ProviderOp::Classify, "DIRECT")
            .reply(ProviderOp::Generate, "Hello! How can I help with your procedure?"),
    );
    let engine = ingested_engine(test_config(), Arc::new(HashEmbedder::new()), llm.clone()).await;

    let response = engine
        .orchestrator
        .answer("hello there", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.outcome, Outcome::Answered);
    assert!(response.citations.is_empty());
    assert!(response.trace.contains(&State::DirectAnswer));
    assert!(!response.trace.contains(&State::Retrieve));
    assert_eq!(llm.calls(ProviderOp::Grade), 0);
}

#[tokio::test]
async fn test_classifier_failure_falls_back_to_retrieval() {
    let llm = Arc::new(ScriptedLlm::new().fail(ProviderOp::Classify, transient()));
    let engine = ingested_engine(test_config(), Arc::new(HashEmbedder::new()), llm.clone()).await;

    let response = engine
        .orchestrator
        .answer("Can I drink water before a blood test?", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.outcome, Outcome::Answered);
    assert!(response.trace.contains(&State::Retrieve));
    // Two attempts under the test retry policy.
    assert_eq!(llm.calls(ProviderOp::Classify), 2);
}

// ─── Grading and rewriting ──────────────────────────────────────────

#[tokio::test]
async fn test_irrelevant_grades_exhaust_rewrites_then_force_generation() {
    let llm = Arc::new(
        ScriptedLlm::new()
            .reply(ProviderOp::Grade, "IRRELEVANT")
            .then(
                ProviderOp::Rewrite,
                vec![
                    Ok("colonoscopy fasting rules".to_string()),
                    Ok("food before colonoscopy".to_string()),
                ],
            ),
    );
    let engine = ingested_engine(test_config(), Arc::new(HashEmbedder::new()), llm.clone()).await;

    let response = engine
        .orchestrator
        .answer("what about eating before the test?", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.rewrite_count, 2);
    assert!(response.low_confidence);
    assert_eq!(response.outcome, Outcome::Answered);
    assert_eq!(llm.calls(ProviderOp::Grade), 2);
    assert_eq!(llm.calls(ProviderOp::Rewrite), 2);
    assert_eq!(llm.calls(ProviderOp::Classify), 1);
    let retrievals = response
        .trace
        .iter()
        .filter(|s| **s == State::Retrieve)
        .count();
    assert_eq!(retrievals, 3);
}

#[tokio::test]
async fn test_rewrite_budget_bounds_the_loop() {
    for max_rewrites in 0..=3u32 {
        let config = test_config_with(&format!("max_rewrites = {}", max_rewrites));
        let llm = Arc::new(ScriptedLlm::new().reply(ProviderOp::Grade, "no"));
        let engine = ingested_engine(config, Arc::new(HashEmbedder::new()), llm.clone()).await;

        let response = engine
            .orchestrator
            .answer("what should I eat before the test?", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.rewrite_count, max_rewrites);
        assert!(response.low_confidence);
        // The final retrieval after a spent budget is not graded.
        assert_eq!(llm.calls(ProviderOp::Grade) as u32, max_rewrites.max(1));
        let retrievals = response
            .trace
            .iter()
            .filter(|s| **s == State::Retrieve)
            .count() as u32;
        assert_eq!(retrievals, max_rewrites + 1);
    }
}

#[tokio::test]
async fn test_grader_failure_counts_as_relevant() {
    let llm = Arc::new(ScriptedLlm::new().fail(ProviderOp::Grade, transient()));
    let engine = ingested_engine(test_config(), Arc::new(HashEmbedder::new()), llm.clone()).await;

    let response = engine
        .orchestrator
        .answer("Can I eat before my colonoscopy?", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.outcome, Outcome::Answered);
    assert!(!response.low_confidence);
    assert_eq!(response.rewrite_count, 0);
    assert_eq!(llm.calls(ProviderOp::Rewrite), 0);
}

#[tokio::test]
async fn test_rewriter_failure_generates_with_low_confidence() {
    let llm = Arc::new(
        ScriptedLlm::new()
            .reply(ProviderOp::Grade, "IRRELEVANT")
            .fail(ProviderOp::Rewrite, BackendError::Permanent("bad request".into())),
    );
    let engine = ingested_engine(test_config(), Arc::new(HashEmbedder::new()), llm.clone()).await;

    let response = engine
        .orchestrator
        .answer("Can I eat before my colonoscopy?", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.outcome, Outcome::Answered);
    assert!(response.low_confidence);
    assert_eq!(response.rewrite_count, 0);
    // Permanent errors are not retried.
    assert_eq!(llm.calls(ProviderOp::Rewrite), 1);
    assert_eq!(llm.calls(ProviderOp::Generate), 1);
}

// ─── Degraded retrieval ─────────────────────────────────────────────

#[tokio::test]
async fn test_stalled_vector_index_falls_back_to_keyword_hits() {
    let llm = Arc::new(ScriptedLlm::new());
    let engine = engine_with_query_index(
        test_config(),
        Arc::new(HashEmbedder::new()),
        llm.clone(),
        Arc::new(StalledIndex),
    )
    .await;

    let response = tokio::time::timeout(
        Duration::from_secs(5),
        engine
            .orchestrator
            .answer("Can I eat before my colonoscopy?", &CancellationToken::new()),
    )
    .await
    .expect("vector timeout must bound the request")
    .unwrap();

    assert_eq!(response.outcome, Outcome::Answered);
    assert!(response.citations.iter().any(|c| c.starts_with("colonoscopy.md")));
}

#[tokio::test]
async fn test_embedding_outage_still_answers_from_keywords() {
    let llm = Arc::new(ScriptedLlm::new());
    let engine = ingested_engine(
        test_config(),
        Arc::new(HashEmbedder::failing(transient())),
        llm.clone(),
    )
    .await;

    let response = engine
        .orchestrator
        .answer("Can I eat before my colonoscopy?", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.outcome, Outcome::Answered);
    assert!(!response.citations.is_empty());
}

// ─── Generation and safety ──────────────────────────────────────────

#[tokio::test]
async fn test_generator_failure_is_unavailable() {
    let llm = Arc::new(ScriptedLlm::new().fail(ProviderOp::Generate, transient()));
    let engine = ingested_engine(test_config(), Arc::new(HashEmbedder::new()), llm.clone()).await;

    let response = engine
        .orchestrator
        .answer("Can I eat before my colonoscopy?", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.outcome, Outcome::Unavailable);
    assert_eq!(response.answer, UNAVAILABLE_MESSAGE);
    assert!(response.citations.is_empty());
    assert_eq!(llm.calls(ProviderOp::SafetyCheck), 0);
    assert_eq!(response.trace.last(), Some(&State::Done));
}

#[tokio::test]
async fn test_unsafe_draft_is_regenerated_once_with_correction() {
    let llm = Arc::new(ScriptedLlm::new().then(
        ProviderOp::SafetyCheck,
        vec![Ok("UNSAFE: gives a dosage".to_string()), Ok("SAFE".to_string())],
    ));
    let engine = ingested_engine(test_config(), Arc::new(HashEmbedder::new()), llm.clone()).await;

    let response = engine
        .orchestrator
        .answer("Can I eat before my colonoscopy?", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.outcome, Outcome::Answered);
    assert_eq!(llm.calls(ProviderOp::Generate), 2);
    let second = &llm.requests(ProviderOp::Generate)[1];
    assert_eq!(
        second.messages.last().map(|m| m.content.as_str()),
        Some(CORRECTIVE_INSTRUCTION)
    );
}

#[tokio::test]
async fn test_second_unsafe_draft_is_refused() {
    let llm = Arc::new(ScriptedLlm::new().reply(ProviderOp::SafetyCheck, "UNSAFE"));
    let engine = ingested_engine(test_config(), Arc::new(HashEmbedder::new()), llm.clone()).await;

    let response = engine
        .orchestrator
        .answer("Can I eat before my colonoscopy?", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.outcome, Outcome::Refused);
    assert_eq!(response.answer, REFUSAL_MESSAGE);
    assert!(response.citations.is_empty());
    assert_eq!(llm.calls(ProviderOp::Generate), 2);
    assert_eq!(llm.calls(ProviderOp::SafetyCheck), 2);
}

#[tokio::test]
async fn test_blocked_phrase_fails_without_asking_the_checker() {
    let llm = Arc::new(ScriptedLlm::new().then(
        ProviderOp::Generate,
        vec![Ok("You can stop taking your medication the day before.".to_string())],
    ));
    let engine = ingested_engine(test_config(), Arc::new(HashEmbedder::new()), llm.clone()).await;

    let response = engine
        .orchestrator
        .answer("Can I eat before my colonoscopy?", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.outcome, Outcome::Answered);
    assert!(response.answer.starts_with(GROUNDED_ANSWER));
    assert_eq!(llm.calls(ProviderOp::Generate), 2);
    // Only the regenerated draft reached the LLM checker.
    assert_eq!(llm.calls(ProviderOp::SafetyCheck), 1);
}

#[tokio::test]
async fn test_safety_checker_outage_refuses() {
    let llm = Arc::new(ScriptedLlm::new().fail(ProviderOp::SafetyCheck, transient()));
    let engine = ingested_engine(test_config(), Arc::new(HashEmbedder::new()), llm.clone()).await;

    let response = engine
        .orchestrator
        .answer("Can I eat before my colonoscopy?", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.outcome, Outcome::Refused);
    assert_eq!(llm.calls(ProviderOp::Generate), 1);
}

// ─── Cancellation ───────────────────────────────────────────────────

#[tokio::test]
async fn test_cancelled_request_returns_error() {
    let llm = Arc::new(ScriptedLlm::new());
    let engine = ingested_engine(test_config(), Arc::new(HashEmbedder::new()), llm.clone()).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = engine
        .orchestrator
        .answer("Can I eat before my colonoscopy?", &cancel)
        .await;

    assert_eq!(result, Err(OrchestratorError::Cancelled));
    assert_eq!(llm.total_calls(), 0);
}

#[tokio::test]
async fn test_cancel_mid_request_stops_the_pipeline() {
    let llm = Arc::new(ScriptedLlm::new().with_delay(Duration::from_millis(50)));
    let engine = ingested_engine(test_config(), Arc::new(HashEmbedder::new()), llm.clone()).await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    let result = engine
        .orchestrator
        .answer("Can I eat before my colonoscopy?", &cancel)
        .await;

    assert_eq!(result, Err(OrchestratorError::Cancelled));
    assert_eq!(llm.calls(ProviderOp::Generate), 0);
}
