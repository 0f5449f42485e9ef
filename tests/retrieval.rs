//! Hybrid retrieval over an ingested corpus, including degraded modes.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use careguide::cancellation::CancellationToken;
use careguide::config::parse_config;
use careguide::retrieval::HybridRetriever;
use careguide_core::provider::BackendError;
use careguide_core::vector::MetadataFilter;
use careguide_core::ProviderErrorKind;

use common::*;

#[tokio::test]
async fn test_hybrid_results_are_ranked_and_capped() {
    let engine = ingested_engine(
        test_config(),
        Arc::new(HashEmbedder::new()),
        Arc::new(ScriptedLlm::new()),
    )
    .await;

    let result = engine
        .retriever
        .retrieve("colonoscopy solid food", &CancellationToken::new())
        .await;

    assert!(result.semantic_error.is_none());
    assert!(result.semantic_hits > 0);
    assert!(result.candidates.len() <= engine.config.retrieval.final_limit);
    assert_eq!(result.candidates[0].chunk_id, "colonoscopy.md#0");
    for (i, c) in result.candidates.iter().enumerate() {
        assert_eq!(c.rank, i + 1);
        assert!((0.0..=1.0).contains(&c.combined_score));
    }
    for pair in result.candidates.windows(2) {
        assert!(pair[0].combined_score >= pair[1].combined_score);
    }
}

#[tokio::test]
async fn test_stalled_vector_index_degrades_to_keyword_only() {
    let engine = engine_with_query_index(
        test_config(),
        Arc::new(HashEmbedder::new()),
        Arc::new(ScriptedLlm::new()),
        Arc::new(StalledIndex),
    )
    .await;

    let started = Instant::now();
    let result = engine
        .retriever
        .retrieve("do not eat before the test", &CancellationToken::new())
        .await;

    assert!(started.elapsed() < Duration::from_secs(2));
    let err = result.semantic_error.expect("semantic branch should time out");
    assert_eq!(err.kind, ProviderErrorKind::Timeout);
    assert_eq!(result.semantic_hits, 0);
    assert_eq!(result.candidates.len(), result.keyword_hits);
    assert!(result.candidates.iter().all(|c| c.semantic_score.is_none()));
}

#[tokio::test]
async fn test_keyword_only_mode_keeps_the_default_score_floor_usable() {
    // Default alpha and min_score; only the retry delays are shortened.
    let config = parse_config("[gateway]\nbase_delay_ms = 1\nmax_delay_ms = 2\n").unwrap();
    let engine = engine_with_query_index(
        config,
        Arc::new(HashEmbedder::new()),
        Arc::new(ScriptedLlm::new()),
        Arc::new(BrokenIndex),
    )
    .await;

    let result = engine
        .retriever
        .retrieve("colonoscopy solid food", &CancellationToken::new())
        .await;

    assert!(result.semantic_error.is_some());
    assert_eq!(result.candidates.len(), 1);
    assert_eq!(result.candidates[0].chunk_id, "colonoscopy.md#0");
    assert_eq!(result.candidates[0].combined_score, 1.0);
}

#[tokio::test]
async fn test_empty_semantic_hits_use_keyword_only_scoring() {
    let engine = engine_with_query_index(
        default_scoring_config(),
        Arc::new(HashEmbedder::new()),
        Arc::new(ScriptedLlm::new()),
        Arc::new(FixedIndex::empty()),
    )
    .await;

    let result = engine
        .retriever
        .retrieve("pacemaker", &CancellationToken::new())
        .await;

    assert!(result.semantic_error.is_none());
    assert_eq!(result.semantic_hits, 0);
    assert_eq!(result.keyword_hits, 1);
    assert_eq!(result.candidates.len(), 1);
    assert_eq!(result.candidates[0].chunk_id, "mri.md#0");
    assert_eq!(result.candidates[0].combined_score, 1.0);
}

#[tokio::test]
async fn test_common_term_with_small_bm25_scores_clears_the_floor() {
    let engine = engine_with_query_index(
        default_scoring_config(),
        Arc::new(HashEmbedder::new()),
        Arc::new(ScriptedLlm::new()),
        Arc::new(FixedIndex::empty()),
    )
    .await;

    let raw = engine.keyword.query("water", 5);
    assert_eq!(raw.len(), 2);
    assert!(raw.iter().all(|h| h.score < 1.0));

    let result = engine
        .retriever
        .retrieve("water", &CancellationToken::new())
        .await;

    assert!(!result.candidates.is_empty());
    assert_eq!(result.candidates[0].chunk_id, raw[0].chunk_id);
    assert_eq!(result.candidates[0].combined_score, 1.0);
}

#[tokio::test]
async fn test_negative_similarity_earns_no_semantic_credit() {
    let engine = engine_with_query_index(
        default_scoring_config(),
        Arc::new(HashEmbedder::new()),
        Arc::new(ScriptedLlm::new()),
        Arc::new(FixedIndex::new(&[("colonoscopy.md#0", 0.8), ("mri.md#0", -0.9)])),
    )
    .await;

    let result = engine
        .retriever
        .retrieve("colonoscopy solid food", &CancellationToken::new())
        .await;

    assert_eq!(result.semantic_hits, 2);
    assert_eq!(result.candidates.len(), 1);
    assert_eq!(result.candidates[0].chunk_id, "colonoscopy.md#0");
    assert!((result.candidates[0].combined_score - 0.86).abs() < 1e-9);
}

#[tokio::test]
async fn test_embedding_outage_still_returns_keyword_hits() {
    let engine = ingested_engine(
        test_config(),
        Arc::new(HashEmbedder::failing(BackendError::Transient("HTTP 429".into()))),
        Arc::new(ScriptedLlm::new()),
    )
    .await;

    let result = engine
        .retriever
        .retrieve("pacemaker", &CancellationToken::new())
        .await;

    assert_eq!(
        result.semantic_error.map(|e| e.kind),
        Some(ProviderErrorKind::Exhausted)
    );
    assert_eq!(result.candidates.len(), 1);
    assert_eq!(result.candidates[0].chunk_id, "mri.md#0");
}

#[tokio::test]
async fn test_procedure_filter_restricts_both_branches() {
    let engine = ingested_engine(
        test_config(),
        Arc::new(HashEmbedder::new()),
        Arc::new(ScriptedLlm::new()),
    )
    .await;
    let retriever = HybridRetriever::new(
        engine.keyword.clone(),
        engine.vectors.clone(),
        engine.gateway.clone(),
        &engine.config,
    )
    .unwrap()
    .with_filter(MetadataFilter {
        procedure_tag: Some("mri".to_string()),
        ..Default::default()
    });

    let result = retriever
        .retrieve("metal objects", &CancellationToken::new())
        .await;

    assert_eq!(result.semantic_hits, 1);
    let passages = retriever.passages(&result.candidates);
    assert!(passages
        .iter()
        .any(|p| p.procedure_tag.as_deref() == Some("mri") && p.text.contains("metal")));

    // "water" only appears in other procedures' documents.
    let result = retriever
        .retrieve("water", &CancellationToken::new())
        .await;
    assert_eq!(result.keyword_hits, 0);
    assert!(result
        .candidates
        .iter()
        .all(|c| c.chunk_id.starts_with("mri.md")));
}

#[tokio::test]
async fn test_empty_index_yields_no_candidates() {
    let engine = careguide::engine::Engine::with_providers(
        test_config(),
        Arc::new(HashEmbedder::new()),
        Arc::new(ScriptedLlm::new()),
    )
    .unwrap();

    let result = engine
        .retriever
        .retrieve("anything", &CancellationToken::new())
        .await;

    assert!(result.candidates.is_empty());
    assert!(result.semantic_error.is_none());
}
