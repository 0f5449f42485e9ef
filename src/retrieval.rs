//! Hybrid retrieval: concurrent keyword and semantic fan-out, then merge.
//!
//! # Algorithm
//!
//! 1. Run both branches concurrently:
//!    - semantic: embed the query through the gateway, then query the
//!      [`VectorIndex`] under the `vector_search` timeout
//!      (`candidate_k_vector` hits)
//!    - keyword: BM25 over the current [`KeywordIndex`] snapshot on the
//!      blocking pool (`candidate_k_keyword` hits)
//!
//!    An optional [`MetadataFilter`] restricts both branches.
//! 2. A semantic branch with zero hits (failed, timed out, empty index, or
//!    every matching chunk still pending embedding) makes the merge run
//!    keyword-only (`alpha = 0`), so `min_score` is measured against the
//!    keyword scores alone.
//! 3. Merge with [`careguide_core::search::merge`].
//!
//! Retrieval never fails. An empty result is a valid outcome.

use std::sync::Arc;

use anyhow::Result;
use careguide_core::keyword::KeywordIndex;
use careguide_core::models::{Candidate, ScoredChunk};
use careguide_core::search::{merge, MergeParams};
use careguide_core::vector::{MetadataFilter, VectorIndex};
use careguide_core::{ProviderError, ProviderOp};
use tracing::{debug, warn};

use crate::cancellation::CancellationToken;
use crate::config::Config;
use crate::gateway::ProviderGateway;
use crate::prompts::ContextPassage;

/// Outcome of one retrieval pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    pub candidates: Vec<Candidate>,
    pub keyword_hits: usize,
    pub semantic_hits: usize,
    /// Set when the semantic branch failed and was treated as empty.
    pub semantic_error: Option<ProviderError>,
}

/// Query-time view over both indexes.
pub struct HybridRetriever {
    keyword: Arc<KeywordIndex>,
    vector: Arc<dyn VectorIndex>,
    gateway: Arc<ProviderGateway>,
    params: MergeParams,
    candidate_k_keyword: usize,
    candidate_k_vector: usize,
    filter: Option<MetadataFilter>,
}

impl HybridRetriever {
    pub fn new(
        keyword: Arc<KeywordIndex>,
        vector: Arc<dyn VectorIndex>,
        gateway: Arc<ProviderGateway>,
        config: &Config,
    ) -> Result<Self> {
        Ok(Self {
            keyword,
            vector,
            gateway,
            params: config.merge_params()?,
            candidate_k_keyword: config.retrieval.candidate_k_keyword,
            candidate_k_vector: config.retrieval.candidate_k_vector,
            filter: None,
        })
    }

    /// Restrict both keyword and semantic hits to matching metadata.
    pub fn with_filter(mut self, filter: MetadataFilter) -> Self {
        self.filter = if filter.is_empty() { None } else { Some(filter) };
        self
    }

    pub fn params(&self) -> &MergeParams {
        &self.params
    }

    pub async fn retrieve(&self, query: &str, cancel: &CancellationToken) -> RetrievalResult {
        let semantic_branch = self.semantic_hits(query, cancel);
        let keyword_branch = self.keyword_hits(query);

        let (semantic, keyword) = tokio::join!(semantic_branch, keyword_branch);

        let (semantic, semantic_error) = match semantic {
            Ok(hits) => (hits, None),
            Err(e) => {
                warn!(error = %e, "semantic retrieval unavailable, using keyword hits only");
                (Vec::new(), Some(e))
            }
        };

        let params = if semantic.is_empty() {
            self.params.with_alpha(0.0).unwrap_or(self.params)
        } else {
            self.params
        };
        let candidates = merge(&semantic, &keyword, &params);
        debug!(
            keyword_hits = keyword.len(),
            semantic_hits = semantic.len(),
            keyword_only = semantic.is_empty(),
            candidates = candidates.len(),
            "retrieval complete"
        );

        RetrievalResult {
            candidates,
            keyword_hits: keyword.len(),
            semantic_hits: semantic.len(),
            semantic_error,
        }
    }

    async fn keyword_hits(&self, query: &str) -> Vec<ScoredChunk> {
        let snapshot = self.keyword.snapshot();
        let query = query.to_string();
        let k = self.candidate_k_keyword;
        let filter = self.filter.clone();
        match tokio::task::spawn_blocking(move || {
            snapshot.query_filtered(&query, k, filter.as_ref())
        })
        .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "keyword search task failed");
                Vec::new()
            }
        }
    }

    async fn semantic_hits(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScoredChunk>, ProviderError> {
        let vector = self.gateway.embed(query, cancel).await?;
        self.gateway
            .bounded(
                ProviderOp::VectorSearch,
                self.vector
                    .query(&vector, self.candidate_k_vector, self.filter.as_ref()),
            )
            .await
    }

    /// Resolve candidate texts. Ids missing from the keyword snapshot
    /// (superseded by a concurrent re-ingestion) are skipped.
    pub fn passages(&self, candidates: &[Candidate]) -> Vec<ContextPassage> {
        let snapshot = self.keyword.snapshot();
        candidates
            .iter()
            .filter_map(|c| match snapshot.chunk(&c.chunk_id) {
                Some(chunk) => Some(ContextPassage {
                    chunk_id: chunk.id.clone(),
                    procedure_tag: chunk.metadata.source.procedure_tag.clone(),
                    text: chunk.text.clone(),
                }),
                None => {
                    debug!(chunk_id = %c.chunk_id, "candidate no longer indexed");
                    None
                }
            })
            .collect()
    }
}
