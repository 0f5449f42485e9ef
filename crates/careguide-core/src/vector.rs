//! Vector index contract and an in-memory implementation.
//!
//! The nearest-neighbour structure itself is an external capability; the
//! core only consumes [`VectorIndex::query`]. [`InMemoryVectorIndex`] is a
//! brute-force cosine implementation for tests, small corpora, and the CLI.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::embedding::cosine_similarity;
use crate::error::ProviderError;
use crate::models::{ScoredChunk, SourceMetadata};

/// Metadata predicate applied by the vector index.
///
/// Each `Some` field must equal the chunk's field; `None` matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFilter {
    #[serde(default)]
    pub org: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub procedure_tag: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

impl MetadataFilter {
    pub fn is_empty(&self) -> bool {
        self.org.is_none()
            && self.language.is_none()
            && self.procedure_tag.is_none()
            && self.region.is_none()
    }

    pub fn matches(&self, meta: &SourceMetadata) -> bool {
        fn field(want: &Option<String>, have: &Option<String>) -> bool {
            match want {
                Some(w) => have.as_deref() == Some(w.as_str()),
                None => true,
            }
        }
        field(&self.org, &meta.org)
            && field(&self.language, &meta.language)
            && field(&self.procedure_tag, &meta.procedure_tag)
            && field(&self.region, &meta.region)
    }
}

/// Nearest-neighbour search over chunk embeddings.
///
/// Returns hits ranked by similarity in `[-1, 1]`. A failure is reported as
/// a [`ProviderError`]; callers treat it as "no semantic candidates".
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredChunk>, ProviderError>;
}

/// One stored embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorEntry {
    pub chunk_id: String,
    pub document_id: String,
    /// Hash of the chunk text the vector was computed from.
    pub chunk_hash: String,
    pub metadata: SourceMetadata,
    pub vector: Vec<f32>,
}

/// In-memory vector index with atomic whole-index replacement.
pub struct InMemoryVectorIndex {
    entries: RwLock<Arc<Vec<VectorEntry>>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Replace every stored vector at once.
    pub fn rebuild(&self, entries: Vec<VectorEntry>) {
        let next = Arc::new(entries);
        let mut guard = self.entries.write().unwrap_or_else(|e| e.into_inner());
        *guard = next;
    }

    /// The entries current at the time of the call.
    pub fn snapshot(&self) -> Arc<Vec<VectorEntry>> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Synchronous ranking used by the async trait impl.
    pub fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Vec<ScoredChunk> {
        let entries = self.snapshot();
        let mut hits: Vec<ScoredChunk> = entries
            .iter()
            .filter(|e| filter.map_or(true, |f| f.matches(&e.metadata)))
            .map(|e| ScoredChunk::new(e.chunk_id.clone(), cosine_similarity(vector, &e.vector) as f64))
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(k);
        hits
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredChunk>, ProviderError> {
        Ok(self.search(vector, k, filter))
    }
}
