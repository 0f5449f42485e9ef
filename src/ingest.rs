//! Ingestion pipeline: validate → chunk → embed → publish.
//!
//! A single [`Ingestor`] owns the write side of both indexes. Batches are
//! serialized by an async mutex; each batch builds complete new keyword and
//! vector snapshots off to the side and swaps them in, so queries running
//! concurrently see either the previous corpus or the new one.
//!
//! Embedding is non-fatal: a chunk whose embedding fails is still keyword
//! searchable and is counted as pending. Chunks whose text hash matches an
//! already-stored vector reuse that vector instead of calling the provider.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use careguide_core::chunk::{chunk_document, ChunkingParams};
use careguide_core::keyword::KeywordIndex;
use careguide_core::models::{Chunk, Document};
use careguide_core::vector::{InMemoryVectorIndex, VectorEntry};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cancellation::CancellationToken;
use crate::config::Config;
use crate::gateway::ProviderGateway;

/// Summary of one ingestion batch.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub run_id: String,
    pub reset: bool,
    pub documents: usize,
    /// Documents skipped at validation, with the reason.
    pub rejected: Vec<(String, String)>,
    pub chunks: usize,
    pub embedded: usize,
    /// Vectors carried over because the chunk text was unchanged.
    pub reused: usize,
    /// Chunks left without a vector (keyword-only).
    pub pending_embeddings: usize,
    /// Totals after publication.
    pub indexed_chunks: usize,
    pub indexed_vectors: usize,
    pub completed_at: DateTime<Utc>,
}

/// Single writer for the keyword and vector indexes.
pub struct Ingestor {
    keyword: Arc<KeywordIndex>,
    vectors: Arc<InMemoryVectorIndex>,
    gateway: Arc<ProviderGateway>,
    params: ChunkingParams,
    embed_concurrency: usize,
    writer: Mutex<()>,
}

impl Ingestor {
    pub fn new(
        keyword: Arc<KeywordIndex>,
        vectors: Arc<InMemoryVectorIndex>,
        gateway: Arc<ProviderGateway>,
        config: &Config,
    ) -> Result<Self> {
        Ok(Self {
            keyword,
            vectors,
            gateway,
            params: config.chunking_params()?,
            embed_concurrency: config.gateway.max_concurrent_calls.max(1),
            writer: Mutex::new(()),
        })
    }

    /// Ingest a batch of documents.
    ///
    /// With `reset`, the batch replaces the whole corpus. Otherwise each
    /// document supersedes any stored document with the same id and all
    /// other documents are kept.
    pub async fn ingest(&self, documents: Vec<Document>, reset: bool) -> IngestReport {
        let _guard = self.writer.lock().await;
        let run_id = Uuid::new_v4().to_string();

        // Validate; later duplicates of an id win.
        let mut rejected = Vec::new();
        let mut accepted: Vec<Document> = Vec::new();
        for doc in documents {
            match doc.validate() {
                Ok(()) => {
                    accepted.retain(|d| d.id != doc.id);
                    accepted.push(doc);
                }
                Err(e) => {
                    warn!(document = %doc.id, error = %e, "rejecting document");
                    rejected.push((doc.id.clone(), e.to_string()));
                }
            }
        }

        let mut new_chunks: Vec<Chunk> = Vec::new();
        for doc in &accepted {
            match chunk_document(doc, &self.params) {
                Ok(chunks) => {
                    debug!(document = %doc.id, chunks = chunks.len(), "chunked");
                    new_chunks.extend(chunks);
                }
                Err(e) => {
                    warn!(document = %doc.id, error = %e, "rejecting document");
                    rejected.push((doc.id.clone(), e.to_string()));
                }
            }
        }

        let replaced: HashSet<&str> = accepted.iter().map(|d| d.id.as_str()).collect();
        let previous_vectors = self.vectors.snapshot();

        let (new_entries, embedded, reused, pending) =
            self.embed_chunks(&new_chunks, &previous_vectors).await;

        // Assemble the next snapshots.
        let mut all_chunks: Vec<Chunk> = if reset {
            Vec::new()
        } else {
            self.keyword
                .snapshot()
                .chunks()
                .iter()
                .filter(|c| !replaced.contains(c.document_id.as_str()))
                .cloned()
                .collect()
        };
        let chunk_count = new_chunks.len();
        all_chunks.extend(new_chunks);

        let mut all_entries: Vec<VectorEntry> = if reset {
            Vec::new()
        } else {
            previous_vectors
                .iter()
                .filter(|e| !replaced.contains(e.document_id.as_str()))
                .cloned()
                .collect()
        };
        all_entries.extend(new_entries);

        let indexed_chunks = all_chunks.len();
        let indexed_vectors = all_entries.len();
        self.keyword.rebuild(all_chunks);
        self.vectors.rebuild(all_entries);

        let report = IngestReport {
            run_id,
            reset,
            documents: accepted.len(),
            rejected,
            chunks: chunk_count,
            embedded,
            reused,
            pending_embeddings: pending,
            indexed_chunks,
            indexed_vectors,
            completed_at: Utc::now(),
        };
        info!(
            run_id = %report.run_id,
            documents = report.documents,
            rejected = report.rejected.len(),
            chunks = report.chunks,
            embedded = report.embedded,
            reused = report.reused,
            pending = report.pending_embeddings,
            "ingestion complete"
        );
        report
    }

    /// Returns `(entries, embedded, reused, pending)`.
    async fn embed_chunks(
        &self,
        chunks: &[Chunk],
        previous: &[VectorEntry],
    ) -> (Vec<VectorEntry>, usize, usize, usize) {
        let known: HashMap<(&str, &str), &VectorEntry> = previous
            .iter()
            .map(|e| ((e.chunk_id.as_str(), e.chunk_hash.as_str()), e))
            .collect();

        let mut entries = Vec::with_capacity(chunks.len());
        let mut to_embed: Vec<&Chunk> = Vec::new();
        for chunk in chunks {
            match known.get(&(chunk.id.as_str(), chunk.hash.as_str())) {
                Some(existing) => entries.push(entry_for(chunk, existing.vector.clone())),
                None => to_embed.push(chunk),
            }
        }
        let reused = entries.len();

        if !self.gateway.embedding_enabled() {
            return (entries, 0, reused, to_embed.len());
        }

        let cancel = CancellationToken::new();
        let results: Vec<_> = stream::iter(to_embed)
            .map(|chunk| {
                let cancel = cancel.clone();
                async move { (chunk, self.gateway.embed(&chunk.text, &cancel).await) }
            })
            .buffered(self.embed_concurrency)
            .collect()
            .await;

        let mut embedded = 0;
        let mut pending = 0;
        for (chunk, result) in results {
            match result {
                Ok(vector) => {
                    embedded += 1;
                    entries.push(entry_for(chunk, vector));
                }
                Err(e) => {
                    pending += 1;
                    warn!(chunk = %chunk.id, error = %e, "embedding failed, chunk is keyword-only");
                }
            }
        }
        (entries, embedded, reused, pending)
    }
}

fn entry_for(chunk: &Chunk, vector: Vec<f32>) -> VectorEntry {
    VectorEntry {
        chunk_id: chunk.id.clone(),
        document_id: chunk.document_id.clone(),
        chunk_hash: chunk.hash.clone(),
        metadata: chunk.metadata.source.clone(),
        vector,
    }
}
