use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use super::tokenizer::Tokenizer;
use super::{bm25_term_score, idf, KeywordConfig};
use crate::models::{Chunk, ScoredChunk};
use crate::vector::MetadataFilter;

struct Posting {
    doc_idx: usize,
    term_freq: usize,
}

/// An immutable BM25 index over one ingestion batch.
///
/// Also owns the chunks themselves, so the retrieval path can resolve chunk
/// text for any id returned by either retrieval source.
pub struct KeywordSnapshot {
    config: KeywordConfig,
    tokenizer: Tokenizer,
    postings: HashMap<String, Vec<Posting>>,
    doc_lengths: Vec<usize>,
    chunks: Vec<Chunk>,
    by_id: HashMap<String, usize>,
    avg_doc_len: f32,
}

impl KeywordSnapshot {
    /// Build a snapshot from a batch of chunks. Later chunks with a
    /// duplicate id replace earlier ones.
    pub fn build(config: KeywordConfig, chunks: Vec<Chunk>) -> Self {
        let tokenizer = Tokenizer::new(config.tokenizer.clone());

        let mut deduped: Vec<Chunk> = Vec::with_capacity(chunks.len());
        let mut by_id: HashMap<String, usize> = HashMap::new();
        for chunk in chunks {
            match by_id.get(&chunk.id) {
                Some(&idx) => deduped[idx] = chunk,
                None => {
                    by_id.insert(chunk.id.clone(), deduped.len());
                    deduped.push(chunk);
                }
            }
        }

        let mut postings: HashMap<String, Vec<Posting>> = HashMap::new();
        let mut doc_lengths = Vec::with_capacity(deduped.len());
        let mut total_tokens = 0usize;

        for (doc_idx, chunk) in deduped.iter().enumerate() {
            let tokens = tokenizer.tokenize(&chunk.text);
            doc_lengths.push(tokens.len());
            total_tokens += tokens.len();

            let mut term_freqs: HashMap<String, usize> = HashMap::new();
            for token in tokens {
                *term_freqs.entry(token).or_insert(0) += 1;
            }
            for (term, term_freq) in term_freqs {
                postings
                    .entry(term)
                    .or_default()
                    .push(Posting { doc_idx, term_freq });
            }
        }

        let avg_doc_len = if deduped.is_empty() {
            0.0
        } else {
            total_tokens as f32 / deduped.len() as f32
        };

        Self {
            config,
            tokenizer,
            postings,
            doc_lengths,
            chunks: deduped,
            by_id,
            avg_doc_len,
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunk(&self, id: &str) -> Option<&Chunk> {
        self.by_id.get(id).map(|&idx| &self.chunks[idx])
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Rank chunks against `text` by BM25; returns at most `k` hits with a
    /// positive score, best first, ties broken by chunk id.
    pub fn query(&self, text: &str, k: usize) -> Vec<ScoredChunk> {
        self.query_filtered(text, k, None)
    }

    /// Like [`query`](Self::query), restricted to chunks whose source
    /// metadata matches `filter`. The filter applies before the `k` cut.
    pub fn query_filtered(
        &self,
        text: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Vec<ScoredChunk> {
        if self.chunks.is_empty() || k == 0 {
            return Vec::new();
        }

        let mut seen = HashSet::new();
        let terms: Vec<String> = self
            .tokenizer
            .tokenize(text)
            .into_iter()
            .filter(|t| seen.insert(t.clone()))
            .collect();
        if terms.is_empty() {
            return Vec::new();
        }

        let num_docs = self.chunks.len();
        let mut scores: HashMap<usize, f32> = HashMap::new();

        for term in &terms {
            let Some(list) = self.postings.get(term) else {
                continue;
            };
            let idf_val = idf(num_docs, list.len());
            for posting in list {
                let score = bm25_term_score(
                    posting.term_freq,
                    self.doc_lengths[posting.doc_idx],
                    self.avg_doc_len,
                    idf_val,
                    self.config.k1,
                    self.config.b,
                );
                *scores.entry(posting.doc_idx).or_insert(0.0) += score;
            }
        }

        let mut hits: Vec<ScoredChunk> = scores
            .into_iter()
            .filter(|(_, s)| *s > 0.0)
            .filter(|(idx, _)| {
                filter.map_or(true, |f| f.matches(&self.chunks[*idx].metadata.source))
            })
            .map(|(idx, s)| ScoredChunk::new(self.chunks[idx].id.clone(), s as f64))
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

/// Read-mostly handle over the current [`KeywordSnapshot`].
pub struct KeywordIndex {
    config: KeywordConfig,
    current: RwLock<Arc<KeywordSnapshot>>,
}

impl KeywordIndex {
    /// Create an empty index.
    pub fn new(config: KeywordConfig) -> Self {
        let empty = KeywordSnapshot::build(config.clone(), Vec::new());
        Self {
            config,
            current: RwLock::new(Arc::new(empty)),
        }
    }

    /// Replace the whole index with one built from `chunks`.
    ///
    /// The new snapshot is built before the lock is taken; readers never
    /// observe a partially built index.
    pub fn rebuild(&self, chunks: Vec<Chunk>) {
        let next = Arc::new(KeywordSnapshot::build(self.config.clone(), chunks));
        self.swap(next);
    }

    /// Publish an already-built snapshot.
    pub fn swap(&self, next: Arc<KeywordSnapshot>) {
        tracing::debug!(chunks = next.len(), "publishing keyword snapshot");
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = next;
    }

    /// The snapshot current at the time of the call.
    pub fn snapshot(&self) -> Arc<KeywordSnapshot> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn config(&self) -> &KeywordConfig {
        &self.config
    }

    pub fn query(&self, text: &str, k: usize) -> Vec<ScoredChunk> {
        self.snapshot().query(text, k)
    }

    pub fn query_filtered(
        &self,
        text: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Vec<ScoredChunk> {
        self.snapshot().query_filtered(text, k, filter)
    }

    pub fn chunk(&self, id: &str) -> Option<Chunk> {
        self.snapshot().chunk(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

impl Default for KeywordIndex {
    fn default() -> Self {
        Self::new(KeywordConfig::default())
    }
}
