//! Scripted providers and fixtures shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use careguide::config::{parse_config, Config};
use careguide::engine::Engine;
use careguide::prompts;
use careguide_core::embedding::EmbeddingProvider;
use careguide_core::models::{Document, ScoredChunk, SourceMetadata};
use careguide_core::provider::{BackendError, LlmProvider, LlmRequest};
use careguide_core::vector::{InMemoryVectorIndex, MetadataFilter, VectorIndex};
use careguide_core::{ProviderError, ProviderErrorKind, ProviderOp};

// ─── Config ─────────────────────────────────────────────────────────

/// Defaults with fast retries and no score floor.
pub fn test_config() -> Config {
    test_config_with("")
}

/// `test_config` plus extra TOML appended to the `[agent]` table.
pub fn test_config_with(agent_extra: &str) -> Config {
    let toml = format!(
        r#"
[retrieval]
min_score = 0.0

[agent]
{agent_extra}

[gateway]
max_attempts = 2
base_delay_ms = 1
max_delay_ms = 2

[gateway.timeouts]
vector_search = 0.05
"#
    );
    parse_config(&toml).unwrap()
}

/// Default `alpha` and `min_score`; only retries and timeouts are shortened.
pub fn default_scoring_config() -> Config {
    parse_config(
        r#"
[gateway]
max_attempts = 2
base_delay_ms = 1
max_delay_ms = 2

[gateway.timeouts]
vector_search = 0.05
"#,
    )
    .unwrap()
}

// ─── Corpus ─────────────────────────────────────────────────────────

pub fn procedure_docs() -> Vec<Document> {
    vec![
        Document::new(
            "colonoscopy.md",
            "Colonoscopy preparation. Do not eat solid food for 24 hours before your colonoscopy. \
             Clear liquids such as water and apple juice are allowed until 2 hours before the procedure.",
        )
        .with_metadata(meta("colonoscopy")),
        Document::new(
            "mri.md",
            "MRI scan. Remove all metal objects before the MRI. Tell the staff if you have a pacemaker. \
             The scan takes about 30 minutes and you must lie still.",
        )
        .with_metadata(meta("mri")),
        Document::new(
            "blood-test.md",
            "Fasting blood test. Do not eat for 8 hours before the blood test. \
             You may drink water. Bring your lab order form.",
        )
        .with_metadata(meta("blood-test")),
    ]
}

pub fn meta(tag: &str) -> SourceMetadata {
    SourceMetadata {
        org: Some("General Hospital".to_string()),
        language: Some("en".to_string()),
        procedure_tag: Some(tag.to_string()),
        region: None,
    }
}

/// Engine over `procedure_docs`, already ingested.
pub async fn ingested_engine(
    config: Config,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LlmProvider>,
) -> Engine {
    let engine = Engine::with_providers(config, embedder, llm).unwrap();
    let report = engine.ingestor.ingest(procedure_docs(), true).await;
    assert!(report.indexed_chunks >= 3);
    engine
}

// ─── Embedder ───────────────────────────────────────────────────────

/// Bag-of-words embedder: each lowercase word adds 1.0 to a hashed bucket.
pub struct HashEmbedder {
    model: String,
    dims: usize,
    calls: AtomicUsize,
    failure: Option<BackendError>,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self {
            model: "hash-embedder".to_string(),
            dims: 32,
            calls: AtomicUsize::new(0),
            failure: None,
        }
    }

    pub fn failing(error: BackendError) -> Self {
        Self {
            failure: Some(error),
            ..Self::new()
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = &self.failure {
            return Err(e.clone());
        }
        let mut v = vec![0.0f32; self.dims];
        for word in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let bucket = word.bytes().fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize));
            v[bucket % self.dims] += 1.0;
        }
        Ok(v)
    }
}

// ─── LLM ────────────────────────────────────────────────────────────

pub const GROUNDED_ANSWER: &str = "Do not eat solid food for 24 hours before your colonoscopy.";

/// Identify the chat op from the system prompt.
pub fn op_of(request: &LlmRequest) -> ProviderOp {
    let system = request
        .messages
        .first()
        .map(|m| m.content.as_str())
        .unwrap_or("");
    if system == prompts::CLASSIFY_SYSTEM {
        ProviderOp::Classify
    } else if system == prompts::GRADE_SYSTEM {
        ProviderOp::Grade
    } else if system == prompts::REWRITE_SYSTEM {
        ProviderOp::Rewrite
    } else if system == prompts::SAFETY_SYSTEM {
        ProviderOp::SafetyCheck
    } else {
        ProviderOp::Generate
    }
}

type Reply = Result<String, BackendError>;

/// LLM whose replies are scripted per op. Queued replies are used first,
/// then the op's default.
pub struct ScriptedLlm {
    defaults: HashMap<ProviderOp, Reply>,
    queued: Mutex<HashMap<ProviderOp, VecDeque<Reply>>>,
    log: Mutex<Vec<(ProviderOp, LlmRequest)>>,
    delay: Option<Duration>,
}

impl ScriptedLlm {
    /// Classifier routes to retrieval, grader says relevant, safety passes.
    pub fn new() -> Self {
        let mut defaults = HashMap::new();
        defaults.insert(ProviderOp::Classify, Ok("RETRIEVE".to_string()));
        defaults.insert(ProviderOp::Grade, Ok("RELEVANT".to_string()));
        defaults.insert(ProviderOp::Rewrite, Ok("colonoscopy preparation food".to_string()));
        defaults.insert(ProviderOp::Generate, Ok(GROUNDED_ANSWER.to_string()));
        defaults.insert(ProviderOp::SafetyCheck, Ok("SAFE".to_string()));
        Self {
            defaults,
            queued: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn reply(mut self, op: ProviderOp, text: &str) -> Self {
        self.defaults.insert(op, Ok(text.to_string()));
        self
    }

    pub fn fail(mut self, op: ProviderOp, error: BackendError) -> Self {
        self.defaults.insert(op, Err(error));
        self
    }

    pub fn then(self, op: ProviderOp, replies: Vec<Reply>) -> Self {
        self.queued
            .lock()
            .unwrap()
            .entry(op)
            .or_default()
            .extend(replies);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self, op: ProviderOp) -> usize {
        self.log.lock().unwrap().iter().filter(|(o, _)| *o == op).count()
    }

    pub fn total_calls(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    pub fn requests(&self, op: ProviderOp) -> Vec<LlmRequest> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(o, _)| *o == op)
            .map(|(_, r)| r.clone())
            .collect()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &LlmRequest) -> Result<String, BackendError> {
        let op = op_of(request);
        self.log.lock().unwrap().push((op, request.clone()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let queued = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&op)
            .and_then(|q| q.pop_front());
        match queued {
            Some(reply) => reply,
            None => self
                .defaults
                .get(&op)
                .cloned()
                .unwrap_or_else(|| Err(BackendError::Permanent(format!("no script for {}", op)))),
        }
    }
}

// ─── Vector indexes ─────────────────────────────────────────────────

/// Never answers within any reasonable timeout.
pub struct StalledIndex;

#[async_trait]
impl VectorIndex for StalledIndex {
    async fn query(
        &self,
        _vector: &[f32],
        _k: usize,
        _filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredChunk>, ProviderError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Vec::new())
    }
}

/// Fails every query.
pub struct BrokenIndex;

#[async_trait]
impl VectorIndex for BrokenIndex {
    async fn query(
        &self,
        _vector: &[f32],
        _k: usize,
        _filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredChunk>, ProviderError> {
        Err(ProviderError::new(
            ProviderOp::VectorSearch,
            ProviderErrorKind::Exhausted,
            "index offline",
        ))
    }
}

/// Returns the same similarity list for every query.
pub struct FixedIndex {
    hits: Vec<ScoredChunk>,
}

impl FixedIndex {
    pub fn new(hits: &[(&str, f64)]) -> Self {
        Self {
            hits: hits.iter().map(|(id, s)| ScoredChunk::new(*id, *s)).collect(),
        }
    }

    pub fn empty() -> Self {
        Self::new(&[])
    }
}

#[async_trait]
impl VectorIndex for FixedIndex {
    async fn query(
        &self,
        _vector: &[f32],
        k: usize,
        _filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredChunk>, ProviderError> {
        Ok(self.hits.iter().take(k).cloned().collect())
    }
}

/// Engine whose queries go to `vector_query` while ingestion fills an
/// in-memory index nobody reads.
pub async fn engine_with_query_index(
    config: Config,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LlmProvider>,
    vector_query: Arc<dyn VectorIndex>,
) -> Engine {
    let engine = Engine::with_vector_index(
        config,
        embedder,
        llm,
        Arc::new(InMemoryVectorIndex::new()),
        vector_query,
    )
    .unwrap();
    engine.ingestor.ingest(procedure_docs(), true).await;
    engine
}
