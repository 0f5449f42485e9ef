//! Core data models shared by ingestion and retrieval.
//!
//! Documents and chunks are immutable once built; re-ingestion produces new
//! values that supersede the old ones. Metadata is a fixed-shape record
//! rather than a free-form map so that filters and prompts can rely on it.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Source metadata attached to a document and inherited by its chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMetadata {
    /// Issuing organisation (hospital, clinic, department).
    #[serde(default)]
    pub org: Option<String>,
    /// BCP-47-ish language tag, e.g. `en`, `zh-TW`.
    #[serde(default)]
    pub language: Option<String>,
    /// Procedure this document covers, e.g. `colonoscopy`.
    #[serde(default)]
    pub procedure_tag: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

impl SourceMetadata {
    /// Check field shapes at the ingestion boundary.
    ///
    /// Empty strings are rejected (use `None`), and the language tag must be
    /// ASCII alphanumerics separated by `-` or `_`.
    pub fn validate(&self, doc_id: &str) -> Result<(), CoreError> {
        let fields = [
            ("org", &self.org),
            ("language", &self.language),
            ("procedure_tag", &self.procedure_tag),
            ("region", &self.region),
        ];
        for (name, value) in fields {
            if let Some(v) = value {
                if v.trim().is_empty() {
                    return Err(CoreError::InvalidDocument {
                        id: doc_id.to_string(),
                        reason: format!("metadata field '{}' is empty", name),
                    });
                }
            }
        }
        if let Some(lang) = &self.language {
            let ok = lang
                .split(['-', '_'])
                .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric()));
            if !ok {
                return Err(CoreError::InvalidDocument {
                    id: doc_id.to_string(),
                    reason: format!("malformed language tag '{}'", lang),
                });
            }
        }
        Ok(())
    }
}

/// A source document as handed over by the ingestion layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub raw_text: String,
    #[serde(default)]
    pub source_metadata: SourceMetadata,
}

impl Document {
    pub fn new(id: impl Into<String>, raw_text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            raw_text: raw_text.into(),
            source_metadata: SourceMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: SourceMetadata) -> Self {
        self.source_metadata = metadata;
        self
    }

    /// Validate the id and metadata before chunking.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.id.trim().is_empty() {
            return Err(CoreError::InvalidDocument {
                id: self.id.clone(),
                reason: "document id is empty".to_string(),
            });
        }
        self.source_metadata.validate(&self.id)
    }
}

/// Chunk-level metadata: the inherited source fields plus the chunk's
/// position among its siblings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(flatten)]
    pub source: SourceMetadata,
    pub part_index: usize,
    pub part_total: usize,
}

/// A bounded, contiguous span of a document's text.
///
/// Offsets are character (Unicode scalar value) offsets into the parent
/// document's `raw_text`; `end_offset - start_offset` equals the character
/// length of `text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub sequence_index: usize,
    pub metadata: ChunkMetadata,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

impl Chunk {
    /// Character length of the chunk text.
    pub fn char_len(&self) -> usize {
        self.end_offset - self.start_offset
    }
}

/// A single `(chunk_id, score)` hit from one retrieval source.
///
/// Keyword hits carry raw BM25 scores; vector hits carry cosine similarity
/// in `[-1, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub score: f64,
}

impl ScoredChunk {
    pub fn new(chunk_id: impl Into<String>, score: f64) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            score,
        }
    }
}

/// One entry of a merged, ranked retrieval result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub chunk_id: String,
    /// Normalized semantic score, `None` if the chunk was not a vector hit.
    pub semantic_score: Option<f64>,
    /// Normalized keyword score, `None` if the chunk was not a keyword hit.
    pub keyword_score: Option<f64>,
    /// Raw similarity from the vector index, kept for tie-breaking.
    pub raw_semantic: Option<f64>,
    pub combined_score: f64,
    /// 1-based position in the merged list.
    pub rank: usize,
}

/// Verdict of the relevance grader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GradingVerdict {
    Relevant,
    Irrelevant,
    #[default]
    Unknown,
}

impl GradingVerdict {
    /// Unknown (grader failure) is treated as relevant so a flaky grader
    /// cannot keep the rewrite loop spinning.
    pub fn counts_as_relevant(&self) -> bool {
        !matches!(self, GradingVerdict::Irrelevant)
    }
}

/// Chat message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single chat message sent to the LLM provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}
