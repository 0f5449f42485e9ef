//! BM25 keyword retrieval over chunk text.
//!
//! The index is built once per ingestion batch and read-only afterwards.
//! [`KeywordIndex::rebuild`] builds a complete new [`KeywordSnapshot`]
//! off to the side and swaps it in under a write lock held only for the
//! pointer exchange, so queries see either the old index or the new one.
//!
//! ```rust
//! use careguide_core::keyword::{KeywordConfig, KeywordIndex};
//! use careguide_core::chunk::{chunk_document, ChunkingParams};
//! use careguide_core::models::Document;
//!
//! let params = ChunkingParams::new(200, 20).unwrap();
//! let doc = Document::new("prep", "Stop eating solid food eight hours before the colonoscopy.");
//! let index = KeywordIndex::new(KeywordConfig::default());
//! index.rebuild(chunk_document(&doc, &params).unwrap());
//!
//! let hits = index.query("colonoscopy food", 5);
//! assert_eq!(hits[0].chunk_id, "prep#0");
//! ```

mod index;
mod tokenizer;

pub use index::{KeywordIndex, KeywordSnapshot};
pub use tokenizer::{is_cjk, Tokenizer, TokenizerConfig};

use serde::{Deserialize, Serialize};

/// BM25 and tokenizer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordConfig {
    /// Term frequency saturation.
    #[serde(default = "default_k1")]
    pub k1: f32,
    /// Document length normalization (0 = none, 1 = full).
    #[serde(default = "default_b")]
    pub b: f32,
    #[serde(default)]
    pub tokenizer: TokenizerConfig,
}

fn default_k1() -> f32 {
    1.2
}

fn default_b() -> f32 {
    0.75
}

impl Default for KeywordConfig {
    fn default() -> Self {
        Self {
            k1: default_k1(),
            b: default_b(),
            tokenizer: TokenizerConfig::default(),
        }
    }
}

/// Smoothed IDF: `ln((N - df + 0.5) / (df + 0.5) + 1)`, always positive.
pub fn idf(num_docs: usize, doc_freq: usize) -> f32 {
    let n = num_docs as f32;
    let df = doc_freq as f32;
    ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
}

/// BM25 contribution of one query term to one document.
pub fn bm25_term_score(
    term_freq: usize,
    doc_len: usize,
    avg_doc_len: f32,
    idf_value: f32,
    k1: f32,
    b: f32,
) -> f32 {
    let tf = term_freq as f32;
    let dl = doc_len as f32;
    let norm = if avg_doc_len > 0.0 {
        1.0 - b + b * dl / avg_doc_len
    } else {
        1.0
    };
    idf_value * (tf * (k1 + 1.0)) / (tf + k1 * norm)
}
