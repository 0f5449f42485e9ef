//! Sliding-window text chunker with sentence-boundary snapping.
//!
//! Splits document text into [`Chunk`]s of at most `max_chunk_size`
//! characters, with consecutive chunks sharing up to `overlap` characters.
//! Nothing is ever truncated: the union of chunk spans covers the whole
//! document.
//!
//! Sizes and offsets are measured in characters (Unicode scalar values), so
//! CJK text is bounded the same way as Latin text.
//!
//! # Algorithm
//!
//! 1. `start = 0`; the raw window end is `min(start + max_chunk_size, len)`.
//! 2. If the window does not reach the end of the text, look back from the
//!    window end for sentence punctuation (`. ! ? 。 ！ ？`), then for
//!    whitespace. The lookback covers the last 20% of the window and never
//!    more than `overlap` characters, so snapping can only shorten a chunk
//!    and never opens a gap before the next one.
//! 3. Emit `text[start..end]`.
//! 4. The next window starts at `raw_end - overlap`. Windows therefore
//!    advance by exactly `max_chunk_size - overlap`, which bounds the
//!    number of chunks by `ceil(len / (max_chunk_size - overlap))`.
//! 5. Stop once a window reaches the end of the text.
//!
//! # Example
//!
//! ```rust
//! use careguide_core::chunk::{split, ChunkingParams};
//!
//! let params = ChunkingParams::new(300, 50).unwrap();
//! let text = "x".repeat(1000);
//! let spans = split(&text, &params);
//! assert_eq!(spans.len(), 4);
//! assert!(spans.iter().all(|s| s.len() <= 300));
//! ```

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{CoreError, CoreResult};
use crate::models::{Chunk, ChunkMetadata, Document};

/// Fraction of the window (in percent) searched for a boundary.
const LOOKBACK_PERCENT: usize = 20;

const SENTENCE_ENDINGS: [char; 6] = ['.', '!', '?', '。', '！', '？'];

/// Validated chunking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingParams {
    max_chunk_size: usize,
    overlap: usize,
}

impl ChunkingParams {
    /// Build parameters, failing with [`CoreError::InvalidConfiguration`]
    /// unless `max_chunk_size > 0` and `overlap < max_chunk_size`.
    pub fn new(max_chunk_size: usize, overlap: usize) -> CoreResult<Self> {
        if max_chunk_size == 0 {
            return Err(CoreError::invalid_config("max_chunk_size must be > 0"));
        }
        if overlap >= max_chunk_size {
            return Err(CoreError::invalid_config(format!(
                "overlap ({}) must be smaller than max_chunk_size ({})",
                overlap, max_chunk_size
            )));
        }
        Ok(Self {
            max_chunk_size,
            overlap,
        })
    }

    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Distance between consecutive window starts.
    pub fn stride(&self) -> usize {
        self.max_chunk_size - self.overlap
    }
}

/// A character span of the input produced by [`split`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextSpan {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

impl TextSpan {
    /// Length in characters.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Split `text` into bounded, overlapping character spans.
///
/// Empty text yields no spans; text no longer than `max_chunk_size` yields
/// exactly one.
pub fn split(text: &str, params: &ChunkingParams) -> Vec<TextSpan> {
    // Byte offset of every char boundary, including the end of the string.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();

    let mut spans = Vec::new();
    let mut start = 0usize;

    while start < len {
        let raw_end = (start + params.max_chunk_size).min(len);
        let end = if raw_end < len {
            snap_to_boundary(&chars, start, raw_end, params)
        } else {
            raw_end
        };

        spans.push(TextSpan {
            start,
            end,
            text: text[bounds[start]..bounds[end]].to_string(),
        });

        if raw_end == len {
            break;
        }

        let next = raw_end.saturating_sub(params.overlap);
        start = if next <= start { raw_end } else { next };
    }

    spans
}

/// Move `raw_end` back to just after the nearest sentence ending (or,
/// failing that, whitespace) inside the lookback window.
fn snap_to_boundary(chars: &[char], start: usize, raw_end: usize, params: &ChunkingParams) -> usize {
    let window = raw_end - start;
    let lookback = (window * LOOKBACK_PERCENT / 100).min(params.overlap);
    if lookback == 0 {
        return raw_end;
    }
    let lowest = raw_end - lookback;

    let find = |pred: &dyn Fn(char) -> bool| {
        (lowest..raw_end)
            .rev()
            .find(|&p| pred(chars[p]))
            .map(|p| p + 1)
    };

    find(&|c| SENTENCE_ENDINGS.contains(&c))
        .or_else(|| find(&|c| c.is_whitespace()))
        .unwrap_or(raw_end)
}

/// Chunk a document, producing [`Chunk`]s with inherited metadata.
///
/// Chunk ids are deterministic (`{document_id}#{sequence_index}`), so
/// re-ingesting identical text yields identical ids. Each chunk carries the
/// SHA-256 of its text.
pub fn chunk_document(doc: &Document, params: &ChunkingParams) -> CoreResult<Vec<Chunk>> {
    doc.validate()?;

    let spans = split(&doc.raw_text, params);
    let total = spans.len();

    Ok(spans
        .into_iter()
        .enumerate()
        .map(|(i, span)| make_chunk(doc, i, total, span))
        .collect())
}

fn make_chunk(doc: &Document, index: usize, total: usize, span: TextSpan) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(span.text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: format!("{}#{}", doc.id, index),
        document_id: doc.id.clone(),
        text: span.text,
        start_offset: span.start,
        end_offset: span.end,
        sequence_index: index,
        metadata: ChunkMetadata {
            source: doc.source_metadata.clone(),
            part_index: index,
            part_total: total,
        },
        hash,
    }
}
