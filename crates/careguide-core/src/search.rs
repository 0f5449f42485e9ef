//! Hybrid scoring: merge semantic and keyword hits into one ranking.
//!
//! The merge is pure and deterministic. The caller fetches hits from the
//! [`VectorIndex`](crate::vector::VectorIndex) and the
//! [`KeywordIndex`](crate::keyword::KeywordIndex) (possibly concurrently)
//! and hands both lists to [`merge`].
//!
//! # Algorithm
//!
//! 1. Collapse duplicate ids within each source (highest score wins) and
//!    drop non-finite scores.
//! 2. Normalize each source to `[0, 1]` independently, by the scale of
//!    the source rather than the values at hand (see [`ScoreScale`]):
//!    similarities are clamped, unbounded BM25 scores are min-max
//!    normalized.
//! 3. For the union of ids: `combined = α × semantic + (1 − α) × keyword`,
//!    with a missing score counting as `0`.
//! 4. Sort by combined (desc), raw semantic similarity (desc, missing last),
//!    chunk id (asc).
//! 5. Drop candidates below `min_score`, keep the top `k`, assign ranks.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use crate::error::{CoreError, CoreResult};
use crate::models::{Candidate, ScoredChunk};

/// Default semantic weight.
pub const DEFAULT_ALPHA: f64 = 0.7;
/// Default floor on the combined score.
pub const DEFAULT_MIN_SCORE: f64 = 0.4;

/// How a source's raw scores map onto `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreScale {
    /// Scores are already comparable on `[0, 1]`; they are clamped, so a
    /// negative cosine similarity carries no weight.
    Bounded,
    /// Unbounded scores (BM25), min-max normalized within the list. A list
    /// of equal scores normalizes to `1.0`.
    MinMax,
}

/// Validated merge parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeParams {
    alpha: f64,
    min_score: f64,
    k: usize,
    semantic_scale: ScoreScale,
    keyword_scale: ScoreScale,
}

impl MergeParams {
    /// Fails with [`CoreError::InvalidConfiguration`] unless
    /// `alpha ∈ [0, 1]`, `min_score ∈ [0, 1]`, and `k > 0`.
    pub fn new(alpha: f64, min_score: f64, k: usize) -> CoreResult<Self> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(CoreError::invalid_config(format!(
                "alpha must be in [0.0, 1.0], got {}",
                alpha
            )));
        }
        if !(0.0..=1.0).contains(&min_score) {
            return Err(CoreError::invalid_config(format!(
                "min_score must be in [0.0, 1.0], got {}",
                min_score
            )));
        }
        if k == 0 {
            return Err(CoreError::invalid_config("result limit must be >= 1"));
        }
        Ok(Self {
            alpha,
            min_score,
            k,
            semantic_scale: ScoreScale::Bounded,
            keyword_scale: ScoreScale::MinMax,
        })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn min_score(&self) -> f64 {
        self.min_score
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn semantic_scale(&self) -> ScoreScale {
        self.semantic_scale
    }

    pub fn keyword_scale(&self) -> ScoreScale {
        self.keyword_scale
    }

    pub fn with_alpha(self, alpha: f64) -> CoreResult<Self> {
        Ok(Self {
            semantic_scale: self.semantic_scale,
            keyword_scale: self.keyword_scale,
            ..Self::new(alpha, self.min_score, self.k)?
        })
    }

    /// Override the per-source scales, e.g. when keyword scores were
    /// normalized upstream.
    pub fn with_scales(mut self, semantic: ScoreScale, keyword: ScoreScale) -> Self {
        self.semantic_scale = semantic;
        self.keyword_scale = keyword;
        self
    }
}

impl Default for MergeParams {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            min_score: DEFAULT_MIN_SCORE,
            k: 6,
            semantic_scale: ScoreScale::Bounded,
            keyword_scale: ScoreScale::MinMax,
        }
    }
}

/// Normalize raw scores to `[0.0, 1.0]` according to `scale`.
pub fn normalize_scores(hits: &[ScoredChunk], scale: ScoreScale) -> Vec<(&ScoredChunk, f64)> {
    match scale {
        ScoreScale::Bounded => hits.iter().map(|h| (h, h.score.clamp(0.0, 1.0))).collect(),
        ScoreScale::MinMax => {
            let s_min = hits.iter().map(|h| h.score).fold(f64::INFINITY, f64::min);
            let s_max = hits
                .iter()
                .map(|h| h.score)
                .fold(f64::NEG_INFINITY, f64::max);

            hits.iter()
                .map(|h| {
                    let norm = if (s_max - s_min).abs() < f64::EPSILON {
                        1.0
                    } else {
                        (h.score - s_min) / (s_max - s_min)
                    };
                    (h, norm)
                })
                .collect()
        }
    }
}

/// Keep the best finite score per chunk id, in a stable order.
fn dedup_hits(hits: &[ScoredChunk]) -> Vec<ScoredChunk> {
    let mut best: BTreeMap<&str, f64> = BTreeMap::new();
    for h in hits.iter().filter(|h| h.score.is_finite()) {
        best.entry(h.chunk_id.as_str())
            .and_modify(|s| *s = s.max(h.score))
            .or_insert(h.score);
    }
    best.into_iter()
        .map(|(id, score)| ScoredChunk::new(id, score))
        .collect()
}

/// Merge semantic and keyword hits into a ranked, deduplicated list.
pub fn merge(
    semantic: &[ScoredChunk],
    keyword: &[ScoredChunk],
    params: &MergeParams,
) -> Vec<Candidate> {
    let semantic = dedup_hits(semantic);
    let keyword = dedup_hits(keyword);

    let sem_map: HashMap<&str, (f64, f64)> = normalize_scores(&semantic, params.semantic_scale)
        .into_iter()
        .map(|(h, n)| (h.chunk_id.as_str(), (n, h.score)))
        .collect();
    let kw_map: HashMap<&str, f64> = normalize_scores(&keyword, params.keyword_scale)
        .into_iter()
        .map(|(h, n)| (h.chunk_id.as_str(), n))
        .collect();

    let mut ids: Vec<&str> = sem_map.keys().chain(kw_map.keys()).copied().collect();
    ids.sort_unstable();
    ids.dedup();

    let alpha = params.alpha;
    let mut candidates: Vec<Candidate> = ids
        .into_iter()
        .map(|id| {
            let sem = sem_map.get(id).copied();
            let kw = kw_map.get(id).copied();
            let combined =
                alpha * sem.map_or(0.0, |(n, _)| n) + (1.0 - alpha) * kw.unwrap_or(0.0);
            Candidate {
                chunk_id: id.to_string(),
                semantic_score: sem.map(|(n, _)| n),
                keyword_score: kw,
                raw_semantic: sem.map(|(_, raw)| raw),
                combined_score: combined,
                rank: 0,
            }
        })
        .collect();

    candidates.sort_by(compare_candidates);
    candidates.retain(|c| c.combined_score >= params.min_score);
    candidates.truncate(params.k);
    for (i, c) in candidates.iter_mut().enumerate() {
        c.rank = i + 1;
    }

    candidates
}

/// Combined desc, raw semantic desc (missing last), chunk id asc.
fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    b.combined_score
        .total_cmp(&a.combined_score)
        .then_with(|| match (a.raw_semantic, b.raw_semantic) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}
