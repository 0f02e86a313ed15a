//! Score normalization.
//!
//! Each strategy reports scores on its own scale:
//!
//! - **keyword**: relevance, unbounded, higher is better. Divided by the
//!   batch maximum so the best keyword hit scores 1.0.
//! - **fuzzy**: similarity already in [0, 1]. Passed through, clamped.
//! - **semantic**: cosine distance, lower is better. Mapped to
//!   `1 - distance`, clamped to [0, 1].
//!
//! Non-finite raw scores normalize to 0.

use ulid::Ulid;

use hyrank_core::{Hit, StrategyKind};

/// Batch-level context some strategies need to normalize a single score.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BatchStats {
    /// Largest finite raw score in the batch (0 for an empty batch).
    pub max_raw: f32,
}

impl BatchStats {
    pub fn from_scores(scores: impl IntoIterator<Item = f32>) -> Self {
        let max_raw = scores
            .into_iter()
            .filter(|s| s.is_finite())
            .fold(None, |acc: Option<f32>, s| Some(acc.map_or(s, |m| m.max(s))))
            .unwrap_or(0.0);
        Self { max_raw }
    }

    pub fn from_hits(hits: &[Hit]) -> Self {
        Self::from_scores(hits.iter().map(|h| h.score))
    }
}

/// Map one raw score onto [0, 1].
pub fn normalize(kind: StrategyKind, raw: f32, stats: &BatchStats) -> f32 {
    if !raw.is_finite() {
        return 0.0;
    }

    let score = match kind {
        StrategyKind::Keyword => {
            if stats.max_raw <= 0.0 {
                return 0.0;
            }
            raw / stats.max_raw
        }
        StrategyKind::Fuzzy => raw,
        StrategyKind::Semantic => 1.0 - raw,
    };

    score.clamp(0.0, 1.0)
}

/// Normalize a whole strategy batch, preserving order.
pub fn normalize_batch(kind: StrategyKind, hits: &[Hit]) -> Vec<(Ulid, f32)> {
    let stats = BatchStats::from_hits(hits);
    hits.iter()
        .map(|hit| (hit.id, normalize(kind, hit.score, &stats)))
        .collect()
}
