//! Weighted score fusion with per-candidate weight renormalization.
//!
//! A candidate's final score is
//!
//! ```text
//! final = Σ (w_k * s_k) / Σ w_k      for k in strategies that returned it
//! ```
//!
//! so a record found only by the fuzzy strategy is scored on its fuzzy
//! score alone rather than being diluted by weights of strategies that never
//! saw it.

use std::collections::{BTreeMap, HashMap};

use ulid::Ulid;

use hyrank_core::{Candidate, Hit, Payload, StrategyKind, Weights};

use crate::normalize::BatchStats;

/// Normalized score per strategy for one candidate.
pub type StrategyScores = BTreeMap<StrategyKind, f32>;

/// Candidates from every strategy, merged by id.
#[derive(Debug, Default)]
pub struct CandidatePool {
    candidates: HashMap<Ulid, Candidate>,
    stats: BTreeMap<StrategyKind, BatchStats>,
}

impl CandidatePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one strategy's batch.
    ///
    /// A repeated id within the batch keeps its best raw score. The first
    /// payload seen for an id is kept, so batches should be added in
    /// `StrategyKind::ALL` order for reproducible payloads.
    pub fn add(&mut self, kind: StrategyKind, hits: Vec<Hit>) {
        self.stats.insert(kind, BatchStats::from_hits(&hits));

        for hit in hits {
            let candidate = self
                .candidates
                .entry(hit.id)
                .or_insert_with(|| Candidate::new(hit.id));

            candidate
                .strategy_scores
                .entry(kind)
                .and_modify(|s| *s = better_raw(kind, *s, hit.score))
                .or_insert(hit.score);

            if candidate.payload.is_empty() {
                if let Some(payload) = hit.payload {
                    candidate.payload = payload;
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Normalize every candidate's raw scores against its strategy's batch.
    pub fn normalized(&self) -> HashMap<Ulid, StrategyScores> {
        self.candidates
            .iter()
            .map(|(id, candidate)| {
                let scores = candidate
                    .strategy_scores
                    .iter()
                    .map(|(kind, raw)| {
                        let stats = self.stats.get(kind).copied().unwrap_or_default();
                        (*kind, crate::normalize::normalize(*kind, *raw, &stats))
                    })
                    .collect();
                (*id, scores)
            })
            .collect()
    }

    /// Hand over the merged payloads.
    pub fn into_payloads(self) -> HashMap<Ulid, Payload> {
        self.candidates
            .into_iter()
            .map(|(id, c)| (id, c.payload))
            .collect()
    }
}

/// Keep the better of two raw scores under a strategy's direction.
fn better_raw(kind: StrategyKind, a: f32, b: f32) -> f32 {
    match kind {
        StrategyKind::Semantic => a.min(b),
        StrategyKind::Keyword | StrategyKind::Fuzzy => a.max(b),
    }
}

/// Fuse one candidate's normalized scores.
///
/// Returns `None` when no strategy with a positive weight returned the
/// candidate; such a candidate has no basis for a score.
pub fn fuse_candidate(scores: &StrategyScores, weights: &Weights) -> Option<f32> {
    let mut weighted = 0.0f32;
    let mut total_weight = 0.0f32;

    // BTreeMap iteration follows StrategyKind order, keeping sums reproducible.
    for (kind, score) in scores {
        let weight = weights.get(*kind);
        weighted += weight * score;
        total_weight += weight;
    }

    if total_weight <= 0.0 {
        return None;
    }

    Some((weighted / total_weight).clamp(0.0, 1.0))
}

/// Fuse every candidate.
pub fn fuse(
    candidates: &HashMap<Ulid, StrategyScores>,
    weights: &Weights,
) -> HashMap<Ulid, f32> {
    candidates
        .iter()
        .filter_map(|(id, scores)| fuse_candidate(scores, weights).map(|s| (*id, s)))
        .collect()
}
