//! Final ordering, truncation and rank assignment.

use std::cmp::Ordering;
use std::collections::HashMap;

use ulid::Ulid;

use hyrank_core::{Payload, RankedResult, TieBreak};

use crate::fusion::StrategyScores;

/// A fused candidate waiting to be ranked.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub id: Ulid,
    pub final_score: f32,
    pub per_strategy: StrategyScores,
    pub payload: Payload,
}

/// Join fused scores with their per-strategy scores and payloads.
///
/// Only ids present in `fused` survive.
pub fn collect_scored(
    fused: HashMap<Ulid, f32>,
    mut normalized: HashMap<Ulid, StrategyScores>,
    mut payloads: HashMap<Ulid, Payload>,
) -> Vec<ScoredCandidate> {
    fused
        .into_iter()
        .map(|(id, final_score)| ScoredCandidate {
            id,
            final_score,
            per_strategy: normalized.remove(&id).unwrap_or_default(),
            payload: payloads.remove(&id).unwrap_or_default(),
        })
        .collect()
}

/// Sort by score descending with a total tie-break, truncate, assign ranks.
pub fn assemble(
    mut scored: Vec<ScoredCandidate>,
    limit: usize,
    tie_break: &TieBreak,
) -> Vec<RankedResult> {
    if limit == 0 {
        return Vec::new();
    }

    scored.sort_by(|a, b| compare(a, b, tie_break));
    scored.truncate(limit);

    scored
        .into_iter()
        .enumerate()
        .map(|(i, c)| RankedResult {
            rank: i as u32 + 1,
            id: c.id,
            final_score: c.final_score,
            per_strategy: c.per_strategy,
            payload: c.payload,
        })
        .collect()
}

fn compare(a: &ScoredCandidate, b: &ScoredCandidate, tie_break: &TieBreak) -> Ordering {
    b.final_score
        .total_cmp(&a.final_score)
        .then_with(|| match tie_break {
            TieBreak::Recency { field } => {
                compare_recency(timestamp(&a.payload, field), timestamp(&b.payload, field))
            }
            TieBreak::Id => Ordering::Equal,
        })
        .then_with(|| a.id.cmp(&b.id))
}

/// Newest first; a missing timestamp sorts last.
fn compare_recency(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.total_cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn timestamp(payload: &Payload, field: &str) -> Option<f64> {
    payload
        .get(field)
        .and_then(serde_json::Value::as_f64)
        .filter(|t| t.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyrank_core::CREATED_AT_FIELD;

    fn candidate(n: u128, score: f32) -> ScoredCandidate {
        ScoredCandidate {
            id: Ulid::from(n),
            final_score: score,
            per_strategy: StrategyScores::new(),
            payload: Payload::new(),
        }
    }

    fn with_created_at(mut c: ScoredCandidate, ts: u64) -> ScoredCandidate {
        c.payload.insert(CREATED_AT_FIELD.to_string(), ts.into());
        c
    }

    fn ids(results: &[RankedResult]) -> Vec<u128> {
        results.iter().map(|r| u128::from(r.id)).collect()
    }

    #[test]
    fn test_limit_and_id_tie_break() {
        let scored = vec![
            candidate(5, 0.5),
            candidate(2, 0.9),
            candidate(4, 0.5),
            candidate(3, 0.7),
            candidate(1, 0.9),
        ];

        let results = assemble(scored.clone(), 3, &TieBreak::Id);
        assert_eq!(results.len(), 3);
        assert_eq!(ids(&results), vec![1, 2, 3]);
        assert_eq!(
            results.iter().map(|r| r.rank).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );

        // Input order does not matter.
        let mut reversed = scored;
        reversed.reverse();
        assert_eq!(assemble(reversed, 3, &TieBreak::Id), results);
    }

    #[test]
    fn test_scores_non_increasing() {
        let scored = (0..20u128)
            .map(|n| candidate(n, ((n * 7) % 11) as f32 / 10.0))
            .collect();
        let results = assemble(scored, 20, &TieBreak::default());
        assert!(results
            .windows(2)
            .all(|w| w[0].final_score >= w[1].final_score));
    }

    #[test]
    fn test_recency_tie_break() {
        let scored = vec![
            with_created_at(candidate(1, 0.5), 100),
            with_created_at(candidate(2, 0.5), 300),
            candidate(3, 0.5),
            with_created_at(candidate(4, 0.5), 200),
            with_created_at(candidate(5, 0.5), 300),
        ];

        let results = assemble(scored, 10, &TieBreak::default());
        assert_eq!(ids(&results), vec![2, 5, 4, 1, 3]);
    }

    #[test]
    fn test_non_positive_limit_is_empty() {
        assert!(assemble(vec![candidate(1, 1.0)], 0, &TieBreak::Id).is_empty());
    }

    #[test]
    fn test_collect_scored_drops_unfused() {
        let mut fused = HashMap::new();
        fused.insert(Ulid::from(1u128), 0.4);

        let mut normalized = HashMap::new();
        normalized.insert(Ulid::from(1u128), StrategyScores::new());
        normalized.insert(Ulid::from(2u128), StrategyScores::new());

        let scored = collect_scored(fused, normalized, HashMap::new());
        assert_eq!(scored.len(), 1);
        assert_eq!(scored[0].id, Ulid::from(1u128));
    }
}
