//! Query engine for hybrid search.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use hyrank_core::{
    CandidateSource, Hit, HyrankError, Query, Result, SearchConfig, SearchResponse,
    StrategyKind, StrategyStatus,
};

use crate::assemble::{assemble, collect_scored};
use crate::fusion::{fuse, CandidatePool};
use crate::router::route;

/// Engine-wide settings; per-query settings live on [`Query`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deadline for candidate fetches when the query does not set one.
    pub timeout: Duration,

    /// Candidates fetched per strategy, as a multiple of the limit.
    pub candidate_multiplier: u32,

    /// Lower bound on candidates fetched per strategy.
    pub min_candidates: u32,

    /// Upper bound on the number of results.
    pub max_limit: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_config(&SearchConfig::default())
    }
}

impl EngineConfig {
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            timeout: config.timeout(),
            candidate_multiplier: config.candidate_multiplier,
            min_candidates: config.min_candidates,
            max_limit: config.max_limit,
        }
    }
}

/// What came back from one dispatched strategy.
enum Outcome {
    Hits(Vec<Hit>),
    Degraded(StrategyStatus),
}

/// Hybrid search engine.
///
/// Routes each query to the keyword, fuzzy and semantic strategies it can
/// use, runs them concurrently against the candidate source, then
/// normalizes, fuses and ranks the merged candidates.
pub struct SearchEngine<S> {
    /// Candidate source, shared read-only across queries.
    source: Arc<S>,

    config: EngineConfig,
}

impl<S> SearchEngine<S>
where
    S: CandidateSource + 'static,
{
    /// Create a new engine with default settings.
    pub fn new(source: Arc<S>) -> Self {
        Self::with_config(source, EngineConfig::default())
    }

    pub fn with_config(source: Arc<S>, config: EngineConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run a hybrid search.
    ///
    /// A query with nothing to route returns an empty response. Transient
    /// strategy failures and timeouts degrade the response; a permanent
    /// failure, or every dispatched strategy failing, is an error.
    pub async fn search(&self, query: &Query) -> Result<SearchResponse> {
        let start = Instant::now();

        query.validate()?;

        let plan = route(query);
        let mut strategies: BTreeMap<StrategyKind, StrategyStatus> = plan
            .skipped()
            .iter()
            .map(|(kind, reason)| (*kind, StrategyStatus::Skipped { reason: *reason }))
            .collect();

        if plan.is_empty() {
            debug!("No strategy applicable, returning empty result");
            return Ok(SearchResponse {
                results: Vec::new(),
                strategies,
                latency_ms: start.elapsed().as_millis() as u64,
            });
        }

        let limit = query.effective_limit().min(self.max_limit());
        let fetch = self.candidate_limit(limit);
        let timeout = query.timeout.unwrap_or(self.config.timeout);

        debug!(
            "Dispatching {:?} (fetch {} per strategy, timeout {:?})",
            plan.dispatched(),
            fetch,
            timeout
        );

        let handles: Vec<(StrategyKind, JoinHandle<Result<Vec<Hit>>>)> = plan
            .dispatched()
            .iter()
            .map(|kind| (*kind, self.spawn_strategy(*kind, query, fetch)))
            .collect();

        let outcomes = Self::collect(handles, start, start + timeout).await?;

        let mut pool = CandidatePool::new();
        let mut failures = Vec::new();

        // Merge in StrategyKind order regardless of which strategy finished first.
        for (kind, outcome) in outcomes {
            match outcome {
                Outcome::Hits(hits) => {
                    debug!("{} strategy returned {} candidates", kind, hits.len());
                    strategies.insert(kind, StrategyStatus::Completed { hits: hits.len() });
                    pool.add(kind, hits);
                }
                Outcome::Degraded(status) => {
                    failures.push(format!("{}: {}", kind, describe(&status)));
                    strategies.insert(kind, status);
                }
            }
        }

        if failures.len() == plan.dispatched().len() {
            return Err(HyrankError::NoStrategyAvailable { failures });
        }

        let normalized = pool.normalized();
        let fused = fuse(&normalized, &query.weights);
        let candidate_count = pool.len();
        let scored = collect_scored(fused, normalized, pool.into_payloads());
        let results = assemble(scored, limit, &query.tie_break);

        let latency_ms = start.elapsed().as_millis() as u64;
        let response = SearchResponse {
            results,
            strategies,
            latency_ms,
        };

        if response.is_degraded() {
            warn!(
                "Search degraded: {:?} did not contribute",
                response.degraded()
            );
        }

        info!(
            "Search completed in {}ms, {} candidates, returned {} results",
            latency_ms,
            candidate_count,
            response.results.len()
        );

        Ok(response)
    }

    fn max_limit(&self) -> usize {
        usize::try_from(self.config.max_limit).unwrap_or(0)
    }

    /// Candidate pool size requested from each strategy.
    fn candidate_limit(&self, limit: usize) -> u32 {
        let limit = u32::try_from(limit).unwrap_or(u32::MAX);
        limit
            .saturating_mul(self.config.candidate_multiplier)
            .max(self.config.min_candidates)
    }

    /// Run one strategy on its own task so a failure or panic stays isolated.
    fn spawn_strategy(
        &self,
        kind: StrategyKind,
        query: &Query,
        fetch: u32,
    ) -> JoinHandle<Result<Vec<Hit>>> {
        let source = Arc::clone(&self.source);
        let text = query.trimmed_text().unwrap_or_default().to_string();
        let vector = query.vector.clone().unwrap_or_default();

        tokio::spawn(async move {
            match kind {
                StrategyKind::Keyword => source.keyword_match(&text, fetch).await,
                StrategyKind::Fuzzy => source.fuzzy_match(&text, fetch).await,
                StrategyKind::Semantic => source.semantic_match(&vector, fetch).await,
            }
        })
    }

    /// Wait for every dispatched strategy until the shared deadline.
    ///
    /// Results are taken in completion order. A permanent error aborts the
    /// remaining strategies and is returned as soon as it arrives.
    async fn collect(
        handles: Vec<(StrategyKind, JoinHandle<Result<Vec<Hit>>>)>,
        start: Instant,
        deadline: Instant,
    ) -> Result<BTreeMap<StrategyKind, Outcome>> {
        let mut pending: BTreeMap<StrategyKind, AbortHandle> = BTreeMap::new();
        let mut joins = JoinSet::new();

        // Each strategy task is awaited from a wrapper task, so a panic in
        // the strategy still arrives tagged with its kind.
        for (kind, handle) in handles {
            pending.insert(kind, handle.abort_handle());
            joins.spawn(async move { (kind, handle.await) });
        }

        let mut outcomes = BTreeMap::new();

        while !pending.is_empty() {
            let next = tokio::time::timeout_at(deadline, joins.join_next()).await;
            let (kind, joined) = match next {
                Ok(Some(Ok(joined))) => joined,
                Ok(Some(Err(join_error))) => {
                    abort_all(&pending);
                    return Err(HyrankError::internal(format!(
                        "strategy wrapper task failed: {}",
                        join_error
                    )));
                }
                Ok(None) => break,
                Err(_) => {
                    let after_ms = start.elapsed().as_millis() as u64;
                    for (kind, abort) in std::mem::take(&mut pending) {
                        abort.abort();
                        warn!("{} strategy timed out after {}ms", kind, after_ms);
                        let status = StrategyStatus::TimedOut { after_ms };
                        outcomes.insert(kind, Outcome::Degraded(status));
                    }
                    break;
                }
            };

            pending.remove(&kind);

            let outcome = match joined {
                Ok(Ok(hits)) => Outcome::Hits(hits),
                Ok(Err(e)) if e.is_transient() => {
                    warn!("{} strategy failed, continuing without it: {}", kind, e);
                    Outcome::Degraded(StrategyStatus::Failed {
                        reason: e.to_string(),
                    })
                }
                Ok(Err(e)) => {
                    warn!("{} strategy misconfigured: {}", kind, e);
                    abort_all(&pending);
                    return Err(e);
                }
                Err(join_error) => {
                    warn!("{} strategy task failed: {}", kind, join_error);
                    Outcome::Degraded(StrategyStatus::Failed {
                        reason: format!("task failed: {}", join_error),
                    })
                }
            };
            outcomes.insert(kind, outcome);
        }

        Ok(outcomes)
    }
}

fn abort_all(pending: &BTreeMap<StrategyKind, AbortHandle>) {
    for abort in pending.values() {
        abort.abort();
    }
}

fn describe(status: &StrategyStatus) -> String {
    match status {
        StrategyStatus::Failed { reason } => reason.clone(),
        StrategyStatus::TimedOut { after_ms } => format!("timed out after {}ms", after_ms),
        StrategyStatus::Completed { hits } => format!("completed with {} hits", hits),
        StrategyStatus::Skipped { reason } => format!("skipped ({:?})", reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use hyrank_core::{Payload, SkipReason, TieBreak, Weights, CREATED_AT_FIELD};
    use ulid::Ulid;

    #[derive(Clone)]
    enum Behavior {
        Hits(Vec<Hit>),
        Unavailable,
        Misconfigured,
        Slow(Duration, Vec<Hit>),
        Panic,
    }

    impl Default for Behavior {
        fn default() -> Self {
            Self::Hits(Vec::new())
        }
    }

    #[derive(Default)]
    struct MockSource {
        keyword: Behavior,
        fuzzy: Behavior,
        semantic: Behavior,
        calls: Mutex<Vec<StrategyKind>>,
    }

    impl MockSource {
        fn calls(&self) -> Vec<StrategyKind> {
            let mut calls = self.calls.lock().unwrap().clone();
            calls.sort();
            calls
        }

        async fn respond(&self, kind: StrategyKind, behavior: &Behavior) -> Result<Vec<Hit>> {
            self.calls.lock().unwrap().push(kind);
            match behavior {
                Behavior::Hits(hits) => Ok(hits.clone()),
                Behavior::Unavailable => Err(HyrankError::unavailable(kind, "connection refused")),
                Behavior::Misconfigured => Err(HyrankError::DimensionMismatch {
                    expected: 3,
                    actual: 2,
                }),
                Behavior::Slow(delay, hits) => {
                    tokio::time::sleep(*delay).await;
                    Ok(hits.clone())
                }
                Behavior::Panic => panic!("{} strategy exploded", kind),
            }
        }
    }

    #[async_trait]
    impl CandidateSource for MockSource {
        async fn keyword_match(&self, _text: &str, _limit: u32) -> Result<Vec<Hit>> {
            self.respond(StrategyKind::Keyword, &self.keyword).await
        }

        async fn fuzzy_match(&self, _text: &str, _limit: u32) -> Result<Vec<Hit>> {
            self.respond(StrategyKind::Fuzzy, &self.fuzzy).await
        }

        async fn semantic_match(&self, _vector: &[f32], _limit: u32) -> Result<Vec<Hit>> {
            self.respond(StrategyKind::Semantic, &self.semantic).await
        }
    }

    fn ulid(n: u128) -> Ulid {
        Ulid::from(n)
    }

    fn hits(entries: &[(u128, f32)]) -> Vec<Hit> {
        entries
            .iter()
            .map(|(n, score)| Hit::new(ulid(*n), *score))
            .collect()
    }

    fn engine(source: MockSource) -> (Arc<MockSource>, SearchEngine<MockSource>) {
        let source = Arc::new(source);
        (source.clone(), SearchEngine::new(source))
    }

    fn ids(response: &SearchResponse) -> Vec<u128> {
        response.results.iter().map(|r| u128::from(r.id)).collect()
    }

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(2));
        assert_eq!(config.candidate_multiplier, 2);
        assert_eq!(config.min_candidates, 20);
    }

    #[test]
    fn test_candidate_limit() {
        let (_, engine) = engine(MockSource::default());
        assert_eq!(engine.candidate_limit(3), 20);
        assert_eq!(engine.candidate_limit(50), 100);
        assert_eq!(engine.candidate_limit(usize::MAX), u32::MAX);
    }

    #[tokio::test]
    async fn test_empty_query_returns_empty() {
        let (source, engine) = engine(MockSource::default());

        let response = engine.search(&Query::text("")).await.unwrap();
        assert!(response.results.is_empty());
        assert!(!response.is_degraded());
        assert!(source.calls().is_empty());

        let response = engine.search(&Query::default()).await.unwrap();
        assert!(response.results.is_empty());
        assert_eq!(response.strategies.len(), 3);
    }

    #[tokio::test]
    async fn test_text_only_never_uses_semantic() {
        let (source, engine) = engine(MockSource {
            keyword: Behavior::Hits(hits(&[(1, 3.0), (2, 1.5)])),
            fuzzy: Behavior::Hits(hits(&[(2, 0.6), (3, 0.4)])),
            semantic: Behavior::Hits(hits(&[(4, 0.1)])),
            ..Default::default()
        });

        let response = engine.search(&Query::text("rust")).await.unwrap();

        assert_eq!(source.calls(), vec![StrategyKind::Keyword, StrategyKind::Fuzzy]);
        assert_eq!(
            response.strategies[&StrategyKind::Semantic],
            StrategyStatus::Skipped {
                reason: SkipReason::NoVector
            }
        );
        assert_eq!(response.results.len(), 3);
        for result in &response.results {
            assert!(!result.per_strategy.contains_key(&StrategyKind::Semantic));
        }
    }

    #[tokio::test]
    async fn test_fuzzy_only_candidate_keeps_full_score() {
        let (_, engine) = engine(MockSource {
            keyword: Behavior::Hits(hits(&[(1, 2.0)])),
            fuzzy: Behavior::Hits(hits(&[(2, 0.8)])),
            ..Default::default()
        });

        let query = Query::text("postgers").with_weights(Weights::new(0.5, 0.2, 0.3));
        let response = engine.search(&query).await.unwrap();

        let fuzzy_only = response
            .results
            .iter()
            .find(|r| r.id == ulid(2))
            .unwrap();
        assert!((fuzzy_only.final_score - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_single_nonzero_weight_matches_single_strategy_ranking() {
        let source = MockSource {
            keyword: Behavior::Hits(hits(&[(3, 9.0), (2, 6.0), (1, 3.0)])),
            fuzzy: Behavior::Hits(hits(&[(1, 0.9), (2, 0.5), (4, 0.3)])),
            semantic: Behavior::Hits(hits(&[(3, 0.0), (4, 0.1)])),
            ..Default::default()
        };
        let (_, engine) = engine(source);
        let base = Query::text("query").with_vector(vec![1.0, 0.0, 0.0]);

        let blended = engine.search(&base).await.unwrap();
        assert_ne!(ids(&blended)[0], 1);

        let fuzzy_only = engine
            .search(&base.clone().with_weights(Weights::new(0.0, 1.0, 0.0)))
            .await
            .unwrap();
        assert_eq!(ids(&fuzzy_only), vec![1, 2, 4]);

        let scaled = engine
            .search(&base.clone().with_weights(Weights::new(0.0, 0.3, 0.0)))
            .await
            .unwrap();
        assert_eq!(ids(&scaled), ids(&fuzzy_only));

        let keyword_only = engine
            .search(&base.with_weights(Weights::new(2.0, 0.0, 0.0)))
            .await
            .unwrap();
        assert_eq!(ids(&keyword_only), vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn test_blends_all_three_strategies() {
        let (_, engine) = engine(MockSource {
            keyword: Behavior::Hits(hits(&[(1, 8.0), (2, 4.0)])),
            fuzzy: Behavior::Hits(hits(&[(1, 0.5)])),
            semantic: Behavior::Hits(hits(&[(2, 0.2)])),
            ..Default::default()
        });

        let query = Query::text("hybrid").with_vector(vec![0.1, 0.2, 0.3]);
        let response = engine.search(&query).await.unwrap();

        assert_eq!(ids(&response), vec![1, 2]);
        // (0.5*1.0 + 0.2*0.5) / 0.7
        assert!((response.results[0].final_score - 0.857_142_9).abs() < 1e-5);
        // (0.5*0.5 + 0.3*0.8) / 0.8
        assert!((response.results[1].final_score - 0.6125).abs() < 1e-6);
        assert_eq!(
            response.contributed(),
            StrategyKind::ALL.to_vec()
        );
    }

    #[tokio::test]
    async fn test_text_strategies_failing_degrades_to_semantic() {
        let (_, engine) = engine(MockSource {
            keyword: Behavior::Unavailable,
            fuzzy: Behavior::Unavailable,
            semantic: Behavior::Hits(hits(&[(7, 0.3), (8, 0.1)])),
            ..Default::default()
        });

        let query = Query::text("anything").with_vector(vec![1.0, 0.0, 0.0]);
        let response = engine.search(&query).await.unwrap();

        assert_eq!(ids(&response), vec![8, 7]);
        assert_eq!(
            response.degraded(),
            vec![StrategyKind::Keyword, StrategyKind::Fuzzy]
        );
        assert_eq!(response.contributed(), vec![StrategyKind::Semantic]);
    }

    #[tokio::test]
    async fn test_all_strategies_failing_is_error() {
        let (_, engine) = engine(MockSource {
            keyword: Behavior::Unavailable,
            fuzzy: Behavior::Unavailable,
            ..Default::default()
        });

        let err = engine.search(&Query::text("anything")).await.unwrap_err();
        match err {
            HyrankError::NoStrategyAvailable { failures } => {
                assert_eq!(failures.len(), 2);
                assert!(failures[0].starts_with("keyword:"));
                assert!(failures[1].starts_with("fuzzy:"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_misconfiguration_is_surfaced() {
        let (_, engine) = engine(MockSource {
            keyword: Behavior::Hits(hits(&[(1, 1.0)])),
            semantic: Behavior::Misconfigured,
            ..Default::default()
        });

        let query = Query::text("rust").with_vector(vec![1.0, 0.0]);
        let err = engine.search(&query).await.unwrap_err();
        assert!(matches!(err, HyrankError::DimensionMismatch { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_misconfiguration_does_not_wait_for_slow_strategies() {
        let (_, engine) = engine(MockSource {
            keyword: Behavior::Slow(Duration::from_secs(30), hits(&[(1, 1.0)])),
            fuzzy: Behavior::Slow(Duration::from_secs(30), hits(&[(2, 0.7)])),
            semantic: Behavior::Misconfigured,
            ..Default::default()
        });

        let start = Instant::now();
        let query = Query::text("rust")
            .with_vector(vec![1.0, 0.0])
            .with_timeout(Duration::from_secs(60));
        let err = engine.search(&query).await.unwrap_err();

        assert!(matches!(err, HyrankError::DimensionMismatch { .. }));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_strategy_times_out() {
        let (_, engine) = engine(MockSource {
            keyword: Behavior::Slow(Duration::from_secs(30), hits(&[(1, 1.0)])),
            fuzzy: Behavior::Hits(hits(&[(2, 0.7)])),
            ..Default::default()
        });

        let query = Query::text("rust").with_timeout(Duration::from_millis(100));
        let response = engine.search(&query).await.unwrap();

        assert_eq!(ids(&response), vec![2]);
        assert!(matches!(
            response.strategies[&StrategyKind::Keyword],
            StrategyStatus::TimedOut { .. }
        ));
        assert_eq!(response.degraded(), vec![StrategyKind::Keyword]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_strategy_within_deadline_contributes() {
        let (_, engine) = engine(MockSource {
            keyword: Behavior::Slow(Duration::from_millis(50), hits(&[(1, 1.0)])),
            fuzzy: Behavior::Hits(hits(&[(2, 0.7)])),
            ..Default::default()
        });

        let query = Query::text("rust").with_timeout(Duration::from_millis(500));
        let response = engine.search(&query).await.unwrap();

        assert_eq!(ids(&response), vec![1, 2]);
        assert!(!response.is_degraded());
    }

    #[tokio::test]
    async fn test_panicking_strategy_is_isolated() {
        let (_, engine) = engine(MockSource {
            keyword: Behavior::Hits(hits(&[(1, 1.0)])),
            fuzzy: Behavior::Panic,
            ..Default::default()
        });

        let response = engine.search(&Query::text("rust")).await.unwrap();
        assert_eq!(ids(&response), vec![1]);
        assert_eq!(response.degraded(), vec![StrategyKind::Fuzzy]);
    }

    #[tokio::test]
    async fn test_limit_and_tie_break_are_stable() {
        let (_, engine) = engine(MockSource {
            fuzzy: Behavior::Hits(hits(&[(5, 0.5), (2, 0.9), (4, 0.5), (3, 0.7), (1, 0.9)])),
            ..Default::default()
        });

        let query = Query::text("tie")
            .with_limit(3)
            .with_tie_break(TieBreak::Id);

        let first = engine.search(&query).await.unwrap();
        assert_eq!(ids(&first), vec![1, 2, 3]);

        for _ in 0..5 {
            let again = engine.search(&query).await.unwrap();
            assert_eq!(again.results, first.results);
        }
    }

    #[tokio::test]
    async fn test_recency_tie_break_uses_payload() {
        let mut older = Payload::new();
        older.insert(CREATED_AT_FIELD.to_string(), 1_000u64.into());
        let mut newer = Payload::new();
        newer.insert(CREATED_AT_FIELD.to_string(), 2_000u64.into());

        let (_, engine) = engine(MockSource {
            fuzzy: Behavior::Hits(vec![
                Hit::new(ulid(1), 0.5).with_payload(older),
                Hit::new(ulid(2), 0.5).with_payload(newer),
            ]),
            ..Default::default()
        });

        let response = engine.search(&Query::text("tie")).await.unwrap();
        assert_eq!(ids(&response), vec![2, 1]);
        assert_eq!(response.results[0].payload[CREATED_AT_FIELD], 2_000);
    }

    #[tokio::test]
    async fn test_non_positive_limit_is_empty() {
        let (_, engine) = engine(MockSource {
            keyword: Behavior::Hits(hits(&[(1, 1.0)])),
            ..Default::default()
        });

        for limit in [0, -3] {
            let response = engine
                .search(&Query::text("rust").with_limit(limit))
                .await
                .unwrap();
            assert!(response.results.is_empty());
        }
    }

    #[tokio::test]
    async fn test_invalid_weights_rejected() {
        let (source, engine) = engine(MockSource::default());

        let query = Query::text("rust").with_weights(Weights::new(-1.0, 0.2, 0.3));
        let err = engine.search(&query).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");
        assert!(source.calls().is_empty());
    }

    #[tokio::test]
    async fn test_limit_capped_by_max_limit() {
        let many: Vec<(u128, f32)> = (1..=10u128).map(|n| (n, n as f32)).collect();
        let source = Arc::new(MockSource {
            keyword: Behavior::Hits(hits(&many)),
            ..Default::default()
        });
        let engine = SearchEngine::with_config(
            source,
            EngineConfig {
                max_limit: 4,
                ..Default::default()
            },
        );

        let response = engine
            .search(&Query::text("rust").with_limit(50))
            .await
            .unwrap();
        assert_eq!(ids(&response), vec![10, 9, 8, 7]);
    }
}
