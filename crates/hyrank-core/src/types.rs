//! Core domain types for hyrank.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use ulid::Ulid;

use crate::error::{HyrankError, Result};

/// Default number of results returned by a search.
pub const DEFAULT_LIMIT: i64 = 20;

/// Payload field used for reverse-chronological tie-breaking.
pub const CREATED_AT_FIELD: &str = "created_at";

/// Opaque record fields carried through the pipeline unmodified.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// One of the three independent retrieval strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Exact/stemmed keyword matching.
    Keyword,
    /// Typo-tolerant string similarity.
    Fuzzy,
    /// Vector similarity against a query embedding.
    Semantic,
}

impl StrategyKind {
    /// All strategies in their fixed evaluation order.
    pub const ALL: [StrategyKind; 3] = [Self::Keyword, Self::Fuzzy, Self::Semantic];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::Fuzzy => "fuzzy",
            Self::Semantic => "semantic",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-strategy blend weights.
///
/// Weights need not sum to 1; fusion renormalizes them per candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub keyword: f32,
    pub fuzzy: f32,
    pub semantic: f32,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            keyword: 0.5,
            fuzzy: 0.2,
            semantic: 0.3,
        }
    }
}

impl Weights {
    pub fn new(keyword: f32, fuzzy: f32, semantic: f32) -> Self {
        Self {
            keyword,
            fuzzy,
            semantic,
        }
    }

    /// Weight for a single strategy.
    pub fn get(&self, kind: StrategyKind) -> f32 {
        match kind {
            StrategyKind::Keyword => self.keyword,
            StrategyKind::Fuzzy => self.fuzzy,
            StrategyKind::Semantic => self.semantic,
        }
    }

    /// Reject negative or non-finite weights.
    pub fn validate(&self) -> Result<()> {
        for kind in StrategyKind::ALL {
            let weight = self.get(kind);
            if !weight.is_finite() || weight < 0.0 {
                return Err(HyrankError::invalid_argument(format!(
                    "{} weight must be a non-negative number, got {}",
                    kind, weight
                )));
            }
        }
        Ok(())
    }
}

/// Secondary ordering applied when two results have the same final score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Newest first by a numeric payload field, then id ascending.
    /// Results missing the field sort after those that have it.
    Recency { field: String },
    /// Id ascending.
    Id,
}

impl Default for TieBreak {
    fn default() -> Self {
        Self::Recency {
            field: CREATED_AT_FIELD.to_string(),
        }
    }
}

/// A single search request.
#[derive(Debug, Clone)]
pub struct Query {
    /// Free-text query.
    pub text: Option<String>,

    /// Precomputed query embedding.
    pub vector: Option<Vec<f32>>,

    /// Maximum number of results; zero or negative yields no results.
    pub limit: i64,

    /// Per-strategy weights.
    pub weights: Weights,

    /// Overall deadline for the candidate fetches (engine default if None).
    pub timeout: Option<Duration>,

    /// Ordering for equal scores.
    pub tie_break: TieBreak,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            text: None,
            vector: None,
            limit: DEFAULT_LIMIT,
            weights: Weights::default(),
            timeout: None,
            tie_break: TieBreak::default(),
        }
    }
}

impl Query {
    /// Create a text query with default settings.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Create a vector-only query with default settings.
    pub fn vector(vector: Vec<f32>) -> Self {
        Self {
            vector: Some(vector),
            ..Default::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = Some(vector);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_weights(mut self, weights: Weights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    /// Query text with surrounding whitespace removed, if any remains.
    pub fn trimmed_text(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Query vector, if one with at least one component was supplied.
    pub fn non_empty_vector(&self) -> Option<&[f32]> {
        self.vector.as_deref().filter(|v| !v.is_empty())
    }

    /// Limit as a result count.
    pub fn effective_limit(&self) -> usize {
        usize::try_from(self.limit).unwrap_or(0)
    }

    /// Check weights and vector components.
    pub fn validate(&self) -> Result<()> {
        self.weights.validate()?;

        if let Some(vector) = &self.vector {
            if let Some(pos) = vector.iter().position(|x| !x.is_finite()) {
                return Err(HyrankError::invalid_argument(format!(
                    "query vector component {} is not a finite number",
                    pos
                )));
            }
        }

        Ok(())
    }
}

/// One candidate returned by a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    /// Record identifier.
    pub id: Ulid,

    /// Strategy-native raw score (relevance, similarity or distance).
    pub score: f32,

    /// Record fields, when the source attaches them.
    pub payload: Option<Payload>,
}

impl Hit {
    pub fn new(id: Ulid, score: f32) -> Self {
        Self {
            id,
            score,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// A record surfaced by at least one strategy, merged by id.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: Ulid,

    /// Raw score per strategy that returned this record.
    pub strategy_scores: BTreeMap<StrategyKind, f32>,

    pub payload: Payload,
}

impl Candidate {
    pub fn new(id: Ulid) -> Self {
        Self {
            id,
            strategy_scores: BTreeMap::new(),
            payload: Payload::new(),
        }
    }
}

/// A ranked, fused search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    /// Result rank (1-indexed).
    pub rank: u32,

    pub id: Ulid,

    /// Fused score in [0, 1].
    pub final_score: f32,

    /// Normalized score per strategy that returned this record.
    pub per_strategy: BTreeMap<StrategyKind, f32>,

    pub payload: Payload,
}

/// Why the router did not dispatch a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Query text is empty or has no matchable token.
    NoText,
    /// No query vector was supplied.
    NoVector,
    /// The strategy's weight is zero.
    ZeroWeight,
}

/// Outcome of one strategy for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StrategyStatus {
    Completed { hits: usize },
    Skipped { reason: SkipReason },
    Failed { reason: String },
    TimedOut { after_ms: u64 },
}

impl StrategyStatus {
    /// Whether the strategy was dispatched but did not deliver.
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::TimedOut { .. })
    }
}

/// Search results plus per-strategy diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Ranked results, best first.
    pub results: Vec<RankedResult>,

    /// What happened to each strategy.
    pub strategies: BTreeMap<StrategyKind, StrategyStatus>,

    /// Search latency in milliseconds.
    pub latency_ms: u64,
}

impl SearchResponse {
    /// Strategies that completed and contributed to the ranking.
    pub fn contributed(&self) -> Vec<StrategyKind> {
        self.strategies
            .iter()
            .filter(|(_, s)| matches!(s, StrategyStatus::Completed { .. }))
            .map(|(k, _)| *k)
            .collect()
    }

    /// Strategies that failed or timed out.
    pub fn degraded(&self) -> Vec<StrategyKind> {
        self.strategies
            .iter()
            .filter(|(_, s)| s.is_degraded())
            .map(|(k, _)| *k)
            .collect()
    }

    pub fn is_degraded(&self) -> bool {
        self.strategies.values().any(StrategyStatus::is_degraded)
    }
}

/// A stored, searchable record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier (ULID).
    pub id: Ulid,

    /// Short title, used for typo-tolerant matching.
    pub title: String,

    /// Body text, used for keyword matching together with the title.
    pub content: String,

    /// User-provided metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Blake3 hash of title and content for deduplication.
    #[serde(with = "serde_bytes_opt")]
    pub content_hash: Option<[u8; 32]>,

    /// Creation timestamp (Unix millis).
    pub created_at: u64,
}

impl Record {
    /// Create a new record.
    pub fn new(title: &str, content: &str) -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        Self {
            id: Ulid::new(),
            title: title.to_string(),
            content: content.to_string(),
            metadata: HashMap::new(),
            content_hash: Some(Self::hash_content(title, content)),
            created_at: now,
        }
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_created_at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self
    }

    /// Hash used to detect duplicate records.
    pub fn hash_content(title: &str, content: &str) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(title.as_bytes());
        hasher.update(&[0]);
        hasher.update(content.as_bytes());
        *hasher.finalize().as_bytes()
    }

    /// Fields handed to callers alongside a search hit.
    pub fn payload(&self) -> Payload {
        let mut payload = Payload::new();
        payload.insert("title".to_string(), self.title.clone().into());
        payload.insert("content".to_string(), self.content.clone().into());
        payload.insert(CREATED_AT_FIELD.to_string(), self.created_at.into());
        if !self.metadata.is_empty() {
            let metadata: serde_json::Map<_, _> = self
                .metadata
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            payload.insert("metadata".to_string(), metadata.into());
        }
        payload
    }
}

/// Statistics about a candidate store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    /// Number of records.
    pub records: u64,

    /// Number of records with an embedding.
    pub embeddings: u64,

    /// Embedding dimension the store expects.
    pub dimension: usize,

    /// Whether the sqlite-vec index is in use.
    pub vector_index: bool,

    /// Database size in bytes.
    pub storage_bytes: u64,
}

/// Helper module for optional byte array serialization.
mod serde_bytes_opt {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(value: &Option<[u8; 32]>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => hex::encode(bytes).serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<[u8; 32]>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<String> = Option::deserialize(deserializer)?;
        match opt {
            Some(hex) => {
                let bytes = hex::decode(&hex).map_err(serde::de::Error::custom)?;
                let arr: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| serde::de::Error::custom("invalid hash length"))?;
                Ok(Some(arr))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights() {
        let w = Weights::default();
        assert_eq!(w.get(StrategyKind::Keyword), 0.5);
        assert_eq!(w.get(StrategyKind::Fuzzy), 0.2);
        assert_eq!(w.get(StrategyKind::Semantic), 0.3);
        assert!(w.validate().is_ok());
    }

    #[test]
    fn test_weights_reject_negative_and_nan() {
        assert!(Weights::new(-0.1, 0.2, 0.3).validate().is_err());
        assert!(Weights::new(0.5, f32::NAN, 0.3).validate().is_err());
        assert!(Weights::new(0.0, 0.0, 0.0).validate().is_ok());
    }

    #[test]
    fn test_query_defaults() {
        let q = Query::text("rust");
        assert_eq!(q.limit, 20);
        assert_eq!(q.tie_break, TieBreak::default());
        assert!(q.vector.is_none());
    }

    #[test]
    fn test_query_text_and_vector_accessors() {
        assert_eq!(Query::text("   ").trimmed_text(), None);
        assert_eq!(Query::text("  hi ").trimmed_text(), Some("hi"));
        assert_eq!(Query::vector(vec![]).non_empty_vector(), None);
        assert!(Query::vector(vec![0.1]).non_empty_vector().is_some());
    }

    #[test]
    fn test_effective_limit() {
        assert_eq!(Query::text("x").with_limit(-5).effective_limit(), 0);
        assert_eq!(Query::text("x").with_limit(0).effective_limit(), 0);
        assert_eq!(Query::text("x").with_limit(3).effective_limit(), 3);
    }

    #[test]
    fn test_query_rejects_non_finite_vector() {
        let q = Query::vector(vec![0.1, f32::INFINITY]);
        assert!(matches!(
            q.validate(),
            Err(HyrankError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_strategy_kind_serde() {
        let json = serde_json::to_string(&StrategyKind::Semantic).unwrap();
        assert_eq!(json, "\"semantic\"");

        let mut scores = BTreeMap::new();
        scores.insert(StrategyKind::Fuzzy, 0.5f32);
        let json = serde_json::to_string(&scores).unwrap();
        assert_eq!(json, "{\"fuzzy\":0.5}");
    }

    #[test]
    fn test_response_degraded() {
        let mut strategies = BTreeMap::new();
        strategies.insert(StrategyKind::Keyword, StrategyStatus::Failed {
            reason: "down".to_string(),
        });
        strategies.insert(StrategyKind::Fuzzy, StrategyStatus::TimedOut { after_ms: 5 });
        strategies.insert(StrategyKind::Semantic, StrategyStatus::Completed { hits: 2 });

        let response = SearchResponse {
            results: vec![],
            strategies,
            latency_ms: 0,
        };

        assert!(response.is_degraded());
        assert_eq!(
            response.degraded(),
            vec![StrategyKind::Keyword, StrategyKind::Fuzzy]
        );
        assert_eq!(response.contributed(), vec![StrategyKind::Semantic]);
    }

    #[test]
    fn test_record_hash_and_payload() {
        let a = Record::new("Title", "body");
        let b = Record::new("Title", "body");
        let c = Record::new("Titlebody", "");
        assert_eq!(a.content_hash, b.content_hash);
        assert_ne!(a.content_hash, c.content_hash);

        let payload = a.with_created_at(42).payload();
        assert_eq!(payload["title"], "Title");
        assert_eq!(payload[CREATED_AT_FIELD], 42);
        assert!(!payload.contains_key("metadata"));
    }

    #[test]
    fn test_record_serde_roundtrip_hash() {
        let record = Record::new("t", "c");
        let json = serde_json::to_string(&record).unwrap();
        let back: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(back.content_hash, record.content_hash);
    }
}
