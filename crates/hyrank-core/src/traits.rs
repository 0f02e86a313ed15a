//! Interfaces between the ranking core and its collaborators.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Hit;

/// The three independent candidate-fetch operations of a storage backend.
///
/// Each call returns raw, strategy-native scores; the engine owns
/// normalization. `limit` bounds the candidate pool size. Transient
/// failures should be reported with errors for which
/// [`HyrankError::is_transient`](crate::HyrankError::is_transient) holds;
/// everything else is treated as a misconfiguration and surfaced to the
/// caller.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Stemmed keyword match. Higher scores are better.
    async fn keyword_match(&self, text: &str, limit: u32) -> Result<Vec<Hit>>;

    /// Typo-tolerant string similarity in [0, 1]. Higher scores are better.
    async fn fuzzy_match(&self, text: &str, limit: u32) -> Result<Vec<Hit>>;

    /// Nearest neighbours by cosine distance. Lower scores are better.
    async fn semantic_match(&self, vector: &[f32], limit: u32) -> Result<Vec<Hit>>;
}
