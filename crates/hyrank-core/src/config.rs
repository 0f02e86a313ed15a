//! Configuration types for hyrank.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{HyrankError, Result};
use crate::types::Weights;

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HyrankConfig {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Search defaults.
    #[serde(default)]
    pub search: SearchConfig,

    /// Candidate source cutoffs.
    #[serde(default)]
    pub matching: MatchingConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// Enable WAL mode (recommended).
    #[serde(default = "default_true")]
    pub wal_mode: bool,

    /// SQLite cache size in KB (negative = KB, positive = pages).
    #[serde(default = "default_cache_size")]
    pub cache_size: i32,

    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u32,

    /// Length of stored and query embeddings.
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            wal_mode: true,
            cache_size: default_cache_size(),
            busy_timeout_ms: default_busy_timeout(),
            embedding_dimension: default_embedding_dimension(),
        }
    }
}

/// Search defaults applied when a caller omits them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Default number of results.
    #[serde(default = "default_limit")]
    pub default_limit: i64,

    /// Maximum number of results.
    #[serde(default = "default_max_limit")]
    pub max_limit: i64,

    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f32,

    #[serde(default = "default_fuzzy_weight")]
    pub fuzzy_weight: f32,

    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f32,

    /// Per-query deadline for candidate fetches.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Candidates fetched per strategy, as a multiple of the limit.
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: u32,

    /// Lower bound on candidates fetched per strategy.
    #[serde(default = "default_min_candidates")]
    pub min_candidates: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            keyword_weight: default_keyword_weight(),
            fuzzy_weight: default_fuzzy_weight(),
            semantic_weight: default_semantic_weight(),
            timeout_ms: default_timeout_ms(),
            candidate_multiplier: default_candidate_multiplier(),
            min_candidates: default_min_candidates(),
        }
    }
}

impl SearchConfig {
    pub fn weights(&self) -> Weights {
        Weights::new(self.keyword_weight, self.fuzzy_weight, self.semantic_weight)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Cutoffs applied by the candidate source before results reach fusion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Minimum trigram similarity for a fuzzy match.
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f32,

    /// Cosine distances at or above this are not returned.
    #[serde(default = "default_max_semantic_distance")]
    pub max_semantic_distance: f32,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: default_fuzzy_threshold(),
            max_semantic_distance: default_max_semantic_distance(),
        }
    }
}

// Default value functions

fn default_true() -> bool {
    true
}

fn default_cache_size() -> i32 {
    -64000
}

fn default_busy_timeout() -> u32 {
    30000
}

fn default_embedding_dimension() -> usize {
    768
}

fn default_limit() -> i64 {
    crate::types::DEFAULT_LIMIT
}

fn default_max_limit() -> i64 {
    100
}

fn default_keyword_weight() -> f32 {
    0.5
}

fn default_fuzzy_weight() -> f32 {
    0.2
}

fn default_semantic_weight() -> f32 {
    0.3
}

fn default_timeout_ms() -> u64 {
    2000
}

fn default_candidate_multiplier() -> u32 {
    2
}

fn default_min_candidates() -> u32 {
    20
}

fn default_fuzzy_threshold() -> f32 {
    0.3
}

fn default_max_semantic_distance() -> f32 {
    1.0
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hyrank")
        .join("hyrank.db")
}

impl HyrankConfig {
    /// Load configuration from file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| HyrankError::Config {
            message: format!("Failed to parse config: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default paths.
    pub fn load_default() -> Result<Self> {
        // Try user config first
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("hyrank").join("config.toml");
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        let local_config = PathBuf::from("hyrank.toml");
        if local_config.exists() {
            return Self::load(&local_config);
        }

        Ok(Self::default())
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<()> {
        self.search
            .weights()
            .validate()
            .map_err(|e| HyrankError::Config {
                message: e.to_string(),
            })?;

        if self.database.embedding_dimension == 0 {
            return Err(HyrankError::Config {
                message: "embedding_dimension must be positive".to_string(),
            });
        }

        if self.search.max_limit < self.search.default_limit {
            return Err(HyrankError::Config {
                message: format!(
                    "max_limit ({}) is below default_limit ({})",
                    self.search.max_limit, self.search.default_limit
                ),
            });
        }

        Ok(())
    }
}
