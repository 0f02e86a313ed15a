//! hyrank-query - Hybrid search ranking engine
//!
//! This crate combines three retrieval strategies (stemmed keyword,
//! typo-tolerant fuzzy and vector semantic matching) into one ranking.
//!
//! # Pipeline
//!
//! - [`router`] picks the strategies a query can use
//! - strategies run concurrently against a [`CandidateSource`](hyrank_core::CandidateSource)
//!   under a per-query deadline
//! - [`normalize`] maps each strategy's raw scores onto [0, 1]
//! - [`fusion`] merges candidates by id and blends scores with per-candidate
//!   weight renormalization
//! - [`assemble`] orders, tie-breaks and truncates
//!
//! # Example
//!
//! ```rust,ignore
//! use hyrank_query::{Query, SearchEngine};
//! use std::sync::Arc;
//!
//! let engine = SearchEngine::new(Arc::new(store));
//! let response = engine
//!     .search(&Query::text("error handling").with_vector(embedding))
//!     .await?;
//! ```

pub mod assemble;
mod engine;
pub mod fusion;
pub mod normalize;
pub mod router;

pub use engine::{EngineConfig, SearchEngine};
pub use fusion::{fuse, fuse_candidate, CandidatePool, StrategyScores};
pub use normalize::{normalize, normalize_batch, BatchStats};
pub use router::{route, RoutePlan};

// Re-export for convenience
pub use hyrank_core::{Query, RankedResult, SearchResponse, StrategyKind, TieBreak, Weights};
