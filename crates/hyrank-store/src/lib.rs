//! hyrank-store - SQLite candidate source
//!
//! This crate stores searchable records in SQLite and exposes the three
//! candidate-fetch operations the ranking engine needs: FTS5 keyword
//! matching with porter stemming, trigram similarity over record titles,
//! and cosine distance over stored embeddings (through sqlite-vec when the
//! extension is available).

mod schema;
mod similarity;
mod sqlite;

pub use similarity::{cosine_distance, trigram_similarity};
pub use sqlite::{SqliteStore, StoreOptions};

// Re-export schema for testing/migrations
pub use schema::SCHEMA;
