//! SQLite-based candidate source.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info, warn};
use ulid::Ulid;

use hyrank_core::{
    CandidateSource, Hit, HyrankConfig, HyrankError, MatchingConfig, Record, Result, Stats,
    StrategyKind,
};

use crate::schema::{vec_schema, DIMENSION_KEY, SCHEMA};
use crate::similarity::{self, vec_to_bytes};

/// Columns selected for every record read; search queries append a score.
const RECORD_COLUMNS: &str = "r.id, r.title, r.content, r.metadata, r.content_hash, r.created_at";

/// Options fixed when a store is opened.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Length of stored and query embeddings.
    pub dimension: usize,

    /// Enable WAL journaling.
    pub wal_mode: bool,

    /// SQLite cache size (negative = KB).
    pub cache_size: i32,

    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,

    /// Fuzzy and semantic cutoffs.
    pub matching: MatchingConfig,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::from_config(&HyrankConfig::default())
    }
}

impl StoreOptions {
    pub fn from_config(config: &HyrankConfig) -> Self {
        Self {
            dimension: config.database.embedding_dimension,
            wal_mode: config.database.wal_mode,
            cache_size: config.database.cache_size,
            busy_timeout_ms: config.database.busy_timeout_ms,
            matching: config.matching.clone(),
        }
    }

    /// Default options with a specific embedding dimension.
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension,
            ..Default::default()
        }
    }

    pub fn with_matching(mut self, matching: MatchingConfig) -> Self {
        self.matching = matching;
        self
    }
}

/// SQLite-based store implementation.
///
/// Uses a blocking Mutex for thread-safe access and runs SQLite operations
/// on the blocking thread pool via `spawn_blocking`.
pub struct SqliteStore {
    /// Connection wrapped in blocking Mutex.
    conn: Arc<Mutex<Connection>>,

    /// Embedding dimension.
    dimension: usize,

    /// Fuzzy and semantic cutoffs.
    matching: MatchingConfig,

    /// Whether sqlite-vec extension is loaded.
    vec_enabled: bool,
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| HyrankError::database(format!("Failed to open database: {}", e)))?;

        Self::init(conn, options, path)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory(options: StoreOptions) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            HyrankError::database(format!("Failed to open in-memory database: {}", e))
        })?;

        Self::init(conn, options, Path::new(":memory:"))
    }

    /// Initialize the store with a connection.
    fn init(conn: Connection, options: StoreOptions, path: &Path) -> Result<Self> {
        if options.dimension == 0 {
            return Err(HyrankError::Config {
                message: "embedding dimension must be positive".to_string(),
            });
        }

        Self::configure_connection(&conn, &options)?;

        similarity::register(&conn)
            .map_err(|e| HyrankError::database(format!("Failed to register functions: {}", e)))?;

        conn.execute_batch(SCHEMA)
            .map_err(|e| HyrankError::database(format!("Failed to initialize schema: {}", e)))?;

        Self::check_dimension(&conn, options.dimension)?;

        let vec_enabled = Self::try_load_vec_extension(&conn)
            && match conn.execute_batch(&vec_schema(options.dimension)) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Failed to create vec table, using brute-force distance: {}", e);
                    false
                }
            };

        if vec_enabled {
            info!("sqlite-vec extension loaded successfully");
        } else {
            warn!("sqlite-vec extension not available - using brute-force vector distance");
        }

        info!("Database opened at {:?}", path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            dimension: options.dimension,
            matching: options.matching,
            vec_enabled,
        })
    }

    /// Configure SQLite connection pragmas.
    fn configure_connection(conn: &Connection, options: &StoreOptions) -> Result<()> {
        let journal = if options.wal_mode { "WAL" } else { "DELETE" };
        conn.execute_batch(&format!(
            r#"
            PRAGMA journal_mode = {};
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = {};
            PRAGMA busy_timeout = {};
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            "#,
            journal, options.cache_size, options.busy_timeout_ms
        ))
        .map_err(|e| HyrankError::database(format!("Failed to configure connection: {}", e)))?;

        Ok(())
    }

    /// Record the embedding dimension on first open and reject a different
    /// one afterwards.
    fn check_dimension(conn: &Connection, dimension: usize) -> Result<()> {
        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = ?1",
                params![DIMENSION_KEY],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| HyrankError::database(e.to_string()))?;

        match stored {
            Some(value) => {
                let stored: usize = value.parse().map_err(|_| HyrankError::Config {
                    message: format!("corrupt stored embedding dimension: {:?}", value),
                })?;
                if stored != dimension {
                    return Err(HyrankError::Config {
                        message: format!(
                            "database was created with embedding dimension {}, configured {}",
                            stored, dimension
                        ),
                    });
                }
            }
            None => {
                conn.execute(
                    "INSERT INTO store_meta (key, value) VALUES (?1, ?2)",
                    params![DIMENSION_KEY, dimension.to_string()],
                )
                .map_err(|e| HyrankError::database(e.to_string()))?;
            }
        }

        Ok(())
    }

    /// Try to load the sqlite-vec extension.
    fn try_load_vec_extension(conn: &Connection) -> bool {
        let paths = [
            "vec0",
            "libsqlite_vec",
            "/usr/local/lib/libsqlite_vec",
            "/opt/homebrew/lib/libsqlite_vec",
        ];

        unsafe {
            if conn.load_extension_enable().is_err() {
                return false;
            }

            for path in paths {
                if conn.load_extension(path, None).is_ok() {
                    let _ = conn.load_extension_disable();
                    return true;
                }
            }

            let _ = conn.load_extension_disable();
        }

        false
    }

    /// Check if the sqlite-vec index is in use.
    pub fn vec_enabled(&self) -> bool {
        self.vec_enabled
    }

    /// Embedding dimension this store accepts.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Run a blocking operation on the connection off the async runtime.
    async fn run<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| HyrankError::database(e.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| HyrankError::internal(format!("Blocking task failed: {}", e)))?
    }

    fn check_vector(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(HyrankError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Reject cutoffs that would make a strategy return nothing or everything.
    fn check_matching(&self, kind: StrategyKind) -> Result<()> {
        match kind {
            StrategyKind::Fuzzy => {
                let threshold = self.matching.fuzzy_threshold;
                if !(0.0..=1.0).contains(&threshold) {
                    return Err(HyrankError::misconfigured(
                        kind,
                        format!("fuzzy_threshold {} is outside [0, 1]", threshold),
                    ));
                }
            }
            StrategyKind::Semantic => {
                let max = self.matching.max_semantic_distance;
                if !(max > 0.0 && max <= 2.0) {
                    return Err(HyrankError::misconfigured(
                        kind,
                        format!("max_semantic_distance {} is outside (0, 2]", max),
                    ));
                }
            }
            StrategyKind::Keyword => {}
        }
        Ok(())
    }

    // Record operations

    /// Insert a record. Records are deduplicated by content hash; inserting
    /// a duplicate returns the id of the existing record.
    pub async fn insert_record(&self, record: Record) -> Result<Ulid> {
        let metadata = serde_json::to_string(&record.metadata)?;

        self.run(move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| HyrankError::database(e.to_string()))?;

            if let Some(hash) = record.content_hash {
                let existing: Option<String> = tx
                    .query_row(
                        "SELECT id FROM records WHERE content_hash = ?1",
                        params![hash.as_slice()],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(|e| HyrankError::database(e.to_string()))?;

                if let Some(id) = existing {
                    debug!("Record with identical content already stored: {}", id);
                    return parse_ulid(&id);
                }
            }

            tx.execute(
                r#"
                INSERT INTO records (id, title, content, metadata, content_hash, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    record.id.to_string(),
                    record.title,
                    record.content,
                    metadata,
                    record.content_hash.map(|h| h.to_vec()),
                    record.created_at as i64,
                ],
            )
            .map_err(|e| HyrankError::database(format!("Failed to insert record: {}", e)))?;

            tx.commit()
                .map_err(|e| HyrankError::database(e.to_string()))?;

            debug!("Inserted record: {}", record.id);
            Ok(record.id)
        })
        .await
    }

    /// Fetch a record by id.
    pub async fn get_record(&self, id: Ulid) -> Result<Option<Record>> {
        self.run(move |conn| {
            let sql = format!("SELECT {} FROM records r WHERE r.id = ?1", RECORD_COLUMNS);
            conn.query_row(&sql, params![id.to_string()], Self::row_to_record)
                .optional()
                .map_err(|e| HyrankError::database(e.to_string()))
        })
        .await
    }

    /// Delete a record and its embedding.
    pub async fn delete_record(&self, id: Ulid) -> Result<()> {
        let vec_enabled = self.vec_enabled;
        self.run(move |conn| {
            if vec_enabled {
                conn.execute(
                    "DELETE FROM vec_records WHERE record_id = ?1",
                    params![id.to_string()],
                )
                .map_err(|e| HyrankError::database(e.to_string()))?;
            }

            // Embedding row is deleted by CASCADE
            let deleted = conn
                .execute("DELETE FROM records WHERE id = ?1", params![id.to_string()])
                .map_err(|e| HyrankError::database(e.to_string()))?;

            if deleted == 0 {
                return Err(HyrankError::RecordNotFound { id: id.to_string() });
            }

            debug!("Deleted record: {}", id);
            Ok(())
        })
        .await
    }

    /// Attach or replace the embedding of a record.
    pub async fn set_embedding(&self, id: Ulid, embedding: &[f32]) -> Result<()> {
        self.check_vector(embedding)?;
        if embedding.iter().any(|x| !x.is_finite()) {
            return Err(HyrankError::invalid_argument(
                "embedding contains non-finite values",
            ));
        }

        let bytes = vec_to_bytes(embedding);
        let vec_enabled = self.vec_enabled;

        self.run(move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| HyrankError::database(e.to_string()))?;

            let exists: bool = tx
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM records WHERE id = ?1)",
                    params![id.to_string()],
                    |row| row.get(0),
                )
                .map_err(|e| HyrankError::database(e.to_string()))?;

            if !exists {
                return Err(HyrankError::RecordNotFound { id: id.to_string() });
            }

            tx.execute(
                "INSERT OR REPLACE INTO embeddings (record_id, embedding) VALUES (?1, ?2)",
                params![id.to_string(), bytes],
            )
            .map_err(|e| HyrankError::database(format!("Failed to insert embedding: {}", e)))?;

            if vec_enabled {
                // vec0 has no upsert
                tx.execute(
                    "DELETE FROM vec_records WHERE record_id = ?1",
                    params![id.to_string()],
                )
                .map_err(|e| HyrankError::database(e.to_string()))?;
                tx.execute(
                    "INSERT INTO vec_records (record_id, embedding) VALUES (?1, ?2)",
                    params![id.to_string(), bytes],
                )
                .map_err(|e| HyrankError::database(format!("Failed to index embedding: {}", e)))?;
            }

            tx.commit()
                .map_err(|e| HyrankError::database(e.to_string()))?;

            debug!("Stored embedding for record: {}", id);
            Ok(())
        })
        .await
    }

    /// Store statistics.
    pub async fn stats(&self) -> Result<Stats> {
        let dimension = self.dimension;
        let vec_enabled = self.vec_enabled;

        self.run(move |conn| {
            let records: u64 = conn
                .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))
                .map_err(|e| HyrankError::database(e.to_string()))?;

            let embeddings: u64 = conn
                .query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))
                .map_err(|e| HyrankError::database(e.to_string()))?;

            // Get page count and page size to estimate storage
            let page_count: u64 = conn
                .query_row("PRAGMA page_count", [], |row| row.get(0))
                .unwrap_or(0);
            let page_size: u64 = conn
                .query_row("PRAGMA page_size", [], |row| row.get(0))
                .unwrap_or(4096);

            Ok(Stats {
                records,
                embeddings,
                dimension,
                vector_index: vec_enabled,
                storage_bytes: page_count * page_size,
            })
        })
        .await
    }

    /// Run a search statement whose rows are record columns followed by a
    /// score column.
    async fn query_hits<P>(&self, sql: String, params: P) -> Result<Vec<Hit>>
    where
        P: rusqlite::Params + Send + 'static,
    {
        self.run(move |conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| HyrankError::database(e.to_string()))?;

            let rows = stmt
                .query_map(params, |row| {
                    let record = Self::row_to_record(row)?;
                    let score: f64 = row.get(6)?;
                    Ok(Hit::new(record.id, score as f32).with_payload(record.payload()))
                })
                .map_err(|e| HyrankError::database(e.to_string()))?;

            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| HyrankError::database(e.to_string()))
        })
        .await
    }
}

#[async_trait]
impl CandidateSource for SqliteStore {
    async fn keyword_match(&self, text: &str, limit: u32) -> Result<Vec<Hit>> {
        let Some(fts_query) = Self::fts5_query(text) else {
            return Ok(Vec::new());
        };

        // bm25() is negative with lower = better; flip it so higher is better.
        let sql = format!(
            r#"
            SELECT {}, -bm25(records_fts) AS score
            FROM records_fts
            JOIN records r ON r.rowid = records_fts.rowid
            WHERE records_fts MATCH ?1
            ORDER BY score DESC, r.id
            LIMIT ?2
            "#,
            RECORD_COLUMNS
        );

        let hits = self.query_hits(sql, (fts_query, limit)).await?;
        debug!("Keyword match returned {} hits", hits.len());
        Ok(hits)
    }

    async fn fuzzy_match(&self, text: &str, limit: u32) -> Result<Vec<Hit>> {
        self.check_matching(StrategyKind::Fuzzy)?;

        let sql = format!(
            r#"
            SELECT {}, m.similarity
            FROM (
                SELECT id, trigram_similarity(?1, title) AS similarity FROM records
            ) m
            JOIN records r ON r.id = m.id
            WHERE m.similarity >= ?2
            ORDER BY m.similarity DESC, r.id
            LIMIT ?3
            "#,
            RECORD_COLUMNS
        );

        let threshold = self.matching.fuzzy_threshold as f64;
        let hits = self
            .query_hits(sql, (text.to_string(), threshold, limit))
            .await?;
        debug!("Fuzzy match returned {} hits", hits.len());
        Ok(hits)
    }

    async fn semantic_match(&self, vector: &[f32], limit: u32) -> Result<Vec<Hit>> {
        self.check_vector(vector)?;
        self.check_matching(StrategyKind::Semantic)?;

        let bytes = vec_to_bytes(vector);
        let max_distance = self.matching.max_semantic_distance as f64;

        let sql = if self.vec_enabled {
            format!(
                r#"
                SELECT {}, v.distance
                FROM (
                    SELECT record_id, distance FROM vec_records
                    WHERE embedding MATCH ?1 AND k = ?3
                ) v
                JOIN records r ON r.id = v.record_id
                WHERE v.distance < ?2
                ORDER BY v.distance, r.id
                "#,
                RECORD_COLUMNS
            )
        } else {
            format!(
                r#"
                SELECT {}, v.distance
                FROM (
                    SELECT record_id, cosine_distance(embedding, ?1) AS distance FROM embeddings
                ) v
                JOIN records r ON r.id = v.record_id
                WHERE v.distance < ?2
                ORDER BY v.distance, r.id
                LIMIT ?3
                "#,
                RECORD_COLUMNS
            )
        };

        let hits = self.query_hits(sql, (bytes, max_distance, limit)).await?;
        debug!("Semantic match returned {} hits", hits.len());
        Ok(hits)
    }
}

// Helper methods
impl SqliteStore {
    /// Convert a row to a Record.
    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
        let id_str: String = row.get(0)?;
        let metadata_str: Option<String> = row.get(3)?;
        let content_hash: Option<Vec<u8>> = row.get(4)?;

        let metadata: HashMap<String, serde_json::Value> = metadata_str
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();

        let id = Ulid::from_string(&id_str)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;

        Ok(Record {
            id,
            title: row.get(1)?,
            content: row.get(2)?,
            metadata,
            content_hash: content_hash.and_then(|v| v.try_into().ok()),
            created_at: row.get::<_, i64>(5)? as u64,
        })
    }

    /// Build an FTS5 query requiring every term of the input.
    ///
    /// Each term is quoted so FTS5 operators in user text are taken
    /// literally. Returns `None` when the text has no matchable term.
    fn fts5_query(text: &str) -> Option<String> {
        let terms: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| format!("\"{}\"", t))
            .collect();

        if terms.is_empty() {
            None
        } else {
            Some(terms.join(" "))
        }
    }
}

fn parse_ulid(s: &str) -> Result<Ulid> {
    Ulid::from_string(s)
        .map_err(|e| HyrankError::database(format!("Invalid stored id {}: {}", s, e)))
}
