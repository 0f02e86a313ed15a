//! Database schema definitions.

/// Main schema SQL for initializing the database.
pub const SCHEMA: &str = r#"
-- Records table
CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    metadata TEXT DEFAULT '{}',
    content_hash BLOB,
    created_at INTEGER NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_records_content_hash ON records(content_hash);
CREATE INDEX IF NOT EXISTS idx_records_created_at ON records(created_at);

-- FTS5 virtual table for stemmed keyword search
CREATE VIRTUAL TABLE IF NOT EXISTS records_fts USING fts5(
    title,
    content,
    content=records,
    content_rowid=rowid,
    tokenize='porter unicode61'
);

-- Triggers to keep FTS5 in sync with records table
CREATE TRIGGER IF NOT EXISTS records_ai AFTER INSERT ON records BEGIN
    INSERT INTO records_fts(rowid, title, content) VALUES (NEW.rowid, NEW.title, NEW.content);
END;

CREATE TRIGGER IF NOT EXISTS records_ad AFTER DELETE ON records BEGIN
    INSERT INTO records_fts(records_fts, rowid, title, content)
    VALUES ('delete', OLD.rowid, OLD.title, OLD.content);
END;

CREATE TRIGGER IF NOT EXISTS records_au AFTER UPDATE ON records BEGIN
    INSERT INTO records_fts(records_fts, rowid, title, content)
    VALUES ('delete', OLD.rowid, OLD.title, OLD.content);
    INSERT INTO records_fts(rowid, title, content) VALUES (NEW.rowid, NEW.title, NEW.content);
END;

-- Embeddings as little-endian f32 blobs; source of truth for the vector index
CREATE TABLE IF NOT EXISTS embeddings (
    record_id TEXT PRIMARY KEY REFERENCES records(id) ON DELETE CASCADE,
    embedding BLOB NOT NULL
);

-- Store-level settings fixed at creation time
CREATE TABLE IF NOT EXISTS store_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Schema for the sqlite-vec virtual table.
/// This must be created separately after loading the extension.
pub fn vec_schema(dimension: usize) -> String {
    format!(
        r#"
CREATE VIRTUAL TABLE IF NOT EXISTS vec_records USING vec0(
    record_id TEXT PRIMARY KEY,
    embedding float[{}] distance_metric=cosine
);
"#,
        dimension
    )
}

/// Key under which the embedding dimension is recorded.
pub const DIMENSION_KEY: &str = "embedding_dimension";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_schema_dimension() {
        let sql = vec_schema(384);
        assert!(sql.contains("float[384]"));
        assert!(sql.contains("distance_metric=cosine"));
    }
}
