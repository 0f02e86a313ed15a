//! Scalar functions registered on every connection.
//!
//! `trigram_similarity(a, b)` follows the pg_trgm model: text is lowercased,
//! split into alphanumeric words, each word is padded with two leading
//! spaces and one trailing space, and the similarity is the Jaccard index of
//! the two trigram sets.
//!
//! `cosine_distance(a, b)` compares two little-endian f32 blobs and is the
//! brute-force path used when sqlite-vec is not available.

use std::collections::HashSet;

use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;

/// Trigram set of a string.
pub fn trigrams(text: &str) -> HashSet<String> {
    let lowered = text.to_lowercase();
    let mut set = HashSet::new();

    for word in lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let padded: Vec<char> = "  ".chars().chain(word.chars()).chain(" ".chars()).collect();
        for window in padded.windows(3) {
            set.insert(window.iter().collect());
        }
    }

    set
}

/// Jaccard similarity of the trigram sets of `a` and `b`, in [0, 1].
pub fn trigram_similarity(a: &str, b: &str) -> f32 {
    let ta = trigrams(a);
    let tb = trigrams(b);

    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }

    let shared = ta.intersection(&tb).count();
    let union = ta.len() + tb.len() - shared;
    shared as f32 / union as f32
}

/// Cosine distance (1 - cosine similarity). `None` if the lengths differ.
///
/// A zero vector is treated as orthogonal to everything.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Some(1.0);
    }

    Some((1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())) as f32)
}

/// Convert f32 vector to bytes (little-endian).
pub fn vec_to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Convert little-endian bytes back to an f32 vector.
pub fn bytes_to_vec(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }

    Some(
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}

/// Register both functions on a connection.
pub fn register(conn: &Connection) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;

    conn.create_scalar_function("trigram_similarity", 2, flags, |ctx| {
        let a: String = ctx.get(0)?;
        let b: String = ctx.get(1)?;
        Ok(trigram_similarity(&a, &b) as f64)
    })?;

    conn.create_scalar_function("cosine_distance", 2, flags, |ctx| {
        let a: Vec<u8> = ctx.get(0)?;
        let b: Vec<u8> = ctx.get(1)?;
        let distance = match (bytes_to_vec(&a), bytes_to_vec(&b)) {
            (Some(a), Some(b)) => cosine_distance(&a, &b).map(f64::from),
            _ => None,
        };
        Ok(distance)
    })?;

    Ok(())
}
