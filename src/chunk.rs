//! Paragraph-boundary text chunker.
//!
//! Splits document body text into [`Chunk`]s bounded by a configurable
//! character size, with a configurable overlap carried from the end of one
//! chunk into the start of the next. Splitting occurs on paragraph
//! boundaries (`\n\n`) to preserve semantic coherence; paragraphs larger
//! than the limit are hard-split at whitespace.
//!
//! Each chunk receives a UUID plus a SHA-256 hash of its text for
//! staleness detection.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Split text into chunks of at most `chunk_size` characters with
/// `chunk_overlap` characters of carry-over. Returns chunks with contiguous
/// indices starting at 0; every document yields at least one chunk.
pub fn chunk_text(source_path: &str, text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<Chunk> {
    debug_assert!(chunk_overlap < chunk_size.max(1));

    if text.trim().is_empty() {
        return vec![make_chunk(source_path, 0, text.trim())];
    }

    // Units are paragraphs, with oversized paragraphs pre-split so that a
    // unit always fits next to the overlap carry within one chunk.
    let unit_limit = chunk_size.saturating_sub(chunk_overlap + 2).max(1);
    let mut units: Vec<String> = Vec::new();
    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.len() <= unit_limit {
            units.push(trimmed.to_string());
        } else {
            let mut remaining = trimmed;
            while !remaining.is_empty() {
                if remaining.len() <= unit_limit {
                    units.push(remaining.to_string());
                    break;
                }
                let limit = char_floor(remaining, unit_limit);
                let split_at = remaining[..limit]
                    .rfind('\n')
                    .or_else(|| remaining[..limit].rfind(' '))
                    .map(|pos| pos + 1)
                    .unwrap_or(limit);
                units.push(remaining[..split_at].trim_end().to_string());
                remaining = remaining[split_at..].trim_start();
            }
        }
    }

    let mut chunks: Vec<Chunk> = Vec::new();
    let mut current_buf = String::new();
    let mut chunk_index: i64 = 0;

    for unit in &units {
        let would_be = if current_buf.is_empty() {
            unit.len()
        } else {
            current_buf.len() + 2 + unit.len()
        };

        if would_be > chunk_size && !current_buf.is_empty() {
            let carry = tail_chars(&current_buf, chunk_overlap).to_string();
            chunks.push(make_chunk(source_path, chunk_index, &current_buf));
            chunk_index += 1;
            current_buf = carry;
        }

        if !current_buf.is_empty() {
            current_buf.push_str("\n\n");
        }
        current_buf.push_str(unit);
    }

    if !current_buf.is_empty() {
        chunks.push(make_chunk(source_path, chunk_index, &current_buf));
    }

    if chunks.is_empty() {
        chunks.push(make_chunk(source_path, 0, text.trim()));
    }

    chunks
}

/// Last `n` characters of `s`, respecting char boundaries.
fn tail_chars(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    let count = s.chars().count();
    if count <= n {
        return s;
    }
    let skip = count - n;
    let (idx, _) = s.char_indices().nth(skip).unwrap_or((s.len(), ' '));
    &s[idx..]
}

/// Largest char-boundary index not exceeding `idx`.
fn char_floor(s: &str, idx: usize) -> usize {
    let mut i = idx.min(s.len());
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn make_chunk(source_path: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        source_path: source_path.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
