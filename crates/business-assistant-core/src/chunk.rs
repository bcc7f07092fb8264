//! Paragraph-boundary text chunker with overlap.
//!
//! Splits document text into [`DocumentChunk`]s of at most roughly
//! `max_chars` characters. Splitting happens on paragraph boundaries
//! (`\n\n`) to keep related sentences together, and each chunk after the
//! first is seeded with a short tail of its predecessor so that a fact
//! spanning a boundary is still retrievable from either side.
//!
//! # Algorithm
//!
//! 1. Split text on `\n\n`, remembering each paragraph's byte offset.
//! 2. Hard-split any paragraph longer than `max_chars` at the nearest
//!    newline or space boundary.
//! 3. Accumulate pieces into a buffer until the next one would overflow.
//! 4. Flush the buffer as a chunk and start the next buffer with up to
//!    `overlap_chars` of trailing context, snapped to a word boundary.
//!
//! # Example
//!
//! ```rust
//! use business_assistant_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("policy.txt", "Refunds within 30 days.\n\nKeep receipts.", 1000, 200);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].id, "policy.txt#0");
//! ```

use sha2::{Digest, Sha256};

use crate::models::DocumentChunk;

/// Split `text` into overlapping chunks.
///
/// # Guarantees
///
/// - Empty or whitespace-only text yields no chunks.
/// - Chunk indices are contiguous: `0, 1, 2, …, N-1`.
/// - `offset` is the byte offset of the chunk's first new (non-overlap)
///   content in `text`.
/// - All splits land on UTF-8 character boundaries.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    max_chars: usize,
    overlap_chars: usize,
) -> Vec<DocumentChunk> {
    let max_chars = max_chars.max(1);
    let pieces = split_pieces(text, max_chars);

    let mut chunks = Vec::new();
    let mut buf = String::new();
    let mut buf_offset: Option<usize> = None;

    for (offset, piece) in pieces {
        let would_be = if buf.is_empty() {
            piece.len()
        } else {
            buf.len() + 2 + piece.len()
        };

        if would_be > max_chars && buf_offset.is_some() {
            let index = chunks.len() as i64;
            chunks.push(make_chunk(document_id, index, buf_offset.unwrap_or(0), &buf));

            let room = max_chars.saturating_sub(piece.len() + 2);
            let tail = overlap_tail(&buf, overlap_chars.min(room)).to_string();
            buf.clear();
            buf.push_str(&tail);
            buf_offset = None;
        }

        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(piece);
        if buf_offset.is_none() {
            buf_offset = Some(offset);
        }
    }

    if let Some(offset) = buf_offset {
        let index = chunks.len() as i64;
        chunks.push(make_chunk(document_id, index, offset, &buf));
    }

    chunks
}

/// Paragraphs (trimmed) with their byte offsets, oversized ones hard-split.
fn split_pieces(text: &str, max_chars: usize) -> Vec<(usize, &str)> {
    let mut pieces = Vec::new();
    let mut pos = 0;

    for para in text.split("\n\n") {
        let start = pos;
        pos += para.len() + 2;

        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }
        let lead = para.len() - para.trim_start().len();
        let para_offset = start + lead;

        if trimmed.len() <= max_chars {
            pieces.push((para_offset, trimmed));
            continue;
        }

        let mut consumed = 0;
        let mut remaining = trimmed;
        while !remaining.is_empty() {
            let split_at = hard_split_point(remaining, max_chars);
            let piece = &remaining[..split_at];
            let lead = piece.len() - piece.trim_start().len();
            if !piece.trim().is_empty() {
                pieces.push((para_offset + consumed + lead, piece.trim()));
            }
            consumed += split_at;
            remaining = &remaining[split_at..];
        }
    }

    pieces
}

/// Byte index at which to cut `s` so the head is at most `max_chars` long,
/// preferring the last newline or space. Always makes progress.
fn hard_split_point(s: &str, max_chars: usize) -> usize {
    if s.len() <= max_chars {
        return s.len();
    }
    let limit = snap_to_char_boundary(s, max_chars);
    let at = s[..limit]
        .rfind('\n')
        .or_else(|| s[..limit].rfind(' '))
        .map(|pos| pos + 1)
        .unwrap_or(limit);
    if at == 0 {
        s.char_indices().nth(1).map(|(i, _)| i).unwrap_or(s.len())
    } else {
        at
    }
}

/// Up to `n` trailing bytes of `text`, starting at a word boundary.
fn overlap_tail(text: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    if text.len() <= n {
        return text.trim_start();
    }
    let mut start = text.len() - n;
    while start < text.len() && !text.is_char_boundary(start) {
        start += 1;
    }
    let tail = &text[start..];
    match tail.find(char::is_whitespace) {
        Some(ws) => tail[ws..].trim_start(),
        None => tail,
    }
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn make_chunk(document_id: &str, index: i64, offset: usize, text: &str) -> DocumentChunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    DocumentChunk {
        id: format!("{}#{}", document_id, index),
        document_id: document_id.to_string(),
        chunk_index: index,
        offset,
        text: text.to_string(),
        hash,
        embedding: Vec::new(),
    }
}
