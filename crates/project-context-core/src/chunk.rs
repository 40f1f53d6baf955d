//! Sliding-window text chunker.
//!
//! Splits file content into overlapping [`FileChunk`]s of at most
//! `chunk_size` characters. Consecutive windows share `overlap`
//! characters, so a match near a window edge is still retrievable from
//! the neighbouring chunk.
//!
//! # Algorithm
//!
//! 1. Strip control characters other than `\n`, `\r`, and `\t`.
//! 2. Blank content yields no chunks.
//! 3. A window starts at 0 and spans `[start, min(start + chunk_size, len))`.
//! 4. The next window starts at `start + chunk_size - overlap`.
//! 5. Iteration stops once a window reaches the end of the content.
//!
//! Positions are measured in characters, never bytes, so multi-byte
//! UTF-8 text cannot be split inside a code point.
//!
//! # Example
//!
//! ```rust
//! use project_context_core::chunk::chunk_content;
//!
//! let text = "x".repeat(120);
//! let chunks = chunk_content("p1", "src/lib.rs", &text, 50, 10).unwrap();
//! let spans: Vec<_> = chunks.iter().map(|c| (c.start_offset, c.end_offset)).collect();
//! assert_eq!(spans, vec![(0, 50), (40, 90), (80, 120)]);
//! ```

use crate::error::ChunkError;
use crate::models::FileChunk;

/// Split `content` into overlapping chunks.
///
/// # Guarantees
///
/// - Chunk indices are contiguous: `0, 1, 2, …, N-1`.
/// - `start_line <= end_line`, and `start_line` never decreases.
/// - The last chunk ends at the content length.
/// - Same input always yields the same chunk sequence.
///
/// # Errors
///
/// [`ChunkError::InvalidWindow`] unless `0 <= overlap < chunk_size`.
pub fn chunk_content(
    project_id: &str,
    file_path: &str,
    content: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<FileChunk>, ChunkError> {
    if chunk_size == 0 || overlap >= chunk_size {
        return Err(ChunkError::InvalidWindow {
            chunk_size,
            overlap,
        });
    }

    let cleaned = strip_control_chars(content);
    if cleaned.trim().is_empty() {
        return Ok(Vec::new());
    }

    // Byte offset of every char, plus the total length as a sentinel.
    let mut byte_at: Vec<usize> = cleaned.char_indices().map(|(i, _)| i).collect();
    let len = byte_at.len();
    byte_at.push(cleaned.len());

    // newlines_before[i] = number of '\n' among the first i chars.
    let mut newlines_before = Vec::with_capacity(len + 1);
    let mut count = 0usize;
    newlines_before.push(0);
    for ch in cleaned.chars() {
        if ch == '\n' {
            count += 1;
        }
        newlines_before.push(count);
    }

    let step = chunk_size - overlap;
    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let end = (start + chunk_size).min(len);
        chunks.push(FileChunk {
            project_id: project_id.to_string(),
            file_path: file_path.to_string(),
            content: cleaned[byte_at[start]..byte_at[end]].to_string(),
            start_line: newlines_before[start] + 1,
            end_line: newlines_before[end - 1] + 1,
            chunk_index: chunks.len(),
            start_offset: start,
            end_offset: end,
        });

        if end == len {
            break;
        }
        start += step;
    }

    Ok(chunks)
}

/// Remove control characters that would corrupt text storage (NUL etc.).
///
/// Line breaks and tabs are kept.
pub fn strip_control_chars(content: &str) -> String {
    content
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect()
}
