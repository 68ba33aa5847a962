//! Transcript chunking shared by the line-oriented adapters (Claude Code,
//! Cursor, Gemini, Windsurf).
//!
//! Splits raw JSONL bytes at line boundaries so each chunk stays at or
//! under a configured maximum size, and reassembles chunks back into the
//! original bytes by concatenation. OpenCode does not use this module — its
//! transcript is a single JSON document with a `messages` array, reassembled
//! structurally instead (see `opencode::reassemble_transcript`).
//!
//! # Chunking laws
//!
//! For JSONL bytes `B` and `max_size >= max line length in B`:
//! - `reassemble(chunk(B, max_size)) == B`
//! - line order is preserved
//! - no chunk exceeds `max_size`, except a single line longer than
//!   `max_size`, which is emitted as its own (oversized) chunk.

/// Split `bytes` into newline-preserved lines, including a trailing line
/// with no terminator if `bytes` doesn't end in `\n`.
fn split_lines_keep_terminator(bytes: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'\n' {
            lines.push(&bytes[start..=i]);
            start = i + 1;
        }
    }
    if start < bytes.len() {
        lines.push(&bytes[start..]);
    }
    lines
}

/// Split JSONL `bytes` into chunks of at most `max_size` bytes each,
/// breaking only at line boundaries.
///
/// Returns an empty vector for empty input. A single line exceeding
/// `max_size` is emitted as its own chunk rather than split mid-line.
#[must_use]
pub fn chunk_jsonl(bytes: &[u8], max_size: usize) -> Vec<Vec<u8>> {
    if bytes.is_empty() {
        return Vec::new();
    }
    let mut chunks = Vec::new();
    let mut current = Vec::new();
    for line in split_lines_keep_terminator(bytes) {
        if !current.is_empty() && current.len() + line.len() > max_size {
            chunks.push(std::mem::take(&mut current));
        }
        current.extend_from_slice(line);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Concatenate chunks produced by [`chunk_jsonl`] back into the original bytes.
#[must_use]
pub fn reassemble_jsonl(chunks: &[Vec<u8>]) -> Vec<u8> {
    chunks.concat()
}
