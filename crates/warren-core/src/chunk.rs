//! Paragraph-boundary text chunker.
//!
//! Content bodies are split into [`Chunk`]s before embedding so that vector
//! search can match the relevant passage of a long compliance rule or
//! product sheet rather than the whole item.
//!
//! # Algorithm
//!
//! 1. Convert `max_tokens` to a character budget ([`CHARS_PER_TOKEN`]).
//! 2. Split on `\n\n` and accumulate paragraphs while they fit.
//! 3. Flush the buffer when the next paragraph would overflow it.
//! 4. Hard-split paragraphs that are larger than the budget on their own,
//!    preferring the last newline or space inside the window.
//! 5. Always return at least one chunk.
//!
//! ```rust
//! use warren_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("item-1", "Rule 206(4)-1.\n\nNo testimonials.", 700);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! ```

use uuid::Uuid;

use crate::models::{content_hash, Chunk};
use crate::tokens::CHARS_PER_TOKEN;

/// Split text into chunks on paragraph boundaries, respecting `max_tokens`.
///
/// Chunk indices are contiguous from 0 and each chunk carries the SHA-256 of
/// its text for embedding staleness detection.
pub fn chunk_text(content_id: &str, text: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = (max_tokens * CHARS_PER_TOKEN).max(1);

    let mut pieces: Vec<String> = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let para_chars = para.chars().count();
        let buf_chars = buf.chars().count();

        if !buf.is_empty() && buf_chars + 2 + para_chars > max_chars {
            pieces.push(std::mem::take(&mut buf));
        }

        if para_chars > max_chars {
            if !buf.is_empty() {
                pieces.push(std::mem::take(&mut buf));
            }
            pieces.extend(hard_split(para, max_chars));
            continue;
        }

        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(para);
    }

    if !buf.is_empty() {
        pieces.push(buf);
    }
    if pieces.is_empty() {
        pieces.push(text.trim().to_string());
    }

    pieces
        .iter()
        .enumerate()
        .map(|(i, piece)| make_chunk(content_id, i as i64, piece))
        .collect()
}

/// Split an oversize paragraph into pieces of at most `max_chars` characters.
fn hard_split(para: &str, max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut remaining = para;

    while !remaining.is_empty() {
        let window_end = remaining
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(remaining.len());

        let split_at = if window_end < remaining.len() {
            remaining[..window_end]
                .rfind(['\n', ' '])
                .filter(|&pos| pos > 0)
                .map(|pos| pos + 1)
                .unwrap_or(window_end)
        } else {
            window_end
        };

        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        remaining = &remaining[split_at..];
    }

    out
}

fn make_chunk(content_id: &str, index: i64, text: &str) -> Chunk {
    Chunk {
        id: Uuid::new_v4().to_string(),
        content_id: content_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash: content_hash(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("c1", "Past performance does not guarantee future results.", 700);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content_id, "c1");
        assert_eq!(
            chunks[0].text,
            "Past performance does not guarantee future results."
        );
    }

    #[test]
    fn test_empty_text_yields_one_chunk() {
        let chunks = chunk_text("c1", "", 700);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn test_paragraphs_split_when_over_budget() {
        let text = "This is paragraph one.\n\nThis is paragraph two.\n\nThis is paragraph three.";
        let chunks = chunk_text("c1", text, 7);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert!(c.text.chars().count() <= 28);
        }
    }

    #[test]
    fn test_oversize_paragraph_hard_split_on_spaces() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let chunks = chunk_text("c1", text, 3);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.chars().count() <= 12, "chunk too long: {:?}", c.text);
            assert!(!c.text.starts_with(' '));
        }
        let rejoined: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(rejoined.join(" "), text);
    }

    #[test]
    fn test_multibyte_hard_split() {
        let text = "┌──────────────────┐│ Hello world      │└──────────────────┘";
        let chunks = chunk_text("c1", text, 2);
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(c.text.chars().count() <= 8);
        }
    }

    #[test]
    fn test_hashes_deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let a = chunk_text("c1", text, 2);
        let b = chunk_text("c1", text, 2);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.hash, y.hash);
            assert_eq!(x.text, y.text);
        }
    }
}
