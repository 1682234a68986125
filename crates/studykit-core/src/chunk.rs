//! Overlapping sliding-window text chunker.
//!
//! Splits extracted document text into bounded spans that overlap by a
//! fixed number of characters, so that retrieval context never loses the
//! sentence that straddles a chunk boundary.
//!
//! # Guarantees
//!
//! - Spans are at most `max_chunk_chars` characters long.
//! - Consecutive spans share exactly `overlap_chars` characters, clipped
//!   at the end of the document.
//! - Concatenating the spans with each successor's leading overlap
//!   removed reconstructs the input exactly.
//! - Empty input yields an empty sequence, not an error.
//! - Chunk indices are contiguous: `0, 1, 2, …, N-1`.
//!
//! Span boundaries prefer to land just after whitespace when a space is
//! available within `overlap_chars` of the hard cut, so words are split
//! mid-character only as a last resort. This is best-effort; the overlap
//! and reconstruction guarantees always hold. All offsets are computed in
//! characters and mapped back to byte positions, so multi-byte UTF-8 is
//! never split.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Chunker configuration. `overlap_chars` must be less than
/// `max_chunk_chars`; [`crate::chunk::split_spans`] clamps it defensively
/// but the application config validates this up front.
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    pub max_chunk_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: 1000,
            overlap_chars: 200,
        }
    }
}

/// Split `text` into overlapping spans per the module contract.
pub fn split_spans<'a>(text: &'a str, config: &ChunkerConfig) -> Vec<&'a str> {
    if text.is_empty() || config.max_chunk_chars == 0 {
        return Vec::new();
    }

    let max = config.max_chunk_chars;
    let overlap = config.overlap_chars.min(max.saturating_sub(1));

    // Byte offset of every char position, plus a sentinel for the end.
    let mut offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    offsets.push(text.len());
    let total_chars = offsets.len() - 1;

    let mut spans = Vec::new();
    let mut start = 0usize;

    loop {
        let hard_end = (start + max).min(total_chars);
        let mut end = hard_end;

        if hard_end < total_chars {
            // Prefer ending right after a whitespace char, scanning back
            // at most `overlap` chars. The candidate must leave the span
            // longer than the overlap, or the next start would not advance.
            for candidate in (start + overlap + 2..=hard_end).rev() {
                let prev = text[offsets[candidate - 1]..offsets[candidate]]
                    .chars()
                    .next();
                if hard_end - candidate > overlap {
                    break;
                }
                if prev.is_some_and(char::is_whitespace) {
                    end = candidate;
                    break;
                }
            }
        }

        spans.push(&text[offsets[start]..offsets[end]]);

        if end >= total_chars {
            break;
        }
        start = end - overlap;
    }

    spans
}

/// Inverse of [`split_spans`] for a known overlap: concatenates spans,
/// dropping each successor's leading `overlap_chars` characters.
pub fn rejoin_spans(spans: &[&str], overlap_chars: usize) -> String {
    let mut out = String::new();
    for (i, span) in spans.iter().enumerate() {
        if i == 0 {
            out.push_str(span);
        } else {
            let skip = span
                .char_indices()
                .nth(overlap_chars)
                .map(|(b, _)| b)
                .unwrap_or(span.len());
            out.push_str(&span[skip..]);
        }
    }
    out
}

/// Chunk a document's extracted text into persisted [`Chunk`] records
/// with contiguous indices and SHA-256 content hashes.
pub fn chunk_document(
    document_id: &str,
    topic_id: &str,
    text: &str,
    config: &ChunkerConfig,
) -> Vec<Chunk> {
    split_spans(text, config)
        .into_iter()
        .enumerate()
        .map(|(i, span)| make_chunk(document_id, topic_id, i as i64, span))
        .collect()
}

fn make_chunk(document_id: &str, topic_id: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        topic_id: topic_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(max: usize, overlap: usize) -> ChunkerConfig {
        ChunkerConfig {
            max_chunk_chars: max,
            overlap_chars: overlap,
        }
    }

    #[test]
    fn empty_input_yields_no_spans() {
        assert!(split_spans("", &cfg(100, 10)).is_empty());
    }

    #[test]
    fn short_input_is_a_single_span() {
        let spans = split_spans("hello world", &cfg(100, 10));
        assert_eq!(spans, vec!["hello world"]);
    }

    #[test]
    fn spans_respect_max_length() {
        let text = "abcdefghij".repeat(20);
        let spans = split_spans(&text, &cfg(30, 5));
        for span in &spans {
            assert!(span.chars().count() <= 30);
        }
        assert!(spans.len() > 1);
    }

    #[test]
    fn consecutive_spans_share_exact_overlap() {
        let text = "abcdefghij".repeat(20);
        let overlap = 7;
        let spans = split_spans(&text, &cfg(40, overlap));
        for pair in spans.windows(2) {
            let tail: String = pair[0]
                .chars()
                .rev()
                .take(overlap)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            let head: String = pair[1].chars().take(overlap).collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn rejoin_reconstructs_input_exactly() {
        let text = "The mitochondria is the powerhouse of the cell. \
                    Ribosomes synthesize proteins from amino acids. \
                    The nucleus stores genetic material as chromatin.";
        for (max, overlap) in [(30, 5), (50, 10), (25, 24), (400, 0)] {
            let spans = split_spans(text, &cfg(max, overlap));
            assert_eq!(rejoin_spans(&spans, overlap), text, "max={max} overlap={overlap}");
        }
    }

    #[test]
    fn heart_scenario_produces_multiple_reconstructable_chunks() {
        let text = "Heart has four chambers. Blood flows through valves.";
        let spans = split_spans(text, &cfg(30, 5));
        assert!(spans.len() >= 2);
        assert_eq!(rejoin_spans(&spans, 5), text);
    }

    #[test]
    fn boundaries_prefer_whitespace() {
        let text = "Heart has four chambers. Blood flows through valves.";
        let spans = split_spans(text, &cfg(30, 5));
        // The first cut falls inside "Blood"; with a space 5 chars back the
        // span should end just after "chambers. " instead.
        assert!(spans[0].ends_with(' '), "span ended mid-word: {:?}", spans[0]);
    }

    #[test]
    fn multibyte_text_never_splits_a_char() {
        let text = "héllo wörld ünïcode ".repeat(10);
        let spans = split_spans(&text, &cfg(12, 3));
        assert_eq!(rejoin_spans(&spans, 3), text);
    }

    #[test]
    fn chunk_indices_are_contiguous_and_hashed() {
        let text = "one two three four five six seven eight nine ten".repeat(5);
        let chunks = chunk_document("doc1", "topic1", &text, &cfg(40, 8));
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert_eq!(c.document_id, "doc1");
            assert_eq!(c.topic_id, "topic1");
            assert_eq!(c.hash.len(), 64);
        }
    }

    #[test]
    fn chunking_is_deterministic_modulo_ids() {
        let text = "alpha beta gamma delta epsilon zeta eta theta".repeat(3);
        let a = chunk_document("d", "t", &text, &cfg(35, 6));
        let b = chunk_document("d", "t", &text, &cfg(35, 6));
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.text, y.text);
            assert_eq!(x.hash, y.hash);
        }
    }
}
