//! Pure text functions: chunking, anchors, similarity, hint parsing
//!
//! Everything here is deterministic and free of I/O, in the same spirit as
//! the engine's pure state machine. The engine composes these; nothing else
//! needs to know how anchors or repetition scores are derived.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Explicit in-body end marker that terminates a run
pub const END_MARKER: &str = "[[END]]";

/// How far back (bytes) `byte_chunk` searches for a newline/space boundary
const BOUNDARY_LOOKBACK: usize = 256;

/// How close (bytes) to the tail end a sentence terminator must be for
/// `anchor_from_text` to snap to it
const SENTENCE_LOOKBACK: usize = 120;

/// One byte-bounded slice of a larger text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// 0-based position in the sequence
    pub index: usize,
    /// Byte offset of the first byte in the original text
    pub start: usize,
    /// Byte offset one past the last byte in the original text
    pub end: usize,
    pub text: String,
}

/// Split `text` into chunks of at most `max_bytes` bytes on safe boundaries.
///
/// Boundary preference within a small look-back window: the nearest prior
/// newline, else the nearest prior space, else a hard cut. Cuts never land
/// inside a multi-byte sequence, and the chunks concatenate back to the
/// exact input. A chunk may exceed `max_bytes` only in the degenerate case
/// where `max_bytes` is smaller than a single character.
pub fn byte_chunk(text: &str, max_bytes: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    if text.is_empty() || max_bytes == 0 {
        return chunks;
    }

    let bytes = text.as_bytes();
    let mut start = 0;
    let mut index = 0;

    while start < text.len() {
        let mut end = (start + max_bytes).min(text.len());

        if end < text.len() {
            // Align the hard cut backward onto a character boundary first.
            while end > start && !text.is_char_boundary(end) {
                end -= 1;
            }

            let window_start = end.saturating_sub(BOUNDARY_LOOKBACK).max(start);
            let window = &bytes[window_start..end];

            // Prefer a newline, then a space; the boundary byte stays with
            // the earlier chunk so concatenation is exact.
            let boundary = window
                .iter()
                .rposition(|&b| b == b'\n')
                .or_else(|| window.iter().rposition(|&b| b == b' '));
            if let Some(pos) = boundary {
                let candidate = window_start + pos + 1;
                if candidate > start {
                    end = candidate;
                }
            }

            if end <= start {
                // max_bytes smaller than the next character; take it whole.
                let ch = text[start..].chars().next().expect("non-empty remainder");
                end = start + ch.len_utf8();
            }
        }

        chunks.push(Chunk {
            index,
            start,
            end,
            text: text[start..end].to_string(),
        });
        start = end;
        index += 1;
    }

    chunks
}

/// Take the last `tail_chars` characters of `text`, snapped back to the
/// nearest sentence terminator (`.` `!` `?`) when one falls within the final
/// 120 bytes of the tail. Empty input yields an empty anchor.
pub fn anchor_from_text(text: &str, tail_chars: usize) -> String {
    if text.is_empty() || tail_chars == 0 {
        return String::new();
    }

    let start = text
        .char_indices()
        .rev()
        .nth(tail_chars - 1)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let mut tail = &text[start..];

    let terminator = ['.', '!', '?']
        .iter()
        .filter_map(|&p| tail.rfind(p))
        .max();
    if let Some(pos) = terminator {
        if pos + 1 >= tail.len().saturating_sub(SENTENCE_LOOKBACK) {
            tail = &tail[..=pos];
        }
    }

    tail.trim().to_string()
}

/// Character n-gram Jaccard similarity over whitespace-normalized text.
///
/// Either side empty yields 0.0; identical non-empty inputs yield 1.0; the
/// result is always within [0, 1]. Inputs shorter than `n` are compared as
/// single grams.
pub fn similarity(a: &str, b: &str, n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let grams_a = char_ngrams(a, n);
    let grams_b = char_ngrams(b, n);
    if grams_a.is_empty() || grams_b.is_empty() {
        return 0.0;
    }
    let intersection = grams_a.intersection(&grams_b).count();
    let union = grams_a.union(&grams_b).count();
    intersection as f64 / union as f64
}

fn char_ngrams(text: &str, n: usize) -> HashSet<String> {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let chars: Vec<char> = normalized.chars().collect();
    if chars.is_empty() {
        return HashSet::new();
    }
    if chars.len() < n {
        let mut set = HashSet::new();
        set.insert(normalized);
        return set;
    }
    chars.windows(n).map(|w| w.iter().collect()).collect()
}

/// Render the fixed continuation instruction embedding the anchor verbatim
pub fn build_continuation_prompt(anchor: &str) -> String {
    if anchor.is_empty() {
        return "Continue from where you left off.".to_string();
    }
    format!(
        "Continue exactly from after the anchor; do not repeat or reintroduce; no summary.\n\
         ANCHOR:\n<<<ANCHOR\n{}\nANCHOR>>>\nContinue.",
        anchor
    )
}

/// Strip `NEXT: [hint]` directive lines from a response body.
///
/// The last directive wins as the hint; every directive line is removed from
/// the body, including premature mid-body ones.
pub fn strip_continuation_hint(text: &str) -> (String, Option<String>) {
    let mut hint = None;
    let mut body_lines = Vec::new();

    for line in text.lines() {
        match parse_hint_line(line) {
            Some(h) => hint = Some(h),
            None => body_lines.push(line),
        }
    }

    (body_lines.join("\n").trim_end().to_string(), hint)
}

fn parse_hint_line(line: &str) -> Option<String> {
    let trimmed = line.trim();
    let rest = trimmed
        .strip_prefix("NEXT")
        .or_else(|| trimmed.strip_prefix("Next"))
        .or_else(|| trimmed.strip_prefix("next"))?;
    let rest = rest.trim_start().strip_prefix(':')?.trim();
    let hint = rest
        .strip_prefix('[')
        .and_then(|r| r.strip_suffix(']'))
        .unwrap_or(rest)
        .trim();
    if hint.is_empty() {
        None
    } else {
        Some(hint.to_string())
    }
}

/// Whether a continuation hint signals the end of the run
pub fn hint_is_terminal(hint: &str) -> bool {
    matches!(
        hint.trim().to_uppercase().as_str(),
        "END" | "DONE" | "STOP" | "FINISHED"
    )
}

/// Whether the body carries the explicit end marker
pub fn find_end_marker(text: &str) -> bool {
    text.contains(END_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_chunk_round_trip_ascii() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(50);
        for max in [1, 7, 64, 500, 10_000] {
            let chunks = byte_chunk(&text, max);
            let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
            assert_eq!(rebuilt, text, "round trip failed for max_bytes={}", max);
        }
    }

    #[test]
    fn test_byte_chunk_round_trip_multibyte() {
        let text = "Grüße aus Zürich — 深海生物学 🦑 continues.\n".repeat(30);
        for max in [1, 2, 3, 5, 17, 100] {
            let chunks = byte_chunk(&text, max);
            let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
            assert_eq!(rebuilt, text, "round trip failed for max_bytes={}", max);
            for chunk in &chunks {
                // Spans must agree with the carried text.
                assert_eq!(&text[chunk.start..chunk.end], chunk.text);
            }
        }
    }

    #[test]
    fn test_byte_chunk_prefers_newline_boundary() {
        let text = "first line\nsecond line that keeps going for a while";
        let chunks = byte_chunk(text, 20);
        assert!(chunks[0].text.ends_with('\n'));
    }

    #[test]
    fn test_byte_chunk_falls_back_to_space() {
        let text = "alpha beta gamma delta epsilon zeta";
        let chunks = byte_chunk(text, 13);
        assert!(chunks[0].text.ends_with(' '));
    }

    #[test]
    fn test_byte_chunk_empty() {
        assert!(byte_chunk("", 100).is_empty());
        assert!(byte_chunk("text", 0).is_empty());
    }

    #[test]
    fn test_byte_chunk_indices_sequential() {
        let chunks = byte_chunk(&"word ".repeat(100), 32);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
        }
    }

    #[test]
    fn test_anchor_empty_input() {
        assert_eq!(anchor_from_text("", 300), "");
        assert_eq!(anchor_from_text("anything", 0), "");
    }

    #[test]
    fn test_anchor_bounded_by_tail_chars() {
        let text = "s ".repeat(500);
        for tail in [1, 10, 300, 5000] {
            let anchor = anchor_from_text(&text, tail);
            assert!(anchor.chars().count() <= tail);
        }
    }

    #[test]
    fn test_anchor_snaps_to_sentence_end() {
        let text = "A full sentence ends here. And then a trailing fragment";
        let anchor = anchor_from_text(text, 60);
        assert!(anchor.ends_with('.'), "anchor was {:?}", anchor);
        assert!(!anchor.contains("fragment"));
    }

    #[test]
    fn test_anchor_keeps_tail_without_nearby_terminator() {
        let text = "no punctuation anywhere in this trailing text at all";
        let anchor = anchor_from_text(text, 30);
        assert!(text.ends_with(&anchor));
    }

    #[test]
    fn test_anchor_multibyte_tail() {
        let text = "前文。最後の文はここで終わる";
        let anchor = anchor_from_text(text, 5);
        assert!(anchor.chars().count() <= 5);
    }

    #[test]
    fn test_similarity_identity_and_empty() {
        assert_eq!(similarity("", "", 4), 0.0);
        assert_eq!(similarity("some text", "", 4), 0.0);
        assert_eq!(similarity("some repeated text here", "some repeated text here", 4), 1.0);
        // Shorter than n still satisfies the identity property.
        assert_eq!(similarity("ab", "ab", 4), 1.0);
    }

    #[test]
    fn test_similarity_bounded() {
        let a = "the tide pools hold an entire ecosystem in miniature";
        let b = "an entirely different sentence about glaciers and ice";
        let score = similarity(a, b, 4);
        assert!((0.0..=1.0).contains(&score));
        assert!(score < 1.0);
    }

    #[test]
    fn test_similarity_ignores_whitespace_runs() {
        assert_eq!(similarity("a  b   c", "a b c", 3), 1.0);
    }

    #[test]
    fn test_continuation_prompt_embeds_anchor() {
        let prompt = build_continuation_prompt("the story so far.");
        assert!(prompt.contains("<<<ANCHOR\nthe story so far.\nANCHOR>>>"));
        assert!(prompt.contains("do not repeat"));
        assert_eq!(
            build_continuation_prompt(""),
            "Continue from where you left off."
        );
    }

    #[test]
    fn test_strip_hint_trailing() {
        let (body, hint) = strip_continuation_hint("Some prose.\nNEXT: [Chapter 2]");
        assert_eq!(body, "Some prose.");
        assert_eq!(hint.as_deref(), Some("Chapter 2"));
    }

    #[test]
    fn test_strip_hint_last_wins_and_midbody_purged() {
        let text = "Intro.\nnext: [early]\nMore prose.\nNEXT: [END]";
        let (body, hint) = strip_continuation_hint(text);
        assert_eq!(body, "Intro.\nMore prose.");
        assert_eq!(hint.as_deref(), Some("END"));
    }

    #[test]
    fn test_strip_hint_unbracketed() {
        let (body, hint) = strip_continuation_hint("Prose.\nNEXT: keep going");
        assert_eq!(body, "Prose.");
        assert_eq!(hint.as_deref(), Some("keep going"));
    }

    #[test]
    fn test_strip_hint_absent() {
        let (body, hint) = strip_continuation_hint("Just prose, nothing else.");
        assert_eq!(body, "Just prose, nothing else.");
        assert!(hint.is_none());
    }

    #[test]
    fn test_terminal_hints() {
        for h in ["END", "end", " Done ", "STOP", "finished"] {
            assert!(hint_is_terminal(h), "{} should be terminal", h);
        }
        assert!(!hint_is_terminal("Chapter 7"));
    }

    #[test]
    fn test_end_marker() {
        assert!(find_end_marker("closing words. [[END]]"));
        assert!(!find_end_marker("no marker here"));
    }
}
