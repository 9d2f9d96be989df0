//! Boundary-aware text chunker.
//!
//! Splits document text into [`Chunk`]s no longer than
//! `max_chunk_chars` bytes. Paragraph boundaries (`\n\n`) are preferred,
//! then sentence boundaries, then a hard cut at the last whitespace (or
//! UTF-8 char boundary) that fits.
//!
//! Each chunk carries the [`Fingerprint`](crate::fingerprint::Fingerprint)
//! of its normalized text, so chunking the same text twice yields the same
//! sequence of fingerprints.
//!
//! # Algorithm
//!
//! 1. Split text on `\n\n`; drop whitespace-only paragraphs.
//! 2. Paragraphs longer than the limit are split into sentences; sentences
//!    still longer than the limit are hard-split.
//! 3. Pieces are packed greedily into a buffer until the next piece would
//!    exceed the limit, then the buffer is flushed as a chunk.
//! 4. With `overlap_chars > 0`, a new buffer starts with the trailing words
//!    of the previous chunk when they fit alongside the next piece.
//!
//! # Example
//!
//! ```rust
//! use chatvat_core::chunk::{chunk_text, ChunkOptions};
//!
//! let chunks = chunk_text("doc", "Hello world.\n\nSecond paragraph.", &ChunkOptions::default());
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].sequence_index, 0);
//! ```

use crate::fingerprint::{fingerprint, NormalizeOptions};
use crate::models::{Chunk, RawDocument};

/// Smallest effective limit; keeps any single UTF-8 char representable.
const MIN_CHUNK_CHARS: usize = 4;

const PARAGRAPH_SEP: &str = "\n\n";
const SENTENCE_SEP: &str = " ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
    /// Maximum chunk length in bytes.
    pub max_chunk_chars: usize,
    /// Trailing bytes of the previous chunk repeated at the start of the next.
    pub overlap_chars: usize,
    pub normalize: NormalizeOptions,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_chunk_chars: 1000,
            overlap_chars: 100,
            normalize: NormalizeOptions::default(),
        }
    }
}

/// Chunk a fetched document.
pub fn chunk(raw: &RawDocument, opts: &ChunkOptions) -> Vec<Chunk> {
    chunk_text(&raw.source_id, &raw.text(), opts)
}

/// Split `text` into chunks with contiguous `sequence_index` values
/// starting at 0. Empty or whitespace-only text yields no chunks.
pub fn chunk_text(source_id: &str, text: &str, opts: &ChunkOptions) -> Vec<Chunk> {
    let max = opts.max_chunk_chars.max(MIN_CHUNK_CHARS);
    let pieces = split_pieces(text, max);

    let mut bodies: Vec<String> = Vec::new();
    let mut buf = String::new();

    for (sep, piece) in pieces {
        let would_be = if buf.is_empty() {
            piece.len()
        } else {
            buf.len() + sep.len() + piece.len()
        };

        if would_be > max && !buf.is_empty() {
            let tail = overlap_tail(&buf, opts.overlap_chars).to_string();
            bodies.push(std::mem::take(&mut buf));
            if !tail.is_empty() && tail.len() + sep.len() + piece.len() <= max {
                buf.push_str(&tail);
            }
        }

        if !buf.is_empty() {
            buf.push_str(sep);
        }
        buf.push_str(piece);
    }

    if !buf.trim().is_empty() {
        bodies.push(buf);
    }

    bodies
        .into_iter()
        .enumerate()
        .map(|(i, body)| Chunk {
            source_id: source_id.to_string(),
            sequence_index: i,
            fingerprint: fingerprint(&body, &opts.normalize),
            text: body,
        })
        .collect()
}

/// Break text into `(separator, piece)` pairs, each piece at most `max`
/// bytes, trimmed and non-empty.
fn split_pieces(text: &str, max: usize) -> Vec<(&'static str, &str)> {
    let mut pieces = Vec::new();

    for para in text.split(PARAGRAPH_SEP) {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }

        if para.len() <= max {
            pieces.push((PARAGRAPH_SEP, para));
            continue;
        }

        let mut sep = PARAGRAPH_SEP;
        for sentence in split_sentences(para) {
            if sentence.len() <= max {
                pieces.push((sep, sentence));
            } else {
                for part in hard_split(sentence, max) {
                    pieces.push((sep, part));
                    sep = SENTENCE_SEP;
                }
            }
            sep = SENTENCE_SEP;
        }
    }

    pieces
}

/// Split after `.`, `!`, `?` followed by whitespace, and at newlines.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let boundary = match c {
            '\n' => true,
            '.' | '!' | '?' => chars
                .peek()
                .map(|(_, next)| next.is_whitespace())
                .unwrap_or(false),
            _ => false,
        };
        if boundary {
            let end = i + c.len_utf8();
            let piece = text[start..end].trim();
            if !piece.is_empty() {
                out.push(piece);
            }
            start = end;
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

/// Cut `text` into pieces of at most `max` bytes, preferring whitespace.
fn hard_split(text: &str, max: usize) -> Vec<&str> {
    let mut out = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max {
            let piece = remaining.trim();
            if !piece.is_empty() {
                out.push(piece);
            }
            break;
        }

        let limit = snap_to_char_boundary(remaining, max);
        let split_at = remaining[..limit]
            .rfind(char::is_whitespace)
            .filter(|&pos| pos > 0)
            .unwrap_or(limit);

        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            out.push(piece);
        }
        remaining = remaining[split_at..].trim_start();
    }

    out
}

/// Trailing words of `chunk` spanning at most `overlap` bytes.
fn overlap_tail(chunk: &str, overlap: usize) -> &str {
    if overlap == 0 || chunk.len() <= 1 {
        return "";
    }
    let start = snap_to_char_boundary(chunk, chunk.len().saturating_sub(overlap));
    match chunk[start..].find(char::is_whitespace) {
        Some(pos) => chunk[start + pos..].trim(),
        None => "",
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
