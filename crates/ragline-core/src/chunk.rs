//! Paragraph-boundary text chunker.
//!
//! Splits an extracted document into [`Chunk`]s of at most `max_tokens`
//! (approximated as 4 characters per token). Text extractors mark page
//! breaks with form feeds (`\x0c`); when present, chunks never span a
//! page and carry a 1-based `page_number`.
//!
//! Within a page, paragraphs (`\n\n`) are packed greedily. A paragraph
//! longer than the budget is hard-split at the last newline or space
//! before the limit.
//!
//! ```rust
//! use ragline_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("doc-1", "Page one.\x0cPage two.", 700);
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[1].page_number, Some(2));
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

const CHARS_PER_TOKEN: usize = 4;
const PAGE_BREAK: char = '\x0c';

/// Split `text` into chunks with contiguous indices starting at 0.
///
/// Always returns at least one chunk, even for empty text.
pub fn chunk_text(document_id: &str, text: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = (max_tokens * CHARS_PER_TOKEN).max(1);
    let paged = text.contains(PAGE_BREAK);

    let mut pieces: Vec<(Option<u32>, String)> = Vec::new();
    for (page_idx, page) in text.split(PAGE_BREAK).enumerate() {
        let page_number = paged.then_some(page_idx as u32 + 1);
        for piece in pack_paragraphs(page, max_chars) {
            pieces.push((page_number, piece));
        }
    }

    if pieces.is_empty() {
        pieces.push((paged.then_some(1), text.trim().to_string()));
    }

    pieces
        .into_iter()
        .enumerate()
        .map(|(i, (page, body))| make_chunk(document_id, i as i64, page, &body))
        .collect()
}

fn pack_paragraphs(page: &str, max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut buf = String::new();

    for para in page.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let would_be = if buf.is_empty() {
            para.len()
        } else {
            buf.len() + 2 + para.len()
        };
        if would_be > max_chars && !buf.is_empty() {
            out.push(std::mem::take(&mut buf));
        }

        if para.len() > max_chars {
            out.extend(hard_split(para, max_chars));
            continue;
        }

        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(para);
    }

    if !buf.is_empty() {
        out.push(buf);
    }
    out
}

/// Split an oversized paragraph at whitespace boundaries.
fn hard_split(para: &str, max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = para;

    while !rest.is_empty() {
        let mut cut = snap_to_char_boundary(rest, max_chars.min(rest.len()));
        if cut < rest.len() {
            if let Some(ws) = rest[..cut].rfind(['\n', ' ']) {
                cut = ws + 1;
            }
        }
        if cut == 0 {
            // A single character wider than the budget.
            cut = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let piece = rest[..cut].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        rest = &rest[cut..];
    }
    out
}

fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn make_chunk(document_id: &str, index: i64, page_number: Option<u32>, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        page_number,
        text: text.to_string(),
        hash: format!("{:x}", hasher.finalize()),
    }
}
