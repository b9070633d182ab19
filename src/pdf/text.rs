//! Per-page text extraction backends.
//!
//! Two real backends are chained: lopdf's content-stream extraction
//! (cheap, per page, keeps parsing lazy) is tried first and gated by a
//! quality heuristic; pdf-extract's layout-aware whole-document pass
//! (computed once, cached) is the final fallback, and its output is
//! accepted as-is — it always succeeds but may yield noisy text.
//! Unreadable pages come back empty, never as errors.

use lopdf::Document;
use tracing::debug;

/// Minimum fraction of printable characters for text to count as usable.
const MIN_PRINTABLE_RATIO: f64 = 0.7;

/// Maximum fraction of U+FFFD replacement characters tolerated.
const MAX_REPLACEMENT_RATIO: f64 = 0.05;

/// Score extracted text against the quality heuristic.
///
/// Rejects output dominated by control garbage, replacement characters,
/// or pathological whitespace runs (a symptom of broken CMap decoding).
pub fn passes_quality(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return false;
    }

    let total = trimmed.chars().count();
    let printable = trimmed
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .count();
    if (printable as f64) / (total as f64) < MIN_PRINTABLE_RATIO {
        return false;
    }

    let replacement = trimmed.chars().filter(|c| *c == '\u{FFFD}').count();
    if (replacement as f64) / (total as f64) > MAX_REPLACEMENT_RATIO {
        return false;
    }

    // Pathological whitespace: more than half the characters are spaces
    // interleaved one-per-glyph, which reads as "a b c d e f".
    let spaces = trimmed.chars().filter(|c| *c == ' ').count();
    if total > 40 && (spaces as f64) / (total as f64) > 0.55 {
        return false;
    }

    true
}

/// Extract one page via lopdf's content-stream walker.
///
/// Returns `None` when the page is unreadable or fails the quality gate.
pub fn extract_page_lopdf(doc: &Document, page_number: u32) -> Option<String> {
    match doc.extract_text(&[page_number]) {
        Ok(text) => {
            let cleaned = clean_extracted(&text);
            if passes_quality(&cleaned) {
                Some(cleaned)
            } else {
                debug!(page = page_number, "lopdf output failed quality gate");
                None
            }
        }
        Err(e) => {
            debug!(page = page_number, error = %e, "lopdf extraction failed");
            None
        }
    }
}

/// Run the layout-aware whole-document backend.
///
/// Expensive relative to per-page lopdf extraction, so the parser computes
/// this at most once per document and caches the result.
pub fn extract_all_pdf_extract(bytes: &[u8]) -> Option<Vec<String>> {
    match pdf_extract::extract_text_from_mem_by_pages(bytes) {
        Ok(pages) => Some(pages.iter().map(|p| clean_extracted(p)).collect()),
        Err(e) => {
            debug!(error = %e, "pdf-extract backend failed");
            None
        }
    }
}

/// Normalise raw extractor output: trim trailing line whitespace, collapse
/// runs of blank lines, drop stray NULs.
fn clean_extracted(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in text.lines() {
        let line = line.trim_end().replace('\0', "");
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(&line);
        out.push('\n');
    }
    out.trim_end().to_string()
}
