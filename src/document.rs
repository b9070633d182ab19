//! Page-level document representation.
//!
//! Every page of text handed to a downstream phase is wrapped with
//! `<physical_index_N> … </physical_index_N>` boundary sentinels so the
//! absolute page can be re-derived from any substring without trusting
//! LLM arithmetic.

use serde::{Deserialize, Serialize};

/// A single page of extracted text.
///
/// Pages are created on demand by the parser, never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    /// 1-based absolute page number in the PDF file.
    pub physical_index: usize,
    /// Extracted text content; empty when no backend could read the page.
    pub text: String,
    /// Approximate token count (words / 0.75).
    pub token_estimate: usize,
}

impl Page {
    /// Create a new page, estimating its token count.
    pub fn new(physical_index: usize, text: String) -> Self {
        let token_estimate = estimate_tokens(&text);
        Self {
            physical_index,
            text,
            token_estimate,
        }
    }

    /// Format page content wrapped with boundary sentinels.
    pub fn tagged(&self) -> String {
        format!(
            "<physical_index_{}>\n{}\n</physical_index_{}>\n\n",
            self.physical_index, self.text, self.physical_index
        )
    }

    /// Whether the page body is effectively blank.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Estimate token count from text (rough approximation: words / 0.75).
pub fn estimate_tokens(text: &str) -> usize {
    let word_count = text.split_whitespace().count();
    (word_count as f64 / 0.75) as usize
}

/// Parse a `<physical_index_N>` sentinel (bare or angle-bracketed) into N.
///
/// Accepts `"<physical_index_12>"`, `"physical_index_12"` and plain
/// integers, which covers every shape LLMs echo the sentinel back in.
pub fn parse_physical_index(value: &str) -> Option<usize> {
    let trimmed = value.trim();
    if let Ok(n) = trimmed.parse::<usize>() {
        return Some(n);
    }
    let inner = trimmed
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim_start_matches('/');
    inner
        .strip_prefix("physical_index_")
        .and_then(|rest| rest.parse().ok())
}
