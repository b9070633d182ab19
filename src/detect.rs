//! TOC source selection.
//!
//! Chooses the structural source with fixed precedence: embedded outline
//! when it passes quality, else a printed contents page located by
//! scanning the leading pages, else content-based reconstruction over
//! the full body. Detection is deterministic; the LLM only enters at
//! structure extraction.

use crate::document::Page;
use crate::pdf::{OutlineEntry, PdfParser};
use std::sync::Arc;
use tracing::debug;

/// Minimum outline entries for the embedded outline to be considered.
const MIN_OUTLINE_ENTRIES: usize = 5;

/// Minimum fraction of outline entries that must pass the validator.
const MIN_VALID_RATIO: f64 = 0.5;

/// Minimum number of page-number-terminated lines for the contents-page
/// shape test.
const MIN_TOC_SHAPED_LINES: usize = 5;

/// Keyword signatures for a printed contents page, multilingual.
const TOC_KEYWORDS: &[&str] = &[
    "table of contents",
    "contents",
    "目录",
    "目 录",
    "目次",
    "contenido",
    "índice",
    "sommaire",
    "table des matières",
    "inhalt",
    "inhaltsverzeichnis",
];

/// Tokens that make sentence-terminal punctuation acceptable in a heading.
const HEADING_TOKENS: &[&str] = &[
    "chapter", "section", "part", "appendix", "annex", "figure", "table", "unit", "lesson",
    "module", "book", "volume",
];

/// Form-field keywords; a trailing colon after one of these marks a form
/// label, not a section heading.
const FORM_KEYWORDS: &[&str] = &[
    "name", "date", "signature", "address", "phone", "email", "title", "company", "city",
    "state", "zip", "country",
];

/// The selected structural source.
#[derive(Debug, Clone)]
pub enum TocSource {
    /// Embedded outline entries, already carrying pages.
    Outline(Vec<OutlineEntry>),
    /// Printed contents region: concatenated text plus its page range.
    PrintedToc {
        text: String,
        first_page: usize,
        last_page: usize,
    },
    /// No usable source in the leading window; reconstruct from the body.
    Content,
}

/// Validate a single candidate TOC entry title.
///
/// Rejects strings that are too short/long, pure punctuation, sentences,
/// single-letter list markers, and form-field labels.
pub fn is_valid_toc_entry(title: &str) -> bool {
    let trimmed = title.trim();
    let char_count = trimmed.chars().count();
    if !(2..=80).contains(&char_count) {
        return false;
    }

    if trimmed.chars().all(|c| !c.is_alphanumeric()) {
        return false;
    }

    // Single-letter-with-dot list markers: "A.", "b."
    if char_count == 2 && trimmed.ends_with('.') {
        return false;
    }

    let lower = trimmed.to_lowercase();

    // Sentence-terminal punctuation marks prose, not a heading, unless a
    // recognised heading token leads the entry.
    if trimmed.ends_with('.') || trimmed.ends_with('!') || trimmed.ends_with('?') {
        let has_heading_token = HEADING_TOKENS
            .iter()
            .any(|token| lower.starts_with(token))
            || trimmed.chars().next().is_some_and(|c| c.is_ascii_digit());
        if !has_heading_token {
            return false;
        }
    }

    // Form-field pattern: "Name:", "Date of birth:"
    if trimmed.ends_with(':') {
        let body = lower.trim_end_matches(':');
        if FORM_KEYWORDS.iter().any(|kw| body.contains(kw)) {
            return false;
        }
    }

    true
}

/// Whether the embedded outline is usable as the structural source.
pub fn outline_usable(entries: &[OutlineEntry]) -> bool {
    if entries.len() < MIN_OUTLINE_ENTRIES {
        return false;
    }
    let valid = entries
        .iter()
        .filter(|e| is_valid_toc_entry(&e.title))
        .count();
    (valid as f64) / (entries.len() as f64) >= MIN_VALID_RATIO
}

/// Whether a page's text looks like a printed contents page.
///
/// Either a keyword signature or the characteristic shape (many short
/// lines ending in page numbers) qualifies.
pub fn looks_like_toc_page(text: &str) -> bool {
    has_toc_keyword(text) || toc_shaped_line_count(text) >= MIN_TOC_SHAPED_LINES
}

fn has_toc_keyword(text: &str) -> bool {
    let head: String = text.lines().take(8).collect::<Vec<_>>().join("\n").to_lowercase();
    TOC_KEYWORDS.iter().any(|kw| head.contains(kw))
}

/// Count lines shaped like contents entries: short, some letters, ending
/// in a page number (dot leaders tolerated).
fn toc_shaped_line_count(text: &str) -> usize {
    text.lines()
        .filter(|line| {
            let line = line.trim();
            if line.is_empty() || line.chars().count() > 100 {
                return false;
            }
            if !line.chars().any(|c| c.is_alphabetic()) {
                return false;
            }
            let tail: String = line
                .chars()
                .rev()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if tail.is_empty() || tail.len() > 4 {
                return false;
            }
            // The page number must be visibly separated from the title
            // (dot leaders, tab, or a run of spaces); a single space is
            // how prose mentions numbers ("Boeing 747", "in 2004").
            let separator: String = line
                .chars()
                .rev()
                .skip(tail.len())
                .take_while(|c| *c == '.' || *c == ' ' || *c == '\u{2026}' || *c == '\t')
                .collect();
            separator.contains('.')
                || separator.contains('\u{2026}')
                || separator.contains('\t')
                || separator.chars().filter(|c| *c == ' ').count() >= 2
        })
        .count()
}

/// Select the structural source for a document.
///
/// Scans at most `toc_check_pages` leading pages; parsing stays lazy.
pub fn select_source(parser: &PdfParser, toc_check_pages: usize) -> TocSource {
    let outline = parser.embedded_outline();
    if outline_usable(&outline) {
        debug!(entries = outline.len(), "using embedded outline");
        return TocSource::Outline(outline);
    }

    let window = parser.parse_initial(toc_check_pages);
    if let Some((first, last)) = find_printed_toc_region(&window) {
        debug!(first, last, "using printed contents page(s)");
        let text = (first..=last)
            .map(|n| parser.page(n).text.clone())
            .collect::<Vec<_>>()
            .join("\n");
        return TocSource::PrintedToc {
            text,
            first_page: first,
            last_page: last,
        };
    }

    debug!("no outline or printed contents found; falling back to content");
    TocSource::Content
}

/// Locate the contiguous printed-contents region within the window.
fn find_printed_toc_region(window: &[Arc<Page>]) -> Option<(usize, usize)> {
    let start = window.iter().find(|p| looks_like_toc_page(&p.text))?;
    let first = start.physical_index;
    let mut last = first;

    // Extend while consecutive pages keep the contents shape. The
    // keyword only appears on the first page, so extension is shape-only.
    for page in window.iter().filter(|p| p.physical_index > first) {
        if page.physical_index == last + 1
            && toc_shaped_line_count(&page.text) >= MIN_TOC_SHAPED_LINES
        {
            last = page.physical_index;
        } else if page.physical_index > last + 1 {
            break;
        }
    }

    Some((first, last))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validator_accepts_headings() {
        assert!(is_valid_toc_entry("Introduction"));
        assert!(is_valid_toc_entry("2.3 Experimental Setup"));
        assert!(is_valid_toc_entry("Chapter 4."));
        assert!(is_valid_toc_entry("Appendix B: Data Tables"));
    }

    #[test]
    fn test_validator_rejects_lengths() {
        assert!(!is_valid_toc_entry("A"));
        assert!(!is_valid_toc_entry(&"x".repeat(81)));
    }

    #[test]
    fn test_validator_rejects_punctuation_and_sentences() {
        assert!(!is_valid_toc_entry("...."));
        assert!(!is_valid_toc_entry("———"));
        assert!(!is_valid_toc_entry("This method performs better than the baseline."));
        assert!(!is_valid_toc_entry("Does it scale?"));
    }

    #[test]
    fn test_validator_rejects_list_markers_and_form_fields() {
        assert!(!is_valid_toc_entry("A."));
        assert!(!is_valid_toc_entry("Name:"));
        assert!(!is_valid_toc_entry("Date of birth:"));
        // A heading ending in a colon without form keywords is fine.
        assert!(is_valid_toc_entry("Results overview:"));
    }

    #[test]
    fn test_outline_usable_thresholds() {
        let good = |title: &str| OutlineEntry {
            level: 1,
            title: title.to_string(),
            page: Some(1),
        };
        // Four entries: below the minimum count.
        let four: Vec<_> = (0..4).map(|i| good(&format!("Chapter {}", i))).collect();
        assert!(!outline_usable(&four));

        let five: Vec<_> = (0..5).map(|i| good(&format!("Chapter {}", i))).collect();
        assert!(outline_usable(&five));

        // Majority invalid entries fail the ratio.
        let mut noisy = vec![good("Introduction")];
        for _ in 0..5 {
            noisy.push(good("...."));
        }
        assert!(!outline_usable(&noisy));
    }

    #[test]
    fn test_toc_page_by_keyword() {
        assert!(looks_like_toc_page("Table of Contents\n\nIntroduction 1"));
        assert!(looks_like_toc_page("目录\n第一章 概述 1"));
        assert!(!looks_like_toc_page("This is the preface to our book."));
    }

    #[test]
    fn test_toc_page_by_shape() {
        let text = "\
Introduction ........ 1
Background ......... 4
Methods ............ 9
Experiments ....... 15
Results ........... 21
Conclusion ........ 30";
        assert!(looks_like_toc_page(text));
    }

    #[test]
    fn test_shape_rejects_prose_with_numbers() {
        let text = "\
The fleet had 12 aircraft including a Boeing 747
and operated from 1990
until a merger in 2004";
        assert_eq!(toc_shaped_line_count(text), 0);
    }
}
