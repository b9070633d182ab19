//! Page mapping: bind each TocItem to a physical page.
//!
//! Outline-sourced items carry trustworthy pages and take the fast path.
//! Printed contents pages carry *printed* numbers that may be logical
//! (Roman front matter shifts everything), so the general path locates
//! titles inside sentinel windows, infers any systematic offset from the
//! confident matches, and applies it to the rest.

use crate::pdf::PdfParser;
use crate::structure::TocItem;
use strsim::normalized_levenshtein;
use tracing::{debug, warn};

/// Similarity threshold for fuzzy title/line matching.
const FUZZY_THRESHOLD: f64 = 0.85;

/// Window around a claimed printed page searched for the title.
const CLAIM_BEFORE: usize = 2;
const CLAIM_AFTER: usize = 8;

/// Forward window searched when an item has no page claim at all.
const SEARCH_AHEAD: usize = 15;

/// Normalise a title for matching: case-folded, punctuation stripped,
/// whitespace collapsed.
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() { c } else { ' ' }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Locate a title inside one page's text.
///
/// Returns the match position as a fraction of the page (0.0 = top),
/// preferring the earliest occurrence. Exact normalised containment is
/// tried line by line first, then fuzzy whole-line comparison.
pub fn title_position(page_text: &str, title: &str) -> Option<f64> {
    let needle = normalize_title(title);
    if needle.is_empty() {
        return None;
    }

    let lines: Vec<&str> = page_text.lines().collect();
    if lines.is_empty() {
        return None;
    }

    for (i, line) in lines.iter().enumerate() {
        let hay = normalize_title(line);
        if hay.is_empty() {
            continue;
        }
        if hay.contains(&needle) || normalized_levenshtein(&hay, &needle) >= FUZZY_THRESHOLD {
            return Some(i as f64 / lines.len() as f64);
        }
    }

    None
}

/// Search an inclusive page window for a title.
///
/// Ties break toward earlier pages, then toward matches nearer the top
/// of the page; scanning pages in ascending order and lines top-down
/// yields exactly that preference.
pub fn find_title_in_window(
    parser: &PdfParser,
    title: &str,
    start: usize,
    end: usize,
) -> Option<(usize, f64)> {
    let start = start.max(1);
    let end = end.min(parser.total_pages());
    for page_number in start..=end {
        let page = parser.page(page_number);
        if let Some(fraction) = title_position(&page.text, title) {
            return Some((page_number, fraction));
        }
    }
    None
}

/// Fast path: outline-sourced pages are copied as-is and pre-validated.
pub fn assign_outline_pages(items: &mut [TocItem], total_pages: usize) {
    for item in items.iter_mut() {
        if let Some(page) = item.physical_index {
            if page > total_pages {
                warn!(
                    title = %item.title,
                    page,
                    total_pages,
                    "outline page out of range; clamping"
                );
                item.physical_index = Some(total_pages);
            } else if page == 0 {
                item.physical_index = Some(1);
            }
        }
        item.validation_passed = Some(true);
    }
    enforce_monotone_simple(items);
}

/// General path: resolve printed or missing page claims against the
/// document text, correcting a systematic printed-number offset.
pub fn map_printed_pages(items: &mut [TocItem], parser: &PdfParser) {
    let total = parser.total_pages();

    // First pass: locate titles near their claimed pages and record the
    // printed-to-physical offset of each confident match.
    let mut offsets: Vec<i64> = Vec::new();
    let mut located: Vec<Option<usize>> = vec![None; items.len()];

    for (i, item) in items.iter().enumerate() {
        if let Some(claimed) = item.physical_index {
            let start = claimed.saturating_sub(CLAIM_BEFORE).max(1);
            let end = (claimed + CLAIM_AFTER).min(total);
            if let Some((found, _)) = find_title_in_window(parser, &item.title, start, end) {
                located[i] = Some(found);
                offsets.push(found as i64 - claimed as i64);
            }
        }
    }

    let common_offset = majority_offset(&offsets);
    if let Some(offset) = common_offset {
        if offset != 0 {
            debug!(offset, matched = offsets.len(), "inferred printed-number offset");
        }
    }

    // Second pass: assign pages. Located items take their found page;
    // unlocated claims get the common offset; claimless items are
    // searched forward from the running cursor.
    let mut cursor = 1usize;
    for i in 0..items.len() {
        let assigned = if let Some(found) = located[i] {
            Some(found)
        } else if let Some(claimed) = items[i].physical_index {
            let shifted = claimed as i64 + common_offset.unwrap_or(0);
            Some(shifted.clamp(1, total as i64) as usize)
        } else {
            find_title_in_window(parser, &items[i].title, cursor, (cursor + SEARCH_AHEAD).min(total))
                .map(|(page, _)| page)
        };

        if let Some(page) = assigned {
            items[i].physical_index = Some(page.clamp(1, total));
            cursor = page.clamp(1, total);
        }
    }

    repair_monotonicity(items, parser);
}

/// Clamp and order content-sourced items whose pages came straight from
/// sentinels.
pub fn clamp_and_order(items: &mut [TocItem], parser: &PdfParser) {
    let total = parser.total_pages();
    for item in items.iter_mut() {
        if let Some(page) = item.physical_index {
            if page > total {
                warn!(title = %item.title, page, total, "page out of range; clamping");
                item.physical_index = Some(total);
            } else if page == 0 {
                item.physical_index = Some(1);
            }
        }
    }
    repair_monotonicity(items, parser);
}

/// Resolve ordering violations: an item mapped before its predecessor is
/// re-searched in the tight window between its neighbours, and pinned to
/// the predecessor's page when the search fails.
pub fn repair_monotonicity(items: &mut [TocItem], parser: &PdfParser) {
    let total = parser.total_pages();
    for i in 1..items.len() {
        let prev = items[i - 1].physical_index;
        let current = items[i].physical_index;
        let (Some(prev_page), Some(current_page)) = (prev, current) else {
            continue;
        };
        if current_page >= prev_page {
            continue;
        }

        // Tighter window: predecessor page up to the next already-ordered
        // neighbour (or a short lookahead).
        let upper = items
            .iter()
            .skip(i + 1)
            .find_map(|it| it.physical_index.filter(|p| *p >= prev_page))
            .unwrap_or((prev_page + SEARCH_AHEAD).min(total));

        let remapped = find_title_in_window(parser, &items[i].title, prev_page, upper)
            .map(|(page, _)| page)
            .unwrap_or(prev_page);

        warn!(
            title = %items[i].title,
            from = current_page,
            to = remapped,
            "non-monotone page mapping repaired"
        );
        items[i].physical_index = Some(remapped);
    }
}

/// Pure ordering fix for pre-trusted sequences (no text search).
fn enforce_monotone_simple(items: &mut [TocItem]) {
    let mut floor = 1usize;
    for item in items.iter_mut() {
        if let Some(page) = item.physical_index {
            if page < floor {
                item.physical_index = Some(floor);
            } else {
                floor = page;
            }
        }
    }
}

/// The most common offset among confident matches, when one dominates.
fn majority_offset(offsets: &[i64]) -> Option<i64> {
    if offsets.is_empty() {
        return None;
    }
    let mut counts = std::collections::HashMap::new();
    for &offset in offsets {
        *counts.entry(offset).or_insert(0usize) += 1;
    }
    let (&best, &count) = counts.iter().max_by_key(|&(_, &c)| c)?;
    // Require a strict majority so scattered mismatches cannot shift
    // every unmatched item.
    if count * 2 > offsets.len() {
        Some(best)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("  2.3  Experimental   Setup! "), "2 3 experimental setup");
        assert_eq!(normalize_title("INTRODUCTION"), "introduction");
    }

    #[test]
    fn test_title_position_exact() {
        let text = "Some preamble\nIntroduction\nBody text follows here";
        let pos = title_position(text, "Introduction").unwrap();
        assert!(pos < 0.5);
    }

    #[test]
    fn test_title_position_fuzzy() {
        // OCR-style spacing noise within the fuzzy threshold.
        let text = "Introduction to the system\nmore text\nmore text\nmore text";
        assert!(title_position(text, "Introduction to the system").is_some());
    }

    #[test]
    fn test_title_position_absent() {
        assert!(title_position("entirely unrelated page", "Conclusions").is_none());
        assert!(title_position("", "Conclusions").is_none());
    }

    #[test]
    fn test_title_position_prefers_earliest_line() {
        let text = "Conclusions\nfiller\nfiller\nfiller\nConclusions";
        let pos = title_position(text, "Conclusions").unwrap();
        assert!(pos < 0.1);
    }

    #[test]
    fn test_majority_offset() {
        assert_eq!(majority_offset(&[2, 2, 2, 5]), Some(2));
        assert_eq!(majority_offset(&[1, 2]), None);
        assert_eq!(majority_offset(&[]), None);
        assert_eq!(majority_offset(&[0, 0, 0]), Some(0));
    }

    #[test]
    fn test_enforce_monotone_simple() {
        let mut items = vec![
            TocItem::new("1", "A"),
            TocItem::new("2", "B"),
            TocItem::new("3", "C"),
        ];
        items[0].physical_index = Some(5);
        items[1].physical_index = Some(3);
        items[2].physical_index = Some(9);
        enforce_monotone_simple(&mut items);
        assert_eq!(items[1].physical_index, Some(5));
        assert_eq!(items[2].physical_index, Some(9));
    }

    #[test]
    fn test_assign_outline_pages_clamps_and_validates() {
        let mut items = vec![TocItem::new("1", "A"), TocItem::new("2", "B")];
        items[0].physical_index = Some(3);
        items[1].physical_index = Some(99);
        assign_outline_pages(&mut items, 10);
        assert_eq!(items[1].physical_index, Some(10));
        assert_eq!(items[0].validation_passed, Some(true));
        assert_eq!(items[1].validation_passed, Some(true));
    }
}
