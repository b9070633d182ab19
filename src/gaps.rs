//! Gap detection and filling.
//!
//! After tree building, pages not covered by any leaf are coalesced into
//! maximal contiguous runs and each run gets a supplementary sub-tree so
//! the final leaf union covers every page. Gap-fill nodes are marked and
//! appended among the roots in page order.

use crate::builder;
use crate::llm::{LlmClient, Prompts};
use crate::pdf::PdfParser;
use crate::structure::{RawTocEntry, normalize_entries};
use crate::tree::{GapFillInfo, TreeNode};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const PHASE: &str = "gap_filling";

/// Longest title borrowed from page text for a fallback leaf.
const MAX_FALLBACK_TITLE: usize = 60;

/// Detect uncovered page runs from the leaf ranges.
pub fn detect_gaps(roots: &[TreeNode], total_pages: usize) -> Vec<(usize, usize)> {
    let mut covered = vec![false; total_pages + 1];
    for root in roots {
        for leaf in root.leaves() {
            let start = leaf.start_index.clamp(1, total_pages);
            let end = leaf.end_index.clamp(1, total_pages);
            for page in covered.iter_mut().take(end + 1).skip(start) {
                *page = true;
            }
        }
    }

    let mut gaps = Vec::new();
    let mut run_start: Option<usize> = None;
    for page in 1..=total_pages {
        if !covered[page] {
            run_start.get_or_insert(page);
        } else if let Some(start) = run_start.take() {
            gaps.push((start, page - 1));
        }
    }
    if let Some(start) = run_start {
        gaps.push((start, total_pages));
    }
    gaps
}

/// Pages covered by at least one leaf, for the coverage metric.
pub fn covered_page_count(roots: &[TreeNode], total_pages: usize) -> usize {
    let gaps = detect_gaps(roots, total_pages);
    let uncovered: usize = gaps.iter().map(|(a, b)| b - a + 1).sum();
    total_pages - uncovered
}

/// Fill every gap, appending marked sub-trees among the roots.
///
/// Returns the gap-fill report; `roots` is re-ordered by `start_index`
/// afterwards so sibling ordering holds.
pub async fn fill_gaps(
    roots: &mut Vec<TreeNode>,
    parser: &Arc<PdfParser>,
    client: &LlmClient,
    cancel: &CancellationToken,
) -> GapFillInfo {
    let total_pages = parser.total_pages();
    let gaps = detect_gaps(roots, total_pages);
    let original_covered = total_pages - gaps.iter().map(|(a, b)| b - a + 1).sum::<usize>();

    let mut info = GapFillInfo {
        gaps_found: gaps.len(),
        gaps_filled: Vec::new(),
        original_coverage: format!("{}/{}", original_covered, total_pages),
        coverage_percentage: percentage(original_covered, total_pages),
    };

    for &(start, end) in &gaps {
        if cancel.is_cancelled() {
            warn!("gap filling cancelled; remaining gaps left open");
            break;
        }

        debug!(start, end, "filling gap");
        let mut produced = fill_one_gap(parser, client, start, end).await;
        mark_gap_fill(&mut produced);
        roots.extend(produced);
        info.gaps_filled.push((start, end));
    }

    roots.sort_by_key(|n| n.start_index);

    let final_covered = covered_page_count(roots, total_pages);
    info.coverage_percentage = percentage(final_covered, total_pages);
    info
}

/// Produce the sub-tree for one gap.
async fn fill_one_gap(
    parser: &Arc<PdfParser>,
    client: &LlmClient,
    start: usize,
    end: usize,
) -> Vec<TreeNode> {
    let blank = (start..=end).all(|p| parser.page(p).is_blank());

    // Single-page and purely-blank gaps get one flat leaf.
    if blank {
        return vec![TreeNode::new("Unindexed content", start, end)];
    }
    if start == end {
        return vec![TreeNode::new(fallback_title(parser, start), start, end)];
    }

    let text = parser.tagged_range(start, end);
    let prompt = format!("{}\n\nGiven pages:\n{}", Prompts::gap_toc_generator(), text);

    let entries: Vec<RawTocEntry> = match client
        .complete_json(PHASE, Some(Prompts::system_document_analyzer()), &prompt)
        .await
    {
        Ok(value) => match crate::extract::parse_entries(value) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(start, end, error = %e, "gap TOC unparseable; using fallback leaf");
                Vec::new()
            }
        },
        Err(e) => {
            warn!(start, end, error = %e, "gap TOC call failed; using fallback leaf");
            Vec::new()
        }
    };

    if entries.is_empty() {
        return vec![TreeNode::new(fallback_title(parser, start), start, end)];
    }

    let mut items = normalize_entries(&entries);
    // Clamp every claimed page into the gap.
    for item in &mut items {
        item.physical_index = Some(item.physical_index.unwrap_or(start).clamp(start, end));
    }

    let mut ranges = builder::compute_ranges(&items, end);
    for range in &mut ranges {
        range.start = range.start.clamp(start, end);
        range.end = range.end.clamp(range.start, end);
    }
    // The sub-tree must cover the whole gap.
    if let Some(first) = ranges.first_mut() {
        first.start = start;
    }
    if let Some(last) = ranges.last_mut() {
        last.end = end;
    }

    builder::assemble_nodes(&items, &ranges, end, false)
}

/// Recursively mark produced nodes as gap fill.
fn mark_gap_fill(nodes: &mut [TreeNode]) {
    for node in nodes {
        node.is_gap_fill = Some(true);
        mark_gap_fill(&mut node.nodes);
    }
}

/// Title for a fallback leaf: the first non-empty line of the gap's
/// first page, else a generic label.
fn fallback_title(parser: &Arc<PdfParser>, page: usize) -> String {
    let page = parser.page(page);
    page.text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| {
            if line.chars().count() > MAX_FALLBACK_TITLE {
                let truncated: String = line.chars().take(MAX_FALLBACK_TITLE).collect();
                format!("{}…", truncated.trim_end())
            } else {
                line.to_string()
            }
        })
        .unwrap_or_else(|| "Miscellaneous".to_string())
}

fn percentage(covered: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        (covered as f64 / total as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(title: &str, start: usize, end: usize) -> TreeNode {
        TreeNode::new(title, start, end)
    }

    #[test]
    fn test_detect_gap_at_tail() {
        // Outline covers 1-66 of a 78-page document.
        let roots = vec![node("Body", 1, 66)];
        let gaps = detect_gaps(&roots, 78);
        assert_eq!(gaps, vec![(67, 78)]);
        assert_eq!(covered_page_count(&roots, 78), 66);
    }

    #[test]
    fn test_detect_interior_and_leading_gaps() {
        let mut parent = node("Ch 1", 5, 10);
        parent.nodes.push(node("1.1", 5, 7));
        parent.nodes.push(node("1.2", 9, 10));
        let roots = vec![parent, node("Ch 2", 13, 20)];
        // Leaves cover 5-7, 9-10, 13-20: gaps 1-4, 8, 11-12.
        let gaps = detect_gaps(&roots, 20);
        assert_eq!(gaps, vec![(1, 4), (8, 8), (11, 12)]);
    }

    #[test]
    fn test_no_gaps_when_fully_covered() {
        let roots = vec![node("All", 1, 10)];
        assert!(detect_gaps(&roots, 10).is_empty());
    }

    #[test]
    fn test_parent_coverage_does_not_count() {
        // Only leaves count: a parent spanning 1-10 whose single child
        // covers 1-5 leaves 6-10 uncovered.
        let mut parent = node("Ch", 1, 10);
        parent.nodes.push(node("1.1", 1, 5));
        let gaps = detect_gaps(&[parent], 10);
        assert_eq!(gaps, vec![(6, 10)]);
    }

    #[test]
    fn test_mark_gap_fill_recurses() {
        let mut child = node("inner", 2, 3);
        child.nodes.push(node("leaf", 2, 2));
        let mut nodes = vec![child];
        mark_gap_fill(&mut nodes);
        assert_eq!(nodes[0].is_gap_fill, Some(true));
        assert_eq!(nodes[0].nodes[0].is_gap_fill, Some(true));
    }

    #[test]
    fn test_percentage() {
        assert!((percentage(66, 78) - 84.615).abs() < 0.01);
        assert!((percentage(0, 0) - 100.0).abs() < f64::EPSILON);
    }
}
