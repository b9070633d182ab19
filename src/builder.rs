//! Tree building: turn the flat, verified TocItem list into nested
//! TreeNodes with consistent page ranges.
//!
//! End indices are computed against the next item in reading order;
//! nesting then groups items by dotted-code prefix under the depth cap,
//! and a post-order pass expands every parent to cover its children.
//! Parents expand, children are never clamped — the children's ranges
//! were derived from verified successor positions and clamping them
//! would silently discard content.

use crate::structure::TocItem;
use crate::tree::TreeNode;
use tracing::warn;

/// Maximum tree depth, counting the root level.
pub const MAX_DEPTH: usize = 4;

/// Inclusive page range for each flat item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemRange {
    pub start: usize,
    pub end: usize,
}

/// Compute `(start, end)` for every item in flat reading order.
///
/// Start: the mapped page, else the previous item's end + 1, else 1.
/// End: the next item's start − 1 when that item begins at a page top,
/// the shared page when it begins mid-page, and `total_pages` for the
/// final item. Everything is clamped into `[1, total_pages]`.
pub fn compute_ranges(items: &[TocItem], total_pages: usize) -> Vec<ItemRange> {
    let total_pages = total_pages.max(1);
    let n = items.len();

    // Starts, with a provisional fallback for unmapped items: the first
    // item anchors at 1; later items borrow the next mapped start so the
    // predecessor's end is not dragged down, then settle on "previous
    // end + 1" once ends exist.
    let mut starts = Vec::with_capacity(n);
    let mut missing = vec![false; n];
    for (i, item) in items.iter().enumerate() {
        let start = match item.physical_index {
            Some(page) => page.clamp(1, total_pages),
            None => {
                missing[i] = true;
                if i == 0 {
                    1
                } else {
                    items
                        .iter()
                        .skip(i + 1)
                        .find_map(|it| it.physical_index)
                        .map(|p| p.clamp(1, total_pages))
                        .unwrap_or(starts[i - 1])
                }
            }
        };
        starts.push(start);
    }

    // Ends from the flat successor.
    let mut ranges = Vec::with_capacity(n);
    for i in 0..n {
        let end = match (i + 1 < n).then(|| i + 1) {
            Some(j) => {
                let next_start = starts[j];
                if items[j].appear_start == Some(true) {
                    // Successor starts mid-page; both share it.
                    next_start
                } else if next_start > starts[i] {
                    next_start - 1
                } else {
                    next_start
                }
            }
            None => total_pages,
        };
        ranges.push(ItemRange {
            start: starts[i],
            end: end.clamp(starts[i], total_pages),
        });
    }

    // Unmapped items now take "previous end + 1" for real.
    for i in 0..n {
        if missing[i] && i > 0 {
            let candidate = ranges[i - 1].end + 1;
            if candidate <= ranges[i].end {
                ranges[i].start = candidate;
            }
        }
        if ranges[i].end < ranges[i].start {
            warn!(
                title = %items[i].title,
                start = ranges[i].start,
                end = ranges[i].end,
                "empty range repaired"
            );
            ranges[i].start = ranges[i].end;
        }
    }

    ranges
}

/// Nest flat items into a tree by dotted-code prefix, with preface
/// synthesis. See [`assemble_nodes`].
pub fn assemble(items: &[TocItem], ranges: &[ItemRange], total_pages: usize) -> Vec<TreeNode> {
    assemble_nodes(items, ranges, total_pages, true)
}

/// Nest flat items into a tree by dotted-code prefix.
///
/// An item with code `a.b.c` becomes a child of the nearest preceding
/// item whose code is a strict prefix. Items deeper than the cap are
/// lifted into their deepest allowed ancestor, preserving order. Gap
/// sub-trees pass `add_preface = false`: a leading hole inside a gap is
/// not front matter.
pub fn assemble_nodes(
    items: &[TocItem],
    ranges: &[ItemRange],
    total_pages: usize,
    add_preface: bool,
) -> Vec<TreeNode> {
    let mut roots: Vec<TreeNode> = Vec::new();
    // Ancestor chain: (code parts, child-index path from the root set).
    let mut stack: Vec<(Vec<usize>, Vec<usize>)> = Vec::new();

    for (item, range) in items.iter().zip(ranges.iter()) {
        let code = parse_code(&item.structure);
        let node = TreeNode::new(item.title.clone(), range.start, range.end);

        while let Some((ancestor_code, _)) = stack.last() {
            if is_strict_prefix(ancestor_code, &code) {
                break;
            }
            stack.pop();
        }
        // Depth cap: lift anything deeper into the deepest allowed ancestor.
        while stack.len() >= MAX_DEPTH {
            stack.pop();
        }

        let path = if let Some((_, parent_path)) = stack.last() {
            let parent = node_at_path_mut(&mut roots, parent_path);
            parent.nodes.push(node);
            let mut path = parent_path.clone();
            path.push(parent.nodes.len() - 1);
            path
        } else {
            roots.push(node);
            vec![roots.len() - 1]
        };

        stack.push((code, path));
    }

    for root in &mut roots {
        expand_parents(root);
    }

    if add_preface {
        synthesize_preface(&mut roots);
    }

    for root in &mut roots {
        repair_invariants(root, total_pages);
    }

    roots
}

/// Flat leaf items whose span exceeds `max_span` (recursion candidates).
///
/// An item is a leaf when no later item's code extends its own.
pub fn oversized_leaves(items: &[TocItem], ranges: &[ItemRange], max_span: usize) -> Vec<usize> {
    let codes: Vec<Vec<usize>> = items.iter().map(|i| parse_code(&i.structure)).collect();
    (0..items.len())
        .filter(|&i| {
            let span = ranges[i].end.saturating_sub(ranges[i].start) + 1;
            if span <= max_span {
                return false;
            }
            !codes
                .iter()
                .skip(i + 1)
                .any(|c| is_strict_prefix(&codes[i], c))
        })
        .collect()
}

/// Post-order parent expansion: parents grow to cover their children.
fn expand_parents(node: &mut TreeNode) {
    for child in &mut node.nodes {
        expand_parents(child);
    }
    if !node.nodes.is_empty() {
        let min_child = node.nodes.iter().map(|c| c.start_index).min().unwrap_or(node.start_index);
        let max_child = node.nodes.iter().map(|c| c.end_index).max().unwrap_or(node.end_index);
        node.start_index = node.start_index.min(min_child);
        node.end_index = node.end_index.max(max_child);
    }
}

/// Prepend a "Preface" node when the first root starts after page 1.
fn synthesize_preface(roots: &mut Vec<TreeNode>) {
    if let Some(first) = roots.first() {
        if first.start_index > 1 {
            let preface = TreeNode::new("Preface", 1, first.start_index - 1);
            roots.insert(0, preface);
        }
    }
}

/// Clamp any remaining invariant violations; expansion handles parents,
/// this handles ranges that escaped past the document end.
fn repair_invariants(node: &mut TreeNode, total_pages: usize) {
    if node.end_index > total_pages {
        warn!(title = %node.title, end = node.end_index, total_pages, "end clamped");
        node.end_index = total_pages;
    }
    if node.start_index > node.end_index {
        node.start_index = node.end_index;
    }
    if node.start_index == 0 {
        node.start_index = 1;
    }
    for child in &mut node.nodes {
        repair_invariants(child, total_pages);
    }
    // Re-expand in case clamping the node dropped it below a child.
    if !node.nodes.is_empty() {
        let max_child = node.nodes.iter().map(|c| c.end_index).max().unwrap_or(node.end_index);
        node.end_index = node.end_index.max(max_child.min(total_pages));
    }
}

fn parse_code(code: &str) -> Vec<usize> {
    code.split('.').filter_map(|s| s.parse().ok()).collect()
}

fn is_strict_prefix(prefix: &[usize], code: &[usize]) -> bool {
    prefix.len() < code.len() && code[..prefix.len()] == *prefix
}

/// Navigate a child-index path from the root set to a node.
fn node_at_path_mut<'a>(roots: &'a mut [TreeNode], path: &[usize]) -> &'a mut TreeNode {
    let mut node = &mut roots[path[0]];
    for &index in &path[1..] {
        node = &mut node.nodes[index];
    }
    node
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(code: &str, title: &str, page: Option<usize>) -> TocItem {
        let mut it = TocItem::new(code, title);
        it.physical_index = page;
        it
    }

    #[test]
    fn test_printed_contents_scenario() {
        // Contents on page 2: four sections, 40-page document.
        let items = vec![
            item("1", "Introduction", Some(3)),
            item("2", "Methods", Some(11)),
            item("3", "Results", Some(21)),
            item("4", "Discussion", Some(35)),
        ];
        let ranges = compute_ranges(&items, 40);
        assert_eq!(
            ranges,
            vec![
                ItemRange { start: 3, end: 10 },
                ItemRange { start: 11, end: 20 },
                ItemRange { start: 21, end: 34 },
                ItemRange { start: 35, end: 40 },
            ]
        );

        let roots = assemble(&items, &ranges, 40);
        // Preface synthesised over pages 1-2.
        assert_eq!(roots.len(), 5);
        assert_eq!(roots[0].title, "Preface");
        assert_eq!((roots[0].start_index, roots[0].end_index), (1, 2));
        assert_eq!((roots[1].start_index, roots[1].end_index), (3, 10));
    }

    #[test]
    fn test_nested_outline_scenario() {
        // Outline: (1,"Ch 1",1), (2,"1.1",3), (2,"1.2",7), (1,"Ch 2",12); 20 pages.
        let items = vec![
            item("1", "Ch 1", Some(1)),
            item("1.1", "1.1", Some(3)),
            item("1.2", "1.2", Some(7)),
            item("2", "Ch 2", Some(12)),
        ];
        let ranges = compute_ranges(&items, 20);
        let roots = assemble(&items, &ranges, 20);

        assert_eq!(roots.len(), 2);
        let ch1 = &roots[0];
        assert_eq!((ch1.start_index, ch1.end_index), (1, 11));
        assert_eq!(ch1.nodes.len(), 2);
        assert_eq!((ch1.nodes[0].start_index, ch1.nodes[0].end_index), (3, 6));
        assert_eq!((ch1.nodes[1].start_index, ch1.nodes[1].end_index), (7, 11));
        let ch2 = &roots[1];
        assert_eq!((ch2.start_index, ch2.end_index), (12, 20));
    }

    #[test]
    fn test_mid_page_successor_shares_page() {
        let mut items = vec![
            item("1", "First", Some(5)),
            item("2", "Second", Some(9)),
        ];
        items[1].appear_start = Some(true);
        let ranges = compute_ranges(&items, 12);
        assert_eq!(ranges[0], ItemRange { start: 5, end: 9 });
        assert_eq!(ranges[1], ItemRange { start: 9, end: 12 });
    }

    #[test]
    fn test_same_page_successor_keeps_nonempty_range() {
        let items = vec![
            item("1", "First", Some(5)),
            item("2", "Second", Some(5)),
        ];
        let ranges = compute_ranges(&items, 10);
        // next.start == start: end stays at next.start rather than going empty.
        assert_eq!(ranges[0], ItemRange { start: 5, end: 5 });
    }

    #[test]
    fn test_missing_page_falls_back_to_previous_end() {
        let items = vec![
            item("1", "First", Some(1)),
            item("2", "Second", None),
            item("3", "Third", Some(9)),
        ];
        let ranges = compute_ranges(&items, 12);
        // The unmapped item must not drag its predecessor's end down.
        assert_eq!(ranges[0], ItemRange { start: 1, end: 8 });
        // Missing start resolves to previous end + 1.
        assert_eq!(ranges[1], ItemRange { start: 9, end: 9 });
        assert_eq!(ranges[2], ItemRange { start: 9, end: 12 });
    }

    #[test]
    fn test_depth_cap_lifts_deep_items() {
        let items = vec![
            item("1", "L1", Some(1)),
            item("1.1", "L2", Some(2)),
            item("1.1.1", "L3", Some(3)),
            item("1.1.1.1", "L4", Some(4)),
            item("1.1.1.1.1", "L5", Some(5)),
        ];
        let ranges = compute_ranges(&items, 10);
        let roots = assemble(&items, &ranges, 10);

        let max_depth = roots.iter().map(|r| r.depth()).max().unwrap();
        assert!(max_depth <= MAX_DEPTH);

        // The level-5 item survives as a node somewhere in the tree.
        let count: usize = roots.iter().map(|r| r.node_count()).sum();
        assert_eq!(count, 5);
    }

    #[test]
    fn test_parent_expansion_covers_children() {
        // Parent mapped later than its first child.
        let items = vec![
            item("1", "Chapter", Some(4)),
            item("1.1", "Early child", Some(2)),
            item("1.2", "Late child", Some(8)),
        ];
        let mut ranges = compute_ranges(&items, 10);
        // Force the child earlier than the parent to exercise expansion.
        ranges[1] = ItemRange { start: 2, end: 7 };
        let roots = assemble(&items, &ranges, 10);
        // A preface covers page 1; the chapter follows it.
        let parent = roots.iter().find(|r| r.title == "Chapter").unwrap();
        assert!(parent.start_index <= 2);
        assert!(parent.end_index >= 10);
        // Children keep their own ranges.
        assert_eq!(parent.nodes[0].start_index, 2);
    }

    #[test]
    fn test_single_item_covers_whole_document() {
        let items = vec![item("1", "Everything", Some(1))];
        let ranges = compute_ranges(&items, 7);
        assert_eq!(ranges[0], ItemRange { start: 1, end: 7 });
    }

    #[test]
    fn test_out_of_range_start_clamped() {
        let items = vec![item("1", "Over the end", Some(50))];
        let ranges = compute_ranges(&items, 10);
        assert_eq!(ranges[0], ItemRange { start: 10, end: 10 });
    }

    #[test]
    fn test_oversized_leaves() {
        let items = vec![
            item("1", "Big leaf", Some(1)),
            item("2", "Parent", Some(30)),
            item("2.1", "Child", Some(31)),
        ];
        let ranges = vec![
            ItemRange { start: 1, end: 29 },
            ItemRange { start: 30, end: 50 },
            ItemRange { start: 31, end: 50 },
        ];
        let oversized = oversized_leaves(&items, &ranges, 15);
        // Item 0 is an oversized leaf; item 1 has a child; item 2 is an
        // oversized leaf too.
        assert_eq!(oversized, vec![0, 2]);
    }

    #[test]
    fn test_offset_stability() {
        // Shifting every page by +K shifts all ranges by +K with the
        // same shape (as if K blank pages were prepended).
        let base = vec![
            item("1", "Ch 1", Some(1)),
            item("1.1", "1.1", Some(3)),
            item("2", "Ch 2", Some(12)),
        ];
        let shift = 4usize;
        let shifted: Vec<TocItem> = base
            .iter()
            .map(|it| {
                let mut s = it.clone();
                s.physical_index = it.physical_index.map(|p| p + shift);
                s
            })
            .collect();

        let base_ranges = compute_ranges(&base, 20);
        let shifted_ranges = compute_ranges(&shifted, 20 + shift);

        for (b, s) in base_ranges.iter().zip(shifted_ranges.iter()) {
            assert_eq!(s.start, b.start + shift);
            assert_eq!(s.end, b.end + shift);
        }
    }

    #[test]
    fn test_one_page_document() {
        let items = vec![item("1", "Only section", Some(1))];
        let ranges = compute_ranges(&items, 1);
        assert_eq!(ranges[0], ItemRange { start: 1, end: 1 });
        let roots = assemble(&items, &ranges, 1);
        assert_eq!(roots.len(), 1);
        assert_eq!((roots[0].start_index, roots[0].end_index), (1, 1));
    }

    #[test]
    fn test_sibling_starts_non_decreasing() {
        let items = vec![
            item("1", "A", Some(1)),
            item("1.1", "A1", Some(2)),
            item("1.2", "A2", Some(5)),
            item("2", "B", Some(9)),
            item("3", "C", Some(9)),
        ];
        let ranges = compute_ranges(&items, 15);
        let roots = assemble(&items, &ranges, 15);
        for window in roots.windows(2) {
            assert!(window[0].start_index <= window[1].start_index);
        }
        let children = &roots[0].nodes;
        for window in children.windows(2) {
            assert!(window[0].start_index <= window[1].start_index);
        }
    }
}
