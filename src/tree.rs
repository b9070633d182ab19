//! The hierarchical tree structure returned to callers.

use serde::{Deserialize, Serialize};

/// A node in the document tree.
///
/// Page indices are 1-based and inclusive. After the pipeline finishes,
/// every tree satisfies: ranges inside `[1, total_pages]`, parents cover
/// children, siblings non-decreasing in `start_index`, depth at most 4,
/// and leaves jointly cover every page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    /// Section title.
    pub title: String,

    /// Starting page index.
    pub start_index: usize,

    /// Ending page index (inclusive).
    pub end_index: usize,

    /// Pre-order zero-padded identifier ("0000", "0001", …).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,

    /// Child nodes (subsections), ordered.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<TreeNode>,

    /// Page text for the node's range, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// LLM-generated summary, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    /// Marks nodes synthesised by gap filling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_gap_fill: Option<bool>,
}

impl TreeNode {
    /// Create a new tree node.
    pub fn new(title: impl Into<String>, start_index: usize, end_index: usize) -> Self {
        Self {
            title: title.into(),
            start_index,
            end_index,
            node_id: None,
            nodes: Vec::new(),
            text: None,
            summary: None,
            is_gap_fill: None,
        }
    }

    /// Number of pages covered.
    pub fn page_span(&self) -> usize {
        if self.end_index >= self.start_index {
            self.end_index - self.start_index + 1
        } else {
            0
        }
    }

    /// Recursively count all nodes in this subtree (including self).
    pub fn node_count(&self) -> usize {
        1 + self.nodes.iter().map(|n| n.node_count()).sum::<usize>()
    }

    /// Depth of this subtree (a leaf has depth 1).
    pub fn depth(&self) -> usize {
        1 + self.nodes.iter().map(|n| n.depth()).max().unwrap_or(0)
    }

    /// All leaf nodes (nodes without children) in pre-order.
    pub fn leaves(&self) -> Vec<&TreeNode> {
        if self.nodes.is_empty() {
            vec![self]
        } else {
            self.nodes.iter().flat_map(|n| n.leaves()).collect()
        }
    }

    /// Find a node by title (case-insensitive).
    pub fn find_by_title(&self, title: &str) -> Option<&TreeNode> {
        if self.title.eq_ignore_ascii_case(title) {
            return Some(self);
        }
        for child in &self.nodes {
            if let Some(found) = child.find_by_title(title) {
                return Some(found);
            }
        }
        None
    }

    /// Format the subtree as an indented listing.
    pub fn format_tree(&self, indent: usize) -> String {
        let prefix = "  ".repeat(indent);
        let gap_marker = if self.is_gap_fill == Some(true) {
            " (gap fill)"
        } else {
            ""
        };
        let mut result = format!(
            "{}{} [pages {}-{}]{}\n",
            prefix, self.title, self.start_index, self.end_index, gap_marker
        );
        for child in &self.nodes {
            result.push_str(&child.format_tree(indent + 1));
        }
        result
    }
}

/// Aggregate statistics for a finished tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeStatistics {
    pub root_nodes: usize,
    pub total_nodes: usize,
    pub max_depth: usize,
}

/// Gap-filling outcome reported with the tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GapFillInfo {
    /// Number of uncovered runs detected after tree building.
    pub gaps_found: usize,
    /// The `[start, end]` ranges that were filled.
    pub gaps_filled: Vec<(usize, usize)>,
    /// Pages covered before filling, as "C/N".
    pub original_coverage: String,
    /// Final coverage percentage (100.0 after successful filling).
    pub coverage_percentage: f64,
}

/// The externally observable result: tree plus quality metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeIndex {
    /// Source file name or stream label.
    pub source_file: String,

    /// Total page count of the document.
    pub total_pages: usize,

    /// Root-level nodes.
    pub structure: Vec<TreeNode>,

    /// Aggregate statistics.
    pub statistics: TreeStatistics,

    /// Fraction of the verification cohort confirmed on their pages.
    pub verification_accuracy: f64,

    /// Gap detection and filling outcome.
    pub gap_fill_info: GapFillInfo,
}

impl TreeIndex {
    /// Compute statistics for a root set.
    pub fn statistics_for(roots: &[TreeNode]) -> TreeStatistics {
        TreeStatistics {
            root_nodes: roots.len(),
            total_nodes: roots.iter().map(|n| n.node_count()).sum(),
            max_depth: roots.iter().map(|n| n.depth()).max().unwrap_or(0),
        }
    }

    /// All leaves across root nodes, in pre-order.
    pub fn leaves(&self) -> Vec<&TreeNode> {
        self.structure.iter().flat_map(|n| n.leaves()).collect()
    }

    /// Find a node by title anywhere in the tree.
    pub fn find_by_title(&self, title: &str) -> Option<&TreeNode> {
        self.structure.iter().find_map(|n| n.find_by_title(title))
    }

    /// Format the whole tree for display.
    pub fn format(&self) -> String {
        let mut result = format!(
            "Document: {} ({} pages, {} sections)\n",
            self.source_file, self.total_pages, self.statistics.total_nodes
        );
        result.push_str(&"─".repeat(50));
        result.push('\n');
        for node in &self.structure {
            result.push_str(&node.format_tree(0));
        }
        result
    }

    /// Convert to pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> Vec<TreeNode> {
        let mut ch1 = TreeNode::new("Chapter 1", 1, 11);
        ch1.nodes.push(TreeNode::new("Section 1.1", 3, 6));
        ch1.nodes.push(TreeNode::new("Section 1.2", 7, 11));
        vec![ch1, TreeNode::new("Chapter 2", 12, 20)]
    }

    #[test]
    fn test_node_counts_and_depth() {
        let roots = sample_tree();
        let stats = TreeIndex::statistics_for(&roots);
        assert_eq!(stats.root_nodes, 2);
        assert_eq!(stats.total_nodes, 4);
        assert_eq!(stats.max_depth, 2);
    }

    #[test]
    fn test_leaves() {
        let roots = sample_tree();
        let leaves: Vec<&str> = roots
            .iter()
            .flat_map(|n| n.leaves())
            .map(|n| n.title.as_str())
            .collect();
        assert_eq!(leaves, vec!["Section 1.1", "Section 1.2", "Chapter 2"]);
    }

    #[test]
    fn test_page_span() {
        assert_eq!(TreeNode::new("x", 3, 6).page_span(), 4);
        assert_eq!(TreeNode::new("x", 6, 3).page_span(), 0);
    }

    #[test]
    fn test_find_by_title() {
        let roots = sample_tree();
        assert!(roots[0].find_by_title("section 1.2").is_some());
        assert!(roots[0].find_by_title("missing").is_none());
    }

    #[test]
    fn test_serialization_skips_empty_fields() {
        let node = TreeNode::new("Chapter 1", 1, 10);
        let json = serde_json::to_string(&node).unwrap();
        assert!(!json.contains("node_id"));
        assert!(!json.contains("is_gap_fill"));
        assert!(!json.contains("summary"));
        assert!(!json.contains("nodes"));
    }

    #[test]
    fn test_tree_index_json_roundtrip() {
        let roots = sample_tree();
        let statistics = TreeIndex::statistics_for(&roots);
        let index = TreeIndex {
            source_file: "report".to_string(),
            total_pages: 20,
            structure: roots,
            statistics,
            verification_accuracy: 0.9,
            gap_fill_info: GapFillInfo::default(),
        };
        let json = index.to_json().unwrap();
        let parsed = TreeIndex::from_json(&json).unwrap();
        assert_eq!(parsed.source_file, index.source_file);
        assert_eq!(parsed.statistics.total_nodes, 4);
    }
}
