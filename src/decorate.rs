//! Payload decoration: node ids, text slices, and cached summaries.
//!
//! Driven by the `if_add_node_id` / `if_add_node_text` /
//! `if_add_node_summary` options. Node ids are assigned in pre-order so
//! they sort lexicographically in traversal order and stay stable for a
//! given input.

use crate::llm::{LlmClient, Prompts};
use crate::pdf::PdfParser;
use crate::tree::TreeNode;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const PHASE: &str = "decoration";

/// Word cap for the content handed to the summary prompt.
const SUMMARY_CONTENT_WORDS: usize = 3000;

/// Assign zero-padded pre-order node ids ("0000", "0001", …).
pub fn assign_node_ids(roots: &mut [TreeNode]) {
    let mut counter = 0usize;
    for root in roots {
        assign_ids_preorder(root, &mut counter);
    }
}

fn assign_ids_preorder(node: &mut TreeNode, counter: &mut usize) {
    node.node_id = Some(format!("{:04}", counter));
    *counter += 1;
    for child in &mut node.nodes {
        assign_ids_preorder(child, counter);
    }
}

/// Attach each node's page-range text, stripped of boundary sentinels.
pub fn attach_text(roots: &mut [TreeNode], parser: &PdfParser) {
    for root in roots {
        attach_text_recursive(root, parser);
    }
}

fn attach_text_recursive(node: &mut TreeNode, parser: &PdfParser) {
    node.text = Some(parser.text_range(node.start_index, node.end_index));
    for child in &mut node.nodes {
        attach_text_recursive(child, parser);
    }
}

/// Attach LLM summaries to every node, deduplicating identical
/// (title, range) inputs within the document.
///
/// Fan-out rides the client's shared semaphore; no extra gating here.
pub async fn attach_summaries(
    roots: &mut [TreeNode],
    parser: &Arc<PdfParser>,
    client: &LlmClient,
    cancel: &CancellationToken,
) {
    // Collect unique summary inputs keyed by (title, start, end).
    let mut keys: Vec<(String, usize, usize)> = Vec::new();
    for root in roots.iter() {
        collect_keys(root, &mut keys);
    }
    keys.sort();
    keys.dedup();

    let mut join_set: JoinSet<((String, usize, usize), Option<String>)> = JoinSet::new();

    for key in keys {
        if cancel.is_cancelled() {
            break;
        }
        let parser = Arc::clone(parser);
        let client = client.clone();
        join_set.spawn(async move {
            let summary = summarize_one(&client, &parser, &key.0, key.1, key.2).await;
            (key, summary)
        });
    }

    let mut cache: HashMap<(String, usize, usize), String> = HashMap::new();
    while let Some(result) = join_set.join_next().await {
        match result {
            Ok((key, Some(summary))) => {
                cache.insert(key, summary);
            }
            Ok((_, None)) => {}
            Err(e) => warn!(error = %e, "summary task panicked"),
        }
    }

    for root in roots.iter_mut() {
        apply_summaries(root, &cache);
    }
}

fn collect_keys(node: &TreeNode, keys: &mut Vec<(String, usize, usize)>) {
    keys.push((node.title.clone(), node.start_index, node.end_index));
    for child in &node.nodes {
        collect_keys(child, keys);
    }
}

fn apply_summaries(node: &mut TreeNode, cache: &HashMap<(String, usize, usize), String>) {
    let key = (node.title.clone(), node.start_index, node.end_index);
    if let Some(summary) = cache.get(&key) {
        node.summary = Some(summary.clone());
    }
    for child in &mut node.nodes {
        apply_summaries(child, cache);
    }
}

async fn summarize_one(
    client: &LlmClient,
    parser: &Arc<PdfParser>,
    title: &str,
    start: usize,
    end: usize,
) -> Option<String> {
    let content = parser.text_range(start, end);
    if content.trim().is_empty() {
        return None;
    }
    let content = truncate_words(&content, SUMMARY_CONTENT_WORDS);

    let prompt = Prompts::generate_node_summary()
        .replace("{title}", title)
        .replace("{pages}", &format!("{}-{}", start, end))
        .replace("{content}", &content);

    match client.complete(PHASE, None, &prompt).await {
        Ok(summary) => {
            let summary = summary.trim().to_string();
            if summary.is_empty() { None } else { Some(summary) }
        }
        Err(e) => {
            warn!(title, error = %e, "summary generation failed");
            None
        }
    }
}

fn truncate_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        text.to_string()
    } else {
        words[..max_words].join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<TreeNode> {
        let mut ch1 = TreeNode::new("Chapter 1", 1, 10);
        ch1.nodes.push(TreeNode::new("Section 1.1", 1, 5));
        ch1.nodes.push(TreeNode::new("Section 1.2", 6, 10));
        vec![ch1, TreeNode::new("Chapter 2", 11, 20)]
    }

    #[test]
    fn test_node_ids_are_preorder_and_unique() {
        let mut roots = sample();
        assign_node_ids(&mut roots);

        let mut ids = Vec::new();
        fn collect(node: &TreeNode, ids: &mut Vec<String>) {
            ids.push(node.node_id.clone().unwrap());
            for child in &node.nodes {
                collect(child, ids);
            }
        }
        for root in &roots {
            collect(root, &mut ids);
        }

        assert_eq!(ids, vec!["0000", "0001", "0002", "0003"]);
        // Lexicographic order equals pre-order.
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(sorted, ids);
    }

    #[test]
    fn test_node_ids_stable_across_runs() {
        let mut a = sample();
        let mut b = sample();
        assign_node_ids(&mut a);
        assign_node_ids(&mut b);
        assert_eq!(a[0].nodes[1].node_id, b[0].nodes[1].node_id);
    }

    #[test]
    fn test_truncate_words() {
        assert_eq!(truncate_words("a b c", 5), "a b c");
        assert_eq!(truncate_words("a b c d e f", 3), "a b c");
    }

    #[test]
    fn test_apply_summaries_by_key() {
        let mut roots = sample();
        let mut cache = HashMap::new();
        cache.insert(
            ("Section 1.2".to_string(), 6usize, 10usize),
            "Covers the middle part.".to_string(),
        );
        for root in &mut roots {
            apply_summaries(root, &cache);
        }
        assert_eq!(
            roots[0].nodes[1].summary.as_deref(),
            Some("Covers the middle part.")
        );
        assert!(roots[0].summary.is_none());
    }
}
