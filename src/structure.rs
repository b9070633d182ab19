//! Flat TOC items and hierarchical structure codes.
//!
//! Both the embedded outline (flat `(level, title, page)` triples) and
//! gap-fill output (flat, with level hints) are normalised into dotted
//! pre-order codes by the same level-counter synthesiser, so the tree
//! builder only ever sees one code scheme.

use crate::document::parse_physical_index;
use serde::{Deserialize, Serialize};

/// A flat table-of-contents item, ordered by reading position.
///
/// Created by structure extraction, mutated by page mapping and
/// verification, consumed by the tree builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TocItem {
    /// Dotted hierarchical code such as "2.3.1".
    pub structure: String,

    /// Display title of the section.
    pub title: String,

    /// 1-based absolute page the section starts on, once mapped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub physical_index: Option<usize>,

    /// True iff the section begins mid-page rather than at page top.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appear_start: Option<bool>,

    /// Position in the flat sequence; verification writes back by this.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_index: Option<usize>,

    /// Whether verification confirmed the title on its mapped page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_passed: Option<bool>,
}

impl TocItem {
    /// Create an item with a structure code and title.
    pub fn new(structure: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            structure: structure.into(),
            title: title.into(),
            physical_index: None,
            appear_start: None,
            list_index: None,
            validation_passed: None,
        }
    }

    /// 1-based depth derived from the dotted code ("2.3.1" → 3).
    pub fn level(&self) -> usize {
        self.structure.split('.').filter(|s| !s.is_empty()).count().max(1)
    }
}

/// Raw TOC item as the LLM emits it, before normalisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTocEntry {
    /// Dotted code if the model assigned one.
    #[serde(default)]
    pub structure: Option<String>,

    /// Section title.
    pub title: String,

    /// Page value: integer, "<physical_index_X>" string, or absent.
    #[serde(default, alias = "page")]
    pub physical_index: Option<serde_json::Value>,

    /// Level hint used by gap-fill output when no code is present.
    #[serde(default)]
    pub level: Option<usize>,
}

impl RawTocEntry {
    /// Extract the page number from the physical_index field.
    pub fn page_number(&self) -> Option<usize> {
        match &self.physical_index {
            Some(serde_json::Value::Number(n)) => n.as_u64().map(|n| n as usize),
            Some(serde_json::Value::String(s)) => parse_physical_index(s),
            _ => None,
        }
    }

    /// Depth of this entry: dotted code if present, else the level hint.
    pub fn depth(&self) -> usize {
        if let Some(code) = &self.structure {
            let parts = code.split('.').filter(|s| !s.is_empty()).count();
            if parts > 0 {
                return parts;
            }
        }
        self.level.unwrap_or(1).max(1)
    }
}

/// Level-counter code synthesiser.
///
/// On each entry the counter at its level is incremented and all deeper
/// counters are dropped, so they restart from 1 at the next occurrence.
/// The emitted code is the dotted concatenation from level 1 down.
#[derive(Debug, Default)]
pub struct CodeSynthesizer {
    counters: Vec<usize>,
}

impl CodeSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the synthesiser so the next code continues after `code`.
    ///
    /// Used by recursive extraction so nested numbering continues from
    /// the parent rather than restarting.
    pub fn seeded(code: &str) -> Self {
        let counters = code
            .split('.')
            .filter_map(|s| s.parse().ok())
            .collect();
        Self { counters }
    }

    /// Produce the code for the next entry at `level` (1-based).
    pub fn next(&mut self, level: usize) -> String {
        let level = level.max(1);
        // Missing intermediate levels are opened at 1.
        while self.counters.len() < level {
            self.counters.push(0);
        }
        self.counters.truncate(level);
        self.counters[level - 1] += 1;
        for counter in self.counters.iter_mut().take(level - 1) {
            if *counter == 0 {
                *counter = 1;
            }
        }
        self.counters
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// Synthesise codes for a flat sequence of levels.
pub fn synthesize_codes(levels: &[usize]) -> Vec<String> {
    let mut synth = CodeSynthesizer::new();
    levels.iter().map(|&level| synth.next(level)).collect()
}

/// Compare two dotted codes in pre-order.
///
/// "1.2" precedes "1.2.1", which precedes "1.3", which precedes "2".
pub fn preorder_cmp(a: &str, b: &str) -> std::cmp::Ordering {
    let parse = |code: &str| -> Vec<usize> {
        code.split('.').filter_map(|s| s.parse().ok()).collect()
    };
    parse(a).cmp(&parse(b))
}

/// Whether the sequence of codes is strictly increasing in pre-order.
pub fn codes_monotone(items: &[TocItem]) -> bool {
    items
        .windows(2)
        .all(|w| preorder_cmp(&w[0].structure, &w[1].structure) == std::cmp::Ordering::Less)
}

/// Recode items so they nest strictly under `parent_code`.
///
/// Recursive extraction may come back with restarted numbering ("1",
/// "1.1") or with codes already continuing the parent; either way the
/// relative depths are kept and the codes are rebuilt as descendants of
/// the parent.
pub fn rebase_under(items: &mut [TocItem], parent_code: &str) {
    if items.is_empty() {
        return;
    }
    let parent_level = parent_code.split('.').filter(|s| !s.is_empty()).count();
    let min_level = items.iter().map(|i| i.level()).min().unwrap_or(1);
    let mut synth = CodeSynthesizer::seeded(parent_code);
    for item in items.iter_mut() {
        let relative = item.level() - min_level + 1;
        item.structure = synth.next(parent_level + relative);
    }
}

/// Normalise a raw LLM entry list into TocItems with valid codes.
///
/// Entries keep their own codes while those stay monotone; the first
/// violation (or absence) switches the remainder to synthesised codes.
pub fn normalize_entries(entries: &[RawTocEntry]) -> Vec<TocItem> {
    normalize_entries_seeded(entries, None)
}

/// Like [`normalize_entries`], continuing numbering after `seed` when
/// given. Recursive extraction passes the parent's structure code here so
/// nested numbering continues rather than restarting.
pub fn normalize_entries_seeded(entries: &[RawTocEntry], seed: Option<&str>) -> Vec<TocItem> {
    let mut items: Vec<TocItem> = Vec::with_capacity(entries.len());

    for entry in entries {
        let mut item = TocItem::new(
            entry.structure.clone().unwrap_or_default(),
            entry.title.trim().to_string(),
        );
        item.physical_index = entry.page_number();
        items.push(item);
    }

    // Find the first position whose code is absent or breaks pre-order.
    let mut bad_from = None;
    for i in 0..items.len() {
        let code_ok = !items[i].structure.is_empty()
            && items[i]
                .structure
                .split('.')
                .all(|s| s.parse::<usize>().is_ok());
        let predecessor = if i > 0 {
            Some(items[i - 1].structure.as_str())
        } else {
            seed
        };
        let monotone = match predecessor {
            Some(prev) => preorder_cmp(prev, &items[i].structure) == std::cmp::Ordering::Less,
            None => true,
        };
        if !code_ok || !monotone {
            bad_from = Some(i);
            break;
        }
    }

    if let Some(from) = bad_from {
        // Recover each entry's intended depth before renumbering.
        let depths: Vec<usize> = entries.iter().map(|e| e.depth()).collect();
        for (item, depth) in items.iter_mut().zip(depths.iter()).skip(from) {
            // Stash the depth into a placeholder code so renumber keeps it.
            item.structure = vec!["1"; *depth].join(".");
        }
        let mut synth = match (from, seed) {
            (0, Some(code)) => CodeSynthesizer::seeded(code),
            (0, None) => CodeSynthesizer::new(),
            (n, _) => CodeSynthesizer::seeded(&items[n - 1].structure),
        };
        for item in items.iter_mut().skip(from) {
            let level = item.level();
            item.structure = synth.next(level);
        }
    }

    for (i, item) in items.iter_mut().enumerate() {
        item.list_index = Some(i);
    }

    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthesizer_basic_sequence() {
        let codes = synthesize_codes(&[1, 2, 3, 2, 1]);
        assert_eq!(codes, vec!["1", "1.1", "1.1.1", "1.2", "2"]);
    }

    #[test]
    fn test_synthesizer_restarts_deeper_counters() {
        let codes = synthesize_codes(&[1, 2, 2, 1, 2]);
        assert_eq!(codes, vec!["1", "1.1", "1.2", "2", "2.1"]);
    }

    #[test]
    fn test_synthesizer_skipped_level_opens_at_one() {
        // Jumping straight to level 3 opens the missing level-2 counter.
        let codes = synthesize_codes(&[1, 3]);
        assert_eq!(codes, vec!["1", "1.1.1"]);
    }

    #[test]
    fn test_synthesizer_seeded_continues() {
        let mut synth = CodeSynthesizer::seeded("2.3");
        assert_eq!(synth.next(2), "2.4");
        assert_eq!(synth.next(3), "2.4.1");
        assert_eq!(synth.next(1), "3");
    }

    #[test]
    fn test_synthesizer_idempotent_on_same_input() {
        let levels = [1, 2, 2, 3, 1, 2];
        assert_eq!(synthesize_codes(&levels), synthesize_codes(&levels));
    }

    #[test]
    fn test_preorder_cmp() {
        use std::cmp::Ordering::*;
        assert_eq!(preorder_cmp("1", "1.1"), Less);
        assert_eq!(preorder_cmp("1.1", "1.2"), Less);
        assert_eq!(preorder_cmp("1.2", "2"), Less);
        assert_eq!(preorder_cmp("2", "1.9.9"), Greater);
        assert_eq!(preorder_cmp("1.2", "1.2"), Equal);
    }

    #[test]
    fn test_item_level() {
        assert_eq!(TocItem::new("2.3.1", "x").level(), 3);
        assert_eq!(TocItem::new("4", "x").level(), 1);
        assert_eq!(TocItem::new("", "x").level(), 1);
    }

    #[test]
    fn test_normalize_keeps_valid_codes() {
        let entries = vec![
            RawTocEntry {
                structure: Some("1".to_string()),
                title: "Intro".to_string(),
                physical_index: Some(serde_json::json!(3)),
                level: None,
            },
            RawTocEntry {
                structure: Some("1.1".to_string()),
                title: "Background".to_string(),
                physical_index: Some(serde_json::json!("<physical_index_4>")),
                level: None,
            },
        ];
        let items = normalize_entries(&entries);
        assert_eq!(items[0].structure, "1");
        assert_eq!(items[1].structure, "1.1");
        assert_eq!(items[0].physical_index, Some(3));
        assert_eq!(items[1].physical_index, Some(4));
        assert_eq!(items[1].list_index, Some(1));
    }

    #[test]
    fn test_normalize_renumbers_broken_suffix() {
        let entries = vec![
            RawTocEntry {
                structure: Some("1".to_string()),
                title: "A".to_string(),
                physical_index: None,
                level: None,
            },
            RawTocEntry {
                structure: Some("1.1".to_string()),
                title: "B".to_string(),
                physical_index: None,
                level: None,
            },
            // Non-monotone: repeats 1.1.
            RawTocEntry {
                structure: Some("1.1".to_string()),
                title: "C".to_string(),
                physical_index: None,
                level: None,
            },
            RawTocEntry {
                structure: None,
                title: "D".to_string(),
                physical_index: None,
                level: Some(1),
            },
        ];
        let items = normalize_entries(&entries);
        assert_eq!(items[2].structure, "1.2");
        assert_eq!(items[3].structure, "2");
        assert!(codes_monotone(&items));
    }

    #[test]
    fn test_rebase_under_restarted_numbering() {
        let mut items = vec![
            TocItem::new("1", "First"),
            TocItem::new("1.1", "Detail"),
            TocItem::new("2", "Second"),
        ];
        rebase_under(&mut items, "3.2");
        let codes: Vec<&str> = items.iter().map(|i| i.structure.as_str()).collect();
        assert_eq!(codes, vec!["3.2.1", "3.2.1.1", "3.2.2"]);
    }

    #[test]
    fn test_rebase_under_already_continued() {
        let mut items = vec![
            TocItem::new("3.2.1", "First"),
            TocItem::new("3.2.2", "Second"),
        ];
        rebase_under(&mut items, "3.2");
        let codes: Vec<&str> = items.iter().map(|i| i.structure.as_str()).collect();
        assert_eq!(codes, vec!["3.2.1", "3.2.2"]);
    }

    #[test]
    fn test_normalize_seeded_continues_parent_numbering() {
        let entries: Vec<RawTocEntry> = [(1, "First topic"), (2, "Detail"), (1, "Second topic")]
            .iter()
            .map(|(level, title)| RawTocEntry {
                structure: None,
                title: title.to_string(),
                physical_index: None,
                level: Some(*level),
            })
            .collect();
        let items = normalize_entries_seeded(&entries, Some("3.2"));
        let codes: Vec<&str> = items.iter().map(|i| i.structure.as_str()).collect();
        assert_eq!(codes, vec!["4", "4.1", "5"]);
    }

    #[test]
    fn test_normalize_from_level_hints_only() {
        let entries: Vec<RawTocEntry> = [(1, "A"), (2, "B"), (2, "C"), (1, "D")]
            .iter()
            .map(|(level, title)| RawTocEntry {
                structure: None,
                title: title.to_string(),
                physical_index: None,
                level: Some(*level),
            })
            .collect();
        let items = normalize_entries(&entries);
        let codes: Vec<&str> = items.iter().map(|i| i.structure.as_str()).collect();
        assert_eq!(codes, vec!["1", "1.1", "1.2", "2"]);
    }
}
