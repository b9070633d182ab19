//! Structure extraction: turn the chosen TOC source into a flat ordered
//! list of TocItems with hierarchical codes.
//!
//! Three paths share one normaliser: the embedded outline converts
//! directly, the printed contents page goes through the LLM transformer
//! (chunked with a tail handoff when large), and the body path segments
//! the full text at the token budget and reconciles adjacent segments.

use crate::document::estimate_tokens;
use crate::error::{Result, TreeIndexError};
use crate::llm::{LlmClient, Prompts};
use crate::pdf::{OutlineEntry, PdfParser};
use crate::structure::{
    CodeSynthesizer, RawTocEntry, TocItem, normalize_entries, normalize_entries_seeded,
};
use tracing::{debug, warn};

const PHASE: &str = "structure_extraction";

/// Number of trailing items handed to the next chunk so the code
/// sequence continues monotonically across a split.
const HANDOFF_TAIL: usize = 5;

/// Convert embedded outline entries into TocItems.
///
/// Codes come from the level-counter synthesiser; pages are copied
/// through as physical indices. Running this twice on the same outline
/// produces identical sequences.
pub fn items_from_outline(entries: &[OutlineEntry]) -> Vec<TocItem> {
    let mut synth = CodeSynthesizer::new();
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let mut item = TocItem::new(synth.next(entry.level), entry.title.clone());
            item.physical_index = entry.page;
            item.list_index = Some(i);
            item
        })
        .collect()
}

/// Extract TocItems from a printed contents region via the LLM.
pub async fn items_from_printed_toc(
    client: &LlmClient,
    toc_text: &str,
    max_tokens_per_chunk: usize,
) -> Result<Vec<TocItem>> {
    let chunks = split_text_by_tokens(toc_text, max_tokens_per_chunk);
    let mut raw_entries: Vec<RawTocEntry> = Vec::new();

    for (i, chunk) in chunks.iter().enumerate() {
        let prompt = if i == 0 {
            format!("{}\n\nGiven table of contents:\n{}", Prompts::toc_transformer(), chunk)
        } else {
            format!(
                "{}\n\nPrevious entries (tail):\n{}\n\nNext part of the table of contents:\n{}",
                Prompts::toc_transformer_continue(),
                handoff_json(&raw_entries),
                chunk
            )
        };

        match call_for_entries(client, &prompt).await {
            Ok(mut entries) => {
                drop_boundary_duplicates(&raw_entries, &mut entries);
                raw_entries.append(&mut entries);
            }
            Err(e) => {
                // Malformed responses degrade the chunk, not the phase.
                warn!(chunk = i, error = %e, "contents chunk produced no entries");
            }
        }
    }

    Ok(normalize_entries(&raw_entries))
}

/// Extract TocItems from body content.
///
/// The body is segmented at the token budget; each segment's headings
/// are tagged with the nearest `<physical_index_N>` sentinel. When
/// `seed_code` is given (recursive extraction) numbering continues from
/// it instead of restarting.
pub async fn items_from_content(
    client: &LlmClient,
    parser: &PdfParser,
    page_start: usize,
    page_end: usize,
    max_tokens_per_segment: usize,
    seed_code: Option<&str>,
) -> Result<Vec<TocItem>> {
    let segments = segment_pages(parser, page_start, page_end, max_tokens_per_segment);
    let mut raw_entries: Vec<RawTocEntry> = Vec::new();

    for (i, &(seg_start, seg_end)) in segments.iter().enumerate() {
        let text = parser.tagged_range(seg_start, seg_end);
        if text.trim().is_empty() {
            continue;
        }

        let continuing = i > 0 || seed_code.is_some();
        let prompt = if !continuing {
            format!("{}\n\nGiven text:\n{}", Prompts::generate_structure_init(), text)
        } else {
            let tail = if raw_entries.is_empty() {
                seed_code
                    .map(|code| format!("[{{\"structure\": \"{}\"}}]", code))
                    .unwrap_or_else(|| "[]".to_string())
            } else {
                handoff_json(&raw_entries)
            };
            format!(
                "{}\n\nPrevious structure (tail):\n{}\n\nGiven text:\n{}",
                Prompts::generate_structure_continue(),
                tail,
                text
            )
        };

        match call_for_entries(client, &prompt).await {
            Ok(mut entries) => {
                drop_boundary_duplicates(&raw_entries, &mut entries);
                raw_entries.append(&mut entries);
            }
            Err(e) => {
                warn!(segment = i, error = %e, "body segment produced no entries");
            }
        }
    }

    let items = normalize_entries_seeded(&raw_entries, seed_code);
    debug!(items = items.len(), segments = segments.len(), "body extraction finished");
    Ok(items)
}

/// One LLM round trip parsed into raw entries.
async fn call_for_entries(client: &LlmClient, prompt: &str) -> Result<Vec<RawTocEntry>> {
    let value = client
        .complete_json(PHASE, Some(Prompts::system_document_analyzer()), prompt)
        .await?;
    parse_entries(value)
}

/// Parse an LLM JSON value into entries, tolerating the wrapper-object
/// shape some models prefer.
pub fn parse_entries(value: serde_json::Value) -> Result<Vec<RawTocEntry>> {
    if value.is_array() {
        return serde_json::from_value(value)
            .map_err(|e| TreeIndexError::parse(PHASE, e.to_string()));
    }

    if let Some(inner) = value.get("table_of_contents").cloned() {
        return serde_json::from_value(inner)
            .map_err(|e| TreeIndexError::parse(PHASE, e.to_string()));
    }

    Err(TreeIndexError::parse(
        PHASE,
        format!("expected a JSON array, got: {}", value),
    ))
}

/// Serialise the tail of accumulated entries for the next chunk's prompt.
fn handoff_json(entries: &[RawTocEntry]) -> String {
    let tail: Vec<_> = entries
        .iter()
        .rev()
        .take(HANDOFF_TAIL)
        .rev()
        .map(|e| {
            serde_json::json!({
                "structure": e.structure,
                "title": e.title,
            })
        })
        .collect();
    serde_json::to_string(&tail).unwrap_or_else(|_| "[]".to_string())
}

/// Drop leading continuation entries that duplicate the accumulated tail
/// (the overlap at a chunk boundary).
fn drop_boundary_duplicates(existing: &[RawTocEntry], incoming: &mut Vec<RawTocEntry>) {
    let tail_titles: Vec<String> = existing
        .iter()
        .rev()
        .take(HANDOFF_TAIL)
        .map(|e| normalize_title_key(&e.title))
        .collect();

    while let Some(first) = incoming.first() {
        if tail_titles.contains(&normalize_title_key(&first.title)) {
            incoming.remove(0);
        } else {
            break;
        }
    }
}

fn normalize_title_key(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Split text into chunks of roughly `max_tokens` each, on line
/// boundaries.
fn split_text_by_tokens(text: &str, max_tokens: usize) -> Vec<String> {
    if estimate_tokens(text) <= max_tokens {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_tokens = 0usize;

    for line in text.lines() {
        let line_tokens = estimate_tokens(line).max(1);
        if current_tokens + line_tokens > max_tokens && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        current.push_str(line);
        current.push('\n');
        current_tokens += line_tokens;
    }
    if !current.trim().is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Group an inclusive page range into segments within the token budget.
fn segment_pages(
    parser: &PdfParser,
    start: usize,
    end: usize,
    max_tokens: usize,
) -> Vec<(usize, usize)> {
    let mut segments = Vec::new();
    let mut seg_start = start;
    let mut seg_tokens = 0usize;

    for page in start..=end {
        let tokens = parser.page(page).token_estimate;
        if seg_tokens + tokens > max_tokens && page > seg_start {
            segments.push((seg_start, page - 1));
            seg_start = page;
            seg_tokens = 0;
        }
        seg_tokens += tokens;
    }
    segments.push((seg_start, end));
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outline(level: usize, title: &str, page: usize) -> OutlineEntry {
        OutlineEntry {
            level,
            title: title.to_string(),
            page: Some(page),
        }
    }

    #[test]
    fn test_items_from_outline_codes() {
        let entries = vec![
            outline(1, "Ch 1", 1),
            outline(2, "1.1", 3),
            outline(2, "1.2", 7),
            outline(1, "Ch 2", 12),
        ];
        let items = items_from_outline(&entries);
        let codes: Vec<&str> = items.iter().map(|i| i.structure.as_str()).collect();
        assert_eq!(codes, vec!["1", "1.1", "1.2", "2"]);
        assert_eq!(items[1].physical_index, Some(3));
        assert_eq!(items[3].list_index, Some(3));
    }

    #[test]
    fn test_items_from_outline_is_idempotent() {
        let entries = vec![
            outline(1, "Intro", 1),
            outline(2, "Scope", 2),
            outline(3, "Details", 3),
            outline(2, "Goals", 5),
            outline(1, "Body", 8),
        ];
        let a = items_from_outline(&entries);
        let b = items_from_outline(&entries);
        let codes = |items: &[TocItem]| {
            items
                .iter()
                .map(|i| (i.structure.clone(), i.title.clone(), i.physical_index))
                .collect::<Vec<_>>()
        };
        assert_eq!(codes(&a), codes(&b));
    }

    #[test]
    fn test_parse_entries_array_and_wrapper() {
        let array = serde_json::json!([
            {"structure": "1", "title": "Chapter 1", "physical_index": 1},
            {"structure": "2", "title": "Chapter 2", "page": 10}
        ]);
        let items = parse_entries(array).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].page_number(), Some(10));

        let wrapped = serde_json::json!({
            "table_of_contents": [
                {"structure": "1", "title": "Chapter 1", "page": 1}
            ]
        });
        let items = parse_entries(wrapped).unwrap();
        assert_eq!(items.len(), 1);

        assert!(parse_entries(serde_json::json!("not a list")).is_err());
    }

    #[test]
    fn test_split_text_small_is_single_chunk() {
        let chunks = split_text_by_tokens("one line", 1000);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_split_text_respects_budget() {
        let text = (0..100)
            .map(|i| format!("line number {} with several words on it", i))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = split_text_by_tokens(&text, 100);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(estimate_tokens(chunk) <= 130);
        }
    }

    #[test]
    fn test_drop_boundary_duplicates() {
        let existing = vec![RawTocEntry {
            structure: Some("1.2".to_string()),
            title: "Prior  Section".to_string(),
            physical_index: None,
            level: None,
        }];
        let mut incoming = vec![
            RawTocEntry {
                structure: Some("1.2".to_string()),
                title: "prior section".to_string(),
                physical_index: None,
                level: None,
            },
            RawTocEntry {
                structure: Some("1.3".to_string()),
                title: "Fresh Section".to_string(),
                physical_index: None,
                level: None,
            },
        ];
        drop_boundary_duplicates(&existing, &mut incoming);
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].title, "Fresh Section");
    }

    #[test]
    fn test_handoff_tail_is_bounded() {
        let entries: Vec<RawTocEntry> = (0..20)
            .map(|i| RawTocEntry {
                structure: Some(format!("{}", i)),
                title: format!("Section {}", i),
                physical_index: None,
                level: None,
            })
            .collect();
        let json = handoff_json(&entries);
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), HANDOFF_TAIL);
        assert_eq!(parsed.last().unwrap()["title"], "Section 19");
    }
}
