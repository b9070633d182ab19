//! Verification: confirm mapped titles actually appear on their pages.
//!
//! Extraction and mapping are both noisy; this is the last line of
//! defence before the tree is built. The verification budget goes to the
//! deepest items first — chapter titles are usually easy, fine-grained
//! subsections are where extraction errs. Concurrency is governed by the
//! LLM client's shared semaphore; results are written back by
//! `list_index`, never by completion order.

use crate::llm::{LlmClient, Prompts};
use crate::mapping::{find_title_in_window, title_position};
use crate::pdf::PdfParser;
use crate::structure::TocItem;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const PHASE: &str = "verification";

/// Smart-fixer search radius in pages.
const FIX_NEIGHBORHOOD: usize = 3;

/// Fraction of the page counted as "the top"; a title found below it
/// starts mid-page.
const TOP_FRACTION: f64 = 0.3;

/// Outcome of the verification phase.
#[derive(Debug, Clone, Default)]
pub struct VerifyOutcome {
    /// Items whose title was confirmed on their mapped page.
    pub passed: usize,
    /// Items actually dispatched for verification.
    pub cohort: usize,
}

impl VerifyOutcome {
    /// Quality signal, not a correctness gate.
    pub fn accuracy(&self) -> f64 {
        if self.cohort == 0 {
            1.0
        } else {
            self.passed as f64 / self.cohort as f64
        }
    }
}

/// Result of verifying one item, keyed back by its position.
struct ItemVerdict {
    index: usize,
    passed: bool,
    appear_start: Option<bool>,
    corrected_page: Option<usize>,
}

/// Verify up to `max_verify_count` items, deepest level first.
///
/// Every LLM round trip goes through the client's shared semaphore, so
/// fan-out here is bounded by the one configured concurrency knob.
pub async fn verify_items(
    items: &mut [TocItem],
    parser: &Arc<PdfParser>,
    client: &LlmClient,
    max_verify_count: usize,
    cancel: &CancellationToken,
) -> VerifyOutcome {
    let mut cohort: Vec<usize> = (0..items.len())
        .filter(|&i| items[i].physical_index.is_some())
        .collect();
    // Level descending, then position ascending.
    cohort.sort_by(|&a, &b| {
        items[b]
            .level()
            .cmp(&items[a].level())
            .then(a.cmp(&b))
    });
    cohort.truncate(max_verify_count);

    let mut join_set: JoinSet<ItemVerdict> = JoinSet::new();
    let mut dispatched = 0usize;

    for &index in &cohort {
        if cancel.is_cancelled() {
            break;
        }

        let title = items[index].title.clone();
        let page = items[index].physical_index.unwrap_or(1);
        let parser = Arc::clone(parser);
        let client = client.clone();

        dispatched += 1;
        join_set.spawn(async move { verify_one(index, &title, page, &parser, &client).await });
    }

    let mut verdicts: Vec<ItemVerdict> = Vec::with_capacity(dispatched);
    while let Some(result) = join_set.join_next().await {
        match result {
            Ok(verdict) => verdicts.push(verdict),
            Err(e) => warn!(error = %e, "verification task panicked"),
        }
    }

    // Input order, not arrival order.
    verdicts.sort_by_key(|v| v.index);

    let mut passed = 0usize;
    for verdict in verdicts {
        let item = &mut items[verdict.index];
        item.validation_passed = Some(verdict.passed);
        if verdict.appear_start.is_some() {
            item.appear_start = verdict.appear_start;
        }
        if let Some(page) = verdict.corrected_page {
            debug!(title = %item.title, page, "smart fixer re-bound item");
            item.physical_index = Some(page);
        }
        if verdict.passed {
            passed += 1;
        }
    }

    VerifyOutcome {
        passed,
        cohort: dispatched,
    }
}

/// Verify one item: local existence check, LLM arbiter, then the ±K
/// smart fixer.
async fn verify_one(
    index: usize,
    title: &str,
    page: usize,
    parser: &Arc<PdfParser>,
    client: &LlmClient,
) -> ItemVerdict {
    // Existence + position, locally.
    let page_text = parser.page(page).text.clone();
    if let Some(fraction) = title_position(&page_text, title) {
        return ItemVerdict {
            index,
            passed: true,
            appear_start: if fraction > TOP_FRACTION {
                Some(true)
            } else {
                None
            },
            corrected_page: None,
        };
    }

    // Local matching failed; let the LLM arbitrate fuzzy cases the
    // normalised comparison cannot see (hyphenation, OCR noise).
    if !page_text.trim().is_empty() && llm_title_check(client, title, &page_text).await {
        return ItemVerdict {
            index,
            passed: true,
            appear_start: None,
            corrected_page: None,
        };
    }

    // Smart fixer: search the neighbourhood.
    let start = page.saturating_sub(FIX_NEIGHBORHOOD).max(1);
    let end = page + FIX_NEIGHBORHOOD;
    if let Some((found, fraction)) = find_title_in_window(parser, title, start, end) {
        return ItemVerdict {
            index,
            passed: true,
            appear_start: if fraction > TOP_FRACTION {
                Some(true)
            } else {
                None
            },
            corrected_page: Some(found),
        };
    }

    // LLM fixer over the same neighbourhood.
    if let Some(found) = llm_index_fix(client, parser, title, start, end).await {
        return ItemVerdict {
            index,
            passed: true,
            appear_start: None,
            corrected_page: Some(found),
        };
    }

    ItemVerdict {
        index,
        passed: false,
        appear_start: None,
        corrected_page: None,
    }
}

/// Ask the LLM whether the title appears on the page.
async fn llm_title_check(client: &LlmClient, title: &str, page_text: &str) -> bool {
    let prompt = Prompts::check_title_appearance()
        .replace("{title}", title)
        .replace("{page_text}", page_text);

    let value = match client
        .complete_json(PHASE, Some(Prompts::system_document_analyzer()), &prompt)
        .await
    {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "title appearance check failed");
            return false;
        }
    };

    value
        .get("answer")
        .and_then(|a| a.as_str())
        .map(|a| a.trim().eq_ignore_ascii_case("yes"))
        .unwrap_or(false)
}

/// Ask the LLM to locate the section start inside a page window.
async fn llm_index_fix(
    client: &LlmClient,
    parser: &Arc<PdfParser>,
    title: &str,
    start: usize,
    end: usize,
) -> Option<usize> {
    let window_text = parser.tagged_range(start, end);
    if window_text.trim().is_empty() {
        return None;
    }

    let prompt = format!(
        "{}\n\nGiven pages:\n{}",
        Prompts::single_item_index_fixer().replace("{title}", title),
        window_text
    );

    let value = client
        .complete_json(PHASE, Some(Prompts::system_document_analyzer()), &prompt)
        .await
        .ok()?;

    let reported = value.get("physical_index")?;
    let page = match reported {
        serde_json::Value::Number(n) => n.as_u64().map(|n| n as usize),
        serde_json::Value::String(s) => crate::document::parse_physical_index(s),
        _ => None,
    }?;

    // The fixer may only move the item inside the window it saw.
    if (start..=end.min(parser.total_pages())).contains(&page) {
        Some(page)
    } else {
        None
    }
}
