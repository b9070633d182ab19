//! The seven-phase pipeline orchestrator.
//!
//! Phases run sequentially; only verification, gap filling and summary
//! decoration fan out, all through the LLM client's shared semaphore.
//! Two fast paths exit early: an accepted embedded outline skips the
//! contents-page phases, and an empty extraction degrades to a
//! single-node tree covering every page.

use crate::builder::{self, ItemRange};
use crate::config::Config;
use crate::decorate;
use crate::detect::{self, TocSource};
use crate::error::Result;
use crate::extract;
use crate::gaps;
use crate::llm::LlmClient;
use crate::mapping;
use crate::metrics::{Metrics, PerformanceReport, Progress, report_progress};
use crate::pdf::PdfParser;
use crate::structure::{TocItem, rebase_under};
use crate::tree::{GapFillInfo, TreeIndex, TreeNode};
use crate::verify::{self, VerifyOutcome};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where the PDF comes from.
#[derive(Debug, Clone)]
pub enum PdfSource {
    /// A filesystem path.
    Path(PathBuf),
    /// An in-memory byte stream with a display name.
    Bytes { data: Vec<u8>, name: String },
}

impl From<PathBuf> for PdfSource {
    fn from(path: PathBuf) -> Self {
        PdfSource::Path(path)
    }
}

/// Options controlling the pipeline. Defaults match common documents;
/// see each field for its effect.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// LLM model name forwarded to the client (provider default if None).
    pub model: Option<String>,
    /// Leading pages scanned for a printed contents page.
    pub toc_check_pages: usize,
    /// Page span above which a childless node may be recursed into.
    pub max_pages_per_node: usize,
    /// Token budget for body segmentation and recursion.
    pub max_tokens_per_node: usize,
    /// Cap on verification cohort size.
    pub max_verify_count: usize,
    /// Width of the client's shared LLM semaphore, which bounds every
    /// fan-out phase (verification, gap filling, summaries).
    pub verification_concurrency: usize,
    /// Disables recursion into oversized nodes.
    pub no_recursive: bool,
    /// Bypass the size-based verification downshift.
    pub force_verification: bool,
    /// Page count above which some phases auto-downshift.
    pub large_pdf_threshold: usize,
    /// Attach node_id strings.
    pub if_add_node_id: bool,
    /// Attach per-node text slices.
    pub if_add_node_text: bool,
    /// Attach per-node LLM summaries.
    pub if_add_node_summary: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            model: None,
            toc_check_pages: 20,
            max_pages_per_node: 10,
            max_tokens_per_node: 20_000,
            max_verify_count: 100,
            verification_concurrency: 20,
            no_recursive: false,
            force_verification: false,
            large_pdf_threshold: 200,
            if_add_node_id: true,
            if_add_node_text: false,
            if_add_node_summary: false,
        }
    }
}

/// The pipeline result: the tree plus the performance report.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub tree: TreeIndex,
    pub performance: PerformanceReport,
}

/// The pipeline orchestrator.
pub struct TreeIndexer {
    client: LlmClient,
    options: BuildOptions,
    metrics: Arc<Metrics>,
    cancel: CancellationToken,
    progress: Progress,
}

impl TreeIndexer {
    /// Create an indexer from validated configuration.
    pub fn new(config: &Config, options: BuildOptions) -> Self {
        let metrics = Metrics::new();
        let cancel = CancellationToken::new();
        // One shared semaphore governs every fan-out phase, sized from
        // the single user-facing concurrency option.
        let mut llm_config = config.llm.clone();
        llm_config.max_concurrency = options.verification_concurrency.max(1);
        let mut client = LlmClient::new(llm_config, Arc::clone(&metrics), cancel.clone());
        if let Some(model) = &options.model {
            client = client.with_model(model.clone());
        }
        Self {
            client,
            options,
            metrics,
            cancel,
            progress: None,
        }
    }

    /// Install a progress callback invoked at phase boundaries.
    pub fn with_progress(
        mut self,
        progress: Arc<dyn Fn(&str, &str, f64) + Send + Sync>,
    ) -> Self {
        self.progress = Some(progress);
        self
    }

    /// A token that cancels the run; phases stop at the next checkpoint
    /// and the most complete tree produced so far is returned.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The underlying LLM client (connectivity probes, diagnostics).
    pub fn client(&self) -> &LlmClient {
        &self.client
    }

    /// Run the full pipeline.
    pub async fn build(&self, source: PdfSource) -> Result<BuildOutcome> {
        let started = Instant::now();

        // Phase 1: PDF parsing (lazy; only the document skeleton here).
        let phase_start = Instant::now();
        let parser = Arc::new(self.open_parser(source)?);
        self.metrics.record_phase_duration("pdf_parsing", phase_start.elapsed());
        report_progress(
            &self.progress,
            "pdf_parsing",
            &format!("{} pages", parser.total_pages()),
            0.10,
        );

        // Phase 2: TOC source selection.
        let phase_start = Instant::now();
        let source_kind = detect::select_source(&parser, self.options.toc_check_pages);
        self.metrics.record_phase_duration("toc_detection", phase_start.elapsed());
        report_progress(&self.progress, "toc_detection", source_label(&source_kind), 0.18);

        // Phases 3-4: structure extraction and page mapping.
        let mut items = self.extract_and_map(&parser, source_kind).await?;

        if self.cancel.is_cancelled() {
            self.metrics.mark_partial();
            items.clear();
        }

        if items.is_empty() {
            // Empty extraction is not an error: one node covers everything.
            let tree = self.single_node_tree(&parser);
            report_progress(&self.progress, "tree_building", "single-node fallback", 1.0);
            return Ok(self.finish(tree, started));
        }

        // Phase 5: verification.
        let phase_start = Instant::now();
        let outcome = self.verify(&mut items, &parser).await;
        self.metrics.record_phase_duration("verification", phase_start.elapsed());
        report_progress(
            &self.progress,
            "verification",
            &format!("{}/{} confirmed", outcome.passed, outcome.cohort),
            0.58,
        );

        // Phase 6: tree building (with optional recursion).
        let phase_start = Instant::now();
        let mut roots = self.build_roots(&mut items, &parser).await;
        self.metrics.record_phase_duration("tree_building", phase_start.elapsed());
        report_progress(&self.progress, "tree_building", "tree assembled", 0.78);

        // Phase 7: gap filling.
        let phase_start = Instant::now();
        let gap_info = if self.cancel.is_cancelled() {
            self.metrics.mark_partial();
            open_gap_info(&roots, parser.total_pages())
        } else {
            let info = gaps::fill_gaps(&mut roots, &parser, &self.client, &self.cancel).await;
            if self.cancel.is_cancelled() {
                self.metrics.mark_partial();
            }
            info
        };
        self.metrics.record_phase_duration("gap_filling", phase_start.elapsed());
        report_progress(
            &self.progress,
            "gap_filling",
            &format!("{} gaps", gap_info.gaps_found),
            0.90,
        );

        // Payload decoration.
        let phase_start = Instant::now();
        self.decorate(&mut roots, &parser).await;
        self.metrics.record_phase_duration("decoration", phase_start.elapsed());
        report_progress(&self.progress, "decoration", "done", 1.0);

        let statistics = TreeIndex::statistics_for(&roots);
        let tree = TreeIndex {
            source_file: parser.source_name().to_string(),
            total_pages: parser.total_pages(),
            structure: roots,
            statistics,
            verification_accuracy: outcome.accuracy(),
            gap_fill_info: gap_info,
        };

        info!(
            sections = tree.statistics.total_nodes,
            accuracy = tree.verification_accuracy,
            "tree index built"
        );
        Ok(self.finish(tree, started))
    }

    fn open_parser(&self, source: PdfSource) -> Result<PdfParser> {
        match source {
            PdfSource::Path(path) => PdfParser::open(&path),
            PdfSource::Bytes { data, name } => PdfParser::from_bytes(data, name),
        }
    }

    /// Phases 3 and 4, per source kind. The outline fast path skips both
    /// LLM extraction and text mapping.
    async fn extract_and_map(
        &self,
        parser: &Arc<PdfParser>,
        source: TocSource,
    ) -> Result<Vec<TocItem>> {
        let phase_start = Instant::now();

        let items = match source {
            TocSource::Outline(entries) => {
                let mut items = extract::items_from_outline(&entries);
                self.metrics
                    .record_phase_duration("structure_extraction", phase_start.elapsed());
                report_progress(&self.progress, "structure_extraction", "from outline", 0.30);

                let map_start = Instant::now();
                mapping::assign_outline_pages(&mut items, parser.total_pages());
                self.metrics.record_phase_duration("page_mapping", map_start.elapsed());
                items
            }
            TocSource::PrintedToc { text, .. } => {
                let mut items = extract::items_from_printed_toc(
                    &self.client,
                    &text,
                    self.options.max_tokens_per_node,
                )
                .await?;
                self.metrics
                    .record_phase_duration("structure_extraction", phase_start.elapsed());
                report_progress(
                    &self.progress,
                    "structure_extraction",
                    "from printed contents",
                    0.30,
                );

                let map_start = Instant::now();
                mapping::map_printed_pages(&mut items, parser);
                self.metrics.record_phase_duration("page_mapping", map_start.elapsed());
                items
            }
            TocSource::Content => {
                // The body path needs the whole document parsed.
                parser.parse_all();
                let budget = self.segment_budget(parser.total_pages());
                let mut items = extract::items_from_content(
                    &self.client,
                    parser,
                    1,
                    parser.total_pages(),
                    budget,
                    None,
                )
                .await?;
                self.metrics
                    .record_phase_duration("structure_extraction", phase_start.elapsed());
                report_progress(&self.progress, "structure_extraction", "from body text", 0.30);

                let map_start = Instant::now();
                mapping::clamp_and_order(&mut items, parser);
                self.metrics.record_phase_duration("page_mapping", map_start.elapsed());
                items
            }
        };

        report_progress(
            &self.progress,
            "page_mapping",
            &format!("{} items mapped", items.len()),
            0.40,
        );
        Ok(items)
    }

    async fn verify(&self, items: &mut [TocItem], parser: &Arc<PdfParser>) -> VerifyOutcome {
        let max_count = self.effective_verify_count(parser.total_pages());
        verify::verify_items(items, parser, &self.client, max_count, &self.cancel).await
    }

    /// Assemble the tree, recursing into oversized childless items first.
    async fn build_roots(
        &self,
        items: &mut Vec<TocItem>,
        parser: &Arc<PdfParser>,
    ) -> Vec<TreeNode> {
        let total = parser.total_pages();
        let mut ranges = builder::compute_ranges(items, total);

        if !self.options.no_recursive {
            self.recurse_oversized(items, &mut ranges, parser).await;
        }

        builder::assemble(items, &ranges, total)
    }

    /// Expand oversized leaf items in place by re-running content
    /// extraction over their page span, continuing the parent's code.
    async fn recurse_oversized(
        &self,
        items: &mut Vec<TocItem>,
        ranges: &mut Vec<ItemRange>,
        parser: &Arc<PdfParser>,
    ) {
        let oversized = builder::oversized_leaves(items, ranges, self.options.max_pages_per_node);
        if oversized.is_empty() {
            return;
        }
        debug!(count = oversized.len(), "recursing into oversized nodes");

        // Splice back-to-front so earlier indices stay valid.
        for &index in oversized.iter().rev() {
            if self.cancel.is_cancelled() {
                self.metrics.mark_partial();
                break;
            }

            let parent_code = items[index].structure.clone();
            let ItemRange { start, end } = ranges[index];

            let sub_items = match extract::items_from_content(
                &self.client,
                parser,
                start,
                end,
                self.options.max_tokens_per_node,
                Some(&parent_code),
            )
            .await
            {
                Ok(sub) => sub,
                Err(e) => {
                    warn!(index, error = %e, "recursion extraction failed; node left flat");
                    continue;
                }
            };

            let parent_title_key = items[index].title.to_lowercase();
            let mut sub_items: Vec<TocItem> = sub_items
                .into_iter()
                .filter(|s| s.title.to_lowercase() != parent_title_key)
                .collect();
            if sub_items.is_empty() {
                continue;
            }

            rebase_under(&mut sub_items, &parent_code);
            for sub in &mut sub_items {
                let page = sub.physical_index.unwrap_or(start).clamp(start, end);
                sub.physical_index = Some(page);
            }

            items.splice(index + 1..index + 1, sub_items);
        }

        for (i, item) in items.iter_mut().enumerate() {
            item.list_index = Some(i);
        }
        *ranges = builder::compute_ranges(items, parser.total_pages());
    }

    async fn decorate(&self, roots: &mut [TreeNode], parser: &Arc<PdfParser>) {
        if self.options.if_add_node_id {
            decorate::assign_node_ids(roots);
        }
        if self.options.if_add_node_text {
            decorate::attach_text(roots, parser);
        }
        if self.options.if_add_node_summary && !self.cancel.is_cancelled() {
            decorate::attach_summaries(roots, parser, &self.client, &self.cancel).await;
        }
    }

    /// Single-node whole-document tree for structureless input.
    fn single_node_tree(&self, parser: &Arc<PdfParser>) -> TreeIndex {
        let title = parser
            .document_title()
            .unwrap_or_else(|| parser.source_name().to_string());
        let total = parser.total_pages();
        let mut roots = vec![TreeNode::new(title, 1, total)];
        if self.options.if_add_node_id {
            decorate::assign_node_ids(&mut roots);
        }
        if self.options.if_add_node_text {
            decorate::attach_text(&mut roots, parser);
        }

        let statistics = TreeIndex::statistics_for(&roots);
        TreeIndex {
            source_file: parser.source_name().to_string(),
            total_pages: total,
            structure: roots,
            statistics,
            verification_accuracy: 1.0,
            gap_fill_info: GapFillInfo {
                gaps_found: 0,
                gaps_filled: Vec::new(),
                original_coverage: format!("{}/{}", total, total),
                coverage_percentage: 100.0,
            },
        }
    }

    /// The verification budget, downshifted for very large documents.
    fn effective_verify_count(&self, total_pages: usize) -> usize {
        if self.options.force_verification {
            return self.options.max_verify_count;
        }
        if total_pages > self.options.large_pdf_threshold {
            (self.options.max_verify_count / 2).max(1)
        } else {
            self.options.max_verify_count
        }
    }

    /// The segmentation token budget, doubled for very large documents
    /// so fewer round trips cover the body.
    fn segment_budget(&self, total_pages: usize) -> usize {
        if total_pages > self.options.large_pdf_threshold && !self.options.force_verification {
            self.options.max_tokens_per_node * 2
        } else {
            self.options.max_tokens_per_node
        }
    }

    fn finish(&self, tree: TreeIndex, started: Instant) -> BuildOutcome {
        BuildOutcome {
            tree,
            performance: self.metrics.finish(started),
        }
    }
}

/// Gap info when filling was skipped by cancellation.
fn open_gap_info(roots: &[TreeNode], total_pages: usize) -> GapFillInfo {
    let covered = gaps::covered_page_count(roots, total_pages);
    let detected = gaps::detect_gaps(roots, total_pages);
    GapFillInfo {
        gaps_found: detected.len(),
        gaps_filled: Vec::new(),
        original_coverage: format!("{}/{}", covered, total_pages),
        coverage_percentage: if total_pages == 0 {
            100.0
        } else {
            covered as f64 / total_pages as f64 * 100.0
        },
    }
}

fn source_label(source: &TocSource) -> &'static str {
    match source {
        TocSource::Outline(_) => "embedded outline",
        TocSource::PrintedToc { .. } => "printed contents page",
        TocSource::Content => "content-based",
    }
}

/// Convenience entry point: build a tree with explicit configuration.
pub async fn build_tree(
    source: PdfSource,
    config: &Config,
    options: BuildOptions,
) -> Result<BuildOutcome> {
    config.validate()?;
    let indexer = TreeIndexer::new(config, options);
    indexer.build(source).await
}
