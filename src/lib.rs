//! pdf-tree-index — LLM-assisted hierarchical TOC extraction for PDFs.
//!
//! This library transforms a PDF document into a table-of-contents tree
//! in which every node carries a title, a contiguous 1-based page range,
//! and optional text/summary payload. The tree serves as the index for
//! vectorless retrieval: downstream components navigate it by LLM
//! reasoning instead of embedding similarity.
//!
//! # Pipeline
//!
//! Seven phases run in sequence, with two early-exit fast paths:
//!
//! 1. **PDF parsing** — lazy per-page text with boundary sentinels.
//! 2. **TOC source selection** — embedded outline, printed contents
//!    page, or content-based reconstruction.
//! 3. **Structure extraction** — a flat ordered item list with dotted
//!    hierarchical codes.
//! 4. **Page mapping** — physical page resolution with offset correction.
//! 5. **Verification** — deepest-first title confirmation with
//!    self-healing, under bounded concurrency.
//! 6. **Tree building** — page-range arithmetic, nesting under the depth
//!    cap, parent expansion.
//! 7. **Gap filling** — supplementary sub-trees so leaves cover every
//!    page.
//!
//! # Quick Start
//!
//! ```no_run
//! use pdf_tree_index::{BuildOptions, Config, PdfSource, build_tree};
//! use std::path::PathBuf;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let outcome = build_tree(
//!         PdfSource::Path(PathBuf::from("report.pdf")),
//!         &config,
//!         BuildOptions::default(),
//!     )
//!     .await?;
//!
//!     println!("{}", outcome.tree.format());
//!     println!("accuracy: {:.2}", outcome.tree.verification_accuracy);
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod config;
pub mod decorate;
pub mod detect;
pub mod document;
pub mod error;
pub mod extract;
pub mod gaps;
pub mod llm;
pub mod mapping;
pub mod metrics;
pub mod pdf;
pub mod pipeline;
pub mod structure;
pub mod tree;
pub mod verify;

// Re-export commonly used types
pub use config::{Config, Provider};
pub use error::{Result, TreeIndexError};
pub use llm::LlmClient;
pub use metrics::PerformanceReport;
pub use pdf::PdfParser;
pub use pipeline::{BuildOptions, BuildOutcome, PdfSource, TreeIndexer, build_tree};
pub use structure::TocItem;
pub use tree::{GapFillInfo, TreeIndex, TreeNode, TreeStatistics};
