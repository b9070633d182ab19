//! tree-index CLI
//!
//! Builds hierarchical TOC trees from PDF documents and inspects the
//! results. The core writes nothing on its own; this binary is the
//! caller that persists trees as JSON.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pdf_tree_index::{
    BuildOptions, Config, PdfSource, TreeIndex, TreeIndexer,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Build hierarchical table-of-contents trees from PDF documents
#[derive(Parser)]
#[command(name = "tree-index")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a TOC tree for a PDF document
    Build {
        /// Path to the PDF file
        pdf: PathBuf,

        /// Output path for the tree JSON (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// LLM model name (provider default if omitted)
        #[arg(long)]
        model: Option<String>,

        /// Leading pages scanned for a printed contents page
        #[arg(long, default_value_t = 20)]
        toc_check_pages: usize,

        /// Page span above which childless nodes are recursed into
        #[arg(long, default_value_t = 10)]
        max_pages_per_node: usize,

        /// Cap on verified items
        #[arg(long, default_value_t = 100)]
        max_verify_count: usize,

        /// Concurrent verification / summary calls
        #[arg(long, default_value_t = 20)]
        concurrency: usize,

        /// Disable recursion into oversized nodes
        #[arg(long)]
        no_recursive: bool,

        /// Verify even for very large documents
        #[arg(long)]
        force_verification: bool,

        /// Attach per-node text slices
        #[arg(long)]
        with_text: bool,

        /// Attach per-node LLM summaries
        #[arg(long)]
        with_summaries: bool,
    },

    /// Display the tree structure of a saved index
    Show {
        /// Path to the tree JSON file
        index: PathBuf,

        /// Output raw JSON instead of the formatted tree
        #[arg(long)]
        json: bool,
    },

    /// Show statistics for a saved index
    Info {
        /// Path to the tree JSON file
        index: PathBuf,
    },

    /// Test LLM connectivity
    Test,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            pdf,
            output,
            model,
            toc_check_pages,
            max_pages_per_node,
            max_verify_count,
            concurrency,
            no_recursive,
            force_verification,
            with_text,
            with_summaries,
        } => {
            let options = BuildOptions {
                model,
                toc_check_pages,
                max_pages_per_node,
                max_verify_count,
                verification_concurrency: concurrency,
                no_recursive,
                force_verification,
                if_add_node_text: with_text,
                if_add_node_summary: with_summaries,
                ..Default::default()
            };
            cmd_build(pdf, output, options).await
        }
        Commands::Show { index, json } => cmd_show(index, json),
        Commands::Info { index } => cmd_info(index),
        Commands::Test => cmd_test().await,
    }
}

async fn cmd_build(pdf: PathBuf, output: Option<PathBuf>, options: BuildOptions) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    eprintln!("Indexing document: {}", pdf.display());

    let start = Instant::now();
    let indexer = TreeIndexer::new(&config, options).with_progress(Arc::new(
        |phase: &str, message: &str, fraction: f64| {
            eprintln!("  [{:>3.0}%] {}: {}", fraction * 100.0, phase, message);
        },
    ));

    let outcome = indexer
        .build(PdfSource::Path(pdf))
        .await
        .context("Failed to build tree index")?;

    let duration = start.elapsed();
    let tree = &outcome.tree;

    eprintln!();
    eprintln!("Tree index built:");
    eprintln!("  Pages:       {}", tree.total_pages);
    eprintln!("  Sections:    {}", tree.statistics.total_nodes);
    eprintln!("  Max depth:   {}", tree.statistics.max_depth);
    eprintln!("  Accuracy:    {:.2}", tree.verification_accuracy);
    eprintln!(
        "  Coverage:    {} -> {:.1}%",
        tree.gap_fill_info.original_coverage, tree.gap_fill_info.coverage_percentage
    );
    eprintln!("  LLM calls:   {}", outcome.performance.total_llm_calls());
    eprintln!("  Build time:  {:.2?}", duration);
    if outcome.performance.partial {
        eprintln!("  NOTE: partial result (cancelled or budget exhausted)");
    }

    let json = tree.to_json().context("Failed to serialize tree")?;
    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.exists() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("Failed to create {}", parent.display()))?;
                }
            }
            std::fs::write(&path, &json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("\nIndex saved to: {}", path.display());
        }
        None => println!("{}", json),
    }

    Ok(())
}

fn load_index(path: &PathBuf) -> Result<TreeIndex> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    TreeIndex::from_json(&json).context("Failed to parse tree index")
}

fn cmd_show(index_path: PathBuf, json: bool) -> Result<()> {
    let tree = load_index(&index_path)?;
    if json {
        println!("{}", tree.to_json()?);
    } else {
        println!("{}", tree.format());
    }
    Ok(())
}

fn cmd_info(index_path: PathBuf) -> Result<()> {
    let tree = load_index(&index_path)?;

    println!("Tree Index Information");
    println!("{}", "─".repeat(40));
    println!("  Document:     {}", tree.source_file);
    println!("  Total pages:  {}", tree.total_pages);
    println!("  Root nodes:   {}", tree.statistics.root_nodes);
    println!("  Sections:     {}", tree.statistics.total_nodes);
    println!("  Max depth:    {}", tree.statistics.max_depth);
    println!("  Accuracy:     {:.2}", tree.verification_accuracy);
    println!(
        "  Gaps filled:  {} ({})",
        tree.gap_fill_info.gaps_found, tree.gap_fill_info.original_coverage
    );

    Ok(())
}

async fn cmd_test() -> Result<()> {
    println!("Testing LLM connection...\n");

    let config = Config::load().context("Failed to load configuration")?;

    println!("Configuration:");
    println!("  Provider:  {:?}", config.llm.provider);
    println!("  API Base:  {}", config.llm.api_base);
    println!("  Model:     {}", config.llm.model);
    println!(
        "  API Key:   {}...",
        &config.llm.api_key[..config.llm.api_key.len().min(8)]
    );
    println!();

    if let Err(e) = config.validate() {
        println!("Configuration error: {}", e);
        return Ok(());
    }

    let indexer = TreeIndexer::new(&config, BuildOptions::default());

    println!("Sending test request...");
    match indexer.client().test_connection().await {
        Ok(()) => println!("Connection successful!"),
        Err(e) => println!("Connection failed: {}", e),
    }

    Ok(())
}
