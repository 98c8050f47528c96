//! dcmi - DICOM series crawler
//!
//! `crawl` builds (or reloads) the index for a directory tree, `query` finds
//! series chains by modality, `tree` prints the whole series forest.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dcmi_common::config::{
    load_config, resolve_dataset_name, resolve_index_dir, resolve_setting, TomlConfig, WORKERS_ENV_VAR,
};
use dcmi_crawl::forest::{render_matches, render_tree, MatchSummary};
use dcmi_crawl::models::ModalitySet;
use dcmi_crawl::{CrawlOutcome, Crawler, DicomTagReader, FileScanner, Forest, IndexStore, QueryEngine};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "dcmi")]
#[command(about = "Index DICOM series and query their reference chains")]
#[command(version)]
struct Cli {
    /// Config file (overrides DCMI_CONFIG and the platform default)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl a directory tree and persist its index
    Crawl {
        #[command(flatten)]
        target: Target,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Find series chains covering a set of modalities
    Query {
        #[command(flatten)]
        target: Target,

        /// Comma-separated modalities, e.g. CT,RTSTRUCT
        modalities: String,

        /// Merge matches sharing a root into one result
        #[arg(long)]
        group_by_root: bool,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the series forest and any orphans
    Tree {
        #[command(flatten)]
        target: Target,
    },
}

#[derive(Args, Debug)]
struct Target {
    /// Root of the DICOM directory tree
    root: PathBuf,

    /// Crawl again even when a persisted index exists
    #[arg(long)]
    force: bool,

    /// Classification workers (default: one per core)
    #[arg(long)]
    workers: Option<usize>,

    /// Directory holding persisted indexes
    #[arg(long)]
    index_dir: Option<PathBuf>,

    /// Dataset name under the index directory
    #[arg(long)]
    dataset: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("dcmi {}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Crawl { target, json } => {
            let outcome = crawl(&config, &target).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome.report)?);
            } else {
                print!("{}", outcome.report);
            }
        }
        Command::Query {
            target,
            modalities,
            group_by_root,
            json,
        } => {
            let wanted = ModalitySet::parse_list(&modalities);
            if wanted.is_empty() {
                warn!("Empty modality list, every branch matches");
            }
            let outcome = crawl(&config, &target).await?;
            let forest = Forest::from_index(&outcome.series).context("Failed to build series forest")?;
            let matches = QueryEngine::new(&forest).query(&wanted, group_by_root);
            info!(query = %wanted, results = matches.len(), "Query complete");

            if json {
                let summaries: Vec<MatchSummary> = matches.iter().map(|m| m.summarize(&forest)).collect();
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else {
                print!("{}", render_matches(&forest, &matches));
            }
        }
        Command::Tree { target } => {
            let outcome = crawl(&config, &target).await?;
            let forest = Forest::from_index(&outcome.series).context("Failed to build series forest")?;
            print!("{}", render_tree(&forest));
        }
    }

    Ok(())
}

/// Run the blocking crawl off the async runtime; Ctrl+C cancels it
async fn crawl(config: &TomlConfig, target: &Target) -> Result<CrawlOutcome> {
    let root = target.root.clone();
    let crawler = build_crawler(config, target, &root);

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, cancelling crawl");
            signal_token.cancel();
        }
    });

    let worker_token = cancel.clone();
    let result = tokio::task::spawn_blocking(move || crawler.run(&root, &worker_token))
        .await
        .context("Crawl task failed")?;
    signal_task.abort();

    result.with_context(|| format!("Crawl of {} failed", target.root.display()))
}

fn build_crawler(config: &TomlConfig, target: &Target, root: &Path) -> Crawler<DicomTagReader> {
    let index_dir = resolve_index_dir(target.index_dir.as_deref(), &config.index, root);
    let dataset = resolve_dataset_name(target.dataset.as_deref(), &config.index, root);
    let workers = resolve_setting(
        "workers",
        target.workers,
        WORKERS_ENV_VAR,
        config.crawl.workers,
        0,
    );
    info!(index_dir = %index_dir.display(), dataset = %dataset, workers, "Crawl settings");

    Crawler::new(DicomTagReader::new(), IndexStore::new(&index_dir, &dataset))
        .with_scanner(FileScanner::from_settings(&config.crawl))
        .with_workers(Some(workers))
        .with_force(target.force)
}
