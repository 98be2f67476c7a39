//! Crawler module for web page fetching and processing
//!
//! This module contains the core crawling logic, including:
//! - The frontier of pending crawl tasks
//! - Page fetching with transient/permanent error classification
//! - HTML parsing, text extraction and link extraction
//! - The per-task fetch-extract-persist pipeline with bounded retry
//! - Overall crawl coordination over a worker pool

mod coordinator;
mod fetcher;
mod frontier;
mod parser;
mod pipeline;
mod retry;

pub use coordinator::Coordinator;
pub use fetcher::{build_http_client, FetchError, HttpFetcher, LoadedPage, PageFetcher};
pub use frontier::{CrawlTask, Frontier};
pub use parser::{parse_html, ParsedPage};
pub use pipeline::{Pipeline, ProcessError, ProcessOutcome};
pub use retry::RetryPolicy;

use crate::config::Config;
use crate::output::CrawlReport;
use crate::storage::{DedupStore, RunStatus, SqliteDedupStore};
use crate::url::normalize_url;
use crate::CrawlError;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Options for a CLI crawl
#[derive(Debug, Clone, Default)]
pub struct CrawlOptions {
    /// Discard tasks saved by an earlier, interrupted crawl
    pub fresh: bool,

    /// SHA-256 of the configuration file, stored on the run row
    pub config_hash: String,

    /// Raised to stop the crawl (Ctrl-C)
    pub cancel: CancellationToken,
}

/// Runs a complete crawl operation
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Open the SQLite store and recover from an interrupted run
/// 2. Reload saved pending tasks (unless `fresh`)
/// 3. Record a new crawl run
/// 4. Build the HTTP fetcher
/// 5. Run the coordinator over the seeds
/// 6. Complete the run row with the final counts
///
/// # Example
///
/// ```no_run
/// use scoped_crawler::config::load_config;
/// use scoped_crawler::crawler::{run_crawl, CrawlOptions};
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new("config.toml"))?;
/// let report = run_crawl(config, CrawlOptions::default()).await?;
/// println!("{}", report);
/// # Ok(())
/// # }
/// ```
pub async fn run_crawl(config: Config, options: CrawlOptions) -> Result<CrawlReport, CrawlError> {
    let concurrency = config.crawler.concurrency;
    let pool_size = config.store.effective_pool_size(concurrency);

    let store = Arc::new(SqliteDedupStore::open(
        Path::new(&config.store.database_path),
        config.store.company_id,
        pool_size as usize,
    )?);

    let pending = if options.fresh {
        let cleared = store.clear_pending().await?;
        if cleared > 0 {
            tracing::info!("Discarded {} saved tasks (--fresh)", cleared);
        }
        Vec::new()
    } else {
        store.load_pending().await?
    };

    let seeds = config
        .seeds
        .iter()
        .map(|seed| normalize_url(seed, &config.normalize))
        .collect::<Result<Vec<_>, _>>()?;

    let run_id = store.create_run(&options.config_hash).await?;
    tracing::info!("Starting crawl run {} ({} seeds)", run_id, seeds.len());

    let fetcher = Arc::new(HttpFetcher::from_config(
        &config.user_agent,
        Duration::from_secs(config.crawler.fetch_timeout_secs),
    )?);

    let coordinator = Coordinator::new(&config, fetcher, store.clone(), options.cancel.clone())?;
    coordinator.resume(pending);

    let report = coordinator.run(&seeds, concurrency as usize).await;

    let status = if report.failure.is_some() {
        RunStatus::Failed
    } else if options.cancel.is_cancelled() {
        RunStatus::Interrupted
    } else {
        RunStatus::Completed
    };
    store
        .complete_run(run_id, status, report.run_counts())
        .await?;
    store.close();

    Ok(report)
}
