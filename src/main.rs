//! Scoped crawler main entry point
//!
//! This is the command-line interface for the scoped crawler.

use anyhow::Context;
use clap::Parser;
use scoped_crawler::config::{load_config_with_hash, Config};
use scoped_crawler::crawler::{run_crawl, CrawlOptions};
use scoped_crawler::output::{load_statistics, print_report, print_statistics};
use scoped_crawler::storage::SqliteDedupStore;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Scoped crawler: a bounded, resumable site crawler
///
/// Crawls outward from seed URLs, keeps discovered links inside the
/// configured scope, and stores each page's extracted text exactly once.
#[derive(Parser, Debug)]
#[command(name = "scoped-crawler")]
#[command(version = "1.0.0")]
#[command(about = "A bounded, resumable site crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Start a fresh crawl, discarding tasks saved by an interrupted run
    #[arg(long)]
    fresh: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
        return Ok(ExitCode::SUCCESS);
    }
    if cli.stats {
        handle_stats(&config).await?;
        return Ok(ExitCode::SUCCESS);
    }

    handle_crawl(config, cli.fresh, config_hash).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("scoped_crawler=info,warn"),
            1 => EnvFilter::new("scoped_crawler=debug,info"),
            2 => EnvFilter::new("scoped_crawler=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the effective configuration and seeds
fn handle_dry_run(config: &Config) {
    println!("=== Scoped Crawler Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Concurrency: {}", config.crawler.concurrency);
    println!("  Retry budget: {}", config.crawler.retry_budget);
    println!(
        "  Backoff: {}ms (max {}ms)",
        config.crawler.retry_backoff_ms, config.crawler.max_backoff_ms
    );
    println!("  Fetch timeout: {}s", config.crawler.fetch_timeout_secs);
    println!("  Commit timeout: {}s", config.crawler.commit_timeout_secs);
    println!("  Extraction: {:?}", config.crawler.extraction);
    match config.crawler.max_pages {
        Some(max) => println!("  Max pages: {}", max),
        None => println!("  Max pages: unlimited"),
    }
    println!(
        "  Store failure threshold: {}",
        config.crawler.effective_store_failure_threshold()
    );

    println!("\nUser Agent:");
    println!("  {}", config.user_agent.header_value());

    println!("\nStore:");
    println!("  Database: {}", config.store.database_path);
    println!("  Company id: {}", config.store.company_id);
    println!(
        "  Pool size: {}",
        config.store.effective_pool_size(config.crawler.concurrency)
    );

    println!("\nFilter:");
    println!("  Domain scope: {:?}", config.filter.domain_scope);
    println!(
        "  Excluded extensions: {}",
        config.filter.excluded_extensions.join(", ")
    );
    println!(
        "  Excluded path patterns: {}",
        config.filter.excluded_path_patterns.len()
    );
    println!("  Excluded keywords: {}", config.filter.excluded_keywords.len());
    println!(
        "  Excluded subdomains: {}",
        config.filter.excluded_subdomains.len()
    );

    println!("\nSeeds ({}):", config.seeds.len());
    for seed in &config.seeds {
        println!("  - {}", seed);
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the database
async fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.store.database_path);

    let store = SqliteDedupStore::open_for_inspection(
        Path::new(&config.store.database_path),
        config.store.company_id,
    )
    .context("failed to open crawl database")?;

    let stats = load_statistics(&store).await?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, fresh: bool, config_hash: String) -> anyhow::Result<ExitCode> {
    if fresh {
        tracing::info!("Starting fresh crawl (discarding saved tasks)");
    } else {
        tracing::info!("Starting crawl (will resume saved tasks)");
    }

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight pages");
            signal_token.cancel();
        }
    });

    let report = run_crawl(
        config,
        CrawlOptions {
            fresh,
            config_hash,
            cancel,
        },
    )
    .await
    .context("crawl failed")?;

    print_report(&report);

    if report.is_success() {
        tracing::info!("Crawl completed");
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::error!(
            "Crawl failed: {}",
            report.failure.as_deref().unwrap_or("unknown")
        );
        Ok(ExitCode::FAILURE)
    }
}
