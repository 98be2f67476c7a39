//! Statistics generation from crawl database
//!
//! This module provides functionality for extracting and displaying
//! stored crawl statistics (`--stats`).

use crate::storage::{RunRecord, SqliteDedupStore, StoreResult};

/// Number of recent runs shown by `--stats`
pub const RECENT_RUNS: usize = 5;

/// Stored crawl statistics summary
#[derive(Debug, Clone)]
pub struct CrawlStatistics {
    /// Pages with a committed record
    pub committed_pages: u64,

    /// URLs recorded as permanently unfetchable
    pub failed_urls: u64,

    /// Tasks saved for the next run
    pub pending_tasks: u64,

    /// URLs claimed by a crawl that is running or was killed
    pub in_flight_claims: u64,

    /// Most recent runs, newest first
    pub recent_runs: Vec<RunRecord>,
}

/// Loads statistics from storage
pub async fn load_statistics(store: &SqliteDedupStore) -> StoreResult<CrawlStatistics> {
    Ok(CrawlStatistics {
        committed_pages: store.count_committed().await?,
        failed_urls: store.count_failed().await?,
        pending_tasks: store.count_pending().await?,
        in_flight_claims: store.count_claimed().await?,
        recent_runs: store.latest_runs(RECENT_RUNS).await?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics ===\n");

    println!("Overview:");
    println!("  Committed pages: {}", stats.committed_pages);
    println!("  Failed URLs: {}", stats.failed_urls);
    println!("  Pending tasks: {}", stats.pending_tasks);
    println!("  In-flight claims: {}", stats.in_flight_claims);
    println!();

    if stats.recent_runs.is_empty() {
        println!("No crawl runs recorded.");
        return;
    }

    println!("Recent Runs:");
    for run in &stats.recent_runs {
        println!(
            "  #{} {} started {} finished {} (committed {}, skipped {}, failed {})",
            run.id,
            run.status.to_db_string(),
            run.started_at,
            run.finished_at.as_deref().unwrap_or("-"),
            run.committed,
            run.skipped,
            run.failed
        );
    }
    println!();

    let attempted = stats.committed_pages + stats.failed_urls;
    if attempted > 0 {
        let success_rate = stats.committed_pages as f64 / attempted as f64 * 100.0;
        println!("Success Rate: {:.1}%", success_rate);
    }
}
