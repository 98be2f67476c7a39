//! Output module for crawl reports and statistics
//!
//! This module handles:
//! - The end-of-crawl report (committed, skipped, failed counts)
//! - Displaying stored crawl statistics

pub mod stats;

pub use stats::{load_statistics, print_statistics, CrawlStatistics};

use crate::storage::RunCounts;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Outcome of a crawl
///
/// A crawl always terminates with a report; `failure` is set when a
/// crawl-wide condition (such as the store being down for every worker)
/// stopped it early.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlReport {
    /// Pages persisted by this crawl
    pub committed: u64,
    /// Tasks skipped because the URL was already claimed or committed
    pub skipped_duplicate: u64,
    /// URLs that ended permanently failed
    pub permanently_failed: u64,
    /// Discovered links rejected by the filter
    pub filtered_out: u64,
    /// Fetch retries after transient failures
    pub retried: u64,
    /// Tasks put back in the frontier after a persistence failure
    pub requeued: u64,
    /// Tasks aborted by cancellation
    pub cancelled: u64,
    /// Crawl-level failure, if any
    pub failure: Option<String>,
    pub elapsed: Duration,
}

impl CrawlReport {
    /// True when no crawl-level failure occurred
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Counts written to the run row
    pub fn run_counts(&self) -> RunCounts {
        RunCounts {
            committed: self.committed,
            skipped: self.skipped_duplicate,
            failed: self.permanently_failed,
        }
    }
}

impl fmt::Display for CrawlReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Crawl Report ===")?;
        writeln!(f, "  Committed: {}", self.committed)?;
        writeln!(f, "  Skipped (duplicate): {}", self.skipped_duplicate)?;
        writeln!(f, "  Permanently failed: {}", self.permanently_failed)?;
        writeln!(f, "  Filtered out: {}", self.filtered_out)?;
        writeln!(f, "  Retried: {}", self.retried)?;
        writeln!(f, "  Requeued: {}", self.requeued)?;
        writeln!(f, "  Cancelled: {}", self.cancelled)?;
        writeln!(f, "  Elapsed: {:.1}s", self.elapsed.as_secs_f64())?;
        if let Some(failure) = &self.failure {
            writeln!(f, "  Crawl failed: {}", failure)?;
        }
        Ok(())
    }
}

/// Prints the crawl report to stdout
pub fn print_report(report: &CrawlReport) {
    print!("{}", report);
}

/// Live counters shared by the workers of one crawl
#[derive(Debug, Default)]
pub(crate) struct ReportCounters {
    pub committed: AtomicU64,
    pub skipped_duplicate: AtomicU64,
    pub permanently_failed: AtomicU64,
    pub filtered_out: AtomicU64,
    pub requeued: AtomicU64,
    pub cancelled: AtomicU64,
}

impl ReportCounters {
    pub fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::SeqCst);
    }

    pub fn snapshot(&self, retried: u64, failure: Option<String>, elapsed: Duration) -> CrawlReport {
        CrawlReport {
            committed: self.committed.load(Ordering::SeqCst),
            skipped_duplicate: self.skipped_duplicate.load(Ordering::SeqCst),
            permanently_failed: self.permanently_failed.load(Ordering::SeqCst),
            filtered_out: self.filtered_out.load(Ordering::SeqCst),
            retried,
            requeued: self.requeued.load(Ordering::SeqCst),
            cancelled: self.cancelled.load(Ordering::SeqCst),
            failure,
            elapsed,
        }
    }
}
