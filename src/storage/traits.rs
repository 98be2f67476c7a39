//! Storage traits and error types
//!
//! This module defines the dedup store contract used by the pipeline and the
//! frontier, together with its error type.

use crate::crawler::CrawlTask;
use crate::storage::PageRecord;
use async_trait::async_trait;
use thiserror::Error;
use url::Url;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Connection pool closed")]
    Closed,

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of an atomic claim attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The caller now owns the URL
    Claimed,
    /// The URL is in flight elsewhere, committed, or permanently failed
    AlreadyClaimed,
}

/// Outcome of a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// A new PageRecord row was written
    Inserted,
    /// A row for this URL already existed; the content is a duplicate by definition
    Duplicate,
}

/// Dedup store contract
///
/// Implementations must be safe to share across workers. `try_claim` is the
/// only arbiter of who processes a URL; `is_claimed` and `is_visited` are
/// views for enqueue guards and diagnostics and must not be used to decide
/// ownership.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Atomically checks membership and reserves `url` if absent
    async fn try_claim(&self, url: &Url) -> StoreResult<ClaimOutcome>;

    /// Persists content for a previously claimed URL
    async fn commit(&self, record: &PageRecord) -> StoreResult<CommitOutcome>;

    /// Records `url` as permanently unfetchable
    async fn mark_failed(&self, url: &Url, reason: &str) -> StoreResult<()>;

    /// Records `url` as visited because it redirected to `target`
    ///
    /// The page itself is stored, if at all, under `target`.
    async fn mark_redirected(&self, url: &Url, target: &Url) -> StoreResult<()>;

    /// Drops an in-flight claim so the URL can be claimed again
    async fn release(&self, url: &Url) -> StoreResult<()>;

    /// Durable read-only check: committed, permanently failed or redirected
    async fn is_visited(&self, url: &Url) -> StoreResult<bool>;

    /// In-process view: claimed, committed or failed as far as this process knows
    fn is_claimed(&self, url: &Url) -> bool;

    /// Persists accepted tasks so an interrupted crawl can resume them
    async fn save_pending(&self, tasks: &[CrawlTask]) -> StoreResult<()>;

    /// Loads tasks saved by `save_pending` that have not reached a terminal state
    async fn load_pending(&self) -> StoreResult<Vec<CrawlTask>>;
}
