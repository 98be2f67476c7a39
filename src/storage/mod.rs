//! Storage module for persisting crawl data
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - The dedup store (claims, committed pages, permanent failures)
//! - Pending frontier persistence for resuming an interrupted crawl
//! - Run tracking

mod pool;
mod schema;
mod sqlite;
mod traits;

pub use pool::{ConnectionPool, PooledConnection};
pub use sqlite::{SqliteDedupStore, StoredPage};
pub use traits::{ClaimOutcome, CommitOutcome, DedupStore, StoreError, StoreResult};

use chrono::{DateTime, Utc};
use url::Url;

/// Separator between text blocks in the persisted `data` column
pub const BLOCK_SEPARATOR: &str = "\n\n";

/// Extracted page content in the configured extraction mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageContent {
    /// Flattened body text
    Text(String),
    /// Ordered text blocks (headings, paragraphs, list items, ...)
    Blocks(Vec<String>),
}

impl PageContent {
    /// Renders the content for the `data` column
    pub fn to_data(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => blocks.join(BLOCK_SEPARATOR),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::Blocks(blocks) => blocks.is_empty(),
        }
    }
}

/// A successfully fetched page, ready to be committed
///
/// Immutable once persisted: a second insert for the same URL is rejected,
/// never merged.
#[derive(Debug, Clone)]
pub struct PageRecord {
    pub url: Url,
    pub title: String,
    pub content: PageContent,
    pub company_id: i64,
    pub crawl_time: DateTime<Utc>,
}

/// Represents a crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
    pub committed: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Final counts written to a run row
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub committed: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
