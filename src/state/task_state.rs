/// Task state definitions for tracking a URL through the pipeline
///
/// Lifecycle:
/// `Pending → Claimed → Fetched → Committed`,
/// `Claimed → FetchFailed(Transient) → Retried → (Fetched | PermanentlyFailed)`,
/// `Claimed → FetchFailed(Permanent) → PermanentlyFailed`,
/// `Pending → Skipped` when the URL was already claimed,
/// `Fetched → Skipped` when the page redirected to an already claimed URL.
use std::fmt;

/// Retriable vs. terminal fetch outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Transient,
    Permanent,
}

/// Represents the current state of one crawl task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    // ===== Active States =====
    /// Task is waiting to be processed
    Pending,

    /// URL has been reserved for this worker
    Claimed,

    /// Page loaded and extracted, not yet persisted
    Fetched,

    /// Last fetch attempt failed
    FetchFailed(FailureKind),

    /// A transient failure is being retried
    Retried,

    // ===== Terminal States =====
    /// PageRecord persisted
    Committed,

    /// URL will never be fetched again
    PermanentlyFailed,

    /// Another worker or an earlier run owns this URL
    Skipped,
}

impl TaskState {
    /// Returns true if this is a terminal state (no further processing needed)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Committed | Self::PermanentlyFailed | Self::Skipped
        )
    }

    /// Returns true if moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use FailureKind::*;

        matches!(
            (self, next),
            (Self::Pending, Self::Claimed)
                | (Self::Pending, Self::Skipped)
                | (Self::Claimed, Self::Fetched)
                | (Self::Claimed, Self::FetchFailed(_))
                | (Self::FetchFailed(Transient), Self::Retried)
                | (Self::FetchFailed(_), Self::PermanentlyFailed)
                | (Self::Retried, Self::Fetched)
                | (Self::Retried, Self::FetchFailed(_))
                | (Self::Fetched, Self::Committed)
                | (Self::Fetched, Self::Skipped)
        )
    }

    /// Converts the state to a short string for logs and the visits table
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Fetched => "fetched",
            Self::FetchFailed(FailureKind::Transient) => "fetch_failed_transient",
            Self::FetchFailed(FailureKind::Permanent) => "fetch_failed_permanent",
            Self::Retried => "retried",
            Self::Committed => "committed",
            Self::PermanentlyFailed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
