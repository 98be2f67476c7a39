//! Fetch-extract-persist pipeline for a single crawl task
//!
//! Within one URL's lifecycle, claim always precedes fetch and fetch always
//! precedes commit. Every store and fetcher call is bounded by a timeout, and
//! a claim taken by this pipeline is either committed, marked failed or
//! released before `process` returns.

use crate::config::{Config, ExtractionMode, NormalizeConfig};
use crate::crawler::fetcher::{FetchError, LoadedPage, PageFetcher};
use crate::crawler::frontier::CrawlTask;
use crate::crawler::retry::RetryPolicy;
use crate::state::{FailureKind, TaskState};
use crate::storage::{
    ClaimOutcome, CommitOutcome, DedupStore, PageContent, PageRecord, StoreError, StoreResult,
};
use crate::url::normalize_url;
use chrono::Utc;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use url::Url;

/// Successful result of processing one task
#[derive(Debug)]
pub enum ProcessOutcome {
    /// The page was fetched and persisted
    Committed {
        record: PageRecord,
        /// Outbound links, normalized, not yet filtered
        links: Vec<Url>,
        /// Another worker or process committed the URL first
        duplicate: bool,
    },
    /// The URL was already claimed; nothing was fetched
    Skipped,
}

/// Per-task failure; never aborts other tasks
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("{0}")]
    PermanentFetch(FetchError),

    #[error("gave up after {attempts} attempts: {last}")]
    TransientExhausted { attempts: u32, last: FetchError },

    #[error("store unavailable: {0}")]
    PersistenceUnavailable(String),

    #[error("task cancelled")]
    Cancelled,

    #[error("invalid task state transition: {from} -> {to}")]
    InvalidTransition { from: TaskState, to: TaskState },
}

impl ProcessError {
    /// Whether the task ends in the permanently failed state
    pub fn is_permanent_failure(&self) -> bool {
        matches!(
            self,
            Self::PermanentFetch(_) | Self::TransientExhausted { .. }
        )
    }
}

/// A store call that did not complete
#[derive(Debug, Error)]
enum StoreCallError {
    #[error(transparent)]
    Failed(#[from] StoreError),

    #[error("store call timed out after {0:?}")]
    TimedOut(Duration),
}

impl StoreCallError {
    fn timed_out(&self) -> bool {
        matches!(self, Self::TimedOut(_))
    }
}

/// Tracks one task through its state machine
struct Lifecycle<'a> {
    url: &'a Url,
    state: TaskState,
}

impl<'a> Lifecycle<'a> {
    fn new(url: &'a Url) -> Self {
        Self {
            url,
            state: TaskState::Pending,
        }
    }

    fn advance(&mut self, next: TaskState) -> Result<(), ProcessError> {
        if !self.state.can_transition_to(next) {
            return Err(ProcessError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::trace!("{}: {} -> {}", self.url, self.state, next);
        if next.is_terminal() {
            tracing::debug!("{} finished: {}", self.url, next);
        }
        self.state = next;
        Ok(())
    }
}

/// Fetches, extracts and persists one URL at a time
pub struct Pipeline {
    fetcher: Arc<dyn PageFetcher>,
    store: Arc<dyn DedupStore>,
    retry: RetryPolicy,
    fetch_timeout: Duration,
    store_timeout: Duration,
    extraction: ExtractionMode,
    normalize: NormalizeConfig,
    company_id: i64,
    cancel: CancellationToken,
    retried: AtomicU64,
}

impl Pipeline {
    /// Creates a pipeline from the crawler configuration
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration
    /// * `fetcher` - Page loading capability
    /// * `store` - Dedup store used for claims and commits
    /// * `cancel` - Aborts in-flight tasks at their next suspension point
    pub fn new(
        config: &Config,
        fetcher: Arc<dyn PageFetcher>,
        store: Arc<dyn DedupStore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            fetcher,
            store,
            retry: RetryPolicy::from_config(&config.crawler),
            fetch_timeout: Duration::from_secs(config.crawler.fetch_timeout_secs),
            store_timeout: Duration::from_secs(config.crawler.commit_timeout_secs),
            extraction: config.crawler.extraction,
            normalize: config.normalize.clone(),
            company_id: config.store.company_id,
            cancel,
            retried: AtomicU64::new(0),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Total fetch retries performed so far
    pub fn retries(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }

    /// Processes one task: claim, fetch with retry, extract, commit
    ///
    /// # Returns
    ///
    /// * `Ok(ProcessOutcome::Committed)` - The page is persisted (possibly by someone else)
    /// * `Ok(ProcessOutcome::Skipped)` - The URL was already claimed
    /// * `Err(ProcessError)` - The task failed; other tasks are unaffected
    #[instrument(skip(self, task), fields(url = %task.url, attempt = task.attempt))]
    pub async fn process(&self, task: &CrawlTask) -> Result<ProcessOutcome, ProcessError> {
        let url = &task.url;
        let mut lifecycle = Lifecycle::new(url);

        if self.cancel.is_cancelled() {
            return Err(ProcessError::Cancelled);
        }

        match self.bounded(self.store.try_claim(url)).await {
            Ok(ClaimOutcome::AlreadyClaimed) => {
                lifecycle.advance(TaskState::Skipped)?;
                tracing::debug!("Skipping {}: already claimed", url);
                return Ok(ProcessOutcome::Skipped);
            }
            Ok(ClaimOutcome::Claimed) => lifecycle.advance(TaskState::Claimed)?,
            Err(err) => {
                // A timed-out claim may still have landed
                if err.timed_out() {
                    self.release(url).await;
                }
                return Err(ProcessError::PersistenceUnavailable(err.to_string()));
            }
        }

        let page = self.fetch_with_retry(url, &mut lifecycle).await?;

        if self.cancel.is_cancelled() {
            self.release(url).await;
            return Err(ProcessError::Cancelled);
        }

        // A redirected page is owned by the URL it landed on
        let landed = self.redirect_target(url, &page);
        if let Some(target) = &landed {
            match self.bounded(self.store.try_claim(target)).await {
                Ok(ClaimOutcome::Claimed) => {}
                Ok(ClaimOutcome::AlreadyClaimed) => {
                    lifecycle.advance(TaskState::Skipped)?;
                    tracing::debug!("Skipping {}: redirects to claimed {}", url, target);
                    self.settle_redirect(url, target).await;
                    return Ok(ProcessOutcome::Skipped);
                }
                Err(err) => {
                    if err.timed_out() {
                        self.release(target).await;
                    }
                    self.release(url).await;
                    return Err(ProcessError::PersistenceUnavailable(err.to_string()));
                }
            }
        }

        let record = self.build_record(landed.as_ref().unwrap_or(url), &page);
        match self.bounded(self.store.commit(&record)).await {
            Ok(outcome) => {
                lifecycle.advance(TaskState::Committed)?;
                if let Some(target) = &landed {
                    self.settle_redirect(url, target).await;
                }
                let duplicate = outcome == CommitOutcome::Duplicate;
                if duplicate {
                    tracing::debug!("{} was already committed", record.url);
                }
                Ok(ProcessOutcome::Committed {
                    links: self.normalize_links(&page.links),
                    record,
                    duplicate,
                })
            }
            Err(err) => {
                if let Some(target) = &landed {
                    self.release(target).await;
                }
                self.release(url).await;
                Err(ProcessError::PersistenceUnavailable(err.to_string()))
            }
        }
    }

    /// Normalized landing URL, when the fetch ended somewhere other than `url`
    fn redirect_target(&self, url: &Url, page: &LoadedPage) -> Option<Url> {
        let final_url = page.final_url.as_ref()?;
        let landed = normalize_url(final_url.as_str(), &self.normalize).ok()?;
        (landed != *url).then_some(landed)
    }

    /// Turns the claim on a redirecting URL into a visited entry
    async fn settle_redirect(&self, url: &Url, target: &Url) {
        if let Err(e) = self.bounded(self.store.mark_redirected(url, target)).await {
            tracing::warn!("Could not record redirect {} -> {}: {}", url, target, e);
        }
    }

    async fn fetch_with_retry(
        &self,
        url: &Url,
        lifecycle: &mut Lifecycle<'_>,
    ) -> Result<LoadedPage, ProcessError> {
        let mut retries = 0;

        loop {
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.release(url).await;
                    return Err(ProcessError::Cancelled);
                }
                loaded = tokio::time::timeout(self.fetch_timeout, self.fetcher.load(url)) => {
                    loaded.unwrap_or_else(|_| {
                        Err(FetchError::transient(
                            url,
                            format!("fetch timed out after {:?}", self.fetch_timeout),
                        ))
                    })
                }
            };

            let err = match result {
                Ok(page) => {
                    lifecycle.advance(TaskState::Fetched)?;
                    return Ok(page);
                }
                Err(err) => err,
            };

            let kind = err.kind();
            lifecycle.advance(TaskState::FetchFailed(kind))?;

            if kind == FailureKind::Transient && self.retry.should_retry(retries) {
                lifecycle.advance(TaskState::Retried)?;
                let delay = self.retry.backoff(retries);
                retries += 1;
                self.retried.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    "Retrying {} in {:?} ({}/{}): {}",
                    url,
                    delay,
                    retries,
                    self.retry.budget,
                    err.reason()
                );

                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        self.release(url).await;
                        return Err(ProcessError::Cancelled);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                continue;
            }

            lifecycle.advance(TaskState::PermanentlyFailed)?;
            if let Err(e) = self.bounded(self.store.mark_failed(url, err.reason())).await {
                tracing::warn!("Could not record failure of {}: {}", url, e);
            }

            return Err(match kind {
                FailureKind::Transient => ProcessError::TransientExhausted {
                    attempts: retries + 1,
                    last: err,
                },
                FailureKind::Permanent => ProcessError::PermanentFetch(err),
            });
        }
    }

    fn build_record(&self, url: &Url, page: &LoadedPage) -> PageRecord {
        let content = match self.extraction {
            ExtractionMode::BodyText => PageContent::Text(page.body_text.clone()),
            ExtractionMode::Blocks => PageContent::Blocks(page.blocks.clone()),
        };

        PageRecord {
            url: url.clone(),
            title: page.title.clone().unwrap_or_default(),
            content,
            company_id: self.company_id,
            crawl_time: Utc::now(),
        }
    }

    /// Normalizes outbound links, dropping unparseable ones and repeats
    fn normalize_links(&self, links: &[Url]) -> Vec<Url> {
        let mut seen = HashSet::new();
        links
            .iter()
            .filter_map(|link| normalize_url(link.as_str(), &self.normalize).ok())
            .filter(|link| seen.insert(link.as_str().to_string()))
            .collect()
    }

    /// Runs a store call under the store timeout
    async fn bounded<T>(
        &self,
        op: impl Future<Output = StoreResult<T>>,
    ) -> Result<T, StoreCallError> {
        match tokio::time::timeout(self.store_timeout, op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(StoreCallError::Failed(e)),
            Err(_) => Err(StoreCallError::TimedOut(self.store_timeout)),
        }
    }

    /// Drops this task's claim; failures are logged and left to startup recovery
    async fn release(&self, url: &Url) {
        if let Err(e) = self.bounded(self.store.release(url)).await {
            tracing::warn!("Could not release claim on {}: {}", url, e);
        }
    }
}
