//! Crawler coordinator - main crawl orchestration logic
//!
//! This module contains the worker pool that coordinates the crawl:
//! - Seeding the frontier and reloading saved tasks
//! - Running N workers that pull tasks and invoke the pipeline
//! - Feeding filtered links back into the frontier
//! - Detecting termination, cancellation and crawl-level failure

use crate::config::{Config, NormalizeConfig};
use crate::crawler::fetcher::PageFetcher;
use crate::crawler::frontier::{CrawlTask, Frontier};
use crate::crawler::pipeline::{Pipeline, ProcessError, ProcessOutcome};
use crate::crawler::retry::RetryPolicy;
use crate::filter::FilterRuleSet;
use crate::output::{CrawlReport, ReportCounters};
use crate::storage::DedupStore;
use crate::url::normalize_url;
use crate::ConfigError;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

/// State shared by all workers of one crawl
struct Shared {
    frontier: Frontier,
    pipeline: Pipeline,
    filter: FilterRuleSet,
    store: Arc<dyn DedupStore>,
    retry: RetryPolicy,
    store_timeout: Duration,
    max_pages: Option<u64>,
    failure_threshold: u32,

    /// Aborts in-flight tasks; raised by the user
    cancel: CancellationToken,
    /// Stops dispatching new tasks; child of `cancel`
    dispatch: CancellationToken,

    counters: ReportCounters,
    in_flight: AtomicUsize,
    done: AtomicBool,
    consecutive_store_failures: AtomicU32,
    failure: Mutex<Option<String>>,
}

/// Main crawler coordinator structure
pub struct Coordinator {
    shared: Arc<Shared>,
    normalize: NormalizeConfig,
}

impl Coordinator {
    /// Creates a new coordinator instance
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration
    /// * `fetcher` - Page loading capability
    /// * `store` - Dedup store shared by all workers
    /// * `cancel` - Global cancellation signal
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Ready to run
    /// * `Err(ConfigError)` - The filter rules are malformed; the crawl must not start
    pub fn new(
        config: &Config,
        fetcher: Arc<dyn PageFetcher>,
        store: Arc<dyn DedupStore>,
        cancel: CancellationToken,
    ) -> Result<Self, ConfigError> {
        let filter = FilterRuleSet::from_config(&config.filter)?;
        let pipeline = Pipeline::new(config, fetcher, Arc::clone(&store), cancel.clone());

        let shared = Shared {
            frontier: Frontier::new(Arc::clone(&store)),
            retry: pipeline.retry_policy(),
            pipeline,
            filter,
            store,
            store_timeout: Duration::from_secs(config.crawler.commit_timeout_secs),
            max_pages: config.crawler.max_pages,
            failure_threshold: config.crawler.effective_store_failure_threshold(),
            dispatch: cancel.child_token(),
            cancel,
            counters: ReportCounters::default(),
            in_flight: AtomicUsize::new(0),
            done: AtomicBool::new(false),
            consecutive_store_failures: AtomicU32::new(0),
            failure: Mutex::new(None),
        };

        Ok(Self {
            shared: Arc::new(shared),
            normalize: config.normalize.clone(),
        })
    }

    /// Number of tasks waiting in the frontier
    pub fn pending(&self) -> usize {
        self.shared.frontier.len()
    }

    /// Queues tasks saved by an interrupted crawl
    ///
    /// Saved tasks already passed the filter when they were discovered.
    pub fn resume(&self, tasks: Vec<CrawlTask>) -> usize {
        let mut queued = 0;
        for task in tasks {
            let task = match normalize_url(task.url.as_str(), &self.normalize) {
                Ok(url) => CrawlTask::restored(url, task.discovered_from, task.enqueued_at),
                Err(e) => {
                    tracing::debug!("Dropping saved task {}: {}", task.url, e);
                    continue;
                }
            };
            if self.shared.frontier.enqueue(task) {
                queued += 1;
            }
        }

        if queued > 0 {
            tracing::info!("Resuming {} saved tasks", queued);
        }
        queued
    }

    /// Runs the crawl to completion
    ///
    /// Seeds bypass the filter. Returns once the frontier is empty and no
    /// worker holds a task, or once dispatch was stopped and in-flight tasks
    /// have finished.
    ///
    /// # Arguments
    ///
    /// * `seeds` - Initial URLs, in order
    /// * `concurrency` - Number of workers
    pub async fn run(&self, seeds: &[Url], concurrency: usize) -> CrawlReport {
        let started = Instant::now();
        self.seed(seeds).await;

        tracing::info!(
            "Starting crawl with {} workers, {} tasks queued",
            concurrency,
            self.shared.frontier.len()
        );

        let mut workers = JoinSet::new();
        for id in 0..concurrency.max(1) {
            workers.spawn(worker(Arc::clone(&self.shared), id));
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                // A lost worker would leave its task counted as in flight forever
                self.shared
                    .escalate(format!("worker terminated abnormally: {}", e));
            }
        }

        let failure = self
            .shared
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let report = self.shared.counters.snapshot(
            self.shared.pipeline.retries(),
            failure,
            started.elapsed(),
        );

        if self.shared.cancel.is_cancelled() {
            tracing::info!(
                "Crawl cancelled; {} tasks left pending",
                self.shared.frontier.len()
            );
        }
        tracing::info!(
            "Crawl finished: {} committed, {} skipped, {} failed in {:?}",
            report.committed,
            report.skipped_duplicate,
            report.permanently_failed,
            report.elapsed
        );

        report
    }

    async fn seed(&self, seeds: &[Url]) {
        let mut accepted = Vec::new();
        for seed in seeds {
            let url = match normalize_url(seed.as_str(), &self.normalize) {
                Ok(url) => url,
                Err(e) => {
                    tracing::warn!("Ignoring seed {}: {}", seed, e);
                    continue;
                }
            };
            let task = CrawlTask::seed(url);
            if self.shared.frontier.enqueue(task.clone()) {
                accepted.push(task);
            } else {
                tracing::debug!("Seed {} already visited or queued", task.url);
            }
        }
        self.shared.save_pending(&accepted).await;
    }
}

/// Worker loop: dequeue, process, feed links back, until the crawl is over
async fn worker(shared: Arc<Shared>, id: usize) {
    tracing::trace!("Worker {} started", id);

    loop {
        if shared.dispatch.is_cancelled() || shared.done.load(Ordering::SeqCst) {
            break;
        }

        let notified = shared.frontier.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        shared.in_flight.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = shared.frontier.dequeue() {
            shared.handle(task).await;
            shared.finish_task();
            continue;
        }

        if shared.finish_task() {
            break;
        }

        tokio::select! {
            _ = &mut notified => {}
            _ = shared.dispatch.cancelled() => break,
        }
    }

    tracing::trace!("Worker {} stopped", id);
}

impl Shared {
    /// Leaves the in-flight set; returns true once the crawl is over
    fn finish_task(&self) -> bool {
        let previous = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 && self.frontier.is_empty() {
            self.done.store(true, Ordering::SeqCst);
            self.frontier.wake_all();
            return true;
        }
        self.done.load(Ordering::SeqCst)
    }

    async fn handle(&self, task: CrawlTask) {
        match self.pipeline.process(&task).await {
            Ok(ProcessOutcome::Committed {
                record,
                links,
                duplicate,
            }) => {
                self.store_recovered();
                if duplicate {
                    ReportCounters::bump(&self.counters.skipped_duplicate);
                } else {
                    let committed = ReportCounters::bump(&self.counters.committed);
                    tracing::debug!("Committed {} ({} links)", record.url, links.len());
                    self.check_page_limit(committed);
                }
                self.enqueue_links(&record.url, links).await;
            }
            Ok(ProcessOutcome::Skipped) => {
                self.store_recovered();
                ReportCounters::bump(&self.counters.skipped_duplicate);
            }
            Err(ProcessError::PersistenceUnavailable(reason)) => {
                self.handle_store_failure(task, reason).await;
            }
            Err(ProcessError::Cancelled) => {
                ReportCounters::bump(&self.counters.cancelled);
            }
            Err(e) if e.is_permanent_failure() => {
                tracing::warn!("Permanently failed {}: {}", task.url, e);
                ReportCounters::bump(&self.counters.permanently_failed);
            }
            Err(e) => {
                tracing::error!("Task {} aborted: {}", task.url, e);
                ReportCounters::bump(&self.counters.permanently_failed);
            }
        }
    }

    /// Filters links found on `source` and queues the accepted ones
    async fn enqueue_links(&self, source: &Url, links: Vec<Url>) {
        let mut candidates = Vec::new();
        for link in links {
            if let Some(rejection) = self.filter.evaluate(&link, source) {
                tracing::trace!("Filtered {}: {}", link, rejection);
                ReportCounters::bump(&self.counters.filtered_out);
                continue;
            }
            if !self.store.is_claimed(&link) {
                candidates.push(CrawlTask::discovered(link, source.clone()));
            }
        }

        // Saved before queueing so a commit cannot race ahead of its pending row
        self.save_pending(&candidates).await;

        let queued = candidates
            .into_iter()
            .filter(|task| self.frontier.enqueue(task.clone()))
            .count();
        if queued > 0 {
            tracing::debug!("Queued {} links from {}", queued, source);
        }
    }

    async fn save_pending(&self, tasks: &[CrawlTask]) {
        if tasks.is_empty() {
            return;
        }
        match tokio::time::timeout(self.store_timeout, self.store.save_pending(tasks)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Could not save {} pending tasks: {}", tasks.len(), e),
            Err(_) => tracing::warn!("Saving {} pending tasks timed out", tasks.len()),
        }
    }

    /// Requeues a task whose store call failed, or gives up on it
    async fn handle_store_failure(&self, task: CrawlTask, reason: String) {
        let consecutive = self.consecutive_store_failures.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::warn!(
            "Store unavailable for {} (attempt {}, {} consecutive): {}",
            task.url,
            task.attempt + 1,
            consecutive,
            reason
        );

        if consecutive >= self.failure_threshold {
            self.escalate(format!(
                "store unavailable for {} consecutive operations: {}",
                consecutive, reason
            ));
        }

        if !self.retry.should_retry(task.attempt) {
            tracing::warn!("Giving up on {} after {} attempts", task.url, task.attempt + 1);
            ReportCounters::bump(&self.counters.permanently_failed);
            return;
        }

        if !self.dispatch.is_cancelled() {
            let delay = self.retry.backoff(task.attempt);
            tokio::select! {
                _ = self.dispatch.cancelled() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.frontier.requeue(task.requeued());
        ReportCounters::bump(&self.counters.requeued);
    }

    fn store_recovered(&self) {
        self.consecutive_store_failures.store(0, Ordering::SeqCst);
    }

    /// Records a crawl-level failure and stops dispatch
    fn escalate(&self, message: String) {
        let mut failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        if failure.is_none() {
            tracing::error!("Crawl failed: {}", message);
            *failure = Some(message);
        }
        drop(failure);
        self.dispatch.cancel();
    }

    fn check_page_limit(&self, committed: u64) {
        if let Some(max) = self.max_pages {
            if committed >= max && !self.dispatch.is_cancelled() {
                tracing::info!("Reached max-pages limit of {}; stopping dispatch", max);
                self.dispatch.cancel();
            }
        }
    }
}
