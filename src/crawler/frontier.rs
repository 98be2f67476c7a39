//! Crawl frontier
//!
//! This module handles:
//! - The FIFO queue of pending crawl tasks (breadth-first traversal)
//! - Re-entrancy guards so a URL is never queued twice or after it was claimed
//! - Waking idle workers when new work arrives

use crate::storage::DedupStore;
use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use url::Url;

/// A URL waiting to be crawled
///
/// Never mutated after creation; a retry produces a new task via
/// [`CrawlTask::requeued`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlTask {
    /// Normalized URL to fetch
    pub url: Url,

    /// Page the URL was discovered on; `None` for seeds
    pub discovered_from: Option<Url>,

    /// When the task entered the frontier
    pub enqueued_at: DateTime<Utc>,

    /// How many times this URL was requeued after a persistence failure
    pub attempt: u32,
}

impl CrawlTask {
    /// Creates a task for a trusted seed URL
    pub fn seed(url: Url) -> Self {
        Self {
            url,
            discovered_from: None,
            enqueued_at: Utc::now(),
            attempt: 0,
        }
    }

    /// Creates a task for a link found on `source`
    pub fn discovered(url: Url, source: Url) -> Self {
        Self {
            url,
            discovered_from: Some(source),
            enqueued_at: Utc::now(),
            attempt: 0,
        }
    }

    /// Rebuilds a task persisted by an earlier run
    pub fn restored(url: Url, discovered_from: Option<Url>, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            url,
            discovered_from,
            enqueued_at,
            attempt: 0,
        }
    }

    /// Creates the follow-up task used when this one is put back in the queue
    pub fn requeued(&self) -> Self {
        Self {
            url: self.url.clone(),
            discovered_from: self.discovered_from.clone(),
            enqueued_at: Utc::now(),
            attempt: self.attempt + 1,
        }
    }

    pub fn is_seed(&self) -> bool {
        self.discovered_from.is_none()
    }
}

#[derive(Default)]
struct FrontierQueue {
    tasks: VecDeque<CrawlTask>,
    /// Every URL ever accepted by `enqueue`
    seen: HashSet<String>,
}

/// Concurrent-safe FIFO work queue
///
/// The frontier does not decide when the crawl is over; it only reports
/// whether it is empty. The coordinator combines that with its own in-flight
/// count.
pub struct Frontier {
    queue: Mutex<FrontierQueue>,
    store: Arc<dyn DedupStore>,
    notify: Notify,
}

impl Frontier {
    /// Creates an empty frontier guarded by `store`'s claim state
    pub fn new(store: Arc<dyn DedupStore>) -> Self {
        Self {
            queue: Mutex::new(FrontierQueue::default()),
            store,
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FrontierQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a task unless its URL was already queued, claimed or visited
    ///
    /// # Returns
    ///
    /// `true` if the task was queued
    pub fn enqueue(&self, task: CrawlTask) -> bool {
        if self.store.is_claimed(&task.url) {
            tracing::trace!("Not queueing {}: already claimed", task.url);
            return false;
        }

        {
            let mut queue = self.lock();
            if !queue.seen.insert(task.url.as_str().to_string()) {
                tracing::trace!("Not queueing {}: already queued", task.url);
                return false;
            }
            queue.tasks.push_back(task);
        }

        self.notify.notify_waiters();
        true
    }

    /// Puts a task back at the end of the queue, bypassing the re-entrancy guard
    ///
    /// Used for tasks whose claim was released after a persistence failure.
    pub fn requeue(&self, task: CrawlTask) {
        {
            let mut queue = self.lock();
            queue.seen.insert(task.url.as_str().to_string());
            queue.tasks.push_back(task);
        }
        self.notify.notify_waiters();
    }

    /// Takes the oldest pending task, if any
    pub fn dequeue(&self) -> Option<CrawlTask> {
        self.lock().tasks.pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().tasks.is_empty()
    }

    /// Snapshot of the pending tasks, oldest first
    pub fn pending(&self) -> Vec<CrawlTask> {
        self.lock().tasks.iter().cloned().collect()
    }

    /// Future that completes on the next enqueue or [`Frontier::wake_all`]
    ///
    /// Call `enable()` on the pinned future before checking the queue so a
    /// wake-up between the check and the await is not lost.
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    /// Wakes every worker waiting in [`Frontier::notified`]
    pub fn wake_all(&self) {
        self.notify.notify_waiters();
    }
}
