//! Retry exhaustion and persistence failures during a crawl

use crate::common::{create_test_config, html_response, open_store, url, GraphFetcher};
use async_trait::async_trait;
use scoped_crawler::crawler::{Coordinator, CrawlTask, HttpFetcher};
use scoped_crawler::storage::{
    ClaimOutcome, CommitOutcome, DedupStore, PageRecord, SqliteDedupStore, StoreError, StoreResult,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Store whose first `failing_commits` commits report the database as unavailable
struct FlakyStore {
    inner: Arc<SqliteDedupStore>,
    failing_commits: AtomicU32,
    commit_calls: AtomicU32,
}

impl FlakyStore {
    fn new(inner: Arc<SqliteDedupStore>, failing_commits: u32) -> Self {
        Self {
            inner,
            failing_commits: AtomicU32::new(failing_commits),
            commit_calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl DedupStore for FlakyStore {
    async fn try_claim(&self, url: &Url) -> StoreResult<ClaimOutcome> {
        self.inner.try_claim(url).await
    }

    async fn commit(&self, record: &PageRecord) -> StoreResult<CommitOutcome> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(StoreError::Unavailable("database is locked".to_string()));
        }
        self.inner.commit(record).await
    }

    async fn mark_failed(&self, url: &Url, reason: &str) -> StoreResult<()> {
        self.inner.mark_failed(url, reason).await
    }

    async fn mark_redirected(&self, url: &Url, target: &Url) -> StoreResult<()> {
        self.inner.mark_redirected(url, target).await
    }

    async fn release(&self, url: &Url) -> StoreResult<()> {
        self.inner.release(url).await
    }

    async fn is_visited(&self, url: &Url) -> StoreResult<bool> {
        self.inner.is_visited(url).await
    }

    fn is_claimed(&self, url: &Url) -> bool {
        self.inner.is_claimed(url)
    }

    async fn save_pending(&self, tasks: &[CrawlTask]) -> StoreResult<()> {
        self.inner.save_pending(tasks).await
    }

    async fn load_pending(&self) -> StoreResult<Vec<CrawlTask>> {
        self.inner.load_pending().await
    }
}

#[tokio::test]
async fn test_transient_failures_exhaust_budget() {
    let mock_server = MockServer::start().await;
    let base = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response("Home", &["/down", "/up"]))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/up"))
        .respond_with(html_response("Up", &[]))
        .expect(1)
        .mount(&mock_server)
        .await;
    // One attempt plus two retries
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let db = dir.path().join("crawl.db");
    let seed = format!("{}/", base);
    let config = create_test_config(&[seed.clone()], &db, "retry-budget = 2");
    let store = open_store(&db, 2);
    let fetcher = HttpFetcher::from_config(&config.user_agent, Duration::from_secs(5)).unwrap();

    let coordinator =
        Coordinator::new(&config, Arc::new(fetcher), store.clone(), CancellationToken::new())
            .unwrap();
    let report = coordinator.run(&[url(&seed)], 2).await;

    assert!(report.is_success());
    assert_eq!(report.committed, 2);
    assert_eq!(report.permanently_failed, 1);
    assert_eq!(report.retried, 2);

    let down = url(&format!("{}/down", base));
    assert!(store.is_visited(&down).await.unwrap());
    assert!(store.get_page(&down).await.unwrap().is_none());
    assert_eq!(store.count_failed().await.unwrap(), 1);
}

#[tokio::test]
async fn test_zero_budget_fails_on_first_transient_error() {
    let mock_server = MockServer::start().await;
    let base = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let db = dir.path().join("crawl.db");
    let seed = format!("{}/", base);
    let config = create_test_config(&[seed.clone()], &db, "retry-budget = 0");
    let store = open_store(&db, 1);
    let fetcher = HttpFetcher::from_config(&config.user_agent, Duration::from_secs(5)).unwrap();

    let coordinator =
        Coordinator::new(&config, Arc::new(fetcher), store, CancellationToken::new()).unwrap();
    let report = coordinator.run(&[url(&seed)], 1).await;

    assert_eq!(report.committed, 0);
    assert_eq!(report.permanently_failed, 1);
    assert_eq!(report.retried, 0);
}

#[tokio::test]
async fn test_commit_failure_requeues_task() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("crawl.db");
    let seed = "https://example.edu/";
    let config = create_test_config(&[seed.to_string()], &db, "");
    let inner = open_store(&db, 2);
    let store = Arc::new(FlakyStore::new(inner.clone(), 1));
    let fetcher = Arc::new(
        GraphFetcher::new()
            .page(seed, &["https://example.edu/a"])
            .page("https://example.edu/a", &[]),
    );

    let coordinator =
        Coordinator::new(&config, fetcher.clone(), store.clone(), CancellationToken::new())
            .unwrap();
    let report = coordinator.run(&[url(seed)], 2).await;

    assert!(report.is_success());
    assert_eq!(report.committed, 2);
    assert_eq!(report.requeued, 1);
    assert_eq!(report.permanently_failed, 0);

    // The requeued task fetched again after its claim was released
    assert_eq!(fetcher.loads_of(seed), 2);
    assert_eq!(store.commit_calls.load(Ordering::SeqCst), 3);
    assert_eq!(inner.count_committed().await.unwrap(), 2);
    assert_eq!(inner.count_pending().await.unwrap(), 0);
}

#[tokio::test]
async fn test_persistent_store_failure_fails_crawl() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("crawl.db");
    let seed = "https://example.edu/";
    let config = create_test_config(
        &[seed.to_string()],
        &db,
        "retry-budget = 2\nstore-failure-threshold = 2",
    );
    let inner = open_store(&db, 1);
    let store = Arc::new(FlakyStore::new(inner.clone(), u32::MAX));
    let fetcher = Arc::new(GraphFetcher::new().page(seed, &[]));

    let coordinator =
        Coordinator::new(&config, fetcher, store, CancellationToken::new()).unwrap();
    let report = tokio::time::timeout(Duration::from_secs(10), coordinator.run(&[url(seed)], 1))
        .await
        .expect("crawl should stop once the store is declared unavailable");

    assert!(!report.is_success());
    assert!(report
        .failure
        .as_deref()
        .unwrap()
        .contains("store unavailable"));
    assert_eq!(report.committed, 0);
    assert_eq!(report.requeued, 2);

    // Never committed, never marked failed: the task stays resumable
    assert!(!inner.is_visited(&url(seed)).await.unwrap());
    assert_eq!(inner.count_pending().await.unwrap(), 1);
}
