//! Cancellation, resume and whole-run bookkeeping

use crate::common::{config_text, create_test_config, html_response, open_store, url, GraphFetcher};
use async_trait::async_trait;
use scoped_crawler::config::load_config_with_hash;
use scoped_crawler::crawler::{run_crawl, Coordinator, CrawlOptions, FetchError, LoadedPage, PageFetcher};
use scoped_crawler::storage::{DedupStore, RunStatus};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer};

/// Serves a link graph but hangs on `slow` URLs after signalling `started`
struct StallingFetcher {
    graph: GraphFetcher,
    slow: HashSet<String>,
    started: Notify,
}

#[async_trait]
impl PageFetcher for StallingFetcher {
    async fn load(&self, url: &Url) -> Result<LoadedPage, FetchError> {
        if self.slow.contains(url.as_str()) {
            self.started.notify_one();
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        self.graph.load(url).await
    }
}

const SEED: &str = "https://example.edu/";
const CHILDREN: [&str; 3] = [
    "https://example.edu/a",
    "https://example.edu/b",
    "https://example.edu/c",
];

fn site() -> GraphFetcher {
    CHILDREN
        .iter()
        .fold(GraphFetcher::new().page(SEED, &CHILDREN), |graph, child| {
            graph.page(child, &[SEED])
        })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_then_resume() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("crawl.db");
    let config = create_test_config(&[SEED.to_string()], &db, "");

    // First run: cancelled while the children are loading
    let store = open_store(&db, 2);
    let fetcher = Arc::new(StallingFetcher {
        graph: site(),
        slow: CHILDREN.iter().map(|c| c.to_string()).collect(),
        started: Notify::new(),
    });
    let cancel = CancellationToken::new();
    let coordinator =
        Coordinator::new(&config, fetcher.clone(), store.clone(), cancel.clone()).unwrap();

    let seeds = [url(SEED)];
    let trigger = async {
        fetcher.started.notified().await;
        cancel.cancel();
    };
    let (report, ()) = tokio::join!(
        tokio::time::timeout(Duration::from_secs(10), coordinator.run(&seeds, 2)),
        trigger
    );
    let report = report.expect("cancelled crawl should stop promptly");

    assert_eq!(report.committed, 1);
    assert!(report.cancelled >= 1);
    assert_eq!(store.committed_urls().await.unwrap(), vec![SEED.to_string()]);
    assert_eq!(store.count_pending().await.unwrap(), 3);
    for child in CHILDREN {
        assert!(!store.is_claimed(&url(child)), "{} still claimed", child);
        assert!(!store.is_visited(&url(child)).await.unwrap());
    }
    drop(coordinator);
    drop(store);

    // Second run: picks up the saved children only
    let store = open_store(&db, 2);
    let pending = store.load_pending().await.unwrap();
    assert_eq!(pending.len(), 3);

    let fetcher = Arc::new(site());
    let coordinator =
        Coordinator::new(&config, fetcher.clone(), store.clone(), CancellationToken::new())
            .unwrap();
    assert_eq!(coordinator.resume(pending), 3);

    let report = coordinator.run(&seeds, 2).await;
    assert!(report.is_success());
    assert_eq!(report.committed, 3);
    assert_eq!(fetcher.loads_of(SEED), 0);
    assert_eq!(store.count_committed().await.unwrap(), 4);
    assert_eq!(store.count_pending().await.unwrap(), 0);
}

#[tokio::test]
async fn test_run_crawl_records_runs() {
    let mock_server = MockServer::start().await;
    let base = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response("Home", &["/docs"]))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/docs"))
        .respond_with(html_response("Docs", &["/"]))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let db = dir.path().join("crawl.db");
    let config_path = dir.path().join("crawler.toml");
    std::fs::write(
        &config_path,
        config_text(&format!("\"{}/\"", base), &db, ""),
    )
    .unwrap();

    let (config, hash) = load_config_with_hash(&config_path).unwrap();
    let options = CrawlOptions {
        config_hash: hash.clone(),
        ..Default::default()
    };
    let report = run_crawl(config.clone(), options.clone()).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.committed, 2);

    // Everything is already visited: the second run has nothing to do
    let report = run_crawl(config, options).await.unwrap();
    assert_eq!(report.committed, 0);

    let store = open_store(&db, 1);
    let runs = store.latest_runs(5).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[1].status, RunStatus::Completed);
    assert_eq!(runs[1].committed, 2);
    assert_eq!(runs[1].config_hash, hash);
    assert!(runs[1].finished_at.is_some());
    assert_eq!(runs[0].committed, 0);
}

#[tokio::test]
async fn test_interrupted_run_then_fresh_run() {
    let mock_server = MockServer::start().await;
    let base = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response("Home", &[]))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let db = dir.path().join("crawl.db");
    let config = create_test_config(&[format!("{}/", base)], &db, "");

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = run_crawl(
        config.clone(),
        CrawlOptions {
            cancel,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(report.committed, 0);

    {
        let store = open_store(&db, 1);
        assert_eq!(store.count_pending().await.unwrap(), 1);
        let runs = store.latest_runs(1).await.unwrap();
        assert_eq!(runs[0].status, RunStatus::Interrupted);
    }

    let report = run_crawl(
        config,
        CrawlOptions {
            fresh: true,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(report.committed, 1);

    let store = open_store(&db, 1);
    assert_eq!(store.count_pending().await.unwrap(), 0);
    assert_eq!(
        store.latest_runs(1).await.unwrap()[0].status,
        RunStatus::Completed
    );
}
