//! End-to-end crawls over HTTP and in-memory link graphs

use crate::common::{create_test_config, html_response, open_store, url, GraphFetcher};
use scoped_crawler::config::UserAgentConfig;
use scoped_crawler::crawler::{Coordinator, HttpFetcher};
use scoped_crawler::DedupStore;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn http_fetcher(config: &UserAgentConfig) -> Arc<HttpFetcher> {
    Arc::new(HttpFetcher::from_config(config, Duration::from_secs(5)).expect("client should build"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_full_crawl_single_site() {
    let mock_server = MockServer::start().await;
    let base = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response(
            "Home",
            &[
                "/about",
                "/missing",
                "/flaky",
                "/download",
                "/report.pdf",
                "https://other.example.org/x",
                "mailto:team@example.org",
            ],
        ))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/about"))
        .respond_with(html_response("About", &["/", "/about/", "/about#team"]))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    // First request fails with 503, the retry succeeds
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(html_response("Flaky", &[]))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/download"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(b"%PDF-1.4".to_vec(), "application/pdf"))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/report.pdf"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let db = dir.path().join("crawl.db");
    let config = create_test_config(&[format!("{}/", base)], &db, "");
    let store = open_store(&db, 4);

    let coordinator = Coordinator::new(
        &config,
        http_fetcher(&config.user_agent),
        store.clone(),
        CancellationToken::new(),
    )
    .unwrap();
    let report = coordinator.run(&[url(&format!("{}/", base))], 4).await;

    assert!(report.is_success());
    assert_eq!(report.committed, 3);
    assert_eq!(report.permanently_failed, 2);
    assert_eq!(report.retried, 1);
    assert_eq!(report.filtered_out, 2);

    let about = store
        .get_page(&url(&format!("{}/about", base)))
        .await
        .unwrap()
        .expect("about page should be stored");
    assert_eq!(about.title, "About");
    assert!(about.data.contains("Welcome to About."));
    assert_eq!(about.company_id, 1);

    assert_eq!(store.count_committed().await.unwrap(), 3);
    assert_eq!(store.count_failed().await.unwrap(), 2);
    assert_eq!(store.count_pending().await.unwrap(), 0);
}

#[tokio::test]
async fn test_blocks_extraction_over_http() {
    let mock_server = MockServer::start().await;
    let base = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response("Home", &[]))
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let db = dir.path().join("crawl.db");
    let config = create_test_config(&[format!("{}/", base)], &db, "extraction = \"blocks\"");
    let store = open_store(&db, 1);

    let coordinator = Coordinator::new(
        &config,
        http_fetcher(&config.user_agent),
        store.clone(),
        CancellationToken::new(),
    )
    .unwrap();
    let report = coordinator.run(&[url(&format!("{}/", base))], 1).await;
    assert_eq!(report.committed, 1);

    let home = store
        .get_page(&url(&format!("{}/", base)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(home.data, "Home\n\nWelcome to Home.");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_each_page_loaded_once_over_http() {
    let mock_server = MockServer::start().await;
    let base = mock_server.uri();
    let paths: Vec<String> = (0..12).map(|i| format!("/p{}", i)).collect();
    let links: Vec<&str> = paths.iter().map(String::as_str).collect();

    for p in &paths {
        Mock::given(method("GET"))
            .and(path(p.as_str()))
            .respond_with(html_response(p, &links))
            .expect(1)
            .mount(&mock_server)
            .await;
    }

    let dir = TempDir::new().unwrap();
    let db = dir.path().join("crawl.db");
    let seed = format!("{}/p0", base);
    let config = create_test_config(&[seed.clone()], &db, "");
    let store = open_store(&db, 8);

    let coordinator = Coordinator::new(
        &config,
        http_fetcher(&config.user_agent),
        store.clone(),
        CancellationToken::new(),
    )
    .unwrap();
    let report = coordinator.run(&[url(&seed)], 8).await;

    assert!(report.is_success());
    assert_eq!(report.committed, 12);
    assert_eq!(store.committed_urls().await.unwrap().len(), 12);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_workers_never_duplicate_work() {
    const PAGES: usize = 40;

    let names: Vec<String> = (0..PAGES)
        .map(|i| format!("https://example.edu/p{}", i))
        .collect();

    // Dense graph with fragment variants that normalize to the same URL
    let mut fetcher = GraphFetcher::new();
    for i in 0..PAGES {
        let links: Vec<String> = (1..=6)
            .flat_map(|k| {
                let target = &names[(i + k * 3) % PAGES];
                [target.clone(), format!("{}#section-{}", target, k)]
            })
            .collect();
        let links: Vec<&str> = links.iter().map(String::as_str).collect();
        fetcher = fetcher.page(&names[i], &links);
    }
    let fetcher = Arc::new(fetcher);

    let dir = TempDir::new().unwrap();
    let db = dir.path().join("crawl.db");
    let config = create_test_config(&[names[0].clone()], &db, "");
    let store = open_store(&db, 16);

    let coordinator =
        Coordinator::new(&config, fetcher.clone(), store.clone(), CancellationToken::new())
            .unwrap();
    let seeds = vec![url(&names[0]), url(&format!("{}#top", names[0])), url(&names[1])];
    let report = tokio::time::timeout(Duration::from_secs(30), coordinator.run(&seeds, 16))
        .await
        .expect("crawl should terminate");

    assert!(report.is_success());
    assert_eq!(report.committed, PAGES as u64);
    assert_eq!(report.permanently_failed, 0);

    let loads = fetcher.load_counts();
    assert_eq!(loads.len(), PAGES);
    for name in &names {
        assert_eq!(fetcher.loads_of(name), 1, "{} loaded more than once", name);
    }

    let mut committed = store.committed_urls().await.unwrap();
    committed.sort();
    committed.dedup();
    assert_eq!(committed.len(), PAGES);
}

#[tokio::test]
async fn test_redirect_stores_page_once() {
    let mock_server = MockServer::start().await;
    let base = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response("Home", &["/old", "/new"]))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/new"))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(html_response("New", &[]))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let db = dir.path().join("crawl.db");
    let seed = format!("{}/", base);
    let config = create_test_config(&[seed.clone()], &db, "");
    let store = open_store(&db, 1);

    let coordinator = Coordinator::new(
        &config,
        http_fetcher(&config.user_agent),
        store.clone(),
        CancellationToken::new(),
    )
    .unwrap();
    let report = coordinator.run(&[url(&seed)], 1).await;

    assert!(report.is_success());
    assert_eq!(report.committed, 2);
    assert_eq!(report.skipped_duplicate, 1);
    assert_eq!(store.count_committed().await.unwrap(), 2);

    let old = url(&format!("{}/old", base));
    let new = store
        .get_page(&url(&format!("{}/new", base)))
        .await
        .unwrap()
        .expect("redirect target should be stored");
    assert_eq!(new.title, "New");
    assert!(store.get_page(&old).await.unwrap().is_none());
    assert!(store.is_visited(&old).await.unwrap());
}
