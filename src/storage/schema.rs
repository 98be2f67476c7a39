//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the crawl database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Persisted pages; one row per (url, tenant)
CREATE TABLE IF NOT EXISTS crawl_data (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    title TEXT NOT NULL,
    data TEXT NOT NULL,
    company_id INTEGER NOT NULL,
    crawl_time TEXT NOT NULL,
    UNIQUE(url, company_id)
);

-- Visited set: in-flight claims, committed, permanently failed and redirected URLs
CREATE TABLE IF NOT EXISTS crawl_visits (
    url TEXT NOT NULL,
    company_id INTEGER NOT NULL,
    status TEXT NOT NULL,
    reason TEXT,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (url, company_id)
);

CREATE INDEX IF NOT EXISTS idx_crawl_visits_status ON crawl_visits(company_id, status);

-- Accepted tasks not yet terminal, for resuming an interrupted crawl
CREATE TABLE IF NOT EXISTS crawl_frontier (
    url TEXT NOT NULL,
    company_id INTEGER NOT NULL,
    discovered_from TEXT,
    enqueued_at TEXT NOT NULL,
    PRIMARY KEY (url, company_id)
);

-- Track crawl runs
CREATE TABLE IF NOT EXISTS crawl_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    committed INTEGER NOT NULL DEFAULT 0,
    skipped INTEGER NOT NULL DEFAULT 0,
    failed INTEGER NOT NULL DEFAULT 0
);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
