//! SQLite storage implementation
//!
//! This module provides the SQLite-backed dedup store. Every operation takes a
//! connection from the bounded pool and runs its SQL on the blocking thread
//! pool; the connection goes back to the pool when the operation finishes,
//! whether it succeeded or not.

use crate::crawler::CrawlTask;
use crate::storage::pool::{open_connection, ConnectionPool};
use crate::storage::traits::{
    ClaimOutcome, CommitOutcome, DedupStore, StoreError, StoreResult,
};
use crate::storage::{PageRecord, RunCounts, RunRecord, RunStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Mutex as AsyncMutex;
use url::Url;

/// Visit statuses stored in `crawl_visits.status`
const STATUS_CLAIMED: &str = "claimed";
const STATUS_COMMITTED: &str = "committed";
const STATUS_FAILED: &str = "failed";
const STATUS_REDIRECTED: &str = "redirected";

/// A row of `crawl_data`
#[derive(Debug, Clone)]
pub struct StoredPage {
    pub url: String,
    pub title: String,
    pub data: String,
    pub company_id: i64,
    pub crawl_time: String,
}

/// SQLite dedup store
///
/// The in-process claim set serializes claims between workers of this
/// process; the `crawl_visits` row is the durable record of ownership.
pub struct SqliteDedupStore {
    pool: Arc<ConnectionPool>,
    company_id: i64,
    claims: Mutex<HashSet<String>>,
    /// Held by a claim's insert until it lands, even if the caller gave up
    claim_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SqliteDedupStore {
    /// Opens (or creates) the database and recovers from an earlier run
    ///
    /// Claims left behind by a process that died mid-task are dropped so
    /// those URLs can be claimed again. Committed and failed URLs are loaded
    /// into the in-process view.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    /// * `company_id` - Tenant tag written on every row
    /// * `pool_size` - Maximum number of simultaneous connections
    pub fn open(path: &Path, company_id: i64, pool_size: usize) -> StoreResult<Self> {
        let pool = ConnectionPool::open(path, pool_size)?;

        let conn = open_connection(path)?;
        let stale = recover_stale_claims(&conn, company_id)?;
        if stale > 0 {
            tracing::info!("Released {} stale claims from an interrupted run", stale);
        }
        let visited = load_visited(&conn, company_id)?;
        tracing::debug!(
            "Opened store at {} with {} visited URLs ({} connections)",
            path.display(),
            visited.len(),
            pool.size()
        );

        Ok(Self::with_pool(pool, company_id, visited))
    }

    /// Opens the database for inspection only (`--stats`)
    ///
    /// Unlike [`SqliteDedupStore::open`], claims are left untouched, so this is
    /// safe to run against a database a crawl is still writing to.
    pub fn open_for_inspection(path: &Path, company_id: i64) -> StoreResult<Self> {
        let pool = ConnectionPool::open(path, 1)?;
        Ok(Self::with_pool(pool, company_id, HashSet::new()))
    }

    fn with_pool(pool: Arc<ConnectionPool>, company_id: i64, visited: HashSet<String>) -> Self {
        Self {
            pool,
            company_id,
            claims: Mutex::new(visited),
            claim_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Stops handing out connections; later operations fail with `StoreError::Closed`
    pub fn close(&self) {
        tracing::debug!(
            "Closing store ({}/{} connections idle)",
            self.pool.available(),
            self.pool.size()
        );
        self.pool.close();
    }

    pub fn company_id(&self) -> i64 {
        self.company_id
    }

    fn claims(&self) -> MutexGuard<'_, HashSet<String>> {
        self.claims.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn claim_lock(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .claim_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    fn forget_claim_lock(&self, key: &str) {
        self.claim_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Runs `op` on a pooled connection on the blocking thread pool
    async fn with_conn<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, i64) -> StoreResult<T> + Send + 'static,
    {
        let mut guard = self.pool.acquire().await?;
        let company_id = self.company_id;

        tokio::task::spawn_blocking(move || {
            let conn = guard.get()?;
            op(conn, company_id)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("storage task failed: {}", e)))?
    }

    // ===== Run Management =====

    /// Creates a run row and returns its id
    pub async fn create_run(&self, config_hash: &str) -> StoreResult<i64> {
        let config_hash = config_hash.to_string();
        self.with_conn(move |conn, _| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO crawl_runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
                params![now, config_hash, RunStatus::Running.to_db_string()],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Marks a run finished with its final status and counts
    pub async fn complete_run(
        &self,
        run_id: i64,
        status: RunStatus,
        counts: RunCounts,
    ) -> StoreResult<()> {
        self.with_conn(move |conn, _| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE crawl_runs
                 SET status = ?1, finished_at = ?2, committed = ?3, skipped = ?4, failed = ?5
                 WHERE id = ?6",
                params![
                    status.to_db_string(),
                    now,
                    counts.committed as i64,
                    counts.skipped as i64,
                    counts.failed as i64,
                    run_id
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Returns the most recent runs, newest first
    pub async fn latest_runs(&self, limit: usize) -> StoreResult<Vec<RunRecord>> {
        self.with_conn(move |conn, _| {
            let mut stmt = conn.prepare(
                "SELECT id, started_at, finished_at, config_hash, status, committed, skipped, failed
                 FROM crawl_runs ORDER BY id DESC LIMIT ?1",
            )?;

            let runs = stmt
                .query_map(params![limit as i64], |row| {
                    Ok(RunRecord {
                        id: row.get(0)?,
                        started_at: row.get(1)?,
                        finished_at: row.get(2)?,
                        config_hash: row.get(3)?,
                        status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
                            .unwrap_or(RunStatus::Interrupted),
                        committed: row.get::<_, i64>(5)? as u64,
                        skipped: row.get::<_, i64>(6)? as u64,
                        failed: row.get::<_, i64>(7)? as u64,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(runs)
        })
        .await
    }

    // ===== Statistics =====

    pub async fn count_committed(&self) -> StoreResult<u64> {
        self.with_conn(|conn, company_id| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM crawl_data WHERE company_id = ?1",
                params![company_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }

    pub async fn count_failed(&self) -> StoreResult<u64> {
        self.with_conn(|conn, company_id| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM crawl_visits WHERE company_id = ?1 AND status = ?2",
                params![company_id, STATUS_FAILED],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }

    /// Claims currently held by a running (or crashed) crawl
    pub async fn count_claimed(&self) -> StoreResult<u64> {
        self.with_conn(|conn, company_id| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM crawl_visits WHERE company_id = ?1 AND status = ?2",
                params![company_id, STATUS_CLAIMED],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }

    pub async fn count_pending(&self) -> StoreResult<u64> {
        self.with_conn(|conn, company_id| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM crawl_frontier WHERE company_id = ?1",
                params![company_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }

    /// URLs with a committed PageRecord, in commit order
    pub async fn committed_urls(&self) -> StoreResult<Vec<String>> {
        self.with_conn(|conn, company_id| {
            let mut stmt =
                conn.prepare("SELECT url FROM crawl_data WHERE company_id = ?1 ORDER BY id")?;
            let urls = stmt
                .query_map(params![company_id], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(urls)
        })
        .await
    }

    /// Fetches the stored page for `url`, if any
    pub async fn get_page(&self, url: &Url) -> StoreResult<Option<StoredPage>> {
        let url = url.as_str().to_string();
        self.with_conn(move |conn, company_id| {
            let page = conn
                .query_row(
                    "SELECT url, title, data, company_id, crawl_time
                     FROM crawl_data WHERE url = ?1 AND company_id = ?2",
                    params![url, company_id],
                    |row| {
                        Ok(StoredPage {
                            url: row.get(0)?,
                            title: row.get(1)?,
                            data: row.get(2)?,
                            company_id: row.get(3)?,
                            crawl_time: row.get(4)?,
                        })
                    },
                )
                .optional()?;
            Ok(page)
        })
        .await
    }

    /// Drops all saved pending tasks (used by `--fresh`)
    pub async fn clear_pending(&self) -> StoreResult<usize> {
        self.with_conn(|conn, company_id| {
            let removed = conn.execute(
                "DELETE FROM crawl_frontier WHERE company_id = ?1",
                params![company_id],
            )?;
            Ok(removed)
        })
        .await
    }
}

#[async_trait]
impl DedupStore for SqliteDedupStore {
    async fn try_claim(&self, url: &Url) -> StoreResult<ClaimOutcome> {
        let key = url.as_str().to_string();

        if !self.claims().insert(key.clone()) {
            return Ok(ClaimOutcome::AlreadyClaimed);
        }

        // Moved into the blocking insert so `release` waits for it to land
        let settled = self.claim_lock(&key).lock_owned().await;

        let durable_key = key.clone();
        let result = self
            .with_conn(move |conn, company_id| {
                let _settled = settled;
                let now = Utc::now().to_rfc3339();
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let inserted = tx.execute(
                    "INSERT OR IGNORE INTO crawl_visits (url, company_id, status, updated_at)
                     SELECT ?1, ?2, ?3, ?4
                     WHERE NOT EXISTS (
                         SELECT 1 FROM crawl_data WHERE url = ?1 AND company_id = ?2
                     )",
                    params![durable_key, company_id, STATUS_CLAIMED, now],
                )?;
                tx.commit()?;
                Ok(inserted == 1)
            })
            .await;

        match result {
            Ok(true) => Ok(ClaimOutcome::Claimed),
            Ok(false) => {
                self.forget_claim_lock(&key);
                Ok(ClaimOutcome::AlreadyClaimed)
            }
            Err(e) => {
                self.claims().remove(&key);
                self.forget_claim_lock(&key);
                Err(e)
            }
        }
    }

    async fn commit(&self, record: &PageRecord) -> StoreResult<CommitOutcome> {
        let url = record.url.as_str().to_string();
        let title = record.title.clone();
        let data = record.content.to_data();
        let company_id = record.company_id;
        let crawl_time = record.crawl_time.to_rfc3339();

        let key = url.clone();
        let outcome = self
            .with_conn(move |conn, _| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

                let inserted = tx.execute(
                    "INSERT OR IGNORE INTO crawl_data (url, title, data, company_id, crawl_time)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![url, title, data, company_id, crawl_time],
                )?;

                tx.execute(
                    "INSERT INTO crawl_visits (url, company_id, status, reason, updated_at)
                     VALUES (?1, ?2, ?3, NULL, ?4)
                     ON CONFLICT(url, company_id) DO UPDATE SET
                         status = excluded.status,
                         reason = NULL,
                         updated_at = excluded.updated_at",
                    params![url, company_id, STATUS_COMMITTED, crawl_time],
                )?;

                tx.execute(
                    "DELETE FROM crawl_frontier WHERE url = ?1 AND company_id = ?2",
                    params![url, company_id],
                )?;

                tx.commit()?;

                Ok(if inserted == 1 {
                    CommitOutcome::Inserted
                } else {
                    CommitOutcome::Duplicate
                })
            })
            .await?;

        self.claims().insert(key.clone());
        self.forget_claim_lock(&key);
        Ok(outcome)
    }

    async fn mark_failed(&self, url: &Url, reason: &str) -> StoreResult<()> {
        let key = url.as_str().to_string();
        let durable_key = key.clone();
        let reason = reason.to_string();

        self.with_conn(move |conn, company_id| {
            let now = Utc::now().to_rfc3339();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute(
                "INSERT INTO crawl_visits (url, company_id, status, reason, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(url, company_id) DO UPDATE SET
                     status = excluded.status,
                     reason = excluded.reason,
                     updated_at = excluded.updated_at",
                params![durable_key, company_id, STATUS_FAILED, reason, now],
            )?;
            tx.execute(
                "DELETE FROM crawl_frontier WHERE url = ?1 AND company_id = ?2",
                params![durable_key, company_id],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await?;

        self.claims().insert(key.clone());
        self.forget_claim_lock(&key);
        Ok(())
    }

    async fn mark_redirected(&self, url: &Url, target: &Url) -> StoreResult<()> {
        let key = url.as_str().to_string();
        let durable_key = key.clone();
        let target = target.as_str().to_string();

        self.with_conn(move |conn, company_id| {
            let now = Utc::now().to_rfc3339();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute(
                "INSERT INTO crawl_visits (url, company_id, status, reason, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(url, company_id) DO UPDATE SET
                     status = excluded.status,
                     reason = excluded.reason,
                     updated_at = excluded.updated_at",
                params![durable_key, company_id, STATUS_REDIRECTED, target, now],
            )?;
            tx.execute(
                "DELETE FROM crawl_frontier WHERE url = ?1 AND company_id = ?2",
                params![durable_key, company_id],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await?;

        self.claims().insert(key.clone());
        self.forget_claim_lock(&key);
        Ok(())
    }

    async fn release(&self, url: &Url) -> StoreResult<()> {
        let key = url.as_str().to_string();
        let durable_key = key.clone();

        // A claim whose caller timed out may still be inserting its row
        let lock = self.claim_lock(&key);
        let _settled = lock.lock().await;

        let result = self
            .with_conn(move |conn, company_id| {
                conn.execute(
                    "DELETE FROM crawl_visits WHERE url = ?1 AND company_id = ?2 AND status = ?3",
                    params![durable_key, company_id, STATUS_CLAIMED],
                )?;
                Ok(())
            })
            .await;

        self.claims().remove(&key);
        self.forget_claim_lock(&key);
        result
    }

    async fn is_visited(&self, url: &Url) -> StoreResult<bool> {
        let key = url.as_str().to_string();
        self.with_conn(move |conn, company_id| {
            let visited: bool = conn.query_row(
                "SELECT EXISTS(
                     SELECT 1 FROM crawl_visits
                     WHERE url = ?1 AND company_id = ?2 AND status IN (?3, ?4, ?5)
                 ) OR EXISTS(
                     SELECT 1 FROM crawl_data WHERE url = ?1 AND company_id = ?2
                 )",
                params![key, company_id, STATUS_COMMITTED, STATUS_FAILED, STATUS_REDIRECTED],
                |row| row.get(0),
            )?;
            Ok(visited)
        })
        .await
    }

    fn is_claimed(&self, url: &Url) -> bool {
        self.claims().contains(url.as_str())
    }

    async fn save_pending(&self, tasks: &[CrawlTask]) -> StoreResult<()> {
        if tasks.is_empty() {
            return Ok(());
        }

        let rows: Vec<(String, Option<String>, String)> = tasks
            .iter()
            .map(|task| {
                (
                    task.url.as_str().to_string(),
                    task.discovered_from.as_ref().map(|u| u.as_str().to_string()),
                    task.enqueued_at.to_rfc3339(),
                )
            })
            .collect();

        self.with_conn(move |conn, company_id| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO crawl_frontier (url, company_id, discovered_from, enqueued_at)
                     SELECT ?1, ?2, ?3, ?4
                     WHERE NOT EXISTS (
                         SELECT 1 FROM crawl_visits
                         WHERE url = ?1 AND company_id = ?2 AND status IN (?5, ?6, ?7)
                     )",
                )?;
                for (url, from, enqueued_at) in &rows {
                    stmt.execute(params![
                        url,
                        company_id,
                        from,
                        enqueued_at,
                        STATUS_COMMITTED,
                        STATUS_FAILED,
                        STATUS_REDIRECTED
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn load_pending(&self) -> StoreResult<Vec<CrawlTask>> {
        let rows = self
            .with_conn(|conn, company_id| {
                let mut stmt = conn.prepare(
                    "SELECT url, discovered_from, enqueued_at FROM crawl_frontier
                     WHERE company_id = ?1 ORDER BY enqueued_at, rowid",
                )?;
                let rows = stmt
                    .query_map(params![company_id], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut tasks = Vec::with_capacity(rows.len());
        for (url, from, enqueued_at) in rows {
            let url = match Url::parse(&url) {
                Ok(url) => url,
                Err(e) => {
                    tracing::warn!("Dropping unparseable pending URL {}: {}", url, e);
                    continue;
                }
            };
            let discovered_from = from.and_then(|f| Url::parse(&f).ok());
            let enqueued_at = DateTime::parse_from_rfc3339(&enqueued_at)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());

            tasks.push(CrawlTask::restored(url, discovered_from, enqueued_at));
        }

        Ok(tasks)
    }
}

/// Deletes claims that never reached a terminal state
fn recover_stale_claims(conn: &Connection, company_id: i64) -> StoreResult<usize> {
    let removed = conn.execute(
        "DELETE FROM crawl_visits WHERE company_id = ?1 AND status = ?2",
        params![company_id, STATUS_CLAIMED],
    )?;
    Ok(removed)
}

/// Loads committed, failed and redirected URLs for the in-process view
fn load_visited(conn: &Connection, company_id: i64) -> StoreResult<HashSet<String>> {
    let mut stmt = conn.prepare(
        "SELECT url FROM crawl_visits WHERE company_id = ?1
         UNION
         SELECT url FROM crawl_data WHERE company_id = ?1",
    )?;
    let urls = stmt
        .query_map(params![company_id], |row| row.get::<_, String>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(urls)
}
