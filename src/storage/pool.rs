//! Bounded SQLite connection pool
//!
//! Connections are handed out as [`PooledConnection`] guards. Dropping the
//! guard puts the connection back and frees its slot, so a connection is
//! returned on every exit path of the task that acquired it.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{StoreError, StoreResult};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// How long a pooled connection waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Fixed-size pool of connections to one SQLite file
pub struct ConnectionPool {
    path: PathBuf,
    idle: Mutex<Vec<Connection>>,
    permits: Arc<Semaphore>,
    size: usize,
}

impl ConnectionPool {
    /// Opens the pool; one connection is created eagerly to initialize the schema
    pub fn open(path: &Path, size: usize) -> StoreResult<Arc<Self>> {
        let size = size.max(1);
        let first = open_connection(path)?;
        initialize_schema(&first)?;

        Ok(Arc::new(Self {
            path: path.to_path_buf(),
            idle: Mutex::new(vec![first]),
            permits: Arc::new(Semaphore::new(size)),
            size,
        }))
    }

    /// Waits for a free slot and returns a connection guard
    pub async fn acquire(self: &Arc<Self>) -> StoreResult<PooledConnection> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| StoreError::Closed)?;

        let idle = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();

        let conn = match idle {
            Some(conn) => conn,
            None => open_connection(&self.path)?,
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    /// Maximum number of simultaneously checked-out connections
    pub fn size(&self) -> usize {
        self.size
    }

    /// Slots currently free
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Rejects all further acquisitions
    pub fn close(&self) {
        self.permits.close();
    }

    fn put_back(&self, conn: Connection) {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(conn);
    }
}

/// A checked-out connection; returned to the pool on drop
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<ConnectionPool>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// Mutable access to the underlying connection
    pub fn get(&mut self) -> StoreResult<&mut Connection> {
        self.conn.as_mut().ok_or(StoreError::Closed)
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.put_back(conn);
        }
    }
}

/// Opens and configures one SQLite connection
pub(crate) fn open_connection(path: &Path) -> StoreResult<Connection> {
    let conn = Connection::open(path).map_err(|e| {
        StoreError::Unavailable(format!("cannot open {}: {}", path.display(), e))
    })?;

    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA temp_store = MEMORY;
    ",
    )?;
    conn.busy_timeout(BUSY_TIMEOUT)?;

    Ok(conn)
}
