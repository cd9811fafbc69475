//! The bounded pool of read-only connections.
//!
//! A semaphore bounds concurrency at `max_connections`; a queue of warm
//! connections avoids reopening on every read. Before a connection is
//! yielded it passes a trivial health check; an unhealthy connection is
//! closed and replaced. A connection that sees an error inside the caller's
//! closure is closed, never returned, so dead connections cannot propagate.
//!
//! Closures run on the blocking thread pool; the async scheduler never
//! executes SQLite calls inline.

use crate::substrate::{self, map_sqlite_err};
use cortex_types::error::StorageError;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Default number of pre-warmed readers.
pub const DEFAULT_MIN_CONNECTIONS: usize = 2;

/// A pool of `query_only` reader connections.
pub struct ReadPool {
    db_path: PathBuf,
    idle: Arc<StdMutex<Vec<Connection>>>,
    semaphore: Arc<Semaphore>,
    max_connections: usize,
}

impl ReadPool {
    /// Opens the pool, pre-warming `min_connections` readers.
    pub fn open(
        db_path: &Path,
        min_connections: usize,
        max_connections: usize,
    ) -> Result<Self, StorageError> {
        let max_connections = max_connections.max(min_connections).max(1);
        let mut warm = Vec::with_capacity(min_connections);
        for _ in 0..min_connections {
            warm.push(substrate::open_reader(db_path)?);
        }
        info!(
            db = %db_path.display(),
            min = min_connections,
            max = max_connections,
            "read pool initialized"
        );
        Ok(ReadPool {
            db_path: db_path.to_path_buf(),
            idle: Arc::new(StdMutex::new(warm)),
            semaphore: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        })
    }

    /// The pool's concurrency bound.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Runs a read closure on a pooled connection.
    ///
    /// Acquires a permit (bounding concurrency), takes a warm connection or
    /// opens a fresh one, health-checks it, and executes `f` on the blocking
    /// pool. On success the connection returns to the queue; on error it is
    /// closed.
    pub async fn run<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StorageError::Backend("read pool closed".to_string()))?;

        let idle = Arc::clone(&self.idle);
        let db_path = self.db_path.clone();

        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let conn = checkout(&idle, &db_path)?;
            match f(&conn) {
                Ok(value) => {
                    if let Ok(mut queue) = idle.lock() {
                        queue.push(conn);
                    }
                    Ok(value)
                }
                Err(e) => {
                    // Connection is dropped (closed), never returned.
                    Err(map_sqlite_err(e))
                }
            }
        })
        .await
        .map_err(|e| StorageError::Backend(format!("read task panicked: {e}")))?;

        result
    }

    /// Closes every idle connection. In-flight reads finish on their own.
    pub fn close(&self) {
        if let Ok(mut queue) = self.idle.lock() {
            queue.clear();
        }
    }
}

fn checkout(
    idle: &StdMutex<Vec<Connection>>,
    db_path: &Path,
) -> Result<Connection, StorageError> {
    let existing = idle.lock().ok().and_then(|mut q| q.pop());
    let conn = match existing {
        Some(conn) => conn,
        None => substrate::open_reader(db_path)?,
    };
    if healthy(&conn) {
        return Ok(conn);
    }
    warn!("reader connection unhealthy, replacing");
    drop(conn);
    substrate::open_reader(db_path)
}

fn healthy(conn: &Connection) -> bool {
    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
        .map(|v| v == 1)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::WriteWorker;
    use tempfile::tempdir;

    #[tokio::test]
    async fn reads_see_committed_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.db");
        let w = WriteWorker::start(&path).unwrap();
        w.execute("CREATE TABLE t (x INTEGER)", vec![]).await.unwrap();
        w.execute("INSERT INTO t (x) VALUES (42)", vec![]).await.unwrap();

        let pool = ReadPool::open(&path, 2, 4).unwrap();
        let x: i64 = pool
            .run(|conn| conn.query_row("SELECT x FROM t", [], |r| r.get(0)))
            .await
            .unwrap();
        assert_eq!(x, 42);
        w.stop().await;
    }

    #[tokio::test]
    async fn pool_rejects_writes_at_engine_level() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.db");
        let w = WriteWorker::start(&path).unwrap();
        w.execute("CREATE TABLE t (x INTEGER)", vec![]).await.unwrap();

        let pool = ReadPool::open(&path, 1, 2).unwrap();
        let err = pool
            .run(|conn| conn.execute("INSERT INTO t (x) VALUES (1)", []).map(|_| ()))
            .await;
        assert!(err.is_err());

        // The failed connection was discarded; the pool still serves reads.
        let n: i64 = pool
            .run(|conn| conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)))
            .await
            .unwrap();
        assert_eq!(n, 0);
        w.stop().await;
    }

    #[tokio::test]
    async fn concurrent_reads_are_bounded_but_complete() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.db");
        let w = WriteWorker::start(&path).unwrap();
        w.execute("CREATE TABLE t (x INTEGER)", vec![]).await.unwrap();
        w.execute("INSERT INTO t (x) VALUES (1)", vec![]).await.unwrap();

        let pool = Arc::new(ReadPool::open(&path, 2, 3).unwrap());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move {
                pool.run(|conn| conn.query_row("SELECT SUM(x) FROM t", [], |r| r.get::<_, i64>(0)))
                    .await
                    .unwrap()
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap(), 1);
        }
        w.stop().await;
    }
}
