//! The single-writer serialization queue.
//!
//! All mutations are routed through one dedicated OS thread holding one
//! persistent writer connection. Messages are tagged variants carrying a
//! one-shot reply slot; the loop pops them in FIFO order, so ledger order
//! matches dequeue order and `SQLITE_BUSY` cannot occur by construction.
//!
//! ```text
//! ┌──────────────┐    mpsc queue      ┌──────────────────┐
//! │ async callers├───────────────────►│   writer loop    │
//! │              │                    │ (dedicated thread)│
//! └──────────────┘   oneshot reply    └──────┬───────────┘
//!                 ◄──────────────────────────┘
//!                                      single SQLite
//!                                      connection (WAL)
//! ```
//!
//! On `Shutdown` the loop drains queued write operations before exiting so
//! no caller is left hanging, then issues a TRUNCATE-class checkpoint.

use crate::substrate::{self, map_sqlite_err, SqlValue};
use cortex_telemetry::writer_metrics;
use cortex_types::error::StorageError;
use rusqlite::{params_from_iter, Connection};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Default bound of the writer queue.
pub const DEFAULT_QUEUE_SIZE: usize = 10_000;

/// Checkpoint the WAL every N writes to bound its growth.
pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 5000;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// The result of a single write operation.
#[derive(Debug, Clone, Copy)]
pub struct WriteOutcome {
    /// Rows affected by the statement.
    pub rows_affected: usize,
    /// `last_insert_rowid()` after the statement.
    pub last_insert_rowid: i64,
}

type WriteReply = oneshot::Sender<Result<WriteOutcome, StorageError>>;
type RowReply = oneshot::Sender<Result<Option<Vec<SqlValue>>, StorageError>>;
type UnitReply = oneshot::Sender<Result<(), StorageError>>;
type PagesReply = oneshot::Sender<Result<i64, StorageError>>;

enum WriteMessage {
    WriteOp {
        sql: String,
        params: Vec<SqlValue>,
        reply: WriteReply,
    },
    /// A read executed on the writer connection, so an open transaction can
    /// observe its own uncommitted rows (the ledger append requires this).
    QueryRow {
        sql: String,
        params: Vec<SqlValue>,
        reply: RowReply,
    },
    TxBegin {
        reply: UnitReply,
    },
    TxCommit {
        reply: UnitReply,
    },
    TxRollback {
        reply: UnitReply,
    },
    Checkpoint {
        reply: PagesReply,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the single-writer queue. Cheap to share behind an `Arc`.
pub struct WriteWorker {
    tx: mpsc::Sender<WriteMessage>,
    handle: StdMutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
    queue_size: usize,
    db_path: PathBuf,
    /// Serializes transaction scopes: one `BEGIN IMMEDIATE` at a time.
    /// Plain `execute` calls still interleave and ride the open scope.
    tx_gate: Arc<tokio::sync::Mutex<()>>,
}

impl WriteWorker {
    /// Opens the writer connection and starts the loop thread.
    pub fn start(db_path: &Path) -> Result<Self, StorageError> {
        Self::start_with(db_path, DEFAULT_QUEUE_SIZE, DEFAULT_CHECKPOINT_INTERVAL)
    }

    /// Starts with explicit queue bound and checkpoint interval.
    pub fn start_with(
        db_path: &Path,
        queue_size: usize,
        checkpoint_interval: u64,
    ) -> Result<Self, StorageError> {
        let conn = substrate::open_writer(db_path)?;
        let (tx, rx) = mpsc::channel(queue_size);
        let handle = std::thread::Builder::new()
            .name("cortex-sqlite-writer".to_string())
            .spawn(move || writer_loop(conn, rx, checkpoint_interval))
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        info!(db = %db_path.display(), queue_size, "write worker started");
        Ok(WriteWorker {
            tx,
            handle: StdMutex::new(Some(handle)),
            running: AtomicBool::new(true),
            queue_size,
            db_path: db_path.to_path_buf(),
            tx_gate: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    /// True while the loop accepts messages.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// The database file this worker owns.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    async fn send(&self, msg: WriteMessage) -> Result<(), StorageError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(StorageError::WriterNotRunning);
        }
        self.tx
            .send(msg)
            .await
            .map_err(|_| StorageError::WriterNotRunning)?;
        let depth = self.queue_size.saturating_sub(self.tx.capacity());
        writer_metrics().set_queue_depth(depth as u64);
        Ok(())
    }

    /// Enqueues a write and awaits its result.
    pub async fn execute(
        &self,
        sql: impl Into<String>,
        params: Vec<SqlValue>,
    ) -> Result<WriteOutcome, StorageError> {
        let (reply, rx) = oneshot::channel();
        self.send(WriteMessage::WriteOp {
            sql: sql.into(),
            params,
            reply,
        })
        .await?;
        rx.await.map_err(|_| StorageError::WriterShutdown)?
    }

    /// Runs a single-row query on the writer connection.
    pub async fn query_row(
        &self,
        sql: impl Into<String>,
        params: Vec<SqlValue>,
    ) -> Result<Option<Vec<SqlValue>>, StorageError> {
        let (reply, rx) = oneshot::channel();
        self.send(WriteMessage::QueryRow {
            sql: sql.into(),
            params,
            reply,
        })
        .await?;
        rx.await.map_err(|_| StorageError::WriterShutdown)?
    }

    /// Executes a batch of writes as one transaction (`BEGIN IMMEDIATE` ...
    /// `COMMIT`), rolled back on the first error.
    pub async fn execute_many(
        &self,
        operations: Vec<(String, Vec<SqlValue>)>,
    ) -> Result<usize, StorageError> {
        let tx = self.transaction().await?;
        let mut total = 0usize;
        for (sql, params) in operations {
            match tx.execute(sql, params).await {
                Ok(outcome) => total += outcome.rows_affected,
                Err(e) => {
                    tx.rollback().await?;
                    return Err(e);
                }
            }
        }
        tx.commit().await?;
        Ok(total)
    }

    /// Opens a transaction scope. Scopes from concurrent tasks serialize
    /// on an async gate; within the scope, writes apply in submission
    /// order. Commit explicitly; dropping the guard without committing
    /// requests a rollback.
    pub async fn transaction(&self) -> Result<Transaction<'_>, StorageError> {
        let permit = Arc::clone(&self.tx_gate).lock_owned().await;
        let (reply, rx) = oneshot::channel();
        self.send(WriteMessage::TxBegin { reply }).await?;
        rx.await.map_err(|_| StorageError::WriterShutdown)??;
        Ok(Transaction {
            worker: self,
            finished: false,
            _permit: permit,
        })
    }

    /// Requests a PASSIVE WAL checkpoint; returns pages checkpointed.
    pub async fn checkpoint(&self) -> Result<i64, StorageError> {
        let (reply, rx) = oneshot::channel();
        self.send(WriteMessage::Checkpoint { reply }).await?;
        rx.await.map_err(|_| StorageError::WriterShutdown)?
    }

    /// Gracefully stops the loop: drains queued writes, issues a TRUNCATE
    /// checkpoint, closes the connection. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let (reply, rx) = oneshot::channel();
        if self.tx.send(WriteMessage::Shutdown { reply }).await.is_ok() {
            if tokio::time::timeout(SHUTDOWN_GRACE, rx).await.is_err() {
                warn!("write worker shutdown timed out");
            }
        }
        let handle = self.handle.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            let _ = tokio::task::spawn_blocking(move || handle.join()).await;
        }
        info!("write worker stopped");
    }
}

/// A transaction scope on the writer. Sub-executions reuse the worker.
pub struct Transaction<'a> {
    worker: &'a WriteWorker,
    finished: bool,
    _permit: tokio::sync::OwnedMutexGuard<()>,
}

impl Transaction<'_> {
    /// Executes a write inside the transaction.
    pub async fn execute(
        &self,
        sql: impl Into<String>,
        params: Vec<SqlValue>,
    ) -> Result<WriteOutcome, StorageError> {
        self.worker.execute(sql, params).await
    }

    /// Runs a single-row query inside the transaction; sees uncommitted rows.
    pub async fn query_row(
        &self,
        sql: impl Into<String>,
        params: Vec<SqlValue>,
    ) -> Result<Option<Vec<SqlValue>>, StorageError> {
        self.worker.query_row(sql, params).await
    }

    async fn end(&mut self, msg_commit: bool) -> Result<(), StorageError> {
        self.finished = true;
        let (reply, rx) = oneshot::channel();
        let msg = if msg_commit {
            WriteMessage::TxCommit { reply }
        } else {
            WriteMessage::TxRollback { reply }
        };
        self.worker.send(msg).await?;
        rx.await.map_err(|_| StorageError::WriterShutdown)?
    }

    /// Commits the transaction.
    pub async fn commit(mut self) -> Result<(), StorageError> {
        self.end(true).await
    }

    /// Rolls the transaction back.
    pub async fn rollback(mut self) -> Result<(), StorageError> {
        self.end(false).await
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            // Best-effort rollback; the reply is discarded.
            let (reply, _rx) = oneshot::channel();
            let _ = self.worker.tx.try_send(WriteMessage::TxRollback { reply });
        }
    }
}

// --- Writer loop (dedicated thread) ---

fn writer_loop(
    conn: Connection,
    mut rx: mpsc::Receiver<WriteMessage>,
    checkpoint_interval: u64,
) {
    debug!("writer loop started");
    let mut write_count: u64 = 0;

    while let Some(msg) = rx.blocking_recv() {
        match msg {
            WriteMessage::Shutdown { reply } => {
                drain_on_shutdown(&conn, &mut rx, &mut write_count, checkpoint_interval);
                if !conn.is_autocommit() {
                    let _ = conn.execute_batch("ROLLBACK");
                }
                match conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(())) {
                    Ok(()) => debug!("final WAL checkpoint completed on shutdown"),
                    Err(e) => warn!("WAL checkpoint on shutdown failed: {e}"),
                }
                let _ = reply.send(());
                break;
            }
            WriteMessage::WriteOp { sql, params, reply } => {
                let result = process_write(&conn, &sql, &params);
                if result.is_ok() {
                    write_count += 1;
                    maybe_checkpoint(&conn, &mut write_count, checkpoint_interval);
                }
                let _ = reply.send(result);
            }
            WriteMessage::QueryRow { sql, params, reply } => {
                let _ = reply.send(process_query(&conn, &sql, &params));
            }
            WriteMessage::TxBegin { reply } => {
                let _ = reply.send(exec_control(&conn, "BEGIN IMMEDIATE"));
            }
            WriteMessage::TxCommit { reply } => {
                let _ = reply.send(exec_control(&conn, "COMMIT"));
            }
            WriteMessage::TxRollback { reply } => {
                let result = exec_control(&conn, "ROLLBACK");
                if let Err(e) = &result {
                    error!("ROLLBACK failed: {e}");
                }
                let _ = reply.send(result);
            }
            WriteMessage::Checkpoint { reply } => {
                let _ = reply.send(passive_checkpoint(&conn));
            }
        }
    }
    debug!("writer loop exited");
}

/// Drain remaining queued operations so no caller is left hanging.
/// Transaction control and checkpoint requests received after shutdown are
/// answered with a shutdown error.
fn drain_on_shutdown(
    conn: &Connection,
    rx: &mut mpsc::Receiver<WriteMessage>,
    write_count: &mut u64,
    checkpoint_interval: u64,
) {
    while let Ok(msg) = rx.try_recv() {
        match msg {
            WriteMessage::WriteOp { sql, params, reply } => {
                let result = process_write(conn, &sql, &params);
                if result.is_ok() {
                    *write_count += 1;
                    maybe_checkpoint(conn, write_count, checkpoint_interval);
                }
                let _ = reply.send(result);
            }
            WriteMessage::QueryRow { sql, params, reply } => {
                let _ = reply.send(process_query(conn, &sql, &params));
            }
            WriteMessage::TxBegin { reply }
            | WriteMessage::TxCommit { reply }
            | WriteMessage::TxRollback { reply } => {
                let _ = reply.send(Err(StorageError::WriterShutdown));
            }
            WriteMessage::Checkpoint { reply } => {
                let _ = reply.send(Err(StorageError::WriterShutdown));
            }
            WriteMessage::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }
}

fn process_write(
    conn: &Connection,
    sql: &str,
    params: &[SqlValue],
) -> Result<WriteOutcome, StorageError> {
    match conn.execute(sql, params_from_iter(params.iter())) {
        Ok(rows_affected) => {
            writer_metrics().inc_writes();
            Ok(WriteOutcome {
                rows_affected,
                last_insert_rowid: conn.last_insert_rowid(),
            })
        }
        Err(e) => {
            writer_metrics().inc_write_errors();
            let sql_head: String = sql.chars().take(100).collect();
            warn!("write failed: {e} | SQL: {sql_head}");
            Err(map_sqlite_err(e))
        }
    }
}

fn process_query(
    conn: &Connection,
    sql: &str,
    params: &[SqlValue],
) -> Result<Option<Vec<SqlValue>>, StorageError> {
    let mut stmt = conn.prepare(sql).map_err(map_sqlite_err)?;
    let mut rows = stmt
        .query(params_from_iter(params.iter()))
        .map_err(map_sqlite_err)?;
    match rows.next().map_err(map_sqlite_err)? {
        Some(row) => {
            let count = row.as_ref().column_count();
            let mut cells = Vec::with_capacity(count);
            for i in 0..count {
                let cell = row.get_ref(i).map_err(map_sqlite_err)?;
                cells.push(SqlValue::from(cell));
            }
            Ok(Some(cells))
        }
        None => Ok(None),
    }
}

fn exec_control(conn: &Connection, sql: &str) -> Result<(), StorageError> {
    conn.execute_batch(sql).map_err(|e| {
        let mapped = map_sqlite_err(e);
        StorageError::Backend(format!("{sql} failed: {mapped}"))
    })
}

fn maybe_checkpoint(conn: &Connection, write_count: &mut u64, interval: u64) {
    // Never checkpoint mid-transaction; the WAL cannot be reset then anyway.
    if *write_count < interval || !conn.is_autocommit() {
        return;
    }
    match passive_checkpoint(conn) {
        Ok(pages) => {
            *write_count = 0;
            debug!("periodic WAL checkpoint: {pages} pages");
        }
        Err(_) => {
            // Non-critical: retries at the next interval.
        }
    }
}

fn passive_checkpoint(conn: &Connection) -> Result<i64, StorageError> {
    let pages = conn
        .query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |row| {
            row.get::<_, i64>(1)
        })
        .map_err(map_sqlite_err)?;
    writer_metrics().inc_checkpoints();
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql_params;
    use tempfile::tempdir;

    async fn worker(dir: &tempfile::TempDir) -> WriteWorker {
        let w = WriteWorker::start(&dir.path().join("t.db")).unwrap();
        w.execute("CREATE TABLE kv (k TEXT PRIMARY KEY, v INTEGER)", vec![])
            .await
            .unwrap();
        w
    }

    #[tokio::test]
    async fn execute_reports_rowid_and_rowcount() {
        let dir = tempdir().unwrap();
        let w = worker(&dir).await;
        let out = w
            .execute("INSERT INTO kv (k, v) VALUES (?1, ?2)", sql_params!["a", 1i64])
            .await
            .unwrap();
        assert_eq!(out.rows_affected, 1);
        assert_eq!(out.last_insert_rowid, 1);
        w.stop().await;
    }

    #[tokio::test]
    async fn failed_write_does_not_kill_worker() {
        let dir = tempdir().unwrap();
        let w = worker(&dir).await;
        assert!(w.execute("INSERT INTO nope VALUES (1)", vec![]).await.is_err());
        // Next message is processed normally.
        let out = w
            .execute("INSERT INTO kv (k, v) VALUES ('b', 2)", vec![])
            .await
            .unwrap();
        assert_eq!(out.rows_affected, 1);
        w.stop().await;
    }

    #[tokio::test]
    async fn execute_many_rolls_back_whole_batch() {
        let dir = tempdir().unwrap();
        let w = worker(&dir).await;
        let err = w
            .execute_many(vec![
                ("INSERT INTO kv (k, v) VALUES ('x', 1)".to_string(), vec![]),
                ("INSERT INTO broken".to_string(), vec![]),
            ])
            .await;
        assert!(err.is_err());
        let row = w
            .query_row("SELECT COUNT(*) FROM kv", vec![])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row[0].as_i64(), Some(0));
        w.stop().await;
    }

    #[tokio::test]
    async fn transaction_scope_commits_and_sees_own_rows() {
        let dir = tempdir().unwrap();
        let w = worker(&dir).await;
        let tx = w.transaction().await.unwrap();
        tx.execute("INSERT INTO kv (k, v) VALUES ('t', 7)", vec![])
            .await
            .unwrap();
        // Uncommitted row is visible through the writer connection.
        let row = tx
            .query_row("SELECT v FROM kv WHERE k = 't'", vec![])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row[0].as_i64(), Some(7));
        tx.commit().await.unwrap();

        let row = w
            .query_row("SELECT v FROM kv WHERE k = 't'", vec![])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row[0].as_i64(), Some(7));
        w.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_rejects_later_writes() {
        let dir = tempdir().unwrap();
        let w = worker(&dir).await;
        w.stop().await;
        w.stop().await;
        assert!(matches!(
            w.execute("INSERT INTO kv (k, v) VALUES ('z', 1)", vec![]).await,
            Err(StorageError::WriterNotRunning)
        ));
    }

    #[tokio::test]
    async fn concurrent_transaction_scopes_serialize() {
        let dir = tempdir().unwrap();
        let w = Arc::new(worker(&dir).await);
        let mut handles = Vec::new();
        for i in 0..8i64 {
            let w = Arc::clone(&w);
            handles.push(tokio::spawn(async move {
                let tx = w.transaction().await.unwrap();
                tx.execute(
                    "INSERT INTO kv (k, v) VALUES (?1, ?2)",
                    sql_params![format!("tx{i}"), i],
                )
                .await
                .unwrap();
                tx.commit().await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let row = w
            .query_row("SELECT COUNT(*) FROM kv", vec![])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row[0].as_i64(), Some(8));
        w.stop().await;
    }

    #[tokio::test]
    async fn checkpoint_succeeds() {
        let dir = tempdir().unwrap();
        let w = worker(&dir).await;
        for i in 0..10i64 {
            w.execute(
                "INSERT INTO kv (k, v) VALUES (?1, ?2)",
                sql_params![format!("k{i}"), i],
            )
            .await
            .unwrap();
        }
        let pages = w.checkpoint().await.unwrap();
        assert!(pages >= 0);
        w.stop().await;
    }
}
