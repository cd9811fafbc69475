//! The asynchronous embedding backfill worker.
//!
//! Fact inserts enqueue their content here; a background task encodes it,
//! persists the vector into `fact_embeddings` through the single writer and
//! feeds the in-memory index. The queue is bounded and drops on full, and
//! failures are logged and counted; they never propagate to the `store`
//! call. Retrieval treats a missing embedding as non-failure (the lexical
//! arm still returns the fact).

use crate::index::{vector_to_blob, VectorIndex};
use crate::Embedder;
use cortex_storage::{sql_params, WriteWorker};
use cortex_telemetry::store_metrics;
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default bound of the backfill queue.
pub const DEFAULT_QUEUE_SIZE: usize = 1024;

struct EmbedJob {
    fact_id: i64,
    content: String,
}

/// Handle to the backfill worker.
pub struct EmbeddingBackfill {
    tx: StdMutex<Option<mpsc::Sender<EmbedJob>>>,
    handle: StdMutex<Option<JoinHandle<()>>>,
}

impl EmbeddingBackfill {
    /// Spawns the worker task.
    pub fn spawn(
        writer: Arc<WriteWorker>,
        index: Arc<RwLock<VectorIndex>>,
        embedder: Arc<dyn Embedder>,
        queue_size: usize,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<EmbedJob>(queue_size.max(1));
        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if let Err(e) = process(&writer, &index, embedder.as_ref(), &job).await {
                    store_metrics().inc_background_failures("embedding");
                    warn!(fact_id = job.fact_id, "embedding backfill failed: {e}");
                }
            }
            debug!("embedding backfill drained and exited");
        });
        EmbeddingBackfill {
            tx: StdMutex::new(Some(tx)),
            handle: StdMutex::new(Some(handle)),
        }
    }

    /// Enqueues a fact for embedding. Drops (with a warning) when the
    /// queue is full or the worker is closed; the fact still persists and
    /// remains reachable through the lexical arm.
    pub fn enqueue(&self, fact_id: i64, content: String) {
        let sender = match self.tx.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        };
        let Some(sender) = sender else {
            return;
        };
        if sender.try_send(EmbedJob { fact_id, content }).is_err() {
            store_metrics().inc_background_failures("embedding_queue_full");
            warn!(fact_id, "embedding queue full, dropping backfill job");
        }
    }

    /// Closes the queue and waits for in-flight jobs to finish.
    pub async fn close(&self) {
        let sender = self.tx.lock().ok().and_then(|mut guard| guard.take());
        drop(sender);
        let handle = self.handle.lock().ok().and_then(|mut guard| guard.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn process(
    writer: &WriteWorker,
    index: &RwLock<VectorIndex>,
    embedder: &dyn Embedder,
    job: &EmbedJob,
) -> Result<(), String> {
    let vector = embedder
        .encode(&job.content)
        .await
        .map_err(|e| e.to_string())?;
    writer
        .execute(
            "INSERT OR REPLACE INTO fact_embeddings (fact_id, embedding, dim) VALUES (?1, ?2, ?3)",
            sql_params![job.fact_id, vector_to_blob(&vector), vector.len() as i64],
        )
        .await
        .map_err(|e| e.to_string())?;
    index
        .write()
        .map_err(|_| "index lock poisoned".to_string())?
        .insert(job.fact_id, vector)
        .map_err(|e| e.to_string())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::FeatureHashEmbedder;
    use tempfile::tempdir;

    #[tokio::test]
    async fn backfill_persists_and_indexes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.db");
        let conn = cortex_storage::open_writer(&path).unwrap();
        cortex_storage::migrations::initialize(&conn).unwrap();
        conn.execute(
            "INSERT INTO facts (tenant_id, project, content, valid_from, created_at, updated_at)
             VALUES ('t', 'p', 'vector content body here', '2026-01-01', '2026-01-01', '2026-01-01')",
            [],
        )
        .unwrap();
        drop(conn);

        let writer = Arc::new(WriteWorker::start(&path).unwrap());
        let index = Arc::new(RwLock::new(VectorIndex::new(64)));
        let embedder: Arc<dyn Embedder> = Arc::new(FeatureHashEmbedder::new(64));
        let backfill = EmbeddingBackfill::spawn(
            Arc::clone(&writer),
            Arc::clone(&index),
            embedder,
            DEFAULT_QUEUE_SIZE,
        );

        backfill.enqueue(1, "vector content body here".to_string());
        backfill.close().await;

        let row = writer
            .query_row("SELECT dim FROM fact_embeddings WHERE fact_id = 1", vec![])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row[0].as_i64(), Some(64));
        assert_eq!(index.read().unwrap().len(), 1);
        writer.stop().await;
    }

    #[tokio::test]
    async fn enqueue_after_close_is_a_noop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.db");
        let conn = cortex_storage::open_writer(&path).unwrap();
        cortex_storage::migrations::initialize(&conn).unwrap();
        drop(conn);

        let writer = Arc::new(WriteWorker::start(&path).unwrap());
        let index = Arc::new(RwLock::new(VectorIndex::new(8)));
        let embedder: Arc<dyn Embedder> = Arc::new(FeatureHashEmbedder::new(8));
        let backfill =
            EmbeddingBackfill::spawn(Arc::clone(&writer), index, embedder, 4);
        backfill.close().await;
        backfill.enqueue(1, "late".to_string());
        writer.stop().await;
    }
}
