//! Embedding worker thread pool.
//!
//! Runs inference in dedicated threads to avoid blocking the async runtime.
//! Each job carries one text; callers await the reply on a oneshot channel.
//!
//! Callers wait for a queue slot on a semaphore before enqueueing, so the
//! channel never fills and `embed` never blocks the calling thread.

use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};

use super::{EmbedResult, Embedder};
use crate::error::EmbeddingError;

/// Jobs that may be queued or running at once; later callers wait.
pub const QUEUE_CAPACITY: usize = 256;

/// Request to embed one text.
struct EmbeddingJob {
    text: String,
    response_tx: oneshot::Sender<EmbedResult<Vec<f32>>>,
    /// Queue slot, released once the job has been handled.
    slot: OwnedSemaphorePermit,
}

/// Worker pool for embedding generation.
pub struct EmbeddingWorker {
    request_tx: Sender<EmbeddingJob>,
    slots: Arc<Semaphore>,
    num_workers: usize,
    _workers: Vec<std::thread::JoinHandle<()>>,
}

impl EmbeddingWorker {
    /// Create a new embedding worker pool.
    ///
    /// # Arguments
    ///
    /// * `embedder` - Model shared by every worker
    /// * `num_workers` - Number of worker threads, i.e. the inference parallelism
    ///
    /// # Errors
    ///
    /// Returns an error if a worker thread cannot be spawned.
    pub fn new(embedder: Arc<dyn Embedder>, num_workers: usize) -> EmbedResult<Self> {
        let num_workers = num_workers.max(1);
        let (request_tx, request_rx): (Sender<EmbeddingJob>, Receiver<EmbeddingJob>) =
            bounded(QUEUE_CAPACITY);

        let mut workers = Vec::with_capacity(num_workers);
        for i in 0..num_workers {
            let embedder = Arc::clone(&embedder);
            let rx = request_rx.clone();

            let handle = std::thread::Builder::new()
                .name(format!("embedding-worker-{i}"))
                .spawn(move || worker_loop(embedder.as_ref(), &rx))
                .map_err(|e| EmbeddingError::WorkerPool(format!("failed to spawn worker: {e}")))?;

            workers.push(handle);
        }

        tracing::info!(num_workers, "Embedding worker pool started");

        Ok(Self {
            request_tx,
            slots: Arc::new(Semaphore::new(QUEUE_CAPACITY)),
            num_workers,
            _workers: workers,
        })
    }

    /// Embed one text on the pool.
    ///
    /// # Errors
    ///
    /// Returns the embedder's error, or a worker pool error if the pool is gone.
    pub async fn embed(&self, text: String) -> EmbedResult<Vec<f32>> {
        let slot = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| EmbeddingError::WorkerPool("worker pool closed".to_string()))?;
        let (response_tx, response_rx) = oneshot::channel();

        // Holding a slot guarantees room in the channel.
        self.request_tx
            .try_send(EmbeddingJob {
                text,
                response_tx,
                slot,
            })
            .map_err(|e| match e {
                TrySendError::Full(_) => EmbeddingError::WorkerPool("worker queue full".to_string()),
                TrySendError::Disconnected(_) => {
                    EmbeddingError::WorkerPool("worker pool closed".to_string())
                }
            })?;

        response_rx
            .await
            .map_err(|_| EmbeddingError::WorkerPool("worker dropped response".to_string()))?
    }

    /// Number of worker threads.
    #[must_use]
    pub const fn num_workers(&self) -> usize {
        self.num_workers
    }
}

impl std::fmt::Debug for EmbeddingWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingWorker")
            .field("num_workers", &self.num_workers)
            .field("queued", &self.request_tx.len())
            .field("free_slots", &self.slots.available_permits())
            .finish()
    }
}

/// Pull jobs until every sender is dropped.
fn worker_loop(embedder: &dyn Embedder, request_rx: &Receiver<EmbeddingJob>) {
    while let Ok(job) = request_rx.recv() {
        let EmbeddingJob {
            text,
            response_tx,
            slot,
        } = job;
        let result = embedder.embed(&text);
        drop(slot);

        // Receiver may have given up; nothing to do then.
        let _ = response_tx.send(result);
    }
    tracing::debug!("Embedding worker shutting down");
}
