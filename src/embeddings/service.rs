//! High-level embedding service.
//!
//! The model is loaded on first use. Concurrent first callers share one
//! in-flight load; a failed load is reported to all of them and the next
//! call starts a fresh attempt.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::{join_all, BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use super::loader::ModelLoader;
use super::status::{HealthReport, ServiceInfo};
use super::worker::EmbeddingWorker;
use super::EmbedResult;
use crate::error::EmbeddingError;
use crate::server::metrics::{MODEL_LOADS, MODEL_READY};

/// Model used when none is configured.
pub const DEFAULT_MODEL_ID: &str = "Xenova/all-MiniLM-L6-v2";

/// Texts embedded concurrently per batch.
pub const DEFAULT_BATCH_SIZE: usize = 8;

/// Name reported in service info.
pub const SERVICE_NAME: &str = "vectorizer";

/// Text embedded once to discover the output dimension.
pub const PROBE_TEXT: &str = "dimension probe";

/// Embedding service configuration.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Identifier of the model, reported in health and info records.
    pub model_id: String,

    /// Texts per batch; also the inference parallelism.
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// One text or many.
///
/// A single text is always a one-element request, even when empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextInput {
    One(String),
    Many(Vec<String>),
}

impl TextInput {
    /// Flatten into an ordered list of texts.
    #[must_use]
    pub fn into_texts(self) -> Vec<String> {
        match self {
            Self::One(text) => vec![text],
            Self::Many(texts) => texts,
        }
    }
}

impl From<&str> for TextInput {
    fn from(text: &str) -> Self {
        Self::One(text.to_string())
    }
}

impl From<String> for TextInput {
    fn from(text: String) -> Self {
        Self::One(text)
    }
}

impl From<Vec<String>> for TextInput {
    fn from(texts: Vec<String>) -> Self {
        Self::Many(texts)
    }
}

impl From<Vec<&str>> for TextInput {
    fn from(texts: Vec<&str>) -> Self {
        Self::Many(texts.into_iter().map(str::to_string).collect())
    }
}

/// Observable lifecycle of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Uninitialized,
    Initializing,
    Ready,
}

type InitFuture = Shared<BoxFuture<'static, EmbedResult<Arc<EmbeddingWorker>>>>;

enum InitState {
    Uninitialized,
    Initializing { attempt: u64, future: InitFuture },
    Ready(Arc<EmbeddingWorker>),
}

/// High-level embedding service.
///
/// Thread-safe and can be cloned cheaply; clones share the model.
#[derive(Clone)]
pub struct EmbeddingService {
    inner: Arc<EmbeddingServiceInner>,
}

struct EmbeddingServiceInner {
    config: EmbeddingConfig,
    loader: Arc<dyn ModelLoader>,
    state: Mutex<InitState>,
    attempts: AtomicU64,
    dimension: OnceCell<usize>,
}

impl EmbeddingService {
    /// Create a new embedding service.
    ///
    /// Nothing is loaded until the first call that needs the model.
    #[must_use]
    pub fn new(config: EmbeddingConfig, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            inner: Arc::new(EmbeddingServiceInner {
                config,
                loader,
                state: Mutex::new(InitState::Uninitialized),
                attempts: AtomicU64::new(0),
                dimension: OnceCell::new(),
            }),
        }
    }

    /// Get the configured model identifier.
    #[must_use]
    pub fn model_id(&self) -> &str {
        &self.inner.config.model_id
    }

    /// Get the configured batch size.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.inner.config.batch_size.max(1)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServiceState {
        match *self.inner.state.lock() {
            InitState::Uninitialized => ServiceState::Uninitialized,
            InitState::Initializing { .. } => ServiceState::Initializing,
            InitState::Ready(_) => ServiceState::Ready,
        }
    }

    /// Check if the model is loaded.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state() == ServiceState::Ready
    }

    /// Dimension discovered so far, without triggering any work.
    #[must_use]
    pub fn cached_dimension(&self) -> Option<usize> {
        self.inner.dimension.get().copied()
    }

    /// Load the model if it is not loaded yet.
    ///
    /// Safe to call concurrently: callers arriving while a load is in
    /// flight wait for that load and see its outcome.
    ///
    /// # Errors
    ///
    /// Returns [`EmbeddingError::Initialization`] if the model fails to load.
    pub async fn initialize(&self) -> EmbedResult<()> {
        self.ready_worker().await.map(|_| ())
    }

    async fn ready_worker(&self) -> EmbedResult<Arc<EmbeddingWorker>> {
        let (attempt, future) = {
            let mut state = self.inner.state.lock();
            let (attempt, future) = match &*state {
                InitState::Ready(worker) => return Ok(Arc::clone(worker)),
                InitState::Initializing { attempt, future } => (*attempt, future.clone()),
                InitState::Uninitialized => {
                    let attempt = self.inner.attempts.fetch_add(1, Ordering::Relaxed) + 1;
                    (attempt, self.start_attempt(attempt))
                }
            };
            if matches!(*state, InitState::Uninitialized) {
                *state = InitState::Initializing {
                    attempt,
                    future: future.clone(),
                };
            }
            (attempt, future)
        };

        let outcome = future.await;
        self.settle(attempt, &outcome);
        outcome
    }

    fn start_attempt(&self, attempt: u64) -> InitFuture {
        let loader = Arc::clone(&self.inner.loader);
        let num_workers = self.batch_size();
        let model_id = self.inner.config.model_id.clone();

        async move {
            tracing::info!(model = %model_id, attempt, "Initializing embedding service");
            let started = Instant::now();

            let outcome = match loader.load().await {
                Ok(embedder) => EmbeddingWorker::new(embedder, num_workers).map(Arc::new),
                Err(e) => Err(e),
            }
            .map_err(|e| match e {
                EmbeddingError::Initialization(_) => e,
                other => EmbeddingError::Initialization(other.to_string()),
            });

            match &outcome {
                Ok(_) => {
                    MODEL_LOADS.with_label_values(&["success"]).inc();
                    MODEL_READY.set(1);
                    tracing::info!(
                        model = %model_id,
                        elapsed_ms = started.elapsed().as_millis(),
                        "Embedding service initialized"
                    );
                }
                Err(e) => {
                    MODEL_LOADS.with_label_values(&["failure"]).inc();
                    MODEL_READY.set(0);
                    tracing::warn!(
                        model = %model_id,
                        attempt,
                        error = %e,
                        "Embedding service failed to initialize"
                    );
                }
            }
            outcome
        }
        .boxed()
        .shared()
    }

    /// Record the outcome of `attempt` unless a newer state has replaced it.
    fn settle(&self, attempt: u64, outcome: &EmbedResult<Arc<EmbeddingWorker>>) {
        let mut state = self.inner.state.lock();
        let current = matches!(
            &*state,
            InitState::Initializing { attempt: a, .. } if *a == attempt
        );
        if current {
            *state = match outcome {
                Ok(worker) => InitState::Ready(Arc::clone(worker)),
                Err(_) => InitState::Uninitialized,
            };
        }
    }

    /// Embed texts, returning one vector per text in input order.
    ///
    /// Texts are processed in batches of `batch_size`; a batch runs
    /// concurrently on the worker pool and batches run one after another.
    ///
    /// # Errors
    ///
    /// - [`EmbeddingError::InvalidInput`] if `texts` is empty
    /// - [`EmbeddingError::Initialization`] if the model cannot be loaded
    /// - [`EmbeddingError::Generation`] naming the first text that failed;
    ///   no partial results are returned
    pub async fn embed_many(&self, texts: Vec<String>) -> EmbedResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Err(EmbeddingError::InvalidInput(
                "at least one text is required".to_string(),
            ));
        }

        let worker = self.ready_worker().await?;
        let batch_size = self.batch_size();
        let expected_dim = self.cached_dimension();
        let mut embeddings = Vec::with_capacity(texts.len());

        for (batch_index, batch) in texts.chunks(batch_size).enumerate() {
            let offset = batch_index * batch_size;
            let results = join_all(batch.iter().map(|text| worker.embed(text.clone()))).await;

            for (i, result) in results.into_iter().enumerate() {
                let index = offset + i;
                let embedding = result.map_err(|e| {
                    tracing::warn!(index, batch = batch_index, error = %e, "Embedding failed");
                    EmbeddingError::generation(index, &texts[index], e)
                })?;

                if let Some(dim) = expected_dim {
                    if embedding.len() != dim {
                        return Err(EmbeddingError::generation(
                            index,
                            &texts[index],
                            format!("expected {dim} dimensions, got {}", embedding.len()),
                        ));
                    }
                }
                embeddings.push(embedding);
            }
        }

        tracing::debug!(
            count = embeddings.len(),
            batches = texts.len().div_ceil(batch_size),
            "Generated embeddings"
        );
        Ok(embeddings)
    }

    /// Embed one text or many.
    ///
    /// # Errors
    ///
    /// Same as [`Self::embed_many`].
    pub async fn embed_documents(
        &self,
        input: impl Into<TextInput> + Send,
    ) -> EmbedResult<Vec<Vec<f32>>> {
        self.embed_many(input.into().into_texts()).await
    }

    /// Embed a single text.
    ///
    /// # Errors
    ///
    /// Same as [`Self::embed_many`].
    pub async fn embed_one(&self, text: impl Into<String> + Send) -> EmbedResult<Vec<f32>> {
        self.embed_many(vec![text.into()])
            .await?
            .pop()
            .ok_or_else(|| EmbeddingError::WorkerPool("no embedding returned".to_string()))
    }

    /// Length of the vectors this model produces.
    ///
    /// Measured once from a probe embedding and cached for the life of
    /// the service.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be loaded or the probe fails.
    pub async fn embedding_dimension(&self) -> EmbedResult<usize> {
        self.initialize().await?;

        let dim = self
            .inner
            .dimension
            .get_or_try_init(|| async {
                let probe = self.embed_one(PROBE_TEXT).await?;
                tracing::info!(dimension = probe.len(), "Discovered embedding dimension");
                Ok::<_, EmbeddingError>(probe.len())
            })
            .await?;

        Ok(*dim)
    }

    /// Report operational status. Never fails; errors land in the report.
    pub async fn health_check(&self) -> HealthReport {
        match self.embedding_dimension().await {
            Ok(dimension) => HealthReport::healthy(self.model_id(), dimension),
            Err(e) => {
                tracing::warn!(error = %e, "Health check failed");
                HealthReport::unhealthy(e.to_string(), self.is_initialized())
            }
        }
    }

    /// Describe the service. Never fails.
    pub async fn service_info(&self) -> ServiceInfo {
        let health = self.health_check().await;
        ServiceInfo::from_health(self.model_id(), &health)
    }
}

impl std::fmt::Debug for EmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingService")
            .field("state", &self.state())
            .field("config", &self.inner.config)
            .field("dimension", &self.cached_dimension())
            .finish_non_exhaustive()
    }
}
