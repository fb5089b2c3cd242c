//! Test doubles for the embedding service.

#![allow(dead_code)]

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use vectorizer::embeddings::{EmbedResult, Embedder, EmbeddingConfig, ModelLoader};
use vectorizer::{EmbeddingError, EmbeddingService};

/// Output size of [`HashEmbedder`].
pub const TEST_DIM: usize = 16;

/// Texts containing this marker fail to embed.
pub const FAIL_MARKER: &str = "FAIL";

/// Deterministic embedder: a unit vector derived from the text hash.
#[derive(Default)]
pub struct HashEmbedder {
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub delay: Duration,
}

impl HashEmbedder {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// The vector [`HashEmbedder`] produces for `text`.
#[allow(clippy::cast_precision_loss)]
pub fn expected_vector(text: &str) -> Vec<f32> {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    let mut seed = hasher.finish();

    let mut v = Vec::with_capacity(TEST_DIM);
    for _ in 0..TEST_DIM {
        seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
        v.push((((seed >> 33) as f32) / (u32::MAX as f32)).mul_add(2.0, -1.0));
    }

    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    for x in &mut v {
        *x /= norm;
    }
    v
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> EmbedResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if text.contains(FAIL_MARKER) {
            return Err(EmbeddingError::Runtime(format!("cannot embed {text}")));
        }
        Ok(expected_vector(text))
    }
}

/// Loader that counts loads and can be told to fail.
pub struct CountingLoader {
    pub embedder: Arc<HashEmbedder>,
    pub loads: Arc<AtomicUsize>,
    failures_left: Arc<AtomicUsize>,
    delay: Duration,
}

impl CountingLoader {
    pub fn new(embedder: Arc<HashEmbedder>) -> Self {
        Self {
            embedder,
            loads: Arc::new(AtomicUsize::new(0)),
            failures_left: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
        }
    }

    /// Fail the next `n` loads.
    pub fn failing(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    /// Keep each load in flight for `delay`.
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl ModelLoader for CountingLoader {
    fn model_id(&self) -> &str {
        "test/hash-model"
    }

    fn load(&self) -> BoxFuture<'static, EmbedResult<Arc<dyn Embedder>>> {
        let embedder = Arc::clone(&self.embedder);
        let loads = Arc::clone(&self.loads);
        let failures_left = Arc::clone(&self.failures_left);
        let delay = self.delay;

        async move {
            loads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;

            let fail = failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if fail {
                return Err(EmbeddingError::Download("model host unreachable".to_string()));
            }
            Ok(embedder as Arc<dyn Embedder>)
        }
        .boxed()
    }
}

/// Service over a fresh [`HashEmbedder`].
pub struct Harness {
    pub service: EmbeddingService,
    pub embedder: Arc<HashEmbedder>,
    pub loads: Arc<AtomicUsize>,
}

impl Harness {
    pub fn new(batch_size: usize) -> Self {
        Self::with_loader(
            batch_size,
            CountingLoader::new(Arc::new(HashEmbedder::default())),
        )
    }

    pub fn with_loader(batch_size: usize, loader: CountingLoader) -> Self {
        let embedder = Arc::clone(&loader.embedder);
        let loads = Arc::clone(&loader.loads);
        let config = EmbeddingConfig {
            model_id: "test/hash-model".to_string(),
            batch_size,
        };
        Self {
            service: EmbeddingService::new(config, Arc::new(loader)),
            embedder,
            loads,
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

pub fn texts(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("document number {i}")).collect()
}
