//! ONNX-based embedding generation.
//!
//! This module provides:
//! - [`EmbeddingService`], the lazily initialized, shared entry point
//! - ONNX Runtime integration via the `ort` crate
//! - Dedicated thread pool for inference
//! - Model artifact resolution and download

mod global;
mod loader;
mod model;
mod service;
mod status;
mod worker;

pub use global::{global, install_global};
pub use loader::{
    LoaderConfig, ModelLoader, OnnxLoader, ProgressEvent, ProgressObserver, MODEL_FILE,
    TOKENIZER_FILE,
};
pub use model::{l2_normalize, OnnxEmbedder, MAX_SEQ_LENGTH};
pub use service::{
    EmbeddingConfig, EmbeddingService, ServiceState, TextInput, DEFAULT_BATCH_SIZE,
    DEFAULT_MODEL_ID, PROBE_TEXT, SERVICE_NAME,
};
pub use status::{HealthReport, HealthStatus, ServiceInfo};
pub use worker::{EmbeddingWorker, QUEUE_CAPACITY};

use crate::error::EmbeddingError;

/// Result of embedding operations.
pub type EmbedResult<T> = std::result::Result<T, EmbeddingError>;

/// Turns one text into a unit-length vector.
///
/// Calls are synchronous and may be CPU heavy; the service runs them on
/// its worker pool.
pub trait Embedder: Send + Sync {
    /// Embed a single text.
    ///
    /// # Errors
    ///
    /// Returns an error if tokenization or inference fails.
    fn embed(&self, text: &str) -> EmbedResult<Vec<f32>>;
}

/// Cosine similarity of two vectors. Returns 0.0 if either is all zeros.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
