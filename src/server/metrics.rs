//! Prometheus metrics definitions.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Request counter.
pub static REQUEST_COUNT: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "vectorizer_requests_total",
        "Total number of requests",
        &["endpoint", "status"]
    )
    .unwrap()
});

/// Embed call latency histogram.
pub static EMBED_LATENCY: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "vectorizer_embed_duration_seconds",
        "Embed request latency in seconds",
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap()
});

/// Texts embedded successfully.
pub static TEXTS_EMBEDDED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "vectorizer_texts_embedded_total",
        "Total number of texts embedded"
    )
    .unwrap()
});

/// Failed embed calls by error kind.
pub static EMBED_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "vectorizer_embed_failures_total",
        "Total number of failed embed requests",
        &["kind"]
    )
    .unwrap()
});

/// Model load attempts by outcome.
pub static MODEL_LOADS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "vectorizer_model_loads_total",
        "Total number of model load attempts",
        &["outcome"]
    )
    .unwrap()
});

/// 1 once the model is loaded, 0 after a failed load.
pub static MODEL_READY: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("vectorizer_model_ready", "Whether the embedding model is loaded")
        .unwrap()
});

/// Initialize all metrics (call once at startup).
pub fn init_metrics() {
    // Access lazy statics to register them
    let _ = &*REQUEST_COUNT;
    let _ = &*EMBED_LATENCY;
    let _ = &*TEXTS_EMBEDDED;
    let _ = &*EMBED_FAILURES;
    let _ = &*MODEL_LOADS;
    let _ = &*MODEL_READY;

    tracing::debug!("Prometheus metrics initialized");
}
