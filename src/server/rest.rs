//! REST API endpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use super::metrics::{EMBED_FAILURES, EMBED_LATENCY, REQUEST_COUNT, TEXTS_EMBEDDED};
use super::observability::spans;
use crate::embeddings::{EmbeddingService, TextInput};
use crate::error::EmbeddingError;

/// Shared state of the REST handlers.
#[derive(Debug, Clone)]
pub struct RestState {
    pub service: EmbeddingService,
    /// Deadline for a single embed request.
    pub request_timeout: Duration,
}

impl RestState {
    /// Create handler state.
    #[must_use]
    pub const fn new(service: EmbeddingService, request_timeout: Duration) -> Self {
        Self {
            service,
            request_timeout,
        }
    }
}

/// Body of `POST /api/v1/embed`.
#[derive(Debug, Deserialize)]
pub struct EmbedRequest {
    pub input: TextInput,
}

/// Reply to `POST /api/v1/embed`.
#[derive(Debug, Serialize, Deserialize)]
pub struct EmbedResponse {
    pub model: String,
    pub dimension: usize,
    pub embeddings: Vec<Vec<f32>>,
}

/// JSON error body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Failure of an API call, mapped to an HTTP status.
#[derive(Debug)]
pub enum ApiError {
    Embedding(EmbeddingError),
    Timeout(Duration),
}

impl ApiError {
    const fn status(&self) -> StatusCode {
        match self {
            Self::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Self::Embedding(EmbeddingError::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            Self::Embedding(e) if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            Self::Embedding(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    const fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Embedding(EmbeddingError::InvalidInput(_)) => "invalid_input",
            Self::Embedding(e) if e.is_retryable() => "initialization",
            Self::Embedding(EmbeddingError::Generation { .. }) => "generation",
            Self::Embedding(_) => "internal",
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Embedding(e) => write!(f, "{e}"),
            Self::Timeout(d) => write!(f, "request timed out after {}s", d.as_secs()),
        }
    }
}

impl From<EmbeddingError> for ApiError {
    fn from(e: EmbeddingError) -> Self {
        Self::Embedding(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        EMBED_FAILURES.with_label_values(&[self.kind()]).inc();
        tracing::warn!(status = %status, error = %self, "Embed request failed");
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Create REST API router.
pub fn create_rest_router(state: Arc<RestState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/api/v1/info", get(service_info))
        .route("/api/v1/embed", post(embed))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check(State(state): State<Arc<RestState>>) -> impl IntoResponse {
    let report = state.service.health_check().await;

    let status_code = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    REQUEST_COUNT
        .with_label_values(&["health", status_code.as_str()])
        .inc();
    tracing::debug!(status = ?status_code, "Health check");

    (status_code, Json(report))
}

/// Service description endpoint.
async fn service_info(State(state): State<Arc<RestState>>) -> impl IntoResponse {
    let info = state.service.service_info().await;
    REQUEST_COUNT.with_label_values(&["info", "200"]).inc();
    Json(info)
}

/// Embedding endpoint.
///
/// The deadline is applied here; the service itself never times out.
async fn embed(
    State(state): State<Arc<RestState>>,
    Json(request): Json<EmbedRequest>,
) -> Result<Json<EmbedResponse>, ApiError> {
    let texts = request.input.into_texts();
    let count = texts.len();
    let timer = EMBED_LATENCY.start_timer();

    let result = tokio::time::timeout(state.request_timeout, state.service.embed_many(texts))
        .instrument(spans::embed_span(count))
        .await;

    let outcome = match result {
        Ok(Ok(embeddings)) => Ok(embeddings),
        Ok(Err(e)) => Err(ApiError::from(e)),
        Err(_) => Err(ApiError::Timeout(state.request_timeout)),
    };

    let status = match &outcome {
        Ok(_) => StatusCode::OK,
        Err(e) => e.status(),
    };
    REQUEST_COUNT
        .with_label_values(&["embed", status.as_str()])
        .inc();

    let embeddings = outcome?;
    timer.observe_duration();
    TEXTS_EMBEDDED.inc_by(embeddings.len() as u64);

    let dimension = embeddings.first().map_or(0, Vec::len);
    Ok(Json(EmbedResponse {
        model: state.service.model_id().to_string(),
        dimension,
        embeddings,
    }))
}

/// Prometheus metrics endpoint.
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; charset=utf-8",
            )],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(
                    axum::http::header::CONTENT_TYPE,
                    "text/plain; charset=utf-8",
                )],
                b"Failed to encode metrics".to_vec(),
            )
        }
    }
}
