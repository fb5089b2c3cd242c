//! Error types and Result aliases for Vectorizer.
//!
//! This module defines the error hierarchy used throughout the crate.
//! All public functions return `Result<T, Error>` or `Result<T>`.

use thiserror::Error;

/// Result type alias using Vectorizer's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Vectorizer operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Embedding generation error.
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Server/API error.
    #[error("server error: {0}")]
    Server(#[from] ServerError),

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Embedding-specific errors.
///
/// `Clone` so that a single failed initialization can be handed to every
/// caller that was waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingError {
    /// The model could not be brought up. Retryable.
    #[error("initialization failed: {0}")]
    Initialization(String),

    /// The caller passed nothing to embed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Inference failed for one text; the whole call is abandoned.
    #[error("failed to embed text #{index} ({text:?}): {reason}")]
    Generation {
        index: usize,
        text: String,
        reason: String,
    },

    /// ONNX runtime error.
    #[error("ONNX runtime error: {0}")]
    Runtime(String),

    /// Tokenization error.
    #[error("tokenization error: {0}")]
    Tokenization(String),

    /// Model artifact download error.
    #[error("download error: {0}")]
    Download(String),

    /// Worker pool error.
    #[error("worker pool error: {0}")]
    WorkerPool(String),
}

/// Server/API errors.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("failed to bind to {address}: {reason}")]
    BindFailed { address: String, reason: String },

    /// Request handling error.
    #[error("request error: {0}")]
    Request(String),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl EmbeddingError {
    /// Create a generation error for the text at `index`.
    pub fn generation(index: usize, text: impl Into<String>, reason: impl ToString) -> Self {
        Self::Generation {
            index,
            text: text.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether a later call may succeed where this one failed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Initialization(_) | Self::Download(_))
    }
}
