//! Configuration settings and validation.

use crate::embeddings::{EmbeddingConfig, LoaderConfig, DEFAULT_BATCH_SIZE, DEFAULT_MODEL_ID};
use crate::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Default host serving model artifacts.
pub const DEFAULT_REMOTE_HOST: &str = "https://huggingface.co";

/// Main configuration for the Vectorizer server.
#[derive(Debug, Clone)]
pub struct Config {
    /// Host address to bind to.
    pub host: String,

    /// Port to listen on.
    pub port: u16,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Model identifier, e.g. `Xenova/all-MiniLM-L6-v2`.
    pub model_id: String,

    /// Whether missing model artifacts may be fetched from `remote_host`.
    pub allow_remote_models: bool,

    /// Local directory where model artifacts are cached.
    pub model_cache_dir: PathBuf,

    /// Base URL model artifacts are fetched from.
    pub remote_host: String,

    /// Texts embedded concurrently per batch.
    pub batch_size: usize,

    /// ONNX intra-op threads per session.
    pub intra_threads: usize,

    /// Deadline applied to embed requests at the HTTP boundary.
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            model_id: DEFAULT_MODEL_ID.to_string(),
            allow_remote_models: true,
            model_cache_dir: default_cache_dir(),
            remote_host: DEFAULT_REMOTE_HOST.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            intra_threads: 1,
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// `~/.cache/vectorizer/models`, or `./models` when no cache dir is known.
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir().map_or_else(
        || PathBuf::from("./models"),
        |dir| dir.join("vectorizer").join("models"),
    )
}

impl Config {
    /// Create a new configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(Error::config("port cannot be 0"));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(Error::config(format!(
                "invalid log level '{}', must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.host.is_empty() {
            return Err(Error::config("host cannot be empty"));
        }

        if self.model_id.trim().is_empty() {
            return Err(Error::config("model_id cannot be empty"));
        }

        if self.batch_size == 0 {
            return Err(Error::config("batch_size cannot be 0"));
        }

        if self.batch_size > 64 {
            return Err(Error::config("batch_size cannot exceed 64"));
        }

        if self.intra_threads == 0 {
            return Err(Error::config("intra_threads cannot be 0"));
        }

        if self.request_timeout.is_zero() {
            return Err(Error::config("request_timeout cannot be 0"));
        }

        if self.allow_remote_models && !self.remote_host.starts_with("http") {
            return Err(Error::config(format!(
                "remote_host must be an http(s) URL, got '{}'",
                self.remote_host
            )));
        }

        Ok(())
    }

    /// Get the server address as a string.
    #[must_use]
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Settings consumed by the embedding service.
    #[must_use]
    pub fn embedding_config(&self) -> EmbeddingConfig {
        EmbeddingConfig {
            model_id: self.model_id.clone(),
            batch_size: self.batch_size,
        }
    }

    /// Settings consumed by the ONNX model loader.
    #[must_use]
    pub fn loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            model_id: self.model_id.clone(),
            cache_dir: self.model_cache_dir.clone(),
            allow_remote: self.allow_remote_models,
            remote_host: self.remote_host.clone(),
            intra_threads: self.intra_threads,
            sessions: self.batch_size,
        }
    }
}
