//! Vectorizer - local text-embedding service
//!
//! Entry point for the Vectorizer server.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use vectorizer::config::{default_cache_dir, DEFAULT_REMOTE_HOST};
use vectorizer::embeddings::{
    install_global, EmbeddingService, OnnxLoader, ProgressEvent, ProgressObserver,
    DEFAULT_BATCH_SIZE, DEFAULT_MODEL_ID,
};
use vectorizer::server::{init_metrics, init_tracing, App, ServerConfig};
use vectorizer::{Config, Result};

/// Vectorizer - local text-embedding service
#[derive(Parser, Debug)]
#[command(name = "vectorizer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Host address to bind to
    #[arg(long, env = "VECTORIZER_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "VECTORIZER_PORT", default_value = "8080")]
    port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "VECTORIZER_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, env = "VECTORIZER_LOG_JSON")]
    log_json: bool,

    /// Embedding model identifier
    #[arg(short, long, env = "VECTORIZER_MODEL", default_value = DEFAULT_MODEL_ID)]
    model: String,

    /// Never download model artifacts; use only the local cache
    #[arg(long, env = "VECTORIZER_OFFLINE")]
    offline: bool,

    /// Directory for cached model artifacts
    #[arg(long, env = "VECTORIZER_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Host model artifacts are downloaded from
    #[arg(long, env = "VECTORIZER_REMOTE_HOST", default_value = DEFAULT_REMOTE_HOST)]
    remote_host: String,

    /// Texts embedded concurrently per batch
    #[arg(long, env = "VECTORIZER_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// ONNX intra-op threads
    #[arg(long, env = "VECTORIZER_INTRA_THREADS", default_value = "1")]
    intra_threads: usize,

    /// Embed request timeout in seconds
    #[arg(long, env = "VECTORIZER_REQUEST_TIMEOUT", default_value = "60")]
    request_timeout: u64,

    /// Load the model before accepting requests
    #[arg(long, env = "VECTORIZER_PRELOAD")]
    preload: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.log_json);

    tracing::info!("Vectorizer v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config {
        host: cli.host,
        port: cli.port,
        log_level: cli.log_level,
        model_id: cli.model,
        allow_remote_models: !cli.offline,
        model_cache_dir: cli.cache_dir.unwrap_or_else(default_cache_dir),
        remote_host: cli.remote_host,
        batch_size: cli.batch_size,
        intra_threads: cli.intra_threads,
        request_timeout: Duration::from_secs(cli.request_timeout),
    };

    tracing::debug!(?config, "Configuration loaded");

    config.validate()?;

    tracing::info!(
        model = %config.model_id,
        cache = %config.model_cache_dir.display(),
        remote = config.allow_remote_models,
        "Server will bind to {}",
        config.server_addr()
    );

    init_metrics();

    let loader = OnnxLoader::new(config.loader_config()).with_progress(log_progress());
    let service = install_global(EmbeddingService::new(
        config.embedding_config(),
        Arc::new(loader),
    ))?;

    if cli.preload {
        // A failed preload is not fatal; the next request retries.
        match service.embedding_dimension().await {
            Ok(dimension) => tracing::info!(dimension, "Model preloaded"),
            Err(e) => tracing::warn!(error = %e, "Model preload failed"),
        }
    }

    let server_config = ServerConfig {
        host: config.host,
        port: config.port,
        request_timeout: config.request_timeout,
    };

    let app = App::new(server_config, service.clone());
    app.run().await
}

/// Progress observer that logs downloads.
fn log_progress() -> ProgressObserver {
    Arc::new(|event: &ProgressEvent| match event {
        ProgressEvent::Cached { file, path } => {
            tracing::debug!(file = %file, path = %path.display(), "Model artifact cached");
        }
        ProgressEvent::Started { file, total_bytes } => {
            tracing::info!(file = %file, total_bytes, "Model artifact download started");
        }
        ProgressEvent::Progress {
            file,
            downloaded,
            total_bytes,
        } => {
            tracing::trace!(
                file = %file,
                downloaded,
                total_bytes,
                "Model artifact download progress"
            );
        }
        ProgressEvent::Finished { file, path } => {
            tracing::info!(file = %file, path = %path.display(), "Model artifact ready");
        }
    })
}
