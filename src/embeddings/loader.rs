//! Model resolution and loading.
//!
//! Model artifacts live under `{cache_dir}/{model_id}/`, mirroring the
//! layout of the remote repository they are fetched from. When a file is
//! missing and remote fetches are allowed it is downloaded to a temp file
//! and renamed into place.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use tokio::io::AsyncWriteExt;

use super::model::OnnxEmbedder;
use super::{EmbedResult, Embedder};
use crate::error::EmbeddingError;

/// ONNX graph, relative to the model directory.
pub const MODEL_FILE: &str = "onnx/model.onnx";

/// Tokenizer definition, relative to the model directory.
pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// Discrete events emitted while model artifacts are fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Artifact found in the local cache.
    Cached { file: String, path: PathBuf },
    /// Download started.
    Started {
        file: String,
        total_bytes: Option<u64>,
    },
    /// Bytes received so far.
    Progress {
        file: String,
        downloaded: u64,
        total_bytes: Option<u64>,
    },
    /// Download completed and moved into the cache.
    Finished { file: String, path: PathBuf },
}

/// Observer invoked with each [`ProgressEvent`].
pub type ProgressObserver = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Source of a ready-to-use embedder.
///
/// The returned future owns everything it needs so it can be shared
/// between concurrent callers.
pub trait ModelLoader: Send + Sync {
    /// Identifier of the model this loader produces.
    fn model_id(&self) -> &str;

    /// Load the model.
    fn load(&self) -> BoxFuture<'static, EmbedResult<Arc<dyn Embedder>>>;
}

/// Model loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Model identifier, also the path below `cache_dir`.
    pub model_id: String,

    /// Local artifact cache.
    pub cache_dir: PathBuf,

    /// Whether missing artifacts may be downloaded.
    pub allow_remote: bool,

    /// Base URL of the remote model repository host.
    pub remote_host: String,

    /// ONNX intra-op threads.
    pub intra_threads: usize,

    /// ONNX sessions to create; the number of texts inferred at once.
    pub sessions: usize,
}

impl LoaderConfig {
    /// Directory holding this model's artifacts.
    #[must_use]
    pub fn model_dir(&self) -> PathBuf {
        self.cache_dir.join(&self.model_id)
    }

    /// Remote URL of an artifact.
    #[must_use]
    pub fn remote_url(&self, file: &str) -> String {
        format!(
            "{}/{}/resolve/main/{file}",
            self.remote_host.trim_end_matches('/'),
            self.model_id
        )
    }
}

/// Loads an [`OnnxEmbedder`], fetching artifacts when allowed.
pub struct OnnxLoader {
    config: LoaderConfig,
    observer: Option<ProgressObserver>,
}

impl OnnxLoader {
    /// Create a loader.
    #[must_use]
    pub const fn new(config: LoaderConfig) -> Self {
        Self {
            config,
            observer: None,
        }
    }

    /// Report artifact fetch progress to `observer`.
    #[must_use]
    pub fn with_progress(mut self, observer: ProgressObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Get the loader configuration.
    #[must_use]
    pub const fn config(&self) -> &LoaderConfig {
        &self.config
    }
}

impl ModelLoader for OnnxLoader {
    fn model_id(&self) -> &str {
        &self.config.model_id
    }

    fn load(&self) -> BoxFuture<'static, EmbedResult<Arc<dyn Embedder>>> {
        let config = self.config.clone();
        let observer = self.observer.clone();

        async move {
            let model_path = ensure_artifact(&config, MODEL_FILE, observer.as_ref()).await?;
            let tokenizer_path =
                ensure_artifact(&config, TOKENIZER_FILE, observer.as_ref()).await?;

            let (intra_threads, sessions) = (config.intra_threads, config.sessions);
            let embedder = tokio::task::spawn_blocking(move || {
                OnnxEmbedder::load(&model_path, &tokenizer_path, intra_threads, sessions)
            })
            .await
            .map_err(|e| EmbeddingError::Initialization(format!("model load task failed: {e}")))??;

            Ok(Arc::new(embedder) as Arc<dyn Embedder>)
        }
        .boxed()
    }
}

impl std::fmt::Debug for OnnxLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxLoader")
            .field("config", &self.config)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

/// Return the local path of `file`, downloading it if needed and allowed.
async fn ensure_artifact(
    config: &LoaderConfig,
    file: &str,
    observer: Option<&ProgressObserver>,
) -> EmbedResult<PathBuf> {
    let path = config.model_dir().join(file);

    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        tracing::debug!(path = %path.display(), "Using cached model artifact");
        notify(
            observer,
            ProgressEvent::Cached {
                file: file.to_string(),
                path: path.clone(),
            },
        );
        return Ok(path);
    }

    if !config.allow_remote {
        return Err(EmbeddingError::Initialization(format!(
            "{file} not found at {} and remote model fetches are disabled",
            path.display()
        )));
    }

    let url = config.remote_url(file);
    download_file(&url, file, &path, observer).await?;
    Ok(path)
}

/// Stream `url` to `dest` through a temp file and an atomic rename.
async fn download_file(
    url: &str,
    file: &str,
    dest: &Path,
    observer: Option<&ProgressObserver>,
) -> EmbedResult<()> {
    tracing::info!(%url, dest = %dest.display(), "Downloading model artifact");

    let response = reqwest::get(url)
        .await
        .map_err(|e| EmbeddingError::Download(format!("request to {url} failed: {e}")))?;

    if !response.status().is_success() {
        return Err(EmbeddingError::Download(format!(
            "{url} returned HTTP {}",
            response.status()
        )));
    }

    let total_bytes = response.content_length();
    notify(
        observer,
        ProgressEvent::Started {
            file: file.to_string(),
            total_bytes,
        },
    );

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            EmbeddingError::Download(format!("failed to create {}: {e}", parent.display()))
        })?;
    }

    let tmp_path = dest.with_extension("part");
    let mut stream = response.bytes_stream();

    let written = async {
        let mut out = tokio::fs::File::create(&tmp_path).await.map_err(|e| {
            EmbeddingError::Download(format!("failed to create {}: {e}", tmp_path.display()))
        })?;

        let mut downloaded = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| EmbeddingError::Download(format!("error reading {url}: {e}")))?;
            out.write_all(&chunk)
                .await
                .map_err(|e| EmbeddingError::Download(format!("error writing {file}: {e}")))?;
            downloaded += chunk.len() as u64;
            notify(
                observer,
                ProgressEvent::Progress {
                    file: file.to_string(),
                    downloaded,
                    total_bytes,
                },
            );
        }

        out.flush()
            .await
            .map_err(|e| EmbeddingError::Download(format!("error writing {file}: {e}")))?;
        drop(out);

        tokio::fs::rename(&tmp_path, dest).await.map_err(|e| {
            EmbeddingError::Download(format!("failed to move {file} into place: {e}"))
        })?;
        Ok::<_, EmbeddingError>(downloaded)
    }
    .await;

    let downloaded = match written {
        Ok(downloaded) => downloaded,
        Err(e) => {
            if let Err(rm) = tokio::fs::remove_file(&tmp_path).await {
                tracing::debug!(path = %tmp_path.display(), error = %rm, "No partial download to remove");
            }
            return Err(e);
        }
    };

    tracing::info!(file, bytes = downloaded, "Model artifact downloaded");
    notify(
        observer,
        ProgressEvent::Finished {
            file: file.to_string(),
            path: dest.to_path_buf(),
        },
    );
    Ok(())
}

fn notify(observer: Option<&ProgressObserver>, event: ProgressEvent) {
    if let Some(observer) = observer {
        observer(&event);
    }
}
