//! ONNX embedding model.
//!
//! Tokenizes one text, runs the transformer, then mean-pools the token
//! states under the attention mask and L2-normalizes the result.
//!
//! A run needs exclusive access to its session, so the embedder keeps one
//! session per worker thread.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use parking_lot::{Mutex, MutexGuard};
use tokenizers::{Tokenizer, TruncationParams};

use super::{EmbedResult, Embedder};
use crate::error::EmbeddingError;

/// Maximum sequence length fed to the model.
pub const MAX_SEQ_LENGTH: usize = 256;

/// Fixed set of exclusive slots.
///
/// `acquire` takes any free slot, so up to `len()` callers never wait on
/// each other.
pub(crate) struct SessionPool<T> {
    slots: Vec<Mutex<T>>,
    next: AtomicUsize,
}

impl<T> SessionPool<T> {
    /// Returns `None` for an empty set.
    pub(crate) fn new(items: Vec<T>) -> Option<Self> {
        if items.is_empty() {
            return None;
        }
        Some(Self {
            slots: items.into_iter().map(Mutex::new).collect(),
            next: AtomicUsize::new(0),
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Lock a free slot, or wait on one in round-robin order if all are busy.
    pub(crate) fn acquire(&self) -> MutexGuard<'_, T> {
        for slot in &self.slots {
            if let Some(guard) = slot.try_lock() {
                return guard;
            }
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        self.slots[i].lock()
    }
}

/// Sentence-transformer model running on ONNX Runtime.
pub struct OnnxEmbedder {
    sessions: SessionPool<Session>,
    tokenizer: Tokenizer,
    model_path: PathBuf,
}

impl OnnxEmbedder {
    /// Load the ONNX model and its tokenizer.
    ///
    /// `sessions` independent sessions are created so that as many texts
    /// can run through the model at the same time.
    ///
    /// # Errors
    ///
    /// Returns an error if either file is missing or cannot be parsed.
    pub fn load(
        model_path: impl AsRef<Path>,
        tokenizer_path: impl AsRef<Path>,
        intra_threads: usize,
        sessions: usize,
    ) -> EmbedResult<Self> {
        let model_path = model_path.as_ref().to_path_buf();
        let tokenizer_path = tokenizer_path.as_ref();

        if !model_path.exists() {
            return Err(EmbeddingError::Initialization(format!(
                "model file not found: {}",
                model_path.display()
            )));
        }

        let sessions = sessions.max(1);
        tracing::info!(
            path = %model_path.display(),
            sessions,
            "Loading ONNX embedding model"
        );

        let sessions = (0..sessions)
            .map(|_| build_session(&model_path, intra_threads))
            .collect::<EmbedResult<Vec<_>>>()?;
        let sessions = SessionPool::new(sessions)
            .ok_or_else(|| EmbeddingError::Initialization("no sessions created".to_string()))?;

        let mut tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| EmbeddingError::Tokenization(format!("failed to load tokenizer: {e}")))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQ_LENGTH,
                ..Default::default()
            }))
            .map_err(|e| EmbeddingError::Tokenization(format!("failed to set truncation: {e}")))?;
        // One text per run, so no padding.
        tokenizer.with_padding(None);

        tracing::info!(
            path = %model_path.display(),
            tokenizer = %tokenizer_path.display(),
            "Model loaded successfully"
        );

        Ok(Self {
            sessions,
            tokenizer,
            model_path,
        })
    }

    /// Get the model path.
    #[must_use]
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// Number of texts the model can run at once.
    #[must_use]
    pub fn sessions(&self) -> usize {
        self.sessions.len()
    }
}

fn build_session(model_path: &Path, intra_threads: usize) -> EmbedResult<Session> {
    Session::builder()
        .map_err(|e| EmbeddingError::Runtime(format!("failed to create session builder: {e}")))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| EmbeddingError::Runtime(format!("failed to set optimization level: {e}")))?
        .with_intra_threads(intra_threads)
        .map_err(|e| EmbeddingError::Runtime(format!("failed to set threads: {e}")))?
        .commit_from_file(model_path)
        .map_err(|e| EmbeddingError::Initialization(format!("failed to load model: {e}")))
}

impl Embedder for OnnxEmbedder {
    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    fn embed(&self, text: &str) -> EmbedResult<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| EmbeddingError::Tokenization(format!("failed to tokenize: {e}")))?;

        let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| i64::from(id)).collect();
        let attention_mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&m| i64::from(m))
            .collect();
        let seq_len = input_ids.len();
        let token_type_ids = vec![0i64; seq_len];

        let shape = vec![1i64, seq_len as i64];
        let input_ids_tensor = Tensor::from_array((shape.clone(), input_ids.into_boxed_slice()))
            .map_err(|e| EmbeddingError::Runtime(format!("failed to create input_ids: {e}")))?;
        let attention_tensor =
            Tensor::from_array((shape.clone(), attention_mask.clone().into_boxed_slice()))
                .map_err(|e| {
                    EmbeddingError::Runtime(format!("failed to create attention_mask: {e}"))
                })?;
        let token_type_tensor = Tensor::from_array((shape, token_type_ids.into_boxed_slice()))
            .map_err(|e| EmbeddingError::Runtime(format!("failed to create token_type_ids: {e}")))?;

        let mut session = self.sessions.acquire();
        let outputs = session
            .run(ort::inputs! {
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_tensor,
                "token_type_ids" => token_type_tensor,
            })
            .map_err(|e| EmbeddingError::Runtime(format!("inference failed: {e}")))?;

        // Export names differ between converters.
        let hidden = outputs
            .get("last_hidden_state")
            .or_else(|| outputs.get("token_embeddings"))
            .unwrap_or_else(|| &outputs[0]);

        let (dims, data) = hidden
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbeddingError::Runtime(format!("failed to extract hidden states: {e}")))?;
        let dims: &[i64] = dims;

        if dims.len() != 3 || dims[0] != 1 {
            return Err(EmbeddingError::Runtime(format!(
                "unexpected hidden state shape {dims:?}, expected [1, seq, hidden]"
            )));
        }
        let out_seq_len = dims[1] as usize;
        let hidden_size = dims[2] as usize;

        let mut pooled = mean_pool(data, &attention_mask, out_seq_len, hidden_size);
        l2_normalize(&mut pooled);
        Ok(pooled)
    }
}

impl std::fmt::Debug for OnnxEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbedder")
            .field("model_path", &self.model_path)
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

/// Average token states whose attention mask is set.
pub(crate) fn mean_pool(
    hidden_states: &[f32],
    attention_mask: &[i64],
    seq_len: usize,
    hidden_size: usize,
) -> Vec<f32> {
    let mut sum = vec![0.0f32; hidden_size];
    let mut count = 0.0f32;

    for (i, &mask) in attention_mask.iter().take(seq_len).enumerate() {
        if mask == 1 {
            let row = &hidden_states[i * hidden_size..(i + 1) * hidden_size];
            for (s, h) in sum.iter_mut().zip(row) {
                *s += h;
            }
            count += 1.0;
        }
    }

    if count > 0.0 {
        for s in &mut sum {
            *s /= count;
        }
    }

    sum
}

/// Rescale to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v {
            *x /= norm;
        }
    }
}
