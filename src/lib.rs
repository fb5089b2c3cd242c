//! Vectorizer
//!
//! Local text-embedding service: one lazily loaded sentence-transformer
//! model, batched inference, and health reporting.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod embeddings;
pub mod error;
pub mod server;

pub use config::Config;
pub use embeddings::{EmbeddingService, TextInput};
pub use error::{EmbeddingError, Error, Result};
