//! Configuration management for Vectorizer.
//!
//! Supports configuration from:
//! - Command-line arguments (highest priority)
//! - Environment variables
//! - Built-in defaults (lowest priority)

mod settings;

pub use settings::{default_cache_dir, Config, DEFAULT_REMOTE_HOST};
