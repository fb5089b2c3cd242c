//! Process-wide embedding service slot.

use once_cell::sync::OnceCell;

use super::service::EmbeddingService;
use crate::{Error, Result};

static GLOBAL: OnceCell<EmbeddingService> = OnceCell::new();

/// Install the process-wide service. May succeed only once.
///
/// # Errors
///
/// Returns an error if a service is already installed.
pub fn install_global(service: EmbeddingService) -> Result<&'static EmbeddingService> {
    GLOBAL
        .set(service)
        .map_err(|_| Error::internal("embedding service already installed"))?;
    GLOBAL
        .get()
        .ok_or_else(|| Error::internal("embedding service missing after install"))
}

/// The process-wide service, if one has been installed.
#[must_use]
pub fn global() -> Option<&'static EmbeddingService> {
    GLOBAL.get()
}
