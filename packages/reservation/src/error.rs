//! Errors surfaced to workers.

use job_core::{ConfigError, StoreError};
use thiserror::Error;

/// Errors returned by the reservation engine.
///
/// Losing a claim race is not an error: `reserve` returns `Ok(None)`.
#[derive(Debug, Error)]
pub enum ReserveError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl ReserveError {
    /// Whether the caller may retry the call after backing off.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReserveError::Store(e) => e.is_retryable(),
            ReserveError::Config(_) => false,
        }
    }
}
