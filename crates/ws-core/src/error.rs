//! Error types for ws-core

use thiserror::Error;

/// Errors raised by core types
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Tempo detection failed: {0}")]
    TempoDetection(String),
}

/// Result alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;
