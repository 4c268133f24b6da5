//! Offline pipeline error types

use thiserror::Error;

/// Errors from decoding, rendering, and encoding
#[derive(Debug, Error)]
pub enum OfflineError {
    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("Unsupported or unrecognized container: {0}")]
    UnsupportedFormat(String),

    #[error("Encode failed: {0}")]
    Encode(String),

    #[error("Render failed: {0}")]
    Render(String),

    #[error("An export is already in progress")]
    ExportBusy,

    #[error("Engine error: {0}")]
    Engine(#[from] ws_engine::EngineError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for offline operations
pub type OfflineResult<T> = Result<T, OfflineError>;
