//! Error types for the playback engine

use thiserror::Error;

/// Errors raised by the real-time engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Graph build failed: {0}")]
    GraphBuild(String),

    #[error("No source track loaded")]
    NoTrack,
}

/// Result alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
