//! ws-core: Shared types, parameters, and utilities for WarpShift
//!
//! This crate provides the foundational types used by both the real-time
//! playback engine (`ws-engine`) and the offline render/export pipeline
//! (`ws-offline`):
//!
//! - Interleaved PCM buffers
//! - Sample-domain time types
//! - The clamped effect parameter model
//! - Persisted settings
//! - Energy-onset tempo detection

mod buffer;
mod error;
mod params;
mod settings;
mod tempo;
mod time;

pub use buffer::*;
pub use error::*;
pub use params::*;
pub use settings::*;
pub use tempo::*;
pub use time::*;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
