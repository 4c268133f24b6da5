//! WS-Offline — Offline Render and Export Pipeline
//!
//! Non-real-time counterpart of the live engine:
//! - Content-sniffed decoding (WAV / AIFF / MP3 / OGG) with tag extraction
//! - Deterministic offline rendering of the live graph topology
//! - WAV / MP3 / OGG / FLAC encoding with embedded tags and cover art
//! - Single-flight export orchestration with snapshot semantics
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Exporter                                │
//! │                                                                  │
//! │  ┌──────────┐   ┌─────────────────┐   ┌───────────────────────┐  │
//! │  │ Render   │ → │ OfflineRenderer │ → │ Encoder (wav/mp3/     │  │
//! │  │ Request  │   │ (engine graph)  │   │  ogg/flac + tags)     │  │
//! │  └──────────┘   └─────────────────┘   └───────────────────────┘  │
//! │       ▲                                                          │
//! │  AudioDecoder (symphonia, content-sniffed) ─→ samples + tags     │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

mod decoder;
mod encoder;
mod error;
mod export;
mod render;
mod tags;

pub use decoder::*;
pub use encoder::*;
pub use error::*;
pub use export::*;
pub use render::*;
pub use tags::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
