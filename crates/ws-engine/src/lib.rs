//! WS-Engine — Real-Time Warp Playback Engine
//!
//! Time-stretched, pitch-shifted playback with reverse and LFO-modulated
//! crossfade modes:
//! - Granular time-stretch with independent pitch / tempo / rate
//! - Reversed-buffer cache for instant reverse toggling
//! - Tempo-synced LFO crossfade between pitched and dry branches
//! - Processing-graph builder with in-place parameter updates
//! - Transport with an injected hardware clock and a position feed
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     TransportController                          │
//! │                                                                  │
//! │  ┌──────────┐   ┌───────────────────────────┐   ┌────────────┐  │
//! │  │ Source / │ → │ GraphHandle               │ → │ host audio │  │
//! │  │ Reverse  │   │ stretch → [lfo] → hp → ♪  │   │ callback   │  │
//! │  │ Cache    │   └───────────────────────────┘   └────────────┘  │
//! │  └──────────┘                                                   │
//! │                                                                  │
//! │  PlaybackClock (HardwareClock) ──→ position feed (~1 Hz)        │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

mod clock;
mod error;
mod graph;
mod lfo;
mod reverse;
mod stretch;
mod transport;

pub use clock::*;
pub use error::*;
pub use graph::*;
pub use lfo::*;
pub use reverse::*;
pub use stretch::*;
pub use transport::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
