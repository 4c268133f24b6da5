//! Offline rendering
//!
//! Runs the same Direct/LFO processing topology as live playback, but
//! pulled to completion in a tight loop with no wall-clock involvement.
//! Rendering the same source and configuration twice produces identical
//! output.

use std::sync::Arc;

use ws_core::{AudioBuffer, EffectConfig};
use ws_engine::{GraphBuilder, reverse_frames};

use crate::error::{OfflineError, OfflineResult};

/// Frames pulled per graph call
const RENDER_BLOCK_FRAMES: usize = 4096;

/// Non-real-time renderer mirroring live playback semantics
pub struct OfflineRenderer;

impl OfflineRenderer {
    /// Render `source` through the configured graph.
    ///
    /// Output length is `ceil(sourceFrames / (playbackRate * tempoRatio))`
    /// at the source sample rate. Reversal is applied to the source before
    /// the graph runs, matching the live reverse toggle.
    pub fn render(
        source: Arc<AudioBuffer>,
        config: &EffectConfig,
        reverse_active: bool,
    ) -> OfflineResult<AudioBuffer> {
        if source.frames() == 0 {
            return Err(OfflineError::Render("empty source buffer".to_string()));
        }

        let prepared = if reverse_active {
            Arc::new(reverse_frames(&source))
        } else {
            source.clone()
        };

        let advance = config.playback_rate * config.tempo_ratio;
        let target_frames = (source.frames() as f64 / advance).ceil() as usize;
        let channels = source.channels.max(1);

        let mut graph = GraphBuilder::new().build(prepared, config, 0.0)?;

        log::info!(
            "Offline render: {} -> {} frames ({:?})",
            source.frames(),
            target_frames,
            graph.topology()
        );

        let mut samples = vec![0.0; target_frames * channels];
        for block in samples.chunks_mut(RENDER_BLOCK_FRAMES * channels) {
            graph.process(block);
        }

        Ok(AudioBuffer {
            samples,
            channels: source.channels,
            sample_rate: source.sample_rate,
        })
    }
}
