//! Reversed-buffer cache
//!
//! Reverse playback runs the graph over a sample-reversed copy of the
//! source. Reversal of a long track is not free, so the most recent
//! reversal is cached per source generation and invalidated when a new
//! track is loaded. Reversing twice restores the original order exactly.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use ws_core::AudioBuffer;

/// Produce a buffer whose channel samples are order-reversed.
///
/// Frames are reversed as units so channel interleaving is preserved.
pub fn reverse_frames(buffer: &AudioBuffer) -> AudioBuffer {
    let channels = buffer.channels.max(1);
    let mut samples = Vec::with_capacity(buffer.samples.len());

    for frame in buffer.samples.chunks_exact(channels).rev() {
        samples.extend_from_slice(frame);
    }

    AudioBuffer {
        samples,
        channels: buffer.channels,
        sample_rate: buffer.sample_rate,
    }
}

/// Cache of the most recent reversal, keyed on source generation
pub struct ReverseBufferCache {
    entry: RwLock<Option<(u64, Arc<AudioBuffer>)>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ReverseBufferCache {
    pub fn new() -> Self {
        Self {
            entry: RwLock::new(None),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Reversed copy of `source`, computed on first request per generation
    pub fn get(&self, generation: u64, source: &AudioBuffer) -> Arc<AudioBuffer> {
        if let Some((cached_gen, buffer)) = self.entry.read().as_ref() {
            if *cached_gen == generation {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return buffer.clone();
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let reversed = Arc::new(reverse_frames(source));
        *self.entry.write() = Some((generation, reversed.clone()));
        log::debug!(
            "Reverse cache: computed {} frames for generation {}",
            reversed.frames(),
            generation
        );
        reversed
    }

    /// Drop the cached reversal (new source loaded)
    pub fn invalidate(&self) {
        if self.entry.write().take().is_some() {
            log::debug!("Reverse cache invalidated");
        }
    }

    /// (hits, misses) counters
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

impl Default for ReverseBufferCache {
    fn default() -> Self {
        Self::new()
    }
}
