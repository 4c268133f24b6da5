//! Time-related types for audio processing

use serde::{Deserialize, Serialize};

/// Tempo in BPM
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tempo(pub f64);

impl Tempo {
    pub const DEFAULT: Self = Self(120.0);

    #[inline]
    pub fn beat_duration_seconds(self) -> f64 {
        60.0 / self.0
    }

    #[inline]
    pub fn beat_duration_samples(self, sample_rate: f64) -> f64 {
        self.beat_duration_seconds() * sample_rate
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self::DEFAULT
    }
}
