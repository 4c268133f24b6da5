//! Interleaved PCM sample buffer
//!
//! The unit of exchange between decode, playback, render, and encode.

use serde::{Deserialize, Serialize};

/// Interleaved PCM audio buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioBuffer {
    /// Interleaved samples
    pub samples: Vec<f64>,
    /// Number of channels
    pub channels: usize,
    /// Sample rate
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Create empty buffer
    pub fn new(channels: usize, sample_rate: u32) -> Self {
        Self {
            samples: Vec::new(),
            channels,
            sample_rate,
        }
    }

    /// Create buffer with frame capacity
    pub fn with_capacity(channels: usize, sample_rate: u32, frames: usize) -> Self {
        Self {
            samples: Vec::with_capacity(frames * channels),
            channels,
            sample_rate,
        }
    }

    /// Create buffer from interleaved sample data
    pub fn from_interleaved(samples: Vec<f64>, channels: usize, sample_rate: u32) -> Self {
        Self {
            samples,
            channels,
            sample_rate,
        }
    }

    /// Create a silent buffer of the given frame count
    pub fn silence(channels: usize, sample_rate: u32, frames: usize) -> Self {
        Self {
            samples: vec![0.0; frames * channels],
            channels,
            sample_rate,
        }
    }

    /// Number of frames
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames() as f64 / self.sample_rate as f64
        }
    }

    /// Extract one channel (non-interleaved copy)
    pub fn channel(&self, channel: usize) -> Vec<f64> {
        if channel >= self.channels {
            return Vec::new();
        }
        self.samples
            .iter()
            .skip(channel)
            .step_by(self.channels)
            .copied()
            .collect()
    }

    /// One interleaved frame
    pub fn frame(&self, index: usize) -> &[f64] {
        let start = index * self.channels;
        &self.samples[start..start + self.channels]
    }

    /// Mix down to mono
    pub fn to_mono(&self) -> AudioBuffer {
        if self.channels == 1 {
            return self.clone();
        }

        let frames = self.frames();
        let mut mono = Vec::with_capacity(frames);

        for frame in 0..frames {
            let mut sum = 0.0;
            for ch in 0..self.channels {
                sum += self.samples[frame * self.channels + ch];
            }
            mono.push(sum / self.channels as f64);
        }

        AudioBuffer {
            samples: mono,
            channels: 1,
            sample_rate: self.sample_rate,
        }
    }

    /// Apply linear gain in place
    pub fn apply_gain(&mut self, gain: f64) {
        for sample in &mut self.samples {
            *sample *= gain;
        }
    }

    /// Absolute peak level
    pub fn peak(&self) -> f64 {
        self.samples.iter().fold(0.0, |max, s| s.abs().max(max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_and_duration() {
        let buf = AudioBuffer::from_interleaved(vec![0.0; 88200], 2, 44100);
        assert_eq!(buf.frames(), 44100);
        assert!((buf.duration() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_channel_extraction() {
        let buf = AudioBuffer::from_interleaved(vec![1.0, -1.0, 2.0, -2.0], 2, 44100);
        assert_eq!(buf.channel(0), vec![1.0, 2.0]);
        assert_eq!(buf.channel(1), vec![-1.0, -2.0]);
        assert!(buf.channel(2).is_empty());
    }

    #[test]
    fn test_to_mono_averages() {
        let buf = AudioBuffer::from_interleaved(vec![1.0, 0.0, 0.5, 0.5], 2, 44100);
        let mono = buf.to_mono();
        assert_eq!(mono.channels, 1);
        assert_eq!(mono.samples, vec![0.5, 0.5]);
    }

    #[test]
    fn test_peak_and_gain() {
        let mut buf = AudioBuffer::from_interleaved(vec![0.25, -0.5], 1, 44100);
        assert_eq!(buf.peak(), 0.5);
        buf.apply_gain(2.0);
        assert_eq!(buf.samples, vec![0.5, -1.0]);
    }

    #[test]
    fn test_empty_buffer() {
        let buf = AudioBuffer::new(0, 0);
        assert_eq!(buf.frames(), 0);
        assert_eq!(buf.duration(), 0.0);
    }
}
