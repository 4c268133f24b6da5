//! Best-effort tempo estimation
//!
//! Drives the tempo-synchronized LFO rate. Estimation is energy based:
//! short blocks whose energy jumps well above the immediately preceding
//! blocks are treated as onsets, and the dominant inter-onset interval is
//! read off a histogram. Too few onsets is an estimation failure; callers
//! treat that as non-fatal and fall back to the default tempo.

use std::collections::VecDeque;

use crate::{AudioBuffer, CoreError, CoreResult, Tempo};

/// Energy block size in samples
const BLOCK_SIZE: usize = 512;
/// Energy history window in blocks
const HISTORY_LEN: usize = 4096;
/// Onset threshold: recent energy must exceed older energy by this factor
const ONSET_RATIO: f64 = 1.5;
/// Minimum absolute energy for an onset
const ONSET_FLOOR: f64 = 0.01;
/// Minimum onsets for a usable estimate
const MIN_ONSETS: usize = 4;

/// Result of a tempo estimation pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoEstimate {
    /// Estimated tempo
    pub bpm: f64,
    /// Fraction of inter-onset intervals agreeing with the estimate, 0..=1
    pub confidence: f64,
}

impl TempoEstimate {
    pub fn tempo(&self) -> Tempo {
        Tempo(self.bpm)
    }
}

/// Energy-onset tempo estimator
pub struct TempoEstimator {
    sample_rate: f64,
    min_bpm: f64,
    max_bpm: f64,
    energy_history: VecDeque<f64>,
    onsets: Vec<u64>,
    position: u64,
}

impl TempoEstimator {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            min_bpm: 60.0,
            max_bpm: 200.0,
            energy_history: VecDeque::with_capacity(HISTORY_LEN),
            onsets: Vec::new(),
            position: 0,
        }
    }

    pub fn set_range(&mut self, min_bpm: f64, max_bpm: f64) {
        self.min_bpm = min_bpm;
        self.max_bpm = max_bpm;
    }

    /// Estimate the tempo of a whole buffer in one pass
    pub fn estimate(buffer: &AudioBuffer) -> CoreResult<TempoEstimate> {
        let mut estimator = Self::new(buffer.sample_rate as f64);
        let mono = buffer.to_mono();
        estimator.process(&mono.samples);
        estimator.analyze()
    }

    /// Feed mono samples to the onset tracker
    pub fn process(&mut self, audio: &[f64]) {
        for chunk in audio.chunks(BLOCK_SIZE) {
            let energy: f64 = chunk.iter().map(|s| s * s).sum::<f64>() / chunk.len() as f64;

            self.energy_history.push_back(energy);
            if self.energy_history.len() > HISTORY_LEN {
                self.energy_history.pop_front();
            }

            // Energy spike against the two preceding blocks
            if self.energy_history.len() >= 4 {
                let recent: f64 = self.energy_history.iter().rev().take(2).sum::<f64>() / 2.0;
                let older: f64 = self.energy_history.iter().rev().skip(2).take(2).sum::<f64>() / 2.0;

                if recent > older * ONSET_RATIO && recent > ONSET_FLOOR {
                    self.onsets.push(self.position);
                }
            }

            self.position += chunk.len() as u64;
        }
    }

    /// Reduce collected onsets to a tempo estimate
    pub fn analyze(&self) -> CoreResult<TempoEstimate> {
        if self.onsets.len() < MIN_ONSETS {
            return Err(CoreError::TempoDetection(format!(
                "only {} onsets found",
                self.onsets.len()
            )));
        }

        let intervals: Vec<f64> = self
            .onsets
            .windows(2)
            .map(|pair| (pair[1] - pair[0]) as f64)
            .collect();

        let min_interval = self.sample_rate * 60.0 / self.max_bpm;
        let max_interval = self.sample_rate * 60.0 / self.min_bpm;

        // Histogram of intervals inside the BPM window
        let mut histogram = [0u32; 256];
        for &interval in &intervals {
            if interval >= min_interval && interval <= max_interval {
                let normalized = (interval - min_interval) / (max_interval - min_interval);
                let bin = ((normalized * 255.0) as usize).min(255);
                histogram[bin] += 1;
            }
        }

        let (peak_bin, peak_count) = histogram
            .iter()
            .enumerate()
            .max_by_key(|(_, count)| **count)
            .unwrap_or((128, &0));

        if *peak_count == 0 {
            return Err(CoreError::TempoDetection(
                "no inter-onset intervals in range".to_string(),
            ));
        }

        let interval = min_interval + (peak_bin as f64 / 255.0) * (max_interval - min_interval);
        let bpm = (self.sample_rate * 60.0) / interval;
        let confidence = (*peak_count as f64 / intervals.len() as f64).min(1.0);

        log::debug!("Tempo estimate: {:.1} BPM (confidence {:.2})", bpm, confidence);

        Ok(TempoEstimate { bpm, confidence })
    }

    pub fn reset(&mut self) {
        self.energy_history.clear();
        self.onsets.clear();
        self.position = 0;
    }
}
