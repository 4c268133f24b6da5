//! Tempo-synchronized LFO crossfader
//!
//! Crossfades two inputs on a low-frequency cycle locked to the source
//! tempo: a note division (1/32..1/1) of the detected BPM sets the cycle
//! frequency. At crossfade value 1 the first input (pitched) is audible,
//! at 0 the second (dry).

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use ws_core::{AtomicParam, LfoShape};

/// Live-updatable LFO parameters
pub struct LfoParams {
    /// Cycle frequency in Hz
    pub frequency_hz: AtomicParam,
    shape: AtomicU8,
}

impl LfoParams {
    pub fn new(frequency_hz: f64, shape: LfoShape) -> Self {
        Self {
            frequency_hz: AtomicParam::new(frequency_hz),
            shape: AtomicU8::new(shape_to_u8(shape)),
        }
    }

    pub fn shape(&self) -> LfoShape {
        shape_from_u8(self.shape.load(Ordering::Relaxed))
    }

    pub fn set_shape(&self, shape: LfoShape) {
        self.shape.store(shape_to_u8(shape), Ordering::Relaxed);
    }
}

fn shape_to_u8(shape: LfoShape) -> u8 {
    match shape {
        LfoShape::Square => 0,
        LfoShape::Sine => 1,
        LfoShape::Triangle => 2,
        LfoShape::Sawtooth => 3,
    }
}

fn shape_from_u8(value: u8) -> LfoShape {
    match value {
        0 => LfoShape::Square,
        2 => LfoShape::Triangle,
        3 => LfoShape::Sawtooth,
        _ => LfoShape::Sine,
    }
}

/// Crossfade value for a waveform at a phase in [0, 1)
pub fn shape_value(shape: LfoShape, phase: f64) -> f64 {
    match shape {
        LfoShape::Square => {
            if phase < 0.5 {
                1.0
            } else {
                0.0
            }
        }
        LfoShape::Sine => 0.5 * (1.0 + (2.0 * std::f64::consts::PI * phase).sin()),
        LfoShape::Triangle => 1.0 - (2.0 * phase - 1.0).abs(),
        LfoShape::Sawtooth => phase,
    }
}

/// Two-input crossfade modulator
pub struct LfoModulator {
    params: Arc<LfoParams>,
    sample_rate: f64,
    phase: f64,
}

impl LfoModulator {
    pub fn new(params: Arc<LfoParams>, sample_rate: u32) -> Self {
        Self {
            params,
            sample_rate: sample_rate as f64,
            phase: 0.0,
        }
    }

    pub fn params(&self) -> Arc<LfoParams> {
        self.params.clone()
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }

    /// Crossfade interleaved inputs `a` (pitched) and `b` (dry) into `out`.
    ///
    /// All three slices are the same length; the phase advances one LFO
    /// step per frame regardless of channel count.
    pub fn process(&mut self, a: &[f64], b: &[f64], out: &mut [f64], channels: usize) {
        let channels = channels.max(1);
        let shape = self.params.shape();
        let step = self.params.frequency_hz.get() / self.sample_rate;

        for (frame_idx, frame) in out.chunks_exact_mut(channels).enumerate() {
            let mix = shape_value(shape, self.phase);
            let base = frame_idx * channels;
            for (ch, slot) in frame.iter_mut().enumerate() {
                *slot = a[base + ch] * mix + b[base + ch] * (1.0 - mix);
            }
            self.phase = (self.phase + step).rem_euclid(1.0);
        }
    }
}
