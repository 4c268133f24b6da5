//! Streaming time-stretch unit
//!
//! Granular overlap-add stretcher with three independent controls:
//!
//! - pitch ratio — frequency scaling, duration unchanged
//! - tempo ratio — duration scaling, frequency unchanged
//! - rate — scales both jointly
//!
//! Two Hann-windowed grains, half a grain apart, read the source at the
//! pitch step while the nominal source position advances at the tempo
//! step. Grain respawns snap to the most similar nearby waveform position
//! so periodic material stays coherent across grain boundaries. The source
//! is read modulo its length, so the unit loops indefinitely and can start
//! from any offset.

use std::f64::consts::PI;
use std::sync::Arc;

use ws_core::{AtomicParam, AudioBuffer};

/// Grain length in output frames (~93 ms at 44.1 kHz)
const GRAIN_SIZE: usize = 4096;
/// Output offset between the two grains
const GRAIN_HOP: usize = GRAIN_SIZE / 2;
/// Respawn search range in source frames
const SEARCH_RANGE: usize = 256;
/// Correlation window for respawn alignment
const CORR_LEN: usize = 256;

/// Wrap a fractional frame position into `[0, frames)`
#[inline]
fn wrap_value(pos: f64, frames: usize) -> f64 {
    if frames > 0 {
        pos.rem_euclid(frames as f64)
    } else {
        0.0
    }
}

/// Live-updatable stretch parameters, shared with the owning graph
pub struct StretchParams {
    /// Frequency scaling only
    pub pitch_ratio: AtomicParam,
    /// Duration scaling only
    pub tempo_ratio: AtomicParam,
    /// Joint duration and frequency scaling
    pub rate: AtomicParam,
}

impl StretchParams {
    pub fn new(pitch_ratio: f64, tempo_ratio: f64, rate: f64) -> Self {
        Self {
            pitch_ratio: AtomicParam::new(pitch_ratio),
            tempo_ratio: AtomicParam::new(tempo_ratio),
            rate: AtomicParam::new(rate),
        }
    }

    /// Source frames consumed per output frame
    #[inline]
    pub fn advance(&self) -> f64 {
        self.tempo_ratio.get() * self.rate.get()
    }

    /// Source frames read per output frame inside a grain
    #[inline]
    pub fn pitch_step(&self) -> f64 {
        self.pitch_ratio.get() * self.rate.get()
    }
}

impl Default for StretchParams {
    fn default() -> Self {
        Self::new(1.0, 1.0, 1.0)
    }
}

struct Grain {
    /// Fractional source frame position
    read_pos: f64,
    /// Output frames since spawn, 0..GRAIN_SIZE
    age: usize,
}

/// Looping granular time-stretch processor
pub struct TimeStretchUnit {
    source: Arc<AudioBuffer>,
    params: Arc<StretchParams>,
    /// Nominal (un-pitched) source position in frames
    src_pos: f64,
    grains: [Grain; 2],
    window: Vec<f64>,
}

impl TimeStretchUnit {
    pub fn new(source: Arc<AudioBuffer>, offset_seconds: f64) -> Self {
        let window = (0..GRAIN_SIZE)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / GRAIN_SIZE as f64).cos()))
            .collect();

        let mut unit = Self {
            source,
            params: Arc::new(StretchParams::default()),
            src_pos: 0.0,
            grains: [
                Grain {
                    read_pos: 0.0,
                    age: 0,
                },
                Grain {
                    read_pos: 0.0,
                    age: GRAIN_HOP,
                },
            ],
            window,
        };
        unit.seek(offset_seconds);
        unit
    }

    /// Shared handle for in-place parameter updates
    pub fn params(&self) -> Arc<StretchParams> {
        self.params.clone()
    }

    pub fn set_pitch_ratio(&self, ratio: f64) {
        self.params.pitch_ratio.set(ratio);
    }

    pub fn set_tempo_ratio(&self, ratio: f64) {
        self.params.tempo_ratio.set(ratio);
    }

    pub fn set_rate(&self, rate: f64) {
        self.params.rate.set(rate);
    }

    pub fn channels(&self) -> usize {
        self.source.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.source.sample_rate
    }

    /// Nominal source position in seconds
    pub fn source_position(&self) -> f64 {
        self.src_pos / self.source.sample_rate as f64
    }

    /// Restart reading at an arbitrary source offset
    pub fn seek(&mut self, offset_seconds: f64) {
        let pos = self.wrap(offset_seconds * self.source.sample_rate as f64);
        self.src_pos = pos;
        self.grains[0] = Grain {
            read_pos: pos,
            age: 0,
        };
        self.grains[1] = Grain {
            read_pos: pos,
            age: GRAIN_HOP,
        };
    }

    /// Fill an interleaved output slice; always produces exactly
    /// `out.len() / channels` frames, looping over the source as needed.
    pub fn process(&mut self, out: &mut [f64]) {
        let channels = self.source.channels.max(1);
        let frames = self.source.frames();

        if frames == 0 {
            out.fill(0.0);
            return;
        }

        let advance = self.params.advance();
        let step = self.params.pitch_step();

        for frame in out.chunks_exact_mut(channels) {
            frame.fill(0.0);

            for grain in &self.grains {
                let gain = self.window[grain.age.min(GRAIN_SIZE - 1)];
                for (ch, slot) in frame.iter_mut().enumerate() {
                    *slot += gain * self.sample_at(grain.read_pos, ch);
                }
            }

            for grain in &mut self.grains {
                grain.read_pos = wrap_value(grain.read_pos + step, frames);
                grain.age += 1;
            }

            self.src_pos = wrap_value(self.src_pos + advance, frames);

            for idx in 0..self.grains.len() {
                if self.grains[idx].age >= GRAIN_SIZE {
                    let spawn = self.best_spawn(self.src_pos, idx);
                    self.grains[idx] = Grain {
                        read_pos: spawn,
                        age: 0,
                    };
                }
            }
        }
    }

    /// Linear-interpolated source read, wrapping at the loop boundary
    fn sample_at(&self, pos: f64, channel: usize) -> f64 {
        let frames = self.source.frames();
        let base = pos as usize % frames;
        let next = (base + 1) % frames;
        let frac = pos - pos.floor();

        let channels = self.source.channels;
        let s0 = self.source.samples[base * channels + channel];
        let s1 = self.source.samples[next * channels + channel];
        s0 + (s1 - s0) * frac
    }

    /// Pick the respawn position near `ideal` whose waveform best matches
    /// what the other grain is about to play.
    fn best_spawn(&self, ideal: f64, grain_idx: usize) -> f64 {
        let frames = self.source.frames();
        if frames < GRAIN_SIZE * 2 {
            return ideal;
        }

        let other = &self.grains[1 - grain_idx];
        let reference: Vec<f64> = (0..CORR_LEN)
            .map(|i| self.sample_at(wrap_value(other.read_pos + i as f64, frames), 0))
            .collect();

        let ideal_frame = ideal as i64;
        let mut best_pos = ideal;
        let mut best_corr = self.correlation_at(ideal_frame, &reference, frames);

        for delta in 1..=SEARCH_RANGE as i64 {
            for candidate in [ideal_frame - delta, ideal_frame + delta] {
                let corr = self.correlation_at(candidate, &reference, frames);
                if corr > best_corr {
                    best_corr = corr;
                    best_pos = candidate.rem_euclid(frames as i64) as f64;
                }
            }
        }

        best_pos
    }

    /// Normalized cross-correlation of the source at `pos` against `reference`
    fn correlation_at(&self, pos: i64, reference: &[f64], frames: usize) -> f64 {
        let channels = self.source.channels;
        let mut sum = 0.0;
        let mut sum_a2 = 0.0;
        let mut sum_b2 = 0.0;

        for (i, &r) in reference.iter().enumerate() {
            let idx = (pos + i as i64).rem_euclid(frames as i64) as usize;
            let s = self.source.samples[idx * channels];
            sum += s * r;
            sum_a2 += s * s;
            sum_b2 += r * r;
        }

        let denom = (sum_a2 * sum_b2).sqrt();
        if denom > 0.0 { sum / denom } else { 0.0 }
    }

    fn wrap(&self, pos: f64) -> f64 {
        wrap_value(pos, self.source.frames())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noise_source(frames: usize, channels: usize) -> Arc<AudioBuffer> {
        // Deterministic pseudo-noise, aperiodic so correlation peaks are unique
        let mut state = 0x2545F491u64;
        let samples = (0..frames * channels)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((state >> 33) as f64 / (1u64 << 31) as f64) - 1.0
            })
            .collect();
        Arc::new(AudioBuffer::from_interleaved(samples, channels, 44100))
    }

    fn sine_source(freq: f64, seconds: f64, sample_rate: u32) -> Arc<AudioBuffer> {
        let frames = (seconds * sample_rate as f64) as usize;
        let samples = (0..frames)
            .map(|i| (2.0 * PI * freq * i as f64 / sample_rate as f64).sin())
            .collect();
        Arc::new(AudioBuffer::from_interleaved(samples, 1, sample_rate))
    }

    fn zero_crossings(samples: &[f64]) -> usize {
        samples
            .windows(2)
            .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
            .count()
    }

    #[test]
    fn test_identity_passthrough() {
        let source = noise_source(44100, 1);
        let mut unit = TimeStretchUnit::new(source.clone(), 0.0);

        let mut out = vec![0.0; 22050];
        unit.process(&mut out);

        // With unit ratios both grains track the nominal position, so the
        // windows reconstruct the input exactly.
        for (i, (&got, &want)) in out.iter().zip(source.samples.iter()).enumerate() {
            assert!(
                (got - want).abs() < 1e-9,
                "sample {i}: got {got}, want {want}"
            );
        }
    }

    #[test]
    fn test_fills_exact_frame_count() {
        let source = noise_source(10000, 2);
        let mut unit = TimeStretchUnit::new(source, 0.0);
        let mut out = vec![0.0; 2 * 12345];
        unit.process(&mut out);
        assert!(out.iter().any(|&s| s != 0.0));
    }

    #[test]
    fn test_tempo_advances_source_faster() {
        let source = noise_source(441000, 1);
        let mut unit = TimeStretchUnit::new(source, 0.0);
        unit.set_tempo_ratio(2.0);

        let mut out = vec![0.0; 44100];
        unit.process(&mut out);

        // One output second consumed two source seconds
        assert!((unit.source_position() - 2.0).abs() < 0.01);
    }

    #[test]
    fn test_rate_advances_source() {
        let source = noise_source(441000, 1);
        let mut unit = TimeStretchUnit::new(source, 0.0);
        unit.set_rate(0.5);

        let mut out = vec![0.0; 44100];
        unit.process(&mut out);
        assert!((unit.source_position() - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_pitch_ratio_doubles_frequency() {
        let source = sine_source(220.0, 4.0, 44100);
        let mut unit = TimeStretchUnit::new(source, 0.0);
        unit.set_pitch_ratio(2.0);

        let mut out = vec![0.0; 44100];
        unit.process(&mut out);

        // Skip the first grain while the windows settle
        let crossings = zero_crossings(&out[GRAIN_SIZE..]);
        let seconds = (out.len() - GRAIN_SIZE) as f64 / 44100.0;
        let measured = crossings as f64 / seconds / 2.0;
        assert!(
            (measured - 440.0).abs() < 40.0,
            "measured {measured:.1} Hz, expected ~440"
        );
    }

    #[test]
    fn test_loops_past_end() {
        let source = noise_source(20000, 1);
        let mut unit = TimeStretchUnit::new(source, 0.0);

        // Pull well past the source length
        let mut out = vec![0.0; 100000];
        unit.process(&mut out);
        assert!(out[90000..].iter().any(|&s| s != 0.0));
    }

    #[test]
    fn test_seek_starts_at_offset() {
        let source = noise_source(44100, 1);
        let mut unit = TimeStretchUnit::new(source.clone(), 0.5);

        let mut out = vec![0.0; 1000];
        unit.process(&mut out);

        for i in 0..1000 {
            assert!((out[i] - source.samples[22050 + i]).abs() < 1e-9);
        }
    }

    #[test]
    fn test_wrap_value_boundaries() {
        assert_eq!(wrap_value(5.0, 0), 0.0);
        assert_eq!(wrap_value(10.0, 10), 0.0);
        assert!((wrap_value(-1.0, 10) - 9.0).abs() < 1e-12);
        assert!((wrap_value(23.5, 10) - 3.5).abs() < 1e-12);
    }

    #[test]
    fn test_empty_source_is_silent() {
        let source = Arc::new(AudioBuffer::new(1, 44100));
        let mut unit = TimeStretchUnit::new(source, 0.0);
        let mut out = vec![1.0; 64];
        unit.process(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }
}
