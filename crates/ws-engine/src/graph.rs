//! Live processing graph
//!
//! Two topologies, decided once per build:
//!
//! ```text
//! Direct:        stretch ──> highpass ──> gain ──> out
//!
//! LfoModulated:  stretch (pitched) ──┐
//!                                    ├─ lfo crossfade ──> highpass ──> gain ──> out
//!                stretch (dry)    ───┘
//! ```
//!
//! `GraphBuilder::build` returns an owned `GraphHandle`; the transport owns
//! exactly one live handle and disposes the previous one before installing
//! the next. Disposal is idempotent. Parameter changes that stay inside the
//! current topology are applied to the live nodes in place.

use std::f64::consts::PI;
use std::sync::Arc;

use ws_core::{AtomicParam, AudioBuffer, EffectConfig, Tempo, TempoEstimator};

use crate::error::{EngineError, EngineResult};
use crate::lfo::{LfoModulator, LfoParams};
use crate::stretch::{StretchParams, TimeStretchUnit};

/// Highpass resonance, matching the fixed Q of the observed filter
pub const HIGHPASS_Q: f64 = 2.0;
/// Settle delay before the LFO topology becomes audible
pub const LFO_SETTLE_MS: f64 = 300.0;
/// Cutoff below this is treated as bypass
const HIGHPASS_MIN_HZ: f64 = 1.0;

// ═══════════════════════════════════════════════════════════════════════════════
// FILTER / GAIN STAGES
// ═══════════════════════════════════════════════════════════════════════════════

/// RBJ highpass biquad, transposed direct form II, one state pair per channel
struct HighpassFilter {
    sample_rate: f64,
    /// Cutoff requested by the last config application
    pending_cutoff: AtomicParam,
    cutoff: f64,
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    state: Vec<(f64, f64)>,
}

impl HighpassFilter {
    fn new(cutoff: f64, sample_rate: f64, channels: usize) -> Self {
        let mut filter = Self {
            sample_rate,
            pending_cutoff: AtomicParam::new(cutoff),
            cutoff: -1.0,
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            state: vec![(0.0, 0.0); channels],
        };
        filter.set_cutoff(cutoff);
        filter
    }

    fn set_cutoff(&mut self, cutoff: f64) {
        if (cutoff - self.cutoff).abs() < f64::EPSILON {
            return;
        }
        self.cutoff = cutoff;

        if cutoff < HIGHPASS_MIN_HZ {
            return;
        }

        let omega = 2.0 * PI * cutoff / self.sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();
        let alpha = sin_omega / (2.0 * HIGHPASS_Q);

        let a0 = 1.0 + alpha;
        self.b0 = ((1.0 + cos_omega) / 2.0) / a0;
        self.b1 = -(1.0 + cos_omega) / a0;
        self.b2 = ((1.0 + cos_omega) / 2.0) / a0;
        self.a1 = (-2.0 * cos_omega) / a0;
        self.a2 = (1.0 - alpha) / a0;
    }

    /// Recompute coefficients if the requested cutoff changed
    fn refresh(&mut self) {
        let pending = self.pending_cutoff.get();
        if (pending - self.cutoff).abs() > f64::EPSILON {
            self.set_cutoff(pending);
        }
    }

    fn process(&mut self, samples: &mut [f64]) {
        if self.cutoff < HIGHPASS_MIN_HZ {
            return;
        }

        let channels = self.state.len().max(1);
        for frame in samples.chunks_exact_mut(channels) {
            for (ch, sample) in frame.iter_mut().enumerate() {
                let (z1, z2) = self.state[ch];
                let x = *sample;
                let y = self.b0 * x + z1;
                self.state[ch] = (self.b1 * x - self.a1 * y + z2, self.b2 * x - self.a2 * y);
                *sample = y;
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TOPOLOGY
// ═══════════════════════════════════════════════════════════════════════════════

/// Graph shape, decided once per build call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphTopology {
    Direct,
    LfoModulated,
}

impl GraphTopology {
    pub fn of(config: &EffectConfig) -> Self {
        if config.lfo_mode {
            Self::LfoModulated
        } else {
            Self::Direct
        }
    }
}

/// Pitch ratio of the dry (pitch-corrected) LFO branch
fn dry_pitch_ratio(config: &EffectConfig) -> f64 {
    let correction = if config.preserve_pitch {
        1.0 / config.playback_rate
    } else {
        1.0
    };
    correction.clamp(ws_core::PITCH_RATIO_RANGE.0, ws_core::PITCH_RATIO_RANGE.1)
}

// ═══════════════════════════════════════════════════════════════════════════════
// GRAPH HANDLE
// ═══════════════════════════════════════════════════════════════════════════════

/// One live processing graph, owned by the transport.
///
/// `process` pulls interleaved frames; the host audio callback (or the
/// offline renderer) drives it. After `dispose` the handle only produces
/// silence.
pub struct GraphHandle {
    topology: GraphTopology,
    channels: usize,
    sample_rate: u32,

    pitched: TimeStretchUnit,
    pitched_params: Arc<StretchParams>,
    dry: Option<TimeStretchUnit>,
    dry_params: Option<Arc<StretchParams>>,
    lfo: Option<LfoModulator>,
    lfo_params: Option<Arc<LfoParams>>,

    highpass: HighpassFilter,
    gain: AtomicParam,
    /// Tempo the LFO rate is synced to
    tempo: Tempo,
    /// Remaining priming frames before the LFO topology is audible
    settle_frames: usize,

    scratch_a: Vec<f64>,
    scratch_b: Vec<f64>,
    disposed: bool,
}

impl GraphHandle {
    pub fn topology(&self) -> GraphTopology {
        self.topology
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Tempo driving the LFO rate (default tempo outside LFO mode)
    pub fn tempo(&self) -> Tempo {
        self.tempo
    }

    /// Pull interleaved frames from the graph
    pub fn process(&mut self, out: &mut [f64]) {
        if self.disposed {
            out.fill(0.0);
            return;
        }

        match self.topology {
            GraphTopology::Direct => {
                self.pitched.process(out);
            }
            GraphTopology::LfoModulated => {
                // Consume the settle delay as silence before the modulated
                // signal is connected through.
                let mut start = 0;
                if self.settle_frames > 0 {
                    let silent = (self.settle_frames * self.channels).min(out.len());
                    out[..silent].fill(0.0);
                    self.settle_frames -= silent / self.channels;
                    start = silent;
                }

                let live = &mut out[start..];
                if !live.is_empty() {
                    self.scratch_a.resize(live.len(), 0.0);
                    self.scratch_b.resize(live.len(), 0.0);
                    self.pitched.process(&mut self.scratch_a);
                    if let Some(dry) = self.dry.as_mut() {
                        dry.process(&mut self.scratch_b);
                    }
                    if let Some(lfo) = self.lfo.as_mut() {
                        lfo.process(&self.scratch_a, &self.scratch_b, live, self.channels);
                    }
                }
            }
        }

        self.highpass.refresh();
        self.highpass.process(out);

        let gain = self.gain.get();
        if (gain - 1.0).abs() > f64::EPSILON {
            for sample in out.iter_mut() {
                *sample *= gain;
            }
        }
    }

    /// Apply a configuration to the live nodes in place.
    ///
    /// Returns `false` when the change crosses the Direct/LFO boundary, in
    /// which case nothing is touched and the caller must rebuild.
    pub fn apply_config(&mut self, config: &EffectConfig) -> bool {
        if GraphTopology::of(config) != self.topology {
            return false;
        }

        self.pitched_params
            .pitch_ratio
            .set(config.effective_pitch_ratio());
        self.pitched_params.tempo_ratio.set(config.tempo_ratio);
        self.pitched_params.rate.set(config.playback_rate);

        if let Some(dry_params) = &self.dry_params {
            dry_params.pitch_ratio.set(dry_pitch_ratio(config));
            dry_params.tempo_ratio.set(config.tempo_ratio);
            dry_params.rate.set(config.playback_rate);
        }

        if let Some(lfo_params) = &self.lfo_params {
            lfo_params
                .frequency_hz
                .set(config.lfo_frequency_hz(self.tempo.0));
            lfo_params.set_shape(config.lfo_shape);
        }

        self.highpass.pending_cutoff.set(config.highpass_cutoff_hz);
        self.gain.set(config.volume);
        true
    }

    /// Release the graph. Idempotent; every stop/seek/rebuild/shutdown path
    /// runs through here.
    pub fn dispose(&mut self) {
        if !self.disposed {
            self.disposed = true;
            log::debug!("Graph disposed ({:?})", self.topology);
        }
    }
}

impl Drop for GraphHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILDER
// ═══════════════════════════════════════════════════════════════════════════════

/// Assembles processing graphs from a source buffer and configuration
pub struct GraphBuilder;

impl GraphBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Build a graph reading `source` from `offset_seconds` (source
    /// timeline). LFO mode estimates the source tempo; estimation failure
    /// is non-fatal and falls back to the default tempo.
    pub fn build(
        &self,
        source: Arc<AudioBuffer>,
        config: &EffectConfig,
        offset_seconds: f64,
    ) -> EngineResult<GraphHandle> {
        if source.frames() == 0 || source.channels == 0 {
            return Err(EngineError::GraphBuild("empty source buffer".to_string()));
        }

        let topology = GraphTopology::of(config);
        let channels = source.channels;
        let sample_rate = source.sample_rate;

        let pitched = TimeStretchUnit::new(source.clone(), offset_seconds);
        pitched.set_pitch_ratio(config.effective_pitch_ratio());
        pitched.set_tempo_ratio(config.tempo_ratio);
        pitched.set_rate(config.playback_rate);
        let pitched_params = pitched.params();

        let (dry, dry_params, lfo, lfo_params, tempo, settle_frames) = match topology {
            GraphTopology::Direct => (None, None, None, None, Tempo::DEFAULT, 0),
            GraphTopology::LfoModulated => {
                let tempo = match TempoEstimator::estimate(&source) {
                    Ok(estimate) => {
                        log::debug!("LFO synced to {:.1} BPM", estimate.bpm);
                        estimate.tempo()
                    }
                    Err(e) => {
                        log::warn!("{}; using default tempo for LFO", e);
                        Tempo::DEFAULT
                    }
                };

                let dry = TimeStretchUnit::new(source.clone(), offset_seconds);
                dry.set_pitch_ratio(dry_pitch_ratio(config));
                dry.set_tempo_ratio(config.tempo_ratio);
                dry.set_rate(config.playback_rate);
                let dry_params = dry.params();

                let lfo_params = Arc::new(LfoParams::new(
                    config.lfo_frequency_hz(tempo.0),
                    config.lfo_shape,
                ));
                let lfo = LfoModulator::new(lfo_params.clone(), sample_rate);

                let settle = (LFO_SETTLE_MS / 1000.0 * sample_rate as f64) as usize;
                (
                    Some(dry),
                    Some(dry_params),
                    Some(lfo),
                    Some(lfo_params),
                    tempo,
                    settle,
                )
            }
        };

        log::debug!(
            "Graph built: {:?}, offset {:.3}s, {} ch @ {} Hz",
            topology,
            offset_seconds,
            channels,
            sample_rate
        );

        Ok(GraphHandle {
            topology,
            channels,
            sample_rate,
            pitched,
            pitched_params,
            dry,
            dry_params,
            lfo,
            lfo_params,
            highpass: HighpassFilter::new(config.highpass_cutoff_hz, sample_rate as f64, channels),
            gain: AtomicParam::new(config.volume),
            tempo,
            settle_frames,
            scratch_a: Vec::new(),
            scratch_b: Vec::new(),
            disposed: false,
        })
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(seconds: f64) -> Arc<AudioBuffer> {
        let frames = (seconds * 44100.0) as usize;
        let samples = (0..frames)
            .map(|i| (2.0 * PI * 220.0 * i as f64 / 44100.0).sin() * 0.5)
            .collect();
        Arc::new(AudioBuffer::from_interleaved(samples, 1, 44100))
    }

    #[test]
    fn test_build_direct_topology() {
        let builder = GraphBuilder::new();
        let handle = builder
            .build(tone(2.0), &EffectConfig::default(), 0.0)
            .unwrap();
        assert_eq!(handle.topology(), GraphTopology::Direct);
    }

    #[test]
    fn test_build_lfo_topology() {
        let builder = GraphBuilder::new();
        let mut config = EffectConfig::default();
        config.lfo_mode = true;
        let handle = builder.build(tone(2.0), &config, 0.0).unwrap();
        assert_eq!(handle.topology(), GraphTopology::LfoModulated);
    }

    #[test]
    fn test_empty_source_rejected() {
        let builder = GraphBuilder::new();
        let empty = Arc::new(AudioBuffer::new(1, 44100));
        assert!(matches!(
            builder.build(empty, &EffectConfig::default(), 0.0),
            Err(EngineError::GraphBuild(_))
        ));
    }

    #[test]
    fn test_direct_produces_audio() {
        let builder = GraphBuilder::new();
        let mut handle = builder
            .build(tone(2.0), &EffectConfig::default(), 0.0)
            .unwrap();
        let mut out = vec![0.0; 4096];
        handle.process(&mut out);
        assert!(out.iter().any(|&s| s.abs() > 0.01));
    }

    #[test]
    fn test_lfo_settle_silence() {
        let builder = GraphBuilder::new();
        let mut config = EffectConfig::default();
        config.lfo_mode = true;
        let mut handle = builder.build(tone(2.0), &config, 0.0).unwrap();

        let settle = (LFO_SETTLE_MS / 1000.0 * 44100.0) as usize;
        let mut out = vec![0.0; settle + 8192];
        handle.process(&mut out);

        assert!(out[..settle].iter().all(|&s| s == 0.0));
        assert!(out[settle..].iter().any(|&s| s.abs() > 0.01));
    }

    #[test]
    fn test_dispose_idempotent_and_silent() {
        let builder = GraphBuilder::new();
        let mut handle = builder
            .build(tone(1.0), &EffectConfig::default(), 0.0)
            .unwrap();

        handle.dispose();
        handle.dispose();
        assert!(handle.is_disposed());

        let mut out = vec![1.0; 256];
        handle.process(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_apply_config_same_topology() {
        let builder = GraphBuilder::new();
        let mut config = EffectConfig::default();
        let mut handle = builder.build(tone(1.0), &config, 0.0).unwrap();

        config.set_pitch_semitones(5.0);
        config.set_volume(0.5);
        assert!(handle.apply_config(&config));
    }

    #[test]
    fn test_apply_config_rejects_mode_flip() {
        let builder = GraphBuilder::new();
        let mut config = EffectConfig::default();
        let mut handle = builder.build(tone(1.0), &config, 0.0).unwrap();

        config.lfo_mode = true;
        assert!(!handle.apply_config(&config));
        assert_eq!(handle.topology(), GraphTopology::Direct);
    }

    #[test]
    fn test_gain_scales_output() {
        let builder = GraphBuilder::new();
        let mut config = EffectConfig::default();
        config.set_volume(0.0);
        let mut handle = builder.build(tone(1.0), &config, 0.0).unwrap();

        let mut out = vec![0.0; 2048];
        handle.process(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_highpass_attenuates_low_tone() {
        let builder = GraphBuilder::new();

        // 60 Hz tone against a 2 kHz highpass
        let frames = 44100;
        let samples: Vec<f64> = (0..frames)
            .map(|i| (2.0 * PI * 60.0 * i as f64 / 44100.0).sin())
            .collect();
        let source = Arc::new(AudioBuffer::from_interleaved(samples, 1, 44100));

        let mut config = EffectConfig::default();
        config.set_highpass_cutoff_hz(2000.0);
        let mut handle = builder.build(source, &config, 0.0).unwrap();

        let mut out = vec![0.0; 44100];
        handle.process(&mut out);

        let peak = out[22050..].iter().fold(0.0f64, |m, s| m.max(s.abs()));
        assert!(peak < 0.1, "low tone not attenuated: peak {peak}");
    }
}

