//! Effect parameter model
//!
//! All range-bound fields share one policy: out-of-range input is clamped to
//! the documented bounds, never rejected. The effective pitch ratio keeps the
//! [0.5, 2.0] band even when pitch correction at extreme speeds would push
//! past it.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

// ═══════════════════════════════════════════════════════════════════════════════
// RANGES
// ═══════════════════════════════════════════════════════════════════════════════

/// Pitch shift bounds in semitones
pub const PITCH_SEMITONES_RANGE: (f64, f64) = (-12.0, 12.0);
/// Tempo ratio bounds (duration scaling)
pub const TEMPO_RATIO_RANGE: (f64, f64) = (0.5, 2.0);
/// Raw playback rate bounds
pub const PLAYBACK_RATE_RANGE: (f64, f64) = (0.5, 2.0);
/// Highpass cutoff bounds in Hz
pub const HIGHPASS_CUTOFF_RANGE: (f64, f64) = (0.0, 5000.0);
/// Output gain bounds (linear)
pub const VOLUME_RANGE: (f64, f64) = (0.0, 1.0);
/// Ratio band the effective pitch is held inside
pub const PITCH_RATIO_RANGE: (f64, f64) = (0.5, 2.0);

/// Convert a semitone offset to a frequency ratio (2^(n/12))
#[inline]
pub fn semitone_to_ratio(semitones: f64) -> f64 {
    2.0_f64.powf(semitones / 12.0)
}

// ═══════════════════════════════════════════════════════════════════════════════
// LFO SHAPE / RATE
// ═══════════════════════════════════════════════════════════════════════════════

/// LFO waveform shape
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LfoShape {
    Square,
    #[default]
    Sine,
    Triangle,
    Sawtooth,
}

impl LfoShape {
    /// Parse from the persisted shape name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "square" => Some(Self::Square),
            "sine" => Some(Self::Sine),
            "triangle" => Some(Self::Triangle),
            "sawtooth" => Some(Self::Sawtooth),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Square => "square",
            Self::Sine => "sine",
            Self::Triangle => "triangle",
            Self::Sawtooth => "sawtooth",
        }
    }
}

/// Note divisions selectable for the LFO cycle, index 0..=5.
///
/// Expressed in beats per LFO cycle with a whole note spanning four beats:
/// 1/32, 1/16, 1/8, 1/4, 1/2, 1/1.
pub const LFO_RATE_BEATS: [f64; 6] = [0.125, 0.25, 0.5, 1.0, 2.0, 4.0];

/// Display labels matching `LFO_RATE_BEATS`
pub const LFO_RATE_LABELS: [&str; 6] = ["1/32", "1/16", "1/8", "1/4", "1/2", "1/1"];

// ═══════════════════════════════════════════════════════════════════════════════
// EFFECT CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Full effect configuration, persisted across restarts.
///
/// Construct through the setters (or call [`EffectConfig::clamped`] after
/// deserializing) so every field sits inside its documented range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectConfig {
    /// Pitch shift in semitones, [-12, 12]
    pub pitch_semitones: f64,
    /// Tempo ratio (duration only), [0.5, 2]
    pub tempo_ratio: f64,
    /// Raw playback rate (duration and pitch jointly), [0.5, 2]
    pub playback_rate: f64,
    /// Compensate the playback-rate pitch change
    pub preserve_pitch: bool,
    /// Highpass cutoff in Hz, [0, 5000]; 0 is effectively bypassed
    pub highpass_cutoff_hz: f64,
    /// Output gain, [0, 1]
    pub volume: f64,
    /// LFO crossfade topology enabled
    pub lfo_mode: bool,
    /// Index into the LFO note-division table, 0..=5
    pub lfo_rate_index: usize,
    /// LFO waveform
    pub lfo_shape: LfoShape,
}

impl Default for EffectConfig {
    fn default() -> Self {
        Self {
            pitch_semitones: 0.0,
            tempo_ratio: 1.0,
            playback_rate: 1.0,
            preserve_pitch: true,
            highpass_cutoff_hz: 0.0,
            volume: 1.0,
            lfo_mode: false,
            lfo_rate_index: 3,
            lfo_shape: LfoShape::Sine,
        }
    }
}

impl EffectConfig {
    pub fn set_pitch_semitones(&mut self, semitones: f64) {
        self.pitch_semitones = semitones.clamp(PITCH_SEMITONES_RANGE.0, PITCH_SEMITONES_RANGE.1);
    }

    pub fn set_tempo_ratio(&mut self, ratio: f64) {
        self.tempo_ratio = ratio.clamp(TEMPO_RATIO_RANGE.0, TEMPO_RATIO_RANGE.1);
    }

    pub fn set_playback_rate(&mut self, rate: f64) {
        self.playback_rate = rate.clamp(PLAYBACK_RATE_RANGE.0, PLAYBACK_RATE_RANGE.1);
    }

    pub fn set_highpass_cutoff_hz(&mut self, hz: f64) {
        self.highpass_cutoff_hz = hz.clamp(HIGHPASS_CUTOFF_RANGE.0, HIGHPASS_CUTOFF_RANGE.1);
    }

    pub fn set_volume(&mut self, volume: f64) {
        self.volume = volume.clamp(VOLUME_RANGE.0, VOLUME_RANGE.1);
    }

    pub fn set_lfo_rate_index(&mut self, index: usize) {
        self.lfo_rate_index = index.min(LFO_RATE_BEATS.len() - 1);
    }

    /// Return a copy with every field clamped into range.
    ///
    /// Used after deserializing persisted settings, which may have been
    /// edited by hand.
    pub fn clamped(mut self) -> Self {
        self.set_pitch_semitones(self.pitch_semitones);
        self.set_tempo_ratio(self.tempo_ratio);
        self.set_playback_rate(self.playback_rate);
        self.set_highpass_cutoff_hz(self.highpass_cutoff_hz);
        self.set_volume(self.volume);
        self.set_lfo_rate_index(self.lfo_rate_index);
        self
    }

    /// Effective pitch ratio fed to the stretch unit.
    ///
    /// When pitch is preserved the playback-rate detune is compensated with
    /// 1/rate, then the result is held in [0.5, 2.0]. The band is applied
    /// after correction, so extreme rate+pitch combinations land on the band
    /// edge instead of the mathematically exact ratio.
    pub fn effective_pitch_ratio(&self) -> f64 {
        let correction = if self.preserve_pitch {
            1.0 / self.playback_rate
        } else {
            1.0
        };
        (semitone_to_ratio(self.pitch_semitones) * correction)
            .clamp(PITCH_RATIO_RANGE.0, PITCH_RATIO_RANGE.1)
    }

    /// Playback session duration for a source of `original_seconds`
    #[inline]
    pub fn session_duration(&self, original_seconds: f64) -> f64 {
        original_seconds / self.playback_rate / self.tempo_ratio
    }

    /// Beats per LFO cycle for the configured rate index
    #[inline]
    pub fn lfo_rate_beats(&self) -> f64 {
        LFO_RATE_BEATS[self.lfo_rate_index.min(LFO_RATE_BEATS.len() - 1)]
    }

    /// LFO frequency in Hz at the given tempo
    #[inline]
    pub fn lfo_frequency_hz(&self, bpm: f64) -> f64 {
        (bpm / 60.0) / self.lfo_rate_beats()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ATOMIC PARAMETERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Atomic f64 parameter for lock-free publication to live graph nodes
pub struct AtomicParam {
    bits: AtomicU64,
}

impl AtomicParam {
    pub fn new(value: f64) -> Self {
        Self {
            bits: AtomicU64::new(value.to_bits()),
        }
    }

    #[inline]
    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl Default for AtomicParam {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl std::fmt::Debug for AtomicParam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AtomicParam").field(&self.get()).finish()
    }
}
