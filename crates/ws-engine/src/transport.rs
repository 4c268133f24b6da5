//! Transport controller
//!
//! Orchestrates play/pause/seek/reverse/parameter changes against the
//! graph builder and playback clock. The controller exclusively owns the
//! one live `GraphHandle`: on every rebuild path the previous handle is
//! disposed before the next is installed, so no failure can leave two
//! graphs producing sound.
//!
//! State machine: Stopped ── play ──> Playing <── pause/play ──> Paused.
//! `load` always lands in Stopped at position zero.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, bounded};
use ws_core::{AudioBuffer, EffectConfig, LfoShape, SettingsStore};

use crate::clock::{HardwareClock, PlaybackClock};
use crate::error::{EngineError, EngineResult};
use crate::graph::{GraphBuilder, GraphHandle};
use crate::reverse::ReverseBufferCache;

/// Position feed interval while playing
const TICK_INTERVAL_SECONDS: f64 = 1.0;
/// Position feed channel depth; stale updates are dropped, not queued
const POSITION_FEED_CAPACITY: usize = 64;

/// Transport state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Playing,
    Paused,
}

/// One position feed message
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionUpdate {
    /// Current position in seconds
    pub seconds: f64,
    /// Normalized progress, 0..=100
    pub progress_percent: f64,
}

/// A loaded source track
pub struct SourceTrack {
    pub buffer: Arc<AudioBuffer>,
    pub name: String,
    /// Monotonic id, bumped per load; keys the reverse cache
    generation: u64,
}

impl SourceTrack {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Playback transport owning the single live graph
pub struct TransportController {
    clock_source: Arc<dyn HardwareClock>,
    builder: GraphBuilder,
    settings: Option<SettingsStore>,

    config: EffectConfig,
    track: Option<SourceTrack>,
    reverse_cache: ReverseBufferCache,
    reverse_active: bool,

    state: TransportState,
    playback: PlaybackClock,
    live: Option<GraphHandle>,
    builds: u64,

    position_tx: Sender<PositionUpdate>,
    position_rx: Receiver<PositionUpdate>,
    last_tick: f64,

    generation_counter: u64,
}

impl TransportController {
    pub fn new(clock: Arc<dyn HardwareClock>) -> Self {
        let (position_tx, position_rx) = bounded(POSITION_FEED_CAPACITY);
        Self {
            clock_source: clock.clone(),
            builder: GraphBuilder::new(),
            settings: None,
            config: EffectConfig::default(),
            track: None,
            reverse_cache: ReverseBufferCache::new(),
            reverse_active: false,
            state: TransportState::Stopped,
            playback: PlaybackClock::new(clock),
            live: None,
            builds: 0,
            position_tx,
            position_rx,
            last_tick: f64::NEG_INFINITY,
            generation_counter: 0,
        }
    }

    /// Transport with durable settings: the configuration is read at
    /// startup and rewritten on every change.
    pub fn with_settings(clock: Arc<dyn HardwareClock>, settings: SettingsStore) -> Self {
        let mut transport = Self::new(clock);
        transport.config = settings.load();
        transport.settings = Some(settings);
        transport
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn config(&self) -> EffectConfig {
        self.config
    }

    pub fn reverse_active(&self) -> bool {
        self.reverse_active
    }

    pub fn has_live_graph(&self) -> bool {
        self.live.is_some()
    }

    /// Graph builds since construction (diagnostics)
    pub fn build_count(&self) -> u64 {
        self.builds
    }

    /// Session duration in seconds (scaled by rate and tempo)
    pub fn duration(&self) -> f64 {
        self.playback.duration()
    }

    pub fn current_position(&self) -> f64 {
        self.playback.position()
    }

    pub fn progress_percent(&self) -> f64 {
        self.playback.progress_percent()
    }

    /// Receiver side of the position feed
    pub fn subscribe(&self) -> Receiver<PositionUpdate> {
        self.position_rx.clone()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // TRACK LIFECYCLE
    // ═══════════════════════════════════════════════════════════════════════

    /// Install a new source track, tearing down any active session
    pub fn load_track(&mut self, buffer: AudioBuffer, name: impl Into<String>) {
        self.dispose_live();
        self.reverse_cache.invalidate();
        self.reverse_active = false;

        self.generation_counter += 1;
        let track = SourceTrack {
            buffer: Arc::new(buffer),
            name: name.into(),
            generation: self.generation_counter,
        };

        self.playback.reset();
        self.playback
            .set_duration(self.config.session_duration(track.buffer.duration()));
        self.state = TransportState::Stopped;

        log::info!(
            "Loaded '{}': {:.2}s, {} ch @ {} Hz",
            track.name,
            track.buffer.duration(),
            track.buffer.channels,
            track.buffer.sample_rate
        );
        self.track = Some(track);
        self.publish_position();
    }

    /// Remove the current track and tear the session down
    pub fn unload(&mut self) {
        self.dispose_live();
        self.reverse_cache.invalidate();
        self.track = None;
        self.reverse_active = false;
        self.playback.reset();
        self.playback.set_duration(0.0);
        self.state = TransportState::Stopped;
    }

    pub fn track_name(&self) -> Option<&str> {
        self.track.as_ref().map(|t| t.name.as_str())
    }

    /// Shared handle to the loaded source samples (for render snapshots)
    pub fn track_buffer(&self) -> Option<Arc<AudioBuffer>> {
        self.track.as_ref().map(|t| t.buffer.clone())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // TRANSPORT OPERATIONS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn play(&mut self) -> EngineResult<()> {
        if self.track.is_none() {
            return Err(EngineError::NoTrack);
        }
        if self.state == TransportState::Playing {
            return Ok(());
        }

        self.rebuild_at(self.playback.position())?;
        self.playback.start();
        self.state = TransportState::Playing;
        self.publish_position();
        Ok(())
    }

    pub fn pause(&mut self) {
        if self.state != TransportState::Playing {
            return;
        }
        self.playback.freeze();
        self.dispose_live();
        self.state = TransportState::Paused;
        self.publish_position();
    }

    /// Stop and rewind to zero
    pub fn stop(&mut self) {
        self.dispose_live();
        self.playback.freeze();
        self.playback.set_position(0.0);
        self.state = TransportState::Stopped;
        self.publish_position();
    }

    /// Jump to an absolute position, preserving the play/pause state
    pub fn seek(&mut self, seconds: f64) -> EngineResult<()> {
        if self.track.is_none() {
            return Err(EngineError::NoTrack);
        }

        // Clamp strictly below the duration so the clock cannot wrap an
        // end-of-track seek back to zero. The margin scales with the
        // duration; an absolute epsilon is lost to rounding past ~2 s.
        let duration = self.playback.duration();
        let target = if duration > 0.0 {
            seconds.clamp(0.0, duration * (1.0 - 1e-9))
        } else {
            0.0
        };

        self.playback.set_position(target);
        if self.state == TransportState::Playing {
            self.rebuild_at(target)?;
            self.playback.start();
        }
        self.publish_position();
        Ok(())
    }

    /// Relative seek (rewind / fast-forward)
    pub fn seek_by(&mut self, delta_seconds: f64) -> EngineResult<()> {
        let target = self.playback.position() + delta_seconds;
        self.seek(target)
    }

    /// Flip reverse playback. The position is mirrored to `duration -
    /// position` so the audible material continues from the same spot.
    pub fn toggle_reverse(&mut self) -> EngineResult<()> {
        if self.track.is_none() {
            return Err(EngineError::NoTrack);
        }

        let mirrored = self.playback.duration() - self.playback.position();
        self.reverse_active = !self.reverse_active;
        self.playback.set_position(mirrored.max(0.0));

        if self.state == TransportState::Playing {
            self.rebuild_at(self.playback.position())?;
            self.playback.start();
        }
        self.publish_position();
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PARAMETER CHANGES
    // ═══════════════════════════════════════════════════════════════════════

    pub fn set_pitch_semitones(&mut self, semitones: f64) {
        let mut config = self.config;
        config.set_pitch_semitones(semitones);
        self.update_config(config);
    }

    pub fn set_tempo_ratio(&mut self, ratio: f64) {
        let mut config = self.config;
        config.set_tempo_ratio(ratio);
        self.update_config(config);
    }

    pub fn set_playback_rate(&mut self, rate: f64) {
        let mut config = self.config;
        config.set_playback_rate(rate);
        self.update_config(config);
    }

    pub fn set_preserve_pitch(&mut self, preserve: bool) {
        let mut config = self.config;
        config.preserve_pitch = preserve;
        self.update_config(config);
    }

    pub fn set_highpass_cutoff_hz(&mut self, hz: f64) {
        let mut config = self.config;
        config.set_highpass_cutoff_hz(hz);
        self.update_config(config);
    }

    pub fn set_volume(&mut self, volume: f64) {
        let mut config = self.config;
        config.set_volume(volume);
        self.update_config(config);
    }

    pub fn set_lfo_mode(&mut self, enabled: bool) {
        let mut config = self.config;
        config.lfo_mode = enabled;
        self.update_config(config);
    }

    pub fn set_lfo_rate_index(&mut self, index: usize) {
        let mut config = self.config;
        config.set_lfo_rate_index(index);
        self.update_config(config);
    }

    pub fn set_lfo_shape(&mut self, shape: LfoShape) {
        let mut config = self.config;
        config.lfo_shape = shape;
        self.update_config(config);
    }

    /// Restore the default configuration (and persist it)
    pub fn reset_config(&mut self) {
        self.update_config(EffectConfig::default());
    }

    /// Install a new configuration: persist it, rescale the session
    /// duration, and apply to the live graph in place when possible. A
    /// Direct/LFO flip forces a full rebuild at the current position.
    fn update_config(&mut self, config: EffectConfig) {
        if config == self.config {
            return;
        }
        self.config = config;
        self.persist_config();

        let position = self.playback.position();
        if let Some(track) = &self.track {
            self.playback
                .set_duration(config.session_duration(track.buffer.duration()));
            self.playback
                .set_position(position.min(self.playback.duration()));
        }

        let applied_in_place = match self.live.as_mut() {
            Some(live) => live.apply_config(&config),
            None => true,
        };

        if !applied_in_place {
            // Mode flip: tear down and rebuild within this call
            if let Err(e) = self.rebuild_at(self.playback.position()) {
                log::error!("Rebuild after parameter change failed: {}", e);
            } else if self.state == TransportState::Playing {
                self.playback.start();
            }
        }
    }

    fn persist_config(&self) {
        if let Some(settings) = &self.settings {
            if let Err(e) = settings.save(&self.config) {
                log::error!("Failed to persist settings: {}", e);
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // GRAPH MANAGEMENT
    // ═══════════════════════════════════════════════════════════════════════

    /// Dispose the live graph, if any. Safe to call on every teardown path.
    fn dispose_live(&mut self) {
        if let Some(mut live) = self.live.take() {
            live.dispose();
        }
    }

    /// Tear down the previous graph and build a new one at the given
    /// session position. The old handle is always disposed first, so a
    /// build failure can never leave two live graphs.
    fn rebuild_at(&mut self, session_position: f64) -> EngineResult<()> {
        self.dispose_live();

        let track = self.track.as_ref().ok_or(EngineError::NoTrack)?;
        let source = if self.reverse_active {
            self.reverse_cache.get(track.generation, &track.buffer)
        } else {
            track.buffer.clone()
        };

        // Session time scales to source time by rate and tempo
        let source_offset = session_position * self.config.playback_rate * self.config.tempo_ratio;

        match self.builder.build(source, &self.config, source_offset) {
            Ok(handle) => {
                self.builds += 1;
                self.live = Some(handle);
                Ok(())
            }
            Err(e) => {
                log::error!("Graph build failed: {}", e);
                Err(e)
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // AUDIO / POSITION FEED
    // ═══════════════════════════════════════════════════════════════════════

    /// Pull interleaved frames for the host audio callback. Produces
    /// silence unless playing.
    pub fn process(&mut self, out: &mut [f64]) {
        match (self.state, self.live.as_mut()) {
            (TransportState::Playing, Some(live)) => live.process(out),
            _ => out.fill(0.0),
        }
    }

    /// Low-frequency poll from the shell; publishes the position roughly
    /// once per second while playing.
    pub fn tick(&mut self) {
        if self.state != TransportState::Playing {
            return;
        }
        let now = self.clock_source.now_seconds();
        if now - self.last_tick >= TICK_INTERVAL_SECONDS {
            self.last_tick = now;
            self.publish_position();
        }
    }

    fn publish_position(&self) {
        let update = PositionUpdate {
            seconds: self.playback.position(),
            progress_percent: self.playback.progress_percent(),
        };
        // Feed is lossy: drop the update if no one is draining
        let _ = self.position_tx.try_send(update);
    }
}

impl Drop for TransportController {
    fn drop(&mut self) {
        self.dispose_live();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn tone_track(seconds: f64) -> AudioBuffer {
        let frames = (seconds * 44100.0) as usize;
        let samples = (0..frames)
            .map(|i| (2.0 * std::f64::consts::PI * 220.0 * i as f64 / 44100.0).sin())
            .collect();
        AudioBuffer::from_interleaved(samples, 1, 44100)
    }

    fn transport_with_clock() -> (TransportController, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (TransportController::new(clock.clone()), clock)
    }

    #[test]
    fn test_load_lands_stopped_at_zero() {
        let (mut transport, _clock) = transport_with_clock();
        transport.load_track(tone_track(10.0), "song.wav");
        assert_eq!(transport.state(), TransportState::Stopped);
        assert_eq!(transport.current_position(), 0.0);
        assert!((transport.duration() - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_play_without_track_fails() {
        let (mut transport, _clock) = transport_with_clock();
        assert!(matches!(transport.play(), Err(EngineError::NoTrack)));
    }

    #[test]
    fn test_position_advances_and_freezes() {
        let (mut transport, clock) = transport_with_clock();
        transport.load_track(tone_track(10.0), "song.wav");

        transport.play().unwrap();
        clock.advance(3.0);
        assert!((transport.current_position() - 3.0).abs() < 1e-9);

        transport.pause();
        clock.advance(5.0);
        assert!((transport.current_position() - 3.0).abs() < 1e-9);
        assert_eq!(transport.state(), TransportState::Paused);
        assert!(!transport.has_live_graph());
    }

    #[test]
    fn test_position_monotone_while_playing() {
        let (mut transport, clock) = transport_with_clock();
        transport.load_track(tone_track(60.0), "song.wav");
        transport.play().unwrap();

        let mut last = transport.current_position();
        for _ in 0..40 {
            clock.advance(0.1);
            let pos = transport.current_position();
            assert!(pos >= last);
            last = pos;
        }
    }

    #[test]
    fn test_position_wraps_at_duration() {
        let (mut transport, clock) = transport_with_clock();
        transport.load_track(tone_track(4.0), "loop.wav");
        transport.play().unwrap();

        clock.advance(9.0);
        assert!((transport.current_position() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_seek_preserves_state() {
        let (mut transport, clock) = transport_with_clock();
        transport.load_track(tone_track(10.0), "song.wav");

        transport.seek(4.0).unwrap();
        assert_eq!(transport.state(), TransportState::Stopped);
        assert!((transport.current_position() - 4.0).abs() < 1e-9);

        transport.play().unwrap();
        clock.advance(1.0);
        transport.seek(8.0).unwrap();
        assert_eq!(transport.state(), TransportState::Playing);
        clock.advance(1.0);
        assert!((transport.current_position() - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_seek_by_clamps() {
        let (mut transport, _clock) = transport_with_clock();
        transport.load_track(tone_track(10.0), "song.wav");

        transport.seek_by(-5.0).unwrap();
        assert_eq!(transport.current_position(), 0.0);

        transport.seek_by(99.0).unwrap();
        assert!(transport.current_position() < 10.0);
        assert!(transport.current_position() > 9.9);
    }

    #[test]
    fn test_seek_to_end_stays_at_end() {
        let (mut transport, _clock) = transport_with_clock();
        transport.load_track(tone_track(10.0), "song.wav");

        // An end-of-track seek must land just below the duration, never
        // wrap around to zero
        transport.seek(10.0).unwrap();
        assert!(transport.current_position() > 9.999);
        assert!(transport.current_position() < 10.0);

        transport.seek(99.0).unwrap();
        assert!(transport.current_position() > 9.999);
        assert!(transport.current_position() < 10.0);
    }

    #[test]
    fn test_reverse_mirrors_position() {
        let (mut transport, clock) = transport_with_clock();
        transport.load_track(tone_track(10.0), "song.wav");
        transport.play().unwrap();
        clock.advance(3.0);

        transport.toggle_reverse().unwrap();
        assert!(transport.reverse_active());
        assert!((transport.current_position() - 7.0).abs() < 1e-9);
        assert_eq!(transport.state(), TransportState::Playing);
        assert!(transport.has_live_graph());
    }

    #[test]
    fn test_reverse_twice_restores_position() {
        let (mut transport, clock) = transport_with_clock();
        transport.load_track(tone_track(10.0), "song.wav");
        transport.play().unwrap();
        clock.advance(2.0);

        transport.toggle_reverse().unwrap();
        transport.toggle_reverse().unwrap();
        assert!(!transport.reverse_active());
        assert!((transport.current_position() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_rapid_param_changes_single_graph() {
        let (mut transport, _clock) = transport_with_clock();
        transport.load_track(tone_track(10.0), "song.wav");
        transport.play().unwrap();
        let builds_after_play = transport.build_count();

        transport.set_pitch_semitones(3.0);
        transport.set_pitch_semitones(-2.0);
        transport.set_tempo_ratio(1.5);
        transport.set_highpass_cutoff_hz(800.0);
        transport.set_volume(0.7);

        assert!(transport.has_live_graph());
        // Same-topology changes go to the live nodes in place
        assert_eq!(transport.build_count(), builds_after_play);
    }

    #[test]
    fn test_mode_flip_rebuilds_once() {
        let (mut transport, _clock) = transport_with_clock();
        transport.load_track(tone_track(10.0), "song.wav");
        transport.play().unwrap();
        let builds_after_play = transport.build_count();

        transport.set_lfo_mode(true);
        assert!(transport.has_live_graph());
        assert_eq!(transport.build_count(), builds_after_play + 1);
    }

    #[test]
    fn test_tempo_change_rescales_duration() {
        let (mut transport, _clock) = transport_with_clock();
        transport.load_track(tone_track(10.0), "song.wav");

        transport.set_tempo_ratio(2.0);
        assert!((transport.duration() - 5.0).abs() < 1e-6);

        transport.set_playback_rate(2.0);
        assert!((transport.duration() - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_load_replaces_session() {
        let (mut transport, clock) = transport_with_clock();
        transport.load_track(tone_track(10.0), "a.wav");
        transport.play().unwrap();
        clock.advance(2.0);

        transport.load_track(tone_track(4.0), "b.wav");
        assert_eq!(transport.state(), TransportState::Stopped);
        assert_eq!(transport.current_position(), 0.0);
        assert!(!transport.has_live_graph());
        assert_eq!(transport.track_name(), Some("b.wav"));
    }

    #[test]
    fn test_position_feed_on_pause_and_seek() {
        let (mut transport, clock) = transport_with_clock();
        transport.load_track(tone_track(10.0), "song.wav");
        let feed = transport.subscribe();
        while feed.try_recv().is_ok() {}

        transport.play().unwrap();
        clock.advance(2.5);
        transport.pause();

        let updates: Vec<PositionUpdate> = feed.try_iter().collect();
        let last = updates.last().unwrap();
        assert!((last.seconds - 2.5).abs() < 1e-9);
        assert!((last.progress_percent - 25.0).abs() < 1e-6);
    }

    #[test]
    fn test_tick_rate_limited() {
        let (mut transport, clock) = transport_with_clock();
        transport.load_track(tone_track(10.0), "song.wav");
        let feed = transport.subscribe();
        transport.play().unwrap();
        while feed.try_recv().is_ok() {}

        // Many ticks inside one second publish at most one update
        for _ in 0..10 {
            clock.advance(0.05);
            transport.tick();
        }
        assert!(feed.try_iter().count() <= 1);
    }

    #[test]
    fn test_settings_write_through() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::in_dir(dir.path());
        let clock = Arc::new(ManualClock::new());

        let mut transport = TransportController::with_settings(clock, store.clone());
        transport.set_pitch_semitones(5.0);
        transport.set_lfo_shape(LfoShape::Square);

        let reloaded = store.load();
        assert_eq!(reloaded.pitch_semitones, 5.0);
        assert_eq!(reloaded.lfo_shape, LfoShape::Square);
    }

    #[test]
    fn test_reset_config() {
        let (mut transport, _clock) = transport_with_clock();
        transport.set_pitch_semitones(7.0);
        transport.set_volume(0.2);
        transport.reset_config();
        assert_eq!(transport.config(), EffectConfig::default());
    }

    #[test]
    fn test_process_silent_unless_playing() {
        let (mut transport, _clock) = transport_with_clock();
        transport.load_track(tone_track(2.0), "song.wav");

        let mut out = vec![1.0; 512];
        transport.process(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));

        transport.play().unwrap();
        transport.process(&mut out);
        assert!(out.iter().any(|&s| s != 0.0));
    }
}
