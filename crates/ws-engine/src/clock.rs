//! Playback clock
//!
//! Maps a hardware clock reading plus a logical offset to the current
//! playback position. The hardware clock is an injected resource so the
//! transport can run against the host audio clock in production and a
//! manual clock in tests.

use std::sync::Arc;
use std::time::Instant;

/// Source of monotonic time, injected into the transport
pub trait HardwareClock: Send + Sync {
    /// Seconds since an arbitrary fixed origin
    fn now_seconds(&self) -> f64;
}

/// Monotonic clock backed by `Instant`
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareClock for SystemClock {
    fn now_seconds(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Logical playback position against the hardware clock.
///
/// While running, `position = (elapsed + (now - start_time)) mod duration`;
/// while frozen it is `elapsed`. The position always lies in `[0, duration)`.
pub struct PlaybackClock {
    clock: Arc<dyn HardwareClock>,
    elapsed: f64,
    start_time: f64,
    duration: f64,
    running: bool,
}

impl PlaybackClock {
    pub fn new(clock: Arc<dyn HardwareClock>) -> Self {
        Self {
            clock,
            elapsed: 0.0,
            start_time: 0.0,
            duration: 0.0,
            running: false,
        }
    }

    /// Session duration in seconds (already scaled by rate/tempo)
    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn set_duration(&mut self, duration: f64) {
        self.duration = duration.max(0.0);
        self.elapsed = self.wrap(self.elapsed);
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Anchor the clock and start advancing from the current elapsed offset
    pub fn start(&mut self) {
        self.start_time = self.clock.now_seconds();
        self.running = true;
    }

    /// Freeze the position into the elapsed offset
    pub fn freeze(&mut self) {
        self.elapsed = self.position();
        self.running = false;
    }

    /// Jump to an absolute position, preserving the running state
    pub fn set_position(&mut self, seconds: f64) {
        self.elapsed = self.wrap(seconds);
        if self.running {
            self.start_time = self.clock.now_seconds();
        }
    }

    /// Reset to zero, stopped
    pub fn reset(&mut self) {
        self.elapsed = 0.0;
        self.start_time = 0.0;
        self.running = false;
    }

    /// Current playback position in `[0, duration)`
    pub fn position(&self) -> f64 {
        if self.running {
            let now = self.clock.now_seconds();
            self.wrap(self.elapsed + (now - self.start_time))
        } else {
            self.elapsed
        }
    }

    /// Normalized progress, 0..=100
    pub fn progress_percent(&self) -> f64 {
        if self.duration > 0.0 {
            (self.position() / self.duration * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        }
    }

    fn wrap(&self, seconds: f64) -> f64 {
        if self.duration > 0.0 {
            seconds.rem_euclid(self.duration)
        } else {
            0.0
        }
    }
}

/// Manually advanced clock for deterministic transport tests
pub struct ManualClock {
    now: parking_lot::Mutex<f64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: parking_lot::Mutex::new(0.0),
        }
    }

    pub fn advance(&self, seconds: f64) {
        *self.now.lock() += seconds;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareClock for ManualClock {
    fn now_seconds(&self) -> f64 {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_advances_while_running() {
        let clock = Arc::new(ManualClock::new());
        let mut playback = PlaybackClock::new(clock.clone());
        playback.set_duration(10.0);

        playback.start();
        clock.advance(2.5);
        assert!((playback.position() - 2.5).abs() < 1e-9);

        clock.advance(1.5);
        assert!((playback.position() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_position_frozen_while_paused() {
        let clock = Arc::new(ManualClock::new());
        let mut playback = PlaybackClock::new(clock.clone());
        playback.set_duration(10.0);

        playback.start();
        clock.advance(3.0);
        playback.freeze();

        clock.advance(100.0);
        assert!((playback.position() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_position_wraps_at_duration() {
        let clock = Arc::new(ManualClock::new());
        let mut playback = PlaybackClock::new(clock.clone());
        playback.set_duration(4.0);

        playback.start();
        clock.advance(9.5);
        assert!((playback.position() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_monotone_between_wraps() {
        let clock = Arc::new(ManualClock::new());
        let mut playback = PlaybackClock::new(clock.clone());
        playback.set_duration(100.0);
        playback.start();

        let mut last = playback.position();
        for _ in 0..50 {
            clock.advance(0.25);
            let pos = playback.position();
            assert!(pos >= last);
            last = pos;
        }
    }

    #[test]
    fn test_progress_percent() {
        let clock = Arc::new(ManualClock::new());
        let mut playback = PlaybackClock::new(clock.clone());
        playback.set_duration(8.0);
        playback.set_position(2.0);
        assert!((playback.progress_percent() - 25.0).abs() < 1e-9);
    }
}
