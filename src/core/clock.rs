//! Frame clock used to derive the frame rate fed to time-dependent passes.

use std::time::Instant;

/// Frame rate assumed before two frames have been measured.
pub const DEFAULT_FRAME_RATE: f32 = 60.0;

/// Weight of the newest sample in the smoothed frame rate.
const SMOOTHING: f32 = 0.1;

/// Measures the time between frames and keeps a smoothed frame rate.
pub struct Clock {
    /// Instant of the last tick.
    last_tick: Option<Instant>,
    /// Last measured frame delta in seconds.
    delta: f32,
    /// Exponentially smoothed frames per second.
    frame_rate: f32,
    /// Number of ticks since creation or reset.
    frames: u64,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    /// Create a clock that has not ticked yet.
    pub fn new() -> Self {
        Self {
            last_tick: None,
            delta: 0.0,
            frame_rate: DEFAULT_FRAME_RATE,
            frames: 0,
        }
    }

    /// Mark the start of a new frame and return the delta in seconds.
    pub fn tick(&mut self) -> f32 {
        let now = Instant::now();
        if let Some(last) = self.last_tick {
            let delta = now.duration_since(last).as_secs_f32();
            self.record_delta(delta);
        }
        self.last_tick = Some(now);
        self.frames += 1;
        self.delta
    }

    /// Feed a measured frame delta into the smoothed rate.
    pub fn record_delta(&mut self, delta: f32) {
        self.delta = delta;
        if delta > f32::EPSILON {
            let instant_rate = 1.0 / delta;
            self.frame_rate += (instant_rate - self.frame_rate) * SMOOTHING;
        }
    }

    /// Last measured frame delta in seconds.
    #[inline]
    pub fn delta(&self) -> f32 {
        self.delta
    }

    /// Smoothed frames per second.
    #[inline]
    pub fn frame_rate(&self) -> f32 {
        self.frame_rate
    }

    /// Number of frames ticked.
    #[inline]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Forget all timing history.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_starts_at_default_rate() {
        let clock = Clock::new();
        assert_eq!(clock.frame_rate(), DEFAULT_FRAME_RATE);
        assert_eq!(clock.frames(), 0);
    }

    #[test]
    fn test_clock_converges_to_measured_rate() {
        let mut clock = Clock::new();
        for _ in 0..200 {
            clock.record_delta(1.0 / 30.0);
        }
        assert!((clock.frame_rate() - 30.0).abs() < 0.01);
    }

    #[test]
    fn test_zero_delta_keeps_rate() {
        let mut clock = Clock::new();
        clock.record_delta(0.0);
        assert_eq!(clock.frame_rate(), DEFAULT_FRAME_RATE);
    }
}
