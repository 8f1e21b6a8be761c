//! Clock and timing utilities for streaming sessions.
//!
//! A streaming session is anchored to a monotonic clock epoch recorded
//! when the capture source opens. This module provides:
//! - The session clock (uptime plus wall-clock start time)
//! - Frame pacing at a fixed output rate

use std::time::{Duration, Instant};

/// Frame rate used when a capture source reports zero or an invalid rate.
pub const DEFAULT_FPS: u32 = 30;

/// Resolve the effective frame rate for a reported source rate.
///
/// Sources report `0` when the rate is unknown; those fall back to
/// [`DEFAULT_FPS`].
pub fn effective_fps(reported: u32) -> u32 {
    if reported == 0 {
        DEFAULT_FPS
    } else {
        reported
    }
}

/// A session clock that provides monotonic time relative to a fixed epoch
/// (the moment streaming started).
#[derive(Debug, Clone)]
pub struct SessionClock {
    /// The instant streaming started.
    epoch: Instant,

    /// Wall-clock time at epoch (RFC 3339 string).
    epoch_wall: String,
}

impl SessionClock {
    /// Create a new session clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Get seconds elapsed since the session started.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Wall-clock time at session start.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }
}

/// Paces frame emission at a fixed rate.
///
/// Deadlines advance by exactly one frame interval per tick so that small
/// scheduling delays do not accumulate. A pacer that falls more than two
/// intervals behind resynchronises to the current time instead of
/// bursting frames to catch up.
#[derive(Debug)]
pub struct FramePacer {
    interval: Duration,
    next_deadline: Option<Instant>,
}

impl FramePacer {
    /// Create a pacer targeting the given frames per second.
    pub fn new(fps: u32) -> Self {
        let fps = effective_fps(fps);
        Self {
            interval: Duration::from_nanos(1_000_000_000u64 / fps as u64),
            next_deadline: None,
        }
    }

    /// How long to wait at `now` before the next frame is due, advancing
    /// the internal deadline. The first call never waits.
    pub fn delay_until_next(&mut self, now: Instant) -> Duration {
        let deadline = match self.next_deadline {
            None => {
                self.next_deadline = Some(now + self.interval);
                return Duration::ZERO;
            }
            Some(deadline) => deadline,
        };

        if now > deadline + self.interval * 2 {
            self.next_deadline = Some(now + self.interval);
            return Duration::ZERO;
        }

        self.next_deadline = Some(deadline + self.interval);
        deadline.saturating_duration_since(now)
    }

    /// Block the current thread until the next frame is due.
    pub fn sleep_until_next_frame(&mut self) {
        let delay = self.delay_until_next(Instant::now());
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_fps_falls_back_to_default() {
        assert_eq!(effective_fps(0), 30);
        assert_eq!(effective_fps(24), 24);
    }

    #[test]
    fn test_clock_elapsed() {
        let clock = SessionClock::start();
        assert!(clock.elapsed_secs() < 1.0);
        assert!(!clock.epoch_wall().is_empty());
    }

    #[test]
    fn test_pacer_first_tick_is_immediate() {
        let mut pacer = FramePacer::new(30);
        assert_eq!(pacer.delay_until_next(Instant::now()), Duration::ZERO);
    }

    #[test]
    fn test_pacer_waits_remaining_interval() {
        let mut pacer = FramePacer::new(50); // 20ms interval
        let t0 = Instant::now();
        pacer.delay_until_next(t0);

        let delay = pacer.delay_until_next(t0 + Duration::from_millis(5));
        assert_eq!(delay, Duration::from_millis(15));
    }

    #[test]
    fn test_pacer_does_not_accumulate_drift() {
        let mut pacer = FramePacer::new(50);
        let t0 = Instant::now();
        pacer.delay_until_next(t0);
        // Woke 3ms late for the second frame
        pacer.delay_until_next(t0 + Duration::from_millis(23));
        // Third deadline is still anchored at t0 + 40ms
        let delay = pacer.delay_until_next(t0 + Duration::from_millis(30));
        assert_eq!(delay, Duration::from_millis(10));
    }

    #[test]
    fn test_pacer_resyncs_when_far_behind() {
        let mut pacer = FramePacer::new(50);
        let t0 = Instant::now();
        pacer.delay_until_next(t0);

        let late = t0 + Duration::from_millis(500);
        assert_eq!(pacer.delay_until_next(late), Duration::ZERO);
        let delay = pacer.delay_until_next(late + Duration::from_millis(5));
        assert_eq!(delay, Duration::from_millis(15));
    }
}
