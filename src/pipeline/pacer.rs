use std::time::{Duration, Instant};

/// Frame-interval accumulator for the capture loop. The next due time
/// always advances by exactly one interval, so scheduling error never
/// accumulates; a late tick shortens the following wait instead.
pub struct FramePacer {
    interval: Duration,
    next_due: Instant,
}

impl FramePacer {
    pub fn new(fps: u32) -> Self {
        Self::anchored_at(fps, Instant::now())
    }

    /// The first slot is due at `start` itself, so the first frame is
    /// acquired immediately instead of one interval in.
    pub fn anchored_at(fps: u32, start: Instant) -> Self {
        let interval = Duration::from_micros(1_000_000 / fps.max(1) as u64);
        Self {
            interval,
            next_due: start,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// True when a frame slot is due, consuming that slot.
    pub fn ready(&mut self, now: Instant) -> bool {
        if now < self.next_due {
            return false;
        }
        self.next_due += self.interval;
        true
    }
}
