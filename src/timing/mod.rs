//! Monotonic clock for frame timestamps
//!
//! Engines that do not stamp their own samples take timestamps from here.
//! Ticks are 100 ns units, the resolution capture engines conventionally use.

use std::sync::Arc;
use std::time::{Duration, Instant};

pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Monotonic clock for presentation timestamps
///
/// All timestamps derive from this single source
/// to ensure monotonic ordering.
#[derive(Debug, Clone)]
pub struct FrameClock {
    start: Arc<Instant>,
}

impl FrameClock {
    /// Create a new clock with the current instant as time zero
    pub fn new() -> Self {
        Self {
            start: Arc::new(Instant::now()),
        }
    }

    /// Create a clock from an existing start instant
    ///
    /// Use this to share the same timebase between components.
    pub fn from_instant(start: Instant) -> Self {
        Self {
            start: Arc::new(start),
        }
    }

    /// Elapsed time since clock creation, in 100 ns ticks
    #[inline]
    pub fn ticks(&self) -> i64 {
        duration_to_ticks(self.start.elapsed())
    }

    /// Ticks for a given instant; instants before the start clamp to zero
    #[inline]
    pub fn ticks_at(&self, instant: Instant) -> i64 {
        duration_to_ticks(instant.saturating_duration_since(*self.start))
    }

    pub fn start_instant(&self) -> Instant {
        *self.start
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

pub fn duration_to_ticks(duration: Duration) -> i64 {
    (duration.as_nanos() / 100).min(i64::MAX as u128) as i64
}

pub fn ticks_to_duration(ticks: i64) -> Duration {
    Duration::from_nanos(ticks.max(0) as u64 * 100)
}
