//! Monotonic time source shared by the supervisor and its handles.
//!
//! Timestamps are nanoseconds since a clock-local origin so they fit in an
//! `AtomicU64` and can be exchanged between threads without locking.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// A point on a [`Clock`]'s monotonic timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonotonicTime(u64);

impl MonotonicTime {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Elapsed time since `earlier`, clamped to zero if `earlier` is in the future.
    #[must_use]
    pub fn saturating_duration_since(self, earlier: Self) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }

    #[must_use]
    pub fn saturating_add(self, delta: Duration) -> Self {
        Self(self.0.saturating_add(duration_nanos(delta)))
    }

    #[must_use]
    pub fn saturating_sub(self, delta: Duration) -> Self {
        Self(self.0.saturating_sub(duration_nanos(delta)))
    }
}

impl fmt::Display for MonotonicTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", Duration::from_nanos(self.0))
    }
}

fn duration_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Source of monotonic timestamps.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> MonotonicTime;
}

/// Wall-independent clock backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    #[must_use]
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

impl Clock for SystemClock {
    fn now(&self) -> MonotonicTime {
        MonotonicTime(duration_nanos(self.origin.elapsed()))
    }
}

/// Clock that only moves when told to.
///
/// Used by tests and simulations. [`ManualClock::set`] may move time
/// backwards, which is how clock anomalies are exercised.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn starting_at(start: MonotonicTime) -> Self {
        Self {
            nanos: AtomicU64::new(start.as_nanos()),
        }
    }

    pub fn advance(&self, delta: Duration) {
        self.nanos.fetch_add(duration_nanos(delta), Ordering::AcqRel);
    }

    pub fn set(&self, at: MonotonicTime) {
        self.nanos.store(at.as_nanos(), Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> MonotonicTime {
        MonotonicTime(self.nanos.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_clamps_to_zero_when_reversed() {
        let early = MonotonicTime::from_nanos(1_000);
        let late = MonotonicTime::from_nanos(5_000);
        assert_eq!(late.saturating_duration_since(early), Duration::from_nanos(4_000));
        assert_eq!(early.saturating_duration_since(late), Duration::ZERO);
    }

    #[test]
    fn manual_clock_moves_only_when_told() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), MonotonicTime::ZERO);
        clock.advance(Duration::from_millis(3));
        assert_eq!(clock.now(), MonotonicTime::from_nanos(3_000_000));
        clock.set(MonotonicTime::from_nanos(10));
        assert_eq!(clock.now(), MonotonicTime::from_nanos(10));
    }

    #[test]
    fn system_clock_is_non_decreasing() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn add_and_sub_saturate() {
        let t = MonotonicTime::from_nanos(5);
        assert_eq!(t.saturating_sub(Duration::from_secs(1)), MonotonicTime::ZERO);
        assert_eq!(
            MonotonicTime::from_nanos(u64::MAX).saturating_add(Duration::from_secs(1)),
            MonotonicTime::from_nanos(u64::MAX)
        );
    }
}
