//! Per-worker liveness handle.
//!
//! A worker obtains an `Arc<LivenessHandle>` from the supervisor at startup
//! and must call [`LivenessHandle::touch`] periodically, either directly or by
//! arming a recurring timer in its own event loop. The supervisor only keeps
//! a `Weak` reference, so dropping the handle is enough to stop supervision.
//!
//! ```text
//! worker thread                      supervisor thread
//!   touch() ──► last_touch (AtomicU64) ◄── last_touch()
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, MonotonicTime};
use crate::error::ConfigError;
use crate::event_loop::{EventLoop, Timer};

/// Opaque identity of a supervised worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(u64);

impl WorkerId {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for WorkerId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Liveness record for one worker thread.
pub struct LivenessHandle {
    id: WorkerId,
    touch_interval: Duration,
    /// Nanoseconds on `clock`. Written by the owner, read by the supervisor.
    last_touch: AtomicU64,
    clock: Arc<dyn Clock>,
    timer: Mutex<Option<Arc<dyn Timer>>>,
}

impl fmt::Debug for LivenessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LivenessHandle")
            .field("id", &self.id)
            .field("touch_interval", &self.touch_interval)
            .field("last_touch", &self.last_touch())
            .field("armed", &self.is_armed())
            .finish()
    }
}

impl LivenessHandle {
    /// Create a handle whose last touch is "now".
    pub(crate) fn new(id: WorkerId, touch_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        let created = clock.now();
        Self {
            id,
            touch_interval,
            last_touch: AtomicU64::new(created.as_nanos()),
            clock,
            timer: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn id(&self) -> WorkerId {
        self.id
    }

    #[must_use]
    pub fn touch_interval(&self) -> Duration {
        self.touch_interval
    }

    /// Record that the owning thread is still making progress.
    ///
    /// Lock-free and allocation-free. The stored value never moves backwards,
    /// even if the clock does.
    #[inline]
    pub fn touch(&self) {
        let now = self.clock.now().as_nanos();
        self.last_touch.fetch_max(now, Ordering::Release);
    }

    /// Last recorded touch on the supervisor's clock.
    #[inline]
    #[must_use]
    pub fn last_touch(&self) -> MonotonicTime {
        MonotonicTime::from_nanos(self.last_touch.load(Ordering::Acquire))
    }

    /// Install a recurring timer in `event_loop` that touches this handle
    /// every `touch_interval`.
    ///
    /// The timer holds only a weak reference back to the handle and is
    /// cancelled when the handle is dropped. Arming again replaces the
    /// previous timer.
    pub fn arm(self: &Arc<Self>, event_loop: &dyn EventLoop) -> Result<(), ConfigError> {
        if self.touch_interval.is_zero() {
            return Err(ConfigError::InvalidTouchInterval);
        }

        let weak = Arc::downgrade(self);
        let timer = event_loop.create_timer(Box::new(move || {
            if let Some(handle) = weak.upgrade() {
                handle.touch();
                handle.schedule_next();
            }
        }));

        // Store before enabling: on a multi-threaded loop the first firing may
        // race this call and needs to find the timer to reschedule it.
        let previous = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Arc::clone(&timer));
        if let Some(previous) = previous {
            previous.disable();
        }
        timer.enable(self.touch_interval);

        tracing::debug!(
            worker = %self.id,
            touch_interval_ms = self.touch_interval.as_millis() as u64,
            "Liveness timer armed"
        );
        Ok(())
    }

    /// Cancel the touch timer, if any. Manual `touch()` keeps working.
    pub fn disarm(&self) {
        let timer = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(timer) = timer {
            timer.disable();
        }
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn schedule_next(&self) {
        let timer = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(timer) = timer {
            timer.enable(self.touch_interval);
        }
    }
}

impl Drop for LivenessHandle {
    fn drop(&mut self) {
        let timer = self
            .timer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(timer) = timer {
            timer.disable();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::event_loop::ManualEventLoop;

    fn manual_handle(interval_ms: u64) -> (Arc<ManualClock>, Arc<LivenessHandle>) {
        let clock = Arc::new(ManualClock::new());
        let handle = Arc::new(LivenessHandle::new(
            WorkerId::new(1),
            Duration::from_millis(interval_ms),
            clock.clone(),
        ));
        (clock, handle)
    }

    #[test]
    fn creation_counts_as_a_touch() {
        let clock = Arc::new(ManualClock::starting_at(MonotonicTime::from_nanos(42)));
        let handle = LivenessHandle::new(WorkerId::new(3), Duration::from_millis(1), clock);
        assert_eq!(handle.last_touch(), MonotonicTime::from_nanos(42));
    }

    #[test]
    fn touch_records_current_time() {
        let (clock, handle) = manual_handle(10);
        clock.advance(Duration::from_millis(5));
        handle.touch();
        assert_eq!(handle.last_touch(), MonotonicTime::from_nanos(5_000_000));
    }

    #[test]
    fn touch_never_moves_backwards() {
        let (clock, handle) = manual_handle(10);
        clock.set(MonotonicTime::from_nanos(1_000));
        handle.touch();
        clock.set(MonotonicTime::from_nanos(500));
        handle.touch();
        assert_eq!(handle.last_touch(), MonotonicTime::from_nanos(1_000));
    }

    #[test]
    fn armed_timer_touches_on_cadence() {
        let (clock, handle) = manual_handle(10);
        let ev = ManualEventLoop::new(Arc::clone(&clock));
        handle.arm(&ev).unwrap();
        assert!(handle.is_armed());

        assert_eq!(ev.advance(Duration::from_millis(35)), 3);
        assert_eq!(handle.last_touch(), MonotonicTime::from_nanos(30_000_000));
        assert_eq!(ev.pending_timers(), 1);
    }

    #[test]
    fn zero_interval_cannot_be_armed() {
        let (clock, handle) = manual_handle(0);
        let ev = ManualEventLoop::new(clock);
        assert!(matches!(
            handle.arm(&ev),
            Err(ConfigError::InvalidTouchInterval)
        ));
        assert!(!handle.is_armed());
    }

    #[test]
    fn dropping_the_handle_cancels_its_timer() {
        let (clock, handle) = manual_handle(10);
        let ev = ManualEventLoop::new(clock);
        handle.arm(&ev).unwrap();
        assert_eq!(ev.pending_timers(), 1);
        drop(handle);
        assert_eq!(ev.pending_timers(), 0);
        assert_eq!(ev.advance(Duration::from_millis(100)), 0);
    }

    #[test]
    fn disarm_stops_timer_but_touch_still_works() {
        let (clock, handle) = manual_handle(10);
        let ev = ManualEventLoop::new(Arc::clone(&clock));
        handle.arm(&ev).unwrap();
        handle.disarm();
        assert_eq!(ev.advance(Duration::from_millis(50)), 0);
        handle.touch();
        assert_eq!(handle.last_touch(), MonotonicTime::from_nanos(50_000_000));
    }

    #[test]
    fn rearming_replaces_the_previous_timer() {
        let (clock, handle) = manual_handle(10);
        let ev = ManualEventLoop::new(clock);
        handle.arm(&ev).unwrap();
        handle.arm(&ev).unwrap();
        assert_eq!(ev.pending_timers(), 1);
        assert_eq!(ev.advance(Duration::from_millis(20)), 2);
    }

    #[test]
    fn worker_id_display() {
        assert_eq!(WorkerId::new(12).to_string(), "worker-12");
        assert_eq!(WorkerId::from(3).get(), 3);
    }
}
