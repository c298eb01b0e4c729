//! Minimal timer capability a worker's event loop must provide.
//!
//! A [`LivenessHandle`](crate::handle::LivenessHandle) only needs to create a
//! one-shot timer, re-enable it after each firing, and cancel it on teardown.
//! Two loops ship with the crate:
//!
//! - [`TokioEventLoop`]: timers are tokio tasks on a runtime handle. With a
//!   current-thread runtime, callbacks fire only on the thread driving it.
//! - [`ManualEventLoop`]: virtual-time loop driven by [`ManualEventLoop::advance`],
//!   for tests and hosts that run their own poll loop.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::clock::{Clock, ManualClock, MonotonicTime};
use crate::error::ConfigError;

/// Callback invoked when a timer fires.
pub type TimerCallback = Box<dyn FnMut() + Send + 'static>;

/// One-shot timer owned by whoever created it.
///
/// Dropping the last reference cancels any pending firing.
pub trait Timer: Send + Sync {
    /// Schedule the callback to fire once after `after`, replacing any pending firing.
    fn enable(&self, after: Duration);
    /// Cancel a pending firing. No-op if nothing is pending.
    fn disable(&self);
    fn is_enabled(&self) -> bool;
}

/// An event loop that can host timers.
pub trait EventLoop {
    fn create_timer(&self, callback: TimerCallback) -> Arc<dyn Timer>;
}

// =============================================================================
// Tokio
// =============================================================================

/// Event loop backed by a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioEventLoop {
    runtime: Handle,
}

impl TokioEventLoop {
    #[must_use]
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Bind to the runtime the caller is running on.
    pub fn current() -> Result<Self, ConfigError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| ConfigError::MissingEventLoop)
    }
}

impl EventLoop for TokioEventLoop {
    fn create_timer(&self, callback: TimerCallback) -> Arc<dyn Timer> {
        Arc::new(TokioTimer {
            runtime: self.runtime.clone(),
            callback: Arc::new(Mutex::new(callback)),
            pending: Mutex::new(None),
        })
    }
}

struct TokioTimer {
    runtime: Handle,
    callback: Arc<Mutex<TimerCallback>>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Timer for TokioTimer {
    fn enable(&self, after: Duration) {
        let callback = Arc::clone(&self.callback);
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(after).await;
            let mut callback = callback.lock().unwrap_or_else(PoisonError::into_inner);
            (*callback)();
        });
        let previous = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        // When called from inside the callback, `previous` is the running task;
        // it has no await points left, so aborting it is harmless.
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn disable(&self) {
        if let Some(task) = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }

    fn is_enabled(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for TokioTimer {
    fn drop(&mut self) {
        self.disable();
    }
}

// =============================================================================
// Manual (virtual time)
// =============================================================================

/// Deterministic event loop driven by a [`ManualClock`].
///
/// Timers fire on whichever thread calls [`advance`](Self::advance) or
/// [`run_due`](Self::run_due), in deadline order.
#[derive(Clone)]
pub struct ManualEventLoop {
    clock: Arc<ManualClock>,
    timers: Arc<Mutex<Vec<Weak<ManualTimer>>>>,
}

impl fmt::Debug for ManualEventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualEventLoop")
            .field("now", &self.clock.now())
            .field("pending", &self.pending_timers())
            .finish()
    }
}

impl ManualEventLoop {
    #[must_use]
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            timers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<ManualClock> {
        &self.clock
    }

    /// Move virtual time forward by `delta`, firing every timer that comes due
    /// along the way. Returns the number of callbacks run.
    pub fn advance(&self, delta: Duration) -> usize {
        let target = self.clock.now().saturating_add(delta);
        let mut fired = 0;
        while let Some((timer, deadline)) = self.next_due(target) {
            if deadline > self.clock.now() {
                self.clock.set(deadline);
            }
            fired += timer.fire();
        }
        if target > self.clock.now() {
            self.clock.set(target);
        }
        fired
    }

    /// Fire every timer already due at the clock's current time.
    pub fn run_due(&self) -> usize {
        self.advance(Duration::ZERO)
    }

    /// Number of live timers with a pending firing.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|timer| timer.is_enabled())
            .count()
    }

    fn next_due(&self, limit: MonotonicTime) -> Option<(Arc<ManualTimer>, MonotonicTime)> {
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        timers.retain(|timer| timer.strong_count() > 0);
        timers
            .iter()
            .filter_map(Weak::upgrade)
            .filter_map(|timer| {
                let deadline = timer.deadline()?;
                (deadline <= limit).then_some((timer, deadline))
            })
            .min_by_key(|(_, deadline)| *deadline)
    }
}

impl EventLoop for ManualEventLoop {
    fn create_timer(&self, callback: TimerCallback) -> Arc<dyn Timer> {
        let timer = Arc::new(ManualTimer {
            clock: Arc::clone(&self.clock),
            deadline: Mutex::new(None),
            callback: Mutex::new(callback),
        });
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::downgrade(&timer));
        timer
    }
}

struct ManualTimer {
    clock: Arc<ManualClock>,
    deadline: Mutex<Option<MonotonicTime>>,
    callback: Mutex<TimerCallback>,
}

impl ManualTimer {
    fn deadline(&self) -> Option<MonotonicTime> {
        *self.deadline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fire(&self) -> usize {
        if self
            .deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_none()
        {
            return 0;
        }
        let mut callback = self.callback.lock().unwrap_or_else(PoisonError::into_inner);
        (*callback)();
        1
    }
}

impl Timer for ManualTimer {
    fn enable(&self, after: Duration) {
        let deadline = self.clock.now().saturating_add(after);
        *self.deadline.lock().unwrap_or_else(PoisonError::into_inner) = Some(deadline);
    }

    fn disable(&self) {
        *self.deadline.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn is_enabled(&self) -> bool {
        self.deadline().is_some()
    }
}
