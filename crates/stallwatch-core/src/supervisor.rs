//! Stall supervisor: scans every registered handle and escalates.
//!
//! Each worker touches its [`LivenessHandle`]; a dedicated monitor thread
//! wakes every `loop_interval`, measures how long each handle has been
//! silent, and escalates through tiers:
//!
//! ```text
//! Live ──miss_after──► Missed ──mega_miss_after──► MegaMissed ──kill_after──► Killed
//! ```
//!
//! An action fires only when a worker moves to a strictly higher tier, so a
//! worker that stays wedged is reported once per tier. A touch newer than the
//! one the previous scan saw resets the worker to `Live` without firing
//! anything; a stall after that is a new episode and escalates from `Miss`.
//! Transitions whose event is not dispatched because the supervisor was
//! stopped are rolled back and fire on a later scan. Independently, when `multikill_count` workers are stale past
//! the systemic threshold at the same time a single `Multikill` event fires
//! for the episode.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::actions::{ActionTable, EventKind, StallEvent, StalledWorker};
use crate::clock::{Clock, MonotonicTime, SystemClock};
use crate::error::{ConfigError, Error, Result};
use crate::event_loop::EventLoop;
use crate::handle::{LivenessHandle, WorkerId};
use crate::registry::{Registry, RegistryEntry};

/// Supervisor thresholds and cadence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Silent this long: `Missed`.
    pub miss_after: Duration,
    /// Silent this long: `MegaMissed`.
    pub mega_miss_after: Duration,
    /// Silent this long: `Killed`.
    pub kill_after: Duration,
    /// Staleness counted toward multikill. `None` uses `mega_miss_after`.
    pub multikill_after: Option<Duration>,
    /// Workers simultaneously past the systemic threshold that trigger multikill.
    pub multikill_count: usize,
    /// How often the monitor thread scans.
    pub loop_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            miss_after: Duration::from_millis(200),
            mega_miss_after: Duration::from_secs(1),
            kill_after: Duration::from_secs(10),
            multikill_after: None,
            multikill_count: 2,
            loop_interval: Duration::from_millis(200),
        }
    }
}

impl SupervisorConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.miss_after.is_zero()
            || self.miss_after >= self.mega_miss_after
            || self.mega_miss_after >= self.kill_after
        {
            return Err(ConfigError::InvalidThresholds {
                miss: self.miss_after,
                mega_miss: self.mega_miss_after,
                kill: self.kill_after,
            });
        }
        if let Some(multikill) = self.multikill_after {
            if multikill < self.miss_after {
                return Err(ConfigError::InvalidMultikillThreshold {
                    multikill,
                    miss: self.miss_after,
                });
            }
        }
        if self.multikill_count == 0 {
            return Err(ConfigError::InvalidMultikillCount);
        }
        if self.loop_interval.is_zero() {
            return Err(ConfigError::InvalidLoopInterval);
        }
        Ok(())
    }

    /// Staleness at which a worker counts toward multikill.
    #[must_use]
    pub fn systemic_threshold(&self) -> Duration {
        self.multikill_after.unwrap_or(self.mega_miss_after)
    }

    /// Highest tier whose threshold `elapsed` has reached.
    #[must_use]
    pub fn tier_for(&self, elapsed: Duration) -> Tier {
        if elapsed >= self.kill_after {
            Tier::Killed
        } else if elapsed >= self.mega_miss_after {
            Tier::MegaMissed
        } else if elapsed >= self.miss_after {
            Tier::Missed
        } else {
            Tier::Live
        }
    }
}

/// Escalation state of one worker, ordered by severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Live,
    Missed,
    MegaMissed,
    Killed,
}

impl Tier {
    /// Event fired on entering this tier.
    #[must_use]
    pub fn event_kind(self) -> Option<EventKind> {
        match self {
            Self::Live => None,
            Self::Missed => Some(EventKind::Miss),
            Self::MegaMissed => Some(EventKind::MegaMiss),
            Self::Killed => Some(EventKind::Kill),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::Missed => write!(f, "missed"),
            Self::MegaMissed => write!(f, "mega_missed"),
            Self::Killed => write!(f, "killed"),
        }
    }
}

// =============================================================================
// Statistics and reports
// =============================================================================

/// Running counters, updated by the scan.
#[derive(Debug, Default)]
pub struct SupervisorStats {
    scans: AtomicU64,
    misses: AtomicU64,
    mega_misses: AtomicU64,
    kills: AtomicU64,
    multikills: AtomicU64,
    action_failures: AtomicU64,
    reclaimed: AtomicU64,
}

impl SupervisorStats {
    fn record_event(&self, kind: EventKind) {
        let counter = match kind {
            EventKind::Miss => &self.misses,
            EventKind::MegaMiss => &self.mega_misses,
            EventKind::Kill => &self.kills,
            EventKind::Multikill => &self.multikills,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            scans: self.scans.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            mega_misses: self.mega_misses.load(Ordering::Relaxed),
            kills: self.kills.load(Ordering::Relaxed),
            multikills: self.multikills.load(Ordering::Relaxed),
            action_failures: self.action_failures.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SupervisorStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub scans: u64,
    pub misses: u64,
    pub mega_misses: u64,
    pub kills: u64,
    pub multikills: u64,
    pub action_failures: u64,
    pub reclaimed: u64,
}

impl StatsSnapshot {
    #[must_use]
    pub fn events(&self, kind: EventKind) -> u64 {
        match kind {
            EventKind::Miss => self.misses,
            EventKind::MegaMiss => self.mega_misses,
            EventKind::Kill => self.kills,
            EventKind::Multikill => self.multikills,
        }
    }
}

/// A worker's state as of the last scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub id: WorkerId,
    pub tier: Tier,
    pub elapsed: Duration,
}

/// Serializable supervisor overview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorStatus {
    pub running: bool,
    /// Registry entries, including dead ones awaiting reclaim.
    pub registered: usize,
    pub stats: StatsSnapshot,
    pub workers: Vec<WorkerStatus>,
}

/// Outcome of one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub observed_at: MonotonicTime,
    /// Live handles examined.
    pub watched: usize,
    /// Events dispatched, in dispatch order.
    pub events: Vec<StallEvent>,
    /// Dead registry entries removed after dispatch.
    pub reclaimed: usize,
}

impl ScanReport {
    #[must_use]
    pub fn event(&self, kind: EventKind) -> Option<&StallEvent> {
        self.events.iter().find(|e| e.kind == kind)
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.iter().map(|e| e.kind).collect()
    }
}

// =============================================================================
// Supervisor
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct TrackedWorker {
    generation: u64,
    tier: Tier,
    elapsed: Duration,
    /// Newest touch any scan has observed.
    last_touch: MonotonicTime,
}

/// A tier change decided by a scan, committed once its event is dispatched.
#[derive(Debug, Clone)]
struct Transition {
    worker: StalledWorker,
    generation: u64,
    previous: Tier,
}

#[derive(Debug, Default)]
struct ScanState {
    workers: HashMap<WorkerId, TrackedWorker>,
    multikill_latched: bool,
}

struct Shared {
    config: SupervisorConfig,
    clock: Arc<dyn Clock>,
    registry: Registry,
    actions: ActionTable,
    /// Serializes scans; held for a whole iteration.
    scan_lock: Mutex<()>,
    /// Tier bookkeeping; never held while actions run.
    state: Mutex<ScanState>,
    stats: SupervisorStats,
    stop_requested: AtomicBool,
}

struct Monitor {
    thread: JoinHandle<()>,
    wake: Sender<()>,
}

/// Watches liveness handles and escalates stalls.
pub struct Supervisor {
    shared: Arc<Shared>,
    monitor: Mutex<Option<Monitor>>,
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("config", &self.shared.config)
            .field("actions", &self.shared.actions)
            .field("registered", &self.shared.registry.len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Supervisor {
    /// Create a supervisor on the system monotonic clock.
    pub fn new(config: SupervisorConfig, actions: ActionTable) -> Result<Self> {
        Self::with_clock(config, actions, Arc::new(SystemClock::new()))
    }

    /// Create a supervisor on an explicit clock. Every handle it creates
    /// shares this clock.
    pub fn with_clock(
        config: SupervisorConfig,
        actions: ActionTable,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                clock,
                registry: Registry::new(),
                actions,
                scan_lock: Mutex::new(()),
                state: Mutex::new(ScanState::default()),
                stats: SupervisorStats::default(),
                stop_requested: AtomicBool::new(false),
            }),
            monitor: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn config(&self) -> &SupervisorConfig {
        &self.shared.config
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.shared.clock
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Register a worker and, when `event_loop` is given, arm its touch timer.
    ///
    /// On failure nothing stays registered.
    pub fn create_handle(
        &self,
        id: WorkerId,
        touch_interval: Duration,
        event_loop: Option<&dyn EventLoop>,
    ) -> Result<Arc<LivenessHandle>> {
        let handle =
            self.shared
                .registry
                .register(id, touch_interval, Arc::clone(&self.shared.clock))?;

        if let Some(event_loop) = event_loop {
            if let Err(err) = handle.arm(event_loop) {
                self.shared.registry.deregister(id);
                return Err(err.into());
            }
        }

        info!(
            worker = %id,
            touch_interval_ms = touch_interval.as_millis() as u64,
            armed = handle.is_armed(),
            "Stallwatch: worker registered"
        );
        Ok(handle)
    }

    /// Stop supervising `id`. Returns whether it was registered.
    pub fn remove_handle(&self, id: WorkerId) -> bool {
        let removed = self.shared.registry.deregister(id);
        if removed {
            info!(worker = %id, "Stallwatch: worker deregistered");
        }
        removed
    }

    /// Run one scan on the calling thread.
    ///
    /// Must not be called from inside a stall action.
    pub fn scan(&self) -> ScanReport {
        self.shared.scan()
    }

    /// Spawn the monitor thread.
    pub fn start(&self) -> Result<()> {
        let mut monitor = self.monitor.lock().unwrap_or_else(PoisonError::into_inner);
        if monitor.is_some() {
            return Err(Error::AlreadyRunning);
        }

        self.shared.stop_requested.store(false, Ordering::SeqCst);
        let (wake, wake_rx) = channel::bounded::<()>(1);
        let shared = Arc::clone(&self.shared);
        let thread = thread::Builder::new()
            .name("stallwatch-supervisor".to_string())
            .spawn(move || shared.run(&wake_rx))
            .map_err(Error::Spawn)?;

        *monitor = Some(Monitor { thread, wake });
        Ok(())
    }

    /// Stop the monitor thread and wait for it to exit.
    ///
    /// No action fires once this has been called; escalations observed by
    /// scans in the meantime are held back and fire after the next
    /// [`start`](Self::start). Idempotent.
    pub fn stop(&self) {
        self.shared.stop_requested.store(true, Ordering::SeqCst);
        let monitor = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(Monitor { thread, wake }) = monitor else {
            return;
        };

        let _ = wake.try_send(());
        drop(wake);
        if thread.thread().id() == thread::current().id() {
            // Called from an action on the monitor thread; it exits on its own.
            return;
        }
        if thread.join().is_err() {
            error!("Stallwatch: supervisor thread panicked");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|m| !m.thread.is_finished())
    }

    /// Current counters plus every worker's tier as of the last scan.
    #[must_use]
    pub fn status(&self) -> SupervisorStatus {
        let mut workers: Vec<WorkerStatus> = {
            let state = self
                .shared
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            state
                .workers
                .iter()
                .map(|(id, tracked)| WorkerStatus {
                    id: *id,
                    tier: tracked.tier,
                    elapsed: tracked.elapsed,
                })
                .collect()
        };
        workers.sort_by_key(|w| w.id);

        SupervisorStatus {
            running: self.is_running(),
            registered: self.shared.registry.len(),
            stats: self.shared.stats.snapshot(),
            workers,
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn stopping(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    fn run(&self, wake: &channel::Receiver<()>) {
        info!(
            loop_interval_ms = self.config.loop_interval.as_millis() as u64,
            miss_ms = self.config.miss_after.as_millis() as u64,
            mega_miss_ms = self.config.mega_miss_after.as_millis() as u64,
            kill_ms = self.config.kill_after.as_millis() as u64,
            multikill_count = self.config.multikill_count,
            "Stallwatch: supervisor started"
        );

        loop {
            match wake.recv_timeout(self.config.loop_interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
            if self.stopping() {
                break;
            }
            self.scan();
        }

        info!("Stallwatch: supervisor stopped");
    }

    fn scan(&self) -> ScanReport {
        let _iteration = self.scan_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let now = self.clock.now();
        let entries = self.registry.snapshot();
        let (pending, watched) = self.escalate(now, &entries);

        let mut events = Vec::with_capacity(pending.len());
        for (kind, transitions) in pending {
            if self.stopping() {
                debug!(kind = %kind, count = transitions.len(), "Stallwatch: stop requested, deferring pending event");
                self.defer(kind, &transitions);
                continue;
            }
            let mut workers: Vec<StalledWorker> =
                transitions.into_iter().map(|t| t.worker).collect();
            workers.sort_by_key(|w| w.id);
            let event = StallEvent {
                kind,
                observed_at: now,
                workers,
            };
            let outcome = self.actions.dispatch(&event);
            self.stats.record_event(kind);
            self.stats
                .action_failures
                .fetch_add(outcome.failed as u64, Ordering::Relaxed);
            events.push(event);
        }

        let reclaimed = self.registry.reclaim();
        if reclaimed > 0 {
            debug!(count = reclaimed, "Stallwatch: reclaimed dead registry entries");
        }
        self.stats.scans.fetch_add(1, Ordering::Relaxed);
        self.stats
            .reclaimed
            .fetch_add(reclaimed as u64, Ordering::Relaxed);

        ScanReport {
            observed_at: now,
            watched,
            events,
            reclaimed,
        }
    }

    /// Update tiers for one scan and collect the transitions to fire, keyed
    /// by kind so they dispatch in severity order.
    fn escalate(
        &self,
        now: MonotonicTime,
        entries: &[RegistryEntry],
    ) -> (BTreeMap<EventKind, Vec<Transition>>, usize) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let systemic_after = self.config.systemic_threshold();
        let mut pending: BTreeMap<EventKind, Vec<Transition>> = BTreeMap::new();
        let mut systemic = Vec::new();
        let mut live = HashSet::with_capacity(entries.len());

        for entry in entries {
            let Some(last_touch) = entry.handle.upgrade().map(|h| h.last_touch()) else {
                continue;
            };
            live.insert((entry.id, entry.generation));

            let elapsed = now.saturating_duration_since(last_touch);
            let implied = self.config.tier_for(elapsed);

            let fresh = TrackedWorker {
                generation: entry.generation,
                tier: Tier::Live,
                elapsed,
                last_touch,
            };
            let tracked = state.workers.entry(entry.id).or_insert(fresh);
            if tracked.generation != entry.generation {
                *tracked = fresh;
            }
            tracked.elapsed = elapsed;

            // A touch newer than the previous scan saw ends the episode.
            if last_touch > tracked.last_touch {
                if tracked.tier != Tier::Live {
                    debug!(
                        worker = %entry.id,
                        from = %tracked.tier,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Stallwatch: worker touched again"
                    );
                }
                tracked.tier = Tier::Live;
                tracked.last_touch = last_touch;
            }

            if implied > tracked.tier {
                let previous = tracked.tier;
                tracked.tier = implied;
                if let Some(kind) = implied.event_kind() {
                    pending.entry(kind).or_default().push(Transition {
                        worker: StalledWorker {
                            id: entry.id,
                            elapsed,
                        },
                        generation: entry.generation,
                        previous,
                    });
                }
            }

            if elapsed >= systemic_after {
                systemic.push(Transition {
                    worker: StalledWorker {
                        id: entry.id,
                        elapsed,
                    },
                    generation: entry.generation,
                    previous: tracked.tier,
                });
            }
        }

        state
            .workers
            .retain(|id, tracked| live.contains(&(*id, tracked.generation)));

        if systemic.len() >= self.config.multikill_count {
            if !state.multikill_latched {
                state.multikill_latched = true;
                pending.insert(EventKind::Multikill, systemic);
            }
        } else {
            state.multikill_latched = false;
        }

        (pending, live.len())
    }

    /// Undo the bookkeeping for transitions that were never dispatched, so a
    /// later scan fires them.
    fn defer(&self, kind: EventKind, transitions: &[Transition]) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if kind == EventKind::Multikill {
            state.multikill_latched = false;
            return;
        }
        for transition in transitions {
            if let Some(tracked) = state.workers.get_mut(&transition.worker.id) {
                if tracked.generation == transition.generation {
                    tracked.tier = transition.previous;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::from_fn;
    use crate::clock::ManualClock;
    use crate::error::{ActionError, RegistrationError};

    fn config() -> SupervisorConfig {
        SupervisorConfig {
            miss_after: Duration::from_secs(1),
            mega_miss_after: Duration::from_secs(3),
            kill_after: Duration::from_secs(5),
            multikill_after: None,
            multikill_count: 3,
            loop_interval: Duration::from_secs(1),
        }
    }

    fn supervisor(actions: ActionTable) -> (Arc<ManualClock>, Supervisor) {
        let clock = Arc::new(ManualClock::new());
        let sup = Supervisor::with_clock(config(), actions, clock.clone()).unwrap();
        (clock, sup)
    }

    #[test]
    fn default_config_is_valid() {
        SupervisorConfig::default().validate().unwrap();
    }

    #[test]
    fn validate_rejects_bad_configs() {
        let equal = SupervisorConfig {
            mega_miss_after: Duration::from_secs(1),
            ..config()
        };
        assert!(matches!(
            equal.validate(),
            Err(ConfigError::InvalidThresholds { .. })
        ));

        let zero_miss = SupervisorConfig {
            miss_after: Duration::ZERO,
            ..config()
        };
        assert!(zero_miss.validate().is_err());

        let no_count = SupervisorConfig {
            multikill_count: 0,
            ..config()
        };
        assert!(matches!(
            no_count.validate(),
            Err(ConfigError::InvalidMultikillCount)
        ));

        let no_interval = SupervisorConfig {
            loop_interval: Duration::ZERO,
            ..config()
        };
        assert!(matches!(
            no_interval.validate(),
            Err(ConfigError::InvalidLoopInterval)
        ));

        let low_systemic = SupervisorConfig {
            multikill_after: Some(Duration::from_millis(10)),
            ..config()
        };
        assert!(matches!(
            low_systemic.validate(),
            Err(ConfigError::InvalidMultikillThreshold { .. })
        ));
    }

    #[test]
    fn tier_thresholds_are_inclusive() {
        let cfg = config();
        assert_eq!(cfg.tier_for(Duration::from_millis(999)), Tier::Live);
        assert_eq!(cfg.tier_for(Duration::from_secs(1)), Tier::Missed);
        assert_eq!(cfg.tier_for(Duration::from_secs(3)), Tier::MegaMissed);
        assert_eq!(cfg.tier_for(Duration::from_secs(5)), Tier::Killed);
        assert_eq!(cfg.tier_for(Duration::from_secs(500)), Tier::Killed);
    }

    #[test]
    fn tier_ordering_and_display() {
        assert!(Tier::Live < Tier::Missed);
        assert!(Tier::Missed < Tier::MegaMissed);
        assert!(Tier::MegaMissed < Tier::Killed);
        assert_eq!(Tier::MegaMissed.to_string(), "mega_missed");
        assert_eq!(Tier::Live.event_kind(), None);
        assert_eq!(Tier::Killed.event_kind(), Some(EventKind::Kill));
    }

    #[test]
    fn duplicate_create_handle_fails_cleanly() {
        let (_clock, sup) = supervisor(ActionTable::empty());
        let _h = sup
            .create_handle(WorkerId::new(1), Duration::from_millis(100), None)
            .unwrap();
        let err = sup
            .create_handle(WorkerId::new(1), Duration::from_millis(100), None)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Registration(RegistrationError::Duplicate { .. })
        ));
        assert_eq!(sup.registry().len(), 1);
    }

    #[test]
    fn failed_arm_leaves_nothing_registered() {
        let (clock, sup) = supervisor(ActionTable::empty());
        let ev = crate::event_loop::ManualEventLoop::new(clock);
        let err = sup
            .create_handle(WorkerId::new(1), Duration::ZERO, Some(&ev))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::InvalidTouchInterval)
        ));
        assert!(sup.registry().is_empty());
    }

    #[test]
    fn jump_straight_to_kill_fires_only_kill() {
        let (clock, sup) = supervisor(ActionTable::empty());
        let _h = sup
            .create_handle(WorkerId::new(1), Duration::from_millis(100), None)
            .unwrap();
        clock.advance(Duration::from_secs(7));
        let report = sup.scan();
        assert_eq!(report.kinds(), vec![EventKind::Kill]);
        assert_eq!(sup.stats().kills, 1);
        assert_eq!(sup.stats().misses, 0);
    }

    #[test]
    fn failing_actions_are_counted_and_scan_continues() {
        let actions = ActionTable::empty().with(
            EventKind::Miss,
            from_fn("fails", |_: &StallEvent| Err(ActionError::failed("nope"))),
        );
        let (clock, sup) = supervisor(actions);
        let _h = sup
            .create_handle(WorkerId::new(1), Duration::from_millis(100), None)
            .unwrap();
        clock.advance(Duration::from_secs(1));
        let report = sup.scan();
        assert_eq!(report.kinds(), vec![EventKind::Miss]);
        assert_eq!(sup.stats().action_failures, 1);
        assert_eq!(sup.stats().scans, 1);
    }

    #[test]
    fn status_reports_tiers_sorted_by_worker() {
        let (clock, sup) = supervisor(ActionTable::empty());
        let h2 = sup
            .create_handle(WorkerId::new(2), Duration::from_millis(100), None)
            .unwrap();
        let _h1 = sup
            .create_handle(WorkerId::new(1), Duration::from_millis(100), None)
            .unwrap();
        clock.advance(Duration::from_secs(3));
        h2.touch();
        sup.scan();

        let status = sup.status();
        assert!(!status.running);
        assert_eq!(status.registered, 2);
        assert_eq!(status.workers.len(), 2);
        assert_eq!(status.workers[0].id, WorkerId::new(1));
        assert_eq!(status.workers[0].tier, Tier::MegaMissed);
        assert_eq!(status.workers[1].tier, Tier::Live);

        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"mega_missed\""));
    }

    #[test]
    fn start_twice_is_an_error_and_stop_is_idempotent() {
        let sup = Supervisor::new(
            SupervisorConfig {
                loop_interval: Duration::from_millis(5),
                ..SupervisorConfig::default()
            },
            ActionTable::empty(),
        )
        .unwrap();
        sup.start().unwrap();
        assert!(sup.is_running());
        assert!(matches!(sup.start(), Err(Error::AlreadyRunning)));
        sup.stop();
        assert!(!sup.is_running());
        sup.stop();
        sup.start().unwrap();
        assert!(sup.is_running());
    }

    #[test]
    fn monitor_thread_scans_on_its_cadence() {
        let sup = Supervisor::new(
            SupervisorConfig {
                loop_interval: Duration::from_millis(5),
                ..SupervisorConfig::default()
            },
            ActionTable::empty(),
        )
        .unwrap();
        sup.start().unwrap();
        std::thread::sleep(Duration::from_millis(100));
        sup.stop();
        let scans = sup.stats().scans;
        assert!(scans >= 2, "expected several scans, got {scans}");
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(sup.stats().scans, scans, "no scans after stop");
    }
}
