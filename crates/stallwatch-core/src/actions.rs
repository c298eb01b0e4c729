//! Pluggable stall responses keyed by escalation kind.
//!
//! Every response runs synchronously on the supervisor thread and must
//! return promptly. A response that fails or panics is logged and counted;
//! it never takes the supervisor down or stops the remaining responses.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::clock::MonotonicTime;
use crate::error::ActionError;
use crate::handle::WorkerId;

/// Kind of escalation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Miss,
    MegaMiss,
    Kill,
    /// Several workers stalled at once.
    Multikill,
}

impl EventKind {
    pub const ALL: [Self; 4] = [Self::Miss, Self::MegaMiss, Self::Kill, Self::Multikill];
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Miss => write!(f, "miss"),
            Self::MegaMiss => write!(f, "mega_miss"),
            Self::Kill => write!(f, "kill"),
            Self::Multikill => write!(f, "multikill"),
        }
    }
}

/// One worker named in an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StalledWorker {
    pub id: WorkerId,
    /// Time since the worker's last touch when the scan observed it.
    pub elapsed: Duration,
}

/// An escalation fired by one supervisor scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StallEvent {
    pub kind: EventKind,
    /// Scan time on the supervisor's clock.
    pub observed_at: MonotonicTime,
    pub workers: Vec<StalledWorker>,
}

impl StallEvent {
    #[must_use]
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.workers.iter().map(|w| w.id).collect()
    }

    #[must_use]
    pub fn max_elapsed(&self) -> Duration {
        self.workers
            .iter()
            .map(|w| w.elapsed)
            .max()
            .unwrap_or_default()
    }
}

/// A response to one kind of stall event.
pub trait StallAction: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    fn on_event(&self, event: &StallEvent) -> Result<(), ActionError>;
}

/// Adapter turning a closure into a [`StallAction`].
pub struct FnAction<F> {
    name: String,
    f: F,
}

/// Build a named action from a closure.
pub fn from_fn<F>(name: impl Into<String>, f: F) -> FnAction<F>
where
    F: Fn(&StallEvent) -> Result<(), ActionError> + Send + Sync,
{
    FnAction {
        name: name.into(),
        f,
    }
}

impl<F> StallAction for FnAction<F>
where
    F: Fn(&StallEvent) -> Result<(), ActionError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_event(&self, event: &StallEvent) -> Result<(), ActionError> {
        (self.f)(event)
    }
}

// =============================================================================
// Default responses
// =============================================================================

/// Logs each event: `Miss` at WARN, everything else at ERROR.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogStall;

impl StallAction for LogStall {
    fn name(&self) -> &str {
        "log"
    }

    fn on_event(&self, event: &StallEvent) -> Result<(), ActionError> {
        for worker in &event.workers {
            let elapsed_ms = worker.elapsed.as_millis() as u64;
            if event.kind == EventKind::Miss {
                warn!(worker = %worker.id, kind = %event.kind, elapsed_ms, "Stallwatch: worker missed its liveness deadline");
            } else {
                error!(worker = %worker.id, kind = %event.kind, elapsed_ms, "Stallwatch: worker stalled");
            }
        }
        Ok(())
    }
}

/// Terminates the process so an external supervisor can restart it.
///
/// Emits an ERROR line with a signature distinguishing a single stuck worker
/// from a systemic stall, plus a JSON diagnostic dump, then aborts.
#[derive(Debug, Clone, Copy)]
pub struct AbortProcess {
    signature: &'static str,
}

impl AbortProcess {
    #[must_use]
    pub const fn kill() -> Self {
        Self {
            signature: "Stallwatch: worker stuck past kill threshold, aborting process",
        }
    }

    #[must_use]
    pub const fn systemic() -> Self {
        Self {
            signature: "Stallwatch: multiple workers stuck simultaneously, aborting process",
        }
    }
}

impl StallAction for AbortProcess {
    fn name(&self) -> &str {
        "abort"
    }

    fn on_event(&self, event: &StallEvent) -> Result<(), ActionError> {
        error!(
            kind = %event.kind,
            workers = ?event.worker_ids(),
            max_elapsed_ms = event.max_elapsed().as_millis() as u64,
            "{}",
            self.signature
        );
        if let Ok(json) = serde_json::to_string_pretty(event) {
            error!(diagnostic = %json, "Stallwatch: diagnostic dump");
        }
        std::process::abort()
    }
}

// =============================================================================
// Dispatch table
// =============================================================================

/// Counts from dispatching one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub succeeded: usize,
    pub failed: usize,
}

/// Responses registered per [`EventKind`], run in registration order.
#[derive(Clone, Default)]
pub struct ActionTable {
    actions: BTreeMap<EventKind, Vec<Arc<dyn StallAction>>>,
}

impl fmt::Debug for ActionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (kind, actions) in &self.actions {
            let names: Vec<&str> = actions.iter().map(|a| a.name()).collect();
            map.entry(kind, &names);
        }
        map.finish()
    }
}

impl ActionTable {
    /// A table with no responses at all.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Log on miss/mega-miss, abort on kill/multikill.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::empty()
            .with(EventKind::Miss, LogStall)
            .with(EventKind::MegaMiss, LogStall)
            .with(EventKind::Kill, LogStall)
            .with(EventKind::Kill, AbortProcess::kill())
            .with(EventKind::Multikill, LogStall)
            .with(EventKind::Multikill, AbortProcess::systemic())
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, kind: EventKind, action: impl StallAction + 'static) -> Self {
        self.register(kind, Arc::new(action));
        self
    }

    /// Append a response for `kind`.
    pub fn register(&mut self, kind: EventKind, action: Arc<dyn StallAction>) {
        self.actions.entry(kind).or_default().push(action);
    }

    /// Replace every response for `kind` with `action`.
    pub fn replace(&mut self, kind: EventKind, action: Arc<dyn StallAction>) {
        self.actions.insert(kind, vec![action]);
    }

    pub fn clear(&mut self, kind: EventKind) {
        self.actions.remove(&kind);
    }

    #[must_use]
    pub fn len(&self, kind: EventKind) -> usize {
        self.actions.get(&kind).map_or(0, Vec::len)
    }

    /// Run every response registered for the event's kind.
    pub fn dispatch(&self, event: &StallEvent) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        let Some(actions) = self.actions.get(&event.kind) else {
            return outcome;
        };

        for action in actions {
            match panic::catch_unwind(AssertUnwindSafe(|| action.on_event(event))) {
                Ok(Ok(())) => outcome.succeeded += 1,
                Ok(Err(err)) => {
                    outcome.failed += 1;
                    warn!(
                        action = action.name(),
                        kind = %event.kind,
                        error = %err,
                        "Stallwatch: stall action failed"
                    );
                }
                Err(payload) => {
                    outcome.failed += 1;
                    error!(
                        action = action.name(),
                        kind = %event.kind,
                        panic = panic_message(payload.as_ref()),
                        "Stallwatch: stall action panicked"
                    );
                }
            }
        }
        outcome
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn event(kind: EventKind) -> StallEvent {
        StallEvent {
            kind,
            observed_at: MonotonicTime::from_nanos(5_000_000_000),
            workers: vec![
                StalledWorker {
                    id: WorkerId::new(1),
                    elapsed: Duration::from_secs(3),
                },
                StalledWorker {
                    id: WorkerId::new(2),
                    elapsed: Duration::from_secs(4),
                },
            ],
        }
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, label: &'static str) -> Arc<dyn StallAction> {
        let log = Arc::clone(log);
        Arc::new(from_fn(label, move |ev: &StallEvent| {
            log.lock().unwrap().push(format!("{label}:{}", ev.kind));
            Ok(())
        }))
    }

    #[test]
    fn dispatch_runs_only_matching_kind_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut table = ActionTable::empty();
        table.register(EventKind::Kill, recorder(&log, "first"));
        table.register(EventKind::Kill, recorder(&log, "second"));
        table.register(EventKind::Miss, recorder(&log, "miss"));

        let outcome = table.dispatch(&event(EventKind::Kill));
        assert_eq!(outcome, DispatchOutcome { succeeded: 2, failed: 0 });
        assert_eq!(*log.lock().unwrap(), vec!["first:kill", "second:kill"]);
    }

    #[test]
    fn failing_and_panicking_actions_are_isolated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut table = ActionTable::empty();
        table.register(
            EventKind::MegaMiss,
            Arc::new(from_fn("err", |_: &StallEvent| Err(ActionError::failed("nope")))),
        );
        table.register(
            EventKind::MegaMiss,
            Arc::new(from_fn("boom", |_: &StallEvent| -> Result<(), ActionError> {
                panic!("response exploded")
            })),
        );
        table.register(EventKind::MegaMiss, recorder(&log, "after"));

        let outcome = table.dispatch(&event(EventKind::MegaMiss));
        assert_eq!(outcome, DispatchOutcome { succeeded: 1, failed: 2 });
        assert_eq!(*log.lock().unwrap(), vec!["after:mega_miss"]);
    }

    #[test]
    fn replace_substitutes_terminating_defaults() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut table = ActionTable::with_defaults();
        assert_eq!(table.len(EventKind::Kill), 2);
        table.replace(EventKind::Kill, recorder(&log, "double"));
        table.replace(EventKind::Multikill, recorder(&log, "double"));
        assert_eq!(table.len(EventKind::Kill), 1);

        table.dispatch(&event(EventKind::Kill));
        table.dispatch(&event(EventKind::Multikill));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["double:kill", "double:multikill"]
        );
    }

    #[test]
    fn empty_kind_dispatches_nothing() {
        let mut table = ActionTable::with_defaults();
        table.clear(EventKind::Miss);
        assert_eq!(table.dispatch(&event(EventKind::Miss)), DispatchOutcome::default());
    }

    #[test]
    fn log_stall_never_fails() {
        assert!(LogStall.on_event(&event(EventKind::Miss)).is_ok());
        assert!(LogStall.on_event(&event(EventKind::Kill)).is_ok());
    }

    #[test]
    fn event_helpers() {
        let ev = event(EventKind::Multikill);
        assert_eq!(ev.worker_ids(), vec![WorkerId::new(1), WorkerId::new(2)]);
        assert_eq!(ev.max_elapsed(), Duration::from_secs(4));
    }

    #[test]
    fn event_serializes_snake_case() {
        let json = serde_json::to_string(&event(EventKind::MegaMiss)).unwrap();
        assert!(json.contains("\"kind\":\"mega_miss\""));
        let back: StallEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event(EventKind::MegaMiss));
    }

    #[test]
    fn debug_lists_action_names() {
        let dbg = format!("{:?}", ActionTable::with_defaults());
        assert!(dbg.contains("abort"));
        assert!(dbg.contains("log"));
    }
}
