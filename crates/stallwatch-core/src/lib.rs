//! stallwatch-core: stall and deadlock supervision for event-loop worker threads
//!
//! Worker threads touch a [`LivenessHandle`] on a recurring timer from their
//! own event loop. A [`Supervisor`] thread notices when a worker stops
//! touching and escalates through miss, mega-miss and kill tiers, firing the
//! configured [`StallAction`]s on each transition, plus a multikill event when
//! several workers stall at once.
//!
//! ```ignore
//! use std::time::Duration;
//! use stallwatch_core::{ActionTable, Supervisor, SupervisorConfig, TokioEventLoop, WorkerId};
//!
//! let supervisor = Supervisor::new(SupervisorConfig::default(), ActionTable::with_defaults())?;
//! supervisor.start()?;
//!
//! // On the worker thread, inside its runtime:
//! let event_loop = TokioEventLoop::current()?;
//! let _handle = supervisor.create_handle(
//!     WorkerId::new(1),
//!     Duration::from_millis(50),
//!     Some(&event_loop),
//! )?;
//! ```

#![forbid(unsafe_code)]

pub mod actions;
pub mod clock;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod handle;
pub mod logging;
pub mod registry;
pub mod supervisor;

pub use actions::{
    AbortProcess, ActionTable, DispatchOutcome, EventKind, LogStall, StallAction, StallEvent,
    StalledWorker, from_fn,
};
pub use clock::{Clock, ManualClock, MonotonicTime, SystemClock};
pub use config::{LogFormat, StallwatchConfig, SupervisorSection};
pub use error::{ActionError, ConfigError, Error, RegistrationError, Result};
pub use event_loop::{EventLoop, ManualEventLoop, Timer, TimerCallback, TokioEventLoop};
pub use handle::{LivenessHandle, WorkerId};
pub use logging::{LogConfig, LogError, init_logging};
pub use registry::{Registry, RegistryEntry};
pub use supervisor::{
    ScanReport, StatsSnapshot, Supervisor, SupervisorConfig, SupervisorStats, SupervisorStatus,
    Tier, WorkerStatus,
};
