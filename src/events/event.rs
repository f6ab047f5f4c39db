//! # Lifecycle events emitted by the supervisor, the log hub and the provisioner.
//!
//! The [`EventKind`] enum classifies event types across three categories:
//! - **Process events**: start, stop requests, escalation steps and exits
//! - **Log distribution events**: subscribers dropped or sinks that panicked
//! - **Provisioning events**: artifact downloads and package installs
//!
//! The [`Event`] struct carries additional metadata such as timestamps, entity id,
//! reasons, pid and exit code.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use servervisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::ProcessExited)
//!     .with_entity("e1")
//!     .with_exit_code(0);
//!
//! assert_eq!(ev.kind, EventKind::ProcessExited);
//! assert_eq!(ev.entity.as_deref(), Some("e1"));
//! assert_eq!(ev.exit_code, Some(0));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Process events ===
    /// A process was spawned and registered.
    ///
    /// Sets:
    /// - `entity`: entity id
    /// - `pid`: OS process id
    ProcessStarted,

    /// Stop was requested and the stop command written (or its write failed).
    ///
    /// Sets:
    /// - `entity`: entity id
    /// - `reason`: write failure, if any
    StopRequested,

    /// A grace period ran out and the supervisor escalated.
    ///
    /// Sets:
    /// - `entity`: entity id
    /// - `reason`: `"terminate"` or `"kill"`
    StopEscalated,

    /// The process is gone and its registry entry removed.
    ///
    /// Sets:
    /// - `entity`: entity id
    /// - `exit_code`: exit code when the process exited normally
    /// - `reason`: terminating signal or wait failure otherwise
    ProcessExited,

    // === Log distribution events ===
    /// A subscriber was removed because its queue was full or it went away.
    ///
    /// Sets:
    /// - `entity`: entity id
    /// - `reason`: `"full"`, `"closed"` or `"sink_error: ..."`
    SubscriberDropped,

    /// A push-style sink panicked and was detached.
    ///
    /// Sets:
    /// - `entity`: entity id
    /// - `reason`: sink name and panic message
    SinkPanicked,

    // === Provisioning events ===
    /// Background provisioning began for a new entity.
    ///
    /// Sets:
    /// - `entity`: entity id
    ProvisionStarted,

    /// Artifact fetched and default files written; entity is now stopped.
    ///
    /// Sets:
    /// - `entity`: entity id
    ProvisionSucceeded,

    /// Provisioning failed; entity is now in error.
    ///
    /// Sets:
    /// - `entity`: entity id
    /// - `reason`: error message
    ProvisionFailed,

    /// A package file was placed in the entity's package directory.
    ///
    /// Sets:
    /// - `entity`: entity id
    /// - `reason`: file name
    PackageInstalled,

    /// A required dependency could not be resolved and was skipped.
    ///
    /// Sets:
    /// - `entity`: entity id
    /// - `reason`: dependency and failure
    DependencySkipped,

    // === Shutdown events ===
    /// Process-wide shutdown requested (OS signal or explicit call).
    ShutdownRequested,
}

/// Lifecycle event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Entity id, if applicable.
    pub entity: Option<Arc<str>>,
    /// Human-readable reason (errors, drop details, etc.).
    pub reason: Option<Arc<str>>,
    /// OS process id.
    pub pid: Option<u32>,
    /// Process exit code.
    pub exit_code: Option<i32>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            entity: None,
            reason: None,
            pid: None,
            exit_code: None,
        }
    }

    /// Attaches an entity id.
    #[inline]
    pub fn with_entity(mut self, entity: impl AsRef<str>) -> Self {
        self.entity = Some(Arc::from(entity.as_ref()));
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches an OS process id.
    #[inline]
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Attaches an exit code.
    #[inline]
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    /// Creates a subscriber-dropped event.
    #[inline]
    pub fn subscriber_dropped(entity: impl AsRef<str>, reason: impl Into<Arc<str>>) -> Self {
        Event::new(EventKind::SubscriberDropped)
            .with_entity(entity)
            .with_reason(reason)
    }

    /// Creates a sink-panicked event.
    #[inline]
    pub fn sink_panicked(entity: impl AsRef<str>, sink: &'static str, info: String) -> Self {
        Event::new(EventKind::SinkPanicked)
            .with_entity(entity)
            .with_reason(format!("sink={sink} panic={info}"))
    }

    /// True for the entity this event refers to.
    #[inline]
    pub fn is_for(&self, entity: &str) -> bool {
        self.entity.as_deref() == Some(entity)
    }
}
