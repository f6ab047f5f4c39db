//! Runtime core: process supervision.
//!
//! The public entry point is [`Supervisor`]; the rest is exposed for
//! introspection ([`Registry`], [`RunningProcess`]) and for plugging in a
//! different [`Launcher`].
//!
//! Internal modules:
//! - [`handle`]: one spawned process (input pipe, exit watch, kill channel, output pumps);
//! - [`launcher`]: entity → command line ([`JavaLauncher`]);
//! - [`reader`]: per-process loop feeding the log hub and cleaning up on exit;
//! - [`registry`]: running-process table and per-entity lifecycle locks;
//! - [`supervisor`]: start/stop/restart/command orchestration;
//! - [`shutdown`]: OS signal handling.

mod builder;
mod handle;
mod launcher;
mod reader;
mod registry;
mod shutdown;
mod supervisor;

pub use builder::SupervisorBuilder;
pub use handle::{ExitInfo, ProcessHandle};
pub use launcher::{G1_FLAGS, JavaLauncher, LaunchSpec, Launcher};
pub use registry::{Registry, RunningProcess};
pub use supervisor::{StopOutcome, Supervisor};
