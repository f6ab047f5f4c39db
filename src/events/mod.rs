//! Lifecycle events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Supervisor` (start/stop/escalation), reader loops (exit),
//!   `LogHub` (dropped subscribers, panicked sinks), `Provisioner`.
//! - **Consumers**: anything holding a receiver from [`Bus::subscribe`];
//!   the crate itself never depends on delivery.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
