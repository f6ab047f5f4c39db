//! Per-entity log storage.
//!
//! - [`LogLine`] one timestamped output line
//! - [`LogRing`] bounded FIFO holding the most recent lines of one entity
//!
//! Rings survive stop/start cycles; only [`Supervisor::forget`](crate::Supervisor::forget)
//! drops them.

mod line;
mod ring;

pub use line::LogLine;
pub use ring::LogRing;
