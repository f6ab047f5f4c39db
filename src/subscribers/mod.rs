//! # Live log distribution.
//!
//! This module provides the [`LogHub`] and the two ways of observing a
//! running entity's output through it.
//!
//! ## Architecture
//! ```text
//! Line flow:
//!   reader loop ── publish(id, LogLine) ──► LogHub ──► topic(id): LogRing + sinks
//!                                                          │
//!                                          ┌───────────────┴───────────────┐
//!                                          ▼                               ▼
//!                                   Subscription (pull)            LogSink worker (push)
//!                               history() + recv().await         on_line(&id, &line)
//!                                                                  │
//!                                                        TracingSink, websocket, ...
//! ```
//!
//! ## Subscriber types
//! - **Pull** [`Subscription`]: the transport layer owns the loop; dropping it unregisters.
//! - **Push** [`LogSink`]: the hub owns the loop; failures and panics detach the sink.

mod embedded;
mod hub;
mod sink;
mod subscription;

pub use embedded::TracingSink;
pub use hub::LogHub;
pub use sink::{LogSink, SinkError};
pub use subscription::Subscription;
