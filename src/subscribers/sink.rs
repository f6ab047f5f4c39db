//! # Push-style log sink trait
//!
//! `LogSink` is the extension point for plugging custom consumers of process
//! output into the [`LogHub`](crate::LogHub). Each attached sink is driven by a
//! dedicated worker loop fed by a bounded queue owned by the hub.
//!
//! ## Contract
//! - Implementations may be slow (I/O, batching) – they do **not** block the
//!   reader loop nor other subscribers, up to their queue bound.
//! - A sink whose queue overflows is **detached**, not awaited.
//! - Returning `Err` from [`LogSink::on_line`] or panicking also detaches the sink.
//!
//! ## Example (skeleton)
//! ```rust
//! use servervisor::{EntityId, LogLine, LogSink, SinkError};
//!
//! struct Forwarder;
//!
//! #[async_trait::async_trait]
//! impl LogSink for Forwarder {
//!     async fn on_line(&self, entity: &EntityId, line: &LogLine) -> Result<(), SinkError> {
//!         let _ = (entity, line); // write to a websocket, a file, ...
//!         Ok(())
//!     }
//!     fn name(&self) -> &'static str { "forwarder" }
//! }
//! ```

use async_trait::async_trait;

use crate::entity::EntityId;
use crate::logs::LogLine;

/// Failure reported by a sink; the sink is detached when it returns one.
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Contract for push-style log consumers.
///
/// Called from a sink-dedicated worker task. Implementations should avoid
/// blocking the async runtime.
#[async_trait]
pub trait LogSink: Send + Sync + 'static {
    /// Handles one line, history first, then live lines in production order.
    async fn on_line(&self, entity: &EntityId, line: &LogLine) -> Result<(), SinkError>;

    /// Human-readable name (for logs/events).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred capacity of this sink's queue; `None` uses
    /// [`Config::subscriber_queue`](crate::Config::subscriber_queue).
    fn queue_capacity(&self) -> Option<usize> {
        None
    }
}
