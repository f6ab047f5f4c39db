//! # TracingSink: re-emits process output through `tracing`
//!
//! A minimal sink that forwards every line it receives as an `info` event on the
//! `servervisor::process` target. Useful for headless deployments where process
//! output should end up in the host's log pipeline.
//!
//! ## Example output (with a fmt subscriber)
//! ```text
//! INFO servervisor::process: [Server thread/INFO]: Done (3.2s)! entity="a1b2c3d4"
//! ```

use async_trait::async_trait;

use crate::entity::EntityId;
use crate::logs::LogLine;
use crate::subscribers::{LogSink, SinkError};

/// Sink writing every line as a `tracing` event.
#[derive(Default)]
pub struct TracingSink;

impl TracingSink {
    /// Construct a new [`TracingSink`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LogSink for TracingSink {
    async fn on_line(&self, entity: &EntityId, line: &LogLine) -> Result<(), SinkError> {
        tracing::info!(target: "servervisor::process", entity = %entity, "{}", line.message);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "tracing"
    }
}
