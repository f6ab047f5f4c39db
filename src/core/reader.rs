//! # Reader loop: one per running process.
//!
//! Drains the merged output channel of a [`ProcessHandle`] into the entity's log
//! ring and subscribers, then cleans up once the process is gone.
//!
//! ## Flow
//! ```text
//! loop: output.recv() ──► LogHub::publish(id, line)
//! EOF ──► handle.wait() ──► lock(id) ──► registry.remove_if(id, instance)
//!                                         ├─ removed → status=stopped, ProcessExited
//!                                         └─ none    → stop() or a newer start owns it
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;

use super::handle::{ExitInfo, ProcessHandle};
use super::registry::{EntityLocks, Registry};
use crate::entity::{EntityId, EntityStatus};
use crate::events::{Bus, Event, EventKind};
use crate::logs::LogLine;
use crate::store::{EntityStore, set_status_logged};
use crate::subscribers::LogHub;

pub(super) struct ReaderLoop {
    pub(super) id: EntityId,
    pub(super) handle: Arc<ProcessHandle>,
    pub(super) output: mpsc::Receiver<LogLine>,
    pub(super) hub: Arc<LogHub>,
    pub(super) registry: Arc<Registry>,
    pub(super) locks: Arc<EntityLocks>,
    pub(super) store: Arc<dyn EntityStore>,
    pub(super) bus: Bus,
}

impl ReaderLoop {
    pub(super) async fn run(mut self) {
        let mut lines: u64 = 0;
        while let Some(line) = self.output.recv().await {
            self.hub.publish(&self.id, line);
            lines += 1;
        }
        tracing::debug!(entity = %self.id, pid = self.handle.pid(), lines, "output closed");

        let exit = self.handle.wait().await;

        let _guard = self.locks.lock(&self.id).await;
        if self
            .registry
            .remove_if(&self.id, self.handle.instance())
            .await
            .is_none()
        {
            return;
        }
        set_status_logged(self.store.as_ref(), &self.id, EntityStatus::Stopped).await;

        tracing::info!(entity = %self.id, pid = self.handle.pid(), exit = %exit.describe(), "process exited");
        self.bus
            .publish(exit_event(&self.id, self.handle.pid(), &exit));
    }
}

/// `ProcessExited` for `id`, carrying the exit code or the signal description.
pub(super) fn exit_event(id: &EntityId, pid: u32, exit: &ExitInfo) -> Event {
    let ev = Event::new(EventKind::ProcessExited)
        .with_entity(id.as_str())
        .with_pid(pid);
    match exit.code {
        Some(code) => ev.with_exit_code(code),
        None => ev.with_reason(exit.describe()),
    }
}
