use std::sync::{Mutex, Weak};

use tokio::sync::mpsc;

use crate::entity::EntityId;
use crate::logs::LogLine;

use super::hub::{Topic, lock_topic};

/// Pull-style registration on a [`LogHub`](crate::LogHub) topic.
///
/// Holds the history captured at registration and the bounded live feed that
/// continues exactly where the history ends. `recv` returning `None` means the
/// subscription was dropped by the hub (queue overflow), unsubscribed, or its
/// entity forgotten.
///
/// Dropping the subscription unregisters it.
pub struct Subscription {
    entity: EntityId,
    slot_id: u64,
    history: Vec<LogLine>,
    rx: mpsc::Receiver<LogLine>,
    topic: Option<Weak<Mutex<Topic>>>,
}

impl Subscription {
    pub(super) fn new(
        entity: EntityId,
        slot_id: u64,
        history: Vec<LogLine>,
        rx: mpsc::Receiver<LogLine>,
        topic: Weak<Mutex<Topic>>,
    ) -> Self {
        Self {
            entity,
            slot_id,
            history,
            rx,
            topic: Some(topic),
        }
    }

    /// Entity this subscription follows.
    pub fn entity(&self) -> &EntityId {
        &self.entity
    }

    /// Lines captured at registration, oldest first.
    pub fn history(&self) -> &[LogLine] {
        &self.history
    }

    /// Moves the captured history out, leaving it empty.
    pub fn take_history(&mut self) -> Vec<LogLine> {
        std::mem::take(&mut self.history)
    }

    /// Next live line, in production order.
    pub async fn recv(&mut self) -> Option<LogLine> {
        self.rx.recv().await
    }

    /// Next live line if one is already queued.
    pub fn try_recv(&mut self) -> Option<LogLine> {
        self.rx.try_recv().ok()
    }

    /// True while the hub still delivers to this subscription.
    pub fn is_registered(&self) -> bool {
        !self.rx.is_closed()
    }

    /// Unregisters from the hub. Idempotent; queued lines stay readable.
    pub fn unsubscribe(&mut self) {
        if let Some(topic) = self.topic.take().and_then(|w| w.upgrade()) {
            lock_topic(&topic).remove(self.slot_id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("entity", &self.entity)
            .field("history", &self.history.len())
            .finish_non_exhaustive()
    }
}
