//! # LogHub: per-entity log store and non-blocking fan-out
//!
//! [`LogHub`] owns one topic per entity: the entity's [`LogRing`] plus the set of
//! currently registered sinks. The reader loop calls [`LogHub::publish`] for every
//! line; observers call [`LogHub::subscribe`] (pull) or [`LogHub::attach`] (push).
//!
//! ## What it guarantees
//! - `publish` never awaits a subscriber: delivery is `try_send` into a bounded queue.
//! - Per-subscriber FIFO (production order).
//! - History capture and registration happen under the same topic lock, so
//!   history + live feed contain every line exactly once.
//! - Panics inside push sinks are caught and the sink detached (isolation).
//!
//! ## What it does **not** guarantee
//! - No ordering across subscribers or across entities.
//! - No retries: a subscriber whose queue is full or closed is unregistered and a
//!   [`EventKind::SubscriberDropped`](crate::EventKind::SubscriberDropped) is published.
//!
//! ## Diagram
//! ```text
//!   reader loop ── publish(id, line)
//!                     │
//!                 [topic lock]── ring.push(line)
//!                     │
//!                     ├──try_send──► [queue S1] ─► Subscription::recv()
//!                     ├──try_send──► [queue S2] ─► worker S2 ─► LogSink::on_line()
//!                     └──try_send──► [queue SN]   (full/closed → removed)
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::entity::EntityId;
use crate::events::{Bus, Event};
use crate::logs::{LogLine, LogRing};

use super::sink::LogSink;
use super::subscription::Subscription;

/// One registered delivery queue.
struct SinkSlot {
    id: u64,
    name: &'static str,
    tx: mpsc::Sender<LogLine>,
}

/// Ring and sinks of one entity; always accessed under its mutex.
pub(super) struct Topic {
    ring: LogRing,
    sinks: Vec<SinkSlot>,
}

impl Topic {
    /// Removes the slot `id`; returns whether it was still registered.
    pub(super) fn remove(&mut self, id: u64) -> bool {
        let before = self.sinks.len();
        self.sinks.retain(|s| s.id != id);
        self.sinks.len() != before
    }
}

pub(super) type SharedTopic = Arc<Mutex<Topic>>;

pub(super) fn lock_topic(topic: &Mutex<Topic>) -> std::sync::MutexGuard<'_, Topic> {
    topic.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-entity log rings with bounded, non-blocking fan-out to subscribers.
pub struct LogHub {
    topics: RwLock<HashMap<EntityId, SharedTopic>>,
    next_sink: AtomicU64,
    log_capacity: usize,
    history_lines: usize,
    queue: usize,
    bus: Bus,
}

impl LogHub {
    /// Creates an empty hub sized by `cfg`, reporting drops on `bus`.
    pub fn new(cfg: &Config, bus: Bus) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            next_sink: AtomicU64::new(1),
            log_capacity: cfg.log_capacity_clamped(),
            history_lines: cfg.history_lines_clamped(),
            queue: cfg.subscriber_queue_clamped(),
            bus,
        }
    }

    fn topic(&self, id: &EntityId) -> SharedTopic {
        if let Some(t) = self
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
        {
            return Arc::clone(t);
        }
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(topics.entry(id.clone()).or_insert_with(|| {
            Arc::new(Mutex::new(Topic {
                ring: LogRing::new(self.log_capacity),
                sinks: Vec::new(),
            }))
        }))
    }

    fn existing(&self, id: &EntityId) -> Option<SharedTopic> {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Appends `line` to the entity's ring and offers it to every registered sink.
    ///
    /// A sink whose queue is full or whose receiver is gone is unregistered.
    pub fn publish(&self, id: &EntityId, line: LogLine) {
        let topic = self.topic(id);
        let mut dropped: Vec<(&'static str, &'static str)> = Vec::new();
        {
            let mut t = lock_topic(&topic);
            t.ring.push(line.clone());
            t.sinks.retain(|slot| match slot.tx.try_send(line.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    dropped.push((slot.name, "full"));
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dropped.push((slot.name, "closed"));
                    false
                }
            });
        }
        for (name, reason) in dropped {
            tracing::debug!(entity = %id, subscriber = name, reason, "subscriber dropped");
            self.bus.publish(Event::subscriber_dropped(id.as_str(), reason));
        }
    }

    /// Registers a pull-style subscriber with the configured history size.
    pub fn subscribe(&self, id: &EntityId) -> Subscription {
        self.subscribe_with_history(id, self.history_lines)
    }

    /// Registers a pull-style subscriber that first receives up to `history` recent lines.
    pub fn subscribe_with_history(&self, id: &EntityId, history: usize) -> Subscription {
        let topic = self.topic(id);
        let (slot_id, lines, rx) = self.register(&topic, "subscription", self.queue, history);
        Subscription::new(id.clone(), slot_id, lines, rx, Arc::downgrade(&topic))
    }

    /// Removes a subscription; calling it again (or dropping it later) is a no-op.
    pub fn unsubscribe(&self, subscription: &mut Subscription) {
        subscription.unsubscribe();
    }

    /// Attaches a push-style sink. History, then live lines, are delivered to
    /// [`LogSink::on_line`] from a dedicated worker.
    ///
    /// The worker ends when the sink fails, panics, overflows, or the entity is forgotten.
    pub fn attach(&self, id: &EntityId, sink: Arc<dyn LogSink>) -> JoinHandle<()> {
        let topic = self.topic(id);
        let cap = sink.queue_capacity().unwrap_or(self.queue).max(1);
        let (slot_id, history, mut rx) = self.register(&topic, sink.name(), cap, self.history_lines);
        let weak = Arc::downgrade(&topic);
        let bus = self.bus.clone();
        let entity = id.clone();

        tokio::spawn(async move {
            for line in &history {
                if !deliver(&*sink, &entity, line, &bus, &weak, slot_id).await {
                    return;
                }
            }
            while let Some(line) = rx.recv().await {
                if !deliver(&*sink, &entity, &line, &bus, &weak, slot_id).await {
                    return;
                }
            }
        })
    }

    fn register(
        &self,
        topic: &Mutex<Topic>,
        name: &'static str,
        capacity: usize,
        history: usize,
    ) -> (u64, Vec<LogLine>, mpsc::Receiver<LogLine>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let slot_id = self.next_sink.fetch_add(1, Ordering::Relaxed);

        let mut t = lock_topic(topic);
        let lines = t.ring.snapshot(history);
        t.sinks.push(SinkSlot { id: slot_id, name, tx });
        (slot_id, lines, rx)
    }

    /// Up to `n` most recent lines of `id`, oldest first.
    pub fn history(&self, id: &EntityId, n: usize) -> Vec<LogLine> {
        self.existing(id)
            .map(|t| lock_topic(&t).ring.snapshot(n))
            .unwrap_or_default()
    }

    /// Number of lines currently held for `id`.
    pub fn len(&self, id: &EntityId) -> usize {
        self.existing(id).map_or(0, |t| lock_topic(&t).ring.len())
    }

    /// Number of sinks currently registered for `id`.
    pub fn subscriber_count(&self, id: &EntityId) -> usize {
        self.existing(id).map_or(0, |t| lock_topic(&t).sinks.len())
    }

    /// Number of entities currently holding a topic.
    pub fn topic_count(&self) -> usize {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drops the ring and every sink of `id`; live subscriptions observe end-of-stream.
    pub fn forget(&self, id: &EntityId) -> bool {
        self.topics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }
}

/// Runs one `on_line` call in isolation; returns `false` when the sink must stop.
async fn deliver(
    sink: &dyn LogSink,
    entity: &EntityId,
    line: &LogLine,
    bus: &Bus,
    topic: &Weak<Mutex<Topic>>,
    slot_id: u64,
) -> bool {
    let outcome = std::panic::AssertUnwindSafe(sink.on_line(entity, line))
        .catch_unwind()
        .await;
    let ev = match outcome {
        Ok(Ok(())) => return true,
        Ok(Err(e)) => {
            tracing::warn!(entity = %entity, sink = sink.name(), error = %e, "sink failed, detaching");
            Event::subscriber_dropped(entity.as_str(), format!("sink_error: {e}"))
        }
        Err(panic) => {
            let info = panic_message(&*panic);
            tracing::error!(entity = %entity, sink = sink.name(), panic = %info, "sink panicked, detaching");
            Event::sink_panicked(entity.as_str(), sink.name(), info)
        }
    };
    if let Some(topic) = topic.upgrade() {
        lock_topic(&topic).remove(slot_id);
    }
    bus.publish(ev);
    false
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc::UnboundedSender;

    use super::*;
    use crate::events::EventKind;
    use crate::subscribers::SinkError;

    fn hub(queue: usize) -> (LogHub, Bus) {
        let bus = Bus::new(64);
        let cfg = Config {
            subscriber_queue: queue,
            history_lines: 100,
            ..Config::default()
        };
        (LogHub::new(&cfg, bus.clone()), bus)
    }

    fn text(line: &LogLine) -> String {
        line.message.to_string()
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_history_then_exactly_new_lines() {
        let (hub, _bus) = hub(64);
        let id = EntityId::from("e1");
        for i in 0..5 {
            hub.publish(&id, LogLine::now(format!("old{i}")));
        }

        let mut sub = hub.subscribe_with_history(&id, 2);
        assert_eq!(
            sub.history().iter().map(text).collect::<Vec<_>>(),
            ["old3", "old4"]
        );

        for i in 0..3 {
            hub.publish(&id, LogLine::now(format!("new{i}")));
        }
        let mut live = Vec::new();
        for _ in 0..3 {
            live.push(text(&sub.recv().await.unwrap()));
        }
        assert_eq!(live, ["new0", "new1", "new2"]);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_full_subscriber_is_dropped_without_blocking() {
        let (hub, bus) = hub(2);
        let mut events = bus.subscribe();
        let id = EntityId::from("e1");

        let mut slow = hub.subscribe(&id);
        for i in 0..10 {
            hub.publish(&id, LogLine::now(i.to_string()));
        }
        assert_eq!(hub.subscriber_count(&id), 0);
        assert_eq!(hub.len(&id), 10);

        // buffered lines drain, then the stream ends
        assert_eq!(text(&slow.recv().await.unwrap()), "0");
        assert_eq!(text(&slow.recv().await.unwrap()), "1");
        assert!(slow.recv().await.is_none());

        let ev = events.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::SubscriberDropped);
        assert_eq!(ev.reason.as_deref(), Some("full"));
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent_and_drop_unregisters() {
        let (hub, _bus) = hub(8);
        let id = EntityId::from("e1");

        let mut a = hub.subscribe(&id);
        let b = hub.subscribe(&id);
        assert_eq!(hub.subscriber_count(&id), 2);

        hub.unsubscribe(&mut a);
        hub.unsubscribe(&mut a);
        assert_eq!(hub.subscriber_count(&id), 1);

        drop(b);
        assert_eq!(hub.subscriber_count(&id), 0);
        drop(a);
    }

    #[tokio::test]
    async fn test_forget_ends_live_streams() {
        let (hub, _bus) = hub(8);
        let id = EntityId::from("e1");
        hub.publish(&id, LogLine::now("x"));
        let mut sub = hub.subscribe(&id);

        assert!(hub.forget(&id));
        assert!(sub.recv().await.is_none());
        assert!(hub.history(&id, 10).is_empty());
        assert!(!hub.forget(&id));
    }

    struct Collect(UnboundedSender<String>);

    #[async_trait]
    impl LogSink for Collect {
        async fn on_line(&self, _entity: &EntityId, line: &LogLine) -> Result<(), SinkError> {
            self.0.send(text(line))?;
            Ok(())
        }
        fn name(&self) -> &'static str {
            "collect"
        }
    }

    struct FailOn(&'static str);

    #[async_trait]
    impl LogSink for FailOn {
        async fn on_line(&self, _entity: &EntityId, line: &LogLine) -> Result<(), SinkError> {
            if &*line.message == self.0 {
                return Err("socket closed".into());
            }
            Ok(())
        }
    }

    struct Panics;

    #[async_trait]
    impl LogSink for Panics {
        async fn on_line(&self, _entity: &EntityId, _line: &LogLine) -> Result<(), SinkError> {
            panic!("boom");
        }
        fn name(&self) -> &'static str {
            "panics"
        }
    }

    #[tokio::test]
    async fn test_attached_sink_gets_history_then_live() {
        let (hub, _bus) = hub(8);
        let id = EntityId::from("e1");
        hub.publish(&id, LogLine::now("h"));

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let worker = hub.attach(&id, Arc::new(Collect(tx)));
        hub.publish(&id, LogLine::now("l"));

        assert_eq!(rx.recv().await.as_deref(), Some("h"));
        assert_eq!(rx.recv().await.as_deref(), Some("l"));

        hub.forget(&id);
        tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_failing_sink_is_detached() {
        let (hub, bus) = hub(8);
        let mut events = bus.subscribe();
        let id = EntityId::from("e1");

        let worker = hub.attach(&id, Arc::new(FailOn("bad")));
        hub.publish(&id, LogLine::now("ok"));
        hub.publish(&id, LogLine::now("bad"));
        worker.await.unwrap();

        assert_eq!(hub.subscriber_count(&id), 0);
        let ev = events.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::SubscriberDropped);
        assert!(ev.reason.as_deref().unwrap().starts_with("sink_error"));
    }

    #[tokio::test]
    async fn test_panicking_sink_is_isolated() {
        let (hub, bus) = hub(8);
        let mut events = bus.subscribe();
        let id = EntityId::from("e1");

        let mut healthy = hub.subscribe(&id);
        let worker = hub.attach(&id, Arc::new(Panics));
        hub.publish(&id, LogLine::now("x"));
        worker.await.unwrap();

        let ev = events.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::SinkPanicked);
        assert!(ev.reason.as_deref().unwrap().contains("boom"));

        hub.publish(&id, LogLine::now("y"));
        assert_eq!(text(&healthy.recv().await.unwrap()), "x");
        assert_eq!(text(&healthy.recv().await.unwrap()), "y");
        assert_eq!(hub.subscriber_count(&id), 1);
    }
}
