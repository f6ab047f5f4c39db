//! # Supervisor: owns running processes, drives their lifecycle, wires their output.
//!
//! The [`Supervisor`] owns the [`Registry`] of running processes, the [`LogHub`]
//! holding every entity's log ring and subscribers, and the lifecycle [`Bus`].
//! Entity records are read and patched through the [`EntityStore`] collaborator.
//!
//! ## Key responsibilities
//! - check start preconditions (entity exists, not running, accepted, artifact present)
//! - spawn processes built by the configured [`Launcher`] and register their handles
//! - run one reader loop per process that feeds the [`LogHub`]
//! - stop processes with the graceful → terminate → kill escalation
//! - stop everything on shutdown
//!
//! ## High-level architecture
//! ```text
//! start(id):
//!   lock(id) ─► store.get ─► checks ─► Launcher::launch_spec ─► ProcessHandle::spawn
//!            └► registry.insert ─► spawn ReaderLoop ─► status=running ─► ProcessStarted
//!
//! stop(id):
//!   lock(id) ─► write "stop\n" ──wait stop_grace──► exited?  → Graceful
//!                    │ (write failed)                  │ no
//!                    └──────────────► SIGTERM ──wait terminate_grace──► exited? → Terminated
//!                                                                       │ no
//!                                                          kill ──wait kill_grace──► Killed
//!            └► registry.remove_if ─► status=stopped ─► ProcessExited
//!
//! Shutdown path:
//!   shutdown::wait_for_shutdown_signal()
//!             └─► Bus.publish(ShutdownRequested)
//!             └─► stop(id) for every running id, concurrently
//! ```
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use servervisor::{Config, EntityId, MemoryStore, Supervisor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     let sup = Supervisor::builder(Config::default(), store).build();
//!
//!     let id = EntityId::from("a1b2c3d4");
//!     let mut logs = sup.subscribe(&id);
//!     sup.start(&id).await?;
//!     while let Some(line) = logs.recv().await {
//!         println!("{}", line.message);
//!     }
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio::task::JoinHandle;

use super::builder::SupervisorBuilder;
use super::handle::{ExitInfo, ProcessHandle};
use super::launcher::Launcher;
use super::reader::{ReaderLoop, exit_event};
use super::registry::{EntityLocks, Registry, RunningProcess};
use super::shutdown;
use crate::config::Config;
use crate::entity::{Entity, EntityId, EntityStatus};
use crate::error::{StoreError, SupervisorError};
use crate::events::{Bus, Event, EventKind};
use crate::logs::LogLine;
use crate::provision::layout;
use crate::store::{EntityStore, patch_entity, set_status_logged};
use crate::subscribers::{LogHub, LogSink, Subscription};

/// Which escalation step ended the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Exited after the stop command.
    Graceful,
    /// Exited after the termination signal.
    Terminated,
    /// Killed unconditionally.
    Killed,
}

impl StopOutcome {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            StopOutcome::Graceful => "graceful",
            StopOutcome::Terminated => "terminated",
            StopOutcome::Killed => "killed",
        }
    }
}

impl fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Background tasks running on behalf of one entity.
///
/// Reader loops of earlier instances may still be draining after a restart,
/// so every unfinished one is kept. Sink workers live until `forget`.
#[derive(Default)]
struct EntityTasks {
    readers: Vec<JoinHandle<()>>,
    sinks: Option<Vec<JoinHandle<()>>>,
}

impl EntityTasks {
    /// Cancels every task and waits until none of them can run again.
    async fn cancel(self) {
        let handles: Vec<_> = self
            .readers
            .into_iter()
            .chain(self.sinks.into_iter().flatten())
            .collect();
        for handle in &handles {
            handle.abort();
        }
        futures::future::join_all(handles).await;
    }
}

/// Coordinates running processes, their log distribution and their shutdown.
pub struct Supervisor {
    cfg: Config,
    bus: Bus,
    hub: Arc<LogHub>,
    registry: Arc<Registry>,
    locks: Arc<EntityLocks>,
    store: Arc<dyn EntityStore>,
    launcher: Arc<dyn Launcher>,
    sinks: Vec<Arc<dyn LogSink>>,
    tasks: Mutex<HashMap<EntityId, EntityTasks>>,
    instances: AtomicU64,
}

impl Supervisor {
    /// Starts building a supervisor over `store`.
    pub fn builder(cfg: Config, store: Arc<dyn EntityStore>) -> SupervisorBuilder {
        SupervisorBuilder::new(cfg, store)
    }

    pub(super) fn new_internal(
        cfg: Config,
        bus: Bus,
        store: Arc<dyn EntityStore>,
        launcher: Arc<dyn Launcher>,
        sinks: Vec<Arc<dyn LogSink>>,
    ) -> Self {
        let hub = Arc::new(LogHub::new(&cfg, bus.clone()));
        Self {
            cfg,
            bus,
            hub,
            registry: Registry::new(),
            locks: Arc::new(EntityLocks::default()),
            store,
            launcher,
            sinks,
            tasks: Mutex::new(HashMap::new()),
            instances: AtomicU64::new(1),
        }
    }

    /// Spawns the process of `id` and returns its PID.
    ///
    /// Fails with `NotFound`, `AlreadyRunning`, `PreconditionUnmet`,
    /// `ArtifactMissing` or `Spawn`; nothing is registered on failure.
    pub async fn start(&self, id: &EntityId) -> Result<u32, SupervisorError> {
        let _guard = self.locks.lock(id).await;
        self.start_locked(id).await
    }

    /// Stops the process of `id`, escalating as grace periods run out.
    ///
    /// Fails with `NotRunning` if nothing is registered. The entry is removed and
    /// the status set to `stopped` whichever step ended the process.
    pub async fn stop(&self, id: &EntityId) -> Result<StopOutcome, SupervisorError> {
        let _guard = self.locks.lock(id).await;
        self.stop_locked(id).await
    }

    /// Stops `id` if it is running, waits the settle delay, then starts it.
    pub async fn restart(&self, id: &EntityId) -> Result<u32, SupervisorError> {
        let _guard = self.locks.lock(id).await;
        if self.registry.contains(id).await {
            let outcome = self.stop_locked(id).await?;
            tracing::debug!(entity = %id, outcome = %outcome, "restart: stopped");
            tokio::time::sleep(self.cfg.restart_settle).await;
        }
        self.start_locked(id).await
    }

    /// Writes `text` plus a newline to the process input of `id`.
    pub async fn send_command(&self, id: &EntityId, text: &str) -> Result<(), SupervisorError> {
        let handle = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| SupervisorError::NotRunning { id: id.clone() })?;
        handle
            .write_line(text)
            .await
            .map_err(|source| SupervisorError::WriteFailed {
                id: id.clone(),
                source,
            })?;
        tracing::debug!(entity = %id, command = text, "command sent");
        Ok(())
    }

    /// Records the acceptance flag of `id` and writes `eula.txt` accordingly.
    ///
    /// Holds the lifecycle lock, so a concurrent start cannot have its
    /// `running` status overwritten by this read-modify-write.
    pub async fn set_precondition(&self, id: &EntityId, accepted: bool) -> Result<Entity, SupervisorError> {
        let dir = self.entity_dir(id)?;
        let _guard = self.locks.lock(id).await;
        self.load(id).await?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| SupervisorError::Io {
                id: id.clone(),
                path: dir.clone(),
                source,
            })?;
        layout::write_eula(&dir, accepted)
            .await
            .map_err(|source| SupervisorError::Io {
                id: id.clone(),
                path: dir.join(layout::EULA),
                source,
            })?;
        let entity = patch_entity(self.store.as_ref(), id, |e| e.eula_accepted = accepted)
            .await
            .map_err(|e| not_found_or(id, e))?;
        tracing::info!(entity = %id, accepted, "precondition updated");
        Ok(entity)
    }

    /// Registers a pull-style log subscriber (history, then live lines).
    pub fn subscribe(&self, id: &EntityId) -> Subscription {
        self.hub.subscribe(id)
    }

    /// Attaches a push-style log sink to `id`.
    pub fn attach(&self, id: &EntityId, sink: Arc<dyn LogSink>) -> JoinHandle<()> {
        self.hub.attach(id, sink)
    }

    /// Up to `n` most recent log lines of `id`.
    pub fn history(&self, id: &EntityId, n: usize) -> Vec<LogLine> {
        self.hub.history(id, n)
    }

    /// Stops `id` if running, then drops its log ring and subscribers.
    ///
    /// Reader loops still draining output and the default sink workers of `id`
    /// are cancelled before the ring is dropped, so nothing recreates it.
    pub async fn forget(&self, id: &EntityId) -> Result<(), SupervisorError> {
        let _guard = self.locks.lock(id).await;
        if self.registry.contains(id).await {
            self.stop_locked(id).await?;
        }
        let tasks = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        if let Some(tasks) = tasks {
            tasks.cancel().await;
        }
        self.hub.forget(id);
        self.locks.forget(id);
        tracing::debug!(entity = %id, "forgotten");
        Ok(())
    }

    /// Stops every running process concurrently.
    ///
    /// Returns the outcome per entity; failures are also logged.
    pub async fn shutdown(&self) -> Vec<(EntityId, Result<StopOutcome, SupervisorError>)> {
        self.bus.publish(Event::new(EventKind::ShutdownRequested));
        let ids = self.registry.ids().await;
        tracing::info!(running = ids.len(), "shutting down");

        let results = futures::future::join_all(ids.iter().map(|id| self.stop(id))).await;
        ids.into_iter()
            .zip(results)
            .inspect(|(id, res)| match res {
                Ok(outcome) => tracing::info!(entity = %id, outcome = %outcome, "stopped on shutdown"),
                Err(SupervisorError::NotRunning { .. }) => {}
                Err(e) => tracing::error!(entity = %id, error = %e, "stop on shutdown failed"),
            })
            .collect()
    }

    /// Waits for SIGINT/SIGTERM/SIGQUIT (Ctrl-C elsewhere), then stops everything.
    pub async fn run_until_signal(&self) -> std::io::Result<()> {
        shutdown::wait_for_shutdown_signal().await?;
        self.shutdown().await;
        Ok(())
    }

    /// Number of running processes.
    pub async fn running_count(&self) -> usize {
        self.registry.len().await
    }

    /// Sorted ids of running entities.
    pub async fn running_ids(&self) -> Vec<EntityId> {
        self.registry.ids().await
    }

    /// True if `id` has a registered process.
    pub async fn is_running(&self, id: &EntityId) -> bool {
        self.registry.contains(id).await
    }

    /// View of every running process.
    pub async fn running(&self) -> Vec<RunningProcess> {
        self.registry.snapshot().await
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn hub(&self) -> &Arc<LogHub> {
        &self.hub
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    fn entity_dir(&self, id: &EntityId) -> Result<PathBuf, SupervisorError> {
        self.cfg
            .entity_dir(id)
            .ok_or_else(|| SupervisorError::InvalidId { id: id.clone() })
    }

    async fn load(&self, id: &EntityId) -> Result<Entity, SupervisorError> {
        self.store.get(id).await.map_err(|e| not_found_or(id, e))
    }

    async fn start_locked(&self, id: &EntityId) -> Result<u32, SupervisorError> {
        let dir = self.entity_dir(id)?;
        let entity = self.load(id).await?;
        if self.registry.contains(id).await {
            return Err(SupervisorError::AlreadyRunning { id: id.clone() });
        }
        if !entity.eula_accepted {
            return Err(SupervisorError::PreconditionUnmet { id: id.clone() });
        }
        let artifact = layout::artifact_path(&dir);
        if !tokio::fs::try_exists(&artifact).await.unwrap_or(false) {
            return Err(SupervisorError::ArtifactMissing {
                id: id.clone(),
                path: artifact,
            });
        }

        let spec = self.launcher.launch_spec(&entity, &dir);
        let instance = self.instances.fetch_add(1, Ordering::Relaxed);
        let (handle, output) = ProcessHandle::spawn(&spec, instance).map_err(|source| {
            tracing::error!(entity = %id, program = %spec.program.display(), error = %source, "spawn failed");
            SupervisorError::Spawn {
                id: id.clone(),
                source,
            }
        })?;
        let handle = Arc::new(handle);
        let pid = handle.pid();

        if let Err(existing) = self.registry.insert(id.clone(), Arc::clone(&handle)).await {
            // unreachable while the lifecycle lock is held; never leak the new process
            tracing::error!(entity = %id, pid = existing.pid(), "registry already held a process");
            handle.kill();
            return Err(SupervisorError::AlreadyRunning { id: id.clone() });
        }

        self.attach_default_sinks(id);
        let reader = tokio::spawn(
            ReaderLoop {
                id: id.clone(),
                handle,
                output,
                hub: Arc::clone(&self.hub),
                registry: Arc::clone(&self.registry),
                locks: Arc::clone(&self.locks),
                store: Arc::clone(&self.store),
                bus: self.bus.clone(),
            }
            .run(),
        );
        {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            let readers = &mut tasks.entry(id.clone()).or_default().readers;
            readers.retain(|r| !r.is_finished());
            readers.push(reader);
        }

        if let Err(e) = patch_entity(self.store.as_ref(), id, |e| {
            e.status = EntityStatus::Running;
            e.last_started = Some(Utc::now());
        })
        .await
        {
            tracing::warn!(entity = %id, error = %e, "status update after start failed");
        }

        tracing::info!(entity = %id, pid, launcher = self.launcher.name(), "process started");
        self.bus.publish(
            Event::new(EventKind::ProcessStarted)
                .with_entity(id.as_str())
                .with_pid(pid),
        );
        Ok(pid)
    }

    async fn stop_locked(&self, id: &EntityId) -> Result<StopOutcome, SupervisorError> {
        let handle = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| SupervisorError::NotRunning { id: id.clone() })?;
        let pid = handle.pid();

        let written = handle.write_line(&self.cfg.stop_command).await;
        let mut requested = Event::new(EventKind::StopRequested).with_entity(id.as_str());
        if let Err(e) = &written {
            tracing::warn!(entity = %id, pid, error = %e, "stop command write failed, terminating");
            requested = requested.with_reason(e.to_string());
        }
        self.bus.publish(requested);

        let graceful = match written {
            Ok(()) => handle.wait_exit(self.cfg.stop_grace).await,
            Err(_) => None,
        };
        if let Some(exit) = graceful {
            self.release(id, &handle, exit).await;
            return Ok(StopOutcome::Graceful);
        }

        self.escalated(id, "terminate");
        if let Err(e) = handle.terminate() {
            tracing::warn!(entity = %id, pid, error = %e, "termination signal failed");
        }
        if let Some(exit) = handle.wait_exit(self.cfg.terminate_grace).await {
            self.release(id, &handle, exit).await;
            return Ok(StopOutcome::Terminated);
        }

        self.escalated(id, "kill");
        handle.kill();
        let exit = match self.cfg.kill_wait() {
            None => handle.exited().unwrap_or_default(),
            Some(limit) => match handle.wait_exit(limit).await {
                Some(exit) => exit,
                None => {
                    tracing::error!(entity = %id, pid, waited = ?limit, "process not reaped after kill");
                    self.release(id, &handle, ExitInfo::default()).await;
                    return Err(SupervisorError::ShutdownTimeout {
                        id: id.clone(),
                        waited: limit,
                    });
                }
            },
        };
        self.release(id, &handle, exit).await;
        Ok(StopOutcome::Killed)
    }

    fn escalated(&self, id: &EntityId, step: &'static str) {
        tracing::warn!(entity = %id, step, "grace period exceeded, escalating");
        self.bus.publish(
            Event::new(EventKind::StopEscalated)
                .with_entity(id.as_str())
                .with_reason(step),
        );
    }

    /// Removes this instance's registry entry and marks the entity stopped.
    async fn release(&self, id: &EntityId, handle: &ProcessHandle, exit: ExitInfo) {
        if self.registry.remove_if(id, handle.instance()).await.is_none() {
            return;
        }
        set_status_logged(self.store.as_ref(), id, EntityStatus::Stopped).await;
        tracing::info!(entity = %id, pid = handle.pid(), exit = %exit.describe(), "process stopped");
        self.bus.publish(exit_event(id, handle.pid(), &exit));
    }

    /// Attaches the builder's sinks on the first start of `id` and keeps
    /// their workers so `forget` can cancel them.
    fn attach_default_sinks(&self, id: &EntityId) {
        if self.sinks.is_empty() {
            return;
        }
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = tasks.entry(id.clone()).or_default();
        if entry.sinks.is_none() {
            entry.sinks = Some(
                self.sinks
                    .iter()
                    .map(|sink| self.hub.attach(id, Arc::clone(sink)))
                    .collect(),
            );
        }
    }

    #[cfg(test)]
    fn sink_workers(&self, id: &EntityId) -> Option<usize> {
        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.get(id).and_then(|t| t.sinks.as_ref()).map(Vec::len)
    }
}

fn not_found_or(id: &EntityId, e: StoreError) -> SupervisorError {
    match e {
        StoreError::NotFound { .. } => SupervisorError::NotFound { id: id.clone() },
        other => SupervisorError::Store(other),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use std::sync::atomic::AtomicUsize;

    use tokio::sync::broadcast;

    use super::*;
    use crate::core::LaunchSpec;
    use crate::entity::{NewEntity, ProcessKind};
    use crate::events::Event;
    use crate::store::MemoryStore;
    use crate::subscribers::TracingSink;

    /// Runs a shell script in the entity directory instead of a JVM.
    struct ShellLauncher(&'static str);

    impl Launcher for ShellLauncher {
        fn launch_spec(&self, _entity: &Entity, dir: &Path) -> LaunchSpec {
            LaunchSpec::new("sh", dir).args(["-c", self.0])
        }
    }

    const OBEYS_STOP: &str = r#"echo ready; while read l; do echo "got $l"; [ "$l" = stop ] && exit 0; done"#;
    const IGNORES_STOP: &str = "echo ready; while true; do sleep 0.05; done";
    const IGNORES_TERM: &str = "trap '' TERM; echo ready; while true; do sleep 0.05; done";
    const FLOODS_ON_STOP: &str = r#"echo ready; while read l; do if [ "$l" = stop ]; then i=0; while [ $i -lt 3000 ]; do echo "line $i"; i=$((i+1)); done; exit 0; fi; done"#;

    /// Reads like [`MemoryStore`] but stalls after the read of one chosen `get` call.
    struct SlowReadStore {
        inner: Arc<MemoryStore>,
        calls: AtomicUsize,
        slow_call: usize,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl EntityStore for SlowReadStore {
        async fn get(&self, id: &EntityId) -> Result<Entity, StoreError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let entity = self.inner.get(id).await;
            if call == self.slow_call {
                tokio::time::sleep(self.delay).await;
            }
            entity
        }

        async fn save(&self, entity: Entity) -> Result<(), StoreError> {
            self.inner.save(entity).await
        }

        async fn delete(&self, id: &EntityId) -> Result<bool, StoreError> {
            self.inner.delete(id).await
        }

        async fn list(&self) -> Result<Vec<Entity>, StoreError> {
            self.inner.list().await
        }
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        sup: Arc<Supervisor>,
        store: Arc<MemoryStore>,
        events: broadcast::Receiver<Event>,
        id: EntityId,
    }

    fn config(data_dir: &Path) -> Config {
        Config {
            data_dir: data_dir.to_path_buf(),
            stop_grace: Duration::from_millis(300),
            terminate_grace: Duration::from_millis(300),
            kill_grace: Duration::from_secs(5),
            restart_settle: Duration::from_millis(10),
            ..Config::default()
        }
    }

    async fn fixture_with(script: &'static str, accepted: bool, artifact: bool) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let id = EntityId::from("e1");
        let mut entity = Entity::from_request(
            id.clone(),
            NewEntity::new("test", ProcessKind::Vanilla, "1.20.1"),
        );
        entity.status = EntityStatus::Stopped;
        entity.eula_accepted = accepted;

        let dir = tmp.path().join(id.as_str());
        std::fs::create_dir_all(&dir).unwrap();
        if artifact {
            std::fs::write(dir.join(layout::ARTIFACT), b"").unwrap();
        }

        let store = Arc::new(MemoryStore::with_entities([entity]));
        let sup = Supervisor::builder(config(tmp.path()), store.clone())
            .with_launcher(Arc::new(ShellLauncher(script)))
            .build();
        let events = sup.bus().subscribe();
        Fixture {
            _tmp: tmp,
            sup,
            store,
            events,
            id,
        }
    }

    async fn fixture(script: &'static str) -> Fixture {
        fixture_with(script, true, true).await
    }

    async fn next_line(sub: &mut Subscription) -> String {
        tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .expect("line in time")
            .expect("stream open")
            .message
            .to_string()
    }

    async fn wait_event(rx: &mut broadcast::Receiver<Event>, kind: EventKind) -> Event {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let ev = rx.recv().await.unwrap();
                if ev.kind == kind {
                    return ev;
                }
            }
        })
        .await
        .expect("event in time")
    }

    async fn status(f: &Fixture) -> EntityStatus {
        f.store.get(&f.id).await.unwrap().status
    }

    #[tokio::test]
    async fn test_start_requires_precondition() {
        let f = fixture_with(OBEYS_STOP, false, true).await;
        let err = f.sup.start(&f.id).await.unwrap_err();
        assert!(matches!(err, SupervisorError::PreconditionUnmet { .. }));
        assert_eq!(f.sup.running_count().await, 0);
        assert_eq!(status(&f).await, EntityStatus::Stopped);
    }

    #[tokio::test]
    async fn test_start_requires_artifact_and_entity() {
        let f = fixture_with(OBEYS_STOP, true, false).await;
        let err = f.sup.start(&f.id).await.unwrap_err();
        assert!(matches!(err, SupervisorError::ArtifactMissing { .. }));

        let err = f.sup.start(&EntityId::from("ghost")).await.unwrap_err();
        assert!(matches!(err, SupervisorError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_spawn_failure_registers_nothing() {
        struct Missing;
        impl Launcher for Missing {
            fn launch_spec(&self, _entity: &Entity, dir: &Path) -> LaunchSpec {
                LaunchSpec::new("/nonexistent/servervisor-java", dir)
            }
        }
        let f = fixture(OBEYS_STOP).await;
        let sup = Supervisor::builder(config(f._tmp.path()), f.store.clone())
            .with_launcher(Arc::new(Missing))
            .build();
        let err = sup.start(&f.id).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Spawn { .. }));
        assert!(!sup.is_running(&f.id).await);
    }

    #[tokio::test]
    async fn test_graceful_stop_with_logs_and_commands() {
        let mut f = fixture(OBEYS_STOP).await;
        let mut sub = f.sup.subscribe(&f.id);

        let pid = f.sup.start(&f.id).await.unwrap();
        assert!(pid > 0);
        assert_eq!(status(&f).await, EntityStatus::Running);
        assert!(f.store.get(&f.id).await.unwrap().last_started.is_some());
        assert_eq!(f.sup.running_ids().await, vec![f.id.clone()]);

        assert_eq!(next_line(&mut sub).await, "ready");
        f.sup.send_command(&f.id, "list").await.unwrap();
        assert_eq!(next_line(&mut sub).await, "got list");

        let outcome = f.sup.stop(&f.id).await.unwrap();
        assert_eq!(outcome, StopOutcome::Graceful);
        assert_eq!(next_line(&mut sub).await, "got stop");
        assert!(!f.sup.is_running(&f.id).await);
        assert_eq!(status(&f).await, EntityStatus::Stopped);

        let ev = wait_event(&mut f.events, EventKind::ProcessExited).await;
        assert_eq!(ev.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_stop_escalates_to_terminate() {
        let mut f = fixture(IGNORES_STOP).await;
        f.sup.start(&f.id).await.unwrap();

        let outcome = f.sup.stop(&f.id).await.unwrap();
        assert_eq!(outcome, StopOutcome::Terminated);
        assert_eq!(f.sup.running_count().await, 0);
        assert_eq!(status(&f).await, EntityStatus::Stopped);

        let ev = wait_event(&mut f.events, EventKind::StopEscalated).await;
        assert_eq!(ev.reason.as_deref(), Some("terminate"));
    }

    #[tokio::test]
    async fn test_stop_escalates_to_kill() {
        let mut f = fixture(IGNORES_TERM).await;
        let mut sub = f.sup.subscribe(&f.id);
        f.sup.start(&f.id).await.unwrap();
        // the trap is installed before "ready" is printed
        assert_eq!(next_line(&mut sub).await, "ready");

        let outcome = f.sup.stop(&f.id).await.unwrap();
        assert_eq!(outcome, StopOutcome::Killed);
        assert!(!f.sup.is_running(&f.id).await);
        assert_eq!(status(&f).await, EntityStatus::Stopped);

        let ev = wait_event(&mut f.events, EventKind::ProcessExited).await;
        assert_eq!(ev.reason.as_deref(), Some("signal=9"));
    }

    #[tokio::test]
    async fn test_stop_and_commands_require_running() {
        let f = fixture(OBEYS_STOP).await;
        assert!(matches!(
            f.sup.stop(&f.id).await.unwrap_err(),
            SupervisorError::NotRunning { .. }
        ));
        assert!(matches!(
            f.sup.send_command(&f.id, "say hi").await.unwrap_err(),
            SupervisorError::NotRunning { .. }
        ));
    }

    #[tokio::test]
    async fn test_concurrent_starts_register_one_handle() {
        let f = fixture(OBEYS_STOP).await;
        let (a, b) = tokio::join!(f.sup.start(&f.id), f.sup.start(&f.id));

        let oks = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(oks, 1);
        let err = if a.is_err() { a.unwrap_err() } else { b.unwrap_err() };
        assert!(matches!(err, SupervisorError::AlreadyRunning { .. }));
        assert_eq!(f.sup.running_count().await, 1);

        f.sup.stop(&f.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_stop_and_start_never_leave_two_handles() {
        let f = fixture(OBEYS_STOP).await;
        f.sup.start(&f.id).await.unwrap();

        let (stopped, started) = tokio::join!(f.sup.stop(&f.id), f.sup.start(&f.id));
        let running = f.sup.running_count().await;
        assert!(running <= 1);
        match (stopped, started) {
            // stop won the lock, then start spawned a fresh process
            (Ok(_), Ok(_)) => assert_eq!(running, 1),
            // start saw the old process, then stop removed it
            (Ok(_), Err(SupervisorError::AlreadyRunning { .. })) => assert_eq!(running, 0),
            other => panic!("unexpected results: {other:?}"),
        }
        f.sup.shutdown().await;
        assert_eq!(f.sup.running_count().await, 0);
    }

    #[tokio::test]
    async fn test_self_exit_is_cleaned_up_by_reader_loop() {
        let mut f = fixture("echo bye; exit 3").await;
        let mut sub = f.sup.subscribe(&f.id);
        f.sup.start(&f.id).await.unwrap();

        let ev = wait_event(&mut f.events, EventKind::ProcessExited).await;
        assert_eq!(ev.exit_code, Some(3));
        assert_eq!(next_line(&mut sub).await, "bye");
        assert!(!f.sup.is_running(&f.id).await);
        assert_eq!(status(&f).await, EntityStatus::Stopped);
    }

    #[tokio::test]
    async fn test_restart_replaces_process_and_keeps_history() {
        let f = fixture(OBEYS_STOP).await;
        let mut sub = f.sup.subscribe(&f.id);
        let first = f.sup.start(&f.id).await.unwrap();
        assert_eq!(next_line(&mut sub).await, "ready");

        let second = f.sup.restart(&f.id).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(f.sup.running_count().await, 1);
        // the old reader loop may still be draining while the new process starts
        let mut tail = vec![next_line(&mut sub).await, next_line(&mut sub).await];
        tail.sort();
        assert_eq!(tail, ["got stop", "ready"]);

        let history = f.sup.history(&f.id, 10);
        assert_eq!(history.len(), 3);
        assert_eq!(&*history[0].message, "ready");

        f.sup.stop(&f.id).await.unwrap();
        // restarting a stopped entity just starts it
        f.sup.restart(&f.id).await.unwrap();
        f.sup.stop(&f.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_set_precondition_writes_flag_file() {
        let f = fixture_with(OBEYS_STOP, false, true).await;
        let entity = f.sup.set_precondition(&f.id, true).await.unwrap();
        assert!(entity.eula_accepted);

        let eula = f.sup.config().entity_dir(&f.id).unwrap().join(layout::EULA);
        assert!(std::fs::read_to_string(eula).unwrap().contains("eula=true"));
        f.sup.start(&f.id).await.unwrap();
        f.sup.stop(&f.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_forget_stops_and_drops_logs() {
        let f = fixture(OBEYS_STOP).await;
        let mut sub = f.sup.subscribe(&f.id);
        f.sup.start(&f.id).await.unwrap();
        assert_eq!(next_line(&mut sub).await, "ready");

        f.sup.forget(&f.id).await.unwrap();
        assert!(!f.sup.is_running(&f.id).await);
        assert!(f.sup.history(&f.id, 10).is_empty());
    }

    #[tokio::test]
    async fn test_forget_leaves_no_log_topic_behind() {
        let f = fixture(FLOODS_ON_STOP).await;
        f.sup.start(&f.id).await.unwrap();

        // the process prints thousands of lines after "stop" and the reader is
        // still draining them when forget returns
        f.sup.forget(&f.id).await.unwrap();
        assert_eq!(f.sup.hub().topic_count(), 0);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(f.sup.history(&f.id, 10).is_empty());
        assert_eq!(f.sup.hub().len(&f.id), 0);
        assert_eq!(f.sup.hub().topic_count(), 0);
    }

    #[tokio::test]
    async fn test_default_sink_workers_end_with_forget() {
        let f = fixture(OBEYS_STOP).await;
        let sup = Supervisor::builder(config(f._tmp.path()), f.store.clone())
            .with_launcher(Arc::new(ShellLauncher(OBEYS_STOP)))
            .with_sinks(vec![Arc::new(TracingSink::new())])
            .build();

        sup.start(&f.id).await.unwrap();
        assert_eq!(sup.sink_workers(&f.id), Some(1));
        assert_eq!(sup.hub().subscriber_count(&f.id), 1);

        // attached once per entity, not once per start
        sup.restart(&f.id).await.unwrap();
        assert_eq!(sup.sink_workers(&f.id), Some(1));
        assert_eq!(sup.hub().subscriber_count(&f.id), 1);

        sup.forget(&f.id).await.unwrap();
        assert_eq!(sup.sink_workers(&f.id), None);
        assert_eq!(sup.hub().topic_count(), 0);
    }

    #[tokio::test]
    async fn test_set_precondition_does_not_undo_concurrent_start() {
        let f = fixture(OBEYS_STOP).await;
        // call 0 is the existence check, call 1 is the read inside the patch
        let store = Arc::new(SlowReadStore {
            inner: f.store.clone(),
            calls: AtomicUsize::new(0),
            slow_call: 1,
            delay: Duration::from_millis(300),
        });
        let sup = Supervisor::builder(config(f._tmp.path()), store)
            .with_launcher(Arc::new(ShellLauncher(OBEYS_STOP)))
            .build();

        let setter = {
            let sup = Arc::clone(&sup);
            let id = f.id.clone();
            tokio::spawn(async move { sup.set_precondition(&id, true).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        sup.start(&f.id).await.unwrap();
        setter.await.unwrap().unwrap();

        let entity = f.store.get(&f.id).await.unwrap();
        assert_eq!(entity.status, EntityStatus::Running);
        assert!(entity.eula_accepted);
        assert!(sup.is_running(&f.id).await);
        sup.stop(&f.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_ids_outside_data_dir_are_rejected() {
        let f = fixture(OBEYS_STOP).await;
        let id = EntityId::from("../e1");
        let mut entity = f.store.get(&f.id).await.unwrap();
        entity.id = id.clone();
        f.store.save(entity).await.unwrap();

        assert!(matches!(
            f.sup.set_precondition(&id, true).await.unwrap_err(),
            SupervisorError::InvalidId { .. }
        ));
        let err = f.sup.start(&id).await.unwrap_err();
        assert!(matches!(err, SupervisorError::InvalidId { .. }));
        assert_eq!(err.kind(), crate::error::ErrorKind::PreconditionUnmet);
        let escaped = f._tmp.path().parent().unwrap().join("e1");
        assert!(!escaped.join(layout::EULA).exists());
        assert_eq!(f.sup.running_count().await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything() {
        let mut f = fixture(OBEYS_STOP).await;
        f.sup.start(&f.id).await.unwrap();

        let results = f.sup.shutdown().await;
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0].1, Ok(StopOutcome::Graceful)));
        assert_eq!(f.sup.running_count().await, 0);
        wait_event(&mut f.events, EventKind::ShutdownRequested).await;
    }
}
