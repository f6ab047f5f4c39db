use std::sync::Arc;

use super::launcher::{JavaLauncher, Launcher};
use super::supervisor::Supervisor;
use crate::{config::Config, events::Bus, store::EntityStore, subscribers::LogSink};

/// Builder for constructing a [`Supervisor`] with optional collaborators.
pub struct SupervisorBuilder {
    cfg: Config,
    store: Arc<dyn EntityStore>,
    launcher: Option<Arc<dyn Launcher>>,
    bus: Option<Bus>,
    sinks: Vec<Arc<dyn LogSink>>,
}

impl SupervisorBuilder {
    /// Creates a new builder with the given configuration and entity store.
    pub fn new(cfg: Config, store: Arc<dyn EntityStore>) -> Self {
        Self {
            cfg,
            store,
            launcher: None,
            bus: None,
            sinks: Vec::new(),
        }
    }

    /// Replaces the default [`JavaLauncher`].
    pub fn with_launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Publishes lifecycle events on an existing bus (e.g. one shared with a
    /// [`Provisioner`](crate::Provisioner)) instead of a private one.
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Sets sinks attached to every entity the first time it starts.
    ///
    /// Each sink gets a dedicated worker with a bounded queue per entity.
    pub fn with_sinks(mut self, sinks: Vec<Arc<dyn LogSink>>) -> Self {
        self.sinks = sinks;
        self
    }

    /// Builds and returns the Supervisor instance.
    ///
    /// This consumes the builder and initializes all runtime components:
    /// - Event bus for lifecycle events (unless one was supplied)
    /// - Registry of running processes
    /// - Log hub sized by the configuration
    pub fn build(self) -> Arc<Supervisor> {
        let bus = self
            .bus
            .unwrap_or_else(|| Bus::new(self.cfg.bus_capacity));
        let launcher = self
            .launcher
            .unwrap_or_else(|| Arc::new(JavaLauncher::new()));
        Arc::new(Supervisor::new_internal(
            self.cfg,
            bus,
            self.store,
            launcher,
            self.sinks,
        ))
    }
}
