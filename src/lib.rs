//! # servervisor
//!
//! **Servervisor** supervises long-running game server processes: it provisions
//! their artifacts from upstream catalogs, starts and stops them with a bounded
//! escalation ladder, and fans their console output out to any number of live
//! observers.
//!
//! The crate is a library. Transport (HTTP, websockets) and persistence live
//! outside and plug in through [`EntityStore`], [`LogSink`] and [`Subscription`].
//!
//! ## Architecture
//! ### Overview
//! ```text
//!        NewEntity                       start / stop / restart / send_command
//!            │                                          │
//!            ▼                                          ▼
//! ┌──────────────────────────┐        ┌───────────────────────────────────────┐
//! │  Provisioner             │        │  Supervisor                           │
//! │  - ArtifactResolver/kind │        │  - Registry (id → ProcessHandle)      │
//! │  - Fetch (reqwest)       │        │  - EntityLocks (one transition/id)    │
//! │  - PackageInstaller      │        │  - Launcher (entity → command line)   │
//! │  - TaskTracker           │        │  - LogHub (ring + sinks per id)       │
//! └──────┬───────────────────┘        └──────┬──────────────────────┬─────────┘
//!        │ server.jar, defaults,             │ spawn                │ publish
//!        │ mods/ plugins/                    ▼                      │
//!        ▼                            ┌──────────────┐              │
//!   {data_dir}/{id}/ ◄────────────────│ OS process   │── stdout ──► reader loop
//!                                     │ (java ...)   │── stderr ──►     │
//!                                     └──────────────┘                  ▼
//!                                                          ┌────────────────────────┐
//!                                                          │ LogHub topic(id)       │
//!                                                          │ LogRing (last N lines) │
//!                                                          └──┬──────────────┬──────┘
//!                                                             ▼              ▼
//!                                                       Subscription    LogSink worker
//!                                                       (pull)          (push)
//!
//! Every component publishes lifecycle Events on a shared Bus (tokio broadcast).
//! ```
//!
//! ### Stop ladder
//! ```text
//! write stop_command ──► wait stop_grace ──► SIGTERM ──► wait terminate_grace
//!        │                    │ exited           │              │ exited
//!        │ write failed       ▼                  │              ▼
//!        └──────────────► Graceful          (skipped)       Terminated
//!                                                            │ still alive
//!                                                            ▼
//!                                         kill ──► wait kill_grace ──► Killed | ShutdownTimeout
//! ```
//!
//! ## Features
//! | Area             | Description                                                  | Key types / traits                          |
//! |------------------|--------------------------------------------------------------|---------------------------------------------|
//! | **Supervision**  | Start/stop/restart, command input, precondition, shutdown.   | [`Supervisor`], [`Launcher`], [`Registry`]  |
//! | **Logs**         | Bounded per-entity history and live fan-out.                 | [`LogHub`], [`Subscription`], [`LogSink`]   |
//! | **Provisioning** | Artifact resolution per kind, package install with deps.    | [`Provisioner`], [`ArtifactResolver`], [`PackageCatalog`] |
//! | **Events**       | Lifecycle notifications on a broadcast bus.                  | [`Bus`], [`Event`], [`EventKind`]           |
//! | **Errors**       | Typed errors with stable labels and a shared taxonomy.       | [`SupervisorError`], [`ProvisionError`]     |
//! | **Configuration**| Grace periods, capacities, data directory, HTTP settings.    | [`Config`]                                  |
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use servervisor::{Config, MemoryStore, NewEntity, ProcessKind, Provisioner, Supervisor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = Config::default();
//!     let store = Arc::new(MemoryStore::new());
//!
//!     let sup = Supervisor::builder(cfg.clone(), store.clone()).build();
//!     let prov = Provisioner::builder(cfg, store)
//!         .with_bus(sup.bus().clone())
//!         .build()?;
//!
//!     let (entity, task) = prov
//!         .create(NewEntity::new("lobby", ProcessKind::Paper, "1.20.1"))
//!         .await?;
//!     task.wait().await?;
//!
//!     sup.set_precondition(&entity.id, true).await?;
//!     let mut logs = sup.subscribe(&entity.id);
//!     sup.start(&entity.id).await?;
//!     while let Some(line) = logs.recv().await {
//!         println!("[{}] {}", line.time, line.message);
//!     }
//!
//!     sup.run_until_signal().await?;
//!     Ok(())
//! }
//! ```
mod config;
mod core;
mod entity;
mod error;
mod events;
mod logs;
pub mod provision;
mod store;
mod subscribers;

// ---- Public re-exports ----

pub use config::Config;
pub use core::{
    ExitInfo, G1_FLAGS, JavaLauncher, LaunchSpec, Launcher, ProcessHandle, Registry,
    RunningProcess, StopOutcome, Supervisor, SupervisorBuilder,
};
pub use entity::{Entity, EntityId, EntityStatus, NewEntity, ProcessKind};
pub use error::{ErrorKind, FetchError, ProvisionError, StoreError, SupervisorError};
pub use events::{Bus, Event, EventKind};
pub use logs::{LogLine, LogRing};
pub use provision::{
    ArtifactResolver, Fetch, FirstMatch, HttpFetch, InstallReport, MatchPolicy, ModrinthCatalog,
    PackageCatalog, ProvisionTask, Provisioner, ProvisionerBuilder,
};
pub use store::{EntityStore, MemoryStore, patch_entity};
pub use subscribers::{LogHub, LogSink, SinkError, Subscription, TracingSink};
