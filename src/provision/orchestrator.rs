//! # Provisioner: artifact acquisition and package management per entity.
//!
//! ```text
//! create(NewEntity)
//!   ├─ id, {data}/{id}/, store.save(status=downloading)
//!   └─ tracked task: provision(id)
//!        ├─ ProvisionStarted
//!        ├─ resolver[kind].resolve(version) ──► Fetch::download ──► server.jar
//!        ├─ server.properties (if absent), start.sh, start.bat
//!        └─ status=stopped + ProvisionSucceeded | status=error + ProvisionFailed
//!
//! install_package / spawn_install ──► PackageInstaller (mods/ or plugins/)
//! search_packages / package_versions ──► PackageCatalog (browsing)
//! wait_idle() ──► every tracked task finished
//! ```
//!
//! ## Rules
//! - `downloading → stopped | error` is the only status path owned here.
//! - A `running` entity is never provisioned: its files are in use.
//! - Entity directories come from [`Config::entity_dir`]; an id that would
//!   escape the data directory is `InvalidId`.
//! - Background tasks are tracked by a [`TaskTracker`]; [`Provisioner::wait_idle`]
//!   waits for all of them.
//! - A task that panics or is aborted resolves as [`ProvisionError::Aborted`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use super::fetch::Fetch;
use super::installer::{self, InstallReport, InstalledFile, PackageInstaller};
use super::layout;
use super::packages::{PackageCatalog, PackageHit, PackageVersion};
use super::resolver::{ArtifactResolver, CatalogVersion};
use crate::config::Config;
use crate::core::Launcher;
use crate::entity::{Entity, EntityId, EntityStatus, NewEntity, ProcessKind};
use crate::error::ProvisionError;
use crate::events::{Bus, Event, EventKind};
use crate::store::{EntityStore, set_status_logged};

/// Handle to a tracked background provisioning or install task.
#[derive(Debug)]
pub struct ProvisionTask<T> {
    id: EntityId,
    handle: JoinHandle<Result<T, ProvisionError>>,
}

impl<T> ProvisionTask<T> {
    /// Entity the task works on.
    pub fn entity(&self) -> &EntityId {
        &self.id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancels the task; [`wait`](Self::wait) then yields `Aborted`.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Waits for the task's outcome.
    pub async fn wait(self) -> Result<T, ProvisionError> {
        match self.handle.await {
            Ok(res) => res,
            Err(e) => {
                tracing::warn!(entity = %self.id, error = %e, "provisioning task did not complete");
                Err(ProvisionError::Aborted { id: self.id })
            }
        }
    }
}

/// Downloads artifacts, writes entity defaults and manages packages.
pub struct Provisioner {
    cfg: Config,
    store: Arc<dyn EntityStore>,
    fetch: Arc<dyn Fetch>,
    resolvers: HashMap<ProcessKind, Arc<dyn ArtifactResolver>>,
    catalog: Arc<dyn PackageCatalog>,
    installer: PackageInstaller,
    launcher: Arc<dyn Launcher>,
    bus: Bus,
    tracker: TaskTracker,
}

impl Provisioner {
    /// Returns a builder with production defaults for every collaborator.
    pub fn builder(cfg: Config, store: Arc<dyn EntityStore>) -> super::ProvisionerBuilder {
        super::ProvisionerBuilder::new(cfg, store)
    }

    pub(super) fn new_internal(
        cfg: Config,
        store: Arc<dyn EntityStore>,
        fetch: Arc<dyn Fetch>,
        resolvers: HashMap<ProcessKind, Arc<dyn ArtifactResolver>>,
        catalog: Arc<dyn PackageCatalog>,
        installer: PackageInstaller,
        launcher: Arc<dyn Launcher>,
        bus: Bus,
    ) -> Self {
        Self {
            cfg,
            store,
            fetch,
            resolvers,
            catalog,
            installer,
            launcher,
            bus,
            tracker: TaskTracker::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    fn entity_dir(&self, id: &EntityId) -> Result<PathBuf, ProvisionError> {
        self.cfg
            .entity_dir(id)
            .ok_or_else(|| ProvisionError::InvalidId { id: id.clone() })
    }

    fn resolver(&self, kind: ProcessKind) -> Result<&Arc<dyn ArtifactResolver>, ProvisionError> {
        self.resolvers
            .get(&kind)
            .ok_or(ProvisionError::Unsupported { kind })
    }

    /// Resolves `version` of `kind` and streams the artifact to `dest`.
    ///
    /// Forge yields an installer, which is written as `forge-installer.jar` in
    /// the directory of `dest`. Returns the path actually written.
    pub async fn fetch_artifact(
        &self,
        kind: ProcessKind,
        version: &str,
        dest: &Path,
    ) -> Result<PathBuf, ProvisionError> {
        let resolver = self.resolver(kind)?;
        let artifact = resolver.resolve(self.fetch.as_ref(), version).await?;
        let target = if artifact.file_name == layout::ARTIFACT {
            dest.to_path_buf()
        } else {
            dest.with_file_name(artifact.file_name)
        };
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ProvisionError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let bytes = self
            .fetch
            .download(&artifact.url, &target)
            .await
            .map_err(|source| ProvisionError::DownloadFailed { source })?;
        tracing::info!(
            kind = %kind,
            version,
            catalog = resolver.catalog(),
            path = %target.display(),
            bytes,
            "artifact downloaded"
        );
        Ok(target)
    }

    /// Versions offered by the catalog of `kind`.
    pub async fn versions(&self, kind: ProcessKind) -> Result<Vec<CatalogVersion>, ProvisionError> {
        self.resolver(kind)?.versions(self.fetch.as_ref()).await
    }

    /// Registers a new entity and starts provisioning it in the background.
    pub async fn create(
        self: &Arc<Self>,
        req: NewEntity,
    ) -> Result<(Entity, ProvisionTask<PathBuf>), ProvisionError> {
        let entity = Entity::from_request(EntityId::generate(), req);
        let dir = self.entity_dir(&entity.id)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| ProvisionError::Io { path: dir, source })?;
        self.store.save(entity.clone()).await?;
        tracing::info!(entity = %entity.id, kind = %entity.kind, version = %entity.version, "entity created");

        let task = self.spawn_provision(entity.id.clone());
        Ok((entity, task))
    }

    /// Tracked background variant of [`provision`](Self::provision).
    pub fn spawn_provision(self: &Arc<Self>, id: EntityId) -> ProvisionTask<PathBuf> {
        let this = Arc::clone(self);
        let task_id = id.clone();
        let handle = self
            .tracker
            .spawn(async move { this.provision(&task_id).await });
        ProvisionTask { id, handle }
    }

    /// Downloads the artifact of an existing entity and writes its defaults.
    ///
    /// The entity is `downloading` while this runs and ends `stopped` on
    /// success or `error` on failure. Returns the artifact path.
    ///
    /// Fails with `Busy`, touching neither files nor status, while the entity
    /// is `running`.
    pub async fn provision(&self, id: &EntityId) -> Result<PathBuf, ProvisionError> {
        let entity = self.store.get(id).await?;
        if entity.status == EntityStatus::Running {
            tracing::warn!(entity = %id, status = %entity.status, "provisioning refused");
            return Err(ProvisionError::Busy {
                id: id.clone(),
                status: entity.status,
            });
        }
        self.entity_dir(id)?;
        if entity.status != EntityStatus::Downloading {
            set_status_logged(self.store.as_ref(), id, EntityStatus::Downloading).await;
        }
        self.bus.publish(
            Event::new(EventKind::ProvisionStarted)
                .with_entity(id.as_str())
                .with_reason(format!("{} {}", entity.kind, entity.version)),
        );

        match self.provision_entity(&entity).await {
            Ok(path) => {
                set_status_logged(self.store.as_ref(), id, EntityStatus::Stopped).await;
                self.bus
                    .publish(Event::new(EventKind::ProvisionSucceeded).with_entity(id.as_str()));
                Ok(path)
            }
            Err(e) => {
                tracing::warn!(entity = %id, error = %e, label = e.as_label(), "provisioning failed");
                set_status_logged(self.store.as_ref(), id, EntityStatus::Error).await;
                self.bus.publish(
                    Event::new(EventKind::ProvisionFailed)
                        .with_entity(id.as_str())
                        .with_reason(e.to_string()),
                );
                Err(e)
            }
        }
    }

    async fn provision_entity(&self, entity: &Entity) -> Result<PathBuf, ProvisionError> {
        let dir = self.entity_dir(&entity.id)?;
        let path = self
            .fetch_artifact(entity.kind, &entity.version, &layout::artifact_path(&dir))
            .await?;
        let launch = self.launcher.launch_spec(entity, &dir);
        layout::write_defaults(&dir, entity, &launch)
            .await
            .map_err(|source| ProvisionError::Io {
                path: dir.clone(),
                source,
            })?;
        Ok(path)
    }

    /// Installs `version_id` of `package` into the entity's package directory.
    pub async fn install_package(
        &self,
        id: &EntityId,
        package: &str,
        version_id: &str,
    ) -> Result<InstallReport, ProvisionError> {
        let dir = self.entity_dir(id)?;
        let entity = self.store.get(id).await?;
        self.installer.install(&entity, &dir, package, version_id).await
    }

    /// Tracked background variant of [`install_package`](Self::install_package).
    pub fn spawn_install(
        self: &Arc<Self>,
        id: EntityId,
        package: impl Into<String>,
        version_id: impl Into<String>,
    ) -> ProvisionTask<InstallReport> {
        let this = Arc::clone(self);
        let (task_id, package, version_id) = (id.clone(), package.into(), version_id.into());
        let handle = self.tracker.spawn(async move {
            this.install_package(&task_id, &package, &version_id).await
        });
        ProvisionTask { id, handle }
    }

    /// Package files currently in the entity's package directory.
    pub async fn installed_packages(&self, id: &EntityId) -> Result<Vec<InstalledFile>, ProvisionError> {
        let dir = self.entity_dir(id)?;
        let entity = self.store.get(id).await?;
        installer::installed_packages(&dir, entity.kind).await
    }

    /// Deletes one package file; `false` if it was not installed.
    pub async fn remove_package(&self, id: &EntityId, file_name: &str) -> Result<bool, ProvisionError> {
        let dir = self.entity_dir(id)?;
        let entity = self.store.get(id).await?;
        let removed = installer::remove_package(&dir, entity.kind, file_name).await?;
        tracing::info!(entity = %id, file_name, removed, "package removed");
        Ok(removed)
    }

    /// Catalog packages that run on `kind`, matching `query`.
    ///
    /// `game_version` narrows the results to packages published for it.
    /// Vanilla hosts no packages and is `Unsupported`.
    pub async fn search_packages(
        &self,
        kind: ProcessKind,
        query: &str,
        game_version: Option<&str>,
        limit: usize,
    ) -> Result<Vec<PackageHit>, ProvisionError> {
        if layout::package_dir_name(kind).is_none() {
            return Err(ProvisionError::Unsupported { kind });
        }
        let hits = self
            .catalog
            .search(query, kind, game_version, limit.max(1))
            .await?;
        tracing::debug!(kind = %kind, query, ?game_version, hits = hits.len(), catalog = self.catalog.name(), "packages searched");
        Ok(hits)
    }

    /// Published versions of `project_id`, newest first, optionally filtered
    /// by loader `kind` and `game_version`.
    pub async fn package_versions(
        &self,
        project_id: &str,
        kind: Option<ProcessKind>,
        game_version: Option<&str>,
    ) -> Result<Vec<PackageVersion>, ProvisionError> {
        if let Some(kind) = kind.filter(|k| layout::package_dir_name(*k).is_none()) {
            return Err(ProvisionError::Unsupported { kind });
        }
        self.catalog
            .project_versions(project_id, kind, game_version)
            .await
    }

    /// Number of tracked tasks still running.
    pub fn active_tasks(&self) -> usize {
        self.tracker.len()
    }

    /// Waits until every tracked task has finished.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
