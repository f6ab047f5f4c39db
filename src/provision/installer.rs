//! # Package installer.
//!
//! Installs one package version into an entity's package directory and then
//! tries to satisfy its required dependencies.
//!
//! ```text
//! catalog.version(vid) ──► primary file ──► {dir}/mods|plugins/{file}   (fatal on failure)
//!   for dep in required dependencies:
//!     version = catalog.version(dep.version_id)                          (pinned)
//!             | policy.pick_version(project_versions(project, kind, game version))
//!       where project = dep.project_id | policy.pick_project(search(dep.name))
//!     install like the primary                                           (never fatal)
//! ```
//!
//! ## Rules
//! - A file that already exists is reported as `already_present` and not transferred.
//! - Only the primary install can fail the call; dependency failures land in
//!   [`InstallReport::skipped`] and on the bus as `DependencySkipped`.
//! - File names from the catalog must be plain names ([`layout::is_safe_file_name`]).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use super::fetch::Fetch;
use super::layout;
use super::packages::{MatchPolicy, PackageCatalog, PackageDependency, PackageVersion};
use crate::entity::{Entity, ProcessKind};
use crate::error::ProvisionError;
use crate::events::{Bus, Event, EventKind};

/// A package file placed (or found) in the package directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledPackage {
    pub file_name: String,
    pub project_id: String,
    pub version_id: String,
    /// Installed to satisfy a dependency rather than requested directly.
    pub dependency: bool,
    /// The file existed already; nothing was downloaded.
    pub already_present: bool,
}

/// A required dependency that could not be installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedDependency {
    pub name: String,
    pub reason: String,
}

/// Outcome of [`PackageInstaller::install`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    /// Requested package (project) id.
    pub package: String,
    pub installed: Vec<InstalledPackage>,
    pub skipped: Vec<SkippedDependency>,
}

impl InstallReport {
    /// The directly requested package.
    pub fn primary(&self) -> Option<&InstalledPackage> {
        self.installed.iter().find(|p| !p.dependency)
    }

    /// Installed dependencies.
    pub fn dependencies(&self) -> impl Iterator<Item = &InstalledPackage> {
        self.installed.iter().filter(|p| p.dependency)
    }
}

/// A `.jar` in the package directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledFile {
    pub file_name: String,
    pub size: u64,
}

/// Installs packages and their required dependencies.
pub struct PackageInstaller {
    fetch: Arc<dyn Fetch>,
    catalog: Arc<dyn PackageCatalog>,
    policy: Arc<dyn MatchPolicy>,
    bus: Bus,
}

impl PackageInstaller {
    pub fn new(
        fetch: Arc<dyn Fetch>,
        catalog: Arc<dyn PackageCatalog>,
        policy: Arc<dyn MatchPolicy>,
        bus: Bus,
    ) -> Self {
        Self {
            fetch,
            catalog,
            policy,
            bus,
        }
    }

    /// Installs `version_id` of `package` for `entity`, whose directory is `dir`.
    pub async fn install(
        &self,
        entity: &Entity,
        dir: &Path,
        package: &str,
        version_id: &str,
    ) -> Result<InstallReport, ProvisionError> {
        let pkg_dir = ensure_package_dir(dir, entity.kind).await?;
        let version = self.catalog.version(version_id).await?;
        let primary = self.place(&pkg_dir, &version, false).await?;
        self.announce(entity, &primary);

        let mut report = InstallReport {
            package: package.to_string(),
            installed: vec![primary],
            skipped: Vec::new(),
        };

        for dep in version.dependencies.iter().filter(|d| d.is_required()) {
            match self.install_dependency(entity, &pkg_dir, dep).await {
                Ok(installed) => {
                    self.announce(entity, &installed);
                    report.installed.push(installed);
                }
                Err(e) => {
                    tracing::warn!(
                        entity = %entity.id,
                        dependency = dep.label(),
                        error = %e,
                        "dependency not installed"
                    );
                    self.bus.publish(
                        Event::new(EventKind::DependencySkipped)
                            .with_entity(entity.id.as_str())
                            .with_reason(format!("{}: {e}", dep.label())),
                    );
                    report.skipped.push(SkippedDependency {
                        name: dep.label().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            entity = %entity.id,
            package,
            installed = report.installed.len(),
            skipped = report.skipped.len(),
            "package installed"
        );
        Ok(report)
    }

    async fn install_dependency(
        &self,
        entity: &Entity,
        pkg_dir: &Path,
        dep: &PackageDependency,
    ) -> Result<InstalledPackage, ProvisionError> {
        if let Some(version_id) = &dep.version_id {
            let version = self.catalog.version(version_id).await?;
            return self.place(pkg_dir, &version, true).await;
        }

        let project = match &dep.project_id {
            Some(project) => project.clone(),
            None => {
                let hits = self
                    .catalog
                    .search(dep.label(), entity.kind, None, self.policy.search_limit())
                    .await?;
                self.policy
                    .pick_project(dep, &hits)
                    .map(|h| h.project_id.clone())
                    .ok_or_else(|| ProvisionError::PackageNotFound {
                        version_id: dep.label().to_string(),
                    })?
            }
        };

        let versions = self
            .catalog
            .project_versions(&project, Some(entity.kind), Some(&entity.version))
            .await?;
        let version = self
            .policy
            .pick_version(&versions)
            .ok_or_else(|| ProvisionError::PackageNotFound {
                version_id: format!("{project}@{}", entity.version),
            })?;
        self.place(pkg_dir, version, true).await
    }

    /// Downloads the primary file of `version` into `pkg_dir` unless present.
    async fn place(
        &self,
        pkg_dir: &Path,
        version: &PackageVersion,
        dependency: bool,
    ) -> Result<InstalledPackage, ProvisionError> {
        let file = version
            .primary_file()
            .ok_or_else(|| ProvisionError::NoDownloadableFile {
                version_id: version.id.clone(),
            })?;
        if !layout::is_safe_file_name(&file.filename) {
            return Err(ProvisionError::InvalidFileName {
                name: file.filename.clone(),
            });
        }

        let path = pkg_dir.join(&file.filename);
        let already_present = tokio::fs::try_exists(&path)
            .await
            .map_err(io_error(&path))?;
        if !already_present {
            self.fetch
                .download(&file.url, &path)
                .await
                .map_err(|source| ProvisionError::DownloadFailed { source })?;
        }

        Ok(InstalledPackage {
            file_name: file.filename.clone(),
            project_id: version.project_id.clone(),
            version_id: version.id.clone(),
            dependency,
            already_present,
        })
    }

    fn announce(&self, entity: &Entity, installed: &InstalledPackage) {
        self.bus.publish(
            Event::new(EventKind::PackageInstalled)
                .with_entity(entity.id.as_str())
                .with_reason(installed.file_name.as_str()),
        );
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ProvisionError {
    let path = path.to_path_buf();
    move |source| ProvisionError::Io { path, source }
}

async fn ensure_package_dir(dir: &Path, kind: ProcessKind) -> Result<PathBuf, ProvisionError> {
    let pkg_dir = layout::package_dir(dir, kind).ok_or(ProvisionError::Unsupported { kind })?;
    tokio::fs::create_dir_all(&pkg_dir)
        .await
        .map_err(io_error(&pkg_dir))?;
    Ok(pkg_dir)
}

/// Lists the `.jar` files in the package directory, sorted by name.
pub async fn installed_packages(dir: &Path, kind: ProcessKind) -> Result<Vec<InstalledFile>, ProvisionError> {
    let pkg_dir = layout::package_dir(dir, kind).ok_or(ProvisionError::Unsupported { kind })?;
    let mut entries = match tokio::fs::read_dir(&pkg_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error(&pkg_dir)(e)),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_error(&pkg_dir))? {
        let path = entry.path();
        if path.extension().is_none_or(|ext| ext != "jar") {
            continue;
        }
        let meta = entry.metadata().await.map_err(io_error(&path))?;
        if !meta.is_file() {
            continue;
        }
        files.push(InstalledFile {
            file_name: entry.file_name().to_string_lossy().into_owned(),
            size: meta.len(),
        });
    }
    files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(files)
}

/// Deletes `file_name` from the package directory; `false` if it was absent.
pub async fn remove_package(dir: &Path, kind: ProcessKind, file_name: &str) -> Result<bool, ProvisionError> {
    let pkg_dir = layout::package_dir(dir, kind).ok_or(ProvisionError::Unsupported { kind })?;
    if !layout::is_safe_file_name(file_name) {
        return Err(ProvisionError::InvalidFileName {
            name: file_name.to_string(),
        });
    }
    let path = pkg_dir.join(file_name);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(io_error(&path)(e)),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;
    use crate::entity::{EntityId, NewEntity};
    use crate::provision::packages::{DependencyKind, FirstMatch, PackageFile, PackageHit};
    use crate::provision::testing::FakeFetch;

    /// Catalog serving canned records.
    #[derive(Default)]
    pub(crate) struct FakeCatalog {
        pub(crate) versions: HashMap<String, PackageVersion>,
        pub(crate) hits: HashMap<String, Vec<PackageHit>>,
        pub(crate) project_versions: HashMap<String, Vec<PackageVersion>>,
    }

    #[async_trait]
    impl PackageCatalog for FakeCatalog {
        async fn version(&self, version_id: &str) -> Result<PackageVersion, ProvisionError> {
            self.versions
                .get(version_id)
                .cloned()
                .ok_or_else(|| ProvisionError::PackageNotFound {
                    version_id: version_id.to_string(),
                })
        }

        async fn search(
            &self,
            query: &str,
            _: ProcessKind,
            _: Option<&str>,
            limit: usize,
        ) -> Result<Vec<PackageHit>, ProvisionError> {
            let mut hits = self.hits.get(query).cloned().unwrap_or_default();
            hits.truncate(limit);
            Ok(hits)
        }

        async fn project_versions(
            &self,
            project_id: &str,
            _: Option<ProcessKind>,
            _: Option<&str>,
        ) -> Result<Vec<PackageVersion>, ProvisionError> {
            Ok(self.project_versions.get(project_id).cloned().unwrap_or_default())
        }
    }

    pub(crate) fn version(id: &str, project: &str, file: &str, deps: Vec<PackageDependency>) -> PackageVersion {
        PackageVersion {
            id: id.into(),
            project_id: project.into(),
            version_number: "1.0".into(),
            files: vec![PackageFile {
                url: format!("https://cdn/{file}"),
                filename: file.into(),
                primary: true,
            }],
            dependencies: deps,
        }
    }

    pub(crate) fn requires(name: &str) -> PackageDependency {
        PackageDependency {
            project_id: None,
            version_id: None,
            name: Some(name.into()),
            kind: DependencyKind::Required,
        }
    }

    /// jei (v-jei) requires "mixin" (found by search) and "ghost" (not in catalog).
    pub(crate) fn jei_catalog() -> FakeCatalog {
        let mut c = FakeCatalog::default();
        c.versions.insert(
            "v-jei".into(),
            version("v-jei", "jei", "jei.jar", vec![requires("mixin"), requires("ghost")]),
        );
        c.hits.insert(
            "mixin".into(),
            vec![PackageHit {
                project_id: "P-mixin".into(),
                slug: "mixin".into(),
                title: "Mixin".into(),
                ..PackageHit::default()
            }],
        );
        c.project_versions.insert(
            "P-mixin".into(),
            vec![
                version("v-mixin-2", "P-mixin", "mixin-2.jar", vec![]),
                version("v-mixin-1", "P-mixin", "mixin-1.jar", vec![]),
            ],
        );
        c
    }

    pub(crate) fn jei_fetch() -> FakeFetch {
        FakeFetch::new()
            .file("https://cdn/jei.jar", "jei")
            .file("https://cdn/mixin-2.jar", "mixin")
    }

    fn entity(kind: ProcessKind) -> Entity {
        Entity::from_request(EntityId::from("e1"), NewEntity::new("s", kind, "1.20.1"))
    }

    fn installer(fetch: Arc<FakeFetch>, catalog: FakeCatalog, bus: Bus) -> PackageInstaller {
        PackageInstaller::new(fetch, Arc::new(catalog), Arc::new(FirstMatch), bus)
    }

    #[tokio::test]
    async fn test_installs_primary_and_resolves_required_dependency() {
        let tmp = tempfile::tempdir().unwrap();
        let fetch = Arc::new(jei_fetch());
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let inst = installer(Arc::clone(&fetch), jei_catalog(), bus);

        let report = inst
            .install(&entity(ProcessKind::Fabric), tmp.path(), "jei", "v-jei")
            .await
            .unwrap();

        assert_eq!(report.primary().unwrap().file_name, "jei.jar");
        let deps: Vec<&str> = report.dependencies().map(|p| p.file_name.as_str()).collect();
        assert_eq!(deps, ["mixin-2.jar"]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].name, "ghost");

        assert_eq!(std::fs::read(tmp.path().join("mods/jei.jar")).unwrap(), b"jei");
        assert!(tmp.path().join("mods/mixin-2.jar").exists());

        let kinds: Vec<EventKind> = std::iter::from_fn(|| rx.try_recv().ok()).map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            [
                EventKind::PackageInstalled,
                EventKind::PackageInstalled,
                EventKind::DependencySkipped
            ]
        );
    }

    #[tokio::test]
    async fn test_pinned_dependency_version_is_honoured() {
        let tmp = tempfile::tempdir().unwrap();
        let mut catalog = jei_catalog();
        let pinned = PackageDependency {
            project_id: Some("P-mixin".into()),
            version_id: Some("v-mixin-1".into()),
            name: None,
            kind: DependencyKind::Required,
        };
        catalog.versions.insert(
            "v-rei".into(),
            version("v-rei", "rei", "rei.jar", vec![pinned]),
        );
        catalog.versions.insert(
            "v-mixin-1".into(),
            version("v-mixin-1", "P-mixin", "mixin-1.jar", vec![]),
        );
        let fetch = Arc::new(
            jei_fetch()
                .file("https://cdn/rei.jar", "rei")
                .file("https://cdn/mixin-1.jar", "mixin-old"),
        );
        let inst = installer(Arc::clone(&fetch), catalog, Bus::new(16));

        let report = inst
            .install(&entity(ProcessKind::Fabric), tmp.path(), "rei", "v-rei")
            .await
            .unwrap();
        let deps: Vec<(&str, &str)> = report
            .dependencies()
            .map(|p| (p.file_name.as_str(), p.version_id.as_str()))
            .collect();
        assert_eq!(deps, [("mixin-1.jar", "v-mixin-1")]);
        assert!(report.skipped.is_empty());
        assert!(!tmp.path().join("mods/mixin-2.jar").exists());
        assert_eq!(
            fetch.downloads(),
            ["https://cdn/rei.jar", "https://cdn/mixin-1.jar"]
        );
    }

    #[tokio::test]
    async fn test_reinstall_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let fetch = Arc::new(jei_fetch());
        let inst = installer(Arc::clone(&fetch), jei_catalog(), Bus::new(16));
        let e = entity(ProcessKind::Forge);

        inst.install(&e, tmp.path(), "jei", "v-jei").await.unwrap();
        let again = inst.install(&e, tmp.path(), "jei", "v-jei").await.unwrap();

        assert!(again.installed.iter().all(|p| p.already_present));
        assert_eq!(fetch.downloads().len(), 2);
        let files = installed_packages(tmp.path(), ProcessKind::Forge).await.unwrap();
        assert_eq!(files.len(), 2);
    }

    #[tokio::test]
    async fn test_primary_failures_are_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let fetch = Arc::new(FakeFetch::new());
        let inst = installer(Arc::clone(&fetch), jei_catalog(), Bus::new(16));

        let err = inst
            .install(&entity(ProcessKind::Fabric), tmp.path(), "jei", "v-jei")
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::DownloadFailed { .. }));

        let err = inst
            .install(&entity(ProcessKind::Fabric), tmp.path(), "x", "missing")
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::PackageNotFound { .. }));
    }

    #[tokio::test]
    async fn test_vanilla_and_unsafe_names_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let mut catalog = FakeCatalog::default();
        catalog
            .versions
            .insert("evil".into(), version("evil", "p", "../server.jar", vec![]));
        let inst = installer(Arc::new(FakeFetch::new()), catalog, Bus::new(16));

        let err = inst
            .install(&entity(ProcessKind::Vanilla), tmp.path(), "p", "evil")
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Unsupported { kind: ProcessKind::Vanilla }));

        let err = inst
            .install(&entity(ProcessKind::Paper), tmp.path(), "p", "evil")
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidFileName { .. }));
    }

    #[tokio::test]
    async fn test_list_and_remove_packages() {
        let tmp = tempfile::tempdir().unwrap();
        let plugins = tmp.path().join("plugins");
        assert!(installed_packages(tmp.path(), ProcessKind::Paper).await.unwrap().is_empty());

        std::fs::create_dir_all(&plugins).unwrap();
        std::fs::write(plugins.join("b.jar"), "bbbb").unwrap();
        std::fs::write(plugins.join("a.jar"), "aa").unwrap();
        std::fs::write(plugins.join("notes.txt"), "x").unwrap();

        let files = installed_packages(tmp.path(), ProcessKind::Paper).await.unwrap();
        assert_eq!(
            files,
            [
                InstalledFile { file_name: "a.jar".into(), size: 2 },
                InstalledFile { file_name: "b.jar".into(), size: 4 }
            ]
        );

        assert!(remove_package(tmp.path(), ProcessKind::Paper, "a.jar").await.unwrap());
        assert!(!remove_package(tmp.path(), ProcessKind::Paper, "a.jar").await.unwrap());
        assert!(remove_package(tmp.path(), ProcessKind::Paper, "../eula.txt").await.is_err());
        assert!(matches!(
            remove_package(tmp.path(), ProcessKind::Vanilla, "a.jar").await,
            Err(ProvisionError::Unsupported { .. })
        ));
    }
}
