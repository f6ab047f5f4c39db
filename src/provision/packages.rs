//! # Package catalog.
//!
//! Packages (mods for fabric/forge, plugins for paper) come from a catalog
//! reached through [`PackageCatalog`]. [`ModrinthCatalog`] is the production
//! implementation over [`Fetch`]; a [`MatchPolicy`] decides which search hit and
//! which compatible version satisfy a declared dependency.
//!
//! ```text
//! version(id) ──────────────────────────► PackageVersion { files, dependencies }
//! search(query, kind, game_version?, n) ──► [PackageHit]           ─┐
//! project_versions(p, kind?, game_version?) ──► [PackageVersion]    ├─► MatchPolicy picks one of each
//! ```
//!
//! The same two listing calls back catalog browsing through
//! [`Provisioner::search_packages`](crate::Provisioner::search_packages) and
//! [`Provisioner::package_versions`](crate::Provisioner::package_versions).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::fetch::{Fetch, get_typed};
use crate::entity::ProcessKind;
use crate::error::{FetchError, ProvisionError};

/// Modrinth API root.
pub const MODRINTH_API: &str = "https://api.modrinth.com/v2";

const CATALOG: &str = "modrinth";

/// One downloadable file of a package version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageFile {
    pub url: String,
    pub filename: String,
    #[serde(default)]
    pub primary: bool,
}

/// Relationship of a declared dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    Required,
    Optional,
    Incompatible,
    Embedded,
    #[serde(other)]
    Other,
}

/// A dependency declared by a package version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDependency {
    /// Catalog project, when the publisher declared one.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Exact version, when the publisher pinned one.
    #[serde(default)]
    pub version_id: Option<String>,
    /// Name used to search the catalog when no project is declared.
    #[serde(default, rename = "file_name")]
    pub name: Option<String>,
    #[serde(rename = "dependency_type")]
    pub kind: DependencyKind,
}

impl PackageDependency {
    /// Search term or project id identifying the dependency.
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .or(self.project_id.as_deref())
            .or(self.version_id.as_deref())
            .unwrap_or("<unnamed>")
    }

    pub fn is_required(&self) -> bool {
        self.kind == DependencyKind::Required
    }
}

/// One published version of a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageVersion {
    pub id: String,
    pub project_id: String,
    #[serde(default)]
    pub version_number: String,
    #[serde(default)]
    pub files: Vec<PackageFile>,
    #[serde(default)]
    pub dependencies: Vec<PackageDependency>,
}

impl PackageVersion {
    /// The primary file, or the first one listed.
    pub fn primary_file(&self) -> Option<&PackageFile> {
        self.files
            .iter()
            .find(|f| f.primary)
            .or_else(|| self.files.first())
    }
}

/// A search result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageHit {
    pub project_id: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub downloads: u64,
}

/// Source of package metadata.
#[async_trait]
pub trait PackageCatalog: Send + Sync + 'static {
    /// The record of one package version.
    async fn version(&self, version_id: &str) -> Result<PackageVersion, ProvisionError>;

    /// Packages matching `query` that run on `kind`, restricted to
    /// `game_version` when given.
    async fn search(
        &self,
        query: &str,
        kind: ProcessKind,
        game_version: Option<&str>,
        limit: usize,
    ) -> Result<Vec<PackageHit>, ProvisionError>;

    /// Versions of `project_id`, newest first. Each filter applies only when given.
    async fn project_versions(
        &self,
        project_id: &str,
        kind: Option<ProcessKind>,
        game_version: Option<&str>,
    ) -> Result<Vec<PackageVersion>, ProvisionError>;

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Chooses among catalog candidates when resolving a dependency.
pub trait MatchPolicy: Send + Sync + 'static {
    /// How many search hits to request.
    fn search_limit(&self) -> usize {
        1
    }

    fn pick_project<'a>(&self, dep: &PackageDependency, hits: &'a [PackageHit]) -> Option<&'a PackageHit>;

    fn pick_version<'a>(&self, versions: &'a [PackageVersion]) -> Option<&'a PackageVersion>;
}

/// Takes the top search hit and the newest compatible version.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstMatch;

impl MatchPolicy for FirstMatch {
    fn pick_project<'a>(&self, _dep: &PackageDependency, hits: &'a [PackageHit]) -> Option<&'a PackageHit> {
        hits.first()
    }

    fn pick_version<'a>(&self, versions: &'a [PackageVersion]) -> Option<&'a PackageVersion> {
        versions.first()
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<PackageHit>,
}

/// [`PackageCatalog`] backed by the Modrinth v2 API.
pub struct ModrinthCatalog {
    fetch: Arc<dyn Fetch>,
    base: String,
}

impl ModrinthCatalog {
    pub fn new(fetch: Arc<dyn Fetch>) -> Self {
        Self::with_base(fetch, MODRINTH_API)
    }

    pub fn with_base(fetch: Arc<dyn Fetch>, base: impl Into<String>) -> Self {
        Self {
            fetch,
            base: base.into(),
        }
    }

    /// Search facets restricting results to packages that run on `kind`
    /// (and on `game_version`, when given).
    fn facets(kind: ProcessKind, game_version: Option<&str>) -> String {
        let mut facets: Vec<Vec<String>> = match kind {
            ProcessKind::Paper => vec![
                vec!["project_type:plugin".into()],
                vec![
                    "categories:paper".into(),
                    "categories:spigot".into(),
                    "categories:bukkit".into(),
                ],
            ],
            other => vec![
                vec!["project_type:mod".into()],
                vec![format!("categories:{}", other.as_str())],
            ],
        };
        if let Some(version) = game_version {
            facets.push(vec![format!("versions:{version}")]);
        }
        serde_json::Value::from(facets).to_string()
    }
}

fn unavailable(source: FetchError) -> ProvisionError {
    ProvisionError::CatalogUnavailable {
        catalog: CATALOG,
        source,
    }
}

#[async_trait]
impl PackageCatalog for ModrinthCatalog {
    async fn version(&self, version_id: &str) -> Result<PackageVersion, ProvisionError> {
        let url = format!("{}/version/{version_id}", self.base);
        get_typed(self.fetch.as_ref(), &url, &[])
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    ProvisionError::PackageNotFound {
                        version_id: version_id.to_string(),
                    }
                } else {
                    unavailable(e)
                }
            })
    }

    async fn search(
        &self,
        query: &str,
        kind: ProcessKind,
        game_version: Option<&str>,
        limit: usize,
    ) -> Result<Vec<PackageHit>, ProvisionError> {
        let url = format!("{}/search", self.base);
        let params = [
            ("query", query.to_string()),
            ("limit", limit.to_string()),
            ("facets", Self::facets(kind, game_version)),
        ];
        let body: SearchResponse = get_typed(self.fetch.as_ref(), &url, &params)
            .await
            .map_err(unavailable)?;
        Ok(body.hits)
    }

    async fn project_versions(
        &self,
        project_id: &str,
        kind: Option<ProcessKind>,
        game_version: Option<&str>,
    ) -> Result<Vec<PackageVersion>, ProvisionError> {
        let url = format!("{}/project/{project_id}/version", self.base);
        let mut params = Vec::new();
        if let Some(kind) = kind {
            params.push(("loaders", serde_json::json!([kind.as_str()]).to_string()));
        }
        if let Some(version) = game_version {
            params.push(("game_versions", serde_json::json!([version]).to_string()));
        }
        get_typed(self.fetch.as_ref(), &url, &params)
            .await
            .map_err(unavailable)
    }

    fn name(&self) -> &'static str {
        CATALOG
    }
}
