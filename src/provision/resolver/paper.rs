use async_trait::async_trait;
use serde::Deserialize;

use super::{Artifact, ArtifactResolver, CatalogVersion, lookup_error, not_found, unavailable};
use crate::entity::ProcessKind;
use crate::error::ProvisionError;
use crate::provision::fetch::{Fetch, get_typed};
use crate::provision::layout;

/// PaperMC project API root.
pub const PAPER_API: &str = "https://api.papermc.io/v2/projects/paper";

const CATALOG: &str = "papermc";
const LISTING_LIMIT: usize = 30;

#[derive(Deserialize)]
struct Project {
    versions: Vec<String>,
}

#[derive(Deserialize)]
struct VersionBuilds {
    builds: Vec<u64>,
}

#[derive(Deserialize)]
struct Build {
    downloads: BuildDownloads,
}

#[derive(Deserialize)]
struct BuildDownloads {
    application: Application,
}

#[derive(Deserialize)]
struct Application {
    name: String,
}

/// Build-indexed resolver: always takes the highest build of a version.
#[derive(Debug, Clone)]
pub struct PaperResolver {
    base: String,
}

impl PaperResolver {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }
}

impl Default for PaperResolver {
    fn default() -> Self {
        Self::new(PAPER_API)
    }
}

#[async_trait]
impl ArtifactResolver for PaperResolver {
    fn kind(&self) -> ProcessKind {
        ProcessKind::Paper
    }

    fn catalog(&self) -> &'static str {
        CATALOG
    }

    async fn resolve(&self, fetch: &dyn Fetch, version: &str) -> Result<Artifact, ProvisionError> {
        let version_url = format!("{}/versions/{version}", self.base);
        let builds: VersionBuilds = get_typed(fetch, &version_url, &[])
            .await
            .map_err(lookup_error(ProcessKind::Paper, CATALOG, version))?;
        let build = builds
            .builds
            .into_iter()
            .max()
            .ok_or_else(|| not_found(ProcessKind::Paper, version))?;

        let build_url = format!("{version_url}/builds/{build}");
        let detail: Build = get_typed(fetch, &build_url, &[])
            .await
            .map_err(unavailable(CATALOG))?;
        Ok(Artifact {
            url: format!("{build_url}/downloads/{}", detail.downloads.application.name),
            file_name: layout::ARTIFACT,
        })
    }

    async fn versions(&self, fetch: &dyn Fetch) -> Result<Vec<CatalogVersion>, ProvisionError> {
        let project: Project = get_typed(fetch, &self.base, &[])
            .await
            .map_err(unavailable(CATALOG))?;
        Ok(project
            .versions
            .into_iter()
            .rev()
            .take(LISTING_LIMIT)
            .map(CatalogVersion::release)
            .collect())
    }
}
