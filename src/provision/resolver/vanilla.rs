use async_trait::async_trait;
use serde::Deserialize;

use super::{Artifact, ArtifactResolver, CatalogVersion, Channel, not_found, unavailable};
use crate::entity::ProcessKind;
use crate::error::ProvisionError;
use crate::provision::fetch::{Fetch, get_typed};
use crate::provision::layout;

/// Mojang version manifest.
pub const MANIFEST_URL: &str = "https://launchermeta.mojang.com/mc/game/version_manifest_v2.json";

const CATALOG: &str = "mojang";
const LISTING_LIMIT: usize = 50;

#[derive(Deserialize)]
struct Manifest {
    versions: Vec<ManifestEntry>,
}

#[derive(Deserialize)]
struct ManifestEntry {
    id: String,
    #[serde(rename = "type")]
    channel: String,
    url: String,
}

#[derive(Deserialize)]
struct VersionDetail {
    #[serde(default)]
    downloads: Downloads,
}

#[derive(Deserialize, Default)]
struct Downloads {
    server: Option<Download>,
}

#[derive(Deserialize)]
struct Download {
    url: String,
}

/// Direct-manifest resolver for vanilla servers.
#[derive(Debug, Clone)]
pub struct VanillaResolver {
    manifest_url: String,
}

impl VanillaResolver {
    pub fn new(manifest_url: impl Into<String>) -> Self {
        Self {
            manifest_url: manifest_url.into(),
        }
    }

    async fn manifest(&self, fetch: &dyn Fetch) -> Result<Manifest, ProvisionError> {
        get_typed(fetch, &self.manifest_url, &[])
            .await
            .map_err(unavailable(CATALOG))
    }
}

impl Default for VanillaResolver {
    fn default() -> Self {
        Self::new(MANIFEST_URL)
    }
}

#[async_trait]
impl ArtifactResolver for VanillaResolver {
    fn kind(&self) -> ProcessKind {
        ProcessKind::Vanilla
    }

    fn catalog(&self) -> &'static str {
        CATALOG
    }

    async fn resolve(&self, fetch: &dyn Fetch, version: &str) -> Result<Artifact, ProvisionError> {
        let manifest = self.manifest(fetch).await?;
        let entry = manifest
            .versions
            .into_iter()
            .find(|v| v.id == version)
            .ok_or_else(|| not_found(ProcessKind::Vanilla, version))?;

        let detail: VersionDetail = get_typed(fetch, &entry.url, &[])
            .await
            .map_err(unavailable(CATALOG))?;
        // Very old versions have no server download.
        let server = detail
            .downloads
            .server
            .ok_or_else(|| not_found(ProcessKind::Vanilla, version))?;
        Ok(Artifact {
            url: server.url,
            file_name: layout::ARTIFACT,
        })
    }

    async fn versions(&self, fetch: &dyn Fetch) -> Result<Vec<CatalogVersion>, ProvisionError> {
        let manifest = self.manifest(fetch).await?;
        Ok(manifest
            .versions
            .into_iter()
            .filter_map(|v| {
                let channel = match v.channel.as_str() {
                    "release" => Channel::Release,
                    "snapshot" => Channel::Snapshot,
                    _ => return None,
                };
                Some(CatalogVersion { id: v.id, channel })
            })
            .take(LISTING_LIMIT)
            .collect())
    }
}
