use async_trait::async_trait;
use serde::Deserialize;

use super::{Artifact, ArtifactResolver, CatalogVersion, Channel, not_found, unavailable};
use crate::entity::ProcessKind;
use crate::error::ProvisionError;
use crate::provision::fetch::{Fetch, get_typed};
use crate::provision::layout;

/// Fabric meta API root.
pub const FABRIC_META: &str = "https://meta.fabricmc.net/v2";

const CATALOG: &str = "fabric-meta";
const LISTING_LIMIT: usize = 30;

#[derive(Deserialize)]
struct MetaEntry {
    version: String,
    #[serde(default)]
    stable: bool,
}

/// Composite resolver: newest loader plus newest installer for a game version.
#[derive(Debug, Clone)]
pub struct FabricResolver {
    base: String,
}

impl FabricResolver {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }

    async fn list(&self, fetch: &dyn Fetch, what: &str) -> Result<Vec<MetaEntry>, ProvisionError> {
        get_typed(fetch, &format!("{}/versions/{what}", self.base), &[])
            .await
            .map_err(unavailable(CATALOG))
    }

    async fn first(&self, fetch: &dyn Fetch, what: &str, version: &str) -> Result<String, ProvisionError> {
        self.list(fetch, what)
            .await?
            .into_iter()
            .next()
            .map(|e| e.version)
            .ok_or_else(|| not_found(ProcessKind::Fabric, version))
    }
}

impl Default for FabricResolver {
    fn default() -> Self {
        Self::new(FABRIC_META)
    }
}

#[async_trait]
impl ArtifactResolver for FabricResolver {
    fn kind(&self) -> ProcessKind {
        ProcessKind::Fabric
    }

    fn catalog(&self) -> &'static str {
        CATALOG
    }

    async fn resolve(&self, fetch: &dyn Fetch, version: &str) -> Result<Artifact, ProvisionError> {
        let games = self.list(fetch, "game").await?;
        if !games.iter().any(|g| g.version == version) {
            return Err(not_found(ProcessKind::Fabric, version));
        }
        let loader = self.first(fetch, "loader", version).await?;
        let installer = self.first(fetch, "installer", version).await?;
        Ok(Artifact {
            url: format!(
                "{}/versions/loader/{version}/{loader}/{installer}/server/jar",
                self.base
            ),
            file_name: layout::ARTIFACT,
        })
    }

    async fn versions(&self, fetch: &dyn Fetch) -> Result<Vec<CatalogVersion>, ProvisionError> {
        Ok(self
            .list(fetch, "game")
            .await?
            .into_iter()
            .take(LISTING_LIMIT)
            .map(|g| CatalogVersion {
                id: g.version,
                channel: if g.stable {
                    Channel::Release
                } else {
                    Channel::Snapshot
                },
            })
            .collect())
    }
}
