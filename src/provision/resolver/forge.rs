use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use serde::Deserialize;

use super::{Artifact, ArtifactResolver, CatalogVersion, not_found, unavailable, version_key};
use crate::entity::ProcessKind;
use crate::error::ProvisionError;
use crate::provision::fetch::{Fetch, get_typed};
use crate::provision::layout;

/// Forge promotion map.
pub const FORGE_PROMOTIONS: &str =
    "https://files.minecraftforge.net/net/minecraftforge/forge/promotions_slim.json";
/// Forge maven directory holding installer jars.
pub const FORGE_MAVEN: &str = "https://maven.minecraftforge.net/net/minecraftforge/forge";

const CATALOG: &str = "forge-promotions";
const LISTING_LIMIT: usize = 30;
const RECOMMENDED: &str = "-recommended";
const LATEST: &str = "-latest";

#[derive(Deserialize)]
struct Promotions {
    #[serde(default)]
    promos: BTreeMap<String, String>,
}

/// Promotion-map resolver. The artifact is the Forge installer, not a runnable
/// server jar, and is written as `forge-installer.jar`.
#[derive(Debug, Clone)]
pub struct ForgeResolver {
    promotions_url: String,
    maven: String,
}

impl ForgeResolver {
    pub fn new(promotions_url: impl Into<String>, maven: impl Into<String>) -> Self {
        Self {
            promotions_url: promotions_url.into(),
            maven: maven.into(),
        }
    }

    async fn promotions(&self, fetch: &dyn Fetch) -> Result<BTreeMap<String, String>, ProvisionError> {
        let body: Promotions = get_typed(fetch, &self.promotions_url, &[])
            .await
            .map_err(unavailable(CATALOG))?;
        Ok(body.promos)
    }
}

impl Default for ForgeResolver {
    fn default() -> Self {
        Self::new(FORGE_PROMOTIONS, FORGE_MAVEN)
    }
}

#[async_trait]
impl ArtifactResolver for ForgeResolver {
    fn kind(&self) -> ProcessKind {
        ProcessKind::Forge
    }

    fn catalog(&self) -> &'static str {
        CATALOG
    }

    async fn resolve(&self, fetch: &dyn Fetch, version: &str) -> Result<Artifact, ProvisionError> {
        let promos = self.promotions(fetch).await?;
        let forge = promos
            .get(&format!("{version}{RECOMMENDED}"))
            .or_else(|| promos.get(&format!("{version}{LATEST}")))
            .ok_or_else(|| not_found(ProcessKind::Forge, version))?;
        let full = format!("{version}-{forge}");
        Ok(Artifact {
            url: format!("{}/{full}/forge-{full}-installer.jar", self.maven),
            file_name: layout::FORGE_INSTALLER,
        })
    }

    async fn versions(&self, fetch: &dyn Fetch) -> Result<Vec<CatalogVersion>, ProvisionError> {
        let promos = self.promotions(fetch).await?;
        let mut seen = HashSet::new();
        let mut ids: Vec<String> = promos
            .keys()
            .filter_map(|k| k.strip_suffix(RECOMMENDED).or_else(|| k.strip_suffix(LATEST)))
            .filter(|v| seen.insert(*v))
            .map(str::to_string)
            .collect();
        ids.sort_by_key(|v| std::cmp::Reverse(version_key(v)));
        ids.truncate(LISTING_LIMIT);
        Ok(ids.into_iter().map(CatalogVersion::release).collect())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::provision::testing::FakeFetch;

    fn fetch() -> FakeFetch {
        FakeFetch::new().json(
            FORGE_PROMOTIONS,
            json!({"promos": {
                "1.20.1-latest": "47.2.20",
                "1.20.1-recommended": "47.2.0",
                "1.20.2-latest": "48.0.1",
                "1.9-recommended": "12.16.1.1887"
            }}),
        )
    }

    #[tokio::test]
    async fn test_prefers_recommended_promotion() {
        let art = ForgeResolver::default().resolve(&fetch(), "1.20.1").await.unwrap();
        assert_eq!(
            art.url,
            format!("{FORGE_MAVEN}/1.20.1-47.2.0/forge-1.20.1-47.2.0-installer.jar")
        );
        assert_eq!(art.file_name, "forge-installer.jar");
    }

    #[tokio::test]
    async fn test_falls_back_to_latest_then_not_found() {
        let r = ForgeResolver::default();
        let art = r.resolve(&fetch(), "1.20.2").await.unwrap();
        assert!(art.url.ends_with("/1.20.2-48.0.1/forge-1.20.2-48.0.1-installer.jar"));
        let err = r.resolve(&fetch(), "1.4.7").await.unwrap_err();
        assert!(matches!(err, ProvisionError::VersionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_listing_dedups_and_sorts_newest_first() {
        let list = ForgeResolver::default().versions(&fetch()).await.unwrap();
        let ids: Vec<&str> = list.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, ["1.20.2", "1.20.1", "1.9"]);
    }
}
