//! # Artifact resolvers: one per process kind.
//!
//! An [`ArtifactResolver`] turns `(kind, version)` into the URL of the file that
//! makes an entity startable, and lists the versions its catalog offers. The
//! four catalogs have different shapes:
//!
//! ```text
//! vanilla  manifest ──► version detail ──► downloads.server.url
//! paper    version ──► max(builds) ──► build detail ──► downloads.application.name
//! fabric   game list ∋ version; loader[0] + installer[0] ──► composite server jar URL
//! forge    promos["{v}-recommended" | "{v}-latest"] ──► maven installer jar
//! ```
//!
//! ## Rules
//! - A version the catalog does not list is [`ProvisionError::VersionNotFound`].
//! - Any other catalog failure is [`ProvisionError::CatalogUnavailable`].
//! - Resolvers never download; the orchestrator streams the returned URL.

mod fabric;
mod forge;
mod paper;
mod vanilla;

pub use fabric::{FABRIC_META, FabricResolver};
pub use forge::{FORGE_MAVEN, FORGE_PROMOTIONS, ForgeResolver};
pub use paper::{PAPER_API, PaperResolver};
pub use vanilla::{MANIFEST_URL, VanillaResolver};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::fetch::Fetch;
use crate::entity::ProcessKind;
use crate::error::{FetchError, ProvisionError};

/// Where to get the artifact for one `(kind, version)` and what to call it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Download URL.
    pub url: String,
    /// File name inside the entity directory.
    pub file_name: &'static str,
}

/// Release channel of a listed version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Release,
    Snapshot,
}

/// One entry of a catalog's version listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogVersion {
    pub id: String,
    #[serde(rename = "type")]
    pub channel: Channel,
}

impl CatalogVersion {
    pub fn release(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            channel: Channel::Release,
        }
    }
}

/// Resolves versions of one process kind against its catalog.
#[async_trait]
pub trait ArtifactResolver: Send + Sync + 'static {
    /// Kind this resolver serves.
    fn kind(&self) -> ProcessKind;

    /// Catalog name used in errors and logs.
    fn catalog(&self) -> &'static str;

    /// Resolves `version` to a downloadable artifact.
    async fn resolve(&self, fetch: &dyn Fetch, version: &str) -> Result<Artifact, ProvisionError>;

    /// Lists the versions offered by the catalog, newest first.
    async fn versions(&self, fetch: &dyn Fetch) -> Result<Vec<CatalogVersion>, ProvisionError>;
}

/// Built-in resolvers for every [`ProcessKind`].
pub fn default_resolvers() -> Vec<std::sync::Arc<dyn ArtifactResolver>> {
    vec![
        std::sync::Arc::new(VanillaResolver::default()),
        std::sync::Arc::new(PaperResolver::default()),
        std::sync::Arc::new(FabricResolver::default()),
        std::sync::Arc::new(ForgeResolver::default()),
    ]
}

pub(crate) fn unavailable(catalog: &'static str) -> impl Fn(FetchError) -> ProvisionError {
    move |source| ProvisionError::CatalogUnavailable { catalog, source }
}

pub(crate) fn not_found(kind: ProcessKind, version: &str) -> ProvisionError {
    ProvisionError::VersionNotFound {
        kind,
        version: version.to_string(),
    }
}

/// Maps a 404 onto `VersionNotFound` and everything else onto `CatalogUnavailable`.
pub(crate) fn lookup_error(
    kind: ProcessKind,
    catalog: &'static str,
    version: &str,
) -> impl Fn(FetchError) -> ProvisionError {
    move |source| {
        if source.is_not_found() {
            not_found(kind, version)
        } else {
            ProvisionError::CatalogUnavailable { catalog, source }
        }
    }
}

/// Numeric sort key of a dotted game version (`"1.20.1"` → `[1, 20, 1]`).
///
/// Non-numeric suffixes inside a segment are ignored (`"7_pre4"` → 7).
pub(crate) fn version_key(version: &str) -> Vec<u64> {
    version
        .split('.')
        .map(|seg| {
            let digits: String = seg.chars().take_while(char::is_ascii_digit).collect();
            digits.parse().unwrap_or(0)
        })
        .collect()
}
