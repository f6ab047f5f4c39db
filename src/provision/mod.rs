//! # Provisioning: artifacts, entity defaults and packages.
//!
//! - [`fetch`]: the [`Fetch`] network seam and its `reqwest` implementation.
//! - [`resolver`]: one [`ArtifactResolver`] per process kind.
//! - [`packages`]: the [`PackageCatalog`] seam, Modrinth, and [`MatchPolicy`].
//! - [`installer`]: package install with dependency resolution.
//! - [`layout`]: file names inside an entity directory and default files.
//! - [`Provisioner`]: ties them together and tracks background tasks.

mod builder;
pub mod fetch;
pub mod installer;
pub mod layout;
mod orchestrator;
pub mod packages;
pub mod resolver;

#[cfg(test)]
pub(crate) mod testing;

pub use builder::ProvisionerBuilder;
pub use fetch::{Fetch, HttpFetch};
pub use installer::{InstallReport, InstalledFile, InstalledPackage, PackageInstaller, SkippedDependency};
pub use orchestrator::{ProvisionTask, Provisioner};
pub use packages::{
    DependencyKind, FirstMatch, MatchPolicy, ModrinthCatalog, PackageCatalog, PackageDependency,
    PackageFile, PackageHit, PackageVersion,
};
pub use resolver::{
    Artifact, ArtifactResolver, CatalogVersion, Channel, FabricResolver, ForgeResolver,
    PaperResolver, VanillaResolver,
};
