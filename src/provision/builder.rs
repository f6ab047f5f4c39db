use std::collections::HashMap;
use std::sync::Arc;

use super::fetch::{Fetch, HttpFetch};
use super::installer::PackageInstaller;
use super::orchestrator::Provisioner;
use super::packages::{FirstMatch, MatchPolicy, ModrinthCatalog, PackageCatalog};
use super::resolver::{ArtifactResolver, default_resolvers};
use crate::config::Config;
use crate::core::{JavaLauncher, Launcher};
use crate::error::FetchError;
use crate::events::Bus;
use crate::store::EntityStore;

/// Builder for a [`Provisioner`].
///
/// Every collaborator has a production default: [`HttpFetch`], the built-in
/// resolvers, [`ModrinthCatalog`], [`FirstMatch`] and [`JavaLauncher`] (used
/// to render start scripts).
pub struct ProvisionerBuilder {
    cfg: Config,
    store: Arc<dyn EntityStore>,
    fetch: Option<Arc<dyn Fetch>>,
    catalog: Option<Arc<dyn PackageCatalog>>,
    policy: Option<Arc<dyn MatchPolicy>>,
    resolvers: Vec<Arc<dyn ArtifactResolver>>,
    launcher: Option<Arc<dyn Launcher>>,
    bus: Option<Bus>,
}

impl ProvisionerBuilder {
    pub fn new(cfg: Config, store: Arc<dyn EntityStore>) -> Self {
        Self {
            cfg,
            store,
            fetch: None,
            catalog: None,
            policy: None,
            resolvers: Vec::new(),
            launcher: None,
            bus: None,
        }
    }

    /// Replaces the HTTP client (tests, proxies, mirrors).
    pub fn with_fetch(mut self, fetch: Arc<dyn Fetch>) -> Self {
        self.fetch = Some(fetch);
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn PackageCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Replaces [`FirstMatch`] for dependency resolution.
    pub fn with_policy(mut self, policy: Arc<dyn MatchPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Overrides the built-in resolver for `resolver.kind()`.
    pub fn with_resolver(mut self, resolver: Arc<dyn ArtifactResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Publishes provisioning events on an existing bus, typically the
    /// supervisor's.
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Builds the provisioner.
    ///
    /// Fails only when the default HTTP client cannot be constructed.
    pub fn build(self) -> Result<Arc<Provisioner>, FetchError> {
        let fetch: Arc<dyn Fetch> = match self.fetch {
            Some(fetch) => fetch,
            None => Arc::new(HttpFetch::new(&self.cfg)?),
        };
        let catalog = self
            .catalog
            .unwrap_or_else(|| Arc::new(ModrinthCatalog::new(Arc::clone(&fetch))));
        let policy = self.policy.unwrap_or_else(|| Arc::new(FirstMatch));
        let bus = self
            .bus
            .unwrap_or_else(|| Bus::new(self.cfg.bus_capacity));
        let launcher = self
            .launcher
            .unwrap_or_else(|| Arc::new(JavaLauncher::new()));

        let mut resolvers: HashMap<_, Arc<dyn ArtifactResolver>> = HashMap::new();
        for r in default_resolvers().into_iter().chain(self.resolvers) {
            resolvers.insert(r.kind(), r);
        }

        let installer = PackageInstaller::new(
            Arc::clone(&fetch),
            Arc::clone(&catalog),
            policy,
            bus.clone(),
        );
        Ok(Arc::new(Provisioner::new_internal(
            self.cfg, self.store, fetch, resolvers, catalog, installer, launcher, bus,
        )))
    }
}
