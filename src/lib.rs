// ============================================
// officedeploy - Office deployment core
// ============================================
// Finds what Office products are installed, fetches the Office
// Deployment Tool from the vendor site, and writes the configuration
// documents that tell it what to install or remove.
//
// Modules:
//   registry       - read-only registry access with a value cache
//   inventory      - installed Click-to-Run / MSI products
//   resolver       - deployment tool URL + size from the vendor page
//   download       - resumable, verified, cancellable download
//   configuration  - configuration.xml for install / uninstall
//   workspace      - working folders and cleanup
//
// The binary (main.rs) is one caller. Everything here is synchronous;
// run it off the UI thread.
// ============================================

pub mod cache;
pub mod catalog;
pub mod config;
pub mod configuration;
pub mod download;
pub mod error;
pub mod inventory;
pub mod logging;
pub mod registry;
pub mod resolver;
pub mod retry;
pub mod workspace;

use std::path::Path;

use tracing::{info, warn};

pub use catalog::{Architecture, OfficeVersion, ProductFamily};
pub use config::Settings;
pub use configuration::{ConfigurationBuilder, ConfigurationDocument, InstallOptions};
pub use download::{CancellationToken, DownloadManager, DownloadOutcome};
pub use error::{BuildError, ConfigError, DownloadError, DownloadErrorKind, Error, RegistryAccessError, ResolutionError};
pub use inventory::{Installation, InstallationInventory};
pub use registry::RegistryAccessor;
pub use resolver::{ArtifactDescriptor, ArtifactResolver, ResolverCache};
pub use workspace::Workspace;

/// Everything a caller needs, wired to one set of settings.
///
/// Owns the registry value cache and the resolver cache, so one
/// `OfficeCore` per process keeps lookups warm between operations.
pub struct OfficeCore {
    registry: RegistryAccessor,
    resolver: ArtifactResolver,
    downloader: DownloadManager,
}

impl OfficeCore {
    /// Core backed by the machine's registry.
    pub fn new(settings: &Settings) -> Result<Self, Error> {
        Self::with_registry(settings, RegistryAccessor::system())
    }

    pub fn with_registry(settings: &Settings, registry: RegistryAccessor) -> Result<Self, Error> {
        let cache = ResolverCache::new(settings.resolver.cache_capacity);
        let resolver = ArtifactResolver::new(settings, cache)?;
        let downloader = DownloadManager::new(settings)?;
        Ok(Self::from_parts(registry, resolver, downloader))
    }

    pub fn from_parts(registry: RegistryAccessor, resolver: ArtifactResolver, downloader: DownloadManager) -> Self {
        Self {
            registry,
            resolver,
            downloader,
        }
    }

    pub fn resolver(&self) -> &ArtifactResolver {
        &self.resolver
    }

    pub fn scan_installations(&self) -> Vec<Installation> {
        InstallationInventory::new(&self.registry).scan()
    }

    pub fn resolve_artifact(&self, family: ProductFamily, arch: Architecture) -> Result<ArtifactDescriptor, Error> {
        Ok(self.resolver.resolve(family, arch)?)
    }

    /// Download without progress reporting or cancellation.
    pub fn download_artifact(&self, descriptor: &ArtifactDescriptor, destination: &Path) -> Result<DownloadOutcome, Error> {
        let outcome = self
            .downloader
            .download(descriptor, destination, &CancellationToken::new(), |_, _| {})?;
        Ok(outcome)
    }

    /// Resolve and download in one step.
    ///
    /// A size or name mismatch means the cached descriptor no longer
    /// matches what the vendor serves. The entry is dropped, the page is
    /// resolved again, and the download is retried once if the fresh
    /// descriptor differs.
    pub fn fetch_artifact(
        &self,
        family: ProductFamily,
        arch: Architecture,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome, Error> {
        let descriptor = self.resolver.resolve(family, arch)?;

        let err = match self.downloader.download(&descriptor, destination, cancel, |_, _| {}) {
            Ok(outcome) => return Ok(outcome),
            Err(e) if e.is_validation_failure() => e,
            Err(e) => return Err(e.into()),
        };

        warn!(%family, %arch, kind = %err.kind, "downloaded artifact did not match descriptor; resolving again");
        self.resolver.invalidate(family, arch);
        let fresh = self.resolver.refresh(family, arch)?;
        if fresh == descriptor {
            self.resolver.invalidate(family, arch);
            return Err(err.into());
        }

        info!(%family, %arch, size = fresh.expected_size_bytes, "retrying download with fresh descriptor");
        match self.downloader.download(&fresh, destination, cancel, |_, _| {}) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if e.is_validation_failure() {
                    self.resolver.invalidate(family, arch);
                }
                Err(e.into())
            }
        }
    }

    pub fn build_uninstall_document(&self, selection: &[Installation]) -> Result<ConfigurationDocument, Error> {
        Ok(ConfigurationBuilder::build_uninstall(selection)?)
    }

    pub fn build_install_document(&self, options: &InstallOptions) -> Result<ConfigurationDocument, Error> {
        Ok(ConfigurationBuilder::build_install(options)?)
    }
}
