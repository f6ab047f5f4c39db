//! Error types used by the supervisor, the entity store and the provisioning pipeline.
//!
//! This module defines the error enums raised by each component:
//!
//! - [`SupervisorError`]: start/stop/restart/command failures of the [`Supervisor`](crate::Supervisor).
//! - [`ProvisionError`]: artifact download and package install failures.
//! - [`FetchError`]: transport-level failures of a [`Fetch`](crate::Fetch) implementation.
//! - [`StoreError`]: failures of the [`EntityStore`](crate::EntityStore) collaborator.
//!
//! Every enum provides `as_label` (stable snake_case label for logs/metrics) and
//! `kind`, which maps the error onto the shared [`ErrorKind`] taxonomy so the
//! transport layer can pick a status code without matching every variant.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::entity::{EntityId, EntityStatus, ProcessKind};

/// Coarse classification shared by all error enums of the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Entity, version or package absent.
    NotFound,
    /// Already running / not running.
    Conflict,
    /// Acceptance flag unset or artifact missing.
    PreconditionUnmet,
    /// Catalog or network failure.
    ExternalUnavailable,
    /// Pipe or filesystem read/write broken.
    IoFailure,
    /// A bounded wait was exceeded.
    Timeout,
}

impl ErrorKind {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::PreconditionUnmet => "precondition_unmet",
            ErrorKind::ExternalUnavailable => "external_unavailable",
            ErrorKind::IoFailure => "io_failure",
            ErrorKind::Timeout => "timeout",
        }
    }
}

/// # Errors produced by the entity store collaborator.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum StoreError {
    /// No entity is stored under this id.
    #[error("entity {id} not found")]
    NotFound {
        /// The requested id.
        id: EntityId,
    },

    /// The backing storage failed.
    #[error("entity store backend failed: {reason}")]
    Backend {
        /// Backend-specific description.
        reason: String,
    },
}

impl StoreError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            StoreError::NotFound { .. } => "store_not_found",
            StoreError::Backend { .. } => "store_backend",
        }
    }

    /// Maps the error onto the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::Backend { .. } => ErrorKind::IoFailure,
        }
    }
}

/// # Errors produced by the process supervisor.
///
/// Returned by [`Supervisor::start`](crate::Supervisor::start),
/// [`Supervisor::stop`](crate::Supervisor::stop) and friends.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// The entity does not exist in the store.
    #[error("entity {id} not found")]
    NotFound {
        /// The requested id.
        id: EntityId,
    },

    /// A process is already registered for this entity.
    #[error("entity {id} is already running")]
    AlreadyRunning {
        /// The entity id.
        id: EntityId,
    },

    /// No process is registered for this entity.
    #[error("entity {id} is not running")]
    NotRunning {
        /// The entity id.
        id: EntityId,
    },

    /// The acceptance flag has not been set.
    #[error("entity {id}: precondition not accepted")]
    PreconditionUnmet {
        /// The entity id.
        id: EntityId,
    },

    /// The id cannot name a directory under the data directory.
    #[error("entity id \"{id}\" is not a valid directory name")]
    InvalidId {
        /// The rejected id.
        id: EntityId,
    },

    /// The provisioned artifact is absent (download failed or still in progress).
    #[error("entity {id}: artifact missing at {}", .path.display())]
    ArtifactMissing {
        /// The entity id.
        id: EntityId,
        /// Where the artifact was expected.
        path: PathBuf,
    },

    /// The OS refused to spawn the process.
    #[error("entity {id}: failed to spawn process: {source}")]
    Spawn {
        /// The entity id.
        id: EntityId,
        /// Underlying spawn failure.
        #[source]
        source: std::io::Error,
    },

    /// The command channel is closed or broken.
    #[error("entity {id}: command channel write failed: {source}")]
    WriteFailed {
        /// The entity id.
        id: EntityId,
        /// Underlying write failure.
        #[source]
        source: std::io::Error,
    },

    /// The process survived every termination step within the configured bounds.
    #[error("entity {id}: process not reaped {waited:?} after kill")]
    ShutdownTimeout {
        /// The entity id.
        id: EntityId,
        /// How long the supervisor waited after the unconditional kill.
        waited: Duration,
    },

    /// A file in the entity directory could not be written.
    #[error("entity {id}: io failure on {}: {source}", .path.display())]
    Io {
        /// The entity id.
        id: EntityId,
        /// The file being written.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// The entity store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SupervisorError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use servervisor::{EntityId, SupervisorError};
    ///
    /// let err = SupervisorError::NotRunning { id: EntityId::from("e1") };
    /// assert_eq!(err.as_label(), "supervisor_not_running");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            SupervisorError::NotFound { .. } => "supervisor_not_found",
            SupervisorError::AlreadyRunning { .. } => "supervisor_already_running",
            SupervisorError::NotRunning { .. } => "supervisor_not_running",
            SupervisorError::PreconditionUnmet { .. } => "supervisor_precondition_unmet",
            SupervisorError::InvalidId { .. } => "supervisor_invalid_id",
            SupervisorError::ArtifactMissing { .. } => "supervisor_artifact_missing",
            SupervisorError::Spawn { .. } => "supervisor_spawn_failed",
            SupervisorError::WriteFailed { .. } => "supervisor_write_failed",
            SupervisorError::ShutdownTimeout { .. } => "supervisor_shutdown_timeout",
            SupervisorError::Io { .. } => "supervisor_io",
            SupervisorError::Store(e) => e.as_label(),
        }
    }

    /// Maps the error onto the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SupervisorError::NotFound { .. } => ErrorKind::NotFound,
            SupervisorError::AlreadyRunning { .. } | SupervisorError::NotRunning { .. } => {
                ErrorKind::Conflict
            }
            SupervisorError::PreconditionUnmet { .. }
            | SupervisorError::InvalidId { .. }
            | SupervisorError::ArtifactMissing { .. } => ErrorKind::PreconditionUnmet,
            SupervisorError::Spawn { .. }
            | SupervisorError::WriteFailed { .. }
            | SupervisorError::Io { .. } => ErrorKind::IoFailure,
            SupervisorError::ShutdownTimeout { .. } => ErrorKind::Timeout,
            SupervisorError::Store(e) => e.kind(),
        }
    }
}

/// # Transport errors produced by a [`Fetch`](crate::Fetch) implementation.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum FetchError {
    /// The remote answered with a non-success status.
    #[error("GET {url} returned status {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// The request never produced a response (DNS, TLS, connection, timeout).
    #[error("GET {url} failed: {reason}")]
    Transport {
        /// Requested URL.
        url: String,
        /// Transport description.
        reason: String,
    },

    /// The response body was not the expected JSON document.
    #[error("GET {url} returned an unreadable body: {reason}")]
    Parse {
        /// Requested URL.
        url: String,
        /// Parser description.
        reason: String,
    },

    /// Writing the downloaded body failed.
    #[error("writing {} failed: {source}", .path.display())]
    Io {
        /// Destination file.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            FetchError::Status { .. } => "fetch_status",
            FetchError::Transport { .. } => "fetch_transport",
            FetchError::Parse { .. } => "fetch_parse",
            FetchError::Io { .. } => "fetch_io",
        }
    }

    /// True when the remote explicitly reported the resource as absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::Status { status: 404, .. })
    }
}

/// # Errors produced by artifact acquisition and package installation.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// The catalog does not list the requested version.
    #[error("{kind} version {version} not found in catalog")]
    VersionNotFound {
        /// Process kind whose catalog was consulted.
        kind: ProcessKind,
        /// Requested version.
        version: String,
    },

    /// The catalog could not be queried or returned an unusable listing.
    #[error("catalog {catalog} unavailable: {source}")]
    CatalogUnavailable {
        /// Catalog name.
        catalog: &'static str,
        /// Underlying transport failure.
        #[source]
        source: FetchError,
    },

    /// The artifact or package file could not be transferred.
    #[error("download failed: {source}")]
    DownloadFailed {
        /// Underlying transport failure.
        #[source]
        source: FetchError,
    },

    /// The package catalog has no such package version.
    #[error("package version {version_id} not found")]
    PackageNotFound {
        /// Requested version id.
        version_id: String,
    },

    /// The package version lists no file.
    #[error("package version {version_id} has no downloadable file")]
    NoDownloadableFile {
        /// Requested version id.
        version_id: String,
    },

    /// The entity's process kind cannot host packages.
    #[error("{kind} servers do not support packages")]
    Unsupported {
        /// Offending process kind.
        kind: ProcessKind,
    },

    /// A package file name would escape the package directory.
    #[error("invalid package file name {name:?}")]
    InvalidFileName {
        /// Rejected file name.
        name: String,
    },

    /// A local file operation failed.
    #[error("io failure on {}: {source}", .path.display())]
    Io {
        /// Affected path.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// The entity is running or being stopped and its files are in use.
    #[error("entity {id} is {status}, refusing to provision")]
    Busy {
        /// The entity id.
        id: EntityId,
        /// Status found in the store.
        status: EntityStatus,
    },

    /// The id cannot name a directory under the data directory.
    #[error("entity id \"{id}\" is not a valid directory name")]
    InvalidId {
        /// The rejected id.
        id: EntityId,
    },

    /// The provisioning task ended without producing a result.
    #[error("provisioning task for {id} aborted")]
    Aborted {
        /// The entity id.
        id: EntityId,
    },

    /// The entity store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProvisionError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use servervisor::{ProcessKind, ProvisionError};
    ///
    /// let err = ProvisionError::VersionNotFound { kind: ProcessKind::Vanilla, version: "0.0".into() };
    /// assert_eq!(err.as_label(), "provision_version_not_found");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ProvisionError::VersionNotFound { .. } => "provision_version_not_found",
            ProvisionError::CatalogUnavailable { .. } => "provision_catalog_unavailable",
            ProvisionError::DownloadFailed { .. } => "provision_download_failed",
            ProvisionError::PackageNotFound { .. } => "provision_package_not_found",
            ProvisionError::NoDownloadableFile { .. } => "provision_no_file",
            ProvisionError::Unsupported { .. } => "provision_unsupported",
            ProvisionError::InvalidFileName { .. } => "provision_invalid_file_name",
            ProvisionError::Io { .. } => "provision_io",
            ProvisionError::Busy { .. } => "provision_busy",
            ProvisionError::InvalidId { .. } => "provision_invalid_id",
            ProvisionError::Aborted { .. } => "provision_aborted",
            ProvisionError::Store(e) => e.as_label(),
        }
    }

    /// Maps the error onto the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProvisionError::VersionNotFound { .. }
            | ProvisionError::PackageNotFound { .. }
            | ProvisionError::NoDownloadableFile { .. } => ErrorKind::NotFound,
            ProvisionError::CatalogUnavailable { .. } | ProvisionError::DownloadFailed { .. } => {
                ErrorKind::ExternalUnavailable
            }
            ProvisionError::Unsupported { .. }
            | ProvisionError::InvalidFileName { .. }
            | ProvisionError::InvalidId { .. } => ErrorKind::PreconditionUnmet,
            ProvisionError::Busy { .. } => ErrorKind::Conflict,
            ProvisionError::Io { .. } | ProvisionError::Aborted { .. } => ErrorKind::IoFailure,
            ProvisionError::Store(e) => e.kind(),
        }
    }
}
