//! Error types for the persistence layer.

use std::path::PathBuf;
use thiserror::Error;
use vertex_container::ContainerId;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No container registered under this ID.
    #[error("container {0} not found")]
    ContainerNotFound(ContainerId),

    /// No service with this ID in the catalog.
    #[error("service {0} not found")]
    ServiceNotFound(String),

    /// No open logger for this container.
    #[error("no open logger for container {0}")]
    LoggerNotFound(ContainerId),

    /// Install source uses a protocol Vertex does not know.
    #[error("this protocol is not supported: {0}")]
    UnsupportedProtocol(String),

    /// The instance directory has no service manifest.
    #[error("no service manifest at {0}")]
    ManifestNotFound(PathBuf),

    /// A service manifest could not be parsed.
    #[error("invalid service manifest: {0}")]
    Manifest(#[from] serde_yaml::Error),

    /// A settings file could not be parsed or written.
    #[error("invalid settings file: {0}")]
    Settings(#[from] serde_json::Error),

    /// `git clone` failed.
    #[error("git clone failed: {0}")]
    GitClone(String),

    /// Filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
