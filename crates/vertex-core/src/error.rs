//! Error types for the orchestration core.

use thiserror::Error;
use vertex_container::ContainerId;
use vertex_runner::RunnerError;
use vertex_store::StoreError;

/// Result type alias for supervisor operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur in the supervisor.
#[derive(Debug, Error)]
pub enum CoreError {
    /// No container registered under this ID.
    #[error("container {0} not found")]
    ContainerNotFound(ContainerId),

    /// Start was requested while the container is running.
    #[error("the container is already running")]
    AlreadyRunning,

    /// Delete was requested while the container is running.
    #[error("the container is still running")]
    StillRunning,

    /// Stop was requested while the container is not running.
    #[error("the container is not running")]
    NotRunning,

    /// A declared env variable has no value yet.
    #[error("the environment variable {0} has no value")]
    MissingEnv(String),

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Runner backend failure.
    #[error(transparent)]
    Runner(#[from] RunnerError),
}
