//! Error types for runner backends.

use thiserror::Error;

/// Result type alias for runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Errors that can occur in a runner backend.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The Docker daemon could not be reached at startup.
    #[error("the Docker daemon is not available")]
    DockerUnavailable,

    /// Docker API failure.
    #[error(transparent)]
    Docker(#[from] bollard::errors::Error),

    /// No Docker container exists under the expected name.
    #[error("no Docker container named {0}")]
    ContainerNotFound(String),

    /// The service declares neither a Dockerfile nor an image.
    #[error("no Docker methods found")]
    NoDockerMethod,

    /// An image build reported an error message.
    #[error("image build failed: {0}")]
    Build(String),

    /// The instance directory holds no runnable executable.
    #[error("the executable {0} (or {0}.sh) was not found in the instance directory")]
    ExecutableNotFound(String),

    /// The workload is not running.
    #[error("the workload is not running")]
    NotRunning,

    /// The workload is still running.
    #[error("the workload is still running")]
    StillRunning,

    /// Sending a signal to the child process failed.
    #[error("failed to signal process: {0}")]
    Signal(#[from] nix::Error),

    /// Filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
