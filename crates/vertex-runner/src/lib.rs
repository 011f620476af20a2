//! # vertex-runner
//!
//! Execution backends for Vertex containers. Both backends implement the
//! [`Runner`] contract:
//!
//! - [`DockerRunner`] drives the local Docker daemon (build or pull, create,
//!   start, stop, log tail, exit wait).
//! - [`ProcessRunner`] forks a local executable from the instance directory
//!   and captures its stdio.
//!
//! `start` returns once the workload is launched, not once it exits; log
//! tailing and exit watching continue in background tasks that report
//! through the [`RunnerHooks`] handed over at start time. Passing the
//! callbacks per call keeps runners free of any supervisor handle.

pub mod docker;
pub mod error;
pub mod process;

pub use docker::DockerRunner;
pub use error::{Result, RunnerError};
pub use process::ProcessRunner;

use async_trait::async_trait;
use std::sync::Arc;
use vertex_container::{Container, ContainerUpdate, LogLine, Status};

/// Callbacks wired into a runner for one start cycle.
///
/// All three are thread-safe and may keep being invoked from background
/// tasks long after the originating command returned.
#[derive(Clone)]
pub struct RunnerHooks {
    /// Receives workload and progress log lines.
    pub on_log: Arc<dyn Fn(LogLine) + Send + Sync>,
    /// Receives error messages destined for the container's log.
    pub on_err: Arc<dyn Fn(String) + Send + Sync>,
    /// Receives status transitions, in issue order.
    pub set_status: Arc<dyn Fn(Status) + Send + Sync>,
}

/// A backend that can execute containers.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Prepares and launches the workload.
    ///
    /// May transition the status through `building → starting → running` via
    /// the hooks. Spawns background tasks for log tailing and exit watching;
    /// the exit watcher is the one that eventually reports `off`.
    ///
    /// # Errors
    ///
    /// Returns an error if the workload cannot be prepared or launched.
    async fn start(&self, container: &Container, hooks: RunnerHooks) -> Result<()>;

    /// Requests graceful termination.
    ///
    /// Returns once the stop signal has been issued; the exit is observed
    /// asynchronously by the watcher spawned in [`Runner::start`].
    ///
    /// # Errors
    ///
    /// Returns an error if no workload exists or the signal cannot be sent.
    async fn stop(&self, container: &Container) -> Result<()>;

    /// Removes all backend-side resources.
    ///
    /// # Errors
    ///
    /// Fails if the workload is still running.
    async fn delete(&self, container: &Container) -> Result<()>;

    /// Opaque diagnostic snapshot of the backend resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource cannot be inspected.
    async fn info(&self, container: &Container)
        -> Result<serde_json::Map<String, serde_json::Value>>;

    /// Checks whether a newer version of the workload is available.
    ///
    /// Returns `None` when the backend cannot determine an update or the
    /// container is already up to date.
    ///
    /// # Errors
    ///
    /// Returns an error if the check itself fails.
    async fn check_for_updates(&self, container: &Container) -> Result<Option<ContainerUpdate>>;
}
