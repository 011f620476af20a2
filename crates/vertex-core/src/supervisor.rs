//! The container lifecycle supervisor.
//!
//! Commands load and mutate containers through the store, dispatch to the
//! backend selected by `use_docker`, and wire the runner's callbacks through
//! the log pipeline and the event bus. Each container carries a per-ID mutex
//! so at most one `start`, `stop`, or `delete` runs at a time; runner
//! callbacks stay valid after the originating command returned.
//!
//! Status discipline: the supervisor and the runners move a container
//! through `building → starting → running`, and only the runner's exit
//! watcher (or a failed start) leaves that cycle, so per-container
//! transitions are totally ordered and observers on the bus see them in
//! issue order.

use crate::error::{CoreError, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use vertex_container::{
    Container, ContainerId, ContainerSettings, Event, EventBus, LogKind, LogLine, Status,
};
use vertex_runner::{DockerRunner, ProcessRunner, Runner, RunnerError, RunnerHooks};
use vertex_store::{ContainerStore, InstallOptions, LogPipeline, StoreError};

/// Deadline for every running container to reach `off` during `stop_all`.
const STOP_ALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Partial settings accepted by [`Supervisor::patch_settings`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsPatch {
    pub display_name: Option<String>,
    pub launch_on_startup: Option<bool>,
    pub tags: Option<BTreeSet<String>>,
    pub version: Option<String>,
    pub databases: Option<BTreeMap<String, ContainerId>>,
}

/// Orchestrates container lifecycles over the store, runners, logs, and bus.
pub struct Supervisor {
    store: Arc<ContainerStore>,
    logs: Arc<LogPipeline>,
    docker: Arc<DockerRunner>,
    process: Arc<ProcessRunner>,
    bus: EventBus,
    ops: StdMutex<HashMap<ContainerId, Arc<Mutex<()>>>>,
}

impl Supervisor {
    /// Creates a supervisor over the given components.
    #[must_use]
    pub fn new(
        store: Arc<ContainerStore>,
        logs: Arc<LogPipeline>,
        docker: Arc<DockerRunner>,
        process: Arc<ProcessRunner>,
        bus: EventBus,
    ) -> Self {
        Self {
            store,
            logs,
            docker,
            process,
            bus,
            ops: StdMutex::new(HashMap::new()),
        }
    }

    fn ops_lock(&self, id: ContainerId) -> Arc<Mutex<()>> {
        let mut ops = self
            .ops
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(ops.entry(id).or_default())
    }

    fn runner_for(&self, container: &Container) -> Arc<dyn Runner> {
        if container.use_docker {
            Arc::clone(&self.docker) as Arc<dyn Runner>
        } else {
            Arc::clone(&self.process) as Arc<dyn Runner>
        }
    }

    /// Builds the callbacks handed to a runner for one start cycle.
    ///
    /// The closures capture the store, logs, and bus directly so the runner
    /// never holds a supervisor handle.
    fn hooks_for(&self, id: ContainerId) -> RunnerHooks {
        let store = Arc::clone(&self.store);
        let bus = self.bus.clone();
        let set_status = Arc::new(move |status: Status| {
            let mut changed = false;
            let updated = store.update(id, |c| {
                if c.status != status {
                    c.status = status;
                    changed = true;
                }
            });
            match updated {
                Ok(()) if changed => bus.publish(Event::StatusChange {
                    container_id: id,
                    status,
                }),
                Ok(()) => {}
                Err(_) => {
                    tracing::warn!(container_id = %id, "status change for unregistered container dropped");
                }
            }
        });

        let logs = Arc::clone(&self.logs);
        let on_log = Arc::new(move |line: LogLine| logs.push(id, line));

        let logs = Arc::clone(&self.logs);
        let on_err = Arc::new(move |message: String| {
            logs.push(id, LogLine::new(LogKind::VertexErr, message));
        });

        RunnerHooks {
            on_log,
            on_err,
            set_status,
        }
    }

    fn push_log(&self, id: ContainerId, kind: LogKind, message: impl Into<String>) {
        self.logs.push(id, LogLine::new(kind, message));
    }

    /// Returns one container.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ContainerNotFound`] if the container is not
    /// registered.
    pub fn get(&self, id: ContainerId) -> Result<Container> {
        self.store.get(id).ok_or(CoreError::ContainerNotFound(id))
    }

    /// Returns every registered container.
    #[must_use]
    pub fn get_all(&self) -> Vec<Container> {
        self.store.get_all()
    }

    /// Returns containers matching every requested feature.
    #[must_use]
    pub fn search(&self, features: &[String]) -> Vec<Container> {
        self.store.search(features)
    }

    /// Installs a container from a prefixed source string.
    ///
    /// # Errors
    ///
    /// Returns an error for unsupported protocols, fetch failures, or
    /// persistence failures.
    pub async fn install(&self, source: &str, opts: InstallOptions) -> Result<Container> {
        let container = self.store.install(source, opts).await?;
        tracing::info!(container_id = %container.id, service = %container.service.id, "container installed");
        self.bus.publish(Event::ContainersChange);
        Ok(container)
    }

    /// Starts a container.
    ///
    /// Opens the logger, validates env coverage, and dispatches to the
    /// runner. On failure the status is set to `error` and a `vertex_err`
    /// line records the cause.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AlreadyRunning`] when the container is running,
    /// [`CoreError::MissingEnv`] when a declared variable has no value, or
    /// the runner's error.
    pub async fn start(&self, id: ContainerId) -> Result<()> {
        let lock = self.ops_lock(id);
        let _guard = lock.lock().await;

        let container = self.get(id)?;
        self.logs.open(id)?;
        self.push_log(id, LogKind::VertexOut, "Starting container...");
        tracing::info!(container_id = %id, "starting container");

        if container.is_running() {
            let err = CoreError::AlreadyRunning;
            self.push_log(id, LogKind::VertexErr, err.to_string());
            return Err(err);
        }

        for def in &container.service.env {
            if !container.env.contains_key(&def.name) {
                let err = CoreError::MissingEnv(def.name.clone());
                self.push_log(id, LogKind::VertexErr, err.to_string());
                return Err(err);
            }
        }

        let runner = self.runner_for(&container);
        let hooks = self.hooks_for(id);
        match runner.start(&container, hooks).await {
            Ok(()) => {
                self.push_log(id, LogKind::VertexOut, "Container started.");
                tracing::info!(container_id = %id, "container started");
                Ok(())
            }
            Err(err) => {
                self.push_log(id, LogKind::VertexErr, err.to_string());
                self.set_status(id, Status::Error);
                Err(err.into())
            }
        }
    }

    fn set_status(&self, id: ContainerId, status: Status) {
        (self.hooks_for(id).set_status)(status);
    }

    /// Stops a container.
    ///
    /// Returns once the stop request has been issued; the exit is observed
    /// asynchronously by the runner's watcher, which flips the status to
    /// `off`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotRunning`] when the container is not running,
    /// or the runner's error.
    pub async fn stop(&self, id: ContainerId) -> Result<()> {
        let lock = self.ops_lock(id);
        let _guard = lock.lock().await;

        let container = self.get(id)?;
        self.push_log(id, LogKind::VertexOut, "Stopping container...");
        tracing::info!(container_id = %id, "stopping container");

        if !container.is_running() {
            let err = CoreError::NotRunning;
            self.push_log(id, LogKind::VertexErr, err.to_string());
            return Err(err);
        }

        let runner = self.runner_for(&container);
        match runner.stop(&container).await {
            Ok(()) => {
                self.push_log(id, LogKind::VertexOut, "Container stopped.");
                tracing::info!(container_id = %id, "container stopped");
                Ok(())
            }
            Err(err) => {
                self.push_log(id, LogKind::VertexErr, err.to_string());
                Err(err.into())
            }
        }
    }

    /// Deletes a container.
    ///
    /// The Docker-side container, when one exists, is removed first; its
    /// absence is tolerated with a warning. The instance directory and the
    /// registry entry go last.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StillRunning`] while the container is running.
    pub async fn delete(&self, id: ContainerId) -> Result<()> {
        let lock = self.ops_lock(id);
        let _guard = lock.lock().await;

        let container = self.get(id)?;
        if container.is_running() {
            return Err(CoreError::StillRunning);
        }

        let runner = self.runner_for(&container);
        match runner.delete(&container).await {
            Ok(()) => {}
            Err(RunnerError::ContainerNotFound(name)) => {
                tracing::warn!(container_id = %id, container_name = %name, "no runner resource to remove");
            }
            Err(RunnerError::StillRunning) => return Err(CoreError::StillRunning),
            Err(err) => return Err(err.into()),
        }

        if let Err(err) = self.logs.close(id) {
            tracing::debug!(container_id = %id, error = %err, "no logger to close");
        }

        self.store.delete(id)?;
        tracing::info!(container_id = %id, "container deleted");
        self.bus.publish(Event::ContainersChange);
        Ok(())
    }

    /// Starts every container whose settings ask for launch on startup.
    pub async fn start_all(&self) {
        let ids: Vec<ContainerId> = self
            .get_all()
            .into_iter()
            .filter(|c| c.settings.launch_on_startup == Some(true))
            .map(|c| c.id)
            .collect();

        let starts = ids.into_iter().map(|id| async move {
            if let Err(err) = self.start(id).await {
                tracing::error!(container_id = %id, error = %err, "failed to start container on boot");
            }
        });
        futures::future::join_all(starts).await;
    }

    /// Stops every running container and waits, up to a bounded deadline,
    /// for all of them to reach `off`.
    pub async fn stop_all(&self) {
        let running: Vec<ContainerId> = self
            .get_all()
            .into_iter()
            .filter(Container::is_running)
            .map(|c| c.id)
            .collect();

        for id in &running {
            if let Err(err) = self.stop(*id).await {
                tracing::error!(container_id = %id, error = %err, "failed to stop container");
            }
        }

        let deadline = Instant::now() + STOP_ALL_TIMEOUT;
        loop {
            let still_running: Vec<ContainerId> = self
                .get_all()
                .into_iter()
                .filter(Container::is_running)
                .map(|c| c.id)
                .collect();
            if still_running.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    containers = ?still_running,
                    "containers did not reach off before the shutdown deadline"
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Replaces a container's env atomically on disk and in memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is unknown or the write fails.
    pub fn patch_env(&self, id: ContainerId, env: BTreeMap<String, String>) -> Result<()> {
        self.store.write_env(id, env).map_err(|err| match err {
            StoreError::ContainerNotFound(id) => CoreError::ContainerNotFound(id),
            other => other.into(),
        })
    }

    /// Merges a partial settings update and persists the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is unknown or the write fails.
    pub fn patch_settings(&self, id: ContainerId, patch: SettingsPatch) -> Result<()> {
        if !self.store.exists(id) {
            return Err(CoreError::ContainerNotFound(id));
        }
        self.store.update(id, |c| {
            let ContainerSettings {
                display_name,
                launch_on_startup,
                tags,
                version,
                databases,
            } = &mut c.settings;
            if let Some(value) = patch.display_name {
                *display_name = value;
            }
            if let Some(value) = patch.launch_on_startup {
                *launch_on_startup = Some(value);
            }
            if let Some(value) = patch.tags {
                *tags = value;
            }
            if let Some(value) = patch.version {
                *version = Some(value);
            }
            if let Some(value) = patch.databases {
                *databases = value;
            }
        })?;
        self.store.save_settings(id)?;
        Ok(())
    }

    /// Runs the backend's update check for every container and returns the
    /// refreshed list. Per-container failures are logged, not propagated.
    pub async fn check_for_updates(&self) -> Vec<Container> {
        for container in self.get_all() {
            let id = container.id;
            let runner = self.runner_for(&container);
            match runner.check_for_updates(&container).await {
                Ok(update) => {
                    let _ = self.store.update(id, |c| c.update = update);
                }
                Err(err) => {
                    tracing::error!(container_id = %id, error = %err, "update check failed");
                }
            }
        }
        self.get_all()
    }

    /// Returns the buffered log lines of a container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is unknown or has no open logger.
    pub fn logs_buffer(&self, id: ContainerId) -> Result<Vec<LogLine>> {
        if !self.store.exists(id) {
            return Err(CoreError::ContainerNotFound(id));
        }
        Ok(self.logs.load_buffer(id)?)
    }

    /// Returns the runner's diagnostic snapshot for a container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is unknown or the backend cannot
    /// inspect it.
    pub async fn info(
        &self,
        id: ContainerId,
    ) -> Result<serde_json::Map<String, serde_json::Value>> {
        let container = self.get(id)?;
        Ok(self.runner_for(&container).info(&container).await?)
    }
}
