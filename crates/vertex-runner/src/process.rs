//! Local process backend.
//!
//! Runs a container as a child process forked from the instance directory.
//! The executable is resolved inside the instance tree: the manifest's
//! `script.filename` when declared, otherwise `./<service-id>` with a
//! `./<service-id>.sh` fallback. Stdout and stderr are piped through line
//! scanners; a wait task flips the status to `off` on exit, whatever the
//! cause.

use crate::error::{Result, RunnerError};
use crate::{Runner, RunnerHooks};
use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use vertex_container::{Container, ContainerId, ContainerUpdate, LogKind, LogLine, Status};

/// Grace period between the interrupt and the hard kill.
const STOP_GRACE: Duration = Duration::from_secs(10);

/// Runs containers as local child processes.
pub struct ProcessRunner {
    instances_dir: PathBuf,
    processes: Arc<Mutex<HashMap<ContainerId, u32>>>,
    shutdown: CancellationToken,
}

impl ProcessRunner {
    /// Creates a process runner over the given `instances/` directory.
    #[must_use]
    pub fn new(instances_dir: impl Into<PathBuf>, shutdown: CancellationToken) -> Self {
        Self {
            instances_dir: instances_dir.into(),
            processes: Arc::new(Mutex::new(HashMap::new())),
            shutdown,
        }
    }

    fn instance_dir(&self, container: &Container) -> PathBuf {
        self.instances_dir.join(container.id.to_string())
    }

    /// Resolves the command to run, relative to the instance directory.
    fn resolve_command(&self, container: &Container) -> Result<String> {
        let dir = self.instance_dir(container);
        let service_id = &container.service.id;

        let mut candidates = Vec::new();
        if let Some(script) = &container.service.methods.script {
            if let Some(filename) = &script.filename {
                candidates.push(filename.clone());
            }
        }
        candidates.push(service_id.clone());
        candidates.push(format!("{service_id}.sh"));

        candidates
            .into_iter()
            .find(|candidate| dir.join(candidate).is_file())
            .map(|candidate| format!("./{candidate}"))
            .ok_or_else(|| RunnerError::ExecutableNotFound(service_id.clone()))
    }

    fn pid_of(&self, id: ContainerId) -> Option<u32> {
        self.processes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&id)
            .copied()
    }
}

#[async_trait]
impl Runner for ProcessRunner {
    async fn start(&self, container: &Container, hooks: RunnerHooks) -> Result<()> {
        if self.pid_of(container.id).is_some() {
            tracing::error!(container_id = %container.id, "runner already started");
            return Err(RunnerError::StillRunning);
        }

        let dir = self.instance_dir(container);
        let command = self.resolve_command(container)?;

        tracing::info!(container_id = %container.id, %command, "spawning process");

        let mut cmd = Command::new(&command);
        cmd.current_dir(&dir)
            .envs(&container.env)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // The status flips to running before the fork, mirroring the
        // contract that start reports launch, not readiness.
        (hooks.set_status)(Status::Running);

        let mut child = cmd.spawn()?;

        if let Some(stdout) = child.stdout.take() {
            let on_log = Arc::clone(&hooks.on_log);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    on_log(LogLine::new(LogKind::Out, line));
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let on_log = Arc::clone(&hooks.on_log);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    on_log(LogLine::new(LogKind::Err, line));
                }
            });
        }

        if let Some(pid) = child.id() {
            self.processes
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .insert(container.id, pid);
        }

        let container_id = container.id;
        let processes = Arc::clone(&self.processes);
        let set_status = Arc::clone(&hooks.set_status);
        let token = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = child.wait() => {
                    match result {
                        Ok(status) if status.success() => {
                            tracing::info!(container_id = %container_id, "process exited");
                        }
                        Ok(status) => {
                            tracing::warn!(container_id = %container_id, %status, "process exited");
                        }
                        Err(err) => {
                            tracing::error!(container_id = %container_id, error = %err, "failed to wait on process");
                        }
                    }
                    processes
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .remove(&container_id);
                    set_status(Status::Off);
                }
                () = token.cancelled() => {}
            }
        });

        Ok(())
    }

    async fn stop(&self, container: &Container) -> Result<()> {
        let pid = self.pid_of(container.id).ok_or(RunnerError::NotRunning)?;

        kill(Pid::from_raw(pid as i32), Signal::SIGINT)?;

        // Escalate to a hard kill if the interrupt is ignored past the grace
        // period. The wait task clears the entry on exit.
        let container_id = container.id;
        let processes = Arc::clone(&self.processes);
        let token = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(STOP_GRACE) => {
                    let still_alive = processes
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .get(&container_id)
                        .copied()
                        == Some(pid);
                    if still_alive {
                        tracing::warn!(container_id = %container_id, pid, "process ignored interrupt, sending SIGKILL");
                        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
                    }
                }
                () = token.cancelled() => {
                    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
                }
            }
        });

        Ok(())
    }

    async fn delete(&self, container: &Container) -> Result<()> {
        if self.pid_of(container.id).is_some() {
            return Err(RunnerError::StillRunning);
        }
        Ok(())
    }

    async fn info(
        &self,
        container: &Container,
    ) -> Result<serde_json::Map<String, serde_json::Value>> {
        let mut info = serde_json::Map::new();
        info.insert("backend".to_string(), "process".into());
        match self.pid_of(container.id) {
            Some(pid) => info.insert("pid".to_string(), pid.into()),
            None => info.insert("pid".to_string(), serde_json::Value::Null),
        };
        Ok(info)
    }

    async fn check_for_updates(&self, _container: &Container) -> Result<Option<ContainerUpdate>> {
        // The process backend has no version source to compare against.
        Ok(None)
    }
}
