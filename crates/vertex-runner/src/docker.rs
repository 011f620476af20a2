//! Docker daemon backend.
//!
//! Talks to the local Docker daemon through [`bollard`]. Each container maps
//! to one Docker container named `VERTEX_CONTAINER_<id>`; Dockerfile
//! services additionally own an image tagged `vertex_image_<id>`.
//!
//! The daemon is looked up through the standard environment (`DOCKER_HOST`
//! and friends) with API version negotiation. When no daemon is reachable
//! the backend stays constructed but disabled, and every operation fails
//! with [`RunnerError::DockerUnavailable`]; the process backend remains
//! usable.

use crate::error::{Result, RunnerError};
use crate::{Runner, RunnerHooks};
use async_trait::async_trait;
use bollard::body_full;
use bollard::models::{ContainerCreateBody, ContainerSummary, HostConfig, PortBinding, PortMap};
use bollard::query_parameters::{
    BuildImageOptionsBuilder, CreateContainerOptions, CreateImageOptionsBuilder,
    InspectContainerOptions, ListContainersOptionsBuilder, LogsOptionsBuilder,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    WaitContainerOptionsBuilder,
};
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use vertex_container::{
    Container, ContainerId, ContainerUpdate, DockerMethod, EnvType, LogKind, LogLine, Status,
};

/// Runs containers through the local Docker daemon.
pub struct DockerRunner {
    docker: Option<Docker>,
    instances_dir: PathBuf,
    shutdown: CancellationToken,
}

impl DockerRunner {
    /// Connects to the Docker daemon.
    ///
    /// A connection failure disables the backend instead of failing startup.
    pub async fn connect(instances_dir: impl Into<PathBuf>, shutdown: CancellationToken) -> Self {
        let docker = match Docker::connect_with_defaults() {
            Ok(client) => match client.negotiate_version().await {
                Ok(client) => Some(client),
                Err(err) => {
                    tracing::warn!(error = %err, "couldn't negotiate with the Docker daemon, Docker backend disabled");
                    None
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "couldn't connect to the Docker daemon, Docker backend disabled");
                None
            }
        };

        Self {
            docker,
            instances_dir: instances_dir.into(),
            shutdown,
        }
    }

    /// Creates a runner with no daemon connection.
    ///
    /// Every operation fails with [`RunnerError::DockerUnavailable`]. Used
    /// where the daemon is knowingly absent.
    #[must_use]
    pub fn disabled(instances_dir: impl Into<PathBuf>, shutdown: CancellationToken) -> Self {
        Self {
            docker: None,
            instances_dir: instances_dir.into(),
            shutdown,
        }
    }

    /// Returns whether the daemon is reachable.
    #[must_use]
    pub const fn available(&self) -> bool {
        self.docker.is_some()
    }

    fn client(&self) -> Result<&Docker> {
        self.docker.as_ref().ok_or(RunnerError::DockerUnavailable)
    }

    fn instance_dir(&self, container: &Container) -> PathBuf {
        self.instances_dir.join(container.id.to_string())
    }

    async fn find_container(&self, name: &str) -> Result<Option<ContainerSummary>> {
        let client = self.client()?;
        let options = ListContainersOptionsBuilder::default().all(true).build();
        let containers = client.list_containers(Some(options)).await?;

        let slash_name = format!("/{name}");
        Ok(containers.into_iter().find(|summary| {
            summary
                .names
                .iter()
                .flatten()
                .any(|candidate| candidate == &slash_name)
        }))
    }

    async fn find_container_id(&self, name: &str) -> Result<Option<String>> {
        Ok(self.find_container(name).await?.and_then(|c| c.id))
    }

    async fn require_container_id(&self, name: &str) -> Result<String> {
        self.find_container_id(name)
            .await?
            .ok_or_else(|| RunnerError::ContainerNotFound(name.to_string()))
    }

    async fn build_image_from_dockerfile(
        &self,
        instance_dir: &Path,
        image_name: &str,
        hooks: &RunnerHooks,
    ) -> Result<()> {
        let client = self.client()?;
        let context = tar_directory(instance_dir)?;

        let options = BuildImageOptionsBuilder::default()
            .dockerfile("Dockerfile")
            .t(image_name)
            .rm(true)
            .build();

        let mut stream = client.build_image(options, None, Some(body_full(context.into())));
        while let Some(message) = stream.next().await {
            let info = message?;
            if let Some(error) = info.error {
                return Err(RunnerError::Build(error));
            }
            if let Some(text) = info.stream {
                let text = text.trim_end();
                if !text.is_empty() {
                    (hooks.on_log)(LogLine::new(LogKind::Out, text));
                }
            }
        }

        tracing::info!(image_name, "image built");
        Ok(())
    }

    async fn pull_image(&self, image: &str, on_progress: impl Fn(String)) -> Result<()> {
        let client = self.client()?;
        let options = CreateImageOptionsBuilder::default().from_image(image).build();

        let mut stream = client.create_image(Some(options), None, None);
        while let Some(message) = stream.next().await {
            let info = message?;
            if let Some(status) = info.status {
                let line = match info.progress {
                    Some(progress) => format!("{status} {progress}"),
                    None => status,
                };
                on_progress(line);
            }
        }
        Ok(())
    }

    async fn create_container(&self, container: &Container, image_name: String) -> Result<String> {
        let client = self.client()?;
        let instance_dir = self.instance_dir(container);
        let body = container_create_body(container, image_name, &instance_dir)?;

        let options = CreateContainerOptions {
            name: Some(container.docker_container_name()),
            ..Default::default()
        };

        let response = client.create_container(Some(options), body).await?;
        for warning in &response.warnings {
            tracing::warn!(warning, "warning while creating container");
        }
        Ok(response.id)
    }

    fn watch_logs(&self, docker_id: String, container_id: ContainerId, hooks: &RunnerHooks) {
        let Some(client) = self.docker.clone() else {
            return;
        };
        let on_log = Arc::clone(&hooks.on_log);
        let token = self.shutdown.clone();

        tokio::spawn(async move {
            let options = LogsOptionsBuilder::default()
                .follow(true)
                .stdout(true)
                .stderr(true)
                .tail("0")
                .build();
            let mut stream = client.logs(&docker_id, Some(options));

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    item = stream.next() => match item {
                        Some(Ok(output)) => {
                            let (kind, bytes) = match output {
                                bollard::container::LogOutput::StdErr { message } => {
                                    (LogKind::Err, message)
                                }
                                bollard::container::LogOutput::StdOut { message }
                                | bollard::container::LogOutput::Console { message } => {
                                    (LogKind::Out, message)
                                }
                                bollard::container::LogOutput::StdIn { .. } => continue,
                            };
                            for line in String::from_utf8_lossy(&bytes).lines() {
                                if !line.is_empty() {
                                    on_log(LogLine::new(kind, line));
                                }
                            }
                        }
                        Some(Err(err)) => {
                            tracing::error!(container_id = %container_id, error = %err, "log tail failed");
                            break;
                        }
                        None => {
                            tracing::info!(container_id = %container_id, "logs pipe closed");
                            break;
                        }
                    }
                }
            }
        });
    }

    fn watch_exit(&self, docker_id: String, container_id: ContainerId, hooks: &RunnerHooks) {
        let Some(client) = self.docker.clone() else {
            return;
        };
        let set_status = Arc::clone(&hooks.set_status);
        let token = self.shutdown.clone();

        tokio::spawn(async move {
            let options = WaitContainerOptionsBuilder::default()
                .condition("not-running")
                .build();
            let mut stream = client.wait_container(&docker_id, Some(options));

            tokio::select! {
                () = token.cancelled() => {}
                item = stream.next() => match item {
                    Some(Ok(response)) => {
                        tracing::info!(
                            container_id = %container_id,
                            status_code = response.status_code,
                            "container exited"
                        );
                        set_status(Status::Off);
                    }
                    Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => {
                        tracing::info!(container_id = %container_id, status_code = code, "container exited");
                        set_status(Status::Off);
                    }
                    Some(Err(err)) => {
                        tracing::error!(container_id = %container_id, error = %err, "wait failed");
                    }
                    None => {
                        tracing::warn!(container_id = %container_id, "wait stream closed without a response");
                    }
                }
            }
        });
    }
}

#[async_trait]
impl Runner for DockerRunner {
    async fn start(&self, container: &Container, hooks: RunnerHooks) -> Result<()> {
        let client = self.client()?;
        let method = docker_method(container)?;
        let image_name = container.docker_image_name();

        (hooks.set_status)(Status::Building);

        let build_result = if method.dockerfile.is_some() {
            self.build_image_from_dockerfile(&self.instance_dir(container), &image_name, &hooks)
                .await
        } else if let Some(image) = &method.image {
            let on_log = Arc::clone(&hooks.on_log);
            self.pull_image(image, move |line| {
                on_log(LogLine::new(LogKind::Download, line));
            })
            .await
        } else {
            Err(RunnerError::NoDockerMethod)
        };
        if let Err(err) = build_result {
            (hooks.on_err)(err.to_string());
            return Err(err);
        }

        let name = container.docker_container_name();
        let docker_id = match self.find_container_id(&name).await? {
            Some(id) => id,
            None => {
                tracing::info!(container_name = %name, "container doesn't exist, creating it");
                let image = match &method.image {
                    Some(image) => image.clone(),
                    None => image_name,
                };
                self.create_container(container, image).await?
            }
        };

        (hooks.set_status)(Status::Starting);
        if let Err(err) = client
            .start_container(&docker_id, None::<StartContainerOptions>)
            .await
        {
            (hooks.set_status)(Status::Error);
            return Err(err.into());
        }
        (hooks.set_status)(Status::Running);

        self.watch_logs(docker_id.clone(), container.id, &hooks);
        self.watch_exit(docker_id, container.id, &hooks);

        Ok(())
    }

    async fn stop(&self, container: &Container) -> Result<()> {
        let client = self.client()?;
        let docker_id = self
            .require_container_id(&container.docker_container_name())
            .await?;

        // The daemon applies its default stop timeout; the exit itself is
        // observed by the wait watcher.
        client
            .stop_container(&docker_id, None::<StopContainerOptions>)
            .await?;
        Ok(())
    }

    async fn delete(&self, container: &Container) -> Result<()> {
        let client = self.client()?;
        let docker_id = self
            .require_container_id(&container.docker_container_name())
            .await?;

        // No force: the daemon refuses to remove a running container.
        client
            .remove_container(&docker_id, None::<RemoveContainerOptions>)
            .await?;
        Ok(())
    }

    async fn info(
        &self,
        container: &Container,
    ) -> Result<serde_json::Map<String, serde_json::Value>> {
        let client = self.client()?;
        let docker_id = self
            .require_container_id(&container.docker_container_name())
            .await?;

        let inspect = client
            .inspect_container(&docker_id, None::<InspectContainerOptions>)
            .await?;

        let mut info = serde_json::Map::new();
        info.insert("backend".to_string(), "docker".into());
        info.insert("id".to_string(), inspect.id.unwrap_or_default().into());
        info.insert("name".to_string(), inspect.name.unwrap_or_default().into());
        info.insert("image".to_string(), inspect.image.unwrap_or_default().into());
        info.insert(
            "platform".to_string(),
            inspect.platform.unwrap_or_default().into(),
        );
        Ok(info)
    }

    async fn check_for_updates(&self, container: &Container) -> Result<Option<ContainerUpdate>> {
        let client = self.client()?;
        let method = docker_method(container)?;
        let Some(image) = &method.image else {
            // Dockerfile-based containers have no comparable upstream image.
            tracing::debug!(container_id = %container.id, "update checks are not supported for Dockerfile services");
            return Ok(None);
        };

        self.pull_image(image, |_| {}).await?;

        let latest = client
            .inspect_image(image)
            .await?
            .id
            .unwrap_or_default();

        let current = self
            .find_container(&container.docker_container_name())
            .await?
            .ok_or_else(|| RunnerError::ContainerNotFound(container.docker_container_name()))?
            .image_id
            .unwrap_or_default();

        if latest == current {
            tracing::info!(container_id = %container.id, "already up-to-date");
            Ok(None)
        } else {
            tracing::info!(container_id = %container.id, "a new update is available");
            Ok(Some(ContainerUpdate {
                current_version: current,
                latest_version: latest,
            }))
        }
    }
}

fn docker_method(container: &Container) -> Result<&DockerMethod> {
    container
        .service
        .methods
        .docker
        .as_ref()
        .ok_or(RunnerError::NoDockerMethod)
}

/// Builds the creation body for a container: ports, binds, env,
/// capabilities, and sysctls derived from the service manifest and the live
/// env values.
fn container_create_body(
    container: &Container,
    image_name: String,
    instance_dir: &Path,
) -> Result<ContainerCreateBody> {
    let method = docker_method(container)?;

    let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
    let mut port_bindings: PortMap = PortMap::new();
    if let Some(ports) = &method.ports {
        for (container_port, default_host_port) in ports {
            let host_port = container
                .service
                .env
                .iter()
                .find(|def| {
                    def.kind == EnvType::Port
                        && def.default.as_deref() == Some(default_host_port.as_str())
                })
                .and_then(|def| container.env.get(&def.name).cloned())
                .unwrap_or_else(|| default_host_port.clone());

            let key = if container_port.contains('/') {
                container_port.clone()
            } else {
                format!("{container_port}/tcp")
            };
            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(host_port),
                }]),
            );
        }
    }

    let mut binds = Vec::new();
    if let Some(volumes) = &method.volumes {
        let volumes_root = std::fs::canonicalize(instance_dir)?.join("volumes");
        for (source, target) in volumes {
            let source = if source.starts_with('/') {
                PathBuf::from(source)
            } else {
                volumes_root.join(source)
            };
            binds.push(format!("{}:{}", source.display(), target));
        }
    }

    let mut env = Vec::new();
    if let Some(environment) = &method.environment {
        for (container_var, definition_name) in environment {
            let value = container
                .env
                .get(definition_name)
                .cloned()
                .unwrap_or_default();
            env.push(format!("{container_var}={value}"));
        }
    }

    Ok(ContainerCreateBody {
        image: Some(image_name),
        env: Some(env),
        exposed_ports: Some(exposed_ports),
        tty: Some(true),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        host_config: Some(HostConfig {
            binds: Some(binds),
            port_bindings: Some(port_bindings),
            cap_add: method.capabilities.clone(),
            sysctls: method
                .sysctls
                .as_ref()
                .map(|sysctls| sysctls.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Tars a directory for use as a build context, excluding `.git`.
fn tar_directory(dir: &Path) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    append_dir(&mut builder, dir, Path::new(""))?;
    Ok(builder.into_inner()?)
}

fn append_dir(builder: &mut tar::Builder<Vec<u8>>, root: &Path, rel: &Path) -> Result<()> {
    for entry in std::fs::read_dir(root.join(rel))? {
        let entry = entry?;
        let name = entry.file_name();
        if name == ".git" {
            continue;
        }

        let rel_path = rel.join(&name);
        if entry.file_type()?.is_dir() {
            builder.append_dir(&rel_path, entry.path())?;
            append_dir(builder, root, &rel_path)?;
        } else {
            builder.append_path_with_name(entry.path(), &rel_path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::Read;
    use tempfile::TempDir;
    use vertex_container::{EnvDefinition, Service, ServiceMethods};

    fn docker_service() -> Service {
        Service {
            id: "redis".to_string(),
            name: "Redis".to_string(),
            env: vec![EnvDefinition {
                name: "REDIS_PORT".to_string(),
                kind: EnvType::Port,
                default: Some("6379".to_string()),
                ..EnvDefinition::default()
            }],
            methods: ServiceMethods {
                docker: Some(DockerMethod {
                    image: Some("redis:7".to_string()),
                    ports: Some(BTreeMap::from([(
                        "6379".to_string(),
                        "6379".to_string(),
                    )])),
                    volumes: Some(BTreeMap::from([
                        ("data".to_string(), "/data".to_string()),
                        ("/etc/ssl".to_string(), "/etc/ssl".to_string()),
                    ])),
                    environment: Some(BTreeMap::from([(
                        "PORT".to_string(),
                        "REDIS_PORT".to_string(),
                    )])),
                    capabilities: Some(vec!["NET_ADMIN".to_string()]),
                    sysctls: Some(BTreeMap::from([(
                        "net.core.somaxconn".to_string(),
                        "1024".to_string(),
                    )])),
                    ..DockerMethod::default()
                }),
                ..ServiceMethods::default()
            },
            ..Service::default()
        }
    }

    #[test]
    fn create_body_applies_env_typed_port_overrides() {
        let tmp = TempDir::new().unwrap();
        let mut container = Container::new(ContainerId::new(), docker_service());
        container
            .env
            .insert("REDIS_PORT".to_string(), "7000".to_string());

        let body =
            container_create_body(&container, "redis:7".to_string(), tmp.path()).unwrap();

        let bindings = body.host_config.unwrap().port_bindings.unwrap();
        let binding = bindings.get("6379/tcp").unwrap().as_ref().unwrap();
        assert_eq!(binding[0].host_port.as_deref(), Some("7000"));
        assert!(body.exposed_ports.unwrap().contains_key("6379/tcp"));
    }

    #[test]
    fn create_body_falls_back_to_the_declared_host_port() {
        let tmp = TempDir::new().unwrap();
        let mut container = Container::new(ContainerId::new(), docker_service());
        container.service.env.clear();
        container.env.clear();

        let body =
            container_create_body(&container, "redis:7".to_string(), tmp.path()).unwrap();

        let bindings = body.host_config.unwrap().port_bindings.unwrap();
        let binding = bindings.get("6379/tcp").unwrap().as_ref().unwrap();
        assert_eq!(binding[0].host_port.as_deref(), Some("6379"));
    }

    #[test]
    fn create_body_resolves_relative_volumes_against_the_instance_dir() {
        let tmp = TempDir::new().unwrap();
        let container = Container::new(ContainerId::new(), docker_service());

        let body =
            container_create_body(&container, "redis:7".to_string(), tmp.path()).unwrap();

        let binds = body.host_config.unwrap().binds.unwrap();
        let canonical = std::fs::canonicalize(tmp.path()).unwrap();
        assert!(binds.contains(&"/etc/ssl:/etc/ssl".to_string()));
        assert!(binds.contains(&format!("{}/volumes/data:/data", canonical.display())));
    }

    #[test]
    fn create_body_maps_env_values_into_container_variables() {
        let tmp = TempDir::new().unwrap();
        let container = Container::new(ContainerId::new(), docker_service());

        let body =
            container_create_body(&container, "redis:7".to_string(), tmp.path()).unwrap();

        assert_eq!(body.env.unwrap(), vec!["PORT=6379".to_string()]);
        assert_eq!(body.tty, Some(true));
        let host_config = body.host_config.unwrap();
        assert_eq!(host_config.cap_add.unwrap(), vec!["NET_ADMIN".to_string()]);
        assert_eq!(
            host_config.sysctls.unwrap().get("net.core.somaxconn"),
            Some(&"1024".to_string())
        );
    }

    #[test]
    fn tar_directory_excludes_git_trees() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("Dockerfile"), "FROM scratch\n").unwrap();
        std::fs::create_dir_all(tmp.path().join("src")).unwrap();
        std::fs::write(tmp.path().join("src/main.txt"), "x").unwrap();
        std::fs::create_dir_all(tmp.path().join(".git/objects")).unwrap();
        std::fs::write(tmp.path().join(".git/HEAD"), "ref").unwrap();

        let bytes = tar_directory(tmp.path()).unwrap();

        let mut archive = tar::Archive::new(&bytes[..]);
        let mut names = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            names.push(entry.path().unwrap().display().to_string());
            let mut sink = Vec::new();
            entry.read_to_end(&mut sink).unwrap();
        }

        assert!(names.contains(&"Dockerfile".to_string()));
        assert!(names.contains(&"src/main.txt".to_string()));
        assert!(names.iter().all(|n| !n.starts_with(".git")));
    }
}
