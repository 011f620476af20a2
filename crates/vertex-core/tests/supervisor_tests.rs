//! Integration tests for the container lifecycle supervisor.
//!
//! These exercise the process backend end to end against a temporary storage
//! root; the Docker backend is covered by its own unit tests since the test
//! environment has no daemon.

use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use vertex_container::{Container, ContainerId, Event, EventBus, LogKind, Status};
use vertex_core::{CoreError, SettingsPatch, Supervisor};
use vertex_runner::{DockerRunner, ProcessRunner, RunnerError};
use vertex_store::{ContainerStore, InstallOptions, LogPipeline};

struct Harness {
    tmp: TempDir,
    supervisor: Arc<Supervisor>,
    bus: EventBus,
}

fn harness() -> Harness {
    let tmp = TempDir::new().expect("failed to create temp dir");

    let demo = tmp.path().join("services/demo");
    std::fs::create_dir_all(&demo).unwrap();
    std::fs::write(
        demo.join("service.yml"),
        "id: demo\nname: Demo\ntags: [testing]\nmethods:\n  script: {}\n",
    )
    .unwrap();

    let strict = tmp.path().join("services/strict");
    std::fs::create_dir_all(&strict).unwrap();
    std::fs::write(
        strict.join("service.yml"),
        "id: strict\nname: Strict\nenv:\n  - name: REQUIRED\n",
    )
    .unwrap();

    let instances = tmp.path().join("instances");
    let bus = EventBus::new();
    let store = Arc::new(ContainerStore::new(tmp.path()));
    let logs = Arc::new(LogPipeline::new(&instances, bus.clone()));
    let docker = Arc::new(DockerRunner::disabled(&instances, CancellationToken::new()));
    let process = Arc::new(ProcessRunner::new(&instances, CancellationToken::new()));
    let supervisor = Arc::new(Supervisor::new(store, logs, docker, process, bus.clone()));

    Harness {
        tmp,
        supervisor,
        bus,
    }
}

impl Harness {
    async fn install_demo(&self) -> Container {
        self.supervisor
            .install("marketplace:demo", InstallOptions::default())
            .await
            .expect("install failed")
    }

    fn write_script(&self, container: &Container, body: &str) {
        let path = self
            .tmp
            .path()
            .join(format!("instances/{}/demo.sh", container.id));
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
}

async fn next_status(rx: &mut broadcast::Receiver<Event>) -> Status {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a status change")
            .expect("event bus closed");
        if let Event::StatusChange { status, .. } = event {
            return status;
        }
    }
}

#[tokio::test]
async fn start_then_stop_walks_the_status_machine() {
    let h = harness();
    let container = h.install_demo().await;
    h.write_script(&container, "#!/bin/sh\nexec sleep 30\n");

    let mut rx = h.bus.subscribe();

    h.supervisor.start(container.id).await.unwrap();
    assert_eq!(next_status(&mut rx).await, Status::Running);
    assert!(h.supervisor.get(container.id).unwrap().is_running());

    h.supervisor.stop(container.id).await.unwrap();
    assert_eq!(next_status(&mut rx).await, Status::Off);
    assert_eq!(h.supervisor.get(container.id).unwrap().status, Status::Off);

    let buffer = h.supervisor.logs_buffer(container.id).unwrap();
    let messages: Vec<&str> = buffer.iter().map(|l| l.message.as_str()).collect();
    assert!(messages.contains(&"Starting container..."));
    assert!(messages.contains(&"Container started."));
    assert!(messages.contains(&"Container stopped."));
}

#[tokio::test]
async fn both_subscribers_observe_transitions_in_the_same_order() {
    let h = harness();
    let container = h.install_demo().await;
    h.write_script(&container, "#!/bin/sh\nexec sleep 30\n");

    let mut first = h.bus.subscribe();
    let mut second = h.bus.subscribe();

    h.supervisor.start(container.id).await.unwrap();
    h.supervisor.stop(container.id).await.unwrap();

    for rx in [&mut first, &mut second] {
        assert_eq!(next_status(rx).await, Status::Running);
        assert_eq!(next_status(rx).await, Status::Off);
    }
}

#[tokio::test]
async fn starting_a_running_container_is_already_running() {
    let h = harness();
    let container = h.install_demo().await;
    h.write_script(&container, "#!/bin/sh\nexec sleep 30\n");

    let mut rx = h.bus.subscribe();
    h.supervisor.start(container.id).await.unwrap();
    assert_eq!(next_status(&mut rx).await, Status::Running);

    assert!(matches!(
        h.supervisor.start(container.id).await,
        Err(CoreError::AlreadyRunning)
    ));

    h.supervisor.stop(container.id).await.unwrap();
    assert_eq!(next_status(&mut rx).await, Status::Off);
}

#[tokio::test]
async fn deleting_a_running_container_is_still_running() {
    let h = harness();
    let container = h.install_demo().await;
    h.write_script(&container, "#!/bin/sh\nexec sleep 30\n");

    let mut rx = h.bus.subscribe();
    h.supervisor.start(container.id).await.unwrap();
    assert_eq!(next_status(&mut rx).await, Status::Running);

    assert!(matches!(
        h.supervisor.delete(container.id).await,
        Err(CoreError::StillRunning)
    ));

    h.supervisor.stop(container.id).await.unwrap();
    assert_eq!(next_status(&mut rx).await, Status::Off);

    h.supervisor.delete(container.id).await.unwrap();
    assert!(matches!(
        h.supervisor.get(container.id),
        Err(CoreError::ContainerNotFound(_))
    ));
    assert!(!h
        .tmp
        .path()
        .join(format!("instances/{}", container.id))
        .exists());
}

#[tokio::test]
async fn stopping_a_stopped_container_is_not_running() {
    let h = harness();
    let container = h.install_demo().await;

    assert!(matches!(
        h.supervisor.stop(container.id).await,
        Err(CoreError::NotRunning)
    ));
}

#[tokio::test]
async fn missing_executable_sets_error_and_records_a_vertex_err_line() {
    let h = harness();
    let container = h.install_demo().await;

    let err = h.supervisor.start(container.id).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::Runner(RunnerError::ExecutableNotFound(_))
    ));
    assert_eq!(h.supervisor.get(container.id).unwrap().status, Status::Error);

    let buffer = h.supervisor.logs_buffer(container.id).unwrap();
    assert!(buffer.iter().any(|line| {
        line.kind == LogKind::VertexErr && line.message.contains("demo (or demo.sh)")
    }));
}

#[tokio::test]
async fn a_container_in_error_can_be_deleted() {
    let h = harness();
    let container = h.install_demo().await;

    let _ = h.supervisor.start(container.id).await;
    assert_eq!(h.supervisor.get(container.id).unwrap().status, Status::Error);

    h.supervisor.delete(container.id).await.unwrap();
}

#[tokio::test]
async fn start_refuses_when_a_declared_env_has_no_value() {
    let h = harness();
    let container = h
        .supervisor
        .install("marketplace:strict", InstallOptions::default())
        .await
        .unwrap();

    let err = h.supervisor.start(container.id).await.unwrap_err();
    assert!(matches!(err, CoreError::MissingEnv(name) if name == "REQUIRED"));
    assert_eq!(h.supervisor.get(container.id).unwrap().status, Status::Off);
}

#[tokio::test]
async fn docker_containers_fail_fast_without_a_daemon() {
    let h = harness();
    let container = h
        .supervisor
        .install(
            "marketplace:demo",
            InstallOptions {
                use_docker: Some(true),
                ..InstallOptions::default()
            },
        )
        .await
        .unwrap();

    let err = h.supervisor.start(container.id).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::Runner(RunnerError::DockerUnavailable)
    ));
    assert_eq!(h.supervisor.get(container.id).unwrap().status, Status::Error);
}

#[tokio::test]
async fn install_publishes_containers_change() {
    let h = harness();
    let mut rx = h.bus.subscribe();

    h.install_demo().await;

    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out")
            .expect("closed");
        if matches!(event, Event::ContainersChange) {
            break;
        }
    }
}

#[tokio::test]
async fn install_rejects_unknown_protocols() {
    let h = harness();
    let err = h
        .supervisor
        .install("svn:example", InstallOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Store(vertex_store::StoreError::UnsupportedProtocol(_))
    ));
}

#[tokio::test]
async fn patch_settings_merges_only_the_given_fields() {
    let h = harness();
    let container = h.install_demo().await;

    h.supervisor
        .patch_settings(
            container.id,
            SettingsPatch {
                display_name: Some("Renamed".to_string()),
                launch_on_startup: Some(true),
                ..SettingsPatch::default()
            },
        )
        .unwrap();

    let settings = h.supervisor.get(container.id).unwrap().settings;
    assert_eq!(settings.display_name, "Renamed");
    assert_eq!(settings.launch_on_startup, Some(true));
    assert!(settings.version.is_none());
}

#[tokio::test]
async fn patch_env_replaces_the_whole_map() {
    let h = harness();
    let container = h.install_demo().await;

    let mut env = BTreeMap::new();
    env.insert("A".to_string(), "1".to_string());
    h.supervisor.patch_env(container.id, env.clone()).unwrap();

    assert_eq!(h.supervisor.get(container.id).unwrap().env, env);

    assert!(matches!(
        h.supervisor.patch_env(ContainerId::new(), env),
        Err(CoreError::ContainerNotFound(_))
    ));
}

#[tokio::test]
async fn stop_all_waits_for_running_containers_to_reach_off() {
    let h = harness();
    let container = h.install_demo().await;
    h.write_script(&container, "#!/bin/sh\nexec sleep 30\n");

    let mut rx = h.bus.subscribe();
    h.supervisor.start(container.id).await.unwrap();
    assert_eq!(next_status(&mut rx).await, Status::Running);

    h.supervisor.stop_all().await;
    assert_eq!(h.supervisor.get(container.id).unwrap().status, Status::Off);
}

#[tokio::test]
async fn start_all_starts_only_launch_on_startup_containers() {
    let h = harness();
    let boot = h.install_demo().await;
    h.write_script(&boot, "#!/bin/sh\nexec sleep 30\n");
    let idle = h.install_demo().await;
    h.write_script(&idle, "#!/bin/sh\nexec sleep 30\n");

    h.supervisor
        .patch_settings(
            boot.id,
            SettingsPatch {
                launch_on_startup: Some(true),
                ..SettingsPatch::default()
            },
        )
        .unwrap();

    h.supervisor.start_all().await;

    assert!(h.supervisor.get(boot.id).unwrap().is_running());
    assert_eq!(h.supervisor.get(idle.id).unwrap().status, Status::Off);

    h.supervisor.stop_all().await;
}

#[tokio::test]
async fn check_for_updates_returns_every_container() {
    let h = harness();
    let container = h.install_demo().await;

    let checked = h.supervisor.check_for_updates().await;
    assert_eq!(checked.len(), 1);
    assert_eq!(checked[0].id, container.id);
    assert!(checked[0].update.is_none());
}

#[tokio::test]
async fn search_filters_by_manifest_and_user_tags() {
    let h = harness();
    let container = h.install_demo().await;

    assert_eq!(h.supervisor.search(&["testing".to_string()]).len(), 1);
    assert!(h.supervisor.search(&["prod".to_string()]).is_empty());

    h.supervisor
        .patch_settings(
            container.id,
            SettingsPatch {
                tags: Some(std::iter::once("prod".to_string()).collect()),
                ..SettingsPatch::default()
            },
        )
        .unwrap();
    assert_eq!(h.supervisor.search(&["prod".to_string()]).len(), 1);
}
