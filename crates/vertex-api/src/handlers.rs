//! Request handlers.
//!
//! Handlers parse and validate the transport layer, then delegate to the
//! supervisor; domain errors are mapped onto the fixed code catalog in
//! [`crate::error`].

use crate::api::{About, AppState};
use crate::error::{ApiError, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, RawQuery, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::Json;
use futures::stream::Stream;
use futures::StreamExt;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use vertex_container::{Container, ContainerId, Event, LogKind, LogLine, Service};
use vertex_core::{CoreError, SettingsPatch};
use vertex_store::{InstallOptions, StoreError};

fn parse_uuid(raw: &str) -> Result<ContainerId> {
    ContainerId::parse(raw).map_err(|_| ApiError::ContainerUuidInvalid)
}

// ============================================================================
// System
// ============================================================================

/// Liveness probe.
pub async fn ping() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "pong" }))
}

/// Build information.
pub async fn about(State(state): State<AppState>) -> Json<About> {
    Json(state.about.clone())
}

/// Dispatches a hard reset and reloads catalog and store.
pub async fn hard_reset(State(state): State<AppState>) -> Result<StatusCode> {
    state
        .context
        .hard_reset()
        .await
        .map_err(|err| ApiError::HardResetFailed(err.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Services
// ============================================================================

/// Lists the service catalog.
pub async fn list_services(State(state): State<AppState>) -> Json<Vec<Service>> {
    Json(state.context.catalog().get_all())
}

// ============================================================================
// Containers
// ============================================================================

/// Lists all containers.
pub async fn list_containers(State(state): State<AppState>) -> Json<Vec<Container>> {
    Json(state.context.supervisor().get_all())
}

/// Filters containers by `features[]` query facets.
pub async fn search_containers(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Json<Vec<Container>>> {
    let pairs: Vec<(String, String)> = match query.as_deref() {
        Some(raw) => serde_urlencoded::from_str(raw)
            .map_err(|err| ApiError::FailedToParseBody(err.to_string()))?,
        None => Vec::new(),
    };
    let features: Vec<String> = pairs
        .into_iter()
        .filter(|(key, _)| key == "features[]" || key == "features")
        .map(|(_, value)| value)
        .collect();

    Ok(Json(state.context.supervisor().search(&features)))
}

/// Runs the update check for every container.
pub async fn check_for_updates(State(state): State<AppState>) -> Json<Vec<Container>> {
    Json(state.context.supervisor().check_for_updates().await)
}

/// Install request body.
#[derive(Debug, Deserialize)]
pub struct InstallBody {
    /// Prefixed install source (`marketplace:`, `localstorage:`, `git:`).
    #[serde(alias = "repository")]
    pub source: String,
    #[serde(default)]
    pub use_docker: Option<bool>,
    #[serde(default)]
    pub use_releases: Option<bool>,
}

/// Installs a new container.
pub async fn install_container(
    State(state): State<AppState>,
    payload: std::result::Result<Json<InstallBody>, JsonRejection>,
) -> Result<Json<Container>> {
    let Json(body) = payload.map_err(|err| ApiError::FailedToParseBody(err.to_string()))?;

    let options = InstallOptions {
        use_docker: body.use_docker,
        use_releases: body.use_releases,
    };
    let container = state
        .context
        .supervisor()
        .install(&body.source, options)
        .await
        .map_err(|err| match err {
            CoreError::Store(StoreError::UnsupportedProtocol(protocol)) => {
                ApiError::UnsupportedProtocol(protocol)
            }
            CoreError::Store(StoreError::ServiceNotFound(name)) => ApiError::ServiceNotFound(name),
            other => ApiError::FailedToInstallService(other.to_string()),
        })?;
    Ok(Json(container))
}

/// Deletes a container.
pub async fn delete_container(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<StatusCode> {
    let id = parse_uuid(&uuid)?;
    state
        .context
        .supervisor()
        .delete(id)
        .await
        .map_err(|err| match err {
            CoreError::ContainerNotFound(id) => ApiError::ContainerNotFound(id),
            CoreError::StillRunning => ApiError::ContainerStillRunning,
            other => ApiError::FailedToDeleteContainer(other.to_string()),
        })?;
    Ok(StatusCode::NO_CONTENT)
}

/// Starts a container.
pub async fn start_container(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<StatusCode> {
    let id = parse_uuid(&uuid)?;
    state
        .context
        .supervisor()
        .start(id)
        .await
        .map_err(|err| match err {
            CoreError::ContainerNotFound(id) => ApiError::ContainerNotFound(id),
            CoreError::AlreadyRunning => ApiError::ContainerAlreadyRunning,
            other => ApiError::FailedToStartContainer(other.to_string()),
        })?;
    Ok(StatusCode::NO_CONTENT)
}

/// Stops a container.
pub async fn stop_container(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<StatusCode> {
    let id = parse_uuid(&uuid)?;
    state
        .context
        .supervisor()
        .stop(id)
        .await
        .map_err(|err| match err {
            CoreError::ContainerNotFound(id) => ApiError::ContainerNotFound(id),
            CoreError::NotRunning => ApiError::ContainerNotRunning,
            other => ApiError::FailedToStopContainer(other.to_string()),
        })?;
    Ok(StatusCode::NO_CONTENT)
}

/// Replaces a container's environment.
pub async fn patch_environment(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
    payload: std::result::Result<Json<BTreeMap<String, String>>, JsonRejection>,
) -> Result<StatusCode> {
    let id = parse_uuid(&uuid)?;
    let Json(env) = payload.map_err(|err| ApiError::FailedToParseBody(err.to_string()))?;
    state
        .context
        .supervisor()
        .patch_env(id, env)
        .map_err(|err| match err {
            CoreError::ContainerNotFound(id) => ApiError::ContainerNotFound(id),
            other => ApiError::FailedToSetEnv(other.to_string()),
        })?;
    Ok(StatusCode::NO_CONTENT)
}

/// Merges a partial settings update.
pub async fn patch_settings(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
    payload: std::result::Result<Json<SettingsPatch>, JsonRejection>,
) -> Result<StatusCode> {
    let id = parse_uuid(&uuid)?;
    let Json(patch) = payload.map_err(|err| ApiError::FailedToParseBody(err.to_string()))?;
    state
        .context
        .supervisor()
        .patch_settings(id, patch)
        .map_err(|err| match err {
            CoreError::ContainerNotFound(id) => ApiError::ContainerNotFound(id),
            other => ApiError::FailedToPatchSettings(other.to_string()),
        })?;
    Ok(StatusCode::NO_CONTENT)
}

/// Returns the buffered log lines of a container.
pub async fn container_logs(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<Json<Vec<LogLine>>> {
    let id = parse_uuid(&uuid)?;
    let buffer = state
        .context
        .supervisor()
        .logs_buffer(id)
        .map_err(|err| match err {
            CoreError::ContainerNotFound(id) => ApiError::ContainerNotFound(id),
            other => ApiError::FailedToGetLogs(other.to_string()),
        })?;
    Ok(Json(buffer))
}

/// Returns the runner's diagnostic snapshot for a container.
pub async fn container_info(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let id = parse_uuid(&uuid)?;
    let info = state
        .context
        .supervisor()
        .info(id)
        .await
        .map_err(|err| match err {
            CoreError::ContainerNotFound(id) => ApiError::ContainerNotFound(id),
            other => ApiError::FailedToGetContainer(other.to_string()),
        })?;
    Ok(Json(serde_json::Value::Object(info)))
}

// ============================================================================
// Events
// ============================================================================

/// Streams bus events as Server-Sent Events.
///
/// The subscription is dropped, and thereby released, when the client
/// disconnects and the stream is torn down.
pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = std::result::Result<SseEvent, Infallible>>> {
    let rx = state.context.bus().subscribe();

    let open =
        futures::stream::once(async { Ok::<_, Infallible>(SseEvent::default().event("open")) });
    let bus_events = BroadcastStream::new(rx).filter_map(|event| async move {
        // Lagged subscribers skip dropped events; there is no replay.
        let event = event.ok()?;
        sse_event(&event).map(Ok)
    });

    Sse::new(open.chain(bus_events)).keep_alive(KeepAlive::default())
}

/// Maps a bus event onto its wire representation, if it has one.
fn sse_event(event: &Event) -> Option<SseEvent> {
    match event {
        Event::StatusChange {
            container_id,
            status,
        } => {
            let data = serde_json::json!({
                "container_id": container_id,
                "status": status,
            });
            Some(
                SseEvent::default()
                    .event("status_change")
                    .data(data.to_string()),
            )
        }
        Event::ContainersChange => Some(
            SseEvent::default()
                .event("containers_change")
                .data("containers_change"),
        ),
        Event::LogAppend {
            container_id,
            line,
        } => {
            let name = match line.kind {
                LogKind::Out | LogKind::VertexOut | LogKind::Download => "stdout",
                LogKind::Err | LogKind::VertexErr => "stderr",
            };
            let data = serde_json::json!({
                "container_id": container_id,
                "message": line.message,
            });
            Some(SseEvent::default().event(name).data(data.to_string()))
        }
        Event::ServerStart
        | Event::ServerStop
        | Event::ServerHardReset
        | Event::DependenciesUpdated => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vertex_container::Status;

    #[test]
    fn status_changes_become_status_change_events() {
        let event = Event::StatusChange {
            container_id: ContainerId::new(),
            status: Status::Running,
        };
        assert!(sse_event(&event).is_some());
    }

    #[test]
    fn every_log_kind_reaches_the_wire() {
        let id = ContainerId::new();
        for kind in [
            LogKind::Out,
            LogKind::Err,
            LogKind::VertexOut,
            LogKind::VertexErr,
            LogKind::Download,
        ] {
            let event = Event::LogAppend {
                container_id: id,
                line: LogLine::new(kind, "x"),
            };
            assert!(sse_event(&event).is_some());
        }
    }

    #[test]
    fn server_lifecycle_events_stay_off_the_wire() {
        assert!(sse_event(&Event::ServerStart).is_none());
        assert!(sse_event(&Event::ServerStop).is_none());
        assert!(sse_event(&Event::DependenciesUpdated).is_none());
    }
}
