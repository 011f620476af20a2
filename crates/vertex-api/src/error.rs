//! HTTP error catalog.
//!
//! Every error leaving the API is JSON `{code, message}` with a fixed code
//! string, so clients can switch on codes instead of scraping messages.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use vertex_container::ContainerId;

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors returned by the HTTP API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("the container uuid is invalid")]
    ContainerUuidInvalid,

    #[error("container {0} not found")]
    ContainerNotFound(ContainerId),

    #[error("the container is already running")]
    ContainerAlreadyRunning,

    #[error("the container is still running")]
    ContainerStillRunning,

    #[error("the container is not running")]
    ContainerNotRunning,

    #[error("service {0} not found")]
    ServiceNotFound(String),

    #[error("this protocol is not supported: {0}")]
    UnsupportedProtocol(String),

    #[error("failed to start container: {0}")]
    FailedToStartContainer(String),

    #[error("failed to stop container: {0}")]
    FailedToStopContainer(String),

    #[error("failed to delete container: {0}")]
    FailedToDeleteContainer(String),

    #[error("failed to check for updates: {0}")]
    FailedToCheckForUpdates(String),

    #[error("failed to install service: {0}")]
    FailedToInstallService(String),

    #[error("failed to parse the request body: {0}")]
    FailedToParseBody(String),

    #[error("failed to get logs: {0}")]
    FailedToGetLogs(String),

    #[error("failed to set the environment: {0}")]
    FailedToSetEnv(String),

    #[error("failed to update settings: {0}")]
    FailedToPatchSettings(String),

    #[error("failed to get container: {0}")]
    FailedToGetContainer(String),

    #[error("failed to reset the server: {0}")]
    HardResetFailed(String),
}

impl ApiError {
    /// Stable error code shipped to clients.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ContainerUuidInvalid => "container_uuid_invalid",
            Self::ContainerNotFound(_) => "container_not_found",
            Self::ContainerAlreadyRunning => "container_already_running",
            Self::ContainerStillRunning => "container_still_running",
            Self::ContainerNotRunning => "container_not_running",
            Self::ServiceNotFound(_) => "service_not_found",
            Self::UnsupportedProtocol(_) | Self::FailedToInstallService(_) => {
                "failed_to_install_service"
            }
            Self::FailedToStartContainer(_) => "failed_to_start_container",
            Self::FailedToStopContainer(_) => "failed_to_stop_container",
            Self::FailedToDeleteContainer(_) => "failed_to_delete_container",
            Self::FailedToCheckForUpdates(_) => "failed_to_check_for_updates",
            Self::FailedToParseBody(_) => "failed_to_parse_body",
            Self::FailedToGetLogs(_) => "failed_to_get_logs",
            Self::FailedToSetEnv(_) => "failed_to_set_env",
            Self::FailedToPatchSettings(_) => "failed_to_patch_settings",
            Self::FailedToGetContainer(_) => "failed_to_get_container",
            Self::HardResetFailed(_) => "failed_to_hard_reset",
        }
    }

    /// HTTP status for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::ContainerUuidInvalid
            | Self::UnsupportedProtocol(_)
            | Self::FailedToParseBody(_) => StatusCode::BAD_REQUEST,
            Self::ContainerNotFound(_) | Self::ServiceNotFound(_) | Self::FailedToGetLogs(_) => {
                StatusCode::NOT_FOUND
            }
            Self::ContainerAlreadyRunning
            | Self::ContainerStillRunning
            | Self::ContainerNotRunning => StatusCode::CONFLICT,
            Self::FailedToStartContainer(_)
            | Self::FailedToStopContainer(_)
            | Self::FailedToDeleteContainer(_)
            | Self::FailedToCheckForUpdates(_)
            | Self::FailedToInstallService(_)
            | Self::FailedToSetEnv(_)
            | Self::FailedToPatchSettings(_)
            | Self::FailedToGetContainer(_)
            | Self::HardResetFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        (status, axum::Json(body)).into_response()
    }
}
