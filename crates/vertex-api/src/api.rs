//! API router.

use crate::handlers;
use axum::routing::{delete, get, patch, post};
use axum::Router;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use vertex_core::Context;

/// Build information served by `/api/about`.
#[derive(Debug, Clone, Serialize)]
pub struct About {
    pub version: String,
    pub commit: String,
    pub date: String,
    pub os: String,
    pub arch: String,
}

/// Application state shared with handlers.
#[derive(Clone)]
pub struct AppState {
    /// Process-wide context.
    pub context: Arc<Context>,
    /// Build information.
    pub about: About,
}

/// Creates the API router with all endpoints.
///
/// Unmatched paths fall through to the static web client under
/// `<storage>/client/dist`.
#[must_use]
pub fn create_router(context: Arc<Context>, about: About) -> Router {
    let client_dir = context.config().storage_path.join("client/dist");
    let state = AppState { context, about };

    let api = Router::new()
        .route("/ping", get(handlers::ping))
        .route("/about", get(handlers::about))
        .route("/hard-reset", post(handlers::hard_reset));

    let containers = Router::new()
        .route("/services", get(handlers::list_services))
        .route("/containers", get(handlers::list_containers))
        .route("/containers/search", get(handlers::search_containers))
        .route("/containers/checkupdates", get(handlers::check_for_updates))
        .route("/containers/events", get(handlers::events))
        .route("/container", post(handlers::install_container))
        .route(
            "/container/{container_uuid}",
            delete(handlers::delete_container).patch(handlers::patch_settings),
        )
        .route(
            "/container/{container_uuid}/start",
            post(handlers::start_container),
        )
        .route(
            "/container/{container_uuid}/stop",
            post(handlers::stop_container),
        )
        .route(
            "/container/{container_uuid}/environment",
            patch(handlers::patch_environment),
        )
        .route(
            "/container/{container_uuid}/logs",
            get(handlers::container_logs),
        )
        .route(
            "/container/{container_uuid}/info",
            get(handlers::container_info),
        );

    Router::new()
        .nest("/api", api)
        .nest("/app/containers", containers)
        .fallback_service(ServeDir::new(client_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
