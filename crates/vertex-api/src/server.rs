//! HTTP server lifecycle.

use crate::api::{create_router, About};
use std::sync::Arc;
use tokio::net::TcpListener;
use vertex_core::Context;

/// Binds the configured address and serves the API until the context's
/// shutdown token fires.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn serve(context: Arc<Context>, about: About) -> std::io::Result<()> {
    let config = context.config().clone();
    let shutdown = context.shutdown_token();
    let app = create_router(context, about);

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    tracing::info!(url = %config.url(), "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}
