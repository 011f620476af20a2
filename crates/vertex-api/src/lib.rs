//! # vertex-api
//!
//! HTTP transport for Vertex: an axum router over the supervisor's command
//! interface plus a Server-Sent-Events stream fed by the event bus. Handlers
//! stay thin; every decision lives in `vertex-core`.

pub mod api;
pub mod error;
pub mod handlers;
pub mod server;

pub use api::{create_router, About, AppState};
pub use error::{ApiError, Result};
pub use server::serve;
