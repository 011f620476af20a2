//! # vertex-container
//!
//! Domain types shared by every Vertex crate:
//!
//! - The [`Container`] entity and its [`Status`] state machine
//! - [`Service`] manifests describing how a container is built and run
//! - [`LogLine`] records produced by runners and the supervisor
//! - The in-memory [`EventBus`] fanning typed [`Event`]s out to subscribers
//!
//! A container is a managed workload (Docker container or local child
//! process) with persistent metadata, settings, environment, and logs. The
//! runtime handle to the workload is owned by the runner backends, not by
//! the entity itself, so `Container` values can be cloned and shipped over
//! the API freely.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod event;
pub mod log;
pub mod service;
pub mod state;

pub use event::{Event, EventBus};
pub use log::{LogKind, LogLine};
pub use service::{DockerMethod, EnvDefinition, EnvType, Service, ServiceMethods};
pub use state::{Container, ContainerId, ContainerSettings, ContainerUpdate, Status};
