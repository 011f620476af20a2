//! Container state and settings.

use crate::service::Service;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Container identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(Uuid);

impl ContainerId {
    /// Creates a new random container ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a container ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parses a container ID from its string form.
    ///
    /// # Errors
    ///
    /// Returns an error if `s` is not a valid UUID.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ContainerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Container status.
///
/// `Off` and `Error` are the only states in which a container counts as not
/// running; everything in between belongs to an active start cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// No workload exists or the workload has exited.
    Off,
    /// The image or executable is being prepared.
    Building,
    /// The workload has been created and start was requested.
    Starting,
    /// The workload is running.
    Running,
    /// The last start or run attempt failed.
    Error,
}

impl Status {
    /// Returns whether this status counts as running.
    #[must_use]
    pub const fn is_running(self) -> bool {
        !matches!(self, Self::Off | Self::Error)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Building => write!(f, "building"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// An available update for a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerUpdate {
    /// Version currently deployed.
    pub current_version: String,
    /// Newest version available.
    pub latest_version: String,
}

/// User-mutable container settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSettings {
    /// Name shown in clients. Defaults to the service name.
    #[serde(default)]
    pub display_name: String,
    /// Start this container when the server boots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_on_startup: Option<bool>,
    /// User tags, merged with the manifest tags for search.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    /// Pinned image tag or release tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Logical database name to container wiring.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub databases: BTreeMap<String, ContainerId>,
}

/// A managed workload with persistent metadata, settings, env, and logs.
#[derive(Debug, Clone, Serialize)]
pub struct Container {
    /// Stable identifier; also names the Docker resources and the
    /// `instances/<id>/` directory.
    pub id: ContainerId,
    /// The service manifest this container was installed from.
    pub service: Service,
    /// User overrides.
    pub settings: ContainerSettings,
    /// Environment values, keyed by definition name. The on-disk env file is
    /// the source of truth; this map is a cache refilled on load.
    pub env: BTreeMap<String, String>,
    /// Current lifecycle status.
    pub status: Status,
    /// Populated by update checks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<ContainerUpdate>,
    /// Selects the Docker backend instead of the process backend.
    pub use_docker: bool,
    /// Install from release archives when available instead of cloning.
    pub use_releases: bool,
}

impl Container {
    /// Creates a container in the `Off` state from a service manifest.
    #[must_use]
    pub fn new(id: ContainerId, service: Service) -> Self {
        let env = service.default_env();
        let settings = ContainerSettings {
            display_name: service.name.clone(),
            ..ContainerSettings::default()
        };
        Self {
            id,
            service,
            settings,
            env,
            status: Status::Off,
            update: None,
            use_docker: false,
            use_releases: false,
        }
    }

    /// Name of the Docker container backing this workload.
    #[must_use]
    pub fn docker_container_name(&self) -> String {
        format!("VERTEX_CONTAINER_{}", self.id)
    }

    /// Tag of the Docker image built for this workload.
    #[must_use]
    pub fn docker_image_name(&self) -> String {
        format!("vertex_image_{}", self.id)
    }

    /// Returns whether the container counts as running.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.status.is_running()
    }
}
