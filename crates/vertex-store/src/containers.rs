//! Container registry and settings persistence.
//!
//! The registry maps container IDs to [`Container`] values and is rebuilt by
//! [`ContainerStore::load`] from the `instances/` directory. Each instance
//! directory persists two files under `.vertex/`: `settings.json` (user
//! settings plus backend selection) and `env`. The service manifest is
//! re-read from the instance tree itself.

use crate::catalog::read_manifest;
use crate::env::EnvStore;
use crate::error::{Result, StoreError};
use crate::fs::atomic_write;
use crate::install::InstallSource;
use crate::VERTEX_DIR;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use vertex_container::{Container, ContainerId, ContainerSettings};

/// Options accepted by install.
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Run the workload through the Docker backend.
    pub use_docker: Option<bool>,
    /// Install from release archives when available.
    pub use_releases: Option<bool>,
}

/// On-disk shape of `settings.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(flatten)]
    settings: ContainerSettings,
    #[serde(default)]
    use_docker: bool,
    #[serde(default)]
    use_releases: bool,
}

/// Persists container metadata and maintains the in-memory registry.
pub struct ContainerStore {
    instances_dir: PathBuf,
    services_dir: PathBuf,
    env: EnvStore,
    containers: RwLock<HashMap<ContainerId, Container>>,
}

impl ContainerStore {
    /// Creates a store rooted at the given storage directory.
    #[must_use]
    pub fn new(storage: &Path) -> Self {
        let instances_dir = storage.join("instances");
        Self {
            env: EnvStore::new(&instances_dir),
            instances_dir,
            services_dir: storage.join("services"),
            containers: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the `instances/` directory this store manages.
    #[must_use]
    pub fn instances_dir(&self) -> &Path {
        &self.instances_dir
    }

    fn instance_dir(&self, id: ContainerId) -> PathBuf {
        self.instances_dir.join(id.to_string())
    }

    fn settings_path(&self, id: ContainerId) -> PathBuf {
        self.instance_dir(id).join(VERTEX_DIR).join("settings.json")
    }

    /// Rescans `instances/` and rebuilds the registry.
    ///
    /// Directories that are not named after a UUID or carry no manifest are
    /// skipped with a warning. Missing settings or env files are repaired
    /// with defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the instances directory cannot be created or read.
    pub fn load(&self) -> Result<()> {
        std::fs::create_dir_all(&self.instances_dir)?;

        let mut containers = HashMap::new();
        for entry in std::fs::read_dir(&self.instances_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Ok(id) = ContainerId::parse(&name.to_string_lossy()) else {
                tracing::warn!(entry = %name.to_string_lossy(), "skipping non-container entry");
                continue;
            };

            match self.load_instance(id) {
                Ok(container) => {
                    containers.insert(id, container);
                }
                Err(err) => {
                    tracing::error!(container_id = %id, error = %err, "failed to load container");
                }
            }
        }

        let mut registry = self
            .containers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *registry = containers;
        Ok(())
    }

    fn load_instance(&self, id: ContainerId) -> Result<Container> {
        let dir = self.instance_dir(id);
        let service = read_manifest(&dir)?;
        let mut container = Container::new(id, service);

        match std::fs::read_to_string(self.settings_path(id)) {
            Ok(content) => {
                let file: SettingsFile = serde_json::from_str(&content)?;
                container.settings = file.settings;
                container.use_docker = file.use_docker;
                container.use_releases = file.use_releases;
                if container.settings.display_name.is_empty() {
                    container.settings.display_name = container.service.name.clone();
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                // Absence is a repair, not a failure.
                self.write_settings(&container)?;
            }
            Err(err) => return Err(err.into()),
        }

        if self.env.exists(id) {
            container.env = self.env.load(id)?;
        } else {
            self.env.save(id, &container.env)?;
        }

        Ok(container)
    }

    fn write_settings(&self, container: &Container) -> Result<()> {
        let path = self.settings_path(container.id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = SettingsFile {
            settings: container.settings.clone(),
            use_docker: container.use_docker,
            use_releases: container.use_releases,
        };
        let content = serde_json::to_vec_pretty(&file)?;
        atomic_write(&path, &content)?;
        Ok(())
    }

    /// Returns one container by ID.
    #[must_use]
    pub fn get(&self, id: ContainerId) -> Option<Container> {
        self.containers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Returns every registered container, ordered by ID.
    #[must_use]
    pub fn get_all(&self) -> Vec<Container> {
        let mut all: Vec<Container> = self
            .containers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        all.sort_by_key(|c| c.id);
        all
    }

    /// Returns whether a container is registered.
    #[must_use]
    pub fn exists(&self, id: ContainerId) -> bool {
        self.containers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains_key(&id)
    }

    /// Mutates a registered container in place.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ContainerNotFound`] if the container is not
    /// registered.
    pub fn update(&self, id: ContainerId, f: impl FnOnce(&mut Container)) -> Result<()> {
        let mut registry = self
            .containers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let container = registry
            .get_mut(&id)
            .ok_or(StoreError::ContainerNotFound(id))?;
        f(container);
        Ok(())
    }

    /// Returns containers matching every requested feature.
    ///
    /// A feature matches when it appears in the manifest tags or the user
    /// tags of the container.
    #[must_use]
    pub fn search(&self, features: &[String]) -> Vec<Container> {
        self.get_all()
            .into_iter()
            .filter(|c| {
                features.iter().all(|feature| {
                    c.service.tags.iter().any(|t| t == feature)
                        || c.settings.tags.contains(feature)
                })
            })
            .collect()
    }

    /// Installs a new container from a prefixed source string.
    ///
    /// # Errors
    ///
    /// Returns an error for unsupported protocols, fetch failures, or when
    /// the fetched tree carries no service manifest.
    pub async fn install(&self, source: &str, opts: InstallOptions) -> Result<Container> {
        let source = InstallSource::parse(source)?;
        let id = ContainerId::new();
        let dest = self.instance_dir(id);
        std::fs::create_dir_all(&self.instances_dir)?;

        let use_docker = opts.use_docker.unwrap_or(false);
        let use_releases = opts.use_releases.unwrap_or(false);
        let force_clone = use_docker || !use_releases;

        if let Err(err) = source.fetch(&dest, &self.services_dir, force_clone).await {
            self.remove_instance_dir(id);
            return Err(err);
        }

        let service = match read_manifest(&dest) {
            Ok(service) => service,
            Err(err) => {
                self.remove_instance_dir(id);
                return Err(err);
            }
        };

        let mut container = Container::new(id, service);
        container.use_docker = use_docker;
        container.use_releases = use_releases;

        self.write_settings(&container)?;
        self.env.save(id, &container.env)?;

        let mut registry = self
            .containers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        registry.insert(id, container.clone());
        Ok(container)
    }

    /// Removes a container from the registry and deletes its directory.
    ///
    /// Symlinked instances remove only the link, never the target tree.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ContainerNotFound`] if the container is not
    /// registered.
    pub fn delete(&self, id: ContainerId) -> Result<()> {
        let mut registry = self
            .containers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        registry
            .remove(&id)
            .ok_or(StoreError::ContainerNotFound(id))?;
        drop(registry);

        self.remove_instance_dir(id);
        Ok(())
    }

    fn remove_instance_dir(&self, id: ContainerId) {
        let dir = self.instance_dir(id);
        let result = match dir.symlink_metadata() {
            Ok(meta) if meta.file_type().is_symlink() => std::fs::remove_file(&dir),
            Ok(_) => std::fs::remove_dir_all(&dir),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            tracing::warn!(container_id = %id, error = %err, "failed to remove instance directory");
        }
    }

    /// Persists the current in-memory settings of a container.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ContainerNotFound`] if the container is not
    /// registered, or an I/O error if the write fails.
    pub fn save_settings(&self, id: ContainerId) -> Result<()> {
        let container = self.get(id).ok_or(StoreError::ContainerNotFound(id))?;
        self.write_settings(&container)
    }

    /// Replaces a container's env atomically on disk and refreshes the
    /// in-memory cache.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ContainerNotFound`] if the container is not
    /// registered, or an I/O error if the write fails.
    pub fn write_env(&self, id: ContainerId, env: BTreeMap<String, String>) -> Result<()> {
        if !self.exists(id) {
            return Err(StoreError::ContainerNotFound(id));
        }
        self.env.save(id, &env)?;
        self.update(id, |c| c.env = env)
    }
}
