//! Service catalog.
//!
//! The catalog is a directory of service trees, one per service, each
//! carrying a `service.yml` manifest. The directory itself is provisioned by
//! the dependency bootstrap; this module only reads it.

use crate::error::{Result, StoreError};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use vertex_container::Service;

/// Manifest file name inside a service tree.
pub const MANIFEST_FILE: &str = "service.yml";

/// Reads the service manifest embedded in a directory.
///
/// # Errors
///
/// Returns [`StoreError::ManifestNotFound`] if the directory carries no
/// manifest, or a parse error if it is invalid.
pub fn read_manifest(dir: &Path) -> Result<Service> {
    let path = dir.join(MANIFEST_FILE);
    let content = std::fs::read_to_string(&path)
        .map_err(|_| StoreError::ManifestNotFound(path.clone()))?;
    Ok(serde_yaml::from_str(&content)?)
}

/// Loads and caches the declarative service manifests.
pub struct ServiceCatalog {
    dir: PathBuf,
    services: RwLock<Vec<Service>>,
}

impl ServiceCatalog {
    /// Creates a catalog over the given services directory.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            services: RwLock::new(Vec::new()),
        }
    }

    /// Returns the catalog directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Rescans the services directory.
    ///
    /// Unreadable or invalid manifests are logged and skipped so one broken
    /// service cannot hide the rest of the catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the services directory itself cannot be read.
    pub fn reload(&self) -> Result<()> {
        let mut services = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match read_manifest(&entry.path()) {
                Ok(service) => services.push(service),
                Err(err) => {
                    tracing::warn!(
                        path = %entry.path().display(),
                        error = %err,
                        "skipping service with unreadable manifest"
                    );
                }
            }
        }
        services.sort_by(|a, b| a.id.cmp(&b.id));

        let mut cache = self
            .services
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *cache = services;
        Ok(())
    }

    /// Returns one service by ID.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Service> {
        self.services
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }

    /// Returns every known service.
    #[must_use]
    pub fn get_all(&self) -> Vec<Service> {
        self.services
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_manifest(dir: &Path, id: &str, body: &str) {
        let service_dir = dir.join(id);
        std::fs::create_dir_all(&service_dir).unwrap();
        std::fs::write(service_dir.join(MANIFEST_FILE), body).unwrap();
    }

    #[test]
    fn reload_discovers_manifests_and_sorts_by_id() {
        let tmp = TempDir::new().unwrap();
        write_manifest(tmp.path(), "redis", "id: redis\nname: Redis\n");
        write_manifest(tmp.path(), "adguard", "id: adguard\nname: AdGuard Home\n");

        let catalog = ServiceCatalog::new(tmp.path());
        catalog.reload().unwrap();

        let all = catalog.get_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "adguard");
        assert_eq!(all[1].id, "redis");
        assert_eq!(catalog.get("redis").unwrap().name, "Redis");
        assert!(catalog.get("missing").is_none());
    }

    #[test]
    fn broken_manifest_does_not_hide_the_rest() {
        let tmp = TempDir::new().unwrap();
        write_manifest(tmp.path(), "good", "id: good\nname: Good\n");
        write_manifest(tmp.path(), "bad", "{not yaml");

        let catalog = ServiceCatalog::new(tmp.path());
        catalog.reload().unwrap();

        assert_eq!(catalog.get_all().len(), 1);
        assert!(catalog.get("good").is_some());
    }

    #[test]
    fn manifest_parses_docker_method_and_env() {
        let tmp = TempDir::new().unwrap();
        write_manifest(
            tmp.path(),
            "redis",
            r"
id: redis
name: Redis
tags: [database]
env:
  - name: PORT
    type: port
    default: '6379'
    display_name: Server port
methods:
  docker:
    image: redis:7
    ports:
      '6379': '6379'
",
        );

        let catalog = ServiceCatalog::new(tmp.path());
        catalog.reload().unwrap();

        let redis = catalog.get("redis").unwrap();
        let docker = redis.methods.docker.unwrap();
        assert_eq!(docker.image.as_deref(), Some("redis:7"));
        assert_eq!(redis.env[0].default.as_deref(), Some("6379"));
    }
}
