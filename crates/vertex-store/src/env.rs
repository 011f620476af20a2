//! Per-container environment files.
//!
//! Env files are line-based `KEY=VALUE` under `instances/<id>/.vertex/env`.
//! Keys that no service definition declares are preserved on load; validating
//! coverage against the definitions is the supervisor's concern.

use crate::error::Result;
use crate::fs::atomic_write;
use crate::VERTEX_DIR;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use vertex_container::ContainerId;

/// Reads and writes per-container env files.
#[derive(Clone)]
pub struct EnvStore {
    instances_dir: PathBuf,
}

impl EnvStore {
    /// Creates an env store rooted at the given `instances/` directory.
    #[must_use]
    pub fn new(instances_dir: impl Into<PathBuf>) -> Self {
        Self {
            instances_dir: instances_dir.into(),
        }
    }

    fn path(&self, id: ContainerId) -> PathBuf {
        self.instances_dir
            .join(id.to_string())
            .join(VERTEX_DIR)
            .join("env")
    }

    /// Returns whether an env file exists for this container.
    #[must_use]
    pub fn exists(&self, id: ContainerId) -> bool {
        self.path(id).is_file()
    }

    /// Loads the env file for a container.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read; a missing file is an
    /// error too, callers repair it with the service defaults.
    pub fn load(&self, id: ContainerId) -> Result<BTreeMap<String, String>> {
        let content = fs::read_to_string(self.path(id))?;

        let mut env = BTreeMap::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match line.split_once('=') {
                Some((key, value)) => {
                    env.insert(key.to_string(), value.to_string());
                }
                None => {
                    tracing::warn!(container_id = %id, line, "malformed env line, skipping");
                }
            }
        }
        Ok(env)
    }

    /// Replaces the env file for a container atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, id: ContainerId, env: &BTreeMap<String, String>) -> Result<()> {
        let path = self.path(id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut content = String::new();
        for (key, value) in env {
            content.push_str(key);
            content.push('=');
            content.push_str(value);
            content.push('\n');
        }
        atomic_write(&path, content.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn save_then_load_round_trips() {
        let tmp = TempDir::new().unwrap();
        let store = EnvStore::new(tmp.path());
        let id = ContainerId::new();

        let mut env = BTreeMap::new();
        env.insert("A".to_string(), "1".to_string());
        env.insert("B".to_string(), "two words".to_string());
        env.insert("URL".to_string(), "http://host:80/x?a=b".to_string());

        store.save(id, &env).unwrap();
        assert_eq!(store.load(id).unwrap(), env);
    }

    #[test]
    fn unknown_keys_survive_a_rewrite_cycle() {
        let tmp = TempDir::new().unwrap();
        let store = EnvStore::new(tmp.path());
        let id = ContainerId::new();

        let mut env = BTreeMap::new();
        env.insert("DECLARED".to_string(), "x".to_string());
        env.insert("LEGACY_KEY".to_string(), "kept".to_string());
        store.save(id, &env).unwrap();

        let loaded = store.load(id).unwrap();
        assert_eq!(loaded.get("LEGACY_KEY").map(String::as_str), Some("kept"));
    }

    #[test]
    fn value_may_contain_equals_signs() {
        let tmp = TempDir::new().unwrap();
        let store = EnvStore::new(tmp.path());
        let id = ContainerId::new();

        let mut env = BTreeMap::new();
        env.insert("KEY".to_string(), "a=b=c".to_string());
        store.save(id, &env).unwrap();

        assert_eq!(store.load(id).unwrap().get("KEY").map(String::as_str), Some("a=b=c"));
    }

    #[test]
    fn load_of_missing_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let store = EnvStore::new(tmp.path());
        assert!(store.load(ContainerId::new()).is_err());
    }
}
