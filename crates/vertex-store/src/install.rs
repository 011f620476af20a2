//! Install sources.
//!
//! A container is installed from a prefixed source string:
//!
//! - `marketplace:<name>` materializes the service tree from the local
//!   catalog mirror, copied outright or hard-linked depending on
//!   `force_clone`.
//! - `localstorage:<path>` symlinks an existing directory in place.
//! - `git:<url>` clones a repository.
//!
//! Any other prefix is rejected with an unsupported-protocol error.

use crate::error::{Result, StoreError};
use crate::fs::{copy_dir_all, link_dir_all};
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Parsed install source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallSource {
    /// A service from the marketplace catalog.
    Marketplace(String),
    /// An existing local directory, linked rather than copied.
    LocalStorage(PathBuf),
    /// A git repository to clone.
    Git(String),
}

impl InstallSource {
    /// Parses a prefixed source string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnsupportedProtocol`] for unknown prefixes.
    pub fn parse(source: &str) -> Result<Self> {
        if let Some(name) = source.strip_prefix("marketplace:") {
            Ok(Self::Marketplace(name.to_string()))
        } else if let Some(path) = source.strip_prefix("localstorage:") {
            Ok(Self::LocalStorage(PathBuf::from(path)))
        } else if let Some(url) = source.strip_prefix("git:") {
            Ok(Self::Git(url.to_string()))
        } else {
            Err(StoreError::UnsupportedProtocol(source.to_string()))
        }
    }

    /// Materializes the service tree at `dest`.
    ///
    /// Catalog installs with `force_clone` copy the full tree so the
    /// instance owns its bytes; without it the tree is recreated with files
    /// hard-linked against the mirror, sharing storage. Git sources always
    /// clone.
    ///
    /// # Errors
    ///
    /// Returns an error if the source is missing or the copy, link, or clone
    /// fails.
    pub async fn fetch(&self, dest: &Path, services_dir: &Path, force_clone: bool) -> Result<()> {
        match self {
            Self::Marketplace(name) => {
                let source = services_dir.join(name);
                if !source.is_dir() {
                    return Err(StoreError::ServiceNotFound(name.clone()));
                }
                if force_clone {
                    copy_dir_all(&source, dest)?;
                } else {
                    link_dir_all(&source, dest)?;
                }
                Ok(())
            }
            Self::LocalStorage(path) => {
                std::os::unix::fs::symlink(path, dest)?;
                Ok(())
            }
            Self::Git(url) => {
                let output = Command::new("git")
                    .args(["clone", "--depth", "1", url])
                    .arg(dest)
                    .output()
                    .await?;
                if output.status.success() {
                    Ok(())
                } else {
                    Err(StoreError::GitClone(
                        String::from_utf8_lossy(&output.stderr).trim().to_string(),
                    ))
                }
            }
        }
    }
}
