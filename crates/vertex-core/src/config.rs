//! Process-wide configuration.

use std::path::PathBuf;

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 6130;

/// Vertex configuration.
///
/// Built once at startup from the environment and CLI flags, then passed
/// down explicitly.
#[derive(Debug, Clone)]
pub struct Config {
    /// Host the HTTP server binds to.
    pub host: String,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Storage root holding `instances/`, `services/`, `client/`, and
    /// `settings/`.
    pub storage_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            storage_path: PathBuf::from("live"),
        }
    }
}

impl Config {
    /// Builds a configuration from `VERTEX_HOST`, `VERTEX_PORT`, and
    /// `VERTEX_STORAGE`, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(host) = std::env::var("VERTEX_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("VERTEX_PORT") {
            match port.parse() {
                Ok(port) => config.port = port,
                Err(_) => tracing::warn!(port, "invalid VERTEX_PORT, keeping default"),
            }
        }
        if let Ok(storage) = std::env::var("VERTEX_STORAGE") {
            config.storage_path = PathBuf::from(storage);
        }
        config
    }

    /// Public URL of the server.
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}
