//! Service manifests.
//!
//! A service is a declarative description of how a container should be built
//! and run. Manifests are YAML files loaded from the service catalog and
//! embedded into each installed container.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Type of an environment variable definition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvType {
    /// Free-form string.
    #[default]
    String,
    /// A host port; cross-referenced with the Docker port mapping.
    Port,
}

/// A single environment variable declared by a service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvDefinition {
    /// Variable name, unique within the service.
    pub name: String,
    /// Variable type.
    #[serde(default, rename = "type")]
    pub kind: EnvType,
    /// Default value; variables without a default must be set before start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Docker execution method.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerMethod {
    /// Build from this Dockerfile in the instance directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
    /// Pull this pre-built image instead of building.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Container port to default host port mapping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<BTreeMap<String, String>>,
    /// Volume source to container target mapping. Relative sources are
    /// resolved against `instances/<id>/volumes/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<BTreeMap<String, String>>,
    /// Container env name to service env definition name mapping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<BTreeMap<String, String>>,
    /// Linux capabilities to add.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<String>>,
    /// Kernel parameters to set in the container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sysctls: Option<BTreeMap<String, String>>,
}

/// Script execution method (local process).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptMethod {
    /// Executable inside the instance directory. When absent, the runner
    /// falls back to `./<service-id>` then `./<service-id>.sh`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// The execution methods a service supports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMethods {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker: Option<DockerMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<ScriptMethod>,
}

/// A service manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Service identifier (directory name in the catalog).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Short description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Manifest tags, used by search alongside user tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Default ports exposed by the service.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    /// Declared environment variables.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvDefinition>,
    /// Execution methods.
    #[serde(default)]
    pub methods: ServiceMethods,
}

impl Service {
    /// Initial env map built from the declared defaults.
    ///
    /// Definitions without a default are omitted; the supervisor refuses to
    /// start a container until every declared name has a value.
    #[must_use]
    pub fn default_env(&self) -> BTreeMap<String, String> {
        self.env
            .iter()
            .filter_map(|def| {
                def.default
                    .as_ref()
                    .map(|value| (def.name.clone(), value.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_env_keeps_only_defaulted_definitions() {
        let service = Service {
            id: "demo".into(),
            name: "Demo".into(),
            env: vec![
                EnvDefinition {
                    name: "A".into(),
                    default: Some("1".into()),
                    ..EnvDefinition::default()
                },
                EnvDefinition {
                    name: "B".into(),
                    ..EnvDefinition::default()
                },
            ],
            ..Service::default()
        };

        let env = service.default_env();
        assert_eq!(env.len(), 1);
        assert_eq!(env.get("A").map(String::as_str), Some("1"));
    }

    #[test]
    fn env_type_deserializes_from_manifest_strings() {
        let def: EnvDefinition =
            serde_json::from_value(serde_json::json!({"name": "PORT", "type": "port"})).unwrap();
        assert_eq!(def.kind, EnvType::Port);
    }
}
