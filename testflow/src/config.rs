//! Engine configuration.

use crate::errors::ConfigLoadError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings of a [`TestrunEngine`](crate::engine::TestrunEngine).
///
/// Every field has a default, so an empty document is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Namespace handed to the config resolver.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Directory the kubeconfigs are mounted into.
    #[serde(default = "default_kubeconfig_path")]
    pub kubeconfig_path: String,
    /// Directory shared between the steps of a run.
    #[serde(default = "default_shared_path")]
    pub shared_path: String,
    /// Directory whose content is exported as the step artifact.
    #[serde(default = "default_export_path")]
    pub export_path: String,
    /// Resolve duplicate TestDefinition names to the last-declared location.
    #[serde(default)]
    pub allow_location_override: bool,
    /// Suffix appended to the Testrun name to name the workflow.
    #[serde(default = "default_workflow_suffix")]
    pub workflow_suffix: String,
    /// Maximum number of concurrently running instances per stage. 0 is unbounded.
    #[serde(default)]
    pub max_parallel_dispatch: usize,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_kubeconfig_path() -> String {
    "/tmp/tm/kubeconfig".to_string()
}

fn default_shared_path() -> String {
    "/tmp/tm/shared".to_string()
}

fn default_export_path() -> String {
    "/tmp/tm/export".to_string()
}

fn default_workflow_suffix() -> String {
    "-wf".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            kubeconfig_path: default_kubeconfig_path(),
            shared_path: default_shared_path(),
            export_path: default_export_path(),
            allow_location_override: false,
            workflow_suffix: default_workflow_suffix(),
            max_parallel_dispatch: 0,
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Sets the kubeconfig mount directory.
    #[must_use]
    pub fn with_kubeconfig_path(mut self, path: impl Into<String>) -> Self {
        self.kubeconfig_path = path.into();
        self
    }

    /// Enables last-declared-wins resolution of duplicate TestDefinitions.
    #[must_use]
    pub fn with_location_override(mut self, allow: bool) -> Self {
        self.allow_location_override = allow;
        self
    }

    /// Caps concurrently running instances per stage.
    #[must_use]
    pub fn with_max_parallel_dispatch(mut self, max: usize) -> Self {
        self.max_parallel_dispatch = max;
        self
    }

    /// Parses a YAML document.
    pub fn from_yaml_str(document: &str) -> Result<Self, ConfigLoadError> {
        Ok(serde_yaml::from_str(document)?)
    }

    /// Parses a JSON document.
    pub fn from_json_str(document: &str) -> Result<Self, ConfigLoadError> {
        Ok(serde_json::from_str(document)?)
    }

    /// Loads a config file. `.json` files are parsed as JSON, anything else as YAML.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&document),
            _ => Self::from_yaml_str(&document),
        }
    }

    /// Returns the mount path of a kubeconfig file.
    #[must_use]
    pub fn kubeconfig_file(&self, file_name: &str) -> String {
        format!("{}/{}", self.kubeconfig_path.trim_end_matches('/'), file_name)
    }
}
