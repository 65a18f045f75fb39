//! Config elements passed to TestDefinitions as environment variables or files.

use crate::errors::MalformedFlowError;
use crate::utils::{decode_base64, is_c_identifier};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The type of a config element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigType {
    /// Exposed as an environment variable.
    Env,
    /// Mounted as a file at `path`.
    File,
}

/// Selects a key of a ConfigMap or Secret.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeySelector {
    /// Name of the referenced object.
    pub name: String,
    /// Key within the object.
    pub key: String,
    /// Whether a missing object or key is tolerated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
}

impl KeySelector {
    /// Creates a selector.
    #[must_use]
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            optional: None,
        }
    }

    /// Marks the selector optional.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = Some(true);
        self
    }

    /// Returns true if a missing source is tolerated.
    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.optional.unwrap_or(false)
    }
}

/// A source for the value of a config element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSource {
    /// Selects a key of a ConfigMap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_key_ref: Option<KeySelector>,
    /// Selects a key of a Secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key_ref: Option<KeySelector>,
}

impl ConfigSource {
    /// Creates a source reading a ConfigMap key.
    #[must_use]
    pub fn config_map(selector: KeySelector) -> Self {
        Self {
            config_map_key_ref: Some(selector),
            secret_key_ref: None,
        }
    }

    /// Creates a source reading a Secret key.
    #[must_use]
    pub fn secret(selector: KeySelector) -> Self {
        Self {
            config_map_key_ref: None,
            secret_key_ref: Some(selector),
        }
    }

    /// Returns the selector and whether it points at a secret.
    #[must_use]
    pub fn selector(&self) -> Option<(&KeySelector, bool)> {
        match (&self.config_map_key_ref, &self.secret_key_ref) {
            (Some(cm), None) => Some((cm, false)),
            (None, Some(secret)) => Some((secret, true)),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.selector() {
            Some((sel, true)) => write!(f, "secret/{}#{}", sel.name, sel.key),
            Some((sel, false)) => write!(f, "configmap/{}#{}", sel.name, sel.key),
            None => write!(f, "<invalid source>"),
        }
    }
}

/// A parameter of a certain type which is passed to TestDefinitions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigElement {
    /// Type of the config value.
    #[serde(rename = "type")]
    pub config_type: ConfigType,
    /// Name of the element. Must be a C identifier.
    pub name: String,
    /// Literal value. For files this is the base64 encoded content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Fetches the value from a secret or configmap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<ConfigSource>,
    /// Only for files. Path where the file is mounted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ConfigElement {
    /// Creates an environment variable with a literal value.
    #[must_use]
    pub fn env(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            config_type: ConfigType::Env,
            name: name.into(),
            value: Some(value.into()),
            value_from: None,
            path: None,
        }
    }

    /// Creates an environment variable read from a source.
    #[must_use]
    pub fn env_from(name: impl Into<String>, source: ConfigSource) -> Self {
        Self {
            config_type: ConfigType::Env,
            name: name.into(),
            value: None,
            value_from: Some(source),
            path: None,
        }
    }

    /// Creates a file with base64 encoded literal content.
    #[must_use]
    pub fn file(name: impl Into<String>, path: impl Into<String>, base64_value: impl Into<String>) -> Self {
        Self {
            config_type: ConfigType::File,
            name: name.into(),
            value: Some(base64_value.into()),
            value_from: None,
            path: Some(path.into()),
        }
    }

    /// Creates a file whose content is read from a source.
    #[must_use]
    pub fn file_from(name: impl Into<String>, path: impl Into<String>, source: ConfigSource) -> Self {
        Self {
            config_type: ConfigType::File,
            name: name.into(),
            value: None,
            value_from: Some(source),
            path: Some(path.into()),
        }
    }

    /// Checks the type/field combination.
    pub fn validate(&self) -> Result<(), MalformedFlowError> {
        if !is_c_identifier(&self.name) {
            return Err(MalformedFlowError::config(&self.name, "name must be a C identifier"));
        }
        if self.value.is_some() && self.value_from.is_some() {
            return Err(MalformedFlowError::config(
                &self.name,
                "only one of `value` and `valueFrom` may be set",
            ));
        }
        if let Some(source) = &self.value_from {
            if source.selector().is_none() {
                return Err(MalformedFlowError::config(
                    &self.name,
                    "`valueFrom` needs exactly one of `configMapKeyRef` and `secretKeyRef`",
                ));
            }
        }
        match self.config_type {
            ConfigType::Env => {
                if self.path.is_some() {
                    return Err(MalformedFlowError::config(&self.name, "env config must not set `path`"));
                }
            }
            ConfigType::File => {
                let Some(path) = self.path.as_deref().filter(|p| !p.trim().is_empty()) else {
                    return Err(MalformedFlowError::config(&self.name, "file config requires a `path`"));
                };
                if !path.starts_with('/') {
                    return Err(MalformedFlowError::config(&self.name, "file `path` must be absolute"));
                }
                if let Some(value) = &self.value {
                    if decode_base64(value).is_err() {
                        return Err(MalformedFlowError::config(
                            &self.name,
                            "file `value` must be base64 encoded",
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}
