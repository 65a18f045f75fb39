//! Config resolution: turning config elements into environment variables and files.

use crate::core::{ConfigElement, ConfigType, KeySelector};
use crate::errors::StepError;
use crate::utils::decode_base64;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;

/// A config element resolved to its concrete value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResolvedConfig {
    /// An environment variable.
    Env {
        /// Variable name.
        name: String,
        /// Variable value.
        value: String,
    },
    /// A file mounted into the instance.
    File {
        /// Config element name.
        name: String,
        /// Absolute mount path.
        path: String,
        /// File content. Literal values may be binary.
        #[serde(with = "crate::utils::base64_bytes")]
        content: Vec<u8>,
    },
}

impl ResolvedConfig {
    /// The config element name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Env { name, .. } | Self::File { name, .. } => name,
        }
    }
}

/// Reads keys of ConfigMaps and Secrets.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfigResolver: Send + Sync + Debug {
    /// Fetches the value a selector points at.
    ///
    /// Returns `Ok(None)` if the object or key does not exist.
    async fn fetch(
        &self,
        selector: &KeySelector,
        secret: bool,
        namespace: &str,
    ) -> Result<Option<String>, StepError>;
}

/// Resolves a config element.
///
/// Returns `Ok(None)` when an optional source is missing, in which case the
/// element is dropped.
///
/// # Errors
///
/// Returns [`StepError::ConfigSourceMissing`] if a required source is missing.
pub async fn resolve_config(
    resolver: &dyn ConfigResolver,
    element: &ConfigElement,
    namespace: &str,
) -> Result<Option<ResolvedConfig>, StepError> {
    let value = match (&element.value, &element.value_from) {
        (_, Some(source)) => {
            let Some((selector, secret)) = source.selector() else {
                return Err(StepError::config_source_missing(&element.name, source.to_string()));
            };
            match resolver.fetch(selector, secret, namespace).await? {
                Some(value) => value.into_bytes(),
                None if selector.is_optional() => return Ok(None),
                None => return Err(StepError::config_source_missing(&element.name, source.to_string())),
            }
        }
        (Some(value), None) => match element.config_type {
            ConfigType::Env => value.clone().into_bytes(),
            ConfigType::File => decode_base64(value).map_err(|e| {
                StepError::config_source_missing(&element.name, format!("invalid base64 value: {e}"))
            })?,
        },
        (None, None) => Vec::new(),
    };

    Ok(Some(match element.config_type {
        ConfigType::Env => ResolvedConfig::Env {
            name: element.name.clone(),
            value: String::from_utf8(value).map_err(|_| {
                StepError::config_source_missing(&element.name, "environment value is not UTF-8")
            })?,
        },
        ConfigType::File => ResolvedConfig::File {
            name: element.name.clone(),
            path: element.path.clone().unwrap_or_default(),
            content: value,
        },
    }))
}

/// A config resolver serving ConfigMaps and Secrets from memory.
#[derive(Debug, Default, Clone)]
pub struct InMemoryConfigResolver {
    config_maps: HashMap<(String, String), HashMap<String, String>>,
    secrets: HashMap<(String, String), HashMap<String, String>>,
}

impl InMemoryConfigResolver {
    /// Creates an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a ConfigMap key.
    #[must_use]
    pub fn with_config_map_key(
        mut self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.config_maps
            .entry((namespace.into(), name.into()))
            .or_default()
            .insert(key.into(), value.into());
        self
    }

    /// Adds a Secret key.
    #[must_use]
    pub fn with_secret_key(
        mut self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.secrets
            .entry((namespace.into(), name.into()))
            .or_default()
            .insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl ConfigResolver for InMemoryConfigResolver {
    async fn fetch(
        &self,
        selector: &KeySelector,
        secret: bool,
        namespace: &str,
    ) -> Result<Option<String>, StepError> {
        let store = if secret { &self.secrets } else { &self.config_maps };
        Ok(store
            .get(&(namespace.to_string(), selector.name.clone()))
            .and_then(|keys| keys.get(&selector.key))
            .cloned())
    }
}
