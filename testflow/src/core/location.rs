//! Test locations: where TestDefinitions are looked up.

use crate::errors::MalformedFlowError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The type of a TestDefinition location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationType {
    /// A git repository at a revision.
    Git,
    /// A path on the host running the workflow.
    Local,
}

/// A location to search for TestDefinitions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestLocation {
    /// The location type.
    #[serde(rename = "type")]
    pub location_type: LocationType,
    /// Repository URL. Only for git.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    /// Revision (branch, tag or commit). Only for git.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    /// Absolute host path. Only for local.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_path: Option<String>,
}

impl TestLocation {
    /// Creates a git location.
    #[must_use]
    pub fn git(repo: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            location_type: LocationType::Git,
            repo: Some(repo.into()),
            revision: Some(revision.into()),
            host_path: None,
        }
    }

    /// Creates a local location.
    #[must_use]
    pub fn local(host_path: impl Into<String>) -> Self {
        Self {
            location_type: LocationType::Local,
            repo: None,
            revision: None,
            host_path: Some(host_path.into()),
        }
    }

    /// Checks that the field set matches the location type.
    ///
    /// `index` is the position in `testLocations`, used for the error message.
    pub fn validate(&self, index: usize) -> Result<(), MalformedFlowError> {
        let set = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        match self.location_type {
            LocationType::Git => {
                if !set(&self.repo) {
                    return Err(MalformedFlowError::location(index, "git location requires `repo`"));
                }
                if set(&self.host_path) {
                    return Err(MalformedFlowError::location(index, "git location must not set `hostPath`"));
                }
            }
            LocationType::Local => {
                if !set(&self.host_path) {
                    return Err(MalformedFlowError::location(index, "local location requires `hostPath`"));
                }
                if set(&self.repo) || set(&self.revision) {
                    return Err(MalformedFlowError::location(
                        index,
                        "local location must not set `repo` or `revision`",
                    ));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for TestLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location_type {
            LocationType::Git => write!(
                f,
                "git:{}@{}",
                self.repo.as_deref().unwrap_or_default(),
                self.revision.as_deref().unwrap_or("HEAD")
            ),
            LocationType::Local => write!(f, "local:{}", self.host_path.as_deref().unwrap_or_default()),
        }
    }
}
