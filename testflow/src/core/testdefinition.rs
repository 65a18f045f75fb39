//! TestDefinitions: the concrete description of a single test.

use super::ConfigElement;
use serde::{Deserialize, Serialize};

/// The kind identifier of a TestDefinition document.
pub const TEST_DEFINITION_KIND: &str = "TestDefinition";

/// Behavior marking a TestDefinition that must not run alongside others.
pub const BEHAVIOR_SERIAL: &str = "serial";

/// Metadata of a TestDefinition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TestDefMetadata {
    /// Unique name of the TestDefinition within its location.
    pub name: String,
}

/// The actual description of the test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TestDefSpec {
    /// Owner contact.
    #[serde(default)]
    pub owner: String,
    /// Who is notified when the test fails.
    #[serde(default)]
    pub recipients_on_failure: Vec<String>,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Labels used by label selectors.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Execution behaviors, e.g. `serial`.
    #[serde(default)]
    pub behavior: Vec<String>,
    /// Deadline handed to the workflow runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_deadline_seconds: Option<i64>,
    /// Container command.
    #[serde(default)]
    pub command: Vec<String>,
    /// Container args.
    #[serde(default)]
    pub args: Vec<String>,
    /// Container image.
    #[serde(default)]
    pub image: String,
    /// Config declared by the TestDefinition itself.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config: Vec<ConfigElement>,
}

/// Describes the execution of a test.
///
/// Immutable once resolved from a location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDefinition {
    /// Document kind, always `TestDefinition`.
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Metadata.
    #[serde(default)]
    pub metadata: TestDefMetadata,
    /// Spec.
    pub spec: TestDefSpec,
}

fn default_kind() -> String {
    TEST_DEFINITION_KIND.to_string()
}

impl TestDefinition {
    /// Creates a TestDefinition with a name and image.
    #[must_use]
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            kind: default_kind(),
            metadata: TestDefMetadata { name: name.into() },
            spec: TestDefSpec {
                image: image.into(),
                ..TestDefSpec::default()
            },
        }
    }

    /// Parses a TestDefinition from a YAML document.
    pub fn from_yaml_str(document: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(document)
    }

    /// Adds labels.
    #[must_use]
    pub fn with_labels(mut self, labels: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.spec.labels.extend(labels.into_iter().map(Into::into));
        self
    }

    /// Adds a behavior.
    #[must_use]
    pub fn with_behavior(mut self, behavior: impl Into<String>) -> Self {
        self.spec.behavior.push(behavior.into());
        self
    }

    /// Sets the owner and failure recipients.
    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>, recipients: Vec<String>) -> Self {
        self.spec.owner = owner.into();
        self.spec.recipients_on_failure = recipients;
        self
    }

    /// Adds a config element.
    #[must_use]
    pub fn with_config(mut self, element: ConfigElement) -> Self {
        self.spec.config.push(element);
        self
    }

    /// Sets the active deadline.
    #[must_use]
    pub fn with_deadline(mut self, seconds: i64) -> Self {
        self.spec.active_deadline_seconds = Some(seconds);
        self
    }

    /// Returns the TestDefinition name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Returns true if the TestDefinition carries `label`.
    #[must_use]
    pub fn has_label(&self, label: &str) -> bool {
        self.spec.labels.iter().any(|l| l == label)
    }

    /// Returns true if the TestDefinition must be dispatched alone.
    #[must_use]
    pub fn is_serial(&self) -> bool {
        self.spec.behavior.iter().any(|b| b == BEHAVIOR_SERIAL)
    }

    /// Checks the fields the engine relies on.
    pub fn validate(&self) -> Result<(), String> {
        if self.kind != TEST_DEFINITION_KIND {
            return Err(format!("unexpected kind '{}'", self.kind));
        }
        if self.metadata.name.trim().is_empty() {
            return Err("metadata.name is empty".to_string());
        }
        if self.spec.image.trim().is_empty() {
            return Err(format!("TestDefinition '{}' has no image", self.metadata.name));
        }
        for element in &self.spec.config {
            element.validate().map_err(|e| e.message)?;
        }
        Ok(())
    }
}
