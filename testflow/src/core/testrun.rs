//! The Testrun resource and its declarative flow.

use super::{ConditionType, ConfigElement, TestLocation, TestrunStatus};
use crate::errors::MalformedFlowError;
use crate::utils::decode_base64;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A reference to one or more TestDefinitions, selected by name or label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TestflowStep {
    /// Exact TestDefinition name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Label matching any number of TestDefinitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// When the step runs. Empty means `success`.
    #[serde(default)]
    pub condition: ConditionType,
    /// Step-local config.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config: Vec<ConfigElement>,
}

impl TestflowStep {
    /// Creates a step selecting a TestDefinition by name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Creates a step selecting TestDefinitions by label.
    #[must_use]
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }

    /// Sets the condition.
    #[must_use]
    pub fn when(mut self, condition: ConditionType) -> Self {
        self.condition = condition;
        self
    }

    /// Adds a config element.
    #[must_use]
    pub fn with_config(mut self, element: ConfigElement) -> Self {
        self.config.push(element);
        self
    }
}

/// One stage of a [`TestFlow`]: a set of logically concurrent steps.
///
/// Serialized either as a bare array of steps or as an object carrying
/// stage-local config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(from = "FlowStageRepr", into = "FlowStageRepr")]
pub struct FlowStage {
    /// The steps of the stage, in declaration order.
    pub steps: Vec<TestflowStep>,
    /// Config applied to every step of the stage.
    pub config: Vec<ConfigElement>,
}

impl FlowStage {
    /// Creates a stage from steps.
    #[must_use]
    pub fn new(steps: Vec<TestflowStep>) -> Self {
        Self {
            steps,
            config: Vec::new(),
        }
    }

    /// Adds stage-local config.
    #[must_use]
    pub fn with_config(mut self, element: ConfigElement) -> Self {
        self.config.push(element);
        self
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum FlowStageRepr {
    Steps(Vec<TestflowStep>),
    Stage {
        steps: Vec<TestflowStep>,
        #[serde(default)]
        config: Vec<ConfigElement>,
    },
}

impl From<FlowStageRepr> for FlowStage {
    fn from(repr: FlowStageRepr) -> Self {
        match repr {
            FlowStageRepr::Steps(steps) => Self::new(steps),
            FlowStageRepr::Stage { steps, config } => Self { steps, config },
        }
    }
}

impl From<FlowStage> for FlowStageRepr {
    fn from(stage: FlowStage) -> Self {
        if stage.config.is_empty() {
            Self::Steps(stage.steps)
        } else {
            Self::Stage {
                steps: stage.steps,
                config: stage.config,
            }
        }
    }
}

/// An ordered sequence of stages.
pub type TestFlow = Vec<FlowStage>;

/// The well-known kubeconfig keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KubeconfigKey {
    /// The gardener cluster.
    Gardener,
    /// The seed cluster.
    Seed,
    /// The shoot cluster.
    Shoot,
}

impl KubeconfigKey {
    /// File name of the mounted kubeconfig.
    #[must_use]
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Gardener => "gardener.config",
            Self::Seed => "seed.config",
            Self::Shoot => "shoot.config",
        }
    }
}

impl fmt::Display for KubeconfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gardener => write!(f, "gardener"),
            Self::Seed => write!(f, "seed"),
            Self::Shoot => write!(f, "shoot"),
        }
    }
}

/// Base64 encoded kubeconfigs mounted to every testflow step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TestrunKubeconfigs {
    /// Gardener kubeconfig.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gardener: Option<String>,
    /// Seed kubeconfig.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
    /// Shoot kubeconfig.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shoot: Option<String>,
}

impl TestrunKubeconfigs {
    /// Returns the kubeconfigs that are set, in a fixed order.
    #[must_use]
    pub fn entries(&self) -> Vec<(KubeconfigKey, &str)> {
        [
            (KubeconfigKey::Gardener, &self.gardener),
            (KubeconfigKey::Seed, &self.seed),
            (KubeconfigKey::Shoot, &self.shoot),
        ]
        .into_iter()
        .filter_map(|(key, value)| {
            value
                .as_deref()
                .filter(|v| !v.trim().is_empty())
                .map(|v| (key, v))
        })
        .collect()
    }

    /// Decodes every kubeconfig that is set.
    pub fn decode(&self) -> Result<Vec<(KubeconfigKey, String)>, MalformedFlowError> {
        self.entries()
            .into_iter()
            .map(|(key, encoded)| {
                let bytes = decode_base64(encoded)
                    .map_err(|e| MalformedFlowError::kubeconfig(&key.to_string(), e.to_string()))?;
                let text = String::from_utf8(bytes).map_err(|_| {
                    MalformedFlowError::kubeconfig(&key.to_string(), "decoded kubeconfig is not UTF-8")
                })?;
                Ok((key, text))
            })
            .collect()
    }
}

/// The specification of a Testrun.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TestrunSpec {
    /// Who created the Testrun.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    /// Seconds after completion before the Testrun may be garbage collected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_finished: Option<i32>,
    /// Locations to look for TestDefinitions.
    #[serde(default)]
    pub test_locations: Vec<TestLocation>,
    /// Kubeconfigs mounted to every step.
    #[serde(default)]
    pub kubeconfigs: TestrunKubeconfigs,
    /// Global config available to all steps of both flows.
    #[serde(default)]
    pub config: Vec<ConfigElement>,
    /// The main flow.
    #[serde(default)]
    pub test_flow: TestFlow,
    /// The flow executed after the main flow, regardless of its outcome.
    #[serde(default)]
    pub on_exit: TestFlow,
}

impl TestrunSpec {
    /// Validates everything outside the flows: locations, kubeconfigs and
    /// global config.
    pub fn validate(&self) -> Result<(), MalformedFlowError> {
        for (index, location) in self.test_locations.iter().enumerate() {
            location.validate(index)?;
        }
        self.kubeconfigs.decode()?;
        for element in &self.config {
            element.validate()?;
        }
        Ok(())
    }
}

/// Metadata identifying a Testrun.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ObjectMeta {
    /// Testrun name.
    pub name: String,
    /// Namespace the Testrun lives in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// A Testrun: the description of the flow to execute plus its status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Testrun {
    /// Metadata.
    pub metadata: ObjectMeta,
    /// Spec.
    pub spec: TestrunSpec,
    /// Status.
    #[serde(default)]
    pub status: TestrunStatus,
}

impl Testrun {
    /// Creates a Testrun with a name and spec.
    #[must_use]
    pub fn new(name: impl Into<String>, spec: TestrunSpec) -> Self {
        Self {
            metadata: ObjectMeta {
                name: name.into(),
                namespace: None,
            },
            spec,
            status: TestrunStatus::default(),
        }
    }

    /// Parses a Testrun from a YAML manifest.
    pub fn from_yaml_str(manifest: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(manifest)
    }
}
