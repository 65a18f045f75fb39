//! Step instances, execution requests and results.

use crate::core::{
    ConditionType, Phase, TestflowStepStatusTestDefinition, POSITION_FLOW, POSITION_STAGE,
    POSITION_STEP,
};
use crate::flow::{FlowKind, StepId, StepSelector};
use crate::resolve::ResolvedDefinition;
use crate::utils::Timestamp;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Stable identifier of one step instance.
///
/// Derived from the run, flow, position and TestDefinition name, so a result
/// delivered twice by the runtime maps to the same handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceHandle(String);

impl InstanceHandle {
    /// Derives the handle of an instance.
    #[must_use]
    pub fn derive(testrun: &str, flow: FlowKind, step: StepId, target: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(testrun.as_bytes());
        hasher.update([0]);
        hasher.update(flow.to_string().as_bytes());
        hasher.update([0]);
        hasher.update(step.stage.to_le_bytes());
        hasher.update(step.step.to_le_bytes());
        hasher.update(target.as_bytes());
        let digest = hex::encode(hasher.finalize());
        Self(format!("{testrun}-{}", &digest[..12]))
    }

    /// The handle as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One concrete execution of a TestDefinition arising from a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepInstance {
    /// The instance handle.
    pub handle: InstanceHandle,
    /// The flow the step belongs to.
    pub flow: FlowKind,
    /// Position of the originating step.
    pub step: StepId,
    /// The originating step's selector.
    pub selector: StepSelector,
    /// The originating step's condition.
    pub condition: ConditionType,
    /// The resolved TestDefinition, or `None` if expansion failed.
    pub definition: Option<ResolvedDefinition>,
}

impl StepInstance {
    /// Returns true if the instance must be dispatched alone.
    #[must_use]
    pub fn is_serial(&self) -> bool {
        self.definition
            .as_ref()
            .is_some_and(|d| d.definition.is_serial())
    }

    /// Name shown in the status: the TestDefinition, or the selector value.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.definition
            .as_ref()
            .map_or_else(|| self.selector.value(), ResolvedDefinition::name)
    }

    /// Builds the TestDefinition identity recorded in the status.
    #[must_use]
    pub fn status_identity(&self) -> TestflowStepStatusTestDefinition {
        let mut position = BTreeMap::new();
        position.insert(POSITION_FLOW.to_string(), self.flow.to_string());
        position.insert(POSITION_STAGE.to_string(), self.step.stage.to_string());
        position.insert(POSITION_STEP.to_string(), self.step.step.to_string());

        match &self.definition {
            Some(resolved) => TestflowStepStatusTestDefinition {
                name: resolved.name().to_string(),
                location: Some(resolved.location.clone()),
                owner: resolved.definition.spec.owner.clone(),
                recipients_on_failure: resolved.definition.spec.recipients_on_failure.clone(),
                position,
            },
            None => TestflowStepStatusTestDefinition {
                name: self.selector.value().to_string(),
                position,
                ..TestflowStepStatusTestDefinition::default()
            },
        }
    }
}

/// A file mounted into an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountedFile {
    /// Absolute mount path.
    pub path: String,
    /// File content, serialized as base64.
    #[serde(with = "crate::utils::base64_bytes")]
    pub content: Vec<u8>,
}

/// Everything the workflow runtime needs to execute one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    /// The instance handle.
    pub handle: InstanceHandle,
    /// The Testrun name.
    pub testrun: String,
    /// TestDefinition name.
    pub test_definition: String,
    /// Container image.
    pub image: String,
    /// Container command.
    pub command: Vec<String>,
    /// Container args.
    pub args: Vec<String>,
    /// Environment after config merge and resolution.
    pub env: BTreeMap<String, String>,
    /// Mounted config files and kubeconfigs.
    pub files: Vec<MountedFile>,
    /// Deadline for the instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_deadline_seconds: Option<i64>,
    /// Labels for the runtime (`flow`, `stage`, `step`).
    pub labels: HashMap<String, String>,
}

/// The terminal result of an instance as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceResult {
    /// Phase. Must be terminal to be recorded.
    pub phase: Phase,
    /// When the instance started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Timestamp>,
    /// When the instance completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<Timestamp>,
    /// Key of the exported artifact.
    #[serde(default)]
    pub export_artifact_key: String,
    /// Failure or skip reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl InstanceResult {
    /// Creates a result with a phase.
    #[must_use]
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            start_time: None,
            completion_time: None,
            export_artifact_key: String::new(),
            message: None,
        }
    }

    /// A succeeded result.
    #[must_use]
    pub fn succeeded() -> Self {
        Self::new(Phase::Succeeded)
    }

    /// A failed result with a reason.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(Phase::Failed).with_message(message)
    }

    /// A skipped result with a reason.
    #[must_use]
    pub fn skipped(message: impl Into<String>) -> Self {
        Self::new(Phase::Skipped).with_message(message)
    }

    /// Sets start and completion times.
    #[must_use]
    pub fn with_times(mut self, start: Timestamp, completion: Timestamp) -> Self {
        self.start_time = Some(start);
        self.completion_time = Some(completion);
        self
    }

    /// Sets the export artifact key.
    #[must_use]
    pub fn with_artifact(mut self, key: impl Into<String>) -> Self {
        self.export_artifact_key = key.into();
        self
    }

    /// Sets the message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
