//! Status documents produced by the engine.

use super::{Phase, TestLocation};
use crate::errors::MalformedFlowError;
use crate::utils::Timestamp;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Position key naming the flow (`testflow` or `onExit`).
pub const POSITION_FLOW: &str = "flow";
/// Position key naming the stage index.
pub const POSITION_STAGE: &str = "stage";
/// Position key naming the step index within the stage.
pub const POSITION_STEP: &str = "step";

/// Run state for a run whose main flow executed nothing.
pub const STATE_NO_EXECUTABLE_STEPS: &str = "no executable steps";

/// Identity of the TestDefinition behind a step status entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TestflowStepStatusTestDefinition {
    /// TestDefinition name, or the step selector if expansion failed.
    #[serde(default)]
    pub name: String,
    /// Location the TestDefinition was resolved from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<TestLocation>,
    /// Owner contact.
    #[serde(default)]
    pub owner: String,
    /// Who is notified when the test fails.
    #[serde(default)]
    pub recipients_on_failure: Vec<String>,
    /// Position of the originating step (`flow`, `stage`, `step`).
    #[serde(default)]
    pub position: BTreeMap<String, String>,
}

/// The status of one step instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TestflowStepStatus {
    /// The TestDefinition identity.
    #[serde(rename = "testdefinition")]
    pub test_definition: TestflowStepStatusTestDefinition,
    /// Instance phase.
    pub phase: Phase,
    /// When the instance started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Timestamp>,
    /// When the instance completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<Timestamp>,
    /// Duration in seconds.
    #[serde(default)]
    pub duration: i64,
    /// Key of the exported artifact, if the runtime reported one.
    #[serde(default)]
    pub export_artifact_key: String,
    /// Why the instance failed or was skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TestflowStepStatus {
    /// Returns the position value for `key`.
    #[must_use]
    pub fn position(&self, key: &str) -> Option<&str> {
        self.test_definition.position.get(key).map(String::as_str)
    }
}

/// The status of a Testrun.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TestrunStatus {
    /// Summary of all executed steps.
    #[serde(default)]
    pub phase: Phase,
    /// Human readable state, carrying the cause of run-level failures.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state: String,
    /// When the first stage was evaluated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Timestamp>,
    /// When the run, including OnExit, completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<Timestamp>,
    /// `completion_time - start_time` in seconds.
    #[serde(default)]
    pub duration: i64,
    /// Name of the generated workflow.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub workflow: String,
    /// Per-stage step statuses. Main-flow stages come first, OnExit stages after.
    #[serde(default)]
    pub steps: Vec<Vec<TestflowStepStatus>>,
}

impl TestrunStatus {
    /// Builds the status of a run rejected before any dispatch.
    #[must_use]
    pub fn rejected(err: &MalformedFlowError, at: Timestamp) -> Self {
        Self {
            phase: Phase::Failed,
            state: format!("invalid testrun: {}", err.message),
            start_time: Some(at),
            completion_time: Some(at),
            ..Self::default()
        }
    }

    /// Returns the time after which the finished run may be garbage collected.
    #[must_use]
    pub fn expires_at(&self, ttl_seconds_after_finished: Option<i32>) -> Option<Timestamp> {
        let ttl = ttl_seconds_after_finished?;
        let completion = self.completion_time?;
        Some(completion + Duration::seconds(i64::from(ttl)))
    }

    /// Iterates over every step status of every stage.
    pub fn all_steps(&self) -> impl Iterator<Item = &TestflowStepStatus> {
        self.steps.iter().flatten()
    }

    /// Returns the status entries of the TestDefinition named `name`.
    #[must_use]
    pub fn steps_named(&self, name: &str) -> Vec<&TestflowStepStatus> {
        self.all_steps()
            .filter(|s| s.test_definition.name == name)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::now_utc;

    #[test]
    fn test_rejected_status() {
        let err = MalformedFlowError::selector("step has neither name nor label");
        let status = TestrunStatus::rejected(&err, now_utc());
        assert_eq!(status.phase, Phase::Failed);
        assert!(status.state.starts_with("invalid testrun:"));
        assert!(status.steps.is_empty());
    }

    #[test]
    fn test_expires_at() {
        let now = now_utc();
        let status = TestrunStatus {
            completion_time: Some(now),
            ..TestrunStatus::default()
        };
        assert_eq!(status.expires_at(Some(60)), Some(now + Duration::seconds(60)));
        assert_eq!(status.expires_at(None), None);
        assert_eq!(TestrunStatus::default().expires_at(Some(60)), None);
    }

    #[test]
    fn test_serialized_field_names() {
        let status = TestflowStepStatus {
            test_definition: TestflowStepStatusTestDefinition {
                name: "check".to_string(),
                ..Default::default()
            },
            phase: Phase::Succeeded,
            export_artifact_key: "artifacts/check".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["testdefinition"]["name"], "check");
        assert_eq!(json["exportArtifactKey"], "artifacts/check");
        assert_eq!(json["phase"], "Succeeded");
    }
}
