//! Error types for the testflow engine.
//!
//! Errors fall into two groups. Spec-level errors ([`MalformedFlowError`]) are
//! raised while a Testrun is parsed and abort the run before anything is
//! dispatched. Step-level errors ([`StepError`]) are contained to a single step
//! instance: the engine records them in that instance's status entry and keeps
//! going.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for testflow operations.
#[derive(Debug, Error)]
pub enum TestflowError {
    /// The Testrun specification is invalid.
    #[error("{0}")]
    Malformed(#[from] MalformedFlowError),

    /// A step instance could not be expanded, configured or dispatched.
    #[error("{0}")]
    Step(#[from] StepError),

    /// The engine configuration could not be loaded.
    #[error("{0}")]
    Config(#[from] ConfigLoadError),
}

/// Metadata about a spec error for better diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "FLOW-001-SELECTOR").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error codes for [`MalformedFlowError`].
pub mod codes {
    /// A step has both or neither of `name` and `label`.
    pub const SELECTOR: &str = "FLOW-001-SELECTOR";
    /// A config element has an invalid type/field combination.
    pub const CONFIG: &str = "FLOW-002-CONFIG";
    /// A test location has an invalid type/field combination.
    pub const LOCATION: &str = "FLOW-003-LOCATION";
    /// A kubeconfig is not valid base64.
    pub const KUBECONFIG: &str = "FLOW-004-KUBECONFIG";
    /// The Testrun envelope itself is invalid, e.g. it has no name.
    pub const TESTRUN: &str = "FLOW-005-TESTRUN";
}

/// Raised when a Testrun specification cannot be turned into a flow graph.
///
/// This is the only error that aborts a run as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed testflow: {message}")]
pub struct MalformedFlowError {
    /// The error message.
    pub message: String,
    /// Flow the error was found in (`testflow` or `onExit`), if any.
    pub flow: Option<String>,
    /// Stage index of the offending step, if any.
    pub stage: Option<usize>,
    /// Step index within the stage, if any.
    pub step: Option<usize>,
    /// Diagnostic info.
    pub error_info: ContractErrorInfo,
}

impl MalformedFlowError {
    /// Creates a new malformed flow error with a code.
    #[must_use]
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            error_info: ContractErrorInfo::new(code, message.clone()),
            message,
            flow: None,
            stage: None,
            step: None,
        }
    }

    /// Creates a selector error (both or neither of name/label).
    #[must_use]
    pub fn selector(message: impl Into<String>) -> Self {
        let mut err = Self::new(codes::SELECTOR, message);
        err.error_info = err
            .error_info
            .with_fix_hint("Set exactly one of `name` or `label` on every testflow step.");
        err
    }

    /// Creates a config element error.
    #[must_use]
    pub fn config(name: &str, message: impl Into<String>) -> Self {
        let mut err = Self::new(codes::CONFIG, format!("config '{name}': {}", message.into()));
        err.error_info = err.error_info.with_context_entry("config", name);
        err
    }

    /// Creates a test location error.
    #[must_use]
    pub fn location(index: usize, message: impl Into<String>) -> Self {
        let mut err = Self::new(codes::LOCATION, format!("testLocations[{index}]: {}", message.into()));
        err.error_info = err
            .error_info
            .with_fix_hint("git locations need `repo`, local locations need `hostPath`.");
        err
    }

    /// Creates a kubeconfig error.
    #[must_use]
    pub fn kubeconfig(key: &str, message: impl Into<String>) -> Self {
        let mut err = Self::new(codes::KUBECONFIG, format!("kubeconfig '{key}': {}", message.into()));
        err.error_info = err.error_info.with_context_entry("kubeconfig", key);
        err
    }

    /// Creates an error about the Testrun envelope.
    #[must_use]
    pub fn testrun(message: impl Into<String>) -> Self {
        Self::new(codes::TESTRUN, message)
    }

    /// Attaches the position of the offending step.
    #[must_use]
    pub fn at(mut self, flow: impl Into<String>, stage: usize, step: Option<usize>) -> Self {
        let flow = flow.into();
        self.message = match step {
            Some(step) => format!("{flow}[{stage}][{step}]: {}", self.message),
            None => format!("{flow}[{stage}]: {}", self.message),
        };
        self.flow = Some(flow);
        self.stage = Some(stage);
        self.step = step;
        self
    }
}

/// Errors contained to a single step instance.
///
/// The engine downgrades the affected instance to `Failed` and records the
/// message in its status entry; siblings and later stages are unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    /// No TestDefinition could be found for the step selector.
    #[error("location unavailable for {selector}: {reason}")]
    LocationUnavailable {
        /// The step selector (`name=...` or `label=...`).
        selector: String,
        /// Why the lookup failed.
        reason: String,
    },

    /// A config element's secret or configmap source does not exist.
    #[error("config source missing for '{name}': {source_ref}")]
    ConfigSourceMissing {
        /// The config element name.
        name: String,
        /// The referenced source, e.g. `secret/creds#token`.
        source_ref: String,
    },

    /// A TestDefinition name exists in more than one location.
    #[error("TestDefinition '{name}' is ambiguous across locations: {}", locations.join(", "))]
    AmbiguousTestDefinition {
        /// The TestDefinition name.
        name: String,
        /// The locations declaring it.
        locations: Vec<String>,
    },

    /// Two file config elements resolve to the same mount path.
    #[error("duplicate mount path '{path}' for config {}", names.join(", "))]
    DuplicateMountPath {
        /// The mount path.
        path: String,
        /// The config element names sharing the path.
        names: Vec<String>,
    },

    /// The workflow runtime refused or lost the instance.
    #[error("dispatch failed: {reason}")]
    Dispatch {
        /// The failure reason.
        reason: String,
    },
}

impl StepError {
    /// Creates a location unavailable error.
    #[must_use]
    pub fn location_unavailable(selector: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LocationUnavailable {
            selector: selector.into(),
            reason: reason.into(),
        }
    }

    /// Creates a config source missing error.
    #[must_use]
    pub fn config_source_missing(name: impl Into<String>, source_ref: impl Into<String>) -> Self {
        Self::ConfigSourceMissing {
            name: name.into(),
            source_ref: source_ref.into(),
        }
    }

    /// Creates a dispatch error.
    #[must_use]
    pub fn dispatch(reason: impl Into<String>) -> Self {
        Self::Dispatch {
            reason: reason.into(),
        }
    }

    /// Returns a stable kind name for logs and events.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LocationUnavailable { .. } => "LocationUnavailable",
            Self::ConfigSourceMissing { .. } => "ConfigSourceMissing",
            Self::AmbiguousTestDefinition { .. } => "AmbiguousTestDefinition",
            Self::DuplicateMountPath { .. } => "DuplicateMountPath",
            Self::Dispatch { .. } => "Dispatch",
        }
    }
}

/// Errors loading an [`EngineConfig`](crate::config::EngineConfig).
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    /// The file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The YAML document is invalid.
    #[error("invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The JSON document is invalid.
    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_error_position() {
        let err = MalformedFlowError::selector("step has both name and label").at("testflow", 1, Some(2));

        assert_eq!(err.stage, Some(1));
        assert_eq!(err.step, Some(2));
        assert_eq!(err.error_info.code, codes::SELECTOR);
        assert!(err.to_string().contains("testflow[1][2]"));
        assert!(err.error_info.fix_hint.is_some());
    }

    #[test]
    fn test_config_error_context() {
        let err = MalformedFlowError::config("MY_FILE", "file config requires a path");
        assert_eq!(err.error_info.context.get("config"), Some(&"MY_FILE".to_string()));
        assert!(err.message.contains("requires a path"));
    }

    #[test]
    fn test_step_error_kind() {
        let err = StepError::location_unavailable("label=smoke", "no TestDefinition matches");
        assert_eq!(err.kind(), "LocationUnavailable");
        assert!(err.to_string().contains("label=smoke"));

        let err = StepError::AmbiguousTestDefinition {
            name: "create-shoot".to_string(),
            locations: vec!["git:a".to_string(), "git:b".to_string()],
        };
        assert_eq!(err.to_string(), "TestDefinition 'create-shoot' is ambiguous across locations: git:a, git:b");
    }

    #[test]
    fn test_testflow_error_from() {
        let err: TestflowError = StepError::dispatch("backend unavailable").into();
        assert!(matches!(err, TestflowError::Step(StepError::Dispatch { .. })));
    }
}
