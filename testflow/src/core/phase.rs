//! Phase and condition enums shared by instances, stages and runs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle phase of a step instance, a stage or a whole run.
///
/// The serialized names follow the workflow backend's node phases, with the
/// engine-specific `init` phase for runs that have not been picked up yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Phase {
    /// The run has been accepted but nothing has been evaluated.
    #[default]
    #[serde(rename = "init")]
    Init,
    /// Waiting to be dispatched.
    #[serde(rename = "Pending")]
    Pending,
    /// Dispatched and not yet terminal.
    #[serde(rename = "Running")]
    Running,
    /// Completed successfully.
    #[serde(rename = "Succeeded")]
    Succeeded,
    /// Completed with a failure.
    #[serde(rename = "Failed")]
    Failed,
    /// Not executed because its condition was not met.
    #[serde(rename = "Skipped")]
    Skipped,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Failed => write!(f, "Failed"),
            Self::Skipped => write!(f, "Skipped"),
        }
    }
}

impl Phase {
    /// Returns true if the phase can no longer change.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Returns true if the phase represents an executed instance.
    ///
    /// Skipped instances never count as executed.
    #[must_use]
    pub fn is_executed(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Returns true if the phase is a failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

/// When a testflow step is executed, relative to the previous stage's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConditionType {
    /// Run only if the previous stage succeeded. An empty condition means success.
    #[default]
    #[serde(alias = "")]
    Success,
    /// Run only if the previous stage failed.
    Error,
    /// Run regardless of the previous stage.
    Always,
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
            Self::Always => write!(f, "always"),
        }
    }
}
