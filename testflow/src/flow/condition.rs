//! Condition evaluation between stages.

use crate::core::{ConditionType, Phase};

/// Decides whether a step with `condition` may run after a stage that ended
/// with `previous_stage_outcome`.
///
/// Any outcome other than `Failed` counts as success.
#[must_use]
pub fn eligible(condition: ConditionType, previous_stage_outcome: Phase) -> bool {
    let failed = previous_stage_outcome.is_failure();
    match condition {
        ConditionType::Always => true,
        ConditionType::Success => !failed,
        ConditionType::Error => failed,
    }
}

/// The outcome a stage's conditions are evaluated against.
///
/// The first stage of a flow sees `Succeeded`. After every stage the gate
/// moves to that stage's aggregate. An entirely skipped stage aggregates to
/// `Succeeded`, so it also clears a failure seen by the stage before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionGate {
    outcome: Phase,
}

impl Default for ConditionGate {
    fn default() -> Self {
        Self::first()
    }
}

impl ConditionGate {
    /// The gate of the first stage of a flow.
    #[must_use]
    pub fn first() -> Self {
        Self {
            outcome: Phase::Succeeded,
        }
    }

    /// A gate with an explicit outcome, e.g. the main flow's result for OnExit.
    #[must_use]
    pub fn from_outcome(outcome: Phase) -> Self {
        Self {
            outcome: if outcome.is_failure() {
                Phase::Failed
            } else {
                Phase::Succeeded
            },
        }
    }

    /// The outcome conditions are evaluated against.
    #[must_use]
    pub fn outcome(&self) -> Phase {
        self.outcome
    }

    /// Returns true if a step with `condition` may run.
    #[must_use]
    pub fn admits(&self, condition: ConditionType) -> bool {
        eligible(condition, self.outcome)
    }

    /// The gate for the next stage.
    #[must_use]
    pub fn advance(self, stage_aggregate: Phase) -> Self {
        Self::from_outcome(stage_aggregate)
    }
}
