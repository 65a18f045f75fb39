//! Pure phase folds from instances to stages and from stages to the run.

use crate::core::Phase;

/// What the run fold needs to know about a closed stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSummary {
    /// The stage aggregate.
    pub aggregate: Phase,
    /// Whether any instance of the stage executed (succeeded or failed).
    pub executed_any: bool,
    /// Whether an `error`-condition step executed in the stage.
    pub handled_error: bool,
}

impl StageSummary {
    /// Summary of a stage in which nothing executed.
    #[must_use]
    pub fn vacuous() -> Self {
        Self {
            aggregate: Phase::Succeeded,
            executed_any: false,
            handled_error: false,
        }
    }
}

/// Folds instance phases into a stage aggregate.
///
/// A stage fails if any of its instances failed. Skipped instances do not
/// contribute, so an entirely skipped stage succeeds.
#[must_use]
pub fn fold_stage<I>(phases: I) -> Phase
where
    I: IntoIterator<Item = Phase>,
{
    if phases.into_iter().any(|p| p.is_failure()) {
        Phase::Failed
    } else {
        Phase::Succeeded
    }
}

/// Folds stage summaries, in execution order, into a run phase.
///
/// A failed stage fails the run. A stage that handled an error (an
/// `error`-condition step executed) and succeeded recovers the run. Any other
/// stage leaves the outcome unchanged.
#[must_use]
pub fn fold_run<'a, I>(stages: I) -> Phase
where
    I: IntoIterator<Item = &'a StageSummary>,
{
    stages.into_iter().fold(Phase::Succeeded, |outcome, stage| {
        if stage.aggregate.is_failure() {
            Phase::Failed
        } else if stage.executed_any && stage.handled_error {
            Phase::Succeeded
        } else {
            outcome
        }
    })
}
