//! The status aggregator: the single writer of a run's status tree.

use super::{fold_run, fold_stage, StageSummary};
use crate::core::{ConditionType, Phase, TestflowStepStatus, TestrunStatus, STATE_NO_EXECUTABLE_STEPS};
use crate::executor::{InstanceHandle, InstanceResult, StepInstance};
use crate::flow::FlowKind;
use crate::utils::{duration_seconds, Timestamp};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Message recorded for an instance that never reported a terminal result.
const NO_TERMINAL_RESULT: &str = "no terminal result reported";

#[derive(Debug)]
struct StageSlot {
    flow: FlowKind,
    index: usize,
    conditions: Vec<ConditionType>,
    closed: bool,
}

/// Folds per-instance results into the `TestrunStatus`.
///
/// Each stage occupies one slot of `status.steps`, opened in execution order:
/// main-flow stages first, OnExit stages after. Recording is idempotent per
/// instance handle; only the first terminal result is kept.
#[derive(Debug)]
pub struct StatusAggregator {
    status: TestrunStatus,
    slots: Vec<StageSlot>,
    handles: HashMap<InstanceHandle, (usize, usize)>,
    summaries: Vec<StageSummary>,
    main_executed: bool,
}

impl StatusAggregator {
    /// Starts the status of a run.
    #[must_use]
    pub fn new(start: Timestamp, workflow: impl Into<String>) -> Self {
        Self {
            status: TestrunStatus {
                phase: Phase::Running,
                start_time: Some(start),
                workflow: workflow.into(),
                ..TestrunStatus::default()
            },
            slots: Vec::new(),
            handles: HashMap::new(),
            summaries: Vec::new(),
            main_executed: false,
        }
    }

    /// Opens a stage with its instances in declaration order. Returns the slot.
    ///
    /// Every instance starts `Pending`.
    pub fn open_stage(&mut self, flow: FlowKind, index: usize, instances: &[StepInstance]) -> usize {
        let slot = self.status.steps.len();
        let mut entries = Vec::with_capacity(instances.len());
        let mut conditions = Vec::with_capacity(instances.len());
        for (position, instance) in instances.iter().enumerate() {
            entries.push(TestflowStepStatus {
                test_definition: instance.status_identity(),
                phase: Phase::Pending,
                ..TestflowStepStatus::default()
            });
            conditions.push(instance.condition);
            if self.handles.insert(instance.handle.clone(), (slot, position)).is_some() {
                warn!(handle = %instance.handle, "Instance handle opened twice, latest entry wins");
            }
        }
        self.status.steps.push(entries);
        self.slots.push(StageSlot {
            flow,
            index,
            conditions,
            closed: false,
        });
        debug!(%flow, stage = index, slot, instances = instances.len(), "Stage opened");
        slot
    }

    /// Records the result of an instance.
    ///
    /// Returns `true` if the result was written. Unknown handles, results for
    /// instances that already hold a terminal phase, and non-terminal results
    /// are ignored.
    pub fn record(&mut self, handle: &InstanceHandle, result: InstanceResult) -> bool {
        let Some(&(slot, position)) = self.handles.get(handle) else {
            warn!(%handle, "Result for unknown instance ignored");
            return false;
        };
        if !result.phase.is_terminal() {
            debug!(%handle, phase = %result.phase, "Non-terminal result ignored");
            return false;
        }
        let entry = &mut self.status.steps[slot][position];
        if entry.phase.is_terminal() {
            debug!(%handle, recorded = %entry.phase, delivered = %result.phase, "Duplicate result ignored");
            return false;
        }

        entry.phase = result.phase;
        entry.start_time = result.start_time;
        entry.completion_time = result.completion_time;
        entry.duration = match (result.start_time, result.completion_time) {
            (Some(start), Some(end)) => duration_seconds(start, end),
            _ => 0,
        };
        entry.export_artifact_key = result.export_artifact_key;
        entry.message = result.message;
        debug!(%handle, phase = %entry.phase, "Result recorded");
        true
    }

    /// The current aggregate of a stage slot.
    #[must_use]
    pub fn aggregate(&self, slot: usize) -> Phase {
        self.status
            .steps
            .get(slot)
            .map_or(Phase::Succeeded, |entries| fold_stage(entries.iter().map(|e| e.phase)))
    }

    /// Closes a stage slot. Instances still without a terminal phase become
    /// `Failed`.
    ///
    /// Closing twice returns the same summary.
    pub fn close_stage(&mut self, slot: usize) -> StageSummary {
        let Some(stage) = self.slots.get_mut(slot) else {
            return StageSummary::vacuous();
        };
        let entries = &mut self.status.steps[slot];
        if !stage.closed {
            for entry in entries.iter_mut().filter(|e| !e.phase.is_terminal()) {
                warn!(testdefinition = %entry.test_definition.name, "Instance closed without terminal result");
                entry.phase = Phase::Failed;
                entry.message = Some(NO_TERMINAL_RESULT.to_string());
            }
        }

        let executed_any = entries.iter().any(|e| e.phase.is_executed());
        let handled_error = entries
            .iter()
            .zip(&stage.conditions)
            .any(|(e, c)| *c == ConditionType::Error && e.phase.is_executed());
        let summary = StageSummary {
            aggregate: fold_stage(entries.iter().map(|e| e.phase)),
            executed_any,
            handled_error,
        };

        if !stage.closed {
            stage.closed = true;
            if stage.flow == FlowKind::Main && executed_any {
                self.main_executed = true;
            }
            self.summaries.push(summary);
            debug!(flow = %stage.flow, stage = stage.index, aggregate = %summary.aggregate, "Stage closed");
        }
        summary
    }

    /// Returns true if any main-flow instance executed.
    #[must_use]
    pub fn main_executed(&self) -> bool {
        self.main_executed
    }

    /// The run outcome over every closed stage so far.
    #[must_use]
    pub fn run_outcome(&self) -> Phase {
        fold_run(&self.summaries)
    }

    /// The current status.
    #[must_use]
    pub fn status(&self) -> &TestrunStatus {
        &self.status
    }

    /// Finalizes the run and returns its status.
    ///
    /// Open stages are closed first. A cancelled run fails with
    /// `aborted: <reason>`; a run whose main flow executed nothing fails with
    /// `no executable steps`.
    #[must_use]
    pub fn finalize(mut self, completion: Timestamp, cancel_reason: Option<&str>) -> TestrunStatus {
        for slot in 0..self.slots.len() {
            if !self.slots[slot].closed {
                let _ = self.close_stage(slot);
            }
        }

        let (phase, state) = if let Some(reason) = cancel_reason {
            (Phase::Failed, format!("aborted: {reason}"))
        } else if !self.main_executed {
            (Phase::Failed, STATE_NO_EXECUTABLE_STEPS.to_string())
        } else {
            (fold_run(&self.summaries), String::new())
        };

        self.status.phase = phase;
        self.status.state = state;
        self.status.completion_time = Some(completion);
        self.status.duration = self
            .status
            .start_time
            .map_or(0, |start| duration_seconds(start, completion));
        self.status
    }
}
