//! Engine events.
//!
//! The engine reports its progress through an [`EventSink`] in addition to
//! `tracing` logs. Event payloads are JSON objects carrying the run id and the
//! position of the stage or step.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// A run passed validation and starts its first stage.
pub const TESTRUN_STARTED: &str = "testrun.started";
/// A stage starts evaluating its steps.
pub const STAGE_STARTED: &str = "stage.started";
/// A step instance was not eligible, or the run was cancelled before it.
pub const STEP_SKIPPED: &str = "step.skipped";
/// A step instance was handed to the workflow runtime.
pub const STEP_DISPATCHED: &str = "step.dispatched";
/// A step instance succeeded.
pub const STEP_COMPLETED: &str = "step.completed";
/// A step instance failed, at expansion, preparation or execution.
pub const STEP_FAILED: &str = "step.failed";
/// A stage reached its barrier.
pub const STAGE_COMPLETED: &str = "stage.completed";
/// The run was cancelled.
pub const TESTRUN_CANCELLED: &str = "testrun.cancelled";
/// The run, including OnExit, finished.
pub const TESTRUN_COMPLETED: &str = "testrun.completed";
