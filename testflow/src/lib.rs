//! # Testflow
//!
//! The execution core of a test orchestration system.
//!
//! A `Testrun` declares an ordered list of stages. Each stage holds steps that
//! select TestDefinitions by name or by label, carry a condition (`success`,
//! `error`, `always`) and layer config over the run's global config. The engine
//! provides:
//!
//! - **Flow graphs**: validated, positionally addressable stages and steps
//! - **Condition evaluation**: which steps run given the previous stage's outcome
//! - **Step execution**: label fan-out, config merging, kubeconfig mounting and
//!   dispatch to an external workflow runtime
//! - **Status aggregation**: per-instance, per-stage and run-level phases with
//!   error-recovery semantics
//! - **Cancellation**: aborting a run while still executing its OnExit flow
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use testflow::prelude::*;
//!
//! let engine = TestrunEngine::new(runtime, locations, configs, EngineConfig::default());
//! let status = engine.execute(&testrun, &CancellationToken::new()).await?;
//! println!("{}: {}", testrun.metadata.name, status.phase);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod engine;
pub mod errors;
pub mod events;
pub mod executor;
pub mod flow;
pub mod observability;
pub mod resolve;
pub mod status;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::EngineConfig;
    pub use crate::core::{
        ConditionType, ConfigElement, ConfigSource, FlowStage, KeySelector, Phase,
        TestDefinition, TestLocation, Testrun, TestrunSpec, TestrunStatus, TestflowStep,
        TestflowStepStatus,
    };
    pub use crate::engine::TestrunEngine;
    pub use crate::errors::{MalformedFlowError, StepError, TestflowError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::executor::{ExecutionRequest, InstanceHandle, InstanceResult, WorkflowRuntime};
    pub use crate::observability::{init_logging, LogFormat};
    pub use crate::resolve::{ConfigResolver, LocationResolver};
}

pub use errors::TestflowError;
