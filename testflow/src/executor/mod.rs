//! Step executor adapter and the workflow runtime boundary.
//!
//! This module provides:
//! - Step instances, execution requests and instance results
//! - Config merging across layers
//! - The `WorkflowRuntime` trait
//! - The adapter expanding, configuring and dispatching instances

mod adapter;
mod instance;
mod merge;
mod runtime;

pub use adapter::{
    ConfigLayers, StepExecutorAdapter, ENV_EXPORT_PATH, ENV_KUBECONFIG_PATH, ENV_PHASE,
    ENV_SHARED_PATH, ENV_TESTRUN_ID,
};
pub use instance::{ExecutionRequest, InstanceHandle, InstanceResult, MountedFile, StepInstance};
pub use merge::merge_config;
pub use runtime::WorkflowRuntime;
