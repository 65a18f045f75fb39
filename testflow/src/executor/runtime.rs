//! The boundary to the external workflow runtime.

use super::{ExecutionRequest, InstanceHandle, InstanceResult};
use async_trait::async_trait;
use std::fmt::Debug;

/// The external runtime that physically executes step instances.
///
/// `execute` resolves once the instance reached a terminal phase; how the
/// runtime learns about completion (push or poll) is its own concern. Retries,
/// if any, happen inside the runtime.
#[async_trait]
pub trait WorkflowRuntime: Send + Sync + Debug {
    /// Executes an instance and returns its terminal result.
    async fn execute(&self, request: ExecutionRequest) -> InstanceResult;

    /// Cancels an in-flight instance. Unknown handles are ignored.
    async fn cancel(&self, handle: &InstanceHandle);
}
