//! A scripted workflow runtime for tests.

use crate::core::Phase;
use crate::executor::{ExecutionRequest, InstanceHandle, InstanceResult, WorkflowRuntime};
use crate::utils::now_utc;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Message of a hanging instance released by `cancel`.
pub const CANCELLED_BY_RUNTIME: &str = "cancelled by runtime";

/// A `WorkflowRuntime` returning scripted phases per TestDefinition name.
///
/// Unscripted TestDefinitions succeed. Every request is recorded. Hanging
/// TestDefinitions never finish on their own; `cancel` releases them with a
/// failed result. Unresponsive TestDefinitions ignore `cancel` as well and
/// only stop when their task is dropped.
#[derive(Debug, Default)]
pub struct ScriptedRuntime {
    outcomes: HashMap<String, Phase>,
    artifacts: HashMap<String, String>,
    delays: HashMap<String, Duration>,
    hanging: HashSet<String>,
    unresponsive: HashSet<String>,
    abandoned: Arc<Mutex<Vec<InstanceHandle>>>,
    requests: Mutex<Vec<ExecutionRequest>>,
    cancelled: Mutex<Vec<InstanceHandle>>,
    waiters: Mutex<HashMap<InstanceHandle, oneshot::Sender<()>>>,
}

impl ScriptedRuntime {
    /// Creates a runtime where every instance succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the phase of a TestDefinition.
    #[must_use]
    pub fn with_outcome(mut self, test_definition: impl Into<String>, phase: Phase) -> Self {
        self.outcomes.insert(test_definition.into(), phase);
        self
    }

    /// Scripts a TestDefinition to fail.
    #[must_use]
    pub fn failing(self, test_definition: impl Into<String>) -> Self {
        self.with_outcome(test_definition, Phase::Failed)
    }

    /// Scripts the export artifact key of a TestDefinition.
    #[must_use]
    pub fn with_artifact(mut self, test_definition: impl Into<String>, key: impl Into<String>) -> Self {
        self.artifacts.insert(test_definition.into(), key.into());
        self
    }

    /// Delays the result of a TestDefinition.
    #[must_use]
    pub fn with_delay(mut self, test_definition: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(test_definition.into(), delay);
        self
    }

    /// Makes a TestDefinition hang until cancelled.
    #[must_use]
    pub fn hanging(mut self, test_definition: impl Into<String>) -> Self {
        self.hanging.insert(test_definition.into());
        self
    }

    /// Makes a TestDefinition hang and ignore `cancel`.
    #[must_use]
    pub fn unresponsive(mut self, test_definition: impl Into<String>) -> Self {
        self.unresponsive.insert(test_definition.into());
        self
    }

    /// Handles of instances whose execution was dropped before finishing.
    #[must_use]
    pub fn abandoned_handles(&self) -> Vec<InstanceHandle> {
        self.abandoned.lock().clone()
    }

    /// All recorded requests in dispatch order.
    #[must_use]
    pub fn requests(&self) -> Vec<ExecutionRequest> {
        self.requests.lock().clone()
    }

    /// Recorded requests for one TestDefinition.
    #[must_use]
    pub fn requests_for(&self, test_definition: &str) -> Vec<ExecutionRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.test_definition == test_definition)
            .cloned()
            .collect()
    }

    /// How often a TestDefinition was dispatched.
    #[must_use]
    pub fn dispatch_count(&self, test_definition: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.test_definition == test_definition)
            .count()
    }

    /// Dispatched TestDefinition names in dispatch order.
    #[must_use]
    pub fn dispatch_order(&self) -> Vec<String> {
        self.requests.lock().iter().map(|r| r.test_definition.clone()).collect()
    }

    /// Handles passed to `cancel`.
    #[must_use]
    pub fn cancelled_handles(&self) -> Vec<InstanceHandle> {
        self.cancelled.lock().clone()
    }

    /// Waits until a TestDefinition has been dispatched at least once.
    pub async fn wait_for_dispatch(&self, test_definition: &str) {
        while self.dispatch_count(test_definition) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

#[async_trait]
impl WorkflowRuntime for ScriptedRuntime {
    async fn execute(&self, request: ExecutionRequest) -> InstanceResult {
        let name = request.test_definition.clone();
        let handle = request.handle.clone();
        self.requests.lock().push(request);
        let start = now_utc();

        if self.unresponsive.contains(&name) {
            let _guard = AbandonGuard {
                handle,
                abandoned: Arc::clone(&self.abandoned),
            };
            return std::future::pending().await;
        }

        if self.hanging.contains(&name) {
            let (tx, rx) = oneshot::channel();
            self.waiters.lock().insert(handle, tx);
            let _ = rx.await;
            return InstanceResult::failed(CANCELLED_BY_RUNTIME).with_times(start, now_utc());
        }

        if let Some(delay) = self.delays.get(&name) {
            tokio::time::sleep(*delay).await;
        }

        let phase = self.outcomes.get(&name).copied().unwrap_or(Phase::Succeeded);
        let mut result = InstanceResult::new(phase).with_times(start, now_utc());
        if phase == Phase::Failed {
            result = result.with_message(format!("{name} exited with code 1"));
        }
        if let Some(key) = self.artifacts.get(&name) {
            result = result.with_artifact(key.clone());
        }
        result
    }

    async fn cancel(&self, handle: &InstanceHandle) {
        self.cancelled.lock().push(handle.clone());
        if let Some(tx) = self.waiters.lock().remove(handle) {
            let _ = tx.send(());
        }
    }
}

/// Records its handle when an unresponsive execution is dropped.
struct AbandonGuard {
    handle: InstanceHandle,
    abandoned: Arc<Mutex<Vec<InstanceHandle>>>,
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        self.abandoned.lock().push(self.handle.clone());
    }
}
