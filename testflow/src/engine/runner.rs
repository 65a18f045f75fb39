//! The Testrun engine.

use super::RunPlan;
use crate::cancellation::CancellationToken;
use crate::config::EngineConfig;
use crate::core::{ConfigElement, Phase, Testrun, TestrunStatus};
use crate::errors::{StepError, TestflowError};
use crate::events::{
    EventSink, NoOpEventSink, STAGE_COMPLETED, STAGE_STARTED, STEP_COMPLETED, STEP_DISPATCHED,
    STEP_FAILED, STEP_SKIPPED, TESTRUN_CANCELLED, TESTRUN_COMPLETED, TESTRUN_STARTED,
};
use crate::executor::{
    ConfigLayers, ExecutionRequest, InstanceResult, StepExecutorAdapter, StepInstance,
    WorkflowRuntime,
};
use crate::flow::{ConditionGate, FlowGraph, StageNode, StepNode};
use crate::resolve::{ConfigResolver, DefinitionIndex, LocationResolver};
use crate::status::{StageSummary, StatusAggregator};
use crate::utils::now_utc;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Message of instances not dispatched because the run was cancelled.
const CANCELLED: &str = "cancelled";

/// Per-run collaborators shared by every stage.
struct RunContext<'a> {
    run_id: Uuid,
    adapter: &'a StepExecutorAdapter,
    index: &'a DefinitionIndex,
    global: &'a [ConfigElement],
}

/// What happens to an instance once its stage starts.
enum Disposition {
    Dispatch,
    Skip(String),
    Fail(StepError),
}

/// Executes Testruns: stages run strictly in order, the instances of a stage
/// run concurrently, and the next stage starts only once every instance of
/// the current one is terminal.
///
/// The OnExit flow runs exactly once after the main flow, whatever its
/// outcome, including after cancellation.
#[derive(Debug)]
pub struct TestrunEngine {
    runtime: Arc<dyn WorkflowRuntime>,
    location_resolver: Arc<dyn LocationResolver>,
    config_resolver: Arc<dyn ConfigResolver>,
    config: Arc<EngineConfig>,
    event_sink: Arc<dyn EventSink>,
    status_tx: watch::Sender<TestrunStatus>,
}

impl TestrunEngine {
    /// Creates an engine over a workflow runtime and the two resolvers.
    #[must_use]
    pub fn new(
        runtime: Arc<dyn WorkflowRuntime>,
        location_resolver: Arc<dyn LocationResolver>,
        config_resolver: Arc<dyn ConfigResolver>,
        config: EngineConfig,
    ) -> Self {
        let (status_tx, _) = watch::channel(TestrunStatus::default());
        Self {
            runtime,
            location_resolver,
            config_resolver,
            config: Arc::new(config),
            event_sink: Arc::new(NoOpEventSink),
            status_tx,
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribes to status snapshots, published whenever a stage completes
    /// and once the run is finalized.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TestrunStatus> {
        self.status_tx.subscribe()
    }

    /// Executes a Testrun to completion and returns its final status.
    ///
    /// # Errors
    ///
    /// Returns [`TestflowError::Malformed`] if the Testrun is invalid; nothing
    /// is dispatched in that case. Every other failure is contained in the
    /// returned status.
    pub async fn execute(
        &self,
        testrun: &Testrun,
        cancel: &CancellationToken,
    ) -> Result<TestrunStatus, TestflowError> {
        let plan = RunPlan::build(testrun).inspect_err(|e| {
            warn!(testrun = %testrun.metadata.name, code = %e.error_info.code, error = %e, "Testrun rejected");
        })?;
        let run_id = Uuid::new_v4();
        let span = info_span!("testrun", testrun = %testrun.metadata.name, %run_id);
        Ok(self.run(testrun, plan, run_id, cancel).instrument(span).await)
    }

    async fn run(
        &self,
        testrun: &Testrun,
        plan: RunPlan,
        run_id: Uuid,
        cancel: &CancellationToken,
    ) -> TestrunStatus {
        let name = testrun.metadata.name.as_str();
        let start = now_utc();
        let index = DefinitionIndex::load(
            self.location_resolver.as_ref(),
            &testrun.spec.test_locations,
            self.config.allow_location_override,
        )
        .await;
        let adapter = StepExecutorAdapter::new(
            Arc::clone(&self.runtime),
            Arc::clone(&self.config_resolver),
            Arc::clone(&self.config),
            name,
            plan.kubeconfigs.clone(),
        );
        let ctx = RunContext {
            run_id,
            adapter: &adapter,
            index: &index,
            global: &testrun.spec.config,
        };
        let mut aggregator = StatusAggregator::new(start, format!("{name}{}", self.config.workflow_suffix));

        info!(
            stages = plan.main.stage_count(),
            exit_stages = plan.on_exit.stage_count(),
            locations = index.location_count(),
            "Testrun started"
        );
        self.emit(
            TESTRUN_STARTED,
            json!({
                "run_id": run_id.to_string(),
                "testrun": name,
                "stages": plan.main.stage_count(),
                "exit_stages": plan.on_exit.stage_count(),
            }),
        );
        self.publish(&aggregator);

        let mut gate = ConditionGate::first();
        let mut cancel_reason: Option<String> = None;
        for stage in plan.main.stages() {
            if cancel_reason.is_none() {
                cancel_reason = reason_if_cancelled(Some(cancel));
            }
            if cancel_reason.is_some() {
                self.skip_stage(&ctx, &plan.main, stage, &mut aggregator);
                continue;
            }

            let span = info_span!("stage", flow = %plan.main.kind(), stage = stage.index);
            let (summary, cancelled) = self
                .run_stage(&ctx, &plan.main, stage, gate, &mut aggregator, Some(cancel))
                .instrument(span)
                .await;
            gate = gate.advance(summary.aggregate);
            cancel_reason = cancelled;
        }

        if let Some(reason) = &cancel_reason {
            warn!(reason = %reason, "Testrun cancelled, running OnExit");
            self.emit(TESTRUN_CANCELLED, json!({ "run_id": run_id.to_string(), "reason": reason }));
        }

        let mut gate = if cancel_reason.is_some() || !aggregator.main_executed() {
            ConditionGate::from_outcome(Phase::Failed)
        } else {
            ConditionGate::from_outcome(aggregator.run_outcome())
        };
        for stage in plan.on_exit.stages() {
            let span = info_span!("stage", flow = %plan.on_exit.kind(), stage = stage.index);
            let (summary, _) = self
                .run_stage(&ctx, &plan.on_exit, stage, gate, &mut aggregator, None)
                .instrument(span)
                .await;
            gate = gate.advance(summary.aggregate);
        }

        let status = aggregator.finalize(now_utc(), cancel_reason.as_deref());
        info!(phase = %status.phase, state = %status.state, duration = status.duration, "Testrun completed");
        self.emit(
            TESTRUN_COMPLETED,
            json!({
                "run_id": run_id.to_string(),
                "phase": status.phase.to_string(),
                "state": status.state,
                "duration": status.duration,
            }),
        );
        self.status_tx.send_replace(status.clone());
        status
    }

    /// Runs one stage up to its barrier. Returns the stage summary and the
    /// cancellation reason if the run was cancelled during the stage.
    async fn run_stage(
        &self,
        ctx: &RunContext<'_>,
        graph: &FlowGraph,
        stage: &StageNode,
        gate: ConditionGate,
        aggregator: &mut StatusAggregator,
        cancel: Option<&CancellationToken>,
    ) -> (StageSummary, Option<String>) {
        let flow = graph.kind();
        info!(steps = stage.len(), gate = %gate.outcome(), "Stage started");
        self.emit(
            STAGE_STARTED,
            json!({
                "run_id": ctx.run_id.to_string(),
                "flow": flow.to_string(),
                "stage": stage.index,
                "gate": gate.outcome().to_string(),
            }),
        );

        let mut planned: Vec<(StepInstance, &StepNode, Disposition)> = Vec::new();
        for step in graph.steps_of(stage) {
            let admitted = gate.admits(step.condition);
            if !admitted {
                debug!(step = %step.id, selector = %step.selector, condition = %step.condition, "Step not eligible");
            }
            match ctx.adapter.expand(flow, ctx.index, step) {
                Ok(instances) => {
                    for instance in instances {
                        let disposition = if admitted {
                            Disposition::Dispatch
                        } else {
                            Disposition::Skip(format!("condition {} not met", step.condition))
                        };
                        planned.push((instance, step, disposition));
                    }
                }
                Err(err) => {
                    let disposition = if admitted {
                        Disposition::Fail(err)
                    } else {
                        Disposition::Skip(format!("condition {} not met", step.condition))
                    };
                    planned.push((ctx.adapter.placeholder(flow, step), step, disposition));
                }
            }
        }

        let instances: Vec<StepInstance> = planned.iter().map(|(i, _, _)| i.clone()).collect();
        let slot = aggregator.open_stage(flow, stage.index, &instances);

        let mut concurrent = Vec::new();
        let mut serial = Vec::new();
        let mut cancelled: Option<String> = None;
        for (instance, step, disposition) in planned {
            match disposition {
                Disposition::Skip(message) => self.record_skip(ctx, aggregator, &instance, message),
                Disposition::Fail(err) => self.record_step_error(ctx, aggregator, &instance, &err),
                Disposition::Dispatch if cancelled.is_some() => {
                    self.record_skip(ctx, aggregator, &instance, CANCELLED.to_string());
                }
                Disposition::Dispatch => {
                    let layers = ConfigLayers {
                        global: ctx.global,
                        stage: &stage.config,
                        step: &step.config,
                    };
                    // Config resolution may block on the secret store.
                    let prepared = tokio::select! {
                        biased;
                        () = wait_for_cancel(cancel) => None,
                        prepared = ctx.adapter.prepare(&instance, layers) => Some(prepared),
                    };
                    match prepared {
                        None => {
                            cancelled = reason_if_cancelled(cancel);
                            self.record_skip(ctx, aggregator, &instance, CANCELLED.to_string());
                        }
                        Some(Ok(request)) if instance.is_serial() => serial.push((instance, request)),
                        Some(Ok(request)) => concurrent.push((instance, request)),
                        Some(Err(err)) => self.record_step_error(ctx, aggregator, &instance, &err),
                    }
                }
            }
        }

        if cancelled.is_some() {
            for (instance, _) in concurrent.iter().chain(&serial) {
                self.record_skip(ctx, aggregator, instance, CANCELLED.to_string());
            }
        } else {
            cancelled = self
                .dispatch_batch(ctx, aggregator, concurrent, self.config.max_parallel_dispatch, cancel)
                .await;
            if cancelled.is_none() {
                cancelled = self.dispatch_batch(ctx, aggregator, serial, 1, cancel).await;
            } else {
                for (instance, _) in serial {
                    self.record_skip(ctx, aggregator, &instance, CANCELLED.to_string());
                }
            }
        }

        let summary = aggregator.close_stage(slot);
        info!(aggregate = %summary.aggregate, executed = summary.executed_any, "Stage completed");
        self.emit(
            STAGE_COMPLETED,
            json!({
                "run_id": ctx.run_id.to_string(),
                "flow": flow.to_string(),
                "stage": stage.index,
                "aggregate": summary.aggregate.to_string(),
                "executed": summary.executed_any,
            }),
        );
        self.publish(aggregator);
        (summary, cancelled)
    }

    /// Dispatches a batch and waits for all of it. `limit` caps in-flight
    /// instances; zero means unbounded.
    async fn dispatch_batch(
        &self,
        ctx: &RunContext<'_>,
        aggregator: &mut StatusAggregator,
        batch: Vec<(StepInstance, ExecutionRequest)>,
        limit: usize,
        cancel: Option<&CancellationToken>,
    ) -> Option<String> {
        let mut queue = batch.into_iter();
        let mut in_flight = FuturesUnordered::new();
        let mut outstanding: Vec<(StepInstance, AbortHandle)> = Vec::new();

        loop {
            if let Some(reason) = reason_if_cancelled(cancel) {
                for (instance, task) in &outstanding {
                    ctx.adapter.cancel(&instance.handle).await;
                    task.abort();
                    self.record_result(ctx, aggregator, instance, InstanceResult::failed(format!("cancelled: {reason}")));
                }
                for (instance, _) in queue {
                    self.record_skip(ctx, aggregator, &instance, CANCELLED.to_string());
                }
                return Some(reason);
            }

            while limit == 0 || in_flight.len() < limit {
                let Some((instance, request)) = queue.next() else {
                    break;
                };
                info!(handle = %instance.handle, testdefinition = %instance.display_name(), "Step dispatched");
                self.emit(STEP_DISPATCHED, instance_event(ctx.run_id, &instance));
                let task = ctx.adapter.dispatch(request);
                outstanding.push((instance.clone(), task.abort_handle()));
                in_flight.push(async move { (instance, task.await) });
            }

            if in_flight.is_empty() {
                return None;
            }

            tokio::select! {
                biased;
                () = wait_for_cancel(cancel) => {}
                Some((instance, joined)) = in_flight.next() => {
                    outstanding.retain(|(o, _)| o.handle != instance.handle);
                    let result = joined.unwrap_or_else(|e| {
                        InstanceResult::failed(StepError::dispatch(format!("runtime task failed: {e}")).to_string())
                    });
                    self.record_result(ctx, aggregator, &instance, result);
                }
            }
        }
    }

    /// Records every step of a stage that is not reached because the run was
    /// cancelled, keeping the status in the shape of the flow.
    fn skip_stage(&self, ctx: &RunContext<'_>, graph: &FlowGraph, stage: &StageNode, aggregator: &mut StatusAggregator) {
        let flow = graph.kind();
        let instances: Vec<StepInstance> = graph
            .steps_of(stage)
            .iter()
            .flat_map(|step| {
                ctx.adapter
                    .expand(flow, ctx.index, step)
                    .unwrap_or_else(|_| vec![ctx.adapter.placeholder(flow, step)])
            })
            .collect();
        let slot = aggregator.open_stage(flow, stage.index, &instances);
        for instance in &instances {
            self.record_skip(ctx, aggregator, instance, CANCELLED.to_string());
        }
        let summary = aggregator.close_stage(slot);
        debug!(%flow, stage = stage.index, aggregate = %summary.aggregate, "Stage skipped after cancellation");
        self.publish(aggregator);
    }

    fn record_skip(&self, ctx: &RunContext<'_>, aggregator: &mut StatusAggregator, instance: &StepInstance, message: String) {
        let mut data = instance_event(ctx.run_id, instance);
        data["message"] = Value::String(message.clone());
        if aggregator.record(&instance.handle, InstanceResult::skipped(message)) {
            self.emit(STEP_SKIPPED, data);
        }
    }

    fn record_step_error(
        &self,
        ctx: &RunContext<'_>,
        aggregator: &mut StatusAggregator,
        instance: &StepInstance,
        err: &StepError,
    ) {
        warn!(handle = %instance.handle, step = %instance.step, kind = err.kind(), error = %err, "Step failed before dispatch");
        let now = now_utc();
        self.record_result(ctx, aggregator, instance, InstanceResult::failed(err.to_string()).with_times(now, now));
    }

    fn record_result(
        &self,
        ctx: &RunContext<'_>,
        aggregator: &mut StatusAggregator,
        instance: &StepInstance,
        result: InstanceResult,
    ) {
        let phase = result.phase;
        let mut data = instance_event(ctx.run_id, instance);
        data["phase"] = Value::String(phase.to_string());
        if let Some(message) = &result.message {
            data["message"] = Value::String(message.clone());
        }
        if !aggregator.record(&instance.handle, result) {
            return;
        }
        if phase.is_failure() {
            info!(handle = %instance.handle, testdefinition = %instance.display_name(), %phase, "Step failed");
            self.emit(STEP_FAILED, data);
        } else {
            info!(handle = %instance.handle, testdefinition = %instance.display_name(), %phase, "Step completed");
            self.emit(STEP_COMPLETED, data);
        }
    }

    fn emit(&self, event_type: &str, data: Value) {
        self.event_sink.try_emit(event_type, Some(data));
    }

    fn publish(&self, aggregator: &StatusAggregator) {
        self.status_tx.send_replace(aggregator.status().clone());
    }
}

fn instance_event(run_id: Uuid, instance: &StepInstance) -> Value {
    json!({
        "run_id": run_id.to_string(),
        "flow": instance.flow.to_string(),
        "stage": instance.step.stage,
        "step": instance.step.step,
        "testdefinition": instance.display_name(),
        "handle": instance.handle.as_str(),
    })
}

fn reason_if_cancelled(cancel: Option<&CancellationToken>) -> Option<String> {
    let token = cancel?;
    token
        .is_cancelled()
        .then(|| token.reason().unwrap_or_else(|| CANCELLED.to_string()))
}

async fn wait_for_cancel(cancel: Option<&CancellationToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}
