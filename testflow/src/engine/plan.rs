//! Validation of a Testrun into an executable plan.

use crate::core::{KubeconfigKey, Testrun};
use crate::errors::MalformedFlowError;
use crate::flow::{FlowGraph, FlowKind};

/// Everything the engine derives from a Testrun before the first dispatch.
#[derive(Debug, Clone)]
pub struct RunPlan {
    /// The main flow.
    pub main: FlowGraph,
    /// The OnExit flow.
    pub on_exit: FlowGraph,
    /// Decoded kubeconfigs in mount order.
    pub kubeconfigs: Vec<(KubeconfigKey, String)>,
}

impl RunPlan {
    /// Validates a Testrun and builds both flow graphs.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedFlowError`] for any spec-level problem. No step is
    /// dispatched for a Testrun that fails here.
    pub fn build(testrun: &Testrun) -> Result<Self, MalformedFlowError> {
        if testrun.metadata.name.trim().is_empty() {
            return Err(MalformedFlowError::testrun("Testrun has no name"));
        }
        testrun.spec.validate()?;

        Ok(Self {
            main: FlowGraph::build(FlowKind::Main, &testrun.spec.test_flow)?,
            on_exit: FlowGraph::build(FlowKind::OnExit, &testrun.spec.on_exit)?,
            kubeconfigs: testrun.spec.kubeconfigs.decode()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ConfigElement, TestLocation, TestflowStep};
    use crate::errors::codes;
    use crate::testing::TestrunFixture;

    #[test]
    fn test_plan_builds_both_flows() {
        let testrun = TestrunFixture::new("run")
            .stage(vec![TestflowStep::named("create")])
            .stage(vec![TestflowStep::labeled("default")])
            .exit_stage(vec![TestflowStep::named("delete")])
            .kubeconfig(KubeconfigKey::Shoot, "apiVersion: v1")
            .testrun();

        let plan = RunPlan::build(&testrun).unwrap();
        assert_eq!(plan.main.stage_count(), 2);
        assert_eq!(plan.on_exit.stage_count(), 1);
        assert_eq!(plan.on_exit.kind(), FlowKind::OnExit);
        assert_eq!(plan.kubeconfigs, vec![(KubeconfigKey::Shoot, "apiVersion: v1".to_string())]);
    }

    #[test]
    fn test_plan_rejects_malformed_exit_step() {
        let mut both = TestflowStep::named("delete");
        both.label = Some("cleanup".to_string());
        let testrun = TestrunFixture::new("run").exit_stage(vec![both]).testrun();

        let err = RunPlan::build(&testrun).unwrap_err();
        assert_eq!(err.error_info.code, codes::SELECTOR);
        assert_eq!(err.flow.as_deref(), Some("onExit"));
    }

    #[test]
    fn test_plan_rejects_invalid_location() {
        let testrun = TestrunFixture::new("run")
            .location(TestLocation {
                repo: Some("https://github.com/org/tests".to_string()),
                ..TestLocation::local("/also")
            })
            .testrun();
        let err = RunPlan::build(&testrun).unwrap_err();
        assert_eq!(err.error_info.code, codes::LOCATION);
    }

    #[test]
    fn test_plan_rejects_invalid_global_config() {
        let testrun = TestrunFixture::new("run")
            .global_config(ConfigElement::env("not-an-identifier", "x"))
            .testrun();
        let err = RunPlan::build(&testrun).unwrap_err();
        assert_eq!(err.error_info.code, codes::CONFIG);
    }

    #[test]
    fn test_plan_rejects_unnamed_testrun() {
        let testrun = TestrunFixture::new("").testrun();
        let err = RunPlan::build(&testrun).unwrap_err();
        assert_eq!(err.error_info.code, codes::TESTRUN);
    }
}
