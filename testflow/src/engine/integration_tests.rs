//! End-to-end tests of Testrun execution against the scripted runtime.

#[cfg(test)]
mod tests {
    use crate::cancellation::CancellationToken;
    use crate::config::EngineConfig;
    use crate::core::{
        ConditionType, ConfigElement, ConfigSource, KeySelector, KubeconfigKey, Phase,
        TestDefinition, TestLocation, TestflowStep, TestflowStepStatus, TestrunStatus,
        STATE_NO_EXECUTABLE_STEPS,
    };
    use crate::engine::TestrunEngine;
    use crate::errors::{StepError, TestflowError};
    use crate::events::{CollectingEventSink, TESTRUN_COMPLETED, TESTRUN_STARTED};
    use crate::executor::{ENV_PHASE, ENV_TESTRUN_ID};
    use crate::resolve::{ConfigResolver, InMemoryConfigResolver, InMemoryLocationResolver};
    use crate::testing::{ScriptedRuntime, TestrunFixture};
    use pretty_assertions::assert_eq;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    fn engine(runtime: &Arc<ScriptedRuntime>, resolver: InMemoryLocationResolver) -> TestrunEngine {
        TestrunEngine::new(
            runtime.clone(),
            Arc::new(resolver),
            Arc::new(InMemoryConfigResolver::new()),
            EngineConfig::default(),
        )
    }

    fn only<'a>(status: &'a TestrunStatus, name: &str) -> &'a TestflowStepStatus {
        let entries = status.steps_named(name);
        assert_eq!(entries.len(), 1, "expected exactly one status entry for {name}");
        entries[0]
    }

    fn error_recovery_flow() -> TestrunFixture {
        TestrunFixture::new("recovery")
            .definitions(["a", "b", "c"])
            .stage(vec![TestflowStep::named("a")])
            .stage(vec![TestflowStep::named("b").when(ConditionType::Error)])
            .stage(vec![TestflowStep::named("c").when(ConditionType::Always)])
    }

    #[tokio::test]
    async fn test_success_path_skips_error_handler() {
        let (testrun, resolver) = error_recovery_flow().build();
        let runtime = Arc::new(ScriptedRuntime::new());

        let status = engine(&runtime, resolver)
            .execute(&testrun, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(only(&status, "a").phase, Phase::Succeeded);
        assert_eq!(only(&status, "b").phase, Phase::Skipped);
        assert_eq!(only(&status, "b").message.as_deref(), Some("condition error not met"));
        assert_eq!(only(&status, "c").phase, Phase::Succeeded);
        assert_eq!(status.phase, Phase::Succeeded);
        assert_eq!(runtime.dispatch_order(), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_error_handler_recovers_run() {
        let (testrun, resolver) = error_recovery_flow().build();
        let runtime = Arc::new(ScriptedRuntime::new().failing("a"));

        let status = engine(&runtime, resolver)
            .execute(&testrun, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(only(&status, "a").phase, Phase::Failed);
        assert_eq!(only(&status, "b").phase, Phase::Succeeded);
        assert_eq!(only(&status, "c").phase, Phase::Succeeded);
        assert_eq!(status.phase, Phase::Succeeded);
        assert_eq!(runtime.dispatch_order(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_failed_error_handler_fails_run() {
        let (testrun, resolver) = error_recovery_flow().build();
        let runtime = Arc::new(ScriptedRuntime::new().failing("a").failing("b"));

        let status = engine(&runtime, resolver)
            .execute(&testrun, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(only(&status, "c").phase, Phase::Succeeded);
        assert_eq!(status.phase, Phase::Failed);
    }

    #[tokio::test]
    async fn test_failure_in_always_stage_fails_run() {
        let (testrun, resolver) = error_recovery_flow().build();
        let runtime = Arc::new(ScriptedRuntime::new().failing("a").failing("c"));

        let status = engine(&runtime, resolver)
            .execute(&testrun, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(only(&status, "b").phase, Phase::Succeeded);
        assert_eq!(status.phase, Phase::Failed);
    }

    #[tokio::test]
    async fn test_all_error_stage_after_success_is_vacuous() {
        let (testrun, resolver) = TestrunFixture::new("vacuous-stage")
            .definitions(["a", "x", "y"])
            .stage(vec![TestflowStep::named("a")])
            .stage(vec![
                TestflowStep::named("x").when(ConditionType::Error),
                TestflowStep::named("y").when(ConditionType::Error),
            ])
            .build();
        let runtime = Arc::new(ScriptedRuntime::new());

        let status = engine(&runtime, resolver)
            .execute(&testrun, &CancellationToken::new())
            .await
            .unwrap();

        assert!(status.steps[1].iter().all(|s| s.phase == Phase::Skipped));
        assert_eq!(status.phase, Phase::Succeeded);
    }

    #[tokio::test]
    async fn test_error_handler_gated_on_previous_stage_only() {
        // a fails; b (success) is skipped, so its stage aggregates to
        // succeeded and the error handler after it does not run.
        let (testrun, resolver) = TestrunFixture::new("previous-stage-gate")
            .definitions(["a", "b", "handler"])
            .stage(vec![TestflowStep::named("a")])
            .stage(vec![TestflowStep::named("b")])
            .stage(vec![TestflowStep::named("handler").when(ConditionType::Error)])
            .build();
        let runtime = Arc::new(ScriptedRuntime::new().failing("a"));

        let status = engine(&runtime, resolver)
            .execute(&testrun, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(only(&status, "b").phase, Phase::Skipped);
        assert_eq!(only(&status, "handler").phase, Phase::Skipped);
        assert_eq!(only(&status, "handler").message.as_deref(), Some("condition error not met"));
        assert_eq!(status.phase, Phase::Failed);
        assert_eq!(runtime.dispatch_order(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_empty_flow_is_no_executable_steps() {
        let (testrun, resolver) = TestrunFixture::new("empty")
            .definitions(["cleanup"])
            .exit_stage(vec![TestflowStep::named("cleanup").when(ConditionType::Always)])
            .build();
        let runtime = Arc::new(ScriptedRuntime::new());

        let status = engine(&runtime, resolver)
            .execute(&testrun, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(status.phase, Phase::Failed);
        assert_eq!(status.state, STATE_NO_EXECUTABLE_STEPS);
        assert_eq!(runtime.dispatch_count("cleanup"), 1);
        assert!(status.completion_time.is_some());
    }

    #[tokio::test]
    async fn test_on_exit_runs_once_and_sees_main_outcome() {
        for (failing, expected_handler) in [(false, Phase::Skipped), (true, Phase::Succeeded)] {
            let (testrun, resolver) = TestrunFixture::new("exit")
                .definitions(["a", "cleanup", "report"])
                .stage(vec![TestflowStep::named("a")])
                .exit_stage(vec![
                    TestflowStep::named("cleanup").when(ConditionType::Always),
                    TestflowStep::named("report").when(ConditionType::Error),
                ])
                .build();
            let mut runtime = ScriptedRuntime::new();
            if failing {
                runtime = runtime.failing("a");
            }
            let runtime = Arc::new(runtime);

            let status = engine(&runtime, resolver)
                .execute(&testrun, &CancellationToken::new())
                .await
                .unwrap();

            assert_eq!(runtime.dispatch_count("cleanup"), 1);
            assert_eq!(only(&status, "report").phase, expected_handler);
            assert_eq!(status.steps.len(), 2);
            assert_eq!(status.steps[1][0].position("flow"), Some("onExit"));
            let phase_env = &runtime.requests_for("cleanup")[0].env;
            assert_eq!(phase_env.get(ENV_PHASE).map(String::as_str), Some("exit"));
        }
    }

    #[tokio::test]
    async fn test_label_without_match_fails_step_only() {
        let (testrun, resolver) = TestrunFixture::new("labels")
            .definition(TestDefinition::new("a", "img").with_labels(["default"]))
            .definition(TestDefinition::new("b", "img").with_labels(["default"]))
            .stage(vec![TestflowStep::labeled("default"), TestflowStep::labeled("beta")])
            .build();
        let runtime = Arc::new(ScriptedRuntime::new());

        let status = engine(&runtime, resolver)
            .execute(&testrun, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(status.steps[0].len(), 3);
        assert_eq!(only(&status, "a").phase, Phase::Succeeded);
        assert_eq!(only(&status, "b").phase, Phase::Succeeded);
        let beta = only(&status, "beta");
        assert_eq!(beta.phase, Phase::Failed);
        assert!(beta.message.as_deref().unwrap_or_default().starts_with("location unavailable"));
        assert_eq!(status.phase, Phase::Failed);
    }

    #[tokio::test]
    async fn test_config_precedence_reaches_runtime() {
        let (testrun, resolver) = TestrunFixture::new("config")
            .definitions(["a"])
            .global_config(ConfigElement::env("X", "global"))
            .global_config(ConfigElement::env("GLOBAL_ONLY", "g"))
            .stage_with_config(
                vec![TestflowStep::named("a").with_config(ConfigElement::env("X", "step"))],
                vec![ConfigElement::env("X", "stage"), ConfigElement::env("STAGE_ONLY", "s")],
            )
            .kubeconfig(KubeconfigKey::Gardener, "gardener-kubeconfig")
            .build();
        let runtime = Arc::new(ScriptedRuntime::new());

        engine(&runtime, resolver)
            .execute(&testrun, &CancellationToken::new())
            .await
            .unwrap();

        let request = &runtime.requests_for("a")[0];
        assert_eq!(request.env.get("X").map(String::as_str), Some("step"));
        assert_eq!(request.env.get("GLOBAL_ONLY").map(String::as_str), Some("g"));
        assert_eq!(request.env.get("STAGE_ONLY").map(String::as_str), Some("s"));
        assert_eq!(request.env.get(ENV_TESTRUN_ID).map(String::as_str), Some("config"));
        assert_eq!(request.files.len(), 1);
        assert_eq!(request.files[0].path, "/tmp/tm/kubeconfig/gardener.config");
        assert_eq!(request.files[0].content, b"gardener-kubeconfig");
    }

    #[tokio::test]
    async fn test_missing_secret_fails_only_that_step() {
        let (testrun, resolver) = TestrunFixture::new("secrets")
            .definitions(["a", "b"])
            .stage(vec![
                TestflowStep::named("a").with_config(ConfigElement::env_from(
                    "TOKEN",
                    ConfigSource::secret(KeySelector::new("creds", "token")),
                )),
                TestflowStep::named("b").with_config(ConfigElement::env_from(
                    "OPTIONAL",
                    ConfigSource::secret(KeySelector::new("creds", "token").optional()),
                )),
            ])
            .build();
        let runtime = Arc::new(ScriptedRuntime::new());

        let status = engine(&runtime, resolver)
            .execute(&testrun, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(only(&status, "a").phase, Phase::Failed);
        assert_eq!(only(&status, "b").phase, Phase::Succeeded);
        assert_eq!(runtime.dispatch_count("a"), 0);
        assert!(!runtime.requests_for("b")[0].env.contains_key("OPTIONAL"));
    }

    #[tokio::test]
    async fn test_duplicate_mount_path_fails_instance() {
        let (testrun, resolver) = TestrunFixture::new("mounts")
            .definitions(["a", "b"])
            .global_config(ConfigElement::file("CERT", "/etc/cert", "YQ=="))
            .stage(vec![
                TestflowStep::named("a").with_config(ConfigElement::file("OTHER", "/etc/cert", "Yg==")),
                TestflowStep::named("b"),
            ])
            .build();
        let runtime = Arc::new(ScriptedRuntime::new());

        let status = engine(&runtime, resolver)
            .execute(&testrun, &CancellationToken::new())
            .await
            .unwrap();

        let a = only(&status, "a");
        assert_eq!(a.phase, Phase::Failed);
        assert!(a.message.as_deref().unwrap_or_default().contains("/etc/cert"));
        assert_eq!(only(&status, "b").phase, Phase::Succeeded);
        assert_eq!(runtime.requests_for("b")[0].files[0].content, b"a");
    }

    #[tokio::test]
    async fn test_ambiguous_definition_and_override() {
        let second = TestLocation::git("https://github.com/org/tests", "master");
        let fixture = TestrunFixture::new("ambiguous")
            .definition(TestDefinition::new("a", "img:local"))
            .location(second.clone())
            .stage(vec![TestflowStep::named("a")]);
        let testrun = fixture.testrun();
        let resolver = fixture
            .resolver()
            .with_location(second.clone(), vec![TestDefinition::new("a", "img:git")]);
        let runtime = Arc::new(ScriptedRuntime::new());

        let status = engine(&runtime, resolver.clone())
            .execute(&testrun, &CancellationToken::new())
            .await
            .unwrap();
        let a = only(&status, "a");
        assert_eq!(a.phase, Phase::Failed);
        assert!(a.message.as_deref().unwrap_or_default().contains("ambiguous"));

        let overriding = TestrunEngine::new(
            runtime.clone(),
            Arc::new(resolver),
            Arc::new(InMemoryConfigResolver::new()),
            EngineConfig::default().with_location_override(true),
        );
        let status = overriding.execute(&testrun, &CancellationToken::new()).await.unwrap();
        assert_eq!(only(&status, "a").phase, Phase::Succeeded);
        assert_eq!(only(&status, "a").test_definition.location, Some(second));
        assert_eq!(runtime.requests_for("a")[0].image, "img:git");
    }

    #[tokio::test]
    async fn test_serial_definitions_run_after_concurrent_ones() {
        let (testrun, resolver) = TestrunFixture::new("serial")
            .definition(TestDefinition::new("s1", "img").with_labels(["all"]).with_behavior("serial"))
            .definition(TestDefinition::new("c1", "img").with_labels(["all"]))
            .definition(TestDefinition::new("s2", "img").with_labels(["all"]).with_behavior("serial"))
            .stage(vec![TestflowStep::labeled("all")])
            .build();
        let runtime = Arc::new(ScriptedRuntime::new());

        let status = engine(&runtime, resolver)
            .execute(&testrun, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(runtime.dispatch_order(), vec!["c1", "s1", "s2"]);
        let names: Vec<&str> = status.steps[0].iter().map(|s| s.test_definition.name.as_str()).collect();
        assert_eq!(names, vec!["s1", "c1", "s2"]);
        assert_eq!(status.phase, Phase::Succeeded);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_and_still_runs_on_exit() {
        let (testrun, resolver) = TestrunFixture::new("cancel")
            .definitions(["long", "next", "cleanup", "report"])
            .stage(vec![TestflowStep::named("long")])
            .stage(vec![TestflowStep::named("next")])
            .exit_stage(vec![
                TestflowStep::named("cleanup").when(ConditionType::Always),
                TestflowStep::named("report").when(ConditionType::Error),
            ])
            .build();
        let runtime = Arc::new(ScriptedRuntime::new().hanging("long"));
        let engine = engine(&runtime, resolver);
        let token = CancellationToken::new();

        let (status, ()) = tokio::join!(engine.execute(&testrun, &token), async {
            runtime.wait_for_dispatch("long").await;
            token.cancel("user abort");
        });
        let status = status.unwrap();

        assert_eq!(status.phase, Phase::Failed);
        assert_eq!(status.state, "aborted: user abort");

        let long = only(&status, "long");
        assert_eq!(long.phase, Phase::Failed);
        assert_eq!(long.message.as_deref(), Some("cancelled: user abort"));
        assert_eq!(runtime.cancelled_handles().len(), 1);

        let next = only(&status, "next");
        assert_eq!(next.phase, Phase::Skipped);
        assert_eq!(next.message.as_deref(), Some("cancelled"));
        assert_eq!(runtime.dispatch_count("next"), 0);

        assert_eq!(runtime.dispatch_count("cleanup"), 1);
        assert_eq!(runtime.dispatch_count("report"), 1);
        assert_eq!(status.steps.len(), 3);
    }

    /// A secret store that never answers.
    #[derive(Debug)]
    struct StalledConfigResolver;

    #[async_trait]
    impl ConfigResolver for StalledConfigResolver {
        async fn fetch(&self, _: &KeySelector, _: bool, _: &str) -> Result<Option<String>, StepError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_config_resolution() {
        let (testrun, resolver) = TestrunFixture::new("stalled-config")
            .definitions(["a", "b", "cleanup"])
            .stage(vec![
                TestflowStep::named("a").with_config(ConfigElement::env_from(
                    "TOKEN",
                    ConfigSource::secret(KeySelector::new("creds", "token")),
                )),
                TestflowStep::named("b"),
            ])
            .exit_stage(vec![TestflowStep::named("cleanup").when(ConditionType::Always)])
            .build();
        let runtime = Arc::new(ScriptedRuntime::new());
        let engine = TestrunEngine::new(
            runtime.clone(),
            Arc::new(resolver),
            Arc::new(StalledConfigResolver),
            EngineConfig::default(),
        );
        let token = CancellationToken::new();

        let run = async {
            let (status, ()) = tokio::join!(engine.execute(&testrun, &token), async {
                for _ in 0..5 {
                    tokio::task::yield_now().await;
                }
                token.cancel("user abort");
            });
            status
        };
        let status = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("cancellation must not wait for config resolution")
            .unwrap();

        assert_eq!(status.state, "aborted: user abort");
        assert_eq!(only(&status, "a").phase, Phase::Skipped);
        assert_eq!(only(&status, "b").phase, Phase::Skipped);
        assert_eq!(runtime.dispatch_count("a"), 0);
        assert_eq!(runtime.dispatch_count("b"), 0);
        assert_eq!(runtime.dispatch_count("cleanup"), 1);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_unresponsive_runtime_task() {
        let (testrun, resolver) = TestrunFixture::new("unresponsive")
            .definitions(["stuck", "cleanup"])
            .stage(vec![TestflowStep::named("stuck")])
            .exit_stage(vec![TestflowStep::named("cleanup").when(ConditionType::Always)])
            .build();
        let runtime = Arc::new(ScriptedRuntime::new().unresponsive("stuck"));
        let engine = engine(&runtime, resolver);
        let token = CancellationToken::new();

        let (status, ()) = tokio::join!(engine.execute(&testrun, &token), async {
            runtime.wait_for_dispatch("stuck").await;
            token.cancel("user abort");
        });
        let status = status.unwrap();
        assert_eq!(only(&status, "stuck").message.as_deref(), Some("cancelled: user abort"));
        assert_eq!(runtime.cancelled_handles().len(), 1);

        for _ in 0..10 {
            if !runtime.abandoned_handles().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(runtime.abandoned_handles(), runtime.cancelled_handles());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (testrun, resolver) = TestrunFixture::new("early")
            .definitions(["a", "cleanup"])
            .stage(vec![TestflowStep::named("a")])
            .exit_stage(vec![TestflowStep::named("cleanup").when(ConditionType::Always)])
            .build();
        let runtime = Arc::new(ScriptedRuntime::new());
        let token = CancellationToken::new();
        token.cancel("shutdown");

        let status = engine(&runtime, resolver).execute(&testrun, &token).await.unwrap();

        assert_eq!(only(&status, "a").phase, Phase::Skipped);
        assert_eq!(runtime.dispatch_count("a"), 0);
        assert_eq!(runtime.dispatch_count("cleanup"), 1);
        assert_eq!(status.state, "aborted: shutdown");
    }

    #[tokio::test]
    async fn test_malformed_testrun_dispatches_nothing() {
        let mut both = TestflowStep::named("a");
        both.label = Some("default".to_string());
        let (testrun, resolver) = TestrunFixture::new("malformed")
            .definitions(["a", "cleanup"])
            .stage(vec![both])
            .exit_stage(vec![TestflowStep::named("cleanup").when(ConditionType::Always)])
            .build();
        let runtime = Arc::new(ScriptedRuntime::new());

        let err = engine(&runtime, resolver)
            .execute(&testrun, &CancellationToken::new())
            .await
            .unwrap_err();

        let TestflowError::Malformed(malformed) = err else {
            panic!("expected a malformed testflow error");
        };
        assert_eq!(malformed.stage, Some(0));
        assert!(runtime.requests().is_empty());
        let rejected = TestrunStatus::rejected(&malformed, crate::utils::now_utc());
        assert!(rejected.state.starts_with("invalid testrun:"));
    }

    #[tokio::test]
    async fn test_status_identity_and_artifacts() {
        let (testrun, resolver) = TestrunFixture::new("identity")
            .definition(TestDefinition::new("a", "img").with_owner("dev@example.com", vec!["team@example.com".to_string()]))
            .stage(vec![TestflowStep::named("a")])
            .build();
        let runtime = Arc::new(ScriptedRuntime::new().with_artifact("a", "/testruns/identity/a.tar.gz"));

        let status = engine(&runtime, resolver)
            .execute(&testrun, &CancellationToken::new())
            .await
            .unwrap();

        let a = only(&status, "a");
        assert_eq!(a.test_definition.owner, "dev@example.com");
        assert_eq!(a.test_definition.recipients_on_failure, vec!["team@example.com"]);
        assert_eq!(a.position("flow"), Some("testflow"));
        assert_eq!(a.position("stage"), Some("0"));
        assert_eq!(a.position("step"), Some("0"));
        assert_eq!(a.export_artifact_key, "/testruns/identity/a.tar.gz");
        assert_eq!(status.workflow, "identity-wf");
        assert!(status.start_time.is_some());
    }

    #[tokio::test]
    async fn test_max_parallel_dispatch_completes_stage() {
        let (testrun, resolver) = TestrunFixture::new("bounded")
            .definition(TestDefinition::new("a", "img").with_labels(["all"]))
            .definition(TestDefinition::new("b", "img").with_labels(["all"]))
            .definition(TestDefinition::new("c", "img").with_labels(["all"]))
            .stage(vec![TestflowStep::labeled("all")])
            .build();
        let runtime = Arc::new(ScriptedRuntime::new().failing("b"));
        let engine = TestrunEngine::new(
            runtime.clone(),
            Arc::new(resolver),
            Arc::new(InMemoryConfigResolver::new()),
            EngineConfig::default().with_max_parallel_dispatch(1),
        );

        let status = engine.execute(&testrun, &CancellationToken::new()).await.unwrap();

        assert_eq!(runtime.dispatch_order(), vec!["a", "b", "c"]);
        assert_eq!(status.phase, Phase::Failed);
    }

    #[tokio::test]
    async fn test_events_and_status_updates() {
        let (testrun, resolver) = error_recovery_flow().build();
        let runtime = Arc::new(ScriptedRuntime::new());
        let sink = Arc::new(CollectingEventSink::new());
        let engine = engine(&runtime, resolver).with_event_sink(sink.clone());
        let updates = engine.subscribe();

        let status = engine.execute(&testrun, &CancellationToken::new()).await.unwrap();

        let types = sink.event_types();
        assert_eq!(types.first().map(String::as_str), Some(TESTRUN_STARTED));
        assert_eq!(types.last().map(String::as_str), Some(TESTRUN_COMPLETED));
        assert_eq!(sink.events_of_type("stage.completed").len(), 3);
        assert_eq!(sink.events_of_type("step.skipped").len(), 1);
        assert_eq!(sink.events_of_type("step.completed").len(), 2);
        assert_eq!(*updates.borrow(), status);
    }
}
