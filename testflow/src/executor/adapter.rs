//! The step executor adapter: expansion, configuration and dispatch.

use super::{merge_config, ExecutionRequest, InstanceHandle, InstanceResult, MountedFile, StepInstance, WorkflowRuntime};
use crate::config::EngineConfig;
use crate::core::{ConfigElement, KubeconfigKey};
use crate::errors::StepError;
use crate::flow::{FlowKind, StepNode};
use crate::resolve::{resolve_config, ConfigResolver, DefinitionIndex, ResolvedConfig};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Directory variable pointing at the mounted kubeconfigs.
pub const ENV_KUBECONFIG_PATH: &str = "TM_KUBECONFIG_PATH";
/// Directory variable shared between steps.
pub const ENV_SHARED_PATH: &str = "TM_SHARED_PATH";
/// Directory variable whose content is exported.
pub const ENV_EXPORT_PATH: &str = "TM_EXPORT_PATH";
/// The Testrun name.
pub const ENV_TESTRUN_ID: &str = "TM_TESTRUN_ID";
/// `testflow` or `exit`.
pub const ENV_PHASE: &str = "TM_PHASE";

/// Config layers above the run's global config.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigLayers<'a> {
    /// Global run config.
    pub global: &'a [ConfigElement],
    /// Stage config.
    pub stage: &'a [ConfigElement],
    /// Step config.
    pub step: &'a [ConfigElement],
}

/// Turns steps into dispatched instances for one run.
///
/// The adapter is the only component that talks to the workflow runtime.
#[derive(Debug)]
pub struct StepExecutorAdapter {
    runtime: Arc<dyn WorkflowRuntime>,
    config_resolver: Arc<dyn ConfigResolver>,
    config: Arc<EngineConfig>,
    testrun: String,
    kubeconfigs: Vec<(KubeconfigKey, String)>,
}

impl StepExecutorAdapter {
    /// Creates an adapter for the run `testrun` with decoded kubeconfigs.
    #[must_use]
    pub fn new(
        runtime: Arc<dyn WorkflowRuntime>,
        config_resolver: Arc<dyn ConfigResolver>,
        config: Arc<EngineConfig>,
        testrun: impl Into<String>,
        kubeconfigs: Vec<(KubeconfigKey, String)>,
    ) -> Self {
        Self {
            runtime,
            config_resolver,
            config,
            testrun: testrun.into(),
            kubeconfigs,
        }
    }

    /// The Testrun name.
    #[must_use]
    pub fn testrun(&self) -> &str {
        &self.testrun
    }

    /// Expands a step into one instance per matched TestDefinition.
    ///
    /// # Errors
    ///
    /// Propagates lookup errors from the index.
    pub fn expand(&self, flow: FlowKind, index: &DefinitionIndex, step: &StepNode) -> Result<Vec<StepInstance>, StepError> {
        let resolved = index.expand(&step.selector)?;
        Ok(resolved
            .into_iter()
            .map(|definition| StepInstance {
                handle: InstanceHandle::derive(&self.testrun, flow, step.id, definition.name()),
                flow,
                step: step.id,
                selector: step.selector.clone(),
                condition: step.condition,
                definition: Some(definition),
            })
            .collect())
    }

    /// The single instance standing for a step that could not be expanded.
    #[must_use]
    pub fn placeholder(&self, flow: FlowKind, step: &StepNode) -> StepInstance {
        StepInstance {
            handle: InstanceHandle::derive(&self.testrun, flow, step.id, &step.selector.to_string()),
            flow,
            step: step.id,
            selector: step.selector.clone(),
            condition: step.condition,
            definition: None,
        }
    }

    fn system_env(&self, flow: FlowKind) -> Vec<ConfigElement> {
        vec![
            ConfigElement::env(ENV_KUBECONFIG_PATH, self.config.kubeconfig_path.clone()),
            ConfigElement::env(ENV_SHARED_PATH, self.config.shared_path.clone()),
            ConfigElement::env(ENV_EXPORT_PATH, self.config.export_path.clone()),
            ConfigElement::env(ENV_TESTRUN_ID, self.testrun.clone()),
            ConfigElement::env(ENV_PHASE, flow.phase_env()),
        ]
    }

    /// Merges and resolves config and mounts kubeconfigs for an instance.
    ///
    /// Precedence, lowest to highest: well-known variables, global, stage,
    /// step, the TestDefinition's own config.
    ///
    /// # Errors
    ///
    /// - [`StepError::LocationUnavailable`] for an unexpanded placeholder.
    /// - [`StepError::DuplicateMountPath`] on a mount path collision,
    ///   including with a kubeconfig.
    /// - [`StepError::ConfigSourceMissing`] for a missing required source.
    pub async fn prepare(&self, instance: &StepInstance, layers: ConfigLayers<'_>) -> Result<ExecutionRequest, StepError> {
        let Some(resolved) = &instance.definition else {
            return Err(StepError::location_unavailable(instance.selector.to_string(), "step was not expanded"));
        };
        let definition = &resolved.definition;

        let system = self.system_env(instance.flow);
        let merged = merge_config([
            system.as_slice(),
            layers.global,
            layers.stage,
            layers.step,
            definition.spec.config.as_slice(),
        ])?;

        let mut env = BTreeMap::new();
        let mut files = Vec::new();
        for element in &merged {
            match resolve_config(self.config_resolver.as_ref(), element, &self.config.namespace).await? {
                Some(ResolvedConfig::Env { name, value }) => {
                    env.insert(name, value);
                }
                Some(ResolvedConfig::File { path, content, .. }) => files.push(MountedFile { path, content }),
                None => debug!(handle = %instance.handle, config = %element.name, "Optional config source missing, dropped"),
            }
        }

        for (key, content) in &self.kubeconfigs {
            let path = self.config.kubeconfig_file(key.file_name());
            if files.iter().any(|f| f.path == path) {
                return Err(StepError::DuplicateMountPath {
                    path,
                    names: vec![format!("kubeconfig/{key}")],
                });
            }
            files.push(MountedFile {
                path,
                content: content.clone().into_bytes(),
            });
        }

        let mut labels = HashMap::new();
        labels.insert("flow".to_string(), instance.flow.to_string());
        labels.insert("stage".to_string(), instance.step.stage.to_string());
        labels.insert("step".to_string(), instance.step.step.to_string());

        Ok(ExecutionRequest {
            handle: instance.handle.clone(),
            testrun: self.testrun.clone(),
            test_definition: definition.name().to_string(),
            image: definition.spec.image.clone(),
            command: definition.spec.command.clone(),
            args: definition.spec.args.clone(),
            env,
            files,
            active_deadline_seconds: definition.spec.active_deadline_seconds,
            labels,
        })
    }

    /// Hands a prepared request to the runtime. Resolves to the terminal result.
    pub fn dispatch(&self, request: ExecutionRequest) -> JoinHandle<InstanceResult> {
        debug!(handle = %request.handle, testdefinition = %request.test_definition, "Dispatching instance");
        let runtime = Arc::clone(&self.runtime);
        tokio::spawn(async move { runtime.execute(request).await })
    }

    /// Cancels an in-flight instance.
    pub async fn cancel(&self, handle: &InstanceHandle) {
        self.runtime.cancel(handle).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ConfigSource, KeySelector, TestDefinition, TestLocation};
    use crate::flow::{StepId, StepSelector};
    use crate::resolve::InMemoryConfigResolver;
    use crate::testing::ScriptedRuntime;

    fn location() -> TestLocation {
        TestLocation::local("/testdefs")
    }

    fn index() -> DefinitionIndex {
        DefinitionIndex::from_resolved(
            vec![(
                location(),
                Ok(vec![
                    TestDefinition::new("create", "img:create")
                        .with_labels(["default"])
                        .with_config(ConfigElement::env("X", "definition"))
                        .with_deadline(300),
                    TestDefinition::new("check", "img:check").with_labels(["default"]),
                ]),
            )],
            false,
        )
    }

    fn adapter(kubeconfigs: Vec<(KubeconfigKey, String)>) -> StepExecutorAdapter {
        let resolver = InMemoryConfigResolver::new().with_secret_key("default", "creds", "token", "s3cr3t");
        StepExecutorAdapter::new(
            Arc::new(ScriptedRuntime::new()),
            Arc::new(resolver),
            Arc::new(EngineConfig::default()),
            "run",
            kubeconfigs,
        )
    }

    fn step(selector: StepSelector) -> StepNode {
        StepNode {
            id: StepId::new(1, 0),
            selector,
            condition: crate::core::ConditionType::Success,
            config: Vec::new(),
        }
    }

    #[test]
    fn test_expand_label() {
        let instances = adapter(Vec::new())
            .expand(FlowKind::Main, &index(), &step(StepSelector::Label("default".to_string())))
            .unwrap();
        assert_eq!(instances.len(), 2);
        assert_ne!(instances[0].handle, instances[1].handle);
        assert_eq!(instances[1].display_name(), "check");
    }

    #[tokio::test]
    async fn test_prepare_merges_and_mounts() {
        let adapter = adapter(vec![(KubeconfigKey::Shoot, "apiVersion: v1".to_string())]);
        let instance = adapter
            .expand(FlowKind::Main, &index(), &step(StepSelector::Name("check".to_string())))
            .unwrap()
            .remove(0);

        let global = vec![ConfigElement::env("X", "global"), ConfigElement::env("G", "1")];
        let stage = vec![ConfigElement::env("X", "stage")];
        let step_config = vec![
            ConfigElement::env("X", "step"),
            ConfigElement::env_from("TOKEN", ConfigSource::secret(KeySelector::new("creds", "token"))),
        ];
        let request = adapter
            .prepare(
                &instance,
                ConfigLayers {
                    global: &global,
                    stage: &stage,
                    step: &step_config,
                },
            )
            .await
            .unwrap();

        assert_eq!(request.image, "img:check");
        assert_eq!(request.env.get("X").map(String::as_str), Some("step"));
        assert_eq!(request.env.get("G").map(String::as_str), Some("1"));
        assert_eq!(request.env.get("TOKEN").map(String::as_str), Some("s3cr3t"));
        assert_eq!(request.env.get(ENV_PHASE).map(String::as_str), Some("testflow"));
        assert_eq!(request.env.get(ENV_TESTRUN_ID).map(String::as_str), Some("run"));
        assert_eq!(request.files.len(), 1);
        assert_eq!(request.files[0].path, "/tmp/tm/kubeconfig/shoot.config");
        assert_eq!(request.labels.get("stage").map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn test_definition_config_wins() {
        let adapter = adapter(Vec::new());
        let instance = adapter
            .expand(FlowKind::OnExit, &index(), &step(StepSelector::Name("create".to_string())))
            .unwrap()
            .remove(0);
        let step_config = vec![ConfigElement::env("X", "step")];
        let request = adapter
            .prepare(&instance, ConfigLayers { step: &step_config, ..ConfigLayers::default() })
            .await
            .unwrap();

        assert_eq!(request.env.get("X").map(String::as_str), Some("definition"));
        assert_eq!(request.env.get(ENV_PHASE).map(String::as_str), Some("exit"));
        assert_eq!(request.active_deadline_seconds, Some(300));
    }

    #[tokio::test]
    async fn test_user_config_overrides_well_known_env() {
        let adapter = adapter(Vec::new());
        let instance = adapter
            .expand(FlowKind::Main, &index(), &step(StepSelector::Name("check".to_string())))
            .unwrap()
            .remove(0);
        let global = vec![ConfigElement::env(ENV_SHARED_PATH, "/custom")];
        let request = adapter
            .prepare(&instance, ConfigLayers { global: &global, ..ConfigLayers::default() })
            .await
            .unwrap();
        assert_eq!(request.env.get(ENV_SHARED_PATH).map(String::as_str), Some("/custom"));
    }

    #[tokio::test]
    async fn test_file_colliding_with_kubeconfig() {
        let adapter = adapter(vec![(KubeconfigKey::Gardener, "cfg".to_string())]);
        let instance = adapter
            .expand(FlowKind::Main, &index(), &step(StepSelector::Name("check".to_string())))
            .unwrap()
            .remove(0);
        let step_config = vec![ConfigElement::file("KC", "/tmp/tm/kubeconfig/gardener.config", "YQ==")];
        let err = adapter
            .prepare(&instance, ConfigLayers { step: &step_config, ..ConfigLayers::default() })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "DuplicateMountPath");
    }

    #[tokio::test]
    async fn test_missing_source_fails_prepare() {
        let adapter = adapter(Vec::new());
        let instance = adapter
            .expand(FlowKind::Main, &index(), &step(StepSelector::Name("check".to_string())))
            .unwrap()
            .remove(0);
        let step_config = vec![ConfigElement::env_from("TOKEN", ConfigSource::secret(KeySelector::new("creds", "nope")))];
        let err = adapter
            .prepare(&instance, ConfigLayers { step: &step_config, ..ConfigLayers::default() })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ConfigSourceMissing");
    }

    #[tokio::test]
    async fn test_placeholder_cannot_be_prepared() {
        let adapter = adapter(Vec::new());
        let placeholder = adapter.placeholder(FlowKind::Main, &step(StepSelector::Label("beta".to_string())));
        assert!(adapter.prepare(&placeholder, ConfigLayers::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_dispatch_reaches_runtime() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let adapter = StepExecutorAdapter::new(
            runtime.clone(),
            Arc::new(InMemoryConfigResolver::new()),
            Arc::new(EngineConfig::default()),
            "run",
            Vec::new(),
        );
        let instance = adapter
            .expand(FlowKind::Main, &index(), &step(StepSelector::Name("check".to_string())))
            .unwrap()
            .remove(0);
        let request = adapter.prepare(&instance, ConfigLayers::default()).await.unwrap();

        let result = adapter.dispatch(request).await.unwrap();
        assert_eq!(result.phase, crate::core::Phase::Succeeded);
        assert_eq!(runtime.dispatch_count("check"), 1);
    }
}
