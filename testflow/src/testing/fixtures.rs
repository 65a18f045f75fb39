//! Builders for Testruns and their TestDefinitions.

use crate::core::{
    ConfigElement, FlowStage, KubeconfigKey, TestDefinition, TestLocation, Testrun, TestrunSpec,
    TestflowStep,
};
use crate::resolve::InMemoryLocationResolver;
use base64::Engine as _;

/// Host path of the fixture's local location.
pub const FIXTURE_LOCATION: &str = "/testdefs";

/// Builds a Testrun together with a location resolver serving its
/// TestDefinitions from one local location.
#[derive(Debug, Clone)]
pub struct TestrunFixture {
    name: String,
    definitions: Vec<TestDefinition>,
    spec: TestrunSpec,
}

impl TestrunFixture {
    /// Starts a fixture for a Testrun named `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            definitions: Vec::new(),
            spec: TestrunSpec {
                test_locations: vec![TestLocation::local(FIXTURE_LOCATION)],
                ..TestrunSpec::default()
            },
        }
    }

    /// Adds a TestDefinition to the fixture location.
    #[must_use]
    pub fn definition(mut self, definition: TestDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    /// Adds plain TestDefinitions named after `names`.
    #[must_use]
    pub fn definitions<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        for name in names {
            self.definitions.push(TestDefinition::new(name, format!("testmachinery/{name}:latest")));
        }
        self
    }

    /// Appends a main-flow stage.
    #[must_use]
    pub fn stage(mut self, steps: Vec<TestflowStep>) -> Self {
        self.spec.test_flow.push(FlowStage::new(steps));
        self
    }

    /// Appends a main-flow stage with stage config.
    #[must_use]
    pub fn stage_with_config(mut self, steps: Vec<TestflowStep>, config: Vec<ConfigElement>) -> Self {
        self.spec.test_flow.push(FlowStage { steps, config });
        self
    }

    /// Appends an OnExit stage.
    #[must_use]
    pub fn exit_stage(mut self, steps: Vec<TestflowStep>) -> Self {
        self.spec.on_exit.push(FlowStage::new(steps));
        self
    }

    /// Adds a global config element.
    #[must_use]
    pub fn global_config(mut self, element: ConfigElement) -> Self {
        self.spec.config.push(element);
        self
    }

    /// Sets a kubeconfig from its plain content.
    #[must_use]
    pub fn kubeconfig(mut self, key: KubeconfigKey, content: &str) -> Self {
        let encoded = Some(base64::engine::general_purpose::STANDARD.encode(content));
        match key {
            KubeconfigKey::Gardener => self.spec.kubeconfigs.gardener = encoded,
            KubeconfigKey::Seed => self.spec.kubeconfigs.seed = encoded,
            KubeconfigKey::Shoot => self.spec.kubeconfigs.shoot = encoded,
        }
        self
    }

    /// Adds a test location next to the fixture location.
    #[must_use]
    pub fn location(mut self, location: TestLocation) -> Self {
        self.spec.test_locations.push(location);
        self
    }

    /// The Testrun.
    #[must_use]
    pub fn testrun(&self) -> Testrun {
        Testrun::new(self.name.clone(), self.spec.clone())
    }

    /// A location resolver serving the fixture's TestDefinitions.
    #[must_use]
    pub fn resolver(&self) -> InMemoryLocationResolver {
        InMemoryLocationResolver::new()
            .with_location(TestLocation::local(FIXTURE_LOCATION), self.definitions.clone())
    }

    /// The Testrun and its resolver.
    #[must_use]
    pub fn build(self) -> (Testrun, InMemoryLocationResolver) {
        (self.testrun(), self.resolver())
    }
}
