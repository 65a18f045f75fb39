//! The flow graph: an arena of step descriptors addressed by `(stage, step)`.

use crate::core::{ConditionType, ConfigElement, TestFlow, TestflowStep};
use crate::errors::MalformedFlowError;
use std::fmt;
use std::ops::Range;

/// Which of the two flows of a Testrun a graph was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowKind {
    /// The main `testFlow`.
    Main,
    /// The `onExit` flow.
    OnExit,
}

impl FlowKind {
    /// Value of the `TM_PHASE` variable for instances of this flow.
    #[must_use]
    pub fn phase_env(&self) -> &'static str {
        match self {
            Self::Main => "testflow",
            Self::OnExit => "exit",
        }
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Main => write!(f, "testflow"),
            Self::OnExit => write!(f, "onExit"),
        }
    }
}

/// Position of a step in its flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepId {
    /// Stage index.
    pub stage: usize,
    /// Step index within the stage, in declaration order.
    pub step: usize,
}

impl StepId {
    /// Creates a step id.
    #[must_use]
    pub fn new(stage: usize, step: usize) -> Self {
        Self { stage, step }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}][{}]", self.stage, self.step)
    }
}

/// How a step selects TestDefinitions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StepSelector {
    /// Exactly the TestDefinition with this name.
    Name(String),
    /// Every TestDefinition carrying this label.
    Label(String),
}

impl fmt::Display for StepSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "name={name}"),
            Self::Label(label) => write!(f, "label={label}"),
        }
    }
}

impl StepSelector {
    fn from_step(step: &TestflowStep) -> Result<Self, MalformedFlowError> {
        let non_empty = |v: &Option<String>| v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
        match (non_empty(&step.name), non_empty(&step.label)) {
            (Some(name), None) => Ok(Self::Name(name)),
            (None, Some(label)) => Ok(Self::Label(label)),
            (Some(_), Some(_)) => Err(MalformedFlowError::selector("step sets both `name` and `label`")),
            (None, None) => Err(MalformedFlowError::selector("step sets neither `name` nor `label`")),
        }
    }

    /// The name or label.
    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            Self::Name(v) | Self::Label(v) => v,
        }
    }
}

/// A validated step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepNode {
    /// Position in the flow.
    pub id: StepId,
    /// The selector.
    pub selector: StepSelector,
    /// The condition, defaulted to `success`.
    pub condition: ConditionType,
    /// Step-local config.
    pub config: Vec<ConfigElement>,
}

/// A validated stage. Its steps live in the graph's arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageNode {
    /// Stage index.
    pub index: usize,
    /// Stage-local config.
    pub config: Vec<ConfigElement>,
    steps: Range<usize>,
}

impl StageNode {
    /// Number of steps in the stage.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the stage has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// The in-memory representation of a [`TestFlow`].
///
/// Built once from an immutable spec and read-only afterwards. Stage order is
/// preserved; within a stage, declaration order is kept for status positioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowGraph {
    kind: FlowKind,
    stages: Vec<StageNode>,
    steps: Vec<StepNode>,
}

impl FlowGraph {
    /// Builds and validates a flow graph.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedFlowError`] if a step has both or neither of
    /// `name`/`label`, or if any stage or step config element is invalid.
    pub fn build(kind: FlowKind, flow: &TestFlow) -> Result<Self, MalformedFlowError> {
        let flow_name = kind.to_string();
        let mut stages = Vec::with_capacity(flow.len());
        let mut steps = Vec::new();

        for (stage_index, stage) in flow.iter().enumerate() {
            for element in &stage.config {
                element
                    .validate()
                    .map_err(|e| e.at(flow_name.as_str(), stage_index, None))?;
            }

            let start = steps.len();
            for (step_index, step) in stage.steps.iter().enumerate() {
                let at = |e: MalformedFlowError| e.at(flow_name.as_str(), stage_index, Some(step_index));
                let selector = StepSelector::from_step(step).map_err(at)?;
                for element in &step.config {
                    element.validate().map_err(at)?;
                }
                steps.push(StepNode {
                    id: StepId::new(stage_index, step_index),
                    selector,
                    condition: step.condition,
                    config: step.config.clone(),
                });
            }

            stages.push(StageNode {
                index: stage_index,
                config: stage.config.clone(),
                steps: start..steps.len(),
            });
        }

        Ok(Self { kind, stages, steps })
    }

    /// Which flow the graph was built from.
    #[must_use]
    pub fn kind(&self) -> FlowKind {
        self.kind
    }

    /// Returns the stages in order.
    #[must_use]
    pub fn stages(&self) -> &[StageNode] {
        &self.stages
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Returns the total number of steps across all stages.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the flow has no steps at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns the steps of a stage in declaration order.
    #[must_use]
    pub fn steps_of(&self, stage: &StageNode) -> &[StepNode] {
        &self.steps[stage.steps.clone()]
    }

    /// Looks up a step by position.
    #[must_use]
    pub fn step(&self, id: StepId) -> Option<&StepNode> {
        let stage = self.stages.get(id.stage)?;
        self.steps_of(stage).get(id.step)
    }
}
