//! Flow graph and condition evaluation.
//!
//! This module provides:
//! - The flow graph arena built from a `TestFlow`
//! - The condition evaluator deciding step eligibility between stages

mod condition;
mod graph;

pub use condition::{eligible, ConditionGate};
pub use graph::{FlowGraph, FlowKind, StageNode, StepId, StepNode, StepSelector};
