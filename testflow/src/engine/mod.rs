//! The Testrun engine.
//!
//! This module provides:
//! - `RunPlan`: validation of a Testrun into flow graphs
//! - `TestrunEngine`: the stage-barrier execution loop with cancellation and
//!   the OnExit flow

mod plan;
mod runner;

#[cfg(test)]
mod integration_tests;

pub use plan::RunPlan;
pub use runner::TestrunEngine;
