//! Status aggregation.
//!
//! The aggregator owns the run's status tree and is its only writer. The
//! folds from instance phases to stage and run phases are pure functions.

mod aggregator;
mod fold;

pub use aggregator::StatusAggregator;
pub use fold::{fold_run, fold_stage, StageSummary};
