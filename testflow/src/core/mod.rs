//! Core data contracts of the testflow engine.
//!
//! This module contains the declarative input (`Testrun`, `TestFlow`,
//! `TestDefinition`, locations and config) and the status documents the
//! engine produces. The types serialize with the camelCase field names of the
//! Testrun resource.

mod config;
mod location;
mod phase;
mod status;
mod testdefinition;
mod testrun;

pub use config::{ConfigElement, ConfigSource, ConfigType, KeySelector};
pub use location::{LocationType, TestLocation};
pub use phase::{ConditionType, Phase};
pub use status::{
    TestflowStepStatus, TestflowStepStatusTestDefinition, TestrunStatus, POSITION_FLOW,
    POSITION_STAGE, POSITION_STEP, STATE_NO_EXECUTABLE_STEPS,
};
pub use testdefinition::{
    TestDefMetadata, TestDefSpec, TestDefinition, BEHAVIOR_SERIAL, TEST_DEFINITION_KIND,
};
pub use testrun::{
    FlowStage, KubeconfigKey, ObjectMeta, TestFlow, Testrun, TestrunKubeconfigs, TestrunSpec,
    TestflowStep,
};
