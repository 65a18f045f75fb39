//! Test doubles and fixtures for engine tests and downstream users.

mod fixtures;
mod mocks;

pub use fixtures::{TestrunFixture, FIXTURE_LOCATION};
pub use mocks::{ScriptedRuntime, CANCELLED_BY_RUNTIME};
