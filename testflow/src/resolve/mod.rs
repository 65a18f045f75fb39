//! Location and config resolution.
//!
//! Both resolvers are I/O-performing collaborators behind traits; the engine
//! ships in-memory implementations for tests and embedding.

mod config;
mod location;

pub use config::{resolve_config, ConfigResolver, InMemoryConfigResolver, ResolvedConfig};
pub use location::{DefinitionIndex, InMemoryLocationResolver, LocationResolver, ResolvedDefinition};
