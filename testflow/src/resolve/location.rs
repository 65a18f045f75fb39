//! Location resolution: mapping test locations to TestDefinitions.

use crate::core::{TestDefinition, TestLocation};
use crate::errors::StepError;
use crate::flow::StepSelector;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, warn};

/// Retrieves the TestDefinitions available at a location.
///
/// Implementations perform the I/O (git checkout, host path listing); the
/// engine only consumes the result.
#[async_trait]
pub trait LocationResolver: Send + Sync + Debug {
    /// Returns every TestDefinition found at `location`.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::LocationUnavailable`] if the location cannot be read.
    async fn resolve(&self, location: &TestLocation) -> Result<Vec<TestDefinition>, StepError>;
}

/// A resolver serving TestDefinitions from memory.
#[derive(Debug, Default, Clone)]
pub struct InMemoryLocationResolver {
    locations: HashMap<TestLocation, Vec<TestDefinition>>,
}

impl InMemoryLocationResolver {
    /// Creates an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the TestDefinitions of a location.
    #[must_use]
    pub fn with_location(mut self, location: TestLocation, definitions: Vec<TestDefinition>) -> Self {
        self.locations.entry(location).or_default().extend(definitions);
        self
    }
}

#[async_trait]
impl LocationResolver for InMemoryLocationResolver {
    async fn resolve(&self, location: &TestLocation) -> Result<Vec<TestDefinition>, StepError> {
        self.locations
            .get(location)
            .cloned()
            .ok_or_else(|| StepError::location_unavailable(location.to_string(), "location is not known"))
    }
}

/// A TestDefinition together with the location it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDefinition {
    /// The TestDefinition.
    pub definition: Arc<TestDefinition>,
    /// Where it was found.
    pub location: TestLocation,
}

impl ResolvedDefinition {
    /// The TestDefinition name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.definition.name()
    }
}

#[derive(Debug)]
struct LocationEntry {
    location: TestLocation,
    definitions: Result<Vec<Arc<TestDefinition>>, StepError>,
}

/// All TestDefinitions of a run, indexed for lookup by name or label.
///
/// Locations are resolved once per run. A location that fails to resolve does
/// not fail the run; it only fails the steps that cannot be served by the
/// remaining locations.
#[derive(Debug)]
pub struct DefinitionIndex {
    entries: Vec<LocationEntry>,
    allow_override: bool,
}

impl DefinitionIndex {
    /// Resolves every location concurrently and builds the index.
    pub async fn load(
        resolver: &dyn LocationResolver,
        locations: &[TestLocation],
        allow_override: bool,
    ) -> Self {
        let results = join_all(locations.iter().map(|loc| resolver.resolve(loc))).await;
        Self::from_resolved(locations.iter().cloned().zip(results).collect(), allow_override)
    }

    /// Builds the index from already resolved locations, in declaration order.
    #[must_use]
    pub fn from_resolved(
        resolved: Vec<(TestLocation, Result<Vec<TestDefinition>, StepError>)>,
        allow_override: bool,
    ) -> Self {
        let entries = resolved
            .into_iter()
            .map(|(location, result)| {
                let definitions = result.map(|defs| {
                    defs.into_iter()
                        .filter(|def| match def.validate() {
                            Ok(()) => true,
                            Err(reason) => {
                                warn!(location = %location, reason = %reason, "Ignoring invalid TestDefinition");
                                false
                            }
                        })
                        .map(Arc::new)
                        .collect()
                });
                if let Err(e) = &definitions {
                    warn!(location = %location, error = %e, "Test location unavailable");
                }
                LocationEntry { location, definitions }
            })
            .collect();

        Self {
            entries,
            allow_override,
        }
    }

    /// Number of declared locations.
    #[must_use]
    pub fn location_count(&self) -> usize {
        self.entries.len()
    }

    /// Expands a step selector into the TestDefinitions it refers to.
    ///
    /// # Errors
    ///
    /// - [`StepError::LocationUnavailable`] if nothing matches, including a
    ///   label that matches zero TestDefinitions.
    /// - [`StepError::AmbiguousTestDefinition`] if a matched name is declared
    ///   in more than one location and overrides are not allowed.
    pub fn expand(&self, selector: &StepSelector) -> Result<Vec<ResolvedDefinition>, StepError> {
        let matches: Vec<(usize, &Arc<TestDefinition>)> = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| entry.definitions.as_ref().ok().map(|defs| (i, defs)))
            .flat_map(|(i, defs)| defs.iter().map(move |def| (i, def)))
            .filter(|(_, def)| match selector {
                StepSelector::Name(name) => def.name() == name,
                StepSelector::Label(label) => def.has_label(label),
            })
            .collect();

        if matches.is_empty() {
            return Err(self.nothing_found(selector));
        }

        // Group by name, keeping the order of first appearance.
        let mut order: Vec<&str> = Vec::new();
        let mut groups: HashMap<&str, Vec<(usize, &Arc<TestDefinition>)>> = HashMap::new();
        for (i, def) in matches {
            let group = groups.entry(def.name()).or_default();
            if group.is_empty() {
                order.push(def.name());
            }
            group.push((i, def));
        }

        order
            .into_iter()
            .map(|name| {
                let group = &groups[name];
                if group.len() > 1 && !self.allow_override {
                    return Err(StepError::AmbiguousTestDefinition {
                        name: name.to_string(),
                        locations: group
                            .iter()
                            .map(|(i, _)| self.entries[*i].location.to_string())
                            .collect(),
                    });
                }
                // Last-declared location wins.
                let (i, def) = group[group.len() - 1];
                if group.len() > 1 {
                    debug!(name = %name, location = %self.entries[i].location, "TestDefinition overridden by later location");
                }
                Ok(ResolvedDefinition {
                    definition: Arc::clone(def),
                    location: self.entries[i].location.clone(),
                })
            })
            .collect()
    }

    fn nothing_found(&self, selector: &StepSelector) -> StepError {
        if self.entries.is_empty() {
            return StepError::location_unavailable(selector.to_string(), "no test locations declared");
        }
        let failed: Vec<String> = self
            .entries
            .iter()
            .filter_map(|entry| entry.definitions.as_ref().err().map(ToString::to_string))
            .collect();
        let reason = match selector {
            StepSelector::Name(_) => "no TestDefinition with this name",
            StepSelector::Label(_) => "no TestDefinition carries this label",
        };
        if failed.is_empty() {
            StepError::location_unavailable(selector.to_string(), reason)
        } else {
            StepError::location_unavailable(selector.to_string(), format!("{reason}; {}", failed.join("; ")))
        }
    }
}
