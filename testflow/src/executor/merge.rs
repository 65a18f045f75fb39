//! Config merging across the global, stage, step and TestDefinition layers.

use crate::core::{ConfigElement, ConfigType};
use crate::errors::StepError;
use std::collections::HashMap;

/// Merges config layers given from lowest to highest precedence.
///
/// `env` elements are keyed by name; a later layer replaces an earlier
/// element with the same name in place, so the result keeps first-declaration
/// order. `file` elements are never replaced: every one is mounted, and two
/// of them sharing a mount path are an error, whichever layers they come from.
///
/// # Errors
///
/// Returns [`StepError::DuplicateMountPath`] on a mount path collision.
pub fn merge_config<'a, I>(layers: I) -> Result<Vec<ConfigElement>, StepError>
where
    I: IntoIterator<Item = &'a [ConfigElement]>,
{
    let mut merged: Vec<ConfigElement> = Vec::new();
    let mut env_index: HashMap<&str, usize> = HashMap::new();

    for layer in layers {
        for element in layer {
            if element.config_type == ConfigType::Env {
                if let Some(&i) = env_index.get(element.name.as_str()) {
                    merged[i] = element.clone();
                    continue;
                }
                env_index.insert(&element.name, merged.len());
            }
            merged.push(element.clone());
        }
    }

    let mut paths: HashMap<&str, &str> = HashMap::new();
    for element in merged.iter().filter(|e| e.config_type == ConfigType::File) {
        let path = element.path.as_deref().unwrap_or_default();
        if let Some(previous) = paths.insert(path, &element.name) {
            return Err(StepError::DuplicateMountPath {
                path: path.to_string(),
                names: vec![previous.to_string(), element.name.clone()],
            });
        }
    }

    Ok(merged)
}
