//! Selection-driven pruning
//!
//! After computation a trial carries everything that was ever ingested or
//! derived, including intermediate requirements nobody asked for. Pruning
//! trims copies of the trials down to exactly the selected leaves (plus the
//! mandatory `time` axis), deleting namespaces that end up empty, and adds
//! the free-text `tag` annotation to each trimmed trial. The computed
//! dataset itself is never touched, so a different selection can be pruned
//! later without recomputation.

use crate::schema::{SchemaNode, VariableSchema};
use crate::types::{TrialSet, Value, ValueMap};
use std::collections::HashSet;

/// Mandatory field kept by every selection
const TIME_FIELD: &str = "time";

/// Per-trial annotation added after pruning
const TAG_FIELD: &str = "tag";

/// Prune copies of `trials` down to the requested leaf paths
pub fn prune(trials: &TrialSet, schema: &VariableSchema, requested: &[String]) -> TrialSet {
    let mut keep: HashSet<&str> = requested.iter().map(String::as_str).collect();
    keep.insert(TIME_FIELD);

    log::debug!(
        "pruning {} trials down to {} selected variables",
        trials.len(),
        keep.len()
    );

    trials
        .iter()
        .map(|trial| {
            let mut trimmed = trial.clone();
            prune_level(trimmed.fields_mut(), "", schema, &keep);
            trimmed.set(TAG_FIELD, Value::Str(String::new()));
            trimmed
        })
        .collect()
}

/// Prune one nesting level; returns nothing, mutates `map` in place
///
/// A key resolving to a schema leaf survives iff its full path was
/// requested. A key resolving to a namespace (or to nothing) recurses into
/// its children and survives iff any leaf below it did; non-map values
/// without a schema leaf are treated like leaves.
fn prune_level(map: &mut ValueMap, prefix: &str, schema: &VariableSchema, keep: &HashSet<&str>) {
    let keys: Vec<String> = map.keys().cloned().collect();
    for key in keys {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        let remove = match (schema.get(&path), map.get_mut(&key)) {
            (Some(SchemaNode::Leaf(_)), _) => !keep.contains(path.as_str()),
            (_, Some(Value::Map(children))) => {
                prune_level(children, &path, schema, keep);
                children.is_empty()
            }
            _ => !keep.contains(path.as_str()),
        };
        if remove {
            map.remove(&key);
        }
    }
}
