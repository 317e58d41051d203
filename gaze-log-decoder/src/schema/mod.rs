//! Variable schema registry
//!
//! The schema is a tree of named variables mirroring the nested structure of
//! trial records. Every node is explicitly tagged as either a namespace
//! (grouping children, no value of its own) or a leaf (raw ingested data or
//! a computed field with a named transform and its requirements). Nodes are
//! never inferred from value shape at runtime; the historical shape-sniffing
//! document format is confined to [`document`].
//!
//! The schema is extended by merging in variables discovered from freshly
//! loaded raw data. Merging only fills gaps: a leaf that already carries a
//! transform keeps its description, transform and requirements, and a merge
//! that would flip a path between leaf and namespace is rejected.

pub mod document;

use crate::types::{DecoderError, Result, Trial, Value};
use std::collections::BTreeMap;

/// How a leaf variable gets its value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformRef {
    /// The value arrives from raw ingestion; nothing to compute
    Raw,
    /// The value is computed by the named transform
    Named(String),
}

/// Descriptor of a leaf variable
#[derive(Debug, Clone, PartialEq)]
pub struct LeafSpec {
    /// Human-readable description, shown in selection UIs
    pub desc: String,
    /// Raw marker or transform name
    pub transform: TransformRef,
    /// Requirement paths, in declared resolution order
    pub reqs: Vec<String>,
}

impl LeafSpec {
    /// Descriptor for a raw ingested variable
    pub fn raw() -> Self {
        Self {
            desc: "DATA".to_string(),
            transform: TransformRef::Raw,
            reqs: Vec::new(),
        }
    }

    /// Descriptor for a computed variable
    pub fn computed(
        desc: impl Into<String>,
        transform: impl Into<String>,
        reqs: Vec<String>,
    ) -> Self {
        Self {
            desc: desc.into(),
            transform: TransformRef::Named(transform.into()),
            reqs,
        }
    }
}

/// A node in the variable tree
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    /// Groups child variables; carries no value
    Namespace(BTreeMap<String, SchemaNode>),
    /// Raw or computed variable
    Leaf(LeafSpec),
}

impl SchemaNode {
    pub fn namespace() -> Self {
        SchemaNode::Namespace(BTreeMap::new())
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, SchemaNode::Leaf(_))
    }

    /// A bare placeholder: a namespace without children, as produced by
    /// defensive lookups of paths nothing ever defined
    pub fn is_placeholder(&self) -> bool {
        matches!(self, SchemaNode::Namespace(children) if children.is_empty())
    }

    fn count_leaves(&self) -> usize {
        match self {
            SchemaNode::Leaf(_) => 1,
            SchemaNode::Namespace(children) => children.values().map(Self::count_leaves).sum(),
        }
    }

    fn collect_leaf_paths(&self, prefix: &str, out: &mut Vec<String>) {
        match self {
            SchemaNode::Leaf(_) => out.push(prefix.to_string()),
            SchemaNode::Namespace(children) => {
                for (key, child) in children {
                    let path = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{}.{}", prefix, key)
                    };
                    child.collect_leaf_paths(&path, out);
                }
            }
        }
    }
}

/// The variable tree, keyed by globally unique dotted paths
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableSchema {
    root: BTreeMap<String, SchemaNode>,
}

impl VariableSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a leaf at `path`, creating intermediate namespaces
    ///
    /// Fails with `SchemaConflict` if the path or one of its ancestors is
    /// already occupied by a node of the other kind.
    pub fn insert_leaf(&mut self, path: &str, spec: LeafSpec) -> Result<()> {
        let (parents, last) = match path.rsplit_once('.') {
            Some((parents, last)) => (Some(parents), last),
            None => (None, path),
        };
        let mut current = &mut self.root;
        let mut walked = String::new();
        if let Some(parents) = parents {
            for key in parents.split('.') {
                if !walked.is_empty() {
                    walked.push('.');
                }
                walked.push_str(key);
                let entry = current
                    .entry(key.to_string())
                    .or_insert_with(SchemaNode::namespace);
                current = match entry {
                    SchemaNode::Namespace(children) => children,
                    SchemaNode::Leaf(_) => {
                        return Err(DecoderError::SchemaConflict(walked));
                    }
                };
            }
        }
        match current.get(last) {
            Some(SchemaNode::Namespace(children)) if !children.is_empty() => {
                return Err(DecoderError::SchemaConflict(path.to_string()));
            }
            _ => {}
        }
        current.insert(last.to_string(), SchemaNode::Leaf(spec));
        Ok(())
    }

    /// Look up a node by path, creating empty namespaces for absent
    /// intermediate keys
    ///
    /// This auto-vivification supports defensive probing by the resolver: an
    /// undefined path materializes as a bare placeholder namespace, the
    /// unsatisfiable base case of requirement resolution. Descending past a
    /// leaf stops at that leaf.
    pub fn lookup(&mut self, path: &str) -> &mut SchemaNode {
        let mut keys = path.split('.');
        let first = keys.next().unwrap_or_default();
        let mut node = self
            .root
            .entry(first.to_string())
            .or_insert_with(SchemaNode::namespace);
        for key in keys {
            match node {
                SchemaNode::Namespace(children) => {
                    node = children
                        .entry(key.to_string())
                        .or_insert_with(SchemaNode::namespace);
                }
                SchemaNode::Leaf(_) => break,
            }
        }
        node
    }

    /// Non-mutating lookup
    pub fn get(&self, path: &str) -> Option<&SchemaNode> {
        let mut keys = path.split('.');
        let mut node = self.root.get(keys.next()?)?;
        for key in keys {
            match node {
                SchemaNode::Namespace(children) => node = children.get(key)?,
                SchemaNode::Leaf(_) => return None,
            }
        }
        Some(node)
    }

    /// Merge a discovered subtree into the schema
    ///
    /// Precedence: existing leaves always win (their descriptors are kept
    /// untouched); new keys are inserted as discovered; a bare placeholder
    /// namespace may be upgraded to a leaf. Any other Leaf/Namespace flip is
    /// a hard error and leaves the schema partially merged only up to the
    /// conflicting sibling.
    pub fn merge(&mut self, discovered: BTreeMap<String, SchemaNode>) -> Result<()> {
        merge_children(&mut self.root, discovered, "")
    }

    /// Build the merge input for a freshly parsed trial
    ///
    /// Every non-map value becomes a raw leaf. A map with exactly the keys
    /// `x` and `y` is one gaze-pair leaf; any other map is a namespace.
    pub fn discover(trial: &Trial) -> BTreeMap<String, SchemaNode> {
        trial
            .fields()
            .iter()
            .map(|(key, value)| (key.clone(), discover_value(value)))
            .collect()
    }

    /// Total number of leaf variables
    pub fn leaf_count(&self) -> usize {
        self.root.values().map(SchemaNode::count_leaves).sum()
    }

    /// All leaf paths, in tree order
    pub fn leaf_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (key, node) in &self.root {
            node.collect_leaf_paths(key, &mut out);
        }
        out
    }
}

fn merge_children(
    existing: &mut BTreeMap<String, SchemaNode>,
    discovered: BTreeMap<String, SchemaNode>,
    prefix: &str,
) -> Result<()> {
    for (key, new_node) in discovered {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match existing.get_mut(&key) {
            None => {
                existing.insert(key, new_node);
            }
            Some(SchemaNode::Leaf(_)) => match new_node {
                // Existing leaf wins, customized or not.
                SchemaNode::Leaf(_) => {}
                SchemaNode::Namespace(_) => {
                    return Err(DecoderError::SchemaConflict(path));
                }
            },
            Some(node @ SchemaNode::Namespace(_)) => match new_node {
                SchemaNode::Leaf(_) if node.is_placeholder() => {
                    *node = new_node;
                }
                SchemaNode::Leaf(_) => {
                    return Err(DecoderError::SchemaConflict(path));
                }
                SchemaNode::Namespace(new_children) => {
                    if let SchemaNode::Namespace(children) = node {
                        merge_children(children, new_children, &path)?;
                    }
                }
            },
        }
    }
    Ok(())
}

fn discover_value(value: &Value) -> SchemaNode {
    match value {
        Value::Map(map) => {
            let mut keys = map.keys().map(String::as_str);
            let is_gaze_pair =
                map.len() == 2 && keys.next() == Some("x") && keys.next() == Some("y");
            if is_gaze_pair {
                SchemaNode::Leaf(LeafSpec::raw())
            } else {
                SchemaNode::Namespace(
                    map.iter()
                        .map(|(key, child)| (key.clone(), discover_value(child)))
                        .collect(),
                )
            }
        }
        _ => SchemaNode::Leaf(LeafSpec::raw()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValueMap;

    fn sample_trial() -> Trial {
        let mut trial = Trial::new();
        let mut gaze = ValueMap::new();
        gaze.insert("x".to_string(), Value::Series(vec![1.0]));
        gaze.insert("y".to_string(), Value::Series(vec![2.0]));
        trial.set("gaze", Value::Map(gaze));
        trial.set("pupil_size", Value::Series(vec![100.0]));
        trial.set("time", Value::TimeSeries(vec![0]));
        trial.set("events.messages", Value::Messages(vec![(0, "hi".into())]));
        trial
    }

    #[test]
    fn test_discover_marks_gaze_pair_as_leaf() {
        let discovered = VariableSchema::discover(&sample_trial());
        assert!(matches!(
            discovered.get("gaze"),
            Some(SchemaNode::Leaf(spec)) if spec.transform == TransformRef::Raw
        ));
        assert!(matches!(
            discovered.get("events"),
            Some(SchemaNode::Namespace(_))
        ));
    }

    #[test]
    fn test_merge_fills_gaps_and_keeps_custom_leaves() {
        let mut schema = VariableSchema::new();
        schema
            .insert_leaf(
                "velocity",
                LeafSpec::computed("gaze velocity", "velocity", vec!["gaze".into()]),
            )
            .unwrap();
        schema.insert_leaf("gaze", LeafSpec::raw()).unwrap();

        schema.merge(VariableSchema::discover(&sample_trial())).unwrap();

        // Raw leaves filled in.
        assert!(schema.get("pupil_size").is_some());
        assert!(schema.get("events.messages").is_some());
        // Customized leaf untouched.
        match schema.get("velocity") {
            Some(SchemaNode::Leaf(spec)) => {
                assert_eq!(spec.transform, TransformRef::Named("velocity".into()));
                assert_eq!(spec.reqs, vec!["gaze".to_string()]);
            }
            other => panic!("expected leaf, got {:?}", other),
        }
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut schema = VariableSchema::new();
        schema.merge(VariableSchema::discover(&sample_trial())).unwrap();
        let before = schema.clone();
        schema.merge(VariableSchema::discover(&sample_trial())).unwrap();
        assert_eq!(schema, before);
    }

    #[test]
    fn test_merge_rejects_leaf_namespace_flip() {
        let mut schema = VariableSchema::new();
        schema.insert_leaf("events", LeafSpec::raw()).unwrap();

        let err = schema
            .merge(VariableSchema::discover(&sample_trial()))
            .unwrap_err();
        assert!(matches!(err, DecoderError::SchemaConflict(path) if path == "events"));
    }

    #[test]
    fn test_lookup_auto_vivifies_placeholder() {
        let mut schema = VariableSchema::new();
        let node = schema.lookup("never.defined.path");
        assert!(node.is_placeholder());
        // The probe left namespaces behind.
        assert!(matches!(
            schema.get("never.defined"),
            Some(SchemaNode::Namespace(_))
        ));
    }

    #[test]
    fn test_placeholder_upgraded_to_leaf_on_merge() {
        let mut schema = VariableSchema::new();
        schema.lookup("pupil_size");
        schema.merge(VariableSchema::discover(&sample_trial())).unwrap();
        assert!(matches!(
            schema.get("pupil_size"),
            Some(SchemaNode::Leaf(_))
        ));
    }

    #[test]
    fn test_leaf_paths() {
        let mut schema = VariableSchema::new();
        schema.merge(VariableSchema::discover(&sample_trial())).unwrap();
        let paths = schema.leaf_paths();
        assert!(paths.contains(&"gaze".to_string()));
        assert!(paths.contains(&"events.messages".to_string()));
        assert_eq!(schema.leaf_count(), paths.len());
    }
}
