//! Variable computation engine
//!
//! Resolves requested variables against the schema, recursively satisfying
//! each leaf's requirements before invoking its transform on every trial.
//! Transforms are plain functions looked up by name in an explicit registry
//! populated at startup; the engine knows nothing about their numeric
//! content.

use crate::schema::{SchemaNode, TransformRef, VariableSchema};
use crate::types::{DecoderError, Result, TransformError, TrialSet, Value};
use std::collections::HashMap;

/// A transform: consumes the values of its declared requirements, in
/// declared order, and produces one derived value
pub type TransformFn = fn(&[Value]) -> std::result::Result<Value, TransformError>;

/// Explicit name-to-function table of transforms
///
/// A name absent from the registry is a first-class `UnknownTransform`
/// error, never a silent no-op.
#[derive(Default)]
pub struct TransformRegistry {
    transforms: HashMap<String, TransformFn>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transform under a name; a later registration under the
    /// same name replaces the earlier one
    pub fn register(&mut self, name: impl Into<String>, transform: TransformFn) {
        self.transforms.insert(name.into(), transform);
    }

    pub fn get(&self, name: &str) -> Option<TransformFn> {
        self.transforms.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.transforms.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// The computation engine, borrowing the schema and the transform table
pub struct ComputeEngine<'a> {
    schema: &'a mut VariableSchema,
    registry: &'a TransformRegistry,
    /// Paths currently being resolved, for cycle detection
    in_flight: Vec<String>,
}

impl<'a> ComputeEngine<'a> {
    pub fn new(schema: &'a mut VariableSchema, registry: &'a TransformRegistry) -> Self {
        Self {
            schema,
            registry,
            in_flight: Vec::new(),
        }
    }

    /// Compute every requested variable, in request order
    ///
    /// The first failure aborts the whole batch; variables computed before
    /// the failure (including requirements of the failing one) stay written,
    /// there is no rollback. A requested path that is already populated is
    /// recomputed: only requirement probing checks for existing values.
    pub fn create_variables(&mut self, requested: &[String], trials: &mut TrialSet) -> Result<()> {
        for path in requested {
            log::debug!("resolving requested variable '{}'", path);
            self.resolve_and_compute(path, trials)?;
        }
        Ok(())
    }

    /// Resolve one path: satisfy its requirements, then compute it
    ///
    /// Namespaces recurse into each child. Requirement emptiness is probed
    /// on the first trial only, standing in for "has this ever been
    /// computed" across the whole set; a requirement that is populated in
    /// the first trial but missing elsewhere is not resolved again.
    pub fn resolve_and_compute(&mut self, path: &str, trials: &mut TrialSet) -> Result<()> {
        if self.in_flight.iter().any(|p| p == path) {
            return Err(DecoderError::CircularRequirement(path.to_string()));
        }
        self.in_flight.push(path.to_string());
        let result = self.resolve_inner(path, trials);
        self.in_flight.pop();
        result
    }

    fn resolve_inner(&mut self, path: &str, trials: &mut TrialSet) -> Result<()> {
        let node = self.schema.lookup(path).clone();
        let spec = match node {
            SchemaNode::Namespace(children) => {
                if children.is_empty() {
                    // A bare placeholder is the unsatisfiable base case of a
                    // missing-requirement chain.
                    return Err(DecoderError::MissingRequirement(path.to_string()));
                }
                for key in children.keys() {
                    self.resolve_and_compute(&format!("{}.{}", path, key), trials)?;
                }
                return Ok(());
            }
            SchemaNode::Leaf(spec) => spec,
        };

        for req in &spec.reqs {
            let satisfied = trials
                .first()
                .and_then(|trial| trial.get(req))
                .map_or(false, |value| !value.is_empty());
            if !satisfied {
                self.resolve_and_compute(req, trials).map_err(|e| match e {
                    // Root cause first, each requester appended outward.
                    DecoderError::MissingRequirement(chain) => {
                        DecoderError::MissingRequirement(format!("{} for {}", chain, path))
                    }
                    other => other,
                })?;
            }
        }

        let name = match &spec.transform {
            TransformRef::Raw => {
                // Raw data cannot be computed into existence: if ingestion
                // did not provide it, the chain bottoms out here.
                let present = trials
                    .first()
                    .and_then(|trial| trial.get(path))
                    .map_or(false, |value| !value.is_empty());
                if present {
                    return Ok(());
                }
                return Err(DecoderError::MissingRequirement(path.to_string()));
            }
            TransformRef::Named(name) => name,
        };
        let transform = self
            .registry
            .get(name)
            .ok_or_else(|| DecoderError::UnknownTransform(name.clone()))?;

        log::debug!(
            "computing '{}' via transform '{}' for {} trials",
            path,
            name,
            trials.len()
        );
        for trial in trials.iter_mut() {
            let args: Vec<Value> = spec
                .reqs
                .iter()
                .map(|req| {
                    trial
                        .get(req)
                        .cloned()
                        .unwrap_or_else(|| Value::Map(Default::default()))
                })
                .collect();
            let value = transform(&args).map_err(|e| DecoderError::TransformInvocation {
                name: name.clone(),
                path: path.to_string(),
                source: e,
            })?;
            // An empty result means "nothing found for this trial"; the
            // variable stays unset there.
            if !value.is_empty() {
                trial.set(path, value);
            }
        }
        Ok(())
    }
}
