//! Session store - entry point for all decoding operations
//!
//! A `Session` owns the variable schema and every loaded data source. It is
//! created once, passed by reference to all operations, and cleared only by
//! an explicit [`Session::reset`]; there is no ambient global state.
//!
//! Lifecycle: the schema starts from an optional base definition, grows by
//! merge whenever a new raw source is loaded (never overwriting customized
//! leaf descriptors), and reverts to the base definition on reset.

use crate::config::ParserConfig;
use crate::engine::{ComputeEngine, TransformRegistry};
use crate::formats;
use crate::pruner;
use crate::schema::VariableSchema;
use crate::types::{DecoderError, Result, TrialSet, Value};
use std::path::Path;

/// One loaded data source and its trials
#[derive(Debug, Clone)]
struct LoadedSource {
    name: String,
    trials: TrialSet,
}

/// The session store - schema plus loaded data
#[derive(Default)]
pub struct Session {
    base_schema: VariableSchema,
    schema: VariableSchema,
    sources: Vec<LoadedSource>,
    computed: Option<TrialSet>,
}

/// Statistics about the session contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    /// Number of loaded source files
    pub num_sources: usize,
    /// Total number of trials across all sources
    pub num_trials: usize,
    /// Number of leaf variables currently in the schema
    pub num_variables: usize,
}

impl Session {
    /// Create an empty session with an empty schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session seeded with a base schema
    ///
    /// The base is what [`Session::reset`] restores.
    pub fn with_base_schema(schema: VariableSchema) -> Self {
        Self {
            base_schema: schema.clone(),
            schema,
            sources: Vec::new(),
            computed: None,
        }
    }

    /// Create a session seeded from a schema document on disk
    pub fn with_base_schema_file(path: &Path) -> Result<Self> {
        let schema = crate::schema::document::load_schema_file(path)?;
        Ok(Self::with_base_schema(schema))
    }

    pub fn schema(&self) -> &VariableSchema {
        &self.schema
    }

    /// Load a data source, dispatching on the file extension
    ///
    /// `.asc` files go through the trial-segmenting log parser; `.json`
    /// files reload a previously exported dataset. A source yielding no
    /// trials is rejected and leaves the session unchanged. On success the
    /// variables discovered in the first trial are merged into the schema
    /// and the trial count is returned.
    pub fn load_data(&mut self, path: &Path, config: &ParserConfig) -> Result<usize> {
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase());

        let trials = match extension.as_deref() {
            Some("asc") => formats::AscParser::parse(path, config)?,
            Some("json") => formats::read_dataset(path)?,
            _ => {
                return Err(DecoderError::UnsupportedFormat(format!(
                    "{:?}",
                    extension
                )));
            }
        };

        if trials.is_empty() {
            return Err(DecoderError::EmptySource(path.display().to_string()));
        }

        self.schema.merge(VariableSchema::discover(&trials[0]))?;

        let count = trials.len();
        self.sources.push(LoadedSource {
            name: path.display().to_string(),
            trials,
        });
        self.computed = None;
        log::info!("Loaded {} trials from {:?}", count, path);
        Ok(count)
    }

    /// Write a value into every loaded trial at the given path
    ///
    /// Used for recording-wide facts that come from outside the log, e.g.
    /// screen geometry supplied by the caller.
    pub fn set_trial_field(&mut self, path: &str, value: &Value) {
        for source in &mut self.sources {
            for trial in &mut source.trials {
                trial.set(path, value.clone());
            }
        }
        self.computed = None;
    }

    /// Compute the requested variables over all loaded trials
    ///
    /// Flattens every source (in load order) into one combined trial set,
    /// then resolves each requested path in order. The first failure aborts
    /// and discards the combined set; already loaded sources stay untouched.
    pub fn compute(
        &mut self,
        registry: &TransformRegistry,
        requested: &[String],
    ) -> Result<&TrialSet> {
        let mut combined: TrialSet = self
            .sources
            .iter()
            .flat_map(|source| source.trials.iter().cloned())
            .collect();

        log::info!(
            "Computing {} variables over {} trials",
            requested.len(),
            combined.len()
        );
        ComputeEngine::new(&mut self.schema, registry).create_variables(requested, &mut combined)?;

        Ok(&*self.computed.insert(combined))
    }

    /// The most recent computation result, if any
    pub fn computed(&self) -> Option<&TrialSet> {
        self.computed.as_ref()
    }

    /// Prune the computed dataset down to the requested leaves
    ///
    /// The computed dataset itself stays available, so the same computation
    /// can be pruned again under a different selection.
    pub fn prune(&self, requested: &[String]) -> Result<TrialSet> {
        let computed = self.computed.as_ref().ok_or(DecoderError::NothingComputed)?;
        Ok(pruner::prune(computed, &self.schema, requested))
    }

    /// Session statistics
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            num_sources: self.sources.len(),
            num_trials: self.sources.iter().map(|s| s.trials.len()).sum(),
            num_variables: self.schema.leaf_count(),
        }
    }

    /// Names of the loaded sources, in load order
    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name.as_str()).collect()
    }

    /// Drop all loaded data and computed results and restore the base schema
    pub fn reset(&mut self) {
        log::info!("Resetting session state");
        self.sources.clear();
        self.computed = None;
        self.schema = self.base_schema.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::LeafSpec;
    use std::io::Write;

    const LOG: &str = "\
MSG\t1000 TRIALID 1
1000\t 512.5\t 380.0\t 4500.0\t...
1001\t 514.0\t 381.5\t 4510.0\t...
MSG\t2000 TRIALID 2
2000\t 600.0\t 400.0\t 4800.0\t...
";

    fn write_log() -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".asc").tempfile().unwrap();
        file.write_all(LOG.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_merges_schema_and_counts() {
        let file = write_log();
        let mut session = Session::new();
        let count = session
            .load_data(file.path(), &ParserConfig::new("TRIALID"))
            .unwrap();
        assert_eq!(count, 2);

        let stats = session.stats();
        assert_eq!(stats.num_sources, 1);
        assert_eq!(stats.num_trials, 2);
        assert!(session.schema().get("gaze").is_some());
        assert!(session.schema().get("pupil_size").is_some());
    }

    #[test]
    fn test_unsupported_extension() {
        let mut session = Session::new();
        let err = session
            .load_data(Path::new("trace.blf"), &ParserConfig::new("TRIALID"))
            .unwrap_err();
        assert!(matches!(err, DecoderError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_empty_source_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".asc").tempfile().unwrap();
        file.write_all(b"no trials in here\n").unwrap();

        let mut session = Session::new();
        let err = session
            .load_data(file.path(), &ParserConfig::new("TRIALID"))
            .unwrap_err();
        assert!(matches!(err, DecoderError::EmptySource(_)));
        assert_eq!(session.stats().num_sources, 0);
    }

    #[test]
    fn test_prune_requires_computation() {
        let session = Session::new();
        assert!(matches!(
            session.prune(&["time".to_string()]).unwrap_err(),
            DecoderError::NothingComputed
        ));
    }

    #[test]
    fn test_compute_and_prune_roundtrip() {
        let file = write_log();
        let mut session = Session::new();
        session
            .load_data(file.path(), &ParserConfig::new("TRIALID"))
            .unwrap();

        let registry = TransformRegistry::new();
        let requested = vec!["time".to_string(), "gaze".to_string()];
        session.compute(&registry, &requested).unwrap();

        let pruned = session.prune(&["gaze".to_string()]).unwrap();
        assert_eq!(pruned.len(), 2);
        let keys: Vec<&String> = pruned[0].fields().keys().collect();
        assert_eq!(keys, vec!["gaze", "tag", "time"]);
        // Computed set still holds everything.
        assert!(session.computed().unwrap()[0].get("pupil_size").is_some());
    }

    #[test]
    fn test_reset_restores_base_schema() {
        let mut base = VariableSchema::new();
        base.insert_leaf(
            "velocity",
            LeafSpec::computed("v", "velocity", vec!["gaze".into()]),
        )
        .unwrap();

        let file = write_log();
        let mut session = Session::with_base_schema(base.clone());
        session
            .load_data(file.path(), &ParserConfig::new("TRIALID"))
            .unwrap();
        assert!(session.schema().leaf_count() > base.leaf_count());

        session.reset();
        assert_eq!(session.stats().num_trials, 0);
        assert_eq!(session.schema(), &base);
    }

    #[test]
    fn test_set_trial_field() {
        let file = write_log();
        let mut session = Session::new();
        session
            .load_data(file.path(), &ParserConfig::new("TRIALID"))
            .unwrap();
        session.set_trial_field("screen.width_cm", &Value::Float(52.0));

        let registry = TransformRegistry::new();
        session
            .compute(&registry, &["time".to_string()])
            .unwrap();
        assert_eq!(
            session.computed().unwrap()[0]
                .get("screen.width_cm")
                .and_then(Value::as_f64),
            Some(52.0)
        );
    }
}
