//! Gaze Log Decoder Library
//!
//! A stateless, reusable library for turning eye-tracker session logs (ASC
//! text dumps) into per-trial structured datasets enriched with derived
//! variables.
//!
//! # Architecture
//!
//! The pipeline has four stages:
//! - The ASC parser segments a line-oriented log into ordered trials using
//!   configured start/stop markers.
//! - The variable schema declares every known variable: raw ingested data or
//!   a computed field with a named transform and its requirement paths.
//! - The compute engine recursively resolves requirements and applies
//!   transforms to every trial, in place.
//! - The pruner trims copies of the computed trials down to a selection.
//!
//! The library does NOT:
//! - Implement the numeric content of transforms (callers register those)
//! - Render plots or any user interface
//! - Write export files (the application layer does)
//!
//! All higher-level functionality is in the application layer (gaze-log-cli).
//!
//! # Example Usage
//!
//! ```no_run
//! use gaze_log_decoder::{ParserConfig, Session, TransformRegistry};
//! use std::path::Path;
//!
//! // Create a session and load a recording
//! let mut session = Session::new();
//! let config = ParserConfig::new("TRIALID").add_user_event("StimOn");
//! session.load_data(Path::new("subject01.asc"), &config).unwrap();
//!
//! // Compute and prune a selection of variables
//! let registry = TransformRegistry::new();
//! let selection = vec!["time".to_string(), "gaze".to_string()];
//! session.compute(&registry, &selection).unwrap();
//! let pruned = session.prune(&selection).unwrap();
//!
//! println!("{} trials ready for export", pruned.len());
//! ```

// Public modules
pub mod config;
pub mod engine;
pub mod formats;
pub mod pruner;
pub mod schema;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use config::ParserConfig;
pub use engine::{ComputeEngine, TransformFn, TransformRegistry};
pub use schema::{LeafSpec, SchemaNode, TransformRef, VariableSchema};
pub use session::{Session, SessionStats};
pub use types::{
    DecoderError, Result, TransformError, Trial, TrialSet, Value, ValueMap,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
