//! Reload of exported JSON datasets
//!
//! A dataset exported as a structured document (a JSON array of trial
//! records) can be loaded back as raw data, so pipelines can resume from a
//! previous export instead of the original ASC dump. Numeric widening is
//! accepted: integer arrays reload as integer series, mixed arrays as float
//! series, and nulls as NaN samples.

use crate::types::{DecoderError, Result, TrialSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Read a previously exported dataset document
pub fn read_dataset(path: &Path) -> Result<TrialSet> {
    log::info!("Reading dataset document: {:?}", path);

    if !path.is_file() {
        return Err(DecoderError::SourceNotFound(path.display().to_string()));
    }
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let trials: TrialSet = serde_json::from_reader(reader).map_err(|e| {
        DecoderError::DatasetParse(format!("{}: {}", path.display(), e))
    })?;

    log::info!("Loaded {} trials from {:?}", trials.len(), path);
    Ok(trials)
}
