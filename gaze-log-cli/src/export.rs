//! Dataset export writers
//!
//! Writes a pruned trial set either as a nested JSON document (types
//! preserved, NaN as null) or as tabular rows (TSV/CSV): one row per trial,
//! one column per top-level key of the first trial, nested and array-valued
//! cells embedded as their JSON representation.

use crate::config::OutputFormat;
use anyhow::{Context, Result};
use gaze_log_decoder::{TrialSet, Value};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Write a dataset in the requested format
pub fn write_dataset(trials: &TrialSet, path: &Path, format: OutputFormat) -> Result<()> {
    log::info!("Writing {} trials to {}", trials.len(), path.display());
    ensure_parent_dir(path)?;
    match format {
        OutputFormat::Json => write_json(trials, path),
        OutputFormat::Tsv => write_table(trials, path, '\t'),
        OutputFormat::Csv => write_table(trials, path, ','),
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            log::debug!("Creating parent directories: {}", parent.display());
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create directory {}", parent.display()))?;
        }
    }
    Ok(())
}

/// Nested JSON document; reloadable as a raw data source
fn write_json(trials: &TrialSet, path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, trials)
        .with_context(|| format!("Failed to serialize dataset to {}", path.display()))?;
    Ok(())
}

/// Flat table: columns from the first trial's top-level keys
fn write_table(trials: &TrialSet, path: &Path, delimiter: char) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    let Some(first) = trials.first() else {
        return Ok(());
    };
    let columns: Vec<&String> = first.fields().keys().collect();
    let header: Vec<&str> = columns.iter().map(|c| c.as_str()).collect();
    writeln!(writer, "{}", header.join(&delimiter.to_string()))?;

    for trial in trials {
        let row: Vec<String> = columns
            .iter()
            .map(|column| trial.get(column).map(cell_text).unwrap_or_default())
            .collect();
        writeln!(writer, "{}", row.join(&delimiter.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

/// One table cell: scalars print plainly, everything nested embeds JSON
fn cell_text(value: &Value) -> String {
    match value {
        Value::Int(v) => v.to_string(),
        Value::Float(v) => {
            if v.is_nan() {
                "nan".to_string()
            } else {
                v.to_string()
            }
        }
        Value::Str(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}
