//! Configuration loading and parsing
//!
//! The TOML configuration file drives a full pipeline run: which recordings
//! to load, how trials are delimited, the screen geometry the log cannot
//! know, the variable selection and the export target.

use anyhow::{Context, Result};
use gaze_log_decoder::ParserConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub input: InputConfig,
    pub parser: ParserSection,
    #[serde(default)]
    pub screen: Option<ScreenConfig>,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub output: Option<OutputConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputConfig {
    /// ASC recordings or previously exported JSON datasets
    pub files: Vec<PathBuf>,
    /// Optional schema document; the built-in schema is used otherwise
    #[serde(default)]
    pub schema: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ParserSection {
    pub start_marker: String,
    #[serde(default)]
    pub stop_marker: Option<String>,
    #[serde(default)]
    pub user_events: Vec<String>,
}

impl ParserSection {
    pub fn to_parser_config(&self) -> ParserConfig {
        let mut config = ParserConfig::new(&self.start_marker)
            .with_user_events(self.user_events.iter().cloned());
        if let Some(stop) = &self.stop_marker {
            config = config.with_stop_marker(stop);
        }
        config
    }
}

/// Physical screen geometry, injected into every trial before computation
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct ScreenConfig {
    pub width_cm: f64,
    pub height_cm: f64,
    pub viewing_distance_cm: f64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SelectionConfig {
    #[serde(default)]
    pub variables: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    pub format: OutputFormat,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Tsv,
    Csv,
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialization() {
        let toml_content = r#"
            [input]
            files = ["subject01.asc", "subject02.asc"]

            [parser]
            start_marker = "TRIALID"
            user_events = ["StimOn"]

            [screen]
            width_cm = 52.0
            height_cm = 29.5
            viewing_distance_cm = 60.0

            [selection]
            variables = ["time", "gaze", "velocity"]

            [output]
            format = "tsv"
            path = "out/dataset.tsv"
        "#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.input.files.len(), 2);
        assert_eq!(config.parser.start_marker, "TRIALID");
        assert_eq!(config.selection.variables.len(), 3);
        assert_eq!(config.output.as_ref().unwrap().format, OutputFormat::Tsv);

        let parser = config.parser.to_parser_config();
        assert!(parser.is_user_event("StimOn"));
        assert!(parser.stop_marker.is_none());
    }

    #[test]
    fn test_minimal_config() {
        let config: AppConfig = toml::from_str(
            r#"
            [input]
            files = ["a.asc"]

            [parser]
            start_marker = "START"
        "#,
        )
        .unwrap();
        assert!(config.screen.is_none());
        assert!(config.output.is_none());
        assert!(config.selection.variables.is_empty());
    }
}
