//! Parser configuration types
//!
//! The ASC parser only needs to know how trials are delimited and which log
//! messages are user-defined events. Everything else about a recording is
//! carried by the log itself.

use serde::{Deserialize, Serialize};

/// Configuration for the trial-segmenting log parser
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Substring marking the start of a trial (e.g. "TRIALID")
    pub start_marker: String,

    /// Substring marking the end of a trial
    ///
    /// With no stop marker, a trial ends at the next start marker or at end
    /// of input.
    #[serde(default)]
    pub stop_marker: Option<String>,

    /// User-defined event names; a MSG whose text equals one of these is
    /// recorded under that event instead of the generic message list
    #[serde(default)]
    pub user_events: Vec<String>,
}

impl ParserConfig {
    /// Create a configuration with the given trial-start marker
    pub fn new(start_marker: impl Into<String>) -> Self {
        Self {
            start_marker: start_marker.into(),
            stop_marker: None,
            user_events: Vec::new(),
        }
    }

    /// Builder method: set the trial-stop marker
    pub fn with_stop_marker(mut self, marker: impl Into<String>) -> Self {
        self.stop_marker = Some(marker.into());
        self
    }

    /// Builder method: register a user-defined event name
    pub fn add_user_event(mut self, name: impl Into<String>) -> Self {
        self.user_events.push(name.into());
        self
    }

    /// Builder method: register several user-defined event names
    pub fn with_user_events<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.user_events.extend(names.into_iter().map(Into::into));
        self
    }

    /// Check whether a message text is a registered user event
    pub fn is_user_event(&self, text: &str) -> bool {
        self.user_events.iter().any(|name| name == text)
    }
}
