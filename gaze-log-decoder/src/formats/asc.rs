//! ASC log parser
//!
//! Parses the text dumps produced by eye trackers: a line-oriented event log
//! mixing gaze samples, detector events (fixation/saccade/blink) and free
//! text messages. The parser segments the log into trials using configured
//! start/stop markers and rebases every timestamp to the first sample of its
//! trial.
//!
//! The parser is lenient by design: a line that matches no recognized shape
//! is skipped, never fatal. Only a missing source file aborts.

use crate::config::ParserConfig;
use crate::types::{DecoderError, Result, Trial, TrialSet, Value, ValueMap};
use std::collections::BTreeMap;
use std::path::Path;

/// Event category keys used inside a trial's `events` map
pub const EVENT_FIXATIONS: &str = "fixations";
pub const EVENT_SACCADES: &str = "saccades";
pub const EVENT_BLINKS: &str = "blinks";
pub const EVENT_MESSAGES: &str = "messages";

/// ASC log parser - segments a log into trials
pub struct AscParser;

impl AscParser {
    /// Parse an ASC file and return its trials in log order
    pub fn parse(path: &Path, config: &ParserConfig) -> Result<TrialSet> {
        log::info!("Parsing ASC file: {:?}", path);

        if !path.is_file() {
            return Err(DecoderError::SourceNotFound(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path)?;

        let trials = Self::parse_lines(raw.lines(), config);
        log::info!("Parsed {} trials from {:?}", trials.len(), path);
        Ok(trials)
    }

    /// Parse trials out of an in-memory sequence of log lines
    pub fn parse_lines<'a, I>(lines: I, config: &ParserConfig) -> TrialSet
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut trials = TrialSet::new();
        let mut in_trial = false;
        let mut acc = TrialAccumulator::new(config);

        for line in lines {
            if in_trial {
                let boundary = match &config.stop_marker {
                    Some(stop) => line.contains(stop.as_str()),
                    None => line.contains(config.start_marker.as_str()),
                };
                if boundary {
                    Self::flush(&mut acc, &mut trials, config);
                    if config.stop_marker.is_some() {
                        // Explicit terminator: the stop line itself is dropped.
                        in_trial = false;
                        continue;
                    }
                    // No stop marker: the boundary line opens the next trial.
                }
            } else if line.contains(config.start_marker.as_str()) {
                in_trial = true;
            } else {
                continue;
            }

            acc.handle_line(line, config);
        }

        // Force-flush an open trial at end of input.
        if in_trial {
            Self::flush(&mut acc, &mut trials, config);
        }

        trials
    }

    fn flush(acc: &mut TrialAccumulator, trials: &mut TrialSet, config: &ParserConfig) {
        match std::mem::replace(acc, TrialAccumulator::new(config)).into_trial() {
            Some(trial) => trials.push(trial),
            None => log::warn!("dropping trial without samples (no time baseline)"),
        }
    }
}

/// Per-trial accumulators, rebased and packaged on flush
struct TrialAccumulator {
    x: Vec<f64>,
    y: Vec<f64>,
    size: Vec<f64>,
    trackertime: Vec<i64>,
    fixations: Vec<(i64, i64)>,
    saccades: Vec<(i64, i64)>,
    blinks: Vec<(i64, i64)>,
    messages: Vec<(i64, String)>,
    user_events: BTreeMap<String, Vec<i64>>,
}

impl TrialAccumulator {
    fn new(config: &ParserConfig) -> Self {
        Self {
            x: Vec::new(),
            y: Vec::new(),
            size: Vec::new(),
            trackertime: Vec::new(),
            fixations: Vec::new(),
            saccades: Vec::new(),
            blinks: Vec::new(),
            messages: Vec::new(),
            user_events: config
                .user_events
                .iter()
                .map(|name| (name.clone(), Vec::new()))
                .collect(),
        }
    }

    /// Classify one in-trial line by its fixed prefix
    fn handle_line(&mut self, line: &str, config: &ParserConfig) {
        if line.starts_with("MSG") {
            self.handle_message(line, config);
        } else if line.starts_with("EFIX") {
            if let Some(interval) = parse_event_interval(line) {
                self.fixations.push(interval);
            }
        } else if line.starts_with("ESACC") {
            if let Some(interval) = parse_event_interval(line) {
                self.saccades.push(interval);
            }
        } else if line.starts_with("EBLINK") {
            if let Some(interval) = parse_event_interval(line) {
                self.blinks.push(interval);
            }
        } else if line.starts_with("SFIX") || line.starts_with("SSACC") || line.starts_with("SBLINK")
        {
            // Start markers carry no data; the matching end line has both times.
            log::trace!("event start line: {}", line);
        } else {
            self.handle_sample(line);
        }
    }

    /// Message lines: "MSG\t<timestamp> <text>"
    fn handle_message(&mut self, line: &str, config: &ParserConfig) {
        let Some(space) = line.find(' ') else {
            log::debug!("message line without text: {}", line);
            return;
        };
        let Some(stamp) = line.get(4..space) else {
            log::debug!("message line could not be parsed: {}", line);
            return;
        };
        let Ok(timestamp) = stamp.trim().parse::<i64>() else {
            log::debug!("message timestamp could not be parsed: {}", line);
            return;
        };
        let text = line[space + 1..].trim_end_matches('\r');

        if config.is_user_event(text.trim()) {
            if let Some(times) = self.user_events.get_mut(text.trim()) {
                times.push(timestamp);
            }
        } else {
            self.messages.push((timestamp, text.to_string()));
        }
    }

    /// Sample lines: "<timestamp>\t<x>\t<y>\t<pupil>\t..."
    ///
    /// A pupil field of literal zero means the tracker lost the eye: gaze is
    /// recorded as NaN while pupil size keeps the literal zero.
    fn handle_sample(&mut self, line: &str) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 4 {
            log::debug!("line could not be parsed: {}", line);
            return;
        }
        let Ok(timestamp) = fields[0].trim().parse::<i64>() else {
            log::debug!("line could not be parsed: {}", line);
            return;
        };
        let Ok(size) = fields[3].trim().parse::<f64>() else {
            log::debug!("sample with unreadable pupil field: {}", line);
            return;
        };

        let (x, y) = if size == 0.0 {
            (f64::NAN, f64::NAN)
        } else {
            let Ok(x) = fields[1].trim().parse::<f64>() else {
                log::debug!("sample with unreadable x field: {}", line);
                return;
            };
            let Ok(y) = fields[2].trim().parse::<f64>() else {
                log::debug!("sample with unreadable y field: {}", line);
                return;
            };
            (x, y)
        };

        self.trackertime.push(timestamp);
        self.x.push(x);
        self.y.push(y);
        self.size.push(size);
    }

    /// Package the accumulators into a trial, rebasing all times to the
    /// first sample. A trial without samples has no baseline and is dropped.
    fn into_trial(self) -> Option<Trial> {
        let baseline = *self.trackertime.first()?;

        let mut gaze = ValueMap::new();
        gaze.insert("x".to_string(), Value::Series(self.x));
        gaze.insert("y".to_string(), Value::Series(self.y));

        let mut events = ValueMap::new();
        events.insert(
            EVENT_FIXATIONS.to_string(),
            Value::Intervals(rebase_intervals(self.fixations, baseline)),
        );
        events.insert(
            EVENT_SACCADES.to_string(),
            Value::Intervals(rebase_intervals(self.saccades, baseline)),
        );
        events.insert(
            EVENT_BLINKS.to_string(),
            Value::Intervals(rebase_intervals(self.blinks, baseline)),
        );
        events.insert(
            EVENT_MESSAGES.to_string(),
            Value::Messages(
                self.messages
                    .into_iter()
                    .map(|(t, text)| (t - baseline, text))
                    .collect(),
            ),
        );
        for (name, times) in self.user_events {
            events.insert(
                name,
                Value::TimeSeries(times.into_iter().map(|t| t - baseline).collect()),
            );
        }

        let mut trial = Trial::new();
        trial.set("gaze", Value::Map(gaze));
        trial.set("pupil_size", Value::Series(self.size));
        trial.set(
            "time",
            Value::TimeSeries(
                self.trackertime
                    .into_iter()
                    .map(|t| t - baseline)
                    .collect(),
            ),
        );
        trial.set("events", Value::Map(events));
        Some(trial)
    }
}

/// Event end lines keep a fixed 9-byte prefix before the tab-separated
/// payload; the first two payload fields are the start and end time.
fn parse_event_interval(line: &str) -> Option<(i64, i64)> {
    let rest = line.get(9..)?;
    let mut fields = rest.split('\t');
    let start = fields.next()?.trim().parse::<i64>();
    let end = fields.next()?.trim().parse::<i64>();
    match (start, end) {
        (Ok(start), Ok(end)) => Some((start, end)),
        _ => {
            log::warn!("event line with unreadable times: {}", line);
            None
        }
    }
}

fn rebase_intervals(intervals: Vec<(i64, i64)>, baseline: i64) -> Vec<(i64, i64)> {
    intervals
        .into_iter()
        .map(|(s, e)| (s - baseline, e - baseline))
        .collect()
}
