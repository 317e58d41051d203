//! Core types for the gaze log decoder library
//!
//! This module defines the dynamic value model trials are made of, the trial
//! records themselves and the library error type. Trials are nested,
//! dynamically shaped records: which fields exist depends on the log that was
//! parsed and on the variables a caller asked to have computed, so the value
//! model is a tagged enum rather than a fixed struct.

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Result type for decoder operations
pub type Result<T> = std::result::Result<T, DecoderError>;

/// Nested record node: field name to value
pub type ValueMap = BTreeMap<String, Value>;

/// Errors that can occur while loading, computing or pruning datasets
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    #[error("source file not found: {0}")]
    SourceNotFound(String),

    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("no trials found in: {0}")]
    EmptySource(String),

    #[error("failed to parse schema document: {0}")]
    SchemaParse(String),

    #[error("failed to parse dataset document: {0}")]
    DatasetParse(String),

    #[error("schema merge would change '{0}' between leaf and namespace")]
    SchemaConflict(String),

    #[error("missing requirement: {0}")]
    MissingRequirement(String),

    #[error("circular requirement chain at '{0}'")]
    CircularRequirement(String),

    #[error("unknown transform: {0}")]
    UnknownTransform(String),

    #[error("transform '{name}' failed while computing '{path}': {source}")]
    TransformInvocation {
        name: String,
        path: String,
        #[source]
        source: TransformError,
    },

    #[error("no computed dataset; run a computation first")]
    NothingComputed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by transform functions themselves
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransformError {
    #[error("expected {expected} arguments, got {got}")]
    ArgumentCount { expected: usize, got: usize },

    #[error("argument {index} has unexpected shape, expected {expected}")]
    ArgumentType { index: usize, expected: &'static str },

    #[error("{0}")]
    Failed(String),
}

/// A single value stored in a trial record
///
/// `Float` NaN is the missing-sample sentinel. `Series` carries per-sample
/// float signals (NaN allowed), `TimeSeries` integer tracker ticks,
/// `Intervals` event `[start, end]` pairs and `Messages` timestamped
/// free-text lines. `List` only appears when reloading an exported dataset
/// whose array shape matches none of the specific variants.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Series(Vec<f64>),
    TimeSeries(Vec<i64>),
    Intervals(Vec<(i64, i64)>),
    Messages(Vec<(i64, String)>),
    List(Vec<Value>),
    Map(ValueMap),
}

impl Value {
    /// Canonical "no result" value, used by transforms that found nothing
    pub fn empty() -> Self {
        Value::List(Vec::new())
    }

    fn empty_map() -> Self {
        Value::Map(ValueMap::new())
    }

    /// Emptiness test used by the requirement resolver
    ///
    /// Empty containers, the empty string and numeric zero are empty.
    /// NaN is a present-but-missing sample marker and is NOT empty.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Int(v) => *v == 0,
            Value::Float(v) => *v == 0.0,
            Value::Str(s) => s.is_empty(),
            Value::Series(v) => v.is_empty(),
            Value::TimeSeries(v) => v.is_empty(),
            Value::Intervals(v) => v.is_empty(),
            Value::Messages(v) => v.is_empty(),
            Value::List(v) => v.is_empty(),
            Value::Map(m) => m.is_empty(),
        }
    }

    /// Walk a dotted path through nested maps
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut node = self;
        for key in path.split('.') {
            match node {
                Value::Map(m) => node = m.get(key)?,
                _ => return None,
            }
        }
        Some(node)
    }

    /// Numeric scalar as f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer scalar
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_series(&self) -> Option<&[f64]> {
        match self {
            Value::Series(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_time_series(&self) -> Option<&[i64]> {
        match self {
            Value::TimeSeries(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_intervals(&self) -> Option<&[(i64, i64)]> {
        match self {
            Value::Intervals(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_messages(&self) -> Option<&[(i64, String)]> {
        match self {
            Value::Messages(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Classify a freshly deserialized array into the most specific variant
    ///
    /// All-integer arrays become `TimeSeries`, numeric arrays `Series`
    /// (integers widen to f64), arrays of integer pairs `Intervals`, arrays
    /// of `[int, text]` pairs `Messages`. Anything else stays a `List`.
    fn classify_list(items: Vec<Value>) -> Value {
        if items.is_empty() {
            return Value::List(items);
        }
        if items.iter().all(|v| matches!(v, Value::Int(_))) {
            return Value::TimeSeries(items.iter().filter_map(Value::as_i64).collect());
        }
        if items
            .iter()
            .all(|v| matches!(v, Value::Int(_) | Value::Float(_)))
        {
            return Value::Series(items.iter().filter_map(Value::as_f64).collect());
        }
        if items
            .iter()
            .all(|v| matches!(v, Value::TimeSeries(p) if p.len() == 2))
        {
            return Value::Intervals(
                items
                    .iter()
                    .filter_map(Value::as_time_series)
                    .map(|p| (p[0], p[1]))
                    .collect(),
            );
        }
        if items.iter().all(|v| {
            matches!(v, Value::List(p)
                if p.len() == 2
                    && matches!(p[0], Value::Int(_))
                    && matches!(p[1], Value::Str(_)))
        }) {
            let messages = items
                .iter()
                .filter_map(|v| match v {
                    Value::List(p) => match (&p[0], &p[1]) {
                        (Value::Int(t), Value::Str(s)) => Some((*t, s.clone())),
                        _ => None,
                    },
                    _ => None,
                })
                .collect();
            return Value::Messages(messages);
        }
        Value::List(items)
    }
}

// JSON has no NaN, so missing samples serialize as null and come back as NaN.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::Float(v) => {
                if v.is_nan() {
                    serializer.serialize_unit()
                } else {
                    serializer.serialize_f64(*v)
                }
            }
            Value::Str(s) => serializer.serialize_str(s),
            Value::Series(xs) => {
                let mut seq = serializer.serialize_seq(Some(xs.len()))?;
                for x in xs {
                    if x.is_nan() {
                        seq.serialize_element(&())?;
                    } else {
                        seq.serialize_element(x)?;
                    }
                }
                seq.end()
            }
            Value::TimeSeries(xs) => {
                let mut seq = serializer.serialize_seq(Some(xs.len()))?;
                for x in xs {
                    seq.serialize_element(x)?;
                }
                seq.end()
            }
            Value::Intervals(xs) => {
                let mut seq = serializer.serialize_seq(Some(xs.len()))?;
                for pair in xs {
                    seq.serialize_element(pair)?;
                }
                seq.end()
            }
            Value::Messages(xs) => {
                let mut seq = serializer.serialize_seq(Some(xs.len()))?;
                for entry in xs {
                    seq.serialize_element(entry)?;
                }
                seq.end()
            }
            Value::List(xs) => {
                let mut seq = serializer.serialize_seq(Some(xs.len()))?;
                for x in xs {
                    seq.serialize_element(x)?;
                }
                seq.end()
            }
            Value::Map(m) => {
                let mut map = serializer.serialize_map(Some(m.len()))?;
                for (k, v) in m {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a trial value (number, string, null, array or object)")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<Value, E> {
        Ok(Value::Int(v as i64))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Value, E> {
        Ok(Value::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Value, E> {
        Ok(Value::Int(v as i64))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Value, E> {
        Ok(Value::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Value, E> {
        Ok(Value::Str(v.to_string()))
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::Float(f64::NAN))
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::Float(f64::NAN))
    }

    fn visit_some<D: Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> std::result::Result<Value, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Value, A::Error> {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element::<Value>()? {
            items.push(item);
        }
        Ok(Value::classify_list(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Value, A::Error> {
        let mut map = ValueMap::new();
        while let Some((key, value)) = access.next_entry::<String, Value>()? {
            map.insert(key, value);
        }
        Ok(Value::Map(map))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Value, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

/// One behavioral episode, bounded by start/stop markers in the source log
///
/// A freshly parsed trial carries `gaze` (`x`/`y` pixel series), `pupil_size`,
/// `time` (trial-relative, starting at zero) and `events`. The compute engine
/// adds derived fields in place; the pruner never mutates a trial it was
/// given, it returns trimmed copies.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Trial {
    fields: ValueMap,
}

/// Ordered set of trials, in log-chronological order
pub type TrialSet = Vec<Trial>;

impl Trial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a value by dotted path
    pub fn get(&self, path: &str) -> Option<&Value> {
        let (first, rest) = match path.split_once('.') {
            Some((first, rest)) => (first, Some(rest)),
            None => (path, None),
        };
        let value = self.fields.get(first)?;
        match rest {
            Some(rest) => value.get_path(rest),
            None => Some(value),
        }
    }

    /// Write a value by dotted path, creating intermediate maps as needed
    ///
    /// An intermediate key holding a non-map value is replaced by a map; the
    /// resolver writes derived output below freshly created namespaces.
    pub fn set(&mut self, path: &str, value: Value) {
        let (parents, last) = match path.rsplit_once('.') {
            Some((parents, last)) => (Some(parents), last),
            None => (None, path),
        };
        let mut current = &mut self.fields;
        if let Some(parents) = parents {
            for key in parents.split('.') {
                let entry = current
                    .entry(key.to_string())
                    .or_insert_with(Value::empty_map);
                if !matches!(entry, Value::Map(_)) {
                    *entry = Value::empty_map();
                }
                current = match entry {
                    Value::Map(m) => m,
                    _ => unreachable!("entry was just replaced with a map"),
                };
            }
        }
        current.insert(last.to_string(), value);
    }

    /// Remove a top-level field
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn fields(&self) -> &ValueMap {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut ValueMap {
        &mut self.fields
    }

    /// Number of samples, taken from the mandatory `time` field
    pub fn sample_count(&self) -> usize {
        self.get("time")
            .and_then(Value::as_time_series)
            .map_or(0, <[i64]>::len)
    }
}

impl From<ValueMap> for Trial {
    fn from(fields: ValueMap) -> Self {
        Self { fields }
    }
}
