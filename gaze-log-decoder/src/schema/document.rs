//! Schema document loading
//!
//! Variable definitions persist as a JSON tree in a historical format: a
//! leaf is an object carrying exactly the four keys `desc`, `func`, `name`
//! and `reqs` (with `func` set to the string `"NONE"` for raw data); any
//! other object is a namespace of child definitions. That shape rule is the
//! document format's contract and is applied here only; the in-memory schema
//! is always explicitly tagged.

use super::{LeafSpec, SchemaNode, TransformRef, VariableSchema};
use crate::types::{DecoderError, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// The exact attribute set identifying a leaf descriptor
const LEAF_KEYS: [&str; 4] = ["desc", "func", "name", "reqs"];

/// Marker value for `func` meaning "raw data, nothing to compute"
const RAW_FUNC: &str = "NONE";

/// Load a schema document from disk
pub fn load_schema_file(path: &Path) -> Result<VariableSchema> {
    log::info!("Loading schema document: {:?}", path);

    if !path.is_file() {
        return Err(DecoderError::SourceNotFound(path.display().to_string()));
    }
    let content = std::fs::read_to_string(path)?;
    let schema = parse_schema_document(&content)
        .map_err(|e| annotate_error(e, path))?;

    log::info!(
        "Loaded schema with {} variables from {:?}",
        schema.leaf_count(),
        path
    );
    Ok(schema)
}

fn annotate_error(err: DecoderError, path: &Path) -> DecoderError {
    match err {
        DecoderError::SchemaParse(msg) => {
            DecoderError::SchemaParse(format!("{}: {}", path.display(), msg))
        }
        other => other,
    }
}

/// Parse a schema document from a JSON string
pub fn parse_schema_document(content: &str) -> Result<VariableSchema> {
    let document: serde_json::Value = serde_json::from_str(content)
        .map_err(|e| DecoderError::SchemaParse(e.to_string()))?;

    let serde_json::Value::Object(map) = document else {
        return Err(DecoderError::SchemaParse(
            "top level must be an object".to_string(),
        ));
    };

    let mut root = BTreeMap::new();
    for (key, value) in map {
        root.insert(key.clone(), node_from_json(&key, &value)?);
    }

    let mut schema = VariableSchema::new();
    schema.merge(root)?;
    Ok(schema)
}

fn node_from_json(path: &str, value: &serde_json::Value) -> Result<SchemaNode> {
    let serde_json::Value::Object(map) = value else {
        return Err(DecoderError::SchemaParse(format!(
            "'{}' must be an object, got {}",
            path, value
        )));
    };

    let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
    keys.sort_unstable();
    if keys == LEAF_KEYS {
        return leaf_from_json(path, map);
    }

    let mut children = BTreeMap::new();
    for (key, child) in map {
        let child_path = format!("{}.{}", path, key);
        children.insert(key.clone(), node_from_json(&child_path, child)?);
    }
    Ok(SchemaNode::Namespace(children))
}

fn leaf_from_json(
    path: &str,
    map: &serde_json::Map<String, serde_json::Value>,
) -> Result<SchemaNode> {
    let desc = string_field(path, map, "desc")?;
    let func = string_field(path, map, "func")?;
    let reqs = match map.get("reqs") {
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                serde_json::Value::String(s) => Ok(s.clone()),
                other => Err(DecoderError::SchemaParse(format!(
                    "'{}': reqs entries must be strings, got {}",
                    path, other
                ))),
            })
            .collect::<Result<Vec<String>>>()?,
        _ => {
            return Err(DecoderError::SchemaParse(format!(
                "'{}': reqs must be an array",
                path
            )));
        }
    };

    let transform = if func == RAW_FUNC {
        TransformRef::Raw
    } else {
        TransformRef::Named(func)
    };

    Ok(SchemaNode::Leaf(LeafSpec {
        desc,
        transform,
        reqs,
    }))
}

fn string_field(
    path: &str,
    map: &serde_json::Map<String, serde_json::Value>,
    field: &str,
) -> Result<String> {
    match map.get(field) {
        Some(serde_json::Value::String(s)) => Ok(s.clone()),
        _ => Err(DecoderError::SchemaParse(format!(
            "'{}': {} must be a string",
            path, field
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"{
        "gaze": {
            "desc": "Gaze position in pixels",
            "func": "NONE",
            "name": "gaze",
            "reqs": []
        },
        "screen": {
            "width_deg": {
                "desc": "Screen width in degrees",
                "func": "screen_width_deg",
                "name": "width_deg",
                "reqs": ["screen.width_cm", "screen.viewing_distance_cm"]
            }
        }
    }"#;

    #[test]
    fn test_parse_document() {
        let schema = parse_schema_document(DOCUMENT).unwrap();
        assert_eq!(schema.leaf_count(), 2);

        match schema.get("gaze") {
            Some(SchemaNode::Leaf(spec)) => assert_eq!(spec.transform, TransformRef::Raw),
            other => panic!("expected leaf, got {:?}", other),
        }
        match schema.get("screen.width_deg") {
            Some(SchemaNode::Leaf(spec)) => {
                assert_eq!(
                    spec.transform,
                    TransformRef::Named("screen_width_deg".into())
                );
                assert_eq!(spec.reqs.len(), 2);
            }
            other => panic!("expected leaf, got {:?}", other),
        }
    }

    #[test]
    fn test_object_without_leaf_keys_is_namespace() {
        let schema = parse_schema_document(r#"{"a":{"b":{"desc":"d","func":"NONE","name":"b","reqs":[]}}}"#)
            .unwrap();
        assert!(matches!(schema.get("a"), Some(SchemaNode::Namespace(_))));
        assert!(matches!(schema.get("a.b"), Some(SchemaNode::Leaf(_))));
    }

    #[test]
    fn test_bad_document_is_rejected() {
        assert!(matches!(
            parse_schema_document("[]").unwrap_err(),
            DecoderError::SchemaParse(_)
        ));
        assert!(matches!(
            parse_schema_document(r#"{"a": 3}"#).unwrap_err(),
            DecoderError::SchemaParse(_)
        ));
        assert!(matches!(
            parse_schema_document(r#"{"a":{"desc":"d","func":"f","name":"a","reqs":"no"}}"#)
                .unwrap_err(),
            DecoderError::SchemaParse(_)
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = load_schema_file(Path::new("no-such-schema.json")).unwrap_err();
        assert!(matches!(err, DecoderError::SourceNotFound(_)));
    }
}
