//! End-to-end pipeline test: parse, compute, prune, export, reload.

use gaze_log_decoder::{
    LeafSpec, ParserConfig, Session, TransformError, TransformRegistry, Trial, Value,
    VariableSchema,
};
use std::io::Write;

const LOG: &str = "\
** converted ASC dump
MSG\t900 !MODE RECORD CR 1000 2 1 L
MSG\t1000 TRIALID 1
MSG\t1000 GAZE_COORDS 0.0 0.0 1919.0 1079.0
1000\t 512.5\t 380.0\t 4500.0\t...
1001\t 514.0\t 381.5\t 4510.0\t...
1002\t  .\t  .\t  0.0\t...
1003\t 516.0\t 383.0\t 4520.0\t...
EFIX L   1000\t1003\t3\t514.0\t381.0
MSG\t1004 StimOn
MSG\t2000 TRIALID 2
MSG\t2000 GAZE_COORDS 0.0 0.0 1919.0 1079.0
2000\t 600.0\t 400.0\t 4800.0\t...
2001\t 601.0\t 401.0\t 4805.0\t...
";

fn parser_config() -> ParserConfig {
    ParserConfig::new("TRIALID").add_user_event("StimOn")
}

/// Mean of the x gaze series, ignoring NaN samples.
fn mean_gaze_x(args: &[Value]) -> Result<Value, TransformError> {
    if args.len() != 1 {
        return Err(TransformError::ArgumentCount {
            expected: 1,
            got: args.len(),
        });
    }
    let gaze = args[0].as_map().ok_or(TransformError::ArgumentType {
        index: 0,
        expected: "gaze map",
    })?;
    let x = gaze
        .get("x")
        .and_then(Value::as_series)
        .ok_or(TransformError::ArgumentType {
            index: 0,
            expected: "gaze map with x series",
        })?;
    let valid: Vec<f64> = x.iter().copied().filter(|v| !v.is_nan()).collect();
    if valid.is_empty() {
        return Ok(Value::empty());
    }
    Ok(Value::Float(valid.iter().sum::<f64>() / valid.len() as f64))
}

fn base_schema() -> VariableSchema {
    let mut schema = VariableSchema::new();
    schema
        .insert_leaf(
            "mean_x",
            LeafSpec::computed("Mean horizontal gaze", "mean_gaze_x", vec!["gaze".into()]),
        )
        .unwrap();
    schema
}

fn loaded_session() -> Session {
    let mut file = tempfile::Builder::new().suffix(".asc").tempfile().unwrap();
    file.write_all(LOG.as_bytes()).unwrap();

    let mut session = Session::with_base_schema(base_schema());
    session.load_data(file.path(), &parser_config()).unwrap();
    session
}

#[test]
fn parses_both_trials_with_invariants() {
    let session = loaded_session();
    assert_eq!(session.stats().num_trials, 2);
    assert_eq!(session.stats().num_sources, 1);
}

#[test]
fn computes_derived_variable_for_every_trial() {
    let mut session = loaded_session();
    let mut registry = TransformRegistry::new();
    registry.register("mean_gaze_x", mean_gaze_x);

    let requested = vec!["time".to_string(), "gaze".to_string(), "mean_x".to_string()];
    let computed = session.compute(&registry, &requested).unwrap();

    let first = computed[0].get("mean_x").and_then(Value::as_f64).unwrap();
    assert!((first - (512.5 + 514.0 + 516.0) / 3.0).abs() < 1e-9);
    assert!(computed[1].get("mean_x").is_some());
}

#[test]
fn missing_transform_aborts_batch() {
    let mut session = loaded_session();
    let registry = TransformRegistry::new(); // "mean_gaze_x" never registered

    let err = session
        .compute(&registry, &["mean_x".to_string()])
        .unwrap_err();
    assert!(matches!(
        err,
        gaze_log_decoder::DecoderError::UnknownTransform(_)
    ));
}

#[test]
fn pruned_export_roundtrips_through_json() {
    let mut session = loaded_session();
    let mut registry = TransformRegistry::new();
    registry.register("mean_gaze_x", mean_gaze_x);

    let requested = vec!["time".to_string(), "gaze".to_string(), "mean_x".to_string()];
    session.compute(&registry, &requested).unwrap();
    let pruned = session.prune(&requested).unwrap();

    let json = serde_json::to_string(&pruned).unwrap();
    let reloaded: Vec<Trial> = serde_json::from_str(&json).unwrap();

    assert_eq!(reloaded.len(), pruned.len());
    for (back, original) in reloaded.iter().zip(&pruned) {
        let back_keys: Vec<&String> = back.fields().keys().collect();
        let original_keys: Vec<&String> = original.fields().keys().collect();
        assert_eq!(back_keys, original_keys);
        assert_eq!(back.get("time"), original.get("time"));
        assert_eq!(back.get("mean_x"), original.get("mean_x"));
    }
    // The NaN sample survives the null round trip.
    let x = reloaded[0].get("gaze.x").and_then(Value::as_series).unwrap();
    assert!(x[2].is_nan());
}

#[test]
fn repruning_a_different_selection_needs_no_recomputation() {
    let mut session = loaded_session();
    let mut registry = TransformRegistry::new();
    registry.register("mean_gaze_x", mean_gaze_x);

    let requested = vec!["gaze".to_string(), "mean_x".to_string()];
    session.compute(&registry, &requested).unwrap();

    let narrow = session.prune(&["mean_x".to_string()]).unwrap();
    let keys: Vec<&String> = narrow[0].fields().keys().collect();
    assert_eq!(keys, vec!["mean_x", "tag", "time"]);

    let wide = session.prune(&requested).unwrap();
    assert!(wide[0].get("gaze.x").is_some());
}
