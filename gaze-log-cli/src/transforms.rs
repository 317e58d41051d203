//! Built-in transforms and the default variable schema
//!
//! The decoder library treats transforms as opaque named functions; this
//! module supplies the standard set for eye-tracking preprocessing: screen
//! geometry read out of recorder messages, pixel-to-degree conversion,
//! smoothing, velocity and (micro)saccade handling.
//!
//! Every transform consumes the values of its schema-declared requirements,
//! in declared order, and returns either one derived value or
//! `Value::empty()` when a trial simply does not contain what the transform
//! needs (e.g. no GAZE_COORDS message).

use gaze_log_decoder::{
    LeafSpec, TransformError, TransformRegistry, Value, ValueMap, VariableSchema,
};
use std::f64::consts::PI;

/// Relative velocity threshold for microsaccade detection
const MISACC_VFAC: f64 = 5.0;
/// Minimal microsaccade duration (ms)
const MISACC_MIN_DUR: i64 = 5;
/// Maximal microsaccade duration (ms)
const MISACC_MAX_DUR: i64 = 100;
/// Minimal separation between two detected microsaccades (ms)
const MISACC_MIN_SEP: i64 = 30;

/// Samples removed before each saccade (ms)
const SUPPRESS_BEFORE: i64 = 5;
/// Samples removed after each saccade (ms)
const SUPPRESS_AFTER: i64 = 15;

/// Low-pass cutoff for gaze smoothing (Hz)
const SMOOTH_CUTOFF_HZ: f64 = 30.0;

/// Build the registry with every built-in transform
pub fn builtin_registry() -> TransformRegistry {
    let mut registry = TransformRegistry::new();
    registry.register("screen_width_px", screen_width_px);
    registry.register("screen_height_px", screen_height_px);
    registry.register("sample_rate", sample_rate);
    registry.register("screen_width_deg", screen_width_deg);
    registry.register("screen_height_deg", screen_height_deg);
    registry.register("px_per_deg", px_per_deg);
    registry.register("gaze_deg", gaze_deg);
    registry.register("gaze_smooth", gaze_smooth);
    registry.register("velocity", velocity);
    registry.register("microsaccades", microsaccades);
    registry.register("suppress_saccades", suppress_saccades);
    registry
}

/// Default schema for the built-in transforms
///
/// Raw variables (gaze, pupil_size, time, events, screen geometry from the
/// configuration) are merged in when data is loaded; this only declares the
/// derived layer.
pub fn default_schema() -> VariableSchema {
    let mut schema = VariableSchema::new();
    let leaves: Vec<(&str, LeafSpec)> = vec![
        (
            "screen.width_px",
            LeafSpec::computed(
                "Screen width in pixels, from GAZE_COORDS",
                "screen_width_px",
                vec!["events.messages".into()],
            ),
        ),
        (
            "screen.height_px",
            LeafSpec::computed(
                "Screen height in pixels, from GAZE_COORDS",
                "screen_height_px",
                vec!["events.messages".into()],
            ),
        ),
        (
            "sample_rate",
            LeafSpec::computed(
                "Recording sample rate in Hz, from !MODE RECORD",
                "sample_rate",
                vec!["events.messages".into()],
            ),
        ),
        (
            "screen.width_deg",
            LeafSpec::computed(
                "Screen width in degrees of visual angle",
                "screen_width_deg",
                vec!["screen.width_cm".into(), "screen.viewing_distance_cm".into()],
            ),
        ),
        (
            "screen.height_deg",
            LeafSpec::computed(
                "Screen height in degrees of visual angle",
                "screen_height_deg",
                vec![
                    "screen.height_cm".into(),
                    "screen.viewing_distance_cm".into(),
                ],
            ),
        ),
        (
            "screen.px_per_deg",
            LeafSpec::computed(
                "Pixels per degree of visual angle",
                "px_per_deg",
                vec!["screen.width_px".into(), "screen.width_deg".into()],
            ),
        ),
        (
            "gaze_deg",
            LeafSpec::computed(
                "Gaze position in degrees",
                "gaze_deg",
                vec!["gaze".into(), "screen.px_per_deg".into()],
            ),
        ),
        (
            "gaze_smooth",
            LeafSpec::computed(
                "Low-pass filtered gaze position",
                "gaze_smooth",
                vec!["gaze".into(), "sample_rate".into()],
            ),
        ),
        (
            "velocity",
            LeafSpec::computed(
                "Gaze velocity in degrees per second",
                "velocity",
                vec!["gaze_deg".into(), "sample_rate".into()],
            ),
        ),
        (
            "microsaccades",
            LeafSpec::computed(
                "Detected microsaccade intervals",
                "microsaccades",
                vec!["velocity".into(), "time".into()],
            ),
        ),
        (
            "velocity_clean",
            LeafSpec::computed(
                "Velocity with saccadic episodes blanked",
                "suppress_saccades",
                vec![
                    "velocity".into(),
                    "events.saccades".into(),
                    "microsaccades".into(),
                    "time".into(),
                ],
            ),
        ),
    ];
    for (path, spec) in leaves {
        schema
            .insert_leaf(path, spec)
            .expect("built-in schema paths are distinct");
    }
    schema
}

// ---------------------------------------------------------------------------
// Argument helpers

type TResult = Result<Value, TransformError>;

fn expect_args(args: &[Value], expected: usize) -> Result<(), TransformError> {
    if args.len() != expected {
        return Err(TransformError::ArgumentCount {
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

fn scalar_arg(args: &[Value], index: usize) -> Result<f64, TransformError> {
    args[index].as_f64().ok_or(TransformError::ArgumentType {
        index,
        expected: "numeric scalar",
    })
}

fn messages_arg(args: &[Value], index: usize) -> Result<&[(i64, String)], TransformError> {
    args[index]
        .as_messages()
        .ok_or(TransformError::ArgumentType {
            index,
            expected: "message list",
        })
}

fn time_arg(args: &[Value], index: usize) -> Result<&[i64], TransformError> {
    args[index]
        .as_time_series()
        .ok_or(TransformError::ArgumentType {
            index,
            expected: "time series",
        })
}

fn intervals_arg(args: &[Value], index: usize) -> Result<&[(i64, i64)], TransformError> {
    args[index]
        .as_intervals()
        .ok_or(TransformError::ArgumentType {
            index,
            expected: "interval list",
        })
}

/// An x/y pair of equally long float series
fn xy_arg(args: &[Value], index: usize) -> Result<(&[f64], &[f64]), TransformError> {
    let shape_err = || TransformError::ArgumentType {
        index,
        expected: "map with x and y series",
    };
    let map = args[index].as_map().ok_or_else(shape_err)?;
    let x = map.get("x").and_then(Value::as_series);
    let y = map.get("y").and_then(Value::as_series);
    match (x, y) {
        (Some(x), Some(y)) if x.len() == y.len() => Ok((x, y)),
        _ => Err(shape_err()),
    }
}

fn xy_value(x: Vec<f64>, y: Vec<f64>) -> Value {
    let mut map = ValueMap::new();
    map.insert("x".to_string(), Value::Series(x));
    map.insert("y".to_string(), Value::Series(y));
    Value::Map(map)
}

// ---------------------------------------------------------------------------
// Screen geometry from recorder messages

/// First message whose text starts with the given token, split on whitespace
fn find_message_tokens<'a>(
    messages: &'a [(i64, String)],
    head: &str,
) -> Option<Vec<&'a str>> {
    messages
        .iter()
        .map(|(_, text)| text.split_whitespace().collect::<Vec<&str>>())
        .find(|tokens| tokens.first() == Some(&head))
}

/// Screen width in pixels, read from the GAZE_COORDS message
fn screen_width_px(args: &[Value]) -> TResult {
    expect_args(args, 1)?;
    let messages = messages_arg(args, 0)?;
    match find_message_tokens(messages, "GAZE_COORDS") {
        Some(tokens) if tokens.len() >= 2 => {
            match tokens[tokens.len() - 2].parse::<f64>() {
                Ok(width) => Ok(Value::Float(width)),
                Err(_) => Ok(Value::empty()),
            }
        }
        _ => Ok(Value::empty()),
    }
}

/// Screen height in pixels, read from the GAZE_COORDS message
fn screen_height_px(args: &[Value]) -> TResult {
    expect_args(args, 1)?;
    let messages = messages_arg(args, 0)?;
    match find_message_tokens(messages, "GAZE_COORDS") {
        Some(tokens) if !tokens.is_empty() => {
            match tokens[tokens.len() - 1].parse::<f64>() {
                Ok(height) => Ok(Value::Float(height)),
                Err(_) => Ok(Value::empty()),
            }
        }
        _ => Ok(Value::empty()),
    }
}

/// Sample rate in Hz, read from the "!MODE RECORD" message
fn sample_rate(args: &[Value]) -> TResult {
    expect_args(args, 1)?;
    let messages = messages_arg(args, 0)?;
    let tokens = messages
        .iter()
        .map(|(_, text)| text.split_whitespace().collect::<Vec<&str>>())
        .find(|tokens| tokens.len() > 3 && tokens[0] == "!MODE" && tokens[1] == "RECORD");
    match tokens {
        Some(tokens) => match tokens[3].parse::<f64>() {
            Ok(rate) => Ok(Value::Float(rate)),
            Err(_) => Ok(Value::empty()),
        },
        None => Ok(Value::empty()),
    }
}

// ---------------------------------------------------------------------------
// Degree conversion

fn extent_deg(extent_cm: f64, viewing_distance_cm: f64) -> f64 {
    let tan = ((extent_cm / 2.0) / viewing_distance_cm).atan();
    2.0 * tan * 180.0 / PI
}

/// Screen width in degrees of visual angle
fn screen_width_deg(args: &[Value]) -> TResult {
    expect_args(args, 2)?;
    Ok(Value::Float(extent_deg(
        scalar_arg(args, 0)?,
        scalar_arg(args, 1)?,
    )))
}

/// Screen height in degrees of visual angle
fn screen_height_deg(args: &[Value]) -> TResult {
    expect_args(args, 2)?;
    Ok(Value::Float(extent_deg(
        scalar_arg(args, 0)?,
        scalar_arg(args, 1)?,
    )))
}

/// Pixels per degree of visual angle
fn px_per_deg(args: &[Value]) -> TResult {
    expect_args(args, 2)?;
    let width_px = scalar_arg(args, 0)?;
    let width_deg = scalar_arg(args, 1)?;
    Ok(Value::Float(width_px / width_deg))
}

/// Gaze position converted from pixels to degrees
fn gaze_deg(args: &[Value]) -> TResult {
    expect_args(args, 2)?;
    let (x, y) = xy_arg(args, 0)?;
    let scale = scalar_arg(args, 1)?;
    Ok(xy_value(
        x.iter().map(|v| v / scale).collect(),
        y.iter().map(|v| v / scale).collect(),
    ))
}

// ---------------------------------------------------------------------------
// Smoothing

/// Second-order Butterworth low-pass coefficients (bilinear transform)
fn butter_lowpass(cutoff_hz: f64, rate_hz: f64) -> ([f64; 3], [f64; 2]) {
    let k = (PI * cutoff_hz / rate_hz).tan();
    let q = std::f64::consts::SQRT_2;
    let norm = 1.0 / (1.0 + q * k + k * k);
    let b0 = k * k * norm;
    (
        [b0, 2.0 * b0, b0],
        [2.0 * (k * k - 1.0) * norm, (1.0 - q * k + k * k) * norm],
    )
}

fn biquad(xs: &[f64], b: [f64; 3], a: [f64; 2]) -> Vec<f64> {
    let mut out = Vec::with_capacity(xs.len());
    let (mut x1, mut x2, mut y1, mut y2) = (0.0, 0.0, 0.0, 0.0);
    for &x in xs {
        let y = b[0] * x + b[1] * x1 + b[2] * x2 - a[0] * y1 - a[1] * y2;
        x2 = x1;
        x1 = x;
        y2 = y1;
        y1 = y;
        out.push(y);
    }
    out
}

/// Zero-phase filtering: forward pass, then backward pass
fn filtfilt(xs: &[f64], b: [f64; 3], a: [f64; 2]) -> Vec<f64> {
    let forward = biquad(xs, b, a);
    let reversed: Vec<f64> = forward.into_iter().rev().collect();
    let backward = biquad(&reversed, b, a);
    backward.into_iter().rev().collect()
}

/// Filter one axis, skipping NaN gaps and putting them back afterwards
fn smooth_axis(xs: &[f64], b: [f64; 3], a: [f64; 2]) -> Vec<f64> {
    let valid: Vec<f64> = xs.iter().copied().filter(|v| !v.is_nan()).collect();
    if valid.is_empty() {
        return xs.to_vec();
    }
    let filtered = filtfilt(&valid, b, a);
    let mut iter = filtered.into_iter();
    xs.iter()
        .map(|v| {
            if v.is_nan() {
                f64::NAN
            } else {
                iter.next().unwrap_or(f64::NAN)
            }
        })
        .collect()
}

/// Low-pass filtered gaze position
fn gaze_smooth(args: &[Value]) -> TResult {
    expect_args(args, 2)?;
    let (x, y) = xy_arg(args, 0)?;
    let rate = scalar_arg(args, 1)?;
    if rate <= 2.0 * SMOOTH_CUTOFF_HZ {
        return Err(TransformError::Failed(format!(
            "sample rate {} Hz too low for a {} Hz cutoff",
            rate, SMOOTH_CUTOFF_HZ
        )));
    }
    let (b, a) = butter_lowpass(SMOOTH_CUTOFF_HZ, rate);
    Ok(xy_value(smooth_axis(x, b, a), smooth_axis(y, b, a)))
}

// ---------------------------------------------------------------------------
// Velocity and saccades

/// Central-difference gradient, one-sided at the edges
fn gradient(xs: &[f64]) -> Vec<f64> {
    let n = xs.len();
    match n {
        0 => Vec::new(),
        1 => vec![0.0],
        _ => (0..n)
            .map(|i| {
                if i == 0 {
                    xs[1] - xs[0]
                } else if i == n - 1 {
                    xs[n - 1] - xs[n - 2]
                } else {
                    (xs[i + 1] - xs[i - 1]) / 2.0
                }
            })
            .collect(),
    }
}

/// Gaze velocity: per-axis gradient scaled by the sample rate
fn velocity(args: &[Value]) -> TResult {
    expect_args(args, 2)?;
    let (x, y) = xy_arg(args, 0)?;
    let rate = scalar_arg(args, 1)?;
    Ok(xy_value(
        gradient(x).into_iter().map(|v| v * rate).collect(),
        gradient(y).into_iter().map(|v| v * rate).collect(),
    ))
}

/// Median ignoring NaN entries
fn nan_median(xs: &[f64]) -> f64 {
    let mut valid: Vec<f64> = xs.iter().copied().filter(|v| !v.is_nan()).collect();
    if valid.is_empty() {
        return f64::NAN;
    }
    valid.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = valid.len() / 2;
    if valid.len() % 2 == 1 {
        valid[mid]
    } else {
        (valid[mid - 1] + valid[mid]) / 2.0
    }
}

/// Median-based velocity spread, the detection radius base
fn median_spread(vs: &[f64]) -> f64 {
    let squares: Vec<f64> = vs.iter().map(|v| v * v).collect();
    let med = nan_median(vs);
    (nan_median(&squares) - med * med).sqrt()
}

/// Detect microsaccades from the velocity signal
///
/// A sample is saccadic when its velocity leaves an ellipse whose radii are
/// a multiple of the median velocity spread. Runs of saccadic samples within
/// the duration bounds become intervals; intervals closer than the minimal
/// separation are fused.
fn microsaccades(args: &[Value]) -> TResult {
    expect_args(args, 2)?;
    let (vx, vy) = xy_arg(args, 0)?;
    let time = time_arg(args, 1)?;
    if time.is_empty() {
        return Ok(Value::empty());
    }
    let t0 = time[0];

    let radius_x = MISACC_VFAC * median_spread(vx);
    let radius_y = MISACC_VFAC * median_spread(vy);
    if !(radius_x > 0.0) || !(radius_y > 0.0) {
        return Ok(Value::empty());
    }

    let saccadic: Vec<i64> = vx
        .iter()
        .zip(vy)
        .enumerate()
        .filter(|(_, (x, y))| {
            let test = (*x / radius_x).powi(2) + (*y / radius_y).powi(2);
            test > 1.0
        })
        .map(|(i, _)| i as i64)
        .collect();

    // Runs of consecutive saccadic samples, bounded by duration.
    let mut intervals: Vec<(i64, i64)> = Vec::new();
    let mut run_start = 0usize;
    for i in 1..=saccadic.len() {
        let broken = i == saccadic.len() || saccadic[i] - saccadic[i - 1] != 1;
        if broken {
            let dur = (i - run_start) as i64;
            if (MISACC_MIN_DUR..MISACC_MAX_DUR).contains(&dur) {
                intervals.push((saccadic[run_start] + t0, saccadic[i - 1] + t0));
            }
            run_start = i;
        }
    }

    // Fuse intervals separated by less than the minimal separation.
    let mut fused: Vec<(i64, i64)> = Vec::new();
    for interval in intervals {
        match fused.last_mut() {
            Some(last) if interval.0 - last.1 < MISACC_MIN_SEP => last.1 = interval.1,
            _ => fused.push(interval),
        }
    }
    fused.retain(|(start, end)| end - start < MISACC_MAX_DUR);

    if fused.is_empty() {
        return Ok(Value::empty());
    }
    Ok(Value::Intervals(fused))
}

/// Blank the velocity signal around saccades and microsaccades
fn suppress_saccades(args: &[Value]) -> TResult {
    expect_args(args, 4)?;
    let (vx, vy) = xy_arg(args, 0)?;
    let saccades = intervals_arg(args, 1)?;
    // Microsaccades may legitimately be absent for a trial.
    let micro = args[2].as_intervals().unwrap_or(&[]);
    let time = time_arg(args, 3)?;
    if time.is_empty() {
        return Ok(Value::empty());
    }
    let t0 = time[0];
    let n = time.len() as i64;

    let mut x = vx.to_vec();
    let mut y = vy.to_vec();
    for (start, end) in saccades.iter().chain(micro) {
        let from = (start - t0 - SUPPRESS_BEFORE).max(0);
        let to = (end - t0 + SUPPRESS_AFTER).min(n);
        for i in from..to {
            x[i as usize] = f64::NAN;
            y[i as usize] = f64::NAN;
        }
    }
    Ok(xy_value(x, y))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(texts: &[&str]) -> Value {
        Value::Messages(texts.iter().map(|t| (0, t.to_string())).collect())
    }

    #[test]
    fn test_registry_has_all_schema_transforms() {
        let registry = builtin_registry();
        let schema = default_schema();
        // Every transform named by the default schema must be registered.
        for path in schema.leaf_paths() {
            if let Some(gaze_log_decoder::SchemaNode::Leaf(spec)) = schema.get(&path) {
                if let gaze_log_decoder::TransformRef::Named(name) = &spec.transform {
                    assert!(registry.get(name).is_some(), "missing transform {}", name);
                }
            }
        }
    }

    #[test]
    fn test_screen_geometry_from_messages() {
        let msgs = messages(&["GAZE_COORDS 0.0 0.0 1919.0 1079.0"]);
        assert_eq!(
            screen_width_px(&[msgs.clone()]).unwrap(),
            Value::Float(1919.0)
        );
        assert_eq!(screen_height_px(&[msgs]).unwrap(), Value::Float(1079.0));

        let none = screen_width_px(&[messages(&["something else"])]).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_sample_rate_from_mode_record() {
        let msgs = messages(&["!MODE RECORD CR 1000 2 1 L"]);
        assert_eq!(sample_rate(&[msgs]).unwrap(), Value::Float(1000.0));
    }

    #[test]
    fn test_degree_conversion() {
        // 40 cm wide screen at 57 cm: roughly 38.6 degrees.
        let deg = screen_width_deg(&[Value::Float(40.0), Value::Float(57.0)])
            .unwrap()
            .as_f64()
            .unwrap();
        assert!((deg - 38.63).abs() < 0.05);

        let scale = px_per_deg(&[Value::Float(1920.0), Value::Float(deg)])
            .unwrap()
            .as_f64()
            .unwrap();
        assert!((scale - 1920.0 / deg).abs() < 1e-9);
    }

    #[test]
    fn test_gaze_deg_scales_both_axes() {
        let gaze = xy_value(vec![10.0, 20.0], vec![30.0, f64::NAN]);
        let result = gaze_deg(&[gaze, Value::Float(10.0)]).unwrap();
        let map = result.as_map().unwrap();
        assert_eq!(
            map.get("x").and_then(Value::as_series),
            Some(&[1.0, 2.0][..])
        );
        let y = map.get("y").and_then(Value::as_series).unwrap();
        assert_eq!(y[0], 3.0);
        assert!(y[1].is_nan());
    }

    #[test]
    fn test_velocity_of_linear_ramp_is_constant() {
        let gaze = xy_value(vec![0.0, 1.0, 2.0, 3.0], vec![0.0; 4]);
        let result = velocity(&[gaze, Value::Float(500.0)]).unwrap();
        let x = result.as_map().unwrap().get("x").and_then(Value::as_series).unwrap().to_vec();
        assert_eq!(x, vec![500.0; 4]);
    }

    #[test]
    fn test_argument_mismatch_is_reported() {
        let err = velocity(&[Value::Float(1.0), Value::Float(2.0)]).unwrap_err();
        assert!(matches!(err, TransformError::ArgumentType { index: 0, .. }));

        let err = velocity(&[Value::Float(1.0)]).unwrap_err();
        assert!(matches!(
            err,
            TransformError::ArgumentCount {
                expected: 2,
                got: 1
            }
        ));
    }

    #[test]
    fn test_smooth_preserves_nan_gaps_and_length() {
        let mut xs = vec![0.0; 200];
        for (i, x) in xs.iter_mut().enumerate() {
            *x = (i as f64 / 10.0).sin();
        }
        xs[50] = f64::NAN;
        let gaze = xy_value(xs.clone(), xs.clone());
        let result = gaze_smooth(&[gaze, Value::Float(1000.0)]).unwrap();
        let out = result.as_map().unwrap().get("x").and_then(Value::as_series).unwrap();
        assert_eq!(out.len(), xs.len());
        assert!(out[50].is_nan());
        assert!(!out[49].is_nan());
    }

    #[test]
    fn test_smooth_rejects_low_sample_rate() {
        let gaze = xy_value(vec![0.0; 10], vec![0.0; 10]);
        assert!(gaze_smooth(&[gaze, Value::Float(50.0)]).is_err());
    }

    #[test]
    fn test_microsaccade_detection_finds_burst() {
        // Quiet velocity with jitter, one fast 10 ms burst.
        let n = 400usize;
        let mut vx = vec![0.0; n];
        let mut vy = vec![0.0; n];
        for i in 0..n {
            let jitter = ((i % 7) as f64 - 3.0) * 0.5;
            vx[i] = jitter;
            vy[i] = -jitter;
        }
        for i in 200..210 {
            vx[i] = 80.0;
            vy[i] = 80.0;
        }
        let time: Vec<i64> = (0..n as i64).collect();

        let result = microsaccades(&[
            xy_value(vx, vy),
            Value::TimeSeries(time),
        ])
        .unwrap();
        let intervals = result.as_intervals().unwrap();
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].0, 200);
        assert!(intervals[0].1 >= 205 && intervals[0].1 < 215);
    }

    #[test]
    fn test_suppress_saccades_blanks_windows() {
        let n = 100usize;
        let gaze = xy_value(vec![1.0; n], vec![1.0; n]);
        let time: Vec<i64> = (0..n as i64).collect();
        let result = suppress_saccades(&[
            gaze,
            Value::Intervals(vec![(40, 50)]),
            Value::empty(),
            Value::TimeSeries(time),
        ])
        .unwrap();
        let x = result.as_map().unwrap().get("x").and_then(Value::as_series).unwrap();
        assert!(!x[34].is_nan());
        assert!(x[35].is_nan());
        assert!(x[64].is_nan());
        assert!(!x[65].is_nan());
    }
}
