//! Gaze Log Reader CLI Application
//!
//! Command-line interface for the gaze log decoder library. It adds:
//! - The built-in transform set (screen geometry, degrees, velocity, ...)
//! - Screen geometry injection from configuration
//! - Variable selection and pruning
//! - Export to JSON/TSV/CSV

use anyhow::{bail, Context, Result};
use clap::Parser;
use gaze_log_decoder::{ParserConfig, Session, Value};
use std::path::{Path, PathBuf};

mod config;
mod export;
mod transforms;

use config::{OutputFormat, ScreenConfig};

/// Gaze Log Reader - segment eye-tracker logs and compute derived variables
#[derive(Parser, Debug)]
#[command(name = "gaze-log-cli")]
#[command(about = "Parse eye-tracker ASC logs into per-trial datasets", long_about = None)]
#[command(version)]
struct Args {
    /// ASC recording or exported JSON dataset (can be repeated)
    #[arg(short, long, value_name = "FILE")]
    log: Vec<PathBuf>,

    /// Schema document with variable definitions
    #[arg(long, value_name = "FILE")]
    schema: Option<PathBuf>,

    /// Trial start marker (required with --log)
    #[arg(long, value_name = "TEXT")]
    start_marker: Option<String>,

    /// Trial stop marker
    #[arg(long, value_name = "TEXT")]
    stop_marker: Option<String>,

    /// User-defined event name (can be repeated)
    #[arg(long = "event", value_name = "NAME")]
    events: Vec<String>,

    /// Variable to compute and keep (can be repeated)
    #[arg(short, long = "select", value_name = "PATH")]
    select: Vec<String>,

    /// Output file for the pruned dataset
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    log::info!("Gaze Log Reader CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using decoder library v{}", gaze_log_decoder::VERSION);

    if !args.log.is_empty() {
        flag_mode(&args)?;
    } else if let Some(config_path) = &args.config {
        config_mode(config_path)?;
    } else {
        println!("Gaze Log Reader - No input specified");
        println!("\nQuick Start:");
        println!("  gaze-log-cli --log subject01.asc --start-marker TRIALID --select gaze");
        println!("  gaze-log-cli --config config.toml");
        println!("\nUse --help for more options");
    }

    Ok(())
}

/// Flag mode - everything taken from command-line options
fn flag_mode(args: &Args) -> Result<()> {
    let Some(start_marker) = &args.start_marker else {
        bail!("--start-marker is required when loading data with --log");
    };
    let mut parser_config =
        ParserConfig::new(start_marker).with_user_events(args.events.iter().cloned());
    if let Some(stop) = &args.stop_marker {
        parser_config = parser_config.with_stop_marker(stop);
    }

    run_pipeline(
        &args.log,
        args.schema.as_deref(),
        &parser_config,
        None,
        &args.select,
        args.output.as_deref().map(|path| (path, args.format)),
    )
}

/// Config mode - everything taken from a TOML file
fn config_mode(config_path: &Path) -> Result<()> {
    log::info!("Loading configuration from: {:?}", config_path);
    let config = config::load_config(config_path)?;

    let output = config
        .output
        .as_ref()
        .map(|out| (out.path.as_path(), out.format));

    run_pipeline(
        &config.input.files,
        config.input.schema.as_deref(),
        &config.parser.to_parser_config(),
        config.screen,
        &config.selection.variables,
        output,
    )
}

/// Load, compute, prune, export
fn run_pipeline(
    files: &[PathBuf],
    schema_path: Option<&Path>,
    parser_config: &ParserConfig,
    screen: Option<ScreenConfig>,
    selection: &[String],
    output: Option<(&Path, OutputFormat)>,
) -> Result<()> {
    println!("═══════════════════════════════════════════════");
    println!("  Gaze Log Reader");
    println!("═══════════════════════════════════════════════\n");

    let mut session = match schema_path {
        Some(path) => Session::with_base_schema_file(path)
            .with_context(|| format!("Failed to load schema {:?}", path))?,
        None => Session::with_base_schema(transforms::default_schema()),
    };

    for file in files {
        print!("Loading {:?} ... ", file);
        match session.load_data(file, parser_config) {
            Ok(count) => println!("✓ ({} trials)", count),
            Err(e) => {
                println!("✗");
                return Err(e).with_context(|| format!("Error loading {:?}", file));
            }
        }
    }

    if let Some(screen) = screen {
        session.set_trial_field("screen.width_cm", &Value::Float(screen.width_cm));
        session.set_trial_field("screen.height_cm", &Value::Float(screen.height_cm));
        session.set_trial_field(
            "screen.viewing_distance_cm",
            &Value::Float(screen.viewing_distance_cm),
        );
    }

    let stats = session.stats();
    println!("\n📊 Session:");
    println!("  Sources:   {}", stats.num_sources);
    println!("  Trials:    {}", stats.num_trials);
    println!("  Variables: {}", stats.num_variables);

    if selection.is_empty() {
        println!("\n✓ Data loaded. Add --select <variable> to compute and export.");
        println!("\nAvailable variables:");
        for path in session.schema().leaf_paths() {
            println!("  {}", path);
        }
        return Ok(());
    }

    let registry = transforms::builtin_registry();
    println!("\nComputing {} selected variables ...", selection.len());
    session
        .compute(&registry, selection)
        .context("Computation failed")?;
    let pruned = session.prune(selection)?;
    println!("✓ {} trials computed and pruned", pruned.len());

    match output {
        Some((path, format)) => {
            export::write_dataset(&pruned, path, format)?;
            println!("✓ Dataset written to {}", path.display());
        }
        None => {
            // No output file: show what the first trial looks like.
            if let Some(first) = pruned.first() {
                println!("\nFirst trial fields:");
                for (key, value) in first.fields() {
                    println!("  {} = {}", key, summarize(value));
                }
            }
        }
    }

    Ok(())
}

/// Short one-line description of a value for terminal preview
fn summarize(value: &Value) -> String {
    match value {
        Value::Series(v) => format!("series[{}]", v.len()),
        Value::TimeSeries(v) => format!("time[{}]", v.len()),
        Value::Intervals(v) => format!("intervals[{}]", v.len()),
        Value::Messages(v) => format!("messages[{}]", v.len()),
        Value::List(v) => format!("list[{}]", v.len()),
        Value::Map(m) => {
            let keys: Vec<&str> = m.keys().map(String::as_str).collect();
            format!("{{{}}}", keys.join(", "))
        }
        Value::Int(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Str(s) => format!("{:?}", s),
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
