//! Parse an ASC recording and print what was found.
//!
//! Usage: cargo run --example parse_asc -- <file.asc> <start-marker>

use gaze_log_decoder::{ParserConfig, Session};
use std::path::Path;

fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let (Some(file), Some(marker)) = (args.next(), args.next()) else {
        eprintln!("usage: parse_asc <file.asc> <start-marker>");
        std::process::exit(2);
    };

    let config = ParserConfig::new(marker);
    let mut session = Session::new();
    match session.load_data(Path::new(&file), &config) {
        Ok(count) => {
            let stats = session.stats();
            println!("{}: {} trials, {} variables", file, count, stats.num_variables);
            for path in session.schema().leaf_paths() {
                println!("  {}", path);
            }
        }
        Err(e) => {
            eprintln!("failed to load {}: {}", file, e);
            std::process::exit(1);
        }
    }
}
