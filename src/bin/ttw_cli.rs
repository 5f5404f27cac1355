//! Line-oriented shell over the scan controller, one command per line.

use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::env;
use std::io::{self, BufRead, Write};
use tube_to_well::config::PlateConfig;
use tube_to_well::record_writer::CsvRecordSink;
use tube_to_well::scan_controller::ScanController;
use tube_to_well::scan_shell::{ShellCommand, help_text};

fn usage() {
    eprintln!(
        "Usage:\n  \
  ttw_cli [--config PATH]\n\n  \
  Reads shell commands from stdin, one per line, and prints each result\n  \
  as JSON. Transfer record files land in the configured records directory.\n\n\
{}",
        help_text()
    );
}

fn parse_config_arg(args: &[String]) -> Result<Option<String>> {
    let mut config_path = None;
    let mut idx = 1usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "--config" => {
                if idx + 1 >= args.len() {
                    bail!("Missing PATH after --config");
                }
                config_path = Some(args[idx + 1].clone());
                idx += 2;
            }
            "--help" | "-h" => {
                usage();
                std::process::exit(0);
            }
            other => bail!("Unknown argument '{other}'. Use --help for usage."),
        }
    }
    Ok(config_path)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text =
        serde_json::to_string_pretty(value).context("Could not serialize JSON output")?;
    println!("{text}");
    Ok(())
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let config = match parse_config_arg(&args)? {
        Some(path) => PlateConfig::from_json_path(&path)
            .with_context(|| format!("Could not load config '{path}'"))?,
        None => PlateConfig::default(),
    };

    let sink = CsvRecordSink::new(config.records_dir.clone());
    let mut ttw = ScanController::new(config, Box::new(sink))?;

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Could not read from stdin")?;
        match ShellCommand::parse(&line) {
            Ok(None) => {}
            Ok(Some(command)) => {
                let result = command.run(&mut ttw);
                print_json(&result.output)?;
                if result.quit {
                    break;
                }
            }
            Err(message) => {
                print_json(&serde_json::json!({ "error": message }))?;
            }
        }
        io::stdout().flush().ok();
    }
    Ok(())
}

fn main() {
    let filter = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
    if let Err(e) = run() {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}
