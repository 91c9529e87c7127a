//! krait - a lightweight JavaScript runtime with Web Workers
//!
//! The binary runs a script file (or an inline fragment) as the root of a
//! worker tree and exits once every worker has been reclaimed.

use clap::Parser;
use colored::Colorize;
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;
use tracing_subscriber::filter::EnvFilter;

use krait::runtime::{Runtime, RuntimeConfig};

#[derive(Parser)]
#[command(name = "krait")]
#[command(version, about = "A lightweight JavaScript runtime with Web Workers")]
struct Cli {
    /// JavaScript file to execute
    file: Option<PathBuf>,

    /// Evaluate code from the command line
    #[arg(short, long)]
    eval: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut runtime = Runtime::with_config(RuntimeConfig::default()).into_diagnostic()?;

    if let Some(code) = cli.eval {
        if let Err(e) = runtime.run(&code) {
            eprintln!("{}: {}", "error".red(), e);
            std::process::exit(1);
        }
    } else if let Some(file) = cli.file {
        if let Err(e) = runtime.run_file(&file) {
            eprintln!("{}: {}", "error".red(), e);
            std::process::exit(1);
        }
    } else {
        eprintln!("{}: no input file; try `krait script.js`", "error".red());
        std::process::exit(2);
    }

    Ok(())
}
