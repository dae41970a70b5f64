//! Crucible CLI.
//!
//! Usage:
//!   crucible [params.json [bounds.json]]   run once, print the result as JSON
//!   crucible --serve                       JSON-lines host on stdin/stdout
//!
//! Log verbosity follows `RUST_LOG` (default `info`); logs go to stderr.

use std::fs;
use std::io;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cr_runner::{run_optimization, RunParams};
use cr_types::SearchSpace;

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("--serve") => serve(),
        params_path => run_once(params_path, args.get(1).map(String::as_str)),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse {path}"))
}

fn run_once(params_path: Option<&str>, bounds_path: Option<&str>) -> Result<()> {
    let params = match params_path {
        Some(path) => read_json::<RunParams>(path)?,
        None => {
            info!("no parameter file given; using defaults");
            RunParams::default()
        }
    };
    let bounds = bounds_path.map(read_json::<SearchSpace>).transpose()?;

    let result = run_optimization(&params, bounds).context("optimization failed")?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// One command per stdin line, one event per stdout line.
fn serve() -> Result<()> {
    cr_runner::serve(io::stdin().lock(), io::stdout()).context("host loop failed")?;
    Ok(())
}
