//! `filterql` — a command-line driver for the sandboxed jq-subset
//! interpreter. Reads a filter program and a JSON input, runs it, and
//! prints every emitted value in canonical form, one per line.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use filterql_drv::{run, FilterError, RunOptions};
use filterql_eval::{Limits, Value};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Run a filterql program against a JSON input.
#[derive(Parser, Debug)]
#[command(name = "filterql")]
#[command(author = "filterql contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "A sandboxed jq-subset interpreter", long_about = None)]
struct Cli {
    /// The filter program. Read from `--program-file` instead if omitted.
    program: Option<String>,

    /// Read the filter program from a file instead of the positional argument.
    #[arg(long, conflicts_with = "program")]
    program_file: Option<PathBuf>,

    /// Read the JSON input from a file instead of stdin.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Bind `$name` to a JSON value for the duration of the run. Repeatable.
    #[arg(long = "arg", value_name = "NAME=JSON", value_parser = parse_var)]
    vars: Vec<(String, Value)>,

    /// Cap on evaluator steps before a resource fault.
    #[arg(long)]
    max_steps: Option<u64>,

    /// Cap on recursion depth before a resource fault.
    #[arg(long)]
    max_depth: Option<u32>,

    /// Cap on emitted values before a resource fault.
    #[arg(long)]
    max_outputs: Option<u64>,

    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true, env = "FILTERQL_VERBOSE")]
    verbose: bool,
}

fn parse_var(raw: &str) -> Result<(String, Value), String> {
    let (name, json) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=JSON, found `{raw}`"))?;
    let parsed: serde_json::Value =
        serde_json::from_str(json).map_err(|e| format!("invalid JSON for `{name}`: {e}"))?;
    Ok((name.to_string(), parsed.into()))
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init();
}

fn read_program(cli: &Cli) -> anyhow::Result<String> {
    if let Some(path) = &cli.program_file {
        return Ok(std::fs::read_to_string(path)?);
    }
    cli.program
        .clone()
        .ok_or_else(|| anyhow::anyhow!("no filter program given (positional argument or --program-file)"))
}

fn read_input(cli: &Cli) -> anyhow::Result<Value> {
    let text = match &cli.input {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let parsed: serde_json::Value = serde_json::from_str(&text)?;
    Ok(parsed.into())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run_cli(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_cli(cli: &Cli) -> anyhow::Result<()> {
    let program = read_program(cli)?;
    let input = read_input(cli)?;

    let mut limits = Limits::default();
    if let Some(v) = cli.max_steps {
        limits.max_steps = v;
    }
    if let Some(v) = cli.max_depth {
        limits.max_depth = v;
    }
    if let Some(v) = cli.max_outputs {
        limits.max_outputs = v;
    }

    let options = RunOptions {
        limits,
        vars: cli.vars.iter().cloned().collect(),
    };

    tracing::debug!(program = %program, "running filter");

    match run(&program, input, options) {
        Ok(outputs) => {
            for value in outputs {
                println!("{value}");
            }
            Ok(())
        }
        Err(e) => Err(report(e)),
    }
}

fn report(err: FilterError) -> anyhow::Error {
    let span = err.span();
    anyhow::anyhow!("{err} (at byte {}..{})", span.start, span.end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_var_accepts_name_equals_json() {
        let (name, value) = parse_var(r#"x=[1,2,3]"#).unwrap();
        assert_eq!(name, "x");
        assert_eq!(value, Value::from(serde_json::json!([1, 2, 3])));
    }

    #[test]
    fn parse_var_rejects_missing_equals() {
        assert!(parse_var("noequals").is_err());
    }

    #[test]
    fn parse_var_rejects_invalid_json() {
        assert!(parse_var("x=not json").is_err());
    }
}
