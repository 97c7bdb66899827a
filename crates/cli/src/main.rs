use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
use commands::{
    build_engine, execute_batch_command, execute_grade_command, execute_run_command, execute_validate_command,
    BatchArgs, EngineOverrides, GradeArgs, RunArgs,
};

#[derive(Parser)]
#[command(name = "pystep")]
#[command(about = "PyStep - sandboxed execution and grading of student programs")]
#[command(version = "0.1.0")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
    #[command(flatten)]
    pub global: GlobalArgs,
}

#[derive(Args)]
pub struct GlobalArgs {
    /// Comma separated modules submissions may import (overrides ALLOWED_IMPORTS)
    #[arg(long, global = true)]
    pub allow: Option<String>,
    /// Execution deadline in milliseconds (overrides EXECUTION_TIMEOUT)
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,
    /// Log filter, e.g. `info` or `pystep_runtime=debug` (defaults to RUST_LOG, then `warn`)
    #[arg(long, global = true)]
    pub log_level: Option<String>,
    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a program and show its output
    Run(RunCommandArgs),
    /// Run a program and compare its output with an expected output
    Grade(GradeCommandArgs),
    /// Check a program against the policy without running it
    Validate(ValidateArgs),
    /// Serve JSON grading requests, one per line on stdin
    Batch(BatchCommandArgs),
}

#[derive(Args)]
pub struct RunCommandArgs {
    /// Program file, or `-` for stdin
    pub file: PathBuf,
    /// Text returned by `input()`
    #[arg(short, long, default_value = "")]
    pub input: String,
}

#[derive(Args)]
pub struct GradeCommandArgs {
    /// Program file, or `-` for stdin
    pub file: PathBuf,
    /// Expected output
    #[arg(short, long, conflicts_with = "expected_file", required_unless_present = "expected_file")]
    pub expected: Option<String>,
    /// File holding the expected output
    #[arg(long)]
    pub expected_file: Option<PathBuf>,
    /// Text returned by `input()`
    #[arg(short, long, default_value = "")]
    pub input: String,
}

#[derive(Args)]
pub struct ValidateArgs {
    /// Program file, or `-` for stdin
    pub file: PathBuf,
}

#[derive(Args)]
pub struct BatchCommandArgs {
    /// Requests graded at the same time
    #[arg(short, long, default_value = "4")]
    pub jobs: usize,
}

fn init_tracing(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).with_context(|| format!("Invalid log filter: {}", level))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.global.log_level.as_deref())?;

    let overrides = EngineOverrides {
        allow: cli.global.allow,
        timeout_ms: cli.global.timeout_ms,
    };
    let engine = build_engine(&overrides)?;
    let json = cli.global.json;

    let ok = match cli.command {
        Commands::Run(args) => {
            let run_args = RunArgs {
                file: args.file,
                input: args.input,
                json,
            };
            execute_run_command(&engine, run_args).await?
        }
        Commands::Grade(args) => {
            let grade_args = GradeArgs {
                file: args.file,
                expected: args.expected,
                expected_file: args.expected_file,
                input: args.input,
                json,
            };
            execute_grade_command(&engine, grade_args).await?
        }
        Commands::Validate(args) => execute_validate_command(&engine, &args.file, json)?,
        Commands::Batch(args) => execute_batch_command(&engine, BatchArgs { jobs: args.jobs }).await?,
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["pystep", "run", "prog.py", "--json", "--timeout-ms", "250", "--allow", "math"])
            .unwrap();
        assert!(cli.global.json);
        assert_eq!(cli.global.timeout_ms, Some(250));
        assert_eq!(cli.global.allow.as_deref(), Some("math"));
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.file, PathBuf::from("prog.py"));
                assert_eq!(args.input, "");
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_grade_requires_an_expectation() {
        assert!(Cli::try_parse_from(["pystep", "grade", "prog.py"]).is_err());
        assert!(Cli::try_parse_from(["pystep", "grade", "prog.py", "-e", "8", "--expected-file", "out.txt"]).is_err());

        let cli = Cli::try_parse_from(["pystep", "grade", "prog.py", "-e", "8", "-i", "4"]).unwrap();
        match cli.command {
            Commands::Grade(args) => {
                assert_eq!(args.expected.as_deref(), Some("8"));
                assert_eq!(args.input, "4");
            }
            _ => panic!("expected grade"),
        }
    }

    #[test]
    fn test_batch_defaults() {
        let cli = Cli::try_parse_from(["pystep", "batch"]).unwrap();
        match cli.command {
            Commands::Batch(args) => assert_eq!(args.jobs, 4),
            _ => panic!("expected batch"),
        }
    }
}
